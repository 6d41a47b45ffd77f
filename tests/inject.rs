use parity_wasm::builder;
use parity_wasm::elements::{BlockType, Instruction::*, Instructions, Module};

use evm_wasm::inject::{inject_gas_computation_and_stack_protection, inject_module};
use evm_wasm::InjectionError;

fn two_function_module() -> Module {
	builder::module()
		.function()
		.signature()
		.param()
		.i32()
		.build()
		.body()
		.with_instructions(Instructions::new(vec![GetLocal(0), Drop, End]))
		.build()
		.build()
		.function()
		.signature()
		.build()
		.body()
		.with_instructions(Instructions::new(vec![I32Const(7), Call(0), End]))
		.build()
		.build()
		.export()
		.field("main")
		.internal()
		.func(1)
		.build()
		.build()
}

fn function_body(module: &Module, index: usize) -> &[parity_wasm::elements::Instruction] {
	module
		.code_section()
		.unwrap()
		.bodies()
		.get(index)
		.unwrap()
		.code()
		.elements()
}

#[test]
fn gas_charge_lands_at_every_block_head() {
	let injected = inject_module(two_function_module()).unwrap();

	// Function space after injection: 0 = env.gas import, 1 and 2 the
	// original bodies. Leaf body: local.get(1) + drop(1).
	assert_eq!(
		function_body(&injected, 0),
		&[I64Const(2), Call(0), GetLocal(0), Drop, End][..]
	);
}

#[test]
fn internal_calls_get_shadow_stack_protection() {
	let module = two_function_module();
	let shadow_global = module.globals_space() as u32;
	let injected = inject_module(module).unwrap();

	// i32.const(1) + call(4), followed by the wrapped call: the callee's max
	// stack height is 1 (a single local.get).
	assert_eq!(
		function_body(&injected, 1),
		&[
			I64Const(5),
			Call(0),
			I32Const(7),
			GetGlobal(shadow_global),
			I32Const(1),
			I32Add,
			SetGlobal(shadow_global),
			GetGlobal(shadow_global),
			I32Const(1024),
			I32GtU,
			If(BlockType::NoResult),
			Unreachable,
			End,
			Call(1),
			GetGlobal(shadow_global),
			I32Const(1),
			I32Sub,
			SetGlobal(shadow_global),
			End,
		][..]
	);

	// The shadow global was appended, mutable and zero-initialized.
	let globals = injected.global_section().unwrap().entries();
	let added = globals.last().unwrap();
	assert!(added.global_type().is_mutable());
	assert_eq!(
		added.init_expr().code().first(),
		Some(&I32Const(0))
	);
}

#[test]
fn branches_split_metered_blocks() {
	let module = builder::module()
		.function()
		.signature()
		.param()
		.i32()
		.build()
		.body()
		.with_instructions(Instructions::new(vec![
			GetLocal(0),
			If(BlockType::NoResult),
			GetLocal(0),
			Drop,
			Else,
			GetLocal(0),
			GetLocal(0),
			Drop,
			Drop,
			End,
			End,
		]))
		.build()
		.build()
		.build();

	let injected = inject_module(module).unwrap();
	assert_eq!(
		function_body(&injected, 0),
		&[
			// function entry: local.get + if
			I64Const(2),
			Call(0),
			GetLocal(0),
			If(BlockType::NoResult),
			// then arm: local.get + drop
			I64Const(2),
			Call(0),
			GetLocal(0),
			Drop,
			Else,
			// else arm: two local.get + two drop
			I64Const(4),
			Call(0),
			GetLocal(0),
			GetLocal(0),
			Drop,
			Drop,
			End,
			End,
		][..]
	);
}

#[test]
fn calls_terminate_basic_blocks() {
	let module = builder::module()
		.function()
		.signature()
		.build()
		.body()
		.with_instructions(Instructions::new(vec![Nop, Call(0), Nop, End]))
		.build()
		.build()
		.build();

	let injected = inject_module(module).unwrap();
	// The charge before the call covers nop + call; everything after the
	// call is a fresh block with its own charge.
	assert_eq!(
		function_body(&injected, 0),
		&[
			I64Const(5),
			Call(0),
			Nop,
			GetGlobal(0),
			I32Const(0),
			I32Add,
			SetGlobal(0),
			GetGlobal(0),
			I32Const(1024),
			I32GtU,
			If(BlockType::NoResult),
			Unreachable,
			End,
			Call(1),
			GetGlobal(0),
			I32Const(0),
			I32Sub,
			SetGlobal(0),
			I64Const(1),
			Call(0),
			Nop,
			End,
		][..]
	);
}

#[test]
fn exported_function_indices_are_fixed_up() {
	let injected = inject_module(two_function_module()).unwrap();

	let export = injected
		.export_section()
		.unwrap()
		.entries()
		.iter()
		.find(|e| e.field() == "main")
		.unwrap();
	match export.internal() {
		parity_wasm::elements::Internal::Function(index) => assert_eq!(*index, 2),
		other => panic!("unexpected export internal: {:?}", other),
	}
}

#[test]
fn injection_is_deterministic() {
	let code = parity_wasm::serialize(two_function_module()).unwrap();
	let first = inject_gas_computation_and_stack_protection(&code).unwrap();
	let second = inject_gas_computation_and_stack_protection(&code).unwrap();
	assert_eq!(first, second);
}

#[test]
fn instrumented_modules_are_rejected() {
	let code = parity_wasm::serialize(two_function_module()).unwrap();
	let injected = inject_gas_computation_and_stack_protection(&code).unwrap();
	assert_eq!(
		inject_gas_computation_and_stack_protection(&injected),
		Err(InjectionError::AlreadyInjected)
	);
}

#[test]
fn malformed_binaries_are_rejected() {
	assert_eq!(
		inject_gas_computation_and_stack_protection(&[0xde, 0xad]),
		Err(InjectionError::Deserialize)
	);
}

#[test]
fn floating_point_is_unmeterable() {
	let module = builder::module()
		.function()
		.signature()
		.build()
		.body()
		.with_instructions(Instructions::new(vec![F32Const(0), Drop, End]))
		.build()
		.build()
		.build();

	assert_eq!(inject_module(module), Err(InjectionError::Unmeterable));
}
