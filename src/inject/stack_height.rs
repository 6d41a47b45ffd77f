//! Linear abstract-stack analysis computing, per function body, the maximum
//! operand-stack height the function can reach. The shadow-stack protection
//! charges this figure against the global depth counter around every call.

use alloc::vec::Vec;

use parity_wasm::elements::{External, FuncBody, Instruction, Module, Type};

use crate::error::InjectionError;

/// Signature of a function in the module's function space: operands popped
/// and pushed by a call to it.
#[derive(Clone, Copy, Debug)]
pub struct FnSignature {
	pub params: u32,
	pub results: u32,
}

/// Signatures of the full function space, imports first.
pub fn function_signatures(module: &Module) -> Result<Vec<FnSignature>, InjectionError> {
	let types = module
		.type_section()
		.map(|s| s.types().to_vec())
		.unwrap_or_default();
	let signature_of = |type_ref: u32| -> Result<FnSignature, InjectionError> {
		match types.get(type_ref as usize) {
			Some(Type::Function(func_type)) => Ok(FnSignature {
				params: func_type.params().len() as u32,
				results: func_type.results().len() as u32,
			}),
			None => Err(InjectionError::MalformedModule),
		}
	};

	let mut signatures = Vec::new();
	if let Some(imports) = module.import_section() {
		for entry in imports.entries() {
			if let External::Function(type_ref) = entry.external() {
				signatures.push(signature_of(*type_ref)?);
			}
		}
	}
	if let Some(functions) = module.function_section() {
		for func in functions.entries() {
			signatures.push(signature_of(func.type_ref())?);
		}
	}

	Ok(signatures)
}

/// Signature referenced by a `call_indirect` instruction.
pub fn indirect_signature(module: &Module, type_ref: u32) -> Result<FnSignature, InjectionError> {
	match module
		.type_section()
		.and_then(|s| s.types().get(type_ref as usize))
	{
		Some(Type::Function(func_type)) => Ok(FnSignature {
			params: func_type.params().len() as u32,
			results: func_type.results().len() as u32,
		}),
		None => Err(InjectionError::MalformedModule),
	}
}

/// Compute the maximum operand-stack height of every function body, in body
/// order. Locals are not part of the figure; the engine reports them
/// separately.
pub fn max_stack_heights(module: &Module) -> Result<Vec<u32>, InjectionError> {
	let signatures = function_signatures(module)?;
	let bodies = module
		.code_section()
		.map(|s| s.bodies().to_vec())
		.unwrap_or_default();

	bodies
		.iter()
		.map(|body| body_max_height(module, body, &signatures))
		.collect()
}

fn body_max_height(
	module: &Module,
	body: &FuncBody,
	signatures: &[FnSignature],
) -> Result<u32, InjectionError> {
	let mut current: i64 = 0;
	let mut max: i64 = 0;

	for instruction in body.code().elements() {
		let (pops, pushes) = stack_effect(module, instruction, signatures)?;
		current -= i64::from(pops);
		// Branches may have unwound operands we did not model; the analysis
		// is an upper bound, never negative.
		if current < 0 {
			current = 0;
		}
		current += i64::from(pushes);
		if current > max {
			max = current;
		}
	}

	Ok(max as u32)
}

fn stack_effect(
	module: &Module,
	instruction: &Instruction,
	signatures: &[FnSignature],
) -> Result<(u32, u32), InjectionError> {
	use Instruction::*;

	let effect = match instruction {
		Unreachable | Nop | Block(_) | Loop(_) | Else | End | Br(_) | Return => (0, 0),
		If(_) | BrIf(_) | BrTable(_) => (1, 0),

		Call(index) => {
			let signature = signatures
				.get(*index as usize)
				.ok_or(InjectionError::MalformedModule)?;
			(signature.params, signature.results)
		}
		CallIndirect(type_ref, _) => {
			let signature = indirect_signature(module, *type_ref)?;
			// The table index rides on top of the arguments.
			(signature.params + 1, signature.results)
		}

		Drop => (1, 0),
		Select => (3, 1),

		GetLocal(_) | GetGlobal(_) => (0, 1),
		SetLocal(_) | SetGlobal(_) => (1, 0),
		TeeLocal(_) => (1, 1),

		I32Load(_, _) | I64Load(_, _) | I32Load8S(_, _) | I32Load8U(_, _) | I32Load16S(_, _)
		| I32Load16U(_, _) | I64Load8S(_, _) | I64Load8U(_, _) | I64Load16S(_, _)
		| I64Load16U(_, _) | I64Load32S(_, _) | I64Load32U(_, _) => (1, 1),
		I32Store(_, _) | I64Store(_, _) | I32Store8(_, _) | I32Store16(_, _)
		| I64Store8(_, _) | I64Store16(_, _) | I64Store32(_, _) => (2, 0),

		CurrentMemory(_) => (0, 1),
		GrowMemory(_) => (1, 1),

		I32Const(_) | I64Const(_) => (0, 1),

		I32Eqz | I64Eqz => (1, 1),
		I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS
		| I32GeU | I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU
		| I64GeS | I64GeU => (2, 1),

		I32Clz | I32Ctz | I32Popcnt | I64Clz | I64Ctz | I64Popcnt | I32WrapI64
		| I64ExtendSI32 | I64ExtendUI32 => (1, 1),
		I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or
		| I32Xor | I32Shl | I32ShrS | I32ShrU | I32Rotl | I32Rotr | I64Add | I64Sub
		| I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or | I64Xor
		| I64Shl | I64ShrS | I64ShrU | I64Rotl | I64Rotr => (2, 1),

		// Anything else was already refused by the cost table.
		_ => (0, 0),
	};

	Ok(effect)
}
