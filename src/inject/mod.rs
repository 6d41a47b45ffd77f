//! The pre-execution code injection pass: weaves a gas charge into every
//! basic block of a Wasm module and shadow-stack bookkeeping around calls.
//!
//! The metering algorithm divides each function body into metered blocks so
//! that, absent a trap, either all instructions of a block execute or none
//! do, and charges the whole block at its head through the imported
//! `env.gas : (i64) -> ()` host function. Two runs on the same input produce
//! identical bytes; a module that already carries the gas-charge idiom is
//! rejected.

mod costs;
mod stack_height;

pub use self::costs::instruction_cost;
pub use self::stack_height::{function_signatures, max_stack_heights, FnSignature};

use alloc::vec::Vec;
use core::mem;

use parity_wasm::builder;
use parity_wasm::elements::{
	self, External, IndexMap, Instruction, Instructions, Module, ValueType,
};

use crate::error::InjectionError;
use crate::host::{GAS_IMPORT_FIELD, HOST_MODULE};

/// Depth bound enforced by the injected shadow-stack checks.
pub const SHADOW_STACK_LIMIT: i32 = 1024;

/// Rewrite a module binary with gas metering and stack protection.
pub fn inject_gas_computation_and_stack_protection(
	code: &[u8],
) -> Result<Vec<u8>, InjectionError> {
	let module: Module =
		parity_wasm::deserialize_buffer(code).map_err(|_| InjectionError::Deserialize)?;
	let injected = inject_module(module)?;
	parity_wasm::serialize(injected).map_err(|_| InjectionError::Serialize)
}

/// Rewrite a parsed module. See [inject_gas_computation_and_stack_protection].
pub fn inject_module(module: Module) -> Result<Module, InjectionError> {
	let import_count = module.import_count(elements::ImportCountType::Function) as u32;

	let existing_gas = find_gas_import(&module);
	if let Some(gas_idx) = existing_gas {
		if starts_with_gas_charge(&module, gas_idx) {
			return Err(InjectionError::AlreadyInjected);
		}
	}

	// Static analysis runs against the original function space.
	let heights = stack_height::max_stack_heights(&module)?;
	let module_max_height = heights.iter().copied().max().unwrap_or(0);
	let shadow_global = module.globals_space() as u32;

	let mut mbuilder = builder::from_module(module);
	let (gas_func, shifted) = match existing_gas {
		Some(gas_idx) => (gas_idx, false),
		None => {
			let import_sig = mbuilder
				.push_signature(builder::signature().with_param(ValueType::I64).build_sig());
			mbuilder.push_import(
				builder::import()
					.module(HOST_MODULE)
					.field(GAS_IMPORT_FIELD)
					.external()
					.func(import_sig)
					.build(),
			);
			(import_count, true)
		}
	};
	mbuilder.push_global(
		builder::global()
			.with_type(ValueType::I32)
			.mutable()
			.init_expr(Instruction::I32Const(0))
			.build(),
	);
	let mut module = mbuilder.build();

	let import_count_new = if shifted { import_count + 1 } else { import_count };

	for section in module.sections_mut() {
		match section {
			elements::Section::Code(code_section) => {
				for func_body in code_section.bodies_mut() {
					// The added import shifts the function space; calling
					// addresses move up before anything else is woven in.
					if shifted {
						for instruction in func_body.code_mut().elements_mut().iter_mut() {
							if let Instruction::Call(call_index) = instruction {
								if *call_index >= gas_func {
									*call_index += 1;
								}
							}
						}
					}
					inject_counter(func_body.code_mut(), gas_func)?;
					inject_stack_protection(
						func_body.code_mut(),
						&heights,
						gas_func,
						import_count_new,
						shadow_global,
						module_max_height,
					)?;
				}
			}
			elements::Section::Export(export_section) => {
				if shifted {
					for export in export_section.entries_mut() {
						if let elements::Internal::Function(func_index) = export.internal_mut() {
							if *func_index >= gas_func {
								*func_index += 1;
							}
						}
					}
				}
			}
			elements::Section::Element(elements_section) => {
				if shifted {
					for segment in elements_section.entries_mut() {
						for func_index in segment.members_mut() {
							if *func_index >= gas_func {
								*func_index += 1;
							}
						}
					}
				}
			}
			elements::Section::Start(start_idx) => {
				if shifted && *start_idx >= gas_func {
					*start_idx += 1;
				}
			}
			elements::Section::Name(name_section) => {
				if shifted {
					for functions in name_section.functions_mut() {
						*functions.names_mut() =
							IndexMap::from_iter(functions.names().iter().map(|(mut idx, name)| {
								if idx >= gas_func {
									idx += 1;
								}
								(idx, name.clone())
							}));
					}
				}
			}
			_ => {}
		}
	}

	Ok(module)
}

fn find_gas_import(module: &Module) -> Option<u32> {
	let mut fn_index = 0u32;
	for entry in module.import_section()?.entries() {
		if let External::Function(_) = entry.external() {
			if entry.module() == HOST_MODULE && entry.field() == GAS_IMPORT_FIELD {
				return Some(fn_index);
			}
			fn_index += 1;
		}
	}
	None
}

/// Whether the first function body opens with the `i64.const; call $gas`
/// idiom the injector itself emits.
fn starts_with_gas_charge(module: &Module, gas_idx: u32) -> bool {
	module
		.code_section()
		.and_then(|section| section.bodies().first())
		.map(|body| {
			let elements = body.code().elements();
			matches!(elements.first(), Some(Instruction::I64Const(_)))
				&& matches!(elements.get(1), Some(Instruction::Call(idx)) if *idx == gas_idx)
		})
		.unwrap_or(false)
}

/// A control flow block is opened with the `block`, `loop`, and `if`
/// instructions and is closed with `end`. The control blocks form a stack
/// during program execution.
#[derive(Debug)]
struct ControlBlock {
	/// The lowest control stack index corresponding to a forward jump
	/// targeted by a br, br_if, or br_table instruction within this control
	/// block. The index must refer to a control block that is not a loop,
	/// meaning it is a forward jump.
	lowest_forward_br_target: usize,

	/// The active metered block that new instructions contribute a gas cost
	/// towards.
	active_metered_block: MeteredBlock,

	/// Whether the control block is a loop. Branches to loops jump to the
	/// beginning of the block, not the end as with the other control blocks.
	is_loop: bool,
}

/// A block of code that metering instructions will be inserted at the
/// beginning of. Metered blocks are constructed with the property that, in
/// the absence of any traps, either all instructions in the block are
/// executed or none are.
#[derive(Debug)]
struct MeteredBlock {
	/// Index of the first instruction in the block.
	start_pos: usize,
	/// Sum of costs of all instructions until end of the block.
	cost: u64,
}

/// State of the gas metering algorithm.
struct Counter {
	/// A stack of control blocks. This stack grows when new control blocks
	/// are opened with `block`, `loop`, and `if` and shrinks when control
	/// blocks are closed with `end`. The first block on the stack corresponds
	/// to the function body.
	stack: Vec<ControlBlock>,

	/// A list of metered blocks that have been finalized, meaning they will
	/// no longer change.
	finalized_blocks: Vec<MeteredBlock>,
}

impl Counter {
	fn new() -> Counter {
		Counter {
			stack: Vec::new(),
			finalized_blocks: Vec::new(),
		}
	}

	/// Open a new control block. The cursor is the position of the first
	/// instruction in the block.
	fn begin_control_block(&mut self, cursor: usize, is_loop: bool) {
		let index = self.stack.len();
		self.stack.push(ControlBlock {
			lowest_forward_br_target: index,
			active_metered_block: MeteredBlock {
				start_pos: cursor,
				cost: 0,
			},
			is_loop,
		})
	}

	/// Close the last control block. The cursor is the position of the final
	/// (pseudo-)instruction in the block.
	fn finalize_control_block(&mut self, cursor: usize) -> Result<(), InjectionError> {
		// This either finalizes the active metered block or merges its cost
		// into the active metered block in the previous control block on the
		// stack.
		self.finalize_metered_block(cursor)?;

		// Pop the control block stack.
		let closing_control_block = self.stack.pop().ok_or(InjectionError::MalformedModule)?;
		let closing_control_index = self.stack.len();

		if self.stack.is_empty() {
			return Ok(());
		}

		// Update the lowest_forward_br_target for the control block now on
		// top of the stack.
		{
			let control_block = self
				.stack
				.last_mut()
				.ok_or(InjectionError::MalformedModule)?;
			control_block.lowest_forward_br_target = core::cmp::min(
				control_block.lowest_forward_br_target,
				closing_control_block.lowest_forward_br_target,
			);
		}

		// If there may have been a branch to a lower index, then also
		// finalize the active metered block for the previous control block.
		// Otherwise, finalize it and begin a new one.
		let may_br_out = closing_control_block.lowest_forward_br_target < closing_control_index;
		if may_br_out {
			self.finalize_metered_block(cursor)?;
		}

		Ok(())
	}

	/// Finalize the current active metered block.
	fn finalize_metered_block(&mut self, cursor: usize) -> Result<(), InjectionError> {
		let closing_metered_block = {
			let control_block = self
				.stack
				.last_mut()
				.ok_or(InjectionError::MalformedModule)?;
			mem::replace(
				&mut control_block.active_metered_block,
				MeteredBlock {
					start_pos: cursor + 1,
					cost: 0,
				},
			)
		};

		// If the block was opened with a `block`, then its start position
		// will be set to that of the active metered block in the control
		// block one higher on the stack. This is because any instructions
		// between a `block` and the first branch are part of the same basic
		// block as the preceding instruction. In this case, instead of
		// finalizing the block, merge its cost into the other active metered
		// block to avoid injecting unnecessary instructions.
		let last_index = self.stack.len() - 1;
		if last_index > 0 {
			let prev_control_block = self
				.stack
				.get_mut(last_index - 1)
				.ok_or(InjectionError::MalformedModule)?;
			let prev_metered_block = &mut prev_control_block.active_metered_block;
			if closing_metered_block.start_pos == prev_metered_block.start_pos {
				prev_metered_block.cost = prev_metered_block
					.cost
					.checked_add(closing_metered_block.cost)
					.ok_or(InjectionError::Unmeterable)?;
				return Ok(());
			}
		}

		if closing_metered_block.cost > 0 {
			self.finalized_blocks.push(closing_metered_block);
		}
		Ok(())
	}

	/// Handle a branch instruction in the program. The cursor is the index of
	/// the branch instruction in the program. The indices are the stack
	/// positions of the target control blocks.
	fn branch(&mut self, cursor: usize, indices: &[usize]) -> Result<(), InjectionError> {
		self.finalize_metered_block(cursor)?;

		// Update the lowest_forward_br_target of the current control block.
		for &index in indices {
			let target_is_loop = {
				let target_block = self.stack.get(index).ok_or(InjectionError::MalformedModule)?;
				target_block.is_loop
			};
			if target_is_loop {
				continue;
			}

			let control_block = self
				.stack
				.last_mut()
				.ok_or(InjectionError::MalformedModule)?;
			control_block.lowest_forward_br_target =
				core::cmp::min(control_block.lowest_forward_br_target, index);
		}

		Ok(())
	}

	/// Returns the stack index of the active control block. Returns None if
	/// the stack is empty.
	fn active_control_block_index(&self) -> Option<usize> {
		self.stack.len().checked_sub(1)
	}

	/// Get a reference to the currently active metered block.
	fn active_metered_block(&mut self) -> Result<&mut MeteredBlock, InjectionError> {
		let top_block = self
			.stack
			.last_mut()
			.ok_or(InjectionError::MalformedModule)?;
		Ok(&mut top_block.active_metered_block)
	}

	/// Increment the cost of the current block by the specified value.
	fn increment(&mut self, val: u32) -> Result<(), InjectionError> {
		let top_block = self.active_metered_block()?;
		top_block.cost = top_block
			.cost
			.checked_add(val.into())
			.ok_or(InjectionError::Unmeterable)?;
		Ok(())
	}
}

fn determine_metered_blocks(
	instructions: &Instructions,
) -> Result<Vec<MeteredBlock>, InjectionError> {
	use Instruction::*;

	let mut counter = Counter::new();

	// Begin an implicit function (i.e. `func...end`) block.
	counter.begin_control_block(0, false);

	for cursor in 0..instructions.elements().len() {
		let instruction = &instructions.elements()[cursor];
		let instruction_cost =
			costs::instruction_cost(instruction).ok_or(InjectionError::Unmeterable)?;
		match instruction {
			Block(_) => {
				counter.increment(instruction_cost)?;

				// Begin new block. The cost of the following opcodes until
				// `end` or `else` will be included into this block. The start
				// position is set to that of the previous active metered
				// block to signal that they should be merged in order to
				// reduce unnecessary metering instructions.
				let top_block_start_pos = counter.active_metered_block()?.start_pos;
				counter.begin_control_block(top_block_start_pos, false);
			}
			If(_) => {
				counter.increment(instruction_cost)?;
				counter.begin_control_block(cursor + 1, false);
			}
			Loop(_) => {
				counter.increment(instruction_cost)?;
				counter.begin_control_block(cursor + 1, true);
			}
			End => {
				counter.finalize_control_block(cursor)?;
			}
			Else => {
				counter.finalize_metered_block(cursor)?;
			}
			Br(label) | BrIf(label) => {
				counter.increment(instruction_cost)?;

				// Label is a relative index into the control stack.
				let active_index = counter
					.active_control_block_index()
					.ok_or(InjectionError::MalformedModule)?;
				let target_index = active_index
					.checked_sub(*label as usize)
					.ok_or(InjectionError::MalformedModule)?;
				counter.branch(cursor, &[target_index])?;
			}
			BrTable(br_table_data) => {
				counter.increment(instruction_cost)?;

				let active_index = counter
					.active_control_block_index()
					.ok_or(InjectionError::MalformedModule)?;
				let target_indices = [br_table_data.default]
					.iter()
					.chain(br_table_data.table.iter())
					.map(|label| active_index.checked_sub(*label as usize))
					.collect::<Option<Vec<_>>>()
					.ok_or(InjectionError::MalformedModule)?;
				counter.branch(cursor, &target_indices)?;
			}
			Return => {
				counter.increment(instruction_cost)?;
				counter.branch(cursor, &[0])?;
			}
			Call(_) | CallIndirect(_, _) => {
				// A host call may halt the engine; everything after it is a
				// new basic block with its own charge.
				counter.increment(instruction_cost)?;
				counter.finalize_metered_block(cursor)?;
			}
			_ => {
				// An ordinal non control flow instruction increments the cost
				// of the current block.
				counter.increment(instruction_cost)?;
			}
		}
	}

	counter
		.finalized_blocks
		.sort_unstable_by_key(|block| block.start_pos);
	Ok(counter.finalized_blocks)
}

fn inject_counter(
	instructions: &mut Instructions,
	gas_func: u32,
) -> Result<(), InjectionError> {
	let blocks = determine_metered_blocks(instructions)?;
	insert_metering_calls(instructions, blocks, gas_func)
}

// Then insert metering calls into a sequence of instructions given the block
// locations and costs.
fn insert_metering_calls(
	instructions: &mut Instructions,
	blocks: Vec<MeteredBlock>,
	gas_func: u32,
) -> Result<(), InjectionError> {
	use Instruction::*;

	// To do this in linear time, construct a new vector of instructions,
	// copying over old instructions one by one and injecting new ones as
	// required.
	let new_instrs_len = instructions.elements().len() + 2 * blocks.len();
	let original_instrs = mem::replace(
		instructions.elements_mut(),
		Vec::with_capacity(new_instrs_len),
	);
	let new_instrs = instructions.elements_mut();

	let mut block_iter = blocks.into_iter().peekable();
	for (original_pos, instr) in original_instrs.into_iter().enumerate() {
		// If the next block starts at this position, inject metering
		// instructions.
		let used_block = if let Some(block) = block_iter.peek() {
			if block.start_pos == original_pos {
				new_instrs.push(I64Const(block.cost as i64));
				new_instrs.push(Call(gas_func));
				true
			} else {
				false
			}
		} else {
			false
		};

		if used_block {
			block_iter.next();
		}

		// Copy over the original instruction.
		new_instrs.push(instr);
	}

	if block_iter.next().is_some() {
		return Err(InjectionError::MalformedModule);
	}

	Ok(())
}

/// Weave shadow-stack bookkeeping around every call into an internal
/// function: bump the shadow global by the callee's maximum stack height,
/// trap when it exceeds the depth bound, and restore it after the call.
/// Indirect calls charge the module-wide maximum.
fn inject_stack_protection(
	instructions: &mut Instructions,
	heights: &[u32],
	gas_func: u32,
	import_count: u32,
	shadow_global: u32,
	module_max_height: u32,
) -> Result<(), InjectionError> {
	use Instruction::*;

	let original_instrs = mem::replace(instructions.elements_mut(), Vec::new());
	let new_instrs = instructions.elements_mut();

	for instr in original_instrs {
		let height = match instr {
			Call(idx) if idx != gas_func && idx >= import_count => heights
				.get((idx - import_count) as usize)
				.copied()
				.ok_or(InjectionError::MalformedModule)?,
			CallIndirect(_, _) => module_max_height,
			_ => {
				new_instrs.push(instr);
				continue;
			}
		};

		new_instrs.extend_from_slice(&[
			GetGlobal(shadow_global),
			I32Const(height as i32),
			I32Add,
			SetGlobal(shadow_global),
			GetGlobal(shadow_global),
			I32Const(SHADOW_STACK_LIMIT),
			I32GtU,
			If(elements::BlockType::NoResult),
			Unreachable,
			End,
		]);
		new_instrs.push(instr);
		new_instrs.extend_from_slice(&[
			GetGlobal(shadow_global),
			I32Const(height as i32),
			I32Sub,
			SetGlobal(shadow_global),
		]);
	}

	Ok(())
}
