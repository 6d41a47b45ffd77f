//! The host-function registry: every EVM opcode routed through Wasm is
//! registered under a fixed import name with a declared arity, optional
//! argument preprocessors and an optional result finalizer.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use primitive_types::H256;

use crate::error::ExitException;
use crate::memory::GuestMemory;
use crate::opcode::Opcode;
use crate::runtime::ScopeContext;
use crate::utils::{left_pad, strip_leading_zeroes};

/// Import module every host function lives under.
pub const HOST_MODULE: &str = "env";
/// Import field of the injected gas-charge function.
pub const GAS_IMPORT_FIELD: &str = "gas";

pub const ADDRESS_DEST_LEN: usize = 20;
pub const SIZE_DEST_LEN: usize = 4;
pub const U256_DEST_LEN: usize = 32;
pub const U32_DEST_LEN: usize = 4;
pub const U64_DEST_LEN: usize = 8;
pub const HASH_DEST_LEN: usize = 32;
pub const BOOL_DEST_LEN: usize = 1;

/// How a preprocessed argument is read out of guest memory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldKind {
	/// A 20-byte address.
	Address,
	/// A 32-byte big-endian word.
	U256,
}

impl FieldKind {
	const fn len(self) -> usize {
		match self {
			Self::Address => ADDRESS_DEST_LEN,
			Self::U256 => U256_DEST_LEN,
		}
	}
}

/// Replace the raw guest-memory offset at `arg_index` of the synthesized
/// stack with the value read at that offset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Preprocessor {
	pub arg_index: usize,
	pub field: FieldKind,
}

/// One registered host function.
#[derive(Clone, Debug)]
pub struct HostFn {
	pub name: &'static str,
	pub opcode: Opcode,
	pub arity: usize,
	pub preprocessors: Vec<Preprocessor>,
	/// Destination length of the result finalizer, when the opcode delivers
	/// its result through guest memory.
	pub finalizer: Option<usize>,
}

/// Registry of host functions keyed by import name.
#[derive(Clone, Debug, Default)]
pub struct HostRegistry {
	fns: BTreeMap<&'static str, HostFn>,
}

/// Declared arity of the import servicing `opcode`, in i32 operands.
#[must_use]
pub fn import_arity(opcode: Opcode) -> Option<usize> {
	let arity = match opcode {
		Opcode::STOP => 0,
		Opcode::PC | Opcode::MSIZE | Opcode::GAS => 1,
		Opcode::ADDRESS
		| Opcode::ORIGIN
		| Opcode::CALLER
		| Opcode::CALLVALUE
		| Opcode::CALLDATASIZE
		| Opcode::CODESIZE
		| Opcode::GASPRICE
		| Opcode::RETURNDATASIZE
		| Opcode::COINBASE
		| Opcode::TIMESTAMP
		| Opcode::NUMBER
		| Opcode::DIFFICULTY
		| Opcode::GASLIMIT
		| Opcode::CHAINID
		| Opcode::SELFBALANCE
		| Opcode::BASEFEE
		| Opcode::SELFDESTRUCT => 1,
		Opcode::BALANCE
		| Opcode::EXTCODESIZE
		| Opcode::EXTCODEHASH
		| Opcode::SLOAD
		| Opcode::SSTORE
		| Opcode::BLOCKHASH
		| Opcode::CALLDATALOAD
		| Opcode::RETURN
		| Opcode::REVERT
		| Opcode::LOG0 => 2,
		Opcode::SHA3
		| Opcode::CALLDATACOPY
		| Opcode::CODECOPY
		| Opcode::RETURNDATACOPY
		| Opcode::LOG1 => 3,
		Opcode::EXTCODECOPY | Opcode::CREATE | Opcode::LOG2 => 4,
		Opcode::CREATE2 | Opcode::LOG3 => 5,
		Opcode::LOG4 => 6,
		Opcode::DELEGATECALL | Opcode::STATICCALL => 7,
		Opcode::CALL | Opcode::CALLCODE => 8,
		_ => return None,
	};
	Some(arity)
}

impl HostRegistry {
	/// Look up a host function by import name.
	#[must_use]
	pub fn get(&self, name: &str) -> Option<&HostFn> {
		self.fns.get(name)
	}

	/// Iterate all registered functions.
	pub fn iter(&self) -> impl Iterator<Item = &HostFn> {
		self.fns.values()
	}

	fn register(
		&mut self,
		name: &'static str,
		opcode: Opcode,
		finalizer: Option<usize>,
		preprocessors: Vec<Preprocessor>,
	) {
		let arity = match import_arity(opcode) {
			Some(arity) => arity,
			None => panic!("failed to register fn '{}', arity not declared", name),
		};
		self.fns.insert(
			name,
			HostFn {
				name,
				opcode,
				arity,
				preprocessors,
				finalizer,
			},
		);
	}

	/// The full EVM host function set.
	#[must_use]
	pub fn evm() -> Self {
		let mut r = Self::default();

		r.register("_evm_return", Opcode::RETURN, None, vec![]);
		r.register("_evm_address", Opcode::ADDRESS, Some(ADDRESS_DEST_LEN), vec![]);
		r.register("_evm_stop", Opcode::STOP, None, vec![]);
		r.register("_evm_keccak256", Opcode::SHA3, Some(HASH_DEST_LEN), vec![]);
		r.register(
			"_evm_balance",
			Opcode::BALANCE,
			Some(U256_DEST_LEN),
			vec![Preprocessor {
				arg_index: 0,
				field: FieldKind::Address,
			}],
		);
		r.register("_evm_origin", Opcode::ORIGIN, Some(ADDRESS_DEST_LEN), vec![]);
		r.register("_evm_caller", Opcode::CALLER, Some(ADDRESS_DEST_LEN), vec![]);
		r.register("_evm_callvalue", Opcode::CALLVALUE, Some(U256_DEST_LEN), vec![]);
		r.register(
			"_evm_calldataload",
			Opcode::CALLDATALOAD,
			Some(HASH_DEST_LEN),
			vec![Preprocessor {
				arg_index: 0,
				field: FieldKind::U256,
			}],
		);
		r.register("_evm_calldatasize", Opcode::CALLDATASIZE, Some(SIZE_DEST_LEN), vec![]);
		r.register("_evm_calldatacopy", Opcode::CALLDATACOPY, None, vec![]);
		r.register("_evm_codesize", Opcode::CODESIZE, Some(SIZE_DEST_LEN), vec![]);
		r.register("_evm_codecopy", Opcode::CODECOPY, None, vec![]);
		r.register("_evm_gasprice", Opcode::GASPRICE, Some(U256_DEST_LEN), vec![]);
		r.register(
			"_evm_extcodesize",
			Opcode::EXTCODESIZE,
			Some(SIZE_DEST_LEN),
			vec![Preprocessor {
				arg_index: 0,
				field: FieldKind::Address,
			}],
		);
		r.register(
			"_evm_extcodecopy",
			Opcode::EXTCODECOPY,
			None,
			vec![Preprocessor {
				arg_index: 0,
				field: FieldKind::Address,
			}],
		);
		r.register(
			"_evm_extcodehash",
			Opcode::EXTCODEHASH,
			Some(HASH_DEST_LEN),
			vec![Preprocessor {
				arg_index: 0,
				field: FieldKind::Address,
			}],
		);
		r.register("_evm_returndatasize", Opcode::RETURNDATASIZE, Some(SIZE_DEST_LEN), vec![]);
		r.register("_evm_returndatacopy", Opcode::RETURNDATACOPY, None, vec![]);
		r.register("_evm_blockhash", Opcode::BLOCKHASH, Some(HASH_DEST_LEN), vec![]);
		r.register("_evm_coinbase", Opcode::COINBASE, Some(ADDRESS_DEST_LEN), vec![]);
		r.register("_evm_timestamp", Opcode::TIMESTAMP, Some(U64_DEST_LEN), vec![]);
		r.register("_evm_number", Opcode::NUMBER, Some(U64_DEST_LEN), vec![]);
		r.register("_evm_difficulty", Opcode::DIFFICULTY, Some(U256_DEST_LEN), vec![]);
		r.register("_evm_gaslimit", Opcode::GASLIMIT, Some(U64_DEST_LEN), vec![]);
		r.register("_evm_chainid", Opcode::CHAINID, Some(U256_DEST_LEN), vec![]);
		r.register("_evm_selfbalance", Opcode::SELFBALANCE, Some(U256_DEST_LEN), vec![]);
		r.register("_evm_basefee", Opcode::BASEFEE, Some(U256_DEST_LEN), vec![]);
		// storage
		r.register("_evm_sload", Opcode::SLOAD, Some(U256_DEST_LEN), vec![]);
		r.register(
			"_evm_sstore",
			Opcode::SSTORE,
			None,
			vec![
				Preprocessor {
					arg_index: 0,
					field: FieldKind::U256,
				},
				Preprocessor {
					arg_index: 1,
					field: FieldKind::U256,
				},
			],
		);
		// system opcodes
		r.register("_evm_pc", Opcode::PC, Some(U32_DEST_LEN), vec![]);
		r.register("_evm_msize", Opcode::MSIZE, Some(U32_DEST_LEN), vec![]);
		r.register("_evm_gas", Opcode::GAS, Some(U64_DEST_LEN), vec![]);
		// log emit opcodes
		r.register("_evm_log0", Opcode::LOG0, None, vec![]);
		r.register("_evm_log1", Opcode::LOG1, None, vec![]);
		r.register("_evm_log2", Opcode::LOG2, None, vec![]);
		r.register("_evm_log3", Opcode::LOG3, None, vec![]);
		r.register("_evm_log4", Opcode::LOG4, None, vec![]);
		// call & create opcodes
		r.register(
			"_evm_create",
			Opcode::CREATE,
			Some(ADDRESS_DEST_LEN),
			vec![Preprocessor {
				arg_index: 0,
				field: FieldKind::U256,
			}],
		);
		r.register(
			"_evm_call",
			Opcode::CALL,
			Some(BOOL_DEST_LEN),
			vec![
				Preprocessor {
					arg_index: 1,
					field: FieldKind::Address,
				},
				Preprocessor {
					arg_index: 2,
					field: FieldKind::U256,
				},
			],
		);
		r.register(
			"_evm_callcode",
			Opcode::CALLCODE,
			Some(BOOL_DEST_LEN),
			vec![
				Preprocessor {
					arg_index: 1,
					field: FieldKind::Address,
				},
				Preprocessor {
					arg_index: 2,
					field: FieldKind::U256,
				},
			],
		);
		r.register(
			"_evm_delegatecall",
			Opcode::DELEGATECALL,
			Some(BOOL_DEST_LEN),
			vec![Preprocessor {
				arg_index: 1,
				field: FieldKind::U256,
			}],
		);
		r.register(
			"_evm_create2",
			Opcode::CREATE2,
			Some(ADDRESS_DEST_LEN),
			vec![Preprocessor {
				arg_index: 0,
				field: FieldKind::U256,
			}],
		);
		r.register(
			"_evm_staticcall",
			Opcode::STATICCALL,
			Some(BOOL_DEST_LEN),
			vec![Preprocessor {
				arg_index: 1,
				field: FieldKind::Address,
			}],
		);
		r.register("_evm_revert", Opcode::REVERT, None, vec![]);
		r.register("_evm_selfdestruct", Opcode::SELFDESTRUCT, None, vec![]);

		r
	}
}

/// Replace the guest-memory offset at `arg_index` of the stack with the
/// value it points at. The read goes through the slot-commit protocol so the
/// engine trace records the touched span.
pub fn replace_mem_offset_with_value(
	scope: &mut ScopeContext,
	memory: &mut GuestMemory<'_>,
	params: &[i64],
	pre: Preprocessor,
) -> Result<(), ExitException> {
	let expected_min_length = pre.arg_index + 1;
	if params.len() < expected_min_length {
		return Err(ExitException::Other(
			"input length is too small to contain the expected value".into(),
		));
	}
	if scope.stack.len() < expected_min_length {
		return Err(ExitException::Other(
			"stack length is too small to contain the expected value".into(),
		));
	}

	let offset = params[pre.arg_index] as u32 as u64;
	let slot = memory.slot(offset, pre.field.len());
	let value = H256::from_slice(&left_pad(slot.bytes(), 32));
	slot.commit();
	scope.stack.set(pre.arg_index, value)?;

	Ok(())
}

/// Pop-free result delivery: left-pad the remaining stack top to `dest_len`
/// bytes and write it to guest memory at the offset given by the last host
/// call argument.
pub fn copy_last_stack_item_to_memory(
	scope: &ScopeContext,
	memory: &mut GuestMemory<'_>,
	params: &[i64],
	dest_len: usize,
) -> Result<(), ExitException> {
	let dest_offset = match params.last() {
		Some(offset) => *offset as u32 as u64,
		None => {
			return Err(ExitException::Other(
				"last function param must be a destination pointer".into(),
			))
		}
	};
	let top = scope.stack.peek(0)?;
	let value = left_pad(strip_leading_zeroes(&top[..]), dest_len);
	memory.set(dest_offset, &value);

	Ok(())
}
