//! The operation table the opcode shim executes against: for every routed
//! opcode a record of constant gas, dynamic gas, memory bound and executor.
//! All entries are known at build time.

use primitive_types::{H160, H256};

use crate::error::ExitException;
use crate::eval::{self, Control};
use crate::gasometer::{self, memory_size};
use crate::memory::GuestMemory;
use crate::opcode::Opcode;
use crate::runtime::{Handler, ScopeContext};
use crate::stack::Stack;
use crate::utils::h256_to_h160;

/// Executor function type.
pub type OpFn = fn(&mut ScopeContext, &mut GuestMemory<'_>, &mut dyn Handler) -> Control;

/// Dynamic gas function type. Receives the word-aligned memory bound in
/// bytes, already derived from the operation's [MemSizeFn].
pub type DynGasFn =
	fn(&mut ScopeContext, &mut GuestMemory<'_>, &mut dyn Handler, u64) -> Result<u64, ExitException>;

/// Memory bound function type, peeking the operand stack.
pub type MemSizeFn = fn(&Stack) -> Result<u64, ExitException>;

/// One opcode's pricing and execution.
#[derive(Clone, Copy)]
pub struct Operation {
	pub constant_gas: u64,
	pub dynamic_gas: Option<DynGasFn>,
	pub memory_size: Option<MemSizeFn>,
	pub execute: OpFn,
}

impl Operation {
	const fn constant(constant_gas: u64, execute: OpFn) -> Self {
		Self {
			constant_gas,
			dynamic_gas: None,
			memory_size: None,
			execute,
		}
	}

	const fn dynamic(constant_gas: u64, dynamic_gas: DynGasFn, execute: OpFn) -> Self {
		Self {
			constant_gas,
			dynamic_gas: Some(dynamic_gas),
			memory_size: None,
			execute,
		}
	}

	const fn with_memory(
		constant_gas: u64,
		dynamic_gas: DynGasFn,
		memory_size: MemSizeFn,
		execute: OpFn,
	) -> Self {
		Self {
			constant_gas,
			dynamic_gas: Some(dynamic_gas),
			memory_size: Some(memory_size),
			execute,
		}
	}
}

/// The jump table for the routed opcode set.
pub struct JumpTable([Option<Operation>; 256]);

impl JumpTable {
	/// Look up an operation.
	#[must_use]
	pub fn get(&self, opcode: Opcode) -> Option<&Operation> {
		self.0[opcode.as_usize()].as_ref()
	}

	/// The post-London mainnet table.
	#[must_use]
	pub fn london() -> Self {
		let mut table: [Option<Operation>; 256] = [None; 256];

		table[Opcode::STOP.as_usize()] = Some(Operation::constant(0, eval::stop));
		table[Opcode::RETURN.as_usize()] =
			Some(Operation::with_memory(0, expansion_only_gas, memory_size::ret, eval::ret));
		table[Opcode::REVERT.as_usize()] =
			Some(Operation::with_memory(0, expansion_only_gas, memory_size::ret, eval::revert));

		table[Opcode::SHA3.as_usize()] =
			Some(Operation::with_memory(gasometer::G_SHA3, sha3_gas, memory_size::sha3, eval::sha3));

		table[Opcode::ADDRESS.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::address));
		table[Opcode::BALANCE.as_usize()] =
			Some(Operation::dynamic(0, account_access_gas, eval::balance));
		table[Opcode::ORIGIN.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::origin));
		table[Opcode::CALLER.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::caller));
		table[Opcode::CALLVALUE.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::callvalue));
		table[Opcode::CALLDATALOAD.as_usize()] =
			Some(Operation::constant(gasometer::G_FASTEST, eval::calldataload));
		table[Opcode::CALLDATASIZE.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::calldatasize));
		table[Opcode::CALLDATACOPY.as_usize()] = Some(Operation::with_memory(
			gasometer::G_FASTEST,
			copier_gas,
			memory_size::copier,
			eval::calldatacopy,
		));
		table[Opcode::CODESIZE.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::codesize));
		table[Opcode::CODECOPY.as_usize()] = Some(Operation::with_memory(
			gasometer::G_FASTEST,
			copier_gas,
			memory_size::copier,
			eval::codecopy,
		));
		table[Opcode::GASPRICE.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::gasprice));
		table[Opcode::EXTCODESIZE.as_usize()] =
			Some(Operation::dynamic(0, account_access_gas, eval::extcodesize));
		table[Opcode::EXTCODECOPY.as_usize()] = Some(Operation::with_memory(
			0,
			ext_copier_gas,
			memory_size::ext_copier,
			eval::extcodecopy,
		));
		table[Opcode::EXTCODEHASH.as_usize()] =
			Some(Operation::dynamic(0, account_access_gas, eval::extcodehash));
		table[Opcode::RETURNDATASIZE.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::returndatasize));
		table[Opcode::RETURNDATACOPY.as_usize()] = Some(Operation::with_memory(
			gasometer::G_FASTEST,
			copier_gas,
			memory_size::copier,
			eval::returndatacopy,
		));

		table[Opcode::BLOCKHASH.as_usize()] =
			Some(Operation::constant(gasometer::G_BLOCKHASH, eval::blockhash));
		table[Opcode::COINBASE.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::coinbase));
		table[Opcode::TIMESTAMP.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::timestamp));
		table[Opcode::NUMBER.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::number));
		table[Opcode::DIFFICULTY.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::difficulty));
		table[Opcode::GASLIMIT.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::gaslimit));
		table[Opcode::CHAINID.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::chainid));
		table[Opcode::SELFBALANCE.as_usize()] =
			Some(Operation::constant(gasometer::G_FAST, eval::selfbalance));
		table[Opcode::BASEFEE.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::basefee));

		table[Opcode::SLOAD.as_usize()] = Some(Operation::dynamic(0, sload_gas, eval::sload));
		table[Opcode::SSTORE.as_usize()] = Some(Operation::dynamic(0, sstore_gas, eval::sstore));
		table[Opcode::PC.as_usize()] = Some(Operation::constant(gasometer::G_QUICK, eval::pc));
		table[Opcode::MSIZE.as_usize()] =
			Some(Operation::constant(gasometer::G_QUICK, eval::msize));
		table[Opcode::GAS.as_usize()] = Some(Operation::constant(gasometer::G_QUICK, eval::gas));

		table[Opcode::LOG0.as_usize()] =
			Some(Operation::with_memory(0, log_gas::<0>, memory_size::log, eval::log0));
		table[Opcode::LOG1.as_usize()] =
			Some(Operation::with_memory(0, log_gas::<1>, memory_size::log, eval::log1));
		table[Opcode::LOG2.as_usize()] =
			Some(Operation::with_memory(0, log_gas::<2>, memory_size::log, eval::log2));
		table[Opcode::LOG3.as_usize()] =
			Some(Operation::with_memory(0, log_gas::<3>, memory_size::log, eval::log3));
		table[Opcode::LOG4.as_usize()] =
			Some(Operation::with_memory(0, log_gas::<4>, memory_size::log, eval::log4));

		table[Opcode::CREATE.as_usize()] = Some(Operation::with_memory(
			gasometer::G_CREATE,
			expansion_only_gas,
			memory_size::create,
			eval::create,
		));
		table[Opcode::CREATE2.as_usize()] = Some(Operation::with_memory(
			gasometer::G_CREATE,
			create2_gas,
			memory_size::create,
			eval::create2,
		));
		table[Opcode::CALL.as_usize()] = Some(Operation::with_memory(
			0,
			call_gas,
			memory_size::call,
			eval::call,
		));
		table[Opcode::CALLCODE.as_usize()] = Some(Operation::with_memory(
			0,
			callcode_gas,
			memory_size::call,
			eval::callcode,
		));
		table[Opcode::DELEGATECALL.as_usize()] = Some(Operation::with_memory(
			0,
			plain_call_gas,
			memory_size::delegate_call,
			eval::delegatecall,
		));
		table[Opcode::STATICCALL.as_usize()] = Some(Operation::with_memory(
			0,
			plain_call_gas,
			memory_size::delegate_call,
			eval::staticcall,
		));
		table[Opcode::SELFDESTRUCT.as_usize()] =
			Some(Operation::dynamic(0, selfdestruct_gas, eval::selfdestruct));

		Self(table)
	}
}

fn expansion_only_gas(
	_scope: &mut ScopeContext,
	memory: &mut GuestMemory<'_>,
	_handler: &mut dyn Handler,
	memory_size: u64,
) -> Result<u64, ExitException> {
	gasometer::memory_expansion_gas(memory.len(), memory_size)
}

fn sha3_gas(
	scope: &mut ScopeContext,
	memory: &mut GuestMemory<'_>,
	_handler: &mut dyn Handler,
	memory_size: u64,
) -> Result<u64, ExitException> {
	let words = gasometer::sha3_gas(scope.stack.peek(1)?)?;
	let expansion = gasometer::memory_expansion_gas(memory.len(), memory_size)?;
	words
		.checked_add(expansion)
		.ok_or(ExitException::GasUintOverflow)
}

fn copier_gas(
	scope: &mut ScopeContext,
	memory: &mut GuestMemory<'_>,
	_handler: &mut dyn Handler,
	memory_size: u64,
) -> Result<u64, ExitException> {
	let copy = gasometer::copy_gas(scope.stack.peek(2)?)?;
	let expansion = gasometer::memory_expansion_gas(memory.len(), memory_size)?;
	copy.checked_add(expansion)
		.ok_or(ExitException::GasUintOverflow)
}

fn ext_copier_gas(
	scope: &mut ScopeContext,
	memory: &mut GuestMemory<'_>,
	handler: &mut dyn Handler,
	memory_size: u64,
) -> Result<u64, ExitException> {
	let access = gasometer::account_access_gas(handler, peek_address(scope, 0)?);
	let copy = gasometer::copy_gas(scope.stack.peek(3)?)?;
	let expansion = gasometer::memory_expansion_gas(memory.len(), memory_size)?;
	access
		.checked_add(copy)
		.and_then(|g| g.checked_add(expansion))
		.ok_or(ExitException::GasUintOverflow)
}

fn account_access_gas(
	scope: &mut ScopeContext,
	_memory: &mut GuestMemory<'_>,
	handler: &mut dyn Handler,
	_memory_size: u64,
) -> Result<u64, ExitException> {
	Ok(gasometer::account_access_gas(handler, peek_address(scope, 0)?))
}

fn sload_gas(
	scope: &mut ScopeContext,
	_memory: &mut GuestMemory<'_>,
	handler: &mut dyn Handler,
	_memory_size: u64,
) -> Result<u64, ExitException> {
	let index = scope.stack.peek(0)?;
	Ok(gasometer::sload_gas(handler, scope.contract.address, index))
}

fn sstore_gas(
	scope: &mut ScopeContext,
	_memory: &mut GuestMemory<'_>,
	handler: &mut dyn Handler,
	_memory_size: u64,
) -> Result<u64, ExitException> {
	let index = scope.stack.peek(0)?;
	let value = scope.stack.peek(1)?;
	gasometer::sstore_gas(
		handler,
		scope.contract.address,
		index,
		value,
		scope.contract.gas,
	)
}

fn log_gas<const N: u8>(
	scope: &mut ScopeContext,
	memory: &mut GuestMemory<'_>,
	_handler: &mut dyn Handler,
	memory_size: u64,
) -> Result<u64, ExitException> {
	let log = gasometer::log_gas(N, scope.stack.peek(1)?)?;
	let expansion = gasometer::memory_expansion_gas(memory.len(), memory_size)?;
	log.checked_add(expansion)
		.ok_or(ExitException::GasUintOverflow)
}

fn create2_gas(
	scope: &mut ScopeContext,
	memory: &mut GuestMemory<'_>,
	_handler: &mut dyn Handler,
	memory_size: u64,
) -> Result<u64, ExitException> {
	let hash = gasometer::sha3_gas(scope.stack.peek(2)?)?;
	let expansion = gasometer::memory_expansion_gas(memory.len(), memory_size)?;
	hash.checked_add(expansion)
		.ok_or(ExitException::GasUintOverflow)
}

fn call_gas(
	scope: &mut ScopeContext,
	memory: &mut GuestMemory<'_>,
	handler: &mut dyn Handler,
	memory_size: u64,
) -> Result<u64, ExitException> {
	let target = peek_address(scope, 1)?;
	let value = scope.stack.peek(2)?;
	let access = gasometer::account_access_gas(handler, target);
	let extra = gasometer::call_extra_gas(value != H256::zero(), handler.exists(target));
	let expansion = gasometer::memory_expansion_gas(memory.len(), memory_size)?;
	access
		.checked_add(extra)
		.and_then(|g| g.checked_add(expansion))
		.ok_or(ExitException::GasUintOverflow)
}

fn callcode_gas(
	scope: &mut ScopeContext,
	memory: &mut GuestMemory<'_>,
	handler: &mut dyn Handler,
	memory_size: u64,
) -> Result<u64, ExitException> {
	let target = peek_address(scope, 1)?;
	let value = scope.stack.peek(2)?;
	let access = gasometer::account_access_gas(handler, target);
	// CALLCODE runs in the caller's context, so no new-account surcharge.
	let extra = if value != H256::zero() {
		gasometer::G_CALL_VALUE
	} else {
		0
	};
	let expansion = gasometer::memory_expansion_gas(memory.len(), memory_size)?;
	access
		.checked_add(extra)
		.and_then(|g| g.checked_add(expansion))
		.ok_or(ExitException::GasUintOverflow)
}

fn plain_call_gas(
	scope: &mut ScopeContext,
	memory: &mut GuestMemory<'_>,
	handler: &mut dyn Handler,
	memory_size: u64,
) -> Result<u64, ExitException> {
	let access = gasometer::account_access_gas(handler, peek_address(scope, 1)?);
	let expansion = gasometer::memory_expansion_gas(memory.len(), memory_size)?;
	access
		.checked_add(expansion)
		.ok_or(ExitException::GasUintOverflow)
}

fn selfdestruct_gas(
	scope: &mut ScopeContext,
	_memory: &mut GuestMemory<'_>,
	handler: &mut dyn Handler,
	_memory_size: u64,
) -> Result<u64, ExitException> {
	let target = peek_address(scope, 0)?;
	let mut gas = gasometer::G_SELFDESTRUCT;
	if handler.is_cold(target, None) {
		handler.mark_hot(target, None);
		gas += gasometer::COLD_ACCOUNT_ACCESS_COST;
	}
	let address = scope.contract.address;
	if !handler.exists(target) && !handler.balance(address).is_zero() {
		gas += gasometer::G_NEW_ACCOUNT;
	}
	Ok(gas)
}

fn peek_address(scope: &ScopeContext, index: usize) -> Result<H160, ExitException> {
	Ok(h256_to_h160(scope.stack.peek(index)?))
}
