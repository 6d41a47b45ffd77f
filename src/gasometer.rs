//! The EVM-side gas schedule: constant costs, dynamic cost calculators and
//! memory expansion arithmetic, post-London mainnet configuration (EIP-2929
//! warm/cold access, EIP-2200 storage metering, EIP-3529 refunds).

use primitive_types::{H160, H256, U256};

use crate::error::ExitException;
use crate::runtime::RuntimeBackend;
use crate::stack::Stack;
use crate::utils::h256_to_u256;

pub const G_QUICK: u64 = 2;
pub const G_FASTEST: u64 = 3;
pub const G_FAST: u64 = 5;
pub const G_MID: u64 = 8;
pub const G_BLOCKHASH: u64 = 20;

pub const G_SHA3: u64 = 30;
pub const G_SHA3_WORD: u64 = 6;
pub const G_COPY_WORD: u64 = 3;

pub const G_LOG: u64 = 375;
pub const G_LOG_TOPIC: u64 = 375;
pub const G_LOG_DATA: u64 = 8;

pub const G_CREATE: u64 = 32000;
pub const G_CODE_DEPOSIT: u64 = 200;
pub const G_CALL_VALUE: u64 = 9000;
pub const G_CALL_STIPEND: u64 = 2300;
pub const G_NEW_ACCOUNT: u64 = 25000;
pub const G_SELFDESTRUCT: u64 = 5000;

pub const WARM_STORAGE_READ_COST: u64 = 100;
pub const COLD_SLOAD_COST: u64 = 2100;
pub const COLD_ACCOUNT_ACCESS_COST: u64 = 2600;

pub const SSTORE_SET_GAS: u64 = 20000;
pub const SSTORE_RESET_GAS: u64 = 5000;
pub const SSTORE_SENTRY_GAS: u64 = 2300;
/// EIP-3529 storage clearing refund.
pub const SSTORE_CLEARS_REFUND: u64 = 4800;

pub const G_MEMORY: u64 = 3;
pub const G_QUAD_COEFF_DIV: u64 = 512;

/// Round a byte size up to EVM words.
pub fn to_word_size(size: u64) -> Result<u64, ExitException> {
	if size > u64::MAX - 31 {
		return Err(ExitException::GasUintOverflow);
	}
	Ok((size + 31) / 32)
}

/// `offset + len` as a u64 memory bound; `(0, _)` lengths need no memory.
pub fn calc_mem_size(offset: H256, len: H256) -> Result<u64, ExitException> {
	let offset = h256_to_u256(offset);
	let len = h256_to_u256(len);
	if len.is_zero() {
		return Ok(0);
	}
	let end = offset
		.checked_add(len)
		.ok_or(ExitException::GasUintOverflow)?;
	if end > U256::from(u64::MAX) {
		return Err(ExitException::GasUintOverflow);
	}
	Ok(end.low_u64())
}

/// Total gas of a memory of `size` bytes (word-aligned).
fn memory_gas(size: u64) -> Result<u64, ExitException> {
	let words = size / 32;
	let linear = words
		.checked_mul(G_MEMORY)
		.ok_or(ExitException::GasUintOverflow)?;
	let quad = words
		.checked_mul(words)
		.map(|sq| sq / G_QUAD_COEFF_DIV)
		.ok_or(ExitException::GasUintOverflow)?;
	linear.checked_add(quad).ok_or(ExitException::GasUintOverflow)
}

/// Expansion charge for growing memory from `current_len` bytes to
/// `new_size` bytes (both rounded up to words).
pub fn memory_expansion_gas(current_len: usize, new_size: u64) -> Result<u64, ExitException> {
	if new_size == 0 {
		return Ok(0);
	}
	let current = to_word_size(current_len as u64)? * 32;
	let new = to_word_size(new_size)? * 32;
	if new <= current {
		return Ok(0);
	}
	Ok(memory_gas(new)? - memory_gas(current)?)
}

/// Per-word copy charge of the *COPY opcodes.
pub fn copy_gas(len: H256) -> Result<u64, ExitException> {
	let len = h256_to_u256(len);
	if len > U256::from(u64::MAX) {
		return Err(ExitException::GasUintOverflow);
	}
	to_word_size(len.low_u64())?
		.checked_mul(G_COPY_WORD)
		.ok_or(ExitException::GasUintOverflow)
}

/// `SHA3` dynamic charge: hashed words.
pub fn sha3_gas(len: H256) -> Result<u64, ExitException> {
	let len = h256_to_u256(len);
	if len > U256::from(u64::MAX) {
		return Err(ExitException::GasUintOverflow);
	}
	to_word_size(len.low_u64())?
		.checked_mul(G_SHA3_WORD)
		.ok_or(ExitException::GasUintOverflow)
}

/// `LOGn` dynamic charge: topics plus data bytes.
pub fn log_gas(topics: u8, len: H256) -> Result<u64, ExitException> {
	let len = h256_to_u256(len);
	if len > U256::from(u64::MAX) {
		return Err(ExitException::GasUintOverflow);
	}
	let data = len
		.low_u64()
		.checked_mul(G_LOG_DATA)
		.ok_or(ExitException::GasUintOverflow)?;
	G_LOG
		.checked_add(G_LOG_TOPIC * u64::from(topics))
		.and_then(|g| g.checked_add(data))
		.ok_or(ExitException::GasUintOverflow)
}

/// EIP-2929 account access charge, marking the target hot.
pub fn account_access_gas<H: RuntimeBackend + ?Sized>(handler: &mut H, target: H160) -> u64 {
	let cold = handler.is_cold(target, None);
	handler.mark_hot(target, None);
	if cold {
		COLD_ACCOUNT_ACCESS_COST
	} else {
		WARM_STORAGE_READ_COST
	}
}

/// EIP-2929 `SLOAD` charge, marking the slot hot.
pub fn sload_gas<H: RuntimeBackend + ?Sized>(handler: &mut H, address: H160, index: H256) -> u64 {
	let cold = handler.is_cold(address, Some(index));
	handler.mark_hot(address, Some(index));
	if cold {
		COLD_SLOAD_COST
	} else {
		WARM_STORAGE_READ_COST
	}
}

/// EIP-2200 + EIP-2929 `SSTORE` charge with EIP-3529 refund bookkeeping.
/// `original` is the value at transaction start, `current` the value before
/// this write.
pub fn sstore_gas<H: RuntimeBackend + ?Sized>(
	handler: &mut H,
	address: H160,
	index: H256,
	new: H256,
	remaining_gas: u64,
) -> Result<u64, ExitException> {
	// EIP-2200 sentry: refuse the write when the frame cannot pay the
	// reentrancy-safe minimum.
	if remaining_gas <= SSTORE_SENTRY_GAS {
		return Err(ExitException::OutOfGas);
	}

	let cold = handler.is_cold(address, Some(index));
	handler.mark_hot(address, Some(index));
	let cold_surcharge = if cold { COLD_SLOAD_COST } else { 0 };

	let current = handler.storage(address, index);
	let original = handler.original_storage(address, index);

	let gas = if current == new {
		WARM_STORAGE_READ_COST
	} else if original == current {
		if original == H256::zero() {
			SSTORE_SET_GAS
		} else {
			if new == H256::zero() {
				handler.add_refund(SSTORE_CLEARS_REFUND);
			}
			SSTORE_RESET_GAS - COLD_SLOAD_COST
		}
	} else {
		if original != H256::zero() {
			if current == H256::zero() {
				handler.sub_refund(SSTORE_CLEARS_REFUND);
			} else if new == H256::zero() {
				handler.add_refund(SSTORE_CLEARS_REFUND);
			}
		}
		if original == new {
			if original == H256::zero() {
				handler.add_refund(SSTORE_SET_GAS - WARM_STORAGE_READ_COST);
			} else {
				handler.add_refund(SSTORE_RESET_GAS - COLD_SLOAD_COST - WARM_STORAGE_READ_COST);
			}
		}
		WARM_STORAGE_READ_COST
	};

	Ok(gas + cold_surcharge)
}

/// EIP-150 all-but-one-64th rule for forwarded call gas.
pub fn call_gas(available: u64, requested: U256) -> u64 {
	let gas = available - available / 64;
	if requested > U256::from(u64::MAX) {
		return gas;
	}
	core::cmp::min(gas, requested.low_u64())
}

/// Transfer and new-account surcharges of the CALL family.
pub fn call_extra_gas(transfers_value: bool, target_exists: bool) -> u64 {
	let mut gas = 0;
	if transfers_value {
		gas += G_CALL_VALUE;
	}
	if transfers_value && !target_exists {
		gas += G_NEW_ACCOUNT;
	}
	gas
}

/// Memory bound helpers for the jump table, peeking operand positions the
/// way the EVM stack lays them out.
pub mod memory_size {
	use super::{calc_mem_size, Stack};
	use crate::error::ExitException;

	pub fn sha3(stack: &Stack) -> Result<u64, ExitException> {
		calc_mem_size(stack.peek(0)?, stack.peek(1)?)
	}

	pub fn copier(stack: &Stack) -> Result<u64, ExitException> {
		calc_mem_size(stack.peek(0)?, stack.peek(2)?)
	}

	pub fn ext_copier(stack: &Stack) -> Result<u64, ExitException> {
		calc_mem_size(stack.peek(1)?, stack.peek(3)?)
	}

	pub fn log(stack: &Stack) -> Result<u64, ExitException> {
		calc_mem_size(stack.peek(0)?, stack.peek(1)?)
	}

	pub fn create(stack: &Stack) -> Result<u64, ExitException> {
		calc_mem_size(stack.peek(1)?, stack.peek(2)?)
	}

	pub fn ret(stack: &Stack) -> Result<u64, ExitException> {
		calc_mem_size(stack.peek(0)?, stack.peek(1)?)
	}

	pub fn call(stack: &Stack) -> Result<u64, ExitException> {
		let input = calc_mem_size(stack.peek(3)?, stack.peek(4)?)?;
		let output = calc_mem_size(stack.peek(5)?, stack.peek(6)?)?;
		Ok(core::cmp::max(input, output))
	}

	pub fn delegate_call(stack: &Stack) -> Result<u64, ExitException> {
		let input = calc_mem_size(stack.peek(2)?, stack.peek(3)?)?;
		let output = calc_mem_size(stack.peek(4)?, stack.peek(5)?)?;
		Ok(core::cmp::max(input, output))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn word_rounding() {
		assert_eq!(to_word_size(0).unwrap(), 0);
		assert_eq!(to_word_size(1).unwrap(), 1);
		assert_eq!(to_word_size(32).unwrap(), 1);
		assert_eq!(to_word_size(33).unwrap(), 2);
		assert_eq!(to_word_size(u64::MAX), Err(ExitException::GasUintOverflow));
	}

	#[test]
	fn expansion_is_incremental() {
		let empty_to_word = memory_expansion_gas(0, 32).unwrap();
		assert_eq!(empty_to_word, G_MEMORY);
		assert_eq!(memory_expansion_gas(32, 32).unwrap(), 0);
		assert_eq!(memory_expansion_gas(64, 32).unwrap(), 0);
	}

	#[test]
	fn log_charge() {
		assert_eq!(
			log_gas(2, crate::utils::u256_to_h256(primitive_types::U256::from(10))).unwrap(),
			G_LOG + 2 * G_LOG_TOPIC + 10 * G_LOG_DATA
		);
	}

	#[test]
	fn forwarded_call_gas_keeps_one_64th() {
		assert_eq!(call_gas(6400, primitive_types::U256::MAX), 6300);
		assert_eq!(call_gas(6400, primitive_types::U256::from(100)), 100);
	}
}
