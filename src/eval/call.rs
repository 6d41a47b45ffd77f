use alloc::vec::Vec;

use primitive_types::{H256, U256};
use sha3::{Digest, Keccak256};

use crate::error::{ExitError, ExitException};
use crate::eval::Control;
use crate::gasometer::{self, G_CALL_STIPEND};
use crate::memory::GuestMemory;
use crate::runtime::{
	CallParams, CallScheme, CreateParams, CreateScheme, Handler, ScopeContext, Transfer,
};
use crate::utils::h256_to_h160;

pub fn call(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	call_with_scheme(scope, memory, handler, CallScheme::Call)
}

pub fn callcode(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	call_with_scheme(scope, memory, handler, CallScheme::CallCode)
}

pub fn delegatecall(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	call_with_scheme(scope, memory, handler, CallScheme::DelegateCall)
}

pub fn staticcall(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	call_with_scheme(scope, memory, handler, CallScheme::StaticCall)
}

pub fn create(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	create_with_scheme(scope, memory, handler, None)
}

pub fn create2(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	pop_u256!(scope, value, code_offset, len, salt);
	do_create(
		scope,
		memory,
		handler,
		value,
		code_offset,
		len,
		Some(crate::utils::u256_to_h256(salt)),
	)
}

fn create_with_scheme(
	scope: &mut ScopeContext,
	memory: &mut GuestMemory<'_>,
	handler: &mut dyn Handler,
	salt: Option<H256>,
) -> Control {
	pop_u256!(scope, value, code_offset, len);
	do_create(scope, memory, handler, value, code_offset, len, salt)
}

fn do_create(
	scope: &mut ScopeContext,
	memory: &mut GuestMemory<'_>,
	handler: &mut dyn Handler,
	value: U256,
	code_offset: U256,
	len: U256,
	salt: Option<H256>,
) -> Control {
	if handler.is_static() {
		return Control::Exit(ExitException::WriteProtection.into());
	}

	let init_code = if len.is_zero() {
		Vec::new()
	} else {
		memory.get(code_offset.low_u64(), len.low_u64() as usize)
	};

	// All but one 64th of the remaining gas goes to the child frame.
	let gas_limit = scope.contract.gas - scope.contract.gas / 64;
	if !scope.contract.use_gas(gas_limit) {
		return Control::Exit(ExitException::OutOfGas.into());
	}

	let scheme = match salt {
		Some(salt) => CreateScheme::Create2 { salt },
		None => CreateScheme::Legacy,
	};
	let outcome = handler.create(CreateParams {
		caller: scope.contract.address,
		scheme,
		value,
		init_code,
		gas: gas_limit,
	});
	scope.contract.return_gas(outcome.gas_left);

	// Revert reasons propagate through the return buffer; plain failures
	// leave it empty.
	scope.retval = if outcome.reason == Err(ExitError::Reverted) {
		outcome.output
	} else {
		Vec::new()
	};

	match (outcome.reason, outcome.address) {
		(Ok(_), Some(address)) => push!(scope, H256::from(address)),
		_ => push!(scope, H256::default()),
	}

	Control::Continue
}

fn call_with_scheme(
	scope: &mut ScopeContext,
	memory: &mut GuestMemory<'_>,
	handler: &mut dyn Handler,
	scheme: CallScheme,
) -> Control {
	pop_u256!(scope, gas);
	pop!(scope, to);
	let to = h256_to_h160(to);

	let value = match scheme {
		CallScheme::Call | CallScheme::CallCode => {
			pop_u256!(scope, value);
			value
		}
		CallScheme::DelegateCall | CallScheme::StaticCall => U256::zero(),
	};

	if scheme == CallScheme::Call && handler.is_static() && !value.is_zero() {
		return Control::Exit(ExitException::WriteProtection.into());
	}

	pop_u256!(scope, in_offset, in_len, out_offset, out_len);

	let input = if in_len.is_zero() {
		Vec::new()
	} else {
		memory.get(in_offset.low_u64(), in_len.low_u64() as usize)
	};

	let mut gas_limit = gasometer::call_gas(scope.contract.gas, gas);
	if !scope.contract.use_gas(gas_limit) {
		return Control::Exit(ExitException::OutOfGas.into());
	}
	if !value.is_zero() {
		gas_limit += G_CALL_STIPEND;
	}

	let context_address = match scheme {
		CallScheme::Call | CallScheme::StaticCall => to,
		CallScheme::CallCode | CallScheme::DelegateCall => scope.contract.address,
	};
	let caller = match scheme {
		CallScheme::DelegateCall => scope.contract.caller,
		_ => scope.contract.address,
	};
	let apparent_value = match scheme {
		CallScheme::Call | CallScheme::CallCode => value,
		CallScheme::DelegateCall => scope.contract.value,
		CallScheme::StaticCall => U256::zero(),
	};
	let transfer = if scheme == CallScheme::Call && !value.is_zero() {
		Some(Transfer {
			source: scope.contract.address,
			target: to,
			value,
		})
	} else {
		None
	};

	let outcome = handler.call(
		scheme,
		CallParams {
			caller,
			address: context_address,
			code_address: to,
			transfer,
			apparent_value,
			input,
			gas: gas_limit,
			is_static: handler.is_static() || scheme == CallScheme::StaticCall,
		},
	);
	scope.contract.return_gas(outcome.gas_left);

	let target_len = core::cmp::min(out_len, U256::from(outcome.output.len()));
	match outcome.reason {
		Ok(_) => {
			try_or_fail!(memory.copy_large(out_offset, U256::zero(), target_len, &outcome.output));
			push!(scope, crate::utils::u256_to_h256(U256::one()));
		}
		Err(ExitError::Reverted) => {
			try_or_fail!(memory.copy_large(out_offset, U256::zero(), target_len, &outcome.output));
			push!(scope, H256::default());
		}
		Err(_) => {
			push!(scope, H256::default());
		}
	}
	scope.retval = outcome.output;

	Control::Continue
}

/// Compute the address of a `CREATE`/`CREATE2` deployment.
pub fn created_address(
	caller: primitive_types::H160,
	nonce: U256,
	scheme: CreateScheme,
	init_code: &[u8],
) -> primitive_types::H160 {
	match scheme {
		CreateScheme::Legacy => {
			// Simple RLP of [address, nonce] for the nonce ranges that occur
			// in practice.
			let mut stream = Vec::with_capacity(25);
			let nonce = nonce.low_u64();
			stream.push(0x80 + 20);
			stream.extend_from_slice(&caller[..]);
			if nonce == 0 {
				stream.push(0x80);
			} else if nonce < 0x80 {
				stream.push(nonce as u8);
			} else {
				let bytes = nonce.to_be_bytes();
				let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
				stream.push(0x80 + (8 - first) as u8);
				stream.extend_from_slice(&bytes[first..]);
			}
			let mut rlp = Vec::with_capacity(stream.len() + 1);
			rlp.push(0xc0 + stream.len() as u8);
			rlp.extend_from_slice(&stream);
			let hash = Keccak256::digest(&rlp);
			h256_to_h160(H256::from_slice(hash.as_slice()))
		}
		CreateScheme::Create2 { salt } => {
			let code_hash = Keccak256::digest(init_code);
			let mut hasher = Keccak256::new();
			hasher.update([0xff]);
			hasher.update(&caller[..]);
			hasher.update(&salt[..]);
			hasher.update(code_hash.as_slice());
			h256_to_h160(H256::from_slice(hasher.finalize().as_slice()))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use primitive_types::H160;

	#[test]
	fn create2_address_is_deterministic() {
		let a = created_address(
			H160::zero(),
			U256::zero(),
			CreateScheme::Create2 { salt: H256::zero() },
			&[],
		);
		let b = created_address(
			H160::zero(),
			U256::zero(),
			CreateScheme::Create2 { salt: H256::zero() },
			&[],
		);
		assert_eq!(a, b);

		let c = created_address(
			H160::zero(),
			U256::zero(),
			CreateScheme::Create2 {
				salt: H256::from_low_u64_be(1),
			},
			&[],
		);
		assert_ne!(a, c);
	}

	#[test]
	fn legacy_address_depends_on_nonce() {
		let caller = H160::from_low_u64_be(0xbeef);
		let a = created_address(caller, U256::zero(), CreateScheme::Legacy, &[]);
		let b = created_address(caller, U256::one(), CreateScheme::Legacy, &[]);
		assert_ne!(a, b);
	}
}
