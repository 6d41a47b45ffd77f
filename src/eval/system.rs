use alloc::vec::Vec;

use primitive_types::{H256, U256};
use sha3::{Digest, Keccak256};

use crate::error::{ExitError, ExitException, ExitSucceed};
use crate::eval::Control;
use crate::memory::GuestMemory;
use crate::runtime::{Handler, Log, ScopeContext, Transfer};
use crate::utils::h256_to_h160;

pub fn stop(_scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	Control::Exit(Ok(ExitSucceed::Stopped))
}

pub fn ret(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	pop_u256!(scope, offset, len);
	scope.retval = memory.get(offset.low_u64(), len.low_u64() as usize);

	Control::Exit(Ok(ExitSucceed::Returned))
}

pub fn revert(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	pop_u256!(scope, offset, len);
	scope.retval = memory.get(offset.low_u64(), len.low_u64() as usize);

	Control::Exit(Err(ExitError::Reverted))
}

pub fn sha3(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	pop_u256!(scope, from, len);

	let data = if len.is_zero() {
		Vec::new()
	} else {
		memory.get(from.low_u64(), len.low_u64() as usize)
	};

	let ret = Keccak256::digest(data.as_slice());
	push!(scope, H256::from_slice(ret.as_slice()));

	Control::Continue
}

pub fn address(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	push!(scope, H256::from(scope.contract.address));

	Control::Continue
}

pub fn balance(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	pop!(scope, address);
	push_u256!(scope, handler.balance(h256_to_h160(address)));

	Control::Continue
}

pub fn selfbalance(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	push_u256!(scope, handler.balance(scope.contract.address));

	Control::Continue
}

pub fn origin(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	push!(scope, H256::from(handler.origin()));

	Control::Continue
}

pub fn caller(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	push!(scope, H256::from(scope.contract.caller));

	Control::Continue
}

pub fn callvalue(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	push_u256!(scope, scope.contract.value);

	Control::Continue
}

pub fn gasprice(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	push_u256!(scope, handler.gas_price());

	Control::Continue
}

pub fn basefee(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	push_u256!(scope, handler.block_base_fee_per_gas());

	Control::Continue
}

pub fn calldataload(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	pop_u256!(scope, offset);

	let mut load = [0u8; 32];
	for (i, b) in load.iter_mut().enumerate() {
		if let Some(p) = offset.checked_add(U256::from(i)) {
			if p <= U256::from(usize::MAX) {
				let p = p.low_u64() as usize;
				if p < scope.contract.input.len() {
					*b = scope.contract.input[p];
				}
			}
		}
	}
	push!(scope, H256::from(load));

	Control::Continue
}

pub fn calldatasize(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	push_u256!(scope, U256::from(scope.contract.input.len()));

	Control::Continue
}

pub fn calldatacopy(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	pop_u256!(scope, memory_offset, data_offset, len);

	try_or_fail!(memory.copy_large(memory_offset, data_offset, len, &scope.contract.input));
	Control::Continue
}

pub fn codesize(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	push_u256!(scope, U256::from(scope.contract.code.len()));

	Control::Continue
}

pub fn codecopy(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	pop_u256!(scope, memory_offset, code_offset, len);

	try_or_fail!(memory.copy_large(memory_offset, code_offset, len, &scope.contract.code));
	Control::Continue
}

pub fn extcodesize(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	pop!(scope, address);
	push_u256!(scope, handler.code_size(h256_to_h160(address)));

	Control::Continue
}

pub fn extcodehash(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	pop!(scope, address);
	push!(scope, handler.code_hash(h256_to_h160(address)));

	Control::Continue
}

pub fn extcodecopy(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	pop!(scope, address);
	pop_u256!(scope, memory_offset, code_offset, len);

	let code = handler.code(h256_to_h160(address));
	try_or_fail!(memory.copy_large(memory_offset, code_offset, len, &code));

	Control::Continue
}

pub fn returndatasize(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	push_u256!(scope, U256::from(handler.return_data().len()));

	Control::Continue
}

pub fn returndatacopy(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	pop_u256!(scope, memory_offset, data_offset, len);

	if data_offset
		.checked_add(len)
		.map_or(true, |l| l > U256::from(handler.return_data().len()))
	{
		return Control::Exit(ExitException::OutOfOffset.into());
	}

	let data = handler.return_data().to_vec();
	try_or_fail!(memory.copy_large(memory_offset, data_offset, len, &data));

	Control::Continue
}

pub fn blockhash(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	pop_u256!(scope, number);
	push!(scope, handler.block_hash(number));

	Control::Continue
}

pub fn coinbase(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	push!(scope, H256::from(handler.block_coinbase()));

	Control::Continue
}

pub fn timestamp(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	push_u256!(scope, handler.block_timestamp());

	Control::Continue
}

pub fn number(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	push_u256!(scope, handler.block_number());

	Control::Continue
}

pub fn difficulty(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	push_u256!(scope, handler.block_difficulty());

	Control::Continue
}

pub fn gaslimit(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	push_u256!(scope, handler.block_gas_limit());

	Control::Continue
}

pub fn chainid(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	push_u256!(scope, handler.chain_id());

	Control::Continue
}

pub fn sload(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	pop!(scope, index);
	let value = handler.storage(scope.contract.address, index);
	push!(scope, value);

	Control::Continue
}

pub fn sstore(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	if handler.is_static() {
		return Control::Exit(ExitException::WriteProtection.into());
	}
	pop!(scope, index, value);

	match handler.set_storage(scope.contract.address, index, value) {
		Ok(()) => Control::Continue,
		Err(e) => Control::Exit(Err(e)),
	}
}

pub fn pc(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	// Synthesized frames have no EVM program counter.
	push_u256!(scope, U256::zero());

	Control::Continue
}

pub fn msize(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	push_u256!(scope, U256::from(memory.len()));

	Control::Continue
}

pub fn gas(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, _handler: &mut dyn Handler) -> Control {
	push_u256!(scope, U256::from(scope.contract.gas));

	Control::Continue
}

pub fn log(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler, n: u8) -> Control {
	if handler.is_static() {
		return Control::Exit(ExitException::WriteProtection.into());
	}
	pop_u256!(scope, offset, len);

	let data = if len.is_zero() {
		Vec::new()
	} else {
		memory.get(offset.low_u64(), len.low_u64() as usize)
	};

	let mut topics = Vec::new();
	for _ in 0..(n as usize) {
		match scope.stack.pop() {
			Ok(value) => {
				topics.push(value);
			}
			Err(e) => return Control::Exit(Err(e.into())),
		}
	}

	match handler.log(Log {
		address: scope.contract.address,
		topics,
		data,
	}) {
		Ok(()) => Control::Continue,
		Err(e) => Control::Exit(Err(e)),
	}
}

pub fn log0(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	log(scope, memory, handler, 0)
}

pub fn log1(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	log(scope, memory, handler, 1)
}

pub fn log2(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	log(scope, memory, handler, 2)
}

pub fn log3(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	log(scope, memory, handler, 3)
}

pub fn log4(scope: &mut ScopeContext, memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	log(scope, memory, handler, 4)
}

pub fn selfdestruct(scope: &mut ScopeContext, _memory: &mut GuestMemory<'_>, handler: &mut dyn Handler) -> Control {
	if handler.is_static() {
		return Control::Exit(ExitException::WriteProtection.into());
	}
	pop!(scope, target);
	let target = h256_to_h160(target);
	let address = scope.contract.address;

	let balance = handler.balance(address);
	try_or_fail!(handler.transfer(Transfer {
		source: address,
		target,
		value: balance,
	}));
	try_or_fail!(handler.mark_delete(address, target));

	Control::Exit(Ok(ExitSucceed::Stopped))
}
