//! Opcode executors. Each executor runs against the synthesized operand
//! stack of one host call, the guest memory view and the handler.

use crate::error::ExitResult;

/// Control state an executor hands back to the dispatcher.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Control {
	/// The opcode completed; the host call returns to the engine.
	Continue,
	/// The frame halted, successfully (`STOP`/`RETURN`) or not.
	Exit(ExitResult),
}

macro_rules! try_or_fail {
	( $e:expr ) => {
		match $e {
			Ok(v) => v,
			Err(e) => return Control::Exit(Err(e.into())),
		}
	};
}

macro_rules! pop {
	( $scope:expr, $( $x:ident ),* ) => (
		$(
			let $x = match $scope.stack.pop() {
				Ok(value) => value,
				Err(e) => return Control::Exit(Err(e.into())),
			};
		)*
	);
}

macro_rules! pop_u256 {
	( $scope:expr, $( $x:ident ),* ) => (
		$(
			let $x = match $scope.stack.pop() {
				Ok(value) => crate::utils::h256_to_u256(value),
				Err(e) => return Control::Exit(Err(e.into())),
			};
		)*
	);
}

macro_rules! push {
	( $scope:expr, $( $x:expr ),* ) => (
		$(
			match $scope.stack.push($x) {
				Ok(()) => (),
				Err(e) => return Control::Exit(Err(e.into())),
			}
		)*
	)
}

macro_rules! push_u256 {
	( $scope:expr, $( $x:expr ),* ) => (
		$(
			match $scope.stack.push(crate::utils::u256_to_h256($x)) {
				Ok(()) => (),
				Err(e) => return Control::Exit(Err(e.into())),
			}
		)*
	)
}

mod call;
mod system;

pub use self::call::{call, callcode, create, create2, created_address, delegatecall, staticcall};
pub use self::system::{
	address, balance, basefee, blockhash, calldatacopy, calldataload, calldatasize, caller,
	callvalue, chainid, codecopy, codesize, coinbase, difficulty, extcodecopy, extcodehash,
	extcodesize, gas, gaslimit, gasprice, log, log0, log1, log2, log3, log4, msize, number,
	origin, pc, ret, returndatacopy, returndatasize, revert, selfbalance, selfdestruct, sha3,
	sload, sstore, stop, timestamp,
};
