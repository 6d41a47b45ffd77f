use alloc::vec::Vec;

use primitive_types::{H160, H256, U256};

use crate::error::ExitError;
use crate::stack::Stack;

/// Call-depth and operand-stack limit shared by the EVM side and the injected
/// shadow-stack protection.
pub const STACK_LIMIT: usize = 1024;
/// Nesting limit of EVM-style calls.
pub const CALL_DEPTH_LIMIT: usize = 1024;

/// A contract being executed: the callee environment of one call frame.
#[derive(Clone, Debug, Default)]
pub struct Contract {
	/// Address the code runs at.
	pub address: H160,
	/// Caller of this frame.
	pub caller: H160,
	/// Apparent transfer value.
	pub value: U256,
	/// Module binary. Replaced by the injected bytes in deployment mode.
	pub code: Vec<u8>,
	/// Call input.
	pub input: Vec<u8>,
	/// Remaining gas. Decreases monotonically during execution.
	pub gas: u64,
}

impl Contract {
	/// Create a contract for one call frame.
	#[must_use]
	pub fn new(address: H160, caller: H160, value: U256, code: Vec<u8>, gas: u64) -> Self {
		Self {
			address,
			caller,
			value,
			code,
			input: Vec::new(),
			gas,
		}
	}

	/// Attempt to deduct `amount` gas, reporting whether enough remained.
	pub fn use_gas(&mut self, amount: u64) -> bool {
		if self.gas < amount {
			return false;
		}
		self.gas -= amount;
		true
	}

	/// Refund unused gas returned from a sub-call.
	pub fn return_gas(&mut self, amount: u64) {
		self.gas += amount;
	}
}

/// Per-call-frame binding of contract and synthesized operand stack. One
/// scope is pushed on each nested EVM-style call and popped on return; the
/// scope index equals the EVM depth minus one.
#[derive(Clone, Debug)]
pub struct ScopeContext {
	pub contract: Contract,
	pub stack: Stack,
	/// What the frame's last executed opcode returned, with `RETURN` or
	/// `REVERT`, or what a sub-call handed back.
	pub retval: Vec<u8>,
}

impl ScopeContext {
	/// New scope for a contract with an empty stack.
	#[must_use]
	pub fn new(contract: Contract) -> Self {
		Self {
			contract,
			stack: Stack::new(STACK_LIMIT),
			retval: Vec::new(),
		}
	}
}

/// A log emitted by the contract.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Log {
	pub address: H160,
	pub topics: Vec<H256>,
	pub data: Vec<u8>,
}

/// Transfer from source to target, with given value.
#[derive(Clone, Debug)]
pub struct Transfer {
	/// Source address.
	pub source: H160,
	/// Target address.
	pub target: H160,
	/// Transfer value.
	pub value: U256,
}

/// Call scheme.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum CallScheme {
	/// `CALL`
	Call,
	/// `CALLCODE`
	CallCode,
	/// `DELEGATECALL`
	DelegateCall,
	/// `STATICCALL`
	StaticCall,
}

/// Create scheme.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum CreateScheme {
	/// Legacy create scheme of `CREATE`.
	Legacy,
	/// Create scheme of `CREATE2`, with the given salt.
	Create2 { salt: H256 },
}

/// World-state backend. Accessed only from host callbacks, linearized by the
/// call sequence; its own concurrency discipline is out of scope.
pub trait RuntimeBackend {
	/// Get balance of address.
	fn balance(&self, address: H160) -> U256;
	/// Get code of address.
	fn code(&self, address: H160) -> Vec<u8>;
	/// Get code size of address.
	fn code_size(&self, address: H160) -> U256 {
		U256::from(self.code(address).len())
	}
	/// Get code hash of address.
	fn code_hash(&self, address: H160) -> H256;
	/// Get storage value of address at index.
	fn storage(&self, address: H160, index: H256) -> H256;
	/// Get the transaction-start storage value of address at index.
	fn original_storage(&self, address: H160, index: H256) -> H256;
	/// Set storage value of address at index.
	fn set_storage(&mut self, address: H160, index: H256, value: H256) -> Result<(), ExitError>;

	/// Check whether an address exists.
	fn exists(&self, address: H160) -> bool;
	/// Check whether an address is empty per EIP-161.
	fn is_empty(&self, address: H160) -> bool;
	/// Get the nonce of an address.
	fn nonce(&self, address: H160) -> U256;
	/// Increase the nonce value.
	fn inc_nonce(&mut self, address: H160) -> Result<(), ExitError>;
	/// Set code of an account.
	fn set_code(&mut self, address: H160, code: Vec<u8>);

	/// Checks if the address or (address, index) pair has been previously
	/// accessed.
	fn is_cold(&self, address: H160, index: Option<H256>) -> bool;
	/// Mark an address or (address, index) pair as hot.
	fn mark_hot(&mut self, address: H160, index: Option<H256>);

	/// Create a log owned by address with given topics and data.
	fn log(&mut self, log: Log) -> Result<(), ExitError>;
	/// Mark an address to be deleted, with funds transferred to target.
	fn mark_delete(&mut self, address: H160, target: H160) -> Result<(), ExitError>;
	/// Initiate a transfer.
	fn transfer(&mut self, transfer: Transfer) -> Result<(), ExitError>;

	/// Current refund counter.
	fn refund(&self) -> u64;
	/// Add to the refund counter.
	fn add_refund(&mut self, value: u64);
	/// Subtract from the refund counter, saturating at zero.
	fn sub_refund(&mut self, value: u64);

	/// Snapshot the state for a nested frame.
	fn snapshot(&mut self) -> usize;
	/// Roll the state back to a snapshot.
	fn revert_to_snapshot(&mut self, id: usize);
}

/// Block and transaction environment.
pub trait RuntimeEnvironment {
	/// Get environmental block hash.
	fn block_hash(&self, number: U256) -> H256;
	/// Get environmental block number.
	fn block_number(&self) -> U256;
	/// Get environmental coinbase.
	fn block_coinbase(&self) -> H160;
	/// Get environmental block timestamp.
	fn block_timestamp(&self) -> U256;
	/// Get environmental block difficulty.
	fn block_difficulty(&self) -> U256;
	/// Get environmental gas limit.
	fn block_gas_limit(&self) -> U256;
	/// Environmental block base fee.
	fn block_base_fee_per_gas(&self) -> U256;
	/// Get environmental chain ID.
	fn chain_id(&self) -> U256;
	/// Get the gas price value.
	fn gas_price(&self) -> U256;
	/// Get execution origin.
	fn origin(&self) -> H160;
}

/// Parameters of a nested EVM-style call.
#[derive(Clone, Debug)]
pub struct CallParams {
	/// Frame caller.
	pub caller: H160,
	/// Address whose storage the frame runs against.
	pub address: H160,
	/// Address the code is loaded from.
	pub code_address: H160,
	/// Value transferred, if any.
	pub transfer: Option<Transfer>,
	/// Apparent value of the frame.
	pub apparent_value: U256,
	/// Call input.
	pub input: Vec<u8>,
	/// Gas forwarded to the frame.
	pub gas: u64,
	/// Whether the frame is read only.
	pub is_static: bool,
}

/// Result of a nested call: exit reason, returned bytes and leftover gas.
#[derive(Clone, Debug)]
pub struct CallOutcome {
	pub reason: crate::error::ExitResult,
	pub output: Vec<u8>,
	pub gas_left: u64,
}

/// Parameters of a nested contract creation.
#[derive(Clone, Debug)]
pub struct CreateParams {
	/// Creating contract.
	pub caller: H160,
	/// Scheme deciding the created address.
	pub scheme: CreateScheme,
	/// Endowment.
	pub value: U256,
	/// Init code.
	pub init_code: Vec<u8>,
	/// Gas forwarded to the frame.
	pub gas: u64,
}

/// Result of a nested creation.
#[derive(Clone, Debug)]
pub struct CreateOutcome {
	pub address: Option<H160>,
	pub reason: crate::error::ExitResult,
	pub output: Vec<u8>,
	pub gas_left: u64,
}

/// Everything an opcode executor may reach outside its own scope: world
/// state, block environment, the interpreter's return-data buffer, and the
/// explicit nested-call path.
pub trait Handler: RuntimeBackend + RuntimeEnvironment {
	/// Buffer of returned value by sub-calls.
	fn return_data(&self) -> &[u8];
	/// Whether the current frame is read only.
	fn is_static(&self) -> bool;

	/// Run a nested call frame. This is the only sanctioned re-entry into the
	/// interpreter: it pushes a new scope and recurses through the driver.
	fn call(&mut self, scheme: CallScheme, params: CallParams) -> CallOutcome;
	/// Run a nested create frame.
	fn create(&mut self, params: CreateParams) -> CreateOutcome;
}
