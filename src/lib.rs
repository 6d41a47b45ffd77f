//! WebAssembly execution substrate for EVM smart contracts.
//!
//! Contract bytecode is a Wasm module importing a fixed set of host
//! functions corresponding to EVM opcodes. The substrate instruments the
//! module for deterministic gas accounting and stack-overflow protection,
//! executes it inside an embedded interpreter, honors each host call by
//! emulating the corresponding EVM opcode against shared state, and emits a
//! single ordered execution trace suitable for zero-knowledge proving.

// #![deny(warnings)]
#![forbid(unsafe_code)]

extern crate alloc;

mod error;
mod eval;
mod gasometer;
mod host;
mod interp;
mod jumptable;
mod memory;
mod opcode;
mod result;
mod runtime;
mod stack;
mod tracing;
pub mod utils;

pub mod engine;
pub mod inject;

pub use crate::error::{
	ExitError, ExitException, ExitFatal, ExitResult, ExitSucceed, InjectionError,
};
pub use crate::eval::Control;
pub use crate::gasometer::{
	account_access_gas, call_gas, log_gas, memory_expansion_gas, sha3_gas, sload_gas, sstore_gas,
	to_word_size,
};
pub use crate::host::{
	import_arity, FieldKind, HostFn, HostRegistry, Preprocessor, GAS_IMPORT_FIELD, HOST_MODULE,
};
pub use crate::interp::{Config, WasmInterpreter};
pub use crate::jumptable::{JumpTable, Operation};
pub use crate::memory::{GuestMemory, MemorySlot};
pub use crate::opcode::Opcode;
pub use crate::result::{format_wasm_logs, ExecutionResult, FunctionCallLog, GlobalLog, StructLog};
pub use crate::runtime::{
	CallOutcome, CallParams, CallScheme, Contract, CreateOutcome, CreateParams, CreateScheme,
	Handler, Log, RuntimeBackend, RuntimeEnvironment, ScopeContext, Transfer, CALL_DEPTH_LIMIT,
	STACK_LIMIT,
};
pub use crate::stack::Stack;
pub use crate::tracing::{
	Config as TracerConfig, OpFamily, WasmFnCall, WasmGlobal, WasmLog, WasmLogger,
	WebAssemblyLogger,
};
