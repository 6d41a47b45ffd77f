//! The seam towards the embedded WebAssembly engine.
//!
//! The engine itself (parser, validator, stepper) is an external collaborator.
//! This module pins down the protocol the interpreter relies on: how a module
//! is loaded, how the engine calls back into the host, how guest memory is
//! touched so that every write lands in the engine's own trace, and the
//! stable set of exit codes.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use serde::Deserialize;

use crate::error::{ExitError, ExitFatal};

/// Wasm opcode byte of `call`, the only opcode that may immediately precede a
/// host-call trace record.
pub const WASM_OP_CALL: u8 = 0x10;

/// Stable engine exit codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EngineExit {
	/// Execution ran to completion.
	Ok,
	/// A gas charge could not be covered.
	OutOfGas,
	/// The contract executed `REVERT`.
	ExecutionReverted,
	/// The contract halted through `STOP` or `RETURN`. Not an error to the
	/// caller; used internally to unwind the engine.
	StopToken,
	/// Any other failure.
	Unknown,
}

impl EngineExit {
	/// Numeric code of the exit, as exchanged with the engine.
	#[must_use]
	pub const fn code(self) -> i32 {
		match self {
			Self::Ok => 0,
			Self::OutOfGas => 1,
			Self::ExecutionReverted => 2,
			Self::StopToken => 3,
			Self::Unknown => 4,
		}
	}
}

/// Outcome of one host-function invocation, returned to the engine. The
/// engine maps it onto [EngineExit]; anything but `Ok` halts execution.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HostOutcome {
	/// The host call completed; the engine continues stepping.
	Ok,
	/// The contract halted normally (`STOP`/`RETURN`).
	Stop,
	/// A gas charge could not be covered.
	OutOfGas,
	/// The contract executed `REVERT`; return data is preserved.
	Revert,
	/// The host call arrived with the wrong arity.
	BadParams,
	/// Any other failure; surfaces as [EngineExit::Unknown].
	Fatal,
}

impl HostOutcome {
	/// The engine exit this outcome halts with, or `None` for [Self::Ok].
	#[must_use]
	pub const fn exit(self) -> Option<EngineExit> {
		match self {
			Self::Ok => None,
			Self::Stop => Some(EngineExit::StopToken),
			Self::OutOfGas => Some(EngineExit::OutOfGas),
			Self::Revert => Some(EngineExit::ExecutionReverted),
			Self::BadParams | Self::Fatal => Some(EngineExit::Unknown),
		}
	}
}

/// Raw access to the guest's linear memory, provided by the engine for the
/// duration of a callback. Writes MUST surface in the engine trace as memory
/// changes.
pub trait MemoryAccess {
	/// Current length of the linear memory in bytes.
	fn len(&self) -> usize;

	/// Whether the linear memory is empty.
	fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Copy `len` bytes starting at `offset` out of the linear memory. Reads
	/// beyond the current length yield zeroes.
	fn read(&self, offset: u32, len: u32) -> Vec<u8>;

	/// Write `value` at `offset`, recording a memory-change event in the
	/// engine trace.
	fn write(&mut self, offset: u32, value: &[u8]);

	/// Resize the linear memory. Engines that only grow through guest
	/// `memory.grow` return `false`.
	fn resize(&mut self, _size: usize) -> bool {
		false
	}
}

/// One step of the engine's execution trace, pushed to the host as it is
/// recorded. Field names follow the engine's JSON trace document.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StepEvent {
	pub pc: u32,
	#[serde(rename = "source-pc", default)]
	pub source_pc: u32,
	pub opcode: u8,
	pub name: String,
	#[serde(default)]
	pub stack_drop: u32,
	#[serde(default)]
	pub stack_keep: u32,
	#[serde(default)]
	pub params: Vec<u64>,
	#[serde(default)]
	pub memory_changes: Vec<MemoryChange>,
	#[serde(default)]
	pub stack: Vec<u64>,
}

/// A contiguous span of guest memory that changed.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MemoryChange {
	pub offset: u32,
	#[serde(default)]
	pub len: u32,
	#[serde(default)]
	pub data: Vec<u8>,
}

/// Static metadata of one internal function body.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FunctionMeta {
	pub fn_index: u32,
	pub max_stack_height: u32,
	pub num_locals: u32,
	#[serde(default)]
	pub fn_name: String,
}

/// The engine's full trace, fetched once after execution in debug mode.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EngineTrace {
	#[serde(default)]
	pub global_memory: Vec<MemoryChange>,
	#[serde(default)]
	pub fn_metas: Vec<FunctionMeta>,
}

/// The host side of the engine protocol. The interpreter hands an exclusive
/// handle to [WasmEngine::compute_result]; the engine calls back synchronously
/// and every callback runs to completion before stepping continues.
pub trait HostContext {
	/// Invoke the imported host function `name` with raw guest arguments.
	fn invoke(&mut self, name: &str, params: &[i64], memory: &mut dyn MemoryAccess)
		-> HostOutcome;

	/// One Wasm instruction was stepped. Emitted before the corresponding
	/// host call when the instruction is a `call` into an import.
	fn on_step(&mut self, step: &StepEvent);

	/// A mutable global was written.
	fn on_global(&mut self, step: &StepEvent, index: u64, value: u64);
}

/// The engine side of the protocol.
pub trait WasmEngine {
	/// Load a module binary. Fails when the module is malformed or lacks the
	/// required `main` entrypoint.
	fn load_module(&mut self, code: &[u8]) -> Result<(), ExitError>;

	/// Run the module's `main`, driving `host` through every import call and
	/// trace step, and classify the result.
	fn compute_result(&mut self, host: &mut dyn HostContext) -> EngineExit;

	/// Fetch the accumulated trace. Only meaningful after
	/// [Self::compute_result]; used by the driver in debug mode.
	fn take_trace(&mut self) -> EngineTrace;
}

/// Produces one engine instance per call frame. Nested EVM-style calls each
/// drive their own engine while sharing the interpreter state.
pub trait EngineFactory {
	fn engine(&self) -> Box<dyn WasmEngine>;
}

impl<F> EngineFactory for F
where
	F: Fn() -> Box<dyn WasmEngine>,
{
	fn engine(&self) -> Box<dyn WasmEngine> {
		self()
	}
}

/// Parse the engine's JSON trace document.
pub fn decode_trace(raw: &[u8]) -> Result<EngineTrace, ExitError> {
	serde_json::from_slice(raw).map_err(|e| {
		log::debug!(target: "wasm", "malformed engine trace: {}", e);
		ExitFatal::Other("malformed engine trace".into()).into()
	})
}

/// Parse one step of the engine's JSON trace stream.
pub fn decode_step(raw: &str) -> Result<StepEvent, ExitError> {
	serde_json::from_str(raw).map_err(|e| {
		log::debug!(target: "wasm", "malformed engine step: {}", e);
		ExitFatal::Other("malformed engine step".into()).into()
	})
}
