//! Allows to listen to interpreter events and assemble the ordered execution
//! trace: Wasm steps, EVM opcode emulations and gas-meter charges.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use primitive_types::{H160, H256, U256};

use crate::engine::{FunctionMeta, MemoryChange, StepEvent, WASM_OP_CALL};
use crate::error::ExitError;
use crate::opcode::Opcode;

/// Which layer a trace record describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpFamily {
	/// One raw Wasm instruction.
	Wasm,
	/// One EVM opcode emulation.
	Evm,
	/// One injected gas-meter charge.
	Gas,
}

impl OpFamily {
	/// Stable name of the family in formatted traces.
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Wasm => "WASM",
			Self::Evm => "EVM",
			Self::Gas => "GAS",
		}
	}
}

/// One record of the ordered trace log.
#[derive(Clone, Debug)]
pub struct WasmLog {
	pub pc: u64,
	pub family: OpFamily,
	pub op_code: u8,
	pub op_name: String,
	pub params: Vec<u64>,
	pub gas: u64,
	pub gas_cost: u64,
	/// At most one memory change per Wasm step.
	pub memory: Option<(u32, Vec<u8>)>,
	pub stack: Option<Vec<U256>>,
	pub return_data: Vec<u8>,
	pub storage: Option<BTreeMap<H256, H256>>,
	pub depth: usize,
	pub refund: u64,
	pub err: Option<ExitError>,
	pub keep: u32,
	pub drop: u32,
}

/// A mutable-global write observed during execution.
#[derive(Clone, Debug)]
pub struct WasmGlobal {
	pub pc: u64,
	pub index: u64,
	pub op: String,
	pub params: Vec<u64>,
	pub value: u64,
}

/// Static metadata of one internal function body, replayed from the engine
/// trace.
#[derive(Clone, Debug)]
pub struct WasmFnCall {
	pub fn_index: u32,
	pub max_stack_height: u32,
	pub num_locals: u32,
	pub fn_name: String,
}

/// Tracer configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct Config {
	/// Snapshot memory changes into WASM records.
	pub enable_memory: bool,
	/// Drop stack snapshots.
	pub disable_stack: bool,
	/// Drop storage deltas.
	pub disable_storage: bool,
	/// Snapshot return data into EVM records.
	pub enable_return_data: bool,
	/// Whether debug tracing is on at all.
	pub debug: bool,
	/// Maximum number of records; `0` means unbounded. Further captures are
	/// silently dropped.
	pub limit: usize,
}

/// Listener of interpreter events. Implemented by [WebAssemblyLogger]; the
/// interpreter drives it through a shared handle.
pub trait WasmLogger {
	/// A Wasm instruction was stepped; appends a WASM-family record.
	fn capture_wasm_state(&mut self, step: &StepEvent, gas: u64, depth: usize, refund: u64);

	/// The injected gas charge ran; upgrades the last record (which must be a
	/// WASM `call`) into a GAS-family record.
	fn capture_gas_state(&mut self, amount: u64, gas: u64, depth: usize, err: Option<ExitError>);

	/// An EVM opcode was emulated; upgrades the last record (which must be a
	/// WASM `call`) into an EVM-family record.
	#[allow(clippy::too_many_arguments)]
	fn capture_state(
		&mut self,
		op: Opcode,
		gas: u64,
		cost: u64,
		address: H160,
		return_data: &[u8],
		depth: usize,
		storage: Option<(H256, H256)>,
		refund: u64,
		err: Option<ExitError>,
	);

	/// A mutable global was written.
	fn capture_global_variable(&mut self, pc: u64, index: u64, op: &str, params: &[u64], value: u64);

	/// The module's initial data segments, merged into the global-memory
	/// snapshot.
	fn capture_global_memory_state(&mut self, memory: &[MemoryChange]);

	/// Function metadata from the engine trace.
	fn capture_wasm_function_call(&mut self, meta: &FunctionMeta);

	/// The outermost frame is about to execute.
	fn capture_start(&mut self, from: H160, to: H160, create: bool, input: &[u8], gas: u64);

	/// The outermost frame finished.
	fn capture_end(&mut self, output: &[u8], gas_used: u64, err: Option<ExitError>);

	/// Transaction-level bracket, feeding the used-gas figure.
	fn capture_tx_start(&mut self, gas_limit: u64);
	fn capture_tx_end(&mut self, rest_gas: u64);

	/// Whether a stop request interrupted tracing.
	fn interrupted(&self) -> bool;
}

/// The reference trace recorder.
pub struct WebAssemblyLogger {
	cfg: Config,

	storage: BTreeMap<H160, BTreeMap<H256, H256>>,
	logs: Vec<WasmLog>,
	function_calls: Vec<WasmFnCall>,
	globals: Vec<WasmGlobal>,
	global_memory: BTreeMap<u32, Vec<u8>>,
	output: Vec<u8>,
	err: Option<ExitError>,
	gas_limit: u64,
	used_gas: u64,

	interrupt: AtomicU32,
	reason: Option<ExitError>,
}

impl WebAssemblyLogger {
	/// Create a logger with the given configuration.
	#[must_use]
	pub fn new(cfg: Config) -> Self {
		Self {
			cfg,
			storage: BTreeMap::new(),
			logs: Vec::new(),
			function_calls: Vec::new(),
			globals: Vec::new(),
			global_memory: BTreeMap::new(),
			output: Vec::new(),
			err: None,
			gas_limit: 0,
			used_gas: 0,
			interrupt: AtomicU32::new(0),
			reason: None,
		}
	}

	/// Clears the data held by the logger.
	pub fn reset(&mut self) {
		self.storage.clear();
		self.logs.clear();
		self.function_calls.clear();
		self.globals.clear();
		self.global_memory.clear();
		self.output.clear();
		self.err = None;
	}

	/// Terminate tracing at the first opportune moment.
	pub fn stop(&mut self, reason: ExitError) {
		self.reason = Some(reason);
		self.interrupt.store(1, Ordering::SeqCst);
	}

	/// The captured log entries.
	#[must_use]
	pub fn logs(&self) -> &[WasmLog] {
		&self.logs
	}

	/// The captured global-variable writes.
	#[must_use]
	pub fn globals(&self) -> &[WasmGlobal] {
		&self.globals
	}

	/// The captured function metadata.
	#[must_use]
	pub fn function_calls(&self) -> &[WasmFnCall] {
		&self.function_calls
	}

	/// The global-memory snapshot: data segments plus captured changes.
	#[must_use]
	pub fn global_memory(&self) -> &BTreeMap<u32, Vec<u8>> {
		&self.global_memory
	}

	/// The VM error captured by the trace.
	#[must_use]
	pub fn error(&self) -> Option<&ExitError> {
		self.err.as_ref()
	}

	/// The VM return value captured by the trace.
	#[must_use]
	pub fn output(&self) -> &[u8] {
		&self.output
	}

	pub(crate) fn used_gas(&self) -> u64 {
		self.used_gas
	}

	pub(crate) fn stop_reason(&self) -> Option<&ExitError> {
		self.reason.as_ref()
	}

	fn at_limit(&self) -> bool {
		self.cfg.limit != 0 && self.cfg.limit <= self.logs.len()
	}

	/// The record every host-call capture upgrades. The immediately preceding
	/// record must be a WASM `call`; anything else means the engine and the
	/// host disagree about ordering and the trace is worthless.
	fn take_last_call_record(&mut self) -> WasmLog {
		let last = match self.logs.pop() {
			Some(last) => last,
			None => panic!("trace order is corrupted"),
		};
		if last.family != OpFamily::Wasm || last.op_code != WASM_OP_CALL {
			panic!("trace order is corrupted");
		}
		last
	}
}

impl WasmLogger for WebAssemblyLogger {
	fn capture_wasm_state(&mut self, step: &StepEvent, gas: u64, depth: usize, refund: u64) {
		if self.interrupted() || self.at_limit() {
			return;
		}

		let memory = if self.cfg.enable_memory {
			step.memory_changes
				.first()
				.map(|change| (change.offset, change.data.clone()))
		} else {
			None
		};
		let stack = if self.cfg.disable_stack {
			None
		} else {
			Some(step.stack.iter().map(|v| U256::from(*v)).collect())
		};

		self.logs.push(WasmLog {
			pc: u64::from(step.pc),
			family: OpFamily::Wasm,
			op_code: step.opcode,
			op_name: step.name.clone(),
			params: step.params.clone(),
			gas,
			gas_cost: 0,
			memory,
			stack,
			return_data: Vec::new(),
			storage: None,
			depth,
			refund,
			err: None,
			keep: step.stack_keep,
			drop: step.stack_drop,
		});
	}

	fn capture_gas_state(&mut self, amount: u64, gas: u64, depth: usize, err: Option<ExitError>) {
		if self.interrupted() || self.at_limit() {
			return;
		}

		let last = self.take_last_call_record();
		self.logs.push(WasmLog {
			pc: last.pc,
			family: OpFamily::Gas,
			op_code: 0,
			op_name: "gas".into(),
			params: Vec::new(),
			gas,
			// total gas that is consumed by the following Wasm operations
			gas_cost: amount,
			memory: last.memory,
			stack: last.stack,
			return_data: Vec::new(),
			storage: None,
			depth,
			refund: last.refund,
			err,
			keep: 0,
			drop: 0,
		});
	}

	fn capture_state(
		&mut self,
		op: Opcode,
		gas: u64,
		cost: u64,
		address: H160,
		return_data: &[u8],
		depth: usize,
		storage: Option<(H256, H256)>,
		refund: u64,
		err: Option<ExitError>,
	) {
		if self.interrupted() || self.at_limit() {
			return;
		}

		let storage = if self.cfg.disable_storage {
			None
		} else {
			storage.map(|(index, value)| {
				let entry = self.storage.entry(address).or_default();
				entry.insert(index, value);
				entry.clone()
			})
		};
		let return_data = if self.cfg.enable_return_data {
			return_data.to_vec()
		} else {
			Vec::new()
		};

		let last = self.take_last_call_record();
		self.logs.push(WasmLog {
			pc: last.pc,
			family: OpFamily::Evm,
			op_code: op.0,
			op_name: op.name().into(),
			params: Vec::new(),
			gas,
			gas_cost: cost,
			memory: last.memory,
			stack: last.stack,
			return_data,
			storage,
			depth,
			refund,
			err,
			keep: 0,
			drop: 0,
		});
	}

	fn capture_global_variable(&mut self, pc: u64, index: u64, op: &str, params: &[u64], value: u64) {
		self.globals.push(WasmGlobal {
			pc,
			index,
			op: op.into(),
			params: params.to_vec(),
			value,
		});
	}

	fn capture_global_memory_state(&mut self, memory: &[MemoryChange]) {
		for change in memory {
			self.global_memory
				.insert(change.offset, change.data.clone());
		}
	}

	fn capture_wasm_function_call(&mut self, meta: &FunctionMeta) {
		self.function_calls.push(WasmFnCall {
			fn_index: meta.fn_index,
			max_stack_height: meta.max_stack_height,
			num_locals: meta.num_locals,
			fn_name: meta.fn_name.clone(),
		});
	}

	fn capture_start(&mut self, _from: H160, _to: H160, _create: bool, _input: &[u8], _gas: u64) {}

	fn capture_end(&mut self, output: &[u8], _gas_used: u64, err: Option<ExitError>) {
		self.output = output.to_vec();
		self.err = err;
	}

	fn capture_tx_start(&mut self, gas_limit: u64) {
		self.gas_limit = gas_limit;
	}

	fn capture_tx_end(&mut self, rest_gas: u64) {
		self.used_gas = self.gas_limit - rest_gas;
	}

	fn interrupted(&self) -> bool {
		self.interrupt.load(Ordering::SeqCst) > 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn call_step() -> StepEvent {
		StepEvent {
			pc: 7,
			opcode: WASM_OP_CALL,
			name: "call".into(),
			stack: vec![1, 2],
			..Default::default()
		}
	}

	fn debug_logger() -> WebAssemblyLogger {
		WebAssemblyLogger::new(Config {
			debug: true,
			enable_return_data: true,
			..Default::default()
		})
	}

	#[test]
	fn gas_capture_upgrades_the_call_record() {
		let mut logger = debug_logger();
		logger.capture_wasm_state(&call_step(), 1000, 1, 0);
		logger.capture_gas_state(13, 1000, 1, None);

		assert_eq!(logger.logs().len(), 1);
		let log = &logger.logs()[0];
		assert_eq!(log.family, OpFamily::Gas);
		assert_eq!(log.pc, 7);
		assert_eq!(log.gas_cost, 13);
		assert_eq!(log.stack, Some(vec![U256::from(1), U256::from(2)]));
	}

	#[test]
	fn evm_capture_tracks_storage() {
		let mut logger = debug_logger();
		let address = H160::from_low_u64_be(1);
		logger.capture_wasm_state(&call_step(), 1000, 1, 0);
		logger.capture_state(
			Opcode::SSTORE,
			1000,
			100,
			address,
			&[],
			1,
			Some((H256::from_low_u64_be(1), H256::from_low_u64_be(2))),
			0,
			None,
		);

		let log = &logger.logs()[0];
		assert_eq!(log.family, OpFamily::Evm);
		assert_eq!(
			log.storage.as_ref().unwrap().get(&H256::from_low_u64_be(1)),
			Some(&H256::from_low_u64_be(2))
		);
	}

	#[test]
	#[should_panic(expected = "trace order is corrupted")]
	fn gas_capture_without_call_record_panics() {
		let mut logger = debug_logger();
		let mut step = call_step();
		step.opcode = 0x20;
		logger.capture_wasm_state(&step, 1000, 1, 0);
		logger.capture_gas_state(13, 1000, 1, None);
	}

	#[test]
	fn limit_caps_the_log() {
		let mut logger = WebAssemblyLogger::new(Config {
			debug: true,
			limit: 1,
			..Default::default()
		});
		logger.capture_wasm_state(&call_step(), 1000, 1, 0);
		logger.capture_wasm_state(&call_step(), 990, 1, 0);
		assert_eq!(logger.logs().len(), 1);
	}

	#[test]
	fn stop_interrupts_capture() {
		let mut logger = debug_logger();
		logger.stop(crate::error::ExitFatal::Aborted.into());
		logger.capture_wasm_state(&call_step(), 1000, 1, 0);
		assert!(logger.logs().is_empty());
		assert!(logger.interrupted());
	}
}
