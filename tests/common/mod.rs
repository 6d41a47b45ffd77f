//! Shared fixtures: an in-memory world state and a scripted engine that
//! replays a fixed sequence of steps and host calls.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use primitive_types::{H160, H256, U256};

use evm_wasm::engine::{
	EngineExit, EngineFactory, EngineTrace, HostContext, MemoryAccess, StepEvent, WasmEngine,
	WASM_OP_CALL,
};
use evm_wasm::{
	Config, Contract, ExitError, ExitException, Log, RuntimeBackend, RuntimeEnvironment,
	TracerConfig, Transfer, WasmInterpreter, WasmLogger, WebAssemblyLogger,
};

pub const GAS_LIMIT: u64 = 10_000_000;

#[derive(Clone, Debug, Default)]
struct Account {
	balance: U256,
	nonce: U256,
	code: Vec<u8>,
	storage: BTreeMap<H256, H256>,
	original_storage: BTreeMap<H256, H256>,
}

/// A fresh in-memory state with the scenario block context: number 1, time
/// 2, difficulty 3, base fee 4.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBackend {
	accounts: BTreeMap<H160, Account>,
	hot_addresses: Vec<H160>,
	hot_slots: Vec<(H160, H256)>,
	logs: Vec<Log>,
	refund: u64,
	snapshots: Vec<(BTreeMap<H160, Account>, u64)>,
}

impl InMemoryBackend {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_contract_code(&mut self, address: H160, code: Vec<u8>) {
		self.accounts.entry(address).or_default().code = code;
	}

	pub fn set_balance(&mut self, address: H160, balance: U256) {
		self.accounts.entry(address).or_default().balance = balance;
	}

	pub fn logs(&self) -> &[Log] {
		&self.logs
	}
}

impl RuntimeBackend for InMemoryBackend {
	fn balance(&self, address: H160) -> U256 {
		self.accounts.get(&address).map(|a| a.balance).unwrap_or_default()
	}

	fn code(&self, address: H160) -> Vec<u8> {
		self.accounts
			.get(&address)
			.map(|a| a.code.clone())
			.unwrap_or_default()
	}

	fn code_hash(&self, address: H160) -> H256 {
		use sha3::{Digest, Keccak256};
		let code = self.code(address);
		H256::from_slice(Keccak256::digest(&code).as_slice())
	}

	fn storage(&self, address: H160, index: H256) -> H256 {
		self.accounts
			.get(&address)
			.and_then(|a| a.storage.get(&index).copied())
			.unwrap_or_default()
	}

	fn original_storage(&self, address: H160, index: H256) -> H256 {
		self.accounts
			.get(&address)
			.and_then(|a| a.original_storage.get(&index).copied())
			.unwrap_or_default()
	}

	fn set_storage(&mut self, address: H160, index: H256, value: H256) -> Result<(), ExitError> {
		let account = self.accounts.entry(address).or_default();
		account
			.original_storage
			.entry(index)
			.or_insert_with(|| account.storage.get(&index).copied().unwrap_or_default());
		account.storage.insert(index, value);
		Ok(())
	}

	fn exists(&self, address: H160) -> bool {
		self.accounts.contains_key(&address)
	}

	fn is_empty(&self, address: H160) -> bool {
		self.accounts
			.get(&address)
			.map(|a| a.balance.is_zero() && a.nonce.is_zero() && a.code.is_empty())
			.unwrap_or(true)
	}

	fn nonce(&self, address: H160) -> U256 {
		self.accounts.get(&address).map(|a| a.nonce).unwrap_or_default()
	}

	fn inc_nonce(&mut self, address: H160) -> Result<(), ExitError> {
		let account = self.accounts.entry(address).or_default();
		account.nonce = account
			.nonce
			.checked_add(U256::one())
			.ok_or(ExitError::Exception(ExitException::Other("nonce overflow".into())))?;
		Ok(())
	}

	fn set_code(&mut self, address: H160, code: Vec<u8>) {
		self.accounts.entry(address).or_default().code = code;
	}

	fn is_cold(&self, address: H160, index: Option<H256>) -> bool {
		match index {
			Some(index) => !self.hot_slots.contains(&(address, index)),
			None => !self.hot_addresses.contains(&address),
		}
	}

	fn mark_hot(&mut self, address: H160, index: Option<H256>) {
		match index {
			Some(index) => {
				if !self.hot_slots.contains(&(address, index)) {
					self.hot_slots.push((address, index));
				}
			}
			None => {
				if !self.hot_addresses.contains(&address) {
					self.hot_addresses.push(address);
				}
			}
		}
	}

	fn log(&mut self, log: Log) -> Result<(), ExitError> {
		self.logs.push(log);
		Ok(())
	}

	fn mark_delete(&mut self, address: H160, _target: H160) -> Result<(), ExitError> {
		self.accounts.remove(&address);
		Ok(())
	}

	fn transfer(&mut self, transfer: Transfer) -> Result<(), ExitError> {
		let source_balance = self.balance(transfer.source);
		if source_balance < transfer.value {
			return Err(ExitException::OutOfFund.into());
		}
		self.accounts.entry(transfer.source).or_default().balance =
			source_balance - transfer.value;
		let target = self.accounts.entry(transfer.target).or_default();
		target.balance += transfer.value;
		Ok(())
	}

	fn refund(&self) -> u64 {
		self.refund
	}

	fn add_refund(&mut self, value: u64) {
		self.refund += value;
	}

	fn sub_refund(&mut self, value: u64) {
		self.refund = self.refund.saturating_sub(value);
	}

	fn snapshot(&mut self) -> usize {
		self.snapshots.push((self.accounts.clone(), self.refund));
		self.snapshots.len() - 1
	}

	fn revert_to_snapshot(&mut self, id: usize) {
		if let Some((accounts, refund)) = self.snapshots.get(id).cloned() {
			self.accounts = accounts;
			self.refund = refund;
			self.snapshots.truncate(id);
		}
	}
}

impl RuntimeEnvironment for InMemoryBackend {
	fn block_hash(&self, number: U256) -> H256 {
		H256::from_low_u64_be(number.low_u64().wrapping_mul(0x0101))
	}

	fn block_number(&self) -> U256 {
		U256::from(1)
	}

	fn block_coinbase(&self) -> H160 {
		H160::zero()
	}

	fn block_timestamp(&self) -> U256 {
		U256::from(2)
	}

	fn block_difficulty(&self) -> U256 {
		U256::from(3)
	}

	fn block_gas_limit(&self) -> U256 {
		U256::from(GAS_LIMIT)
	}

	fn block_base_fee_per_gas(&self) -> U256 {
		U256::from(4)
	}

	fn chain_id(&self) -> U256 {
		U256::from(1337)
	}

	fn gas_price(&self) -> U256 {
		U256::zero()
	}

	fn origin(&self) -> H160 {
		H160::zero()
	}
}

/// Guest linear memory backing a scripted engine, recording every write the
/// way the reference engine traces memory changes. Cloning shares the
/// underlying buffer, so tests can keep a handle across the run.
#[derive(Clone, Debug, Default)]
pub struct TraceMemory {
	inner: Rc<RefCell<TraceMemoryInner>>,
}

#[derive(Debug, Default)]
struct TraceMemoryInner {
	data: Vec<u8>,
	changes: Vec<(u32, Vec<u8>)>,
}

impl TraceMemory {
	pub fn with_size(size: usize) -> Self {
		Self {
			inner: Rc::new(RefCell::new(TraceMemoryInner {
				data: vec![0; size],
				changes: Vec::new(),
			})),
		}
	}

	/// Pre-load memory without recording a change, the way data segments
	/// initialize the guest.
	pub fn seed(&self, offset: usize, bytes: &[u8]) {
		let mut inner = self.inner.borrow_mut();
		for (i, b) in bytes.iter().enumerate() {
			if let Some(v) = inner.data.get_mut(offset + i) {
				*v = *b;
			}
		}
	}

	pub fn data(&self) -> Vec<u8> {
		self.inner.borrow().data.clone()
	}

	pub fn changes(&self) -> Vec<(u32, Vec<u8>)> {
		self.inner.borrow().changes.clone()
	}
}

impl MemoryAccess for TraceMemory {
	fn len(&self) -> usize {
		self.inner.borrow().data.len()
	}

	fn read(&self, offset: u32, len: u32) -> Vec<u8> {
		let inner = self.inner.borrow();
		let mut ret = vec![0; len as usize];
		for (i, b) in ret.iter_mut().enumerate() {
			if let Some(v) = inner.data.get(offset as usize + i) {
				*b = *v;
			}
		}
		ret
	}

	fn write(&mut self, offset: u32, value: &[u8]) {
		let mut inner = self.inner.borrow_mut();
		for (i, b) in value.iter().enumerate() {
			if let Some(v) = inner.data.get_mut(offset as usize + i) {
				*v = *b;
			}
		}
		inner.changes.push((offset, value.to_vec()));
	}
}

/// One scripted engine action.
#[derive(Clone, Debug)]
pub enum ScriptOp {
	/// Emit a raw Wasm step event.
	Step(StepEvent),
	/// Emit the `call` step for a host function and invoke it.
	Host { name: &'static str, params: Vec<i64> },
	/// Emit a global-variable write.
	Global { step: StepEvent, index: u64, value: u64 },
}

/// A Wasm step event for an ordinary (non-call) instruction.
pub fn plain_step(pc: u32, opcode: u8, name: &str) -> StepEvent {
	StepEvent {
		pc,
		opcode,
		name: name.to_string(),
		..Default::default()
	}
}

fn call_step(pc: u32, params: &[i64]) -> StepEvent {
	StepEvent {
		pc,
		opcode: WASM_OP_CALL,
		name: "call".to_string(),
		stack: params.iter().map(|p| *p as u64).collect(),
		..Default::default()
	}
}

/// An engine that replays a fixed script instead of interpreting bytecode.
pub struct ScriptedEngine {
	script: Vec<ScriptOp>,
	pub memory: TraceMemory,
	trace: EngineTrace,
	loaded: Rc<RefCell<Vec<Vec<u8>>>>,
	reject_load: bool,
	pc: u32,
}

impl ScriptedEngine {
	pub fn new(script: Vec<ScriptOp>, memory: TraceMemory) -> Self {
		Self {
			script,
			memory,
			trace: EngineTrace::default(),
			loaded: Rc::new(RefCell::new(Vec::new())),
			reject_load: false,
			pc: 0,
		}
	}

	pub fn with_trace(mut self, trace: EngineTrace) -> Self {
		self.trace = trace;
		self
	}

	pub fn with_load_log(mut self, loaded: Rc<RefCell<Vec<Vec<u8>>>>) -> Self {
		self.loaded = loaded;
		self
	}

	pub fn rejecting_load(mut self) -> Self {
		self.reject_load = true;
		self
	}
}

impl WasmEngine for ScriptedEngine {
	fn load_module(&mut self, code: &[u8]) -> Result<(), ExitError> {
		if self.reject_load {
			return Err(ExitException::EntrypointNotFound.into());
		}
		self.loaded.borrow_mut().push(code.to_vec());
		Ok(())
	}

	fn compute_result(&mut self, host: &mut dyn HostContext) -> EngineExit {
		let script = std::mem::take(&mut self.script);
		for op in script {
			match op {
				ScriptOp::Step(step) => {
					self.pc = step.pc;
					host.on_step(&step);
				}
				ScriptOp::Global { step, index, value } => {
					host.on_global(&step, index, value);
				}
				ScriptOp::Host { name, params } => {
					self.pc += 1;
					host.on_step(&call_step(self.pc, &params));
					let outcome = host.invoke(name, &params, &mut self.memory);
					if let Some(exit) = outcome.exit() {
						return exit;
					}
				}
			}
		}
		EngineExit::Ok
	}

	fn take_trace(&mut self) -> EngineTrace {
		std::mem::take(&mut self.trace)
	}
}

/// Hands out pre-built engines, one per call frame, outermost first.
pub struct EngineQueue(RefCell<Vec<ScriptedEngine>>);

impl EngineQueue {
	pub fn new(engines: Vec<ScriptedEngine>) -> Self {
		Self(RefCell::new(engines))
	}
}

impl EngineFactory for EngineQueue {
	fn engine(&self) -> Box<dyn WasmEngine> {
		let mut engines = self.0.borrow_mut();
		assert!(!engines.is_empty(), "script exhausted: unexpected nested frame");
		Box::new(engines.remove(0))
	}
}

/// A minimal module binary that passes the injection pass.
pub fn minimal_module() -> Vec<u8> {
	use parity_wasm::builder;

	let module = builder::module()
		.function()
		.signature()
		.param()
		.i32()
		.build()
		.body()
		.with_instructions(parity_wasm::elements::Instructions::new(vec![
			parity_wasm::elements::Instruction::GetLocal(0),
			parity_wasm::elements::Instruction::Drop,
			parity_wasm::elements::Instruction::End,
		]))
		.build()
		.build()
		.build();
	parity_wasm::serialize(module).unwrap()
}

/// The scenario tracer: stack and storage capture on, memory off, return
/// data on.
pub fn new_tracer() -> Rc<RefCell<WebAssemblyLogger>> {
	Rc::new(RefCell::new(WebAssemblyLogger::new(TracerConfig {
		enable_memory: true,
		disable_stack: false,
		disable_storage: false,
		enable_return_data: true,
		debug: true,
		limit: 0,
	})))
}

/// A debug-mode interpreter over one scripted frame.
pub fn new_machine(
	engines: Vec<ScriptedEngine>,
) -> (
	WasmInterpreter<InMemoryBackend>,
	Rc<RefCell<WebAssemblyLogger>>,
) {
	let tracer = new_tracer();
	tracer.borrow_mut().capture_tx_start(GAS_LIMIT);
	let logger: Rc<RefCell<dyn WasmLogger>> = tracer.clone();
	let interp = WasmInterpreter::new(
		InMemoryBackend::new(),
		Config { debug: true },
		Box::new(EngineQueue::new(engines)),
		Some(logger),
	);
	(interp, tracer)
}

/// Bracket a finished run's trace the way transaction processing does.
pub fn finish_trace(
	tracer: &Rc<RefCell<WebAssemblyLogger>>,
	output: &[u8],
	gas_left: u64,
	err: Option<ExitError>,
) {
	let mut tracer = tracer.borrow_mut();
	tracer.capture_end(output, GAS_LIMIT - gas_left, err);
	tracer.capture_tx_end(gas_left);
}

/// A contract frame holding the scenario gas limit.
pub fn new_contract(address: H160, code: Vec<u8>) -> Contract {
	Contract::new(address, H160::zero(), U256::zero(), code, GAS_LIMIT)
}
