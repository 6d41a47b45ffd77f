//! The interpreter driver: owns the call-depth stack and the scope queue,
//! instruments deployment code, registers the host function set, services
//! the injected gas charge, dispatches EVM opcode emulations and classifies
//! engine exit codes.

use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::mem;

use primitive_types::{H160, H256, U256};

use crate::engine::{
	EngineExit, EngineFactory, HostContext, HostOutcome, MemoryAccess, StepEvent,
};
use crate::error::{ExitError, ExitException, ExitFatal, ExitResult, ExitSucceed};
use crate::eval::{created_address, Control};
use crate::gasometer::{self, G_CODE_DEPOSIT};
use crate::host::{self, HostFn, HostRegistry, GAS_IMPORT_FIELD};
use crate::inject;
use crate::jumptable::{JumpTable, Operation};
use crate::memory::GuestMemory;
use crate::opcode::Opcode;
use crate::runtime::{
	CallOutcome, CallParams, CallScheme, Contract, CreateOutcome, CreateParams, Handler, Log,
	RuntimeBackend, RuntimeEnvironment, ScopeContext, Transfer, CALL_DEPTH_LIMIT,
};
use crate::tracing::WasmLogger;

/// Interpreter configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct Config {
	/// Replay the engine trace into the configured tracer.
	pub debug: bool,
}

/// The WASM-EVM bridging interpreter. One instance drives one logical thread
/// of execution; nested EVM-style calls recurse through [Self::run] and each
/// drive a fresh engine from the factory while sharing this state.
pub struct WasmInterpreter<B> {
	backend: B,
	config: Config,
	tracer: Option<Rc<RefCell<dyn WasmLogger>>>,
	engines: Box<dyn EngineFactory>,
	table: JumpTable,
	registry: HostRegistry,

	// queue with all frame contexts
	scopes: Vec<ScopeContext>,
	depth: usize,
	read_only: bool,
	return_data: Vec<u8>,
	pending_error: Option<ExitError>,
}

impl<B: RuntimeBackend + RuntimeEnvironment> WasmInterpreter<B> {
	/// Create an interpreter over a backend and an engine factory.
	pub fn new(
		backend: B,
		config: Config,
		engines: Box<dyn EngineFactory>,
		tracer: Option<Rc<RefCell<dyn WasmLogger>>>,
	) -> Self {
		Self {
			backend,
			config,
			tracer,
			engines,
			table: JumpTable::london(),
			registry: HostRegistry::evm(),
			scopes: Vec::new(),
			depth: 0,
			read_only: false,
			return_data: Vec::new(),
			pending_error: None,
		}
	}

	/// The world-state backend.
	pub fn backend(&self) -> &B {
		&self.backend
	}

	/// Mutable access to the world-state backend.
	pub fn backend_mut(&mut self) -> &mut B {
		&mut self.backend
	}

	/// The registered host function set.
	pub fn registry(&self) -> &HostRegistry {
		&self.registry
	}

	/// The scope of the currently executing frame.
	pub fn scope(&self) -> Option<&ScopeContext> {
		self.scopes.last()
	}

	/// Execute `contract` with `input`. Returns the frame's output and exit
	/// reason; the contract's remaining gas is left on `contract`.
	pub fn run(
		&mut self,
		contract: &mut Contract,
		input: &[u8],
		read_only: bool,
	) -> (Vec<u8>, ExitResult) {
		// Increment the call depth which is restricted to 1024.
		if self.depth >= CALL_DEPTH_LIMIT {
			return (Vec::new(), ExitException::CallTooDeep.into());
		}
		self.depth += 1;

		// Make sure read_only is only set if we aren't in read_only yet.
		// This also makes sure the flag isn't removed for child calls.
		let was_read_only = self.read_only;
		if read_only && !self.read_only {
			self.read_only = true;
		}

		// Reset the previous call's return data. It's unimportant to
		// preserve the old buffer as every returning call will return new
		// data anyway.
		self.return_data = Vec::new();

		let (retval, reason) = self.run_inner(contract, input);

		self.read_only = was_read_only;
		self.depth -= 1;

		(retval, reason)
	}

	fn run_inner(&mut self, contract: &mut Contract, input: &[u8]) -> (Vec<u8>, ExitResult) {
		// Don't bother with the execution if there's no code.
		if contract.code.is_empty() {
			return (Vec::new(), Ok(ExitSucceed::Stopped));
		}

		if self.config.debug && self.tracer.is_none() {
			return (Vec::new(), ExitFatal::NotConfigured.into());
		}

		// Deployment calls carry no input; the module must pass the
		// injection pass before it runs.
		if input.is_empty() {
			match inject::inject_gas_computation_and_stack_protection(&contract.code) {
				Ok(injected) => contract.code = injected,
				Err(e) => {
					return (
						Vec::new(),
						ExitException::Other(Cow::Owned(format!(
							"failed to check contract deployment code: {}",
							e
						)))
						.into(),
					)
				}
			}
		}
		contract.input = input.to_vec();

		let mut engine = self.engines.engine();
		if let Err(e) = engine.load_module(&contract.code) {
			return (Vec::new(), Err(e));
		}

		if self.scopes.len() != self.depth - 1 {
			return (Vec::new(), ExitFatal::ScopeQueueMismatch.into());
		}
		self.scopes.push(ScopeContext::new(mem::take(contract)));
		self.pending_error = None;

		log::trace!(target: "wasm", "running contract at depth {}", self.depth);
		let exit = engine.compute_result(&mut BridgeContext { interp: self });

		if self.config.debug {
			let trace = engine.take_trace();
			if let Some(tracer) = &self.tracer {
				let mut tracer = tracer.borrow_mut();
				if !trace.global_memory.is_empty() {
					tracer.capture_global_memory_state(&trace.global_memory);
				}
				for meta in &trace.fn_metas {
					tracer.capture_wasm_function_call(meta);
				}
			}
		}

		if let Some(scope) = self.scopes.pop() {
			*contract = scope.contract;
		}

		let retval = mem::take(&mut self.return_data);
		let pending = self.pending_error.take();
		let reason = match exit {
			EngineExit::Ok => Ok(ExitSucceed::Stopped),
			EngineExit::StopToken => Ok(ExitSucceed::Returned),
			EngineExit::OutOfGas => Err(pending.unwrap_or(ExitError::Exception(ExitException::OutOfGas))),
			EngineExit::ExecutionReverted => Err(ExitError::Reverted),
			EngineExit::Unknown => Err(pending.unwrap_or(ExitError::Reverted)),
		};
		// Return data survives reverts only.
		let retval = match &reason {
			Ok(_) | Err(ExitError::Reverted) => retval,
			Err(_) => Vec::new(),
		};

		(retval, reason)
	}

	fn process_host_call(
		&mut self,
		name: &str,
		params: &[i64],
		memory: &mut dyn MemoryAccess,
	) -> HostOutcome {
		if let Some(tracer) = &self.tracer {
			if tracer.borrow().interrupted() {
				self.pending_error = Some(ExitFatal::Aborted.into());
				return HostOutcome::Fatal;
			}
		}

		if name == GAS_IMPORT_FIELD {
			return self.charge_gas(params);
		}

		let host_fn = match self.registry.get(name) {
			Some(host_fn) => host_fn.clone(),
			None => {
				self.pending_error = Some(
					ExitException::Other(Cow::Owned(format!("unknown host function '{}'", name)))
						.into(),
				);
				return HostOutcome::Fatal;
			}
		};
		if params.len() != host_fn.arity {
			log::debug!(
				target: "wasm",
				"host fn '{}' called with params count {} while expected {}",
				name, params.len(), host_fn.arity,
			);
			self.pending_error = Some(ExitException::BadInputParams.into());
			return HostOutcome::BadParams;
		}

		self.process_opcode(&host_fn, params, memory)
	}

	/// Service the injected `env.gas : (i64) -> ()` charge.
	fn charge_gas(&mut self, params: &[i64]) -> HostOutcome {
		if params.len() != 1 {
			self.pending_error = Some(ExitException::BadInputParams.into());
			return HostOutcome::BadParams;
		}
		// A negative amount becomes a large u64 charge, guaranteeing
		// out-of-gas; the injector only emits non-negative constants.
		let amount = params[0] as u64;

		let (gas, depth) = match self.scopes.last() {
			Some(scope) => (scope.contract.gas, self.depth),
			None => {
				self.pending_error = Some(ExitFatal::ScopeQueueMismatch.into());
				return HostOutcome::Fatal;
			}
		};

		if gas < amount {
			self.capture_gas(amount, gas, depth, Some(ExitException::OutOfGas.into()));
			self.pending_error = Some(ExitException::OutOfGas.into());
			return HostOutcome::OutOfGas;
		}
		self.capture_gas(amount, gas, depth, None);

		if let Some(scope) = self.scopes.last_mut() {
			scope.contract.use_gas(amount);
		}
		HostOutcome::Ok
	}

	/// Emulate one EVM opcode: synthesize the operand stack, run the
	/// preprocessors, execute through the jump table, deliver the result and
	/// emit exactly one EVM-family trace record.
	fn process_opcode(
		&mut self,
		host_fn: &HostFn,
		params: &[i64],
		raw_memory: &mut dyn MemoryAccess,
	) -> HostOutcome {
		log::trace!(target: "wasm", "executing host fn '{}'", host_fn.name);

		let contract = match self.scopes.last_mut() {
			Some(scope) => mem::take(&mut scope.contract),
			None => {
				self.pending_error = Some(ExitFatal::ScopeQueueMismatch.into());
				return HostOutcome::Fatal;
			}
		};
		let mut scope = ScopeContext::new(contract);
		let mut memory = GuestMemory::new(raw_memory);

		// Fill the stack with input parameters, reversed so that argument 0
		// ends up on top.
		for param in params.iter().rev() {
			if scope.stack.push(H256::from_low_u64_be(*param as u64)).is_err() {
				self.restore_contract(scope);
				self.pending_error = Some(ExitException::StackOverflow.into());
				return HostOutcome::Fatal;
			}
		}

		// Convert memory offsets into stack items for the declared
		// arguments.
		for pre in &host_fn.preprocessors {
			if let Err(e) = host::replace_mem_offset_with_value(&mut scope, &mut memory, params, *pre)
			{
				self.restore_contract(scope);
				self.pending_error = Some(e.into());
				return HostOutcome::Fatal;
			}
		}

		let storage = self.storage_delta(host_fn.opcode, &scope);
		let gas_before = scope.contract.gas;

		// Price the opcode first. The EVM record upgrades the `call` record
		// before any nested frame runs, so records of inner frames appear
		// between this one and the outer frame's subsequent steps.
		let (op, cost, charge) = self.charge_evm_op(host_fn.opcode, &mut scope, &mut memory);
		self.capture_state(
			host_fn.opcode,
			gas_before,
			cost,
			&scope,
			storage,
			charge.as_ref().err().cloned(),
		);
		let op = match (charge, op) {
			(Ok(()), Some(op)) => op,
			(Err(e), _) => {
				self.restore_contract(scope);
				return self.fail_with(e);
			}
			(Ok(()), None) => {
				self.restore_contract(scope);
				return self.fail_with(ExitException::InvalidOpcode(host_fn.opcode).into());
			}
		};

		let control = (op.execute)(&mut scope, &mut memory, self);
		// Always take the return buffer; the revert opcode returns data with
		// its error.
		self.return_data = mem::take(&mut scope.retval);

		let result = match control {
			Control::Continue => Ok(None),
			Control::Exit(Ok(succeed)) => Ok(Some(succeed)),
			Control::Exit(Err(e)) => Err(e),
		};

		// Result delivery only makes sense when the opcode ran to
		// completion.
		if result.is_ok() {
			if let Some(dest_len) = host_fn.finalizer {
				if let Err(e) =
					host::copy_last_stack_item_to_memory(&scope, &mut memory, params, dest_len)
				{
					self.restore_contract(scope);
					self.pending_error = Some(e.into());
					return HostOutcome::Fatal;
				}
			}
		}

		self.restore_contract(scope);

		match result {
			Ok(None) => HostOutcome::Ok,
			Ok(Some(_)) => HostOutcome::Stop,
			Err(ExitError::Reverted) => HostOutcome::Revert,
			Err(ExitError::Exception(ExitException::OutOfGas)) => {
				self.pending_error = Some(ExitException::OutOfGas.into());
				HostOutcome::OutOfGas
			}
			Err(e) => {
				self.pending_error = Some(e);
				HostOutcome::Fatal
			}
		}
	}

	/// Charge an opcode's constant gas, then its dynamic gas with the memory
	/// bound derived from the operand stack.
	fn charge_evm_op(
		&mut self,
		opcode: Opcode,
		scope: &mut ScopeContext,
		memory: &mut GuestMemory<'_>,
	) -> (Option<Operation>, u64, Result<(), ExitError>) {
		let op = match self.table.get(opcode) {
			Some(op) => *op,
			None => return (None, 0, Err(ExitException::InvalidOpcode(opcode).into())),
		};

		let mut cost = op.constant_gas;
		if !scope.contract.use_gas(op.constant_gas) {
			return (Some(op), cost, Err(ExitException::OutOfGas.into()));
		}

		if let Some(dynamic_gas) = op.dynamic_gas {
			let mut memory_bound = 0u64;
			if let Some(memory_size) = op.memory_size {
				let size = match memory_size(&scope.stack) {
					Ok(size) => size,
					Err(e) => return (Some(op), cost, Err(e.into())),
				};
				memory_bound = match gasometer::to_word_size(size)
					.and_then(|words| words.checked_mul(32).ok_or(ExitException::GasUintOverflow))
				{
					Ok(bound) => bound,
					Err(e) => return (Some(op), cost, Err(e.into())),
				};
			}
			let dynamic = match dynamic_gas(scope, memory, self, memory_bound) {
				Ok(dynamic) => dynamic,
				Err(e) => return (Some(op), cost, Err(e.into())),
			};
			cost += dynamic;
			if !scope.contract.use_gas(dynamic) {
				return (Some(op), cost, Err(ExitException::OutOfGas.into()));
			}
		}

		(Some(op), cost, Ok(()))
	}

	fn capture_state(
		&mut self,
		opcode: Opcode,
		gas: u64,
		cost: u64,
		scope: &ScopeContext,
		storage: Option<(H256, H256)>,
		err: Option<ExitError>,
	) {
		if !self.config.debug {
			return;
		}
		let refund = self.backend.refund();
		let return_data = self.return_data.clone();
		let depth = self.depth;
		if let Some(tracer) = &self.tracer {
			tracer.borrow_mut().capture_state(
				opcode,
				gas,
				cost,
				scope.contract.address,
				&return_data,
				depth,
				storage,
				refund,
				err,
			);
		}
	}

	fn fail_with(&mut self, e: ExitError) -> HostOutcome {
		match e {
			ExitError::Exception(ExitException::OutOfGas) => {
				self.pending_error = Some(ExitException::OutOfGas.into());
				HostOutcome::OutOfGas
			}
			ExitError::Reverted => HostOutcome::Revert,
			e => {
				self.pending_error = Some(e);
				HostOutcome::Fatal
			}
		}
	}

	fn storage_delta(&self, opcode: Opcode, scope: &ScopeContext) -> Option<(H256, H256)> {
		match opcode {
			Opcode::SLOAD => {
				let index = scope.stack.peek(0).ok()?;
				Some((index, self.backend.storage(scope.contract.address, index)))
			}
			Opcode::SSTORE => {
				let index = scope.stack.peek(0).ok()?;
				let value = scope.stack.peek(1).ok()?;
				Some((index, value))
			}
			_ => None,
		}
	}

	fn restore_contract(&mut self, scope: ScopeContext) {
		if let Some(last) = self.scopes.last_mut() {
			last.contract = scope.contract;
		}
	}

	fn capture_gas(&mut self, amount: u64, gas: u64, depth: usize, err: Option<ExitError>) {
		if !self.config.debug {
			return;
		}
		if let Some(tracer) = &self.tracer {
			tracer.borrow_mut().capture_gas_state(amount, gas, depth, err);
		}
	}

	fn capture_step(&mut self, step: &StepEvent) {
		if !self.config.debug {
			return;
		}
		let (gas, depth) = match self.scopes.last() {
			Some(scope) => (scope.contract.gas, self.depth),
			None => return,
		};
		let refund = self.backend.refund();
		if let Some(tracer) = &self.tracer {
			tracer.borrow_mut().capture_wasm_state(step, gas, depth, refund);
		}
	}

	fn capture_global(&mut self, step: &StepEvent, index: u64, value: u64) {
		if !self.config.debug {
			return;
		}
		if let Some(tracer) = &self.tracer {
			tracer.borrow_mut().capture_global_variable(
				u64::from(step.pc),
				index,
				&step.name,
				&step.params,
				value,
			);
		}
	}
}

/// The handle the engine drives during [WasmInterpreter::run].
struct BridgeContext<'i, B> {
	interp: &'i mut WasmInterpreter<B>,
}

impl<'i, B: RuntimeBackend + RuntimeEnvironment> HostContext for BridgeContext<'i, B> {
	fn invoke(
		&mut self,
		name: &str,
		params: &[i64],
		memory: &mut dyn MemoryAccess,
	) -> HostOutcome {
		self.interp.process_host_call(name, params, memory)
	}

	fn on_step(&mut self, step: &StepEvent) {
		self.interp.capture_step(step);
	}

	fn on_global(&mut self, step: &StepEvent, index: u64, value: u64) {
		self.interp.capture_global(step, index, value);
	}
}

impl<B: RuntimeBackend + RuntimeEnvironment> RuntimeBackend for WasmInterpreter<B> {
	fn balance(&self, address: H160) -> U256 {
		self.backend.balance(address)
	}
	fn code(&self, address: H160) -> Vec<u8> {
		self.backend.code(address)
	}
	fn code_size(&self, address: H160) -> U256 {
		self.backend.code_size(address)
	}
	fn code_hash(&self, address: H160) -> H256 {
		self.backend.code_hash(address)
	}
	fn storage(&self, address: H160, index: H256) -> H256 {
		self.backend.storage(address, index)
	}
	fn original_storage(&self, address: H160, index: H256) -> H256 {
		self.backend.original_storage(address, index)
	}
	fn set_storage(&mut self, address: H160, index: H256, value: H256) -> Result<(), ExitError> {
		self.backend.set_storage(address, index, value)
	}
	fn exists(&self, address: H160) -> bool {
		self.backend.exists(address)
	}
	fn is_empty(&self, address: H160) -> bool {
		self.backend.is_empty(address)
	}
	fn nonce(&self, address: H160) -> U256 {
		self.backend.nonce(address)
	}
	fn inc_nonce(&mut self, address: H160) -> Result<(), ExitError> {
		self.backend.inc_nonce(address)
	}
	fn set_code(&mut self, address: H160, code: Vec<u8>) {
		self.backend.set_code(address, code)
	}
	fn is_cold(&self, address: H160, index: Option<H256>) -> bool {
		self.backend.is_cold(address, index)
	}
	fn mark_hot(&mut self, address: H160, index: Option<H256>) {
		self.backend.mark_hot(address, index)
	}
	fn log(&mut self, log: Log) -> Result<(), ExitError> {
		self.backend.log(log)
	}
	fn mark_delete(&mut self, address: H160, target: H160) -> Result<(), ExitError> {
		self.backend.mark_delete(address, target)
	}
	fn transfer(&mut self, transfer: Transfer) -> Result<(), ExitError> {
		self.backend.transfer(transfer)
	}
	fn refund(&self) -> u64 {
		self.backend.refund()
	}
	fn add_refund(&mut self, value: u64) {
		self.backend.add_refund(value)
	}
	fn sub_refund(&mut self, value: u64) {
		self.backend.sub_refund(value)
	}
	fn snapshot(&mut self) -> usize {
		self.backend.snapshot()
	}
	fn revert_to_snapshot(&mut self, id: usize) {
		self.backend.revert_to_snapshot(id)
	}
}

impl<B: RuntimeBackend + RuntimeEnvironment> RuntimeEnvironment for WasmInterpreter<B> {
	fn block_hash(&self, number: U256) -> H256 {
		self.backend.block_hash(number)
	}
	fn block_number(&self) -> U256 {
		self.backend.block_number()
	}
	fn block_coinbase(&self) -> H160 {
		self.backend.block_coinbase()
	}
	fn block_timestamp(&self) -> U256 {
		self.backend.block_timestamp()
	}
	fn block_difficulty(&self) -> U256 {
		self.backend.block_difficulty()
	}
	fn block_gas_limit(&self) -> U256 {
		self.backend.block_gas_limit()
	}
	fn block_base_fee_per_gas(&self) -> U256 {
		self.backend.block_base_fee_per_gas()
	}
	fn chain_id(&self) -> U256 {
		self.backend.chain_id()
	}
	fn gas_price(&self) -> U256 {
		self.backend.gas_price()
	}
	fn origin(&self) -> H160 {
		self.backend.origin()
	}
}

impl<B: RuntimeBackend + RuntimeEnvironment> Handler for WasmInterpreter<B> {
	fn return_data(&self) -> &[u8] {
		&self.return_data
	}

	fn is_static(&self) -> bool {
		self.read_only
	}

	fn call(&mut self, _scheme: CallScheme, params: CallParams) -> CallOutcome {
		let snapshot = self.backend.snapshot();

		if let Some(transfer) = params.transfer.clone() {
			if let Err(e) = self.backend.transfer(transfer) {
				self.backend.revert_to_snapshot(snapshot);
				return CallOutcome {
					reason: Err(e),
					output: Vec::new(),
					gas_left: params.gas,
				};
			}
		}

		let code = self.backend.code(params.code_address);
		let mut contract = Contract::new(
			params.address,
			params.caller,
			params.apparent_value,
			code,
			params.gas,
		);
		let (output, reason) = self.run(&mut contract, &params.input, params.is_static);

		let gas_left = match &reason {
			Ok(_) => contract.gas,
			Err(ExitError::Reverted) => {
				self.backend.revert_to_snapshot(snapshot);
				contract.gas
			}
			Err(_) => {
				self.backend.revert_to_snapshot(snapshot);
				0
			}
		};

		CallOutcome {
			reason,
			output,
			gas_left,
		}
	}

	fn create(&mut self, params: CreateParams) -> CreateOutcome {
		let snapshot = self.backend.snapshot();

		let nonce = self.backend.nonce(params.caller);
		let address = created_address(params.caller, nonce, params.scheme, &params.init_code);
		if let Err(e) = self.backend.inc_nonce(params.caller) {
			return CreateOutcome {
				address: None,
				reason: Err(e),
				output: Vec::new(),
				gas_left: params.gas,
			};
		}

		// Create collision.
		if self.backend.nonce(address) > U256::zero() || !self.backend.code(address).is_empty() {
			return CreateOutcome {
				address: None,
				reason: Err(ExitException::Other("contract address collision".into()).into()),
				output: Vec::new(),
				gas_left: 0,
			};
		}

		if let Err(e) = self.backend.transfer(Transfer {
			source: params.caller,
			target: address,
			value: params.value,
		}) {
			self.backend.revert_to_snapshot(snapshot);
			return CreateOutcome {
				address: None,
				reason: Err(e),
				output: Vec::new(),
				gas_left: params.gas,
			};
		}
		let _ = self.backend.inc_nonce(address);

		let mut contract = Contract::new(
			address,
			params.caller,
			params.value,
			params.init_code.clone(),
			params.gas,
		);
		// Empty input puts the frame in deployment mode: the init code gets
		// injected before it runs and returns the module to deploy.
		let (output, reason) = self.run(&mut contract, &[], false);

		match reason {
			Ok(_) => {
				let deposit = output.len() as u64 * G_CODE_DEPOSIT;
				if !contract.use_gas(deposit) {
					self.backend.revert_to_snapshot(snapshot);
					return CreateOutcome {
						address: None,
						reason: ExitException::OutOfGas.into(),
						output: Vec::new(),
						gas_left: 0,
					};
				}
				self.backend.set_code(address, output.clone());
				CreateOutcome {
					address: Some(address),
					reason,
					output,
					gas_left: contract.gas,
				}
			}
			Err(ExitError::Reverted) => {
				self.backend.revert_to_snapshot(snapshot);
				CreateOutcome {
					address: None,
					reason,
					output,
					gas_left: contract.gas,
				}
			}
			Err(_) => {
				self.backend.revert_to_snapshot(snapshot);
				CreateOutcome {
					address: None,
					reason,
					output: Vec::new(),
					gas_left: 0,
				}
			}
		}
	}
}
