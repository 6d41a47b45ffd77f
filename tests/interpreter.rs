mod common;

use std::cell::RefCell;
use std::rc::Rc;

use primitive_types::{H160, H256, U256};

use common::*;
use evm_wasm::engine::{EngineTrace, FunctionMeta, MemoryChange};
use evm_wasm::{ExitError, ExitException, ExitSucceed, OpFamily, RuntimeBackend};

fn scenario_address() -> H160 {
	let mut raw = [0u8; 20];
	raw[0] = 100;
	raw[1] = 20;
	raw[2] = 3;
	H160::from(raw)
}

#[test]
fn address_opcode_writes_the_contract_address() {
	let memory = TraceMemory::with_size(64);
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_address",
			params: vec![12],
		}],
		memory.clone(),
	);
	let (mut interp, tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(scenario_address(), vec![0x00, 0x61, 0x73, 0x6d]);
	let (ret, reason) = interp.run(&mut contract, &[0x01], false);

	assert_eq!(reason, Ok(ExitSucceed::Stopped));
	assert!(ret.is_empty());
	// ADDRESS is a quick-step opcode.
	assert_eq!(contract.gas, GAS_LIMIT - 2);

	let data = memory.data();
	assert_eq!(&data[12..32], scenario_address().as_bytes());

	let tracer = tracer.borrow();
	let log = &tracer.logs()[0];
	assert_eq!(log.family, OpFamily::Evm);
	assert_eq!(log.op_name, "ADDRESS");
	assert_eq!(log.gas, GAS_LIMIT);
	assert_eq!(log.gas_cost, 2);
	assert_eq!(log.depth, 1);
}

#[test]
fn callvalue_opcode_writes_the_apparent_value() {
	let memory = TraceMemory::with_size(64);
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_callvalue",
			params: vec![0],
		}],
		memory.clone(),
	);
	let (mut interp, _tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	contract.value = U256::from(0x1234);
	let (_, reason) = interp.run(&mut contract, &[0x02], false);

	assert_eq!(reason, Ok(ExitSucceed::Stopped));
	assert_eq!(contract.gas, GAS_LIMIT - 2);

	let mut expected = [0u8; 32];
	expected[30] = 0x12;
	expected[31] = 0x34;
	assert_eq!(&memory.data()[..32], &expected);
}

#[test]
fn timestamp_opcode_writes_the_block_time() {
	let memory = TraceMemory::with_size(64);
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_timestamp",
			params: vec![8],
		}],
		memory.clone(),
	);
	let (mut interp, _tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	let (_, reason) = interp.run(&mut contract, &[0x04], false);

	assert_eq!(reason, Ok(ExitSucceed::Stopped));
	// The scenario block context carries time = 2, delivered as a u64.
	assert_eq!(&memory.data()[8..16], &[0, 0, 0, 0, 0, 0, 0, 2]);
}

#[test]
fn balance_opcode_reads_its_argument_from_guest_memory() {
	let holder = H160::from_low_u64_be(0xbeef);
	let memory = TraceMemory::with_size(96);
	memory.seed(0, holder.as_bytes());
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_balance",
			params: vec![0, 32],
		}],
		memory.clone(),
	);
	let (mut interp, tracer) = new_machine(vec![engine]);
	interp.backend_mut().set_balance(holder, U256::from(0x64));

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	let (_, reason) = interp.run(&mut contract, &[0x08], false);

	assert_eq!(reason, Ok(ExitSucceed::Stopped));
	// Cold account access under the Berlin access-list rules.
	assert_eq!(contract.gas, GAS_LIMIT - 2600);

	let mut expected = [0u8; 32];
	expected[31] = 0x64;
	assert_eq!(&memory.data()[32..64], &expected);

	// The preprocessor read commits through the engine, so the touched span
	// shows up as a memory change.
	assert_eq!(memory.changes()[0], (0, holder.as_bytes().to_vec()));

	let tracer = tracer.borrow();
	assert_eq!(tracer.logs()[0].op_name, "BALANCE");
	assert_eq!(tracer.logs()[0].gas_cost, 2600);
}

#[test]
fn sstore_records_the_storage_delta() {
	let memory = TraceMemory::with_size(96);
	let key = H256::from_low_u64_be(7);
	let value = H256::from_low_u64_be(0x2a);
	memory.seed(0, key.as_bytes());
	memory.seed(32, value.as_bytes());
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_sstore",
			params: vec![0, 32],
		}],
		memory,
	);
	let (mut interp, tracer) = new_machine(vec![engine]);

	let address = scenario_address();
	let mut contract = new_contract(address, vec![0x01]);
	let (_, reason) = interp.run(&mut contract, &[0x01], false);

	assert_eq!(reason, Ok(ExitSucceed::Stopped));
	// Cold slot, originally zero: 2100 + 20000.
	assert_eq!(contract.gas, GAS_LIMIT - 22100);
	assert_eq!(interp.backend().storage(address, key), value);

	let tracer = tracer.borrow();
	let log = &tracer.logs()[0];
	assert_eq!(log.op_name, "SSTORE");
	assert_eq!(log.storage.as_ref().unwrap().get(&key), Some(&value));
}

#[test]
fn sload_writes_the_loaded_word() {
	let memory = TraceMemory::with_size(64);
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_sload",
			params: vec![5, 0],
		}],
		memory.clone(),
	);
	let (mut interp, tracer) = new_machine(vec![engine]);

	let address = H160::zero();
	let key = H256::from_low_u64_be(5);
	let value = H256::from_low_u64_be(0x99);
	interp.backend_mut().set_storage(address, key, value).unwrap();

	let mut contract = new_contract(address, vec![0x01]);
	let (_, reason) = interp.run(&mut contract, &[0x01], false);

	assert_eq!(reason, Ok(ExitSucceed::Stopped));
	// Cold slot load.
	assert_eq!(contract.gas, GAS_LIMIT - 2100);
	assert_eq!(&memory.data()[..32], value.as_bytes());

	let tracer = tracer.borrow();
	let log = &tracer.logs()[0];
	assert_eq!(log.op_name, "SLOAD");
	assert_eq!(log.storage.as_ref().unwrap().get(&key), Some(&value));
}

#[test]
fn gas_host_call_decrements_and_traces() {
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "gas",
			params: vec![13],
		}],
		TraceMemory::with_size(0),
	);
	let (mut interp, tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	let (_, reason) = interp.run(&mut contract, &[0x01], false);

	assert_eq!(reason, Ok(ExitSucceed::Stopped));
	assert_eq!(contract.gas, GAS_LIMIT - 13);

	let tracer = tracer.borrow();
	let log = &tracer.logs()[0];
	assert_eq!(log.family, OpFamily::Gas);
	assert_eq!(log.op_name, "gas");
	assert_eq!(log.gas, GAS_LIMIT);
	assert_eq!(log.gas_cost, 13);
	assert!(log.err.is_none());
}

#[test]
fn out_of_gas_halts_with_a_gas_record() {
	let engine = ScriptedEngine::new(
		vec![
			ScriptOp::Host {
				name: "gas",
				params: vec![1000],
			},
			// never reached
			ScriptOp::Host {
				name: "_evm_stop",
				params: vec![],
			},
		],
		TraceMemory::with_size(0),
	);
	let (mut interp, tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	contract.gas = 10;
	let (ret, reason) = interp.run(&mut contract, &[0x01], false);

	assert_eq!(reason, Err(ExitException::OutOfGas.into()));
	assert!(ret.is_empty());
	// The failed charge leaves the remaining gas untouched.
	assert_eq!(contract.gas, 10);

	let tracer = tracer.borrow();
	let last = tracer.logs().last().unwrap();
	assert_eq!(last.family, OpFamily::Gas);
	assert_eq!(last.gas_cost, 1000);
	assert_eq!(last.err, Some(ExitException::OutOfGas.into()));
}

#[test]
fn negative_gas_amounts_charge_as_large_u64() {
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "gas",
			params: vec![-1],
		}],
		TraceMemory::with_size(0),
	);
	let (mut interp, _tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	let (_, reason) = interp.run(&mut contract, &[0x01], false);

	assert_eq!(reason, Err(ExitException::OutOfGas.into()));
}

#[test]
fn greeting_is_returned_through_guest_memory() {
	let memory = TraceMemory::with_size(32);
	memory.seed(0, b"Hello, World");
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_return",
			params: vec![0, 12],
		}],
		memory,
	);
	let (mut interp, tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	let (ret, reason) = interp.run(&mut contract, &[0x01], false);

	assert_eq!(reason, Ok(ExitSucceed::Returned));
	assert_eq!(ret, b"Hello, World");

	finish_trace(&tracer, &ret, contract.gas, None);
	let result = tracer.borrow().get_result().unwrap();
	assert!(!result.failed);
	assert_eq!(result.return_value, hex::encode(b"Hello, World"));
}

#[test]
fn revert_preserves_return_data() {
	let memory = TraceMemory::with_size(32);
	memory.seed(0, b"nope");
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_revert",
			params: vec![0, 4],
		}],
		memory,
	);
	let (mut interp, tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	let (ret, reason) = interp.run(&mut contract, &[0x01], false);

	assert_eq!(reason, Err(ExitError::Reverted));
	assert_eq!(ret, b"nope");

	finish_trace(&tracer, &ret, contract.gas, Some(ExitError::Reverted));
	let result = tracer.borrow().get_result().unwrap();
	assert!(result.failed);
	assert_eq!(result.return_value, hex::encode(b"nope"));
}

#[test]
fn non_revert_failures_have_no_return_value() {
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "gas",
			params: vec![1000],
		}],
		TraceMemory::with_size(0),
	);
	let (mut interp, tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	contract.gas = 10;
	let (ret, reason) = interp.run(&mut contract, &[0x01], false);

	finish_trace(&tracer, &ret, contract.gas, reason.err());
	let result = tracer.borrow().get_result().unwrap();
	assert!(result.failed);
	assert_eq!(result.return_value, "");
}

#[test]
fn bad_arity_surfaces_as_bad_input_params() {
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_address",
			params: vec![],
		}],
		TraceMemory::with_size(0),
	);
	let (mut interp, _tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	let (_, reason) = interp.run(&mut contract, &[0x01], false);

	assert_eq!(reason, Err(ExitException::BadInputParams.into()));
}

#[test]
fn empty_code_is_a_no_op() {
	let (mut interp, _tracer) = new_machine(vec![]);

	let mut contract = new_contract(H160::zero(), Vec::new());
	let (ret, reason) = interp.run(&mut contract, &[0x01], false);

	assert_eq!(reason, Ok(ExitSucceed::Stopped));
	assert!(ret.is_empty());
	assert_eq!(contract.gas, GAS_LIMIT);
}

#[test]
fn deployment_injects_the_module_before_running() {
	let memory = TraceMemory::with_size(64);
	let payload = b"\x00asm\x01\x00\x00\x00deployed";
	memory.seed(0, payload);
	let loaded = Rc::new(RefCell::new(Vec::new()));
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_return",
			params: vec![0, payload.len() as i64],
		}],
		memory,
	)
	.with_load_log(loaded.clone());
	let (mut interp, _tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(H160::zero(), minimal_module());
	let (ret, reason) = interp.run(&mut contract, &[], false);

	assert_eq!(reason, Ok(ExitSucceed::Returned));
	assert_eq!(ret, payload);

	// The engine must have been handed the instrumented module, not the
	// original: the gas import is woven in.
	let loaded = loaded.borrow();
	let module: parity_wasm::elements::Module =
		parity_wasm::deserialize_buffer(&loaded[0]).unwrap();
	let has_gas_import = module
		.import_section()
		.map(|imports| {
			imports
				.entries()
				.iter()
				.any(|e| e.module() == "env" && e.field() == "gas")
		})
		.unwrap_or(false);
	assert!(has_gas_import);
	assert_eq!(contract.code, loaded[0]);
}

#[test]
fn malformed_deployment_code_is_rejected_before_execution() {
	let (mut interp, _tracer) = new_machine(vec![]);

	let mut contract = new_contract(H160::zero(), vec![0xde, 0xad, 0xbe, 0xef]);
	let (_, reason) = interp.run(&mut contract, &[], false);

	match reason {
		Err(ExitError::Exception(ExitException::Other(message))) => {
			assert!(message.contains("failed to check contract deployment code"));
		}
		other => panic!("unexpected reason: {:?}", other),
	}
}

#[test]
fn missing_entrypoint_fails_before_execution() {
	let engine =
		ScriptedEngine::new(Vec::new(), TraceMemory::with_size(0)).rejecting_load();
	let (mut interp, _tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	let (_, reason) = interp.run(&mut contract, &[0x01], false);

	assert_eq!(reason, Err(ExitException::EntrypointNotFound.into()));
}

#[test]
fn nested_call_runs_in_a_fresh_frame() {
	let callee = H160::from_low_u64_be(0xca11);

	let outer_memory = TraceMemory::with_size(128);
	outer_memory.seed(0, callee.as_bytes());
	// value word at 32 stays zero
	let outer = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_call",
			params: vec![100_000, 0, 32, 64, 0, 64, 3, 70],
		}],
		outer_memory.clone(),
	);

	let inner_memory = TraceMemory::with_size(32);
	inner_memory.seed(0, &[9, 8, 7]);
	let inner = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_return",
			params: vec![0, 3],
		}],
		inner_memory,
	);

	let (mut interp, tracer) = new_machine(vec![outer, inner]);
	interp
		.backend_mut()
		.set_contract_code(callee, vec![0x00, 0x61]);

	let mut contract = new_contract(scenario_address(), vec![0x01]);
	let (_, reason) = interp.run(&mut contract, &[0x01], false);

	assert_eq!(reason, Ok(ExitSucceed::Stopped));

	let data = outer_memory.data();
	// Callee output copied into the requested span.
	assert_eq!(&data[64..67], &[9, 8, 7]);
	// Success flag delivered through the finalizer.
	assert_eq!(data[70], 1);

	let tracer = tracer.borrow();
	let logs = tracer.logs();
	// Outer CALL record first, the inner frame's records nested after it.
	assert_eq!(logs[0].family, OpFamily::Evm);
	assert_eq!(logs[0].op_name, "CALL");
	assert_eq!(logs[0].depth, 1);
	assert_eq!(logs[1].op_name, "RETURN");
	assert_eq!(logs[1].depth, 2);
}

#[test]
fn static_frames_reject_state_writes() {
	let memory = TraceMemory::with_size(96);
	memory.seed(0, H256::from_low_u64_be(1).as_bytes());
	memory.seed(32, H256::from_low_u64_be(2).as_bytes());
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_sstore",
			params: vec![0, 32],
		}],
		memory,
	);
	let (mut interp, _tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	let (_, reason) = interp.run(&mut contract, &[0x01], true);

	assert_eq!(reason, Err(ExitException::WriteProtection.into()));
}

#[test]
fn log_opcode_reaches_the_backend() {
	let memory = TraceMemory::with_size(64);
	memory.seed(0, &[0xaa, 0xbb]);
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_log0",
			params: vec![0, 2],
		}],
		memory,
	);
	let (mut interp, _tracer) = new_machine(vec![engine]);

	let address = scenario_address();
	let mut contract = new_contract(address, vec![0x01]);
	let (_, reason) = interp.run(&mut contract, &[0x01], false);

	assert_eq!(reason, Ok(ExitSucceed::Stopped));
	let logs = interp.backend().logs();
	assert_eq!(logs.len(), 1);
	assert_eq!(logs[0].address, address);
	assert_eq!(logs[0].data, vec![0xaa, 0xbb]);
	assert!(logs[0].topics.is_empty());
	// 375 log base + 2 * 8 data bytes.
	assert_eq!(contract.gas, GAS_LIMIT - 375 - 16);
}

#[test]
fn debug_trace_replays_globals_memory_and_function_metadata() {
	let trace = EngineTrace {
		global_memory: vec![MemoryChange {
			offset: 0x80,
			len: 4,
			data: vec![1, 2, 3, 4],
		}],
		fn_metas: vec![FunctionMeta {
			fn_index: 1,
			max_stack_height: 9,
			num_locals: 2,
			fn_name: "main".to_string(),
		}],
	};
	let engine = ScriptedEngine::new(
		vec![
			ScriptOp::Step(plain_step(4, 0x41, "i32.const")),
			ScriptOp::Global {
				step: plain_step(5, 0x24, "global.set"),
				index: 3,
				value: 17,
			},
		],
		TraceMemory::with_size(0),
	)
	.with_trace(trace);
	let (mut interp, tracer) = new_machine(vec![engine]);

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	let (ret, reason) = interp.run(&mut contract, &[0x01], false);
	assert_eq!(reason, Ok(ExitSucceed::Stopped));

	finish_trace(&tracer, &ret, contract.gas, None);
	let tracer = tracer.borrow();
	assert_eq!(tracer.global_memory().get(&0x80), Some(&vec![1, 2, 3, 4]));
	assert_eq!(tracer.globals()[0].index, 3);
	assert_eq!(tracer.globals()[0].value, 17);
	assert_eq!(tracer.function_calls()[0].max_stack_height, 9);

	let value = tracer.get_result_json().unwrap();
	assert_eq!(value["globalMemory"]["128"], "01020304");
	assert_eq!(value["structLogs"][0]["opcodeFamily"], "WASM");
	assert_eq!(value["structLogs"][0]["op"], "i32.const");
	assert_eq!(value["globals"][0]["value"], 17);
	assert_eq!(value["functionCalls"][0]["fnName"], "main");
}

#[test]
fn stop_aborts_the_result() {
	let engine = ScriptedEngine::new(
		vec![ScriptOp::Host {
			name: "_evm_stop",
			params: vec![],
		}],
		TraceMemory::with_size(0),
	);
	let (mut interp, tracer) = new_machine(vec![engine]);
	tracer
		.borrow_mut()
		.stop(evm_wasm::ExitFatal::Aborted.into());

	let mut contract = new_contract(H160::zero(), vec![0x01]);
	let _ = interp.run(&mut contract, &[0x01], false);

	assert!(tracer.borrow().get_result().is_err());
	assert!(tracer.borrow().logs().is_empty());
}
