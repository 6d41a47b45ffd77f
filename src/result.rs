//! Serializes the final trace into a stable JSON document.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use serde::Serialize;

use crate::error::ExitError;
use crate::tracing::{OpFamily, WasmFnCall, WasmGlobal, WasmLog, WebAssemblyLogger};

/// Execution status, gas accounting and the full structured trace of one
/// replayed transaction. Field names are stable and case sensitive.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionResult {
	pub gas: u64,
	#[serde(rename = "internalError", skip_serializing_if = "String::is_empty")]
	pub internal_error: String,
	pub failed: bool,
	#[serde(rename = "globalMemory", skip_serializing_if = "BTreeMap::is_empty")]
	pub global_memory: BTreeMap<u32, String>,
	#[serde(rename = "returnValue")]
	pub return_value: String,
	#[serde(rename = "structLogs")]
	pub struct_logs: Vec<StructLog>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub globals: Vec<GlobalLog>,
	#[serde(rename = "functionCalls")]
	pub function_calls: Vec<FunctionCallLog>,
}

/// One formatted trace record.
#[derive(Clone, Debug, Serialize)]
pub struct StructLog {
	pub pc: u64,
	#[serde(rename = "opcodeFamily")]
	pub opcode_family: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub params: Option<Vec<u64>>,
	pub op: String,
	pub gas: u64,
	#[serde(rename = "gasCost")]
	pub gas_cost: u64,
	pub depth: usize,
	#[serde(skip_serializing_if = "String::is_empty")]
	pub error: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stack: Option<Vec<String>>,
	#[serde(rename = "memoryChanges", skip_serializing_if = "Option::is_none")]
	pub memory_changes: Option<BTreeMap<u32, String>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub storage: Option<BTreeMap<String, String>>,
	#[serde(skip_serializing_if = "is_zero_u64")]
	pub refund: u64,
	#[serde(skip_serializing_if = "is_zero_u32")]
	pub drop: u32,
}

/// One formatted global-variable write.
#[derive(Clone, Debug, Serialize)]
pub struct GlobalLog {
	pub pc: u64,
	pub index: u64,
	pub op: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub params: Vec<u64>,
	pub value: u64,
}

/// One formatted function-metadata entry.
#[derive(Clone, Debug, Serialize)]
pub struct FunctionCallLog {
	#[serde(rename = "fnIndex")]
	pub fn_index: u32,
	#[serde(rename = "maxStackHeight")]
	pub max_stack_height: u32,
	#[serde(rename = "numLocals")]
	pub num_locals: u32,
	#[serde(rename = "fnName")]
	pub fn_name: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_u64(v: &u64) -> bool {
	*v == 0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_u32(v: &u32) -> bool {
	*v == 0
}

impl WebAssemblyLogger {
	/// Render the captured trace. Fails with the stop reason when tracing was
	/// aborted.
	pub fn get_result(&self) -> Result<ExecutionResult, ExitError> {
		if let Some(reason) = self.stop_reason() {
			return Err(reason.clone());
		}

		let failed = self.error().is_some();
		// Return data when successful and revert reason when reverted,
		// otherwise empty.
		let return_value = if failed && self.error() != Some(&ExitError::Reverted) {
			String::new()
		} else {
			hex::encode(self.output())
		};
		let global_memory = self
			.global_memory()
			.iter()
			.map(|(offset, data)| (*offset, hex::encode(data)))
			.collect();

		Ok(ExecutionResult {
			gas: self.used_gas(),
			internal_error: String::new(),
			failed,
			global_memory,
			return_value,
			struct_logs: format_wasm_logs(self.logs()),
			globals: self.globals().iter().map(format_global).collect(),
			function_calls: self.function_calls().iter().map(format_fn_call).collect(),
		})
	}

	/// Render the captured trace as a JSON document.
	pub fn get_result_json(&self) -> Result<serde_json::Value, ExitError> {
		let result = self.get_result()?;
		serde_json::to_value(&result)
			.map_err(|_| crate::error::ExitFatal::Other("trace serialization failed".into()).into())
	}
}

/// Formats returned structured logs for json output.
#[must_use]
pub fn format_wasm_logs(logs: &[WasmLog]) -> Vec<StructLog> {
	logs.iter().map(format_wasm_log).collect()
}

fn format_wasm_log(log: &WasmLog) -> StructLog {
	let op = match log.family {
		OpFamily::Wasm => log.op_name.clone(),
		OpFamily::Evm => format!("evm_{}", log.op_name.to_lowercase()),
		OpFamily::Gas => "gas".into(),
	};
	// The engine reports junk params for `end`, drop them.
	let params = if log.family == OpFamily::Wasm && log.op_name == "end" {
		None
	} else if log.params.is_empty() {
		None
	} else {
		Some(log.params.clone())
	};
	let stack = log
		.stack
		.as_ref()
		.map(|stack| stack.iter().map(|value| format!("{:#x}", value)).collect());
	let memory_changes = log.memory.as_ref().map(|(offset, data)| {
		let mut changes = BTreeMap::new();
		changes.insert(*offset, format!("0x{}", hex::encode(data)));
		changes
	});
	let storage = log.storage.as_ref().map(|storage| {
		storage
			.iter()
			.map(|(index, value)| (format!("{:x}", index), format!("{:x}", value)))
			.collect()
	});

	StructLog {
		pc: log.pc,
		opcode_family: log.family.as_str().into(),
		params,
		op,
		gas: log.gas,
		gas_cost: log.gas_cost,
		depth: log.depth,
		error: log
			.err
			.as_ref()
			.map(|e| e.to_string())
			.unwrap_or_default(),
		stack,
		memory_changes,
		storage,
		refund: log.refund,
		drop: log.drop,
	}
}

fn format_global(global: &WasmGlobal) -> GlobalLog {
	GlobalLog {
		pc: global.pc,
		index: global.index,
		op: global.op.clone(),
		params: global.params.clone(),
		value: global.value,
	}
}

fn format_fn_call(call: &WasmFnCall) -> FunctionCallLog {
	FunctionCallLog {
		fn_index: call.fn_index,
		max_stack_height: call.max_stack_height,
		num_locals: call.num_locals,
		fn_name: call.fn_name.clone(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::{StepEvent, WASM_OP_CALL};
	use crate::error::ExitException;
	use crate::tracing::{Config, WasmLogger};
	use primitive_types::H160;

	fn logger_with_one_gas_record() -> WebAssemblyLogger {
		let mut logger = WebAssemblyLogger::new(Config {
			debug: true,
			enable_return_data: true,
			..Default::default()
		});
		logger.capture_tx_start(1000);
		let step = StepEvent {
			pc: 3,
			opcode: WASM_OP_CALL,
			name: "call".into(),
			stack: vec![5],
			..Default::default()
		};
		logger.capture_wasm_state(&step, 900, 1, 0);
		logger.capture_gas_state(17, 900, 1, None);
		logger.capture_tx_end(800);
		logger
	}

	#[test]
	fn result_fields_are_stable() {
		let mut logger = logger_with_one_gas_record();
		logger.capture_end(b"out", 200, None);

		let value = logger.get_result_json().unwrap();
		assert_eq!(value["gas"], 200);
		assert_eq!(value["failed"], false);
		assert_eq!(value["returnValue"], "6f7574");
		assert_eq!(value["structLogs"][0]["opcodeFamily"], "GAS");
		assert_eq!(value["structLogs"][0]["op"], "gas");
		assert_eq!(value["structLogs"][0]["gasCost"], 17);
		assert_eq!(value["structLogs"][0]["stack"][0], "0x5");
		assert!(value.get("internalError").is_none());
	}

	#[test]
	fn return_value_is_empty_for_non_revert_failures() {
		let mut logger = logger_with_one_gas_record();
		logger.capture_end(b"out", 200, Some(ExitException::OutOfGas.into()));

		let result = logger.get_result().unwrap();
		assert!(result.failed);
		assert_eq!(result.return_value, "");
	}

	#[test]
	fn revert_keeps_the_return_value() {
		let mut logger = logger_with_one_gas_record();
		logger.capture_end(b"reason", 200, Some(ExitError::Reverted));

		let result = logger.get_result().unwrap();
		assert!(result.failed);
		assert_eq!(result.return_value, hex::encode(b"reason"));
	}

	#[test]
	fn evm_ops_are_lowercased_with_prefix() {
		let mut logger = WebAssemblyLogger::new(Config {
			debug: true,
			..Default::default()
		});
		let step = StepEvent {
			pc: 9,
			opcode: WASM_OP_CALL,
			name: "call".into(),
			..Default::default()
		};
		logger.capture_wasm_state(&step, 100, 1, 0);
		logger.capture_state(
			crate::Opcode::BALANCE,
			100,
			2600,
			H160::zero(),
			&[],
			1,
			None,
			0,
			None,
		);

		let logs = format_wasm_logs(logger.logs());
		assert_eq!(logs[0].op, "evm_balance");
		assert_eq!(logs[0].opcode_family, "EVM");
	}
}
