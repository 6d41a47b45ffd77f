use alloc::borrow::Cow;

/// Exit result.
pub type ExitResult = Result<ExitSucceed, ExitError>;

/// Exit reason of a machine or host call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExitError {
	/// Machine returns a normal EVM error.
	Exception(ExitException),
	/// Machine encountered an explicit revert.
	Reverted,
	/// Machine encountered an error that is not supposed to be a normal EVM
	/// error, such as a corrupted trace order.
	Fatal(ExitFatal),
}

impl From<ExitError> for ExitResult {
	fn from(s: ExitError) -> Self {
		Err(s)
	}
}

impl std::error::Error for ExitError {}

impl std::fmt::Display for ExitError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Exception(e) => write!(f, "{}", e),
			Self::Reverted => write!(f, "execution reverted"),
			Self::Fatal(e) => write!(f, "{}", e),
		}
	}
}

/// Exit succeed reason.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitSucceed {
	/// Machine encountered an explicit stop.
	Stopped,
	/// Machine encountered an explicit return.
	Returned,
}

impl From<ExitSucceed> for ExitResult {
	fn from(s: ExitSucceed) -> Self {
		Ok(s)
	}
}

/// Exit error reason.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExitException {
	/// Trying to pop from an empty stack.
	StackUnderflow,
	/// Trying to push into a stack over stack limit.
	StackOverflow,
	/// An opcode accesses external information, but the request is off offset
	/// limit.
	OutOfOffset,
	/// Execution runs out of gas.
	OutOfGas,
	/// Not enough fund to start the execution.
	OutOfFund,
	/// Memory size arithmetic overflowed a u64.
	GasUintOverflow,
	/// Call stack is deeper than the 1024 limit.
	CallTooDeep,
	/// A state-modifying opcode executed inside a static call.
	WriteProtection,
	/// A host function was invoked with the wrong number of parameters.
	BadInputParams,
	/// The module does not export a `main` function.
	EntrypointNotFound,
	/// The opcode is not routed through the host function set.
	InvalidOpcode(crate::Opcode),

	/// Other normal errors.
	Other(Cow<'static, str>),
}

impl From<ExitException> for ExitResult {
	fn from(s: ExitException) -> Self {
		Err(ExitError::Exception(s))
	}
}

impl From<ExitException> for ExitError {
	fn from(s: ExitException) -> Self {
		Self::Exception(s)
	}
}

impl std::fmt::Display for ExitException {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::StackUnderflow => write!(f, "stack underflow"),
			Self::StackOverflow => write!(f, "stack limit reached"),
			Self::OutOfOffset => write!(f, "return data out of bounds"),
			Self::OutOfGas => write!(f, "out of gas"),
			Self::OutOfFund => write!(f, "insufficient balance for transfer"),
			Self::GasUintOverflow => write!(f, "gas uint64 overflow"),
			Self::CallTooDeep => write!(f, "max call depth exceeded"),
			Self::WriteProtection => write!(f, "write protection"),
			Self::BadInputParams => write!(f, "invalid host call parameters"),
			Self::EntrypointNotFound => write!(f, "entrypoint not found"),
			Self::InvalidOpcode(opcode) => write!(f, "invalid opcode {}", opcode.0),
			Self::Other(s) => write!(f, "{}", s),
		}
	}
}

/// Exit fatal reason.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExitFatal {
	/// The trace log ordering invariant was violated.
	TraceOrderCorrupted,
	/// The scope queue length does not match the call depth.
	ScopeQueueMismatch,
	/// Debug mode is enabled but no tracer is configured.
	NotConfigured,
	/// Tracing was aborted by an external stop request.
	Aborted,

	/// Other fatal errors.
	Other(Cow<'static, str>),
}

impl From<ExitFatal> for ExitResult {
	fn from(s: ExitFatal) -> Self {
		Err(ExitError::Fatal(s))
	}
}

impl From<ExitFatal> for ExitError {
	fn from(s: ExitFatal) -> Self {
		Self::Fatal(s)
	}
}

impl std::fmt::Display for ExitFatal {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::TraceOrderCorrupted => write!(f, "trace order is corrupted"),
			Self::ScopeQueueMismatch => write!(f, "scope queue len and call depth mismatch"),
			Self::NotConfigured => write!(f, "tracer must be configured in debug mode"),
			Self::Aborted => write!(f, "execution aborted"),
			Self::Other(s) => write!(f, "{}", s),
		}
	}
}

/// Rewrite failure raised by the bytecode injector, before execution starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InjectionError {
	/// The module bytes could not be parsed.
	Deserialize,
	/// The rewritten module could not be serialized back.
	Serialize,
	/// The module already carries metering instructions.
	AlreadyInjected,
	/// The cost table refuses one of the module's instructions.
	Unmeterable,
	/// A function body references a type that the module does not declare.
	MalformedModule,
}

impl std::error::Error for InjectionError {}

impl std::fmt::Display for InjectionError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Deserialize => write!(f, "failed to deserialize wasm module"),
			Self::Serialize => write!(f, "failed to serialize wasm module"),
			Self::AlreadyInjected => write!(f, "module is already instrumented"),
			Self::Unmeterable => write!(f, "module contains an unmeterable instruction"),
			Self::MalformedModule => write!(f, "malformed wasm module"),
		}
	}
}
