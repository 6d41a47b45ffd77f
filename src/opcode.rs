/// EVM opcode. One-to-one corresponding to an `u8` value, covering the subset
/// of opcodes that is routed through the WebAssembly host function set.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Opcode(pub u8);

impl Opcode {
	/// `STOP`
	pub const STOP: Opcode = Opcode(0x00);
	/// `SHA3`
	pub const SHA3: Opcode = Opcode(0x20);

	/// `ADDRESS`
	pub const ADDRESS: Opcode = Opcode(0x30);
	/// `BALANCE`
	pub const BALANCE: Opcode = Opcode(0x31);
	/// `ORIGIN`
	pub const ORIGIN: Opcode = Opcode(0x32);
	/// `CALLER`
	pub const CALLER: Opcode = Opcode(0x33);
	/// `CALLVALUE`
	pub const CALLVALUE: Opcode = Opcode(0x34);
	/// `CALLDATALOAD`
	pub const CALLDATALOAD: Opcode = Opcode(0x35);
	/// `CALLDATASIZE`
	pub const CALLDATASIZE: Opcode = Opcode(0x36);
	/// `CALLDATACOPY`
	pub const CALLDATACOPY: Opcode = Opcode(0x37);
	/// `CODESIZE`
	pub const CODESIZE: Opcode = Opcode(0x38);
	/// `CODECOPY`
	pub const CODECOPY: Opcode = Opcode(0x39);
	/// `GASPRICE`
	pub const GASPRICE: Opcode = Opcode(0x3a);
	/// `EXTCODESIZE`
	pub const EXTCODESIZE: Opcode = Opcode(0x3b);
	/// `EXTCODECOPY`
	pub const EXTCODECOPY: Opcode = Opcode(0x3c);
	/// `RETURNDATASIZE`
	pub const RETURNDATASIZE: Opcode = Opcode(0x3d);
	/// `RETURNDATACOPY`
	pub const RETURNDATACOPY: Opcode = Opcode(0x3e);
	/// `EXTCODEHASH`
	pub const EXTCODEHASH: Opcode = Opcode(0x3f);

	/// `BLOCKHASH`
	pub const BLOCKHASH: Opcode = Opcode(0x40);
	/// `COINBASE`
	pub const COINBASE: Opcode = Opcode(0x41);
	/// `TIMESTAMP`
	pub const TIMESTAMP: Opcode = Opcode(0x42);
	/// `NUMBER`
	pub const NUMBER: Opcode = Opcode(0x43);
	/// `DIFFICULTY`
	pub const DIFFICULTY: Opcode = Opcode(0x44);
	/// `GASLIMIT`
	pub const GASLIMIT: Opcode = Opcode(0x45);
	/// `CHAINID`
	pub const CHAINID: Opcode = Opcode(0x46);
	/// `SELFBALANCE`
	pub const SELFBALANCE: Opcode = Opcode(0x47);
	/// `BASEFEE`
	pub const BASEFEE: Opcode = Opcode(0x48);

	/// `SLOAD`
	pub const SLOAD: Opcode = Opcode(0x54);
	/// `SSTORE`
	pub const SSTORE: Opcode = Opcode(0x55);
	/// `PC`
	pub const PC: Opcode = Opcode(0x58);
	/// `MSIZE`
	pub const MSIZE: Opcode = Opcode(0x59);
	/// `GAS`
	pub const GAS: Opcode = Opcode(0x5a);

	/// `LOG0`
	pub const LOG0: Opcode = Opcode(0xa0);
	/// `LOG1`
	pub const LOG1: Opcode = Opcode(0xa1);
	/// `LOG2`
	pub const LOG2: Opcode = Opcode(0xa2);
	/// `LOG3`
	pub const LOG3: Opcode = Opcode(0xa3);
	/// `LOG4`
	pub const LOG4: Opcode = Opcode(0xa4);

	/// `CREATE`
	pub const CREATE: Opcode = Opcode(0xf0);
	/// `CALL`
	pub const CALL: Opcode = Opcode(0xf1);
	/// `CALLCODE`
	pub const CALLCODE: Opcode = Opcode(0xf2);
	/// `RETURN`
	pub const RETURN: Opcode = Opcode(0xf3);
	/// `DELEGATECALL`
	pub const DELEGATECALL: Opcode = Opcode(0xf4);
	/// `CREATE2`
	pub const CREATE2: Opcode = Opcode(0xf5);
	/// `STATICCALL`
	pub const STATICCALL: Opcode = Opcode(0xfa);
	/// `REVERT`
	pub const REVERT: Opcode = Opcode(0xfd);
	/// `SELFDESTRUCT`
	pub const SELFDESTRUCT: Opcode = Opcode(0xff);
}

impl Opcode {
	/// Whether the opcode modifies state and is therefore forbidden inside a
	/// static call.
	#[must_use]
	pub fn is_state_modifying(&self) -> bool {
		matches!(
			*self,
			Opcode::SSTORE
				| Opcode::LOG0 | Opcode::LOG1
				| Opcode::LOG2 | Opcode::LOG3
				| Opcode::LOG4 | Opcode::CREATE
				| Opcode::CREATE2
				| Opcode::SELFDESTRUCT
		)
	}

	/// Mnemonic of the opcode, as it appears in formatted traces.
	#[must_use]
	pub fn name(&self) -> &'static str {
		match *self {
			Opcode::STOP => "STOP",
			Opcode::SHA3 => "SHA3",
			Opcode::ADDRESS => "ADDRESS",
			Opcode::BALANCE => "BALANCE",
			Opcode::ORIGIN => "ORIGIN",
			Opcode::CALLER => "CALLER",
			Opcode::CALLVALUE => "CALLVALUE",
			Opcode::CALLDATALOAD => "CALLDATALOAD",
			Opcode::CALLDATASIZE => "CALLDATASIZE",
			Opcode::CALLDATACOPY => "CALLDATACOPY",
			Opcode::CODESIZE => "CODESIZE",
			Opcode::CODECOPY => "CODECOPY",
			Opcode::GASPRICE => "GASPRICE",
			Opcode::EXTCODESIZE => "EXTCODESIZE",
			Opcode::EXTCODECOPY => "EXTCODECOPY",
			Opcode::RETURNDATASIZE => "RETURNDATASIZE",
			Opcode::RETURNDATACOPY => "RETURNDATACOPY",
			Opcode::EXTCODEHASH => "EXTCODEHASH",
			Opcode::BLOCKHASH => "BLOCKHASH",
			Opcode::COINBASE => "COINBASE",
			Opcode::TIMESTAMP => "TIMESTAMP",
			Opcode::NUMBER => "NUMBER",
			Opcode::DIFFICULTY => "DIFFICULTY",
			Opcode::GASLIMIT => "GASLIMIT",
			Opcode::CHAINID => "CHAINID",
			Opcode::SELFBALANCE => "SELFBALANCE",
			Opcode::BASEFEE => "BASEFEE",
			Opcode::SLOAD => "SLOAD",
			Opcode::SSTORE => "SSTORE",
			Opcode::PC => "PC",
			Opcode::MSIZE => "MSIZE",
			Opcode::GAS => "GAS",
			Opcode::LOG0 => "LOG0",
			Opcode::LOG1 => "LOG1",
			Opcode::LOG2 => "LOG2",
			Opcode::LOG3 => "LOG3",
			Opcode::LOG4 => "LOG4",
			Opcode::CREATE => "CREATE",
			Opcode::CALL => "CALL",
			Opcode::CALLCODE => "CALLCODE",
			Opcode::RETURN => "RETURN",
			Opcode::DELEGATECALL => "DELEGATECALL",
			Opcode::CREATE2 => "CREATE2",
			Opcode::STATICCALL => "STATICCALL",
			Opcode::REVERT => "REVERT",
			Opcode::SELFDESTRUCT => "SELFDESTRUCT",
			_ => "UNKNOWN",
		}
	}

	/// Cast to usize for table indexing.
	#[must_use]
	pub const fn as_usize(&self) -> usize {
		self.0 as usize
	}
}
