//! Bytecode opcodes
//!
//! All opcodes are single-byte instructions. Operands follow the opcode byte
//! in little-endian order.
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Arguments, upvalues and globals
//! - 0x20-0x2F: Tables
//! - 0x30-0x3F: Arithmetic, comparison & logical
//! - 0x40-0x4F: Control flow & calls

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Push nil
    LoadNil = 0x03,
    /// Push true
    LoadTrue = 0x04,
    /// Push false
    LoadFalse = 0x05,
    /// Push constant from pool (operand: u16 index)
    LoadConst = 0x06,

    // ===== Arguments, Upvalues & Globals (0x10-0x1F) =====
    /// Push argument of the current frame (operand: u8 index)
    LoadArg = 0x10,
    /// Push upvalue of the running closure (operand: u8, 0-based)
    GetUpvalue = 0x11,
    /// Pop into upvalue of the running closure (operand: u8, 0-based)
    SetUpvalue = 0x12,
    /// Push global named by a string constant (operand: u16 index)
    GetGlobal = 0x13,
    /// Pop into global named by a string constant (operand: u16 index)
    SetGlobal = 0x14,

    // ===== Tables (0x20-0x2F) =====
    /// Push a new empty table
    NewTable = 0x20,
    /// Pop table, push field named by a string constant (operand: u16 index)
    GetField = 0x21,
    /// Pop value and table, assign field named by a string constant (operand: u16 index)
    SetField = 0x22,

    // ===== Arithmetic, Comparison & Logical (0x30-0x3F) =====
    /// Add two numbers
    Add = 0x30,
    /// Subtract two numbers
    Sub = 0x31,
    /// Multiply two numbers
    Mul = 0x32,
    /// Concatenate two strings or numbers
    Concat = 0x33,
    /// Raw equality
    Eq = 0x34,
    /// Numeric or string less-than
    Lt = 0x35,
    /// Logical not
    Not = 0x36,

    // ===== Control Flow & Calls (0x40-0x4F) =====
    /// Unconditional jump (operand: i16 offset from the next instruction)
    Jmp = 0x40,
    /// Pop and jump if falsy (operand: i16 offset from the next instruction)
    JmpIfFalse = 0x41,
    /// Call function below `argc` arguments (operand: u8 argc); pushes one result
    Call = 0x42,
    /// Return the top `n` values (operand: u8 n)
    Return = 0x43,
}

impl Opcode {
    /// Convert a byte to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x03 => Some(Self::LoadNil),
            0x04 => Some(Self::LoadTrue),
            0x05 => Some(Self::LoadFalse),
            0x06 => Some(Self::LoadConst),

            0x10 => Some(Self::LoadArg),
            0x11 => Some(Self::GetUpvalue),
            0x12 => Some(Self::SetUpvalue),
            0x13 => Some(Self::GetGlobal),
            0x14 => Some(Self::SetGlobal),

            0x20 => Some(Self::NewTable),
            0x21 => Some(Self::GetField),
            0x22 => Some(Self::SetField),

            0x30 => Some(Self::Add),
            0x31 => Some(Self::Sub),
            0x32 => Some(Self::Mul),
            0x33 => Some(Self::Concat),
            0x34 => Some(Self::Eq),
            0x35 => Some(Self::Lt),
            0x36 => Some(Self::Not),

            0x40 => Some(Self::Jmp),
            0x41 => Some(Self::JmpIfFalse),
            0x42 => Some(Self::Call),
            0x43 => Some(Self::Return),

            _ => None,
        }
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Size in bytes of the operand following the opcode
    pub fn operand_size(self) -> usize {
        match self {
            Self::LoadArg | Self::GetUpvalue | Self::SetUpvalue | Self::Call | Self::Return => 1,
            Self::LoadConst
            | Self::GetGlobal
            | Self::SetGlobal
            | Self::GetField
            | Self::SetField
            | Self::Jmp
            | Self::JmpIfFalse => 2,
            _ => 0,
        }
    }

    /// Check if this opcode takes a constant pool index
    pub fn uses_constant(self) -> bool {
        matches!(
            self,
            Self::LoadConst | Self::GetGlobal | Self::SetGlobal | Self::GetField | Self::SetField
        )
    }

    /// Check if this opcode requires a string constant
    pub fn needs_string_constant(self) -> bool {
        self.uses_constant() && self != Self::LoadConst
    }

    /// Check if this opcode is a jump
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jmp | Self::JmpIfFalse)
    }

    /// Check if control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Jmp | Self::Return)
    }

    /// Get opcode mnemonic
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::LoadNil => "LOAD_NIL",
            Self::LoadTrue => "LOAD_TRUE",
            Self::LoadFalse => "LOAD_FALSE",
            Self::LoadConst => "LOAD_CONST",
            Self::LoadArg => "LOAD_ARG",
            Self::GetUpvalue => "GET_UPVALUE",
            Self::SetUpvalue => "SET_UPVALUE",
            Self::GetGlobal => "GET_GLOBAL",
            Self::SetGlobal => "SET_GLOBAL",
            Self::NewTable => "NEW_TABLE",
            Self::GetField => "GET_FIELD",
            Self::SetField => "SET_FIELD",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Concat => "CONCAT",
            Self::Eq => "EQ",
            Self::Lt => "LT",
            Self::Not => "NOT",
            Self::Jmp => "JMP",
            Self::JmpIfFalse => "JMP_IF_FALSE",
            Self::Call => "CALL",
            Self::Return => "RETURN",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
