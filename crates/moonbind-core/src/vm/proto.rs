//! Function prototypes
//!
//! A [`Prototype`] is the immutable, shareable part of a scripted function:
//! its constant pool and code. Closures pair a prototype with upvalue cells.
//!
//! # Dump Format
//!
//! [`Prototype::dump`] emits four chunks, each handed to the sink separately:
//!
//! ```text
//! header:     magic (4 bytes) + version (u8)
//! metadata:   param count (u8) + upvalue count (u8) + name (u32 len + bytes)
//! constants:  count (u32) + per constant: tag (u8) + payload
//! code:       length (u32) + code bytes
//! ```
//!
//! All multi-byte fields are little-endian. [`Prototype::undump`] expects the
//! chunks concatenated in order and verifies the result.

use super::opcode::Opcode;
use crate::value::{Value, VmString};
use crate::{VmError, VmResult};
use rustc_hash::FxHashMap;
use std::io;

/// Magic bytes opening every dump
pub const DUMP_MAGIC: [u8; 4] = *b"\x1bMBC";

/// Dump format version
pub const DUMP_VERSION: u8 = 1;

const MAX_CONSTANTS: usize = u16::MAX as usize + 1;

const CONST_NIL: u8 = 0;
const CONST_BOOLEAN: u8 = 1;
const CONST_INTEGER: u8 = 2;
const CONST_NUMBER: u8 = 3;
const CONST_STRING: u8 = 4;

/// Constant pool entry
#[derive(Debug, Clone)]
pub enum Constant {
    /// nil
    Nil,
    /// Boolean
    Boolean(bool),
    /// Integer
    Integer(i64),
    /// Float
    Number(f64),
    /// Byte string
    String(VmString),
}

impl Constant {
    /// Materialize as a runtime value
    ///
    /// Integer constants become floats on runtimes without native integers.
    pub fn to_value(&self, native_integers: bool) -> Value {
        match self {
            Constant::Nil => Value::Nil,
            Constant::Boolean(b) => Value::Boolean(*b),
            Constant::Integer(i) if native_integers => Value::Integer(*i),
            Constant::Integer(i) => Value::Number(*i as f64),
            Constant::Number(n) => Value::Number(*n),
            Constant::String(s) => Value::String(s.clone()),
        }
    }

    /// Bitwise equality, used for pool de-duplication
    fn same(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Nil, Constant::Nil) => true,
            (Constant::Boolean(a), Constant::Boolean(b)) => a == b,
            (Constant::Integer(a), Constant::Integer(b)) => a == b,
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            _ => false,
        }
    }

    fn as_string(&self) -> Option<&VmString> {
        match self {
            Constant::String(s) => Some(s),
            _ => None,
        }
    }
}

fn invalid(message: impl Into<String>) -> VmError {
    VmError::InvalidBytecode(message.into())
}

/// Immutable function prototype
#[derive(Debug, Clone)]
pub struct Prototype {
    name: String,
    param_count: u8,
    upvalue_count: u8,
    constants: Vec<Constant>,
    code: Vec<u8>,
}

impl Prototype {
    /// Function name (empty when stripped)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of declared parameters
    pub fn param_count(&self) -> usize {
        self.param_count as usize
    }

    /// Number of upvalue slots a closure of this prototype carries
    pub fn upvalue_count(&self) -> usize {
        self.upvalue_count as usize
    }

    /// Constant pool
    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    /// Constant at `index`
    pub fn constant(&self, index: usize) -> Option<&Constant> {
        self.constants.get(index)
    }

    /// Name constant at `index`; verification guarantees it exists for
    /// global and field instructions
    pub(crate) fn name_constant(&self, index: usize) -> VmResult<&VmString> {
        self.constants
            .get(index)
            .and_then(Constant::as_string)
            .ok_or_else(|| invalid(format!("constant {} is not a string", index)))
    }

    /// Raw code bytes
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Check the code for well-formedness
    ///
    /// Rejects unknown opcodes, truncated operands, out-of-range constant,
    /// argument and upvalue indices, jumps that do not land on an
    /// instruction boundary, and code that can fall off its end.
    pub fn verify(&self) -> VmResult<()> {
        let code = &self.code;
        if code.is_empty() {
            return Err(invalid(format!("function '{}' has no code", self.name)));
        }

        let mut boundaries = vec![false; code.len()];
        let mut jumps = Vec::new();
        let mut last = Opcode::Nop;
        let mut ip = 0;

        while ip < code.len() {
            let offset = ip;
            let byte = code[ip];
            let op = Opcode::from_u8(byte).ok_or(VmError::InvalidOpcode(byte))?;
            boundaries[offset] = true;
            ip += 1;

            let size = op.operand_size();
            if ip + size > code.len() {
                return Err(invalid(format!("truncated {} operand at offset {}", op, offset)));
            }
            let operand = &code[ip..ip + size];
            ip += size;

            match op {
                op if op.uses_constant() => {
                    let index = u16::from_le_bytes([operand[0], operand[1]]) as usize;
                    match self.constants.get(index) {
                        None => {
                            return Err(invalid(format!(
                                "constant index {} out of range at offset {}",
                                index, offset
                            )))
                        }
                        Some(constant)
                            if op.needs_string_constant() && constant.as_string().is_none() =>
                        {
                            return Err(invalid(format!(
                                "{} at offset {} requires a string constant",
                                op, offset
                            )))
                        }
                        Some(_) => {}
                    }
                }
                Opcode::LoadArg if operand[0] >= self.param_count => {
                    return Err(invalid(format!(
                        "argument index {} out of range at offset {}",
                        operand[0], offset
                    )));
                }
                Opcode::GetUpvalue | Opcode::SetUpvalue if operand[0] >= self.upvalue_count => {
                    return Err(invalid(format!(
                        "upvalue index {} out of range at offset {}",
                        operand[0], offset
                    )));
                }
                op if op.is_jump() => {
                    let delta = i16::from_le_bytes([operand[0], operand[1]]) as isize;
                    jumps.push((offset, ip as isize + delta));
                }
                _ => {}
            }
            last = op;
        }

        for (offset, target) in jumps {
            let valid = usize::try_from(target)
                .ok()
                .and_then(|t| boundaries.get(t).copied())
                .unwrap_or(false);
            if !valid {
                return Err(invalid(format!(
                    "invalid jump target {} at offset {}",
                    target, offset
                )));
            }
        }

        if !last.is_terminator() {
            return Err(invalid(format!(
                "execution falls off end of function '{}'",
                self.name
            )));
        }

        Ok(())
    }

    /// Emit the prototype as a sequence of chunks
    ///
    /// With `strip` set the function name is omitted.
    pub fn dump(
        &self,
        strip: bool,
        sink: &mut dyn FnMut(&[u8]) -> io::Result<()>,
    ) -> io::Result<()> {
        let mut header = Vec::with_capacity(5);
        header.extend_from_slice(&DUMP_MAGIC);
        header.push(DUMP_VERSION);
        sink(&header)?;

        let name: &[u8] = if strip { &[] } else { self.name.as_bytes() };
        let mut metadata = Vec::with_capacity(6 + name.len());
        metadata.push(self.param_count);
        metadata.push(self.upvalue_count);
        metadata.extend_from_slice(&(name.len() as u32).to_le_bytes());
        metadata.extend_from_slice(name);
        sink(&metadata)?;

        let mut constants = Vec::new();
        constants.extend_from_slice(&(self.constants.len() as u32).to_le_bytes());
        for constant in &self.constants {
            match constant {
                Constant::Nil => constants.push(CONST_NIL),
                Constant::Boolean(b) => {
                    constants.push(CONST_BOOLEAN);
                    constants.push(*b as u8);
                }
                Constant::Integer(i) => {
                    constants.push(CONST_INTEGER);
                    constants.extend_from_slice(&i.to_le_bytes());
                }
                Constant::Number(n) => {
                    constants.push(CONST_NUMBER);
                    constants.extend_from_slice(&n.to_le_bytes());
                }
                Constant::String(s) => {
                    constants.push(CONST_STRING);
                    constants.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    constants.extend_from_slice(s.as_bytes());
                }
            }
        }
        sink(&constants)?;

        let mut code = Vec::with_capacity(4 + self.code.len());
        code.extend_from_slice(&(self.code.len() as u32).to_le_bytes());
        code.extend_from_slice(&self.code);
        sink(&code)
    }

    /// Rebuild a prototype from concatenated dump chunks
    ///
    /// # Errors
    ///
    /// Returns `VmError::InvalidBytecode` for a foreign, truncated or
    /// unverifiable dump.
    pub fn undump(bytes: &[u8]) -> VmResult<Self> {
        let mut reader = DumpReader::new(bytes);

        if reader.read_bytes(4)? != DUMP_MAGIC {
            return Err(invalid("not a precompiled chunk"));
        }
        let version = reader.read_u8()?;
        if version != DUMP_VERSION {
            return Err(invalid(format!(
                "dump version mismatch (expected {}, found {})",
                DUMP_VERSION, version
            )));
        }

        let param_count = reader.read_u8()?;
        let upvalue_count = reader.read_u8()?;
        let name_len = reader.read_u32()? as usize;
        let name = String::from_utf8_lossy(reader.read_bytes(name_len)?).into_owned();

        let constant_count = reader.read_u32()? as usize;
        if constant_count > MAX_CONSTANTS {
            return Err(invalid(format!("too many constants: {}", constant_count)));
        }
        let mut constants = Vec::with_capacity(constant_count.min(reader.remaining()));
        for _ in 0..constant_count {
            let constant = match reader.read_u8()? {
                CONST_NIL => Constant::Nil,
                CONST_BOOLEAN => Constant::Boolean(reader.read_u8()? != 0),
                CONST_INTEGER => Constant::Integer(i64::from_le_bytes(reader.read_array()?)),
                CONST_NUMBER => Constant::Number(f64::from_le_bytes(reader.read_array()?)),
                CONST_STRING => {
                    let len = reader.read_u32()? as usize;
                    Constant::String(VmString::new(reader.read_bytes(len)?))
                }
                tag => return Err(invalid(format!("invalid constant tag {}", tag))),
            };
            constants.push(constant);
        }

        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?.to_vec();

        if reader.remaining() != 0 {
            return Err(invalid(format!(
                "{} trailing bytes after prototype",
                reader.remaining()
            )));
        }

        let proto = Prototype {
            name,
            param_count,
            upvalue_count,
            constants,
            code,
        };
        proto.verify()?;
        Ok(proto)
    }
}

/// Bounds-checked little-endian cursor over a dump
struct DumpReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> DumpReader<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    fn read_bytes(&mut self, len: usize) -> VmResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(invalid(format!(
                "truncated precompiled chunk at offset {}",
                self.position
            )));
        }
        let bytes = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> VmResult<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.read_bytes(N)?);
        Ok(array)
    }

    fn read_u8(&mut self) -> VmResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> VmResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }
}

/// Assembler for [`Prototype`]s
///
/// Instructions are appended in order; jumps name a label that may be
/// placed before or after them and are patched in [`ProtoBuilder::build`].
///
/// ```
/// use moonbind_core::ProtoBuilder;
///
/// // function(a, b) return a + b end
/// let proto = ProtoBuilder::new("add")
///     .params(2)
///     .load_arg(0)
///     .load_arg(1)
///     .add()
///     .ret(1)
///     .build()
///     .unwrap();
/// assert_eq!(proto.param_count(), 2);
/// ```
pub struct ProtoBuilder {
    name: String,
    param_count: u8,
    upvalue_count: u8,
    constants: Vec<Constant>,
    code: Vec<u8>,
    labels: FxHashMap<String, usize>,
    fixups: Vec<(usize, String)>,
    error: Option<String>,
}

impl ProtoBuilder {
    /// Start a prototype named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_count: 0,
            upvalue_count: 0,
            constants: Vec::new(),
            code: Vec::new(),
            labels: FxHashMap::default(),
            fixups: Vec::new(),
            error: None,
        }
    }

    /// Declare the parameter count
    pub fn params(mut self, count: u8) -> Self {
        self.param_count = count;
        self
    }

    /// Declare the upvalue count
    pub fn upvalues(mut self, count: u8) -> Self {
        self.upvalue_count = count;
        self
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    fn add_constant(&mut self, constant: Constant) -> u16 {
        if let Some(index) = self.constants.iter().position(|c| c.same(&constant)) {
            return index as u16;
        }
        if self.constants.len() >= MAX_CONSTANTS {
            self.fail(format!("too many constants in '{}'", self.name));
            return 0;
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as u16
    }

    fn emit(mut self, op: Opcode) -> Self {
        self.code.push(op.to_u8());
        self
    }

    fn emit_u8(mut self, op: Opcode, operand: u8) -> Self {
        self.code.push(op.to_u8());
        self.code.push(operand);
        self
    }

    fn emit_constant(mut self, op: Opcode, constant: Constant) -> Self {
        let index = self.add_constant(constant);
        self.code.push(op.to_u8());
        self.code.extend_from_slice(&index.to_le_bytes());
        self
    }

    fn emit_jump(mut self, op: Opcode, label: &str) -> Self {
        self.code.push(op.to_u8());
        self.fixups.push((self.code.len(), label.to_string()));
        self.code.extend_from_slice(&[0, 0]);
        self
    }

    // ===== Stack Manipulation & Constants =====

    /// NOP
    pub fn nop(self) -> Self {
        self.emit(Opcode::Nop)
    }

    /// POP
    pub fn pop(self) -> Self {
        self.emit(Opcode::Pop)
    }

    /// DUP
    pub fn dup(self) -> Self {
        self.emit(Opcode::Dup)
    }

    /// Push nil
    pub fn load_nil(self) -> Self {
        self.emit(Opcode::LoadNil)
    }

    /// Push a boolean
    pub fn load_bool(self, value: bool) -> Self {
        self.emit(if value {
            Opcode::LoadTrue
        } else {
            Opcode::LoadFalse
        })
    }

    /// Push an integer constant
    pub fn load_int(self, value: i64) -> Self {
        self.emit_constant(Opcode::LoadConst, Constant::Integer(value))
    }

    /// Push a float constant
    pub fn load_number(self, value: f64) -> Self {
        self.emit_constant(Opcode::LoadConst, Constant::Number(value))
    }

    /// Push a string constant
    pub fn load_str(self, value: impl AsRef<[u8]>) -> Self {
        self.emit_constant(Opcode::LoadConst, Constant::String(VmString::new(value)))
    }

    // ===== Arguments, Upvalues & Globals =====

    /// Push argument `index` (0-based)
    pub fn load_arg(self, index: u8) -> Self {
        self.emit_u8(Opcode::LoadArg, index)
    }

    /// Push upvalue `index` (0-based)
    pub fn get_upvalue(self, index: u8) -> Self {
        self.emit_u8(Opcode::GetUpvalue, index)
    }

    /// Pop into upvalue `index` (0-based)
    pub fn set_upvalue(self, index: u8) -> Self {
        self.emit_u8(Opcode::SetUpvalue, index)
    }

    /// Push global `name`
    pub fn get_global(self, name: &str) -> Self {
        self.emit_constant(Opcode::GetGlobal, Constant::String(VmString::from(name)))
    }

    /// Pop into global `name`
    pub fn set_global(self, name: &str) -> Self {
        self.emit_constant(Opcode::SetGlobal, Constant::String(VmString::from(name)))
    }

    // ===== Tables =====

    /// Push a new table
    pub fn new_table(self) -> Self {
        self.emit(Opcode::NewTable)
    }

    /// Replace the table on top with its field `name`
    pub fn get_field(self, name: &str) -> Self {
        self.emit_constant(Opcode::GetField, Constant::String(VmString::from(name)))
    }

    /// Pop a value and a table, assign `table[name] = value`
    pub fn set_field(self, name: &str) -> Self {
        self.emit_constant(Opcode::SetField, Constant::String(VmString::from(name)))
    }

    // ===== Arithmetic, Comparison & Logical =====

    /// ADD
    pub fn add(self) -> Self {
        self.emit(Opcode::Add)
    }

    /// SUB
    pub fn sub(self) -> Self {
        self.emit(Opcode::Sub)
    }

    /// MUL
    pub fn mul(self) -> Self {
        self.emit(Opcode::Mul)
    }

    /// CONCAT
    pub fn concat(self) -> Self {
        self.emit(Opcode::Concat)
    }

    /// EQ
    pub fn eq(self) -> Self {
        self.emit(Opcode::Eq)
    }

    /// LT
    pub fn lt(self) -> Self {
        self.emit(Opcode::Lt)
    }

    /// NOT
    pub fn not(self) -> Self {
        self.emit(Opcode::Not)
    }

    // ===== Control Flow & Calls =====

    /// Place `name` at the current offset
    pub fn label(mut self, name: &str) -> Self {
        if self.labels.insert(name.to_string(), self.code.len()).is_some() {
            self.fail(format!("duplicate label '{}'", name));
        }
        self
    }

    /// Jump to `label`
    pub fn jmp(self, label: &str) -> Self {
        self.emit_jump(Opcode::Jmp, label)
    }

    /// Pop and jump to `label` if the value is falsy
    pub fn jmp_if_false(self, label: &str) -> Self {
        self.emit_jump(Opcode::JmpIfFalse, label)
    }

    /// Call the function below `argc` arguments
    pub fn call(self, argc: u8) -> Self {
        self.emit_u8(Opcode::Call, argc)
    }

    /// Return the top `count` values
    pub fn ret(self, count: u8) -> Self {
        self.emit_u8(Opcode::Return, count)
    }

    /// Patch jumps and verify the result
    ///
    /// # Errors
    ///
    /// Returns `VmError::InvalidBytecode` for unknown or duplicate labels,
    /// jumps out of range, pool overflow, or code that fails verification.
    pub fn build(mut self) -> VmResult<Prototype> {
        for (operand, label) in std::mem::take(&mut self.fixups) {
            let target = *self
                .labels
                .get(&label)
                .ok_or_else(|| invalid(format!("unknown label '{}'", label)))?;
            let delta = target as isize - (operand as isize + 2);
            let delta = i16::try_from(delta)
                .map_err(|_| invalid(format!("jump to '{}' out of range", label)))?;
            self.code[operand..operand + 2].copy_from_slice(&delta.to_le_bytes());
        }
        if let Some(error) = self.error {
            return Err(invalid(error));
        }

        let proto = Prototype {
            name: self.name,
            param_count: self.param_count,
            upvalue_count: self.upvalue_count,
            constants: self.constants,
            code: self.code,
        };
        proto.verify()?;
        Ok(proto)
    }
}
