//! Value representation
//!
//! A [`Value`] is a tagged union over the runtime's dynamic types. Primitive
//! variants are stored inline; tables, functions, userdata and threads are
//! reference-counted handles with reference identity.
//!
//! ```text
//! Nil | Boolean | Number(f64) | Integer(i64) | String   -> compared by value
//! Table | Function | Userdata | Thread                 -> compared by identity
//! ```

use crate::object::{FunctionRef, ObjectId, TableRef, ThreadRef, UserdataRef};
use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

/// Immutable byte string
///
/// Strings are byte sequences, not UTF-8 text: they may embed NUL and are
/// measured in bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmString(Rc<[u8]>);

impl VmString {
    /// Create a string from raw bytes
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        VmString(Rc::from(bytes.as_ref()))
    }

    /// Raw bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the string is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// View as UTF-8 if valid
    pub fn to_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// View as UTF-8, replacing invalid sequences
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<&str> for VmString {
    fn from(s: &str) -> Self {
        VmString::new(s)
    }
}

impl From<String> for VmString {
    fn from(s: String) -> Self {
        VmString::new(s)
    }
}

impl From<&[u8]> for VmString {
    fn from(b: &[u8]) -> Self {
        VmString::new(b)
    }
}

impl From<Vec<u8>> for VmString {
    fn from(b: Vec<u8>) -> Self {
        VmString(Rc::from(b))
    }
}

impl AsRef<[u8]> for VmString {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for VmString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl fmt::Display for VmString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_lossy())
    }
}

/// Native type tag of a value
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `nil`
    Nil = 0,
    /// `true` / `false`
    Boolean = 1,
    /// Float or integer number
    Number = 3,
    /// Byte string
    String = 4,
    /// Table
    Table = 5,
    /// Native or scripted function
    Function = 6,
    /// Opaque native object
    Userdata = 7,
    /// Coroutine thread
    Thread = 8,
}

impl ValueType {
    /// Script-visible type name
    pub const fn name(self) -> &'static str {
        match self {
            ValueType::Nil => "nil",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Table => "table",
            ValueType::Function => "function",
            ValueType::Userdata => "userdata",
            ValueType::Thread => "thread",
        }
    }
}

/// A dynamically typed runtime value
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Nil,
    /// Boolean
    Boolean(bool),
    /// Floating-point number
    Number(f64),
    /// Native integer (integer subtype of number)
    Integer(i64),
    /// Byte string
    String(VmString),
    /// Table handle
    Table(TableRef),
    /// Function handle
    Function(FunctionRef),
    /// Userdata handle
    Userdata(UserdataRef),
    /// Thread handle
    Thread(ThreadRef),
}

impl Value {
    /// Native type tag
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Number(_) | Value::Integer(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Table(_) => ValueType::Table,
            Value::Function(_) => ValueType::Function,
            Value::Userdata(_) => ValueType::Userdata,
            Value::Thread(_) => ValueType::Thread,
        }
    }

    /// Script-visible type name
    pub fn type_name(&self) -> &'static str {
        self.value_type().name()
    }

    /// Check if this value is nil
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Only `nil` and `false` are falsy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Extract boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract an integer, accepting floats with an exact integral value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) => float_to_integer(*n),
            _ => None,
        }
    }

    /// Extract a number as float
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Extract string bytes
    pub fn as_string(&self) -> Option<&VmString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Extract a UTF-8 string slice
    pub fn as_str(&self) -> Option<&str> {
        self.as_string().and_then(VmString::to_str)
    }

    /// Extract table handle
    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Extract function handle
    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Extract userdata handle
    pub fn as_userdata(&self) -> Option<&UserdataRef> {
        match self {
            Value::Userdata(u) => Some(u),
            _ => None,
        }
    }

    /// Identity of reference-typed values
    pub fn identity(&self) -> Option<ObjectId> {
        match self {
            Value::Table(t) => Some(t.id()),
            Value::Function(f) => Some(f.id()),
            Value::Userdata(u) => Some(u.id()),
            Value::Thread(t) => Some(t.id()),
            _ => None,
        }
    }
}

/// Convert a float to an integer when the conversion is exact
pub(crate) fn float_to_integer(n: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything >= it does not fit
    if n.fract() == 0.0 && n >= -9_223_372_036_854_775_808.0 && n < 9_223_372_036_854_775_808.0 {
        Some(n as i64)
    } else {
        None
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(i), Value::Number(n)) | (Value::Number(n), Value::Integer(i)) => {
                float_to_integer(*n) == Some(*i)
            }
            (Value::String(a), Value::String(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "bool({})", b),
            Value::Number(n) => write!(f, "number({:?})", n),
            Value::Integer(i) => write!(f, "integer({})", i),
            Value::String(s) => write!(f, "string({:?})", s),
            Value::Table(t) => write!(f, "table({:#x})", t.id().as_u64()),
            Value::Function(func) => write!(f, "function({:#x})", func.id().as_u64()),
            Value::Userdata(u) => write!(f, "userdata({:#x})", u.id().as_u64()),
            Value::Thread(t) => write!(f, "thread({:#x})", t.id().as_u64()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Integer(i) => write!(f, "{}", i),
            Value::String(s) => write!(f, "{}", s),
            other => write!(
                f,
                "{}: {:#x}",
                other.type_name(),
                other.identity().map(ObjectId::as_u64).unwrap_or(0)
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(VmString::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(VmString::from(s))
    }
}

impl From<VmString> for Value {
    fn from(s: VmString) -> Self {
        Value::String(s)
    }
}

impl From<TableRef> for Value {
    fn from(t: TableRef) -> Self {
        Value::Table(t)
    }
}

impl From<FunctionRef> for Value {
    fn from(f: FunctionRef) -> Self {
        Value::Function(f)
    }
}

impl From<UserdataRef> for Value {
    fn from(u: UserdataRef) -> Self {
        Value::Userdata(u)
    }
}
