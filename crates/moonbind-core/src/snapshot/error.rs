//! Snapshot error types

use crate::codec::CodecError;
use crate::VmError;
use std::io;

/// Malformed, foreign or unsupported snapshot content
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatError {
    /// Stream ended mid-record
    #[error("read error, eof")]
    UnexpectedEof,

    /// Tag byte is not a recognized type tag
    #[error("invalid type tag {0}")]
    InvalidTypeTag(u8),

    /// Value kind cannot be serialized
    #[error("invalid type: {0}")]
    InvalidType(&'static str),

    /// Reference to a slot that was never defined
    #[error("invalid reference {0}")]
    InvalidReference(i32),

    /// Header carries another snapshot format version
    #[error("file version mismatch (expected {expected}, found {found})")]
    FileVersionMismatch {
        /// Version this build writes
        expected: i32,
        /// Version found in the stream
        found: i32,
    },

    /// Header was written by another interpreter version
    #[error("invalid fileversion: interpreter {found} does not match {expected}")]
    InterpreterVersionMismatch {
        /// Version of the running interpreter
        expected: f64,
        /// Version found in the stream
        found: f64,
    },

    /// Function or userdata in data-only mode
    #[error("functions not allowed")]
    FunctionsNotAllowed,

    /// Function upvalues without runtime support
    #[error("runtime does not support upvalues")]
    UpvaluesUnsupported,

    /// Integer tag on a runtime without native integers
    #[error("runtime does not support integers")]
    IntegersUnsupported,

    /// Upvalue count differs from the loaded prototype
    #[error("upvalue count mismatch (expected {expected}, found {found})")]
    UpvalueCountMismatch {
        /// Count declared by the loaded bytecode
        expected: usize,
        /// Count found in the stream
        found: i32,
    },

    /// Negative element count
    #[error("invalid count {0}")]
    InvalidCount(i32),

    /// Userdata metatable has no `__serialize` function
    #[error("userdata has no __serialize hook")]
    MissingSerializeHook,

    /// `__serialize` returned the wrong number of values
    #[error("__serialize must return 2 values, got {0}")]
    InvalidHookResult(usize),

    /// Userdata type name is not a string
    #[error("userdata type name must be a string")]
    InvalidUserdataName,

    /// No factory registered for a userdata type
    #[error("no deserializer for userdata '{0}'")]
    MissingDeserializer(String),

    /// Factory did not produce a userdata
    #[error("deserializer for '{0}' did not return userdata")]
    InvalidFactoryResult(String),

    /// Userdata payload reaches a userdata whose payload is still being written
    #[error("userdata payload references a userdata being serialized")]
    UserdataCycle,

    /// Metatable slot holds something other than a table or nil
    #[error("metatable must be a table or nil")]
    InvalidMetatable,

    /// Upvalue reference outside a function's upvalue list
    #[error("unexpected upvalue reference")]
    UnexpectedUpvalueReference,

    /// Value graph nests deeper than the configured limit
    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    /// Function body is not loadable bytecode
    #[error("invalid function bytecode: {0}")]
    InvalidBytecode(String),

    /// Whole-state stream does not start with a table
    #[error("expected a table, found {0}")]
    ExpectedTable(&'static str),
}

/// Errors surfaced by a serialization session
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    /// Stream content error
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Error raised by the runtime (hooks, factories)
    #[error("runtime error: {0}")]
    Runtime(VmError),

    /// Stream I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SerializeError {
    /// Format error carried by this error, if any
    pub fn format_error(&self) -> Option<&FormatError> {
        match self {
            SerializeError::Format(e) => Some(e),
            _ => None,
        }
    }
}

impl From<VmError> for SerializeError {
    fn from(e: VmError) -> Self {
        match e {
            VmError::Io(io) => SerializeError::Io(io),
            VmError::InvalidBytecode(msg) => {
                SerializeError::Format(FormatError::InvalidBytecode(msg))
            }
            other => SerializeError::Runtime(other),
        }
    }
}

impl From<CodecError> for SerializeError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::UnexpectedEof => SerializeError::Format(FormatError::UnexpectedEof),
            CodecError::Io(io) => SerializeError::Io(io),
        }
    }
}

/// Result type for serialization sessions
pub type SerializeResult<T> = Result<T, SerializeError>;
