//! Moonbind Core Runtime
//!
//! This crate provides the embeddable scripting runtime including:
//! - Dynamically typed values (tables, closures, userdata)
//! - Value stack and a small stack-machine interpreter for scripted functions
//! - Bytecode dump/load for scripted function prototypes
//! - Reference-preserving binary serialization of runtime state

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod codec;
pub mod object;
pub mod runtime;
pub mod snapshot;
pub mod stack;
pub mod value;
pub mod vm;

pub use object::{
    FunctionKind, FunctionRef, NativeFn, ObjectId, TableRef, ThreadRef, UpvalueId, UpvalueRef,
    UserdataRef,
};
pub use runtime::Runtime;
pub use snapshot::{FormatError, SerializeError, SerializeResult, Serializer, SerializerOptions};
pub use stack::{CallFrame, Stack};
pub use value::{Value, ValueType, VmString};
pub use vm::{Capabilities, Opcode, ProtoBuilder, Prototype, Vm, VmOptions};

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Stack overflow
    #[error("Stack overflow")]
    StackOverflow,

    /// Stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Invalid opcode
    #[error("Invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// Malformed or unverifiable bytecode
    #[error("Invalid bytecode: {0}")]
    InvalidBytecode(String),

    /// Type error
    #[error("Type error: {0}")]
    TypeError(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// I/O failure raised while streaming bytecode
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
