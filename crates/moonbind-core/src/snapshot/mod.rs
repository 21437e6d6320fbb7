//! State serialization
//!
//! Reference-preserving, cycle-safe binary serialization of runtime values,
//! the value stack, and whole interpreter state (globals plus the
//! serialized-registry slot).
//!
//! # Wire Format
//!
//! ```text
//! header:       i32 FILE_VERSION + f64 interpreter version
//! Nil:          tag
//! Boolean:      tag + u8
//! Number:       tag + f64
//! Integer:      tag + i64
//! String:       tag + usize length + bytes
//! Table:        tag + i32 ref + (key, value)* + Nil + (metatable | Nil)
//! Function:     tag + i32 ref + (usize len + chunk)* + usize 0
//!                   + i32 upvalue count + (value | UpvalueReference i32 ref, i32 index)*
//! Userdata:     tag + i32 ref + String (type name) + payload
//! Reference:    tag + i32 ref
//! stack:        i32 count + values
//! state:        Table (globals) + value (serialized registry)
//! ```
//!
//! All fields are host-native; snapshots are not portable across
//! architectures with a different byte order or word size.

mod error;
mod format;
mod hooks;
mod options;
mod reader;
mod references;
mod session;
mod writer;

pub use error::{FormatError, SerializeError, SerializeResult};
pub use format::{TypeTag, FILE_VERSION};
pub use hooks::SERIALIZE_METAEVENT;
pub use options::{SerializerOptions, SkipGlobalFn, DEFAULT_MAX_DEPTH};
pub use session::Serializer;
