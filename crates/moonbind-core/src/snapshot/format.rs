//! Snapshot wire format definitions
//!
//! ```text
//! header:     i32 file version + f64 interpreter version
//! value unit: u8 tag [+ payload]
//! ```
//!
//! Every field uses host-native byte order and width.

use super::error::{FormatError, SerializeResult};
use crate::codec::{BinaryReader, BinaryWriter};
use crate::value::ValueType;
use std::io::{self, Read, Write};

/// Current snapshot format version
pub const FILE_VERSION: i32 = 3;

/// Type tag opening every value unit
///
/// The first seven share their numbering with [`ValueType`]; the rest are
/// synthetic and only appear on the wire.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// nil; also terminates table contents
    Nil = ValueType::Nil as u8,
    /// Boolean (1 byte)
    Boolean = ValueType::Boolean as u8,
    /// Float (f64)
    Number = ValueType::Number as u8,
    /// Length-prefixed byte string
    String = ValueType::String as u8,
    /// Table definition
    Table = ValueType::Table as u8,
    /// Function definition
    Function = ValueType::Function as u8,
    /// Userdata definition
    Userdata = ValueType::Userdata as u8,
    /// Back-reference to an already defined object
    Reference = 9,
    /// Upvalue shared with an already defined function
    UpvalueReference = 10,
    /// Native integer (i64)
    Integer = 11,
}

impl TypeTag {
    /// Validate a tag byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Nil),
            1 => Some(Self::Boolean),
            3 => Some(Self::Number),
            4 => Some(Self::String),
            5 => Some(Self::Table),
            6 => Some(Self::Function),
            7 => Some(Self::Userdata),
            9 => Some(Self::Reference),
            10 => Some(Self::UpvalueReference),
            11 => Some(Self::Integer),
            _ => None,
        }
    }

    /// Convert tag to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable tag name
    pub fn name(self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Table => "table",
            Self::Function => "function",
            Self::Userdata => "userdata",
            Self::Reference => "reference",
            Self::UpvalueReference => "upvalue reference",
            Self::Integer => "integer",
        }
    }
}

/// Write the session header
pub(crate) fn write_header<W: Write>(
    out: &mut BinaryWriter<W>,
    interpreter_version: f64,
) -> io::Result<()> {
    out.write_primitive(FILE_VERSION)?;
    out.write_primitive(interpreter_version)
}

/// Read and validate the session header; both versions must match exactly
pub(crate) fn read_header<R: Read>(
    input: &mut BinaryReader<R>,
    interpreter_version: f64,
) -> SerializeResult<()> {
    let file_version: i32 = input.read_primitive()?;
    if file_version != FILE_VERSION {
        return Err(FormatError::FileVersionMismatch {
            expected: FILE_VERSION,
            found: file_version,
        }
        .into());
    }

    let found: f64 = input.read_primitive()?;
    if found != interpreter_version {
        return Err(FormatError::InterpreterVersionMismatch {
            expected: interpreter_version,
            found,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SerializeError;

    #[test]
    fn test_tag_roundtrip() {
        for byte in 0..=255u8 {
            if let Some(tag) = TypeTag::from_u8(byte) {
                assert_eq!(tag.to_u8(), byte, "tag {} should round-trip", tag.name());
            }
        }
        assert_eq!(TypeTag::from_u8(2), None);
        assert_eq!(TypeTag::from_u8(8), None);
        assert_eq!(TypeTag::from_u8(12), None);
    }

    #[test]
    fn test_header_layout() {
        let mut out = BinaryWriter::new(Vec::new());
        write_header(&mut out, 504.0).unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &FILE_VERSION.to_ne_bytes());
        assert_eq!(&bytes[4..], &504.0f64.to_ne_bytes());
    }

    #[test]
    fn test_header_mismatches() {
        let mut out = BinaryWriter::new(Vec::new());
        write_header(&mut out, 504.0).unwrap();
        let bytes = out.into_inner();

        let err = read_header(&mut BinaryReader::new(&bytes[..]), 503.0).unwrap_err();
        assert!(matches!(
            err,
            SerializeError::Format(FormatError::InterpreterVersionMismatch { .. })
        ));

        let mut corrupt = bytes.clone();
        corrupt[0] ^= 0xFF;
        let err = read_header(&mut BinaryReader::new(&corrupt[..]), 504.0).unwrap_err();
        assert!(matches!(
            err,
            SerializeError::Format(FormatError::FileVersionMismatch { .. })
        ));

        let err = read_header(&mut BinaryReader::new(&bytes[..6]), 504.0).unwrap_err();
        assert!(matches!(err, SerializeError::Format(FormatError::UnexpectedEof)));
    }
}
