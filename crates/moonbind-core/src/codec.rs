//! Binary primitive codec
//!
//! Fixed-width read/write of primitive values and length-prefixed byte blocks over
//! `std::io` streams. Values are written in host-native byte order and width: the
//! output is not portable across architectures with a different layout.

use std::io::{self, Read, Write};
use std::mem::size_of;

/// Errors raised by [`BinaryReader`]
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The stream ended before a complete value was read
    #[error("read error, eof")]
    UnexpectedEof,

    /// The underlying stream failed
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::UnexpectedEof
        } else {
            CodecError::Io(e)
        }
    }
}

/// Result type for codec reads
pub type CodecResult<T> = Result<T, CodecError>;

/// A fixed-width value with a host-native byte representation
pub trait Primitive: Copy {
    /// Byte array holding exactly `size_of::<Self>()` bytes
    type Bytes: AsRef<[u8]> + AsMut<[u8]> + Default;

    /// Encode in native byte order
    fn to_ne(self) -> Self::Bytes;

    /// Decode from native byte order
    fn from_ne(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Primitive for $ty {
                type Bytes = [u8; size_of::<$ty>()];

                #[inline]
                fn to_ne(self) -> Self::Bytes {
                    self.to_ne_bytes()
                }

                #[inline]
                fn from_ne(bytes: Self::Bytes) -> Self {
                    <$ty>::from_ne_bytes(bytes)
                }
            }
        )*
    };
}

impl_primitive!(u8, u16, i16, u32, i32, u64, i64, usize, f64);

/// Writer for fixed-width primitives and length-prefixed blocks
pub struct BinaryWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> BinaryWriter<W> {
    /// Wrap an output stream
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Write `size_of::<T>()` raw bytes
    #[inline]
    pub fn write_primitive<T: Primitive>(&mut self, value: T) -> io::Result<()> {
        self.write_raw(value.to_ne().as_ref())
    }

    /// Write a native `usize` length followed by the bytes themselves
    pub fn write_len_prefixed(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_primitive(bytes.len())?;
        self.write_raw(bytes)
    }

    /// Write bytes without any framing
    pub fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Total bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Flush the underlying stream
    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    /// Unwrap the underlying stream
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reader for fixed-width primitives and length-prefixed blocks
///
/// Length-prefixed blocks are read into a buffer owned by the reader and reused
/// across calls.
pub struct BinaryReader<R: Read> {
    inner: R,
    buffer: Vec<u8>,
    read: u64,
}

impl<R: Read> BinaryReader<R> {
    /// Wrap an input stream
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            read: 0,
        }
    }

    /// Read exactly `size_of::<T>()` bytes
    #[inline]
    pub fn read_primitive<T: Primitive>(&mut self) -> CodecResult<T> {
        let mut bytes = T::Bytes::default();
        self.inner.read_exact(bytes.as_mut())?;
        self.read += bytes.as_ref().len() as u64;
        Ok(T::from_ne(bytes))
    }

    /// Read a length then exactly that many bytes
    ///
    /// The buffer grows with the data actually present, so a corrupt length
    /// fails with [`CodecError::UnexpectedEof`] instead of allocating up front.
    pub fn read_len_prefixed(&mut self) -> CodecResult<&[u8]> {
        let len: usize = self.read_primitive()?;
        self.buffer.clear();
        let got = (&mut self.inner)
            .take(len as u64)
            .read_to_end(&mut self.buffer)?;
        if got != len {
            return Err(CodecError::UnexpectedEof);
        }
        self.read += got as u64;
        Ok(self.buffer.as_slice())
    }

    /// Total bytes consumed so far
    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    /// Unwrap the underlying stream
    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_widths() {
        let mut w = BinaryWriter::new(Vec::new());
        w.write_primitive(7u8).unwrap();
        w.write_primitive(-3i32).unwrap();
        w.write_primitive(2.5f64).unwrap();
        assert_eq!(w.bytes_written(), 1 + 4 + 8);

        let buf = w.into_inner();
        let mut r = BinaryReader::new(&buf[..]);
        assert_eq!(r.read_primitive::<u8>().unwrap(), 7);
        assert_eq!(r.read_primitive::<i32>().unwrap(), -3);
        assert_eq!(r.read_primitive::<f64>().unwrap(), 2.5);
        assert_eq!(r.bytes_read(), 13);
    }

    #[test]
    fn test_host_native_order() {
        let mut w = BinaryWriter::new(Vec::new());
        w.write_primitive(0x0102_0304i32).unwrap();
        assert_eq!(w.into_inner(), 0x0102_0304i32.to_ne_bytes().to_vec());
    }

    #[test]
    fn test_len_prefixed_with_embedded_nul() {
        let mut w = BinaryWriter::new(Vec::new());
        w.write_len_prefixed(b"a\0b").unwrap();
        w.write_len_prefixed(b"").unwrap();
        let buf = w.into_inner();
        assert_eq!(buf.len(), 2 * size_of::<usize>() + 3);

        let mut r = BinaryReader::new(&buf[..]);
        assert_eq!(r.read_len_prefixed().unwrap(), b"a\0b");
        assert!(r.read_len_prefixed().unwrap().is_empty());
    }

    #[test]
    fn test_truncated_primitive_is_eof() {
        let buf = [1u8, 2];
        let mut r = BinaryReader::new(&buf[..]);
        assert!(matches!(
            r.read_primitive::<i32>(),
            Err(CodecError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_short_block_is_eof() {
        let mut w = BinaryWriter::new(Vec::new());
        w.write_primitive(10usize).unwrap();
        w.write_raw(b"abc").unwrap();
        let buf = w.into_inner();

        let mut r = BinaryReader::new(&buf[..]);
        assert!(matches!(
            r.read_len_prefixed(),
            Err(CodecError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_huge_length_does_not_preallocate() {
        let mut w = BinaryWriter::new(Vec::new());
        w.write_primitive(usize::MAX).unwrap();
        let buf = w.into_inner();

        let mut r = BinaryReader::new(&buf[..]);
        assert!(matches!(
            r.read_len_prefixed(),
            Err(CodecError::UnexpectedEof)
        ));
    }
}
