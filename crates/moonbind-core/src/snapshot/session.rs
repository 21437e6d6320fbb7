//! Serialization sessions
//!
//! Each entry point is one session: a header, one or more value units, and
//! fresh reference bookkeeping. Sessions always return the runtime's value
//! stack to the depth it had on entry, whether they succeed or fail.

use super::error::{FormatError, SerializeResult};
use super::format::TypeTag;
use super::options::SerializerOptions;
use super::reader::ValueReader;
use super::references::ReferenceHolder;
use super::writer::ValueWriter;
use crate::runtime::Runtime;
use crate::value::Value;
use crate::vm::Vm;
use crate::VmError;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// Reference-preserving serializer bound to one runtime
///
/// ```
/// use moonbind_core::{Serializer, Value, Vm};
///
/// let mut vm = Vm::new();
/// let table = vm.create_table();
/// table.set_field("self", table.clone());
///
/// let mut bytes = Vec::new();
/// Serializer::new(&mut vm)
///     .serialize_variable(&mut bytes, &Value::Table(table))
///     .unwrap();
///
/// let copy = Serializer::new(&mut vm).deserialize_variable(&bytes[..]).unwrap();
/// let copy = copy.as_table().unwrap();
/// assert!(copy.get_field("self").as_table().unwrap().ptr_eq(copy));
/// ```
pub struct Serializer<'vm, R: Runtime + ?Sized = Vm> {
    rt: &'vm mut R,
    options: SerializerOptions,
}

impl<'vm, R: Runtime + ?Sized> Serializer<'vm, R> {
    /// Create a serializer with default options
    pub fn new(rt: &'vm mut R) -> Self {
        Self::with_options(rt, SerializerOptions::default())
    }

    /// Create a serializer with specific options
    pub fn with_options(rt: &'vm mut R, options: SerializerOptions) -> Self {
        Self { rt, options }
    }

    /// Get serializer options
    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    // ===== Single values =====

    /// Serialize one value
    pub fn serialize_variable<W: Write>(&mut self, out: W, value: &Value) -> SerializeResult<()> {
        self.write_session("variable", out, |writer| writer.write_value(value))
    }

    /// Serialize the stack slot at `index` (0 = bottom)
    pub fn serialize_stack_variable<W: Write>(
        &mut self,
        out: W,
        index: usize,
    ) -> SerializeResult<()> {
        let value = self
            .rt
            .stack_value(index)
            .ok_or(VmError::StackUnderflow)?;
        self.serialize_variable(out, &value)
    }

    /// Deserialize one value
    pub fn deserialize_variable<I: Read>(&mut self, input: I) -> SerializeResult<Value> {
        self.read_session("variable", input, |reader| reader.read_value())
    }

    // ===== Stack =====

    /// Serialize the bottom `count` stack slots, or the whole stack for `None`
    ///
    /// Returns the number of values written.
    pub fn serialize_stack<W: Write>(
        &mut self,
        out: W,
        count: Option<usize>,
    ) -> SerializeResult<usize> {
        let depth = self.rt.stack_depth();
        let count = count.unwrap_or(depth);
        if count > depth {
            return Err(VmError::StackUnderflow.into());
        }
        let values: Vec<Value> = (0..count)
            .filter_map(|index| self.rt.stack_value(index))
            .collect();

        self.write_session("stack", out, |writer| {
            writer.write_count(values.len())?;
            for value in &values {
                writer.write_value(value)?;
            }
            Ok(values.len())
        })
    }

    /// Deserialize a stack sequence and push it
    ///
    /// Values are only pushed once the whole sequence has been read; on any
    /// failure the stack keeps its original depth. Returns the number of
    /// values pushed.
    pub fn deserialize_stack<I: Read>(&mut self, input: I) -> SerializeResult<usize> {
        let values = self.read_session("stack", input, |reader| {
            let count = reader.read_count()?;
            let mut values = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                values.push(reader.read_value()?);
            }
            Ok(values)
        })?;

        let depth = self.rt.stack_depth();
        let count = values.len();
        for value in values {
            if let Err(e) = self.rt.push_value(value) {
                self.rt.truncate_stack(depth);
                return Err(e.into());
            }
        }
        Ok(count)
    }

    // ===== Whole state =====

    /// Serialize the global table and the serialized-registry slot
    pub fn serialize_state<W: Write>(&mut self, out: W) -> SerializeResult<()> {
        let globals = self.rt.globals();
        let registry = self.rt.serialized_registry();
        self.write_session("state", out, |writer| {
            writer.write_table(&globals, true)?;
            writer.write_value(&registry)
        })
    }

    /// Restore globals and the serialized-registry slot
    ///
    /// The stream is read in full before anything is applied: entries are
    /// then merged into the live global table, a non-nil metatable replaces
    /// the current one and the registry slot is replaced. A failed read
    /// leaves globals and registry untouched.
    pub fn deserialize_state<I: Read>(&mut self, input: I) -> SerializeResult<()> {
        let globals = self.rt.globals();
        let alias = globals.clone();
        let (staged, registry) = self.read_session("state", input, |reader| {
            let staged = match reader.read_tag()? {
                TypeTag::Table => reader.read_staged_table(alias)?,
                other => return Err(FormatError::ExpectedTable(other.name()).into()),
            };
            Ok((staged, reader.read_value()?))
        })?;

        for (key, value) in staged.pairs() {
            globals.raw_set(key, value)?;
        }
        if let Some(metatable) = staged.metatable() {
            globals.set_metatable(Some(metatable));
        }
        self.rt.set_serialized_registry(registry);
        Ok(())
    }

    /// [`Serializer::serialize_state`] into a file, replacing it
    pub fn serialize_state_to_file(&mut self, path: impl AsRef<Path>) -> SerializeResult<()> {
        let file = File::create(path)?;
        self.serialize_state(BufWriter::new(file))
    }

    /// [`Serializer::deserialize_state`] from a file
    pub fn deserialize_state_from_file(&mut self, path: impl AsRef<Path>) -> SerializeResult<()> {
        let file = File::open(path)?;
        self.deserialize_state(BufReader::new(file))
    }

    // ===== Session framing =====

    fn write_session<W, T, F>(&mut self, entry: &'static str, out: W, body: F) -> SerializeResult<T>
    where
        W: Write,
        F: FnOnce(&mut ValueWriter<'_, R, W>) -> SerializeResult<T>,
    {
        let depth = self.rt.stack_depth();
        let mut writer = ValueWriter::new(&mut *self.rt, out, &self.options);

        let result = write_body(&mut writer, body);
        match &result {
            Ok(_) => debug!(
                entry,
                bytes = writer.bytes_written(),
                references = writer.reference_count(),
                "serialized"
            ),
            Err(e) => debug!(entry, error = %e, "serialization failed"),
        }

        drop(writer);
        self.rt.truncate_stack(depth);
        result
    }

    fn read_session<I, T, F>(&mut self, entry: &'static str, input: I, body: F) -> SerializeResult<T>
    where
        I: Read,
        F: FnOnce(&mut ValueReader<'_, R, I>) -> SerializeResult<T>,
    {
        let depth = self.rt.stack_depth();
        let holder = self.rt.create_table();
        if let Err(e) = self.rt.push_value(Value::Table(holder.clone())) {
            self.rt.truncate_stack(depth);
            return Err(e.into());
        }

        let mut reader = ValueReader::new(
            &mut *self.rt,
            input,
            &self.options,
            ReferenceHolder::new(holder),
        );

        let result = read_body(&mut reader, body);
        match &result {
            Ok(_) => debug!(entry, bytes = reader.bytes_read(), "deserialized"),
            Err(e) => debug!(entry, error = %e, "deserialization failed"),
        }

        drop(reader);
        self.rt.truncate_stack(depth);
        result
    }
}

fn write_body<R, W, T, F>(writer: &mut ValueWriter<'_, R, W>, body: F) -> SerializeResult<T>
where
    R: Runtime + ?Sized,
    W: Write,
    F: FnOnce(&mut ValueWriter<'_, R, W>) -> SerializeResult<T>,
{
    writer.write_header()?;
    let value = body(writer)?;
    writer.flush()?;
    Ok(value)
}

fn read_body<R, I, T, F>(reader: &mut ValueReader<'_, R, I>, body: F) -> SerializeResult<T>
where
    R: Runtime + ?Sized,
    I: Read,
    F: FnOnce(&mut ValueReader<'_, R, I>) -> SerializeResult<T>,
{
    reader.read_header()?;
    body(reader)
}
