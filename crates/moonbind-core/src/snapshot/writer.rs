//! Value graph writer
//!
//! Walks live objects and emits value units. Tables, functions and userdata
//! are written in full the first time their identity is seen and as a
//! `Reference` afterwards, which both breaks cycles and preserves sharing.
//! The reference number is assigned before an object's contents are
//! written, so an object reachable from itself resolves on read.

use super::error::{FormatError, SerializeResult};
use super::format::{write_header, TypeTag};
use super::hooks::{invoke_serialize_hook, serialize_hook};
use super::options::SerializerOptions;
use super::references::{ReferenceKey, ReferenceTable, UpvalueLocation, UpvalueTable};
use crate::codec::BinaryWriter;
use crate::object::{FunctionRef, ObjectId, TableRef, UserdataRef};
use crate::runtime::Runtime;
use crate::value::Value;
use crate::vm::Capabilities;
use rustc_hash::FxHashSet;
use std::io::Write;
use tracing::trace;

/// Per-session writer state
pub(crate) struct ValueWriter<'s, R: Runtime + ?Sized, W: Write> {
    rt: &'s mut R,
    out: BinaryWriter<W>,
    options: &'s SerializerOptions,
    capabilities: Capabilities,
    references: ReferenceTable,
    upvalues: UpvalueTable,
    /// Userdata whose payload is being written
    open_userdata: FxHashSet<ObjectId>,
    depth: usize,
}

impl<'s, R: Runtime + ?Sized, W: Write> ValueWriter<'s, R, W> {
    pub(crate) fn new(rt: &'s mut R, out: W, options: &'s SerializerOptions) -> Self {
        let capabilities = rt.capabilities();
        Self {
            rt,
            out: BinaryWriter::new(out),
            options,
            capabilities,
            references: ReferenceTable::new(),
            upvalues: UpvalueTable::default(),
            open_userdata: FxHashSet::default(),
            depth: 0,
        }
    }

    pub(crate) fn write_header(&mut self) -> SerializeResult<()> {
        let version = self.rt.version_number();
        write_header(&mut self.out, version)?;
        Ok(())
    }

    pub(crate) fn write_count(&mut self, count: usize) -> SerializeResult<()> {
        let count = i32::try_from(count).map_err(|_| FormatError::InvalidCount(i32::MAX))?;
        self.out.write_primitive(count)?;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> SerializeResult<()> {
        self.out.flush()?;
        Ok(())
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.out.bytes_written()
    }

    pub(crate) fn reference_count(&self) -> usize {
        self.references.len()
    }

    fn write_tag(&mut self, tag: TypeTag) -> SerializeResult<()> {
        self.out.write_primitive(tag.to_u8())?;
        Ok(())
    }

    fn write_reference(&mut self, number: i32) -> SerializeResult<()> {
        self.write_tag(TypeTag::Reference)?;
        self.out.write_primitive(number)?;
        Ok(())
    }

    fn enter(&mut self) -> SerializeResult<()> {
        if self.depth >= self.options.max_depth {
            return Err(FormatError::NestingTooDeep(self.options.max_depth).into());
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Whether `value` may appear as a table key, table value or upvalue
    pub(crate) fn can_serialize(&self, value: &Value) -> bool {
        match value {
            Value::Nil
            | Value::Boolean(_)
            | Value::Number(_)
            | Value::Integer(_)
            | Value::String(_)
            | Value::Table(_) => true,
            Value::Function(f) => {
                !f.is_native() && (self.capabilities.upvalue_id || f.upvalue_count() == 0)
            }
            Value::Userdata(u) => serialize_hook(u).is_some(),
            Value::Thread(_) => false,
        }
    }

    /// Write one value unit
    pub(crate) fn write_value(&mut self, value: &Value) -> SerializeResult<()> {
        match value {
            Value::Nil => self.write_tag(TypeTag::Nil),
            Value::Boolean(b) => {
                self.write_tag(TypeTag::Boolean)?;
                self.out.write_primitive(*b as u8)?;
                Ok(())
            }
            Value::Integer(i) if self.capabilities.native_integers => {
                self.write_tag(TypeTag::Integer)?;
                self.out.write_primitive(*i)?;
                Ok(())
            }
            Value::Integer(i) => {
                self.write_tag(TypeTag::Number)?;
                self.out.write_primitive(*i as f64)?;
                Ok(())
            }
            Value::Number(n) => {
                self.write_tag(TypeTag::Number)?;
                self.out.write_primitive(*n)?;
                Ok(())
            }
            Value::String(s) => {
                self.write_tag(TypeTag::String)?;
                self.out.write_len_prefixed(s.as_bytes())?;
                Ok(())
            }
            Value::Table(t) => self.write_table(t, false),
            Value::Function(f) => {
                if self.options.data_only {
                    return Err(FormatError::FunctionsNotAllowed.into());
                }
                if f.is_native() {
                    return Err(FormatError::InvalidType("native function").into());
                }
                if f.upvalue_count() > 0 && !self.capabilities.upvalue_id {
                    return Err(FormatError::UpvaluesUnsupported.into());
                }
                self.write_function(f)
            }
            Value::Userdata(u) => {
                if self.options.data_only {
                    return Err(FormatError::FunctionsNotAllowed.into());
                }
                self.write_userdata(u)
            }
            Value::Thread(_) => Err(FormatError::InvalidType("thread").into()),
        }
    }

    /// Write a table; with `skip_globals` string keys matched by the
    /// configured predicate are left out
    pub(crate) fn write_table(&mut self, table: &TableRef, skip_globals: bool) -> SerializeResult<()> {
        let key = ReferenceKey::table(table);
        if let Some(number) = self.references.lookup(&key) {
            return self.write_reference(number);
        }

        self.enter()?;
        let number = self.references.insert(key);
        self.write_tag(TypeTag::Table)?;
        self.out.write_primitive(number)?;

        for (k, v) in table.pairs() {
            if !self.can_serialize(&k) || !self.can_serialize(&v) {
                trace!(key = %k, value = %v, "skipping unserializable table entry");
                continue;
            }
            if skip_globals {
                if let Value::String(name) = &k {
                    if self.options.is_global_skipped(name.as_bytes()) {
                        trace!(global = %name, "skipping global");
                        continue;
                    }
                }
            }
            self.write_value(&k)?;
            self.write_value(&v)?;
        }
        self.write_tag(TypeTag::Nil)?;

        match table.metatable() {
            Some(metatable) => self.write_table(&metatable, false)?,
            None => self.write_tag(TypeTag::Nil)?,
        }
        self.leave();
        Ok(())
    }

    fn write_function(&mut self, function: &FunctionRef) -> SerializeResult<()> {
        let key = ReferenceKey::function(function);
        if let Some(number) = self.references.lookup(&key) {
            return self.write_reference(number);
        }

        self.enter()?;
        let number = self.references.insert(key);
        self.write_tag(TypeTag::Function)?;
        self.out.write_primitive(number)?;

        let out = &mut self.out;
        self.rt.dump_function(function, &mut |chunk| {
            if chunk.is_empty() {
                return Ok(());
            }
            out.write_len_prefixed(chunk)
        })?;
        self.out.write_len_prefixed(&[])?;

        let count = function.upvalue_count();
        self.write_count(count)?;
        for n in 1..=count {
            if let Some(id) = self.rt.upvalue_id(function, n) {
                if let Some(shared) = self.upvalues.lookup(id) {
                    self.write_tag(TypeTag::UpvalueReference)?;
                    self.out.write_primitive(shared.function)?;
                    self.out.write_primitive(shared.index)?;
                    continue;
                }
                self.upvalues.insert(
                    id,
                    UpvalueLocation {
                        function: number,
                        index: n as i32,
                    },
                );
            }

            let value = self.rt.get_upvalue(function, n).unwrap_or_default();
            if self.can_serialize(&value) {
                self.write_value(&value)?;
            } else {
                trace!(function = function.name(), upvalue = n, value = %value, "writing unserializable upvalue as nil");
                self.write_tag(TypeTag::Nil)?;
            }
        }
        self.leave();
        Ok(())
    }

    fn write_userdata(&mut self, userdata: &UserdataRef) -> SerializeResult<()> {
        let key = ReferenceKey::userdata(userdata);
        if let Some(number) = self.references.lookup(&key) {
            if self.open_userdata.contains(&userdata.id()) {
                return Err(FormatError::UserdataCycle.into());
            }
            return self.write_reference(number);
        }

        let hook = serialize_hook(userdata).ok_or(FormatError::MissingSerializeHook)?;
        let (name, payload) = invoke_serialize_hook(&mut *self.rt, &hook, userdata)?;

        self.enter()?;
        let number = self.references.insert(key);
        self.write_tag(TypeTag::Userdata)?;
        self.out.write_primitive(number)?;
        self.write_tag(TypeTag::String)?;
        self.out.write_len_prefixed(name.as_bytes())?;

        self.open_userdata.insert(userdata.id());
        self.write_value(&payload)?;
        self.open_userdata.remove(&userdata.id());
        self.leave();
        Ok(())
    }
}
