//! Value graph reader
//!
//! Mirrors [`super::writer`]. Tables and functions are registered under
//! their reference number before their contents are read; userdata only
//! once its factory has returned.

use super::error::{FormatError, SerializeResult};
use super::format::{read_header, TypeTag};
use super::hooks::invoke_factory;
use super::options::SerializerOptions;
use super::references::ReferenceHolder;
use crate::codec::BinaryReader;
use crate::object::{FunctionRef, TableRef};
use crate::runtime::Runtime;
use crate::value::{Value, VmString};
use crate::vm::Capabilities;
use std::io::Read;

/// Per-session reader state
pub(crate) struct ValueReader<'s, R: Runtime + ?Sized, I: Read> {
    rt: &'s mut R,
    input: BinaryReader<I>,
    options: &'s SerializerOptions,
    capabilities: Capabilities,
    holder: ReferenceHolder,
    depth: usize,
}

impl<'s, R: Runtime + ?Sized, I: Read> ValueReader<'s, R, I> {
    pub(crate) fn new(
        rt: &'s mut R,
        input: I,
        options: &'s SerializerOptions,
        holder: ReferenceHolder,
    ) -> Self {
        let capabilities = rt.capabilities();
        Self {
            rt,
            input: BinaryReader::new(input),
            options,
            capabilities,
            holder,
            depth: 0,
        }
    }

    pub(crate) fn read_header(&mut self) -> SerializeResult<()> {
        let version = self.rt.version_number();
        read_header(&mut self.input, version)
    }

    pub(crate) fn read_count(&mut self) -> SerializeResult<usize> {
        let count: i32 = self.input.read_primitive()?;
        usize::try_from(count).map_err(|_| FormatError::InvalidCount(count).into())
    }

    pub(crate) fn bytes_read(&self) -> u64 {
        self.input.bytes_read()
    }

    pub(crate) fn read_tag(&mut self) -> SerializeResult<TypeTag> {
        let byte: u8 = self.input.read_primitive()?;
        TypeTag::from_u8(byte).ok_or_else(|| FormatError::InvalidTypeTag(byte).into())
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

    /// Read one value unit
    pub(crate) fn read_value(&mut self) -> SerializeResult<Value> {
        let tag = self.read_tag()?;
        self.read_tagged(tag)
    }

    /// Read the payload of a unit whose tag was already consumed
    pub(crate) fn read_tagged(&mut self, tag: TypeTag) -> SerializeResult<Value> {
        match tag {
            TypeTag::Nil => Ok(Value::Nil),
            TypeTag::Boolean => {
                let byte: u8 = self.input.read_primitive()?;
                Ok(Value::Boolean(byte != 0))
            }
            TypeTag::Number => Ok(Value::Number(self.input.read_primitive()?)),
            TypeTag::Integer => {
                if !self.capabilities.native_integers {
                    return Err(FormatError::IntegersUnsupported.into());
                }
                Ok(Value::Integer(self.input.read_primitive()?))
            }
            TypeTag::String => Ok(Value::String(VmString::new(
                self.input.read_len_prefixed()?,
            ))),
            TypeTag::Table => {
                let table = self.rt.create_table();
                Ok(Value::Table(self.read_table_as(table.clone(), table)?))
            }
            TypeTag::Function => {
                if self.options.data_only {
                    return Err(FormatError::FunctionsNotAllowed.into());
                }
                Ok(Value::Function(self.read_function()?))
            }
            TypeTag::Userdata => {
                if self.options.data_only {
                    return Err(FormatError::FunctionsNotAllowed.into());
                }
                self.read_userdata()
            }
            TypeTag::Reference => {
                let number: i32 = self.input.read_primitive()?;
                self.holder.fetch_at(number)
            }
            TypeTag::UpvalueReference => Err(FormatError::UnexpectedUpvalueReference.into()),
        }
    }

    /// Read a table body into a fresh staging table
    ///
    /// References to the table from inside the stream resolve to `alias`,
    /// so the caller can move the staged entries into it afterwards.
    pub(crate) fn read_staged_table(&mut self, alias: TableRef) -> SerializeResult<TableRef> {
        let staging = self.rt.create_table();
        self.read_table_as(alias, staging)
    }

    fn read_table_as(&mut self, alias: TableRef, table: TableRef) -> SerializeResult<TableRef> {
        self.enter()?;
        let number: i32 = self.input.read_primitive()?;
        self.holder.store_at(number, Value::Table(alias))?;

        loop {
            let tag = self.read_tag()?;
            if tag == TypeTag::Nil {
                break;
            }
            let key = self.read_tagged(tag)?;
            let value = self.read_value()?;
            table.raw_set(key, value)?;
        }

        match self.read_value()? {
            Value::Nil => {}
            Value::Table(metatable) => table.set_metatable(Some(metatable)),
            _ => return Err(FormatError::InvalidMetatable.into()),
        }
        self.leave();
        Ok(table)
    }

    fn read_function(&mut self) -> SerializeResult<FunctionRef> {
        self.enter()?;
        let number: i32 = self.input.read_primitive()?;

        let mut bytecode = Vec::new();
        loop {
            let chunk = self.input.read_len_prefixed()?;
            if chunk.is_empty() {
                break;
            }
            bytecode.extend_from_slice(chunk);
        }
        let function = self.rt.load_function(&bytecode)?;
        self.holder
            .store_at(number, Value::Function(function.clone()))?;

        let count = self.read_count()?;
        if count != function.upvalue_count() {
            return Err(FormatError::UpvalueCountMismatch {
                expected: function.upvalue_count(),
                found: count as i32,
            }
            .into());
        }
        if count > 0 && !self.capabilities.upvalue_access {
            return Err(FormatError::UpvaluesUnsupported.into());
        }

        for n in 1..=count {
            let tag = self.read_tag()?;
            if tag == TypeTag::UpvalueReference {
                let owner: i32 = self.input.read_primitive()?;
                let index: i32 = self.input.read_primitive()?;
                if !self.capabilities.upvalue_id {
                    return Err(FormatError::UpvaluesUnsupported.into());
                }
                let other = match self.holder.fetch_at(owner)? {
                    Value::Function(other) => other,
                    _ => return Err(FormatError::InvalidReference(owner).into()),
                };
                let index =
                    usize::try_from(index).map_err(|_| FormatError::InvalidCount(index))?;
                self.rt.join_upvalues(&function, n, &other, index)?;
            } else {
                let value = self.read_tagged(tag)?;
                self.rt.set_upvalue(&function, n, value)?;
            }
        }
        self.leave();
        Ok(function)
    }

    fn read_userdata(&mut self) -> SerializeResult<Value> {
        self.enter()?;
        let number: i32 = self.input.read_primitive()?;
        if self.read_tag()? != TypeTag::String {
            return Err(FormatError::InvalidUserdataName.into());
        }
        let name = self.input.read_len_prefixed()?.to_vec();
        let payload = self.read_value()?;

        let userdata = invoke_factory(&mut *self.rt, &name, payload)?;
        let value = Value::Userdata(userdata);
        self.holder.store_at(number, value.clone())?;
        self.leave();
        Ok(value)
    }
}
