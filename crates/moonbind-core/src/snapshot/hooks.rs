//! Userdata serialization hooks
//!
//! A userdata opts into serialization through a `__serialize` function in
//! its metatable:
//!
//! ```text
//! __serialize(self) -> (type_name: string, payload: any serializable value)
//! ```
//!
//! Reading looks up a factory by `type_name` (see
//! [`crate::Vm::register_userdata_deserializer`]), calls it with the payload
//! and expects the rebuilt userdata as its first result.

use super::error::{FormatError, SerializeResult};
use crate::object::{FunctionRef, UserdataRef};
use crate::runtime::Runtime;
use crate::value::{Value, VmString};

/// Metatable key of the serialize hook
pub const SERIALIZE_METAEVENT: &str = "__serialize";

/// Serialize hook of `userdata`, if its metatable has one
pub(crate) fn serialize_hook(userdata: &UserdataRef) -> Option<FunctionRef> {
    userdata
        .metatable()?
        .get_field(SERIALIZE_METAEVENT)
        .as_function()
        .cloned()
}

/// Run the hook, returning the type name and payload
pub(crate) fn invoke_serialize_hook<R: Runtime + ?Sized>(
    rt: &mut R,
    hook: &FunctionRef,
    userdata: &UserdataRef,
) -> SerializeResult<(VmString, Value)> {
    let results = rt.call_function(hook, vec![Value::Userdata(userdata.clone())])?;
    if results.len() != 2 {
        return Err(FormatError::InvalidHookResult(results.len()).into());
    }

    let mut results = results.into_iter();
    match (results.next(), results.next()) {
        (Some(Value::String(name)), Some(payload)) => Ok((name, payload)),
        _ => Err(FormatError::InvalidUserdataName.into()),
    }
}

/// Rebuild a userdata of type `name` from its payload
pub(crate) fn invoke_factory<R: Runtime + ?Sized>(
    rt: &mut R,
    name: &[u8],
    payload: Value,
) -> SerializeResult<UserdataRef> {
    let type_name = || String::from_utf8_lossy(name).into_owned();
    let factory = rt
        .userdata_deserializer(name)
        .ok_or_else(|| FormatError::MissingDeserializer(type_name()))?;

    match rt.call_function(&factory, vec![payload])?.into_iter().next() {
        Some(Value::Userdata(userdata)) => Ok(userdata),
        _ => Err(FormatError::InvalidFactoryResult(type_name()).into()),
    }
}
