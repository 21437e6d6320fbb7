//! Conversions between runtime values and Rust types
//!
//! [`IntoValue`] and [`FromValue`] map one value. The multi-value traits
//! ([`FromArgs`], [`IntoResults`], [`IntoArgs`], [`FromResults`]) map
//! argument and result lists; they are implemented for every single-value
//! type and for tuples up to four elements, with `()` as the empty list.
//!
//! # Example
//!
//! ```
//! use moonbind_sdk::{FromValue, IntoValue};
//!
//! let value = vec![1i64, 2, 3].into_value().unwrap();
//! let back = Vec::<i64>::from_value(value).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

use crate::error::{BindError, BindResult};
use moonbind_core::{FunctionRef, TableRef, UserdataRef, Value, VmString};
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

/// Convert a Rust value into a runtime value
pub trait IntoValue {
    /// Convert, failing if the value has no runtime representation
    fn into_value(self) -> BindResult<Value>;
}

/// Convert a runtime value into a Rust value
pub trait FromValue: Sized {
    /// Convert, returning an error if the type doesn't match
    fn from_value(value: Value) -> BindResult<Self>;
}

// ============================================================================
// Values and handles
// ============================================================================

impl IntoValue for Value {
    fn into_value(self) -> BindResult<Value> {
        Ok(self)
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> BindResult<Self> {
        Ok(value)
    }
}

macro_rules! impl_handle {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl IntoValue for $ty {
            fn into_value(self) -> BindResult<Value> {
                Ok(Value::$variant(self))
            }
        }

        impl FromValue for $ty {
            fn from_value(value: Value) -> BindResult<Self> {
                match value {
                    Value::$variant(inner) => Ok(inner),
                    other => Err(BindError::type_mismatch($name, &other)),
                }
            }
        }
    };
}

impl_handle!(TableRef, Table, "table");
impl_handle!(FunctionRef, Function, "function");
impl_handle!(UserdataRef, Userdata, "userdata");
impl_handle!(VmString, String, "string");

// ============================================================================
// Primitives
// ============================================================================

impl IntoValue for bool {
    fn into_value(self) -> BindResult<Value> {
        Ok(Value::Boolean(self))
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> BindResult<Self> {
        Ok(value.is_truthy())
    }
}

macro_rules! impl_integer {
    ($($ty:ty),*) => {
        $(
            impl IntoValue for $ty {
                fn into_value(self) -> BindResult<Value> {
                    i64::try_from(self).map(Value::Integer).map_err(|_| {
                        BindError::ArgumentError(format!(
                            "integer {} does not fit the runtime integer type",
                            self
                        ))
                    })
                }
            }

            impl FromValue for $ty {
                fn from_value(value: Value) -> BindResult<Self> {
                    let n = value
                        .as_integer()
                        .ok_or_else(|| BindError::type_mismatch(stringify!($ty), &value))?;
                    <$ty>::try_from(n).map_err(|_| {
                        BindError::ArgumentError(format!(
                            "integer {} out of range for {}",
                            n,
                            stringify!($ty)
                        ))
                    })
                }
            }
        )*
    };
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl IntoValue for f64 {
    fn into_value(self) -> BindResult<Value> {
        Ok(Value::Number(self))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> BindResult<Self> {
        value
            .as_number()
            .ok_or_else(|| BindError::type_mismatch("number", &value))
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> BindResult<Value> {
        Ok(Value::Number(self as f64))
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> BindResult<Self> {
        f64::from_value(value).map(|n| n as f32)
    }
}

// ============================================================================
// Strings
// ============================================================================

impl IntoValue for String {
    fn into_value(self) -> BindResult<Value> {
        Ok(Value::from(self))
    }
}

impl IntoValue for &str {
    fn into_value(self) -> BindResult<Value> {
        Ok(Value::from(self))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> BindResult<Self> {
        let s = match &value {
            Value::String(s) => s,
            other => return Err(BindError::type_mismatch("string", other)),
        };
        s.to_str()
            .map(str::to_owned)
            .ok_or_else(|| BindError::ArgumentError("string is not valid UTF-8".to_string()))
    }
}

// ============================================================================
// Containers
// ============================================================================

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> BindResult<Value> {
        match self {
            Some(value) => value.into_value(),
            None => Ok(Value::Nil),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> BindResult<Self> {
        match value {
            Value::Nil => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> BindResult<Value> {
        let table = TableRef::new();
        for (i, item) in self.into_iter().enumerate() {
            table.raw_set(Value::Integer(i as i64 + 1), item.into_value()?)?;
        }
        Ok(Value::Table(table))
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    /// Reads the sequence part `1..=#t`
    fn from_value(value: Value) -> BindResult<Self> {
        let table = TableRef::from_value(value)?;
        (1..=table.raw_len())
            .map(|i| T::from_value(table.raw_get(&Value::Integer(i as i64))))
            .collect()
    }
}

impl<K, V, S> IntoValue for HashMap<K, V, S>
where
    K: IntoValue,
    V: IntoValue,
{
    fn into_value(self) -> BindResult<Value> {
        let table = TableRef::new();
        for (k, v) in self {
            table.raw_set(k.into_value()?, v.into_value()?)?;
        }
        Ok(Value::Table(table))
    }
}

impl<K, V, S> FromValue for HashMap<K, V, S>
where
    K: FromValue + Eq + Hash,
    V: FromValue,
    S: BuildHasher + Default,
{
    fn from_value(value: Value) -> BindResult<Self> {
        let table = TableRef::from_value(value)?;
        table
            .pairs()
            .into_iter()
            .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
            .collect()
    }
}

// ============================================================================
// Multi-value conversions
// ============================================================================

/// Convert a native function's argument list
pub trait FromArgs: Sized {
    /// Convert; missing arguments read as nil
    fn from_args(args: Vec<Value>) -> BindResult<Self>;
}

/// Convert a native function's return value into a result list
pub trait IntoResults {
    /// Convert into the list of returned values
    fn into_results(self) -> BindResult<Vec<Value>>;
}

/// Convert Rust values into a call's argument list
pub trait IntoArgs {
    /// Convert into the list of arguments
    fn into_args(self) -> BindResult<Vec<Value>>;
}

/// Convert a call's result list
pub trait FromResults: Sized {
    /// Convert; missing results read as nil
    fn from_results(results: Vec<Value>) -> BindResult<Self>;
}

impl<T: FromValue> FromArgs for T {
    fn from_args(args: Vec<Value>) -> BindResult<Self> {
        let first = args.into_iter().next().unwrap_or_default();
        T::from_value(first).map_err(|e| e.at_argument(1))
    }
}

impl<T: IntoValue> IntoResults for T {
    fn into_results(self) -> BindResult<Vec<Value>> {
        Ok(vec![self.into_value()?])
    }
}

impl<T: IntoValue> IntoArgs for T {
    fn into_args(self) -> BindResult<Vec<Value>> {
        Ok(vec![self.into_value()?])
    }
}

impl<T: FromValue> FromResults for T {
    fn from_results(results: Vec<Value>) -> BindResult<Self> {
        T::from_value(results.into_iter().next().unwrap_or_default())
    }
}

macro_rules! impl_tuple {
    ($($name:ident),*) => {
        impl<$($name: FromValue),*> FromArgs for ($($name,)*) {
            #[allow(unused_variables, unused_mut)]
            fn from_args(args: Vec<Value>) -> BindResult<Self> {
                let mut args = args.into_iter();
                let mut position = 0;
                Ok(($(
                    {
                        position += 1;
                        <$name as FromValue>::from_value(args.next().unwrap_or_default())
                            .map_err(|e| e.at_argument(position))?
                    },
                )*))
            }
        }

        impl<$($name: FromValue),*> FromResults for ($($name,)*) {
            #[allow(unused_variables, unused_mut)]
            fn from_results(results: Vec<Value>) -> BindResult<Self> {
                let mut results = results.into_iter();
                Ok(($(
                    <$name as FromValue>::from_value(results.next().unwrap_or_default())?,
                )*))
            }
        }

        impl<$($name: IntoValue),*> IntoResults for ($($name,)*) {
            #[allow(non_snake_case)]
            fn into_results(self) -> BindResult<Vec<Value>> {
                let ($($name,)*) = self;
                Ok(vec![$($name.into_value()?),*])
            }
        }

        impl<$($name: IntoValue),*> IntoArgs for ($($name,)*) {
            #[allow(non_snake_case)]
            fn into_args(self) -> BindResult<Vec<Value>> {
                let ($($name,)*) = self;
                Ok(vec![$($name.into_value()?),*])
            }
        }
    };
}

impl_tuple!();
impl_tuple!(A);
impl_tuple!(A, B);
impl_tuple!(A, B, C);
impl_tuple!(A, B, C, D);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_conversions() {
        assert_eq!(i32::from_value(Value::Integer(-5)).unwrap(), -5);
        assert_eq!(u8::from_value(Value::Number(200.0)).unwrap(), 200);
        assert!(u8::from_value(Value::Integer(256)).is_err());
        assert!(i64::from_value(Value::Number(1.5)).is_err());
        assert!(i64::from_value(Value::from("1")).is_err());
        assert!(u64::MAX.into_value().is_err());
        assert!(matches!(7usize.into_value().unwrap(), Value::Integer(7)));
    }

    #[test]
    fn test_float_conversions() {
        assert_eq!(f64::from_value(Value::Integer(2)).unwrap(), 2.0);
        assert_eq!(f32::from_value(Value::Number(0.5)).unwrap(), 0.5);
        assert!(matches!(1.0f64.into_value().unwrap(), Value::Number(n) if n == 1.0));
    }

    #[test]
    fn test_string_conversions() {
        assert_eq!(String::from_value(Value::from("abc")).unwrap(), "abc");
        let invalid = Value::String(VmString::new([0xff, 0xfe]));
        assert!(String::from_value(invalid.clone()).is_err());
        assert_eq!(VmString::from_value(invalid).unwrap().as_bytes(), &[0xff, 0xfe]);
        assert!(String::from_value(Value::Integer(1)).is_err());
    }

    #[test]
    fn test_bool_uses_truthiness() {
        assert!(!bool::from_value(Value::Nil).unwrap());
        assert!(!bool::from_value(Value::Boolean(false)).unwrap());
        assert!(bool::from_value(Value::Integer(0)).unwrap());
    }

    #[test]
    fn test_option() {
        assert_eq!(Option::<i64>::from_value(Value::Nil).unwrap(), None);
        assert_eq!(Option::<i64>::from_value(Value::Integer(3)).unwrap(), Some(3));
        assert!(Option::<i64>::None.into_value().unwrap().is_nil());
    }

    #[test]
    fn test_vec_roundtrip_and_holes() {
        let value = vec!["a", "b"].into_value().unwrap();
        assert_eq!(Vec::<String>::from_value(value).unwrap(), vec!["a", "b"]);

        let table = TableRef::new();
        table.raw_set(Value::Integer(1), Value::Integer(1)).unwrap();
        table.raw_set(Value::Integer(3), Value::Integer(3)).unwrap();
        assert_eq!(Vec::<i64>::from_value(Value::Table(table)).unwrap(), vec![1]);
    }

    #[test]
    fn test_hash_map() {
        let mut map = HashMap::new();
        map.insert("x".to_string(), 1i64);
        map.insert("y".to_string(), 2i64);
        let value = map.clone().into_value().unwrap();
        let back: HashMap<String, i64> = HashMap::from_value(value).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_handle_mismatch() {
        let err = TableRef::from_value(Value::Boolean(true)).unwrap_err();
        assert_eq!(err.to_string(), "Type mismatch: expected table, got boolean");
    }

    #[test]
    fn test_args_pad_with_nil_and_report_position() {
        let (a, b): (i64, Option<String>) = FromArgs::from_args(vec![Value::Integer(1)]).unwrap();
        assert_eq!((a, b), (1, None));

        let err = <(i64, i64)>::from_args(vec![Value::Integer(1), Value::from("x")]).unwrap_err();
        assert!(err.to_string().contains("bad argument #2"));

        let single = i64::from_args(vec![Value::Integer(9), Value::Integer(10)]).unwrap();
        assert_eq!(single, 9);
    }

    #[test]
    fn test_results() {
        assert!(().into_results().unwrap().is_empty());
        assert_eq!(
            (1i64, "two").into_results().unwrap(),
            vec![Value::Integer(1), Value::from("two")]
        );
        assert_eq!(5i64.into_args().unwrap(), vec![Value::Integer(5)]);

        let (x, y, z): (i64, bool, Option<f64>) =
            FromResults::from_results(vec![Value::Integer(1), Value::Boolean(true)]).unwrap();
        assert_eq!((x, y, z), (1, true, None));
        <()>::from_results(vec![Value::Integer(1)]).unwrap();
    }
}
