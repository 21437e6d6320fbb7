//! Userdata classes
//!
//! A class is a metatable shared by every instance of one Rust type:
//! `__name` holds the class name and `__index` a table of methods. A
//! serializable class also carries a `__serialize` hook and registers the
//! matching deserializer factory with the [`Vm`], so instances survive a
//! state round-trip.
//!
//! # Example
//!
//! ```
//! use moonbind_core::{Value, Vm};
//! use moonbind_sdk::{call_method, ClassBuilder};
//!
//! struct Counter(i64);
//!
//! let mut vm = Vm::new();
//! let class = ClassBuilder::<Counter>::new("Counter")
//!     .method("add", |_, this, n: i64| {
//!         this.0 += n;
//!         Ok(this.0)
//!     })
//!     .build(&mut vm);
//!
//! let counter: Value = class.instantiate(&vm, Counter(1)).into();
//! let total: i64 = call_method(&mut vm, &counter, "add", 41).unwrap();
//! assert_eq!(total, 42);
//! ```

use crate::convert::{FromArgs, FromResults, FromValue, IntoArgs, IntoResults, IntoValue};
use crate::error::{BindError, BindResult};
use crate::function::{in_function, typed};
use moonbind_core::snapshot::SERIALIZE_METAEVENT;
use moonbind_core::{FunctionRef, TableRef, UserdataRef, Value, Vm, VmError};
use std::any::Any;
use std::marker::PhantomData;
use tracing::debug;

/// Metatable field holding the class name
pub const NAME_FIELD: &str = "__name";

/// Builder for a userdata class over `T`
pub struct ClassBuilder<T> {
    name: String,
    metatable: TableRef,
    methods: TableRef,
    factory: Option<FunctionRef>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any> ClassBuilder<T> {
    /// Start a class named `name`
    pub fn new(name: &str) -> Self {
        let metatable = TableRef::new();
        let methods = TableRef::new();
        metatable.set_field(NAME_FIELD, name);
        metatable.set_field("__index", methods.clone());
        Self {
            name: name.to_string(),
            metatable,
            methods,
            factory: None,
            _marker: PhantomData,
        }
    }

    /// Add a method; the first argument must be an instance
    pub fn method<A, R, F>(self, name: &str, method: F) -> Self
    where
        A: FromArgs,
        R: IntoResults,
        F: Fn(&mut Vm, &mut T, A) -> BindResult<R> + 'static,
    {
        let full_name = format!("{}:{}", self.name, name);
        let class = self.name.clone();
        let qualified = full_name.clone();
        let function = FunctionRef::native(full_name, move |vm: &mut Vm, mut args: Vec<Value>| {
            let this = if args.is_empty() { Value::Nil } else { args.remove(0) };
            let userdata = match this {
                Value::Userdata(userdata) => userdata,
                other => {
                    return Err(in_function(
                        &qualified,
                        BindError::type_mismatch(class.as_str(), &other),
                    ))
                }
            };
            let args = A::from_args(args).map_err(|e| in_function(&qualified, e))?;

            let mut data = userdata.borrow_mut::<T>().ok_or_else(|| {
                VmError::TypeError(format!(
                    "{}: self is not a {} or is already in use",
                    qualified, class
                ))
            })?;
            let results = method(vm, &mut *data, args).map_err(|e| in_function(&qualified, e))?;
            drop(data);
            results.into_results().map_err(|e| in_function(&qualified, e))
        });
        self.methods.set_field(name, function);
        self
    }

    /// Add a function to the methods table that takes no instance
    pub fn function<A, R, F>(self, name: &str, func: F) -> Self
    where
        A: FromArgs,
        R: IntoResults,
        F: Fn(&mut Vm, A) -> BindResult<R> + 'static,
    {
        let full_name = format!("{}.{}", self.name, name);
        let function = FunctionRef::native(full_name.as_str(), typed(&full_name, func));
        self.methods.set_field(name, function);
        self
    }

    /// Make instances serializable
    ///
    /// `to_payload` turns an instance into a serializable payload; the
    /// payload is written under the class name and handed to `from_payload`
    /// when read back.
    pub fn serializable<P, S, D>(mut self, to_payload: S, from_payload: D) -> Self
    where
        P: IntoValue + FromValue,
        S: Fn(&T) -> P + 'static,
        D: Fn(P) -> BindResult<T> + 'static,
    {
        let class = self.name.clone();
        let hook_name = format!("{}.{}", self.name, SERIALIZE_METAEVENT);
        let hook = FunctionRef::native(hook_name.clone(), move |_: &mut Vm, args: Vec<Value>| {
            let this = args.into_iter().next().unwrap_or_default();
            let userdata = UserdataRef::from_value(this).map_err(|e| in_function(&hook_name, e))?;
            let data = userdata.borrow::<T>().ok_or_else(|| {
                VmError::TypeError(format!("{}: self is not a {}", hook_name, class))
            })?;
            let payload = to_payload(&*data)
                .into_value()
                .map_err(|e| in_function(&hook_name, e))?;
            Ok(vec![Value::from(class.as_str()), payload])
        });
        self.metatable.set_field(SERIALIZE_METAEVENT, hook);

        let metatable = self.metatable.clone();
        let factory_name = format!("{}.__deserialize", self.name);
        self.factory = Some(FunctionRef::native(
            factory_name.clone(),
            move |_: &mut Vm, args: Vec<Value>| {
                let payload = args.into_iter().next().unwrap_or_default();
                let payload = P::from_value(payload).map_err(|e| in_function(&factory_name, e))?;
                let value = from_payload(payload).map_err(|e| in_function(&factory_name, e))?;
                let userdata = UserdataRef::new(value);
                userdata.set_metatable(Some(metatable.clone()));
                Ok(vec![Value::Userdata(userdata)])
            },
        ));
        self
    }

    /// Finish the class, registering its deserializer with `vm`
    pub fn build(self, vm: &mut Vm) -> Class<T> {
        if let Some(factory) = self.factory {
            vm.register_userdata_deserializer(&self.name, factory);
            debug!(class = %self.name, "registered userdata deserializer");
        }
        Class {
            name: self.name,
            metatable: self.metatable,
            _marker: PhantomData,
        }
    }
}

/// A registered userdata class
pub struct Class<T> {
    name: String,
    metatable: TableRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any> Class<T> {
    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metatable shared by all instances
    pub fn metatable(&self) -> &TableRef {
        &self.metatable
    }

    /// Wrap `value` as an instance
    pub fn instantiate(&self, vm: &Vm, value: T) -> UserdataRef {
        vm.create_userdata(value, Some(self.metatable.clone()))
    }

    /// Check whether `value` is an instance of this class
    pub fn is_instance(&self, value: &Value) -> bool {
        match value {
            Value::Userdata(userdata) => {
                userdata.is::<T>()
                    && userdata
                        .metatable()
                        .is_some_and(|mt| mt.ptr_eq(&self.metatable))
            }
            _ => false,
        }
    }

    /// Native constructor building an instance from typed arguments
    pub fn constructor<A, F>(&self, func: F) -> FunctionRef
    where
        A: FromArgs,
        F: Fn(&mut Vm, A) -> BindResult<T> + 'static,
    {
        let metatable = self.metatable.clone();
        let name = format!("{}.new", self.name);
        FunctionRef::native(
            name.as_str(),
            typed(&name, move |vm: &mut Vm, args: A| {
                let value = func(vm, args)?;
                Ok(vm.create_userdata(value, Some(metatable.clone())))
            }),
        )
    }
}

/// Call method `name` on `object`, passing `object` as the first argument
pub fn call_method<A, R>(vm: &mut Vm, object: &Value, name: &str, args: A) -> BindResult<R>
where
    A: IntoArgs,
    R: FromResults,
{
    let method = match vm.index(object, &Value::from(name))? {
        Value::Function(method) => method,
        other => {
            return Err(BindError::ArgumentError(format!(
                "method '{}' is not callable (got {})",
                name,
                other.type_name()
            )))
        }
    };
    let mut call_args = vec![object.clone()];
    call_args.extend(args.into_args()?);
    R::from_results(vm.call(&method, call_args)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use moonbind_core::Serializer;
    use std::collections::HashMap;

    #[derive(Debug, PartialEq)]
    struct Vec2 {
        x: f64,
        y: f64,
    }

    fn vec2_class(vm: &mut Vm) -> Class<Vec2> {
        ClassBuilder::<Vec2>::new("Vec2")
            .method("length", |_, this, ()| Ok(this.x.hypot(this.y)))
            .method("scale", |_, this, k: f64| {
                this.x *= k;
                this.y *= k;
                Ok(())
            })
            .function("zero", |vm, ()| Ok(vm.get_global("ZERO")))
            .serializable(
                |v: &Vec2| {
                    let mut payload = HashMap::new();
                    payload.insert("x".to_string(), v.x);
                    payload.insert("y".to_string(), v.y);
                    payload
                },
                |payload: HashMap<String, f64>| {
                    let field = |name: &str| {
                        payload
                            .get(name)
                            .copied()
                            .ok_or_else(|| BindError::from(format!("missing field '{}'", name)))
                    };
                    Ok(Vec2 {
                        x: field("x")?,
                        y: field("y")?,
                    })
                },
            )
            .build(vm)
    }

    #[test]
    fn test_methods_mutate_instance() {
        let mut vm = Vm::new();
        let class = vec2_class(&mut vm);
        let v: Value = class.instantiate(&vm, Vec2 { x: 3.0, y: 4.0 }).into();

        let len: f64 = call_method(&mut vm, &v, "length", ()).unwrap();
        assert_eq!(len, 5.0);
        call_method::<_, ()>(&mut vm, &v, "scale", 2).unwrap();
        let len: f64 = call_method(&mut vm, &v, "length", ()).unwrap();
        assert_eq!(len, 10.0);
        assert!(class.is_instance(&v));
        assert!(!class.is_instance(&Value::Nil));
    }

    #[test]
    fn test_metatable_layout() {
        let mut vm = Vm::new();
        let class = vec2_class(&mut vm);
        assert_eq!(class.name(), "Vec2");
        assert_eq!(class.metatable().get_field(NAME_FIELD), Value::from("Vec2"));
        assert!(class.metatable().get_field(SERIALIZE_METAEVENT).as_function().is_some());
        assert!(vm.userdata_deserializer(b"Vec2").is_some());
    }

    #[test]
    fn test_method_rejects_wrong_self() {
        let mut vm = Vm::new();
        let class = vec2_class(&mut vm);
        let length = class.metatable().get_field("__index");
        let length = length.as_table().unwrap().get_field("length");
        let length = length.as_function().unwrap().clone();

        let err = vm.call(&length, vec![Value::Integer(1)]).unwrap_err();
        assert!(matches!(err, VmError::TypeError(msg) if msg.contains("Vec2:length")));

        let other = vm.create_userdata(5u8, None);
        assert!(vm.call(&length, vec![Value::Userdata(other)]).is_err());
    }

    #[test]
    fn test_missing_method() {
        let mut vm = Vm::new();
        let class = vec2_class(&mut vm);
        let v: Value = class.instantiate(&vm, Vec2 { x: 0.0, y: 0.0 }).into();
        let err = call_method::<_, ()>(&mut vm, &v, "rotate", ()).unwrap_err();
        assert!(err.to_string().contains("rotate"));
    }

    #[test]
    fn test_constructor() {
        let mut vm = Vm::new();
        let class = vec2_class(&mut vm);
        let new = class.constructor(|_, (x, y): (f64, f64)| Ok(Vec2 { x, y }));
        let v: UserdataRef = crate::call_function(&mut vm, &new, (1.0, 2.0)).unwrap();
        assert_eq!(*v.borrow::<Vec2>().unwrap(), Vec2 { x: 1.0, y: 2.0 });
        assert!(class.is_instance(&Value::Userdata(v)));
    }

    #[test]
    fn test_serializable_roundtrip() {
        let mut vm = Vm::new();
        let class = vec2_class(&mut vm);
        let v = class.instantiate(&vm, Vec2 { x: 1.5, y: -2.0 });
        let mut bytes = Vec::new();
        Serializer::new(&mut vm)
            .serialize_variable(&mut bytes, &Value::Userdata(v))
            .unwrap();

        let mut fresh = Vm::new();
        let fresh_class = vec2_class(&mut fresh);
        let copy = Serializer::new(&mut fresh)
            .deserialize_variable(&bytes[..])
            .unwrap();
        assert!(fresh_class.is_instance(&copy));
        let copy = copy.as_userdata().unwrap();
        assert_eq!(*copy.borrow::<Vec2>().unwrap(), Vec2 { x: 1.5, y: -2.0 });

        let len: f64 = call_method(&mut fresh, &Value::Userdata(copy.clone()), "length", ()).unwrap();
        assert_eq!(len, 2.5);
    }
}
