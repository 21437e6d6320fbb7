//! Moonbind SDK - Typed bindings for native code
//!
//! This crate layers typed conversions over the dynamically typed values of
//! `moonbind-core`:
//! - [`IntoValue`] / [`FromValue`] and the multi-value argument traits
//! - Typed native functions and a name-based [`NativeFunctionRegistry`]
//! - Userdata classes with methods and opt-in state serialization
//!
//! # Example
//!
//! ```
//! use moonbind_core::Vm;
//! use moonbind_sdk::{call_global, NativeFunctionRegistry};
//!
//! let mut registry = NativeFunctionRegistry::new();
//! registry.register("math.clamp", |_, (x, lo, hi): (f64, f64, f64)| Ok(x.clamp(lo, hi)));
//! registry.register("greet", |_, name: String| Ok(format!("hello, {}", name)));
//!
//! let mut vm = Vm::new();
//! registry.install(&vm).unwrap();
//! let greeting: String = call_global(&mut vm, "greet", "moon").unwrap();
//! assert_eq!(greeting, "hello, moon");
//! ```

#![warn(missing_docs)]

pub mod class;
pub mod convert;
pub mod error;
pub mod function;

pub use class::{call_method, Class, ClassBuilder};
pub use convert::{FromArgs, FromResults, FromValue, IntoArgs, IntoResults, IntoValue};
pub use error::{BindError, BindResult};
pub use function::{call_function, call_global, create_function, NativeFunctionRegistry};
