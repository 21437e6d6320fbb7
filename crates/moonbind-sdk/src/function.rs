//! Typed native functions
//!
//! Wraps Rust closures with typed arguments and results into runtime
//! functions, and calls runtime functions with typed values.

use crate::convert::{FromArgs, FromResults, IntoArgs, IntoResults};
use crate::error::{BindError, BindResult};
use moonbind_core::{FunctionRef, TableRef, Value, Vm, VmError};
use std::collections::BTreeMap;
use tracing::debug;

/// Wrap a typed closure into a native function handle
///
/// Conversion failures surface as runtime errors naming the function.
///
/// ```
/// use moonbind_core::Vm;
/// use moonbind_sdk::{call_function, create_function};
///
/// let mut vm = Vm::new();
/// let add = create_function(&vm, "add", |_, (a, b): (i64, i64)| Ok(a + b));
/// let sum: i64 = call_function(&mut vm, &add, (2, 3)).unwrap();
/// assert_eq!(sum, 5);
/// ```
pub fn create_function<A, R, F>(vm: &Vm, name: &str, func: F) -> FunctionRef
where
    A: FromArgs,
    R: IntoResults,
    F: Fn(&mut Vm, A) -> BindResult<R> + 'static,
{
    vm.create_function(name, typed(name, func))
}

/// Call `function` with typed arguments, converting its results
pub fn call_function<A, R>(vm: &mut Vm, function: &FunctionRef, args: A) -> BindResult<R>
where
    A: IntoArgs,
    R: FromResults,
{
    let args = args.into_args()?;
    let results = vm.call(function, args)?;
    R::from_results(results)
}

/// Call the global function `name`
pub fn call_global<A, R>(vm: &mut Vm, name: &str, args: A) -> BindResult<R>
where
    A: IntoArgs,
    R: FromResults,
{
    match vm.get_global(name) {
        Value::Function(function) => call_function(vm, &function, args),
        other => Err(BindError::type_mismatch("function", &other)),
    }
}

/// Adapt a typed closure to the runtime's native calling convention
pub(crate) fn typed<A, R, F>(
    name: &str,
    func: F,
) -> impl Fn(&mut Vm, Vec<Value>) -> Result<Vec<Value>, VmError> + 'static
where
    A: FromArgs,
    R: IntoResults,
    F: Fn(&mut Vm, A) -> BindResult<R> + 'static,
{
    let name = name.to_string();
    move |vm: &mut Vm, args: Vec<Value>| {
        let args = A::from_args(args).map_err(|e| in_function(&name, e))?;
        let results = func(vm, args).map_err(|e| in_function(&name, e))?;
        results.into_results().map_err(|e| in_function(&name, e))
    }
}

pub(crate) fn in_function(name: &str, error: BindError) -> VmError {
    match error {
        BindError::Runtime(e) => e,
        BindError::TypeMismatch { .. } => VmError::TypeError(format!("{}: {}", name, error)),
        BindError::ArgumentError(msg) => VmError::RuntimeError(format!("{}: {}", name, msg)),
    }
}

// ============================================================================
// Native Function Registry (name-based installation)
// ============================================================================

/// Registry of native functions indexed by dotted name
///
/// Names like `"math.abs"` install into nested global tables; tables are
/// created as needed.
pub struct NativeFunctionRegistry {
    functions: BTreeMap<String, FunctionRef>,
}

impl NativeFunctionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    /// Register a typed function by name, replacing any previous one
    pub fn register<A, R, F>(&mut self, name: &str, func: F)
    where
        A: FromArgs,
        R: IntoResults,
        F: Fn(&mut Vm, A) -> BindResult<R> + 'static,
    {
        self.insert(name, FunctionRef::native(name, typed(name, func)));
    }

    /// Register an untyped function by name
    pub fn register_raw(
        &mut self,
        name: &str,
        func: impl Fn(&mut Vm, Vec<Value>) -> Result<Vec<Value>, VmError> + 'static,
    ) {
        self.insert(name, FunctionRef::native(name, func));
    }

    fn insert(&mut self, name: &str, function: FunctionRef) {
        if self.functions.insert(name.to_string(), function).is_some() {
            debug!(name, "replacing registered native function");
        }
    }

    /// Get a function by name
    pub fn get(&self, name: &str) -> Option<FunctionRef> {
        self.functions.get(name).cloned()
    }

    /// Check if a function is registered
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Get the number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Install every function into the globals of `vm`
    ///
    /// # Errors
    ///
    /// Fails if a path segment names an existing non-table global or field.
    pub fn install(&self, vm: &Vm) -> BindResult<()> {
        self.install_into(&vm.globals())
    }

    /// Install every function under `root`
    pub fn install_into(&self, root: &TableRef) -> BindResult<()> {
        for (name, function) in &self.functions {
            let mut segments: Vec<&str> = name.split('.').collect();
            let last = segments.pop().unwrap_or_default();
            let mut table = root.clone();
            for segment in segments {
                table = match table.get_field(segment) {
                    Value::Table(next) => next,
                    Value::Nil => {
                        let next = TableRef::new();
                        table.set_field(segment, next.clone());
                        next
                    }
                    other => {
                        return Err(BindError::ArgumentError(format!(
                            "cannot install '{}': '{}' is a {}",
                            name,
                            segment,
                            other.type_name()
                        )))
                    }
                };
            }
            table.set_field(last, function.clone());
        }
        debug!(count = self.functions.len(), "installed native functions");
        Ok(())
    }
}

impl Default for NativeFunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
