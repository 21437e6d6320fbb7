//! Virtual machine state and execution

mod interpreter;
mod opcode;
mod options;
mod proto;

pub use opcode::Opcode;
pub use options::{Capabilities, VmOptions, VM_VERSION_NUM};
pub use proto::{Constant, ProtoBuilder, Prototype, DUMP_MAGIC, DUMP_VERSION};

use crate::{
    object::{FunctionRef, TableRef, ThreadRef, UpvalueRef, UserdataRef},
    stack::Stack,
    value::Value,
    VmError, VmResult,
};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::io;
use std::rc::Rc;

/// Longest `__index` chain followed before giving up
const MAX_INDEX_CHAIN: usize = 100;

/// Interpreter state
///
/// Each VM has its own:
/// - Value stack and call depth accounting
/// - Global table
/// - Serialized-registry slot for application state
/// - Userdata deserializer registry
pub struct Vm {
    /// Configuration, fixed at creation
    options: VmOptions,

    /// Value stack
    stack: Stack,

    /// Global variables
    globals: TableRef,

    /// Application-designated slot persisted with whole-state snapshots
    serialized_registry: Value,

    /// Userdata factories keyed by type name
    deserializers: FxHashMap<Vec<u8>, FunctionRef>,

    /// Active call nesting
    call_depth: usize,
}

impl Vm {
    /// Create a new VM with default options
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a new VM with specific options
    pub fn with_options(options: VmOptions) -> Self {
        Self {
            stack: Stack::with_capacity(options.max_stack_slots),
            options,
            globals: TableRef::new(),
            serialized_registry: Value::Nil,
            deserializers: FxHashMap::default(),
            call_depth: 0,
        }
    }

    /// Get VM options
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// Get capability flags
    pub fn capabilities(&self) -> Capabilities {
        self.options.capabilities
    }

    /// Get the version number written to snapshot headers
    pub fn version_number(&self) -> f64 {
        self.options.version_number
    }

    // ===== Globals =====

    /// Global table
    pub fn globals(&self) -> TableRef {
        self.globals.clone()
    }

    /// Read a global
    pub fn get_global(&self, name: &str) -> Value {
        self.globals.get_field(name)
    }

    /// Assign a global; nil removes it
    pub fn set_global(&self, name: &str, value: impl Into<Value>) {
        self.globals.set_field(name, value);
    }

    /// Value persisted alongside globals by whole-state snapshots
    pub fn serialized_registry(&self) -> Value {
        self.serialized_registry.clone()
    }

    /// Replace the serialized-registry slot
    pub fn set_serialized_registry(&mut self, value: Value) {
        self.serialized_registry = value;
    }

    // ===== Object creation =====

    /// Create an empty table
    pub fn create_table(&self) -> TableRef {
        TableRef::new()
    }

    /// Wrap a native function
    pub fn create_function(
        &self,
        name: &str,
        func: impl Fn(&mut Vm, Vec<Value>) -> VmResult<Vec<Value>> + 'static,
    ) -> FunctionRef {
        FunctionRef::native(name, func)
    }

    /// Create a fresh upvalue cell
    pub fn create_upvalue(&self, value: impl Into<Value>) -> UpvalueRef {
        UpvalueRef::new(value.into())
    }

    /// Instantiate a prototype over the given upvalue cells
    ///
    /// Passing the same cell to several closures makes them share the
    /// captured variable.
    ///
    /// # Errors
    ///
    /// Returns `VmError::RuntimeError` if the cell count does not match the
    /// prototype.
    pub fn create_closure(
        &self,
        proto: impl Into<Rc<Prototype>>,
        upvalues: Vec<UpvalueRef>,
    ) -> VmResult<FunctionRef> {
        let proto = proto.into();
        if upvalues.len() != proto.upvalue_count() {
            return Err(VmError::RuntimeError(format!(
                "function '{}' expects {} upvalues, got {}",
                proto.name(),
                proto.upvalue_count(),
                upvalues.len()
            )));
        }
        Ok(FunctionRef::scripted(proto, upvalues))
    }

    /// Box a native value as userdata
    pub fn create_userdata<T: Any>(&self, value: T, metatable: Option<TableRef>) -> UserdataRef {
        let userdata = UserdataRef::new(value);
        userdata.set_metatable(metatable);
        userdata
    }

    /// Create a thread handle
    pub fn create_thread(&self) -> ThreadRef {
        ThreadRef::new()
    }

    // ===== Calls =====

    /// Call a function with arguments, returning all results
    ///
    /// On error the value stack is restored to its depth before the call.
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` when `max_call_depth` is exceeded,
    /// or any error raised by the callee.
    pub fn call(&mut self, function: &FunctionRef, args: Vec<Value>) -> VmResult<Vec<Value>> {
        if self.call_depth >= self.options.max_call_depth {
            return Err(VmError::StackOverflow);
        }

        let depth = self.stack.depth();
        self.call_depth += 1;
        let result = match (function.native_fn(), function.prototype().cloned()) {
            (Some(func), _) => func(self, args),
            (None, Some(proto)) => self.execute(function, &proto, args),
            (None, None) => Err(VmError::RuntimeError(format!(
                "function '{}' has no body",
                function.name()
            ))),
        };
        self.call_depth -= 1;

        if result.is_err() {
            self.stack.truncate(depth);
        }
        result
    }

    /// Index `object[key]`, following `__index` metatable entries
    ///
    /// # Errors
    ///
    /// Returns `VmError::TypeError` if `object` cannot be indexed.
    pub fn index(&mut self, object: &Value, key: &Value) -> VmResult<Value> {
        let mut current = object.clone();
        for _ in 0..MAX_INDEX_CHAIN {
            let metatable = match &current {
                Value::Table(table) => {
                    let value = table.raw_get(key);
                    if !value.is_nil() {
                        return Ok(value);
                    }
                    table.metatable()
                }
                Value::Userdata(userdata) => userdata.metatable(),
                other => {
                    return Err(VmError::TypeError(format!(
                        "attempt to index a {} value",
                        other.type_name()
                    )))
                }
            };

            match metatable.map(|mt| mt.get_field("__index")) {
                None | Some(Value::Nil) if current.as_table().is_some() => return Ok(Value::Nil),
                None | Some(Value::Nil) => {
                    return Err(VmError::TypeError(format!(
                        "attempt to index a {} value",
                        current.type_name()
                    )))
                }
                Some(Value::Function(handler)) => {
                    let results = self.call(&handler, vec![current, key.clone()])?;
                    return Ok(results.into_iter().next().unwrap_or_default());
                }
                Some(next) => current = next,
            }
        }
        Err(VmError::RuntimeError(
            "'__index' chain too long; possible loop".to_string(),
        ))
    }

    // ===== Bytecode =====

    /// Stream a scripted function's bytecode to `sink`
    ///
    /// The sink may be invoked several times; each call carries one chunk.
    ///
    /// # Errors
    ///
    /// Returns `VmError::TypeError` for native functions, or the sink's
    /// I/O error.
    pub fn dump(
        &self,
        function: &FunctionRef,
        strip: bool,
        sink: &mut dyn FnMut(&[u8]) -> io::Result<()>,
    ) -> VmResult<()> {
        let proto = function
            .prototype()
            .ok_or_else(|| VmError::TypeError("unable to dump given function".to_string()))?;
        proto.dump(strip, sink)?;
        Ok(())
    }

    /// Load bytecode produced by [`Vm::dump`]
    ///
    /// The new closure gets fresh upvalue cells holding nil.
    ///
    /// # Errors
    ///
    /// Returns `VmError::InvalidBytecode` if the bytes do not form a valid
    /// prototype.
    pub fn load(&self, bytes: &[u8]) -> VmResult<FunctionRef> {
        let proto = Prototype::undump(bytes)?;
        let upvalues = (0..proto.upvalue_count())
            .map(|_| UpvalueRef::new(Value::Nil))
            .collect();
        self.create_closure(proto, upvalues)
    }

    // ===== Stack =====

    /// Push a value onto the host stack
    pub fn push(&mut self, value: impl Into<Value>) -> VmResult<()> {
        self.stack.push(value.into())
    }

    /// Pop the top value
    pub fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop()
    }

    /// Value at absolute stack position `index` (0 = bottom)
    pub fn stack_value(&self, index: usize) -> Option<Value> {
        self.stack.peek_at(index).ok().cloned()
    }

    /// Current stack depth
    pub fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Drop stack slots above `depth`
    pub fn truncate_stack(&mut self, depth: usize) {
        self.stack.truncate(depth);
    }

    // ===== Userdata deserializers =====

    /// Register the factory that rebuilds userdata of type `name`
    ///
    /// The factory receives the deserialized payload and must return the
    /// reconstructed userdata as its first result.
    pub fn register_userdata_deserializer(&mut self, name: impl AsRef<[u8]>, factory: FunctionRef) {
        self.deserializers.insert(name.as_ref().to_vec(), factory);
    }

    /// Factory registered for `name`
    pub fn userdata_deserializer(&self, name: &[u8]) -> Option<FunctionRef> {
        self.deserializers.get(name).cloned()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
