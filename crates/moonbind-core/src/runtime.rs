//! Runtime capability surface
//!
//! [`Runtime`] is everything the snapshot serializer needs from an
//! interpreter. Optional features are described by [`Capabilities`] and the
//! capability-gated operations have provided implementations that refuse
//! when the flag is off, so implementors only supply the raw mechanism.

use crate::{
    object::{FunctionRef, TableRef, UpvalueId},
    value::Value,
    vm::{Capabilities, Vm},
    VmError, VmResult,
};
use std::io;

/// Interpreter operations used by the serializer
pub trait Runtime {
    /// Optional features of this runtime
    fn capabilities(&self) -> Capabilities;

    /// Version number recorded in snapshot headers
    fn version_number(&self) -> f64;

    // ===== Stack =====

    /// Current stack depth
    fn stack_depth(&self) -> usize;

    /// Value at absolute stack position `index` (0 = bottom)
    fn stack_value(&self, index: usize) -> Option<Value>;

    /// Push a value
    fn push_value(&mut self, value: Value) -> VmResult<()>;

    /// Drop slots above `depth`
    fn truncate_stack(&mut self, depth: usize);

    // ===== Environment =====

    /// Global table
    fn globals(&self) -> TableRef;

    /// Application slot persisted with whole-state snapshots
    fn serialized_registry(&self) -> Value;

    /// Replace the application slot
    fn set_serialized_registry(&mut self, value: Value);

    /// Create an empty table
    fn create_table(&mut self) -> TableRef;

    /// Call a function, returning all results
    fn call_function(&mut self, function: &FunctionRef, args: Vec<Value>) -> VmResult<Vec<Value>>;

    // ===== Functions =====

    /// Stream a scripted function's bytecode, one chunk per sink call
    fn dump_function(
        &self,
        function: &FunctionRef,
        sink: &mut dyn FnMut(&[u8]) -> io::Result<()>,
    ) -> VmResult<()>;

    /// Rebuild a function from concatenated dump chunks
    fn load_function(&mut self, bytes: &[u8]) -> VmResult<FunctionRef>;

    /// Factory for userdata of type `name`
    fn userdata_deserializer(&self, name: &[u8]) -> Option<FunctionRef>;

    // ===== Upvalues (capability-gated) =====

    /// Identity of upvalue `n` (1-based); `None` without `upvalue_id`
    fn upvalue_id(&self, function: &FunctionRef, n: usize) -> Option<UpvalueId> {
        if !self.capabilities().upvalue_id {
            return None;
        }
        function.upvalue_id(n)
    }

    /// Value of upvalue `n` (1-based); `None` without `upvalue_access`
    fn get_upvalue(&self, function: &FunctionRef, n: usize) -> Option<Value> {
        if !self.capabilities().upvalue_access {
            return None;
        }
        function.get_upvalue(n)
    }

    /// Assign upvalue `n` (1-based)
    fn set_upvalue(&mut self, function: &FunctionRef, n: usize, value: Value) -> VmResult<()> {
        if !self.capabilities().upvalue_access {
            return Err(VmError::RuntimeError(
                "upvalue access not supported".to_string(),
            ));
        }
        function.set_upvalue(n, value)
    }

    /// Make upvalue `n` of `function` share upvalue `m` of `other`
    fn join_upvalues(
        &mut self,
        function: &FunctionRef,
        n: usize,
        other: &FunctionRef,
        m: usize,
    ) -> VmResult<()> {
        if !self.capabilities().upvalue_id {
            return Err(VmError::RuntimeError(
                "upvalue joining not supported".to_string(),
            ));
        }
        function.join_upvalue(n, other, m)
    }
}

impl Runtime for Vm {
    fn capabilities(&self) -> Capabilities {
        Vm::capabilities(self)
    }

    fn version_number(&self) -> f64 {
        Vm::version_number(self)
    }

    fn stack_depth(&self) -> usize {
        Vm::stack_depth(self)
    }

    fn stack_value(&self, index: usize) -> Option<Value> {
        Vm::stack_value(self, index)
    }

    fn push_value(&mut self, value: Value) -> VmResult<()> {
        self.push(value)
    }

    fn truncate_stack(&mut self, depth: usize) {
        Vm::truncate_stack(self, depth)
    }

    fn globals(&self) -> TableRef {
        Vm::globals(self)
    }

    fn serialized_registry(&self) -> Value {
        Vm::serialized_registry(self)
    }

    fn set_serialized_registry(&mut self, value: Value) {
        Vm::set_serialized_registry(self, value)
    }

    fn create_table(&mut self) -> TableRef {
        Vm::create_table(self)
    }

    fn call_function(&mut self, function: &FunctionRef, args: Vec<Value>) -> VmResult<Vec<Value>> {
        self.call(function, args)
    }

    fn dump_function(
        &self,
        function: &FunctionRef,
        sink: &mut dyn FnMut(&[u8]) -> io::Result<()>,
    ) -> VmResult<()> {
        self.dump(function, false, sink)
    }

    fn load_function(&mut self, bytes: &[u8]) -> VmResult<FunctionRef> {
        self.load(bytes)
    }

    fn userdata_deserializer(&self, name: &[u8]) -> Option<FunctionRef> {
        Vm::userdata_deserializer(self, name)
    }
}
