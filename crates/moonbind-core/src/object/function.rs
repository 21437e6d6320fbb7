//! Functions and upvalue cells

use super::ObjectId;
use crate::value::Value;
use crate::vm::{Prototype, Vm};
use crate::{VmError, VmResult};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Signature of a native function
///
/// Receives the owning VM and the call arguments, returns any number of results.
pub type NativeFn = dyn Fn(&mut Vm, Vec<Value>) -> VmResult<Vec<Value>>;

/// Identity of a captured variable
///
/// Two closures that capture the same variable report the same `UpvalueId`
/// for the corresponding slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpvalueId(ObjectId);

impl UpvalueId {
    /// Get the identity as a u64
    pub fn as_u64(self) -> u64 {
        self.0.as_u64()
    }
}

struct UpvalueCell {
    id: ObjectId,
    value: RefCell<Value>,
}

/// Shared, mutable upvalue cell
#[derive(Clone)]
pub struct UpvalueRef(Rc<UpvalueCell>);

impl UpvalueRef {
    /// Create a cell holding `value`
    pub fn new(value: Value) -> Self {
        UpvalueRef(Rc::new(UpvalueCell {
            id: ObjectId::next(),
            value: RefCell::new(value),
        }))
    }

    /// Identity of the captured variable
    pub fn id(&self) -> UpvalueId {
        UpvalueId(self.0.id)
    }

    /// Current value
    pub fn get(&self) -> Value {
        self.0.value.borrow().clone()
    }

    /// Replace the value; visible through every closure sharing this cell
    pub fn set(&self, value: Value) {
        *self.0.value.borrow_mut() = value;
    }

    /// Check if two handles refer to the same cell
    pub fn ptr_eq(&self, other: &UpvalueRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for UpvalueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upvalue({:#x})", self.0.id.as_u64())
    }
}

/// Implementation kind of a function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Host function; opaque to the serializer
    Native,
    /// Bytecode closure
    Scripted,
}

enum Body {
    Native {
        name: String,
        func: Rc<NativeFn>,
    },
    Scripted {
        proto: Rc<Prototype>,
        upvalues: RefCell<Vec<UpvalueRef>>,
    },
}

struct FunctionObject {
    id: ObjectId,
    body: Body,
}

/// Function handle
#[derive(Clone)]
pub struct FunctionRef(Rc<FunctionObject>);

impl FunctionRef {
    /// Wrap a native function
    pub fn native(
        name: impl Into<String>,
        func: impl Fn(&mut Vm, Vec<Value>) -> VmResult<Vec<Value>> + 'static,
    ) -> Self {
        FunctionRef(Rc::new(FunctionObject {
            id: ObjectId::next(),
            body: Body::Native {
                name: name.into(),
                func: Rc::new(func),
            },
        }))
    }

    /// Build a closure; the caller guarantees `upvalues.len() == proto.upvalue_count()`
    pub(crate) fn scripted(proto: Rc<Prototype>, upvalues: Vec<UpvalueRef>) -> Self {
        debug_assert_eq!(upvalues.len(), proto.upvalue_count());
        FunctionRef(Rc::new(FunctionObject {
            id: ObjectId::next(),
            body: Body::Scripted {
                proto,
                upvalues: RefCell::new(upvalues),
            },
        }))
    }

    /// Object identity
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    /// Check if two handles refer to the same function
    pub fn ptr_eq(&self, other: &FunctionRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Native or scripted
    pub fn kind(&self) -> FunctionKind {
        match self.0.body {
            Body::Native { .. } => FunctionKind::Native,
            Body::Scripted { .. } => FunctionKind::Scripted,
        }
    }

    /// Check if this is a host function
    pub fn is_native(&self) -> bool {
        self.kind() == FunctionKind::Native
    }

    /// Function name (prototype name for closures)
    pub fn name(&self) -> &str {
        match &self.0.body {
            Body::Native { name, .. } => name,
            Body::Scripted { proto, .. } => proto.name(),
        }
    }

    /// Prototype of a scripted function
    pub fn prototype(&self) -> Option<&Rc<Prototype>> {
        match &self.0.body {
            Body::Scripted { proto, .. } => Some(proto),
            Body::Native { .. } => None,
        }
    }

    pub(crate) fn native_fn(&self) -> Option<Rc<NativeFn>> {
        match &self.0.body {
            Body::Native { func, .. } => Some(func.clone()),
            Body::Scripted { .. } => None,
        }
    }

    /// Number of upvalue slots (always 0 for native functions)
    pub fn upvalue_count(&self) -> usize {
        match &self.0.body {
            Body::Scripted { upvalues, .. } => upvalues.borrow().len(),
            Body::Native { .. } => 0,
        }
    }

    /// Upvalue cell at 1-based index `n`
    pub fn upvalue(&self, n: usize) -> Option<UpvalueRef> {
        match &self.0.body {
            Body::Scripted { upvalues, .. } => {
                n.checked_sub(1).and_then(|i| upvalues.borrow().get(i).cloned())
            }
            Body::Native { .. } => None,
        }
    }

    /// Value of the upvalue at 1-based index `n`
    pub fn get_upvalue(&self, n: usize) -> Option<Value> {
        self.upvalue(n).map(|cell| cell.get())
    }

    /// Assign the upvalue at 1-based index `n`
    ///
    /// # Errors
    ///
    /// Returns `VmError::RuntimeError` if `n` is out of range.
    pub fn set_upvalue(&self, n: usize, value: Value) -> VmResult<()> {
        let cell = self.upvalue(n).ok_or_else(|| {
            VmError::RuntimeError(format!("upvalue index {} out of range", n))
        })?;
        cell.set(value);
        Ok(())
    }

    /// Identity of the variable captured at 1-based index `n`
    pub fn upvalue_id(&self, n: usize) -> Option<UpvalueId> {
        self.upvalue(n).map(|cell| cell.id())
    }

    /// Make upvalue `n` of this function refer to upvalue `m` of `other`
    ///
    /// # Errors
    ///
    /// Returns `VmError::RuntimeError` if either index is out of range.
    pub fn join_upvalue(&self, n: usize, other: &FunctionRef, m: usize) -> VmResult<()> {
        let shared = other.upvalue(m).ok_or_else(|| {
            VmError::RuntimeError(format!("upvalue index {} out of range", m))
        })?;
        match &self.0.body {
            Body::Scripted { upvalues, .. } => {
                let mut upvalues = upvalues.borrow_mut();
                let slot = n
                    .checked_sub(1)
                    .and_then(|i| upvalues.get_mut(i))
                    .ok_or_else(|| {
                        VmError::RuntimeError(format!("upvalue index {} out of range", n))
                    })?;
                *slot = shared;
                Ok(())
            }
            Body::Native { .. } => Err(VmError::TypeError(
                "native functions have no upvalues".to_string(),
            )),
        }
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "function({:#x}, {:?} {})",
            self.id().as_u64(),
            self.kind(),
            self.name()
        )
    }
}
