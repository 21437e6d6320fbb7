//! Object model: reference-typed heap objects
//!
//! Every table, function, upvalue cell, userdata and thread carries an
//! [`ObjectId`] assigned at allocation. Identity-keyed structures (the
//! serializer's reference table, upvalue sharing) key on that token rather
//! than on addresses.

mod function;
mod table;
mod userdata;

pub use function::{FunctionKind, FunctionRef, NativeFn, UpvalueId, UpvalueRef};
pub use table::TableRef;
pub use userdata::UserdataRef;

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable object identity token
///
/// Unique for the lifetime of the process, across all `Vm` instances.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Allocate a fresh identity
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        ObjectId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the object ID as a u64
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Coroutine thread handle
///
/// Threads are representable so that scripts can hold them, but the runtime
/// does not schedule them and the serializer refuses them.
#[derive(Clone)]
pub struct ThreadRef(Rc<ObjectId>);

impl ThreadRef {
    /// Create a new thread handle
    pub fn new() -> Self {
        ThreadRef(Rc::new(ObjectId::next()))
    }

    /// Object identity
    pub fn id(&self) -> ObjectId {
        *self.0
    }
}

impl Default for ThreadRef {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ids_are_unique() {
        let a = ObjectId::next();
        let b = ObjectId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_thread_identity_survives_clone() {
        let t = ThreadRef::new();
        assert_eq!(t.clone().id(), t.id());
        assert_ne!(ThreadRef::new().id(), t.id());
    }
}
