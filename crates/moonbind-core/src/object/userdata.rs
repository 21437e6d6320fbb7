//! Userdata: opaque native objects

use super::{ObjectId, TableRef};
use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

struct UserdataObject {
    id: ObjectId,
    type_name: &'static str,
    data: RefCell<Box<dyn Any>>,
    metatable: RefCell<Option<TableRef>>,
}

/// Userdata handle
///
/// The runtime cannot look inside a userdata; scripts reach it only through
/// its metatable.
#[derive(Clone)]
pub struct UserdataRef(Rc<UserdataObject>);

impl UserdataRef {
    /// Box a native value
    pub fn new<T: Any>(value: T) -> Self {
        UserdataRef(Rc::new(UserdataObject {
            id: ObjectId::next(),
            type_name: std::any::type_name::<T>(),
            data: RefCell::new(Box::new(value)),
            metatable: RefCell::new(None),
        }))
    }

    /// Object identity
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    /// Check if two handles refer to the same userdata
    pub fn ptr_eq(&self, other: &UserdataRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Rust type name of the boxed value
    pub fn rust_type_name(&self) -> &'static str {
        self.0.type_name
    }

    /// Check the boxed value's type
    pub fn is<T: Any>(&self) -> bool {
        self.0.data.borrow().is::<T>()
    }

    /// Borrow the boxed value if it has type `T`
    ///
    /// Returns `None` on a type mismatch or if the value is mutably borrowed.
    pub fn borrow<T: Any>(&self) -> Option<Ref<'_, T>> {
        let data = self.0.data.try_borrow().ok()?;
        Ref::filter_map(data, |d| d.downcast_ref::<T>()).ok()
    }

    /// Mutably borrow the boxed value if it has type `T`
    ///
    /// Returns `None` on a type mismatch or if the value is already borrowed.
    pub fn borrow_mut<T: Any>(&self) -> Option<RefMut<'_, T>> {
        let data = self.0.data.try_borrow_mut().ok()?;
        RefMut::filter_map(data, |d| d.downcast_mut::<T>()).ok()
    }

    /// Current metatable
    pub fn metatable(&self) -> Option<TableRef> {
        self.0.metatable.borrow().clone()
    }

    /// Replace the metatable
    pub fn set_metatable(&self, metatable: Option<TableRef>) {
        *self.0.metatable.borrow_mut() = metatable;
    }
}

impl fmt::Debug for UserdataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "userdata({:#x}, {})", self.id().as_u64(), self.0.type_name)
    }
}
