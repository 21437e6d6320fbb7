//! Tables: the runtime's only structured data type

use super::ObjectId;
use crate::value::{float_to_integer, Value, VmString};
use crate::{VmError, VmResult};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Hashable form of a non-nil, non-NaN key
///
/// Floats with an integral value hash as the equal integer so `t[1]` and
/// `t[1.0]` address the same slot.
#[derive(Clone, PartialEq, Eq, Hash)]
enum TableKey {
    Boolean(bool),
    Integer(i64),
    Float(u64),
    String(VmString),
    Object(ObjectId),
}

impl TableKey {
    fn from_value(key: &Value) -> Option<Self> {
        Some(match key {
            Value::Nil => return None,
            Value::Boolean(b) => TableKey::Boolean(*b),
            Value::Integer(i) => TableKey::Integer(*i),
            Value::Number(n) if n.is_nan() => return None,
            Value::Number(n) => match float_to_integer(*n) {
                Some(i) => TableKey::Integer(i),
                None => TableKey::Float(n.to_bits()),
            },
            Value::String(s) => TableKey::String(s.clone()),
            Value::Table(t) => TableKey::Object(t.id()),
            Value::Function(f) => TableKey::Object(f.id()),
            Value::Userdata(u) => TableKey::Object(u.id()),
            Value::Thread(t) => TableKey::Object(t.id()),
        })
    }
}

#[derive(Default)]
struct TableInner {
    /// Slots in insertion order; a nil value marks a dead slot
    entries: Vec<(Value, Value)>,
    index: FxHashMap<TableKey, usize>,
    live: usize,
    metatable: Option<TableRef>,
}

impl TableInner {
    fn set(&mut self, key: TableKey, raw_key: Value, value: Value) {
        match self.index.get(&key) {
            Some(&slot) => {
                let was_live = !self.entries[slot].1.is_nil();
                let is_live = !value.is_nil();
                self.entries[slot].1 = value;
                match (was_live, is_live) {
                    (true, false) => self.live -= 1,
                    (false, true) => self.live += 1,
                    _ => {}
                }
                if !is_live {
                    self.maybe_compact();
                }
            }
            None if value.is_nil() => {}
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((raw_key, value));
                self.live += 1;
            }
        }
    }

    /// Drop dead slots once they dominate the table
    fn maybe_compact(&mut self) {
        let dead = self.entries.len() - self.live;
        if dead < 8 || dead <= self.live {
            return;
        }
        self.entries.retain(|(_, v)| !v.is_nil());
        self.index.clear();
        for (slot, (k, _)) in self.entries.iter().enumerate() {
            if let Some(key) = TableKey::from_value(k) {
                self.index.insert(key, slot);
            }
        }
    }
}

/// Table handle
///
/// Cloning the handle aliases the same table; identity is preserved.
#[derive(Clone)]
pub struct TableRef(Rc<TableObject>);

struct TableObject {
    id: ObjectId,
    inner: RefCell<TableInner>,
}

impl TableRef {
    /// Create a new empty table
    pub fn new() -> Self {
        TableRef(Rc::new(TableObject {
            id: ObjectId::next(),
            inner: RefCell::new(TableInner::default()),
        }))
    }

    /// Object identity
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    /// Check if two handles refer to the same table
    pub fn ptr_eq(&self, other: &TableRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Read a key without metamethods; missing keys read as nil
    pub fn raw_get(&self, key: &Value) -> Value {
        let Some(key) = TableKey::from_value(key) else {
            return Value::Nil;
        };
        let inner = self.0.inner.borrow();
        match inner.index.get(&key) {
            Some(&slot) => inner.entries[slot].1.clone(),
            None => Value::Nil,
        }
    }

    /// Write a key without metamethods; a nil value removes the key
    ///
    /// # Errors
    ///
    /// Returns `VmError::RuntimeError` if the key is nil or NaN.
    pub fn raw_set(&self, key: Value, value: Value) -> VmResult<()> {
        let table_key = match TableKey::from_value(&key) {
            Some(k) => k,
            None if key.is_nil() => {
                return Err(VmError::RuntimeError("table index is nil".to_string()))
            }
            None => return Err(VmError::RuntimeError("table index is NaN".to_string())),
        };
        self.0.inner.borrow_mut().set(table_key, key, value);
        Ok(())
    }

    /// Read a string-keyed field
    pub fn get_field(&self, name: &str) -> Value {
        self.raw_get(&Value::from(name))
    }

    /// Write a string-keyed field
    pub fn set_field(&self, name: &str, value: impl Into<Value>) {
        let key = VmString::from(name);
        self.0
            .inner
            .borrow_mut()
            .set(TableKey::String(key.clone()), Value::String(key), value.into());
    }

    /// Snapshot of live key/value pairs in the table's iteration order
    pub fn pairs(&self) -> Vec<(Value, Value)> {
        self.0
            .inner
            .borrow()
            .entries
            .iter()
            .filter(|(_, v)| !v.is_nil())
            .cloned()
            .collect()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.0.inner.borrow().live
    }

    /// Check if the table has no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Border of the sequence part: largest `n` with `t[1..=n]` all non-nil
    pub fn raw_len(&self) -> usize {
        let inner = self.0.inner.borrow();
        let mut n = 0usize;
        while let Some(&slot) = inner.index.get(&TableKey::Integer(n as i64 + 1)) {
            if inner.entries[slot].1.is_nil() {
                break;
            }
            n += 1;
        }
        n
    }

    /// Current metatable
    pub fn metatable(&self) -> Option<TableRef> {
        self.0.inner.borrow().metatable.clone()
    }

    /// Replace the metatable
    pub fn set_metatable(&self, metatable: Option<TableRef>) {
        self.0.inner.borrow_mut().metatable = metatable;
    }
}

impl Default for TableRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table({:#x}, len={})", self.id().as_u64(), self.len())
    }
}
