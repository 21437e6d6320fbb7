//! Session-scoped identity bookkeeping
//!
//! Writing maps each table, function and userdata identity to a serial
//! reference number (1, 2, 3, ... in first-visit order) and each upvalue
//! identity to the function slot that first carried it. Reading stores
//! reconstructed objects in a runtime table keyed by reference number.

use super::error::{FormatError, SerializeResult};
use crate::object::{FunctionRef, ObjectId, TableRef, UpvalueId, UserdataRef};
use crate::value::Value;
use rustc_hash::FxHashMap;

/// Reference-typed kinds tracked by identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ReferenceKind {
    Table,
    Function,
    Userdata,
}

/// Identity of a serialized object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ReferenceKey {
    kind: ReferenceKind,
    identity: ObjectId,
}

impl ReferenceKey {
    pub(crate) fn table(table: &TableRef) -> Self {
        Self {
            kind: ReferenceKind::Table,
            identity: table.id(),
        }
    }

    pub(crate) fn function(function: &FunctionRef) -> Self {
        Self {
            kind: ReferenceKind::Function,
            identity: function.id(),
        }
    }

    pub(crate) fn userdata(userdata: &UserdataRef) -> Self {
        Self {
            kind: ReferenceKind::Userdata,
            identity: userdata.id(),
        }
    }
}

/// Write-once map from identity to reference number
pub(crate) struct ReferenceTable {
    map: FxHashMap<ReferenceKey, i32>,
    next: i32,
}

impl ReferenceTable {
    pub(crate) fn new() -> Self {
        Self {
            map: FxHashMap::default(),
            next: 1,
        }
    }

    pub(crate) fn lookup(&self, key: &ReferenceKey) -> Option<i32> {
        self.map.get(key).copied()
    }

    /// Assign the next number; the key must not be mapped yet
    pub(crate) fn insert(&mut self, key: ReferenceKey) -> i32 {
        debug_assert!(!self.map.contains_key(&key));
        let number = self.next;
        self.next += 1;
        self.map.insert(key, number);
        number
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}

/// Function slot that first carried an upvalue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UpvalueLocation {
    /// Reference number of the owning function
    pub function: i32,
    /// 1-based upvalue index
    pub index: i32,
}

/// Map from upvalue identity to its first location
#[derive(Default)]
pub(crate) struct UpvalueTable {
    map: FxHashMap<UpvalueId, UpvalueLocation>,
}

impl UpvalueTable {
    pub(crate) fn lookup(&self, id: UpvalueId) -> Option<UpvalueLocation> {
        self.map.get(&id).copied()
    }

    pub(crate) fn insert(&mut self, id: UpvalueId, location: UpvalueLocation) {
        self.map.entry(id).or_insert(location);
    }
}

/// Reconstructed objects by reference number
///
/// Backed by a runtime table so the objects stay reachable from the
/// interpreter for the duration of the session.
pub(crate) struct ReferenceHolder {
    table: TableRef,
}

impl ReferenceHolder {
    pub(crate) fn new(table: TableRef) -> Self {
        Self { table }
    }

    pub(crate) fn store_at(&self, number: i32, value: Value) -> SerializeResult<()> {
        if number <= 0 {
            return Err(FormatError::InvalidReference(number).into());
        }
        self.table.raw_set(Value::Integer(number as i64), value)?;
        Ok(())
    }

    /// Fails on empty slots, so a corrupt number is caught here
    pub(crate) fn fetch_at(&self, number: i32) -> SerializeResult<Value> {
        match self.table.raw_get(&Value::Integer(number as i64)) {
            Value::Nil => Err(FormatError::InvalidReference(number).into()),
            value => Ok(value),
        }
    }
}
