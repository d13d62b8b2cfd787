//! Process-wide registry of integer resource ids.
//!
//! Every resource that callers can name by number (CRTCs, connectors,
//! framebuffers, properties, ...) gets its id from a [`HandleTable`]. Ids
//! are handed out from a monotonically increasing counter starting at 1 and
//! are never recycled, so a stale id can only ever produce "not found".


use core::sync::atomic::{AtomicU32, Ordering};

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::props::PropertyRef;
use crate::result::{Error, Result};

/// Number of property slots reserved for a resource the first time a
/// property is attached to it.
const INITIAL_PROPERTY_SLOTS: usize = 8;

#[derive(Debug)]
struct Entry<T> {
    payload: T,
    props: Vec<PropertyRef>,
}

/// Maps non-zero `u32` ids to payloads of type `T`.
///
/// The table never owns the resource behind a payload: `T` is normally a
/// cheap handle (an arena key or an [`std::sync::Arc`]) and [`Self::delete`]
/// gives it back to the caller.
///
/// All operations take an internal lock, so one table can be shared between
/// threads and between subsystems that allocate ids concurrently.
#[derive(Debug)]
pub struct HandleTable<T> {
    next_id: AtomicU32,
    entries: Mutex<AHashMap<u32, Entry<T>>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            entries: Mutex::new(AHashMap::new()),
        }
    }

    /// Stores `payload` under a fresh id.
    ///
    /// Fails with [`Error::SystemMem`] once the id space is exhausted rather
    /// than wrapping around to ids that were already issued.
    pub fn allocate(&self, payload: T) -> Result<u32> {
        self.allocate_with(|_| payload)
    }

    /// Like [`Self::allocate`], for payloads that need to know their own id.
    pub fn allocate_with(&self, f: impl FnOnce(u32) -> T) -> Result<u32> {
        let id = self
            .next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
            .map_err(|_| Error::SystemMem)?;
        let mut entries = self.entries.lock();
        entries.try_reserve(1)?;
        entries.insert(
            id,
            Entry {
                payload: f(id),
                props: Vec::new(),
            },
        );
        Ok(id)
    }

    /// Removes an entry, returning its payload.
    ///
    /// The property list of the entry is dropped; the properties themselves
    /// are shared and stay alive as long as other resources refer to them.
    pub fn delete(&self, id: u32) -> Option<T> {
        self.entries.lock().remove(&id).map(|e| e.payload)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds `prop` to the property list of resource `id`.
    ///
    /// The list grows by doubling, starting from eight slots. Growth failure
    /// is reported instead of silently dropping the attachment.
    pub fn attach_property(&self, id: u32, prop: PropertyRef) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&id).ok_or(Error::NonExist)?;
        if entry.props.iter().any(|p| p.id() == prop.id()) {
            return Ok(());
        }
        if entry.props.len() == entry.props.capacity() {
            let grow = entry.props.capacity().max(INITIAL_PROPERTY_SLOTS);
            entry.props.try_reserve_exact(grow)?;
        }
        entry.props.push(prop);
        Ok(())
    }

    /// Snapshot of the properties attached to `id`, in attachment order.
    pub fn properties(&self, id: u32) -> Option<Vec<PropertyRef>> {
        self.entries.lock().get(&id).map(|e| e.props.clone())
    }
}

impl<T: Clone> HandleTable<T> {
    /// Returns a copy of the payload stored under `id`, if any.
    pub fn lookup(&self, id: u32) -> Option<T> {
        if id == 0 {
            return None;
        }
        self.entries.lock().get(&id).map(|e| e.payload.clone())
    }
}
