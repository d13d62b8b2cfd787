//! Explicit reference counting for kernel-backed objects.
//!
//! GEM objects, surfaces and fences are shared between callers that take and
//! drop references explicitly, mirroring the kernel's own ownership model.
//! Dropping the last reference runs the payload's [`Teardown`] exactly once;
//! dropping a reference that no longer exists is reported as
//! [`Error::AlreadyReleased`] instead of corrupting the count.


use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::result::{Error, Result};

/// Outcome of dropping one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other references remain; carries the new count.
    Alive(u32),
    /// That was the last reference.
    Dead,
}

/// An atomic reference count that refuses to go below zero or to be revived
/// once it has reached zero.
#[derive(Debug)]
pub struct RefCount(AtomicU32);

impl RefCount {
    pub const fn new(initial: u32) -> Self {
        Self(AtomicU32::new(initial))
    }

    #[inline]
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.get() == 0
    }

    /// Takes one more reference. Fails if the count has already reached zero.
    pub fn acquire(&self) -> Result<u32> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match n {
                0 => None,
                n => n.checked_add(1),
            })
            .map(|prev| prev + 1)
            .map_err(|n| match n {
                0 => Error::AlreadyReleased,
                _ => Error::SystemMem,
            })
    }

    /// Drops one reference.
    pub fn release(&self) -> Result<Release> {
        match self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => Ok(Release::Dead),
            Ok(prev) => Ok(Release::Alive(prev - 1)),
            Err(_) => Err(Error::AlreadyReleased),
        }
    }

    /// Drops every remaining reference at once, returning how many there
    /// were. Used when an owner is torn down while objects are still
    /// referenced.
    pub fn release_all(&self) -> u32 {
        self.0.swap(0, Ordering::AcqRel)
    }
}

/// Cleanup run when the last reference to a [`RefCounted`] goes away.
pub trait Teardown {
    fn teardown(self);
}

/// A payload shared through explicit [`RefCounted::reference`] and
/// [`RefCounted::unreference`] calls.
///
/// The `Arc` that holds a `RefCounted` only keeps the memory alive; the
/// logical lifetime is governed by the count, which starts at 1.
#[derive(Debug)]
pub struct RefCounted<T: Teardown> {
    count: RefCount,
    payload: Mutex<Option<T>>,
}

impl<T: Teardown> RefCounted<T> {
    pub fn create(payload: T) -> Arc<Self> {
        Arc::new(Self {
            count: RefCount::new(1),
            payload: Mutex::new(Some(payload)),
        })
    }

    /// Creates an object that starts out with `initial` references.
    pub fn with_count(payload: T, initial: u32) -> Result<Arc<Self>> {
        if initial == 0 {
            return Err(Error::Invalid);
        }
        Ok(Arc::new(Self {
            count: RefCount::new(initial),
            payload: Mutex::new(Some(payload)),
        }))
    }

    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.count.get()
    }

    pub fn is_alive(&self) -> bool {
        !self.count.is_dead()
    }

    pub fn reference(&self) -> Result<()> {
        self.count.acquire().map(|_| ())
    }

    /// Drops one reference, tearing the payload down if it was the last.
    pub fn unreference(&self) -> Result<Release> {
        let ret = self.count.release()?;
        if ret == Release::Dead {
            if let Some(payload) = self.payload.lock().take() {
                payload.teardown();
            }
        }
        Ok(ret)
    }

    /// Locks the payload. Fails once the object has been torn down.
    pub fn lock(&self) -> Result<MappedMutexGuard<'_, T>> {
        MutexGuard::try_map(self.payload.lock(), |p| p.as_mut())
            .map_err(|_| Error::AlreadyReleased)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }
}

/// Takes a reference on `obj` if there is one. A missing object is not an
/// error, so call sites that only sometimes hold an object stay simple.
pub fn ref_opt<T: Teardown>(obj: Option<&RefCounted<T>>) -> Result<()> {
    match obj {
        Some(obj) => obj.reference(),
        None => Ok(()),
    }
}

/// Drops a reference on `obj` if there is one.
pub fn unref_opt<T: Teardown>(obj: Option<&RefCounted<T>>) -> Result<Option<Release>> {
    match obj {
        Some(obj) => obj.unreference().map(Some),
        None => Ok(None),
    }
}
