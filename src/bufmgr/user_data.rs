use core::any::Any;
use core::fmt;
use std::sync::Arc;

use ahash::AHashMap;

use crate::result::{Error, Result};

pub type UserData = Arc<dyn Any + Send + Sync>;

/// Called with a value when it is replaced, deleted, or its buffer object
/// is torn down.
pub type FreeFn = Arc<dyn Fn(UserData) + Send + Sync>;

struct Entry {
    free: Option<FreeFn>,
    data: Option<UserData>,
}

/// A value being discarded together with the function that frees it.
///
/// Returned instead of being freed in place so the caller can run the free
/// function after releasing its locks.
#[must_use]
pub(crate) struct Discarded {
    free: Option<FreeFn>,
    data: UserData,
}

impl Discarded {
    pub(crate) fn run(self) {
        if let Some(free) = self.free {
            free(self.data);
        }
    }
}

/// Keyed side table of a buffer object.
///
/// A key is first declared with [`Self::add`] and only then accepts values.
#[derive(Default)]
pub(crate) struct UserDataMap {
    entries: AHashMap<u64, Entry>,
}

impl fmt::Debug for UserDataMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl UserDataMap {
    pub(crate) fn add(&mut self, key: u64, free: Option<FreeFn>) -> Result<()> {
        if self.entries.contains_key(&key) {
            return Err(Error::Invalid);
        }
        self.entries.try_reserve(1)?;
        self.entries.insert(key, Entry { free, data: None });
        Ok(())
    }

    /// Stores `data` under `key`, handing back the previous value for
    /// freeing.
    pub(crate) fn set(&mut self, key: u64, data: UserData) -> Result<Option<Discarded>> {
        let entry = self.entries.get_mut(&key).ok_or(Error::NotDeclared)?;
        let old = entry.data.replace(data);
        Ok(old.map(|data| Discarded {
            free: entry.free.clone(),
            data,
        }))
    }

    /// `Ok(None)` means the key is declared but holds no value yet.
    pub(crate) fn get(&self, key: u64) -> Result<Option<UserData>> {
        let entry = self.entries.get(&key).ok_or(Error::NonExist)?;
        Ok(entry.data.clone())
    }

    pub(crate) fn delete(&mut self, key: u64) -> Result<Option<Discarded>> {
        let entry = self.entries.remove(&key).ok_or(Error::NonExist)?;
        Ok(entry.data.map(|data| Discarded {
            free: entry.free,
            data,
        }))
    }

    /// Consumes the map, returning the values that need freeing.
    pub(crate) fn into_discarded(self) -> Vec<Discarded> {
        self.entries
            .into_iter()
            .filter_map(|(_, e)| {
                e.data.map(|data| Discarded {
                    free: e.free,
                    data,
                })
            })
            .collect()
    }
}
