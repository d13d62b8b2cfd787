//! Buffer-object management shared by every user of one device.
//!
//! A [`BufferManager`] owns the buffer objects allocated through it and
//! serializes every operation on them behind one lock. The storage itself is
//! supplied by a [`BufferBackend`], selected when the manager is first
//! created for a device.
//!
//! Managers are found through an explicit [`Registry`] rather than a hidden
//! global: initializing the same device twice yields the same manager with
//! its reference count raised.


pub mod backend;
pub mod loader;
pub mod semaphore;
pub mod user_data;

use core::fmt;
use core::mem;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

pub use backend::{
    BoFlags, BoLock, BoPriv, BufferBackend, CacheFlags, DeviceKind, ManagerLock, MapOptions,
    MemType,
};
pub use loader::{load_backend, BackendProvider, LoaderConfig};
pub use semaphore::{LockStatus, SemaphoreConfig};
pub use user_data::{FreeFn, UserData};

use crate::list::{SlotKey, SlotList};
use crate::refcount::{RefCount, Release};
use crate::result::{Error, Result};
use crate::DeviceId;
use semaphore::NamedSemaphore;
use user_data::{Discarded, UserDataMap};

struct BoEntry {
    name: String,
    payload: BoPriv,
    count: Arc<RefCount>,
    user_data: UserDataMap,
}

struct ManagerState {
    backend: Box<dyn BufferBackend>,
    bos: SlotList<BoEntry>,
    sem: NamedSemaphore,
    destroyed: bool,
}

struct ManagerShared {
    device: DeviceId,
    refs: AtomicU32,
    state: Mutex<ManagerState>,
}

/// Handle to the buffer manager of one device.
///
/// Cloning the handle does not take a manager reference; references are
/// taken by [`Registry::init`] and dropped by [`Registry::destroy`].
#[derive(Clone)]
pub struct BufferManager(Arc<ManagerShared>);

impl fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferManager")
            .field("device", &self.0.device)
            .field("refs", &self.ref_count())
            .finish_non_exhaustive()
    }
}

impl PartialEq for BufferManager {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for BufferManager {}

impl BufferManager {
    fn new(device: DeviceId, backend: Box<dyn BufferBackend>, sem: SemaphoreConfig) -> Self {
        Self(Arc::new(ManagerShared {
            device,
            refs: AtomicU32::new(1),
            state: Mutex::new(ManagerState {
                backend,
                bos: SlotList::new(),
                sem: NamedSemaphore::new(sem),
                destroyed: false,
            }),
        }))
    }

    #[inline]
    pub fn device(&self) -> DeviceId {
        self.0.device
    }

    pub fn ref_count(&self) -> u32 {
        self.0.refs.load(Ordering::Acquire)
    }

    fn state(&self) -> Result<MutexGuard<'_, ManagerState>> {
        let state = self.0.state.lock();
        if state.destroyed {
            return Err(Error::AlreadyReleased);
        }
        Ok(state)
    }

    /// Number of live buffer objects owned by this manager.
    pub fn bo_count(&self) -> usize {
        self.0.state.lock().bos.len()
    }

    pub fn contains(&self, bo: &BufferObject) -> bool {
        self.owns(bo) && self.0.state.lock().bos.contains(bo.0.key)
    }

    fn owns(&self, bo: &BufferObject) -> bool {
        Weak::as_ptr(&bo.0.manager) == Arc::as_ptr(&self.0)
    }

    /// Takes the cross-process advisory lock.
    ///
    /// Uses the backend's own lock when it has one, the named semaphore
    /// otherwise. Locking twice without unlocking fails with
    /// [`Error::Busy`].
    pub fn lock(&self) -> Result<()> {
        let mut state = self.state()?;
        let ManagerState { backend, sem, .. } = &mut *state;
        match backend.manager_lock() {
            Some(lock) => lock.lock(),
            None => sem.lock(),
        }
    }

    pub fn unlock(&self) -> Result<()> {
        let mut state = self.state()?;
        let ManagerState { backend, sem, .. } = &mut *state;
        match backend.manager_lock() {
            Some(lock) => lock.unlock(),
            None => sem.unlock(),
        }
    }

    pub fn lock_status(&self) -> LockStatus {
        self.0.state.lock().sem.status()
    }

    /// Flushes caches of one buffer object, or of every buffer object when
    /// `bo` is `None`.
    pub fn cache_flush(&self, bo: Option<&BufferObject>, flags: CacheFlags) -> Result<()> {
        let mut state = self.state()?;
        let ManagerState { backend, bos, .. } = &mut *state;
        match bo {
            None => backend.cache_flush(None, flags | CacheFlags::ALL),
            Some(bo) => {
                if !self.owns(bo) {
                    return Err(Error::ManagerMismatch);
                }
                let entry = bos.get_mut(bo.0.key).ok_or(Error::AlreadyReleased)?;
                backend.cache_flush(Some(&mut entry.payload), flags)
            }
        }
    }

    pub fn bo_alloc(&self, name: &str, size: u32, flags: BoFlags) -> Result<BufferObject> {
        if size == 0 {
            return Err(Error::Invalid);
        }
        self.create_bo(name, |backend| backend.alloc(name, size, flags))
    }

    /// Wraps memory that already exists elsewhere.
    pub fn bo_attach(&self, name: &str, mem: MemType, size: u32, handle: u32) -> Result<BufferObject> {
        self.create_bo(name, |backend| backend.attach(name, mem, size, handle))
    }

    /// Opens a buffer object exported by another process.
    pub fn bo_import(&self, key: u32) -> Result<BufferObject> {
        self.create_bo("imported", |backend| backend.import(key))
    }

    fn create_bo(
        &self,
        name: &str,
        f: impl FnOnce(&mut dyn BufferBackend) -> Result<BoPriv>,
    ) -> Result<BufferObject> {
        let mut state = self.state()?;
        let ManagerState { backend, bos, .. } = &mut *state;
        bos.reserve()?;
        let payload = f(backend.as_mut()).map_err(|e| {
            log::error!("backend could not create buffer object {name}: {e}");
            e
        })?;
        let count = Arc::new(RefCount::new(1));
        let key = bos.push_back(BoEntry {
            name: name.to_owned(),
            payload,
            count: count.clone(),
            user_data: UserDataMap::default(),
        })?;
        log::trace!("created buffer object {name} on device {}", self.0.device.0);
        Ok(BufferObject(Arc::new(BoShared {
            key,
            count,
            manager: Arc::downgrade(&self.0),
        })))
    }

    /// Frees every remaining buffer object, then the backend and the
    /// semaphore.
    fn teardown(&self) {
        let mut discarded = Vec::new();
        {
            let mut state = self.0.state.lock();
            if state.destroyed {
                return;
            }
            let ManagerState {
                backend, bos, sem, ..
            } = &mut *state;
            for entry in bos.drain() {
                let refs = entry.count.release_all();
                log::warn!(
                    "buffer object {} leaked with {refs} references on device {}",
                    entry.name,
                    self.0.device.0,
                );
                backend.free(entry.payload);
                discarded.extend(entry.user_data.into_discarded());
            }
            backend.destroy();
            sem.close();
            state.destroyed = true;
        }
        run_discarded(discarded);
    }
}

fn run_discarded(discarded: impl IntoIterator<Item = Discarded>) {
    for d in discarded {
        d.run();
    }
}

struct BoShared {
    key: SlotKey,
    count: Arc<RefCount>,
    manager: Weak<ManagerShared>,
}

/// Handle to a buffer object.
///
/// The object lives from allocation until its reference count drops to
/// zero; cloning the handle does not take a reference.
#[derive(Clone)]
pub struct BufferObject(Arc<BoShared>);

impl fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferObject")
            .field("key", &self.0.key)
            .field("refs", &self.0.count.get())
            .finish_non_exhaustive()
    }
}

impl PartialEq for BufferObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for BufferObject {}

impl BufferObject {
    pub fn manager(&self) -> Result<BufferManager> {
        self.0
            .manager
            .upgrade()
            .map(BufferManager)
            .ok_or(Error::AlreadyReleased)
    }

    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.0.count.get()
    }

    pub fn reference(&self) -> Result<()> {
        self.0.count.acquire().map(|_| ())
    }

    /// Drops one reference. The last one frees the backend storage and
    /// every user-data value.
    pub fn unreference(&self) -> Result<Release> {
        let ret = self.0.count.release()?;
        if ret == Release::Dead {
            let mgr = self.manager()?;
            let discarded = {
                let mut state = mgr.0.state.lock();
                let ManagerState { backend, bos, .. } = &mut *state;
                match bos.remove(self.0.key) {
                    Some(entry) => {
                        log::trace!("freeing buffer object {}", entry.name);
                        backend.free(entry.payload);
                        entry.user_data.into_discarded()
                    }
                    None => Vec::new(),
                }
            };
            run_discarded(discarded);
        }
        Ok(ret)
    }

    fn with_entry<R>(
        &self,
        f: impl FnOnce(&mut dyn BufferBackend, &mut BoEntry) -> Result<R>,
    ) -> Result<R> {
        let mgr = self.manager()?;
        let mut state = mgr.state()?;
        let ManagerState { backend, bos, .. } = &mut *state;
        let entry = bos.get_mut(self.0.key).ok_or(Error::AlreadyReleased)?;
        f(backend.as_mut(), entry)
    }

    pub fn size(&self) -> Result<u32> {
        self.with_entry(|backend, entry| Ok(backend.size(&entry.payload)))
    }

    pub fn export(&self) -> Result<u32> {
        self.with_entry(|backend, entry| backend.export(&mut entry.payload))
    }

    pub fn handle(&self, device: DeviceKind) -> Result<u32> {
        self.with_entry(|backend, entry| backend.handle(&entry.payload, device))
    }

    /// Maps the object, running the backend's pre-map lock first if it has
    /// one.
    pub fn map(&self, device: DeviceKind, opt: MapOptions) -> Result<usize> {
        self.with_entry(|backend, entry| {
            if let Some(lock) = backend.bo_lock() {
                lock.lock(&mut entry.payload)?;
            }
            backend.map(&mut entry.payload, device, opt)
        })
    }

    /// Unmaps the object. The backend's post-unmap unlock runs even if the
    /// unmap itself failed.
    pub fn unmap(&self, device: DeviceKind) -> Result<()> {
        self.with_entry(|backend, entry| {
            let ret = backend.unmap(&mut entry.payload, device);
            let unlocked = match backend.bo_lock() {
                Some(lock) => lock.unlock(&mut entry.payload),
                None => Ok(()),
            };
            ret.and(unlocked)
        })
    }

    /// Exchanges the backend storage of two equally sized objects of the
    /// same manager. Rejected swaps leave both objects untouched.
    pub fn swap(&self, other: &BufferObject) -> Result<()> {
        if !Weak::ptr_eq(&self.0.manager, &other.0.manager) {
            return Err(Error::ManagerMismatch);
        }
        let mgr = self.manager()?;
        let mut state = mgr.state()?;
        let ManagerState { backend, bos, .. } = &mut *state;
        let a = bos.get(self.0.key).ok_or(Error::AlreadyReleased)?;
        let b = bos.get(other.0.key).ok_or(Error::AlreadyReleased)?;
        if backend.size(&a.payload) != backend.size(&b.payload) {
            return Err(Error::SizeMismatch);
        }
        if self.0.key == other.0.key {
            return Ok(());
        }
        let placeholder: BoPriv = Box::new(());
        let a = mem::replace(
            &mut bos.get_mut(self.0.key).ok_or(Error::AlreadyReleased)?.payload,
            placeholder,
        );
        let b = mem::replace(
            &mut bos.get_mut(other.0.key).ok_or(Error::AlreadyReleased)?.payload,
            a,
        );
        if let Some(entry) = bos.get_mut(self.0.key) {
            entry.payload = b;
        }
        Ok(())
    }

    /// Declares `key`. Values can be stored under it only after this.
    pub fn add_user_data(&self, key: u64, free: Option<FreeFn>) -> Result<()> {
        self.with_entry(|_, entry| entry.user_data.add(key, free))
    }

    /// Stores `data` under a declared key, freeing the previous value.
    pub fn set_user_data(&self, key: u64, data: UserData) -> Result<()> {
        let old = self.with_entry(|_, entry| entry.user_data.set(key, data))?;
        run_discarded(old);
        Ok(())
    }

    pub fn get_user_data(&self, key: u64) -> Result<Option<UserData>> {
        self.with_entry(|_, entry| entry.user_data.get(key))
    }

    /// Forgets `key`, freeing its current value.
    pub fn delete_user_data(&self, key: u64) -> Result<()> {
        let old = self.with_entry(|_, entry| entry.user_data.delete(key))?;
        run_discarded(old);
        Ok(())
    }
}

/// The set of live buffer managers, at most one per device.
pub struct Registry {
    loader: LoaderConfig,
    sem: SemaphoreConfig,
    managers: Mutex<SlotList<BufferManager>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("loader", &self.loader)
            .field("managers", &self.managers.lock().len())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(LoaderConfig::default(), SemaphoreConfig::default())
    }
}

impl Registry {
    pub fn new(loader: LoaderConfig, sem: SemaphoreConfig) -> Self {
        Self {
            loader,
            sem,
            managers: Mutex::new(SlotList::new()),
        }
    }

    pub fn loader_config(&self) -> &LoaderConfig {
        &self.loader
    }

    pub fn get(&self, device: DeviceId) -> Option<BufferManager> {
        self.managers
            .lock()
            .iter()
            .find(|(_, m)| m.device() == device)
            .map(|(_, m)| m.clone())
    }

    /// Returns the manager for `device`, loading a backend through
    /// `provider` if there is none yet.
    pub fn init(&self, device: DeviceId, provider: &dyn BackendProvider) -> Result<BufferManager> {
        self.init_with(device, || load_backend(&self.loader, provider, device))
    }

    /// Like [`Self::init`], with the backend constructed by `make`. `make`
    /// is only called when the device has no manager yet.
    pub fn init_with(
        &self,
        device: DeviceId,
        make: impl FnOnce() -> Result<Box<dyn BufferBackend>>,
    ) -> Result<BufferManager> {
        if device.0 < 0 {
            return Err(Error::Invalid);
        }
        let mut managers = self.managers.lock();
        if let Some((_, mgr)) = managers.iter().find(|(_, m)| m.device() == device) {
            let refs = mgr.0.refs.fetch_add(1, Ordering::AcqRel) + 1;
            log::info!("buffer manager ref: device {}, refs {refs}", device.0);
            return Ok(mgr.clone());
        }
        managers.reserve()?;
        log::info!("buffer manager init: device {}", device.0);
        let mgr = BufferManager::new(device, make()?, self.sem.clone());
        managers.push_back(mgr.clone())?;
        Ok(mgr)
    }

    /// Drops one manager reference. The last one frees every remaining
    /// buffer object (logging each as a leak), destroys the backend and
    /// removes the manager from the registry.
    pub fn destroy(&self, mgr: &BufferManager) -> Result<()> {
        let mut managers = self.managers.lock();
        let key = managers
            .iter()
            .find(|(_, m)| *m == mgr)
            .map(|(k, _)| k)
            .ok_or(Error::NonExist)?;
        let prev = mgr.0.refs.fetch_sub(1, Ordering::AcqRel);
        if prev > 1 {
            log::info!(
                "buffer manager unref: device {}, refs {}",
                mgr.device().0,
                prev - 1
            );
            return Ok(());
        }
        managers.remove(key);
        drop(managers);
        log::info!("buffer manager destroy: device {}", mgr.device().0);
        mgr.teardown();
        Ok(())
    }
}
