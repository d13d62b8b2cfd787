use core::ptr::NonNull;
use std::ffi::CString;

use uapi::{c, Errno};

use crate::result::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemaphoreConfig {
    /// POSIX name of the semaphore, shared by every process using the
    /// manager.
    pub name: String,
    /// How often an interrupted wait or post is retried before giving up.
    pub max_retries: u32,
}

impl Default for SemaphoreConfig {
    fn default() -> Self {
        Self {
            name: "/pixmap_1".to_owned(),
            max_retries: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked,
    Locked,
}

#[derive(Debug)]
struct RawSem(NonNull<c::sem_t>);

// The handle is only ever used under the owning manager's lock.
unsafe impl Send for RawSem {}

/// A cross-process advisory lock backed by a named POSIX semaphore.
///
/// The semaphore is opened on first use, so managers that never lock never
/// touch the shared namespace.
#[derive(Debug)]
pub(crate) struct NamedSemaphore {
    config: SemaphoreConfig,
    sem: Option<RawSem>,
    status: LockStatus,
}

impl NamedSemaphore {
    pub(crate) fn new(config: SemaphoreConfig) -> Self {
        Self {
            config,
            sem: None,
            status: LockStatus::Unlocked,
        }
    }

    pub(crate) fn status(&self) -> LockStatus {
        self.status
    }

    fn open(&mut self) -> Result<NonNull<c::sem_t>> {
        if let Some(sem) = &self.sem {
            return Ok(sem.0);
        }
        let name = CString::new(self.config.name.as_str()).map_err(|_| Error::Invalid)?;
        let sem = unsafe {
            c::sem_open(
                name.as_ptr(),
                c::O_CREAT,
                0o777 as c::c_uint,
                1 as c::c_uint,
            )
        };
        if sem == c::SEM_FAILED {
            let err = Errno::default();
            log::error!("could not open semaphore {}: {}", self.config.name, err.0);
            return Err(linux_io::result::Error(err.0).into());
        }
        let sem = NonNull::new(sem).ok_or(Error::SystemMem)?;
        log::debug!("opened semaphore {}", self.config.name);
        self.sem = Some(RawSem(sem));
        self.status = LockStatus::Unlocked;
        Ok(sem)
    }

    /// Runs `op` until it succeeds, fails with something other than
    /// `EINTR`, or the retry budget is spent.
    fn retry(&self, what: &str, op: impl Fn() -> c::c_int) -> Result<()> {
        let mut retries = self.config.max_retries;
        loop {
            if op() == 0 {
                return Ok(());
            }
            let err = Errno::default();
            if err.0 != c::EINTR || retries == 0 {
                log::warn!(
                    "semaphore {} {what} failed after {} retries: {}",
                    self.config.name,
                    self.config.max_retries - retries,
                    err.0,
                );
                return Err(linux_io::result::Error(err.0).into());
            }
            retries -= 1;
        }
    }

    pub(crate) fn lock(&mut self) -> Result<()> {
        if self.status != LockStatus::Unlocked {
            return Err(Error::Busy);
        }
        let sem = self.open()?;
        self.retry("wait", || unsafe { c::sem_wait(sem.as_ptr()) })?;
        self.status = LockStatus::Locked;
        Ok(())
    }

    pub(crate) fn unlock(&mut self) -> Result<()> {
        if self.status != LockStatus::Locked {
            return Err(Error::Invalid);
        }
        let sem = self.sem.as_ref().ok_or(Error::Invalid)?.0;
        self.retry("post", || unsafe { c::sem_post(sem.as_ptr()) })?;
        self.status = LockStatus::Unlocked;
        Ok(())
    }

    /// Releases the lock if held, then closes and unlinks the semaphore.
    pub(crate) fn close(&mut self) {
        if self.status == LockStatus::Locked {
            if let Err(e) = self.unlock() {
                log::warn!("could not release semaphore {}: {e}", self.config.name);
            }
        }
        let Some(sem) = self.sem.take() else {
            return;
        };
        unsafe {
            c::sem_close(sem.0.as_ptr());
        }
        if let Ok(name) = CString::new(self.config.name.as_str()) {
            unsafe {
                c::sem_unlink(name.as_ptr());
            }
        }
        self.status = LockStatus::Unlocked;
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        self.close();
    }
}
