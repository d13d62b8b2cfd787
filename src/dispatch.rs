//! Routing of device requests to in-process handlers.
//!
//! A [`Dispatcher`] consults its hook table first; requests nobody hooked go
//! to the underlying [`DeviceCall`], retried while the call reports an
//! interrupted or would-block condition.

pub mod request;


use core::fmt;
use std::sync::Arc;

use ahash::AHashMap;

pub use request::{Exchange, Request, RequestCode, REQUEST_ABI_VERSION};

use crate::result::{Error, Result};

/// The device a request finally goes to when no hook handles it.
pub trait DeviceCall: Send + Sync {
    fn perform_request(&self, req: &mut Request) -> Result<()>;

    /// Releases a mapping the device handed out for a GEM object.
    fn unmap(&self, addr: usize, len: usize) -> Result<()> {
        // Safety: the caller passes a mapping it obtained from this device
        // and no longer uses.
        unsafe { linux_unsafe::munmap(addr as *mut _, len) }
            .map(|_| ())
            .map_err(|e| linux_io::result::Error(e.0).into())
    }
}

pub type Hook = Arc<dyn Fn(&mut Request) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on attempts; `None` retries for as long as the device
    /// keeps reporting a transient failure.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: None }
    }
}

impl RetryPolicy {
    fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

pub struct Dispatcher {
    hooks: AHashMap<RequestCode, Hook>,
    fallback: Arc<dyn DeviceCall>,
    retry: RetryPolicy,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(fallback: Arc<dyn DeviceCall>) -> Self {
        Self::with_retry(fallback, RetryPolicy::default())
    }

    pub fn with_retry(fallback: Arc<dyn DeviceCall>, retry: RetryPolicy) -> Self {
        Self {
            hooks: AHashMap::new(),
            fallback,
            retry,
        }
    }

    /// Installs `hook` for `code`, returning the hook it replaced.
    pub fn register(&mut self, code: RequestCode, hook: Hook) -> Option<Hook> {
        self.hooks.insert(code, hook)
    }

    pub fn register_all(&mut self, hooks: impl IntoIterator<Item = (RequestCode, Hook)>) {
        for (code, hook) in hooks {
            self.register(code, hook);
        }
    }

    pub fn unregister(&mut self, code: RequestCode) -> Option<Hook> {
        self.hooks.remove(&code)
    }

    pub fn is_hooked(&self, code: RequestCode) -> bool {
        self.hooks.contains_key(&code)
    }

    pub fn fallback(&self) -> &Arc<dyn DeviceCall> {
        &self.fallback
    }

    pub fn dispatch(&self, req: &mut Request) -> Result<()> {
        let code = req.code();
        if let Some(hook) = self.hooks.get(&code) {
            log::trace!("{code:?} handled by hook");
            return hook(req);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fallback.perform_request(req) {
                Err(e @ (Error::Interrupted | Error::WouldBlock)) => {
                    if !self.retry.allows(attempt) {
                        log::warn!("{code:?} still failing with {e} after {attempt} attempts");
                        return Err(e);
                    }
                    log::trace!("{code:?} attempt {attempt} failed with {e}, retrying");
                }
                ret => return ret,
            }
        }
    }
}

impl DeviceCall for Dispatcher {
    fn perform_request(&self, req: &mut Request) -> Result<()> {
        self.dispatch(req)
    }

    fn unmap(&self, addr: usize, len: usize) -> Result<()> {
        self.fallback.unmap(addr, len)
    }
}
