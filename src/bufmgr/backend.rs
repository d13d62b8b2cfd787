use core::any::Any;
use core::ops::BitOr;

use crate::result::Result;

/// Backend-private state of one buffer object.
///
/// The manager never looks inside; it only hands the payload back to the
/// backend that produced it, and swaps payloads between objects.
pub type BoPriv = Box<dyn Any + Send>;

macro_rules! flag_type {
    ($name:ident { $($(#[$m:meta])* $flag:ident = $val:expr,)* }) => {
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            $($(#[$m])* pub const $flag: Self = Self($val);)*

            #[inline(always)]
            pub fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            #[inline(always)]
            fn bitor(self, rhs: Self) -> Self::Output {
                Self(self.0 | rhs.0)
            }
        }
    };
}

flag_type!(BoFlags {
    DEFAULT = 0,
    SCANOUT = 1 << 0,
    NONCACHABLE = 1 << 1,
    WC = 1 << 2,
});

flag_type!(MapOptions {
    READ = 1 << 0,
    WRITE = 1 << 1,
});

flag_type!(CacheFlags {
    INV = 0x01,
    CLN = 0x02,
    /// Applies to every buffer object of the manager.
    ALL = 0x10,
    FLUSH = 0x01 | 0x02,
    FLUSH_ALL = 0x01 | 0x02 | 0x10,
});

/// Which engine a handle or mapping is requested for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DeviceKind {
    #[default]
    Default = 0,
    Cpu = 1,
    TwoD = 2,
    ThreeD = 3,
    Mm = 4,
}

/// Kind of memory an existing buffer is attached from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MemType {
    Gem = 0,
    UserPtr = 1,
    DmaBuf = 2,
    Gpu = 3,
}

/// Device-specific implementation of buffer-object storage.
///
/// Every method is called with the owning manager's lock held, so
/// implementations need no locking of their own. Methods must not call back
/// into the manager.
pub trait BufferBackend: Send {
    fn alloc(&mut self, name: &str, size: u32, flags: BoFlags) -> Result<BoPriv>;

    fn attach(&mut self, name: &str, mem: MemType, size: u32, handle: u32) -> Result<BoPriv>;

    /// Opens a buffer that another process exported under `key`.
    fn import(&mut self, key: u32) -> Result<BoPriv>;

    /// Returns a key other processes can pass to [`Self::import`].
    fn export(&mut self, bo: &mut BoPriv) -> Result<u32>;

    fn handle(&mut self, bo: &BoPriv, device: DeviceKind) -> Result<u32>;

    /// Maps the buffer for `device`, returning the address or device handle
    /// of the mapping.
    fn map(&mut self, bo: &mut BoPriv, device: DeviceKind, opt: MapOptions) -> Result<usize>;

    fn unmap(&mut self, bo: &mut BoPriv, device: DeviceKind) -> Result<()>;

    fn size(&self, bo: &BoPriv) -> u32;

    /// `bo` is `None` when flushing the whole manager, in which case `flags`
    /// always includes [`CacheFlags::ALL`].
    fn cache_flush(&mut self, bo: Option<&mut BoPriv>, flags: CacheFlags) -> Result<()>;

    fn free(&mut self, bo: BoPriv);

    /// Called once when the manager is destroyed, after every buffer object
    /// has been freed.
    fn destroy(&mut self);

    /// A backend-provided replacement for the manager's cross-process
    /// semaphore.
    fn manager_lock(&mut self) -> Option<&mut dyn ManagerLock> {
        None
    }

    /// Hooks run around [`Self::map`] and [`Self::unmap`].
    fn bo_lock(&mut self) -> Option<&mut dyn BoLock> {
        None
    }
}

pub trait ManagerLock {
    fn lock(&mut self) -> Result<()>;
    fn unlock(&mut self) -> Result<()>;
}

pub trait BoLock {
    fn lock(&mut self, bo: &mut BoPriv) -> Result<()>;
    fn unlock(&mut self, bo: &mut BoPriv) -> Result<()>;
}
