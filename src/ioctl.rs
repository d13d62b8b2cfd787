//! Kernel request records and request codes for the DRM core and the VIGS
//! virtual GPU driver.

use core::ffi::c_int as int;
use core::ffi::c_ulong as ulong;
use core::ptr::null_mut;

use linux_io::fd::ioctl::{ioctl_writeread, IoDevice, IoctlReqWriteRead};

pub struct DrmCardDevice;

impl IoDevice for DrmCardDevice {}

const DRM_IOCTL_BASE: ulong = 100;

/// First request number available to drivers.
pub const DRM_COMMAND_BASE: ulong = 0x40;

#[allow(non_snake_case)]
const fn _IOW<T>(nr: ulong) -> ulong {
    linux_io::fd::ioctl::_IOW(DRM_IOCTL_BASE, nr, core::mem::size_of::<T>() as _)
}

#[allow(non_snake_case)]
const fn _IOR<T>(nr: ulong) -> ulong {
    linux_io::fd::ioctl::_IOR(DRM_IOCTL_BASE, nr, core::mem::size_of::<T>() as _)
}

#[allow(non_snake_case)]
const fn _IOWR<T>(nr: ulong) -> ulong {
    linux_io::fd::ioctl::_IOWR(DRM_IOCTL_BASE, nr, core::mem::size_of::<T>() as _)
}

macro_rules! impl_zeroed {
    ($t:ty) => {
        impl $t {
            #[inline(always)]
            pub const fn zeroed() -> Self {
                // Safety: All of the field types in $t must
                // treat all-zeroes as a valid bit pattern.
                unsafe { ::core::mem::zeroed() }
            }
        }

        /// The default value is the result of [`Self::zeroed`].
        impl ::core::default::Default for $t {
            #[inline(always)]
            fn default() -> Self {
                Self::zeroed()
            }
        }
    };
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmVersion {
    pub version_major: int,
    pub version_minor: int,
    pub version_patchlevel: int,
    name_len: usize,
    name: *mut i8,
    date_len: usize,
    date: *mut i8,
    desc_len: usize,
    desc: *mut i8,
}

impl_zeroed!(DrmVersion);

impl DrmVersion {
    /// Points the string fields at caller-owned buffers.
    ///
    /// # Safety
    ///
    /// Each buffer must stay valid, and be writable for its length, until
    /// the request using this record has returned.
    #[inline(always)]
    pub unsafe fn set_buffers(&mut self, name: &mut [u8], date: &mut [u8], desc: &mut [u8]) {
        self.name = name.as_mut_ptr() as *mut i8;
        self.name_len = name.len();
        self.date = date.as_mut_ptr() as *mut i8;
        self.date_len = date.len();
        self.desc = desc.as_mut_ptr() as *mut i8;
        self.desc_len = desc.len();
    }

    #[inline(always)]
    pub fn clear_buffers(&mut self) {
        self.name = null_mut();
        self.date = null_mut();
        self.desc = null_mut();
    }

    #[inline(always)]
    pub fn name_len(&self) -> usize {
        self.name_len
    }

    #[inline(always)]
    pub fn date_len(&self) -> usize {
        self.date_len
    }

    #[inline(always)]
    pub fn desc_len(&self) -> usize {
        self.desc_len
    }
}

pub const DRM_IOCTL_VERSION: IoctlReqWriteRead<DrmCardDevice, DrmVersion, int> =
    unsafe { ioctl_writeread(_IOWR::<DrmVersion>(0x00)) };

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmGemClose {
    pub handle: u32,
    pad: u32,
}

impl_zeroed!(DrmGemClose);

impl DrmGemClose {
    #[inline(always)]
    pub const fn new(handle: u32) -> Self {
        Self { handle, pad: 0 }
    }
}

pub const DRM_IOCTL_GEM_CLOSE: IoctlReqWriteRead<DrmCardDevice, DrmGemClose, int> =
    unsafe { ioctl_writeread(_IOW::<DrmGemClose>(0x09)) };

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmGemFlink {
    pub handle: u32,
    pub name: u32,
}

impl_zeroed!(DrmGemFlink);

pub const DRM_IOCTL_GEM_FLINK: IoctlReqWriteRead<DrmCardDevice, DrmGemFlink, int> =
    unsafe { ioctl_writeread(_IOWR::<DrmGemFlink>(0x0a)) };

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmGemOpen {
    pub name: u32,
    pub handle: u32,
    pub size: u64,
}

impl_zeroed!(DrmGemOpen);

pub const DRM_IOCTL_GEM_OPEN: IoctlReqWriteRead<DrmCardDevice, DrmGemOpen, int> =
    unsafe { ioctl_writeread(_IOWR::<DrmGemOpen>(0x0b)) };

/// Request a completion event for a page flip.
pub const DRM_MODE_PAGE_FLIP_EVENT: u32 = 0x01;
/// Flip without waiting for vblank.
pub const DRM_MODE_PAGE_FLIP_ASYNC: u32 = 0x02;

/// Major version of the VIGS driver interface this crate speaks.
pub const DRM_VIGS_DRIVER_VERSION: int = 9;

pub const DRM_VIGS_SAF_READ: u32 = 1;
pub const DRM_VIGS_SAF_WRITE: u32 = 2;
pub const DRM_VIGS_SAF_MASK: u32 = 3;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmVigsGetProtocolVersion {
    pub version: u32,
}

impl_zeroed!(DrmVigsGetProtocolVersion);

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmVigsCreateSurface {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub scanout: int,
    pub handle: u32,
    pub size: u32,
    pub id: u32,
}

impl_zeroed!(DrmVigsCreateSurface);

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmVigsCreateExecbuffer {
    pub size: u32,
    pub handle: u32,
}

impl_zeroed!(DrmVigsCreateExecbuffer);

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmVigsGemMap {
    pub handle: u32,
    pub track_access: int,
    pub address: ulong,
}

impl_zeroed!(DrmVigsGemMap);

/// Single-handle argument shared by several VIGS requests.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmVigsHandle {
    pub handle: u32,
}

impl_zeroed!(DrmVigsHandle);

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmVigsSurfaceInfo {
    pub handle: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub scanout: int,
    pub size: u32,
    pub id: u32,
}

impl_zeroed!(DrmVigsSurfaceInfo);

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmVigsSurfaceStartAccess {
    pub address: ulong,
    pub saf: u32,
}

impl_zeroed!(DrmVigsSurfaceStartAccess);

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmVigsSurfaceEndAccess {
    pub address: ulong,
    pub sync: int,
}

impl_zeroed!(DrmVigsSurfaceEndAccess);

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmVigsCreateFence {
    pub send: int,
    pub handle: u32,
    pub seq: u32,
}

impl_zeroed!(DrmVigsCreateFence);

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmVigsFenceSignaled {
    pub handle: u32,
    pub signaled: int,
}

impl_zeroed!(DrmVigsFenceSignaled);

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DrmVigsPlaneSetZpos {
    pub plane_id: u32,
    pub zpos: int,
}

impl_zeroed!(DrmVigsPlaneSetZpos);

const fn vigs(nr: ulong) -> ulong {
    DRM_COMMAND_BASE + nr
}

pub const DRM_IOCTL_VIGS_GET_PROTOCOL_VERSION: IoctlReqWriteRead<
    DrmCardDevice,
    DrmVigsGetProtocolVersion,
    int,
> = unsafe { ioctl_writeread(_IOR::<DrmVigsGetProtocolVersion>(vigs(0x00))) };

pub const DRM_IOCTL_VIGS_CREATE_SURFACE: IoctlReqWriteRead<
    DrmCardDevice,
    DrmVigsCreateSurface,
    int,
> = unsafe { ioctl_writeread(_IOWR::<DrmVigsCreateSurface>(vigs(0x01))) };

pub const DRM_IOCTL_VIGS_CREATE_EXECBUFFER: IoctlReqWriteRead<
    DrmCardDevice,
    DrmVigsCreateExecbuffer,
    int,
> = unsafe { ioctl_writeread(_IOWR::<DrmVigsCreateExecbuffer>(vigs(0x02))) };

pub const DRM_IOCTL_VIGS_GEM_MAP: IoctlReqWriteRead<DrmCardDevice, DrmVigsGemMap, int> =
    unsafe { ioctl_writeread(_IOWR::<DrmVigsGemMap>(vigs(0x03))) };

pub const DRM_IOCTL_VIGS_SURFACE_INFO: IoctlReqWriteRead<DrmCardDevice, DrmVigsSurfaceInfo, int> =
    unsafe { ioctl_writeread(_IOWR::<DrmVigsSurfaceInfo>(vigs(0x04))) };

pub const DRM_IOCTL_VIGS_EXEC: IoctlReqWriteRead<DrmCardDevice, DrmVigsHandle, int> =
    unsafe { ioctl_writeread(_IOW::<DrmVigsHandle>(vigs(0x05))) };

pub const DRM_IOCTL_VIGS_SURFACE_SET_GPU_DIRTY: IoctlReqWriteRead<
    DrmCardDevice,
    DrmVigsHandle,
    int,
> = unsafe { ioctl_writeread(_IOW::<DrmVigsHandle>(vigs(0x06))) };

pub const DRM_IOCTL_VIGS_SURFACE_START_ACCESS: IoctlReqWriteRead<
    DrmCardDevice,
    DrmVigsSurfaceStartAccess,
    int,
> = unsafe { ioctl_writeread(_IOW::<DrmVigsSurfaceStartAccess>(vigs(0x07))) };

pub const DRM_IOCTL_VIGS_SURFACE_END_ACCESS: IoctlReqWriteRead<
    DrmCardDevice,
    DrmVigsSurfaceEndAccess,
    int,
> = unsafe { ioctl_writeread(_IOW::<DrmVigsSurfaceEndAccess>(vigs(0x08))) };

pub const DRM_IOCTL_VIGS_GEM_WAIT: IoctlReqWriteRead<DrmCardDevice, DrmVigsHandle, int> =
    unsafe { ioctl_writeread(_IOW::<DrmVigsHandle>(vigs(0x09))) };

pub const DRM_IOCTL_VIGS_CREATE_FENCE: IoctlReqWriteRead<DrmCardDevice, DrmVigsCreateFence, int> =
    unsafe { ioctl_writeread(_IOWR::<DrmVigsCreateFence>(vigs(0x0a))) };

pub const DRM_IOCTL_VIGS_FENCE_WAIT: IoctlReqWriteRead<DrmCardDevice, DrmVigsHandle, int> =
    unsafe { ioctl_writeread(_IOW::<DrmVigsHandle>(vigs(0x0b))) };

pub const DRM_IOCTL_VIGS_FENCE_SIGNALED: IoctlReqWriteRead<
    DrmCardDevice,
    DrmVigsFenceSignaled,
    int,
> = unsafe { ioctl_writeread(_IOWR::<DrmVigsFenceSignaled>(vigs(0x0c))) };

pub const DRM_IOCTL_VIGS_FENCE_UNREF: IoctlReqWriteRead<DrmCardDevice, DrmVigsHandle, int> =
    unsafe { ioctl_writeread(_IOW::<DrmVigsHandle>(vigs(0x0d))) };

pub const DRM_IOCTL_VIGS_PLANE_SET_ZPOS: IoctlReqWriteRead<DrmCardDevice, DrmVigsPlaneSetZpos, int> =
    unsafe { ioctl_writeread(_IOW::<DrmVigsPlaneSetZpos>(vigs(0x0e))) };
