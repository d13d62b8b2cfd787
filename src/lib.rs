//! Userspace building blocks for DRM/KMS shims.
//!
//! The crate provides the process-wide id table shared by display resources
//! and properties ([`handle`]), explicit reference counting ([`refcount`]),
//! a stable-key arena ([`list`]), a buffer manager over pluggable backends
//! ([`bufmgr`]), an emulated display controller ([`modeset`]), a request
//! dispatcher that lets in-process handlers stand in for the kernel
//! ([`dispatch`]) and a client for the VIGS virtual GPU ([`vigs`]).
//!
//! [`Card`] is the real kernel device that requests fall back to when no
//! handler takes them.

pub mod bufmgr;
pub mod dispatch;
pub mod event;
pub mod handle;
pub mod ioctl;
pub mod list;
pub mod modeset;
pub mod props;
pub mod refcount;
pub mod result;
pub(crate) mod util;
pub mod vigs;

use dispatch::request::{FenceCreated, GemObject, SurfaceInfo, VersionInfo};
use dispatch::{DeviceCall, Request};
use event::DrmEvent;
use ioctl::DrmCardDevice;
pub use result::{Error, InitError, Result};

/// Identifies the device a buffer manager or display controller belongs
/// to, normally the file descriptor it was opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub i32);

/// An open DRM card device node.
#[repr(transparent)]
pub struct Card {
    f: linux_io::File<DrmCardDevice>,
}

impl Card {
    pub fn open(path: &core::ffi::CStr) -> Result<Self, InitError> {
        let f = linux_io::File::open(path, linux_io::OpenOptions::read_write())?;
        Self::from_file(f)
    }

    pub fn from_file<D>(f: linux_io::File<D>) -> Result<Self, InitError> {
        // The VERSION request tells us whether this is a DRM card at all, but
        // issuing it needs the file typed as one first.
        // Safety: the converted file is only kept if the version query succeeds.
        let f: linux_io::File<DrmCardDevice> = unsafe { f.to_device(DrmCardDevice) };
        let mut v = ioctl::DrmVersion::zeroed();
        f.ioctl(ioctl::DRM_IOCTL_VERSION, &mut v)?;
        Ok(Self { f })
    }

    pub fn close(self) -> linux_io::result::Result<()> {
        self.f.close()
    }

    pub fn borrow_file(&self) -> &linux_io::File<DrmCardDevice> {
        &self.f
    }

    pub fn version(&self) -> Result<VersionInfo> {
        let mut v = ioctl::DrmVersion::zeroed();
        self.f.ioctl(ioctl::DRM_IOCTL_VERSION, &mut v)?;

        let mut name = vec![0u8; v.name_len()];
        let mut date = vec![0u8; v.date_len()];
        let mut desc = vec![0u8; v.desc_len()];
        // Safety: the buffers outlive the request and their lengths are the
        // ones recorded in `v`.
        unsafe { v.set_buffers(&mut name, &mut date, &mut desc) };
        let ret = self.f.ioctl(ioctl::DRM_IOCTL_VERSION, &mut v);
        v.clear_buffers();
        ret?;

        let text = |mut buf: Vec<u8>, len: usize| {
            buf.truncate(len);
            String::from_utf8_lossy(&buf).into_owned()
        };
        Ok(VersionInfo {
            major: v.version_major,
            minor: v.version_minor,
            patchlevel: v.version_patchlevel,
            name: text(name, v.name_len()),
            date: text(date, v.date_len()),
            desc: text(desc, v.desc_len()),
        })
    }

    /// Reads whatever events are pending into `buf` and decodes them.
    pub fn read_events(&self, buf: &mut [u8]) -> Result<Vec<DrmEvent>> {
        let len = self.f.read(buf)?;
        Ok(DrmEvent::parse_all(&buf[..len]))
    }
}

impl DeviceCall for Card {
    fn perform_request(&self, req: &mut Request) -> Result<()> {
        use ioctl::*;

        match req {
            Request::Version(x) => x.reply = Some(self.version()?),
            Request::GemClose(handle) => {
                self.f
                    .ioctl(DRM_IOCTL_GEM_CLOSE, &mut DrmGemClose::new(*handle))?;
            }
            Request::GemFlink(x) => {
                let mut arg = DrmGemFlink {
                    handle: x.args,
                    name: 0,
                };
                self.f.ioctl(DRM_IOCTL_GEM_FLINK, &mut arg)?;
                x.reply = Some(arg.name);
            }
            Request::GemOpen(x) => {
                let mut arg = DrmGemOpen {
                    name: x.args,
                    ..DrmGemOpen::zeroed()
                };
                self.f.ioctl(DRM_IOCTL_GEM_OPEN, &mut arg)?;
                x.reply = Some(GemObject {
                    handle: arg.handle,
                    size: arg.size,
                });
            }
            Request::VigsProtocolVersion(x) => {
                let mut arg = DrmVigsGetProtocolVersion::zeroed();
                self.f
                    .ioctl(DRM_IOCTL_VIGS_GET_PROTOCOL_VERSION, &mut arg)?;
                x.reply = Some(arg.version);
            }
            Request::VigsCreateSurface(x) => {
                let mut arg = DrmVigsCreateSurface {
                    width: x.args.width,
                    height: x.args.height,
                    stride: x.args.stride,
                    format: x.args.format,
                    scanout: x.args.scanout.into(),
                    ..DrmVigsCreateSurface::zeroed()
                };
                self.f.ioctl(DRM_IOCTL_VIGS_CREATE_SURFACE, &mut arg)?;
                x.reply = Some(SurfaceInfo {
                    handle: arg.handle,
                    width: arg.width,
                    height: arg.height,
                    stride: arg.stride,
                    format: arg.format,
                    scanout: arg.scanout != 0,
                    size: arg.size,
                    id: arg.id,
                });
            }
            Request::VigsCreateExecbuffer(x) => {
                let mut arg = DrmVigsCreateExecbuffer {
                    size: x.args,
                    handle: 0,
                };
                self.f.ioctl(DRM_IOCTL_VIGS_CREATE_EXECBUFFER, &mut arg)?;
                x.reply = Some(GemObject {
                    handle: arg.handle,
                    size: u64::from(arg.size),
                });
            }
            Request::VigsGemMap(x) => {
                let mut arg = DrmVigsGemMap {
                    handle: x.args.handle,
                    track_access: x.args.track_access.into(),
                    address: 0,
                };
                self.f.ioctl(DRM_IOCTL_VIGS_GEM_MAP, &mut arg)?;
                x.reply = Some(arg.address as usize);
            }
            Request::VigsGemWait(handle) => {
                self.f
                    .ioctl(DRM_IOCTL_VIGS_GEM_WAIT, &mut DrmVigsHandle { handle: *handle })?;
            }
            Request::VigsSurfaceInfo(x) => {
                let mut arg = DrmVigsSurfaceInfo {
                    handle: x.args,
                    ..DrmVigsSurfaceInfo::zeroed()
                };
                self.f.ioctl(DRM_IOCTL_VIGS_SURFACE_INFO, &mut arg)?;
                x.reply = Some(SurfaceInfo {
                    handle: arg.handle,
                    width: arg.width,
                    height: arg.height,
                    stride: arg.stride,
                    format: arg.format,
                    scanout: arg.scanout != 0,
                    size: arg.size,
                    id: arg.id,
                });
            }
            Request::VigsExec(handle) => {
                self.f
                    .ioctl(DRM_IOCTL_VIGS_EXEC, &mut DrmVigsHandle { handle: *handle })?;
            }
            Request::VigsSurfaceSetGpuDirty(handle) => {
                self.f.ioctl(
                    DRM_IOCTL_VIGS_SURFACE_SET_GPU_DIRTY,
                    &mut DrmVigsHandle { handle: *handle },
                )?;
            }
            Request::VigsSurfaceStartAccess(x) => {
                let mut arg = DrmVigsSurfaceStartAccess {
                    address: x.address as _,
                    saf: x.saf,
                };
                self.f.ioctl(DRM_IOCTL_VIGS_SURFACE_START_ACCESS, &mut arg)?;
            }
            Request::VigsSurfaceEndAccess(x) => {
                let mut arg = DrmVigsSurfaceEndAccess {
                    address: x.address as _,
                    sync: x.sync.into(),
                };
                self.f.ioctl(DRM_IOCTL_VIGS_SURFACE_END_ACCESS, &mut arg)?;
            }
            Request::VigsCreateFence(x) => {
                let mut arg = DrmVigsCreateFence {
                    send: x.args.into(),
                    ..DrmVigsCreateFence::zeroed()
                };
                self.f.ioctl(DRM_IOCTL_VIGS_CREATE_FENCE, &mut arg)?;
                x.reply = Some(FenceCreated {
                    handle: arg.handle,
                    seq: arg.seq,
                });
            }
            Request::VigsFenceWait(handle) => {
                self.f
                    .ioctl(DRM_IOCTL_VIGS_FENCE_WAIT, &mut DrmVigsHandle { handle: *handle })?;
            }
            Request::VigsFenceSignaled(x) => {
                let mut arg = DrmVigsFenceSignaled {
                    handle: x.args,
                    signaled: 0,
                };
                self.f.ioctl(DRM_IOCTL_VIGS_FENCE_SIGNALED, &mut arg)?;
                x.reply = Some(arg.signaled != 0);
            }
            Request::VigsFenceUnref(handle) => {
                self.f
                    .ioctl(DRM_IOCTL_VIGS_FENCE_UNREF, &mut DrmVigsHandle { handle: *handle })?;
            }
            Request::VigsPlaneSetZpos(x) => {
                let mut arg = DrmVigsPlaneSetZpos {
                    plane_id: x.plane_id,
                    zpos: x.zpos,
                };
                self.f.ioctl(DRM_IOCTL_VIGS_PLANE_SET_ZPOS, &mut arg)?;
            }
            _ => {
                log::debug!("{:?} has no kernel request; install display hooks", req.code());
                return Err(Error::NotSupported);
            }
        }
        Ok(())
    }
}

impl<D> TryFrom<linux_io::File<D>> for Card {
    type Error = InitError;

    #[inline(always)]
    fn try_from(value: linux_io::File<D>) -> Result<Self, InitError> {
        Card::from_file(value)
    }
}
