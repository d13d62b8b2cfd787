//! Client for the VIGS virtual GPU: GEM objects, surfaces, execbuffers and
//! fences.
//!
//! Every object talks to the device through a [`DeviceCall`], so the same
//! code runs against a [`crate::Card`], a [`crate::dispatch::Dispatcher`] or
//! a test double. GEM objects and fences are [`RefCounted`]: dropping the
//! last reference unmaps and closes the object on the device exactly once.


use std::sync::Arc;

use crate::dispatch::request::{
    FenceCreated, GemMap, PlaneZpos, SurfaceAccess, SurfaceCreate, SurfaceInfo, SurfaceSync,
};
use crate::dispatch::{DeviceCall, Exchange, Request};
use crate::ioctl::{DRM_VIGS_DRIVER_VERSION, DRM_VIGS_SAF_MASK};
use crate::refcount::{RefCounted, Release, Teardown};
use crate::result::{Error, Result};
use crate::util::Rollback;

pub use crate::ioctl::{DRM_VIGS_SAF_READ as SAF_READ, DRM_VIGS_SAF_WRITE as SAF_WRITE};

/// Pulls the reply out of a request after the device answered it.
macro_rules! reply {
    ($req:expr, $variant:ident) => {
        match $req {
            Request::$variant(x) => x.into_reply(),
            _ => Err(Error::RemoteFailure),
        }
    };
}

#[derive(Clone)]
pub struct VigsDevice {
    call: Arc<dyn DeviceCall>,
}

impl core::fmt::Debug for VigsDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VigsDevice").finish_non_exhaustive()
    }
}

impl VigsDevice {
    /// Wraps a device after checking that it runs the driver interface this
    /// client understands.
    pub fn create(call: Arc<dyn DeviceCall>) -> Result<Arc<Self>> {
        let mut req = Request::Version(Exchange::new(()));
        call.perform_request(&mut req)?;
        let version = reply!(req, Version)?;
        if version.major != DRM_VIGS_DRIVER_VERSION {
            log::error!(
                "VIGS driver version {} is not supported, need {}",
                version.major,
                DRM_VIGS_DRIVER_VERSION
            );
            return Err(Error::Invalid);
        }
        Ok(Arc::new(Self { call }))
    }

    fn request(&self, req: &mut Request) -> Result<()> {
        self.call.perform_request(req)
    }

    pub fn protocol_version(&self) -> Result<u32> {
        let mut req = Request::VigsProtocolVersion(Exchange::new(()));
        self.request(&mut req)?;
        reply!(req, VigsProtocolVersion)
    }

    pub fn set_plane_zpos(&self, plane_id: u32, zpos: i32) -> Result<()> {
        self.request(&mut Request::VigsPlaneSetZpos(PlaneZpos { plane_id, zpos }))
    }

    fn gem_close(&self, handle: u32) {
        if handle == 0 {
            return;
        }
        if let Err(e) = self.request(&mut Request::GemClose(handle)) {
            log::warn!("closing GEM handle {handle} failed: {e}");
        }
    }

    /// Opens a GEM object by its global name, returning handle and size.
    fn gem_open(&self, name: u32) -> Result<(u32, u32)> {
        let mut req = Request::GemOpen(Exchange::new(name));
        self.request(&mut req)?;
        let obj = reply!(req, GemOpen)?;
        let size = u32::try_from(obj.size).map_err(|_| Error::RemoteFailure)?;
        Ok((obj.handle, size))
    }
}

struct GemState {
    dev: Arc<VigsDevice>,
    handle: u32,
    size: u32,
    name: u32,
    address: usize,
}

impl Teardown for GemState {
    fn teardown(self) {
        if self.address != 0 {
            if let Err(e) = self.dev.call.unmap(self.address, self.size as usize) {
                log::warn!("unmapping GEM handle {} failed: {e}", self.handle);
            }
        }
        self.dev.gem_close(self.handle);
    }
}

/// A reference to a GEM object on the device.
#[derive(Clone)]
pub struct Gem(Arc<RefCounted<GemState>>);

impl Gem {
    fn new(dev: &Arc<VigsDevice>, handle: u32, size: u32, name: u32) -> Self {
        Self(RefCounted::create(GemState {
            dev: Arc::clone(dev),
            handle,
            size,
            name,
            address: 0,
        }))
    }

    pub fn handle(&self) -> Result<u32> {
        self.0.with(|g| g.handle)
    }

    pub fn size(&self) -> Result<u32> {
        self.0.with(|g| g.size)
    }

    /// Address of the current mapping, zero when unmapped.
    pub fn address(&self) -> Result<usize> {
        self.0.with(|g| g.address)
    }

    pub fn ref_count(&self) -> u32 {
        self.0.ref_count()
    }

    pub fn reference(&self) -> Result<()> {
        self.0.reference()
    }

    pub fn unreference(&self) -> Result<Release> {
        self.0.unreference()
    }

    /// Global name of the object, published on first use.
    pub fn name(&self) -> Result<u32> {
        let mut g = self.0.lock()?;
        if g.name != 0 {
            return Ok(g.name);
        }
        let mut req = Request::GemFlink(Exchange::new(g.handle));
        g.dev.request(&mut req)?;
        let name = reply!(req, GemFlink)?;
        if name == 0 {
            return Err(Error::Permission);
        }
        g.name = name;
        Ok(name)
    }

    /// Maps the object into this process. Mapping a mapped object returns
    /// the existing address.
    pub fn map(&self, track_access: bool) -> Result<usize> {
        let mut g = self.0.lock()?;
        if g.address != 0 {
            return Ok(g.address);
        }
        let mut req = Request::VigsGemMap(Exchange::new(GemMap {
            handle: g.handle,
            track_access,
        }));
        g.dev.request(&mut req)?;
        let address = reply!(req, VigsGemMap)?;
        if address == 0 {
            return Err(Error::RemoteFailure);
        }
        g.address = address;
        Ok(address)
    }

    pub fn unmap(&self) -> Result<()> {
        let mut g = self.0.lock()?;
        if g.address == 0 {
            return Ok(());
        }
        g.dev.call.unmap(g.address, g.size as usize)?;
        g.address = 0;
        Ok(())
    }

    /// Blocks until the GPU is done with the object.
    pub fn wait(&self) -> Result<()> {
        let (dev, handle) = self.0.with(|g| (Arc::clone(&g.dev), g.handle))?;
        dev.request(&mut Request::VigsGemWait(handle))
    }
}

/// A GPU surface backed by a GEM object.
#[derive(Clone)]
pub struct Surface {
    gem: Gem,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub scanout: bool,
    /// Host-side surface id.
    pub id: u32,
}

impl Surface {
    pub fn create(
        dev: &Arc<VigsDevice>,
        width: u32,
        height: u32,
        stride: u32,
        format: u32,
        scanout: bool,
    ) -> Result<Self> {
        let mut req = Request::VigsCreateSurface(Exchange::new(SurfaceCreate {
            width,
            height,
            stride,
            format,
            scanout,
        }));
        dev.request(&mut req)?;
        let info = reply!(req, VigsCreateSurface)?;
        log::debug!("created surface {} ({width}x{height})", info.id);
        Ok(Self::from_info(dev, &info, 0))
    }

    /// Opens a surface another process published under `name`.
    pub fn open(dev: &Arc<VigsDevice>, name: u32) -> Result<Self> {
        let (handle, _) = dev.gem_open(name)?;
        let close = Rollback::new(|| dev.gem_close(handle));
        let mut req = Request::VigsSurfaceInfo(Exchange::new(handle));
        dev.request(&mut req)?;
        let info = reply!(req, VigsSurfaceInfo)?;
        close.commit();
        Ok(Self::from_info(dev, &SurfaceInfo { handle, ..info }, name))
    }

    fn from_info(dev: &Arc<VigsDevice>, info: &SurfaceInfo, name: u32) -> Self {
        Self {
            gem: Gem::new(dev, info.handle, info.size, name),
            width: info.width,
            height: info.height,
            stride: info.stride,
            format: info.format,
            scanout: info.scanout,
            id: info.id,
        }
    }

    pub fn gem(&self) -> &Gem {
        &self.gem
    }

    /// Marks the surface as modified by the GPU.
    pub fn set_gpu_dirty(&self) -> Result<()> {
        let (dev, handle) = self.gem.0.with(|g| (Arc::clone(&g.dev), g.handle))?;
        dev.request(&mut Request::VigsSurfaceSetGpuDirty(handle))
    }

    /// Starts CPU access to the mapped surface with the given access flags.
    pub fn start_access(&self, saf: u32) -> Result<()> {
        if saf & !DRM_VIGS_SAF_MASK != 0 {
            return Err(Error::Invalid);
        }
        let (dev, address) = self.mapping()?;
        dev.request(&mut Request::VigsSurfaceStartAccess(SurfaceAccess { address, saf }))
    }

    pub fn end_access(&self, sync: bool) -> Result<()> {
        let (dev, address) = self.mapping()?;
        dev.request(&mut Request::VigsSurfaceEndAccess(SurfaceSync { address, sync }))
    }

    fn mapping(&self) -> Result<(Arc<VigsDevice>, usize)> {
        let (dev, address) = self.gem.0.with(|g| (Arc::clone(&g.dev), g.address))?;
        if address == 0 {
            return Err(Error::Invalid);
        }
        Ok((dev, address))
    }
}

/// A command buffer the GPU executes.
#[derive(Clone)]
pub struct Execbuffer {
    gem: Gem,
}

impl Execbuffer {
    pub fn create(dev: &Arc<VigsDevice>, size: u32) -> Result<Self> {
        let mut req = Request::VigsCreateExecbuffer(Exchange::new(size));
        dev.request(&mut req)?;
        let obj = reply!(req, VigsCreateExecbuffer)?;
        let size = u32::try_from(obj.size).map_err(|_| Error::RemoteFailure)?;
        Ok(Self {
            gem: Gem::new(dev, obj.handle, size, 0),
        })
    }

    pub fn open(dev: &Arc<VigsDevice>, name: u32) -> Result<Self> {
        let (handle, size) = dev.gem_open(name)?;
        Ok(Self {
            gem: Gem::new(dev, handle, size, name),
        })
    }

    pub fn gem(&self) -> &Gem {
        &self.gem
    }

    pub fn exec(&self) -> Result<()> {
        let (dev, handle) = self.gem.0.with(|g| (Arc::clone(&g.dev), g.handle))?;
        dev.request(&mut Request::VigsExec(handle))
    }
}

struct FenceState {
    dev: Arc<VigsDevice>,
    handle: u32,
    seq: u32,
    signaled: bool,
}

impl Teardown for FenceState {
    fn teardown(self) {
        if let Err(e) = self.dev.request(&mut Request::VigsFenceUnref(self.handle)) {
            log::warn!("releasing fence {} failed: {e}", self.handle);
        }
    }
}

/// A point in the GPU's command stream that can be waited on.
#[derive(Clone)]
pub struct Fence(Arc<RefCounted<FenceState>>);

impl Fence {
    /// Creates a fence, submitting it right away when `send` is set.
    pub fn create(dev: &Arc<VigsDevice>, send: bool) -> Result<Self> {
        let mut req = Request::VigsCreateFence(Exchange::new(send));
        dev.request(&mut req)?;
        let FenceCreated { handle, seq } = reply!(req, VigsCreateFence)?;
        Ok(Self(RefCounted::create(FenceState {
            dev: Arc::clone(dev),
            handle,
            seq,
            signaled: false,
        })))
    }

    pub fn handle(&self) -> Result<u32> {
        self.0.with(|f| f.handle)
    }

    pub fn seq(&self) -> Result<u32> {
        self.0.with(|f| f.seq)
    }

    /// Whether the fence was signaled as of the last [`Self::check`] or
    /// [`Self::wait`].
    pub fn signaled(&self) -> Result<bool> {
        self.0.with(|f| f.signaled)
    }

    pub fn reference(&self) -> Result<()> {
        self.0.reference()
    }

    pub fn unreference(&self) -> Result<Release> {
        self.0.unreference()
    }

    pub fn wait(&self) -> Result<()> {
        let (dev, handle) = self.0.with(|f| (Arc::clone(&f.dev), f.handle))?;
        dev.request(&mut Request::VigsFenceWait(handle))?;
        self.0.with(|f| f.signaled = true)
    }

    /// Asks the device whether the fence has been signaled.
    pub fn check(&self) -> Result<bool> {
        let (dev, handle) = self.0.with(|f| (Arc::clone(&f.dev), f.handle))?;
        let mut req = Request::VigsFenceSignaled(Exchange::new(handle));
        dev.request(&mut req)?;
        let signaled = reply!(req, VigsFenceSignaled)?;
        self.0.with(|f| f.signaled = signaled)?;
        Ok(signaled)
    }
}
