use super::graph::{Device, Graph};
use super::{format, FramebufferId, ObjectKind, Rect};
use crate::dispatch::{Exchange, Request};
use crate::list::SlotKey;
use crate::refcount::{RefCount, Release};
use crate::result::{Error, Result};

/// Legacy single-plane framebuffer description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddFb {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub bpp: u32,
    pub depth: u32,
    pub handle: u32,
}

/// Framebuffer description by pixel format, with up to four planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddFb2 {
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
    pub flags: u32,
    pub handles: [u32; 4],
    pub pitches: [u32; 4],
    pub offsets: [u32; 4],
}

impl From<&AddFb> for AddFb2 {
    fn from(value: &AddFb) -> Self {
        Self {
            width: value.width,
            height: value.height,
            pixel_format: format::legacy_fb_format(value.bpp, value.depth),
            flags: 0,
            handles: [value.handle, 0, 0, 0],
            pitches: [value.pitch, 0, 0, 0],
            offsets: [0; 4],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramebufferInfo {
    pub fb_id: FramebufferId,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub bpp: u32,
    pub depth: u32,
    pub handle: u32,
    pub pixel_format: u32,
}

pub(crate) struct Framebuffer {
    pub(crate) id: FramebufferId,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) pixel_format: u32,
    pub(crate) flags: u32,
    pub(crate) bpp: u32,
    pub(crate) depth: u32,
    pub(crate) handles: [u32; 4],
    pub(crate) pitches: [u32; 4],
    pub(crate) offsets: [u32; 4],
    /// Global names of `handles`, zero where the handle is.
    pub(crate) names: [u32; 4],
    /// One reference for the creator plus one per CRTC, plane or pending
    /// flip scanning it out.
    pub(crate) refs: RefCount,
    /// The creator's reference is gone; nothing new may bind it.
    pub(crate) removed: bool,
}

impl Framebuffer {
    pub(crate) fn rect_at(&self, x: u32, y: u32) -> Rect {
        Rect {
            x: x as i32,
            y: y as i32,
            w: self.width,
            h: self.height,
        }
    }

    fn info(&self) -> FramebufferInfo {
        FramebufferInfo {
            fb_id: self.id,
            width: self.width,
            height: self.height,
            pitch: self.pitches[0],
            bpp: self.bpp,
            depth: self.depth,
            handle: self.handles[0],
            pixel_format: self.pixel_format,
        }
    }
}

impl Device {
    pub fn add_fb(&self, req: &AddFb) -> Result<FramebufferId> {
        self.add_fb2(&AddFb2::from(req))
    }

    /// Registers a framebuffer, publishing each of its buffer handles under a
    /// global name so the panel can scan it out.
    pub fn add_fb2(&self, req: &AddFb2) -> Result<FramebufferId> {
        if req.width == 0 || req.height == 0 || req.handles[0] == 0 {
            return Err(Error::Invalid);
        }
        let mut names = [0u32; 4];
        for (name, &handle) in names.iter_mut().zip(req.handles.iter()) {
            if handle == 0 {
                continue;
            }
            *name = self.flink(handle)?;
        }
        let (bpp, depth) = format::bpp_depth(req.pixel_format).unwrap_or((0, 0));

        let mut g = self.graph.lock();
        g.fbs.reserve()?;
        let key = g.fbs.push_back(Framebuffer {
            id: FramebufferId(0),
            width: req.width,
            height: req.height,
            pixel_format: req.pixel_format,
            flags: req.flags,
            bpp,
            depth,
            handles: req.handles,
            pitches: req.pitches,
            offsets: req.offsets,
            names,
            refs: RefCount::new(1),
            removed: false,
        })?;
        let id = match self.register(ObjectKind::Framebuffer, key) {
            Ok(id) => id,
            Err(e) => {
                g.fbs.remove(key);
                return Err(e);
            }
        };
        if let Some(fb) = g.fbs.get_mut(key) {
            fb.id = FramebufferId(id);
        }
        log::debug!("device {:?}: added framebuffer {id} ({}x{})", self.id, req.width, req.height);
        Ok(FramebufferId(id))
    }

    /// Drops the creator's reference. The framebuffer lives on while a CRTC
    /// or plane still scans it out.
    pub fn rm_fb(&self, id: FramebufferId) -> Result<()> {
        let mut g = self.graph.lock();
        let key = self.resolve(id.0, ObjectKind::Framebuffer)?;
        let fb = g.fbs.get_mut(key).ok_or(Error::Invalid)?;
        if fb.removed {
            return Err(Error::Invalid);
        }
        fb.removed = true;
        self.fb_unref(&mut g, key)
    }

    pub fn get_fb(&self, id: FramebufferId) -> Result<FramebufferInfo> {
        let g = self.graph.lock();
        let key = self
            .resolve(id.0, ObjectKind::Framebuffer)
            .map_err(|_| Error::NonExist)?;
        match g.fbs.get(key) {
            Some(fb) if !fb.removed => Ok(fb.info()),
            _ => Err(Error::NonExist),
        }
    }

    /// Number of references currently held on a framebuffer.
    pub fn fb_ref_count(&self, id: FramebufferId) -> Option<u32> {
        let g = self.graph.lock();
        let key = self.resolve(id.0, ObjectKind::Framebuffer).ok()?;
        g.fbs.get(key).map(|fb| fb.refs.get())
    }

    /// Resolves a framebuffer that may be newly bound to something.
    pub(crate) fn bindable_fb(&self, g: &Graph, id: FramebufferId) -> Result<SlotKey> {
        let key = self.resolve(id.0, ObjectKind::Framebuffer)?;
        match g.fbs.get(key) {
            Some(fb) if !fb.removed => Ok(key),
            _ => Err(Error::Invalid),
        }
    }

    pub(crate) fn fb_ref(&self, g: &mut Graph, key: SlotKey) -> Result<()> {
        let fb = g.fbs.get(key).ok_or(Error::Invalid)?;
        fb.refs.acquire()?;
        Ok(())
    }

    /// Drops one reference, freeing the framebuffer strictly when none
    /// remain.
    pub(crate) fn fb_unref(&self, g: &mut Graph, key: SlotKey) -> Result<()> {
        let fb = g.fbs.get(key).ok_or(Error::Invalid)?;
        if let Release::Dead = fb.refs.release()? {
            if let Some(fb) = g.fbs.remove(key) {
                self.table.delete(fb.id.0);
                log::debug!("device {:?}: freed framebuffer {}", self.id, fb.id.0);
            }
        }
        Ok(())
    }

    fn flink(&self, handle: u32) -> Result<u32> {
        let mut req = Request::GemFlink(Exchange::new(handle));
        self.call.perform_request(&mut req)?;
        let name = match req {
            Request::GemFlink(x) => x.into_reply()?,
            _ => return Err(Error::RemoteFailure),
        };
        if name == 0 {
            log::error!("device {:?}: no global name for handle {handle}", self.id);
            return Err(Error::Permission);
        }
        Ok(name)
    }
}
