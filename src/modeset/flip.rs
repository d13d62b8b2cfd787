use super::graph::Device;
use super::{CrtcId, FramebufferId, ObjectKind, PageFlipFlags};
use crate::dispatch::request::PageFlip;
use crate::event::{DrmVblankEvent, GenericDrmEvent};
use crate::list::SlotKey;
use crate::result::{Error, Result};

/// A framebuffer waiting to replace a CRTC's current one at a vblank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingFlip {
    pub crtc_id: CrtcId,
    pub fb_id: FramebufferId,
    /// Vblank sequence at which the flip completes.
    pub sequence: u32,
    pub user_data: u64,
    /// Whether completion is reported back as an event.
    pub event: bool,
    pub(crate) crtc: SlotKey,
    pub(crate) fb: SlotKey,
}

impl Device {
    /// Queues `fb_id` to be shown on an active CRTC at the next vblank.
    ///
    /// Only one flip can be outstanding per device. Flips always wait for
    /// the vblank, so [`PageFlipFlags::ASYNC`] is not supported.
    pub fn page_flip(&self, req: &PageFlip) -> Result<()> {
        if req.flags.contains(PageFlipFlags::ASYNC) {
            log::debug!("device {:?}: async page flip requested", self.id);
            return Err(Error::NotSupported);
        }
        let mut guard = self.graph.lock();
        let g = &mut *guard;
        let crtc = self.resolve(req.crtc_id.0, ObjectKind::Crtc)?;
        if g.flip.is_some() {
            return Err(Error::Busy);
        }
        if !g.crtcs.get(crtc).is_some_and(|c| c.active) {
            return Err(Error::Invalid);
        }
        let fb = self.bindable_fb(g, req.fb_id)?;
        self.fb_ref(g, fb)?;
        let sequence = g.vblank_seq.wrapping_add(1);
        g.flip = Some(PendingFlip {
            crtc_id: req.crtc_id,
            fb_id: req.fb_id,
            sequence,
            user_data: req.user_data,
            event: req.flags.contains(PageFlipFlags::EVENT),
            crtc,
            fb,
        });
        log::trace!(
            "device {:?}: flip to framebuffer {} queued for vblank {sequence}",
            self.id,
            req.fb_id.0
        );
        Ok(())
    }

    /// Feeds a vblank, flip-complete or CRTC sequence event from the device
    /// into the flip queue.
    ///
    /// Events naming a CRTC other than the flipping one only advance the
    /// vblank counter. A crtc id of 0 matches any CRTC. Returns the
    /// completion event for the caller once the pending flip has been
    /// carried out, if the flip asked for one.
    pub fn handle_event(&self, event: &GenericDrmEvent) -> Result<Option<DrmVblankEvent>> {
        let mut guard = self.graph.lock();
        let g = &mut *guard;
        let (source, tv_sec, tv_usec) = match event {
            GenericDrmEvent::VBlank(v) | GenericDrmEvent::FlipComplete(v) => {
                (v.crtc_id, v.tv_sec, v.tv_usec)
            }
            GenericDrmEvent::CrtcSequence(c) => (
                0,
                c.time_ns.div_euclid(1_000_000_000) as u32,
                (c.time_ns.rem_euclid(1_000_000_000) / 1000) as u32,
            ),
        };
        let seq = event.sequence();
        g.vblank_seq = seq;

        let due = match g.flip {
            Some(flip) if source != 0 && source != flip.crtc_id.0 => {
                log::trace!(
                    "device {:?}: vblank on crtc {source} while flip waits on crtc {}",
                    self.id,
                    flip.crtc_id.0
                );
                false
            }
            Some(flip) => seq.wrapping_sub(flip.sequence) as i32 >= 0,
            None => false,
        };
        if !due {
            return Ok(None);
        }
        let Some(flip) = g.flip.take() else {
            return Ok(None);
        };
        let crtc = g.crtcs.get(flip.crtc).ok_or(Error::Invalid)?;
        let (connectors, x, y, mode) = (crtc.connectors.clone(), crtc.x, crtc.y, crtc.mode.clone());
        let ret = self.enable_crtc(g, flip.crtc, flip.fb, connectors, x, y, mode);
        self.release_fb(g, flip.fb);
        ret?;
        if !flip.event {
            return Ok(None);
        }

        Ok(Some(DrmVblankEvent {
            user_data: flip.user_data,
            tv_sec,
            tv_usec,
            sequence: seq,
            crtc_id: flip.crtc_id.0,
        }))
    }

    /// The vblank sequence last seen on `crtc`.
    pub fn wait_vblank(&self, crtc: CrtcId) -> Result<u32> {
        let g = self.graph.lock();
        self.resolve(crtc.0, ObjectKind::Crtc)?;
        Ok(g.vblank_seq)
    }

    pub fn pending_flip(&self) -> Option<PendingFlip> {
        self.graph.lock().flip
    }
}
