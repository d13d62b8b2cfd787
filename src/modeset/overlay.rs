use std::sync::Arc;

use super::{
    DpmsMode, Layer, ModeInfo, Rect, DRM_MODE_FLAG_DBLSCAN, DRM_MODE_FLAG_INTERLACE,
    DRM_MODE_TYPE_DRIVER, DRM_MODE_TYPE_PREFERRED,
};
use crate::result::Result;

/// Scanout timing of a panel as reported by its framebuffer device.
///
/// `pixclock` is the pixel period in picoseconds; zero means the panel did
/// not report a timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PanelTiming {
    pub pixclock: u32,
    pub xres: u32,
    pub yres: u32,
    pub left_margin: u32,
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub interlaced: bool,
    pub double_scan: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenInfo {
    pub width_mm: u32,
    pub height_mm: u32,
    pub timing: PanelTiming,
}

/// One layer's configuration. `source: None` takes the layer down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlaySetting {
    pub layer: Layer,
    pub rect: Rect,
    pub format: u32,
    /// Global GEM name of the buffer to scan out.
    pub source: Option<u32>,
}

/// The panel behind a connector.
pub trait OverlaySink: Send + Sync {
    /// Queries the panel. An error means nothing is attached.
    fn screen_info(&self) -> Result<ScreenInfo>;
    fn unblank(&self) -> Result<()>;
    fn blank(&self) -> Result<()>;
    fn set_overlay(&self, setting: &OverlaySetting) -> Result<()>;
    /// Starts scanning out `name` on `layer`.
    fn display_overlay(&self, layer: Layer, name: u32) -> Result<()>;
}

/// Derives the panel's single preferred mode from its timing. Panels whose
/// timings overflow the mode's 16-bit fields get no mode.
pub(crate) fn mode_from_timing(t: &PanelTiming) -> Option<ModeInfo> {
    if t.pixclock == 0 {
        return None;
    }
    let khz = 1_000_000_000u32 / t.pixclock;

    let hsync_start = t.xres.saturating_add(t.right_margin);
    let hsync_end = hsync_start.saturating_add(t.hsync_len);
    let htotal = hsync_end.saturating_add(t.left_margin);
    let vsync_start = t.yres.saturating_add(t.lower_margin);
    let vsync_end = vsync_start.saturating_add(t.vsync_len);
    let full_vtotal = vsync_end.saturating_add(t.upper_margin);

    let mut vtotal = full_vtotal;
    if t.interlaced {
        vtotal /= 2;
    }
    if t.double_scan {
        vtotal = vtotal.saturating_mul(2);
    }
    let vrefresh = (u64::from(khz) * 1000)
        .checked_div(u64::from(htotal))
        .and_then(|hfreq| hfreq.checked_div(u64::from(vtotal)))
        .unwrap_or(0) as u32;

    let mut flags = 0;
    if t.interlaced {
        flags |= DRM_MODE_FLAG_INTERLACE;
    }
    if t.double_scan {
        flags |= DRM_MODE_FLAG_DBLSCAN;
    }

    let short = |v: u32| u16::try_from(v).ok();
    Some(ModeInfo {
        name: format!("{}x{}{}", t.xres, t.yres, if t.interlaced { "i" } else { "" }),
        clock: khz,
        hdisplay: short(t.xres)?,
        hsync_start: short(hsync_start)?,
        hsync_end: short(hsync_end)?,
        htotal: short(htotal)?,
        hskew: 0,
        vdisplay: short(t.yres)?,
        vsync_start: short(vsync_start)?,
        vsync_end: short(vsync_end)?,
        vtotal: short(full_vtotal)?,
        vscan: 0,
        vrefresh,
        flags,
        typ: DRM_MODE_TYPE_DRIVER | DRM_MODE_TYPE_PREFERRED,
    })
}

/// Power and layer state of one connector's panel.
pub(crate) struct Output {
    sink: Arc<dyn OverlaySink>,
    pub(crate) dpms: DpmsMode,
    pub(crate) layers: u32,
}

impl Output {
    pub(crate) fn new(sink: Arc<dyn OverlaySink>) -> Self {
        Self {
            sink,
            dpms: DpmsMode::Off,
            layers: 0,
        }
    }

    pub(crate) fn sink(&self) -> &Arc<dyn OverlaySink> {
        &self.sink
    }

    #[inline]
    pub(crate) fn has_layer(&self, layer: Layer) -> bool {
        self.layers & layer.bit() != 0
    }

    /// Shows buffer `name` on `layer`, powering the panel up first.
    pub(crate) fn program(&mut self, layer: Layer, rect: Rect, format: u32, name: u32) -> Result<()> {
        if self.dpms != DpmsMode::On {
            self.sink.unblank()?;
        }
        self.dpms = DpmsMode::On;
        self.sink.set_overlay(&OverlaySetting {
            layer,
            rect,
            format,
            source: Some(name),
        })?;
        self.sink.display_overlay(layer, name)?;
        self.layers |= layer.bit();
        Ok(())
    }

    /// Takes `layer` down. The panel is powered off with its last layer.
    pub(crate) fn unprogram(&mut self, layer: Layer) -> Result<()> {
        self.sink.set_overlay(&OverlaySetting {
            layer,
            rect: Rect::default(),
            format: 0,
            source: None,
        })?;
        self.layers &= !layer.bit();
        if self.layers == 0 && self.dpms != DpmsMode::Off {
            self.dpms = DpmsMode::Off;
            self.sink.blank()?;
        }
        Ok(())
    }

    pub(crate) fn set_dpms(&mut self, mode: DpmsMode) -> Result<()> {
        match (self.dpms, mode) {
            (DpmsMode::On, DpmsMode::On) => {}
            (_, DpmsMode::On) => self.sink.unblank()?,
            (DpmsMode::On, _) => self.sink.blank()?,
            _ => {}
        }
        self.dpms = mode;
        Ok(())
    }
}
