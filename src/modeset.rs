//! Emulated display resources: CRTCs, connectors, encoders, planes and
//! framebuffers, and the modeset transitions between them.
//!
//! A [`Device`] answers the kernel's mode-setting requests itself by driving
//! overlay layers of a panel through an [`OverlaySink`], for display
//! controllers that have no kernel mode-setting driver of their own.

use core::ops::BitOr;

pub mod format;
mod flip;
mod framebuffer;
mod graph;
mod hooks;
mod overlay;

#[cfg(test)]
mod tests;

pub use flip::PendingFlip;
pub use framebuffer::{AddFb, AddFb2, FramebufferInfo};
pub use graph::{Device, Registry};
pub use hooks::display_hooks;
pub use overlay::{OverlaySetting, OverlaySink, PanelTiming, ScreenInfo};

use crate::handle::HandleTable;
use crate::list::SlotKey;
use crate::props::{ModeProp, PropertyObject, PropertyRef};
use crate::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct FramebufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct CrtcId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ConnectorId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct EncoderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct PlaneId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct PropertyId(pub u32);

/// Which kind of display resource a table entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Crtc,
    Connector,
    Encoder,
    Plane,
    Framebuffer,
}

/// Payload of the id table shared by every display device.
///
/// Display resources are tagged with their owning device because one table
/// serves all devices; a device never resolves an id another device
/// registered.
#[derive(Debug, Clone)]
pub enum Object {
    Display {
        device: DeviceId,
        kind: ObjectKind,
        key: SlotKey,
    },
    Property(PropertyRef),
}

impl PropertyObject for Object {
    fn from_property(prop: PropertyRef) -> Self {
        Self::Property(prop)
    }

    fn as_property(&self) -> Option<&PropertyRef> {
        match self {
            Self::Property(p) => Some(p),
            Self::Display { .. } => None,
        }
    }
}

pub type DisplayTable = HandleTable<Object>;

/// Topology of the emulated display controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub crtcs: u32,
    pub planes: u32,
    /// zpos of the layer a CRTC's own framebuffer is shown on.
    pub default_zpos: u32,
    /// Pixel formats every plane accepts.
    pub formats: Vec<u32>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            crtcs: 1,
            planes: 2,
            default_zpos: Layer::Osd.zpos(),
            formats: format::DEFAULT_PLANE_FORMATS.to_vec(),
        }
    }
}

/// Overlay layers of the panel, as bits of a connector's active-layer mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Layer {
    Img = 1,
    Osd = 2,
}

impl Layer {
    pub const MAX_ZPOS: u32 = 1;

    pub fn from_zpos(zpos: u32) -> Option<Self> {
        match zpos {
            0 => Some(Self::Img),
            1 => Some(Self::Osd),
            _ => None,
        }
    }

    pub fn zpos(self) -> u32 {
        match self {
            Self::Img => 0,
            Self::Osd => 1,
        }
    }

    #[inline(always)]
    pub fn bit(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum DpmsMode {
    On = 0,
    Standby = 1,
    Suspend = 2,
    Off = 3,
}

impl DpmsMode {
    pub fn from_raw(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::On),
            1 => Some(Self::Standby),
            2 => Some(Self::Suspend),
            3 => Some(Self::Off),
            _ => None,
        }
    }
}

/// A rectangle on the panel, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

/// Where a plane is shown and which part of its framebuffer is sampled.
/// Source coordinates are 16.16 fixed point, as in the kernel interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneGeometry {
    pub crtc: Rect,
    pub src_x: u32,
    pub src_y: u32,
    pub src_w: u32,
    pub src_h: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CardResources {
    pub fb_ids: Vec<FramebufferId>,
    pub crtc_ids: Vec<CrtcId>,
    pub connector_ids: Vec<ConnectorId>,
    pub encoder_ids: Vec<EncoderId>,
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorState {
    pub id: ConnectorId,
    pub current_encoder_id: EncoderId,
    pub connector_type: ConnectorType,
    pub connector_type_id: u32,
    pub connection_state: ConnectionState,
    pub width_mm: u32,
    pub height_mm: u32,
    pub subpixel_type: SubpixelType,
    pub modes: Vec<ModeInfo>,
    pub props: Vec<ModeProp>,
    pub available_encoder_ids: Vec<EncoderId>,
}

impl ConnectorState {
    pub fn preferred_mode(&self) -> Option<&ModeInfo> {
        self.modes.iter().find(|m| m.is_preferred())
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u32)]
pub enum ConnectionState {
    Connected = 1,
    Disconnected = 2,
    Unknown = 3,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u32)]
pub enum ConnectorType {
    Unknown = 0,
    Vga = 1,
    Lvds = 7,
    HdmiA = 11,
    Virtual = 15,
    Dsi = 16,
}

pub const DRM_MODE_ENCODER_LVDS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderState {
    pub encoder_id: EncoderId,
    pub encoder_type: u32,
    pub current_crtc_id: CrtcId,
    pub possible_crtcs: u32,
    pub possible_clones: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrtcState {
    pub crtc_id: CrtcId,
    pub fb_id: FramebufferId,
    pub x: u32,
    pub y: u32,
    pub gamma_size: u32,
    pub active: bool,
    pub connector_ids: Vec<ConnectorId>,
    pub mode: Option<ModeInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneState {
    pub id: PlaneId,
    pub crtc_id: CrtcId,
    pub fb_id: FramebufferId,
    pub possible_crtcs: u32,
    pub gamma_size: u32,
    pub zpos: u32,
    pub geometry: PlaneGeometry,
    pub formats: Vec<u32>,
}

pub const DRM_MODE_TYPE_PREFERRED: u32 = 1 << 3;
pub const DRM_MODE_TYPE_DRIVER: u32 = 1 << 6;
pub const DRM_MODE_FLAG_INTERLACE: u32 = 1 << 4;
pub const DRM_MODE_FLAG_DBLSCAN: u32 = 1 << 5;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModeInfo {
    pub name: String,
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    pub vrefresh: u32,
    pub flags: u32,
    pub typ: u32,
}

impl ModeInfo {
    #[inline]
    pub fn is_preferred(&self) -> bool {
        self.typ & DRM_MODE_TYPE_PREFERRED != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SubpixelType {
    Unknown = 1,
    HorizontalRgb = 2,
    HorizontalBgr = 3,
    VerticalRgb = 4,
    VerticalBgr = 5,
    None = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageFlipFlags(u32);

impl PageFlipFlags {
    pub const NONE: Self = Self(0);
    pub const EVENT: Self = Self(crate::ioctl::DRM_MODE_PAGE_FLIP_EVENT);
    pub const ASYNC: Self = Self(crate::ioctl::DRM_MODE_PAGE_FLIP_ASYNC);

    #[inline(always)]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PageFlipFlags {
    type Output = Self;

    #[inline(always)]
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl From<PageFlipFlags> for u32 {
    #[inline(always)]
    fn from(value: PageFlipFlags) -> Self {
        value.0
    }
}
