//! Argument records for every request the dispatcher routes.
//!
//! These are this crate's own layout rather than a copy of the kernel's
//! structures: lists are owned vectors instead of pointer/count pairs, and
//! replies are filled in as `Option`s. The records are versioned as a whole
//! by [`REQUEST_ABI_VERSION`].

use crate::modeset::{
    AddFb, AddFb2, CardResources, ConnectorId, ConnectorState, CrtcId, CrtcState, EncoderId,
    EncoderState, FramebufferId, FramebufferInfo, ModeInfo, PageFlipFlags, PlaneGeometry, PlaneId,
    PlaneState, PropertyId,
};
use crate::props::{ModeProp, PropertyFlags, PropertyValues};
use crate::result::{Error, Result};

/// Bumped whenever a record in this module changes shape.
pub const REQUEST_ABI_VERSION: u32 = 1;

/// Arguments going in, and the reply filled in by whoever handled the
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Exchange<A, R> {
    pub args: A,
    pub reply: Option<R>,
}

impl<A, R> Exchange<A, R> {
    pub fn new(args: A) -> Self {
        Self { args, reply: None }
    }

    /// The reply, or [`Error::RemoteFailure`] if the handler reported
    /// success without producing one.
    pub fn into_reply(self) -> Result<R> {
        self.reply.ok_or(Error::RemoteFailure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionInfo {
    pub major: i32,
    pub minor: i32,
    pub patchlevel: i32,
    pub name: String,
    pub date: String,
    pub desc: String,
}

/// A GEM object the device created or opened for us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GemObject {
    pub handle: u32,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetCrtc {
    pub crtc_id: CrtcId,
    pub fb_id: FramebufferId,
    pub x: u32,
    pub y: u32,
    pub connectors: Vec<u32>,
    pub mode: Option<ModeInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetPlane {
    pub plane_id: PlaneId,
    pub crtc_id: CrtcId,
    pub fb_id: FramebufferId,
    pub geometry: PlaneGeometry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetProperty {
    pub object_id: u32,
    pub prop_id: PropertyId,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub id: PropertyId,
    pub name: String,
    pub flags: PropertyFlags,
    pub values: PropertyValues,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageFlip {
    pub crtc_id: CrtcId,
    pub fb_id: FramebufferId,
    pub flags: PageFlipFlags,
    pub user_data: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceCreate {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub scanout: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceInfo {
    pub handle: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub scanout: bool,
    pub size: u32,
    pub id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GemMap {
    pub handle: u32,
    pub track_access: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceAccess {
    pub address: usize,
    pub saf: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceSync {
    pub address: usize,
    pub sync: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FenceCreated {
    pub handle: u32,
    pub seq: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneZpos {
    pub plane_id: u32,
    pub zpos: i32,
}

/// Identifies a kind of request, independently of its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCode {
    Version,
    GemClose,
    GemFlink,
    GemOpen,
    GetResources,
    GetCrtc,
    SetCrtc,
    GetEncoder,
    GetConnector,
    GetPlaneResources,
    GetPlane,
    SetPlane,
    GetProperty,
    SetProperty,
    ObjGetProperties,
    ObjSetProperty,
    AddFb,
    AddFb2,
    RmFb,
    GetFb,
    PageFlip,
    WaitVblank,
    VigsProtocolVersion,
    VigsCreateSurface,
    VigsCreateExecbuffer,
    VigsGemMap,
    VigsGemWait,
    VigsSurfaceInfo,
    VigsExec,
    VigsSurfaceSetGpuDirty,
    VigsSurfaceStartAccess,
    VigsSurfaceEndAccess,
    VigsCreateFence,
    VigsFenceWait,
    VigsFenceSignaled,
    VigsFenceUnref,
    VigsPlaneSetZpos,
}

impl RequestCode {
    /// Request codes a display device answers itself.
    pub const DISPLAY: [Self; 18] = [
        Self::GetResources,
        Self::GetCrtc,
        Self::SetCrtc,
        Self::GetEncoder,
        Self::GetConnector,
        Self::GetPlaneResources,
        Self::GetPlane,
        Self::SetPlane,
        Self::GetProperty,
        Self::SetProperty,
        Self::ObjGetProperties,
        Self::ObjSetProperty,
        Self::AddFb,
        Self::AddFb2,
        Self::RmFb,
        Self::GetFb,
        Self::PageFlip,
        Self::WaitVblank,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Version(Exchange<(), VersionInfo>),
    GemClose(u32),
    /// Handle in, global name out.
    GemFlink(Exchange<u32, u32>),
    /// Global name in, local object out.
    GemOpen(Exchange<u32, GemObject>),

    GetResources(Exchange<(), CardResources>),
    GetCrtc(Exchange<CrtcId, CrtcState>),
    SetCrtc(SetCrtc),
    GetEncoder(Exchange<EncoderId, EncoderState>),
    GetConnector(Exchange<ConnectorId, ConnectorState>),
    GetPlaneResources(Exchange<(), Vec<PlaneId>>),
    GetPlane(Exchange<PlaneId, PlaneState>),
    SetPlane(SetPlane),
    GetProperty(Exchange<PropertyId, PropertyInfo>),
    /// Sets a connector property.
    SetProperty(SetProperty),
    ObjGetProperties(Exchange<u32, Vec<ModeProp>>),
    ObjSetProperty(SetProperty),
    AddFb(Exchange<AddFb, FramebufferId>),
    AddFb2(Exchange<AddFb2, FramebufferId>),
    RmFb(FramebufferId),
    GetFb(Exchange<FramebufferId, FramebufferInfo>),
    PageFlip(PageFlip),
    /// CRTC in, current vblank sequence out.
    WaitVblank(Exchange<CrtcId, u32>),

    VigsProtocolVersion(Exchange<(), u32>),
    VigsCreateSurface(Exchange<SurfaceCreate, SurfaceInfo>),
    /// Size in, buffer out.
    VigsCreateExecbuffer(Exchange<u32, GemObject>),
    /// Mapped address out.
    VigsGemMap(Exchange<GemMap, usize>),
    VigsGemWait(u32),
    VigsSurfaceInfo(Exchange<u32, SurfaceInfo>),
    VigsExec(u32),
    VigsSurfaceSetGpuDirty(u32),
    VigsSurfaceStartAccess(SurfaceAccess),
    VigsSurfaceEndAccess(SurfaceSync),
    /// Whether to send the fence right away in, fence out.
    VigsCreateFence(Exchange<bool, FenceCreated>),
    VigsFenceWait(u32),
    VigsFenceSignaled(Exchange<u32, bool>),
    VigsFenceUnref(u32),
    VigsPlaneSetZpos(PlaneZpos),
}

impl Request {
    pub fn code(&self) -> RequestCode {
        use RequestCode as C;
        match self {
            Self::Version(_) => C::Version,
            Self::GemClose(_) => C::GemClose,
            Self::GemFlink(_) => C::GemFlink,
            Self::GemOpen(_) => C::GemOpen,
            Self::GetResources(_) => C::GetResources,
            Self::GetCrtc(_) => C::GetCrtc,
            Self::SetCrtc(_) => C::SetCrtc,
            Self::GetEncoder(_) => C::GetEncoder,
            Self::GetConnector(_) => C::GetConnector,
            Self::GetPlaneResources(_) => C::GetPlaneResources,
            Self::GetPlane(_) => C::GetPlane,
            Self::SetPlane(_) => C::SetPlane,
            Self::GetProperty(_) => C::GetProperty,
            Self::SetProperty(_) => C::SetProperty,
            Self::ObjGetProperties(_) => C::ObjGetProperties,
            Self::ObjSetProperty(_) => C::ObjSetProperty,
            Self::AddFb(_) => C::AddFb,
            Self::AddFb2(_) => C::AddFb2,
            Self::RmFb(_) => C::RmFb,
            Self::GetFb(_) => C::GetFb,
            Self::PageFlip(_) => C::PageFlip,
            Self::WaitVblank(_) => C::WaitVblank,
            Self::VigsProtocolVersion(_) => C::VigsProtocolVersion,
            Self::VigsCreateSurface(_) => C::VigsCreateSurface,
            Self::VigsCreateExecbuffer(_) => C::VigsCreateExecbuffer,
            Self::VigsGemMap(_) => C::VigsGemMap,
            Self::VigsGemWait(_) => C::VigsGemWait,
            Self::VigsSurfaceInfo(_) => C::VigsSurfaceInfo,
            Self::VigsExec(_) => C::VigsExec,
            Self::VigsSurfaceSetGpuDirty(_) => C::VigsSurfaceSetGpuDirty,
            Self::VigsSurfaceStartAccess(_) => C::VigsSurfaceStartAccess,
            Self::VigsSurfaceEndAccess(_) => C::VigsSurfaceEndAccess,
            Self::VigsCreateFence(_) => C::VigsCreateFence,
            Self::VigsFenceWait(_) => C::VigsFenceWait,
            Self::VigsFenceSignaled(_) => C::VigsFenceSignaled,
            Self::VigsFenceUnref(_) => C::VigsFenceUnref,
            Self::VigsPlaneSetZpos(_) => C::VigsPlaneSetZpos,
        }
    }
}
