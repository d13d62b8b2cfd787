//! Events delivered by the kernel, or synthesized by an emulated display,
//! when vblanks pass and page flips complete.

pub mod raw;


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrmEvent {
    /// An event of a generic type that's defined for all DRM drivers.
    Generic(GenericDrmEvent),

    /// An event of a driver-specific type.
    Driver(UnsupportedDrmEvent),

    /// An event that is neither driver-specific nor recognized as a
    /// supported generic event type, or whose body was too short for its
    /// type.
    Unsupported(UnsupportedDrmEvent),
}

impl DrmEvent {
    pub fn from_raw(raw: &raw::DrmEvent<'_>) -> Self {
        if raw.hdr.typ >= raw::DRM_EVENT_DRIVER_BASE {
            Self::Driver(UnsupportedDrmEvent::from_raw(raw))
        } else if let Some(evt) = GenericDrmEvent::try_from_raw(raw) {
            Self::Generic(evt)
        } else {
            Self::Unsupported(UnsupportedDrmEvent::from_raw(raw))
        }
    }

    /// Decodes every complete event in `buf`.
    pub fn parse_all(buf: &[u8]) -> Vec<Self> {
        raw::events_from_bytes(buf)
            .map(|raw| Self::from_raw(&raw))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum GenericDrmEvent {
    VBlank(DrmVblankEvent),
    FlipComplete(DrmVblankEvent),
    CrtcSequence(DrmCrtcSequenceEvent),
}

impl GenericDrmEvent {
    pub fn try_from_raw(raw: &raw::DrmEvent<'_>) -> Option<Self> {
        let body = raw.body_bytes();
        match raw.hdr.typ {
            raw::DRM_EVENT_VBLANK => raw::DrmEventVblank::decode(body).map(|b| Self::VBlank(b.into())),
            raw::DRM_EVENT_FLIP_COMPLETE => {
                raw::DrmEventVblank::decode(body).map(|b| Self::FlipComplete(b.into()))
            }
            raw::DRM_EVENT_CRTC_SEQUENCE => {
                raw::DrmEventCrtcSequence::decode(body).map(|b| Self::CrtcSequence(b.into()))
            }
            _ => None,
        }
    }

    /// The vblank sequence number carried by the event, truncated to the
    /// 32 bits used for vblank counters.
    pub fn sequence(&self) -> u32 {
        match self {
            Self::VBlank(e) | Self::FlipComplete(e) => e.sequence,
            Self::CrtcSequence(e) => e.sequence as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrmVblankEvent {
    pub user_data: u64,
    pub tv_sec: u32,
    pub tv_usec: u32,
    pub sequence: u32,
    pub crtc_id: u32,
}

impl From<raw::DrmEventVblank> for DrmVblankEvent {
    fn from(value: raw::DrmEventVblank) -> Self {
        Self {
            user_data: value.user_data,
            tv_sec: value.tv_sec,
            tv_usec: value.tv_usec,
            sequence: value.sequence,
            crtc_id: value.crtc_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrmCrtcSequenceEvent {
    pub user_data: u64,
    pub time_ns: i64,
    pub sequence: u64,
}

impl From<raw::DrmEventCrtcSequence> for DrmCrtcSequenceEvent {
    fn from(value: raw::DrmEventCrtcSequence) -> Self {
        Self {
            user_data: value.user_data,
            time_ns: value.time_ns,
            sequence: value.sequence,
        }
    }
}

/// Raw owned representation of a DRM event of a type that this
/// crate doesn't directly support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedDrmEvent {
    typ: u32,
    body: Vec<u8>,
}

impl UnsupportedDrmEvent {
    pub fn from_raw(raw: &raw::DrmEvent<'_>) -> Self {
        Self {
            typ: raw.hdr.typ,
            body: raw.body_bytes().to_vec(),
        }
    }

    #[inline(always)]
    pub fn typ(&self) -> u32 {
        self.typ
    }

    #[inline(always)]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    #[inline(always)]
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }
}
