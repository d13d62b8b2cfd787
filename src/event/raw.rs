//! Raw DRM events as read from a card device.
//!
//! The kernel returns zero or more events back to back, each starting with
//! an eight-byte header that gives its type and total length. Bodies are
//! decoded field by field from native-endian bytes, so no alignment is
//! required of the read buffer.

/// A raw DRM event borrowed from a read buffer.
#[derive(Clone, Copy, Debug)]
pub struct DrmEvent<'a> {
    pub hdr: DrmEventHeader,
    body: &'a [u8],
}

/// Length of [`DrmEventHeader`] in bytes.
pub const HEADER_LEN: usize = 8;

impl<'a> DrmEvent<'a> {

    /// Given a byte slice that contains zero or more DRM events, obtain the
    /// first event and a slice of the remaining bytes, or `None` if there
    /// aren't enough bytes left to extract even one event.
    ///
    /// The only checking done is that the slice holds as many bytes as the
    /// header claims, and that the claimed length covers the header itself.
    pub fn from_bytes(buf: &'a [u8]) -> Option<(Self, &'a [u8])> {
        let hdr = DrmEventHeader {
            typ: read_u32(buf, 0)?,
            len: read_u32(buf, 4)?,
        };
        let claimed_len = hdr.len as usize;
        if claimed_len < HEADER_LEN || buf.len() < claimed_len {
            return None;
        }
        let body = &buf[HEADER_LEN..claimed_len];
        Some((Self { hdr, body }, &buf[claimed_len..]))
    }

    #[inline(always)]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    #[inline(always)]
    pub fn body_bytes(&self) -> &'a [u8] {
        self.body
    }
}

/// Raw DRM event header.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrmEventHeader {
    pub typ: u32,
    pub len: u32,
}

/// Vertical blanking event, sent in response to a vblank wait that asked
/// for an event.
///
/// The event body type is [`DrmEventVblank`].
pub const DRM_EVENT_VBLANK: u32 = 0x01;

/// Page-flip completion event.
///
/// The event body type is [`DrmEventVblank`].
pub const DRM_EVENT_FLIP_COMPLETE: u32 = 0x02;

/// CRTC sequence event.
///
/// The event body type is [`DrmEventCrtcSequence`].
pub const DRM_EVENT_CRTC_SEQUENCE: u32 = 0x03;

/// Types at or above this value are driver-specific.
pub const DRM_EVENT_DRIVER_BASE: u32 = 0x8000_0000;

/// The body of a [`DRM_EVENT_VBLANK`] event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrmEventVblank {
    pub user_data: u64,
    pub tv_sec: u32,
    pub tv_usec: u32,
    pub sequence: u32,
    pub crtc_id: u32, // always zero in older kernels that don't support this
}

impl DrmEventVblank {
    pub const LEN: usize = 24;

    pub fn decode(body: &[u8]) -> Option<Self> {
        Some(Self {
            user_data: read_u64(body, 0)?,
            tv_sec: read_u32(body, 8)?,
            tv_usec: read_u32(body, 12)?,
            sequence: read_u32(body, 16)?,
            crtc_id: read_u32(body, 20)?,
        })
    }

    pub fn encode(&self, typ: u32) -> [u8; HEADER_LEN + Self::LEN] {
        let mut buf = [0u8; HEADER_LEN + Self::LEN];
        let len = buf.len() as u32;
        buf[0..4].copy_from_slice(&typ.to_ne_bytes());
        buf[4..8].copy_from_slice(&len.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.user_data.to_ne_bytes());
        buf[16..20].copy_from_slice(&self.tv_sec.to_ne_bytes());
        buf[20..24].copy_from_slice(&self.tv_usec.to_ne_bytes());
        buf[24..28].copy_from_slice(&self.sequence.to_ne_bytes());
        buf[28..32].copy_from_slice(&self.crtc_id.to_ne_bytes());
        buf
    }
}

/// The body of a [`DRM_EVENT_CRTC_SEQUENCE`] event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrmEventCrtcSequence {
    pub user_data: u64,
    pub time_ns: i64,
    pub sequence: u64,
}

impl DrmEventCrtcSequence {
    pub fn decode(body: &[u8]) -> Option<Self> {
        Some(Self {
            user_data: read_u64(body, 0)?,
            time_ns: read_u64(body, 8)? as i64,
            sequence: read_u64(body, 16)?,
        })
    }
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at + 4)?;
    Some(u32::from_ne_bytes(bytes.try_into().ok()?))
}

fn read_u64(buf: &[u8], at: usize) -> Option<u64> {
    let bytes = buf.get(at..at + 8)?;
    Some(u64::from_ne_bytes(bytes.try_into().ok()?))
}

pub fn events_from_bytes<'a>(buf: &'a [u8]) -> impl Iterator<Item = DrmEvent<'a>> + 'a {
    DrmEventsFromBytes { remain: buf }
}

struct DrmEventsFromBytes<'a> {
    remain: &'a [u8],
}

impl<'a> Iterator for DrmEventsFromBytes<'a> {
    type Item = DrmEvent<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (ret, remain) = DrmEvent::from_bytes(self.remain)?;
        self.remain = remain;
        Some(ret)
    }
}
