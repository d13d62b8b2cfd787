use std::sync::{Arc, Mutex};

use super::overlay::mode_from_timing;
use super::{
    format, AddFb, AddFb2, ConnectionState, ConnectorId, CrtcId, Device, DeviceConfig,
    DisplayTable, DpmsMode, FramebufferId, Layer, OverlaySetting, OverlaySink, PageFlipFlags,
    PanelTiming, PlaneGeometry, PlaneId, Rect, Registry, ScreenInfo, DRM_MODE_FLAG_INTERLACE,
};
use crate::dispatch::request::{PageFlip, SetCrtc, SetPlane};
use crate::dispatch::{DeviceCall, Dispatcher, Exchange, Request, RequestCode};
use crate::event::{DrmVblankEvent, GenericDrmEvent};
use crate::result::{Error, Result};
use crate::DeviceId;

fn init_logger() {
    let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Trace, simplelog::Config::default());
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Unblank,
    Blank,
    Overlay(OverlaySetting),
    Display(Layer, u32),
}

#[derive(Default)]
struct MockSink {
    calls: Mutex<Vec<Call>>,
    /// Buffer names `display_overlay` refuses to show.
    fail_names: Mutex<Vec<u32>>,
    no_panel: bool,
}

impl MockSink {
    fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn fail_on(&self, name: u32) {
        self.fail_names.lock().unwrap().push(name);
    }
}

fn panel_timing() -> PanelTiming {
    PanelTiming {
        pixclock: 30000,
        xres: 800,
        yres: 480,
        left_margin: 40,
        right_margin: 40,
        upper_margin: 29,
        lower_margin: 13,
        hsync_len: 48,
        vsync_len: 3,
        interlaced: false,
        double_scan: false,
    }
}

impl OverlaySink for MockSink {
    fn screen_info(&self) -> Result<ScreenInfo> {
        if self.no_panel {
            return Err(Error::Disconnected);
        }
        Ok(ScreenInfo {
            width_mm: 154,
            height_mm: 86,
            timing: panel_timing(),
        })
    }

    fn unblank(&self) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Unblank);
        Ok(())
    }

    fn blank(&self) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Blank);
        Ok(())
    }

    fn set_overlay(&self, setting: &OverlaySetting) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Overlay(*setting));
        Ok(())
    }

    fn display_overlay(&self, layer: Layer, name: u32) -> Result<()> {
        if self.fail_names.lock().unwrap().contains(&name) {
            return Err(Error::GraphicsMem);
        }
        self.calls.lock().unwrap().push(Call::Display(layer, name));
        Ok(())
    }
}

/// Publishes handle `h` as name `h + 100`; handle 99 has no name.
struct FakeCall;

impl DeviceCall for FakeCall {
    fn perform_request(&self, req: &mut Request) -> Result<()> {
        match req {
            Request::GemFlink(x) => {
                x.reply = Some(if x.args == 99 { 0 } else { x.args + 100 });
                Ok(())
            }
            _ => Err(Error::NotSupported),
        }
    }

    fn unmap(&self, _addr: usize, _len: usize) -> Result<()> {
        Ok(())
    }
}

struct Setup {
    dev: Arc<Device>,
    sink: Arc<MockSink>,
    table: Arc<DisplayTable>,
    crtc: CrtcId,
    conn: ConnectorId,
}

fn setup_with(sink: MockSink) -> Setup {
    setup_config(DeviceConfig::default(), sink)
}

fn setup_config(config: DeviceConfig, sink: MockSink) -> Setup {
    init_logger();
    let sink = Arc::new(sink);
    let table = Arc::new(DisplayTable::new());
    let dev = Arc::new(
        Device::create(
            DeviceId(1),
            config,
            table.clone(),
            Arc::new(FakeCall),
            sink.clone(),
        )
        .unwrap(),
    );
    let res = dev.resources();
    Setup {
        crtc: res.crtc_ids[0],
        conn: res.connector_ids[0],
        dev,
        sink,
        table,
    }
}

fn setup() -> Setup {
    setup_with(MockSink::default())
}

fn add_fb(dev: &Device, handle: u32) -> FramebufferId {
    dev.add_fb(&AddFb {
        width: 800,
        height: 480,
        pitch: 3200,
        bpp: 32,
        depth: 24,
        handle,
    })
    .unwrap()
}

fn enable(s: &Setup, fb: FramebufferId) -> Result<()> {
    s.dev.set_crtc(&SetCrtc {
        crtc_id: s.crtc,
        fb_id: fb,
        x: 0,
        y: 0,
        connectors: vec![s.conn.0],
        mode: None,
    })
}

fn disable(s: &Setup) {
    s.dev
        .set_crtc(&SetCrtc {
            crtc_id: s.crtc,
            ..SetCrtc::default()
        })
        .unwrap();
}

fn plane_with_zpos(dev: &Device, zpos: u32) -> PlaneId {
    dev.plane_resources()
        .into_iter()
        .find(|id| dev.plane(*id).unwrap().zpos == zpos)
        .unwrap()
}

fn plane_req(s: &Setup, plane: PlaneId, fb: FramebufferId) -> SetPlane {
    SetPlane {
        plane_id: plane,
        crtc_id: s.crtc,
        fb_id: fb,
        geometry: PlaneGeometry {
            crtc: Rect {
                x: 10,
                y: 20,
                w: 320,
                h: 240,
            },
            src_w: 320 << 16,
            src_h: 240 << 16,
            ..PlaneGeometry::default()
        },
    }
}

#[test]
fn builds_default_topology() {
    let s = setup();
    let res = s.dev.resources();
    assert_eq!(res.crtc_ids.len(), 1);
    assert_eq!(res.connector_ids.len(), 1);
    assert_eq!(res.encoder_ids.len(), 1);
    assert!(res.fb_ids.is_empty());

    let mut zpos: Vec<u32> = s
        .dev
        .plane_resources()
        .into_iter()
        .map(|id| s.dev.plane(id).unwrap().zpos)
        .collect();
    zpos.sort_unstable();
    assert_eq!(zpos, [0, 1]);

    let enc = s.dev.encoder(res.encoder_ids[0]).unwrap();
    assert_eq!(enc.possible_crtcs, 1);
    assert_eq!(enc.current_crtc_id, CrtcId(0));

    let conn = s.dev.connector(s.conn).unwrap();
    assert_eq!(conn.connection_state, ConnectionState::Connected);
    assert_eq!(conn.width_mm, 154);
    assert_eq!(conn.available_encoder_ids, [res.encoder_ids[0]]);
    let mode = conn.preferred_mode().unwrap();
    assert_eq!(mode.name, "800x480");
    assert_eq!(mode.clock, 33333);
    assert_eq!(mode.htotal, 928);
    assert_eq!(mode.vtotal, 525);
    assert_eq!(mode.vrefresh, 68);
    assert_eq!(conn.props.len(), 1);
    assert_eq!(conn.props[0].prop_id, s.dev.dpms_property());
    assert_eq!(conn.props[0].value, DpmsMode::Off as u64);
}

#[test]
fn missing_panel_leaves_connector_disconnected() {
    let s = setup_with(MockSink {
        no_panel: true,
        ..MockSink::default()
    });
    let conn = s.dev.connector(s.conn).unwrap();
    assert_eq!(conn.connection_state, ConnectionState::Disconnected);
    assert!(conn.modes.is_empty());
}

#[test]
fn mode_follows_panel_timing() {
    let mut t = panel_timing();
    t.interlaced = true;
    let mode = mode_from_timing(&t).unwrap();
    assert_eq!(mode.name, "800x480i");
    assert_ne!(mode.flags & DRM_MODE_FLAG_INTERLACE, 0);
    assert!(mode.is_preferred());

    t.pixclock = 0;
    assert!(mode_from_timing(&t).is_none());
}

#[test]
fn oversized_timing_yields_no_mode() {
    let mut t = panel_timing();
    t.xres = 65_000;
    assert!(mode_from_timing(&t).is_none());

    let mut t = panel_timing();
    t.upper_margin = u32::MAX;
    assert!(mode_from_timing(&t).is_none());
}

#[test]
fn rejects_invalid_config() {
    init_logger();
    let table = Arc::new(DisplayTable::new());
    let config = DeviceConfig {
        crtcs: 0,
        ..DeviceConfig::default()
    };
    let err = Device::create(
        DeviceId(1),
        config,
        table.clone(),
        Arc::new(FakeCall),
        Arc::new(MockSink::default()),
    )
    .unwrap_err();
    assert_eq!(err, Error::Invalid);
    assert!(table.is_empty());
}

#[test]
fn add_fb_publishes_buffer() {
    let s = setup();
    let fb = add_fb(&s.dev, 1);
    let info = s.dev.get_fb(fb).unwrap();
    assert_eq!(info.pixel_format, format::XRGB8888);
    assert_eq!((info.bpp, info.depth), (32, 24));
    assert_eq!(info.pitch, 3200);
    assert_eq!(s.dev.fb_ref_count(fb), Some(1));
    assert_eq!(s.dev.resources().fb_ids, [fb]);
}

#[test]
fn add_fb_needs_a_global_name() {
    let s = setup();
    let ret = s.dev.add_fb(&AddFb {
        width: 64,
        height: 64,
        pitch: 256,
        bpp: 32,
        depth: 24,
        handle: 99,
    });
    assert_eq!(ret, Err(Error::Permission));

    let ret = s.dev.add_fb2(&AddFb2 {
        width: 64,
        height: 64,
        pixel_format: format::XRGB8888,
        ..AddFb2::default()
    });
    assert_eq!(ret, Err(Error::Invalid));
    assert!(s.dev.resources().fb_ids.is_empty());
}

#[test]
fn yuv_framebuffer_has_no_depth() {
    let s = setup();
    let fb = s
        .dev
        .add_fb2(&AddFb2 {
            width: 64,
            height: 64,
            pixel_format: format::YUV420,
            handles: [1, 1, 1, 0],
            pitches: [64, 32, 32, 0],
            offsets: [0, 4096, 5120, 0],
            ..AddFb2::default()
        })
        .unwrap();
    let info = s.dev.get_fb(fb).unwrap();
    assert_eq!((info.bpp, info.depth), (0, 0));
}

#[test]
fn set_crtc_shows_framebuffer() {
    let s = setup();
    let fb = add_fb(&s.dev, 1);
    s.sink.take();

    enable(&s, fb).unwrap();
    assert_eq!(
        s.sink.take(),
        [
            Call::Unblank,
            Call::Overlay(OverlaySetting {
                layer: Layer::Osd,
                rect: Rect {
                    x: 0,
                    y: 0,
                    w: 800,
                    h: 480,
                },
                format: format::XRGB8888,
                source: Some(101),
            }),
            Call::Display(Layer::Osd, 101),
        ]
    );

    let crtc = s.dev.crtc(s.crtc).unwrap();
    assert!(crtc.active);
    assert_eq!(crtc.fb_id, fb);
    assert_eq!(crtc.connector_ids, [s.conn]);
    assert_eq!(crtc.mode.unwrap().name, "800x480");
    assert_eq!(s.dev.fb_ref_count(fb), Some(2));

    let enc = s.dev.connector(s.conn).unwrap().current_encoder_id;
    assert_eq!(s.dev.encoder(enc).unwrap().current_crtc_id, s.crtc);
    let dpms = s.dev.get_properties(s.conn.0).unwrap();
    assert_eq!(dpms[0].value, DpmsMode::On as u64);
}

#[test]
fn set_crtc_checks_every_id_first() {
    let s = setup();
    let fb = add_fb(&s.dev, 1);
    s.sink.take();

    let ret = s.dev.set_crtc(&SetCrtc {
        crtc_id: s.crtc,
        fb_id: fb,
        connectors: vec![s.conn.0, 0xdead],
        ..SetCrtc::default()
    });
    assert_eq!(ret, Err(Error::Invalid));
    // A plane id is not a connector.
    let plane = s.dev.plane_resources()[0];
    let ret = s.dev.set_crtc(&SetCrtc {
        crtc_id: s.crtc,
        fb_id: fb,
        connectors: vec![plane.0],
        ..SetCrtc::default()
    });
    assert_eq!(ret, Err(Error::Invalid));
    let ret = s.dev.set_crtc(&SetCrtc {
        crtc_id: s.crtc,
        fb_id: fb,
        ..SetCrtc::default()
    });
    assert_eq!(ret, Err(Error::Invalid));

    assert!(s.sink.take().is_empty());
    assert!(!s.dev.crtc(s.crtc).unwrap().active);
    assert_eq!(s.dev.fb_ref_count(fb), Some(1));
}

#[test]
fn disabling_twice_changes_nothing() {
    let s = setup();
    let fb = add_fb(&s.dev, 1);
    enable(&s, fb).unwrap();
    s.sink.take();

    disable(&s);
    assert_eq!(
        s.sink.take(),
        [
            Call::Overlay(OverlaySetting {
                layer: Layer::Osd,
                rect: Rect::default(),
                format: 0,
                source: None,
            }),
            Call::Blank,
        ]
    );
    assert_eq!(s.dev.fb_ref_count(fb), Some(1));

    disable(&s);
    assert!(s.sink.take().is_empty());
    assert_eq!(s.dev.fb_ref_count(fb), Some(1));
    let crtc = s.dev.crtc(s.crtc).unwrap();
    assert!(!crtc.active);
    assert_eq!(crtc.fb_id, FramebufferId(0));
    assert!(crtc.connector_ids.is_empty());
}

#[test]
fn failed_modeset_restores_previous_framebuffer() {
    let s = setup();
    let old = add_fb(&s.dev, 1);
    let new = add_fb(&s.dev, 2);
    enable(&s, old).unwrap();
    s.sink.take();
    s.sink.fail_on(102);

    assert_eq!(enable(&s, new), Err(Error::GraphicsMem));
    let calls = s.sink.take();
    assert_eq!(calls.last(), Some(&Call::Display(Layer::Osd, 101)));

    let crtc = s.dev.crtc(s.crtc).unwrap();
    assert_eq!(crtc.fb_id, old);
    assert_eq!(s.dev.fb_ref_count(old), Some(2));
    assert_eq!(s.dev.fb_ref_count(new), Some(1));
}

#[test]
fn failed_rollback_reports_died() {
    let s = setup();
    let old = add_fb(&s.dev, 1);
    let new = add_fb(&s.dev, 2);
    enable(&s, old).unwrap();
    s.sink.fail_on(101);
    s.sink.fail_on(102);

    assert_eq!(enable(&s, new), Err(Error::Died));
    assert_eq!(s.dev.fb_ref_count(new), Some(1));
}

#[test]
fn first_enable_failure_powers_panel_back_down() {
    let s = setup();
    let fb = add_fb(&s.dev, 1);
    s.sink.take();
    s.sink.fail_on(101);

    assert_eq!(enable(&s, fb), Err(Error::GraphicsMem));
    assert_eq!(s.sink.take().last(), Some(&Call::Blank));
    assert!(!s.dev.crtc(s.crtc).unwrap().active);
    assert_eq!(s.dev.fb_ref_count(fb), Some(1));
}

#[test]
fn set_plane_programs_its_layer() {
    let s = setup();
    let base = add_fb(&s.dev, 1);
    let overlay = add_fb(&s.dev, 2);
    enable(&s, base).unwrap();
    let plane = plane_with_zpos(&s.dev, 0);
    s.sink.take();

    let req = plane_req(&s, plane, overlay);
    s.dev.set_plane(&req).unwrap();
    assert_eq!(s.sink.take().last(), Some(&Call::Display(Layer::Img, 102)));
    assert_eq!(s.dev.fb_ref_count(overlay), Some(2));
    let state = s.dev.plane(plane).unwrap();
    assert_eq!(state.crtc_id, s.crtc);
    assert_eq!(state.fb_id, overlay);
    assert_eq!(state.geometry, req.geometry);

    s.dev.set_plane(&req).unwrap();
    assert!(s.sink.take().is_empty());
    assert_eq!(s.dev.fb_ref_count(overlay), Some(2));

    let detach = SetPlane {
        plane_id: plane,
        ..SetPlane::default()
    };
    s.dev.set_plane(&detach).unwrap();
    assert_eq!(
        s.sink.take(),
        [Call::Overlay(OverlaySetting {
            layer: Layer::Img,
            rect: Rect::default(),
            format: 0,
            source: None,
        })]
    );
    assert_eq!(s.dev.fb_ref_count(overlay), Some(1));
    s.dev.set_plane(&detach).unwrap();
    assert!(s.sink.take().is_empty());
}

#[test]
fn failed_plane_update_restores_previous_framebuffer() {
    let s = setup();
    let base = add_fb(&s.dev, 1);
    let first = add_fb(&s.dev, 2);
    let second = add_fb(&s.dev, 3);
    enable(&s, base).unwrap();
    let plane = plane_with_zpos(&s.dev, 0);
    s.dev.set_plane(&plane_req(&s, plane, first)).unwrap();
    s.sink.take();
    s.sink.fail_on(103);

    assert_eq!(
        s.dev.set_plane(&plane_req(&s, plane, second)),
        Err(Error::GraphicsMem)
    );
    assert_eq!(s.sink.take().last(), Some(&Call::Display(Layer::Img, 102)));
    let state = s.dev.plane(plane).unwrap();
    assert_eq!(state.fb_id, first);
    assert_eq!(state.crtc_id, s.crtc);
    assert_eq!(s.dev.fb_ref_count(first), Some(2));
    assert_eq!(s.dev.fb_ref_count(second), Some(1));
}

#[test]
fn connector_moves_between_crtcs() {
    let s = setup_config(
        DeviceConfig {
            crtcs: 2,
            ..DeviceConfig::default()
        },
        MockSink::default(),
    );
    let other = s.dev.resources().crtc_ids[1];
    let front = add_fb(&s.dev, 1);
    let back = add_fb(&s.dev, 2);
    let overlay = add_fb(&s.dev, 3);
    enable(&s, front).unwrap();
    let plane = plane_with_zpos(&s.dev, 0);
    s.dev.set_plane(&plane_req(&s, plane, overlay)).unwrap();
    s.sink.take();

    s.dev
        .set_crtc(&SetCrtc {
            crtc_id: other,
            fb_id: back,
            connectors: vec![s.conn.0],
            ..SetCrtc::default()
        })
        .unwrap();
    let calls = s.sink.take();
    assert!(!calls.contains(&Call::Blank));
    assert!(calls.contains(&Call::Display(Layer::Osd, 102)));
    assert_eq!(
        calls.last(),
        Some(&Call::Overlay(OverlaySetting {
            layer: Layer::Img,
            rect: Rect::default(),
            format: 0,
            source: None,
        }))
    );

    let first = s.dev.crtc(s.crtc).unwrap();
    assert!(!first.active);
    assert!(first.connector_ids.is_empty());
    assert_eq!(first.fb_id, FramebufferId(0));
    assert_eq!(s.dev.plane(plane).unwrap().fb_id, FramebufferId(0));
    assert_eq!(s.dev.fb_ref_count(front), Some(1));
    assert_eq!(s.dev.fb_ref_count(overlay), Some(1));
    let second = s.dev.crtc(other).unwrap();
    assert!(second.active);
    assert_eq!(second.connector_ids, [s.conn]);
    let encoder = s.dev.connector(s.conn).unwrap().current_encoder_id;
    assert_eq!(s.dev.encoder(encoder).unwrap().current_crtc_id, other);

    // Turning the old CRTC off again leaves the panel alone.
    disable(&s);
    assert!(s.sink.take().is_empty());
    assert!(s.dev.crtc(other).unwrap().active);
    assert_eq!(
        s.dev.get_properties(s.conn.0).unwrap()[0].value,
        DpmsMode::On as u64
    );
}

#[test]
fn framebuffer_shared_by_planes_outlives_rm_fb() {
    let s = setup();
    let fb = add_fb(&s.dev, 1);
    let img = plane_with_zpos(&s.dev, 0);
    let osd = plane_with_zpos(&s.dev, 1);
    s.dev.set_plane(&plane_req(&s, img, fb)).unwrap();
    s.dev.set_plane(&plane_req(&s, osd, fb)).unwrap();
    assert_eq!(s.dev.fb_ref_count(fb), Some(3));

    s.dev.rm_fb(fb).unwrap();
    assert_eq!(s.dev.fb_ref_count(fb), Some(2));
    assert_eq!(s.dev.get_fb(fb), Err(Error::NonExist));
    assert_eq!(s.dev.rm_fb(fb), Err(Error::Invalid));
    assert_eq!(s.dev.set_plane(&plane_req(&s, img, fb)), Err(Error::Invalid));

    s.dev
        .set_plane(&SetPlane {
            plane_id: img,
            ..SetPlane::default()
        })
        .unwrap();
    assert_eq!(s.dev.fb_ref_count(fb), Some(1));
    s.dev
        .set_plane(&SetPlane {
            plane_id: osd,
            ..SetPlane::default()
        })
        .unwrap();
    assert_eq!(s.dev.fb_ref_count(fb), None);
    assert!(!s.table.contains(fb.0));
}

#[test]
fn rm_fb_twice_is_invalid() {
    let s = setup();
    let fb = add_fb(&s.dev, 1);
    s.dev.rm_fb(fb).unwrap();
    assert_eq!(s.dev.fb_ref_count(fb), None);
    assert_eq!(s.dev.rm_fb(fb), Err(Error::Invalid));
}

#[test]
fn dpms_property_reads_live_state() {
    let s = setup();
    let dpms = s.dev.dpms_property();
    s.dev
        .set_connector_property(s.conn, dpms, DpmsMode::On as u64)
        .unwrap();
    assert_eq!(s.sink.take(), [Call::Unblank]);
    assert_eq!(s.dev.connector(s.conn).unwrap().props[0].value, 0);

    assert_eq!(
        s.dev.set_connector_property(s.conn, dpms, 7),
        Err(Error::Invalid)
    );
    s.dev
        .set_property(s.conn.0, dpms, DpmsMode::Suspend as u64)
        .unwrap();
    assert_eq!(s.sink.take(), [Call::Blank]);
    assert_eq!(
        s.dev.get_properties(s.conn.0).unwrap()[0].value,
        DpmsMode::Suspend as u64
    );

    let info = s.dev.property(dpms).unwrap();
    assert_eq!(info.name, "DPMS");
}

#[test]
fn zpos_is_fixed_while_plane_shows_something() {
    let s = setup();
    let zpos = s.dev.zpos_property();
    let fb = add_fb(&s.dev, 1);
    let img = plane_with_zpos(&s.dev, 0);
    s.dev.set_plane(&plane_req(&s, img, fb)).unwrap();
    assert_eq!(s.dev.set_property(img.0, zpos, 1), Err(Error::Busy));

    s.dev
        .set_plane(&SetPlane {
            plane_id: img,
            ..SetPlane::default()
        })
        .unwrap();
    s.dev.set_property(img.0, zpos, 1).unwrap();
    assert_eq!(s.dev.plane(img).unwrap().zpos, 1);
    assert_eq!(s.dev.set_property(img.0, zpos, 2), Err(Error::Invalid));
}

#[test]
fn page_flip_completes_at_vblank() {
    let s = setup();
    let front = add_fb(&s.dev, 1);
    let back = add_fb(&s.dev, 2);
    enable(&s, front).unwrap();

    let flip = PageFlip {
        crtc_id: s.crtc,
        fb_id: back,
        flags: PageFlipFlags::EVENT,
        user_data: 0xfeed,
    };
    s.dev.page_flip(&flip).unwrap();
    assert_eq!(s.dev.page_flip(&flip), Err(Error::Busy));
    assert_eq!(s.dev.pending_flip().unwrap().sequence, 1);
    assert_eq!(s.dev.fb_ref_count(back), Some(2));
    s.sink.take();

    let vblank = GenericDrmEvent::VBlank(DrmVblankEvent {
        sequence: 1,
        tv_sec: 5,
        ..DrmVblankEvent::default()
    });
    let done = s.dev.handle_event(&vblank).unwrap().unwrap();
    assert_eq!(done.user_data, 0xfeed);
    assert_eq!(done.crtc_id, s.crtc.0);
    assert_eq!(done.sequence, 1);
    assert_eq!(done.tv_sec, 5);
    assert_eq!(s.sink.take().last(), Some(&Call::Display(Layer::Osd, 102)));

    assert!(s.dev.pending_flip().is_none());
    assert_eq!(s.dev.crtc(s.crtc).unwrap().fb_id, back);
    assert_eq!(s.dev.fb_ref_count(front), Some(1));
    assert_eq!(s.dev.fb_ref_count(back), Some(2));
    assert_eq!(s.dev.wait_vblank(s.crtc), Ok(1));
    assert_eq!(s.dev.handle_event(&vblank), Ok(None));
}

#[test]
fn flip_waits_for_its_own_crtc() {
    let s = setup();
    let front = add_fb(&s.dev, 1);
    let back = add_fb(&s.dev, 2);
    enable(&s, front).unwrap();
    s.dev
        .page_flip(&PageFlip {
            crtc_id: s.crtc,
            fb_id: back,
            flags: PageFlipFlags::EVENT,
            user_data: 9,
        })
        .unwrap();

    let elsewhere = GenericDrmEvent::VBlank(DrmVblankEvent {
        sequence: 1,
        crtc_id: s.crtc.0 + 1000,
        ..DrmVblankEvent::default()
    });
    assert_eq!(s.dev.handle_event(&elsewhere), Ok(None));
    assert!(s.dev.pending_flip().is_some());
    assert_eq!(s.dev.crtc(s.crtc).unwrap().fb_id, front);

    let complete = GenericDrmEvent::FlipComplete(DrmVblankEvent {
        sequence: 2,
        tv_sec: 7,
        tv_usec: 250,
        crtc_id: s.crtc.0,
        ..DrmVblankEvent::default()
    });
    let done = s.dev.handle_event(&complete).unwrap().unwrap();
    assert_eq!(done.user_data, 9);
    assert_eq!(done.sequence, 2);
    assert_eq!((done.tv_sec, done.tv_usec), (7, 250));
    assert!(s.dev.pending_flip().is_none());
    assert_eq!(s.dev.crtc(s.crtc).unwrap().fb_id, back);
    assert_eq!(s.dev.fb_ref_count(front), Some(1));
}

#[test]
fn page_flip_needs_active_crtc() {
    let s = setup();
    let fb = add_fb(&s.dev, 1);
    let ret = s.dev.page_flip(&PageFlip {
        crtc_id: s.crtc,
        fb_id: fb,
        ..PageFlip::default()
    });
    assert_eq!(ret, Err(Error::Invalid));
}

#[test]
fn disabling_crtc_drops_pending_flip() {
    let s = setup();
    let front = add_fb(&s.dev, 1);
    let back = add_fb(&s.dev, 2);
    enable(&s, front).unwrap();
    s.dev
        .page_flip(&PageFlip {
            crtc_id: s.crtc,
            fb_id: back,
            ..PageFlip::default()
        })
        .unwrap();

    disable(&s);
    assert!(s.dev.pending_flip().is_none());
    assert_eq!(s.dev.fb_ref_count(back), Some(1));
    assert_eq!(s.dev.fb_ref_count(front), Some(1));
}

#[test]
fn hooks_answer_display_requests() {
    let s = setup();
    let mut dispatcher = Dispatcher::new(Arc::new(FakeCall));
    dispatcher.register_all(super::display_hooks(&s.dev));
    for code in RequestCode::DISPLAY {
        assert!(dispatcher.is_hooked(code));
    }
    assert!(!dispatcher.is_hooked(RequestCode::GemFlink));

    let mut req = Request::GetResources(Exchange::new(()));
    dispatcher.dispatch(&mut req).unwrap();
    let Request::GetResources(x) = req else {
        unreachable!()
    };
    assert_eq!(x.into_reply().unwrap().crtc_ids, [s.crtc]);

    let mut req = Request::AddFb(Exchange::new(AddFb {
        width: 16,
        height: 16,
        pitch: 64,
        bpp: 32,
        depth: 24,
        handle: 3,
    }));
    dispatcher.dispatch(&mut req).unwrap();
    let Request::AddFb(x) = req else {
        unreachable!()
    };
    let fb = x.into_reply().unwrap();
    assert_eq!(s.dev.get_fb(fb).unwrap().handle, 3);

    let mut req = Request::GemFlink(Exchange::new(7));
    dispatcher.dispatch(&mut req).unwrap();
    assert_eq!(req, Request::GemFlink(Exchange { args: 7, reply: Some(107) }));

    let mut req = Request::VigsExec(1);
    assert_eq!(s.dev.handle_request(&mut req), Err(Error::NotSupported));
}

#[test]
fn registry_shares_one_table() {
    init_logger();
    let reg = Registry::default();
    let sink = Arc::new(MockSink::default());
    let a = reg
        .create(DeviceId(1), DeviceConfig::default(), Arc::new(FakeCall), sink.clone())
        .unwrap();
    let again = reg
        .create(DeviceId(1), DeviceConfig::default(), Arc::new(FakeCall), sink.clone())
        .unwrap();
    assert!(Arc::ptr_eq(&a, &again));

    let b = reg
        .create(DeviceId(2), DeviceConfig::default(), Arc::new(FakeCall), sink)
        .unwrap();
    let crtc_a = a.resources().crtc_ids[0];
    let crtc_b = b.resources().crtc_ids[0];
    assert_ne!(crtc_a, crtc_b);
    assert_eq!(b.crtc(crtc_a), Err(Error::NonExist));

    reg.remove(DeviceId(1)).unwrap();
    assert!(reg.get(DeviceId(1)).is_none());
    assert!(!reg.table().contains(crtc_a.0));
    assert!(reg.table().contains(crtc_b.0));
    assert_eq!(reg.remove(DeviceId(1)), Err(Error::NonExist));

    reg.remove(DeviceId(2)).unwrap();
    assert!(reg.table().is_empty());
}

#[test]
fn flip_without_event_flag_completes_silently() {
    let s = setup();
    let front = add_fb(&s.dev, 1);
    let back = add_fb(&s.dev, 2);
    enable(&s, front).unwrap();

    let flip = PageFlip {
        crtc_id: s.crtc,
        fb_id: back,
        ..PageFlip::default()
    };
    assert_eq!(
        s.dev.page_flip(&PageFlip {
            flags: PageFlipFlags::ASYNC,
            ..flip
        }),
        Err(Error::NotSupported)
    );
    assert!(s.dev.pending_flip().is_none());

    s.dev.page_flip(&flip).unwrap();
    let vblank = GenericDrmEvent::VBlank(DrmVblankEvent {
        sequence: 1,
        ..DrmVblankEvent::default()
    });
    assert_eq!(s.dev.handle_event(&vblank), Ok(None));
    assert!(s.dev.pending_flip().is_none());
    assert_eq!(s.dev.crtc(s.crtc).unwrap().fb_id, back);
}
