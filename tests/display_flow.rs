use std::sync::{Arc, Mutex};

use drm_shim::dispatch::request::{PageFlip, SetCrtc};
use drm_shim::dispatch::{DeviceCall, Dispatcher, Exchange, Request};
use drm_shim::event::{DrmVblankEvent, GenericDrmEvent};
use drm_shim::modeset::{
    display_hooks, AddFb, ConnectionState, DeviceConfig, DpmsMode, FramebufferId, Layer,
    OverlaySetting, OverlaySink, PageFlipFlags, PanelTiming, Registry, ScreenInfo,
};
use drm_shim::{DeviceId, Error, Result};

/// Stands in for the kernel: publishes GEM handle `h` as name `h + 500`.
struct Kernel;

impl DeviceCall for Kernel {
    fn perform_request(&self, req: &mut Request) -> Result<()> {
        match req {
            Request::GemFlink(x) => {
                x.reply = Some(x.args + 500);
                Ok(())
            }
            _ => Err(Error::NotSupported),
        }
    }

    fn unmap(&self, _addr: usize, _len: usize) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Panel {
    shown: Mutex<Vec<(Layer, u32)>>,
    blanked: Mutex<bool>,
}

impl OverlaySink for Panel {
    fn screen_info(&self) -> Result<ScreenInfo> {
        Ok(ScreenInfo {
            width_mm: 100,
            height_mm: 60,
            timing: PanelTiming {
                pixclock: 20000,
                xres: 640,
                yres: 400,
                left_margin: 16,
                right_margin: 16,
                upper_margin: 8,
                lower_margin: 8,
                hsync_len: 8,
                vsync_len: 2,
                ..PanelTiming::default()
            },
        })
    }

    fn unblank(&self) -> Result<()> {
        *self.blanked.lock().unwrap() = false;
        Ok(())
    }

    fn blank(&self) -> Result<()> {
        *self.blanked.lock().unwrap() = true;
        Ok(())
    }

    fn set_overlay(&self, _setting: &OverlaySetting) -> Result<()> {
        Ok(())
    }

    fn display_overlay(&self, layer: Layer, name: u32) -> Result<()> {
        self.shown.lock().unwrap().push((layer, name));
        Ok(())
    }
}

fn add_fb(dispatcher: &Dispatcher, handle: u32) -> FramebufferId {
    let mut req = Request::AddFb(Exchange::new(AddFb {
        width: 640,
        height: 400,
        pitch: 2560,
        bpp: 32,
        depth: 24,
        handle,
    }));
    dispatcher.dispatch(&mut req).unwrap();
    let Request::AddFb(x) = req else {
        unreachable!()
    };
    x.into_reply().unwrap()
}

#[test]
fn modeset_and_flip_through_dispatcher() {
    let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Trace, simplelog::Config::default());
    let registry = Registry::default();
    let panel = Arc::new(Panel::default());
    let dev = registry
        .create(DeviceId(3), DeviceConfig::default(), Arc::new(Kernel), panel.clone())
        .unwrap();
    let mut dispatcher = Dispatcher::new(Arc::new(Kernel));
    dispatcher.register_all(display_hooks(&dev));

    let mut req = Request::GetResources(Exchange::new(()));
    dispatcher.dispatch(&mut req).unwrap();
    let Request::GetResources(x) = req else {
        unreachable!()
    };
    let res = x.into_reply().unwrap();
    assert_eq!(res.crtc_ids.len(), 1);
    assert_eq!(res.connector_ids.len(), 1);
    let (crtc, conn) = (res.crtc_ids[0], res.connector_ids[0]);

    let mut req = Request::GetConnector(Exchange::new(conn));
    dispatcher.dispatch(&mut req).unwrap();
    let Request::GetConnector(x) = req else {
        unreachable!()
    };
    let info = x.into_reply().unwrap();
    assert_eq!(info.connection_state, ConnectionState::Connected);
    let mode = info.preferred_mode().cloned().unwrap();
    assert_eq!((mode.hdisplay, mode.vdisplay), (640, 400));

    let front = add_fb(&dispatcher, 1);
    let back = add_fb(&dispatcher, 2);
    let mut req = Request::SetCrtc(SetCrtc {
        crtc_id: crtc,
        fb_id: front,
        x: 0,
        y: 0,
        connectors: vec![conn.0],
        mode: Some(mode),
    });
    dispatcher.dispatch(&mut req).unwrap();
    assert_eq!(panel.shown.lock().unwrap().last(), Some(&(Layer::Osd, 501)));

    let mut req = Request::PageFlip(PageFlip {
        crtc_id: crtc,
        fb_id: back,
        flags: PageFlipFlags::EVENT,
        user_data: 77,
    });
    dispatcher.dispatch(&mut req).unwrap();
    let done = dev
        .handle_event(&GenericDrmEvent::VBlank(DrmVblankEvent {
            sequence: 1,
            ..DrmVblankEvent::default()
        }))
        .unwrap()
        .unwrap();
    assert_eq!(done.user_data, 77);
    assert_eq!(done.crtc_id, crtc.0);
    assert_eq!(panel.shown.lock().unwrap().last(), Some(&(Layer::Osd, 502)));

    let mut req = Request::GetCrtc(Exchange::new(crtc));
    dispatcher.dispatch(&mut req).unwrap();
    let Request::GetCrtc(x) = req else {
        unreachable!()
    };
    let state = x.into_reply().unwrap();
    assert!(state.active);
    assert_eq!(state.fb_id, back);

    let mut req = Request::ObjSetProperty(drm_shim::dispatch::request::SetProperty {
        object_id: conn.0,
        prop_id: dev.dpms_property(),
        value: DpmsMode::Off as u64,
    });
    dispatcher.dispatch(&mut req).unwrap();
    assert!(*panel.blanked.lock().unwrap());

    // Requests no hook claims still reach the kernel.
    let mut req = Request::GemFlink(Exchange::new(4));
    dispatcher.dispatch(&mut req).unwrap();
    let Request::GemFlink(x) = req else {
        unreachable!()
    };
    assert_eq!(x.into_reply(), Ok(504));

    registry.remove(DeviceId(3)).unwrap();
    assert!(registry.get(DeviceId(3)).is_none());
    assert_eq!(registry.remove(DeviceId(3)), Err(Error::NonExist));
}
