use std::sync::Arc;

use super::graph::Device;
use crate::dispatch::{Hook, Request, RequestCode};
use crate::result::{Error, Result};

/// Hooks that let `dev` answer every display request in place of the
/// kernel.
pub fn display_hooks(dev: &Arc<Device>) -> Vec<(RequestCode, Hook)> {
    RequestCode::DISPLAY
        .iter()
        .map(|code| {
            let dev = Arc::clone(dev);
            let hook: Hook = Arc::new(move |req: &mut Request| dev.handle_request(req));
            (*code, hook)
        })
        .collect()
}

impl Device {
    /// Answers one display request, filling in its reply.
    pub fn handle_request(&self, req: &mut Request) -> Result<()> {
        match req {
            Request::GetResources(x) => x.reply = Some(self.resources()),
            Request::GetCrtc(x) => x.reply = Some(self.crtc(x.args)?),
            Request::SetCrtc(x) => self.set_crtc(x)?,
            Request::GetEncoder(x) => x.reply = Some(self.encoder(x.args)?),
            Request::GetConnector(x) => x.reply = Some(self.connector(x.args)?),
            Request::GetPlaneResources(x) => x.reply = Some(self.plane_resources()),
            Request::GetPlane(x) => x.reply = Some(self.plane(x.args)?),
            Request::SetPlane(x) => self.set_plane(x)?,
            Request::GetProperty(x) => x.reply = Some(self.property(x.args)?),
            Request::SetProperty(x) => {
                self.set_connector_property(super::ConnectorId(x.object_id), x.prop_id, x.value)?
            }
            Request::ObjGetProperties(x) => x.reply = Some(self.get_properties(x.args)?),
            Request::ObjSetProperty(x) => self.set_property(x.object_id, x.prop_id, x.value)?,
            Request::AddFb(x) => x.reply = Some(self.add_fb(&x.args)?),
            Request::AddFb2(x) => x.reply = Some(self.add_fb2(&x.args)?),
            Request::RmFb(id) => self.rm_fb(*id)?,
            Request::GetFb(x) => x.reply = Some(self.get_fb(x.args)?),
            Request::PageFlip(x) => self.page_flip(x)?,
            Request::WaitVblank(x) => x.reply = Some(self.wait_vblank(x.args)?),
            _ => {
                log::debug!("device {:?}: {:?} is not a display request", self.id, req.code());
                return Err(Error::NotSupported);
            }
        }
        Ok(())
    }
}
