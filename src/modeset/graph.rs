use core::mem;
use std::sync::{Arc, Weak};

use ahash::AHashMap;
use parking_lot::Mutex;

use super::flip::PendingFlip;
use super::framebuffer::Framebuffer;
use super::overlay::{mode_from_timing, OverlaySink, Output};
use super::{
    CardResources, ConnectionState, ConnectorId, ConnectorState, ConnectorType, CrtcId,
    CrtcState, DeviceConfig, DisplayTable, DpmsMode, EncoderId, EncoderState, FramebufferId,
    Layer, ModeInfo, Object, ObjectKind, PlaneGeometry, PlaneId, PlaneState, PropertyId, Rect,
    SubpixelType, DRM_MODE_ENCODER_LVDS,
};
use crate::dispatch::request::{PropertyInfo, SetCrtc, SetPlane};
use crate::dispatch::DeviceCall;
use crate::list::{SlotKey, SlotList};
use crate::props::{
    ModeProp, PropertyEnumMember, PropertyFlags, PropertyOps, PropertyRef, PropertyRegistry,
    PropertyValues,
};
use crate::result::{Error, Result};
use crate::DeviceId;

pub(crate) struct Crtc {
    pub(crate) id: CrtcId,
    index: u32,
    pub(crate) fb: Option<SlotKey>,
    pub(crate) x: u32,
    pub(crate) y: u32,
    pub(crate) connectors: Vec<SlotKey>,
    pub(crate) mode: Option<ModeInfo>,
    pub(crate) active: bool,
}

pub(crate) struct Connector {
    pub(crate) id: ConnectorId,
    encoder: SlotKey,
    encoders: Vec<SlotKey>,
    connection: ConnectionState,
    width_mm: u32,
    height_mm: u32,
    modes: Vec<ModeInfo>,
    pub(crate) output: Output,
}

struct Encoder {
    id: EncoderId,
    typ: u32,
    crtc: Option<SlotKey>,
    possible_crtcs: u32,
}

struct Plane {
    id: PlaneId,
    crtc: Option<SlotKey>,
    fb: Option<SlotKey>,
    possible_crtcs: u32,
    zpos: u32,
    geometry: PlaneGeometry,
}

/// Everything a device tracks, behind the device's single lock.
#[derive(Default)]
pub(crate) struct Graph {
    pub(crate) crtcs: SlotList<Crtc>,
    pub(crate) connectors: SlotList<Connector>,
    encoders: SlotList<Encoder>,
    planes: SlotList<Plane>,
    pub(crate) fbs: SlotList<Framebuffer>,
    pub(crate) flip: Option<PendingFlip>,
    pub(crate) vblank_seq: u32,
}

impl Graph {
    fn connector_by_id(&mut self, id: u32) -> Option<&mut Connector> {
        let key = self.connectors.iter().find(|(_, c)| c.id.0 == id)?.0;
        self.connectors.get_mut(key)
    }

    fn plane_by_id(&mut self, id: u32) -> Option<&mut Plane> {
        let key = self.planes.iter().find(|(_, p)| p.id.0 == id)?.0;
        self.planes.get_mut(key)
    }

    fn connector_ids(&self, keys: &[SlotKey]) -> Vec<ConnectorId> {
        keys.iter()
            .filter_map(|k| self.connectors.get(*k))
            .map(|c| c.id)
            .collect()
    }

    fn crtc_id(&self, key: Option<SlotKey>) -> CrtcId {
        key.and_then(|k| self.crtcs.get(k))
            .map_or(CrtcId(0), |c| c.id)
    }

    fn fb_id(&self, key: Option<SlotKey>) -> FramebufferId {
        key.and_then(|k| self.fbs.get(k))
            .map_or(FramebufferId(0), |fb| fb.id)
    }

    /// What a framebuffer looks like on the panel at the given offset.
    fn scanout(&self, fb: SlotKey, rect: impl FnOnce(&Framebuffer) -> Rect) -> Option<Scanout> {
        self.fbs.get(fb).map(|fb| Scanout {
            rect: rect(fb),
            format: fb.pixel_format,
            name: fb.names[0],
        })
    }
}

#[derive(Clone, Copy)]
struct Scanout {
    rect: Rect,
    format: u32,
    name: u32,
}

/// The emulated display controller of one device.
pub struct Device {
    pub(crate) id: DeviceId,
    config: DeviceConfig,
    default_layer: Layer,
    pub(crate) table: Arc<DisplayTable>,
    props: PropertyRegistry<Object>,
    pub(crate) call: Arc<dyn DeviceCall>,
    pub(crate) graph: Arc<Mutex<Graph>>,
    dpms_prop: PropertyRef,
    zpos_prop: PropertyRef,
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Builds the CRTCs, planes, encoder and connector of a display
    /// controller, probing the panel behind `sink` for its mode.
    pub fn create(
        id: DeviceId,
        config: DeviceConfig,
        table: Arc<DisplayTable>,
        call: Arc<dyn DeviceCall>,
        sink: Arc<dyn OverlaySink>,
    ) -> Result<Self> {
        if config.crtcs == 0 || config.crtcs > 32 {
            return Err(Error::Invalid);
        }
        let default_layer = Layer::from_zpos(config.default_zpos).ok_or(Error::Invalid)?;

        let graph = Arc::new(Mutex::new(Graph::default()));
        let props = PropertyRegistry::new(Arc::clone(&table));
        let dpms_prop = props.create_property(
            "DPMS",
            PropertyFlags::ENUM,
            PropertyValues::Members(vec![
                PropertyEnumMember::new(DpmsMode::On as u64, "On"),
                PropertyEnumMember::new(DpmsMode::Standby as u64, "Standby"),
                PropertyEnumMember::new(DpmsMode::Suspend as u64, "Suspend"),
                PropertyEnumMember::new(DpmsMode::Off as u64, "Off"),
            ]),
            Box::new(DpmsOps {
                graph: Arc::downgrade(&graph),
            }),
        )?;
        let zpos_prop = match props.create_property(
            "zpos",
            PropertyFlags::RANGE,
            PropertyValues::Range {
                min: 0,
                max: u64::from(Layer::MAX_ZPOS),
            },
            Box::new(ZposOps {
                graph: Arc::downgrade(&graph),
            }),
        ) {
            Ok(p) => p,
            Err(e) => {
                table.delete(dpms_prop.id());
                return Err(e);
            }
        };

        let dev = Self {
            id,
            config,
            default_layer,
            table,
            props,
            call,
            graph,
            dpms_prop,
            zpos_prop,
        };
        if let Err(e) = dev.populate(sink) {
            log::error!("device {id:?}: could not build display resources: {e}");
            dev.release_ids();
            return Err(e);
        }
        log::info!("device {id:?}: display controller ready");
        Ok(dev)
    }

    fn populate(&self, sink: Arc<dyn OverlaySink>) -> Result<()> {
        let mut guard = self.graph.lock();
        let g = &mut *guard;
        let possible_crtcs = u32::MAX >> (32 - self.config.crtcs);

        for index in 0..self.config.crtcs {
            let crtc = Crtc {
                id: CrtcId(0),
                index,
                fb: None,
                x: 0,
                y: 0,
                connectors: Vec::new(),
                mode: None,
                active: false,
            };
            let (key, id) = self.insert(&mut g.crtcs, ObjectKind::Crtc, crtc)?;
            if let Some(c) = g.crtcs.get_mut(key) {
                c.id = CrtcId(id);
            }
        }

        for index in 0..self.config.planes {
            let plane = Plane {
                id: PlaneId(0),
                crtc: None,
                fb: None,
                possible_crtcs,
                zpos: index % (Layer::MAX_ZPOS + 1),
                geometry: PlaneGeometry::default(),
            };
            let (key, id) = self.insert(&mut g.planes, ObjectKind::Plane, plane)?;
            if let Some(p) = g.planes.get_mut(key) {
                p.id = PlaneId(id);
            }
            self.props.attach(id, &self.zpos_prop)?;
        }

        let encoder = Encoder {
            id: EncoderId(0),
            typ: DRM_MODE_ENCODER_LVDS,
            crtc: None,
            possible_crtcs,
        };
        let (enc_key, enc_id) = self.insert(&mut g.encoders, ObjectKind::Encoder, encoder)?;
        if let Some(e) = g.encoders.get_mut(enc_key) {
            e.id = EncoderId(enc_id);
        }

        let mut connector = Connector {
            id: ConnectorId(0),
            encoder: enc_key,
            encoders: vec![enc_key],
            connection: ConnectionState::Disconnected,
            width_mm: 0,
            height_mm: 0,
            modes: Vec::new(),
            output: Output::new(sink),
        };
        match connector.output.sink().screen_info() {
            Ok(info) => {
                connector.connection = ConnectionState::Connected;
                connector.width_mm = info.width_mm;
                connector.height_mm = info.height_mm;
                connector.modes.extend(mode_from_timing(&info.timing));
            }
            Err(e) => log::warn!("device {:?}: panel not available: {e}", self.id),
        }
        let (conn_key, conn_id) = self.insert(&mut g.connectors, ObjectKind::Connector, connector)?;
        if let Some(c) = g.connectors.get_mut(conn_key) {
            c.id = ConnectorId(conn_id);
        }
        self.props.attach(conn_id, &self.dpms_prop)?;
        Ok(())
    }

    /// Stores `value` in `list` and gives it an id. The caller patches the
    /// id into the stored value.
    pub(crate) fn insert<T>(
        &self,
        list: &mut SlotList<T>,
        kind: ObjectKind,
        value: T,
    ) -> Result<(SlotKey, u32)> {
        list.reserve()?;
        let key = list.push_back(value)?;
        match self.register(kind, key) {
            Ok(id) => Ok((key, id)),
            Err(e) => {
                list.remove(key);
                Err(e)
            }
        }
    }

    /// Gives the resource stored at `key` an id in the shared table.
    pub(crate) fn register(&self, kind: ObjectKind, key: SlotKey) -> Result<u32> {
        self.table.allocate(Object::Display {
            device: self.id,
            kind,
            key,
        })
    }

    /// Maps an id to the slot of a resource of this device.
    pub(crate) fn resolve(&self, id: u32, kind: ObjectKind) -> Result<SlotKey> {
        match self.table.lookup(id) {
            Some(Object::Display {
                device,
                kind: k,
                key,
            }) if device == self.id && k == kind => Ok(key),
            _ => Err(Error::Invalid),
        }
    }

    fn owns(&self, id: u32) -> bool {
        matches!(self.table.lookup(id), Some(Object::Display { device, .. }) if device == self.id)
    }

    /// Gives back every id this device took from the shared table.
    pub(crate) fn release_ids(&self) {
        let mut g = self.graph.lock();
        let ids: Vec<u32> = g
            .crtcs
            .iter()
            .map(|(_, c)| c.id.0)
            .chain(g.connectors.iter().map(|(_, c)| c.id.0))
            .chain(g.encoders.iter().map(|(_, e)| e.id.0))
            .chain(g.planes.iter().map(|(_, p)| p.id.0))
            .chain(g.fbs.iter().map(|(_, fb)| fb.id.0))
            .chain([self.dpms_prop.id(), self.zpos_prop.id()])
            .filter(|id| *id != 0)
            .collect();
        for id in ids {
            self.table.delete(id);
        }
        g.flip = None;
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn dpms_property(&self) -> PropertyId {
        self.dpms_prop.property_id()
    }

    pub fn zpos_property(&self) -> PropertyId {
        self.zpos_prop.property_id()
    }

    pub fn resources(&self) -> CardResources {
        let g = self.graph.lock();
        CardResources {
            fb_ids: g.fbs.iter().filter(|(_, fb)| !fb.removed).map(|(_, fb)| fb.id).collect(),
            crtc_ids: g.crtcs.iter().map(|(_, c)| c.id).collect(),
            connector_ids: g.connectors.iter().map(|(_, c)| c.id).collect(),
            encoder_ids: g.encoders.iter().map(|(_, e)| e.id).collect(),
            ..CardResources::default()
        }
    }

    pub fn crtc(&self, id: CrtcId) -> Result<CrtcState> {
        let g = self.graph.lock();
        let key = self.resolve(id.0, ObjectKind::Crtc).map_err(|_| Error::NonExist)?;
        let crtc = g.crtcs.get(key).ok_or(Error::NonExist)?;
        Ok(CrtcState {
            crtc_id: crtc.id,
            fb_id: g.fb_id(crtc.fb),
            x: crtc.x,
            y: crtc.y,
            gamma_size: 0,
            active: crtc.active,
            connector_ids: g.connector_ids(&crtc.connectors),
            mode: crtc.mode.clone(),
        })
    }

    pub fn encoder(&self, id: EncoderId) -> Result<EncoderState> {
        let g = self.graph.lock();
        let key = self.resolve(id.0, ObjectKind::Encoder).map_err(|_| Error::NonExist)?;
        let enc = g.encoders.get(key).ok_or(Error::NonExist)?;
        Ok(EncoderState {
            encoder_id: enc.id,
            encoder_type: enc.typ,
            current_crtc_id: g.crtc_id(enc.crtc),
            possible_crtcs: enc.possible_crtcs,
            possible_clones: 0,
        })
    }

    /// Connector state, with property values read live.
    pub fn connector(&self, id: ConnectorId) -> Result<ConnectorState> {
        let mut state = {
            let g = self.graph.lock();
            let key = self
                .resolve(id.0, ObjectKind::Connector)
                .map_err(|_| Error::NonExist)?;
            let conn = g.connectors.get(key).ok_or(Error::NonExist)?;
            let encoder_id = |k: &SlotKey| g.encoders.get(*k).map(|e| e.id);
            ConnectorState {
                id: conn.id,
                current_encoder_id: encoder_id(&conn.encoder).unwrap_or_default(),
                connector_type: ConnectorType::Lvds,
                connector_type_id: 1,
                connection_state: conn.connection,
                width_mm: conn.width_mm,
                height_mm: conn.height_mm,
                subpixel_type: SubpixelType::None,
                modes: conn.modes.clone(),
                props: Vec::new(),
                available_encoder_ids: conn.encoders.iter().filter_map(encoder_id).collect(),
            }
        };
        // Property getters take the graph lock themselves.
        state.props = self.props.get_all(id.0)?;
        Ok(state)
    }

    pub fn plane_resources(&self) -> Vec<PlaneId> {
        let g = self.graph.lock();
        g.planes.iter().map(|(_, p)| p.id).collect()
    }

    pub fn plane(&self, id: PlaneId) -> Result<PlaneState> {
        let g = self.graph.lock();
        let key = self.resolve(id.0, ObjectKind::Plane).map_err(|_| Error::NonExist)?;
        let plane = g.planes.get(key).ok_or(Error::NonExist)?;
        Ok(PlaneState {
            id: plane.id,
            crtc_id: g.crtc_id(plane.crtc),
            fb_id: g.fb_id(plane.fb),
            possible_crtcs: plane.possible_crtcs,
            gamma_size: 0,
            zpos: plane.zpos,
            geometry: plane.geometry,
            formats: self.config.formats.clone(),
        })
    }

    pub fn property(&self, id: PropertyId) -> Result<PropertyInfo> {
        let prop = self.props.property(id).ok_or(Error::NonExist)?;
        Ok(PropertyInfo {
            id: prop.property_id(),
            name: prop.name().to_owned(),
            flags: prop.flags(),
            values: prop.values().clone(),
        })
    }

    pub fn get_properties(&self, object_id: u32) -> Result<Vec<ModeProp>> {
        if !self.owns(object_id) {
            return Err(Error::NonExist);
        }
        self.props.get_all(object_id)
    }

    pub fn set_property(&self, object_id: u32, prop_id: PropertyId, value: u64) -> Result<()> {
        if !self.owns(object_id) {
            return Err(Error::NonExist);
        }
        self.props.set(object_id, prop_id, value)
    }

    pub fn set_connector_property(
        &self,
        connector_id: ConnectorId,
        prop_id: PropertyId,
        value: u64,
    ) -> Result<()> {
        self.resolve(connector_id.0, ObjectKind::Connector)?;
        self.props.set(connector_id.0, prop_id, value)
    }

    /// Points a CRTC at a framebuffer and a set of connectors, or turns it
    /// off when `fb_id` is zero.
    ///
    /// Every id is resolved before anything changes. If programming a
    /// connector fails, connectors already changed are put back the way
    /// they were and the error is returned; if even that fails the result
    /// is [`Error::Died`].
    pub fn set_crtc(&self, req: &SetCrtc) -> Result<()> {
        let mut guard = self.graph.lock();
        let g = &mut *guard;
        let crtc = self.resolve(req.crtc_id.0, ObjectKind::Crtc)?;
        if req.fb_id.0 == 0 {
            self.disable_crtc(g, crtc);
            return Ok(());
        }
        let fb = self.bindable_fb(g, req.fb_id)?;
        if req.connectors.is_empty() {
            return Err(Error::Invalid);
        }
        let mut connectors = Vec::new();
        connectors.try_reserve_exact(req.connectors.len())?;
        for &id in &req.connectors {
            let key = self.resolve(id, ObjectKind::Connector)?;
            if !connectors.contains(&key) {
                connectors.push(key);
            }
        }
        self.enable_crtc(g, crtc, fb, connectors, req.x, req.y, req.mode.clone())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn enable_crtc(
        &self,
        g: &mut Graph,
        crtc_key: SlotKey,
        fb: SlotKey,
        connectors: Vec<SlotKey>,
        x: u32,
        y: u32,
        mode: Option<ModeInfo>,
    ) -> Result<()> {
        let layer = self.default_layer;
        let show = g
            .scanout(fb, |fb| fb.rect_at(x, y))
            .ok_or(Error::Invalid)?;
        let crtc = g.crtcs.get(crtc_key).ok_or(Error::Invalid)?;
        let (old_fb, old_x, old_y) = (crtc.fb, crtc.x, crtc.y);
        let old_connectors = crtc.connectors.clone();
        let previous = old_fb.and_then(|k| g.scanout(k, |fb| fb.rect_at(old_x, old_y)));

        self.fb_ref(g, fb)?;
        let mut done = Vec::new();
        for &key in &connectors {
            let Some(conn) = g.connectors.get_mut(key) else {
                continue;
            };
            if let Err(e) = conn.output.program(layer, show.rect, show.format, show.name) {
                log::error!(
                    "device {:?}: could not show framebuffer on connector {}: {e}",
                    self.id,
                    conn.id.0
                );
                done.push(key);
                self.release_fb(g, fb);
                self.restore_layer(g, layer, &done, &old_connectors, previous)?;
                return Err(e);
            }
            done.push(key);
        }

        // Planes sharing the CRTC's layer are covered by the CRTC's own
        // framebuffer now.
        let covered: Vec<SlotKey> = g
            .planes
            .iter()
            .filter(|(_, p)| p.crtc == Some(crtc_key) && p.zpos == layer.zpos())
            .map(|(k, _)| k)
            .collect();
        for key in covered {
            if let Some(plane) = g.planes.get_mut(key) {
                plane.crtc = None;
                plane.geometry = PlaneGeometry::default();
                if let Some(old) = plane.fb.take() {
                    self.release_fb(g, old);
                }
            }
        }

        self.take_connectors(g, crtc_key, &connectors);

        for &key in old_connectors.iter().filter(|k| !connectors.contains(k)) {
            if let Some(conn) = g.connectors.get_mut(key) {
                if let Err(e) = conn.output.unprogram(layer) {
                    log::warn!("device {:?}: could not release connector {}: {e}", self.id, conn.id.0);
                }
                if let Some(enc) = g.encoders.get_mut(conn.encoder) {
                    enc.crtc = None;
                }
            }
        }
        for &key in &connectors {
            if let Some(enc) = g.connectors.get(key).and_then(|c| g.encoders.get_mut(c.encoder)) {
                enc.crtc = Some(crtc_key);
            }
        }
        if let Some(old) = old_fb {
            self.release_fb(g, old);
        }

        let mode = mode.or_else(|| {
            connectors
                .first()
                .and_then(|k| g.connectors.get(*k))
                .and_then(|c| c.modes.iter().find(|m| m.is_preferred()).cloned())
        });
        let crtc = g.crtcs.get_mut(crtc_key).ok_or(Error::Invalid)?;
        crtc.fb = Some(fb);
        crtc.x = x;
        crtc.y = y;
        crtc.connectors = connectors;
        crtc.mode = mode;
        crtc.active = true;
        log::debug!("device {:?}: crtc {} enabled", self.id, crtc.id.0);
        Ok(())
    }

    /// Detaches `taken` from every CRTC other than `crtc_key`, which already
    /// drives them. A CRTC left without connectors is turned off.
    fn take_connectors(&self, g: &mut Graph, crtc_key: SlotKey, taken: &[SlotKey]) {
        let others: Vec<SlotKey> = g
            .crtcs
            .iter()
            .filter(|(k, c)| *k != crtc_key && c.connectors.iter().any(|conn| taken.contains(conn)))
            .map(|(k, _)| k)
            .collect();
        for other in others {
            // The default layer already shows the new CRTC's framebuffer; any
            // other layer still belongs to planes of the old one.
            let layers: Vec<Layer> = g
                .planes
                .iter()
                .filter(|(_, p)| p.crtc == Some(other) && p.fb.is_some())
                .filter_map(|(_, p)| Layer::from_zpos(p.zpos))
                .filter(|l| *l != self.default_layer)
                .collect();
            for &key in taken {
                let Some(conn) = g.connectors.get_mut(key) else {
                    continue;
                };
                for &layer in &layers {
                    if !conn.output.has_layer(layer) {
                        continue;
                    }
                    if let Err(e) = conn.output.unprogram(layer) {
                        log::warn!("device {:?}: could not release connector {}: {e}", self.id, conn.id.0);
                    }
                }
            }

            let Some(crtc) = g.crtcs.get_mut(other) else {
                continue;
            };
            crtc.connectors.retain(|k| !taken.contains(k));
            if crtc.connectors.is_empty() {
                log::debug!("device {:?}: crtc {} lost its last connector", self.id, crtc.id.0);
                self.disable_crtc(g, other);
            }
        }
    }

    /// Turns a CRTC off. Doing so again changes nothing.
    fn disable_crtc(&self, g: &mut Graph, crtc_key: SlotKey) {
        let bound: Vec<SlotKey> = g
            .planes
            .iter()
            .filter(|(_, p)| p.crtc == Some(crtc_key))
            .map(|(k, _)| k)
            .collect();
        for key in bound {
            self.detach_plane(g, key);
        }

        if g.flip.is_some_and(|f| f.crtc == crtc_key) {
            if let Some(flip) = g.flip.take() {
                log::debug!("device {:?}: dropping flip pending on crtc {}", self.id, flip.crtc_id.0);
                self.release_fb(g, flip.fb);
            }
        }

        let Some(crtc) = g.crtcs.get_mut(crtc_key) else {
            return;
        };
        let connectors = mem::take(&mut crtc.connectors);
        let fb = crtc.fb.take();
        crtc.x = 0;
        crtc.y = 0;
        crtc.mode = None;
        crtc.active = false;
        let crtc_id = crtc.id;

        for key in connectors {
            let Some(conn) = g.connectors.get_mut(key) else {
                continue;
            };
            if conn.output.has_layer(self.default_layer) {
                if let Err(e) = conn.output.unprogram(self.default_layer) {
                    log::warn!("device {:?}: could not unset overlay on connector {}: {e}", self.id, conn.id.0);
                }
            }
            if let Err(e) = conn.output.set_dpms(DpmsMode::Off) {
                log::warn!("device {:?}: could not power off connector {}: {e}", self.id, conn.id.0);
            }
            if let Some(enc) = g.encoders.get_mut(conn.encoder) {
                enc.crtc = None;
            }
        }
        if let Some(fb) = fb {
            self.release_fb(g, fb);
        }
        log::debug!("device {:?}: crtc {} disabled", self.id, crtc_id.0);
    }

    /// Shows a framebuffer on a plane, or detaches the plane when `fb_id` is
    /// zero.
    ///
    /// Repeating the current configuration does nothing. Framebuffer
    /// references move only once every connector of the CRTC shows the new
    /// framebuffer; on failure the connectors already changed get the
    /// previous one back.
    pub fn set_plane(&self, req: &SetPlane) -> Result<()> {
        let mut guard = self.graph.lock();
        let g = &mut *guard;
        let plane_key = self.resolve(req.plane_id.0, ObjectKind::Plane)?;
        if req.fb_id.0 == 0 {
            self.detach_plane(g, plane_key);
            return Ok(());
        }
        let crtc_key = self.resolve(req.crtc_id.0, ObjectKind::Crtc)?;
        let fb = self.bindable_fb(g, req.fb_id)?;

        let crtc = g.crtcs.get(crtc_key).ok_or(Error::Invalid)?;
        let plane = g.planes.get(plane_key).ok_or(Error::Invalid)?;
        if plane.possible_crtcs & (1 << crtc.index) == 0 {
            return Err(Error::Invalid);
        }
        if plane.crtc == Some(crtc_key) && plane.fb == Some(fb) && plane.geometry == req.geometry {
            return Ok(());
        }
        let layer = Layer::from_zpos(plane.zpos).ok_or(Error::Invalid)?;
        let targets = crtc.connectors.clone();
        let (old_crtc, old_fb, old_rect) = (plane.crtc, plane.fb, plane.geometry.crtc);
        let previous = if old_crtc == Some(crtc_key) {
            old_fb.and_then(|k| g.scanout(k, |_| old_rect))
        } else {
            None
        };
        let show = g
            .scanout(fb, |_| req.geometry.crtc)
            .ok_or(Error::Invalid)?;

        self.fb_ref(g, fb)?;
        let mut done = Vec::new();
        for &key in &targets {
            let Some(conn) = g.connectors.get_mut(key) else {
                continue;
            };
            if let Err(e) = conn.output.program(layer, show.rect, show.format, show.name) {
                log::error!(
                    "device {:?}: could not show plane {} on connector {}: {e}",
                    self.id,
                    req.plane_id.0,
                    conn.id.0
                );
                done.push(key);
                self.release_fb(g, fb);
                self.restore_layer(g, layer, &done, &targets, previous)?;
                return Err(e);
            }
            done.push(key);
        }

        if let Some(prev) = old_crtc.filter(|c| *c != crtc_key) {
            self.unprogram_crtc_layer(g, prev, layer);
        }
        if let Some(old) = old_fb {
            self.release_fb(g, old);
        }
        if let Some(plane) = g.planes.get_mut(plane_key) {
            plane.crtc = Some(crtc_key);
            plane.fb = Some(fb);
            plane.geometry = req.geometry;
        }
        Ok(())
    }

    /// Takes a plane off its CRTC. Detaching a detached plane changes
    /// nothing.
    fn detach_plane(&self, g: &mut Graph, key: SlotKey) {
        let Some(plane) = g.planes.get_mut(key) else {
            return;
        };
        let crtc = plane.crtc.take();
        let fb = plane.fb.take();
        plane.geometry = PlaneGeometry::default();
        let layer = Layer::from_zpos(plane.zpos);
        if let (Some(crtc), Some(layer)) = (crtc, layer) {
            if fb.is_some() {
                self.unprogram_crtc_layer(g, crtc, layer);
            }
        }
        if let Some(fb) = fb {
            self.release_fb(g, fb);
        }
    }

    fn unprogram_crtc_layer(&self, g: &mut Graph, crtc: SlotKey, layer: Layer) {
        let Some(crtc) = g.crtcs.get(crtc) else {
            return;
        };
        for key in &crtc.connectors {
            let Some(conn) = g.connectors.get_mut(*key) else {
                continue;
            };
            if conn.output.has_layer(layer) {
                if let Err(e) = conn.output.unprogram(layer) {
                    log::warn!("device {:?}: could not unset overlay on connector {}: {e}", self.id, conn.id.0);
                }
            }
        }
    }

    /// Puts `layer` on the `changed` connectors back to what it showed
    /// before: `previous` on connectors that showed it, nothing elsewhere.
    fn restore_layer(
        &self,
        g: &mut Graph,
        layer: Layer,
        changed: &[SlotKey],
        showed_previous: &[SlotKey],
        previous: Option<Scanout>,
    ) -> Result<()> {
        let mut failed = false;
        for key in changed {
            let Some(conn) = g.connectors.get_mut(*key) else {
                continue;
            };
            let ret = match previous {
                Some(prev) if showed_previous.contains(key) => {
                    conn.output.program(layer, prev.rect, prev.format, prev.name)
                }
                _ => conn.output.unprogram(layer),
            };
            if let Err(e) = ret {
                log::error!("device {:?}: could not restore connector {}: {e}", self.id, conn.id.0);
                failed = true;
            }
        }
        if failed {
            log::error!("device {:?}: modeset failed and could not be rolled back", self.id);
            return Err(Error::Died);
        }
        Ok(())
    }

    pub(crate) fn release_fb(&self, g: &mut Graph, key: SlotKey) {
        if let Err(e) = self.fb_unref(g, key) {
            log::warn!("device {:?}: framebuffer reference already gone: {e}", self.id);
        }
    }
}

struct DpmsOps {
    graph: Weak<Mutex<Graph>>,
}

impl PropertyOps for DpmsOps {
    fn get(&self, object: u32) -> Result<u64> {
        let graph = self.graph.upgrade().ok_or(Error::NonExist)?;
        let mut g = graph.lock();
        let conn = g.connector_by_id(object).ok_or(Error::NonExist)?;
        Ok(conn.output.dpms as u64)
    }

    fn set(&self, object: u32, value: u64) -> Result<()> {
        let mode = DpmsMode::from_raw(value).ok_or(Error::Invalid)?;
        let graph = self.graph.upgrade().ok_or(Error::NonExist)?;
        let mut g = graph.lock();
        let conn = g.connector_by_id(object).ok_or(Error::NonExist)?;
        conn.output.set_dpms(mode)
    }
}

struct ZposOps {
    graph: Weak<Mutex<Graph>>,
}

impl PropertyOps for ZposOps {
    fn get(&self, object: u32) -> Result<u64> {
        let graph = self.graph.upgrade().ok_or(Error::NonExist)?;
        let mut g = graph.lock();
        let plane = g.plane_by_id(object).ok_or(Error::NonExist)?;
        Ok(u64::from(plane.zpos))
    }

    fn set(&self, object: u32, value: u64) -> Result<()> {
        let zpos = u32::try_from(value).map_err(|_| Error::Invalid)?;
        Layer::from_zpos(zpos).ok_or(Error::Invalid)?;
        let graph = self.graph.upgrade().ok_or(Error::NonExist)?;
        let mut g = graph.lock();
        let plane = g.plane_by_id(object).ok_or(Error::NonExist)?;
        if plane.fb.is_some() {
            return Err(Error::Busy);
        }
        plane.zpos = zpos;
        Ok(())
    }
}

/// The display devices of a process, sharing one id table.
#[derive(Debug)]
pub struct Registry {
    table: Arc<DisplayTable>,
    devices: Mutex<AHashMap<DeviceId, Arc<Device>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Arc::new(DisplayTable::new()))
    }
}

impl Registry {
    pub fn new(table: Arc<DisplayTable>) -> Self {
        Self {
            table,
            devices: Mutex::new(AHashMap::new()),
        }
    }

    pub fn table(&self) -> &Arc<DisplayTable> {
        &self.table
    }

    /// Returns the device for `id`, creating it on first use.
    pub fn create(
        &self,
        id: DeviceId,
        config: DeviceConfig,
        call: Arc<dyn DeviceCall>,
        sink: Arc<dyn OverlaySink>,
    ) -> Result<Arc<Device>> {
        let mut devices = self.devices.lock();
        if let Some(dev) = devices.get(&id) {
            log::info!("device {id:?}: display controller already set up");
            return Ok(Arc::clone(dev));
        }
        devices.try_reserve(1)?;
        let dev = Arc::new(Device::create(id, config, Arc::clone(&self.table), call, sink)?);
        devices.insert(id, Arc::clone(&dev));
        Ok(dev)
    }

    pub fn get(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.devices.lock().get(&id).cloned()
    }

    /// Forgets a device and frees every id it held.
    pub fn remove(&self, id: DeviceId) -> Result<()> {
        let dev = self.devices.lock().remove(&id).ok_or(Error::NonExist)?;
        dev.release_ids();
        log::info!("device {id:?}: display controller removed");
        Ok(())
    }
}
