//! Object registry and display state of the reference device
//!
//! Static topology (pipelines, surfaces, outputs, property objects) is
//! created once. The mutable part that transactions act on is
//! [`DisplayState`]: commits build a candidate copy, validate it and swap it
//! in whole, so a rejected transaction never leaves a partial update behind.

use super::fence::{FencePoint, FenceTable};
use crate::config::SimConfig;
use crate::traits::{Buffer, FlipEvent};
use kmsprobe_core::{
    as_signed, signed_value, Argb, BlobId, ConnectorId, ConnectorProperty, CrtcId, CrtcProperty,
    DamageRect, FbId, KmsError, KmsResult, ModeInfo, ObjectId, ObjectKind, PixelFormat, PlaneId,
    PlaneProperty, PlaneType, PropertyFlags, PropertyId, PropertyInfo, PropertyKind, PropertyType,
    DAMAGE_RECT_SIZE, MODE_INFO_SIZE, NO_FENCE,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Largest buffer edge the device accepts
pub(crate) const MAX_BUFFER_EDGE: u32 = 8192;

#[derive(Debug, Clone)]
pub(crate) struct CrtcDesc {
    pub id: CrtcId,
    pub index: usize,
    pub cursor: Option<PlaneId>,
}

#[derive(Debug, Clone)]
pub(crate) struct PlaneDesc {
    pub id: PlaneId,
    pub plane_type: PlaneType,
    pub possible_crtcs: u32,
    pub formats: Vec<PixelFormat>,
}

#[derive(Debug, Clone)]
pub(crate) struct ConnectorDesc {
    pub id: ConnectorId,
    pub possible_crtcs: u32,
    pub mode: ModeInfo,
}

/// Committed or candidate state of one surface
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct PlaneState {
    pub crtc: CrtcId,
    pub fb: FbId,
    pub src_x: u32,
    pub src_y: u32,
    pub src_w: u32,
    pub src_h: u32,
    pub crtc_x: i32,
    pub crtc_y: i32,
    pub crtc_w: u32,
    pub crtc_h: u32,
    pub zpos: u64,
    pub in_fence: Option<FencePoint>,
    pub damage: BlobId,
}

impl PlaneState {
    /// Visible source region in whole framebuffer pixels
    pub fn src_rect(&self) -> DamageRect {
        DamageRect::from_size(
            (self.src_x >> 16) as i32,
            (self.src_y >> 16) as i32,
            self.src_w >> 16,
            self.src_h >> 16,
        )
    }

    pub fn same_source(&self, other: &PlaneState) -> bool {
        self.src_x == other.src_x
            && self.src_y == other.src_y
            && self.src_w == other.src_w
            && self.src_h == other.src_h
    }

    /// Detach, keeping only the stacking order
    pub fn disable(&mut self) {
        *self = PlaneState {
            zpos: self.zpos,
            ..Default::default()
        };
    }
}

/// Committed or candidate state of one pipeline
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct CrtcState {
    pub active: bool,
    pub mode: BlobId,
    pub out_fence_ptr: u64,
}

/// Everything a transaction can change
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct DisplayState {
    pub planes: BTreeMap<PlaneId, PlaneState>,
    pub crtcs: BTreeMap<CrtcId, CrtcState>,
    pub connectors: BTreeMap<ConnectorId, CrtcId>,
}

impl DisplayState {
    pub fn plane(&self, id: PlaneId) -> KmsResult<&PlaneState> {
        self.planes.get(&id).ok_or(KmsError::NoEntry)
    }

    pub fn plane_mut(&mut self, id: PlaneId) -> KmsResult<&mut PlaneState> {
        self.planes.get_mut(&id).ok_or(KmsError::NoEntry)
    }

    pub fn crtc(&self, id: CrtcId) -> KmsResult<&CrtcState> {
        self.crtcs.get(&id).ok_or(KmsError::NoEntry)
    }

    pub fn crtc_mut(&mut self, id: CrtcId) -> KmsResult<&mut CrtcState> {
        self.crtcs.get_mut(&id).ok_or(KmsError::NoEntry)
    }

    /// Outputs routed to a pipeline, in id order
    pub fn routed_to(&self, crtc: CrtcId) -> Vec<ConnectorId> {
        self.connectors
            .iter()
            .filter(|(_, c)| **c == crtc)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Blob {
    pub data: Vec<u8>,
    pub user_owned: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Framebuffer {
    pub handle: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub internal: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct BufferObject {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u32>,
}

impl BufferObject {
    pub fn pixel(&self, x: u32, y: u32) -> Argb {
        Argb(self.pixels[(y * self.width + x) as usize])
    }
}

/// Pixels a surface is currently scanning out, in source-region coordinates
#[derive(Debug, Clone)]
pub(crate) struct Scanout {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u32>,
}

#[derive(Debug, Default)]
pub(crate) struct PropertyTable {
    pub infos: BTreeMap<PropertyId, PropertyInfo>,
    pub plane: Vec<(PropertyId, PlaneProperty)>,
    pub crtc: Vec<(PropertyId, CrtcProperty)>,
    pub connector: Vec<(PropertyId, ConnectorProperty)>,
}

impl PropertyTable {
    fn lookup<P: Copy>(list: &[(PropertyId, P)], id: PropertyId) -> KmsResult<P> {
        list.iter()
            .find(|(pid, _)| *pid == id)
            .map(|(_, p)| *p)
            .ok_or(KmsError::NoEntry)
    }

    #[cfg(test)]
    fn id_of<P: Copy + PartialEq>(list: &[(PropertyId, P)], prop: P) -> Option<PropertyId> {
        list.iter().find(|(_, p)| *p == prop).map(|(id, _)| *id)
    }
}

/// The whole device model, guarded by the device's state lock
#[derive(Debug)]
pub(crate) struct SimState {
    pub props: PropertyTable,
    objects: BTreeMap<u32, ObjectKind>,
    next_id: u32,
    next_handle: u32,
    pub crtcs: Vec<CrtcDesc>,
    pub planes: Vec<PlaneDesc>,
    pub connectors: Vec<ConnectorDesc>,
    pub current: DisplayState,
    pub blobs: BTreeMap<BlobId, Blob>,
    pub fbs: BTreeMap<FbId, Framebuffer>,
    pub bos: BTreeMap<u32, BufferObject>,
    pub scanout: BTreeMap<PlaneId, Scanout>,
    pub events: VecDeque<FlipEvent>,
    pub sequences: BTreeMap<CrtcId, u32>,
    pub cursor_pos: BTreeMap<CrtcId, (i32, i32)>,
    pub cursor_max: u32,
}

impl SimState {
    pub fn new(config: &SimConfig) -> Self {
        let mut sim = SimState {
            props: PropertyTable::default(),
            objects: BTreeMap::new(),
            next_id: 0,
            next_handle: 0,
            crtcs: Vec::new(),
            planes: Vec::new(),
            connectors: Vec::new(),
            current: DisplayState::default(),
            blobs: BTreeMap::new(),
            fbs: BTreeMap::new(),
            bos: BTreeMap::new(),
            scanout: BTreeMap::new(),
            events: VecDeque::new(),
            sequences: BTreeMap::new(),
            cursor_pos: BTreeMap::new(),
            cursor_max: config.cursor_max,
        };
        sim.create_properties(config);

        let mode = ModeInfo::new(config.width, config.height, config.refresh);
        for index in 0..config.pipes as usize {
            let crtc = CrtcId(sim.register(ObjectKind::Crtc));
            sim.crtcs.push(CrtcDesc {
                id: crtc,
                index,
                cursor: None,
            });
            sim.current.crtcs.insert(crtc, CrtcState::default());
        }
        for index in 0..config.pipes as usize {
            let possible = 1u32 << index;
            let mut zpos = 0u64;
            sim.add_plane(PlaneType::Primary, possible, zpos);
            for _ in 0..config.overlays_per_pipe {
                zpos += 1;
                sim.add_plane(PlaneType::Overlay, possible, zpos);
            }
            if config.cursor {
                zpos += 1;
                let cursor = sim.add_plane(PlaneType::Cursor, possible, zpos);
                sim.crtcs[index].cursor = Some(cursor);
            }
        }
        for index in 0..config.pipes as usize {
            let id = ConnectorId(sim.register(ObjectKind::Connector));
            sim.connectors.push(ConnectorDesc {
                id,
                possible_crtcs: 1 << index,
                mode,
            });
            sim.current.connectors.insert(id, CrtcId::NONE);
        }
        sim
    }

    fn create_properties(&mut self, config: &SimConfig) {
        let max_zpos = u64::from(config.overlays_per_pipe) + u64::from(config.cursor);
        let crtc_id = self.add_property("CRTC_ID", PropertyType::Object(ObjectKind::Crtc), false);

        for &prop in PlaneProperty::ALL {
            let id = match prop {
                PlaneProperty::CrtcId => crtc_id,
                PlaneProperty::Type => {
                    let entries = [PlaneType::Overlay, PlaneType::Primary, PlaneType::Cursor]
                        .iter()
                        .map(|t| (t.value(), t.name().to_string()))
                        .collect();
                    self.add_property(prop.name(), PropertyType::Enum(entries), true)
                }
                PlaneProperty::SrcX
                | PlaneProperty::SrcY
                | PlaneProperty::SrcW
                | PlaneProperty::SrcH => self.add_property(
                    prop.name(),
                    PropertyType::Range {
                        min: 0,
                        max: u64::from(u32::MAX),
                    },
                    false,
                ),
                PlaneProperty::CrtcX | PlaneProperty::CrtcY => self.add_property(
                    prop.name(),
                    PropertyType::SignedRange {
                        min: i64::from(i32::MIN),
                        max: i64::from(i32::MAX),
                    },
                    false,
                ),
                PlaneProperty::CrtcW | PlaneProperty::CrtcH => self.add_property(
                    prop.name(),
                    PropertyType::Range {
                        min: 0,
                        max: i32::MAX as u64,
                    },
                    false,
                ),
                PlaneProperty::FbId => self.add_property(
                    prop.name(),
                    PropertyType::Object(ObjectKind::Framebuffer),
                    false,
                ),
                PlaneProperty::InFenceFd => self.add_property(
                    prop.name(),
                    PropertyType::SignedRange {
                        min: -1,
                        max: i64::from(i32::MAX),
                    },
                    false,
                ),
                PlaneProperty::FbDamageClips => {
                    self.add_property(prop.name(), PropertyType::Blob, false)
                }
                PlaneProperty::Zpos => self.add_property(
                    prop.name(),
                    PropertyType::Range {
                        min: 0,
                        max: max_zpos,
                    },
                    !config.mutable_zpos,
                ),
            };
            self.props.plane.push((id, prop));
        }

        for &prop in CrtcProperty::ALL {
            let kind = match prop {
                CrtcProperty::Active => PropertyType::Range { min: 0, max: 1 },
                CrtcProperty::ModeId => PropertyType::Blob,
                CrtcProperty::OutFencePtr => PropertyType::Range {
                    min: 0,
                    max: u64::MAX,
                },
            };
            let id = self.add_property(prop.name(), kind, false);
            self.props.crtc.push((id, prop));
        }

        self.props
            .connector
            .push((crtc_id, ConnectorProperty::CrtcId));
    }

    fn add_property(&mut self, name: &str, kind: PropertyType, immutable: bool) -> PropertyId {
        let id = PropertyId(self.register(ObjectKind::Property));
        let mut flags = PropertyFlags::ATOMIC;
        if immutable {
            flags |= PropertyFlags::IMMUTABLE;
        }
        self.props.infos.insert(
            id,
            PropertyInfo {
                id,
                name: name.to_string(),
                kind,
                flags,
            },
        );
        id
    }

    fn add_plane(&mut self, plane_type: PlaneType, possible_crtcs: u32, zpos: u64) -> PlaneId {
        let id = PlaneId(self.register(ObjectKind::Plane));
        let formats = match plane_type {
            PlaneType::Primary => vec![PixelFormat::XRGB8888, PixelFormat::ARGB8888],
            PlaneType::Overlay => vec![
                PixelFormat::XRGB8888,
                PixelFormat::ARGB8888,
                PixelFormat::ARGB1555,
            ],
            PlaneType::Cursor => vec![PixelFormat::ARGB8888],
        };
        self.planes.push(PlaneDesc {
            id,
            plane_type,
            possible_crtcs,
            formats,
        });
        self.current.planes.insert(
            id,
            PlaneState {
                zpos,
                ..Default::default()
            },
        );
        id
    }

    // ========================================================================
    // Object registry
    // ========================================================================

    fn register(&mut self, kind: ObjectKind) -> u32 {
        self.next_id += 1;
        self.objects.insert(self.next_id, kind);
        self.next_id
    }

    fn unregister(&mut self, id: u32) {
        self.objects.remove(&id);
    }

    pub fn object_kind(&self, id: ObjectId) -> Option<ObjectKind> {
        self.objects.get(&id.0).copied()
    }

    /// Whether `value` names a live object of class `kind`
    pub fn is_object(&self, value: u64, kind: ObjectKind) -> bool {
        u32::try_from(value)
            .ok()
            .and_then(|id| self.objects.get(&id))
            .map_or(false, |k| *k == kind)
    }

    pub fn crtc_desc(&self, id: CrtcId) -> KmsResult<&CrtcDesc> {
        self.crtcs.iter().find(|c| c.id == id).ok_or(KmsError::NoEntry)
    }

    pub fn plane_desc(&self, id: PlaneId) -> KmsResult<&PlaneDesc> {
        self.planes.iter().find(|p| p.id == id).ok_or(KmsError::NoEntry)
    }

    pub fn connector_desc(&self, id: ConnectorId) -> KmsResult<&ConnectorDesc> {
        self.connectors
            .iter()
            .find(|c| c.id == id)
            .ok_or(KmsError::NoEntry)
    }

    /// Primary surface that can be assigned to a pipeline
    pub fn primary_for(&self, crtc: &CrtcDesc) -> Option<PlaneId> {
        self.planes
            .iter()
            .find(|p| {
                p.plane_type == PlaneType::Primary && p.possible_crtcs & (1 << crtc.index) != 0
            })
            .map(|p| p.id)
    }

    // ========================================================================
    // Properties
    // ========================================================================

    pub fn read_properties(
        &self,
        id: ObjectId,
        kind: ObjectKind,
    ) -> KmsResult<Vec<(PropertyId, u64)>> {
        if self.object_kind(id) != Some(kind) {
            return Err(KmsError::NoEntry);
        }
        match kind {
            ObjectKind::Plane => {
                let plane = PlaneId(id.0);
                let desc = self.plane_desc(plane)?;
                let state = self.current.plane(plane)?;
                Ok(self
                    .props
                    .plane
                    .iter()
                    .map(|(pid, p)| (*pid, plane_value(state, desc, *p)))
                    .collect())
            }
            ObjectKind::Crtc => {
                let state = self.current.crtc(CrtcId(id.0))?;
                Ok(self
                    .props
                    .crtc
                    .iter()
                    .map(|(pid, p)| {
                        let value = match p {
                            CrtcProperty::Active => u64::from(state.active),
                            CrtcProperty::ModeId => state.mode.value(),
                            CrtcProperty::OutFencePtr => state.out_fence_ptr,
                        };
                        (*pid, value)
                    })
                    .collect())
            }
            ObjectKind::Connector => {
                let crtc = self
                    .current
                    .connectors
                    .get(&ConnectorId(id.0))
                    .ok_or(KmsError::NoEntry)?;
                Ok(self
                    .props
                    .connector
                    .iter()
                    .map(|(pid, _)| (*pid, crtc.value()))
                    .collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Apply one `(object, property, value)` triple to a candidate state
    pub fn set_property(
        &self,
        state: &mut DisplayState,
        id: ObjectId,
        kind: ObjectKind,
        prop: PropertyId,
        value: u64,
        fences: &FenceTable,
    ) -> KmsResult<()> {
        let info = match kind {
            ObjectKind::Plane => {
                PropertyTable::lookup(&self.props.plane, prop)?;
                self.props.infos.get(&prop)
            }
            ObjectKind::Crtc => {
                PropertyTable::lookup(&self.props.crtc, prop)?;
                self.props.infos.get(&prop)
            }
            ObjectKind::Connector => {
                PropertyTable::lookup(&self.props.connector, prop)?;
                self.props.infos.get(&prop)
            }
            _ => None,
        }
        .ok_or(KmsError::NoEntry)?;

        if info.is_immutable() || !info.accepts(value) {
            return Err(KmsError::InvalidArgument);
        }

        match kind {
            ObjectKind::Plane => {
                let which = PropertyTable::lookup(&self.props.plane, prop)?;
                self.set_plane_property(state, PlaneId(id.0), which, value, fences)
            }
            ObjectKind::Crtc => {
                let which = PropertyTable::lookup(&self.props.crtc, prop)?;
                self.set_crtc_property(state, CrtcId(id.0), which, value)
            }
            _ => {
                if value != 0 && !self.is_object(value, ObjectKind::Crtc) {
                    return Err(KmsError::InvalidArgument);
                }
                let slot = state
                    .connectors
                    .get_mut(&ConnectorId(id.0))
                    .ok_or(KmsError::NoEntry)?;
                *slot = CrtcId(value as u32);
                Ok(())
            }
        }
    }

    fn set_plane_property(
        &self,
        state: &mut DisplayState,
        id: PlaneId,
        prop: PlaneProperty,
        value: u64,
        fences: &FenceTable,
    ) -> KmsResult<()> {
        match prop {
            PlaneProperty::CrtcId if value != 0 && !self.is_object(value, ObjectKind::Crtc) => {
                return Err(KmsError::InvalidArgument)
            }
            PlaneProperty::FbId
                if value != 0 && !self.is_object(value, ObjectKind::Framebuffer) =>
            {
                return Err(KmsError::InvalidArgument)
            }
            PlaneProperty::FbDamageClips if value != 0 => {
                let blob = self
                    .blobs
                    .get(&BlobId(value as u32))
                    .ok_or(KmsError::InvalidArgument)?;
                if blob.data.len() % DAMAGE_RECT_SIZE != 0 {
                    return Err(KmsError::InvalidArgument);
                }
            }
            _ => {}
        }

        let in_fence = if prop == PlaneProperty::InFenceFd && value != NO_FENCE {
            let fd = as_signed(value) as i32;
            Some(fences.sync_point(fd).ok_or(KmsError::InvalidArgument)?)
        } else {
            None
        };

        let plane = state.plane_mut(id)?;
        match prop {
            PlaneProperty::Type => return Err(KmsError::InvalidArgument),
            PlaneProperty::SrcX => plane.src_x = value as u32,
            PlaneProperty::SrcY => plane.src_y = value as u32,
            PlaneProperty::SrcW => plane.src_w = value as u32,
            PlaneProperty::SrcH => plane.src_h = value as u32,
            PlaneProperty::CrtcX => plane.crtc_x = as_signed(value) as i32,
            PlaneProperty::CrtcY => plane.crtc_y = as_signed(value) as i32,
            PlaneProperty::CrtcW => plane.crtc_w = value as u32,
            PlaneProperty::CrtcH => plane.crtc_h = value as u32,
            PlaneProperty::FbId => plane.fb = FbId(value as u32),
            PlaneProperty::CrtcId => plane.crtc = CrtcId(value as u32),
            PlaneProperty::InFenceFd => plane.in_fence = in_fence,
            PlaneProperty::FbDamageClips => plane.damage = BlobId(value as u32),
            PlaneProperty::Zpos => plane.zpos = value,
        }
        Ok(())
    }

    fn set_crtc_property(
        &self,
        state: &mut DisplayState,
        id: CrtcId,
        prop: CrtcProperty,
        value: u64,
    ) -> KmsResult<()> {
        if prop == CrtcProperty::ModeId && value != 0 {
            let blob = self
                .blobs
                .get(&BlobId(value as u32))
                .ok_or(KmsError::InvalidArgument)?;
            if blob.data.len() != MODE_INFO_SIZE {
                return Err(KmsError::InvalidArgument);
            }
            ModeInfo::from_bytes(&blob.data)?.validate()?;
        }
        let crtc = state.crtc_mut(id)?;
        match prop {
            CrtcProperty::Active => crtc.active = value != 0,
            CrtcProperty::ModeId => crtc.mode = BlobId(value as u32),
            CrtcProperty::OutFencePtr => crtc.out_fence_ptr = value,
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn plane_property_id(&self, prop: PlaneProperty) -> Option<PropertyId> {
        PropertyTable::id_of(&self.props.plane, prop)
    }

    // ========================================================================
    // Blobs
    // ========================================================================

    pub fn create_blob(&mut self, data: &[u8], user_owned: bool) -> KmsResult<BlobId> {
        if data.is_empty() {
            return Err(KmsError::InvalidArgument);
        }
        let id = BlobId(self.register(ObjectKind::Blob));
        self.blobs.insert(
            id,
            Blob {
                data: data.to_vec(),
                user_owned,
            },
        );
        Ok(id)
    }

    pub fn destroy_blob(&mut self, id: BlobId) -> KmsResult<()> {
        match self.blobs.get_mut(&id) {
            Some(blob) if blob.user_owned => blob.user_owned = false,
            _ => return Err(KmsError::NoEntry),
        }
        self.collect_garbage();
        Ok(())
    }

    /// Mode stored in a mode blob, `None` for blob 0
    pub fn mode_of(&self, id: BlobId) -> KmsResult<Option<ModeInfo>> {
        if id.is_none() {
            return Ok(None);
        }
        let blob = self.blobs.get(&id).ok_or(KmsError::InvalidArgument)?;
        Ok(Some(ModeInfo::from_bytes(&blob.data)?))
    }

    /// Damage rectangles stored in a damage blob
    pub fn damage_of(&self, id: BlobId) -> KmsResult<Vec<DamageRect>> {
        if id.is_none() {
            return Ok(Vec::new());
        }
        let blob = self.blobs.get(&id).ok_or(KmsError::InvalidArgument)?;
        kmsprobe_core::decode_rects(&blob.data)
    }

    /// Drop blobs, internal framebuffers and buffer objects nothing refers to
    pub fn collect_garbage(&mut self) {
        let current = &self.current;
        let referenced_blob = |id: &BlobId| {
            current.crtcs.values().any(|c| c.mode == *id)
                || current.planes.values().any(|p| p.damage == *id)
        };
        let dead_blobs: Vec<BlobId> = self
            .blobs
            .iter()
            .filter(|(id, b)| !b.user_owned && !referenced_blob(id))
            .map(|(id, _)| *id)
            .collect();
        for id in dead_blobs {
            self.blobs.remove(&id);
            self.objects.remove(&id.0);
        }

        let dead_fbs: Vec<FbId> = self
            .fbs
            .iter()
            .filter(|(id, fb)| fb.internal && !current.planes.values().any(|p| p.fb == **id))
            .map(|(id, _)| *id)
            .collect();
        for id in dead_fbs {
            self.fbs.remove(&id);
            self.objects.remove(&id.0);
        }

        let fbs = &self.fbs;
        self.bos
            .retain(|handle, _| fbs.values().any(|fb| fb.handle == *handle));
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    pub fn alloc_buffer(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> KmsResult<Buffer> {
        let supported = [
            PixelFormat::XRGB8888,
            PixelFormat::ARGB8888,
            PixelFormat::ARGB1555,
        ];
        if width == 0 || height == 0 || width > MAX_BUFFER_EDGE || height > MAX_BUFFER_EDGE {
            return Err(KmsError::InvalidArgument);
        }
        if !supported.contains(&format) {
            return Err(KmsError::InvalidArgument);
        }
        self.next_handle += 1;
        let handle = self.next_handle;
        let fill = format.quantize(Argb::TRANSPARENT).0;
        self.bos.insert(
            handle,
            BufferObject {
                width,
                height,
                format,
                pixels: vec![fill; (width * height) as usize],
            },
        );
        let fb_id = FbId(self.register(ObjectKind::Framebuffer));
        self.fbs.insert(
            fb_id,
            Framebuffer {
                handle,
                width,
                height,
                format,
                internal: false,
            },
        );
        Ok(Buffer {
            fb_id,
            handle,
            width,
            height,
            format,
        })
    }

    /// Framebuffer the legacy cursor path wraps around a buffer object
    pub fn create_internal_fb(&mut self, handle: u32, width: u32, height: u32) -> KmsResult<FbId> {
        let bo = self.bos.get(&handle).ok_or(KmsError::NoEntry)?;
        if width > bo.width || height > bo.height {
            return Err(KmsError::InvalidArgument);
        }
        let format = bo.format;
        let fb_id = FbId(self.register(ObjectKind::Framebuffer));
        self.fbs.insert(
            fb_id,
            Framebuffer {
                handle,
                width,
                height,
                format,
                internal: true,
            },
        );
        Ok(fb_id)
    }

    pub fn remove_fb(&mut self, id: FbId) -> KmsResult<()> {
        match self.fbs.get(&id) {
            Some(fb) if !fb.internal => {}
            _ => return Err(KmsError::NoEntry),
        }
        for (plane_id, plane) in self.current.planes.iter_mut() {
            if plane.fb == id {
                plane.disable();
                self.scanout.remove(plane_id);
            }
        }
        self.fbs.remove(&id);
        self.unregister(id.0);
        self.collect_garbage();
        Ok(())
    }

    pub fn buffer_mut(&mut self, fb: FbId) -> KmsResult<&mut BufferObject> {
        let handle = self.fbs.get(&fb).ok_or(KmsError::NoEntry)?.handle;
        self.bos.get_mut(&handle).ok_or(KmsError::NoEntry)
    }

    pub fn buffer(&self, fb: FbId) -> KmsResult<&BufferObject> {
        let handle = self.fbs.get(&fb).ok_or(KmsError::NoEntry)?.handle;
        self.bos.get(&handle).ok_or(KmsError::NoEntry)
    }

    // ========================================================================
    // Scanout
    // ========================================================================

    /// Refresh what a surface scans out after a commit
    ///
    /// Untouched surfaces keep their contents. A touched surface uploads the
    /// whole source region when no damage was given, when it was just
    /// enabled or when its source region moved; otherwise only the damage
    /// clipped to the source region is uploaded.
    pub fn update_scanout(
        &mut self,
        id: PlaneId,
        old: &PlaneState,
        new: &PlaneState,
    ) -> KmsResult<()> {
        if new.fb.is_none() {
            self.scanout.remove(&id);
            return Ok(());
        }
        let src = new.src_rect();
        let format = self.fbs.get(&new.fb).ok_or(KmsError::InvalidArgument)?.format;
        let clips = self.damage_of(new.damage)?;
        let full = clips.is_empty()
            || old.fb.is_none()
            || !old.same_source(new)
            || !self.scanout.contains_key(&id);

        let bo = self.buffer(new.fb)?.clone();
        let mut scanout = match self.scanout.remove(&id) {
            Some(s) if !full => s,
            _ => Scanout {
                width: src.width(),
                height: src.height(),
                format,
                pixels: vec![0; (src.width() * src.height()) as usize],
            },
        };
        scanout.format = format;

        let regions = if full { vec![src] } else { clips };
        for clip in regions {
            let Some(area) = clip.intersect(&src) else {
                continue;
            };
            for y in area.y1..area.y2 {
                for x in area.x1..area.x2 {
                    let (bx, by) = (x as u32, y as u32);
                    if bx >= bo.width || by >= bo.height {
                        continue;
                    }
                    let sx = (x - src.x1) as u32;
                    let sy = (y - src.y1) as u32;
                    scanout.pixels[(sy * scanout.width + sx) as usize] = bo.pixel(bx, by).0;
                }
            }
        }
        self.scanout.insert(id, scanout);
        Ok(())
    }

    /// Swap in a validated state
    ///
    /// Per-commit values (input fences, damage, out-fence pointers) are
    /// consumed here and do not persist into the committed state.
    pub fn commit_state(
        &mut self,
        mut new: DisplayState,
        touched: &BTreeSet<PlaneId>,
    ) -> KmsResult<()> {
        let old = self.current.clone();
        for id in touched {
            let before = old.plane(*id)?;
            let after = new.plane(*id)?;
            self.update_scanout(*id, before, after)?;
        }
        for plane in new.planes.values_mut() {
            plane.in_fence = None;
            plane.damage = BlobId::NONE;
        }
        for crtc in new.crtcs.values_mut() {
            crtc.out_fence_ptr = 0;
        }
        self.current = new;
        self.collect_garbage();
        Ok(())
    }
}

fn plane_value(state: &PlaneState, desc: &PlaneDesc, prop: PlaneProperty) -> u64 {
    match prop {
        PlaneProperty::Type => desc.plane_type.value(),
        PlaneProperty::SrcX => u64::from(state.src_x),
        PlaneProperty::SrcY => u64::from(state.src_y),
        PlaneProperty::SrcW => u64::from(state.src_w),
        PlaneProperty::SrcH => u64::from(state.src_h),
        PlaneProperty::CrtcX => signed_value(i64::from(state.crtc_x)),
        PlaneProperty::CrtcY => signed_value(i64::from(state.crtc_y)),
        PlaneProperty::CrtcW => u64::from(state.crtc_w),
        PlaneProperty::CrtcH => u64::from(state.crtc_h),
        PlaneProperty::FbId => state.fb.value(),
        PlaneProperty::CrtcId => state.crtc.value(),
        PlaneProperty::InFenceFd => NO_FENCE,
        PlaneProperty::FbDamageClips => state.damage.value(),
        PlaneProperty::Zpos => state.zpos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim() -> SimState {
        SimState::new(&SimConfig::default())
    }

    #[test]
    fn test_topology_matches_config() {
        let s = sim();
        assert_eq!(s.crtcs.len(), 1);
        assert_eq!(s.connectors.len(), 1);
        let types: Vec<PlaneType> = s.planes.iter().map(|p| p.plane_type).collect();
        assert_eq!(types, vec![PlaneType::Primary, PlaneType::Overlay, PlaneType::Cursor]);
        assert!(s.crtcs[0].cursor.is_some());
    }

    #[test]
    fn test_crtc_id_property_is_shared() {
        let s = sim();
        let plane_crtc = PropertyTable::id_of(&s.props.plane, PlaneProperty::CrtcId);
        let conn_crtc = PropertyTable::id_of(&s.props.connector, ConnectorProperty::CrtcId);
        assert!(plane_crtc.is_some());
        assert_eq!(plane_crtc, conn_crtc);
    }

    #[test]
    fn test_ids_are_unique_across_classes() {
        let s = sim();
        let mut ids: Vec<u32> = s.props.infos.keys().map(|p| p.0).collect();
        ids.extend(s.crtcs.iter().map(|c| c.id.0));
        ids.extend(s.planes.iter().map(|p| p.id.0));
        ids.extend(s.connectors.iter().map(|c| c.id.0));
        let before = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), before);
        assert!(!ids.contains(&0));
    }

    #[test]
    fn test_unreferenced_kernel_blob_is_collected() {
        let mut s = sim();
        let blob = s.create_blob(&[1, 2, 3], false).unwrap();
        s.collect_garbage();
        assert!(!s.blobs.contains_key(&blob));
        assert!(!s.is_object(blob.value(), ObjectKind::Blob));
    }

    #[test]
    fn test_destroyed_blob_survives_while_referenced() {
        let mut s = sim();
        let mode = ModeInfo::new(256, 192, 60).to_bytes();
        let blob = s.create_blob(&mode, true).unwrap();
        let crtc = s.crtcs[0].id;
        s.current.crtcs.get_mut(&crtc).unwrap().mode = blob;
        s.destroy_blob(blob).unwrap();
        assert!(s.blobs.contains_key(&blob));
        assert_eq!(s.destroy_blob(blob), Err(KmsError::NoEntry));

        s.current.crtcs.get_mut(&crtc).unwrap().mode = BlobId::NONE;
        s.collect_garbage();
        assert!(!s.blobs.contains_key(&blob));
    }

    #[test]
    fn test_empty_blob_is_rejected() {
        let mut s = sim();
        assert_eq!(s.create_blob(&[], true), Err(KmsError::InvalidArgument));
    }

    #[test]
    fn test_alloc_buffer_validates_size_and_format() {
        let mut s = sim();
        assert_eq!(
            s.alloc_buffer(0, 10, PixelFormat::XRGB8888),
            Err(KmsError::InvalidArgument)
        );
        assert_eq!(
            s.alloc_buffer(10, 10, PixelFormat(0x1234)),
            Err(KmsError::InvalidArgument)
        );
        let buf = s.alloc_buffer(10, 10, PixelFormat::XRGB8888).unwrap();
        assert!(s.is_object(buf.fb_id.value(), ObjectKind::Framebuffer));
        s.remove_fb(buf.fb_id).unwrap();
        assert!(s.bos.is_empty());
    }

    #[test]
    fn test_read_properties_reports_write_only_fence_as_minus_one() {
        let s = sim();
        let plane = s.planes[0].id;
        let props = s.read_properties(plane.object(), ObjectKind::Plane).unwrap();
        let fence_id = s.plane_property_id(PlaneProperty::InFenceFd).unwrap();
        let (_, value) = props.iter().find(|(id, _)| *id == fence_id).unwrap();
        assert_eq!(*value, NO_FENCE);
    }

    #[test]
    fn test_read_properties_rejects_wrong_class() {
        let s = sim();
        let plane = s.planes[0].id;
        assert_eq!(
            s.read_properties(plane.object(), ObjectKind::Crtc),
            Err(KmsError::NoEntry)
        );
    }
}
