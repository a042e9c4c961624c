//! Collaborator traits
//!
//! The engine never talks to a display device directly. It goes through
//! these narrow traits so the reference device and a real backend are
//! interchangeable.
//!
//! ## Thread safety
//!
//! All methods take `&self`. Implementations serialize internally; a fence
//! may be signaled from another thread while a commit blocks on it.

use crate::memory::UserMemory;
use kmsprobe_core::{
    Argb, AtomicRequest, BlobId, ConnectorId, CrtcId, DamageRect, FbId, KmsResult, ModeInfo,
    ObjectId, ObjectKind, PixelFormat, PlaneId, PropertyId, PropertyInfo,
};

/// Object ids the device exposes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    /// Pipelines, in index order (bit `i` of `possible_crtcs` is `crtcs[i]`)
    pub crtcs: Vec<CrtcId>,
    /// Outputs
    pub connectors: Vec<ConnectorId>,
    /// Surfaces
    pub planes: Vec<PlaneId>,
    /// Framebuffers currently registered
    pub framebuffers: Vec<FbId>,
}

/// Output description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorInfo {
    /// Output id
    pub id: ConnectorId,
    /// Something is attached
    pub connected: bool,
    /// Supported modes, preferred first
    pub modes: Vec<ModeInfo>,
    /// Bitmask of pipeline indices the output can be routed to
    pub possible_crtcs: u32,
}

/// Legacy "get CRTC" result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyCrtc {
    /// Pipeline id
    pub crtc_id: CrtcId,
    /// Framebuffer of the primary surface
    pub buffer_id: FbId,
    /// Scanout x offset in whole pixels
    pub x: u32,
    /// Scanout y offset in whole pixels
    pub y: u32,
    /// Active width, zero when no mode is set
    pub width: u32,
    /// Active height, zero when no mode is set
    pub height: u32,
    /// A mode is set
    pub mode_valid: bool,
    /// The mode, zeroed when `mode_valid` is false
    pub mode: ModeInfo,
}

/// Legacy "get plane" result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPlane {
    /// Surface id
    pub plane_id: PlaneId,
    /// Assigned pipeline
    pub crtc_id: CrtcId,
    /// Attached framebuffer
    pub fb_id: FbId,
    /// Destination x
    pub crtc_x: i32,
    /// Destination y
    pub crtc_y: i32,
    /// Source x in whole pixels
    pub x: u32,
    /// Source y in whole pixels
    pub y: u32,
    /// Bitmask of pipeline indices the surface can be assigned to
    pub possible_crtcs: u32,
    /// Supported pixel formats
    pub formats: Vec<PixelFormat>,
}

/// Arguments of a legacy "set plane"; source values are 16.16 fixed point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneConfig {
    /// Target pipeline
    pub crtc_id: CrtcId,
    /// Framebuffer, `FbId::NONE` disables the surface
    pub fb_id: FbId,
    /// Destination x
    pub crtc_x: i32,
    /// Destination y
    pub crtc_y: i32,
    /// Destination width
    pub crtc_w: u32,
    /// Destination height
    pub crtc_h: u32,
    /// Source x
    pub src_x: u32,
    /// Source y
    pub src_y: u32,
    /// Source width
    pub src_w: u32,
    /// Source height
    pub src_h: u32,
}

/// Completion event queued by a `PAGE_FLIP_EVENT` transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipEvent {
    /// Pipeline that completed
    pub crtc_id: CrtcId,
    /// `user_data` of the request
    pub user_data: u64,
    /// Per-pipeline completion counter
    pub sequence: u32,
}

/// Allocated pixel buffer with its framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffer {
    /// Framebuffer id for `FB_ID`
    pub fb_id: FbId,
    /// Buffer object handle for the legacy cursor call
    pub handle: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: PixelFormat,
}

/// Display device: enumeration, properties, blobs, atomic and legacy ioctls
pub trait DisplayDevice: Send + Sync {
    /// Enumerate pipelines, outputs, surfaces and framebuffers
    fn get_resources(&self) -> KmsResult<Resources>;

    /// Describe an output
    fn get_connector(&self, id: ConnectorId) -> KmsResult<ConnectorInfo>;

    /// Current `(property, value)` pairs of an object of the given class
    fn get_object_properties(
        &self,
        id: ObjectId,
        kind: ObjectKind,
    ) -> KmsResult<Vec<(PropertyId, u64)>>;

    /// Property metadata
    fn get_property(&self, id: PropertyId) -> KmsResult<PropertyInfo>;

    /// Register a blob; the caller owns the returned id
    fn create_blob(&self, data: &[u8]) -> KmsResult<BlobId>;

    /// Blob payload
    fn get_blob(&self, id: BlobId) -> KmsResult<Vec<u8>>;

    /// Drop the caller's reference to a blob
    fn destroy_blob(&self, id: BlobId) -> KmsResult<()>;

    /// Submit an atomic transaction; arrays are read from [`Self::memory`]
    fn atomic_commit(&self, request: &AtomicRequest) -> KmsResult<()>;

    /// Legacy pipeline query
    fn get_crtc(&self, id: CrtcId) -> KmsResult<LegacyCrtc>;

    /// Legacy modeset; `mode == None` disables the pipeline
    fn set_crtc(
        &self,
        id: CrtcId,
        fb: FbId,
        x: u32,
        y: u32,
        connectors: &[ConnectorId],
        mode: Option<&ModeInfo>,
    ) -> KmsResult<()>;

    /// Legacy surface query
    fn get_plane(&self, id: PlaneId) -> KmsResult<LegacyPlane>;

    /// Legacy surface update
    fn set_plane(&self, id: PlaneId, config: &PlaneConfig) -> KmsResult<()>;

    /// Legacy cursor image; `handle == 0` hides the cursor
    fn set_cursor(&self, crtc: CrtcId, handle: u32, width: u32, height: u32) -> KmsResult<()>;

    /// Legacy cursor position
    fn move_cursor(&self, crtc: CrtcId, x: i32, y: i32) -> KmsResult<()>;

    /// Maximum cursor size `(width, height)`
    fn cursor_size_cap(&self) -> (u32, u32);

    /// Drain queued completion events
    fn read_events(&self) -> Vec<FlipEvent>;

    /// Close a descriptor handed out by the device
    fn close_fd(&self, fd: i32) -> KmsResult<()>;

    /// Address space the transaction arrays and out-fence slots live in
    fn memory(&self) -> &UserMemory;
}

/// Pixel buffer allocation and drawing
pub trait BufferProvider: Send + Sync {
    /// Allocate a buffer and wrap it in a framebuffer
    fn alloc_buffer(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        modifier: u64,
    ) -> KmsResult<Buffer>;

    /// Remove a framebuffer; surfaces scanning it out are disabled
    fn free_buffer(&self, fb: FbId) -> KmsResult<()>;

    /// Fill a rectangle, clipped to the buffer
    fn fill_rect(&self, fb: FbId, rect: DamageRect, color: Argb) -> KmsResult<()>;

    /// Paint a deterministic test pattern over the whole buffer
    fn paint_pattern(&self, fb: FbId) -> KmsResult<()>;

    /// Copy `src` into `dst` at the origin, clipped to `dst`
    fn copy_buffer(&self, src: FbId, dst: FbId) -> KmsResult<()>;
}

/// Software fence timelines
pub trait FenceProvider: Send + Sync {
    /// New timeline at value 0; returns its descriptor
    fn create_timeline(&self) -> KmsResult<i32>;

    /// Fence that signals when the timeline reaches `seq`; returns its descriptor
    fn create_fence(&self, timeline: i32, seq: u32) -> KmsResult<i32>;

    /// Advance a timeline
    fn signal(&self, timeline: i32, inc: u32) -> KmsResult<()>;

    /// Whether a fence descriptor has signaled
    fn fence_status(&self, fence: i32) -> KmsResult<bool>;
}

/// Output checksum readback
pub trait ChecksumSource: Send + Sync {
    /// Checksum of the current output of an active pipeline
    fn read_output_checksum(&self, crtc: CrtcId) -> KmsResult<u32>;
}

/// Everything the engine needs from a platform
pub trait Platform: DisplayDevice + BufferProvider + FenceProvider + ChecksumSource {}

impl<T> Platform for T where T: DisplayDevice + BufferProvider + FenceProvider + ChecksumSource {}
