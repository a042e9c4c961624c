//! Core types for kmsprobe
//!
//! This crate defines the vocabulary shared by the display device and the
//! verification engine:
//! - Ids: typed object ids over one shared id space
//! - Errors: `KmsError` with errno mapping and error classes
//! - Properties: per-class property enums, vectors, masks, relaxation policy
//! - Wire formats: mode blobs, damage rectangles, atomic request headers
//! - Formats: pixel formats, colours and 16.16 fixed point helpers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod damage;
pub mod error;
pub mod format;
pub mod mode;
pub mod property;
pub mod request;
pub mod types;

pub use damage::{decode_rects, encode_rects, DamageRect, DAMAGE_RECT_SIZE};
pub use error::{return_code, ErrorClass, KmsError, KmsResult};
pub use format::{from_fixed, to_fixed, Argb, PixelFormat, FIXED_SHIFT, MOD_LINEAR};
pub use mode::{ModeInfo, MODE_INFO_SIZE};
pub use property::{
    as_signed, signed_value, ConnectorProperty, CrtcProperty, PlaneProperty, PropertyFlags,
    PropertyInfo, PropertyKind, PropertyMask, PropertyType, PropertyVector, RelaxPolicy,
    MAX_CLASS_PROPERTIES, NO_FENCE,
};
pub use request::{AtomicFlags, AtomicRequest, ATOMIC_REQUEST_SIZE};
pub use types::{
    BlobId, ConnectorId, CrtcId, FbId, ObjectId, ObjectKind, PlaneId, PlaneType, PropertyId,
};
