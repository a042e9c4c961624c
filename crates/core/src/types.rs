//! Object identifiers
//!
//! The display device hands out ids from a single namespace shared by every
//! object class: pipelines (CRTCs), outputs (connectors), surfaces (planes),
//! framebuffers, blobs and the property objects themselves. Id `0` is never a
//! valid object. Typed wrappers keep the classes apart in the engine while
//! [`ObjectId`] carries the raw value across the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw object id as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// The invalid id
    pub const NONE: ObjectId = ObjectId(0);

    /// True for id 0
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Raw value widened to a property value
    pub fn value(self) -> u64 {
        u64::from(self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            /// The invalid id
            pub const NONE: $name = $name(0);

            /// True for id 0
            pub fn is_none(self) -> bool {
                self.0 == 0
            }

            /// Untyped object id
            pub fn object(self) -> ObjectId {
                ObjectId(self.0)
            }

            /// Raw value widened to a property value
            pub fn value(self) -> u64 {
                u64::from(self.0)
            }
        }

        impl From<$name> for ObjectId {
            fn from(id: $name) -> ObjectId {
                ObjectId(id.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

typed_id!(
    /// Pipeline (CRTC) id
    CrtcId
);
typed_id!(
    /// Surface (plane) id
    PlaneId
);
typed_id!(
    /// Output (connector) id
    ConnectorId
);
typed_id!(
    /// Framebuffer id
    FbId
);
typed_id!(
    /// Property blob id
    BlobId
);
typed_id!(
    /// Property id
    PropertyId
);

/// Class of an object in the shared id space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Display pipeline
    Crtc,
    /// Output connector
    Connector,
    /// Scanout surface
    Plane,
    /// Framebuffer wrapping a pixel buffer
    Framebuffer,
    /// Opaque property payload
    Blob,
    /// Property descriptor
    Property,
}

impl ObjectKind {
    /// Whether properties can be set on objects of this class
    pub fn has_properties(self) -> bool {
        matches!(self, ObjectKind::Crtc | ObjectKind::Connector | ObjectKind::Plane)
    }
}

/// Surface type tag, with the values of the `type` enum property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaneType {
    /// Compositable overlay surface
    Overlay,
    /// Primary scanout surface of a pipeline
    Primary,
    /// Hardware cursor surface
    Cursor,
}

impl PlaneType {
    /// Value of the `type` property
    pub fn value(self) -> u64 {
        match self {
            PlaneType::Overlay => 0,
            PlaneType::Primary => 1,
            PlaneType::Cursor => 2,
        }
    }

    /// Decode a `type` property value
    pub fn from_value(value: u64) -> Option<Self> {
        match value {
            0 => Some(PlaneType::Overlay),
            1 => Some(PlaneType::Primary),
            2 => Some(PlaneType::Cursor),
            _ => None,
        }
    }

    /// Enum entry name as the device reports it
    pub fn name(self) -> &'static str {
        match self {
            PlaneType::Overlay => "Overlay",
            PlaneType::Primary => "Primary",
            PlaneType::Cursor => "Cursor",
        }
    }
}

impl fmt::Display for PlaneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
