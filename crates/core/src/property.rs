//! Property model shared by the engine and the device
//!
//! Each settable object class (surface, pipeline, output) has a fixed,
//! ordered set of properties. The order of the enum is the slot order of a
//! [`PropertyVector`], so two vectors of the same class always compare slot by
//! slot. Filter predicates (`is_checked`) exclude properties whose read-back
//! value is meaningless: write-only slots, per-commit hints and immutable tags.

use crate::types::{ObjectKind, PropertyId};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Upper bound on properties per object class (one bit each in a mask)
pub const MAX_CLASS_PROPERTIES: usize = 32;

bitflags! {
    /// Fields excused from exact equality after a transaction
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct RelaxPolicy: u32 {
        /// Mode blob identity may differ if the content is identical
        const MODE = 1 << 0;
        /// Surface buffer id may be an internally allocated framebuffer
        const FB = 1 << 1;
    }
}

impl RelaxPolicy {
    /// No relaxation
    pub const NONE: RelaxPolicy = RelaxPolicy::empty();
}

/// Behaviour every per-class property enum provides
pub trait PropertyKind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// All properties of the class, in slot order
    const ALL: &'static [Self];

    /// Object class these properties belong to
    const CLASS: ObjectKind;

    /// Slot index in a property vector
    fn index(self) -> usize;

    /// Property name as the device reports it
    fn name(self) -> &'static str;

    /// Whether read-back values take part in equality checks
    fn is_checked(self) -> bool;

    /// Whether the value is a blob id
    fn is_blob(self) -> bool {
        false
    }

    /// Relaxation flag that excuses this property, if any
    fn relaxation(self) -> RelaxPolicy {
        RelaxPolicy::NONE
    }

    /// Value the slot returns to after a committed transaction consumed it,
    /// or `None` if the staged value persists
    fn reset_after_commit(self) -> Option<u64> {
        None
    }

    /// Initial staged value before discovery fills the slot
    fn initial_value(self) -> u64 {
        self.reset_after_commit().unwrap_or(0)
    }

    /// Single-bit mask for this property
    fn bit(self) -> PropertyMask {
        PropertyMask(1 << self.index())
    }

    /// Look a property up by its device name
    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }
}

/// Encode a signed property value
pub fn signed_value(value: i64) -> u64 {
    value as u64
}

/// Decode a signed property value
pub fn as_signed(value: u64) -> i64 {
    value as i64
}

/// Value of a file-descriptor property that carries no descriptor
pub const NO_FENCE: u64 = u64::MAX;

/// Surface (plane) properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaneProperty {
    /// Immutable type tag
    Type,
    /// Source crop x, 16.16 fixed point
    SrcX,
    /// Source crop y, 16.16 fixed point
    SrcY,
    /// Source crop width, 16.16 fixed point
    SrcW,
    /// Source crop height, 16.16 fixed point
    SrcH,
    /// Destination x in pipeline space
    CrtcX,
    /// Destination y in pipeline space
    CrtcY,
    /// Destination width
    CrtcW,
    /// Destination height
    CrtcH,
    /// Attached framebuffer
    FbId,
    /// Assigned pipeline
    CrtcId,
    /// Input fence descriptor
    InFenceFd,
    /// Damage rectangle blob
    FbDamageClips,
    /// Stacking order
    Zpos,
}

impl PropertyKind for PlaneProperty {
    const ALL: &'static [Self] = &[
        PlaneProperty::Type,
        PlaneProperty::SrcX,
        PlaneProperty::SrcY,
        PlaneProperty::SrcW,
        PlaneProperty::SrcH,
        PlaneProperty::CrtcX,
        PlaneProperty::CrtcY,
        PlaneProperty::CrtcW,
        PlaneProperty::CrtcH,
        PlaneProperty::FbId,
        PlaneProperty::CrtcId,
        PlaneProperty::InFenceFd,
        PlaneProperty::FbDamageClips,
        PlaneProperty::Zpos,
    ];

    const CLASS: ObjectKind = ObjectKind::Plane;

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            PlaneProperty::Type => "type",
            PlaneProperty::SrcX => "SRC_X",
            PlaneProperty::SrcY => "SRC_Y",
            PlaneProperty::SrcW => "SRC_W",
            PlaneProperty::SrcH => "SRC_H",
            PlaneProperty::CrtcX => "CRTC_X",
            PlaneProperty::CrtcY => "CRTC_Y",
            PlaneProperty::CrtcW => "CRTC_W",
            PlaneProperty::CrtcH => "CRTC_H",
            PlaneProperty::FbId => "FB_ID",
            PlaneProperty::CrtcId => "CRTC_ID",
            PlaneProperty::InFenceFd => "IN_FENCE_FD",
            PlaneProperty::FbDamageClips => "FB_DAMAGE_CLIPS",
            PlaneProperty::Zpos => "zpos",
        }
    }

    fn is_checked(self) -> bool {
        // type is immutable, IN_FENCE_FD reads back -1, damage is per commit
        !matches!(
            self,
            PlaneProperty::Type | PlaneProperty::InFenceFd | PlaneProperty::FbDamageClips
        )
    }

    fn is_blob(self) -> bool {
        matches!(self, PlaneProperty::FbDamageClips)
    }

    fn relaxation(self) -> RelaxPolicy {
        match self {
            PlaneProperty::FbId => RelaxPolicy::FB,
            _ => RelaxPolicy::NONE,
        }
    }

    fn reset_after_commit(self) -> Option<u64> {
        match self {
            PlaneProperty::InFenceFd => Some(NO_FENCE),
            PlaneProperty::FbDamageClips => Some(0),
            _ => None,
        }
    }
}

/// Pipeline (CRTC) properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrtcProperty {
    /// Pipeline is scanning out
    Active,
    /// Mode timing blob
    ModeId,
    /// User pointer receiving the out-fence descriptor
    OutFencePtr,
}

impl PropertyKind for CrtcProperty {
    const ALL: &'static [Self] = &[
        CrtcProperty::Active,
        CrtcProperty::ModeId,
        CrtcProperty::OutFencePtr,
    ];

    const CLASS: ObjectKind = ObjectKind::Crtc;

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            CrtcProperty::Active => "ACTIVE",
            CrtcProperty::ModeId => "MODE_ID",
            CrtcProperty::OutFencePtr => "OUT_FENCE_PTR",
        }
    }

    fn is_checked(self) -> bool {
        !matches!(self, CrtcProperty::OutFencePtr)
    }

    fn is_blob(self) -> bool {
        matches!(self, CrtcProperty::ModeId)
    }

    fn relaxation(self) -> RelaxPolicy {
        match self {
            CrtcProperty::ModeId => RelaxPolicy::MODE,
            _ => RelaxPolicy::NONE,
        }
    }

    fn reset_after_commit(self) -> Option<u64> {
        match self {
            CrtcProperty::OutFencePtr => Some(0),
            _ => None,
        }
    }
}

/// Output (connector) properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorProperty {
    /// Pipeline the output is routed to
    CrtcId,
}

impl PropertyKind for ConnectorProperty {
    const ALL: &'static [Self] = &[ConnectorProperty::CrtcId];

    const CLASS: ObjectKind = ObjectKind::Connector;

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            ConnectorProperty::CrtcId => "CRTC_ID",
        }
    }

    fn is_checked(self) -> bool {
        true
    }
}

/// Set of property slots, one bit per slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PropertyMask(pub u32);

impl PropertyMask {
    /// Empty mask
    pub const EMPTY: PropertyMask = PropertyMask(0);

    /// Mark a slot
    pub fn insert(&mut self, index: usize) {
        debug_assert!(index < MAX_CLASS_PROPERTIES);
        self.0 |= 1 << index;
    }

    /// Unmark a slot
    pub fn remove(&mut self, index: usize) {
        self.0 &= !(1 << index);
    }

    /// Whether a slot is marked
    pub fn contains(self, index: usize) -> bool {
        index < MAX_CLASS_PROPERTIES && self.0 & (1 << index) != 0
    }

    /// No slot marked
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Unmark everything
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Number of marked slots
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }
}

/// Fixed-order vector of property values for one object class
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PropertyVector<P: PropertyKind> {
    values: SmallVec<[u64; 16]>,
    _kind: PhantomData<P>,
}

impl<P: PropertyKind> PropertyVector<P> {
    /// Vector holding every property's initial value
    pub fn new() -> Self {
        Self {
            values: P::ALL.iter().map(|p| p.initial_value()).collect(),
            _kind: PhantomData,
        }
    }

    /// Vector with every slot set to zero
    pub fn zeroed() -> Self {
        Self {
            values: SmallVec::from_elem(0, P::ALL.len()),
            _kind: PhantomData,
        }
    }

    /// Value of a slot
    pub fn get(&self, prop: P) -> u64 {
        self.values[prop.index()]
    }

    /// Overwrite a slot
    pub fn set(&mut self, prop: P, value: u64) {
        self.values[prop.index()] = value;
    }

    /// Iterate `(property, value)` in slot order
    pub fn iter(&self) -> impl Iterator<Item = (P, u64)> + '_ {
        P::ALL.iter().map(move |&p| (p, self.values[p.index()]))
    }

    /// Copy with every unchecked slot zeroed
    pub fn filtered(&self) -> Self {
        let mut out = self.clone();
        for &p in P::ALL {
            if !p.is_checked() {
                out.values[p.index()] = 0;
            }
        }
        out
    }

    /// Checked slots whose values differ
    pub fn diff(&self, other: &Self) -> Vec<P> {
        P::ALL
            .iter()
            .copied()
            .filter(|p| p.is_checked() && self.get(*p) != other.get(*p))
            .collect()
    }
}

impl<P: PropertyKind> Default for PropertyVector<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PropertyKind> fmt::Debug for PropertyVector<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (p, v) in self.iter() {
            map.entry(&p.name(), &v);
        }
        map.finish()
    }
}

/// Value domain of a property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyType {
    /// Unsigned range, inclusive
    Range {
        /// Lowest accepted value
        min: u64,
        /// Highest accepted value
        max: u64,
    },
    /// Signed range, inclusive
    SignedRange {
        /// Lowest accepted value
        min: i64,
        /// Highest accepted value
        max: i64,
    },
    /// Enumerated values with names
    Enum(Vec<(u64, String)>),
    /// Id of an object of the given class, or 0
    Object(ObjectKind),
    /// Blob id, or 0
    Blob,
}

bitflags! {
    /// Property flags as the device reports them
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PropertyFlags: u32 {
        /// Value cannot be changed by user space
        const IMMUTABLE = 1 << 0;
        /// Only settable through atomic transactions
        const ATOMIC = 1 << 1;
    }
}

/// Property descriptor returned by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    /// Property id
    pub id: PropertyId,
    /// Device name
    pub name: String,
    /// Value domain
    pub kind: PropertyType,
    /// Flags
    pub flags: PropertyFlags,
}

impl PropertyInfo {
    /// Whether user space may set this property
    pub fn is_immutable(&self) -> bool {
        self.flags.contains(PropertyFlags::IMMUTABLE)
    }

    /// Range and enum check; object and blob references are resolved by the device
    pub fn accepts(&self, value: u64) -> bool {
        match &self.kind {
            PropertyType::Range { min, max } => value >= *min && value <= *max,
            PropertyType::SignedRange { min, max } => {
                let v = as_signed(value);
                v >= *min && v <= *max
            }
            PropertyType::Enum(entries) => entries.iter().any(|(v, _)| *v == value),
            PropertyType::Object(_) | PropertyType::Blob => value <= u64::from(u32::MAX),
        }
    }
}
