//! Shadow state snapshots
//!
//! A snapshot is the checked part of one object's property vector, read
//! through the atomic query path or taken from the staged state. Two
//! snapshots are compared slot by slot. Blob slots compare by content: two
//! different ids naming byte-identical payloads are equal. Relaxed slots
//! that are not blobs are skipped.

use crate::context::KmsContext;
use crate::driver::relaxes;
use crate::error::{QueryPath, VerifyError, VerifyResult};
use crate::model::{ObjectState, Target};
use kmsprobe_core::{BlobId, ObjectId, PropertyKind, PropertyMask, PropertyVector, RelaxPolicy};
use kmsprobe_device::{DisplayDevice, Platform};

/// Checked property values of one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<P: PropertyKind> {
    object: ObjectId,
    values: PropertyVector<P>,
    present: PropertyMask,
}

impl<P: PropertyKind> Snapshot<P> {
    /// Snapshot of the staged values
    pub fn from_staged(state: &ObjectState<P>) -> Self {
        Snapshot {
            object: state.id(),
            values: state.staged().filtered(),
            present: state.present(),
        }
    }

    /// Read the object's current values from the device
    pub fn capture(dev: &dyn DisplayDevice, state: &ObjectState<P>) -> VerifyResult<Self> {
        let mut values = PropertyVector::<P>::zeroed();
        for (pid, value) in dev.get_object_properties(state.id(), P::CLASS)? {
            if let Some(prop) = P::ALL.iter().find(|p| state.property_id(**p) == Some(pid)) {
                values.set(*prop, value);
            }
        }
        Ok(Snapshot {
            object: state.id(),
            values: values.filtered(),
            present: state.present(),
        })
    }

    /// Object the snapshot describes
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Value of a slot, `None` when the object lacks the property
    pub fn get(&self, prop: P) -> Option<u64> {
        self.present.contains(prop.index()).then(|| self.values.get(prop))
    }

    /// Every checked slot whose raw value differs
    pub fn diff(&self, other: &Self) -> Vec<P> {
        self.values
            .diff(&other.values)
            .into_iter()
            .filter(|p| self.present.contains(p.index()))
            .collect()
    }

    /// Checked slots that differ after relaxation and content comparison
    pub fn mismatches(&self, other: &Self, relax: RelaxPolicy, dev: &dyn DisplayDevice) -> Vec<P> {
        self.diff(other)
            .into_iter()
            .filter(|p| {
                if p.is_blob() {
                    !same_blob_content(dev, self.values.get(*p), other.values.get(*p))
                } else {
                    !relaxes(*p, relax)
                }
            })
            .collect()
    }

    /// Whether the two snapshots agree under `relax`
    pub fn equals(&self, other: &Self, relax: RelaxPolicy, dev: &dyn DisplayDevice) -> bool {
        self.mismatches(other, relax, dev).is_empty()
    }

    /// First disagreement with `expected` as a [`VerifyError::Mismatch`]
    pub fn check_against(
        &self,
        expected: &Self,
        relax: RelaxPolicy,
        dev: &dyn DisplayDevice,
    ) -> VerifyResult<()> {
        match self.mismatches(expected, relax, dev).first() {
            None => Ok(()),
            Some(prop) => Err(VerifyError::Mismatch {
                path: QueryPath::Atomic,
                object: self.object,
                property: prop.name(),
                expected: expected.values.get(*prop).to_string(),
                actual: self.values.get(*prop).to_string(),
            }),
        }
    }
}

/// Two blob ids name the same payload
fn same_blob_content(dev: &dyn DisplayDevice, a: u64, b: u64) -> bool {
    if a == b {
        return true;
    }
    if a == 0 || b == 0 {
        return false;
    }
    match (
        dev.get_blob(BlobId(a as u32)),
        dev.get_blob(BlobId(b as u32)),
    ) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

impl<P: Platform + 'static> KmsContext<P> {
    /// Current device state of one object through the atomic query path
    pub fn capture<T: Target>(&self, target: T) -> VerifyResult<Snapshot<T::Prop>> {
        Snapshot::capture(&*self.device, target.state(&self.model))
    }

    /// Staged state of one object
    pub fn staged_snapshot<T: Target>(&self, target: T) -> Snapshot<T::Prop> {
        Snapshot::from_staged(target.state(&self.model))
    }
}
