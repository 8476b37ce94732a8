use std::collections::BTreeSet;

use formula_model::SheetRange;
use rstar::{RTreeObject, AABB};

use crate::listener::ListenerId;

pub(crate) type AreaId = u32;

/// A subscribed range and the listeners attached to exactly that range.
#[derive(Debug, Clone)]
pub(crate) struct BroadcastArea {
    pub(crate) range: SheetRange,
    pub(crate) listeners: BTreeSet<ListenerId>,
}

impl BroadcastArea {
    pub(crate) fn new(range: SheetRange) -> Self {
        Self {
            range,
            listeners: BTreeSet::new(),
        }
    }
}

/// R-tree entry for one area on one sheet. Equality is by id so removal finds the exact entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AreaIndexEntry {
    pub(crate) id: AreaId,
    pub(crate) envelope: AABB<[i64; 2]>,
}

impl AreaIndexEntry {
    pub(crate) fn new(id: AreaId, range: &SheetRange) -> Self {
        let (min, max) = range.envelope_i64();
        Self {
            id,
            envelope: AABB::from_corners(min, max),
        }
    }
}

impl PartialEq for AreaIndexEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AreaIndexEntry {}

impl RTreeObject for AreaIndexEntry {
    type Envelope = AABB<[i64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}
