use std::fmt;

use ahash::AHashMap;
use formula_model::SheetRange;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::store::FormulaId;

/// A subscription record in the range index. Ids are never reused, so id order is creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u32);

impl ListenerId {
    pub(crate) const fn new(raw: u32) -> Self {
        Self(raw)
    }
}

/// Handle returned by [`crate::Engine::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u32);

impl ObserverId {
    pub(crate) const fn new(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenerOwner {
    Formula(FormulaId),
    Observer(ObserverId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    /// A recalculated or edited cell now holds a different value.
    ValueChanged,
    /// A formula inside the range became stale.
    Dirtied,
    /// Rows or columns moved, or a sheet was cleared.
    Structural,
}

/// Delivered to observer callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub range: SheetRange,
    pub kind: ChangeKind,
}

pub type ObserverCallback = Box<dyn FnMut(&ChangeEvent) + Send>;

#[derive(Debug, Clone)]
pub(crate) struct ListenerEntry {
    pub(crate) owner: ListenerOwner,
    pub(crate) ranges: SmallVec<[SheetRange; 4]>,
}

/// Every live listener with the ranges it subscribed to, so teardown can remove all of them.
#[derive(Debug, Default)]
pub(crate) struct ListenerRegistry {
    entries: AHashMap<ListenerId, ListenerEntry>,
    next_id: u32,
}

impl ListenerRegistry {
    pub(crate) fn register(
        &mut self,
        owner: ListenerOwner,
        ranges: SmallVec<[SheetRange; 4]>,
    ) -> ListenerId {
        let id = ListenerId::new(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, ListenerEntry { owner, ranges });
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> Option<ListenerEntry> {
        self.entries.remove(&id)
    }

    pub(crate) fn owner(&self, id: ListenerId) -> Option<ListenerOwner> {
        self.entries.get(&id).map(|entry| entry.owner)
    }

    pub(crate) fn ranges(&self, id: ListenerId) -> &[SheetRange] {
        self.entries
            .get(&id)
            .map(|entry| entry.ranges.as_slice())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
