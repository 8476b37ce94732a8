//! The range index: which listeners care about which rectangles.

mod area;

use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashMap;
use formula_model::{SheetId, SheetRange};
use rstar::{RTree, AABB};

use crate::listener::ListenerId;
use area::{AreaId, AreaIndexEntry, BroadcastArea};

/// Maps subscribed ranges to their listeners.
///
/// Each distinct range is one broadcast area, interned by value, so an area's listener set is
/// exactly the listeners that subscribed to that range. Areas are indexed in a per-sheet R-tree
/// (a multi-sheet area appears in the tree of every sheet it spans), which keeps
/// [`BroadcastAreaMap::notify`] sub-linear in the number of subscriptions.
#[derive(Debug, Default)]
pub(crate) struct BroadcastAreaMap {
    areas: AHashMap<AreaId, BroadcastArea>,
    area_ids: AHashMap<SheetRange, AreaId>,
    next_area_id: AreaId,
    index: BTreeMap<SheetId, RTree<AreaIndexEntry>>,
    subscriptions: usize,
}

impl BroadcastAreaMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attach `listener` to `range`. Returns false if it was already attached.
    pub(crate) fn subscribe(&mut self, range: SheetRange, listener: ListenerId) -> bool {
        let id = match self.area_ids.get(&range) {
            Some(id) => *id,
            None => {
                let id = self.next_area_id;
                self.next_area_id += 1;
                self.area_ids.insert(range, id);
                self.areas.insert(id, BroadcastArea::new(range));
                let entry = AreaIndexEntry::new(id, &range);
                for sheet in range.sheets() {
                    self.index.entry(sheet).or_default().insert(entry);
                }
                id
            }
        };
        let added = self
            .areas
            .get_mut(&id)
            .is_some_and(|area| area.listeners.insert(listener));
        if added {
            self.subscriptions += 1;
        }
        added
    }

    /// Detach `listener` from `range`, pruning the area once nobody listens to it.
    pub(crate) fn unsubscribe(&mut self, range: &SheetRange, listener: ListenerId) -> bool {
        let Some(&id) = self.area_ids.get(range) else {
            return false;
        };
        let Some(area) = self.areas.get_mut(&id) else {
            return false;
        };
        if !area.listeners.remove(&listener) {
            return false;
        }
        self.subscriptions -= 1;
        if area.listeners.is_empty() {
            self.remove_area(id);
        }
        true
    }

    fn remove_area(&mut self, id: AreaId) {
        let Some(area) = self.areas.remove(&id) else {
            return;
        };
        self.area_ids.remove(&area.range);
        let entry = AreaIndexEntry::new(id, &area.range);
        for sheet in area.range.sheets() {
            if let Some(tree) = self.index.get_mut(&sheet) {
                tree.remove(&entry);
                if tree.size() == 0 {
                    self.index.remove(&sheet);
                }
            }
        }
    }

    /// Every listener subscribed to a range intersecting `changed`, each once, in id order.
    pub(crate) fn notify(&self, changed: &SheetRange) -> Vec<ListenerId> {
        let (min, max) = changed.envelope_i64();
        let env = AABB::from_corners(min, max);
        let mut hits: BTreeSet<AreaId> = BTreeSet::new();
        for (_, tree) in self.index.range(changed.first_sheet..=changed.last_sheet) {
            hits.extend(tree.locate_in_envelope_intersecting(&env).map(|e| e.id));
        }

        let mut listeners: BTreeSet<ListenerId> = BTreeSet::new();
        for id in hits {
            if let Some(area) = self.areas.get(&id) {
                listeners.extend(area.listeners.iter().copied());
            }
        }
        listeners.into_iter().collect()
    }

    pub(crate) fn area_count(&self) -> usize {
        self.areas.len()
    }

    /// Total number of (area, listener) pairs.
    pub(crate) fn subscription_count(&self) -> usize {
        self.subscriptions
    }

    #[cfg(test)]
    pub(crate) fn contains_listener(&self, listener: ListenerId) -> bool {
        self.areas
            .values()
            .any(|area| area.listeners.contains(&listener))
    }

    #[cfg(test)]
    pub(crate) fn listeners_of(&self, range: &SheetRange) -> Vec<ListenerId> {
        self.area_ids
            .get(range)
            .and_then(|id| self.areas.get(id))
            .map(|area| area.listeners.iter().copied().collect())
            .unwrap_or_default()
    }
}
