use std::collections::VecDeque;

use ahash::AHashSet;
use formula_model::SheetRange;
use smallvec::smallvec;

use super::{Engine, HardRecalcState, Observer};
use crate::error::RecalcError;
use crate::listener::{ChangeEvent, ChangeKind, ListenerOwner, ObserverId};
use crate::store::FormulaId;

impl Engine {
    /// Subscribe a non-formula observer (a chart, an export view) to changes inside `range`.
    pub fn subscribe(
        &mut self,
        range: SheetRange,
        callback: impl FnMut(&ChangeEvent) + Send + 'static,
    ) -> Result<ObserverId, RecalcError> {
        self.check_range(&range)?;
        let id = ObserverId::new(self.next_observer);
        self.next_observer += 1;
        let listener = self
            .listeners
            .register(ListenerOwner::Observer(id), smallvec![range]);
        self.areas.subscribe(range, listener);
        self.observers.insert(
            id,
            Observer {
                listener,
                callback: Box::new(callback),
            },
        );
        Ok(id)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> Result<(), RecalcError> {
        let observer = self
            .observers
            .remove(&id)
            .ok_or(RecalcError::UnknownObserver(id))?;
        self.drop_listener(observer.listener);
        Ok(())
    }

    /// Subscribe formula `id` to every range it reads.
    pub(crate) fn start_listening(&mut self, id: FormulaId) {
        let Some(f) = self.store.formula(id) else {
            return;
        };
        let ranges = f.expr.references(f.cell, &self.config.limits);
        if ranges.is_empty() {
            return;
        }
        let listener = self
            .listeners
            .register(ListenerOwner::Formula(id), ranges.clone());
        for range in ranges {
            self.areas.subscribe(range, listener);
        }
        if let Some(f) = self.store.formula_mut(id) {
            f.listener = Some(listener);
        }
    }

    pub(crate) fn end_listening(&mut self, id: FormulaId) {
        if let Some(listener) = self.store.formula_mut(id).and_then(|f| f.listener.take()) {
            self.drop_listener(listener);
        }
    }

    fn drop_listener(&mut self, listener: crate::listener::ListenerId) {
        if let Some(entry) = self.listeners.remove(listener) {
            for range in &entry.ranges {
                self.areas.unsubscribe(range, listener);
            }
        }
    }

    /// Start listening now, or defer it while hard recalc suspends listener setup.
    pub(crate) fn attach(&mut self, id: FormulaId) {
        if self.hard_state == HardRecalcState::Off {
            self.start_listening(id);
        } else {
            self.not_listening.insert(id);
        }
    }

    /// Mark `id` dirty and queue it. Returns true if it was clean before.
    pub(crate) fn mark_formula_dirty(&mut self, id: FormulaId) -> bool {
        let Some(f) = self.store.formula_mut(id) else {
            return false;
        };
        let newly = !f.dirty;
        f.dirty = true;
        self.queue.push_back(id);
        newly
    }

    pub(crate) fn dirty_and_broadcast(&mut self, id: FormulaId) {
        self.mark_formula_dirty(id);
        if let Some(cell) = self.cell_of(id) {
            self.broadcast_change(SheetRange::cell(cell), ChangeKind::Dirtied);
        }
    }

    pub(crate) fn mark_all_dirty(&mut self) -> Vec<FormulaId> {
        let ids: Vec<FormulaId> = self.store.formula_ids().collect();
        for &id in &ids {
            self.mark_formula_dirty(id);
        }
        ids
    }

    /// Propagate a change of `range` through the range index, breadth first.
    ///
    /// Formula listeners become dirty and their own cells propagate further; observers get a
    /// callback (`Dirtied` for transitive hits). Each listener is visited at most once. Returns
    /// the formulas that were newly dirtied.
    pub(crate) fn broadcast_change(&mut self, range: SheetRange, kind: ChangeKind) -> Vec<FormulaId> {
        if self.hard_state == HardRecalcState::Eternal {
            return Vec::new();
        }

        let limit = self.config.dirty_mark_limit;
        let mut dirtied = Vec::new();
        let mut visited: AHashSet<crate::listener::ListenerId> = AHashSet::new();
        let mut pending = VecDeque::from([(range, kind)]);

        while let Some((changed, kind)) = pending.pop_front() {
            for listener in self.areas.notify(&changed) {
                if !visited.insert(listener) {
                    continue;
                }
                if visited.len() > limit {
                    log::warn!(
                        "dirty propagation from {range} visited more than {limit} listeners; \
                         marking every formula dirty"
                    );
                    return self.mark_all_dirty();
                }
                match self.listeners.owner(listener) {
                    Some(ListenerOwner::Formula(id)) => {
                        if self.mark_formula_dirty(id) {
                            dirtied.push(id);
                            if let Some(cell) = self.cell_of(id) {
                                pending.push_back((SheetRange::cell(cell), ChangeKind::Dirtied));
                            }
                        }
                    }
                    Some(ListenerOwner::Observer(id)) => {
                        self.invoke_observer(id, ChangeEvent { range: changed, kind });
                    }
                    None => {}
                }
            }
        }
        dirtied
    }

    /// Deliver an event to observers only; formula listeners are not touched.
    pub(crate) fn notify_observers(&mut self, range: SheetRange, kind: ChangeKind) {
        if self.observers.is_empty() {
            return;
        }
        for listener in self.areas.notify(&range) {
            if let Some(ListenerOwner::Observer(id)) = self.listeners.owner(listener) {
                self.invoke_observer(id, ChangeEvent { range, kind });
            }
        }
    }

    fn invoke_observer(&mut self, id: ObserverId, event: ChangeEvent) {
        if let Some(observer) = self.observers.get_mut(&id) {
            (observer.callback)(&event);
        }
    }
}
