use ahash::AHashSet;

use crate::store::FormulaId;

/// Tracks the chain of formulas currently being evaluated.
///
/// A formula is never entered twice: reading an entered formula is a circular reference. When
/// iterative calculation is on, the formulas of a detected cycle are moved to the iterating set,
/// whose members then read as their last value until the coordinator's fixed-point loop is done.
#[derive(Debug, Default)]
pub(crate) struct RecursionGuard {
    frames: Vec<FormulaId>,
    entered: AHashSet<FormulaId>,
    iterating: Vec<FormulaId>,
    iterating_set: AHashSet<FormulaId>,
}

impl RecursionGuard {
    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Push `id`; returns false if it is already on the stack.
    pub(crate) fn enter(&mut self, id: FormulaId) -> bool {
        if !self.entered.insert(id) {
            return false;
        }
        self.frames.push(id);
        true
    }

    pub(crate) fn leave(&mut self) -> Option<FormulaId> {
        let id = self.frames.pop()?;
        self.entered.remove(&id);
        Some(id)
    }

    pub(crate) fn is_entered(&self, id: FormulaId) -> bool {
        self.entered.contains(&id)
    }

    /// The frames from `id` up to the top of the stack: the members of the cycle closed by
    /// reading `id` from the top frame.
    pub(crate) fn cycle_from(&self, id: FormulaId) -> &[FormulaId] {
        match self.frames.iter().rposition(|f| *f == id) {
            Some(pos) => &self.frames[pos..],
            None => &[],
        }
    }

    pub(crate) fn unwind_to(&mut self, depth: usize) {
        while self.frames.len() > depth {
            self.leave();
        }
    }

    pub(crate) fn mark_iterating(&mut self, ids: &[FormulaId]) -> usize {
        let mut added = 0;
        for &id in ids {
            if self.iterating_set.insert(id) {
                self.iterating.push(id);
                added += 1;
            }
        }
        added
    }

    pub(crate) fn is_iterating(&self, id: FormulaId) -> bool {
        self.iterating_set.contains(&id)
    }

    pub(crate) fn has_iterating(&self) -> bool {
        !self.iterating.is_empty()
    }

    /// Cycle members in discovery order.
    pub(crate) fn iterating(&self) -> &[FormulaId] {
        &self.iterating
    }

    pub(crate) fn clear_iterating(&mut self) {
        self.iterating.clear();
        self.iterating_set.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.unwind_to(0);
        self.clear_iterating();
    }
}
