use std::time::Instant;

use formula_model::{CellId, SheetRange};

use super::view::SheetView;
use super::{Engine, HardRecalcState, RecalcReport};
use crate::error::RecalcError;
use crate::formula::{evaluate, Outcome};
use crate::listener::ChangeKind;
use crate::store::FormulaId;
use crate::value::{ErrorKind, Value};

impl Engine {
    /// Recalculate until no dirty formula is left (or the iteration cap of a circular reference
    /// is hit).
    ///
    /// With `only_forced`, only volatile formulas and what depends on them are recalculated;
    /// other dirty formulas stay queued. With `set_all_dirty`, every formula is recalculated.
    pub fn calc_all(
        &mut self,
        only_forced: bool,
        set_all_dirty: bool,
    ) -> Result<RecalcReport, RecalcError> {
        let started = Instant::now();
        self.report = RecalcReport::default();

        if !self.groups.is_delayed() {
            self.groups.regroup_pending(&mut self.store);
        }
        if set_all_dirty || self.hard_state == HardRecalcState::Eternal {
            self.mark_all_dirty();
        } else if self.hard_state == HardRecalcState::Temporary {
            let deferred: Vec<FormulaId> = self.not_listening.iter().copied().collect();
            for id in deferred {
                self.mark_formula_dirty(id);
            }
        }
        let forced = self.dirty_volatile();

        log::debug!(
            "recalc pass: {} dirty formulas queued (only_forced={only_forced})",
            self.queue.len()
        );
        let result = if only_forced {
            self.run_forced(forced);
            Ok(())
        } else {
            self.run_queue()
        };

        self.report.duration = started.elapsed();
        match result {
            Ok(()) => {
                log::debug!(
                    "recalc pass done: {} cells, {} groups ({} parallel) in {:?}",
                    self.report.cells_evaluated,
                    self.report.groups_evaluated,
                    self.report.groups_parallel,
                    self.report.duration
                );
                self.last_report = Some(self.report.clone());
                Ok(self.report.clone())
            }
            Err(err) => {
                self.guard.clear();
                Err(err)
            }
        }
    }

    /// Recalculate just enough for every formula in `range` to be current.
    pub fn ensure_results_for(&mut self, range: SheetRange) -> Result<(), RecalcError> {
        self.check_range(&range)?;
        loop {
            let dirty: Vec<FormulaId> = self
                .store
                .formulas_in(&range)
                .into_iter()
                .filter(|id| self.is_formula_dirty(*id))
                .collect();
            if dirty.is_empty() {
                return Ok(());
            }
            for id in dirty {
                self.drive(id);
            }
            if !self.guard.has_iterating() {
                return Ok(());
            }
            self.iterate_cycles();
        }
    }

    pub(crate) fn recalc_if_automatic(&mut self) -> Result<(), RecalcError> {
        if self.config.calc.is_automatic() && self.hard_state == HardRecalcState::Off {
            self.calc_all(false, false)?;
        }
        Ok(())
    }

    pub(crate) fn is_formula_dirty(&self, id: FormulaId) -> bool {
        self.store.formula(id).is_some_and(|f| f.dirty)
    }

    /// Dirty every volatile formula and its dependents; returns that set.
    fn dirty_volatile(&mut self) -> Vec<FormulaId> {
        let volatile: Vec<FormulaId> = self.volatile.iter().copied().collect();
        let mut forced = Vec::with_capacity(volatile.len());
        for id in volatile {
            self.mark_formula_dirty(id);
            forced.push(id);
            if let Some(cell) = self.cell_of(id) {
                forced.extend(self.broadcast_change(SheetRange::cell(cell), ChangeKind::Dirtied));
            }
        }
        forced
    }

    fn run_queue(&mut self) -> Result<(), RecalcError> {
        loop {
            while let Some(id) = self.queue.pop_front() {
                if !self.is_formula_dirty(id) {
                    continue;
                }
                match self.store.formula(id).and_then(|f| f.group) {
                    Some(group) => {
                        if let Err(err) = self.calc_group(group) {
                            self.queue.push_front(id);
                            return Err(err);
                        }
                    }
                    None => self.drive(id),
                }
            }
            if !self.guard.has_iterating() {
                return Ok(());
            }
            self.iterate_cycles();
        }
    }

    fn run_forced(&mut self, mut work: Vec<FormulaId>) {
        while !work.is_empty() {
            for id in work {
                self.drive(id);
            }
            work = if self.guard.has_iterating() {
                self.iterate_cycles()
            } else {
                Vec::new()
            };
        }
    }

    pub(crate) fn evaluate_formula(&mut self, id: FormulaId) -> Option<Outcome> {
        let f = self.store.formula(id)?;
        let (host, expr) = (f.cell, f.expr.clone());
        let view = SheetView {
            store: &self.store,
            guard: &self.guard,
            cache: &self.cache,
            limits: &self.config.limits,
            external: self.external_provider.as_deref(),
        };
        Some(evaluate(&view, &mut self.ctx, host, &expr))
    }

    /// Evaluate `root`, first evaluating whatever dirty precedents it reports.
    ///
    /// Uses an explicit stack mirrored by the recursion guard; a precedent that is already on
    /// the stack closes a circular reference.
    pub(crate) fn drive(&mut self, root: FormulaId) {
        if !self.is_formula_dirty(root) {
            return;
        }
        let base = self.guard.depth();
        let mut stack = vec![root];
        self.guard.enter(root);

        while let Some(&top) = stack.last() {
            match self.evaluate_formula(top) {
                None => {
                    stack.pop();
                    self.guard.leave();
                }
                Some(Outcome::Done(value)) => {
                    self.store_result(top, value);
                    stack.pop();
                    self.guard.leave();
                }
                Some(Outcome::Blocked(blocked)) => {
                    if let Some(closing) = blocked.cycle {
                        let mut members = self.guard.cycle_from(closing).to_vec();
                        if members.is_empty() {
                            members.push(top);
                        }
                        if self.config.calc.iterative.enabled && self.guard.mark_iterating(&members) > 0 {
                            // Re-evaluate `top`; the members now read as their cached values.
                            continue;
                        }
                        self.flag_circular(&members);
                        let keep = stack.len().saturating_sub(members.len());
                        stack.truncate(keep);
                        self.guard.unwind_to(base + keep);
                        continue;
                    }
                    for &id in blocked.pending.iter().rev() {
                        if self.guard.enter(id) {
                            stack.push(id);
                        }
                    }
                }
            }
        }
        self.guard.unwind_to(base);
    }

    fn flag_circular(&mut self, members: &[FormulaId]) {
        let cells: Vec<String> = members
            .iter()
            .filter_map(|id| self.cell_of(*id))
            .map(|cell| cell.to_string())
            .collect();
        log::warn!("circular reference: {}", cells.join(" -> "));
        let changed: Vec<CellId> = members
            .iter()
            .filter_map(|&id| self.store_value(id, Value::Error(ErrorKind::Circular)))
            .collect();
        // Members read each other, so they are cleaned again once dependents have been told.
        for cell in changed {
            self.broadcast_change(SheetRange::cell(cell), ChangeKind::ValueChanged);
        }
        for &id in members {
            self.clean(id);
        }
        self.report.circular_cells += members.len();
    }

    /// Fixed-point iteration over the cycles found in this pass.
    ///
    /// Members are re-evaluated in discovery order, each reading the others' latest values,
    /// until no member moves by more than `max_change` or `max_iterations` (which counts the
    /// discovering pass) is reached. Returns the dependents dirtied by the final values.
    pub(crate) fn iterate_cycles(&mut self) -> Vec<FormulaId> {
        let members = self.guard.iterating().to_vec();
        let settings = self.config.calc.iterative;
        let mut iterations = 1;
        let mut converged = false;

        while iterations < settings.iteration_cap() {
            iterations += 1;
            let mut max_delta = 0.0f64;
            for &id in &members {
                let Some(value) = self.iterate_member(id) else {
                    continue;
                };
                let previous = self.store.formula(id).map(|f| f.value.clone()).unwrap_or_default();
                max_delta = max_delta.max(previous.delta(&value));
                self.store_result(id, value);
            }
            if settings.has_converged(max_delta) {
                converged = true;
                break;
            }
        }

        self.report.circular_cells += members.len();
        self.report.cycles_iterated += 1;
        self.report.iterations = self.report.iterations.max(iterations);
        self.report.converged &= converged;
        if !converged {
            log::warn!(
                "circular reference over {} cells did not converge within {} iterations",
                members.len(),
                settings.iteration_cap()
            );
        }

        self.guard.clear_iterating();
        let mut dirtied = Vec::new();
        for &id in &members {
            if let Some(cell) = self.cell_of(id) {
                dirtied.extend(self.broadcast_change(SheetRange::cell(cell), ChangeKind::Dirtied));
            }
        }
        for &id in &members {
            self.clean(id);
        }
        dirtied.retain(|id| !members.contains(id));
        dirtied
    }

    fn iterate_member(&mut self, id: FormulaId) -> Option<Value> {
        for _ in 0..2 {
            match self.evaluate_formula(id)? {
                Outcome::Done(value) => return Some(value),
                Outcome::Blocked(blocked) => {
                    for pending in blocked.pending {
                        self.drive(pending);
                    }
                }
            }
        }
        None
    }

    fn clean(&mut self, id: FormulaId) {
        if let Some(f) = self.store.formula_mut(id) {
            f.dirty = false;
        }
        self.queue.remove(id);
    }

    /// Write a formula's new value and mark it clean. A changed value dirties the formulas that
    /// read it and reaches observers; members of a cycle under iteration only reach observers
    /// until the fixed-point loop settles.
    pub(crate) fn store_result(&mut self, id: FormulaId, value: Value) {
        let Some(cell) = self.store_value(id, value) else {
            return;
        };
        let range = SheetRange::cell(cell);
        if self.guard.is_iterating(id) {
            self.notify_observers(range, ChangeKind::ValueChanged);
        } else {
            self.broadcast_change(range, ChangeKind::ValueChanged);
        }
    }

    /// Returns the host cell if the value changed.
    fn store_value(&mut self, id: FormulaId, value: Value) -> Option<CellId> {
        let f = self.store.formula_mut(id)?;
        f.dirty = false;
        let cell = f.cell;
        let changed = f.value != value;
        if changed {
            f.value = value;
        }
        self.queue.remove(id);
        self.report.cells_evaluated += 1;

        if !changed {
            return None;
        }
        if !self.cache.is_empty() {
            self.cache.invalidate(&SheetRange::cell(cell));
        }
        Some(cell)
    }
}
