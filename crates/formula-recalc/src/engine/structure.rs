use std::sync::Arc;

use ahash::AHashSet;
use formula_model::{CellId, CellRef, Range, SheetId, SheetRange};

use super::Engine;
use crate::error::RecalcError;
use crate::formula::{Axis, AxisEdit};
use crate::group::GroupId;
use crate::listener::ChangeKind;
use crate::store::{CellSnapshot, FormulaId};

impl Engine {
    pub fn insert_rows(&mut self, sheet: SheetId, at: u32, count: u32) -> Result<(), RecalcError> {
        self.apply_axis_edit(AxisEdit::insert(sheet, Axis::Rows, at, count))
    }

    pub fn delete_rows(&mut self, sheet: SheetId, at: u32, count: u32) -> Result<(), RecalcError> {
        self.apply_axis_edit(AxisEdit::delete(sheet, Axis::Rows, at, count))
    }

    pub fn insert_cols(&mut self, sheet: SheetId, at: u32, count: u32) -> Result<(), RecalcError> {
        self.apply_axis_edit(AxisEdit::insert(sheet, Axis::Cols, at, count))
    }

    pub fn delete_cols(&mut self, sheet: SheetId, at: u32, count: u32) -> Result<(), RecalcError> {
        self.apply_axis_edit(AxisEdit::delete(sheet, Axis::Cols, at, count))
    }

    /// Move cells, rewrite every formula that points across the edit, and re-subscribe them.
    ///
    /// Listening is torn down for the affected formulas before any cell moves and rebuilt from
    /// the rewritten references afterwards, so no subscription ever names a stale range.
    pub(crate) fn apply_axis_edit(&mut self, edit: AxisEdit) -> Result<(), RecalcError> {
        self.check_range(&edit.band())?;
        if edit.count == 0 {
            return Ok(());
        }
        log::debug!(
            "{:?} {} {:?} at {} on sheet {}",
            edit.kind,
            edit.count,
            edit.axis,
            edit.at,
            edit.sheet
        );

        let affected: Vec<(FormulaId, CellId)> = self
            .store
            .formula_ids()
            .filter_map(|id| {
                let f = self.store.formula(id)?;
                let hit = f.cell.sheet_id == edit.sheet
                    || f.expr.references_sheet(f.cell.sheet_id, edit.sheet);
                hit.then_some((id, f.cell))
            })
            .collect();

        self.groups.dissolve_sheet(&mut self.store, edit.sheet);
        let stray: AHashSet<GroupId> = affected
            .iter()
            .filter_map(|(id, _)| self.store.formula(*id)?.group)
            .collect();
        for gid in stray {
            if let Some(group) = self.groups.dissolve(&mut self.store, gid) {
                self.groups.mark_pending(group.sheet, group.col);
            }
        }
        for &(id, _) in &affected {
            self.end_listening(id);
        }

        let removed: AHashSet<FormulaId> = self
            .store
            .shift_axis(&edit, &self.config.limits)
            .into_iter()
            .collect();
        for &id in &removed {
            self.discard_formula(id);
        }

        for (id, old_host) in affected {
            if removed.contains(&id) {
                continue;
            }
            let Some(f) = self.store.formula_mut(id) else {
                continue;
            };
            let new_host = f.cell;
            f.expr = Arc::new(f.expr.shifted(&edit, old_host, new_host, &self.config.limits));
            self.attach(id);
            // Readers on other sheets sit outside the edited region.
            self.dirty_and_broadcast(id);
        }

        self.cache.invalidate_sheet(edit.sheet);
        self.groups.mark_sheet_pending(&self.store, edit.sheet);
        self.broadcast_change(edit.affected_region(&self.config.limits), ChangeKind::Structural);
        self.recalc_if_automatic()
    }

    /// Paste `source` on `sheet` so that its top-left cell lands on `dest`.
    ///
    /// Formulas keep their relative references, so a pasted `=A1+1` one row down reads `A2`.
    /// Source contents are captured before anything is written, so overlapping ranges work.
    pub fn copy_range(&mut self, sheet: SheetId, source: Range, dest: CellId) -> Result<(), RecalcError> {
        let source = SheetRange::new(sheet, source);
        self.check_range(&source)?;
        let start = source.start();
        let bottom_right = CellRef::new(
            dest.row().saturating_add(source.range.height() - 1),
            dest.col().saturating_add(source.range.width() - 1),
        );
        let target = SheetRange::new(dest.sheet_id, Range::new(dest.cell, bottom_right));
        self.check_range(&target)?;

        let snapshot = self.store.snapshot_in(&source);
        for cell in self.store.cells_in(&target) {
            self.remove_content(cell);
        }
        for (cell, content) in snapshot {
            let to = CellId::new(
                dest.sheet_id,
                dest.row() + (cell.row() - start.row),
                dest.col() + (cell.col() - start.col),
            );
            match content {
                CellSnapshot::Value(value) => self.write_value(to, value),
                CellSnapshot::Formula(expr) => {
                    self.write_formula(to, expr);
                }
            }
        }

        self.cache.invalidate(&target);
        self.broadcast_change(target, ChangeKind::ValueChanged);
        self.recalc_if_automatic()
    }

    /// Remove every cell of `sheet`. Formulas elsewhere that read it now see blanks.
    pub fn clear_sheet(&mut self, sheet: SheetId) -> Result<(), RecalcError> {
        self.config
            .limits
            .check_sheet(sheet)
            .map_err(|source| RecalcError::invalid_range(self.whole_sheet(sheet), source))?;

        self.groups.dissolve_sheet(&mut self.store, sheet);
        for id in self.store.drop_sheet(sheet) {
            self.discard_formula(id);
        }
        self.cache.invalidate_sheet(sheet);
        self.broadcast_change(self.whole_sheet(sheet), ChangeKind::Structural);
        self.recalc_if_automatic()
    }

    fn whole_sheet(&self, sheet: SheetId) -> SheetRange {
        let limits = &self.config.limits;
        SheetRange::new(
            sheet,
            Range::new(CellRef::new(0, 0), CellRef::new(limits.last_row(), limits.last_col())),
        )
    }
}
