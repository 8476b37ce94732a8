use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use formula_model::{CellId, CellRef, Range, SheetId, SheetRange};

use crate::error::GroupViolation;
use crate::formula::Expr;
use crate::store::{CellStore, FormulaId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

/// A run of formulas filled down one column, sharing a single operation tree.
#[derive(Debug, Clone)]
pub(crate) struct FormulaGroup {
    pub(crate) sheet: SheetId,
    pub(crate) col: u32,
    pub(crate) top_row: u32,
    pub(crate) expr: Arc<Expr>,
    /// Ordered top to bottom; member `i` sits at `top_row + i`.
    pub(crate) members: Vec<FormulaId>,
}

impl FormulaGroup {
    pub(crate) fn span(&self) -> SheetRange {
        let bottom = self.top_row + self.members.len().saturating_sub(1) as u32;
        SheetRange::new(
            self.sheet,
            Range::new(
                CellRef::new(self.top_row, self.col),
                CellRef::new(bottom, self.col),
            ),
        )
    }

    pub(crate) fn top(&self) -> CellId {
        CellId::new(self.sheet, self.top_row, self.col)
    }
}

/// Public summary of a group, for auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: GroupId,
    pub top: CellId,
    pub len: usize,
}

fn same_tree(a: &Arc<Expr>, b: &Arc<Expr>) -> bool {
    Arc::ptr_eq(a, b) || **a == **b
}

/// All formula groups of the workbook.
///
/// Edits only split groups and mark their column; runs are rebuilt lazily by
/// [`GroupTable::regroup_pending`] at the start of the next recalculation, unless grouping is
/// delayed.
#[derive(Debug, Default)]
pub(crate) struct GroupTable {
    groups: AHashMap<GroupId, FormulaGroup>,
    next_id: u32,
    pending: BTreeSet<(SheetId, u32)>,
    delayed: bool,
}

impl GroupTable {
    pub(crate) fn get(&self, id: GroupId) -> Option<&FormulaGroup> {
        self.groups.get(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.groups.len()
    }

    pub(crate) fn is_delayed(&self) -> bool {
        self.delayed
    }

    pub(crate) fn set_delayed(&mut self, delayed: bool) {
        self.delayed = delayed;
    }

    pub(crate) fn mark_pending(&mut self, sheet: SheetId, col: u32) {
        self.pending.insert((sheet, col));
    }

    pub(crate) fn mark_sheet_pending(&mut self, store: &CellStore, sheet: SheetId) {
        for col in store.formula_columns(sheet) {
            self.pending.insert((sheet, col));
        }
    }

    fn create(&mut self, store: &mut CellStore, mut group: FormulaGroup) -> GroupId {
        let id = GroupId(self.next_id);
        self.next_id += 1;
        for &member in &group.members {
            if let Some(f) = store.formula_mut(member) {
                f.group = Some(id);
                f.expr = group.expr.clone();
            }
        }
        group.members.shrink_to_fit();
        self.groups.insert(id, group);
        id
    }

    pub(crate) fn dissolve(&mut self, store: &mut CellStore, id: GroupId) -> Option<FormulaGroup> {
        let group = self.groups.remove(&id)?;
        for &member in &group.members {
            if let Some(f) = store.formula_mut(member) {
                if f.group == Some(id) {
                    f.group = None;
                }
            }
        }
        Some(group)
    }

    /// Rebuild every column marked since the last pass. Returns the number of groups formed.
    pub(crate) fn regroup_pending(&mut self, store: &mut CellStore) -> usize {
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .map(|(sheet, col)| self.regroup_column(store, sheet, col))
            .sum()
    }

    pub(crate) fn regroup_column(&mut self, store: &mut CellStore, sheet: SheetId, col: u32) -> usize {
        let formulas = store.column_formulas(sheet, col);

        let stale: BTreeSet<GroupId> = formulas
            .iter()
            .filter_map(|(_, id)| store.formula(*id)?.group)
            .collect();
        for id in stale {
            self.dissolve(store, id);
        }

        let mut formed = 0;
        let mut run: Vec<FormulaId> = Vec::new();
        let mut run_top = 0;
        let mut run_expr: Option<Arc<Expr>> = None;
        let mut prev_row: Option<u32> = None;

        for (row, id) in formulas {
            let Some(expr) = store.formula(id).map(|f| f.expr.clone()) else {
                continue;
            };
            let extends = prev_row.is_some_and(|p| p + 1 == row)
                && run_expr.as_ref().is_some_and(|e| same_tree(e, &expr));
            if !extends {
                formed += self.close_run(store, sheet, col, run_top, &mut run, run_expr.take());
                run_top = row;
                run_expr = Some(expr);
            }
            run.push(id);
            prev_row = Some(row);
        }
        formed + self.close_run(store, sheet, col, run_top, &mut run, run_expr)
    }

    fn close_run(
        &mut self,
        store: &mut CellStore,
        sheet: SheetId,
        col: u32,
        top_row: u32,
        run: &mut Vec<FormulaId>,
        expr: Option<Arc<Expr>>,
    ) -> usize {
        let members = std::mem::take(run);
        match expr {
            Some(expr) if members.len() >= 2 => {
                self.create(
                    store,
                    FormulaGroup {
                        sheet,
                        col,
                        top_row,
                        expr,
                        members,
                    },
                );
                1
            }
            _ => 0,
        }
    }

    /// Split the group containing `id` around it. The pieces above and below stay grouped if
    /// they still have two or more members; the column is re-examined on the next pass.
    pub(crate) fn split_at(&mut self, store: &mut CellStore, id: FormulaId) {
        let Some(gid) = store.formula(id).and_then(|f| f.group) else {
            return;
        };
        let Some(group) = self.dissolve(store, gid) else {
            return;
        };
        self.mark_pending(group.sheet, group.col);
        let Some(pos) = group.members.iter().position(|m| *m == id) else {
            return;
        };

        let above = group.members[..pos].to_vec();
        let below = group.members[pos + 1..].to_vec();
        let below_top = group.top_row + pos as u32 + 1;
        for (top_row, members) in [(group.top_row, above), (below_top, below)] {
            if members.len() >= 2 {
                self.create(
                    store,
                    FormulaGroup {
                        sheet: group.sheet,
                        col: group.col,
                        top_row,
                        expr: group.expr.clone(),
                        members,
                    },
                );
            }
        }
    }

    pub(crate) fn dissolve_sheet(&mut self, store: &mut CellStore, sheet: SheetId) {
        let ids: Vec<GroupId> = self
            .groups
            .iter()
            .filter(|(_, g)| g.sheet == sheet)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.dissolve(store, id);
        }
        self.pending.retain(|(s, _)| *s != sheet);
    }

    /// Verify that the group still describes its cells: every member exists, points back at the
    /// group, sits at its row in the run, and carries the group's tree.
    pub(crate) fn check_consistency(
        &self,
        store: &CellStore,
        id: GroupId,
    ) -> Result<(), (CellId, GroupViolation)> {
        let Some(group) = self.groups.get(&id) else {
            return Ok(());
        };
        if group.members.is_empty() {
            return Err((group.top(), GroupViolation::Empty));
        }
        for (i, &member) in group.members.iter().enumerate() {
            let expected = CellId::new(group.sheet, group.top_row + i as u32, group.col);
            let Some(f) = store.formula(member) else {
                return Err((expected, GroupViolation::MissingMember));
            };
            if f.group != Some(id) {
                return Err((f.cell, GroupViolation::Detached));
            }
            if f.cell != expected {
                return Err((f.cell, GroupViolation::NotContiguous));
            }
            if !same_tree(&f.expr, &group.expr) {
                return Err((f.cell, GroupViolation::ExprMismatch));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn at(a1: &str) -> CellId {
        CellId::from_a1(0, a1).unwrap()
    }

    fn fill(store: &mut CellStore, cells: &[&str], expr: &Expr) -> Vec<FormulaId> {
        cells
            .iter()
            .map(|a1| store.insert_formula(at(a1), Arc::new(expr.clone())))
            .collect()
    }

    fn members(table: &GroupTable, store: &CellStore, id: FormulaId) -> Option<Vec<FormulaId>> {
        let gid = store.formula(id)?.group?;
        Some(table.get(gid)?.members.clone())
    }

    #[test]
    fn contiguous_identical_formulas_form_one_group() {
        let mut store = CellStore::default();
        let double = Expr::mul(Expr::rel(0, -1), Expr::number(2.0));
        let ids = fill(&mut store, &["B1", "B2", "B3"], &double);
        let lone = fill(&mut store, &["B5"], &double);
        let other = fill(&mut store, &["B6", "B7"], &Expr::rel(0, -1));

        let mut table = GroupTable::default();
        assert_eq!(table.regroup_column(&mut store, 0, 1), 2);
        assert_eq!(members(&table, &store, ids[1]), Some(ids.clone()));
        assert_eq!(members(&table, &store, lone[0]), None);
        assert_eq!(members(&table, &store, other[0]), Some(other.clone()));

        let gid = store.formula(ids[0]).and_then(|f| f.group).unwrap();
        assert_eq!(table.check_consistency(&store, gid), Ok(()));
        let shared = &table.get(gid).unwrap().expr;
        assert!(ids
            .iter()
            .all(|id| Arc::ptr_eq(&store.formula(*id).unwrap().expr, shared)));
    }

    #[test]
    fn splitting_keeps_runs_on_either_side() {
        let mut store = CellStore::default();
        let expr = Expr::rel(0, -1);
        let ids = fill(&mut store, &["C1", "C2", "C3", "C4", "C5", "C6"], &expr);
        let mut table = GroupTable::default();
        table.regroup_column(&mut store, 0, 2);

        table.split_at(&mut store, ids[2]);
        assert_eq!(members(&table, &store, ids[0]), Some(ids[..2].to_vec()));
        assert_eq!(members(&table, &store, ids[2]), None);
        assert_eq!(members(&table, &store, ids[4]), Some(ids[3..].to_vec()));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn diverging_member_is_reported() {
        let mut store = CellStore::default();
        let ids = fill(&mut store, &["A1", "A2", "A3"], &Expr::number(1.0));
        let mut table = GroupTable::default();
        table.regroup_column(&mut store, 0, 0);
        let gid = store.formula(ids[0]).and_then(|f| f.group).unwrap();

        store.formula_mut(ids[1]).unwrap().expr = Arc::new(Expr::number(2.0));
        assert_eq!(
            table.check_consistency(&store, gid),
            Err((at("A2"), GroupViolation::ExprMismatch))
        );
    }
}
