use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use formula_model::{CellId, CellRef, SheetId, SheetLimits, SheetRange};

use crate::formula::{AxisEdit, Expr};
use crate::group::GroupId;
use crate::listener::ListenerId;
use crate::value::Value;

/// Stable index of a formula cell in the store's arena.
///
/// Dependencies between formulas are kept as ids in the range index, never as references, so
/// circular references are plain data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormulaId(u32);

impl FormulaId {
    pub(crate) const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub(crate) const fn raw(self) -> u32 {
        self.0
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FormulaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// What a populated cell holds. Empty cells are simply absent.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CellContent {
    Value(Value),
    Formula(FormulaId),
}

#[derive(Debug, Clone)]
pub(crate) struct FormulaCell {
    pub(crate) cell: CellId,
    pub(crate) expr: Arc<Expr>,
    /// Last computed value; stale while `dirty`.
    pub(crate) value: Value,
    pub(crate) dirty: bool,
    pub(crate) volatile: bool,
    pub(crate) external: bool,
    pub(crate) listener: Option<ListenerId>,
    pub(crate) group: Option<GroupId>,
}

/// A cell's content detached from the store, used by paste.
#[derive(Debug, Clone)]
pub(crate) enum CellSnapshot {
    Value(Value),
    Formula(Arc<Expr>),
}

/// Cell contents per sheet, keyed column-major so a column's cells are contiguous.
#[derive(Debug, Default)]
pub(crate) struct CellStore {
    sheets: BTreeMap<SheetId, BTreeMap<(u32, u32), CellContent>>,
    formulas: Vec<Option<FormulaCell>>,
    free: Vec<u32>,
    formula_count: usize,
}

#[inline]
fn key(cell: CellRef) -> (u32, u32) {
    (cell.col, cell.row)
}

impl CellStore {
    pub(crate) fn content(&self, cell: CellId) -> Option<&CellContent> {
        self.sheets.get(&cell.sheet_id)?.get(&key(cell.cell))
    }

    pub(crate) fn formula_at(&self, cell: CellId) -> Option<FormulaId> {
        match self.content(cell)? {
            CellContent::Formula(id) => Some(*id),
            CellContent::Value(_) => None,
        }
    }

    pub(crate) fn formula(&self, id: FormulaId) -> Option<&FormulaCell> {
        self.formulas.get(id.index())?.as_ref()
    }

    pub(crate) fn formula_mut(&mut self, id: FormulaId) -> Option<&mut FormulaCell> {
        self.formulas.get_mut(id.index())?.as_mut()
    }

    pub(crate) fn formula_count(&self) -> usize {
        self.formula_count
    }

    /// The value a reader sees: a constant, a formula's cached result, or blank.
    pub(crate) fn value_of(&self, cell: CellId) -> Value {
        match self.content(cell) {
            Some(CellContent::Value(v)) => v.clone(),
            Some(CellContent::Formula(id)) => self
                .formula(*id)
                .map(|f| f.value.clone())
                .unwrap_or_default(),
            None => Value::Blank,
        }
    }

    /// Store a constant. The caller has already removed any formula at `cell`.
    pub(crate) fn set_value(&mut self, cell: CellId, value: Value) {
        self.sheets
            .entry(cell.sheet_id)
            .or_default()
            .insert(key(cell.cell), CellContent::Value(value));
    }

    pub(crate) fn insert_formula(&mut self, cell: CellId, expr: Arc<Expr>) -> FormulaId {
        let formula = FormulaCell {
            cell,
            volatile: expr.is_volatile(),
            external: !expr.external_links().is_empty(),
            expr,
            value: Value::Blank,
            dirty: false,
            listener: None,
            group: None,
        };
        let id = match self.free.pop() {
            Some(raw) => {
                self.formulas[raw as usize] = Some(formula);
                FormulaId::new(raw)
            }
            None => {
                self.formulas.push(Some(formula));
                FormulaId::new((self.formulas.len() - 1) as u32)
            }
        };
        self.formula_count += 1;
        self.sheets
            .entry(cell.sheet_id)
            .or_default()
            .insert(key(cell.cell), CellContent::Formula(id));
        id
    }

    /// Remove whatever `cell` holds. A formula's arena slot stays alive until
    /// [`CellStore::free_formula`].
    pub(crate) fn remove(&mut self, cell: CellId) -> Option<CellContent> {
        let cells = self.sheets.get_mut(&cell.sheet_id)?;
        let removed = cells.remove(&key(cell.cell));
        if cells.is_empty() {
            self.sheets.remove(&cell.sheet_id);
        }
        removed
    }

    pub(crate) fn free_formula(&mut self, id: FormulaId) -> Option<FormulaCell> {
        let formula = self.formulas.get_mut(id.index())?.take()?;
        self.free.push(id.raw());
        self.formula_count -= 1;
        Some(formula)
    }

    pub(crate) fn formula_ids(&self) -> impl Iterator<Item = FormulaId> + '_ {
        self.formulas
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_some())
            .map(|(i, _)| FormulaId::new(i as u32))
    }

    /// Visit populated cells of `range`, sheet by sheet, column by column, top to bottom.
    pub(crate) fn for_each_in(&self, range: &SheetRange, mut f: impl FnMut(CellId, &CellContent)) {
        let (start, end) = (range.range.start, range.range.end);
        for (&sheet_id, cells) in self.sheets.range(range.first_sheet..=range.last_sheet) {
            if cells.is_empty() {
                continue;
            }
            for col in start.col..=end.col {
                for (&(_, row), content) in cells.range((col, start.row)..=(col, end.row)) {
                    f(CellId::new(sheet_id, row, col), content);
                }
            }
        }
    }

    pub(crate) fn formulas_in(&self, range: &SheetRange) -> Vec<FormulaId> {
        let mut out = Vec::new();
        self.for_each_in(range, |_, content| {
            if let CellContent::Formula(id) = content {
                out.push(*id);
            }
        });
        out
    }

    pub(crate) fn cells_in(&self, range: &SheetRange) -> Vec<CellId> {
        let mut out = Vec::new();
        self.for_each_in(range, |cell, _| out.push(cell));
        out
    }

    pub(crate) fn snapshot_in(&self, range: &SheetRange) -> Vec<(CellId, CellSnapshot)> {
        let mut out = Vec::new();
        self.for_each_in(range, |cell, content| {
            let snapshot = match content {
                CellContent::Value(v) => CellSnapshot::Value(v.clone()),
                CellContent::Formula(id) => match self.formula(*id) {
                    Some(f) => CellSnapshot::Formula(f.expr.clone()),
                    None => return,
                },
            };
            out.push((cell, snapshot));
        });
        out
    }

    /// Formulas of one column as `(row, id)`, top to bottom.
    pub(crate) fn column_formulas(&self, sheet: SheetId, col: u32) -> Vec<(u32, FormulaId)> {
        let Some(cells) = self.sheets.get(&sheet) else {
            return Vec::new();
        };
        cells
            .range((col, 0)..=(col, u32::MAX))
            .filter_map(|(&(_, row), content)| match content {
                CellContent::Formula(id) => Some((row, *id)),
                CellContent::Value(_) => None,
            })
            .collect()
    }

    /// Columns of `sheet` holding at least one formula.
    pub(crate) fn formula_columns(&self, sheet: SheetId) -> BTreeSet<u32> {
        self.sheets
            .get(&sheet)
            .map(|cells| {
                cells
                    .iter()
                    .filter(|(_, content)| matches!(content, CellContent::Formula(_)))
                    .map(|(&(col, _), _)| col)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Move the cells of the edited sheet. Returns the formulas that were deleted (or pushed off
    /// the sheet); their arena slots are still alive for the caller to tear down.
    pub(crate) fn shift_axis(&mut self, edit: &AxisEdit, limits: &SheetLimits) -> Vec<FormulaId> {
        let Some(cells) = self.sheets.get_mut(&edit.sheet) else {
            return Vec::new();
        };
        let old = std::mem::take(cells);
        let mut removed = Vec::new();
        for ((col, row), content) in old {
            let target = edit
                .map_cell(CellRef::new(row, col))
                .filter(|c| c.row < limits.max_rows && c.col < limits.max_cols);
            match (target, content) {
                (Some(target), content) => {
                    if let CellContent::Formula(id) = &content {
                        if let Some(Some(f)) = self.formulas.get_mut(id.index()) {
                            f.cell = CellId {
                                sheet_id: edit.sheet,
                                cell: target,
                            };
                        }
                    }
                    cells.insert(key(target), content);
                }
                (None, CellContent::Formula(id)) => removed.push(id),
                (None, CellContent::Value(_)) => {}
            }
        }
        if cells.is_empty() {
            self.sheets.remove(&edit.sheet);
        }
        removed
    }

    /// Drop every cell of `sheet`, returning its formulas (still allocated).
    pub(crate) fn drop_sheet(&mut self, sheet: SheetId) -> Vec<FormulaId> {
        let Some(cells) = self.sheets.remove(&sheet) else {
            return Vec::new();
        };
        cells
            .into_values()
            .filter_map(|content| match content {
                CellContent::Formula(id) => Some(id),
                CellContent::Value(_) => None,
            })
            .collect()
    }
}
