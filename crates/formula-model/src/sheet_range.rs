use core::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::{CellId, CellRef, Range, SheetId};

/// A rectangular range pinned to an inclusive run of worksheets.
///
/// Most ranges live on a single sheet (`first_sheet == last_sheet`); 3D references such as
/// `Sheet1:Sheet3!A1:B2` span several. The sheet span is always normalized so that
/// `first_sheet <= last_sheet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetRange {
    pub first_sheet: SheetId,
    pub last_sheet: SheetId,
    pub range: Range,
}

impl SheetRange {
    #[must_use]
    pub const fn new(sheet: SheetId, range: Range) -> Self {
        Self {
            first_sheet: sheet,
            last_sheet: sheet,
            range,
        }
    }

    #[must_use]
    pub const fn spanning(first: SheetId, last: SheetId, range: Range) -> Self {
        let (first_sheet, last_sheet) = if first <= last { (first, last) } else { (last, first) };
        Self {
            first_sheet,
            last_sheet,
            range,
        }
    }

    /// A single-cell range.
    #[must_use]
    pub const fn cell(cell: CellId) -> Self {
        Self::new(cell.sheet_id, Range::cell(cell.cell))
    }

    #[must_use]
    pub const fn is_single_sheet(&self) -> bool {
        self.first_sheet == self.last_sheet
    }

    #[must_use]
    pub const fn is_single_cell(&self) -> bool {
        self.is_single_sheet() && self.range.is_single_cell()
    }

    #[must_use]
    pub fn sheets(&self) -> RangeInclusive<SheetId> {
        self.first_sheet..=self.last_sheet
    }

    #[must_use]
    pub const fn contains_sheet(&self, sheet: SheetId) -> bool {
        sheet >= self.first_sheet && sheet <= self.last_sheet
    }

    #[must_use]
    pub const fn contains(&self, cell: CellId) -> bool {
        self.contains_sheet(cell.sheet_id) && self.range.contains(cell.cell)
    }

    #[must_use]
    pub const fn intersects(&self, other: &SheetRange) -> bool {
        self.first_sheet <= other.last_sheet
            && other.first_sheet <= self.last_sheet
            && self.range.intersects(&other.range)
    }

    #[must_use]
    pub const fn start(&self) -> CellRef {
        self.range.start
    }

    /// The `[row, col]` corners used as an R-tree envelope.
    #[must_use]
    pub fn envelope_i64(&self) -> ([i64; 2], [i64; 2]) {
        let min = [self.range.start.row.into(), self.range.start.col.into()];
        let max = [self.range.end.row.into(), self.range.end.col.into()];
        (min, max)
    }
}

impl fmt::Display for SheetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_sheet() {
            write!(f, "S{}!{}", self.first_sheet, self.range)
        } else {
            write!(f, "S{}:S{}!{}", self.first_sheet, self.last_sheet, self.range)
        }
    }
}
