use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CellId, SheetId, SheetRange, EXCEL_MAX_COLS, EXCEL_MAX_ROWS};

/// Default number of sheets a document may address.
pub const DEFAULT_SHEET_COUNT: u32 = 256;

/// Document-wide coordinate bounds.
///
/// Every coordinate handed to the engine (cells, subscribed ranges, dirty ranges) must satisfy
/// `row < max_rows`, `col < max_cols` and `sheet < sheet_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SheetLimits {
    pub max_rows: u32,
    pub max_cols: u32,
    pub sheet_count: u32,
}

impl Default for SheetLimits {
    fn default() -> Self {
        Self {
            max_rows: EXCEL_MAX_ROWS,
            max_cols: EXCEL_MAX_COLS,
            sheet_count: DEFAULT_SHEET_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BoundsError {
    #[error("sheet {sheet} is outside the document ({sheet_count} sheets)")]
    Sheet { sheet: SheetId, sheet_count: u32 },
    #[error("row {row} is outside the sheet ({max_rows} rows)")]
    Row { row: u32, max_rows: u32 },
    #[error("column {col} is outside the sheet ({max_cols} columns)")]
    Col { col: u32, max_cols: u32 },
}

impl SheetLimits {
    #[must_use]
    pub const fn new(max_rows: u32, max_cols: u32, sheet_count: u32) -> Self {
        Self {
            max_rows,
            max_cols,
            sheet_count,
        }
    }

    pub fn check_sheet(&self, sheet: SheetId) -> Result<(), BoundsError> {
        if sheet < self.sheet_count {
            Ok(())
        } else {
            Err(BoundsError::Sheet {
                sheet,
                sheet_count: self.sheet_count,
            })
        }
    }

    pub fn check_cell(&self, cell: CellId) -> Result<(), BoundsError> {
        self.check_sheet(cell.sheet_id)?;
        if cell.cell.row >= self.max_rows {
            return Err(BoundsError::Row {
                row: cell.cell.row,
                max_rows: self.max_rows,
            });
        }
        if cell.cell.col >= self.max_cols {
            return Err(BoundsError::Col {
                col: cell.cell.col,
                max_cols: self.max_cols,
            });
        }
        Ok(())
    }

    /// Validate both corners and the sheet span of `range`.
    pub fn check_range(&self, range: &SheetRange) -> Result<(), BoundsError> {
        self.check_cell(CellId {
            sheet_id: range.first_sheet,
            cell: range.range.start,
        })?;
        self.check_cell(CellId {
            sheet_id: range.last_sheet,
            cell: range.range.end,
        })
    }

    #[must_use]
    pub fn contains(&self, cell: CellId) -> bool {
        self.check_cell(cell).is_ok()
    }

    /// Last valid row index.
    #[must_use]
    pub const fn last_row(&self) -> u32 {
        self.max_rows.saturating_sub(1)
    }

    /// Last valid column index.
    #[must_use]
    pub const fn last_col(&self) -> u32 {
        self.max_cols.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Range;

    #[test]
    fn rejects_out_of_bounds_coordinates() {
        let limits = SheetLimits::new(100, 10, 2);
        assert!(limits.contains(CellId::new(1, 99, 9)));
        assert_eq!(
            limits.check_cell(CellId::new(2, 0, 0)),
            Err(BoundsError::Sheet {
                sheet: 2,
                sheet_count: 2
            })
        );
        assert_eq!(
            limits.check_cell(CellId::new(0, 100, 0)),
            Err(BoundsError::Row {
                row: 100,
                max_rows: 100
            })
        );

        let wide = SheetRange::new(0, Range::from_a1("A1:K1").unwrap());
        assert_eq!(
            limits.check_range(&wide),
            Err(BoundsError::Col {
                col: 10,
                max_cols: 10
            })
        );
    }

    #[test]
    fn partial_json_uses_defaults() {
        let limits: SheetLimits = serde_json::from_str(r#"{"maxRows": 500}"#).unwrap();
        assert_eq!(limits.max_rows, 500);
        assert_eq!(limits.max_cols, EXCEL_MAX_COLS);
        assert_eq!(limits.sheet_count, DEFAULT_SHEET_COUNT);
    }
}
