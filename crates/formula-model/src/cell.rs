use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{A1ParseError, CellRef};

/// Excel-compatible maximum rows per worksheet (1,048,576).
pub const EXCEL_MAX_ROWS: u32 = 1_048_576;

/// Excel-compatible maximum columns per worksheet (16,384).
pub const EXCEL_MAX_COLS: u32 = 16_384;

/// Worksheet identifier (the sheet's tab index).
pub type SheetId = u32;

/// Address of a cell within a workbook.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellId {
    /// Worksheet identifier.
    pub sheet_id: SheetId,
    /// Cell coordinates within the worksheet.
    pub cell: CellRef,
}

impl CellId {
    pub const fn new(sheet_id: SheetId, row: u32, col: u32) -> Self {
        Self {
            sheet_id,
            cell: CellRef::new(row, col),
        }
    }

    /// Parse an A1 reference on `sheet_id`.
    pub fn from_a1(sheet_id: SheetId, a1: &str) -> Result<Self, A1ParseError> {
        Ok(Self {
            sheet_id,
            cell: CellRef::from_a1(a1)?,
        })
    }

    #[inline]
    pub const fn row(self) -> u32 {
        self.cell.row
    }

    #[inline]
    pub const fn col(self) -> u32 {
        self.cell.col
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}!{}", self.sheet_id, self.cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_id_display_and_parse() {
        let id = CellId::from_a1(2, "C7").unwrap();
        assert_eq!(id, CellId::new(2, 6, 2));
        assert_eq!(id.to_string(), "S2!C7");
    }

    #[test]
    fn cell_id_serializes_camel_case() {
        let json = serde_json::to_string(&CellId::new(1, 0, 3)).unwrap();
        assert_eq!(json, r#"{"sheetId":1,"cell":{"row":0,"col":3}}"#);
    }
}
