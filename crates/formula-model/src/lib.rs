//! `formula-model` defines the coordinate types shared by the recalculation engine and its hosts.
//!
//! The crate is intentionally small and dependency-light so it can be reused by:
//! - the recalculation engine (range index, dependency listeners, lookup caches)
//! - import/export layers that bulk-load cells
//! - IPC boundaries via `serde` (JSON-safe schema)

mod address;
pub mod calc_settings;
mod cell;
mod limits;
mod sheet_range;

pub use address::{A1ParseError, CellRef, Range, RangeParseError};
pub use calc_settings::{CalcSettings, CalculationMode, IterativeCalculationSettings};
pub use cell::{CellId, SheetId, EXCEL_MAX_COLS, EXCEL_MAX_ROWS};
pub use limits::{BoundsError, SheetLimits, DEFAULT_SHEET_COUNT};
pub use sheet_range::SheetRange;
