use std::sync::Arc;

use formula_model::{CellId, CellRef, Range, SheetId, SheetLimits, SheetRange};
use smallvec::SmallVec;

use crate::value::ErrorKind;

/// One coordinate of a reference: a fixed index or an offset from the formula's own cell.
///
/// Relative offsets are what make a filled-down column share one operation tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coord {
    Abs(u32),
    Rel(i32),
}

impl Coord {
    #[inline]
    pub fn resolve(self, origin: u32) -> Option<u32> {
        match self {
            Coord::Abs(index) => Some(index),
            Coord::Rel(offset) => origin.checked_add_signed(offset),
        }
    }

    /// Re-express `target` in the same style (absolute or relative) against a new origin.
    fn rebase(self, target: u32, origin: u32) -> Coord {
        match self {
            Coord::Abs(_) => Coord::Abs(target),
            Coord::Rel(_) => Coord::Rel((i64::from(target) - i64::from(origin)) as i32),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefAddr {
    pub row: Coord,
    pub col: Coord,
}

impl RefAddr {
    pub const fn absolute(cell: CellRef) -> Self {
        Self {
            row: Coord::Abs(cell.row),
            col: Coord::Abs(cell.col),
        }
    }

    pub const fn relative(rows: i32, cols: i32) -> Self {
        Self {
            row: Coord::Rel(rows),
            col: Coord::Rel(cols),
        }
    }

    pub fn resolve(self, host: CellRef) -> Option<CellRef> {
        Some(CellRef::new(
            self.row.resolve(host.row)?,
            self.col.resolve(host.col)?,
        ))
    }

    fn rebase(self, target: CellRef, host: CellRef) -> RefAddr {
        RefAddr {
            row: self.row.rebase(target.row, host.row),
            col: self.col.rebase(target.col, host.col),
        }
    }
}

/// A single-cell reference. `sheet: None` means the formula's own sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellReference {
    pub sheet: Option<SheetId>,
    pub addr: RefAddr,
}

impl CellReference {
    /// The referenced cell, or `None` when it falls outside the document (`#REF!`).
    pub fn resolve(&self, host: CellId, limits: &SheetLimits) -> Option<CellId> {
        let cell = CellId {
            sheet_id: self.sheet.unwrap_or(host.sheet_id),
            cell: self.addr.resolve(host.cell)?,
        };
        limits.contains(cell).then_some(cell)
    }
}

/// A rectangular reference, optionally spanning several sheets (`Sheet1:Sheet3!A1:B2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeReference {
    pub sheets: Option<(SheetId, SheetId)>,
    pub start: RefAddr,
    pub end: RefAddr,
}

impl RangeReference {
    pub fn resolve(&self, host: CellId, limits: &SheetLimits) -> Option<SheetRange> {
        let (first, last) = self.sheets.unwrap_or((host.sheet_id, host.sheet_id));
        let range = Range::new(self.start.resolve(host.cell)?, self.end.resolve(host.cell)?);
        let resolved = SheetRange::spanning(first, last, range);
        limits.check_range(&resolved).is_ok().then_some(resolved)
    }

    fn sheet_span(&self, host_sheet: SheetId) -> (SheetId, SheetId) {
        let (a, b) = self.sheets.unwrap_or((host_sheet, host_sheet));
        (a.min(b), a.max(b))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Sum,
    Average,
    Min,
    Max,
    Count,
    Abs,
    If,
    Match,
    Vlookup,
    Rand,
}

impl Function {
    pub fn name(self) -> &'static str {
        match self {
            Function::Sum => "SUM",
            Function::Average => "AVERAGE",
            Function::Min => "MIN",
            Function::Max => "MAX",
            Function::Count => "COUNT",
            Function::Abs => "ABS",
            Function::If => "IF",
            Function::Match => "MATCH",
            Function::Vlookup => "VLOOKUP",
            Function::Rand => "RAND",
        }
    }

    /// Volatile functions produce a new value on every recalculation.
    pub fn is_volatile(self) -> bool {
        matches!(self, Function::Rand)
    }
}

/// A compiled formula.
///
/// Trees are produced by the host's parser; the engine only walks and evaluates them.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(Arc<str>),
    Bool(bool),
    Error(ErrorKind),
    Cell(CellReference),
    Range(RangeReference),
    /// A value supplied by the host's [`crate::ExternalValueProvider`] under this link name.
    External(Arc<str>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    pub fn number(n: f64) -> Expr {
        Expr::Number(n)
    }

    pub fn text(s: &str) -> Expr {
        Expr::Text(Arc::from(s))
    }

    /// A relative reference `rows`/`cols` away from the formula's cell on the same sheet.
    pub fn rel(rows: i32, cols: i32) -> Expr {
        Expr::Cell(CellReference {
            sheet: None,
            addr: RefAddr::relative(rows, cols),
        })
    }

    /// An absolute reference on the formula's own sheet, e.g. `$A$1`.
    pub fn abs(cell: CellRef) -> Expr {
        Expr::Cell(CellReference {
            sheet: None,
            addr: RefAddr::absolute(cell),
        })
    }

    pub fn abs_on(sheet: SheetId, cell: CellRef) -> Expr {
        Expr::Cell(CellReference {
            sheet: Some(sheet),
            addr: RefAddr::absolute(cell),
        })
    }

    pub fn abs_range(range: Range) -> Expr {
        Expr::Range(RangeReference {
            sheets: None,
            start: RefAddr::absolute(range.start),
            end: RefAddr::absolute(range.end),
        })
    }

    pub fn abs_range_on(first: SheetId, last: SheetId, range: Range) -> Expr {
        Expr::Range(RangeReference {
            sheets: Some((first, last)),
            start: RefAddr::absolute(range.start),
            end: RefAddr::absolute(range.end),
        })
    }

    pub fn range(start: RefAddr, end: RefAddr) -> Expr {
        Expr::Range(RangeReference {
            sheets: None,
            start,
            end,
        })
    }

    pub fn external(link: &str) -> Expr {
        Expr::External(Arc::from(link))
    }

    pub fn neg(operand: Expr) -> Expr {
        Expr::Unary(UnaryOp::Neg, Box::new(operand))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn div(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Div, lhs, rhs)
    }

    pub fn call(function: Function, args: Vec<Expr>) -> Expr {
        Expr::Call(function, args)
    }

    /// Pre-order traversal.
    pub fn walk(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Unary(_, operand) => operand.walk(f),
            Expr::Binary(_, lhs, rhs) => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::Call(_, args) => args.iter().for_each(|arg| arg.walk(f)),
            _ => {}
        }
    }

    pub fn is_volatile(&self) -> bool {
        let mut volatile = false;
        self.walk(&mut |e| {
            if let Expr::Call(func, _) = e {
                volatile |= func.is_volatile();
            }
        });
        volatile
    }

    /// Ranges read by this formula when hosted at `host`. References that fall outside the
    /// document are skipped; they evaluate to `#REF!`.
    pub fn references(&self, host: CellId, limits: &SheetLimits) -> SmallVec<[SheetRange; 4]> {
        let mut out: SmallVec<[SheetRange; 4]> = SmallVec::new();
        self.walk(&mut |e| {
            let resolved = match e {
                Expr::Cell(r) => r.resolve(host, limits).map(SheetRange::cell),
                Expr::Range(r) => r.resolve(host, limits),
                _ => None,
            };
            if let Some(range) = resolved {
                if !out.contains(&range) {
                    out.push(range);
                }
            }
        });
        out
    }

    pub fn external_links(&self) -> Vec<Arc<str>> {
        let mut links: Vec<Arc<str>> = Vec::new();
        self.walk(&mut |e| {
            if let Expr::External(link) = e {
                if !links.contains(link) {
                    links.push(link.clone());
                }
            }
        });
        links
    }

    /// Whether any reference (resolved against a host on `host_sheet`) points into `sheet`.
    pub fn references_sheet(&self, host_sheet: SheetId, sheet: SheetId) -> bool {
        let mut found = false;
        self.walk(&mut |e| match e {
            Expr::Cell(r) => found |= r.sheet.unwrap_or(host_sheet) == sheet,
            Expr::Range(r) => {
                let (first, last) = r.sheet_span(host_sheet);
                found |= (first..=last).contains(&sheet);
            }
            _ => {}
        });
        found
    }

    /// Rewrite references after rows or columns were inserted or deleted.
    ///
    /// `old_host` and `new_host` are the formula's position before and after the edit. A
    /// reference into a deleted band becomes `#REF!`; a range partially covering the band
    /// shrinks, and a range straddling an insertion point grows.
    pub fn shifted(
        &self,
        edit: &AxisEdit,
        old_host: CellId,
        new_host: CellId,
        limits: &SheetLimits,
    ) -> Expr {
        match self {
            Expr::Cell(r) => {
                let Some(target) = r.addr.resolve(old_host.cell) else {
                    return self.clone();
                };
                let sheet = r.sheet.unwrap_or(old_host.sheet_id);
                let mapped = if sheet == edit.sheet {
                    match edit.map_cell(target) {
                        Some(cell) => cell,
                        None => return Expr::Error(ErrorKind::Ref),
                    }
                } else {
                    target
                };
                if mapped.row >= limits.max_rows || mapped.col >= limits.max_cols {
                    return Expr::Error(ErrorKind::Ref);
                }
                Expr::Cell(CellReference {
                    sheet: r.sheet,
                    addr: r.addr.rebase(mapped, new_host.cell),
                })
            }
            Expr::Range(r) => {
                let (Some(a), Some(b)) = (r.start.resolve(old_host.cell), r.end.resolve(old_host.cell))
                else {
                    return self.clone();
                };
                let range = Range::new(a, b);
                let mapped = if r.sheet_span(old_host.sheet_id) == (edit.sheet, edit.sheet) {
                    match edit.map_range(range, limits) {
                        Some(range) => range,
                        None => return Expr::Error(ErrorKind::Ref),
                    }
                } else {
                    range
                };
                Expr::Range(RangeReference {
                    sheets: r.sheets,
                    start: r.start.rebase(mapped.start, new_host.cell),
                    end: r.end.rebase(mapped.end, new_host.cell),
                })
            }
            Expr::Unary(op, operand) => {
                Expr::Unary(*op, Box::new(operand.shifted(edit, old_host, new_host, limits)))
            }
            Expr::Binary(op, lhs, rhs) => Expr::Binary(
                *op,
                Box::new(lhs.shifted(edit, old_host, new_host, limits)),
                Box::new(rhs.shifted(edit, old_host, new_host, limits)),
            ),
            Expr::Call(func, args) => Expr::Call(
                *func,
                args.iter()
                    .map(|arg| arg.shifted(edit, old_host, new_host, limits))
                    .collect(),
            ),
            _ => self.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Rows,
    Cols,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditKind {
    Insert,
    Delete,
}

/// Insertion or deletion of `count` whole rows/columns starting at index `at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AxisEdit {
    pub sheet: SheetId,
    pub axis: Axis,
    pub kind: EditKind,
    pub at: u32,
    pub count: u32,
}

impl AxisEdit {
    pub const fn insert(sheet: SheetId, axis: Axis, at: u32, count: u32) -> Self {
        Self {
            sheet,
            axis,
            kind: EditKind::Insert,
            at,
            count,
        }
    }

    pub const fn delete(sheet: SheetId, axis: Axis, at: u32, count: u32) -> Self {
        Self {
            sheet,
            axis,
            kind: EditKind::Delete,
            at,
            count,
        }
    }

    /// New position of index `idx` along the edited axis; `None` if it was deleted.
    pub fn map_index(&self, idx: u32) -> Option<u32> {
        match self.kind {
            EditKind::Insert if idx >= self.at => idx.checked_add(self.count),
            EditKind::Insert => Some(idx),
            EditKind::Delete if idx < self.at => Some(idx),
            EditKind::Delete if idx - self.at < self.count => None,
            EditKind::Delete => Some(idx - self.count),
        }
    }

    pub fn map_cell(&self, cell: CellRef) -> Option<CellRef> {
        match self.axis {
            Axis::Rows => Some(CellRef::new(self.map_index(cell.row)?, cell.col)),
            Axis::Cols => Some(CellRef::new(cell.row, self.map_index(cell.col)?)),
        }
    }

    fn map_span(&self, start: u32, end: u32, last: u32) -> Option<(u32, u32)> {
        match self.kind {
            EditKind::Insert => {
                let start = self.map_index(start)?;
                if start > last {
                    return None;
                }
                let end = self.map_index(end).map_or(last, |end| end.min(last));
                Some((start, end))
            }
            EditKind::Delete => {
                let band_end = self.at + self.count;
                if start >= self.at && end < band_end {
                    return None;
                }
                let start = if start < self.at {
                    start
                } else if start < band_end {
                    self.at
                } else {
                    start - self.count
                };
                let end = if end < self.at {
                    end
                } else if end < band_end {
                    self.at - 1
                } else {
                    end - self.count
                };
                Some((start, end))
            }
        }
    }

    pub fn map_range(&self, range: Range, limits: &SheetLimits) -> Option<Range> {
        match self.axis {
            Axis::Rows => {
                let (start, end) =
                    self.map_span(range.start.row, range.end.row, limits.last_row())?;
                Some(Range::new(
                    CellRef::new(start, range.start.col),
                    CellRef::new(end, range.end.col),
                ))
            }
            Axis::Cols => {
                let (start, end) =
                    self.map_span(range.start.col, range.end.col, limits.last_col())?;
                Some(Range::new(
                    CellRef::new(range.start.row, start),
                    CellRef::new(range.end.row, end),
                ))
            }
        }
    }

    /// The band of rows/columns named by the edit.
    pub fn band(&self) -> SheetRange {
        let last = self.at.saturating_add(self.count.saturating_sub(1));
        let range = match self.axis {
            Axis::Rows => Range::new(CellRef::new(self.at, 0), CellRef::new(last, 0)),
            Axis::Cols => Range::new(CellRef::new(0, self.at), CellRef::new(0, last)),
        };
        SheetRange::new(self.sheet, range)
    }

    /// Every cell whose position or content may have changed: from `at` to the end of the sheet.
    pub fn affected_region(&self, limits: &SheetLimits) -> SheetRange {
        let end = CellRef::new(limits.last_row(), limits.last_col());
        let start = match self.axis {
            Axis::Rows => CellRef::new(self.at.min(limits.last_row()), 0),
            Axis::Cols => CellRef::new(0, self.at.min(limits.last_col())),
        };
        SheetRange::new(self.sheet, Range::new(start, end))
    }
}
