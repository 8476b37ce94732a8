//! Compiled formulas and the interpreter that evaluates them.
//!
//! Parsing formula text is the host's job; the engine consumes [`Expr`] trees directly.

mod expr;
mod functions;
mod interpret;

pub use expr::{
    Axis, AxisEdit, BinaryOp, CellReference, Coord, EditKind, Expr, Function, RangeReference,
    RefAddr, UnaryOp,
};
pub use interpret::{evaluate, Blocked, CellSource, Outcome, Probe};
