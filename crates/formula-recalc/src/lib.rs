#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Dependency tracking and incremental recalculation for workbook formulas.
//!
//! The [`Engine`] owns the cells of a workbook. Every formula subscribes to the ranges it reads
//! through a per-sheet spatial index; editing a cell walks that index to mark dependents dirty,
//! and [`Engine::calc_all`] (or [`Engine::ensure_results_for`] for a single range) evaluates
//! them in dependency order.
//!
//! ## Formula groups
//!
//! Contiguous cells of one column holding the same relative formula (a filled-down column) form
//! a group that shares a single [`Expr`]. A dirty group is evaluated as a batch and, when large
//! enough and [`RecalcMode::MultiThreaded`] is configured, sharded across a crate-local Rayon
//! pool (feature `parallel`, on by default).
//!
//! ## Circular references
//!
//! With iterative calculation disabled, every cell of a cycle evaluates to
//! [`ErrorKind::Circular`]. With it enabled, the cycle is iterated until its values move by at
//! most `max_change` or `max_iterations` is reached; see [`RecalcReport::converged`].
//!
//! ## Structural edits
//!
//! Row/column insertion and deletion rewrite the references of every affected formula and
//! rebuild its subscriptions. See [`Engine::insert_rows`] and [`Engine::copy_range`].

mod broadcast;
pub mod config;
mod context;
mod engine;
pub mod error;
pub mod formula;
mod group;
mod guard;
mod listener;
pub mod lookup_cache;
mod parallel;
mod queue;
mod store;
pub mod value;

pub use config::{EngineConfig, RecalcMode};
pub use context::{EvalContext, EvalStats};
pub use engine::{Engine, ExternalValueProvider, HardRecalcState, RecalcReport};
pub use error::{GroupViolation, RecalcError};
pub use formula::{Axis, AxisEdit, BinaryOp, EditKind, Expr, Function, RefAddr, UnaryOp};
pub use group::{GroupId, GroupInfo};
pub use listener::{ChangeEvent, ChangeKind, ListenerId, ObserverCallback, ObserverId};
pub use store::FormulaId;
pub use value::{ErrorKind, Value};

pub use formula_model::{
    CalcSettings, CalculationMode, CellId, CellRef, IterativeCalculationSettings, Range,
    SheetId, SheetLimits, SheetRange,
};
