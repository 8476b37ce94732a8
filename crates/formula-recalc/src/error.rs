use formula_model::{BoundsError, CellId, SheetRange};
use thiserror::Error;

use crate::group::GroupId;
use crate::listener::ObserverId;

/// Errors surfaced by the recalculation engine.
///
/// Per-cell computation failures are not errors at this level; they are stored in the cell as
/// [`crate::Value::Error`] and propagate to dependents as values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecalcError {
    /// A request addressed coordinates outside the document. The request had no effect.
    #[error("invalid range {range}: {source}")]
    InvalidRange {
        range: SheetRange,
        #[source]
        source: BoundsError,
    },
    /// The group index no longer matches the cells it describes. The current pass was aborted;
    /// cells it did not reach are still dirty.
    #[error("formula group {group} is inconsistent at {cell}: {reason}")]
    GroupConsistencyViolation {
        group: GroupId,
        cell: CellId,
        reason: GroupViolation,
    },
    #[error("unknown observer {0}")]
    UnknownObserver(ObserverId),
}

/// Which part of a formula group's invariant was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GroupViolation {
    #[error("group has no members")]
    Empty,
    #[error("member formula no longer exists")]
    MissingMember,
    #[error("member is not attached to the group")]
    Detached,
    #[error("member is outside the group's column or row run")]
    NotContiguous,
    #[error("member formula differs from the group formula")]
    ExprMismatch,
}

impl RecalcError {
    pub(crate) fn invalid_range(range: SheetRange, source: BoundsError) -> Self {
        RecalcError::InvalidRange { range, source }
    }
}
