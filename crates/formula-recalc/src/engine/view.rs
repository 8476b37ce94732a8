use std::sync::Arc;

use formula_model::{CellId, SheetLimits, SheetRange};

use super::ExternalValueProvider;
use crate::formula::{Blocked, CellSource, Probe};
use crate::guard::RecursionGuard;
use crate::lookup_cache::{LookupCache, LookupIndex, LookupKey};
use crate::store::{CellContent, CellStore, FormulaCell, FormulaId};
use crate::value::{ErrorKind, Value};

/// Read-only view of the engine handed to the interpreter. Shared by group workers.
pub(super) struct SheetView<'a> {
    pub(super) store: &'a CellStore,
    pub(super) guard: &'a RecursionGuard,
    pub(super) cache: &'a LookupCache,
    pub(super) limits: &'a SheetLimits,
    pub(super) external: Option<&'a dyn ExternalValueProvider>,
}

impl SheetView<'_> {
    fn formula_probe(&self, id: FormulaId, formula: &FormulaCell) -> Probe {
        // Members of a cycle under iteration read as their latest iterate.
        if !formula.dirty || self.guard.is_iterating(id) {
            Probe::Ready(formula.value.clone())
        } else if self.guard.is_entered(id) {
            Probe::Cycle(id)
        } else {
            Probe::Pending(id)
        }
    }
}

impl CellSource for SheetView<'_> {
    fn limits(&self) -> &SheetLimits {
        self.limits
    }

    fn probe(&self, cell: CellId) -> Probe {
        match self.store.content(cell) {
            None => Probe::Ready(Value::Blank),
            Some(CellContent::Value(v)) => Probe::Ready(v.clone()),
            Some(CellContent::Formula(id)) => match self.store.formula(*id) {
                Some(f) => self.formula_probe(*id, f),
                None => Probe::Ready(Value::Blank),
            },
        }
    }

    fn scan(&self, range: &SheetRange, blocked: &mut Blocked, visit: &mut dyn FnMut(CellId, &Value)) {
        self.store.for_each_in(range, |cell, content| match content {
            CellContent::Value(v) => visit(cell, v),
            CellContent::Formula(id) => {
                let Some(f) = self.store.formula(*id) else {
                    return;
                };
                match self.formula_probe(*id, f) {
                    Probe::Ready(_) => visit(cell, &f.value),
                    Probe::Pending(id) => blocked.push_pending(id),
                    Probe::Cycle(id) => blocked.record_cycle(id),
                }
            }
        });
    }

    fn lookup(&self, key: LookupKey) -> Result<Arc<LookupIndex>, Blocked> {
        self.cache.get_or_build(key, || {
            let mut blocked = Blocked::default();
            let mut entries = Vec::new();
            self.scan(&key.range, &mut blocked, &mut |cell, v| {
                entries.push((key.position_of(cell), v.clone()));
            });
            if blocked.is_empty() {
                Ok(LookupIndex::build(key.shape, entries))
            } else {
                Err(blocked)
            }
        })
    }

    fn external_value(&self, link: &str) -> Value {
        self.external
            .and_then(|provider| provider.get(link))
            .unwrap_or(Value::Error(ErrorKind::Ref))
    }
}
