mod calc;
mod dispatch;
mod notify;
mod structure;
mod view;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use formula_model::{CalcSettings, CellId, SheetLimits, SheetRange};
use serde::{Deserialize, Serialize};

use crate::broadcast::BroadcastAreaMap;
use crate::config::{EngineConfig, RecalcMode};
use crate::context::{EvalContext, EvalStats};
use crate::error::RecalcError;
use crate::formula::Expr;
use crate::group::{GroupInfo, GroupTable};
use crate::guard::RecursionGuard;
use crate::listener::{ListenerId, ListenerRegistry, ObserverCallback, ObserverId};
use crate::lookup_cache::LookupCache;
use crate::queue::DirtyQueue;
use crate::store::{CellStore, FormulaId};
use crate::value::Value;

/// Host-provided values for [`Expr::External`] references (file links, DDE-style feeds).
///
/// Providers are read from worker threads during parallel group evaluation.
pub trait ExternalValueProvider: Send + Sync {
    /// Current value of `link`, or `None` if the link is unknown (`#REF!`).
    fn get(&self, link: &str) -> Option<Value>;
}

/// How much listener bookkeeping accompanies edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardRecalcState {
    /// Normal incremental recalculation: every formula listens on its precedents.
    #[default]
    Off,
    /// Bulk recalculation. New formulas do not start listening; each `calc_all` recalculates
    /// them unconditionally instead.
    Temporary,
    /// No listener maintenance at all (bulk import). Every `calc_all` recalculates everything.
    Eternal,
}

/// Summary of one recalculation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalcReport {
    pub cells_evaluated: usize,
    pub groups_evaluated: usize,
    /// Groups whose members were sharded across the worker pool.
    pub groups_parallel: usize,
    /// Cells that took part in a circular reference.
    pub circular_cells: usize,
    pub cycles_iterated: usize,
    /// Largest number of iterations any cycle needed, counting the pass that found it.
    pub iterations: u32,
    /// False if some cycle hit the iteration cap before converging.
    pub converged: bool,
    pub duration: Duration,
}

impl Default for RecalcReport {
    fn default() -> Self {
        Self {
            cells_evaluated: 0,
            groups_evaluated: 0,
            groups_parallel: 0,
            circular_cells: 0,
            cycles_iterated: 0,
            iterations: 0,
            converged: true,
            duration: Duration::ZERO,
        }
    }
}

struct Observer {
    listener: ListenerId,
    callback: ObserverCallback,
}

/// The recalculation coordinator.
///
/// Owns every piece of dependency state (range index, dirty queue, groups, caches). All
/// mutation goes through `&mut self`, so two passes can never interleave; the only concurrency
/// is the fan-out/fan-in of a formula group inside a pass.
pub struct Engine {
    config: EngineConfig,
    store: CellStore,
    areas: BroadcastAreaMap,
    listeners: ListenerRegistry,
    observers: AHashMap<ObserverId, Observer>,
    next_observer: u32,
    queue: DirtyQueue,
    guard: RecursionGuard,
    groups: GroupTable,
    cache: LookupCache,
    ctx: EvalContext,
    hard_state: HardRecalcState,
    /// Formulas entered while listener setup was suspended.
    not_listening: BTreeSet<FormulaId>,
    volatile: BTreeSet<FormulaId>,
    external_readers: AHashMap<Arc<str>, BTreeSet<FormulaId>>,
    external_provider: Option<Arc<dyn ExternalValueProvider>>,
    report: RecalcReport,
    last_report: Option<RecalcReport>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let ctx = EvalContext::new(config.rng_seed);
        Self {
            config,
            store: CellStore::default(),
            areas: BroadcastAreaMap::new(),
            listeners: ListenerRegistry::default(),
            observers: AHashMap::new(),
            next_observer: 0,
            queue: DirtyQueue::new(),
            guard: RecursionGuard::default(),
            groups: GroupTable::default(),
            cache: LookupCache::new(),
            ctx,
            hard_state: HardRecalcState::Off,
            not_listening: BTreeSet::new(),
            volatile: BTreeSet::new(),
            external_readers: AHashMap::new(),
            external_provider: None,
            report: RecalcReport::default(),
            last_report: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn limits(&self) -> &SheetLimits {
        &self.config.limits
    }

    /// Replace the calculation settings. Switching to automatic mode recalculates.
    pub fn set_calc_settings(&mut self, settings: CalcSettings) -> Result<(), RecalcError> {
        self.config.calc = settings;
        self.recalc_if_automatic()
    }

    pub fn set_recalc_mode(&mut self, mode: RecalcMode) {
        self.config.recalc_mode = mode;
    }

    pub fn set_external_value_provider(&mut self, provider: Option<Arc<dyn ExternalValueProvider>>) {
        self.external_provider = provider;
    }

    pub(crate) fn check_range(&self, range: &SheetRange) -> Result<(), RecalcError> {
        self.config
            .limits
            .check_range(range)
            .map_err(|source| RecalcError::invalid_range(*range, source))
    }

    fn check_cell(&self, cell: CellId) -> Result<(), RecalcError> {
        self.check_range(&SheetRange::cell(cell))
    }

    /// Store a constant in `cell` (a blank value clears it).
    pub fn set_value(&mut self, cell: CellId, value: impl Into<Value>) -> Result<(), RecalcError> {
        self.check_cell(cell)?;
        self.write_value(cell, value.into());
        self.cell_changed(cell);
        self.recalc_if_automatic()
    }

    /// Enter a compiled formula in `cell`.
    pub fn set_formula(&mut self, cell: CellId, expr: impl Into<Arc<Expr>>) -> Result<(), RecalcError> {
        self.check_cell(cell)?;
        self.write_formula(cell, expr.into());
        self.cell_changed(cell);
        self.recalc_if_automatic()
    }

    pub fn clear_cell(&mut self, cell: CellId) -> Result<(), RecalcError> {
        self.check_cell(cell)?;
        self.remove_content(cell);
        self.cell_changed(cell);
        self.recalc_if_automatic()
    }

    /// The value a reader sees now. Formulas report their last computed value, which may be
    /// stale until [`Engine::calc_all`] or [`Engine::ensure_results_for`] runs.
    pub fn value(&self, cell: CellId) -> Value {
        self.store.value_of(cell)
    }

    pub fn formula(&self, cell: CellId) -> Option<Arc<Expr>> {
        let id = self.store.formula_at(cell)?;
        self.store.formula(id).map(|f| f.expr.clone())
    }

    /// Mark formulas in `range` dirty and propagate to their dependents. With `include_empty`,
    /// dependents of every location in the range are dirtied, not just of populated cells.
    pub fn mark_dirty(&mut self, range: SheetRange, include_empty: bool) -> Result<(), RecalcError> {
        self.check_range(&range)?;
        for id in self.store.formulas_in(&range) {
            self.dirty_and_broadcast(id);
        }
        if include_empty {
            self.broadcast_change(range, crate::ChangeKind::Dirtied);
        } else {
            for cell in self.store.cells_in(&range) {
                self.broadcast_change(SheetRange::cell(cell), crate::ChangeKind::Dirtied);
            }
        }
        Ok(())
    }

    /// The host's notification that an external link's value changed.
    pub fn external_link_changed(&mut self, link: &str) -> Result<(), RecalcError> {
        let readers: Vec<FormulaId> = self
            .external_readers
            .get(link)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        for id in readers {
            self.dirty_and_broadcast(id);
        }
        self.recalc_if_automatic()
    }

    pub fn hard_recalc_state(&self) -> HardRecalcState {
        self.hard_state
    }

    /// Switch hard-recalc state. Returning to `Off` attaches listeners for every formula entered
    /// meanwhile; coming back from `Eternal` also dirties every formula.
    pub fn set_hard_recalc_state(&mut self, state: HardRecalcState) -> Result<(), RecalcError> {
        let previous = std::mem::replace(&mut self.hard_state, state);
        if previous == state || state != HardRecalcState::Off {
            return Ok(());
        }

        let deferred = std::mem::take(&mut self.not_listening);
        log::debug!(
            "hard recalc {previous:?} -> Off: attaching {} deferred formulas",
            deferred.len()
        );
        for &id in &deferred {
            self.start_listening(id);
        }
        if previous == HardRecalcState::Eternal {
            self.mark_all_dirty();
        } else {
            for id in deferred {
                self.dirty_and_broadcast(id);
            }
        }
        self.recalc_if_automatic()
    }

    /// While grouping is delayed, edited columns are not regrouped until it is re-enabled.
    pub fn set_delay_grouping(&mut self, delay: bool) {
        self.groups.set_delayed(delay);
        if !delay {
            self.groups.regroup_pending(&mut self.store);
        }
    }

    pub fn clear_lookup_cache(&mut self) {
        self.cache.clear();
    }

    pub fn lookup_cache_len(&self) -> usize {
        self.cache.len()
    }

    /// `(hits, misses)` of the lookup cache.
    pub fn lookup_cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    pub fn last_report(&self) -> Option<&RecalcReport> {
        self.last_report.as_ref()
    }

    /// Interpreter counters since the engine was created, including those merged back from
    /// group workers.
    pub fn eval_stats(&self) -> EvalStats {
        self.ctx.stats()
    }

    pub fn is_dirty(&self, cell: CellId) -> bool {
        self.store
            .formula_at(cell)
            .and_then(|id| self.store.formula(id))
            .is_some_and(|f| f.dirty)
    }

    pub fn has_dirty_cells(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Ranges the formula in `cell` reads.
    pub fn precedent_ranges(&self, cell: CellId) -> Vec<SheetRange> {
        let Some(f) = self.store.formula_at(cell).and_then(|id| self.store.formula(id)) else {
            return Vec::new();
        };
        match f.listener {
            Some(listener) => self.listeners.ranges(listener).to_vec(),
            None => f.expr.references(f.cell, &self.config.limits).into_vec(),
        }
    }

    pub fn group_of(&self, cell: CellId) -> Option<GroupInfo> {
        let id = self.store.formula_at(cell)?;
        let gid = self.store.formula(id)?.group?;
        let group = self.groups.get(gid)?;
        Some(GroupInfo {
            id: gid,
            top: group.top(),
            len: group.members.len(),
        })
    }

    pub fn formula_count(&self) -> usize {
        self.store.formula_count()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn area_count(&self) -> usize {
        self.areas.area_count()
    }

    /// Total (area, listener) memberships in the range index.
    pub fn subscription_count(&self) -> usize {
        self.areas.subscription_count()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn write_value(&mut self, cell: CellId, value: Value) {
        self.remove_content(cell);
        if !value.is_blank() {
            self.store.set_value(cell, value);
        }
    }

    fn write_formula(&mut self, cell: CellId, expr: Arc<Expr>) -> FormulaId {
        self.remove_content(cell);
        let id = self.store.insert_formula(cell, expr);
        if let Some(f) = self.store.formula(id) {
            if f.volatile {
                self.volatile.insert(id);
            }
            if f.external {
                for link in f.expr.external_links() {
                    self.external_readers.entry(link).or_default().insert(id);
                }
            }
        }
        self.attach(id);
        self.groups.mark_pending(cell.sheet_id, cell.col());
        self.mark_formula_dirty(id);
        id
    }

    /// Destroy whatever `cell` holds, fully detaching a formula first.
    fn remove_content(&mut self, cell: CellId) {
        if let Some(id) = self.store.formula_at(cell) {
            self.groups.split_at(&mut self.store, id);
            self.groups.mark_pending(cell.sheet_id, cell.col());
            self.discard_formula(id);
        }
        self.store.remove(cell);
    }

    /// Tear down every index entry of formula `id` and free its slot.
    pub(crate) fn discard_formula(&mut self, id: FormulaId) {
        self.end_listening(id);
        self.queue.remove(id);
        self.volatile.remove(&id);
        self.not_listening.remove(&id);
        if let Some(f) = self.store.free_formula(id) {
            if f.external {
                for link in f.expr.external_links() {
                    if let Some(readers) = self.external_readers.get_mut(&link) {
                        readers.remove(&id);
                        if readers.is_empty() {
                            self.external_readers.remove(&link);
                        }
                    }
                }
            }
        }
    }

    /// Bookkeeping after a cell's content was replaced.
    fn cell_changed(&mut self, cell: CellId) {
        let range = SheetRange::cell(cell);
        self.cache.invalidate(&range);
        self.broadcast_change(range, crate::ChangeKind::ValueChanged);
    }

    pub(crate) fn cell_of(&self, id: FormulaId) -> Option<CellId> {
        self.store.formula(id).map(|f| f.cell)
    }
}
