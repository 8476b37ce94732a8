use std::sync::Arc;

use ahash::AHashSet;
use formula_model::{CellId, SheetRange};

use super::view::SheetView;
use super::Engine;
use crate::config::RecalcMode;
use crate::error::RecalcError;
use crate::formula::{evaluate, Expr, Outcome};
use crate::group::GroupId;
use crate::store::FormulaId;

impl Engine {
    /// Evaluate every dirty member of group `gid` in one batch.
    ///
    /// Precedents outside the group are brought up to date first, so members only ever read
    /// settled cells and can be evaluated in any order. Groups that read their own span (running
    /// totals) or are volatile go through the sequential driver instead.
    pub(crate) fn calc_group(&mut self, gid: GroupId) -> Result<(), RecalcError> {
        if let Err((cell, reason)) = self.groups.check_consistency(&self.store, gid) {
            log::error!("formula group {gid} is inconsistent at {cell}: {reason}");
            return Err(RecalcError::GroupConsistencyViolation {
                group: gid,
                cell,
                reason,
            });
        }
        let Some(group) = self.groups.get(gid) else {
            return Ok(());
        };
        let span = group.span();
        let expr = group.expr.clone();
        let dirty: Vec<FormulaId> = group
            .members
            .iter()
            .copied()
            .filter(|&id| self.is_formula_dirty(id))
            .collect();
        if dirty.is_empty() {
            return Ok(());
        }
        self.report.groups_evaluated += 1;

        let mut precedents: Vec<SheetRange> = Vec::new();
        let mut self_referencing = expr.is_volatile();
        for &id in &dirty {
            let Some(host) = self.cell_of(id) else {
                continue;
            };
            for range in expr.references(host, &self.config.limits) {
                if range.intersects(&span) {
                    self_referencing = true;
                } else if !precedents.contains(&range) {
                    precedents.push(range);
                }
            }
        }
        if self_referencing {
            log::trace!("group {gid} reads its own span; evaluating {} members in order", dirty.len());
            for id in dirty {
                self.drive(id);
            }
            return Ok(());
        }

        let mut seen = AHashSet::new();
        for range in &precedents {
            for id in self.store.formulas_in(range) {
                if seen.insert(id) && self.is_formula_dirty(id) {
                    self.drive(id);
                }
            }
        }

        // Driving precedents may have settled members through a circular reference.
        let members: Vec<(FormulaId, CellId)> = dirty
            .into_iter()
            .filter(|&id| {
                self.is_formula_dirty(id) && !self.guard.is_entered(id) && !self.guard.is_iterating(id)
            })
            .filter_map(|id| self.cell_of(id).map(|cell| (id, cell)))
            .collect();
        if members.is_empty() {
            return Ok(());
        }

        let parallel = self.config.recalc_mode == RecalcMode::MultiThreaded
            && members.len() >= self.config.min_parallel_group_len;
        let outcomes = match parallel.then(|| self.evaluate_parallel(&expr, &members)).flatten() {
            Some(outcomes) => {
                self.report.groups_parallel += 1;
                outcomes
            }
            None => self.evaluate_sequential(&expr, &members),
        };
        log::trace!(
            "group {gid}: {} members evaluated ({})",
            outcomes.len(),
            if parallel { "parallel" } else { "sequential" }
        );

        let mut leftovers = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Outcome::Done(value) => self.store_result(id, value),
                Outcome::Blocked(_) => leftovers.push(id),
            }
        }
        for id in leftovers {
            self.drive(id);
        }
        Ok(())
    }

    fn evaluate_sequential(
        &mut self,
        expr: &Arc<Expr>,
        members: &[(FormulaId, CellId)],
    ) -> Vec<(FormulaId, Outcome)> {
        let view = SheetView {
            store: &self.store,
            guard: &self.guard,
            cache: &self.cache,
            limits: &self.config.limits,
            external: self.external_provider.as_deref(),
        };
        members
            .iter()
            .map(|&(id, host)| (id, evaluate(&view, &mut self.ctx, host, expr)))
            .collect()
    }

    /// Shard `members` across the worker pool, one forked context per shard.
    ///
    /// Workers only read engine state; results are merged by the caller on this thread.
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    fn evaluate_parallel(
        &mut self,
        expr: &Arc<Expr>,
        members: &[(FormulaId, CellId)],
    ) -> Option<Vec<(FormulaId, Outcome)>> {
        use rayon::prelude::*;

        let pool = crate::parallel::rayon_pool()?;
        let shards = crate::parallel::worker_count();
        if shards < 2 {
            return None;
        }
        let chunk = members.len().div_ceil(shards);
        let mut contexts: Vec<_> = (0..members.len().div_ceil(chunk))
            .map(|shard| self.ctx.fork(shard as u64))
            .collect();

        let view = SheetView {
            store: &self.store,
            guard: &self.guard,
            cache: &self.cache,
            limits: &self.config.limits,
            external: self.external_provider.as_deref(),
        };
        let shards: Vec<Vec<(FormulaId, Outcome)>> = pool.install(|| {
            members
                .par_chunks(chunk)
                .zip(contexts.par_iter_mut())
                .map(|(shard, ctx)| {
                    shard
                        .iter()
                        .map(|&(id, host)| (id, evaluate(&view, ctx, host, expr)))
                        .collect()
                })
                .collect()
        });
        for ctx in contexts {
            self.ctx.merge(ctx);
        }
        Some(shards.into_iter().flatten().collect())
    }

    #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
    fn evaluate_parallel(
        &mut self,
        _expr: &Arc<Expr>,
        _members: &[(FormulaId, CellId)],
    ) -> Option<Vec<(FormulaId, Outcome)>> {
        None
    }
}
