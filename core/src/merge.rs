//! Merge driver: combines pairs of classes (scoped to "super classes"
//! produced by earlier splits) to locally maximize the partition
//! log-likelihood.
//!
//! Grounded on `original_source/src/merge.cc`'s `merge_classes` (the
//! super-class-scoped sampling loop) and `original_source/Merging.cc`'s
//! `do_merge` (the commit). Candidate sampling uses a seeded `rand`
//! RNG (SPEC_FULL.md §5 design note) instead of the original's unseeded
//! `rand() % n`.

use ahash::AHashSet;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::classes::ClassState;
use crate::delta::evaluate_merge;
use crate::exchange::recompute_counts_after_move;
use crate::progress::Progress;
use crate::vocab::ClassId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    pub evals_per_iteration: usize,
    pub seed: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig { evals_per_iteration: 2000, seed: 0 }
    }
}

/// Commits a merge of `b` into `a`: every word in `b` is relocated to
/// `a` one at a time, reusing the exchange commit primitive. The net
/// effect on aggregate counts is identical to a closed-form row/column
/// collapse (log-likelihood is a pure function of final state, so the
/// path independence lets us reuse the well-tested per-word update
/// instead of duplicating its arithmetic as a second, merge-specific
/// closed form). Every `wc_count`/`cw_count` entry that references `b`
/// is a sum over `b`'s current members, so once this loop has visited
/// all of them no entry referencing `b` remains.
pub fn commit_merge(state: &mut ClassState, a: ClassId, b: ClassId) {
    if a == b {
        return;
    }
    let members: Vec<_> = state.members(b).iter().copied().collect();
    for w in members {
        state.move_word(w, b, a);
        recompute_counts_after_move(state, w, b, a);
    }
}

pub struct MergeDriver {
    pub config: MergeConfig,
}

impl MergeDriver {
    pub fn new(config: MergeConfig) -> Self {
        MergeDriver { config }
    }

    /// One round of merging: for each super-class with more than one
    /// member class, sample a handful of candidate pairs (scaled by
    /// the super-class's size, per `merge_classes`'s
    /// `evals_per_super_class` formula), evaluate them in parallel, and
    /// commit the single best strictly-improving merge found across all
    /// super-classes. Returns the committed Δ log-likelihood, or `None`
    /// if nothing improved.
    pub fn run_round(
        &self,
        state: &mut ClassState,
        super_classes: &mut Vec<AHashSet<ClassId>>,
        super_class_lookup: &mut ahash::AHashMap<ClassId, usize>,
        rng: &mut StdRng,
        progress: &Progress,
    ) -> Option<f64> {
        let num_classes = state.num_classes();
        let mut candidates: Vec<(ClassId, ClassId)> = Vec::new();

        for sc in super_classes.iter() {
            if sc.len() < 2 {
                continue;
            }
            let members: Vec<ClassId> = sc.iter().copied().collect();
            let evals = (1.0_f64).max(
                (members.len() as f64 / num_classes as f64) * self.config.evals_per_iteration as f64,
            ) as usize;
            let mut seen: AHashSet<(ClassId, ClassId)> = AHashSet::new();
            for _ in 0..evals {
                let pair: Vec<ClassId> = members.choose_multiple(rng, 2).copied().collect();
                if pair.len() < 2 {
                    continue;
                }
                let (x, y) = (pair[0].min(pair[1]), pair[0].max(pair[1]));
                if x == y || !seen.insert((x, y)) {
                    continue;
                }
                if state.class_size(x) == 0 || state.class_size(y) == 0 {
                    continue;
                }
                candidates.push((x, y));
            }
        }

        if candidates.is_empty() {
            return None;
        }

        let best = candidates
            .par_iter()
            .map(|&(a, b)| (a, b, evaluate_merge(state, a, b)))
            .reduce(
                || (0, 0, f64::NEG_INFINITY),
                |x, y| if y.2 > x.2 { y } else { x },
            );

        if best.2 <= 0.0 {
            return None;
        }

        let (a, b, delta) = best;
        commit_merge(state, a, b);
        let sci = super_class_lookup[&b];
        super_classes[sci].remove(&b);
        super_class_lookup.remove(&b);
        progress.info(format!("merged class {b} into {a}, Δll = {delta:.6}"));
        Some(delta)
    }
}

pub fn new_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}
