//! The soft categories model: per-word membership distributions (`mem`)
//! and per-word generative distributions (`gen`) over an integer
//! category space, estimated by EM from fractional segmentation
//! statistics.
//!
//! Grounded on `original_source/Categories.cc`'s `accumulate` and
//! `estimate_model`. `gen` and `mem` are structurally identical maps —
//! `mapping word -> (category -> logp)` — differing only in which axis
//! is normalized over during estimation, matching the data model's
//! description of `mem` as "stored inverse-indexed as `mem_by_word[w]`".

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::vocab::WordId;

pub type CategoryId = i32;

/// Floor below which a log-probability is pruned from a category map.
/// Grounded on `original_source/src/defs.hh`'s `LP_PRUNE_LIMIT`.
pub const LP_PRUNE_LIMIT: f64 = -50.0;

/// A word with no observed category membership at all is represented by
/// this sentinel rather than an empty map at lookup time.
pub const NO_CATEGORY: CategoryId = -1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Categories {
    gen: AHashMap<WordId, AHashMap<CategoryId, f64>>,
    mem_by_word: AHashMap<WordId, AHashMap<CategoryId, f64>>,
    #[serde(skip)]
    stats: AHashMap<WordId, AHashMap<CategoryId, f64>>,
}

impl Categories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gen_probs(&self, w: WordId) -> Option<&AHashMap<CategoryId, f64>> {
        self.gen.get(&w)
    }

    pub fn mem_probs(&self, w: WordId) -> Option<&AHashMap<CategoryId, f64>> {
        self.mem_by_word.get(&w)
    }

    pub fn has_categories(&self, w: WordId) -> bool {
        self.mem_by_word.get(&w).map(|m| !m.is_empty()).unwrap_or(false)
    }

    pub fn gen_entries(&self) -> impl Iterator<Item = (WordId, &AHashMap<CategoryId, f64>)> {
        self.gen.iter().map(|(&w, m)| (w, m))
    }

    pub fn mem_entries(&self) -> impl Iterator<Item = (WordId, &AHashMap<CategoryId, f64>)> {
        self.mem_by_word.iter().map(|(&w, m)| (w, m))
    }

    /// Inserts a single `gen`/`mem` entry directly, bypassing EM — used
    /// by the text-format readers that load a previously-serialized
    /// soft model instead of re-estimating one.
    pub fn set_gen_prob(&mut self, w: WordId, c: CategoryId, logp: f64) {
        self.gen.entry(w).or_default().insert(c, logp);
    }

    pub fn set_mem_prob(&mut self, w: WordId, c: CategoryId, logp: f64) {
        self.mem_by_word.entry(w).or_default().insert(c, logp);
    }

    /// Accumulates a fractional observation of `w` tagged as category
    /// `c` with weight `weight` (a soft EM count, typically
    /// `exp(lp)` from `segmenter::collect_stats`).
    pub fn accumulate(&mut self, w: WordId, c: CategoryId, weight: f64) {
        if weight <= 0.0 || !weight.is_finite() {
            return;
        }
        *self.stats.entry(w).or_default().entry(c).or_insert(0.0) += weight;
    }

    /// Merges another accumulator's pending statistics into this one —
    /// the reduction step for parallel statistics collection across
    /// corpus shards.
    pub fn accumulate_other(&mut self, other: &Categories) {
        for (&w, cats) in &other.stats {
            for (&c, &weight) in cats {
                *self.stats.entry(w).or_default().entry(c).or_insert(0.0) += weight;
            }
        }
    }

    pub fn pending_stat(&self, w: WordId, c: CategoryId) -> f64 {
        self.stats.get(&w).and_then(|m| m.get(&c)).copied().unwrap_or(0.0)
    }

    pub fn clear_stats(&mut self) {
        self.stats.clear();
    }

    /// Seeds a trace observation for `<unk>` so the segmenter's OOV
    /// fallback always has at least one category to advance through.
    /// Grounded on `estimate_model`'s unconditional `<unk>` bootstrap
    /// entry; called by the EM driver before each `estimate_model` pass.
    pub fn bootstrap_unk(&mut self, unk_id: WordId, category: CategoryId) {
        self.accumulate(unk_id, category, 1e-6);
    }

    /// Re-estimates `gen`/`mem` from the accumulated fractional stats,
    /// then clears them so a fresh round of `accumulate` calls can
    /// begin. Grounded on `original_source/Categories.cc`'s
    /// `estimate_model`.
    pub fn estimate_model(&mut self) {
        let mut class_totals: AHashMap<CategoryId, f64> = AHashMap::new();
        let mut word_totals: AHashMap<WordId, f64> = AHashMap::new();
        for (&w, cats) in &self.stats {
            for (&c, &n) in cats {
                *class_totals.entry(c).or_insert(0.0) += n;
                *word_totals.entry(w).or_insert(0.0) += n;
            }
        }

        let mut new_gen: AHashMap<WordId, AHashMap<CategoryId, f64>> = AHashMap::new();
        let mut new_mem: AHashMap<WordId, AHashMap<CategoryId, f64>> = AHashMap::new();

        for (&w, cats) in &self.stats {
            let wt = word_totals.get(&w).copied().unwrap_or(0.0);
            if wt <= 0.0 {
                continue;
            }
            for (&c, &n) in cats {
                if n <= 0.0 {
                    continue;
                }
                let ct = class_totals.get(&c).copied().unwrap_or(0.0);
                let mem_lp = n.ln() - ct.ln();
                let gen_lp = n.ln() - wt.ln();
                let mem_ok = mem_lp > LP_PRUNE_LIMIT && mem_lp.is_finite();
                let gen_ok = gen_lp > LP_PRUNE_LIMIT && gen_lp.is_finite();
                if mem_ok && gen_ok {
                    new_mem.entry(w).or_default().insert(c, mem_lp);
                    new_gen.entry(w).or_default().insert(c, gen_lp);
                }
            }
        }

        self.gen = new_gen;
        self.mem_by_word = new_mem;
        self.stats.clear();
    }

    /// Truncates every word's category list to the `k` highest
    /// log-probability entries. Grounded on `limit_num_classes`.
    pub fn limit_num_classes(&mut self, k: usize) {
        for map in self.gen.values_mut().chain(self.mem_by_word.values_mut()) {
            if map.len() <= k {
                continue;
            }
            let mut entries: Vec<(CategoryId, f64)> = map.iter().map(|(&c, &p)| (c, p)).collect();
            entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
            entries.truncate(k);
            *map = entries.into_iter().collect();
        }
    }

    /// Non-fatal renormalization check: every word's `gen` distribution
    /// should sum (in probability space) to approximately 1. Returns the
    /// words that drift by more than `tolerance`; callers log these as
    /// warnings rather than treating them as fatal, per spec §7.
    pub fn assert_gen_normalized(&self, tolerance: f64) -> Vec<WordId> {
        self.gen
            .iter()
            .filter_map(|(&w, cats)| {
                let sum: f64 = cats.values().map(|lp| lp.exp()).sum();
                ((sum - 1.0).abs() > tolerance).then_some(w)
            })
            .collect()
    }

    pub fn num_words_with_categories(&self) -> usize {
        self.mem_by_word.iter().filter(|(_, m)| !m.is_empty()).count()
    }

    pub fn num_observed_categories(&self) -> usize {
        let mut seen: ahash::AHashSet<CategoryId> = ahash::AHashSet::new();
        for m in self.mem_by_word.values() {
            seen.extend(m.keys().copied());
        }
        seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_model_normalizes_gen_per_word() {
        let mut cats = Categories::new();
        cats.accumulate(10, 1, 3.0);
        cats.accumulate(10, 2, 1.0);
        cats.accumulate(11, 1, 5.0);
        cats.estimate_model();

        let drifted = cats.assert_gen_normalized(1e-6);
        assert!(drifted.is_empty(), "drifted words: {drifted:?}");
    }

    #[test]
    fn estimate_model_clears_stats() {
        let mut cats = Categories::new();
        cats.accumulate(10, 1, 3.0);
        cats.estimate_model();
        assert_eq!(cats.pending_stat(10, 1), 0.0);
    }

    #[test]
    fn pruned_entries_are_not_kept_in_either_map() {
        let mut cats = Categories::new();
        // word 20 seen once in a category with overwhelming total mass
        // elsewhere, pushing its mem-probability below the prune limit.
        cats.accumulate(20, 5, 1.0);
        for w in 0..10_000u32 {
            cats.accumulate(1000 + w, 5, 1.0);
        }
        cats.estimate_model();
        if let Some(mem) = cats.mem_probs(20) {
            assert!(!mem.contains_key(&5));
        }
    }

    #[test]
    fn accumulate_other_merges_pending_stats() {
        let mut a = Categories::new();
        let mut b = Categories::new();
        a.accumulate(1, 1, 2.0);
        b.accumulate(1, 1, 3.0);
        b.accumulate(2, 1, 1.0);
        a.accumulate_other(&b);
        assert_eq!(a.pending_stat(1, 1), 5.0);
        assert_eq!(a.pending_stat(2, 1), 1.0);
    }

    #[test]
    fn limit_num_classes_keeps_highest_probability_entries() {
        let mut cats = Categories::new();
        cats.accumulate(1, 1, 10.0);
        cats.accumulate(1, 2, 5.0);
        cats.accumulate(1, 3, 1.0);
        cats.estimate_model();
        cats.limit_num_classes(2);
        assert_eq!(cats.mem_probs(1).unwrap().len(), 2);
        assert!(cats.mem_probs(1).unwrap().contains_key(&1));
    }
}
