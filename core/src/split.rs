//! Split driver: grows the number of classes by repeatedly binary-
//! partitioning the most promising existing class.
//!
//! Grounded on `original_source/split.cc`'s `find_candidate_classes`
//! (the `0.5 * |classes|/|vocab| + 0.5 * class_count[c]/num_tokens`
//! heuristic) and `split_classes` (the tentative-split/local-exchange/
//! undo evaluation loop), plus `original_source/Splitting.cc`'s
//! `iterate_exchange_local` (re-exported from `exchange`, not
//! duplicated here).

use ahash::AHashSet;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::classes::ClassState;
use crate::exchange::{local_exchange, recompute_counts_after_move};
use crate::merge::{commit_merge, new_rng};
use crate::progress::Progress;
use crate::vocab::{ClassId, WordId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub target_num_classes: usize,
    /// Number of candidate classes to tentatively split-and-undo before
    /// committing the best one. `< 2` means: just split the single
    /// top-scoring candidate without evaluation, per `split_classes`.
    pub num_eval_classes: usize,
    /// Candidates whose tentative Δ log-likelihood falls below this
    /// threshold are stoplisted (not retried this run).
    pub ll_threshold: f64,
    /// How many local-exchange passes to run after the committed split.
    pub local_exchange_passes: u32,
    /// Initial binary split method: alternating-by-frequency (false, the
    /// default) or a uniform-random shuffle (true), per spec.md:128.
    pub random_split: bool,
    /// Seed for the random-split RNG, used only when `random_split` is set.
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig {
            target_num_classes: 0,
            num_eval_classes: 0,
            ll_threshold: 0.0,
            local_exchange_passes: 0,
            random_split: false,
            seed: 0,
        }
    }
}

/// Scores every splittable, non-stoplisted class and returns up to
/// `top_k` of them ordered best-first.
///
/// Grounded on `find_candidate_classes`.
pub fn find_candidate_classes(state: &ClassState, stoplist: &AHashSet<ClassId>, top_k: usize) -> Vec<ClassId> {
    let total_word_types: f64 = (0..state.num_classes()).map(|c| state.class_size(c as ClassId)).sum::<usize>() as f64;
    let total_tokens: f64 = (0..state.num_classes()).map(|c| state.class_count(c as ClassId)).sum::<u64>() as f64;

    let mut scored: Vec<(f64, ClassId)> = Vec::new();
    for c in state.num_special_classes()..state.num_classes() as ClassId {
        if state.class_size(c) < 2 || stoplist.contains(&c) {
            continue;
        }
        let score = 0.5 * (state.num_classes() as f64) / total_word_types
            + 0.5 * (state.class_count(c) as f64) / total_tokens;
        scored.push((score, c));
    }
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    scored.into_iter().take(top_k).map(|(_, c)| c).collect()
}

/// Frequency-balanced binary split: sorts `c`'s members by descending
/// unigram count and deals them alternately into two sets so each side
/// carries comparable token mass, giving the subsequent local exchange
/// a reasonable starting point.
pub fn freq_split(state: &ClassState, c: ClassId) -> (AHashSet<WordId>, AHashSet<WordId>, Vec<WordId>) {
    let mut ordered: Vec<WordId> = state.members(c).iter().copied().collect();
    ordered.sort_by(|&a, &b| state.word_count(b).cmp(&state.word_count(a)).then(a.cmp(&b)));

    let mut class1 = AHashSet::new();
    let mut class2 = AHashSet::new();
    let mut mass1 = 0u64;
    let mut mass2 = 0u64;
    for &w in &ordered {
        if mass1 <= mass2 {
            class1.insert(w);
            mass1 += state.word_count(w);
        } else {
            class2.insert(w);
            mass2 += state.word_count(w);
        }
    }
    if class2.is_empty() && class1.len() > 1 {
        let last = *class1.iter().next().unwrap();
        class1.remove(&last);
        class2.insert(last);
    }
    (class1, class2, ordered)
}

/// Uniform-random binary split: shuffles `c`'s members and cuts the
/// shuffled order in half, giving no weight to frequency. Grounded on
/// `original_source/Splitting.cc`'s `do_split(class_idx, true)` →
/// `random_split`, with the original's unseeded `random_shuffle`
/// replaced by a caller-seeded `StdRng` per SPEC_FULL.md §5.
pub fn random_split(state: &ClassState, c: ClassId, rng: &mut StdRng) -> (AHashSet<WordId>, AHashSet<WordId>, Vec<WordId>) {
    let mut ordered: Vec<WordId> = state.members(c).iter().copied().collect();
    ordered.shuffle(rng);

    let mid = (ordered.len() / 2).max(1);
    let mut class1 = AHashSet::new();
    let mut class2 = AHashSet::new();
    for (i, &w) in ordered.iter().enumerate() {
        if i < mid {
            class1.insert(w);
        } else {
            class2.insert(w);
        }
    }
    if class2.is_empty() && class1.len() > 1 {
        let last = *class1.iter().next().unwrap();
        class1.remove(&last);
        class2.insert(last);
    }
    (class1, class2, ordered)
}

/// Dispatches to `freq_split` or `random_split` per `config.random_split`.
fn initial_split(
    state: &ClassState,
    c: ClassId,
    config: &SplitConfig,
    rng: &mut StdRng,
) -> (AHashSet<WordId>, AHashSet<WordId>, Vec<WordId>) {
    if config.random_split {
        random_split(state, c, rng)
    } else {
        freq_split(state, c)
    }
}

/// Commits a split of class `c`: `class1_words` stay in `c`,
/// `class2_words` move to a freshly grown class. Returns the new
/// class's id.
pub fn do_split(state: &mut ClassState, c: ClassId, class2_words: &AHashSet<WordId>) -> ClassId {
    let new_c = state.grow_one_class();
    for &w in class2_words {
        state.move_word(w, c, new_c);
        recompute_counts_after_move(state, w, c, new_c);
    }
    new_c
}

pub struct SplitDriver {
    pub config: SplitConfig,
}

impl SplitDriver {
    pub fn new(config: SplitConfig) -> Self {
        SplitDriver { config }
    }

    /// Grows `state` until it has `target_num_classes` classes,
    /// maintaining the super-class bookkeeping used to scope later
    /// `merge` rounds (spec.md's split/merge alternation).
    pub fn run(
        &self,
        state: &mut ClassState,
        super_classes: &mut Vec<AHashSet<ClassId>>,
        super_class_lookup: &mut ahash::AHashMap<ClassId, usize>,
        progress: &Progress,
    ) {
        let mut stoplist: AHashSet<ClassId> = ClassState::reserved_ids().into_iter().collect();
        let mut rng = new_rng(self.config.seed);

        while state.num_classes() < self.config.target_num_classes {
            let candidates = find_candidate_classes(state, &stoplist, 50);
            if candidates.is_empty() {
                progress.info("split: no more splittable classes");
                break;
            }

            let mut best_c = candidates[0];
            let (_, mut best_c2, _) = initial_split(state, best_c, &self.config, &mut rng);

            if self.config.num_eval_classes >= 2 {
                let mut best_delta = f64::NEG_INFINITY;
                for &cand in candidates.iter().take(self.config.num_eval_classes) {
                    let (_, c2, _) = initial_split(state, cand, &self.config, &mut rng);
                    let before = state.log_likelihood();
                    let new_c = do_split(state, cand, &c2);
                    local_exchange(state, cand, new_c, 1);
                    let after = state.log_likelihood();
                    let delta = after - before;
                    commit_merge(state, cand, new_c);

                    if delta > best_delta {
                        best_delta = delta;
                        best_c = cand;
                        best_c2 = c2;
                    }
                    if delta < self.config.ll_threshold {
                        stoplist.insert(cand);
                    }
                }
            }

            let new_c = do_split(state, best_c, &best_c2);
            local_exchange(state, best_c, new_c, self.config.local_exchange_passes);

            let sci = super_class_lookup[&best_c];
            super_classes[sci].insert(new_c);
            super_class_lookup.insert(new_c, sci);

            progress.info(format!(
                "split class {best_c} -> {best_c}/{new_c}, num_classes = {}, ll = {:.6}",
                state.num_classes(),
                state.log_likelihood()
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusCounts;
    use crate::vocab::Vocabulary;
    use ahash::AHashMap;
    use std::io::Cursor;

    fn toy_state() -> (Vocabulary, ClassState) {
        let mut vocab = Vocabulary::new(false);
        let reader = Cursor::new(
            "the dog ran fast\nthe cat ran fast\nthe dog sat down\nthe cat sat down\n\
             a dog barked loudly\na cat meowed loudly\nthe bird flew fast\nthe fish swam down\n",
        );
        let corpus = CorpusCounts::read(reader, &mut vocab, false).unwrap();
        let mut init = AHashMap::new();
        for (id, _) in vocab.iter().collect::<Vec<_>>() {
            if vocab.reserved_class(id).is_some() {
                continue;
            }
            init.insert(id, 3);
        }
        let state = ClassState::new(&vocab, &corpus, &init, 4).unwrap();
        (vocab, state)
    }

    #[test]
    fn freq_split_partitions_without_overlap() {
        let (_, state) = toy_state();
        let (c1, c2, ordered) = freq_split(&state, 3);
        assert!(c1.is_disjoint(&c2));
        assert_eq!(c1.len() + c2.len(), ordered.len());
        assert_eq!(ordered.len(), state.class_size(3));
    }

    #[test]
    fn do_split_preserves_invariants_and_total_mass() {
        let (_, mut state) = toy_state();
        let total_before = state.class_count(3);
        let (_, c2, _) = freq_split(&state, 3);
        let new_c = do_split(&mut state, 3, &c2);
        state.assert_invariants().unwrap();
        assert_eq!(state.class_count(3) + state.class_count(new_c), total_before);
    }

    #[test]
    fn random_split_partitions_without_overlap() {
        let (_, state) = toy_state();
        let mut rng = new_rng(42);
        let (c1, c2, ordered) = random_split(&state, 3, &mut rng);
        assert!(c1.is_disjoint(&c2));
        assert_eq!(c1.len() + c2.len(), ordered.len());
        assert!(!c1.is_empty() && !c2.is_empty());
    }

    #[test]
    fn split_driver_with_random_split_reaches_target_class_count() {
        let (_, mut state) = toy_state();
        let mut super_classes: Vec<AHashSet<ClassId>> = (0..state.num_classes() as ClassId)
            .filter(|&c| state.class_size(c) > 0)
            .map(|c| AHashSet::from_iter([c]))
            .collect();
        let mut lookup: ahash::AHashMap<ClassId, usize> = ahash::AHashMap::new();
        for (i, sc) in super_classes.iter().enumerate() {
            for &c in sc {
                lookup.insert(c, i);
            }
        }
        let driver = SplitDriver::new(SplitConfig {
            target_num_classes: 5,
            random_split: true,
            seed: 7,
            ..Default::default()
        });
        driver.run(&mut state, &mut super_classes, &mut lookup, &Progress::silent());
        assert!(state.num_classes() >= 5);
        state.assert_invariants().unwrap();
    }

    #[test]
    fn split_driver_reaches_target_class_count() {
        let (_, mut state) = toy_state();
        let mut super_classes: Vec<AHashSet<ClassId>> = (0..state.num_classes() as ClassId)
            .filter(|&c| state.class_size(c) > 0)
            .map(|c| AHashSet::from_iter([c]))
            .collect();
        let mut lookup: ahash::AHashMap<ClassId, usize> = ahash::AHashMap::new();
        for (i, sc) in super_classes.iter().enumerate() {
            for &c in sc {
                lookup.insert(c, i);
            }
        }
        let driver = SplitDriver::new(SplitConfig { target_num_classes: 5, ..Default::default() });
        driver.run(&mut state, &mut super_classes, &mut lookup, &Progress::silent());
        assert!(state.num_classes() >= 5);
        state.assert_invariants().unwrap();
    }
}
