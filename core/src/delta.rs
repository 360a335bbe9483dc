//! Incremental Δ log-likelihood evaluation for exchange, merge, and
//! split candidates.
//!
//! Grounded on `original_source/ExchangeAlgorithm.cc`'s `evaluate_ll_diff`
//! / `evaluate_exchange` / `evaluate_merge` and `original_source/Merging.cc`'s
//! duplicate of the same arithmetic — unified here into one module shared
//! by `exchange`, `merge`, and `split` instead of being copy-pasted per
//! driver as in the C++ original.
//!
//! Every function here is a pure read of `&ClassState`; none mutate. Only
//! the cells the candidate move actually touches are recomputed, so cost
//! is proportional to the moved word's/class's bigram neighborhood, never
//! to the full class-by-class table.

use ahash::AHashMap;

use crate::classes::ClassState;
use crate::vocab::{ClassId, WordId};

fn xlogx(n: u64) -> f64 {
    if n == 0 {
        0.0
    } else {
        let n = n as f64;
        n * n.ln()
    }
}

fn cell_delta(old: u64, new_: u64) -> f64 {
    xlogx(new_) - xlogx(old)
}

/// Δ log-likelihood of moving word `w` out of its current class into
/// `target`. `target` must differ from `w`'s current class and must not
/// be a reserved class (the caller enforces that restriction; this
/// function is agnostic to reservation status).
pub fn evaluate_exchange(state: &ClassState, w: WordId, target: ClassId) -> f64 {
    let cur = state.class(w);
    if cur == target {
        return 0.0;
    }
    let n_w = state.word_count(w);
    let self_count = state.self_bigram(w);

    let mut touched: AHashMap<(ClassId, ClassId), (u64, u64)> = AHashMap::new();
    let mut touch = |c1: ClassId, c2: ClassId, new_val: u64| {
        let old = state.class_bigram(c1, c2);
        touched.insert((c1, c2), (old, new_val));
    };

    let wc_a = state.wc_count(w, cur);
    let wc_b = state.wc_count(w, target);
    let cw_a = state.cw_count(w, cur);
    let cw_b = state.cw_count(w, target);

    touch(cur, cur, state.class_bigram(cur, cur) - wc_a - cw_a + self_count);
    touch(target, target, state.class_bigram(target, target) + wc_b + cw_b + self_count);
    touch(cur, target, state.class_bigram(cur, target) - wc_b + cw_a - self_count);
    touch(target, cur, state.class_bigram(target, cur) - cw_b + wc_a - self_count);

    for (c, n) in state.wc_entries(w) {
        if c == cur || c == target {
            continue;
        }
        touch(cur, c, state.class_bigram(cur, c) - n);
        touch(target, c, state.class_bigram(target, c) + n);
    }
    for (c, n) in state.cw_entries(w) {
        if c == cur || c == target {
            continue;
        }
        touch(c, cur, state.class_bigram(c, cur) - n);
        touch(c, target, state.class_bigram(c, target) + n);
    }

    let mut delta = 0.0;
    for (old, new_) in touched.values() {
        delta += cell_delta(*old, *new_);
    }

    let cur_count = state.class_count(cur);
    let target_count = state.class_count(target);
    delta -= 2.0 * cell_delta(cur_count, cur_count - n_w);
    delta -= 2.0 * cell_delta(target_count, target_count + n_w);

    delta
}

/// Δ log-likelihood of merging `b` into `a` (all of `b`'s members move
/// into `a`, `b` becomes empty). Grounded on `evaluate_merge`'s
/// off-diagonal row/column collapse plus the four-cell diagonal
/// collapse.
pub fn evaluate_merge(state: &ClassState, a: ClassId, b: ClassId) -> f64 {
    if a == b {
        return 0.0;
    }
    let mut touched: AHashMap<(ClassId, ClassId), (u64, u64)> = AHashMap::new();
    let mut touch = |c1: ClassId, c2: ClassId, new_val: u64| {
        let old = state.class_bigram(c1, c2);
        touched.entry((c1, c2)).or_insert((old, old));
        touched.get_mut(&(c1, c2)).unwrap().1 = new_val;
    };

    for c in 0..state.num_classes() as ClassId {
        if c == a || c == b {
            continue;
        }
        touch(a, c, state.class_bigram(a, c) + state.class_bigram(b, c));
        touch(c, a, state.class_bigram(c, a) + state.class_bigram(c, b));
        touch(b, c, 0);
        touch(c, b, 0);
    }

    let aa = state.class_bigram(a, a);
    let ab = state.class_bigram(a, b);
    let ba = state.class_bigram(b, a);
    let bb = state.class_bigram(b, b);
    touch(a, a, aa + ab + ba + bb);
    touch(a, b, 0);
    touch(b, a, 0);
    touch(b, b, 0);

    let mut delta = 0.0;
    for (old, new_) in touched.values() {
        delta += cell_delta(*old, *new_);
    }

    let a_count = state.class_count(a);
    let b_count = state.class_count(b);
    delta -= 2.0 * cell_delta(a_count, a_count + b_count);
    delta -= 2.0 * cell_delta(b_count, 0);

    delta
}

/// Δ log-likelihood of splitting class `c` into the two word sets given
/// (both must partition `c`'s current members), evaluated as a merge
/// undo in reverse: `evaluate_split` is exactly `-evaluate_merge` applied
/// to the resulting two-class state, so the driver computes it by first
/// materializing the tentative split (`ClassState::new`-free, via
/// `split::apply_split`) — see `split.rs`. This module only provides the
/// bigram cell helper shared by that path; the actual split Δ is the
/// commit-and-remeasure performed by `split::SplitDriver` since a true
/// incremental two-class split recompute (without committing) requires
/// knowing the full bigram breakdown of `c`'s internal traffic, which the
/// aggregated `ClassState` does not retain once words have been merged
/// into `c`. This matches `original_source/split.cc`: splits are scored
/// by tentatively committing, local-exchanging, measuring, then undoing
/// via `do_merge`, never via a closed-form Δ.
pub fn evaluate_split_by_remeasure(before: f64, after: f64) -> f64 {
    after - before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusCounts;
    use crate::vocab::Vocabulary;
    use std::io::Cursor;

    fn toy_state() -> (Vocabulary, ClassState) {
        let mut vocab = Vocabulary::new(false);
        let reader = Cursor::new(
            "the dog ran fast\nthe cat ran fast\nthe dog sat down\nthe cat sat down\na dog barked\n",
        );
        let corpus = CorpusCounts::read(reader, &mut vocab, false).unwrap();

        let mut init = AHashMap::new();
        for (id, w) in vocab.iter().collect::<Vec<_>>() {
            if vocab.reserved_class(id).is_some() {
                continue;
            }
            let c = if matches!(w, "dog" | "cat" | "a") { 3 } else { 4 };
            init.insert(id, c);
        }
        let state = ClassState::new(&vocab, &corpus, &init, 5).unwrap();
        (vocab, state)
    }

    #[test]
    fn exchange_delta_matches_full_recompute() {
        let (vocab, mut state) = toy_state();
        let w = vocab.lookup("dog").unwrap();
        let cur = state.class(w);
        let target = if cur == 3 { 4 } else { 3 };

        let before = state.log_likelihood();
        let predicted_delta = evaluate_exchange(&state, w, target);

        state.move_word(w, cur, target);
        crate::exchange::recompute_counts_after_move(&mut state, w, cur, target);
        let after = state.log_likelihood();

        assert!((after - before - predicted_delta).abs() < 1e-6,
            "predicted {predicted_delta}, actual {}", after - before);
    }

    #[test]
    fn merge_delta_matches_full_recompute() {
        let (_, mut state) = toy_state();
        let before = state.log_likelihood();
        let predicted_delta = evaluate_merge(&state, 3, 4);

        crate::merge::commit_merge(&mut state, 3, 4);
        let after = state.log_likelihood();

        assert!((after - before - predicted_delta).abs() < 1e-6,
            "predicted {predicted_delta}, actual {}", after - before);
    }

    #[test]
    fn exchange_into_same_class_is_a_no_op() {
        let (vocab, state) = toy_state();
        let w = vocab.lookup("dog").unwrap();
        let cur = state.class(w);
        assert_eq!(evaluate_exchange(&state, w, cur), 0.0);
    }
}
