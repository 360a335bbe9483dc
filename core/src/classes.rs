//! Hard class-partition state: the counts an `Exchange`/`Merge`/`Split`
//! driver mutates, plus the exact partition log-likelihood.
//!
//! Grounded on `original_source/ExchangeAlgorithm.hh` for the member
//! layout (`m_classes`, `m_word_classes`, `m_class_counts`,
//! `m_class_bigram_counts`, `m_class_word_counts`, `m_word_class_counts`)
//! and `original_source/ExchangeAlgorithm.cc`'s `log_likelihood()` for
//! the formula.

use ahash::{AHashMap, AHashSet};

use crate::corpus::CorpusCounts;
use crate::error::{Error, Result};
use crate::vocab::{ClassId, Vocabulary, WordId, START_CLASS, UNK_CLASS, WB_CLASS};

fn xlogx(n: u64) -> f64 {
    if n == 0 {
        0.0
    } else {
        let n = n as f64;
        n * n.ln()
    }
}

/// The full mutable state an Exchange/Merge/Split driver operates on.
#[derive(Debug, Clone)]
pub struct ClassState {
    num_special_classes: ClassId,
    word_class: AHashMap<WordId, ClassId>,
    classes: Vec<AHashSet<WordId>>,
    word_count: AHashMap<WordId, u64>,
    class_count: Vec<u64>,
    class_bigram: Vec<Vec<u64>>,
    /// `cw_count[w][c]` = Σ_{w'∈c} bigram(w', w) — incoming mass from class `c` into word `w`.
    cw_count: AHashMap<WordId, AHashMap<ClassId, u64>>,
    /// `wc_count[w][c]` = Σ_{w'∈c} bigram(w, w') — outgoing mass from word `w` into class `c`.
    wc_count: AHashMap<WordId, AHashMap<ClassId, u64>>,
    /// bigram(w, w) — a word's self-transition count, constant across
    /// the whole run (class moves never change corpus counts). Needed
    /// by the Δ-evaluator to avoid double-counting a word's self-loop
    /// when it crosses a class boundary.
    self_bigram: AHashMap<WordId, u64>,
    /// Immutable per-word-pair corpus counts, needed to re-derive a
    /// neighbor's wc/cw entries whenever a word changes class. These
    /// never change after construction — only class membership does.
    forward_bigram: AHashMap<WordId, AHashMap<WordId, u64>>,
    reverse_bigram: AHashMap<WordId, AHashMap<WordId, u64>>,
}

impl ClassState {
    /// Builds class state from corpus counts and an initial partition.
    /// `initial_class[w]` must already place reserved words in their
    /// reserved classes; `num_classes` is the total slot count
    /// (including the reserved classes).
    pub fn new(
        vocab: &Vocabulary,
        corpus: &CorpusCounts,
        initial_class: &AHashMap<WordId, ClassId>,
        num_classes: usize,
    ) -> Result<Self> {
        let num_special = if vocab.word_boundary_id().is_some() { WB_CLASS + 1 } else { UNK_CLASS + 1 };
        if num_classes <= num_special as usize {
            return Err(Error::config_conflict(format!(
                "num_classes ({num_classes}) leaves no room beyond the {num_special} reserved classes"
            )));
        }
        let mut state = ClassState {
            num_special_classes: num_special,
            word_class: AHashMap::new(),
            classes: vec![AHashSet::new(); num_classes],
            word_count: corpus.word_count.clone(),
            class_count: vec![0; num_classes],
            class_bigram: vec![vec![0; num_classes]; num_classes],
            cw_count: AHashMap::new(),
            wc_count: AHashMap::new(),
            self_bigram: AHashMap::new(),
            forward_bigram: corpus.word_bigram.clone(),
            reverse_bigram: corpus.word_rev_bigram.clone(),
        };

        for (id, _) in vocab.iter() {
            let reserved = vocab.reserved_class(id);
            let c = match reserved {
                Some(rc) => rc,
                None => *initial_class.get(&id).ok_or_else(|| {
                    Error::invariant(format!("word {id} has no initial class assignment"))
                })?,
            };
            if (c as usize) >= num_classes {
                return Err(Error::invariant(format!("class {c} out of range ({num_classes} slots)")));
            }
            state.word_class.insert(id, c);
            state.classes[c as usize].insert(id);
        }

        for (&w, &n) in &state.word_count {
            let c = state.class(w);
            state.class_count[c as usize] += n;
        }

        for (&w1, inner) in &corpus.word_bigram {
            let c1 = state.class(w1);
            for (&w2, &n) in inner {
                let c2 = state.class(w2);
                state.class_bigram[c1 as usize][c2 as usize] += n;
                *state.wc_count.entry(w1).or_default().entry(c2).or_insert(0) += n;
                *state.cw_count.entry(w2).or_default().entry(c1).or_insert(0) += n;
                if w1 == w2 {
                    *state.self_bigram.entry(w1).or_insert(0) += n;
                }
            }
        }

        Ok(state)
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn num_special_classes(&self) -> ClassId {
        self.num_special_classes
    }

    pub fn is_reserved(&self, c: ClassId) -> bool {
        c < self.num_special_classes
    }

    pub fn class(&self, w: WordId) -> ClassId {
        self.word_class[&w]
    }

    pub fn members(&self, c: ClassId) -> &AHashSet<WordId> {
        &self.classes[c as usize]
    }

    pub fn class_size(&self, c: ClassId) -> usize {
        self.classes[c as usize].len()
    }

    pub fn word_count(&self, w: WordId) -> u64 {
        self.word_count.get(&w).copied().unwrap_or(0)
    }

    pub fn class_count(&self, c: ClassId) -> u64 {
        self.class_count[c as usize]
    }

    pub fn class_bigram(&self, c1: ClassId, c2: ClassId) -> u64 {
        self.class_bigram[c1 as usize][c2 as usize]
    }

    pub fn cw_count(&self, w: WordId, c: ClassId) -> u64 {
        self.cw_count.get(&w).and_then(|m| m.get(&c)).copied().unwrap_or(0)
    }

    pub fn wc_count(&self, w: WordId, c: ClassId) -> u64 {
        self.wc_count.get(&w).and_then(|m| m.get(&c)).copied().unwrap_or(0)
    }

    pub fn self_bigram(&self, w: WordId) -> u64 {
        self.self_bigram.get(&w).copied().unwrap_or(0)
    }

    /// Words `w` sends bigram mass to, i.e. edges `w -> w2`, excluding
    /// the self-loop.
    pub(crate) fn forward_neighbors(&self, w: WordId) -> impl Iterator<Item = (WordId, u64)> + '_ {
        self.forward_bigram.get(&w).into_iter().flat_map(move |m| {
            m.iter().filter(move |&(&w2, _)| w2 != w).map(|(&w2, &n)| (w2, n))
        })
    }

    /// Words that send bigram mass to `w`, i.e. edges `w2 -> w`,
    /// excluding the self-loop.
    pub(crate) fn reverse_neighbors(&self, w: WordId) -> impl Iterator<Item = (WordId, u64)> + '_ {
        self.reverse_bigram.get(&w).into_iter().flat_map(move |m| {
            m.iter().filter(move |&(&w2, _)| w2 != w).map(|(&w2, &n)| (w2, n))
        })
    }

    pub fn cw_entries(&self, w: WordId) -> impl Iterator<Item = (ClassId, u64)> + '_ {
        self.cw_count.get(&w).into_iter().flat_map(|m| m.iter().map(|(&c, &n)| (c, n)))
    }

    pub fn wc_entries(&self, w: WordId) -> impl Iterator<Item = (ClassId, u64)> + '_ {
        self.wc_count.get(&w).into_iter().flat_map(|m| m.iter().map(|(&c, &n)| (c, n)))
    }

    /// Every word's current class, for serializing `<model>.classes`.
    pub fn word_classes(&self) -> impl Iterator<Item = (WordId, ClassId)> + '_ {
        self.word_class.iter().map(|(&w, &c)| (w, c))
    }

    /// L = Σ N(c,c')·log N(c,c') + Σ N(w)·log N(w) − 2·Σ N(c)·log N(c),
    /// with the convention `0·log0 ≡ 0`. Exact (no Δ reuse); used to
    /// validate the Δ-evaluator and for periodic progress reporting.
    pub fn log_likelihood(&self) -> f64 {
        let mut ll = 0.0;
        for row in &self.class_bigram {
            for &n in row {
                ll += xlogx(n);
            }
        }
        for &n in self.word_count.values() {
            ll += xlogx(n);
        }
        for &n in &self.class_count {
            ll -= 2.0 * xlogx(n);
        }
        ll
    }

    /// Panics-free structural invariant check used by tests and by the
    /// drivers' periodic self-checks (spec §8).
    pub fn assert_invariants(&self) -> Result<()> {
        let mut seen: AHashSet<WordId> = AHashSet::new();
        for (c, members) in self.classes.iter().enumerate() {
            let mut sum = 0u64;
            for &w in members {
                if self.word_class[&w] != c as ClassId {
                    return Err(Error::invariant(format!(
                        "word {w} claims class {} but lives in classes[{c}]",
                        self.word_class[&w]
                    )));
                }
                if !seen.insert(w) {
                    return Err(Error::invariant(format!("word {w} present in more than one class")));
                }
                sum += self.word_count(w);
            }
            if sum != self.class_count[c] {
                return Err(Error::invariant(format!(
                    "class {c} count {} does not match summed member counts {sum}",
                    self.class_count[c]
                )));
            }
        }
        if seen.len() != self.word_class.len() {
            return Err(Error::invariant("some words are not assigned to any class"));
        }
        Ok(())
    }

    pub(crate) fn reserved_ids() -> [ClassId; 2] {
        [START_CLASS, UNK_CLASS]
    }

    // --- mutation primitives used only by `exchange`/`merge`/`split` ---

    pub(crate) fn move_word(&mut self, w: WordId, from: ClassId, to: ClassId) {
        self.classes[from as usize].remove(&w);
        self.classes[to as usize].insert(w);
        self.word_class.insert(w, to);
    }

    pub(crate) fn add_class_count(&mut self, c: ClassId, delta: i64) {
        let cur = self.class_count[c as usize] as i64;
        self.class_count[c as usize] = (cur + delta).max(0) as u64;
    }

    pub(crate) fn add_class_bigram(&mut self, c1: ClassId, c2: ClassId, delta: i64) {
        let cur = self.class_bigram[c1 as usize][c2 as usize] as i64;
        self.class_bigram[c1 as usize][c2 as usize] = (cur + delta).max(0) as u64;
    }

    pub(crate) fn set_cw_count(&mut self, w: WordId, c: ClassId, n: u64) {
        if n == 0 {
            if let Some(m) = self.cw_count.get_mut(&w) {
                m.remove(&c);
            }
        } else {
            self.cw_count.entry(w).or_default().insert(c, n);
        }
    }

    pub(crate) fn set_wc_count(&mut self, w: WordId, c: ClassId, n: u64) {
        if n == 0 {
            if let Some(m) = self.wc_count.get_mut(&w) {
                m.remove(&c);
            }
        } else {
            self.wc_count.entry(w).or_default().insert(c, n);
        }
    }

    pub(crate) fn adjust_cw_count(&mut self, w: WordId, c: ClassId, delta: i64) {
        let cur = self.cw_count(w, c) as i64;
        self.set_cw_count(w, c, (cur + delta).max(0) as u64);
    }

    pub(crate) fn adjust_wc_count(&mut self, w: WordId, c: ClassId, delta: i64) {
        let cur = self.wc_count(w, c) as i64;
        self.set_wc_count(w, c, (cur + delta).max(0) as u64);
    }

    pub(crate) fn grow_one_class(&mut self) -> ClassId {
        let id = self.classes.len() as ClassId;
        self.classes.push(AHashSet::new());
        self.class_count.push(0);
        for row in &mut self.class_bigram {
            row.push(0);
        }
        self.class_bigram.push(vec![0; self.classes.len()]);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::Vocabulary;
    use std::io::Cursor;

    fn toy_state() -> (Vocabulary, ClassState) {
        let mut vocab = Vocabulary::new(false);
        let reader = Cursor::new("the dog ran\nthe cat ran\nthe dog sat\n");
        let corpus = CorpusCounts::read(reader, &mut vocab, false).unwrap();

        let the = vocab.lookup("the").unwrap();
        let dog = vocab.lookup("dog").unwrap();
        let cat = vocab.lookup("cat").unwrap();
        let ran = vocab.lookup("ran").unwrap();
        let sat = vocab.lookup("sat").unwrap();

        let mut init = AHashMap::new();
        init.insert(the, 3);
        init.insert(dog, 3);
        init.insert(cat, 4);
        init.insert(ran, 4);
        init.insert(sat, 4);

        let state = ClassState::new(&vocab, &corpus, &init, 5).unwrap();
        (vocab, state)
    }

    #[test]
    fn invariants_hold_after_construction() {
        let (_, state) = toy_state();
        state.assert_invariants().unwrap();
    }

    #[test]
    fn log_likelihood_is_finite_and_deterministic() {
        let (_, state) = toy_state();
        let a = state.log_likelihood();
        let b = state.log_likelihood();
        assert!(a.is_finite());
        assert_eq!(a, b);
    }

    #[test]
    fn reserved_words_sit_in_reserved_classes() {
        let (vocab, state) = toy_state();
        assert_eq!(state.class(vocab.sentence_begin_id()), START_CLASS);
        assert_eq!(state.class(vocab.unk_id()), UNK_CLASS);
    }
}
