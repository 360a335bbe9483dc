//! Category perplexity evaluation: beam-tracked category-history
//! propagation through an external n-gram, plus model interpolation.
//!
//! Grounded on `original_source/CatPerplexity.cc`'s `CategoryHistory`,
//! `propagate_history`, and `likelihood`; `original_source/catintppl.cc`
//! for two-way interpolation; `original_source/catintppl2.cc` for the
//! three-way OOV-charging rule (SPEC_FULL.md §4.14).

use std::collections::VecDeque;

use ahash::AHashMap;

use crate::categories::{CategoryId, Categories};
use crate::ngram::{add_log_domain_probs, NgramModel, NgramNode, NgramSymbol};
use crate::vocab::{Vocabulary, WordId};

/// A bounded window of recent `gen` distributions, used to replay a
/// word sequence's category history through the external n-gram without
/// re-scoring words further back than the n-gram's own order needs.
/// `None` entries are OOV sentinels (SPEC_FULL.md §9).
#[derive(Debug, Clone)]
pub struct CategoryHistory {
    max_len: usize,
    entries: VecDeque<Option<AHashMap<CategoryId, f64>>>,
}

impl CategoryHistory {
    /// `ngram_max_order` is the external model's order; the history
    /// only needs to retain `order - 1` steps of context.
    pub fn new(ngram_max_order: usize) -> Self {
        CategoryHistory { max_len: ngram_max_order.saturating_sub(1).max(1), entries: VecDeque::new() }
    }

    pub fn push(&mut self, probs: Option<AHashMap<CategoryId, f64>>) {
        self.entries.push_back(probs);
        while self.entries.len() > self.max_len {
            self.entries.pop_front();
        }
    }

    pub fn iter_oldest_first(&self) -> impl Iterator<Item = &Option<AHashMap<CategoryId, f64>>> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One beam entry during history propagation: an accumulated
/// log-likelihood and the n-gram node it implies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryToken {
    pub ll: f64,
    pub ngram_node: NgramNode,
}

impl Eq for HistoryToken {}

impl PartialOrd for HistoryToken {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HistoryToken {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ll.partial_cmp(&other.ll).unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// Replays `history` (oldest entry first) through `ngram`, fanning each
/// surviving beam token out over every category of each step and
/// keeping the top `num_tokens` by accumulated log-likelihood after
/// every step. `root_unk_states` selects how `None` (OOV) steps are
/// bridged: `true` resets to `ngram.root_node()`, `false` advances by
/// `ngram.unk_symbol()`.
///
/// Grounded on `propagate_history`. The C++ original's `beam` parameter
/// is accepted but unused in the body — kept here as an unused parameter
/// for the same reason: the surviving literature and this crate's own
/// tests treat `num_tokens` as the sole width control.
pub fn propagate_history<M: NgramModel>(
    history: &CategoryHistory,
    ngram: &M,
    indexmap: &AHashMap<CategoryId, NgramSymbol>,
    num_tokens: usize,
    root_unk_states: bool,
    _beam: f64,
) -> Vec<HistoryToken> {
    let mut queue = vec![HistoryToken { ll: 0.0, ngram_node: ngram.sentence_start_node() }];

    for step in history.iter_oldest_first() {
        let mut next: Vec<HistoryToken> = Vec::new();
        match step {
            None => {
                for tok in queue.iter().take(num_tokens) {
                    let node = if root_unk_states {
                        ngram.root_node()
                    } else {
                        ngram.advance(tok.ngram_node, ngram.unk_symbol())
                    };
                    next.push(HistoryToken { ll: tok.ll, ngram_node: node });
                }
            }
            Some(probs) => {
                for tok in queue.iter().take(num_tokens) {
                    for (&c, &lp) in probs {
                        let Some(&sym) = indexmap.get(&c) else { continue };
                        let node = ngram.advance(tok.ngram_node, sym);
                        next.push(HistoryToken { ll: tok.ll + lp, ngram_node: node });
                    }
                }
            }
        }
        next.sort_by(|a, b| b.cmp(a));
        next.truncate(num_tokens.max(1));
        queue = next;
    }

    queue.sort_by(|a, b| b.cmp(a));
    queue.truncate(num_tokens.max(1));
    queue
}

pub struct CategoryPerplexityConfig {
    pub num_tokens: usize,
    pub root_unk_states: bool,
    pub beam: f64,
}

impl Default for CategoryPerplexityConfig {
    fn default() -> Self {
        CategoryPerplexityConfig { num_tokens: 50, root_unk_states: false, beam: f64::NEG_INFINITY }
    }
}

#[derive(Debug, Default)]
pub struct CategoryPerplexityStats {
    pub num_words: u64,
    pub num_oov: u64,
    pub total_ll: f64,
}

pub struct CategoryPerplexity<'a, M: NgramModel> {
    categories: &'a Categories,
    ngram: &'a M,
    indexmap: &'a AHashMap<CategoryId, NgramSymbol>,
    vocab: &'a Vocabulary,
    config: CategoryPerplexityConfig,
    history: CategoryHistory,
    pub stats: CategoryPerplexityStats,
}

impl<'a, M: NgramModel> CategoryPerplexity<'a, M> {
    pub fn new(
        categories: &'a Categories,
        ngram: &'a M,
        indexmap: &'a AHashMap<CategoryId, NgramSymbol>,
        vocab: &'a Vocabulary,
        ngram_max_order: usize,
        config: CategoryPerplexityConfig,
    ) -> Self {
        CategoryPerplexity {
            categories,
            ngram,
            indexmap,
            vocab,
            config,
            history: CategoryHistory::new(ngram_max_order),
            stats: CategoryPerplexityStats::default(),
        }
    }

    /// Scores one word, updating `self.stats` and the rolling category
    /// history. Grounded on `likelihood`: classify, then branch on
    /// sentence-end / OOV / normal.
    pub fn likelihood(&mut self, w: WordId) -> f64 {
        if w == self.vocab.sentence_end_id() {
            let tokens = propagate_history(
                &self.history,
                self.ngram,
                self.indexmap,
                self.config.num_tokens,
                self.config.root_unk_states,
                self.config.beam,
            );
            let sym = self.ngram.sentence_end_symbol();
            let mut combined = f64::NEG_INFINITY;
            for tok in &tokens {
                let (lp, _) = self.ngram.score(tok.ngram_node, sym);
                combined = add_log_domain_probs(combined, tok.ll + lp);
            }
            self.stats.total_ll += combined;
            return combined;
        }

        let mem = self.categories.mem_probs(w).filter(|m| !m.is_empty());
        let gen = self.categories.gen_probs(w).filter(|m| !m.is_empty());

        let (mem, gen) = match (mem, gen) {
            (Some(m), Some(g)) => (m, g),
            _ => {
                self.stats.num_oov += 1;
                self.history.push(None);
                return 0.0;
            }
        };

        let tokens = propagate_history(
            &self.history,
            self.ngram,
            self.indexmap,
            self.config.num_tokens,
            self.config.root_unk_states,
            self.config.beam,
        );

        let mut combined = f64::NEG_INFINITY;
        for tok in &tokens {
            for (&c, &mem_lp) in mem {
                let Some(&sym) = self.indexmap.get(&c) else { continue };
                let (ngram_lp, _) = self.ngram.score(tok.ngram_node, sym);
                combined = add_log_domain_probs(combined, tok.ll + mem_lp + ngram_lp);
            }
        }

        self.stats.num_words += 1;
        self.stats.total_ll += combined;
        self.history.push(Some(gen.clone()));
        combined
    }

    pub fn perplexity(&self) -> f64 {
        if self.stats.num_words == 0 {
            return f64::INFINITY;
        }
        (-self.stats.total_ll / self.stats.num_words as f64).exp()
    }
}

/// Two-way log-linear interpolation: `log(w1*exp(ll1) + w2*exp(ll2))`
/// expressed via the log-sum-exp primitive, with `w1 + w2` expected (but
/// not required) to equal 1. Grounded on `original_source/catintppl.cc`.
pub fn interpolate2(ll1: f64, log_w1: f64, ll2: f64, log_w2: f64) -> f64 {
    add_log_domain_probs(ll1 + log_w1, ll2 + log_w2)
}

/// Three-way interpolation with the OOV bookkeeping supplemented from
/// `original_source/catintppl2.cc`: a word is OOV for the perplexity
/// denominator unless at least one component model scored it, but every
/// in-vocabulary component still contributes its score when combining.
pub fn interpolate3(
    scores: [Option<f64>; 3],
    log_weights: [f64; 3],
) -> Option<f64> {
    let mut combined = f64::NEG_INFINITY;
    let mut any = false;
    for (score, log_w) in scores.into_iter().zip(log_weights) {
        if let Some(ll) = score {
            combined = add_log_domain_probs(combined, ll + log_w);
            any = true;
        }
    }
    any.then_some(combined)
}
