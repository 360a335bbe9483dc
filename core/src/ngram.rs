//! The external n-gram collaborator's interface.
//!
//! Everything that reads an ARPA file, smooths probabilities, or
//! compresses a model file lives outside this crate (SPEC_FULL.md §1).
//! What this crate needs from that collaborator is a small, stateful
//! scoring contract over opaque node ids — grounded on
//! `original_source/src/ModelWrappers.hh`'s abstract `LanguageModel`
//! interface, reshaped into idiomatic Rust the way the teacher crate
//! shapes its own external-service traits (`engine.rs`).

/// An opaque position in the n-gram's internal state graph (e.g. an
/// ARPA back-off trie node). Implementations are free to choose any
/// representation; callers never inspect it, only pass it back.
pub type NgramNode = u64;

/// A vocabulary symbol id in the n-gram's own symbol space, which is not
/// assumed to match this crate's `WordId`/`ClassId` spaces — callers
/// translate via `vocabulary_lookup`.
pub type NgramSymbol = u32;

/// The narrow contract this crate needs from an external n-gram model.
///
/// All probabilities are natural-log, matching this crate's convention
/// everywhere else (`add_log_domain_probs` and friends in `perplexity`).
pub trait NgramModel {
    /// Scores symbol `sym` given the model has reached `node`, returning
    /// the natural-log probability and the node to use for the context
    /// that follows.
    fn score(&self, node: NgramNode, sym: NgramSymbol) -> (f64, NgramNode);

    /// Advances the model state by `sym` without requesting a
    /// probability (used when propagating a history whose probability
    /// was already attributed elsewhere, e.g. an OOV sentinel).
    fn advance(&self, node: NgramNode, sym: NgramSymbol) -> NgramNode;

    /// The node representing an empty context.
    fn root_node(&self) -> NgramNode;

    /// The node reached immediately after `<s>`.
    fn sentence_start_node(&self) -> NgramNode;

    /// The model's own symbol id for `</s>`.
    fn sentence_end_symbol(&self) -> NgramSymbol;

    /// The model's own symbol id for `<unk>`.
    fn unk_symbol(&self) -> NgramSymbol;

    /// Maps a vocabulary word to this model's symbol space, `None` if
    /// the model doesn't know the word.
    fn vocabulary_lookup(&self, word: &str) -> Option<NgramSymbol>;

    /// Iterates the outgoing arcs from `node`, each as `(symbol,
    /// log_prob, next_node)`. Used by the segmenter's arc-expansion
    /// fallback for words with no category membership (SPEC_FULL.md §9).
    fn forward_arcs(&self, node: NgramNode) -> Vec<(NgramSymbol, f64, NgramNode)>;
}

/// log(p + q) given log(p) and log(q), the crate's core numerically
/// stable log-domain combination primitive. Grounded on
/// `original_source/src/defs.hh`'s `add_log_domain_probs`.
pub fn add_log_domain_probs(log_a: f64, log_b: f64) -> f64 {
    if log_a == f64::NEG_INFINITY {
        return log_b;
    }
    if log_b == f64::NEG_INFINITY {
        return log_a;
    }
    let (hi, lo) = if log_a > log_b { (log_a, log_b) } else { (log_b, log_a) };
    hi + (lo - hi).exp().ln_1p()
}

/// log(p - q) given log(p) and log(q), `p >= q` required. Grounded on
/// `original_source/src/defs.hh`'s `sub_log_domain_probs`.
pub fn sub_log_domain_probs(log_a: f64, log_b: f64) -> f64 {
    if log_b == f64::NEG_INFINITY {
        return log_a;
    }
    log_a + (-(log_b - log_a).exp()).ln_1p()
}
