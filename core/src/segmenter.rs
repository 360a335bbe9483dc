//! Category-aware token-passing beam segmenter.
//!
//! Grounded on `original_source/Categories.cc`'s `segment_sent`,
//! `histogram_prune`, and `collect_stats`. Tokens are arena-indexed
//! (`Vec<Token>` plus a `prev: Option<u32>` back-pointer) rather than
//! heap-allocated and linked, per SPEC_FULL.md's design-note 9.1.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::categories::{CategoryId, Categories, NO_CATEGORY};
use crate::error::{Error, Result};
use crate::ngram::{add_log_domain_probs, NgramModel, NgramNode, NgramSymbol};
use crate::vocab::WordId;

#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub category: CategoryId,
    pub ngram_node: NgramNode,
    pub lp: f64,
    /// `gen[word][category]` for the word this token was created from —
    /// `0.0` for the synthetic root and for `NO_CATEGORY` tokens. Summed
    /// over a token's last `order-1` predecessors by `gen_context_lp` to
    /// fold the category-generation term into a descendant's score.
    pub gen_lp: f64,
    pub prev: Option<u32>,
}

/// OOV tagging mode (spec.md:144). `First` tags only the first OOV word
/// in a sentence and `<unk>`-advances every OOV after it; `All` tags
/// every OOV; `No` never tags and always `<unk>`-advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OovPolicy {
    First,
    All,
    No,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    pub beam_width: usize,
    pub final_beam_width: usize,
    pub oov_policy: OovPolicy,
    /// Caps the number of arc-derived category hypotheses branched per
    /// token when an OOV word is tagged.
    pub top_k: usize,
    /// The external n-gram's order; `order - 1` is the number of
    /// predecessor tokens `gen_context_lp` sums over.
    pub order: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        SegmenterConfig { beam_width: 100, final_beam_width: 50, oov_policy: OovPolicy::No, top_k: 20, order: 3 }
    }
}

/// The result of segmenting one sentence: the full token arena plus the
/// indices of the surviving beam at the final position.
pub struct SegmentationResult {
    pub arena: Vec<Token>,
    pub frontier: Vec<u32>,
}

/// Approximate top-`keep` selection over `scores` (higher is better),
/// returning the indices (into `scores`) to keep.
///
/// Grounded verbatim on `histogram_prune`: a degenerate score range
/// falls back to a plain truncation (not a sorted top-k); otherwise a
/// 100-bin histogram over `[worst, best]` is used to find a score
/// cutoff whose cumulative bin count is closest to `keep`, with a
/// safety-net sort-and-truncate if the cutoff keeps more than `2*keep`.
pub fn histogram_prune(scores: &[f64], keep: usize) -> Vec<usize> {
    if scores.len() <= keep {
        return (0..scores.len()).collect();
    }

    let best = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let worst = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let range = best - worst;

    if range <= 0.0 {
        return (0..keep).collect();
    }

    const NUM_BINS: usize = 100;
    let mut bin_counts = [0usize; NUM_BINS];
    let bin_of = |score: f64| -> usize {
        let b = ((99.0 * (best - score) / range).round()) as i64;
        b.clamp(0, (NUM_BINS - 1) as i64) as usize
    };
    for &s in scores {
        bin_counts[bin_of(s)] += 1;
    }

    let mut cumulative = 0usize;
    let mut bin_limit = NUM_BINS - 1;
    for (bin, &count) in bin_counts.iter().enumerate() {
        cumulative += count;
        if cumulative >= keep {
            bin_limit = bin;
            break;
        }
    }

    let mut kept: Vec<usize> = scores
        .iter()
        .enumerate()
        .filter(|&(_, &s)| bin_of(s) <= bin_limit)
        .map(|(i, _)| i)
        .collect();

    if kept.len() > 2 * keep {
        kept.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap());
        kept.truncate(keep);
    }

    kept
}

/// Sums `gen_lp` over `start` and up to `steps - 1` of its predecessors,
/// stopping early at the root. Grounded on spec.md:145's "Gen context":
/// `p(cᵢ|wᵢ₋ₖ…wᵢ)` is approximated by summing the per-word `gen_lp`
/// terms over the last `order-1` tokens in the chain.
fn gen_context_lp(arena: &[Token], start: u32, steps: usize) -> f64 {
    let mut sum = 0.0;
    let mut cur = Some(start);
    for _ in 0..steps {
        match cur {
            Some(idx) => {
                let tok = arena[idx as usize];
                sum += tok.gen_lp;
                cur = tok.prev;
            }
            None => break,
        }
    }
    sum
}

fn expand_arc_candidates<M: NgramModel>(
    frontier: &[u32],
    arena: &[Token],
    ngram: &M,
    top_k: usize,
    candidates: &mut Vec<Token>,
) {
    let skip = [ngram.sentence_end_symbol(), ngram.unk_symbol()];
    for &tok_idx in frontier {
        let tok = arena[tok_idx as usize];
        let mut arcs: Vec<(NgramSymbol, f64, NgramNode)> =
            ngram.forward_arcs(tok.ngram_node).into_iter().filter(|&(sym, _, _)| !skip.contains(&sym)).collect();
        arcs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        arcs.truncate(top_k.max(1));
        for (_, arc_lp, next_node) in arcs {
            candidates.push(Token {
                category: NO_CATEGORY,
                ngram_node: next_node,
                lp: tok.lp + arc_lp,
                gen_lp: 0.0,
                prev: Some(tok_idx),
            });
        }
    }
}

fn advance_unk_candidates<M: NgramModel>(frontier: &[u32], arena: &[Token], ngram: &M, candidates: &mut Vec<Token>) {
    for &tok_idx in frontier {
        let tok = arena[tok_idx as usize];
        let (unk_lp, next_node) = ngram.score(tok.ngram_node, ngram.unk_symbol());
        candidates.push(Token {
            category: NO_CATEGORY,
            ngram_node: next_node,
            lp: tok.lp + unk_lp,
            gen_lp: 0.0,
            prev: Some(tok_idx),
        });
    }
}

/// Segments `words` (a plain word sequence, no `<s>`/`</s>` markers)
/// into a beam of category-tagged token paths.
///
/// `indexmap` translates a category id into the n-gram's own symbol
/// space, built by the caller from whatever vocabulary correspondence
/// the external n-gram exposes.
pub fn segment_sentence<M: NgramModel>(
    words: &[WordId],
    categories: &Categories,
    ngram: &M,
    indexmap: &AHashMap<CategoryId, NgramSymbol>,
    config: &SegmenterConfig,
) -> Result<SegmentationResult> {
    let mut arena =
        vec![Token { category: NO_CATEGORY, ngram_node: ngram.sentence_start_node(), lp: 0.0, gen_lp: 0.0, prev: None }];
    let mut frontier: Vec<u32> = vec![0];
    let ctx_steps = config.order.saturating_sub(1);
    let mut oov_tagged = false;

    for (pos, &w) in words.iter().enumerate() {
        let is_last = pos + 1 == words.len();
        let mem = categories.mem_probs(w).filter(|m| !m.is_empty());

        let mut candidates: Vec<Token> = Vec::new();

        match mem {
            Some(mem) => {
                for &tok_idx in &frontier {
                    let tok = arena[tok_idx as usize];
                    let ctx_lp = gen_context_lp(&arena, tok_idx, ctx_steps);
                    for (&c, &mem_lp) in mem {
                        let sym = match indexmap.get(&c) {
                            Some(&s) => s,
                            None => continue,
                        };
                        let (ngram_lp, next_node) = ngram.score(tok.ngram_node, sym);
                        let gen_lp = categories.gen_probs(w).and_then(|g| g.get(&c)).copied().unwrap_or(0.0);
                        candidates.push(Token {
                            category: c,
                            ngram_node: next_node,
                            lp: tok.lp + ctx_lp + ngram_lp + mem_lp,
                            gen_lp,
                            prev: Some(tok_idx),
                        });
                    }
                }
            }
            None => {
                let tag_this_one = match config.oov_policy {
                    OovPolicy::All => true,
                    OovPolicy::First => !oov_tagged,
                    OovPolicy::No => false,
                };
                if tag_this_one {
                    expand_arc_candidates(&frontier, &arena, ngram, config.top_k, &mut candidates);
                    oov_tagged = true;
                } else {
                    advance_unk_candidates(&frontier, &arena, ngram, &mut candidates);
                }
            }
        }

        if candidates.is_empty() {
            return Err(Error::empty_beam(format!("no candidate tokens survived at position {pos}")));
        }

        let keep = if is_last { config.final_beam_width } else { config.beam_width };
        let scores: Vec<f64> = candidates.iter().map(|t| t.lp).collect();
        let keep_idx = histogram_prune(&scores, keep);

        let base = arena.len() as u32;
        frontier.clear();
        for (new_offset, idx) in keep_idx.into_iter().enumerate() {
            arena.push(candidates[idx]);
            frontier.push(base + new_offset as u32);
        }
    }

    Ok(SegmentationResult { arena, frontier })
}

/// Accumulates fractional EM statistics from a completed segmentation
/// into `categories`, returning the sentence's total log-probability
/// (for perplexity diagnostics), or `0.0` if the beam was empty or the
/// total was non-finite — matching `collect_stats`'s "empty/NaN skip"
/// behavior rather than propagating an error for what is, at this
/// stage, an expected corner case of beam search.
pub fn collect_stats(
    result: &SegmentationResult,
    words: &[WordId],
    categories: &mut Categories,
) -> f64 {
    if result.frontier.is_empty() {
        return 0.0;
    }

    let total_lp = result
        .frontier
        .iter()
        .map(|&idx| result.arena[idx as usize].lp)
        .fold(f64::NEG_INFINITY, add_log_domain_probs);

    if !total_lp.is_finite() {
        return 0.0;
    }

    for &final_idx in &result.frontier {
        let lp = (result.arena[final_idx as usize].lp - total_lp).min(0.0);
        let weight = lp.exp();

        let mut path: Vec<(usize, CategoryId)> = Vec::with_capacity(words.len());
        let mut cur = Some(final_idx);
        let mut pos = words.len();
        while let Some(idx) = cur {
            let tok = result.arena[idx as usize];
            if pos == 0 {
                break;
            }
            pos -= 1;
            path.push((pos, tok.category));
            cur = tok.prev;
        }

        for (pos, category) in path {
            if category == NO_CATEGORY {
                continue;
            }
            categories.accumulate(words[pos], category, weight);
        }
    }

    total_lp
}
