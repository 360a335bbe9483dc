//! Corpus counts: unigram and forward/reverse word-bigram tables, built
//! from a whitespace-tokenized, line-oriented corpus file.
//!
//! Grounded on `original_source/Merging.cc`'s `read_corpus`: every
//! sentence is augmented with `<s>` .. `</s>`, out-of-vocabulary tokens
//! (when a fixed vocabulary is supplied) are mapped to `<unk>`, and both
//! a forward and a reverse bigram table are accumulated in one pass so
//! the Δ-evaluator never needs to scan a word's incoming edges by
//! re-deriving them from the forward table.

use std::io::BufRead;

use ahash::AHashMap;

use crate::error::{Error, Result};
use crate::vocab::{Vocabulary, WordId};

#[derive(Debug, Clone, Default)]
pub struct CorpusCounts {
    pub word_count: AHashMap<WordId, u64>,
    pub word_bigram: AHashMap<WordId, AHashMap<WordId, u64>>,
    pub word_rev_bigram: AHashMap<WordId, AHashMap<WordId, u64>>,
    pub num_sentences: u64,
}

impl CorpusCounts {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_unigram(&mut self, w: WordId) {
        *self.word_count.entry(w).or_insert(0) += 1;
    }

    fn add_bigram(&mut self, w1: WordId, w2: WordId) {
        *self.word_bigram.entry(w1).or_default().entry(w2).or_insert(0) += 1;
        *self.word_rev_bigram.entry(w2).or_default().entry(w1).or_insert(0) += 1;
    }

    pub fn count(&self, w: WordId) -> u64 {
        self.word_count.get(&w).copied().unwrap_or(0)
    }

    pub fn bigram_count(&self, w1: WordId, w2: WordId) -> u64 {
        self.word_bigram.get(&w1).and_then(|m| m.get(&w2)).copied().unwrap_or(0)
    }

    /// Accumulates one already-tokenized sentence (no `<s>`/`</s>`
    /// added yet). `vocab` grows lazily for any word not yet seen when
    /// `fixed_vocab` is false; otherwise unseen words are substituted
    /// with `<unk>` per the `<s>`/`</s>` convention fixed in SPEC_FULL.md §9.
    pub fn add_sentence(&mut self, tokens: &[&str], vocab: &mut Vocabulary, fixed_vocab: bool) {
        let mut ids = Vec::with_capacity(tokens.len() + 2);
        ids.push(vocab.sentence_begin_id());
        for &tok in tokens {
            let id = if fixed_vocab {
                vocab.lookup(tok).unwrap_or_else(|| vocab.unk_id())
            } else {
                vocab.insert(tok)
            };
            ids.push(id);
        }
        ids.push(vocab.sentence_end_id());

        for w in &ids {
            self.add_unigram(*w);
        }
        for pair in ids.windows(2) {
            self.add_bigram(pair[0], pair[1]);
        }
        self.num_sentences += 1;
    }

    /// Reads a corpus where each line is one whitespace-tokenized
    /// sentence (no leading/trailing sentence markers).
    pub fn read<R: BufRead>(reader: R, vocab: &mut Vocabulary, fixed_vocab: bool) -> Result<Self> {
        let mut counts = CorpusCounts::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(Error::Io)?;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            if tokens.iter().any(|t| t.is_empty()) {
                return Err(Error::malformed(lineno + 1, "empty token after split"));
            }
            counts.add_sentence(&tokens, vocab, fixed_vocab);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn counts_accumulate_forward_and_reverse_consistently() {
        let mut vocab = Vocabulary::new(false);
        let reader = Cursor::new("the dog ran\nthe cat sat\n");
        let counts = CorpusCounts::read(reader, &mut vocab, false).unwrap();
        assert_eq!(counts.num_sentences, 2);

        let the = vocab.lookup("the").unwrap();
        let dog = vocab.lookup("dog").unwrap();
        assert_eq!(counts.bigram_count(the, dog), 1);

        for (&w1, inner) in &counts.word_bigram {
            for (&w2, &c) in inner {
                assert_eq!(counts.word_rev_bigram[&w2][&w1], c);
            }
        }
    }

    #[test]
    fn sentence_markers_are_added() {
        let mut vocab = Vocabulary::new(false);
        let reader = Cursor::new("a b\n");
        let counts = CorpusCounts::read(reader, &mut vocab, false).unwrap();
        assert_eq!(counts.count(vocab.sentence_begin_id()), 1);
        assert_eq!(counts.count(vocab.sentence_end_id()), 1);
    }

    #[test]
    fn fixed_vocab_substitutes_unk() {
        let mut vocab = Vocabulary::new(false);
        vocab.insert("known");
        let reader = Cursor::new("known mystery\n");
        let counts = CorpusCounts::read(reader, &mut vocab, true).unwrap();
        assert_eq!(counts.count(vocab.unk_id()), 1);
        assert_eq!(vocab.lookup("mystery"), None);
    }
}
