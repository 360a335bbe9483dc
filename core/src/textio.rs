//! Text-format readers/writers for the file formats named in SPEC_FULL.md
//! §6: corpus vocabulary restriction, class-initialization, super-class
//! grouping, the serialized hard/soft class models, and interpolation
//! weight lines. These are pure in-memory functions over `impl BufRead` /
//! `impl Write` — the compressed variant and the CLI front ends that pick
//! a path and decide which of these to call remain external collaborators.
//!
//! Grounded on `original_source/Merging.cc`'s `read_vocab`/`read_classes`
//! and `original_source/Categories.cc`'s `read_cgenprobs`/`write_cgenprobs`.

use std::io::{BufRead, Read, Write};

use ahash::{AHashMap, AHashSet};

use crate::categories::{CategoryId, Categories};
use crate::classes::ClassState;
use crate::error::{Error, Result};
use crate::vocab::{ClassId, Vocabulary, WordId};

/// Reads a one-word-per-line vocabulary restriction file. Everything not
/// in the returned set becomes `<unk>` at corpus-read time.
pub fn read_vocabulary_filter<R: BufRead>(reader: R) -> Result<AHashSet<String>> {
    let mut words = AHashSet::new();
    for line in reader.lines() {
        let line = line.map_err(Error::Io)?;
        let word = line.trim();
        if word.is_empty() {
            continue;
        }
        words.insert(word.to_string());
    }
    Ok(words)
}

fn parse_logp(lineno: usize, field: &str) -> Result<f64> {
    let v: f64 = field
        .parse()
        .map_err(|_| Error::malformed(lineno, format!("expected a number, found {field:?}")))?;
    if !v.is_finite() {
        return Err(Error::numeric(format!("non-finite log-probability {v} at line {lineno}")));
    }
    Ok(v)
}

/// Parses a class-initialization file for the hard-class tools:
/// `<word> <idx1> <prob1> <idx2> <prob2> …`, one line per word. Each
/// class index carries a probability; the class kept is the one with the
/// maximum probability, not the first listed.
///
/// Grounded on `original_source/ExchangeAlgorithm.cc`'s
/// `read_class_initialization`: `while (liness >> idx) { liness >> prob;
/// if (prob > best_prob) { best_idx = idx; best_prob = prob; } }`.
pub fn read_class_init_hard<R: BufRead>(
    reader: R,
    vocab: &mut Vocabulary,
) -> Result<AHashMap<WordId, ClassId>> {
    let mut out = AHashMap::new();
    for (idx, line) in reader.lines().enumerate() {
        let lineno = idx + 1;
        let line = line.map_err(Error::Io)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let word = fields.next().ok_or_else(|| Error::malformed(lineno, "missing word field"))?;

        let mut best_idx: Option<ClassId> = None;
        let mut best_prob = f64::NEG_INFINITY;
        loop {
            let idx_str = match fields.next() {
                Some(s) => s,
                None => break,
            };
            let class: ClassId = idx_str
                .parse()
                .map_err(|_| Error::malformed(lineno, format!("expected an integer class index, found {idx_str:?}")))?;
            let prob_str = fields
                .next()
                .ok_or_else(|| Error::malformed(lineno, format!("class index {idx_str:?} is missing its probability")))?;
            let prob: f64 = prob_str
                .parse()
                .map_err(|_| Error::malformed(lineno, format!("expected a number, found {prob_str:?}")))?;
            if prob > best_prob {
                best_prob = prob;
                best_idx = Some(class);
            }
        }
        let class = best_idx.ok_or_else(|| Error::malformed(lineno, "missing class field"))?;
        let id = vocab.insert(word);
        out.insert(id, class);
    }
    Ok(out)
}

/// Parses a `.cgenprobs`/`.cmemprobs`-shaped file for the category
/// tools: `<word>\t<c> <logp> <c> <logp> …`, one line per word. `into_gen`
/// selects which side of `categories` the entries land on.
pub fn read_category_probs<R: BufRead>(
    reader: R,
    vocab: &mut Vocabulary,
    categories: &mut Categories,
    into_gen: bool,
) -> Result<()> {
    for (idx, line) in reader.lines().enumerate() {
        let lineno = idx + 1;
        let line = line.map_err(Error::Io)?;
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, '\t');
        let word = parts.next().ok_or_else(|| Error::malformed(lineno, "missing word field"))?;
        let rest = parts.next().ok_or_else(|| Error::malformed(lineno, "missing category list"))?;
        let id = vocab.insert(word);
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        if tokens.is_empty() || tokens.len() % 2 != 0 {
            return Err(Error::malformed(lineno, "category list must be pairs of <class> <logp>"));
        }
        for pair in tokens.chunks(2) {
            let c: CategoryId = pair[0]
                .parse()
                .map_err(|_| Error::malformed(lineno, format!("expected an integer category, found {:?}", pair[0])))?;
            let lp = parse_logp(lineno, pair[1])?;
            if into_gen {
                categories.set_gen_prob(id, c, lp);
            } else {
                categories.set_mem_prob(id, c, lp);
            }
        }
    }
    Ok(())
}

/// Parses a super-class file: one line per super-class, comma-separated
/// class indices.
pub fn read_super_classes<R: BufRead>(reader: R) -> Result<Vec<AHashSet<ClassId>>> {
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let lineno = idx + 1;
        let line = line.map_err(Error::Io)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut sc = AHashSet::new();
        for field in line.split(',') {
            let field = field.trim();
            let c: ClassId = field
                .parse()
                .map_err(|_| Error::malformed(lineno, format!("expected an integer class index, found {field:?}")))?;
            sc.insert(c);
        }
        out.push(sc);
    }
    Ok(out)
}

/// Writes `<model>.classes`: `<word> <class_idx>\n`, one per line, words
/// in id order for a deterministic byte-for-byte output.
pub fn write_classes<W: Write>(writer: &mut W, state: &ClassState, vocab: &Vocabulary) -> Result<()> {
    let mut rows: Vec<(WordId, ClassId)> = state.word_classes().collect();
    rows.sort_unstable_by_key(|&(w, _)| w);
    for (w, c) in rows {
        writeln!(writer, "{} {}", vocab.word(w), c).map_err(Error::Io)?;
    }
    Ok(())
}

/// Writes `<model>.cmemprobs` for the hard model: one class per word,
/// `logp = log(word_count / class_count)`.
pub fn write_hard_cmemprobs<W: Write>(writer: &mut W, state: &ClassState, vocab: &Vocabulary) -> Result<()> {
    let mut rows: Vec<(WordId, ClassId)> = state.word_classes().collect();
    rows.sort_unstable_by_key(|&(w, _)| w);
    for (w, c) in rows {
        let wc = state.word_count(w) as f64;
        let cc = state.class_count(c) as f64;
        let lp = if wc > 0.0 && cc > 0.0 { wc.ln() - cc.ln() } else { f64::NEG_INFINITY };
        writeln!(writer, "{}\t{} {lp}", vocab.word(w), c).map_err(Error::Io)?;
    }
    Ok(())
}

/// Writes a `.cgenprobs`/`.cmemprobs` file for the soft model: every
/// word's retained category entries, tab-separated from the word, as
/// `<c> <logp>` pairs.
pub fn write_category_probs<W: Write>(
    writer: &mut W,
    vocab: &Vocabulary,
    categories: &Categories,
    gen_side: bool,
) -> Result<()> {
    let mut rows: Vec<(WordId, &AHashMap<CategoryId, f64>)> = if gen_side {
        categories.gen_entries().collect()
    } else {
        categories.mem_entries().collect()
    };
    rows.sort_unstable_by_key(|&(w, _)| w);
    for (w, probs) in rows {
        let mut cats: Vec<(CategoryId, f64)> = probs.iter().map(|(&c, &lp)| (c, lp)).collect();
        cats.sort_unstable_by_key(|&(c, _)| c);
        let body: String = cats.iter().map(|(c, lp)| format!("{c} {lp}")).collect::<Vec<_>>().join(" ");
        writeln!(writer, "{}\t{body}", vocab.word(w)).map_err(Error::Io)?;
    }
    Ok(())
}

/// Parses a whitespace-separated interpolation-weight line (linear
/// probabilities, not log-space), rejecting one whose components don't
/// sum to 1 within `1e-9`, and converts the survivors to natural-log
/// weights for `perplexity::interpolate2`/`interpolate3`.
pub fn parse_interpolation_weights(lineno: usize, line: &str) -> Result<Vec<f64>> {
    let weights: Vec<f64> = line
        .split_whitespace()
        .map(|tok| {
            tok.parse::<f64>()
                .map_err(|_| Error::malformed(lineno, format!("expected a number, found {tok:?}")))
        })
        .collect::<Result<Vec<f64>>>()?;
    if weights.is_empty() {
        return Err(Error::malformed(lineno, "interpolation-weight line is empty"));
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > 1e-9 {
        return Err(Error::malformed(lineno, format!("interpolation weights sum to {sum}, expected 1")));
    }
    Ok(weights.into_iter().map(|w| w.ln()).collect())
}

/// Writes a bincode snapshot of the soft category model, for checkpointing
/// a long-running EM pass without re-deriving `Categories` from the text
/// `.cgenprobs`/`.cmemprobs` files on resume. Mirrors the teacher's
/// `bincode::serialize`/`deserialize` use for `NGramModel` snapshots
/// (`libpinyin/src/main.rs`'s `ngram.bincode`) rather than its FST/redb
/// lexicon path, which has no counterpart here.
pub fn write_categories_snapshot<W: Write>(writer: &mut W, categories: &Categories) -> Result<()> {
    let bytes = bincode::serialize(categories).map_err(|e| Error::malformed(0, format!("bincode encode: {e}")))?;
    writer.write_all(&bytes).map_err(Error::Io)
}

/// Reads back a snapshot written by [`write_categories_snapshot`].
pub fn read_categories_snapshot<R: Read>(mut reader: R) -> Result<Categories> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).map_err(Error::Io)?;
    bincode::deserialize(&bytes).map_err(|e| Error::malformed(0, format!("bincode decode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusCounts;
    use std::io::Cursor;

    #[test]
    fn vocabulary_filter_skips_blank_lines() {
        let reader = Cursor::new("dog\ncat\n\n  \nbird\n");
        let words = read_vocabulary_filter(reader).unwrap();
        assert_eq!(words.len(), 3);
        assert!(words.contains("bird"));
    }

    #[test]
    fn class_init_hard_picks_the_max_probability_class() {
        let mut vocab = Vocabulary::new(false);
        let reader = Cursor::new("dog 3 0.1 4 0.7 5 0.2\ncat 4 0.9\n");
        let init = read_class_init_hard(reader, &mut vocab).unwrap();
        assert_eq!(init[&vocab.lookup("dog").unwrap()], 4);
        assert_eq!(init[&vocab.lookup("cat").unwrap()], 4);
    }

    #[test]
    fn class_init_hard_rejects_missing_class_field() {
        let mut vocab = Vocabulary::new(false);
        let reader = Cursor::new("dog\n");
        assert!(read_class_init_hard(reader, &mut vocab).is_err());
    }

    #[test]
    fn class_init_hard_rejects_class_index_without_probability() {
        let mut vocab = Vocabulary::new(false);
        let reader = Cursor::new("dog 3\n");
        assert!(read_class_init_hard(reader, &mut vocab).is_err());
    }

    #[test]
    fn category_probs_round_trip_through_write_and_read() {
        let mut vocab = Vocabulary::new(false);
        let dog = vocab.insert("dog");
        let cat = vocab.insert("cat");
        let mut cats = Categories::new();
        cats.set_gen_prob(dog, 1, -0.1);
        cats.set_gen_prob(dog, 2, -2.3);
        cats.set_gen_prob(cat, 1, -0.2);

        let mut buf = Vec::new();
        write_category_probs(&mut buf, &vocab, &cats, true).unwrap();

        let mut vocab2 = Vocabulary::new(false);
        let mut cats2 = Categories::new();
        read_category_probs(Cursor::new(buf), &mut vocab2, &mut cats2, true).unwrap();

        let dog2 = vocab2.lookup("dog").unwrap();
        let gen = cats2.gen_probs(dog2).unwrap();
        assert!((gen[&1] - (-0.1)).abs() < 1e-9);
        assert!((gen[&2] - (-2.3)).abs() < 1e-9);
    }

    #[test]
    fn category_probs_rejects_nonfinite_logp() {
        let mut vocab = Vocabulary::new(false);
        let mut cats = Categories::new();
        let reader = Cursor::new("dog\t1 nan\n");
        let err = read_category_probs(reader, &mut vocab, &mut cats, true).unwrap_err();
        assert!(matches!(err, Error::NumericDomain { .. }));
    }

    #[test]
    fn super_classes_parse_comma_separated_lines() {
        let reader = Cursor::new("3,4,5\n6, 7\n");
        let scs = read_super_classes(reader).unwrap();
        assert_eq!(scs.len(), 2);
        assert_eq!(scs[0].len(), 3);
        assert!(scs[1].contains(&7));
    }

    #[test]
    fn classes_file_round_trips_through_class_state() {
        let mut vocab = Vocabulary::new(false);
        let reader = Cursor::new("the dog ran\nthe cat ran\n");
        let corpus = CorpusCounts::read(reader, &mut vocab, false).unwrap();
        let mut init = AHashMap::new();
        for (id, w) in vocab.iter().collect::<Vec<_>>() {
            if vocab.reserved_class(id).is_some() {
                continue;
            }
            init.insert(id, if w == "dog" { 3 } else { 4 });
        }
        let state = ClassState::new(&vocab, &corpus, &init, 5).unwrap();

        let mut buf = Vec::new();
        write_classes(&mut buf, &state, &vocab).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let dog_line = text.lines().find(|l| l.starts_with("dog ")).unwrap();
        assert_eq!(dog_line, "dog 3");
    }

    #[test]
    fn categories_snapshot_round_trips_through_bincode() {
        let mut vocab = Vocabulary::new(false);
        let dog = vocab.insert("dog");
        let mut cats = Categories::new();
        cats.set_gen_prob(dog, 1, -0.1);
        cats.set_mem_prob(dog, 1, -0.2);

        let mut buf = Vec::new();
        write_categories_snapshot(&mut buf, &cats).unwrap();
        let restored = read_categories_snapshot(Cursor::new(buf)).unwrap();

        assert!((restored.gen_probs(dog).unwrap()[&1] - (-0.1)).abs() < 1e-12);
        assert!((restored.mem_probs(dog).unwrap()[&1] - (-0.2)).abs() < 1e-12);
    }

    #[test]
    fn interpolation_weights_must_sum_to_one() {
        assert!(parse_interpolation_weights(1, "0.5 0.5").is_ok());
        assert!(parse_interpolation_weights(1, "0.5 0.6").is_err());
    }

    #[test]
    fn interpolation_weights_convert_to_log_space() {
        let lw = parse_interpolation_weights(1, "0.25 0.75").unwrap();
        assert!((lw[0] - 0.25_f64.ln()).abs() < 1e-12);
        assert!((lw[1] - 0.75_f64.ln()).abs() < 1e-12);
    }
}
