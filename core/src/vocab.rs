//! Vocabulary table: stable word↔id mapping plus the reserved ids every
//! corpus/class/category model relies on.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

pub type WordId = u32;
pub type ClassId = u32;

/// `<s>` and `</s>` share this class.
pub const START_CLASS: ClassId = 0;
/// `<unk>` lives in this class.
pub const UNK_CLASS: ClassId = 1;
/// Optional word-boundary token's class, when present.
pub const WB_CLASS: ClassId = 2;

pub const SENTENCE_BEGIN: &str = "<s>";
pub const SENTENCE_END: &str = "</s>";
pub const UNKNOWN: &str = "<unk>";
pub const WORD_BOUNDARY: &str = "<w>";

/// An ordered, append-only word↔id table.
///
/// `<s>`, `</s>`, and `<unk>` are inserted at construction and always
/// occupy ids 0, 1, 2 respectively, matching the reserved-class
/// convention in the data model. `<w>` is optional and, when requested,
/// takes id 3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    words: Vec<String>,
    ids: AHashMap<String, WordId>,
    has_word_boundary: bool,
}

impl Vocabulary {
    pub fn new(with_word_boundary: bool) -> Self {
        let mut v = Vocabulary { words: Vec::new(), ids: AHashMap::new(), has_word_boundary: with_word_boundary };
        v.push_reserved(SENTENCE_BEGIN);
        v.push_reserved(SENTENCE_END);
        v.push_reserved(UNKNOWN);
        if with_word_boundary {
            v.push_reserved(WORD_BOUNDARY);
        }
        v
    }

    fn push_reserved(&mut self, word: &str) {
        let id = self.words.len() as WordId;
        self.words.push(word.to_string());
        self.ids.insert(word.to_string(), id);
    }

    /// Looks up a word, inserting it with a fresh id if unseen.
    ///
    /// Grounded on `original_source/Merging.cc`'s `insert_word_to_vocab`:
    /// vocabulary growth is lazy, driven by whatever the corpus reader
    /// encounters.
    pub fn insert(&mut self, word: &str) -> WordId {
        if let Some(&id) = self.ids.get(word) {
            return id;
        }
        let id = self.words.len() as WordId;
        self.words.push(word.to_string());
        self.ids.insert(word.to_string(), id);
        id
    }

    pub fn lookup(&self, word: &str) -> Option<WordId> {
        self.ids.get(word).copied()
    }

    pub fn word(&self, id: WordId) -> &str {
        &self.words[id as usize]
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn sentence_begin_id(&self) -> WordId {
        0
    }

    pub fn sentence_end_id(&self) -> WordId {
        1
    }

    pub fn unk_id(&self) -> WordId {
        2
    }

    pub fn word_boundary_id(&self) -> Option<WordId> {
        self.has_word_boundary.then_some(3)
    }

    /// The reserved class a freshly-inserted word belongs to before any
    /// class is assigned to it. Words that are not among the reserved
    /// three (four with `<w>`) have no reserved class and must be
    /// assigned explicitly by a `ClassState`.
    pub fn reserved_class(&self, id: WordId) -> Option<ClassId> {
        match id {
            0 | 1 => Some(START_CLASS),
            2 => Some(UNK_CLASS),
            3 if self.has_word_boundary => Some(WB_CLASS),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (WordId, &str)> {
        self.words.iter().enumerate().map(|(i, w)| (i as WordId, w.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_words_get_fixed_ids() {
        let v = Vocabulary::new(false);
        assert_eq!(v.sentence_begin_id(), 0);
        assert_eq!(v.sentence_end_id(), 1);
        assert_eq!(v.unk_id(), 2);
        assert_eq!(v.word_boundary_id(), None);
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn word_boundary_reserved_when_requested() {
        let v = Vocabulary::new(true);
        assert_eq!(v.word_boundary_id(), Some(3));
        assert_eq!(v.reserved_class(3), Some(WB_CLASS));
    }

    #[test]
    fn insert_is_idempotent() {
        let mut v = Vocabulary::new(false);
        let a = v.insert("dog");
        let b = v.insert("dog");
        assert_eq!(a, b);
        assert_eq!(v.word(a), "dog");
    }

    #[test]
    fn non_reserved_word_has_no_reserved_class() {
        let mut v = Vocabulary::new(false);
        let id = v.insert("dog");
        assert_eq!(v.reserved_class(id), None);
    }
}
