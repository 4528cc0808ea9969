use std::collections::HashMap;
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

use crate::error::{IndexError, Result};

/// Position of a word in the vocabulary
pub type TermId = usize;

/// The closed list of words an index can hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vocabulary {
    words: Vec<String>,
    ids: HashMap<String, TermId>,
}

impl Vocabulary {
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Vocabulary::default();
        for word in words {
            vocab.push(word.into());
        }
        vocab
    }

    /// Read a word list, one word per line
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let fh = File::open(path).map_err(|e| IndexError::open(path, e))?;
        let mut vocab = Vocabulary::default();
        for line in BufReader::new(fh).lines() {
            let line = line?;
            let word = line.trim();
            if !word.is_empty() {
                vocab.push(word.to_string());
            }
        }
        Ok(vocab)
    }

    fn push(&mut self, word: String) {
        // first occurrence wins the lookup
        self.ids.entry(word.clone()).or_insert(self.words.len());
        self.words.push(word);
    }

    pub fn id(&self, word: &str) -> Option<TermId> {
        self.ids.get(word).copied()
    }

    pub fn word(&self, id: TermId) -> Option<&str> {
        self.words.get(id).map(String::as_str)
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_reads_word_lists() {
        let vocab = Vocabulary::read("testdata/syllables.lst").unwrap();
        assert_eq!(vocab.len(), 10);
        assert_eq!(vocab.id("jin"), Some(0));
        assert_eq!(vocab.id("you"), Some(9));
        assert_eq!(vocab.word(3), Some("mu"));
        assert_eq!(vocab.id("ji"), None);
    }

    #[test]
    fn it_reports_missing_files() {
        assert!(matches!(
            Vocabulary::read("testdata/no-such-file"),
            Err(IndexError::ResourceOpen { .. })
        ));
    }

    #[test]
    fn it_matches_words_exactly() {
        let vocab = Vocabulary::from_words(["tian", "ti"]);
        assert_eq!(vocab.id("ti"), Some(1));
        assert_eq!(vocab.id("tia"), None);
        assert_eq!(vocab.id("tiann"), None);
    }
}
