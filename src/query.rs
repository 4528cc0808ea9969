//! Query entry points returning ranked `(utterance, score)` pairs.
//!
//! Unlike the index searches, a query naming a word outside the vocabulary
//! is not an error here: it simply matches nothing.

use tracing::info;

use crate::error::{IndexError, Result};
use crate::lm::LanguageModel;
use crate::logmath::LogProb;
use crate::position_index::PositionIndex;
use crate::term_index::TermIndex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranked {
    pub utterance_id: String,
    pub score: LogProb,
}

/// Keyword query against a term index.
pub fn search_terms<S: AsRef<str>>(
    index: &TermIndex,
    terms: &[S],
    lm: &dyn LanguageModel,
    acoustic_scale: f32,
) -> Result<Vec<Ranked>> {
    let found = index.search(terms, lm, acoustic_scale).map(|matches| {
        matches
            .into_iter()
            .map(|m| (m.utterance_id, m.score))
            .collect()
    });
    rank(found)
}

/// Phrase query against a position index.
pub fn search_phrase<S: AsRef<str>>(index: &PositionIndex, terms: &[S]) -> Result<Vec<Ranked>> {
    let found = index.search(terms).map(|matches| {
        matches
            .into_iter()
            .map(|m| (m.utterance_id, m.score))
            .collect()
    });
    rank(found)
}

fn rank(found: Result<Vec<(String, LogProb)>>) -> Result<Vec<Ranked>> {
    let mut ranked: Vec<Ranked> = match found {
        Ok(pairs) => pairs
            .into_iter()
            .map(|(utterance_id, score)| Ranked {
                utterance_id,
                score,
            })
            .collect(),
        Err(IndexError::UnknownTerm(term)) => {
            info!(term = term.as_str(), "query has no indexed match");
            Vec::new()
        }
        Err(e) => return Err(e),
    };
    // stable, so equal scores stay in utterance order
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    Ok(ranked)
}
