//! Partial paths built while joining keyword hits.

use crate::config::SearchConfig;
use crate::error::Result;
use crate::hit::Hit;
use crate::lm::LanguageModel;
use crate::logmath::LogProb;

/// Hits matched so far for the leading query terms, all from one
/// utterance.  A path always holds at least one hit.
#[derive(Debug, Clone)]
pub struct PartialPath<'a> {
    hits: Vec<&'a Hit>,
}

impl<'a> PartialPath<'a> {
    pub fn seed(hit: &'a Hit) -> Self {
        Self { hits: vec![hit] }
    }

    /// A copy of this path with `hit` appended.
    pub fn extended(&self, hit: &'a Hit) -> Self {
        let mut hits = Vec::with_capacity(self.hits.len() + 1);
        hits.extend_from_slice(&self.hits);
        hits.push(hit);
        Self { hits }
    }

    pub fn first(&self) -> &'a Hit {
        self.hits[0]
    }

    pub fn last(&self) -> &'a Hit {
        self.hits[self.hits.len() - 1]
    }

    pub fn hits(&self) -> &[&'a Hit] {
        &self.hits
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn utterance_id(&self) -> &'a str {
        &self.first().utterance_id
    }

    /// Whether `hit` can extend this path.
    pub fn accepts(&self, hit: &Hit, interval: f64) -> bool {
        self.last().precedes(hit, interval)
    }

    pub fn posterior(
        &self,
        lm: &dyn LanguageModel,
        config: &SearchConfig,
        acoustic_scale: f32,
    ) -> Result<LogProb> {
        posterior(&self.hits, lm, config, acoustic_scale)
    }
}

/// Approximate log P(path | observation).
///
/// The forward mass of the first hit and the backward mass of the last one
/// bound the path; inside it, each transition adds the bigram score and the
/// acoustic score of the word entered.
pub fn posterior(
    hits: &[&Hit],
    lm: &dyn LanguageModel,
    config: &SearchConfig,
    acoustic_scale: f32,
) -> Result<LogProb> {
    let (first, last) = match (hits.first(), hits.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Ok(0),
    };
    if hits.len() == 1 {
        return Ok(first.posterior());
    }
    let mut score = first
        .alpha
        .saturating_add(last.beta)
        .saturating_sub(first.norm);
    for pair in hits.windows(2) {
        let bigram = lm.bigram_score(&pair[0].word, &pair[1].word)?;
        score = score
            .saturating_add(bigram.log_prob)
            .saturating_add(config.scaled_ascr(pair[1].ascr, acoustic_scale));
    }
    Ok(score)
}
