//! Bigram language-model scoring.

use anyhow::anyhow;
use rustfst::prelude::*;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::logmath::{LogMath, LogProb};
use crate::StdVectorFst;

/// Score of a word given the word before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigramScore {
    pub log_prob: LogProb,
    /// Length of the n-gram the score came from (0 for an unknown word).
    pub n_used: u32,
}

/// External scorer consulted when joining keyword hits into a path.
pub trait LanguageModel {
    fn bigram_score(&self, prev: &str, word: &str) -> Result<BigramScore>;
}

/// A backoff n-gram model stored as an FST, queried for bigrams.
///
/// States are histories; a word arc carries `-ln P(word | history)` and the
/// epsilon arc of a state carries its backoff weight.
pub struct FstBigramModel {
    fst: StdVectorFst,
    syms: Arc<SymbolTable>,
    /// The empty-history state
    unigram: StateId,
    lmath: LogMath,
    oov_log_prob: LogProb,
}

impl FstBigramModel {
    pub fn new(fst: StdVectorFst, lmath: LogMath) -> Result<Self> {
        let syms = fst
            .input_symbols()
            .cloned()
            .ok_or_else(|| anyhow!("language model FST has no input symbols"))?;
        let mut unigram = fst
            .start()
            .ok_or_else(|| anyhow!("language model FST has no start state"))?;
        let mut steps = 0;
        while let Some((_, next)) = find_tr(&fst, unigram, EPS_LABEL)? {
            unigram = next;
            steps += 1;
            if steps > fst.num_states() {
                return Err(anyhow!("backoff arcs form a cycle").into());
            }
        }
        Ok(Self {
            fst,
            syms,
            unigram,
            lmath,
            oov_log_prob: lmath.ln_to_log(1e-10f64.ln()),
        })
    }

    pub fn read(path: impl AsRef<Path>, lmath: LogMath) -> Result<Self> {
        let fst = StdVectorFst::read(path.as_ref())?;
        Self::new(fst, lmath)
    }

    /// Score given to words the model does not know.
    pub fn with_oov_log_prob(mut self, log_prob: LogProb) -> Self {
        self.oov_log_prob = log_prob;
        self
    }

    fn unknown(&self) -> BigramScore {
        BigramScore {
            log_prob: self.oov_log_prob,
            n_used: 0,
        }
    }
}

impl LanguageModel for FstBigramModel {
    fn bigram_score(&self, prev: &str, word: &str) -> Result<BigramScore> {
        let Some(label) = self.syms.get_label(word) else {
            return Ok(self.unknown());
        };
        let context = match self.syms.get_label(prev) {
            Some(p) => find_tr(&self.fst, self.unigram, p)?.map(|(_, next)| next),
            None => None,
        };
        let (mut state, mut order) = match context {
            Some(s) if s != self.unigram => (s, 2),
            _ => (self.unigram, 1),
        };
        let mut cost = 0.0f32;
        loop {
            if let Some((weight, _)) = find_tr(&self.fst, state, label)? {
                cost += weight;
                return Ok(BigramScore {
                    log_prob: self.lmath.ln_to_log(-f64::from(cost)),
                    n_used: order,
                });
            }
            if state == self.unigram {
                return Ok(self.unknown());
            }
            match find_tr(&self.fst, state, EPS_LABEL)? {
                Some((weight, next)) => {
                    cost += weight;
                    state = next;
                    order = 1;
                }
                None => return Ok(self.unknown()),
            }
        }
    }
}

/// Weight and destination of the first arc labelled `label` leaving `state`
fn find_tr(fst: &StdVectorFst, state: StateId, label: Label) -> Result<Option<(f32, StateId)>> {
    let trs = fst.get_trs(state)?;
    Ok(trs
        .trs()
        .iter()
        .find(|tr| tr.ilabel == label)
        .map(|tr| (*tr.weight.value(), tr.nextstate)))
}
