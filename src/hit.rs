use crate::lattice::NodeId;
use crate::logmath::LogProb;
use crate::vocab::TermId;

/// One occurrence of a vocabulary word on a lattice edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub utterance_id: String,
    pub word: String,
    /// Word of the node the edge leads to.
    pub subseq_word: String,
    pub term_id: TermId,
    /// Seconds
    pub start_time: f64,
    pub end_time: f64,
    /// Shifted and scaled acoustic score.
    pub ascr: LogProb,
    /// Forward likelihood.
    pub alpha: LogProb,
    /// Backward likelihood.
    pub beta: LogProb,
    /// Normalizer of the utterance's lattice.
    pub norm: LogProb,
    pub from_id: NodeId,
    pub to_id: NodeId,
}

impl Hit {
    /// Whether `next` may follow this hit within `interval` seconds.
    pub fn precedes(&self, next: &Hit, interval: f64) -> bool {
        self.utterance_id == next.utterance_id
            && self.end_time <= next.start_time
            && next.start_time <= self.end_time + interval
    }

    /// Lattice posterior of this hit on its own.
    pub fn posterior(&self) -> LogProb {
        self.alpha
            .saturating_add(self.beta)
            .saturating_sub(self.norm)
    }
}
