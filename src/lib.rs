use rustfst::fst_impls::VectorFst;
use rustfst::semirings::TropicalWeight;

/// rustfst does not define this but we will
pub type StdVectorFst = VectorFst<TropicalWeight>;

/// Search and indexing parameters
pub mod config;
/// Error type shared by every module
pub mod error;
/// Keyword hits found on lattice edges
pub mod hit;
/// Read-only lattice view and an in-memory lattice
pub mod lattice;
/// Simplified confusion networks
pub mod lite;
/// Bigram language models over FSTs
pub mod lm;
/// Integer log-domain arithmetic
pub mod logmath;
/// Partial keyword paths and their posteriors
pub mod path;
mod persist;
/// Phrase search over word positions
pub mod position_index;
/// Ranked query results
pub mod query;
/// Confusion-network construction
pub mod sausage;
/// Keyword search over per-word hit lists
pub mod term_index;
/// Closed word lists
pub mod vocab;

pub use config::SearchConfig;
pub use error::{IndexError, Result};
pub use lattice::{Lattice, WordLattice};
pub use lite::LiteNetwork;
pub use lm::{FstBigramModel, LanguageModel};
pub use logmath::{LogMath, LogProb};
pub use position_index::{PhraseMatch, PositionIndex};
pub use sausage::ConfusionNetwork;
pub use term_index::{TermIndex, TermMatch};
pub use vocab::Vocabulary;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_shareable<T: Send + Sync>() {}

    #[test]
    fn it_shares_indexes_between_threads() {
        assert_shareable::<TermIndex>();
        assert_shareable::<PositionIndex>();
        assert_shareable::<ConfusionNetwork>();
        assert_shareable::<LiteNetwork>();
        assert_shareable::<WordLattice>();
        assert_shareable::<FstBigramModel>();
    }

    #[test]
    fn it_indexes_syllable_lists() {
        let terms = TermIndex::from_word_list("testdata/syllables.lst").unwrap();
        let positions = PositionIndex::from_word_list("testdata/syllables.lst").unwrap();
        assert_eq!(terms.vocabulary(), positions.vocabulary());
        assert_eq!(terms.vocabulary().len(), 10);
        assert_eq!(terms.num_hits(), 0);
    }
}
