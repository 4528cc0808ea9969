use lattice_index::lattice::LatticeEdge;
use lattice_index::lm::BigramScore;
use lattice_index::*;
use proptest::prelude::*;
use std::collections::HashSet;

const WORDS: [&str; 5] = ["jin", "tian", "jie", "mu", "ba"];

struct FlatModel;

impl LanguageModel for FlatModel {
    fn bigram_score(&self, _prev: &str, _word: &str) -> Result<BigramScore> {
        Ok(BigramScore {
            log_prob: -100,
            n_used: 2,
        })
    }
}

fn vocab() -> Vocabulary {
    // "ba" stays out of vocabulary
    Vocabulary::from_words(WORDS[..4].iter().copied())
}

/// A chain of nodes 10 frames apart with extra forward edges.
fn lattice(chain: &[(usize, i32)], skips: &[(usize, usize, usize)]) -> WordLattice {
    let n = chain.len() + 1;
    let mut b = WordLattice::builder(100).with_norm(-2000);
    for i in 0..n {
        b.add_node("<node>", 10 * i as u32);
    }
    for (i, &(w, ascr)) in chain.iter().enumerate() {
        let edge = LatticeEdge::new(i, i + 1, WORDS[w], 10 * i as u32, 10 * (i as u32 + 1) - 1, ascr)
            .with_alpha_beta(-1000, -1000 + ascr);
        b.add_edge(edge).unwrap();
    }
    for &(from, len, w) in skips {
        let from = from % chain.len();
        let to = (from + len).min(n - 1);
        if to <= from + 1 {
            continue;
        }
        let edge = LatticeEdge::new(from, to, WORDS[w], 10 * from as u32 + 2, 10 * to as u32 - 1, -50)
            .with_alpha_beta(-1500, -700);
        b.add_edge(edge).unwrap();
    }
    b.build(0, n - 1).unwrap()
}

fn arb_lattice() -> impl Strategy<Value = WordLattice> {
    (
        prop::collection::vec((0..WORDS.len(), -3000i32..=0), 1..8),
        prop::collection::vec((0..8usize, 2..4usize, 0..WORDS.len()), 0..5),
    )
        .prop_map(|(chain, skips)| lattice(&chain, &skips))
}

proptest! {
    #[test]
    fn hits_are_well_formed(lat in arb_lattice()) {
        let mut index = TermIndex::new(vocab());
        index.add_hits("u1", &lat, 0.1);
        for term in 0..index.vocabulary().len() {
            for hit in index.hits(term) {
                prop_assert!(hit.start_time <= hit.end_time);
                prop_assert_eq!(index.vocabulary().id(&hit.word), Some(term));
            }
        }
    }

    #[test]
    fn joined_hits_are_adjacent(lat in arb_lattice(), query in prop::collection::vec(0..4usize, 1..4)) {
        let mut index = TermIndex::new(vocab());
        index.add_hits("u1", &lat, 0.1);
        index.add_hits("u2", &lat, 0.1);
        let terms: Vec<&str> = query.iter().map(|&w| WORDS[w]).collect();
        let interval = index.config().interval;
        for m in index.search(terms.as_slice(), &FlatModel, 0.1).unwrap() {
            prop_assert_eq!(m.hits.len(), terms.len());
            for pair in m.hits.windows(2) {
                prop_assert_eq!(&pair[0].utterance_id, &pair[1].utterance_id);
                prop_assert!(pair[0].end_time <= pair[1].start_time);
                prop_assert!(pair[1].start_time <= pair[0].end_time + interval);
            }
        }
    }

    #[test]
    fn log_add_is_bounded(a in -100_000i32..=0, b in -100_000i32..=0) {
        let lmath = LogMath::default();
        let sum = lmath.add(a, b).unwrap();
        prop_assert!(sum >= a.max(b));
        // log(2) is about 6932 units of base 1.0001
        prop_assert!(sum <= a.max(b) + 6933);
        prop_assert_eq!(sum, lmath.add(b, a).unwrap());
    }

    #[test]
    fn networks_partition_the_lattice(lat in arb_lattice()) {
        let net = ConfusionNetwork::build(&lat).unwrap();
        let mut nodes = HashSet::new();
        for ns in net.node_sets() {
            for &node in &ns.nodes {
                prop_assert!(nodes.insert(node));
            }
        }
        prop_assert_eq!(nodes.len(), lat.num_nodes());
        let mut edges = HashSet::new();
        for (k, es) in net.edge_sets().iter().enumerate() {
            prop_assert_eq!((es.from, es.to), (k, k + 1));
            for &e in &es.edges {
                prop_assert!(edges.insert(e));
            }
        }
        prop_assert_eq!(edges.len(), lat.num_edges());
        prop_assert_eq!(net.node_sets().iter().filter(|ns| ns.is_final).count(), 1);
    }

    #[test]
    fn simplification_is_idempotent(lat in arb_lattice()) {
        let lmath = LogMath::default();
        let net = ConfusionNetwork::build(&lat).unwrap();
        let lite = LiteNetwork::from_network(&net, &lat, &lmath).unwrap();
        for slot in lite.slots() {
            let words: HashSet<&str> = slot.entries.iter().map(|e| e.word.as_str()).collect();
            prop_assert_eq!(words.len(), slot.entries.len());
            prop_assert!(slot.entries.iter().all(|e| e.post <= 0));
        }
        prop_assert_eq!(lite.simplified(&lmath).unwrap(), lite);
    }

    #[test]
    fn phrases_sit_at_consecutive_positions(
        lat in arb_lattice(),
        other in arb_lattice(),
        query in prop::collection::vec(0..4usize, 1..4),
    ) {
        let mut index = PositionIndex::new(vocab());
        index.add_lattice("u1", &lat).unwrap();
        index.add_lattice("u2", &other).unwrap();
        let terms: Vec<&str> = query.iter().map(|&w| WORDS[w]).collect();
        for m in index.search(terms.as_slice()).unwrap() {
            prop_assert_eq!(m.posteriors.len(), terms.len());
            for (position, term) in m.positions().zip(&terms) {
                let id = index.vocabulary().id(term).unwrap();
                let bucket = index
                    .positions(id)
                    .iter()
                    .find(|b| b.position == position);
                prop_assert!(bucket.map_or(false, |b| b
                    .hits
                    .iter()
                    .any(|h| h.utterance_id == m.utterance_id)));
            }
        }
    }
}
