//! Per-word hit lists extracted from lattices, and keyword-path search.

use std::io::{BufRead, Write};
use std::path::Path;
use tracing::{debug, trace, warn};

use crate::config::SearchConfig;
use crate::error::{IndexError, Result};
use crate::hit::Hit;
use crate::lattice::Lattice;
use crate::lm::LanguageModel;
use crate::logmath::LogProb;
use crate::path::PartialPath;
use crate::persist;
use crate::vocab::{TermId, Vocabulary};

/// A path of hits matching every query term, with its posterior score.
#[derive(Debug, Clone, PartialEq)]
pub struct TermMatch {
    pub utterance_id: String,
    pub score: LogProb,
    pub hits: Vec<Hit>,
}

impl TermMatch {
    /// Start and end time of the matched words.
    pub fn span(&self) -> (f64, f64) {
        match (self.hits.first(), self.hits.last()) {
            (Some(first), Some(last)) => (first.start_time, last.end_time),
            _ => (0.0, 0.0),
        }
    }
}

/// Maps every vocabulary word to the hits found for it, in discovery order.
#[derive(Debug, Clone, PartialEq)]
pub struct TermIndex {
    vocab: Vocabulary,
    buckets: Vec<Vec<Hit>>,
    config: SearchConfig,
}

impl TermIndex {
    pub fn new(vocab: Vocabulary) -> Self {
        let buckets = vec![Vec::new(); vocab.len()];
        Self {
            vocab,
            buckets,
            config: SearchConfig::default(),
        }
    }

    pub fn from_word_list(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Vocabulary::read(path)?))
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn hits(&self, term: TermId) -> &[Hit] {
        self.buckets.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn num_hits(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Record a hit for every reachable lattice edge labelled with a
    /// vocabulary word.  Returns the number of hits added.
    pub fn add_hits<L: Lattice + ?Sized>(
        &mut self,
        utterance_id: &str,
        lattice: &L,
        acoustic_scale: f32,
    ) -> usize {
        let norm = lattice.norm();
        let mut added = 0;
        let mut skipped = 0;
        for from in (0..lattice.num_nodes()).filter(|&v| lattice.is_reachable(v)) {
            for &e in lattice.exits(from) {
                let edge = lattice.edge(e);
                if !lattice.is_reachable(edge.to) {
                    continue;
                }
                if !self.config.accepts_ascr(edge.ascr) {
                    trace!(edge = e, ascr = edge.ascr, "acoustic score out of range");
                    skipped += 1;
                    continue;
                }
                let Some(term_id) = self.vocab.id(&edge.word) else {
                    trace!(edge = e, word = edge.word.as_str(), "word not in vocabulary");
                    skipped += 1;
                    continue;
                };
                if edge.start_frame > edge.end_frame {
                    trace!(edge = e, "edge ends before it starts");
                    skipped += 1;
                    continue;
                }
                self.buckets[term_id].push(Hit {
                    utterance_id: utterance_id.to_string(),
                    word: edge.word.clone(),
                    subseq_word: lattice.node(edge.to).word.clone(),
                    term_id,
                    start_time: lattice.frames_to_seconds(edge.start_frame),
                    end_time: lattice.frames_to_seconds(edge.end_frame),
                    ascr: self.config.scaled_ascr(edge.ascr, acoustic_scale),
                    alpha: edge.alpha,
                    beta: edge.beta,
                    norm,
                    from_id: from,
                    to_id: edge.to,
                });
                added += 1;
            }
        }
        debug!(utterance = utterance_id, added, skipped, "indexed lattice");
        added
    }

    /// Find every chain of hits, one per query term in order, where each hit
    /// starts within the adjacency window after the previous one ends.
    ///
    /// A term outside the vocabulary is an error; a query that simply has
    /// no match returns an empty list.  Matches are ordered by utterance,
    /// best score first.
    pub fn search<S: AsRef<str>>(
        &self,
        terms: &[S],
        lm: &dyn LanguageModel,
        acoustic_scale: f32,
    ) -> Result<Vec<TermMatch>> {
        let ids = terms
            .iter()
            .map(|t| {
                let t = t.as_ref();
                self.vocab.id(t).ok_or_else(|| {
                    warn!(term = t, "query term not indexed");
                    IndexError::UnknownTerm(t.to_string())
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let Some((&first, rest)) = ids.split_first() else {
            return Ok(Vec::new());
        };

        let mut queue: Vec<PartialPath> = self.buckets[first].iter().map(PartialPath::seed).collect();
        debug!(step = 0, paths = queue.len(), "seeded query");
        for (step, &term) in rest.iter().enumerate() {
            if queue.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for hit in &self.buckets[term] {
                for path in &queue {
                    if path.accepts(hit, self.config.interval) {
                        next.push(path.extended(hit));
                    }
                }
            }
            debug!(step = step + 1, paths = next.len(), "joined query term");
            queue = next;
        }

        let mut matches = queue
            .iter()
            .map(|path| {
                Ok(TermMatch {
                    utterance_id: path.utterance_id().to_string(),
                    score: path.posterior(lm, &self.config, acoustic_scale)?,
                    hits: path.hits().iter().map(|&h| h.clone()).collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        matches.sort_by(|a, b| {
            a.utterance_id
                .cmp(&b.utterance_id)
                .then(b.score.cmp(&a.score))
        });
        debug!(results = matches.len(), "query finished");
        Ok(matches)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        persist::write_atomic(path.as_ref(), |w| self.write_to(w))
    }

    pub fn write_to(&self, w: &mut dyn Write) -> Result<()> {
        writeln!(w, "# Words: {}", self.vocab.len())?;
        writeln!(w)?;
        for (id, word) in self.vocab.words().iter().enumerate() {
            writeln!(w, "{}:{}", id, word)?;
            for hit in &self.buckets[id] {
                writeln!(
                    w,
                    "({}, {:.2}, {:.2}, {}, {}, {}, {}, {}, {}, {})",
                    hit.utterance_id,
                    hit.start_time,
                    hit.end_time,
                    hit.ascr,
                    hit.alpha,
                    hit.beta,
                    hit.norm,
                    hit.from_id,
                    hit.to_id,
                    hit.subseq_word
                )?;
            }
        }
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        Self::read_from(persist::open(path.as_ref())?)
    }

    /// Parse an index written by [`TermIndex::write_to`].
    pub fn read_from<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader.lines().enumerate();
        let n_word = match lines.next() {
            Some((_, line)) => parse_word_count(&line?)?,
            None => return Err(IndexError::format(1, "empty index file")),
        };
        let mut words: Vec<Option<String>> = vec![None; n_word];
        let mut buckets: Vec<Vec<Hit>> = vec![Vec::new(); n_word];
        let mut current: Option<TermId> = None;
        let mut last_line = 1;
        for (i, line) in lines {
            let line = line?;
            let lineno = i + 1;
            last_line = lineno;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('(') {
                let term_id = current
                    .ok_or_else(|| IndexError::format(lineno, "hit before any word header"))?;
                let word = words[term_id].clone().unwrap_or_default();
                buckets[term_id].push(parse_hit(line, lineno, term_id, word)?);
            } else {
                let (id, word) = line
                    .split_once(':')
                    .ok_or_else(|| IndexError::format(lineno, "expected <idx>:<word>"))?;
                let id: TermId = id
                    .trim()
                    .parse()
                    .map_err(|_| IndexError::format(lineno, "bad word index"))?;
                if id >= n_word {
                    return Err(IndexError::format(
                        lineno,
                        format!("word index {} out of range", id),
                    ));
                }
                words[id] = Some(word.trim().to_string());
                current = Some(id);
            }
        }
        let words = words
            .into_iter()
            .enumerate()
            .map(|(id, w)| {
                w.ok_or_else(|| IndexError::format(last_line, format!("word {} missing", id)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            vocab: Vocabulary::from_words(words),
            buckets,
            config: SearchConfig::default(),
        })
    }
}

fn parse_word_count(line: &str) -> Result<usize> {
    line.trim()
        .strip_prefix("# Words:")
        .and_then(|n| n.trim().parse().ok())
        .ok_or_else(|| IndexError::format(1, "expected '# Words: <n>'"))
}

fn parse_hit(line: &str, lineno: usize, term_id: TermId, word: String) -> Result<Hit> {
    let bad = |what: &str| IndexError::format(lineno, format!("bad {} in hit", what));
    let body = line
        .strip_prefix('(')
        .and_then(|l| l.strip_suffix(')'))
        .ok_or_else(|| bad("brackets"))?;
    // utterance ids may contain the separator, so split from the right
    let mut fields: Vec<&str> = body.rsplitn(10, ", ").collect();
    fields.reverse();
    if fields.len() != 10 {
        return Err(IndexError::format(
            lineno,
            format!("expected 10 fields, found {}", fields.len()),
        ));
    }
    let time = |s: &str, what: &str| s.trim().parse::<f32>().map(f64::from).map_err(|_| bad(what));
    let score = |s: &str, what: &str| s.trim().parse::<LogProb>().map_err(|_| bad(what));
    let node = |s: &str, what: &str| s.trim().parse::<usize>().map_err(|_| bad(what));
    let hit = Hit {
        utterance_id: fields[0].to_string(),
        word,
        subseq_word: fields[9].to_string(),
        term_id,
        start_time: time(fields[1], "start time")?,
        end_time: time(fields[2], "end time")?,
        ascr: score(fields[3], "ascr")?,
        alpha: score(fields[4], "alpha")?,
        beta: score(fields[5], "beta")?,
        norm: score(fields[6], "norm")?,
        from_id: node(fields[7], "from id")?,
        to_id: node(fields[8], "to id")?,
    };
    if hit.start_time > hit.end_time {
        return Err(bad("time span"));
    }
    Ok(hit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{LatticeEdge, WordLattice};
    use crate::lm::BigramScore;
    use std::io::Cursor;

    struct FlatModel;

    impl LanguageModel for FlatModel {
        fn bigram_score(&self, _prev: &str, _word: &str) -> Result<BigramScore> {
            Ok(BigramScore {
                log_prob: -10,
                n_used: 2,
            })
        }
    }

    fn vocab() -> Vocabulary {
        Vocabulary::from_words(["jin", "tian", "jie", "mu"])
    }

    /// A single-path lattice for "jin tian jie mu" at 100 frames/s.
    fn jin_tian_jie_mu(tian: (u32, u32)) -> WordLattice {
        let mut b = WordLattice::builder(100);
        let s = b.add_node("<s>", 0);
        let jin = b.add_node("jin", 10);
        let tian_node = b.add_node("tian", tian.0);
        let jie = b.add_node("jie", 56);
        let mu = b.add_node("mu", 81);
        let end = b.add_node("</s>", 101);
        let edges = [
            LatticeEdge::new(s, jin, "<s>", 0, 9, -10),
            LatticeEdge::new(jin, tian_node, "jin", 10, 30, -100),
            LatticeEdge::new(tian_node, jie, "tian", tian.0, tian.1, -200),
            LatticeEdge::new(jie, mu, "jie", 56, 80, -300),
            LatticeEdge::new(mu, end, "mu", 81, 100, -400),
        ];
        for edge in edges {
            let edge = edge.with_alpha_beta(-1000, -2000);
            b.add_edge(edge).unwrap();
        }
        b.with_norm(-500).build(s, end).unwrap()
    }

    #[test]
    fn it_extracts_hits() {
        let mut index = TermIndex::new(vocab());
        let added = index.add_hits("u1", &jin_tian_jie_mu((32, 55)), 0.5);
        assert_eq!(added, 4);
        let jin = &index.hits(0)[0];
        assert_eq!(jin.word, "jin");
        assert_eq!(jin.subseq_word, "tian");
        assert_eq!(jin.start_time, 0.10);
        assert_eq!(jin.end_time, 0.30);
        assert_eq!(jin.ascr, -100 * 1024 / 2);
        assert_eq!((jin.alpha, jin.beta, jin.norm), (-1000, -2000, -500));
        assert_eq!((jin.from_id, jin.to_id), (1, 2));
    }

    #[test]
    fn it_skips_invalid_edges() {
        let mut b = WordLattice::builder(100);
        let s = b.add_node("<s>", 0);
        let x = b.add_node("jin", 10);
        let y = b.add_node("tian", 20);
        let e = b.add_node("</s>", 30);
        b.add_edge(LatticeEdge::new(s, x, "<s>", 0, 9, 0)).unwrap();
        // positive scores are invalid
        b.add_edge(LatticeEdge::new(x, y, "jin", 10, 19, 5)).unwrap();
        // pruned
        b.add_edge(LatticeEdge::new(x, y, "jin", 10, 19, i32::MIN)).unwrap();
        // out of vocabulary
        b.add_edge(LatticeEdge::new(x, y, "ji", 10, 19, -1)).unwrap();
        b.add_edge(LatticeEdge::new(y, e, "tian", 20, 29, -1)).unwrap();
        // leads nowhere
        let stray = b.add_node("mu", 25);
        b.add_edge(LatticeEdge::new(y, stray, "tian", 20, 24, -1)).unwrap();
        let lat = b.build(s, e).unwrap();
        let mut index = TermIndex::new(vocab());
        assert_eq!(index.add_hits("u1", &lat, 1.0), 1);
        assert!(index.hits(0).is_empty());
        assert_eq!(index.hits(1).len(), 1);
    }

    #[test]
    fn it_finds_adjacent_terms() {
        let mut index = TermIndex::new(vocab());
        index.add_hits("u1", &jin_tian_jie_mu((32, 55)), 1.0);
        let matches = index
            .search(&["jin", "tian", "jie", "mu"], &FlatModel, 1.0)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].utterance_id, "u1");
        let words: Vec<&str> = matches[0].hits.iter().map(|h| h.word.as_str()).collect();
        assert_eq!(words, ["jin", "tian", "jie", "mu"]);
        assert_eq!(matches[0].span(), (0.10, 1.00));
    }

    #[test]
    fn it_rejects_distant_terms() {
        let mut index = TermIndex::new(vocab());
        index.add_hits("u1", &jin_tian_jie_mu((90, 110)), 1.0);
        let matches = index.search(&["jin", "tian"], &FlatModel, 1.0).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn it_keeps_utterances_apart() {
        let mut index = TermIndex::new(vocab());
        index.add_hits("u2", &jin_tian_jie_mu((32, 55)), 1.0);
        index.add_hits("u1", &jin_tian_jie_mu((32, 55)), 1.0);
        let matches = index.search(&["jin", "tian"], &FlatModel, 1.0).unwrap();
        let utts: Vec<&str> = matches.iter().map(|m| m.utterance_id.as_str()).collect();
        assert_eq!(utts, ["u1", "u2"]);
        for m in &matches {
            assert!(m.hits.iter().all(|h| h.utterance_id == m.utterance_id));
        }
    }

    #[test]
    fn it_reports_unknown_terms() {
        let index = TermIndex::new(vocab());
        assert!(matches!(
            index.search(&["jin", "ba"], &FlatModel, 1.0),
            Err(IndexError::UnknownTerm(t)) if t == "ba"
        ));
        let empty: [&str; 0] = [];
        assert!(index.search(&empty, &FlatModel, 1.0).unwrap().is_empty());
        assert!(index.search(&["jin"], &FlatModel, 1.0).unwrap().is_empty());
    }

    #[test]
    fn it_round_trips_through_text() {
        let mut index = TermIndex::new(vocab());
        index.add_hits("u1", &jin_tian_jie_mu((32, 55)), 0.05);
        let mut buf = Vec::new();
        index.write_to(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("# Words: 4\n\n0:jin\n(u1, 0.10, 0.30, "));
        let back = TermIndex::read_from(Cursor::new(buf)).unwrap();
        assert_eq!(back.vocabulary(), index.vocabulary());
        for term in 0..4 {
            let (a, b) = (index.hits(term), back.hits(term));
            assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(b) {
                assert!((x.start_time - y.start_time).abs() < 0.005);
                assert!((x.end_time - y.end_time).abs() < 0.005);
                assert_eq!((x.ascr, x.alpha, x.beta, x.norm), (y.ascr, y.alpha, y.beta, y.norm));
                assert_eq!((x.from_id, x.to_id), (y.from_id, y.to_id));
                assert_eq!((&x.word, &x.subseq_word), (&y.word, &y.subseq_word));
                assert_eq!(x.utterance_id, y.utterance_id);
            }
        }
    }

    #[test]
    fn it_reads_index_files() {
        let index = TermIndex::read("testdata/term_index.txt").unwrap();
        assert_eq!(index.vocabulary().len(), 4);
        assert_eq!(index.hits(1).len(), 2);
        assert_eq!(index.hits(1)[1].subseq_word, "jie");
        let matches = index.search(&["jin", "tian"], &FlatModel, 1.0).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].hits[1].start_time, f64::from(0.32f32));
    }

    #[test]
    fn it_rejects_malformed_files() {
        let cases = [
            "",
            "# Words: x\n",
            "# Words: 1\n\n(u1, 0.10, 0.30, 0, 0, 0, 0, 1, 2, tian)\n",
            "# Words: 1\n\n3:jin\n",
            "# Words: 1\n\n0:jin\n(u1, 0.10, 0.30, 0, 0, 0, 0, 1, 2)\n",
            "# Words: 1\n\n0:jin\n(u1, 0.10, abc, 0, 0, 0, 0, 1, 2, tian)\n",
            "# Words: 2\n\n0:jin\n",
        ];
        for case in cases {
            assert!(
                matches!(
                    TermIndex::read_from(Cursor::new(case)),
                    Err(IndexError::Format { .. })
                ),
                "accepted {:?}",
                case
            );
        }
    }

    #[test]
    fn it_keeps_separators_in_utterance_ids() {
        let mut index = TermIndex::new(vocab());
        index.add_hits("news, part 2", &jin_tian_jie_mu((32, 55)), 1.0);
        let mut buf = Vec::new();
        index.write_to(&mut buf).unwrap();
        let back = TermIndex::read_from(Cursor::new(buf)).unwrap();
        assert_eq!(back.hits(0)[0].utterance_id, "news, part 2");
        assert_eq!(back.hits(0)[0].subseq_word, "tian");
        assert_eq!(back.hits(0)[0].ascr, -100 * 1024);
    }

    #[test]
    fn it_reports_the_last_line_for_missing_words() {
        let err = TermIndex::read_from(Cursor::new("# Words: 2\n\n0:jin\n")).unwrap_err();
        assert!(matches!(err, IndexError::Format { line: 3, .. }), "{:?}", err);
    }

    #[test]
    fn it_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let mut index = TermIndex::new(vocab());
        index.add_hits("u1", &jin_tian_jie_mu((32, 55)), 1.0);
        index.write(&path).unwrap();
        let back = TermIndex::read(&path).unwrap();
        assert_eq!(back.num_hits(), 4);
    }
}
