//! Word positions within simplified confusion networks, and phrase search
//! over consecutive positions.

use std::io::{BufRead, Write};
use std::ops::Range;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::{IndexError, Result};
use crate::lattice::Lattice;
use crate::lite::LiteNetwork;
use crate::logmath::LogProb;
use crate::persist;
use crate::sausage::{ConfusionNetwork, SlotId};
use crate::vocab::{TermId, Vocabulary};

/// An utterance in which a word occupies some position.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotHit {
    pub utterance_id: String,
    pub post: LogProb,
}

/// Every utterance where a word was seen at one position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionBucket {
    pub position: SlotId,
    pub hits: Vec<SlotHit>,
}

/// A phrase found at consecutive positions of one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseMatch {
    pub utterance_id: String,
    /// Sum of the per-word posteriors.
    pub score: LogProb,
    pub first_position: SlotId,
    pub posteriors: Vec<LogProb>,
}

impl PhraseMatch {
    pub fn positions(&self) -> Range<SlotId> {
        self.first_position..self.first_position + self.posteriors.len()
    }
}

#[derive(Debug, Clone)]
struct PhrasePath<'a> {
    utterance_id: &'a str,
    first_position: SlotId,
    posteriors: Vec<LogProb>,
}

impl<'a> PhrasePath<'a> {
    fn next_position(&self) -> SlotId {
        self.first_position + self.posteriors.len()
    }

    fn extended(&self, post: LogProb) -> Self {
        let mut path = self.clone();
        path.posteriors.push(post);
        path
    }
}

/// Maps every vocabulary word to the positions it occupies, each with the
/// utterances (and posteriors) seen there.  Positions are kept ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionIndex {
    vocab: Vocabulary,
    words: Vec<Vec<PositionBucket>>,
    config: SearchConfig,
}

impl PositionIndex {
    pub fn new(vocab: Vocabulary) -> Self {
        let words = vec![Vec::new(); vocab.len()];
        Self {
            vocab,
            words,
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

    pub fn positions(&self, term: TermId) -> &[PositionBucket] {
        self.words.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    fn bucket(&self, term: TermId, position: SlotId) -> Option<&PositionBucket> {
        let buckets = &self.words[term];
        buckets
            .binary_search_by_key(&position, |b| b.position)
            .ok()
            .map(|i| &buckets[i])
    }

    pub fn num_hits(&self) -> usize {
        self.words
            .iter()
            .flatten()
            .map(|bucket| bucket.hits.len())
            .sum()
    }

    /// Record every vocabulary word of every slot.  Returns the number of
    /// entries added.
    pub fn add_utterance(&mut self, utterance_id: &str, network: &LiteNetwork) -> usize {
        let mut added = 0;
        for slot in network.slots() {
            let position = slot.id;
            for entry in &slot.entries {
                let Some(term) = self.vocab.id(&entry.word) else {
                    continue;
                };
                let buckets = &mut self.words[term];
                let i = match buckets.binary_search_by_key(&position, |b| b.position) {
                    Ok(i) => i,
                    Err(i) => {
                        buckets.insert(
                            i,
                            PositionBucket {
                                position,
                                hits: Vec::new(),
                            },
                        );
                        i
                    }
                };
                buckets[i].hits.push(SlotHit {
                    utterance_id: utterance_id.to_string(),
                    post: entry.post,
                });
                added += 1;
            }
        }
        debug!(utterance_id, slots = network.len(), added, "indexed utterance");
        added
    }

    /// Build, simplify and index the confusion network of a lattice.
    pub fn add_lattice<L: Lattice + ?Sized>(
        &mut self,
        utterance_id: &str,
        lattice: &L,
    ) -> Result<usize> {
        let lmath = self.config.logmath();
        let network = ConfusionNetwork::build(lattice)?;
        let lite = LiteNetwork::from_network(&network, lattice, &lmath)?;
        Ok(self.add_utterance(utterance_id, &lite))
    }

    /// Find the query terms at consecutive positions of one utterance.
    ///
    /// A term outside the vocabulary is an error.  Matches are ordered by
    /// utterance, best score first.
    pub fn search<S: AsRef<str>>(&self, terms: &[S]) -> Result<Vec<PhraseMatch>> {
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

        let mut queue: Vec<PhrasePath> = self.words[first]
            .iter()
            .flat_map(|bucket| {
                bucket.hits.iter().map(move |hit| PhrasePath {
                    utterance_id: &hit.utterance_id,
                    first_position: bucket.position,
                    posteriors: vec![hit.post],
                })
            })
            .collect();
        debug!(step = 0, paths = queue.len(), "seeded phrase");
        for (step, &term) in rest.iter().enumerate() {
            if queue.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for path in &queue {
                let Some(bucket) = self.bucket(term, path.next_position()) else {
                    continue;
                };
                for hit in &bucket.hits {
                    if hit.utterance_id == path.utterance_id {
                        next.push(path.extended(hit.post));
                    }
                }
            }
            debug!(step = step + 1, paths = next.len(), "joined phrase term");
            queue = next;
        }

        let mut matches: Vec<PhraseMatch> = queue
            .into_iter()
            .map(|path| PhraseMatch {
                utterance_id: path.utterance_id.to_string(),
                score: path
                    .posteriors
                    .iter()
                    .fold(0, |acc: LogProb, &p| acc.saturating_add(p)),
                first_position: path.first_position,
                posteriors: path.posteriors,
            })
            .collect();
        matches.sort_by(|a, b| {
            a.utterance_id
                .cmp(&b.utterance_id)
                .then(b.score.cmp(&a.score))
        });
        debug!(results = matches.len(), "phrase query finished");
        Ok(matches)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        persist::write_atomic(path.as_ref(), |w| self.write_to(w))
    }

    pub fn write_to(&self, w: &mut dyn Write) -> Result<()> {
        writeln!(w, "# Words: {}", self.vocab.len())?;
        for (id, word) in self.vocab.words().iter().enumerate() {
            writeln!(w, "WORD#{} {} ({})", id, word, self.words[id].len())?;
            for bucket in &self.words[id] {
                writeln!(w, "POS #{}", bucket.position)?;
                for hit in &bucket.hits {
                    writeln!(w, "({}, {})", hit.post, hit.utterance_id)?;
                }
            }
        }
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        Self::read_from(persist::open(path.as_ref())?)
    }

    /// Parse an index written by [`PositionIndex::write_to`].
    pub fn read_from<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader.lines().enumerate();
        let n_word = match lines.next() {
            Some((_, line)) => line?
                .trim()
                .strip_prefix("# Words:")
                .and_then(|n| n.trim().parse::<usize>().ok())
                .ok_or_else(|| IndexError::format(1, "expected '# Words: <n>'"))?,
            None => return Err(IndexError::format(1, "empty index file")),
        };
        let mut words: Vec<Option<String>> = vec![None; n_word];
        let mut buckets: Vec<Vec<PositionBucket>> = vec![Vec::new(); n_word];
        // word being read, with the number of positions its header announced
        let mut current: Option<(TermId, usize, usize)> = None;
        let mut lineno = 1;
        for (i, line) in lines {
            let line = line?;
            lineno = i + 1;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix("WORD#") {
                if let Some(prev) = current {
                    check_positions(prev, &buckets, lineno)?;
                }
                let (id, word, n_pos) = parse_word_header(header, lineno)?;
                if id >= n_word {
                    return Err(IndexError::format(
                        lineno,
                        format!("word index {} out of range", id),
                    ));
                }
                words[id] = Some(word);
                buckets[id].clear();
                current = Some((id, n_pos, lineno));
            } else if let Some(pos) = line.strip_prefix("POS #") {
                let (id, _, _) =
                    current.ok_or_else(|| IndexError::format(lineno, "position before any word"))?;
                let position: SlotId = pos
                    .trim()
                    .parse()
                    .map_err(|_| IndexError::format(lineno, "bad position"))?;
                buckets[id].push(PositionBucket {
                    position,
                    hits: Vec::new(),
                });
            } else if line.starts_with('(') {
                let bucket = match current {
                    Some((id, _, _)) => buckets[id].last_mut(),
                    None => None,
                };
                let bucket = bucket.ok_or_else(|| IndexError::format(lineno, "entry before any position"))?;
                bucket.hits.push(parse_slot_hit(line, lineno)?);
            } else {
                return Err(IndexError::format(lineno, format!("unexpected line {:?}", line)));
            }
        }
        if let Some(prev) = current {
            check_positions(prev, &buckets, lineno + 1)?;
        }
        let words = words
            .into_iter()
            .enumerate()
            .map(|(id, w)| {
                w.ok_or_else(|| IndexError::format(lineno, format!("word {} missing", id)))
            })
            .collect::<Result<Vec<_>>>()?;
        for word_buckets in &mut buckets {
            sort_positions(word_buckets);
        }
        Ok(Self {
            vocab: Vocabulary::from_words(words),
            words: buckets,
            config: SearchConfig::default(),
        })
    }
}

/// Sort buckets by position, merging buckets that share one.  Writers
/// append new positions as they appear, so files need not be ordered.
fn sort_positions(buckets: &mut Vec<PositionBucket>) {
    buckets.sort_by_key(|b| b.position);
    let mut merged: Vec<PositionBucket> = Vec::with_capacity(buckets.len());
    for bucket in buckets.drain(..) {
        match merged.last_mut() {
            Some(last) if last.position == bucket.position => last.hits.extend(bucket.hits),
            _ => merged.push(bucket),
        }
    }
    *buckets = merged;
}

fn check_positions(
    (id, n_pos, header_line): (TermId, usize, usize),
    buckets: &[Vec<PositionBucket>],
    lineno: usize,
) -> Result<()> {
    if buckets[id].len() != n_pos {
        return Err(IndexError::format(
            lineno,
            format!(
                "word on line {} announces {} positions, found {}",
                header_line,
                n_pos,
                buckets[id].len()
            ),
        ));
    }
    Ok(())
}

/// `<idx> <word> (<n_pos>)`
fn parse_word_header(header: &str, lineno: usize) -> Result<(TermId, String, usize)> {
    let bad = || IndexError::format(lineno, "expected 'WORD#<idx> <word> (<n_pos>)'");
    let (id, rest) = header.split_once(' ').ok_or_else(bad)?;
    let (word, n_pos) = rest.rsplit_once(' ').ok_or_else(bad)?;
    let id = id.parse().map_err(|_| bad())?;
    let n_pos = n_pos
        .strip_prefix('(')
        .and_then(|n| n.strip_suffix(')'))
        .and_then(|n| n.parse().ok())
        .ok_or_else(bad)?;
    if word.is_empty() {
        return Err(bad());
    }
    Ok((id, word.to_string(), n_pos))
}

/// `(<post>, <uttid>)`
fn parse_slot_hit(line: &str, lineno: usize) -> Result<SlotHit> {
    let bad = || IndexError::format(lineno, "expected '(<post>, <uttid>)'");
    let body = line
        .strip_prefix('(')
        .and_then(|l| l.strip_suffix(')'))
        .ok_or_else(bad)?;
    let (post, utterance_id) = body.split_once(", ").ok_or_else(bad)?;
    Ok(SlotHit {
        utterance_id: utterance_id.to_string(),
        post: post.trim().parse().map_err(|_| bad())?,
    })
}
