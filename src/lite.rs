//! Simplified confusion networks: one slot per node set, one entry per
//! distinct word.

use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::error::Result;
use crate::lattice::Lattice;
use crate::logmath::{LogMath, LogProb};
use crate::persist;
use crate::sausage::{ConfusionNetwork, SlotId};

/// A word and its summed posterior within one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct LiteEntry {
    pub word: String,
    pub post: LogProb,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiteSlot {
    pub id: SlotId,
    pub entries: Vec<LiteEntry>,
}

impl LiteSlot {
    fn new(id: SlotId) -> Self {
        Self {
            id,
            entries: Vec::new(),
        }
    }

    /// Log-add `post` into the entry for `word`, creating it if needed.
    /// Merged scores are capped at probability one.
    fn add(&mut self, word: &str, post: LogProb, lmath: &LogMath) -> Result<()> {
        match self.entries.iter_mut().find(|e| e.word == word) {
            Some(entry) => entry.post = lmath.add(entry.post, post)?.min(0),
            None => self.entries.push(LiteEntry {
                word: word.to_string(),
                post: post.min(0),
            }),
        }
        Ok(())
    }

    pub fn entry(&self, word: &str) -> Option<&LiteEntry> {
        self.entries.iter().find(|e| e.word == word)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LiteNetwork {
    slots: Vec<LiteSlot>,
}

impl LiteNetwork {
    /// Collapse each node set's outgoing edges into per-word posteriors.
    pub fn from_network<L: Lattice + ?Sized>(
        network: &ConfusionNetwork,
        lattice: &L,
        lmath: &LogMath,
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(network.len());
        for ns in network.node_sets() {
            let mut slot = LiteSlot::new(ns.id);
            for &e in network.exit_edges(ns.id) {
                slot.add(&lattice.edge(e).word, lattice.posterior(e), lmath)?;
            }
            slots.push(slot);
        }
        debug!(slots = slots.len(), "simplified confusion network");
        Ok(Self { slots })
    }

    pub fn from_slots(slots: Vec<LiteSlot>) -> Self {
        Self { slots }
    }

    /// Merge duplicate words within each slot again.  A network that is
    /// already simplified comes back unchanged.
    pub fn simplified(&self, lmath: &LogMath) -> Result<Self> {
        let mut slots = Vec::with_capacity(self.slots.len());
        for old in &self.slots {
            let mut slot = LiteSlot::new(old.id);
            for entry in &old.entries {
                slot.add(&entry.word, entry.post, lmath)?;
            }
            slots.push(slot);
        }
        Ok(Self { slots })
    }

    pub fn slots(&self) -> &[LiteSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        persist::write_atomic(path.as_ref(), |w| self.write_to(w))
    }

    pub fn write_to(&self, w: &mut dyn Write) -> Result<()> {
        for slot in &self.slots {
            writeln!(w, "Node {}", slot.id)?;
            for entry in &slot.entries {
                writeln!(w, "({}, {})", entry.word, entry.post)?;
            }
        }
        Ok(())
    }
}
