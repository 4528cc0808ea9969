//! Confusion networks ("sausages") built from lattices.
//!
//! Lattice nodes are grouped into an ordered chain of node sets; every
//! lattice edge is then filed under one transition between neighbouring
//! node sets, where it competes with the other hypotheses for that slot.
//! Edges spanning several slots join the transition whose words and time
//! bracket they resemble most.

use ordered_float::OrderedFloat;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::error::{IndexError, Result};
use crate::lattice::{topological_order, EdgeId, Lattice, LatticeEdge, NodeId};
use crate::persist;

/// Position of a node set in the network
pub type SlotId = usize;

const MATCH: usize = 0;
const MISMATCH: usize = 2;
const INSERT: usize = 1;
const DELETE: usize = 1;

/// Lattice nodes sharing one position of the network.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSet {
    pub id: SlotId,
    pub nodes: Vec<NodeId>,
    /// Earliest start frame of the member nodes.
    pub t_min: u32,
    /// Latest start frame of the member nodes.
    pub t_max: u32,
    pub initial: bool,
    pub is_final: bool,
    /// Index of the edge set leading into this node set.
    pub entry: Option<usize>,
    /// Index of the edge set leading out of it.
    pub exit: Option<usize>,
}

impl NodeSet {
    fn new(id: SlotId) -> Self {
        Self {
            id,
            nodes: Vec::new(),
            t_min: 0,
            t_max: 0,
            initial: false,
            is_final: false,
            entry: None,
            exit: None,
        }
    }

    fn add(&mut self, node: NodeId, start_frame: u32) {
        if self.nodes.is_empty() {
            self.t_min = start_frame;
            self.t_max = start_frame;
        } else {
            self.t_min = self.t_min.min(start_frame);
            self.t_max = self.t_max.max(start_frame);
        }
        self.nodes.push(node);
    }
}

/// Competing edges between two neighbouring node sets.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSet {
    pub from: SlotId,
    pub to: SlotId,
    pub edges: Vec<EdgeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionNetwork {
    node_sets: Vec<NodeSet>,
    edge_sets: Vec<EdgeSet>,
}

impl ConfusionNetwork {
    /// Build a network walking the lattice in topological order.
    pub fn build<L: Lattice + ?Sized>(lattice: &L) -> Result<Self> {
        let order = topological_order(lattice)?;
        Self::from_order(lattice, &order)
    }

    /// Build a network from a caller-supplied node order, start node first.
    ///
    /// A node joins the newest node set unless one of its predecessors is
    /// already in it, in which case it opens the next node set.  Fails if an
    /// edge's source node has not been placed in an earlier node set.
    pub fn from_order<L: Lattice + ?Sized>(lattice: &L, order: &[NodeId]) -> Result<Self> {
        if order.is_empty() {
            return Err(IndexError::GraphInvariant("no nodes to order".to_string()));
        }
        let mut first = NodeSet::new(0);
        first.initial = true;
        let mut net = Self {
            node_sets: vec![first],
            edge_sets: Vec::new(),
        };
        let mut slot_of: Vec<Option<SlotId>> = vec![None; lattice.num_nodes()];

        for (i, &node) in order.iter().enumerate() {
            if node >= slot_of.len() || slot_of[node].is_some() {
                return Err(IndexError::GraphInvariant(format!(
                    "node {} is unknown or ordered twice",
                    node
                )));
            }
            let mut current = net.node_sets.len() - 1;
            if i > 0 && net.has_connection(lattice, node, current, &slot_of) {
                current = net.open_node_set();
            }
            net.node_sets[current].add(node, lattice.node(node).start_frame);
            slot_of[node] = Some(current);

            for &e in lattice.entries(node) {
                let from = lattice.edge(e).from;
                if !lattice.is_reachable(from) {
                    continue;
                }
                let source = match slot_of[from] {
                    Some(slot) if slot < current => slot,
                    _ => {
                        return Err(IndexError::GraphInvariant(format!(
                            "source {} of edge {} into node {} is not in an earlier node set",
                            from, e, node
                        )))
                    }
                };
                let target = if current - source == 1 {
                    source
                } else {
                    net.best_edge_set(lattice, lattice.edge(e), source, current)
                };
                net.edge_sets[target].edges.push(e);
            }
        }

        if let Some(last) = net.node_sets.last_mut() {
            last.is_final = true;
        }
        debug!(
            node_sets = net.node_sets.len(),
            nodes = order.len(),
            "built confusion network"
        );
        Ok(net)
    }

    fn has_connection<L: Lattice + ?Sized>(
        &self,
        lattice: &L,
        node: NodeId,
        slot: SlotId,
        slot_of: &[Option<SlotId>],
    ) -> bool {
        lattice
            .entries(node)
            .iter()
            .any(|&e| slot_of[lattice.edge(e).from] == Some(slot))
    }

    /// Append a node set and the edge set linking it to the previous one.
    fn open_node_set(&mut self) -> SlotId {
        let prev = self.node_sets.len() - 1;
        let id = prev + 1;
        let es = self.edge_sets.len();
        self.edge_sets.push(EdgeSet {
            from: prev,
            to: id,
            edges: Vec::new(),
        });
        self.node_sets[prev].exit = Some(es);
        let mut ns = NodeSet::new(id);
        ns.entry = Some(es);
        self.node_sets.push(ns);
        id
    }

    /// Pick the transition between `source` and `current` that `edge` fits
    /// best.  Later transitions win ties.
    fn best_edge_set<L: Lattice + ?Sized>(
        &self,
        lattice: &L,
        edge: &LatticeEdge,
        source: SlotId,
        current: SlotId,
    ) -> usize {
        (source..current)
            .map(|k| {
                let candidate = &self.edge_sets[k];
                let score = if candidate.edges.is_empty() {
                    0.0
                } else {
                    let sim: f64 = candidate
                        .edges
                        .iter()
                        .map(|&x| similarity(&lattice.edge(x).word, &edge.word))
                        .sum();
                    let bracket = (self.node_sets[k].t_max, self.node_sets[k + 1].t_min);
                    let span = (edge.start_frame, edge.end_frame);
                    sim * time_overlap(bracket, span) / candidate.edges.len() as f64
                };
                (OrderedFloat(score), k)
            })
            .max_by_key(|&(score, _)| score)
            .map(|(_, k)| k)
            .unwrap_or(current - 1)
    }

    pub fn node_sets(&self) -> &[NodeSet] {
        &self.node_sets
    }

    pub fn edge_sets(&self) -> &[EdgeSet] {
        &self.edge_sets
    }

    /// Edges leaving a node set, empty for the final one.
    pub fn exit_edges(&self, slot: SlotId) -> &[EdgeId] {
        self.node_sets
            .get(slot)
            .and_then(|ns| ns.exit)
            .map(|es| self.edge_sets[es].edges.as_slice())
            .unwrap_or(&[])
    }

    pub fn final_node_set(&self) -> Option<&NodeSet> {
        self.node_sets.iter().find(|ns| ns.is_final)
    }

    pub fn len(&self) -> usize {
        self.node_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_sets.is_empty()
    }

    pub fn write<L: Lattice + ?Sized>(&self, lattice: &L, path: impl AsRef<Path>) -> Result<()> {
        persist::write_atomic(path.as_ref(), |w| self.write_to(lattice, w))
    }

    /// Dump every node set with the words and posteriors of its exit edges.
    pub fn write_to<L: Lattice + ?Sized>(&self, lattice: &L, w: &mut dyn Write) -> Result<()> {
        for ns in &self.node_sets {
            writeln!(
                w,
                "Node Set #{} {} {} {}:",
                ns.id,
                ns.nodes.len(),
                ns.t_min,
                ns.t_max
            )?;
            for &e in self.exit_edges(ns.id) {
                writeln!(w, "({}, {})", lattice.edge(e).word, lattice.posterior(e))?;
            }
        }
        Ok(())
    }
}

/// Edit distance where a substitution costs as much as a deletion plus an
/// insertion.
pub fn edit_distance(s: &str, t: &str) -> usize {
    let s: Vec<char> = s.chars().collect();
    let t: Vec<char> = t.chars().collect();
    let mut prev: Vec<usize> = (0..=t.len()).map(|j| j * INSERT).collect();
    let mut row = vec![0; t.len() + 1];
    for i in 1..=s.len() {
        row[0] = prev[0] + DELETE;
        for j in 1..=t.len() {
            let cost_m = prev[j - 1] + if s[i - 1] == t[j - 1] { MATCH } else { MISMATCH };
            let cost_i = row[j - 1] + INSERT;
            let cost_d = prev[j] + DELETE;
            row[j] = cost_m.min(cost_i).min(cost_d);
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[t.len()]
}

/// Similarity of two words (syllables) in (0, 1].
pub fn similarity(s: &str, t: &str) -> f64 {
    1.0 / (edit_distance(s, t) + 1) as f64
}

/// Fraction of the union of `bracket` and `span` (both in frames) covered
/// by their intersection.
pub fn time_overlap(bracket: (u32, u32), span: (u32, u32)) -> f64 {
    let (es_sf, es_ef) = (i64::from(bracket.0), i64::from(bracket.1));
    let (sf, ef) = (i64::from(span.0), i64::from(span.1));
    if ef <= es_sf || sf >= es_ef {
        return 0.0;
    }
    let (lft, overlap_lft) = if sf <= es_sf { (sf, es_sf) } else { (es_sf, sf) };
    let (rt, overlap_rt) = if ef <= es_ef { (es_ef, ef) } else { (ef, es_ef) };
    if rt == lft {
        return 0.0;
    }
    (overlap_rt - overlap_lft) as f64 / (rt - lft) as f64
}
