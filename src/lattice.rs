//! Read-only view of a recognition lattice plus an in-memory implementation.
//!
//! Nodes and edges live in arenas and are addressed by integer ids; nothing
//! holds references across the graph.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use crate::error::{IndexError, Result};
use crate::logmath::{LogMath, LogProb};

pub type NodeId = usize;
pub type EdgeId = usize;

/// A lattice node: the word hypothesis starting at `start_frame`.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeNode {
    pub word: String,
    pub start_frame: u32,
}

/// A lattice edge (link) with its time span and scores.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub word: String,
    pub start_frame: u32,
    pub end_frame: u32,
    /// Raw acoustic score.
    pub ascr: LogProb,
    /// Forward likelihood, including this edge.
    pub alpha: LogProb,
    /// Backward likelihood, excluding this edge.
    pub beta: LogProb,
}

impl LatticeEdge {
    pub fn new(
        from: NodeId,
        to: NodeId,
        word: &str,
        start_frame: u32,
        end_frame: u32,
        ascr: LogProb,
    ) -> Self {
        Self {
            from,
            to,
            word: word.to_string(),
            start_frame,
            end_frame,
            ascr,
            alpha: 0,
            beta: 0,
        }
    }

    pub fn with_alpha_beta(mut self, alpha: LogProb, beta: LogProb) -> Self {
        self.alpha = alpha;
        self.beta = beta;
        self
    }
}

/// What the indexers need from a lattice.
pub trait Lattice {
    fn num_nodes(&self) -> usize;
    fn node(&self, id: NodeId) -> &LatticeNode;
    fn edge(&self, id: EdgeId) -> &LatticeEdge;
    /// Edges leaving `node`.
    fn exits(&self, node: NodeId) -> &[EdgeId];
    /// Edges entering `node`.
    fn entries(&self, node: NodeId) -> &[EdgeId];
    fn start(&self) -> NodeId;
    fn end(&self) -> NodeId;
    /// Frames per second.
    fn frame_rate(&self) -> u32;
    /// Total forward mass of the lattice.
    fn norm(&self) -> LogProb;
    fn is_reachable(&self, node: NodeId) -> bool;

    /// Posterior log-probability of an edge.
    fn posterior(&self, edge: EdgeId) -> LogProb {
        let e = self.edge(edge);
        e.alpha.saturating_add(e.beta).saturating_sub(self.norm())
    }

    fn frames_to_seconds(&self, frame: u32) -> f64 {
        f64::from(frame) / f64::from(self.frame_rate())
    }
}

/// Reachable nodes in topological order, start node first.  Nodes that are
/// not ordered by their edges are ordered by start frame, then id.
pub fn topological_order<L: Lattice + ?Sized>(lattice: &L) -> Result<Vec<NodeId>> {
    let n = lattice.num_nodes();
    let mut in_degree = vec![0usize; n];
    let mut total = 0;
    for node in (0..n).filter(|&v| lattice.is_reachable(v)) {
        total += 1;
        in_degree[node] = lattice
            .entries(node)
            .iter()
            .filter(|&&e| lattice.is_reachable(lattice.edge(e).from))
            .count();
    }
    let mut ready: BinaryHeap<Reverse<(u32, NodeId)>> = (0..n)
        .filter(|&v| lattice.is_reachable(v) && in_degree[v] == 0)
        .map(|v| Reverse((lattice.node(v).start_frame, v)))
        .collect();
    let mut order = Vec::with_capacity(total);
    while let Some(Reverse((_, node))) = ready.pop() {
        order.push(node);
        for &e in lattice.exits(node) {
            let to = lattice.edge(e).to;
            if !lattice.is_reachable(to) {
                continue;
            }
            in_degree[to] -= 1;
            if in_degree[to] == 0 {
                ready.push(Reverse((lattice.node(to).start_frame, to)));
            }
        }
    }
    if order.len() != total {
        return Err(IndexError::GraphInvariant(format!(
            "lattice has a cycle: ordered {} of {} reachable nodes",
            order.len(),
            total
        )));
    }
    Ok(order)
}

/// An in-memory lattice.
#[derive(Debug, Clone)]
pub struct WordLattice {
    nodes: Vec<LatticeNode>,
    edges: Vec<LatticeEdge>,
    exits: Vec<Vec<EdgeId>>,
    entries: Vec<Vec<EdgeId>>,
    start: NodeId,
    end: NodeId,
    frame_rate: u32,
    norm: LogProb,
    reachable: Vec<bool>,
}

impl WordLattice {
    pub fn builder(frame_rate: u32) -> WordLatticeBuilder {
        WordLatticeBuilder::new(frame_rate)
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn set_norm(&mut self, norm: LogProb) {
        self.norm = norm;
    }

    /// Forward-backward pass over the reachable part of the lattice.
    ///
    /// Each edge is weighted by its acoustic score times `acoustic_scale`.
    /// Fills in alpha and beta for every reachable edge and sets the
    /// normalizer to the total mass arriving at the end node.
    pub fn compute_posteriors(&mut self, lmath: &LogMath, acoustic_scale: f32) -> Result<()> {
        let order = topological_order(&*self)?;
        let weight = |e: &LatticeEdge| (f64::from(e.ascr) * f64::from(acoustic_scale)) as LogProb;
        let live = |lat: &Self, e: EdgeId| {
            let edge = &lat.edges[e];
            lat.reachable[edge.from] && lat.reachable[edge.to]
        };

        let mut forward: Vec<Option<LogProb>> = vec![None; self.nodes.len()];
        forward[self.start] = Some(0);
        for &node in &order {
            let Some(mass) = forward[node] else {
                continue;
            };
            for i in 0..self.exits[node].len() {
                let e = self.exits[node][i];
                if !live(self, e) {
                    continue;
                }
                let alpha = mass.saturating_add(weight(&self.edges[e]));
                self.edges[e].alpha = alpha;
                let to = self.edges[e].to;
                forward[to] = Some(match forward[to] {
                    None => alpha,
                    Some(acc) => lmath.add(acc, alpha)?,
                });
            }
        }

        let mut backward: Vec<Option<LogProb>> = vec![None; self.nodes.len()];
        backward[self.end] = Some(0);
        for &node in order.iter().rev() {
            let mut mass = backward[node];
            for i in 0..self.exits[node].len() {
                let e = self.exits[node][i];
                if !live(self, e) {
                    continue;
                }
                let Some(after) = backward[self.edges[e].to] else {
                    continue;
                };
                self.edges[e].beta = after;
                let through = after.saturating_add(weight(&self.edges[e]));
                mass = Some(match mass {
                    None => through,
                    Some(acc) => lmath.add(acc, through)?,
                });
            }
            if node != self.end {
                backward[node] = mass;
            }
        }

        self.norm = forward[self.end].ok_or_else(|| {
            IndexError::InvalidLattice("end node is not reachable from start".to_string())
        })?;
        Ok(())
    }
}

impl Lattice for WordLattice {
    fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn node(&self, id: NodeId) -> &LatticeNode {
        &self.nodes[id]
    }

    fn edge(&self, id: EdgeId) -> &LatticeEdge {
        &self.edges[id]
    }

    fn exits(&self, node: NodeId) -> &[EdgeId] {
        &self.exits[node]
    }

    fn entries(&self, node: NodeId) -> &[EdgeId] {
        &self.entries[node]
    }

    fn start(&self) -> NodeId {
        self.start
    }

    fn end(&self) -> NodeId {
        self.end
    }

    fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    fn norm(&self) -> LogProb {
        self.norm
    }

    fn is_reachable(&self, node: NodeId) -> bool {
        self.reachable[node]
    }
}

/// Incrementally assembles a [`WordLattice`].
#[derive(Debug, Clone)]
pub struct WordLatticeBuilder {
    nodes: Vec<LatticeNode>,
    edges: Vec<LatticeEdge>,
    frame_rate: u32,
    norm: LogProb,
}

impl WordLatticeBuilder {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            frame_rate,
            norm: 0,
        }
    }

    pub fn add_node(&mut self, word: &str, start_frame: u32) -> NodeId {
        self.nodes.push(LatticeNode {
            word: word.to_string(),
            start_frame,
        });
        self.nodes.len() - 1
    }

    pub fn add_edge(&mut self, edge: LatticeEdge) -> Result<EdgeId> {
        for id in [edge.from, edge.to] {
            if id >= self.nodes.len() {
                return Err(IndexError::InvalidLattice(format!("no node {}", id)));
            }
        }
        self.edges.push(edge);
        Ok(self.edges.len() - 1)
    }

    pub fn with_norm(mut self, norm: LogProb) -> Self {
        self.norm = norm;
        self
    }

    /// Link up the graph and mark the nodes lying on some start-to-end path.
    pub fn build(self, start: NodeId, end: NodeId) -> Result<WordLattice> {
        let n = self.nodes.len();
        if start >= n || end >= n {
            return Err(IndexError::InvalidLattice(format!(
                "start {} or end {} out of range for {} nodes",
                start, end, n
            )));
        }
        if self.frame_rate == 0 {
            return Err(IndexError::InvalidLattice("frame rate is zero".to_string()));
        }
        let mut exits = vec![Vec::new(); n];
        let mut entries = vec![Vec::new(); n];
        for (id, edge) in self.edges.iter().enumerate() {
            exits[edge.from].push(id);
            entries[edge.to].push(id);
        }
        let from_start = flood(start, n, |v| exits[v].iter().map(|&e| self.edges[e].to));
        let to_end = flood(end, n, |v| entries[v].iter().map(|&e| self.edges[e].from));
        let reachable = from_start
            .into_iter()
            .zip(to_end)
            .map(|(a, b)| a && b)
            .collect();
        Ok(WordLattice {
            nodes: self.nodes,
            edges: self.edges,
            exits,
            entries,
            start,
            end,
            frame_rate: self.frame_rate,
            norm: self.norm,
            reachable,
        })
    }
}

fn flood<F, I>(seed: NodeId, n: usize, next: F) -> Vec<bool>
where
    F: Fn(NodeId) -> I,
    I: Iterator<Item = NodeId>,
{
    let mut seen = vec![false; n];
    let mut queue = VecDeque::from([seed]);
    seen[seed] = true;
    while let Some(v) = queue.pop_front() {
        for w in next(v) {
            if !seen[w] {
                seen[w] = true;
                queue.push_back(w);
            }
        }
    }
    seen
}
