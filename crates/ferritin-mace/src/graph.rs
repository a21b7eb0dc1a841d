//! Atomic graphs and the residue graph construction rule.
use crate::error::{MaceError, Result};
use candle_core::{Device, Tensor};
use itertools::Itertools;
use std::collections::BTreeSet;

/// Directed edge `[source, target]`.
pub type Edge = [u32; 2];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphParams {
    pub max_edges: usize,
    pub min_residue_distance: i64,
    pub radius: f32,
    pub k: usize,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            max_edges: usize::MAX,
            min_residue_distance: 5,
            radius: 5.0,
            k: 10,
        }
    }
}

fn squared_distance(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    (0..3).map(|i| (a[i] - b[i]) * (a[i] - b[i])).sum()
}

/// Candidate edges `j -> i` of one structure with their squared lengths.
fn candidate_edges(positions: &[[f32; 3]], residue_index: &[i64], params: &GraphParams) -> Vec<(f32, Edge)> {
    let n = positions.len().min(residue_index.len());
    let radius_sq = params.radius * params.radius;
    let mut kept: Vec<(f32, Edge)> = Vec::new();

    for i in 0..n {
        let candidates: Vec<(f32, usize)> = (0..n)
            .filter(|&j| j != i)
            .filter(|&j| (residue_index[i] - residue_index[j]).abs() >= params.min_residue_distance)
            .map(|j| (squared_distance(&positions[i], &positions[j]), j))
            .sorted_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .collect();
        for (rank, &(d2, j)) in candidates.iter().enumerate() {
            if rank < params.k || d2 <= radius_sq {
                kept.push((d2, [j as u32, i as u32]));
            }
        }
    }
    kept
}

fn sorted_edges(edges: impl IntoIterator<Item = Edge>) -> Vec<Edge> {
    edges.into_iter().sorted_by_key(|e| (e[1], e[0])).dedup().collect()
}

/// Edges `j -> i` between residues at least `min_residue_distance` apart in sequence.
///
/// A candidate is kept when it lies within `radius` or is among the `k` nearest
/// candidates of its target. Above `max_edges` only the shortest edges survive.
/// The result is sorted by `(target, source)`.
pub fn build_graph(positions: &[[f32; 3]], residue_index: &[i64], params: &GraphParams) -> Vec<Edge> {
    let mut kept = candidate_edges(positions, residue_index, params);
    if kept.len() > params.max_edges {
        kept.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        kept.truncate(params.max_edges);
    }
    sorted_edges(kept.into_iter().map(|(_, e)| e))
}

/// [`build_graph`] over several structures sharing one edge budget.
///
/// `max_edges` bounds the edges of the whole batch; above it the shortest edges
/// survive regardless of which structure they belong to. Edges are returned per
/// structure with local node indices.
pub fn build_graphs(structures: &[(&[[f32; 3]], &[i64])], params: &GraphParams) -> Vec<Vec<Edge>> {
    let mut kept: Vec<(f32, usize, Edge)> = structures
        .iter()
        .enumerate()
        .flat_map(|(g, (positions, residues))| {
            candidate_edges(positions, residues, params)
                .into_iter()
                .map(move |(d2, e)| (d2, g, e))
        })
        .collect();
    if kept.len() > params.max_edges {
        kept.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        kept.truncate(params.max_edges);
    }
    let mut per_graph = vec![Vec::new(); structures.len()];
    for (_, g, e) in kept {
        per_graph[g].push(e);
    }
    per_graph.into_iter().map(sorted_edges).collect()
}

/// Nodes that appear in no edge, in ascending order.
pub fn find_isolated_nodes(num_nodes: usize, edges: &[Edge]) -> BTreeSet<u32> {
    let mut seen = vec![false; num_nodes];
    for e in edges {
        for &v in e {
            if let Some(s) = seen.get_mut(v as usize) {
                *s = true;
            }
        }
    }
    seen.iter()
        .enumerate()
        .filter(|(_, s)| !**s)
        .map(|(i, _)| i as u32)
        .collect()
}

/// One graph: node types, positions and directed edges.
#[derive(Debug, Clone)]
pub struct AtomicGraph {
    pub node_types: Vec<u32>,
    pub positions: Vec<[f32; 3]>,
    pub edges: Vec<Edge>,
}

impl AtomicGraph {
    /// Fails with [`MaceError::IsolatedNodes`] when any node has no edge.
    pub fn new(node_types: Vec<u32>, positions: Vec<[f32; 3]>, edges: Vec<Edge>) -> Result<Self> {
        if node_types.len() != positions.len() {
            return Err(MaceError::Config(format!(
                "{} node types for {} positions",
                node_types.len(),
                positions.len()
            )));
        }
        if let Some(e) = edges.iter().find(|e| e.iter().any(|&v| v as usize >= positions.len())) {
            return Err(MaceError::Config(format!(
                "edge {e:?} points outside a graph of {} nodes",
                positions.len()
            )));
        }
        let isolated = find_isolated_nodes(positions.len(), &edges);
        if !isolated.is_empty() {
            return Err(MaceError::IsolatedNodes(isolated.into_iter().collect()));
        }
        Ok(Self {
            node_types,
            positions,
            edges,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.positions.len()
    }
}

/// Disjoint union of graphs, ready for the model.
#[derive(Debug, Clone)]
pub struct GraphBatch {
    /// `[num_nodes]` u32
    pub node_types: Tensor,
    /// `[num_nodes, 3]` f32
    pub positions: Tensor,
    /// `[2, num_edges]` u32
    pub edge_index: Tensor,
    /// `[num_nodes]` graph id of every node
    pub batch: Tensor,
    pub num_graphs: usize,
    pub nodes_per_graph: Vec<usize>,
}

impl GraphBatch {
    pub fn from_graphs(graphs: &[AtomicGraph], device: &Device) -> Result<Self> {
        let mut types = Vec::new();
        let mut positions = Vec::new();
        let (mut sources, mut targets) = (Vec::new(), Vec::new());
        let mut batch = Vec::new();
        let mut offset = 0u32;
        for (g, graph) in graphs.iter().enumerate() {
            types.extend_from_slice(&graph.node_types);
            positions.extend(graph.positions.iter().flatten().copied());
            for e in &graph.edges {
                sources.push(e[0] + offset);
                targets.push(e[1] + offset);
            }
            batch.extend(std::iter::repeat(g as u32).take(graph.num_nodes()));
            offset += graph.num_nodes() as u32;
        }
        let n = types.len();
        let e = sources.len();
        sources.extend(targets);
        Ok(Self {
            node_types: Tensor::from_vec(types, n, device)?,
            positions: Tensor::from_vec(positions, (n, 3), device)?,
            edge_index: Tensor::from_vec(sources, (2, e), device)?,
            batch: Tensor::from_vec(batch, n, device)?,
            num_graphs: graphs.len(),
            nodes_per_graph: graphs.iter().map(AtomicGraph::num_nodes).collect(),
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes_per_graph.iter().sum()
    }

    /// Same topology with new `[num_nodes, 3]` positions.
    pub fn with_positions(&self, positions: Tensor) -> Self {
        Self {
            positions,
            ..self.clone()
        }
    }
}
