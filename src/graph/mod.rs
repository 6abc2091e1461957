//! Graph snapshots
//!
//! A [`GraphSnapshot`] is the immutable `(edge_list, edge_weight)` pair that
//! stays fixed for a whole window. Connectivity is directed: an edge
//! `(source, target)` carries messages from `source` into `target`, and no
//! symmetry is implied.
//!
//! Before unrolling, the snapshot is densified into a [`DenseGraph`] once and
//! shared by every timestep and every layer.

use crate::primitives::gnn::{scatter_edges, symmetric_normalize};
use crate::{Result, TrendGraphError};
use candle_core::{DType, Device, Tensor};

/// Static graph for one forward pass
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSnapshot {
    num_nodes: usize,
    edges: Vec<(usize, usize)>,
    weights: Vec<f32>,
}

impl GraphSnapshot {
    /// Create a validated snapshot
    ///
    /// Fails with `ShapeMismatch` when `weights` and `edges` differ in length
    /// or an edge index is outside `[0, num_nodes)`.
    pub fn new(num_nodes: usize, edges: Vec<(usize, usize)>, weights: Vec<f32>) -> Result<Self> {
        if edges.len() != weights.len() {
            return Err(TrendGraphError::ShapeMismatch(format!(
                "edge list has {} entries but edge weights have {}",
                edges.len(),
                weights.len()
            )));
        }
        if let Some(&(s, t)) = edges.iter().find(|&&(s, t)| s >= num_nodes || t >= num_nodes) {
            return Err(TrendGraphError::ShapeMismatch(format!(
                "edge ({}, {}) out of range for {} nodes",
                s, t, num_nodes
            )));
        }

        Ok(Self {
            num_nodes,
            edges,
            weights,
        })
    }

    /// Snapshot with unit weight on every edge
    pub fn unweighted(num_nodes: usize, edges: Vec<(usize, usize)>) -> Result<Self> {
        let weights = vec![1.0; edges.len()];
        Self::new(num_nodes, edges, weights)
    }

    /// Build from a COO `edge_index` tensor `[2, E]` (row 0 = sources, row 1 = targets)
    ///
    /// `edge_weight` is an optional `[E]` tensor; all ones when absent.
    pub fn from_edge_index(
        num_nodes: usize,
        edge_index: &Tensor,
        edge_weight: Option<&Tensor>,
    ) -> Result<Self> {
        let (rows, num_edges) = edge_index.dims2().map_err(|_| {
            TrendGraphError::ShapeMismatch(format!(
                "edge_index must be [2, E], got {:?}",
                edge_index.dims()
            ))
        })?;
        if rows != 2 {
            return Err(TrendGraphError::ShapeMismatch(format!(
                "edge_index must have 2 rows, got {}",
                rows
            )));
        }

        let index = edge_index
            .to_dtype(DType::I64)
            .and_then(|t| t.to_vec2::<i64>())
            .map_err(|e| TrendGraphError::Tensor(format!("edge_index to_vec failed: {}", e)))?;

        let mut edges = Vec::with_capacity(num_edges);
        for (&s, &t) in index[0].iter().zip(&index[1]) {
            if s < 0 || t < 0 {
                return Err(TrendGraphError::ShapeMismatch(format!(
                    "negative node index in edge ({}, {})",
                    s, t
                )));
            }
            edges.push((s as usize, t as usize));
        }

        let weights = match edge_weight {
            Some(w) => w
                .flatten_all()
                .and_then(|t| t.to_dtype(DType::F32))
                .and_then(|t| t.to_vec1::<f32>())
                .map_err(|e| TrendGraphError::Tensor(format!("edge_weight to_vec failed: {}", e)))?,
            None => vec![1.0; num_edges],
        };

        Self::new(num_nodes, edges, weights)
    }

    /// Ring over `num_nodes` nodes with unit weights: `i → i+1 (mod n)`,
    /// plus the reverse direction when `bidirectional`.
    pub fn ring(num_nodes: usize, bidirectional: bool) -> Self {
        let mut edges = Vec::with_capacity(num_nodes * 2);
        for i in 0..num_nodes {
            let next = (i + 1) % num_nodes;
            edges.push((i, next));
            if bidirectional {
                edges.push((next, i));
            }
        }
        let weights = vec![1.0; edges.len()];
        Self {
            num_nodes,
            edges,
            weights,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Densify for one forward pass
    ///
    /// Self-loops of weight 1 are added to every node that has none in the
    /// edge list; explicit self-loops keep their own weight.
    pub fn prepare(&self, device: &Device) -> Result<DenseGraph> {
        let n = self.num_nodes;
        let mut edges = self.edges.clone();
        let mut weights = self.weights.clone();

        let mut has_loop = vec![false; n];
        for &(s, t) in &self.edges {
            if s == t {
                has_loop[s] = true;
            }
        }
        for (node, looped) in has_loop.iter().enumerate() {
            if !looped {
                edges.push((node, node));
                weights.push(1.0);
            }
        }

        let mut mask = vec![0u8; n * n];
        for &(s, t) in &edges {
            mask[t * n + s] = 1;
        }

        let weights = scatter_edges(n, &edges, &weights, device)?;
        let mask = Tensor::from_vec(mask, (n, n), device)
            .map_err(|e| TrendGraphError::Tensor(format!("edge mask from_vec failed: {}", e)))?;
        let gcn_norm = symmetric_normalize(&weights)?;

        Ok(DenseGraph {
            num_nodes: n,
            weights,
            mask,
            gcn_norm,
        })
    }
}

/// A [`GraphSnapshot`] densified on a device
///
/// All matrices are target-major `[N, N]` and include self-loops.
#[derive(Debug, Clone)]
pub struct DenseGraph {
    num_nodes: usize,
    weights: Tensor,
    mask: Tensor,
    gcn_norm: Tensor,
}

impl DenseGraph {
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Static edge weights, f32 `[N, N]`
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// Edge existence mask, u8 `[N, N]`
    pub fn mask(&self) -> &Tensor {
        &self.mask
    }

    /// `D⁻¹/² (A + I) D⁻¹/²`
    pub fn gcn_norm(&self) -> &Tensor {
        &self.gcn_norm
    }
}
