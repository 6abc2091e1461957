//! Graph Neural Network kernels
//!
//! Dense propagation kernels shared by the convolution operators in
//! [`crate::conv`]. The graph arrives as a COO edge list (see
//! [`crate::graph::GraphSnapshot`]) and is densified once per forward pass;
//! every kernel here works on `[N, N]` target-major matrices, so row `i`
//! holds the incoming edges of node `i`.
//!
//! | Function | Used by | Paper |
//! |---|---|---|
//! | [`symmetric_normalize`] | GCN | Kipf & Welling 2017 |
//! | [`gcn_aggregate`] | GCN | Kipf & Welling 2017 |
//! | [`gat_aggregate`] | GAT | Veličković et al. 2018 |
//! | [`masked_softmax`] | GAT | - |

use crate::primitives::leaky_relu;
use crate::{Result, TrendGraphError};
use candle_core::{Device, Tensor};

/// Negative slope of the LeakyReLU applied to GAT edge scores
pub const GAT_NEGATIVE_SLOPE: f64 = 0.2;

// =============================================================================
// Densification
// =============================================================================

/// Scatter a COO edge list into a dense target-major matrix
///
/// Entry `[target, source]` receives the edge weight; duplicate edges are
/// summed. Indices must already be validated against `num_nodes`.
pub fn scatter_edges(
    num_nodes: usize,
    edges: &[(usize, usize)],
    weights: &[f32],
    device: &Device,
) -> Result<Tensor> {
    if edges.len() != weights.len() {
        return Err(TrendGraphError::ShapeMismatch(format!(
            "scatter_edges: {} edges but {} weights",
            edges.len(),
            weights.len()
        )));
    }

    let mut dense = vec![0.0f32; num_nodes * num_nodes];
    for (&(source, target), &w) in edges.iter().zip(weights) {
        dense[target * num_nodes + source] += w;
    }

    Tensor::from_vec(dense, (num_nodes, num_nodes), device)
        .map_err(|e| TrendGraphError::Tensor(format!("scatter_edges from_vec failed: {}", e)))
}

// =============================================================================
// Normalization
// =============================================================================

/// Symmetric normalization `D⁻¹/² A D⁻¹/²`
///
/// `adj` must already contain self-loops. Degrees are row sums (incoming
/// weight per target). A small epsilon keeps isolated rows finite; negative
/// degrees are not guarded and will surface as NaN.
pub fn symmetric_normalize(adj: &Tensor) -> Result<Tensor> {
    let d_inv_sqrt = adj
        .sum_keepdim(1)
        .and_then(|d| d.affine(1.0, 1e-8))
        .and_then(|d| d.sqrt())
        .and_then(|d| d.recip())
        .map_err(|e| TrendGraphError::Tensor(format!("sym_norm degree failed: {}", e)))?;

    let left = adj
        .broadcast_mul(&d_inv_sqrt)
        .map_err(|e| TrendGraphError::Tensor(format!("sym_norm left mul failed: {}", e)))?;

    let d_inv_sqrt_row = d_inv_sqrt
        .transpose(0, 1)
        .map_err(|e| TrendGraphError::Tensor(format!("sym_norm transpose failed: {}", e)))?;

    left.broadcast_mul(&d_inv_sqrt_row)
        .map_err(|e| TrendGraphError::Tensor(format!("sym_norm right mul failed: {}", e)))
}

/// Row-wise softmax restricted to entries where `mask` is non-zero
///
/// `mask` is a u8 `[N, N]` tensor. Every row must keep at least one entry
/// (self-loops guarantee this for graph masks), otherwise the row is NaN.
pub fn masked_softmax(scores: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let neg_inf = Tensor::full(f32::NEG_INFINITY, scores.dims(), scores.device())
        .map_err(|e| TrendGraphError::Tensor(format!("masked_softmax neg_inf failed: {}", e)))?;
    let masked = mask
        .where_cond(scores, &neg_inf)
        .map_err(|e| TrendGraphError::Tensor(format!("masked_softmax where_cond failed: {}", e)))?;
    crate::primitives::softmax(&masked, 1)
}

// =============================================================================
// Propagation
// =============================================================================

/// GCN propagation: `Â @ H (+ b)`
///
/// `h` is the already-transformed node features `X W`; `norm_adj` the output
/// of [`symmetric_normalize`].
pub fn gcn_aggregate(norm_adj: &Tensor, h: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
    let out = norm_adj
        .matmul(h)
        .map_err(|e| TrendGraphError::Tensor(format!("gcn matmul Â@H failed: {}", e)))?;

    match bias {
        Some(b) => out
            .broadcast_add(b)
            .map_err(|e| TrendGraphError::Tensor(format!("gcn add bias failed: {}", e))),
        None => Ok(out),
    }
}

/// GAT propagation with static edge weights
///
/// ```text
/// e_ij  = LeakyReLU(a_dst · z_i + a_src · z_j)      for each edge j → i
/// α_ij  = softmax_j(e_ij)                            over i's incoming edges
/// out_i = Σ_j (α_ij * w_ij) z_j + b
/// ```
///
/// # Arguments
/// - `z`: transformed node features `[N, F]`
/// - `att_src`, `att_dst`: attention vectors `[F]`
/// - `mask`: u8 `[N, N]` edge mask (self-loops included)
/// - `edge_weights`: static `[N, N]` edge weights (self-loops included)
///
/// # Returns
/// `(out [N, F], alpha [N, N])`, with `alpha` before edge weighting.
pub fn gat_aggregate(
    z: &Tensor,
    att_src: &Tensor,
    att_dst: &Tensor,
    mask: &Tensor,
    edge_weights: &Tensor,
    bias: Option<&Tensor>,
) -> Result<(Tensor, Tensor)> {
    let score_src = z
        .matmul(&att_src.unsqueeze(1)?)
        .map_err(|e| TrendGraphError::Tensor(format!("gat source score failed: {}", e)))?;
    let score_dst = z
        .matmul(&att_dst.unsqueeze(1)?)
        .map_err(|e| TrendGraphError::Tensor(format!("gat target score failed: {}", e)))?;

    // [N, 1] + [1, N] → [N, N], row = target, column = source
    let raw = score_dst
        .broadcast_add(&score_src.transpose(0, 1)?)
        .map_err(|e| TrendGraphError::Tensor(format!("gat pair scores failed: {}", e)))?;
    let scores = leaky_relu(&raw, GAT_NEGATIVE_SLOPE)?;

    let alpha = masked_softmax(&scores, mask)?;
    let weighted = alpha
        .mul(edge_weights)
        .map_err(|e| TrendGraphError::Tensor(format!("gat edge weighting failed: {}", e)))?;

    let out = weighted
        .matmul(z)
        .map_err(|e| TrendGraphError::Tensor(format!("gat matmul α@z failed: {}", e)))?;
    let out = match bias {
        Some(b) => out
            .broadcast_add(b)
            .map_err(|e| TrendGraphError::Tensor(format!("gat add bias failed: {}", e)))?,
        None => out,
    };

    Ok((out, alpha))
}

// =============================================================================
// Tests
// =============================================================================
