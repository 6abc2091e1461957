//! Graph convolution operators
//!
//! One capability, [`GraphConv`], with two implementations chosen at
//! construction time:
//!
//! | Operator | Aggregation | Nonlinearity policy in a stack |
//! |---|---|---|
//! | [`GcnConv`] | symmetric-normalized weighted sum | ReLU after every layer |
//! | [`GatConv`] | learned per-edge attention × edge weight | ReLU after all but the last |
//!
//! The policy difference is deliberate: a GCN-style stack always hands a
//! non-negative signal to the gates, a GAT-style stack leaves its last layer
//! raw. Cells never branch on the operator kind; they only see a
//! [`GraphConvStack`].

mod gat;
mod gcn;

pub use gat::GatConv;
pub use gcn::GcnConv;

use crate::graph::DenseGraph;
use crate::primitives::relu;
use crate::{Result, TrendGraphError};
use candle_core::Tensor;
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

/// A single graph convolution: `[N, in_width]` → `[N, out_width]`
pub trait GraphConv: std::fmt::Debug {
    fn in_width(&self) -> usize;

    fn out_width(&self) -> usize;

    /// Aggregate neighbour features over `graph`
    fn apply(&self, x: &Tensor, graph: &DenseGraph) -> Result<Tensor>;
}

/// Which operator a stack is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConvKind {
    #[default]
    Gcn,
    Gat,
}

impl ConvKind {
    pub fn from_use_gat(use_gat: bool) -> Self {
        if use_gat {
            Self::Gat
        } else {
            Self::Gcn
        }
    }

    /// Whether the last layer of a stack is followed by a ReLU
    pub fn relu_after_last(&self) -> bool {
        matches!(self, Self::Gcn)
    }

    fn build(&self, in_width: usize, out_width: usize, vb: VarBuilder) -> Result<Box<dyn GraphConv>> {
        Ok(match self {
            Self::Gcn => Box::new(GcnConv::new(in_width, out_width, vb)?),
            Self::Gat => Box::new(GatConv::new(in_width, out_width, vb)?),
        })
    }
}

/// Check a node-feature matrix against an operator's expected input
pub(crate) fn check_node_features(x: &Tensor, in_width: usize, graph: &DenseGraph) -> Result<()> {
    let (n, f) = x.dims2().map_err(|_| {
        TrendGraphError::ShapeMismatch(format!(
            "node features must be [N, F], got {:?}",
            x.dims()
        ))
    })?;
    if f != in_width {
        return Err(TrendGraphError::ShapeMismatch(format!(
            "expected {} input features, got {}",
            in_width, f
        )));
    }
    if n != graph.num_nodes() {
        return Err(TrendGraphError::ShapeMismatch(format!(
            "features cover {} nodes but the graph has {}",
            n,
            graph.num_nodes()
        )));
    }
    Ok(())
}

/// Fixed-depth stack of graph convolutions
///
/// Built once from a list of layer widths and never resized.
#[derive(Debug)]
pub struct GraphConvStack {
    kind: ConvKind,
    in_width: usize,
    convs: Vec<Box<dyn GraphConv>>,
}

impl GraphConvStack {
    /// Build `widths.len()` operators: `in_width → widths[0] → … → widths[last]`
    ///
    /// Parameters live under `vb` as `{layer}.{param}`.
    pub fn new(kind: ConvKind, in_width: usize, widths: &[usize], vb: VarBuilder) -> Result<Self> {
        if widths.is_empty() {
            return Err(TrendGraphError::Config(
                "graph convolution stack needs at least one layer".into(),
            ));
        }
        if in_width == 0 || widths.contains(&0) {
            return Err(TrendGraphError::Config(format!(
                "graph convolution widths must be non-zero (in {}, layers {:?})",
                in_width, widths
            )));
        }

        let mut convs = Vec::with_capacity(widths.len());
        let mut current = in_width;
        for (i, &width) in widths.iter().enumerate() {
            convs.push(kind.build(current, width, vb.pp(i))?);
            current = width;
        }

        Ok(Self {
            kind,
            in_width,
            convs,
        })
    }

    pub fn kind(&self) -> ConvKind {
        self.kind
    }

    pub fn depth(&self) -> usize {
        self.convs.len()
    }

    pub fn in_width(&self) -> usize {
        self.in_width
    }

    pub fn out_width(&self) -> usize {
        self.convs.last().map(|c| c.out_width()).unwrap_or(self.in_width)
    }

    /// Run every operator in order with the kind's ReLU policy
    pub fn apply(&self, x: &Tensor, graph: &DenseGraph) -> Result<Tensor> {
        check_node_features(x, self.in_width, graph)?;

        let last = self.convs.len() - 1;
        let mut h = x.clone();
        for (i, conv) in self.convs.iter().enumerate() {
            h = conv.apply(&h, graph)?;
            if i < last || self.kind.relu_after_last() {
                h = relu(&h)?;
            }
        }
        Ok(h)
    }
}
