//! Tensor Primitives
//!
//! Activations, losses, device selection and the dense graph kernels the
//! convolution operators are built from.
//!
//! ## Submodules
//!
//! - [`tensor_ops`]: Device selection and loss functions
//! - [`activations`]: Activation functions (sigmoid, softmax, relu, tanh)
//! - [`gnn`]: Adjacency construction, normalization and propagation kernels

mod tensor_ops;
mod activations;
pub mod gnn;

// Re-export all primitives at module level
pub use tensor_ops::*;
pub use activations::*;
