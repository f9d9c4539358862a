pub mod coo;

pub use coo::CooMatrix;

/// CSR representation used for the stored fuzzy graph and the transform
/// search graph.
pub type SparseGraph = sprs::CsMat<f32>;
