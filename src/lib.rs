//! Parallel Rust implementation of the UMAP dimensionality reduction
//! algorithm.
//!
//! Given N points in a high-dimensional space under a chosen dissimilarity
//! function, [`Umap::fit`] produces N points in a low-dimensional Euclidean
//! space whose local neighborhoods faithfully mirror the input's. The
//! pipeline has two stages:
//!
//! 1. **Fuzzy simplicial set construction** - approximate k-nearest-neighbor
//!    search (random projection forest + nearest neighbor descent, or exact
//!    pairwise distances below a size threshold), per-point bandwidth
//!    calibration, membership strengths, and a fuzzy set union over the
//!    resulting sparse graph.
//! 2. **Stochastic gradient optimization** - negative-sampling SGD over the
//!    graph's 1-simplices, minimizing the fuzzy cross entropy between the
//!    high- and low-dimensional fuzzy sets.
//!
//! # Example
//!
//! ```ignore
//! use umap::{Umap, UmapConfig};
//!
//! let umap = Umap::new(UmapConfig::default())?;
//! let fitted = umap.fit(data.view(), None)?;
//! let embedding = fitted.embedding();          // (n_samples, 2)
//! let projected = fitted.transform(new_data.view())?;
//! ```
//!
//! # Features
//!
//! - **Parallel throughout**: rayon drives the distance computations,
//!   NN-descent and the SGD epochs (Hogwild!-style racy writes, documented
//!   in the layout module)
//! - **Seeded randomness**: every stochastic choice draws from the
//!   configured seed; no process-global RNG
//! - **Extensible metrics**: sixteen named metrics plus custom distance
//!   functions via the [`Metric`] trait
//! - **Supervised fits**: categorical or continuous targets sharpen the
//!   fuzzy graph
//! - **Serializable models**: a [`FittedUmap`] round-trips through serde
//!   and can keep transforming
//!
//! # Limitations
//!
//! - Dense input only (no sparse data matrices)
//! - `transform` is unavailable after a precomputed-metric or single-sample
//!   fit
//! - Spectral initialization is not provided; initialization is uniform
//!   random or a user matrix

// Public modules
pub mod config;
pub mod distances;
pub mod error;
pub mod metric;
pub mod sparse;

// Public re-exports (primary API)
pub use config::EmbeddingInit;
pub use config::GraphParams;
pub use config::ManifoldParams;
pub use config::MetricSpec;
pub use config::OptimizationParams;
pub use config::TargetMetricSpec;
pub use config::TargetParams;
pub use config::TransformParams;
pub use config::UmapConfig;
pub use embedding::FittedUmap;
pub use embedding::Umap;
pub use error::UmapError;
pub use metric::Metric;
pub use sparse::CooMatrix;
pub use sparse::SparseGraph;

// Internal modules (not exposed)
mod embedding;
mod utils;

// Public modules (for advanced users)
pub mod knn;
pub mod layout;
pub mod umap;

// Re-export the workhorse metric for convenience
pub use distances::EuclideanMetric;
