pub mod heap;
pub mod nn_descent;
pub mod pairwise;
pub mod rp_tree;
pub mod search;

use crate::metric::Metric;
use ndarray::Array2;
use ndarray::ArrayView2;
use nn_descent::NearestNeighborDescent;
use rp_tree::leaf_array;
use rp_tree::make_forest;
use rp_tree::FlatTree;
use tracing::info;
use tracing::warn;

/// Approximate k-nearest-neighbor graph of a dataset, plus the forest that
/// seeded it (kept for `transform`-time searches).
pub struct KnnGraph {
  /// Neighbor indices, `(n_samples, n_neighbors)`, sorted ascending by
  /// distance per row. A -1 marks a slot the descent failed to fill.
  pub indices: Array2<i32>,
  /// Neighbor distances matching `indices`.
  pub dists: Array2<f32>,
  pub forest: Vec<FlatTree>,
}

/// Compute `n_neighbors` approximate nearest neighbors for every sample.
///
/// Builds a random projection forest (angular if the metric is angular or
/// the caller forces it), seeds NN-descent from its leaves, and refines for
/// `max(5, round(log2 N))` iterations.
pub fn nearest_neighbors(
  data: ArrayView2<f32>,
  n_neighbors: usize,
  metric: &dyn Metric,
  angular: bool,
  seed: u64,
) -> KnnGraph {
  let n_samples = data.shape()[0];
  let angular = angular || metric.is_angular();

  let n_trees = 5 + ((n_samples as f64).sqrt() / 20.0).round() as usize;
  let n_iters = 5.max((n_samples as f64).log2().round() as usize);

  info!(n_samples, n_trees, n_iters, "finding nearest neighbors");
  let forest = make_forest(data, n_neighbors, n_trees, angular, seed);
  let leaves = leaf_array(&forest);

  let (indices, dists) = NearestNeighborDescent::builder()
    .data(data)
    .n_neighbors(n_neighbors)
    .metric(metric)
    .n_iters(n_iters)
    .seed(seed)
    .leaf_array(Some(&leaves))
    .build()
    .exec();

  if indices.iter().any(|&i| i < 0) {
    warn!(
      "failed to find {n_neighbors} neighbors for some samples; results may be less than ideal. \
       Try re-running with different parameters."
    );
  }
  info!("nearest neighbor search complete");

  KnnGraph {
    indices,
    dists,
    forest,
  }
}
