use crate::sparse::CooMatrix;
use crate::umap::compute_membership_strengths::ComputeMembershipStrengths;
use crate::umap::smooth_knn_dist::SmoothKnnDist;
use dashmap::DashSet;
use ndarray::Array1;
use ndarray::ArrayView2;
use typed_builder::TypedBuilder;

/*
  Given the k-nearest neighbors of a dataset under some measure of distance,
  compute the fuzzy simplicial set (here represented as a fuzzy graph in
  the form of a sparse matrix) associated to the data. This is done by
  locally approximating geodesic distance at each point, creating a fuzzy
  simplicial set for each such point, and then combining all the local
  fuzzy simplicial sets into a global one via a fuzzy union.

  Parameters
  ----------
  n_samples: int
      Number of points in the dataset (rows and columns of the result).

  n_neighbors: float
      The effective number of neighbors, the target cardinality of each
      local fuzzy set.

  knn_indices: array of shape (n_samples, n_neighbors)
      Indices of the k-nearest neighbors as a row for each data point;
      -1 entries are skipped.

  knn_dists: array of shape (n_samples, n_neighbors)
      Distances to the k-nearest neighbors, each row sorted ascending.

  set_op_mix_ratio: float (optional, default 1.0)
      Interpolate between (fuzzy) union and intersection as the set operation
      used to combine local fuzzy simplicial sets to obtain a global fuzzy
      simplicial set. Both fuzzy set operations use the product t-norm.
      The value of this parameter should be between 0.0 and 1.0; a value of
      1.0 will use a pure fuzzy union, while 0.0 will use a pure fuzzy
      intersection.

  local_connectivity: float (optional, default 1)
      The local connectivity required -- i.e. the number of nearest
      neighbors that should be assumed to be connected at a local level.

  apply_set_operations: bool (optional, default true)
      Whether to symmetrize the directed membership graph at all. The
      transform path scores new points against training points and skips
      this.

  Returns
  -------
  (graph, sigmas, rhos): the fuzzy simplicial set as a canonical coo matrix
  with zero entries eliminated, plus the per-point kernel calibration.
*/
#[derive(TypedBuilder)]
pub struct FuzzySimplicialSet<'a, 'd> {
  n_samples: usize,
  n_neighbors: f32,
  knn_indices: ArrayView2<'a, i32>,
  knn_dists: ArrayView2<'a, f32>,
  knn_disconnections: &'d DashSet<(usize, usize)>,
  #[builder(default = 1.0)]
  set_op_mix_ratio: f32,
  #[builder(default = 1.0)]
  local_connectivity: f32,
  #[builder(default = true)]
  apply_set_operations: bool,
}

impl<'a, 'd> FuzzySimplicialSet<'a, 'd> {
  pub fn exec(self) -> (CooMatrix, Array1<f32>, Array1<f32>) {
    let Self {
      n_samples,
      n_neighbors,
      knn_indices,
      knn_dists,
      knn_disconnections,
      set_op_mix_ratio,
      local_connectivity,
      apply_set_operations,
    } = self;

    let (sigmas, rhos) = SmoothKnnDist::builder()
      .distances(knn_dists)
      .k(n_neighbors)
      .local_connectivity(local_connectivity)
      .build()
      .exec();

    let (rows, cols, vals) = ComputeMembershipStrengths::builder()
      .knn_indices(knn_indices)
      .knn_dists(knn_dists)
      .knn_disconnections(knn_disconnections)
      .sigmas(&sigmas.view())
      .rhos(&rhos.view())
      .build()
      .exec();

    let mut graph = CooMatrix::from_triplets((n_samples, n_samples), rows, cols, vals)
      .expect("membership triplets are in range with unique coordinates")
      .eliminate_zeros();

    if apply_set_operations {
      graph = apply_set_operations_mix(&graph, set_op_mix_ratio);
    }

    (graph, sigmas, rhos)
  }
}

/// Symmetrize a directed membership graph by the mixed fuzzy set operation
/// `mix * (A + Aᵀ - A∘Aᵀ) + (1 - mix) * (A∘Aᵀ)` under the product t-norm,
/// then prune the zeros the arithmetic introduced.
pub fn apply_set_operations_mix(graph: &CooMatrix, set_op_mix_ratio: f32) -> CooMatrix {
  let prod = graph
    .hadamard_transpose()
    .expect("fuzzy graph is square");
  let union = graph
    .add_transpose()
    .expect("fuzzy graph is square")
    .subtract(&prod)
    .expect("combinators preserve shape");
  union
    .scale(set_op_mix_ratio)
    .add(&prod.scale(1.0 - set_op_mix_ratio))
    .expect("combinators preserve shape")
    .eliminate_zeros()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::distances::EuclideanMetric;
  use crate::knn::pairwise::fast_knn;
  use crate::knn::pairwise::pairwise_distances;
  use ndarray::Array2;
  use rand::rngs::SmallRng;
  use rand::Rng;
  use rand::SeedableRng;

  fn graph_for(data: &Array2<f32>, k: usize, mix: f32) -> CooMatrix {
    let dmat = pairwise_distances(data.view(), &EuclideanMetric);
    let (knn_indices, knn_dists) = fast_knn(dmat.view(), k);
    let disconnections = DashSet::new();
    let (graph, _, _) = FuzzySimplicialSet::builder()
      .n_samples(data.shape()[0])
      .n_neighbors(k as f32)
      .knn_indices(knn_indices.view())
      .knn_dists(knn_dists.view())
      .knn_disconnections(&disconnections)
      .set_op_mix_ratio(mix)
      .build()
      .exec();
    graph
  }

  fn random_points(n: usize, dim: usize, seed: u64) -> Array2<f32> {
    let mut rng = SmallRng::seed_from_u64(seed);
    Array2::from_shape_fn((n, dim), |_| rng.random::<f32>() * 5.0)
  }

  #[test]
  fn union_graph_is_symmetric_with_zero_diagonal() {
    let data = random_points(30, 4, 2);
    let graph = graph_for(&data, 5, 1.0);
    for (r, c, v) in graph.triplets() {
      assert_ne!(r, c, "diagonal entry survived");
      assert!(v > 0.0 && v <= 1.0 + 1e-6);
      assert!(
        (graph.get(c as usize, r as usize) - v).abs() < 1e-6,
        "asymmetry at ({r}, {c})"
      );
    }
  }

  #[test]
  fn nearest_neighbor_edges_saturate_at_two_neighbors() {
    // With n_neighbors = 2 each point's single non-self neighbor sits at
    // rho, so every directed edge has strength 1 and the union is the
    // symmetric closure of the directed kNN edges.
    let data = random_points(10, 3, 7);
    let graph = graph_for(&data, 2, 1.0);
    let dmat = pairwise_distances(data.view(), &EuclideanMetric);
    let (knn_indices, _) = fast_knn(dmat.view(), 2);
    for i in 0..10usize {
      let nn = knn_indices[(i, 1)] as usize;
      assert_eq!(graph.get(i, nn), 1.0);
      assert_eq!(graph.get(nn, i), 1.0);
    }
    for (r, c, v) in graph.triplets() {
      assert_ne!(r, c);
      assert_eq!(v, 1.0);
    }
  }

  #[test]
  fn pure_intersection_keeps_only_mutual_neighbors() {
    let data = random_points(40, 4, 11);
    let union = graph_for(&data, 6, 1.0);
    let intersection = graph_for(&data, 6, 0.0);
    assert!(intersection.nnz() <= union.nnz());
    for (r, c, _) in intersection.triplets() {
      assert!(union.get(r as usize, c as usize) > 0.0);
    }
  }
}
