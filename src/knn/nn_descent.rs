use crate::knn::heap::rejection_sample;
use crate::knn::heap::NeighborHeap;
use crate::metric::Metric;
use ndarray::Array2;
use ndarray::ArrayView2;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::debug;
use tracing::info;
use typed_builder::TypedBuilder;

/*
  Approximate k-nearest-neighbor computation by nearest neighbor descent.

  The neighborhood of each point is refined iteratively: candidates are the
  neighbors-of-neighbors of the current graph, sampled down to at most
  `max_candidates` per point, and every candidate pair is offered to both
  endpoints' heaps. New/old flags restrict the pair evaluation to pairs with
  at least one fresh member, and an iteration that produces fewer than
  `delta * n_neighbors * n_samples` accepted updates stops the descent early.

  Seeding comes from random sampling plus, when a leaf array from a random
  projection forest is supplied, all intra-leaf pairs.
*/
#[derive(TypedBuilder)]
pub struct NearestNeighborDescent<'a, 'l, 'm> {
  data: ArrayView2<'a, f32>,
  n_neighbors: usize,
  metric: &'m dyn Metric,
  n_iters: usize,
  seed: u64,
  #[builder(default = None)]
  leaf_array: Option<&'l Array2<i32>>,
  #[builder(default = 60)]
  max_candidates: usize,
  #[builder(default = 0.001)]
  delta: f64,
  #[builder(default = 0.5)]
  rho: f64,
}

impl<'a, 'l, 'm> NearestNeighborDescent<'a, 'l, 'm> {
  /// Run the descent and return `(indices, distances)` sorted ascending per
  /// row. Unfilled slots are -1 / infinity.
  pub fn exec(self) -> (Array2<i32>, Array2<f32>) {
    let Self {
      data,
      n_neighbors,
      metric,
      n_iters,
      seed,
      leaf_array,
      max_candidates,
      delta,
      rho,
    } = self;

    let n_samples = data.shape()[0];
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut current = NeighborHeap::new(n_samples, n_neighbors);

    // Random seeding. Every point is its own nearest neighbor, matching the
    // sorted-row convention of the exact (precomputed) path.
    let started = std::time::Instant::now();
    for i in 0..n_samples {
      current.push(i, 0.0, i as i32, true);
      for idx in rejection_sample(n_neighbors, n_samples, &mut rng) {
        let d = metric.distance(data.row(i), data.row(idx as usize));
        current.push(i, d, idx as i32, true);
        current.push(idx as usize, d, i as i32, true);
      }
    }

    // Forest-leaf seeding: all pairs inside each leaf
    if let Some(leaves) = leaf_array {
      for leaf in leaves.rows() {
        for (a, &p) in leaf.iter().enumerate() {
          if p < 0 {
            break;
          }
          for &q in leaf.iter().skip(a + 1) {
            if q < 0 {
              break;
            }
            let d = metric.distance(data.row(p as usize), data.row(q as usize));
            current.push(p as usize, d, q, true);
            current.push(q as usize, d, p, true);
          }
        }
      }
    }
    info!(
      duration_ms = started.elapsed().as_millis(),
      n_samples, n_neighbors, "nn-descent seeded"
    );

    for iteration in 0..n_iters {
      let candidates = build_candidates(&mut current, max_candidates, &mut rng);

      // Evaluate candidate pairs in parallel, then apply the updates through
      // the heaps serially so the accepted-update count stays exact.
      let updates: Vec<Vec<(i32, i32, f32)>> = (0..n_samples)
        .into_par_iter()
        .map(|i| {
          let mut pair_rng =
            SmallRng::seed_from_u64(seed ^ ((iteration as u64) << 32) ^ i as u64);
          let mut local = Vec::new();
          for j in 0..max_candidates {
            let p = candidates.index_at(i, j);
            if p < 0 || pair_rng.random::<f64>() < rho {
              continue;
            }
            for k in (j + 1)..max_candidates {
              let q = candidates.index_at(i, k);
              if q < 0 || p == q {
                continue;
              }
              // A pair of mutually old candidates was already tried.
              if !candidates.flag_at(i, j) && !candidates.flag_at(i, k) {
                continue;
              }
              let d = metric.distance(data.row(p as usize), data.row(q as usize));
              local.push((p, q, d));
            }
          }
          local
        })
        .collect();

      let mut accepted = 0usize;
      for (p, q, d) in updates.into_iter().flatten() {
        accepted += current.push(p as usize, d, q, true);
        accepted += current.push(q as usize, d, p, true);
      }

      debug!(iteration, accepted, "nn-descent iteration complete");
      if (accepted as f64) <= delta * n_neighbors as f64 * n_samples as f64 {
        debug!(iteration, "nn-descent converged early");
        break;
      }
    }

    current.deheap_sort()
  }
}

/// Sample each point's current neighbors (and reverse neighbors) down to at
/// most `max_candidates`, using random priorities, and retire their "new"
/// flags.
fn build_candidates(
  current: &mut NeighborHeap,
  max_candidates: usize,
  rng: &mut SmallRng,
) -> NeighborHeap {
  let n_points = current.n_points();
  let n_slots = current.n_slots();
  let mut candidates = NeighborHeap::new(n_points, max_candidates);
  for i in 0..n_points {
    for slot in 0..n_slots {
      let idx = current.index_at(i, slot);
      if idx < 0 {
        continue;
      }
      let priority = rng.random::<f32>();
      let is_new = current.flag_at(i, slot);
      candidates.push(i, priority, idx, is_new);
      candidates.push(idx as usize, priority, i as i32, is_new);
      current.set_flag(i, slot, false);
    }
  }
  candidates
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::distances::EuclideanMetric;
  use crate::knn::rp_tree::leaf_array;
  use crate::knn::rp_tree::make_forest;
  use ndarray::Array2;

  /// Three well-separated Gaussian-ish blobs.
  fn blobs(n_per_cluster: usize, dim: usize) -> Array2<f32> {
    let mut rng = SmallRng::seed_from_u64(5);
    let centers = [-8.0f32, 0.0, 8.0];
    Array2::from_shape_fn((3 * n_per_cluster, dim), |(i, _)| {
      centers[i / n_per_cluster] + rng.random::<f32>()
    })
  }

  /// Exact k nearest neighbors, self included at distance zero.
  fn exact_knn(data: &Array2<f32>, k: usize) -> Vec<Vec<i32>> {
    let n = data.shape()[0];
    (0..n)
      .map(|i| {
        let mut dists: Vec<(f32, i32)> = (0..n)
          .map(|j| {
            (
              EuclideanMetric.distance(data.row(i), data.row(j)),
              j as i32,
            )
          })
          .collect();
        dists.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        dists.into_iter().take(k).map(|(_, j)| j).collect()
      })
      .collect()
  }

  #[test]
  fn descent_recovers_most_exact_neighbors() {
    let data = blobs(80, 6);
    let k = 10;
    let forest = make_forest(data.view(), k, 4, false, 42);
    let leaves = leaf_array(&forest);

    let (indices, dists) = NearestNeighborDescent::builder()
      .data(data.view())
      .n_neighbors(k)
      .metric(&EuclideanMetric)
      .n_iters(8)
      .seed(42)
      .leaf_array(Some(&leaves))
      .build()
      .exec();

    let truth = exact_knn(&data, k);
    let mut hits = 0usize;
    let mut total = 0usize;
    for i in 0..data.shape()[0] {
      for &j in &truth[i] {
        total += 1;
        if indices.row(i).iter().any(|&found| found == j) {
          hits += 1;
        }
      }
    }
    let recall = hits as f64 / total as f64;
    assert!(recall >= 0.9, "recall {recall} below 0.9");

    // Rows come back sorted ascending where filled.
    for i in 0..data.shape()[0] {
      let row: Vec<f32> = dists
        .row(i)
        .iter()
        .copied()
        .filter(|d| d.is_finite())
        .collect();
      for w in row.windows(2) {
        assert!(w[0] <= w[1]);
      }
    }
  }
}
