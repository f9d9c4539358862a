use crate::metric::Metric;
use ndarray::Array2;
use ndarray::ArrayView2;
use rayon::prelude::*;

/// Full pairwise distance matrix of one point set under `metric`.
///
/// Rows are computed in parallel; symmetry of the metric is not exploited so
/// the output is exactly `metric(x_i, x_j)` everywhere.
pub fn pairwise_distances(data: ArrayView2<f32>, metric: &dyn Metric) -> Array2<f32> {
  let n = data.shape()[0];
  let mut result = Array2::zeros((n, n));
  result
    .as_slice_mut()
    .expect("freshly allocated matrix is contiguous")
    .par_chunks_mut(n)
    .enumerate()
    .for_each(|(i, row)| {
      for (j, out) in row.iter_mut().enumerate() {
        *out = metric.distance(data.row(i), data.row(j));
      }
    });
  result
}

/// Pairwise distances from each row of `x` to each row of `y`.
pub fn pairwise_distances_between(
  x: ArrayView2<f32>,
  y: ArrayView2<f32>,
  metric: &dyn Metric,
) -> Array2<f32> {
  let rows = x.shape()[0];
  let cols = y.shape()[0];
  let mut result = Array2::zeros((rows, cols));
  result
    .as_slice_mut()
    .expect("freshly allocated matrix is contiguous")
    .par_chunks_mut(cols)
    .enumerate()
    .for_each(|(i, row)| {
      for (j, out) in row.iter_mut().enumerate() {
        *out = metric.distance(x.row(i), y.row(j));
      }
    });
  result
}

/// Exact kNN from a (possibly rectangular) distance matrix: each row is
/// sorted ascending and truncated to `k` columns.
///
/// This is the precomputed-metric path; a point's self-distance of zero puts
/// it first in its own row.
pub fn fast_knn(dmat: ArrayView2<f32>, k: usize) -> (Array2<i32>, Array2<f32>) {
  let rows = dmat.shape()[0];
  let mut indices = Array2::from_elem((rows, k), -1i32);
  let mut dists = Array2::from_elem((rows, k), f32::INFINITY);

  let sorted_rows: Vec<Vec<(f32, i32)>> = (0..rows)
    .into_par_iter()
    .map(|i| {
      let mut row: Vec<(f32, i32)> = dmat
        .row(i)
        .iter()
        .enumerate()
        .map(|(j, &d)| (d, j as i32))
        .collect();
      row.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
      row.truncate(k);
      row
    })
    .collect();

  for (i, row) in sorted_rows.into_iter().enumerate() {
    for (slot, (d, j)) in row.into_iter().enumerate() {
      indices[(i, slot)] = j;
      dists[(i, slot)] = d;
    }
  }
  (indices, dists)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::distances::EuclideanMetric;
  use ndarray::arr2;

  #[test]
  fn pairwise_is_symmetric_with_zero_diagonal() {
    let data = arr2(&[[0.0f32, 0.0], [3.0, 4.0], [6.0, 8.0]]);
    let dmat = pairwise_distances(data.view(), &EuclideanMetric);
    assert_eq!(dmat[(0, 1)], 5.0);
    assert_eq!(dmat[(1, 0)], 5.0);
    assert_eq!(dmat[(0, 2)], 10.0);
    for i in 0..3 {
      assert_eq!(dmat[(i, i)], 0.0);
    }
  }

  #[test]
  fn fast_knn_sorts_rows_with_self_first() {
    let data = arr2(&[[0.0f32, 0.0], [1.0, 0.0], [5.0, 0.0], [2.0, 0.0]]);
    let dmat = pairwise_distances(data.view(), &EuclideanMetric);
    let (indices, dists) = fast_knn(dmat.view(), 3);
    assert_eq!(indices.row(0).to_vec(), vec![0, 1, 3]);
    assert_eq!(dists.row(0).to_vec(), vec![0.0, 1.0, 2.0]);
    assert_eq!(indices.row(2).to_vec(), vec![2, 3, 1]);
  }

  #[test]
  fn rectangular_pairwise_shapes() {
    let x = arr2(&[[0.0f32, 0.0], [1.0, 1.0]]);
    let y = arr2(&[[0.0f32, 1.0], [1.0, 0.0], [2.0, 2.0]]);
    let dmat = pairwise_distances_between(x.view(), y.view(), &EuclideanMetric);
    assert_eq!(dmat.shape(), &[2, 3]);
    assert_eq!(dmat[(0, 0)], 1.0);
  }
}
