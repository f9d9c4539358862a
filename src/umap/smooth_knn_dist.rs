use super::constants::MIN_K_DIST_SCALE;
use super::constants::SMOOTH_K_TOLERANCE;
use ndarray::Array1;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use rayon::prelude::*;
use typed_builder::TypedBuilder;

/*
  Compute a continuous version of the distance to the kth nearest neighbor:
  for each sample, the scale sigma at which the cardinality of the fuzzy set
  generated from its (sorted) neighbor distances equals k, together with the
  local connectivity cutoff rho below which membership is total.

  distances: array of shape (n_samples, n_neighbors), each row sorted
  ascending. k may be fractional. local_connectivity (default 1) is the
  number of neighbors assumed fully connected; fractional values interpolate
  between the surrounding neighbor distances. bandwidth (default 1) scales
  the target cardinality log2(k).

  Returns (sigmas, rhos), both of shape (n_samples,).
*/
#[derive(TypedBuilder, Debug)]
pub struct SmoothKnnDist<'a> {
  distances: ArrayView2<'a, f32>,
  k: f32,
  #[builder(default = 64)]
  n_iter: usize,
  #[builder(default = 1.0)]
  local_connectivity: f32,
  #[builder(default = 1.0)]
  bandwidth: f32,
}

impl<'a> SmoothKnnDist<'a> {
  pub fn exec(self) -> (Array1<f32>, Array1<f32>) {
    let SmoothKnnDist {
      distances,
      k,
      n_iter,
      local_connectivity,
      bandwidth,
    } = self;

    let n_samples = distances.shape()[0];
    let target = k.log2() * bandwidth;
    let overall_mean = distances.mean().unwrap_or(0.0);

    // Rows are independent; calibrate them in parallel.
    let calibrated: Vec<(f32, f32)> = (0..n_samples)
      .into_par_iter()
      .map(|i| {
        let row = distances.row(i);
        let positive: Vec<f32> = row.iter().copied().filter(|&d| d > 0.0).collect();

        let rho = local_cutoff(&positive, local_connectivity);
        let mut sigma = solve_bandwidth(row, rho, target, n_iter);

        // Keep sigma away from zero, relative to the local mean distance
        // when the cutoff is meaningful, to the global mean otherwise.
        let floor = if rho > 0.0 {
          MIN_K_DIST_SCALE * row.mean().unwrap_or(0.0)
        } else {
          MIN_K_DIST_SCALE * overall_mean
        };
        if sigma < floor {
          sigma = floor;
        }

        (sigma, rho)
      })
      .collect();

    let (sigmas, rhos): (Vec<f32>, Vec<f32>) = calibrated.into_iter().unzip();
    (Array1::from(sigmas), Array1::from(rhos))
  }
}

/// Distance at which a point is assumed perfectly connected: the
/// local_connectivity'th strictly positive neighbor distance, interpolated
/// for fractional connectivity values.
fn local_cutoff(positive: &[f32], local_connectivity: f32) -> f32 {
  if positive.is_empty() {
    return 0.0;
  }
  if (positive.len() as f32) < local_connectivity {
    // not enough neighbors to honor the requirement; take what there is
    return positive.iter().copied().fold(0.0, f32::max);
  }

  let index = local_connectivity.floor() as usize;
  let fraction = local_connectivity - index as f32;
  if index == 0 {
    return fraction * positive[0];
  }
  let mut cutoff = positive[index - 1];
  if fraction > SMOOTH_K_TOLERANCE {
    cutoff += fraction * (positive[index] - positive[index - 1]);
  }
  cutoff
}

/// Bisect for the kernel scale whose fuzzy cardinality matches the target:
/// the upper bound doubles until finite, then the interval halves, for at
/// most `n_iter` rounds or until the sum lands within tolerance.
fn solve_bandwidth(row: ArrayView1<f32>, rho: f32, target: f32, n_iter: usize) -> f32 {
  let mut lo = 0.0f32;
  let mut hi = f32::INFINITY;
  let mut mid = 1.0f32;

  for _ in 0..n_iter {
    let cardinality: f32 = row
      .iter()
      .skip(1)
      .map(|&d| {
        let shifted = d - rho;
        if shifted > 0.0 {
          (-shifted / mid).exp()
        } else {
          1.0
        }
      })
      .sum();

    if (cardinality - target).abs() < SMOOTH_K_TOLERANCE {
      break;
    }

    if cardinality > target {
      hi = mid;
      mid = (lo + hi) / 2.0;
    } else {
      lo = mid;
      mid = if hi.is_finite() { (lo + hi) / 2.0 } else { mid * 2.0 };
    }
  }

  mid
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::Array2;
  use rand::rngs::SmallRng;
  use rand::Rng;
  use rand::SeedableRng;

  fn sorted_distance_rows(n: usize, k: usize) -> Array2<f32> {
    let mut rng = SmallRng::seed_from_u64(17);
    let mut rows = Array2::zeros((n, k));
    for i in 0..n {
      let mut row: Vec<f32> = (0..k - 1).map(|_| rng.random::<f32>() * 3.0 + 0.1).collect();
      row.sort_by(|a, b| a.partial_cmp(b).unwrap());
      rows[(i, 0)] = 0.0; // self
      for (j, d) in row.into_iter().enumerate() {
        rows[(i, j + 1)] = d;
      }
    }
    rows
  }

  #[test]
  fn sigma_hits_the_log2_target() {
    let k = 8usize;
    let distances = sorted_distance_rows(10, k);
    let (sigmas, rhos) = SmoothKnnDist::builder()
      .distances(distances.view())
      .k(k as f32)
      .build()
      .exec();

    let target = (k as f32).log2();
    for i in 0..10 {
      let cardinality: f32 = (1..k)
        .map(|j| {
          let shifted = distances[(i, j)] - rhos[i];
          if shifted > 0.0 {
            (-shifted / sigmas[i]).exp()
          } else {
            1.0
          }
        })
        .sum();
      assert!(
        (cardinality - target).abs() < 1e-4,
        "row {i}: sum {cardinality} vs target {target}"
      );
    }
  }

  #[test]
  fn rho_is_the_first_positive_distance_at_unit_connectivity() {
    let distances = sorted_distance_rows(6, 5);
    let (_, rhos) = SmoothKnnDist::builder()
      .distances(distances.view())
      .k(5.0)
      .build()
      .exec();
    for i in 0..6 {
      assert_eq!(rhos[i], distances[(i, 1)]);
    }
  }

  #[test]
  fn fractional_connectivity_interpolates_between_neighbors() {
    let distances = sorted_distance_rows(4, 6);
    let (_, rhos) = SmoothKnnDist::builder()
      .distances(distances.view())
      .k(6.0)
      .local_connectivity(1.5)
      .build()
      .exec();
    for i in 0..4 {
      let expected = distances[(i, 1)] + 0.5 * (distances[(i, 2)] - distances[(i, 1)]);
      assert!((rhos[i] - expected).abs() < 1e-6);
    }
  }

  #[test]
  fn zero_connectivity_gives_zero_rho() {
    let distances = sorted_distance_rows(4, 5);
    let (sigmas, rhos) = SmoothKnnDist::builder()
      .distances(distances.view())
      .k(5.0)
      .local_connectivity(0.0)
      .build()
      .exec();
    for i in 0..4 {
      assert_eq!(rhos[i], 0.0);
      assert!(sigmas[i] > 0.0);
    }
  }
}
