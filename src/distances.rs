use crate::error::UmapError;
use crate::metric::Metric;
use ndarray::Array2;
use ndarray::ArrayView1;
use std::sync::Arc;

/// Squared Euclidean distance (rdist) - used in the SGD loop for speed.
/// This avoids the sqrt operation.
#[inline]
pub fn rdist(x: &[f32], y: &[f32]) -> f32 {
  let mut sum_sq = 0.0;
  for i in 0..x.len() {
    let diff = x[i] - y[i];
    sum_sq += diff * diff;
  }
  sum_sq
}

/// Euclidean (L2) distance metric.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMetric;

impl Metric for EuclideanMetric {
  fn name(&self) -> &'static str {
    "euclidean"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let mut sum_sq = 0.0;
    for i in 0..x.len() {
      let diff = x[i] - y[i];
      sum_sq += diff * diff;
    }
    sum_sq.sqrt()
  }
}

/// Manhattan (L1, taxicab) distance.
#[derive(Debug, Clone, Copy)]
pub struct ManhattanMetric;

impl Metric for ManhattanMetric {
  fn name(&self) -> &'static str {
    "manhattan"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let mut sum = 0.0;
    for i in 0..x.len() {
      sum += (x[i] - y[i]).abs();
    }
    sum
  }
}

/// Chebyshev (L-infinity) distance.
#[derive(Debug, Clone, Copy)]
pub struct ChebyshevMetric;

impl Metric for ChebyshevMetric {
  fn name(&self) -> &'static str {
    "chebyshev"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let mut max = 0.0f32;
    for i in 0..x.len() {
      max = max.max((x[i] - y[i]).abs());
    }
    max
  }
}

/// Minkowski distance of order `p`.
///
/// Not in the name registry because it carries a parameter; inject it with
/// [`crate::Umap::with_metric`].
#[derive(Debug, Clone, Copy)]
pub struct MinkowskiMetric {
  pub p: f32,
}

impl Metric for MinkowskiMetric {
  fn name(&self) -> &'static str {
    "minkowski"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let mut sum = 0.0f32;
    for i in 0..x.len() {
      sum += (x[i] - y[i]).abs().powf(self.p);
    }
    sum.powf(1.0 / self.p)
  }
}

/// Canberra distance. Coordinates where both inputs are zero contribute
/// nothing.
#[derive(Debug, Clone, Copy)]
pub struct CanberraMetric;

impl Metric for CanberraMetric {
  fn name(&self) -> &'static str {
    "canberra"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let mut sum = 0.0;
    for i in 0..x.len() {
      let denom = x[i].abs() + y[i].abs();
      if denom > 0.0 {
        sum += (x[i] - y[i]).abs() / denom;
      }
    }
    sum
  }
}

/// Bray-Curtis dissimilarity.
#[derive(Debug, Clone, Copy)]
pub struct BrayCurtisMetric;

impl Metric for BrayCurtisMetric {
  fn name(&self) -> &'static str {
    "braycurtis"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for i in 0..x.len() {
      numerator += (x[i] - y[i]).abs();
      denominator += (x[i] + y[i]).abs();
    }
    if denominator > 0.0 {
      numerator / denominator
    } else {
      0.0
    }
  }
}

/// Cosine distance: one minus the cosine of the angle between the vectors.
#[derive(Debug, Clone, Copy)]
pub struct CosineMetric;

impl Metric for CosineMetric {
  fn name(&self) -> &'static str {
    "cosine"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_x = 0.0f32;
    let mut norm_y = 0.0f32;
    for i in 0..x.len() {
      dot += x[i] * y[i];
      norm_x += x[i] * x[i];
      norm_y += y[i] * y[i];
    }
    if norm_x == 0.0 && norm_y == 0.0 {
      0.0
    } else if norm_x == 0.0 || norm_y == 0.0 {
      1.0
    } else {
      1.0 - dot / (norm_x.sqrt() * norm_y.sqrt())
    }
  }

  fn is_angular(&self) -> bool {
    true
  }

  fn disconnection_threshold(&self) -> f32 {
    2.0
  }
}

/// Correlation distance: cosine distance of the mean-centered vectors.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationMetric;

impl Metric for CorrelationMetric {
  fn name(&self) -> &'static str {
    "correlation"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let n = x.len() as f32;
    let mu_x = x.iter().sum::<f32>() / n;
    let mu_y = y.iter().sum::<f32>() / n;

    let mut dot = 0.0f32;
    let mut norm_x = 0.0f32;
    let mut norm_y = 0.0f32;
    for i in 0..x.len() {
      let shifted_x = x[i] - mu_x;
      let shifted_y = y[i] - mu_y;
      dot += shifted_x * shifted_y;
      norm_x += shifted_x * shifted_x;
      norm_y += shifted_y * shifted_y;
    }
    if norm_x == 0.0 && norm_y == 0.0 {
      0.0
    } else if norm_x == 0.0 || norm_y == 0.0 {
      1.0
    } else {
      1.0 - dot / (norm_x.sqrt() * norm_y.sqrt())
    }
  }

  fn is_angular(&self) -> bool {
    true
  }

  fn disconnection_threshold(&self) -> f32 {
    2.0
  }
}

/// Hamming distance: fraction of coordinates that differ.
#[derive(Debug, Clone, Copy)]
pub struct HammingMetric;

impl Metric for HammingMetric {
  fn name(&self) -> &'static str {
    "hamming"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let mut differing = 0usize;
    for i in 0..x.len() {
      if x[i] != y[i] {
        differing += 1;
      }
    }
    differing as f32 / x.len() as f32
  }
}

/// Counts for the binary (presence/absence) dissimilarities. A coordinate is
/// "true" when it is non-zero.
struct BinaryCounts {
  true_true: usize,
  true_false: usize,
  false_true: usize,
}

impl BinaryCounts {
  fn of(x: ArrayView1<f32>, y: ArrayView1<f32>) -> Self {
    let mut true_true = 0;
    let mut true_false = 0;
    let mut false_true = 0;
    for i in 0..x.len() {
      let x_true = x[i] != 0.0;
      let y_true = y[i] != 0.0;
      match (x_true, y_true) {
        (true, true) => true_true += 1,
        (true, false) => true_false += 1,
        (false, true) => false_true += 1,
        (false, false) => {}
      }
    }
    Self {
      true_true,
      true_false,
      false_true,
    }
  }

  fn not_equal(&self) -> usize {
    self.true_false + self.false_true
  }
}

/// Jaccard distance over presence/absence vectors. Treated as angular for
/// forest splits.
#[derive(Debug, Clone, Copy)]
pub struct JaccardMetric;

impl Metric for JaccardMetric {
  fn name(&self) -> &'static str {
    "jaccard"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let c = BinaryCounts::of(x, y);
    let num_non_zero = c.true_true + c.not_equal();
    if num_non_zero == 0 {
      0.0
    } else {
      (num_non_zero - c.true_true) as f32 / num_non_zero as f32
    }
  }

  fn is_angular(&self) -> bool {
    true
  }

  fn disconnection_threshold(&self) -> f32 {
    1.0
  }
}

/// Dice distance.
#[derive(Debug, Clone, Copy)]
pub struct DiceMetric;

impl Metric for DiceMetric {
  fn name(&self) -> &'static str {
    "dice"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let c = BinaryCounts::of(x, y);
    let not_equal = c.not_equal();
    if not_equal == 0 {
      0.0
    } else {
      not_equal as f32 / (2.0 * c.true_true as f32 + not_equal as f32)
    }
  }

  fn disconnection_threshold(&self) -> f32 {
    1.0
  }
}

/// Russell-Rao distance.
#[derive(Debug, Clone, Copy)]
pub struct RussellRaoMetric;

impl Metric for RussellRaoMetric {
  fn name(&self) -> &'static str {
    "russellrao"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let c = BinaryCounts::of(x, y);
    let x_non_zero = c.true_true + c.true_false;
    let y_non_zero = c.true_true + c.false_true;
    if c.true_true == x_non_zero && c.true_true == y_non_zero {
      0.0
    } else {
      (x.len() - c.true_true) as f32 / x.len() as f32
    }
  }
}

/// Kulsinski distance.
#[derive(Debug, Clone, Copy)]
pub struct KulsinskiMetric;

impl Metric for KulsinskiMetric {
  fn name(&self) -> &'static str {
    "kulsinski"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let c = BinaryCounts::of(x, y);
    let not_equal = c.not_equal();
    if not_equal == 0 {
      0.0
    } else {
      (not_equal - c.true_true + x.len()) as f32 / (not_equal + x.len()) as f32
    }
  }
}

/// Rogers-Tanimoto distance.
#[derive(Debug, Clone, Copy)]
pub struct RogersTanimotoMetric;

impl Metric for RogersTanimotoMetric {
  fn name(&self) -> &'static str {
    "rogerstanimoto"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let c = BinaryCounts::of(x, y);
    let not_equal = c.not_equal();
    2.0 * not_equal as f32 / (x.len() + not_equal) as f32
  }
}

/// Sokal-Michener distance.
#[derive(Debug, Clone, Copy)]
pub struct SokalMichenerMetric;

impl Metric for SokalMichenerMetric {
  fn name(&self) -> &'static str {
    "sokalmichener"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let c = BinaryCounts::of(x, y);
    let not_equal = c.not_equal();
    2.0 * not_equal as f32 / (x.len() + not_equal) as f32
  }
}

/// Sokal-Sneath distance.
#[derive(Debug, Clone, Copy)]
pub struct SokalSneathMetric;

impl Metric for SokalSneathMetric {
  fn name(&self) -> &'static str {
    "sokalsneath"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let c = BinaryCounts::of(x, y);
    let not_equal = c.not_equal();
    if not_equal == 0 {
      0.0
    } else {
      not_equal as f32 / (0.5 * c.true_true as f32 + not_equal as f32)
    }
  }
}

/// Yule distance.
#[derive(Debug, Clone, Copy)]
pub struct YuleMetric;

impl Metric for YuleMetric {
  fn name(&self) -> &'static str {
    "yule"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let c = BinaryCounts::of(x, y);
    let false_false = x.len() - c.true_true - c.true_false - c.false_true;
    if c.true_false == 0 || c.false_true == 0 {
      0.0
    } else {
      let cross = (c.true_false * c.false_true) as f32;
      2.0 * cross / (c.true_true as f32 * false_false as f32 + cross)
    }
  }
}

/// Mahalanobis distance under the precision matrix `v` (the inverse of the
/// data covariance).
///
/// Not in the name registry because it carries a matrix; inject it with
/// [`crate::Umap::with_metric`].
#[derive(Debug, Clone)]
pub struct MahalanobisMetric {
  pub v: Array2<f32>,
}

impl Metric for MahalanobisMetric {
  fn name(&self) -> &'static str {
    "mahalanobis"
  }

  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let dim = x.len();
    let mut result = 0.0f32;
    let diff: Vec<f32> = (0..dim).map(|i| x[i] - y[i]).collect();
    for i in 0..dim {
      let mut tmp = 0.0f32;
      for j in 0..dim {
        tmp += self.v[(i, j)] * diff[j];
      }
      result += tmp * diff[i];
    }
    result.sqrt()
  }
}

/// Resolve a metric by name.
///
/// Accepted names:
/// euclidean (l2), manhattan (l1, taxicab), chebyshev (linf), canberra,
/// braycurtis, cosine, correlation, hamming, jaccard, dice, russellrao,
/// kulsinski, rogerstanimoto, sokalmichener, sokalsneath, yule.
pub fn metric_by_name(name: &str) -> Result<Arc<dyn Metric>, UmapError> {
  let metric: Arc<dyn Metric> = match name.to_ascii_lowercase().as_str() {
    "euclidean" | "l2" => Arc::new(EuclideanMetric),
    "manhattan" | "l1" | "taxicab" => Arc::new(ManhattanMetric),
    "chebyshev" | "linf" | "linfinity" => Arc::new(ChebyshevMetric),
    "canberra" => Arc::new(CanberraMetric),
    "braycurtis" => Arc::new(BrayCurtisMetric),
    "cosine" => Arc::new(CosineMetric),
    "correlation" => Arc::new(CorrelationMetric),
    "hamming" => Arc::new(HammingMetric),
    "jaccard" => Arc::new(JaccardMetric),
    "dice" => Arc::new(DiceMetric),
    "russellrao" => Arc::new(RussellRaoMetric),
    "kulsinski" => Arc::new(KulsinskiMetric),
    "rogerstanimoto" => Arc::new(RogersTanimotoMetric),
    "sokalmichener" => Arc::new(SokalMichenerMetric),
    "sokalsneath" => Arc::new(SokalSneathMetric),
    "yule" => Arc::new(YuleMetric),
    _ => return Err(UmapError::UnknownMetric(name.to_string())),
  };
  Ok(metric)
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::arr1;

  const NAMES: &[&str] = &[
    "euclidean",
    "manhattan",
    "chebyshev",
    "canberra",
    "braycurtis",
    "cosine",
    "correlation",
    "hamming",
    "jaccard",
    "dice",
    "russellrao",
    "kulsinski",
    "rogerstanimoto",
    "sokalmichener",
    "sokalsneath",
    "yule",
  ];

  #[test]
  fn contract_symmetry_and_identity() {
    let x = arr1(&[1.0f32, 0.0, 2.5, -3.0, 1.0, 0.0]);
    let y = arr1(&[0.5f32, 1.0, 0.0, -1.0, 0.0, 2.0]);
    for name in NAMES {
      let metric = metric_by_name(name).unwrap();
      let xy = metric.distance(x.view(), y.view());
      let yx = metric.distance(y.view(), x.view());
      assert!(xy >= 0.0, "{name} produced a negative distance");
      assert_eq!(xy, yx, "{name} is not symmetric");
      let xx = metric.distance(x.view(), x.view());
      assert!(xx.abs() < 1e-6, "{name} self-distance is {xx}");
    }
  }

  #[test]
  fn euclidean_matches_rdist() {
    let x = arr1(&[0.0f32, 3.0]);
    let y = arr1(&[4.0f32, 0.0]);
    assert_eq!(EuclideanMetric.distance(x.view(), y.view()), 5.0);
    assert_eq!(rdist(x.as_slice().unwrap(), y.as_slice().unwrap()), 25.0);
  }

  #[test]
  fn jaccard_hand_values() {
    let x = arr1(&[1.0f32, 1.0, 0.0, 0.0]);
    let y = arr1(&[1.0f32, 0.0, 1.0, 0.0]);
    // union 3, intersection 1
    let d = JaccardMetric.distance(x.view(), y.view());
    assert!((d - 2.0 / 3.0).abs() < 1e-6);
    // both all-zero
    let z = arr1(&[0.0f32, 0.0, 0.0, 0.0]);
    assert_eq!(JaccardMetric.distance(z.view(), z.view()), 0.0);
  }

  #[test]
  fn cosine_zero_vector_edge_cases() {
    let z = arr1(&[0.0f32, 0.0]);
    let x = arr1(&[1.0f32, 0.0]);
    assert_eq!(CosineMetric.distance(z.view(), z.view()), 0.0);
    assert_eq!(CosineMetric.distance(z.view(), x.view()), 1.0);
    assert!(CosineMetric.distance(x.view(), x.view()).abs() < 1e-6);
  }

  #[test]
  fn unknown_name_is_an_error() {
    assert!(matches!(
      metric_by_name("not-a-metric"),
      Err(UmapError::UnknownMetric(_))
    ));
  }

  #[test]
  fn minkowski_interpolates_between_l1_and_l2() {
    let x = arr1(&[0.0f32, 0.0]);
    let y = arr1(&[3.0f32, 4.0]);
    let m1 = MinkowskiMetric { p: 1.0 };
    let m2 = MinkowskiMetric { p: 2.0 };
    assert!((m1.distance(x.view(), y.view()) - 7.0).abs() < 1e-5);
    assert!((m2.distance(x.view(), y.view()) - 5.0).abs() < 1e-5);
  }
}
