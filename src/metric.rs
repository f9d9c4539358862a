use ndarray::ArrayView1;
use std::fmt::Debug;

/// A dissimilarity function over the input space.
///
/// Every metric must satisfy the distance contract: `distance(x, y) ==
/// distance(y, x) >= 0` and `distance(x, x) == 0` for equal-length vectors
/// (angular metrics may also report 0 for a zero vector). Thread-safety
/// (Send + Sync) is required because pairwise distances, NN-descent and the
/// membership computation all run in parallel.
pub trait Metric: Debug + Send + Sync {
  /// Stable identifier, used for model persistence and the name registry.
  fn name(&self) -> &'static str;

  /// Compute the dissimilarity between two equal-length vectors.
  fn distance(&self, x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32;

  /// Whether the metric measures an angle rather than a displacement.
  ///
  /// Angular metrics get great-circle splits in the random projection
  /// forest instead of midpoint-perpendicular ones.
  fn is_angular(&self) -> bool {
    false
  }

  /// Distance threshold beyond which points are considered disconnected.
  ///
  /// For unbounded metrics like Euclidean this is infinity. Bounded metrics
  /// can return their maximum meaningful distance so that edges at the bound
  /// are dropped from the fuzzy graph.
  fn disconnection_threshold(&self) -> f32 {
    f32::INFINITY
  }
}
