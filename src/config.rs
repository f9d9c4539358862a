use crate::distances::metric_by_name;
use crate::error::UmapError;
use ndarray::Array2;
use serde::Deserialize;
use serde::Serialize;

/// How to measure dissimilarity in the input space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricSpec {
  /// The input matrix already holds pairwise distances; kNN reduces to
  /// sorting its rows. `transform` is unavailable after a precomputed fit.
  Precomputed,
  /// A named metric resolved through [`crate::distances::metric_by_name`].
  Name(String),
}

impl MetricSpec {
  pub fn named(name: &str) -> Self {
    MetricSpec::Name(name.to_string())
  }
}

impl Default for MetricSpec {
  fn default() -> Self {
    MetricSpec::Name("euclidean".to_string())
  }
}

/// How to measure dissimilarity on the supervision target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TargetMetricSpec {
  /// Label data: equal labels attract, unequal labels repel, -1 is unknown.
  Categorical,
  /// A continuous target measured with a named metric.
  Name(String),
}

impl Default for TargetMetricSpec {
  fn default() -> Self {
    TargetMetricSpec::Categorical
  }
}

/// How to initialize the low-dimensional embedding.
///
/// Spectral initialization is deliberately not offered; seed positions are
/// either uniform random in [-10, 10] or caller-supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EmbeddingInit {
  /// Uniform random positions in [-10, 10], drawn from the configured seed.
  Random,
  /// User-supplied positions of shape (n_samples, n_components).
  Matrix(Array2<f32>),
}

impl Default for EmbeddingInit {
  fn default() -> Self {
    EmbeddingInit::Random
  }
}

/// Configuration for manifold shape and embedding space properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifoldParams {
  /// Minimum distance between points in the embedding space.
  ///
  /// Controls how tightly points can be packed together. Smaller values
  /// create more clustered embeddings, larger values spread points out
  /// more. Must satisfy `0 < min_dist < spread`.
  ///
  /// Default: 0.1
  pub min_dist: f32,

  /// The effective scale of embedded points.
  ///
  /// Together with `min_dist`, this determines the embedding's overall
  /// spread. The low-dimensional kernel is calibrated from these via a
  /// lookup table, which constrains spread to [0.5, 1.5].
  ///
  /// Default: 1.0
  pub spread: f32,

  /// Parameter 'a' of the distance-to-probability curve: 1 / (1 + a*x^(2b))
  ///
  /// If `None`, computed from `min_dist` and `spread`.
  pub a: Option<f32>,

  /// Parameter 'b' of the distance-to-probability curve: 1 / (1 + a*x^(2b))
  ///
  /// If `None`, computed from `min_dist` and `spread`.
  pub b: Option<f32>,
}

impl Default for ManifoldParams {
  fn default() -> Self {
    Self {
      min_dist: 0.1,
      spread: 1.0,
      a: None,
      b: None,
    }
  }
}

/// Configuration for k-nearest neighbor graph construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphParams {
  /// Number of nearest neighbors to use for manifold approximation.
  ///
  /// Larger values capture more global structure but may miss fine details.
  /// Must be >= 2. When the dataset has fewer rows the value is truncated
  /// with a warning.
  ///
  /// Default: 15
  pub n_neighbors: usize,

  /// Local connectivity requirement (number of nearest neighbors assumed
  /// connected at full strength). Must be >= 1.
  ///
  /// Default: 1.0
  pub local_connectivity: f32,

  /// Interpolation between fuzzy union (1.0) and fuzzy intersection (0.0)
  /// when local fuzzy simplicial sets are combined.
  ///
  /// Default: 1.0
  pub set_op_mix_ratio: f32,

  /// Distance threshold beyond which kNN edges are disconnected.
  ///
  /// `None` uses the metric's own threshold (infinity for unbounded
  /// metrics).
  pub disconnection_distance: Option<f32>,
}

impl Default for GraphParams {
  fn default() -> Self {
    Self {
      n_neighbors: 15,
      local_connectivity: 1.0,
      set_op_mix_ratio: 1.0,
      disconnection_distance: None,
    }
  }
}

/// Configuration for stochastic gradient descent optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationParams {
  /// Number of optimization epochs.
  ///
  /// If `None`, chosen from the dataset size: 500 epochs up to 10,000
  /// samples, 200 beyond (100/30 for transform). An explicit value must be
  /// greater than 10.
  pub n_epochs: Option<usize>,

  /// Initial learning rate for SGD; decays linearly to zero. Must be > 0.
  ///
  /// Default: 1.0
  pub learning_rate: f32,

  /// Number of negative samples per positive sample. Must be >= 1.
  ///
  /// Default: 5
  pub negative_sample_rate: usize,

  /// Weight applied to negative samples (repulsion strength). Must be
  /// >= 0.
  ///
  /// Default: 1.0
  pub repulsion_strength: f32,
}

impl Default for OptimizationParams {
  fn default() -> Self {
    Self {
      n_epochs: None,
      learning_rate: 1.0,
      negative_sample_rate: 5,
      repulsion_strength: 1.0,
    }
  }
}

/// Configuration for supervised fits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetParams {
  /// Metric over the target values. Default: categorical.
  pub metric: TargetMetricSpec,

  /// Neighborhood size for the target fuzzy graph; `None` inherits
  /// `n_neighbors`. An explicit value must be >= 2.
  pub n_neighbors: Option<usize>,

  /// Weighting between data topology (0.0) and target topology (1.0).
  ///
  /// Default: 0.5
  pub weight: f32,
}

impl Default for TargetParams {
  fn default() -> Self {
    Self {
      metric: TargetMetricSpec::default(),
      n_neighbors: None,
      weight: 0.5,
    }
  }
}

/// Configuration for embedding new points against a fitted model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformParams {
  /// How aggressively to search for nearest neighbors: the search heap
  /// holds `n_neighbors * queue_size` candidates per query. Larger is
  /// slower but more accurate.
  ///
  /// Default: 4.0
  pub queue_size: f32,

  /// Seed for the stochastic parts of `transform`, kept separate from the
  /// fit seed so repeated transforms are consistent.
  ///
  /// Default: 42
  pub seed: u64,
}

impl Default for TransformParams {
  fn default() -> Self {
    Self {
      queue_size: 4.0,
      seed: 42,
    }
  }
}

/// Complete UMAP configuration.
///
/// All parameter groups have sensible defaults and can be customized
/// individually; [`crate::Umap::new`] validates the whole structure before
/// any computation starts.
///
/// # Example
///
/// ```ignore
/// use umap::config::{UmapConfig, GraphParams};
///
/// let config = UmapConfig {
///     n_components: 3,
///     graph: GraphParams {
///         n_neighbors: 30,
///         ..Default::default()
///     },
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UmapConfig {
  /// Number of dimensions in the output embedding. Must be >= 1.
  ///
  /// Default: 2
  pub n_components: usize,

  /// Input-space metric.
  pub metric: MetricSpec,

  /// Embedding initialization strategy.
  pub init: EmbeddingInit,

  /// Seed for every stochastic choice of the fit (forest splits, initial
  /// embedding, negative samples, tie-breaks).
  ///
  /// Default: 42
  pub random_seed: u64,

  /// Force angular splits in the random projection forest even for
  /// non-angular metrics.
  pub angular_rp_forest: bool,

  /// Manifold shape configuration.
  pub manifold: ManifoldParams,

  /// Graph construction configuration.
  pub graph: GraphParams,

  /// Optimization configuration.
  pub optimization: OptimizationParams,

  /// Supervised-fit configuration.
  pub target: TargetParams,

  /// Transform configuration.
  pub transform: TransformParams,
}

impl Default for UmapConfig {
  fn default() -> Self {
    Self {
      n_components: 2,
      metric: MetricSpec::default(),
      init: EmbeddingInit::default(),
      random_seed: 42,
      angular_rp_forest: false,
      manifold: ManifoldParams::default(),
      graph: GraphParams::default(),
      optimization: OptimizationParams::default(),
      target: TargetParams::default(),
      transform: TransformParams::default(),
    }
  }
}

impl UmapConfig {
  /// Check every parameter range. Called by [`crate::Umap::new`] so that
  /// configuration problems surface before any computation, never
  /// mid-pipeline.
  pub fn validate(&self) -> Result<(), UmapError> {
    if self.n_components < 1 {
      return Err(UmapError::Config(format!(
        "n_components must be >= 1, got {}",
        self.n_components
      )));
    }
    if self.graph.n_neighbors < 2 {
      return Err(UmapError::Config(format!(
        "n_neighbors must be >= 2, got {}",
        self.graph.n_neighbors
      )));
    }
    if self.graph.local_connectivity < 1.0 {
      return Err(UmapError::Config(format!(
        "local_connectivity must be >= 1, got {}",
        self.graph.local_connectivity
      )));
    }
    if !(0.0..=1.0).contains(&self.graph.set_op_mix_ratio) {
      return Err(UmapError::Config(format!(
        "set_op_mix_ratio must be between 0.0 and 1.0, got {}",
        self.graph.set_op_mix_ratio
      )));
    }
    if !(0.5..=1.5).contains(&self.manifold.spread) {
      return Err(UmapError::Config(format!(
        "spread must be in the range 0.5 <= spread <= 1.5, got {}",
        self.manifold.spread
      )));
    }
    if self.manifold.min_dist <= 0.0 || self.manifold.min_dist >= self.manifold.spread {
      return Err(UmapError::Config(format!(
        "min_dist must satisfy 0 < min_dist < spread, got {} (spread {})",
        self.manifold.min_dist, self.manifold.spread
      )));
    }
    if let Some(n_epochs) = self.optimization.n_epochs {
      if n_epochs <= 10 {
        return Err(UmapError::Config(format!(
          "n_epochs must be larger than 10, got {n_epochs}"
        )));
      }
    }
    if self.optimization.learning_rate <= 0.0 {
      return Err(UmapError::Config(format!(
        "learning_rate must be positive, got {}",
        self.optimization.learning_rate
      )));
    }
    if self.optimization.negative_sample_rate < 1 {
      return Err(UmapError::Config(format!(
        "negative_sample_rate must be >= 1, got {}",
        self.optimization.negative_sample_rate
      )));
    }
    if self.optimization.repulsion_strength < 0.0 {
      return Err(UmapError::Config(format!(
        "repulsion_strength cannot be negative, got {}",
        self.optimization.repulsion_strength
      )));
    }
    if let Some(target_n_neighbors) = self.target.n_neighbors {
      if target_n_neighbors < 2 {
        return Err(UmapError::Config(format!(
          "target_n_neighbors must be >= 2, got {target_n_neighbors}"
        )));
      }
    }
    if !(0.0..=1.0).contains(&self.target.weight) {
      return Err(UmapError::Config(format!(
        "target_weight must be between 0.0 and 1.0, got {}",
        self.target.weight
      )));
    }
    if self.transform.queue_size <= 0.0 {
      return Err(UmapError::Config(format!(
        "transform_queue_size must be positive, got {}",
        self.transform.queue_size
      )));
    }

    // Names must resolve now, not in the middle of a fit.
    if let MetricSpec::Name(name) = &self.metric {
      metric_by_name(name)?;
    }
    if let TargetMetricSpec::Name(name) = &self.target.metric {
      metric_by_name(name)?;
    }
    if let EmbeddingInit::Matrix(matrix) = &self.init {
      if matrix.shape()[1] != self.n_components {
        return Err(UmapError::Config(format!(
          "init matrix has {} components but n_components is {}",
          matrix.shape()[1],
          self.n_components
        )));
      }
    }
    Ok(())
  }
}
