use crate::config::MetricSpec;
use crate::config::TargetMetricSpec;
use crate::config::UmapConfig;
use crate::distances::metric_by_name;
use crate::error::UmapError;
use crate::knn::nearest_neighbors;
use crate::knn::pairwise::fast_knn;
use crate::knn::pairwise::pairwise_distances;
use crate::knn::pairwise::pairwise_distances_between;
use crate::knn::rp_tree::FlatTree;
use crate::knn::search::initialise_search;
use crate::knn::search::initialized_nnd_search;
use crate::layout::optimize_layout_euclidean::OptimizeLayoutEuclidean;
use crate::metric::Metric;
use crate::sparse::CooMatrix;
use crate::sparse::SparseGraph;
use crate::umap::compute_membership_strengths::ComputeMembershipStrengths;
use crate::umap::constants::SMALL_PROBLEM_THRESHOLD;
use crate::umap::find_ab_params::find_ab_params;
use crate::umap::fuzzy_simplicial_set::FuzzySimplicialSet;
use crate::umap::init_transform::init_transform;
use crate::umap::intersection::categorical_simplicial_set_intersection;
use crate::umap::intersection::general_simplicial_set_intersection;
use crate::umap::intersection::reset_local_connectivity;
use crate::umap::make_epochs_per_sample::make_epochs_per_sample;
use crate::umap::simplicial_set_embedding::threshold_graph;
use crate::umap::simplicial_set_embedding::SimplicialSetEmbedding;
use crate::umap::smooth_knn_dist::SmoothKnnDist;
use dashmap::DashSet;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::s;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing::warn;

/// UMAP dimensionality reduction.
///
/// Holds a validated configuration plus the resolved input metric and can be
/// reused to fit multiple datasets with the same parameters.
///
/// # Example
///
/// ```ignore
/// use umap::{Umap, UmapConfig};
///
/// let umap = Umap::new(UmapConfig::default())?;
/// let fitted = umap.fit(data.view(), None)?;
/// let embedding = fitted.embedding();
/// let projected = fitted.transform(new_data.view())?;
/// ```
pub struct Umap {
  config: UmapConfig,
  metric_override: Option<Arc<dyn Metric>>,
}

impl Umap {
  /// Create a UMAP instance, validating every configuration parameter.
  pub fn new(config: UmapConfig) -> Result<Self, UmapError> {
    config.validate()?;
    Ok(Self {
      config,
      metric_override: None,
    })
  }

  /// Create a UMAP instance with a custom input metric.
  ///
  /// The metric object takes precedence over `config.metric`. Models fitted
  /// this way persist only the metric's name; a deserialized model must be
  /// given the metric object again if the name is not in the registry.
  pub fn with_metric(config: UmapConfig, metric: Arc<dyn Metric>) -> Result<Self, UmapError> {
    config.validate()?;
    Ok(Self {
      config,
      metric_override: Some(metric),
    })
  }

  fn resolve_metric(&self) -> Result<Option<Arc<dyn Metric>>, UmapError> {
    if let Some(metric) = &self.metric_override {
      return Ok(Some(Arc::clone(metric)));
    }
    match &self.config.metric {
      MetricSpec::Precomputed => Ok(None),
      MetricSpec::Name(name) => Ok(Some(metric_by_name(name)?)),
    }
  }

  /// Metric identifier to persist with a fitted model.
  fn persisted_metric(&self) -> MetricSpec {
    match &self.metric_override {
      Some(metric) => MetricSpec::Name(metric.name().to_string()),
      None => self.config.metric.clone(),
    }
  }

  /// Fit the model and return the embedding, consuming nothing.
  pub fn fit_transform(
    &self,
    data: ArrayView2<f32>,
    y: Option<&[f32]>,
  ) -> Result<Array2<f32>, UmapError> {
    Ok(self.fit(data, y)?.into_embedding())
  }

  /// Fit the manifold structure of `data` and optimize an embedding of it.
  ///
  /// `y` supplies optional supervision: categorical labels (with -1 for
  /// unknown) under the default target metric, or a continuous target under
  /// a named one.
  pub fn fit(&self, data: ArrayView2<f32>, y: Option<&[f32]>) -> Result<FittedUmap, UmapError> {
    let n_samples = data.shape()[0];
    let config = &self.config;

    if let Some(target) = y {
      if target.len() != n_samples {
        return Err(UmapError::ShapeMismatch(format!(
          "data has {n_samples} rows but y has {} entries",
          target.len()
        )));
      }
    }

    let (a, b) = match (config.manifold.a, config.manifold.b) {
      (Some(a), Some(b)) => (a, b),
      _ => find_ab_params(config.manifold.spread, config.manifold.min_dist)?,
    };

    // Degenerate dataset: nothing to optimize
    if n_samples == 1 {
      return Ok(FittedUmap {
        config: config.clone(),
        a,
        b,
        raw_data: data.to_owned(),
        metric: self.persisted_metric(),
        metric_override: self.metric_override.clone(),
        n_neighbors: 0,
        small_data: true,
        graph: CooMatrix::from_triplets((1, 1), vec![], vec![], vec![])?.to_csr(),
        knn_indices: None,
        knn_dists: None,
        rp_forest: Vec::new(),
        search_graph: None,
        embedding: Array2::zeros((1, config.n_components)),
      });
    }

    let n_neighbors = if n_samples <= config.graph.n_neighbors {
      warn!(
        n_samples,
        "n_neighbors is larger than the dataset size; truncating to n_samples - 1"
      );
      n_samples - 1
    } else {
      config.graph.n_neighbors
    };

    let metric = self.resolve_metric()?;
    if metric.is_none() && data.shape()[1] != n_samples {
      return Err(UmapError::ShapeMismatch(format!(
        "precomputed metric requires a square distance matrix, got {:?}",
        data.shape()
      )));
    }

    info!(n_samples, n_neighbors, "constructing fuzzy simplicial set");
    let small_data = n_samples < SMALL_PROBLEM_THRESHOLD;

    let mut rp_forest = Vec::new();
    let (knn_indices, knn_dists) = match &metric {
      // Rows of a distance matrix sort directly
      None => fast_knn(data, n_neighbors),
      Some(metric) if small_data => {
        let dmat = pairwise_distances(data, metric.as_ref());
        fast_knn(dmat.view(), n_neighbors)
      }
      Some(metric) => {
        let knn = nearest_neighbors(
          data,
          n_neighbors,
          metric.as_ref(),
          config.angular_rp_forest,
          config.random_seed,
        );
        rp_forest = knn.forest;
        (knn.indices, knn.dists)
      }
    };

    // Mark edges at or beyond the disconnection distance
    let disconnection_distance = config.graph.disconnection_distance.unwrap_or_else(|| {
      metric
        .as_ref()
        .map(|m| m.disconnection_threshold())
        .unwrap_or(f32::INFINITY)
    });
    let knn_disconnections = DashSet::new();
    (0..n_samples).into_par_iter().for_each(|row| {
      for (col, &dist) in knn_dists.row(row).iter().enumerate() {
        if dist >= disconnection_distance {
          knn_disconnections.insert((row, col));
        }
      }
    });
    let edges_removed = knn_disconnections.len();

    let started = Instant::now();
    let (mut graph, _sigmas, _rhos) = FuzzySimplicialSet::builder()
      .n_samples(n_samples)
      .n_neighbors(n_neighbors as f32)
      .knn_indices(knn_indices.view())
      .knn_dists(knn_dists.view())
      .knn_disconnections(&knn_disconnections)
      .set_op_mix_ratio(config.graph.set_op_mix_ratio)
      .local_connectivity(config.graph.local_connectivity)
      .build()
      .exec();
    info!(
      duration_ms = started.elapsed().as_millis(),
      nnz = graph.nnz(),
      "fuzzy simplicial set complete"
    );

    let vertices_disconnected = count_disconnected(&graph);
    if vertices_disconnected > 0 {
      warn!(
        vertices_disconnected,
        edges_removed,
        disconnection_distance,
        "some vertices are fully disconnected from the manifold; their embedding will be NaN"
      );
    }

    // Symmetric {0, 1} adjacency over the kNN edges, kept for
    // transform-time searches
    let search_graph = if small_data {
      None
    } else {
      Some(build_search_graph(&knn_indices, &knn_dists, n_samples)?)
    };

    if let Some(target) = y {
      graph = match &config.target.metric {
        TargetMetricSpec::Categorical => {
          let far_dist = if config.target.weight < 1.0 {
            2.5 * (1.0 / (1.0 - config.target.weight))
          } else {
            1.0e12
          };
          categorical_simplicial_set_intersection(&graph, target, 1.0, far_dist)
        }
        TargetMetricSpec::Name(name) => {
          let target_metric = metric_by_name(name)?;
          let target_graph = self.target_fuzzy_graph(target, target_metric.as_ref(), n_neighbors)?;
          let combined =
            general_simplicial_set_intersection(&graph, &target_graph, config.target.weight);
          reset_local_connectivity(&combined)
        }
      };
    }

    info!("constructing embedding");
    let mut embedding = SimplicialSetEmbedding::builder()
      .graph(&graph)
      .n_components(config.n_components)
      .initial_alpha(config.optimization.learning_rate)
      .a(a)
      .b(b)
      .gamma(config.optimization.repulsion_strength)
      .negative_sample_rate(config.optimization.negative_sample_rate)
      .n_epochs(config.optimization.n_epochs)
      .init(&config.init)
      .seed(config.random_seed)
      .build()
      .exec()?;

    // Disconnected vertices have no edges pulling them anywhere meaningful
    mask_disconnected(&graph, &mut embedding);

    Ok(FittedUmap {
      config: config.clone(),
      a,
      b,
      raw_data: data.to_owned(),
      metric: self.persisted_metric(),
      metric_override: self.metric_override.clone(),
      n_neighbors,
      small_data,
      graph: graph.to_csr(),
      knn_indices: Some(knn_indices),
      knn_dists: Some(knn_dists),
      rp_forest,
      search_graph,
      embedding,
    })
  }

  /// Fuzzy graph over the target variable, treated as points on a line.
  fn target_fuzzy_graph(
    &self,
    target: &[f32],
    metric: &dyn Metric,
    n_neighbors: usize,
  ) -> Result<CooMatrix, UmapError> {
    let n = target.len();
    let target_n_neighbors = self.config.target.n_neighbors.unwrap_or(n_neighbors).min(n - 1);
    let column = Array2::from_shape_fn((n, 1), |(i, _)| target[i]);

    let (knn_indices, knn_dists) = if n < SMALL_PROBLEM_THRESHOLD {
      let dmat = pairwise_distances(column.view(), metric);
      fast_knn(dmat.view(), target_n_neighbors)
    } else {
      let knn = nearest_neighbors(
        column.view(),
        target_n_neighbors,
        metric,
        false,
        self.config.random_seed,
      );
      (knn.indices, knn.dists)
    };

    let disconnections = DashSet::new();
    let (graph, _, _) = FuzzySimplicialSet::builder()
      .n_samples(n)
      .n_neighbors(target_n_neighbors as f32)
      .knn_indices(knn_indices.view())
      .knn_dists(knn_dists.view())
      .knn_disconnections(&disconnections)
      .build()
      .exec();
    Ok(graph)
  }
}

fn count_disconnected(graph: &CooMatrix) -> usize {
  let mut has_edge = vec![false; graph.rows()];
  for (r, _, v) in graph.triplets() {
    if v > 0.0 {
      has_edge[r as usize] = true;
    }
  }
  has_edge.iter().filter(|&&connected| !connected).count()
}

fn mask_disconnected(graph: &CooMatrix, embedding: &mut Array2<f32>) {
  let mut has_edge = vec![false; graph.rows()];
  for (r, _, v) in graph.triplets() {
    if v > 0.0 {
      has_edge[r as usize] = true;
    }
  }
  for (row, connected) in has_edge.iter().enumerate() {
    if !connected {
      for d in 0..embedding.shape()[1] {
        embedding[(row, d)] = f32::NAN;
      }
    }
  }
}

/// Symmetric closure of the directed kNN edges as a {0, 1} CSR matrix.
fn build_search_graph(
  knn_indices: &Array2<i32>,
  knn_dists: &Array2<f32>,
  n_samples: usize,
) -> Result<SparseGraph, UmapError> {
  let mut row = Vec::new();
  let mut col = Vec::new();
  let mut val = Vec::new();
  for i in 0..n_samples {
    for slot in 0..knn_indices.shape()[1] {
      let j = knn_indices[(i, slot)];
      if j >= 0 && knn_dists[(i, slot)] != 0.0 {
        row.push(i as u32);
        col.push(j as u32);
        val.push(1.0);
      }
    }
  }
  let adjacency = CooMatrix::from_triplets((n_samples, n_samples), row, col, val)?;
  Ok(adjacency.maximum(&adjacency.transpose())?.to_csr())
}

/// A fitted UMAP model: the optimized embedding plus everything `transform`
/// needs to place new points into it.
///
/// Serializable; custom metric objects are carried outside serde and must
/// be re-supplied after deserialization when the metric name is not in the
/// registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedUmap {
  pub(crate) config: UmapConfig,
  pub(crate) a: f32,
  pub(crate) b: f32,
  pub(crate) raw_data: Array2<f32>,
  pub(crate) metric: MetricSpec,
  #[serde(skip)]
  pub(crate) metric_override: Option<Arc<dyn Metric>>,
  /// Effective neighborhood size after truncation against the dataset.
  pub(crate) n_neighbors: usize,
  pub(crate) small_data: bool,
  pub(crate) graph: SparseGraph,
  pub(crate) knn_indices: Option<Array2<i32>>,
  pub(crate) knn_dists: Option<Array2<f32>>,
  pub(crate) rp_forest: Vec<FlatTree>,
  pub(crate) search_graph: Option<SparseGraph>,
  pub(crate) embedding: Array2<f32>,
}

impl FittedUmap {
  /// Zero-copy view of the training embedding, shape
  /// `(n_samples, n_components)`.
  pub fn embedding(&self) -> ArrayView2<'_, f32> {
    self.embedding.view()
  }

  /// Consume the model and return the embedding without copying.
  pub fn into_embedding(self) -> Array2<f32> {
    self.embedding
  }

  /// The curve parameters `(a, b)` of the low-dimensional kernel.
  pub fn curve_params(&self) -> (f32, f32) {
    (self.a, self.b)
  }

  /// The symmetrized fuzzy graph the embedding was optimized against.
  pub fn graph(&self) -> &SparseGraph {
    &self.graph
  }

  /// The configuration this model was fitted with.
  pub fn config(&self) -> &UmapConfig {
    &self.config
  }

  fn resolve_metric(&self) -> Result<Option<Arc<dyn Metric>>, UmapError> {
    if let Some(metric) = &self.metric_override {
      return Ok(Some(Arc::clone(metric)));
    }
    match &self.metric {
      MetricSpec::Precomputed => Ok(None),
      MetricSpec::Name(name) => Ok(Some(metric_by_name(name)?)),
    }
  }

  /// Embed new points into the fitted space, holding the training embedding
  /// fixed.
  pub fn transform(&self, data: ArrayView2<f32>) -> Result<Array2<f32>, UmapError> {
    if self.embedding.shape()[0] == 1 {
      return Err(UmapError::Unsupported(
        "transform unavailable when the model was fit with only a single sample".to_string(),
      ));
    }
    let metric = self.resolve_metric()?.ok_or_else(|| {
      UmapError::Unsupported(
        "transform of new data is not available for a precomputed metric".to_string(),
      )
    })?;
    if data.shape()[1] != self.raw_data.shape()[1] {
      return Err(UmapError::ShapeMismatch(format!(
        "transform data has {} features but the model was fit on {}",
        data.shape()[1],
        self.raw_data.shape()[1]
      )));
    }

    let n_queries = data.shape()[0];
    let n_neighbors = self.n_neighbors;
    let config = &self.config;

    let (indices, dists) = if self.small_data {
      let dmat = pairwise_distances_between(data, self.raw_data.view(), metric.as_ref());
      fast_knn(dmat.view(), n_neighbors)
    } else {
      let search_graph = self.search_graph.as_ref().ok_or_else(|| {
        UmapError::Unsupported("model carries no search graph for transform".to_string())
      })?;
      let queue_size =
        ((n_neighbors as f32 * config.transform.queue_size) as usize).max(n_neighbors);
      let mut rng = SmallRng::seed_from_u64(config.transform.seed);
      let heap = initialise_search(
        &self.rp_forest,
        self.raw_data.view(),
        data,
        queue_size,
        metric.as_ref(),
        &mut rng,
      );
      let heap = initialized_nnd_search(
        self.raw_data.view(),
        search_graph.view(),
        heap,
        data,
        metric.as_ref(),
      );
      let (all_indices, all_dists) = heap.deheap_sort();
      (
        all_indices.slice(s![.., ..n_neighbors]).to_owned(),
        all_dists.slice(s![.., ..n_neighbors]).to_owned(),
      )
    };

    let adjusted_local_connectivity = (config.graph.local_connectivity - 1.0).max(0.0);
    let (sigmas, rhos) = SmoothKnnDist::builder()
      .distances(dists.view())
      .k(n_neighbors as f32)
      .local_connectivity(adjusted_local_connectivity)
      .build()
      .exec();

    let disconnections = DashSet::new();
    let (rows, cols, vals) = ComputeMembershipStrengths::builder()
      .knn_indices(indices.view())
      .knn_dists(dists.view())
      .knn_disconnections(&disconnections)
      .sigmas(&sigmas.view())
      .rhos(&rhos.view())
      .bipartite(true)
      .build()
      .exec();
    let graph = CooMatrix::from_triplets(
      (n_queries, self.raw_data.shape()[0]),
      rows,
      cols,
      vals,
    )?
    .eliminate_zeros();

    // Initial positions: weighted average of each query's neighbors
    let normalized = graph.row_normalize_l1().to_csr();
    let mut embedding = init_transform(normalized.view(), self.embedding.view());

    let n_epochs = config.optimization.n_epochs.unwrap_or_else(|| {
      if n_queries <= 10000 {
        100
      } else {
        30
      }
    });

    let graph = threshold_graph(&graph, n_epochs);
    let mut head = Vec::with_capacity(graph.nnz());
    let mut tail = Vec::with_capacity(graph.nnz());
    let mut weights = Vec::with_capacity(graph.nnz());
    for (r, c, v) in graph.triplets() {
      head.push(r);
      tail.push(c);
      weights.push(v);
    }
    let weights = Array1::from(weights);
    let epochs_per_sample = make_epochs_per_sample(&weights.view(), n_epochs);

    info!(n_queries, n_epochs, "optimizing transform layout");
    OptimizeLayoutEuclidean::builder()
      .head_embedding(&mut embedding)
      .tail_embedding(Some(&self.embedding))
      .head(&head)
      .tail(&tail)
      .n_epochs(n_epochs)
      .n_vertices(self.embedding.shape()[0])
      .epochs_per_sample(epochs_per_sample.view())
      .a(self.a)
      .b(self.b)
      .gamma(config.optimization.repulsion_strength)
      .initial_alpha(config.optimization.learning_rate)
      .negative_sample_rate(config.optimization.negative_sample_rate as f64)
      .seed(config.transform.seed)
      .build()
      .exec();

    Ok(embedding)
  }
}
