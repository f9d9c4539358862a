use crate::config::EmbeddingInit;
use crate::error::UmapError;
use crate::layout::optimize_layout_euclidean::OptimizeLayoutEuclidean;
use crate::sparse::CooMatrix;
use crate::umap::make_epochs_per_sample::make_epochs_per_sample;
use ndarray::Array1;
use ndarray::Array2;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;
use tracing::info;
use typed_builder::TypedBuilder;

/*
  Perform a fuzzy simplicial set embedding: initialize low dimensional
  positions and minimize the fuzzy set cross entropy between the 1-skeletons
  of the high and low dimensional fuzzy simplicial sets by sampled SGD.

  Before optimization the graph is thresholded: an edge weaker than
  max(weight) / n_epochs would never be sampled anyway, so it is dropped,
  which bounds the total number of edge updates.
*/
#[derive(TypedBuilder)]
pub struct SimplicialSetEmbedding<'g, 'i> {
  graph: &'g CooMatrix,
  n_components: usize,
  initial_alpha: f32,
  a: f32,
  b: f32,
  gamma: f32,
  negative_sample_rate: usize,
  n_epochs: Option<usize>,
  init: &'i EmbeddingInit,
  seed: u64,
}

impl<'g, 'i> SimplicialSetEmbedding<'g, 'i> {
  pub fn exec(self) -> Result<Array2<f32>, UmapError> {
    let Self {
      graph,
      n_components,
      initial_alpha,
      a,
      b,
      gamma,
      negative_sample_rate,
      n_epochs,
      init,
      seed,
    } = self;

    let n_samples = graph.rows();
    let n_vertices = graph.cols();

    // For smaller datasets we can use more epochs
    let default_epochs = if n_samples <= 10000 { 500 } else { 200 };
    let n_epochs = n_epochs.unwrap_or(default_epochs);

    let graph = threshold_graph(graph, n_epochs);

    let mut embedding = match init {
      EmbeddingInit::Random => {
        let mut rng = SmallRng::seed_from_u64(seed);
        Array2::from_shape_fn((n_samples, n_components), |_| {
          rng.random_range(-10.0f32..10.0)
        })
      }
      EmbeddingInit::Matrix(matrix) => {
        if matrix.nrows() != n_samples || matrix.ncols() != n_components {
          return Err(UmapError::ShapeMismatch(format!(
            "init matrix is {:?}, expected [{n_samples}, {n_components}]",
            matrix.shape()
          )));
        }
        matrix.clone()
      }
    };

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

    info!(
      n_epochs,
      n_edges = head.len(),
      "optimizing embedding layout"
    );
    let started = std::time::Instant::now();
    OptimizeLayoutEuclidean::builder()
      .head_embedding(&mut embedding)
      .tail_embedding(None)
      .head(&head)
      .tail(&tail)
      .n_epochs(n_epochs)
      .n_vertices(n_vertices)
      .epochs_per_sample(epochs_per_sample.view())
      .a(a)
      .b(b)
      .gamma(gamma)
      .initial_alpha(initial_alpha)
      .negative_sample_rate(negative_sample_rate as f64)
      .seed(seed)
      .build()
      .exec();
    info!(
      duration_ms = started.elapsed().as_millis(),
      "layout optimization complete"
    );

    Ok(embedding)
  }
}

/// Zero out entries that could never be sampled in `n_epochs` epochs and
/// prune them.
pub fn threshold_graph(graph: &CooMatrix, n_epochs: usize) -> CooMatrix {
  let max_weight = graph
    .triplets()
    .map(|(_, _, v)| v)
    .fold(f32::NEG_INFINITY, f32::max);
  if !max_weight.is_finite() {
    return graph.clone();
  }
  let limit = max_weight / n_epochs as f32;
  graph
    .map_data(|_, _, v| if v < limit { 0.0 } else { v })
    .eliminate_zeros()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn thresholding_drops_only_unsampleable_edges() {
    let graph = CooMatrix::from_triplets(
      (3, 3),
      vec![0, 1, 2],
      vec![1, 2, 0],
      vec![1.0, 0.5, 0.0001],
    )
    .unwrap();
    let kept = threshold_graph(&graph, 100);
    assert_eq!(kept.nnz(), 2);
    assert_eq!(kept.get(2, 0), 0.0);
    assert_eq!(kept.get(0, 1), 1.0);
  }

  #[test]
  fn random_init_embeds_within_bounds() {
    let graph = CooMatrix::from_triplets(
      (4, 4),
      vec![0, 1, 2, 3],
      vec![1, 0, 3, 2],
      vec![1.0, 1.0, 1.0, 1.0],
    )
    .unwrap();
    let embedding = SimplicialSetEmbedding::builder()
      .graph(&graph)
      .n_components(2)
      .initial_alpha(1.0)
      .a(1.577)
      .b(0.895)
      .gamma(1.0)
      .negative_sample_rate(5)
      .n_epochs(Some(20))
      .init(&EmbeddingInit::Random)
      .seed(42)
      .build()
      .exec()
      .unwrap();
    assert_eq!(embedding.shape(), &[4, 2]);
    assert!(embedding.iter().all(|v| v.is_finite()));
  }

  #[test]
  fn mismatched_init_matrix_is_rejected() {
    let graph = CooMatrix::from_triplets((2, 2), vec![0], vec![1], vec![1.0]).unwrap();
    let init = EmbeddingInit::Matrix(Array2::zeros((3, 2)));
    let result = SimplicialSetEmbedding::builder()
      .graph(&graph)
      .n_components(2)
      .initial_alpha(1.0)
      .a(1.577)
      .b(0.895)
      .gamma(1.0)
      .negative_sample_rate(5)
      .n_epochs(Some(20))
      .init(&init)
      .seed(1)
      .build()
      .exec();
    assert!(result.is_err());
  }
}
