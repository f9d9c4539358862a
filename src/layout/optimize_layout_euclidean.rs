use crate::utils::clip::clip;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;
use rayon::prelude::*;
use typed_builder::TypedBuilder;

/// Wrapper to allow concurrent mutable access to embedding arrays in parallel SGD.
///
/// # Safety
///
/// This type explicitly allows data races on the underlying f32 values. This is acceptable
/// for stochastic gradient descent because:
///
/// 1. **The algorithm is inherently stochastic** - SGD already has randomness, and occasional
///    lost updates don't affect convergence.
///
/// 2. **Races are rare** - In typical graphs, most edges don't share vertices in the same
///    parallel batch, so conflicts are infrequent.
///
/// 3. **Performance is critical** - The speedup from parallelism (4-8x) vastly outweighs
///    the negligible impact of rare lost updates.
///
/// This is a well-known pattern in parallel SGD implementations. See:
/// - Hogwild! algorithm (Recht et al., 2011)
/// - Numba's parallel prange with relaxed memory ordering
struct UnsafeSyncCell<T> {
  ptr: *mut T,
}

unsafe impl<T> Send for UnsafeSyncCell<T> {}
unsafe impl<T> Sync for UnsafeSyncCell<T> {}

impl<T> UnsafeSyncCell<T> {
  /// Creates a new UnsafeSyncCell from a mutable pointer.
  ///
  /// # Safety
  ///
  /// The caller must ensure that:
  /// - The pointer remains valid for the lifetime of this cell
  /// - Concurrent unsynchronized access is acceptable for the use case
  unsafe fn new(ptr: *mut T) -> Self {
    Self { ptr }
  }

  #[inline(always)]
  fn get(&self) -> *mut T {
    self.ptr
  }
}

/*
  Improve an embedding using stochastic gradient descent to minimize the
  fuzzy set cross entropy between the 1-skeletons of the high dimensional
  and low dimensional fuzzy simplicial sets. In practice this is done by
  sampling edges based on their membership strength (with the (1-p) terms
  coming from negative sampling similar to word2vec).

  Parameters
  ----------
  head_embedding: array of shape (n_samples, n_components)
      The initial embedding to be improved by SGD. Mutated in place.

  tail_embedding: optional array of shape (source_samples, n_components)
      The reference embedding of embedded points. None means the edges are
      self-referential (ordinary fit): tails resolve into head_embedding and
      both endpoints of a positive edge move. Some(reference) freezes the
      reference side (transform): only head rows move.

  head: array of shape (n_1_simplices)
      The indices of the heads of 1-simplices with non-zero membership.

  tail: array of shape (n_1_simplices)
      The indices of the tails of 1-simplices with non-zero membership.

  n_epochs: int
      The number of training epochs to use in optimization.

  n_vertices: int
      The number of vertices (0-simplices) in the tail set; negative samples
      are drawn uniformly from it.

  epochs_per_sample: array of shape (n_1_simplices)
      A float value of the number of epochs per 1-simplex. 1-simplices with
      weaker membership strength will have more epochs between being sampled.
      -1 marks an edge that never fires.

  a, b: float
      Parameters of the differentiable approximation of the membership curve.

  gamma: float (optional, default 1.0)
      Weight to apply to negative samples.

  initial_alpha: float (optional, default 1.0)
      Initial learning rate for the SGD; decays linearly to zero.

  negative_sample_rate: float (optional, default 5.0)
      Number of negative samples to use per positive sample.

  seed: int
      Source for all negative-sample draws. The parallel path derives one
      generator per (epoch, edge), so runs are reproducible up to the
      documented write races.

  parallel: bool (optional, default true)
      Whether to process the edges of each epoch with rayon, with
      hogwild-style unsynchronized writes into the embedding.
*/
#[derive(TypedBuilder)]
pub struct OptimizeLayoutEuclidean<'a> {
  head_embedding: &'a mut Array2<f32>,
  tail_embedding: Option<&'a Array2<f32>>,
  head: &'a [u32],
  tail: &'a [u32],
  n_epochs: usize,
  n_vertices: usize,
  epochs_per_sample: ArrayView1<'a, f64>,
  a: f32,
  b: f32,
  seed: u64,
  #[builder(default = 1.0)]
  gamma: f32,
  #[builder(default = 1.0)]
  initial_alpha: f32,
  #[builder(default = 5.0)]
  negative_sample_rate: f64,
  #[builder(default = true)]
  parallel: bool,
}

impl<'a> OptimizeLayoutEuclidean<'a> {
  pub fn exec(self) {
    let Self {
      head_embedding,
      tail_embedding,
      head,
      tail,
      n_epochs,
      n_vertices,
      epochs_per_sample,
      a,
      b,
      seed,
      gamma,
      initial_alpha,
      negative_sample_rate,
      parallel,
    } = self;

    let n_edges = epochs_per_sample.len();
    let mut epochs_per_negative_sample = Array1::<f64>::zeros(n_edges);
    for i in 0..n_edges {
      epochs_per_negative_sample[i] = epochs_per_sample[i] / negative_sample_rate;
    }
    let mut epoch_of_next_negative_sample = epochs_per_negative_sample.clone();
    let mut epoch_of_next_sample = epochs_per_sample.to_owned();

    let mut serial_rng = SmallRng::seed_from_u64(seed);

    for n in 0..n_epochs {
      let alpha = initial_alpha * (1.0 - (n as f32 / n_epochs as f32));
      let state = EpochState {
        head,
        tail,
        n_vertices,
        epochs_per_sample,
        a,
        b,
        gamma,
        alpha,
        n,
      };

      if parallel {
        single_epoch_parallel(
          head_embedding,
          tail_embedding,
          &state,
          &epochs_per_negative_sample,
          &mut epoch_of_next_sample,
          &mut epoch_of_next_negative_sample,
          seed,
        );
      } else {
        single_epoch_serial(
          head_embedding,
          tail_embedding,
          &state,
          &epochs_per_negative_sample,
          &mut epoch_of_next_sample,
          &mut epoch_of_next_negative_sample,
          &mut serial_rng,
        );
      }
    }
  }
}

struct EpochState<'a> {
  head: &'a [u32],
  tail: &'a [u32],
  n_vertices: usize,
  epochs_per_sample: ArrayView1<'a, f64>,
  a: f32,
  b: f32,
  gamma: f32,
  alpha: f32,
  n: usize,
}

/// Attractive gradient coefficient: -2ab * d^(2(b-1)) / (a * d^(2b) + 1).
#[inline(always)]
fn attractive_coeff(a: f32, b: f32, dist_squared: f32) -> f32 {
  let dist_pow_b = dist_squared.powf(b);
  -2.0 * a * b * dist_pow_b / dist_squared / (a * dist_pow_b + 1.0)
}

/// Repulsive gradient coefficient: 2gb / ((0.001 + d^2)(a * d^(2b) + 1)).
#[inline(always)]
fn repulsive_coeff(a: f32, b: f32, gamma: f32, dist_squared: f32) -> f32 {
  let dist_pow_b = dist_squared.powf(b);
  2.0 * gamma * b / ((0.001 + dist_squared) * (a * dist_pow_b + 1.0))
}

#[allow(clippy::too_many_arguments)]
fn single_epoch_serial(
  head_embedding: &mut Array2<f32>,
  tail_embedding: Option<&Array2<f32>>,
  state: &EpochState,
  epochs_per_negative_sample: &Array1<f64>,
  epoch_of_next_sample: &mut Array1<f64>,
  epoch_of_next_negative_sample: &mut Array1<f64>,
  rng: &mut SmallRng,
) {
  let dim = head_embedding.shape()[1];
  let move_other = tail_embedding.is_none();
  let n = state.n;
  let alpha = state.alpha;

  // Resolve a tail coordinate: either the frozen reference or the head
  // embedding itself.
  macro_rules! tail_at {
    ($k:expr, $d:expr) => {
      match tail_embedding {
        Some(t) => t[($k, $d)],
        None => head_embedding[($k, $d)],
      }
    };
  }

  for i in 0..state.epochs_per_sample.len() {
    // -1 marks an edge that never fires
    if state.epochs_per_sample[i] <= 0.0 || epoch_of_next_sample[i] > n as f64 {
      continue;
    }
    let j = state.head[i] as usize;
    let k = state.tail[i] as usize;

    let mut dist_squared = 0.0f32;
    for d in 0..dim {
      let diff = head_embedding[(j, d)] - tail_at!(k, d);
      dist_squared += diff * diff;
    }

    let grad_coeff = if dist_squared > 0.0 {
      attractive_coeff(state.a, state.b, dist_squared)
    } else {
      0.0
    };

    for d in 0..dim {
      let diff = head_embedding[(j, d)] - tail_at!(k, d);
      let grad_d = clip(grad_coeff * diff);
      head_embedding[(j, d)] += grad_d * alpha;
      if move_other {
        head_embedding[(k, d)] -= grad_d * alpha;
      }
    }

    epoch_of_next_sample[i] += state.epochs_per_sample[i];

    let n_neg_samples =
      ((n as f64 - epoch_of_next_negative_sample[i]) / epochs_per_negative_sample[i]) as usize;

    for _p in 0..n_neg_samples {
      let k = rng.random_range(0..state.n_vertices);

      let mut dist_squared = 0.0f32;
      for d in 0..dim {
        let diff = head_embedding[(j, d)] - tail_at!(k, d);
        dist_squared += diff * diff;
      }

      if dist_squared > 0.0 {
        let grad_coeff = repulsive_coeff(state.a, state.b, state.gamma, dist_squared);
        for d in 0..dim {
          let diff = head_embedding[(j, d)] - tail_at!(k, d);
          let grad_d = clip(grad_coeff * diff);
          head_embedding[(j, d)] += grad_d * alpha;
        }
      } else if j == k {
        continue;
      } else {
        // coincident but distinct points get an unconditional kick apart
        for d in 0..dim {
          head_embedding[(j, d)] += 4.0 * alpha;
        }
      }
    }

    epoch_of_next_negative_sample[i] += n_neg_samples as f64 * epochs_per_negative_sample[i];
  }
}

#[allow(clippy::too_many_arguments)]
fn single_epoch_parallel(
  head_embedding: &mut Array2<f32>,
  tail_embedding: Option<&Array2<f32>>,
  state: &EpochState,
  epochs_per_negative_sample: &Array1<f64>,
  epoch_of_next_sample: &mut Array1<f64>,
  epoch_of_next_negative_sample: &mut Array1<f64>,
  seed: u64,
) {
  let dim = head_embedding.shape()[1];
  let move_other = tail_embedding.is_none();
  let n = state.n;
  let alpha = state.alpha;

  // SAFETY: concurrent mutable access to the embedding is the documented
  // hogwild trade-off; see UnsafeSyncCell. When a frozen tail reference is
  // supplied it is never written through, only read.
  let head_ptr = unsafe { UnsafeSyncCell::new(head_embedding.as_mut_ptr()) };
  let tail_ptr = match tail_embedding {
    Some(t) => t.as_ptr() as *mut f32,
    None => head_ptr.get(),
  };
  let tail_ptr = unsafe { UnsafeSyncCell::new(tail_ptr) };

  // SAFETY: iteration i touches only index i of the scheduling arrays, so
  // those accesses are disjoint across threads.
  let next_sample = unsafe { UnsafeSyncCell::new(epoch_of_next_sample.as_mut_ptr()) };
  let next_negative = unsafe { UnsafeSyncCell::new(epoch_of_next_negative_sample.as_mut_ptr()) };

  (0..state.epochs_per_sample.len())
    .into_par_iter()
    .for_each(|i| unsafe {
      let next_sample_ptr = next_sample.get().add(i);
      // -1 marks an edge that never fires
      if state.epochs_per_sample[i] <= 0.0 || *next_sample_ptr > n as f64 {
        return;
      }
      let j = state.head[i] as usize;
      let k = state.tail[i] as usize;

      let current = head_ptr.get().add(j * dim);
      let other = tail_ptr.get().add(k * dim);

      let mut dist_squared = 0.0f32;
      for d in 0..dim {
        let diff = *current.add(d) - *other.add(d);
        dist_squared += diff * diff;
      }

      let grad_coeff = if dist_squared > 0.0 {
        attractive_coeff(state.a, state.b, dist_squared)
      } else {
        0.0
      };

      for d in 0..dim {
        let diff = *current.add(d) - *other.add(d);
        let grad_d = clip(grad_coeff * diff);
        *current.add(d) += grad_d * alpha;
        if move_other {
          *other.add(d) -= grad_d * alpha;
        }
      }

      *next_sample_ptr += state.epochs_per_sample[i];

      let next_negative_ptr = next_negative.get().add(i);
      let n_neg_samples =
        ((n as f64 - *next_negative_ptr) / epochs_per_negative_sample[i]) as usize;

      let mut rng = SmallRng::seed_from_u64(seed ^ ((n as u64) << 32) ^ i as u64);
      for _p in 0..n_neg_samples {
        let k = rng.random_range(0..state.n_vertices);
        let other = tail_ptr.get().add(k * dim);

        let mut dist_squared = 0.0f32;
        for d in 0..dim {
          let diff = *current.add(d) - *other.add(d);
          dist_squared += diff * diff;
        }

        if dist_squared > 0.0 {
          let grad_coeff = repulsive_coeff(state.a, state.b, state.gamma, dist_squared);
          for d in 0..dim {
            let diff = *current.add(d) - *other.add(d);
            let grad_d = clip(grad_coeff * diff);
            *current.add(d) += grad_d * alpha;
          }
        } else if j == k {
          continue;
        } else {
          for d in 0..dim {
            *current.add(d) += 4.0 * alpha;
          }
        }
      }

      *next_negative_ptr += n_neg_samples as f64 * epochs_per_negative_sample[i];
    });
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::arr1;
  use ndarray::arr2;

  fn edge_setup() -> (Array2<f32>, Vec<u32>, Vec<u32>, Array1<f64>) {
    // two linked pairs far apart
    let embedding = arr2(&[
      [0.0f32, 0.0],
      [5.0, 0.0],
      [20.0, 20.0],
      [25.0, 20.0],
    ]);
    let head = vec![0u32, 1, 2, 3];
    let tail = vec![1u32, 0, 3, 2];
    let eps = arr1(&[1.0f64, 1.0, 1.0, 1.0]);
    (embedding, head, tail, eps)
  }

  #[test]
  fn attraction_pulls_linked_points_together() {
    let (mut embedding, head, tail, eps) = edge_setup();
    let before = (embedding[(0, 0)] - embedding[(1, 0)]).abs();
    OptimizeLayoutEuclidean::builder()
      .head_embedding(&mut embedding)
      .tail_embedding(None)
      .head(&head)
      .tail(&tail)
      .n_epochs(50)
      .n_vertices(4)
      .epochs_per_sample(eps.view())
      .a(1.577)
      .b(0.895)
      .seed(42)
      .parallel(false)
      .build()
      .exec();
    let after = (embedding[(0, 0)] - embedding[(1, 0)]).abs();
    assert!(after < before, "pair did not contract: {before} -> {after}");
    assert!(embedding.iter().all(|v| v.is_finite()));
  }

  #[test]
  fn frozen_tail_is_never_touched() {
    let (embedding, head, tail, eps) = edge_setup();
    let reference = embedding.clone();
    let mut moving = embedding.clone();
    OptimizeLayoutEuclidean::builder()
      .head_embedding(&mut moving)
      .tail_embedding(Some(&reference))
      .head(&head)
      .tail(&tail)
      .n_epochs(20)
      .n_vertices(4)
      .epochs_per_sample(eps.view())
      .a(1.577)
      .b(0.895)
      .seed(7)
      .parallel(false)
      .build()
      .exec();
    assert_eq!(reference, embedding, "reference embedding must stay fixed");
    assert_ne!(moving, reference, "head embedding should have moved");
    assert!(moving.iter().all(|v| v.is_finite()));
  }

  #[test]
  fn never_firing_edges_leave_the_layout_alone() {
    let (mut embedding, head, tail, _) = edge_setup();
    let eps = arr1(&[-1.0f64, -1.0, -1.0, -1.0]);
    let before = embedding.clone();
    OptimizeLayoutEuclidean::builder()
      .head_embedding(&mut embedding)
      .tail_embedding(None)
      .head(&head)
      .tail(&tail)
      .n_epochs(10)
      .n_vertices(4)
      .epochs_per_sample(eps.view())
      .a(1.577)
      .b(0.895)
      .seed(1)
      .parallel(false)
      .build()
      .exec();
    assert_eq!(before, embedding);
  }

  #[test]
  fn parallel_run_stays_finite_and_contracts() {
    let (mut embedding, head, tail, eps) = edge_setup();
    let before = (embedding[(2, 0)] - embedding[(3, 0)]).abs();
    OptimizeLayoutEuclidean::builder()
      .head_embedding(&mut embedding)
      .tail_embedding(None)
      .head(&head)
      .tail(&tail)
      .n_epochs(50)
      .n_vertices(4)
      .epochs_per_sample(eps.view())
      .a(1.577)
      .b(0.895)
      .seed(42)
      .build()
      .exec();
    let after = (embedding[(2, 0)] - embedding[(3, 0)]).abs();
    assert!(after < before);
    assert!(embedding.iter().all(|v| v.is_finite()));
  }
}
