use ndarray::Array2;
use rand::rngs::SmallRng;
use rand::Rng;

/// Per-query bounded max-heaps of nearest-neighbor candidates.
///
/// One heap of `n_slots` entries is kept per query point, stored as flat
/// parallel arrays for cache locality. Each slot holds a
/// `(neighbor index, distance, is_new flag)` triple; the slot with the
/// largest distance is always at the root so it can be replaced cheaply.
///
/// `push` rejects candidates that are no closer than the current root and
/// candidates already present in the heap. The duplicate rejection is
/// required for NN-descent convergence, not just an optimization: without it
/// the update counter keeps firing on edges the graph already has.
#[derive(Debug)]
pub struct NeighborHeap {
  n_points: usize,
  n_slots: usize,
  indices: Vec<i32>,
  dists: Vec<f32>,
  flags: Vec<bool>,
}

impl NeighborHeap {
  pub fn new(n_points: usize, n_slots: usize) -> Self {
    Self {
      n_points,
      n_slots,
      indices: vec![-1; n_points * n_slots],
      dists: vec![f32::INFINITY; n_points * n_slots],
      flags: vec![false; n_points * n_slots],
    }
  }

  pub fn n_points(&self) -> usize {
    self.n_points
  }

  pub fn n_slots(&self) -> usize {
    self.n_slots
  }

  pub fn row_indices(&self, row: usize) -> &[i32] {
    &self.indices[row * self.n_slots..(row + 1) * self.n_slots]
  }

  pub fn row_dists(&self, row: usize) -> &[f32] {
    &self.dists[row * self.n_slots..(row + 1) * self.n_slots]
  }

  /// Largest stored distance for a query (infinity while slots are empty).
  pub fn max_dist(&self, row: usize) -> f32 {
    self.dists[row * self.n_slots]
  }

  pub fn index_at(&self, row: usize, slot: usize) -> i32 {
    self.indices[row * self.n_slots + slot]
  }

  pub fn dist_at(&self, row: usize, slot: usize) -> f32 {
    self.dists[row * self.n_slots + slot]
  }

  pub fn flag_at(&self, row: usize, slot: usize) -> bool {
    self.flags[row * self.n_slots + slot]
  }

  pub fn set_flag(&mut self, row: usize, slot: usize, value: bool) {
    self.flags[row * self.n_slots + slot] = value;
  }

  /// Offer a candidate to `row`'s heap. Returns 1 if it was accepted.
  pub fn push(&mut self, row: usize, dist: f32, index: i32, is_new: bool) -> usize {
    let base = row * self.n_slots;
    if dist >= self.dists[base] {
      return 0;
    }
    for slot in 0..self.n_slots {
      if self.indices[base + slot] == index {
        return 0;
      }
    }

    // Replace the root and sift the new entry down to its place.
    let mut i = 0usize;
    loop {
      let left = 2 * i + 1;
      let right = left + 1;
      let swap = if left >= self.n_slots {
        break;
      } else if right >= self.n_slots {
        if self.dists[base + left] > dist {
          left
        } else {
          break;
        }
      } else if self.dists[base + left] >= self.dists[base + right] {
        if self.dists[base + left] > dist {
          left
        } else {
          break;
        }
      } else if self.dists[base + right] > dist {
        right
      } else {
        break;
      };
      self.dists[base + i] = self.dists[base + swap];
      self.indices[base + i] = self.indices[base + swap];
      self.flags[base + i] = self.flags[base + swap];
      i = swap;
    }
    self.dists[base + i] = dist;
    self.indices[base + i] = index;
    self.flags[base + i] = is_new;
    1
  }

  /// Find the closest still-flagged candidate of `row`, clear its flag and
  /// return its index, or -1 when none is left.
  pub fn smallest_flagged(&mut self, row: usize) -> i32 {
    let base = row * self.n_slots;
    let mut best_dist = f32::INFINITY;
    let mut best_slot = None;
    for slot in 0..self.n_slots {
      if self.flags[base + slot] && self.dists[base + slot] < best_dist {
        best_dist = self.dists[base + slot];
        best_slot = Some(slot);
      }
    }
    match best_slot {
      Some(slot) => {
        self.flags[base + slot] = false;
        self.indices[base + slot]
      }
      None => -1,
    }
  }

  /// Extract every heap's contents in ascending distance order.
  ///
  /// Classic heapsort per row: the root (current maximum) swaps to the back
  /// of the shrinking heap, so the arrays come out ascending. Empty slots
  /// (index -1, infinite distance) end up at the back.
  pub fn deheap_sort(mut self) -> (Array2<i32>, Array2<f32>) {
    for row in 0..self.n_points {
      let base = row * self.n_slots;
      for end in (1..self.n_slots).rev() {
        self.swap_slots(base, 0, end);
        self.sift_down(base, end);
      }
    }
    let indices =
      Array2::from_shape_vec((self.n_points, self.n_slots), self.indices).expect("flat layout");
    let dists =
      Array2::from_shape_vec((self.n_points, self.n_slots), self.dists).expect("flat layout");
    (indices, dists)
  }

  fn swap_slots(&mut self, base: usize, a: usize, b: usize) {
    self.indices.swap(base + a, base + b);
    self.dists.swap(base + a, base + b);
    self.flags.swap(base + a, base + b);
  }

  /// Restore the max-heap property for the first `len` slots of a row.
  fn sift_down(&mut self, base: usize, len: usize) {
    let mut i = 0usize;
    loop {
      let left = 2 * i + 1;
      let right = left + 1;
      let mut largest = i;
      if left < len && self.dists[base + left] > self.dists[base + largest] {
        largest = left;
      }
      if right < len && self.dists[base + right] > self.dists[base + largest] {
        largest = right;
      }
      if largest == i {
        break;
      }
      self.swap_slots(base, i, largest);
      i = largest;
    }
  }
}

/// Draw `n_samples` distinct indices from `[0, pool_size)`.
pub fn rejection_sample(n_samples: usize, pool_size: usize, rng: &mut SmallRng) -> Vec<u32> {
  let mut result: Vec<u32> = Vec::with_capacity(n_samples);
  while result.len() < n_samples {
    let candidate = rng.random_range(0..pool_size) as u32;
    if !result.contains(&candidate) {
      result.push(candidate);
    }
  }
  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::SeedableRng;

  #[test]
  fn push_keeps_the_k_closest() {
    let mut heap = NeighborHeap::new(1, 4);
    for (i, d) in [9.0f32, 3.0, 7.0, 5.0, 1.0, 8.0].iter().enumerate() {
      heap.push(0, *d, i as i32, true);
    }
    let (indices, dists) = heap.deheap_sort();
    let got: Vec<f32> = dists.row(0).to_vec();
    assert_eq!(got, vec![1.0, 3.0, 5.0, 7.0]);
    assert_eq!(indices.row(0).to_vec(), vec![4, 1, 3, 2]);
  }

  #[test]
  fn push_rejects_duplicates_and_far_candidates() {
    let mut heap = NeighborHeap::new(1, 2);
    assert_eq!(heap.push(0, 2.0, 7, true), 1);
    assert_eq!(heap.push(0, 1.0, 7, true), 0, "duplicate index");
    assert_eq!(heap.push(0, 1.0, 3, true), 1);
    assert_eq!(heap.push(0, 2.0, 9, true), 0, "not closer than the root");
    assert_eq!(heap.max_dist(0), 2.0);
  }

  #[test]
  fn stored_distances_never_exceed_the_root() {
    let mut rng = SmallRng::seed_from_u64(7);
    let mut heap = NeighborHeap::new(3, 8);
    for row in 0..3 {
      for i in 0..100 {
        heap.push(row, rng.random::<f32>(), i, true);
      }
      let root = heap.max_dist(row);
      for slot in 0..8 {
        assert!(heap.row_dists(row)[slot] <= root);
      }
    }
  }

  #[test]
  fn smallest_flagged_drains_in_order() {
    let mut heap = NeighborHeap::new(1, 4);
    heap.push(0, 3.0, 30, true);
    heap.push(0, 1.0, 10, true);
    heap.push(0, 2.0, 20, false);
    assert_eq!(heap.smallest_flagged(0), 10);
    assert_eq!(heap.smallest_flagged(0), 30);
    assert_eq!(heap.smallest_flagged(0), -1);
  }

  #[test]
  fn rejection_sample_is_distinct() {
    let mut rng = SmallRng::seed_from_u64(42);
    let sample = rejection_sample(10, 20, &mut rng);
    assert_eq!(sample.len(), 10);
    let mut unique = sample.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 10);
    assert!(sample.iter().all(|&s| s < 20));
  }
}
