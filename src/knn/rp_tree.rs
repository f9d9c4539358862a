use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;

/// Recursion bound; splits degenerate to random partitions long before this.
const MAX_DEPTH: usize = 200;

/// One random-projection tree, flattened into arrays.
///
/// Internal nodes carry a splitting hyperplane and offset; leaves carry a
/// range into the flat `indices` vector. `children[node] == [-1, -1]` marks
/// a leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatTree {
  hyperplanes: Array2<f32>,
  offsets: Vec<f32>,
  children: Vec<[i32; 2]>,
  ranges: Vec<[u32; 2]>,
  indices: Vec<u32>,
  leaf_size: usize,
}

impl FlatTree {
  pub fn leaf_size(&self) -> usize {
    self.leaf_size
  }

  pub fn n_leaves(&self) -> usize {
    self.children.iter().filter(|c| c[0] < 0).count()
  }

  /// Iterate the index slices of all leaves.
  pub fn leaves(&self) -> impl Iterator<Item = &[u32]> + '_ {
    self
      .children
      .iter()
      .zip(&self.ranges)
      .filter(|(c, _)| c[0] < 0)
      .map(|(_, r)| &self.indices[r[0] as usize..r[1] as usize])
  }

  /// Walk the tree with `query` and return the reached leaf's indices.
  ///
  /// Points exactly on a hyperplane fall to a random side drawn from `rng`,
  /// the same tie-break the builder used.
  pub fn search<'t>(&'t self, query: ArrayView1<f32>, rng: &mut SmallRng) -> &'t [u32] {
    let mut node = 0usize;
    while self.children[node][0] >= 0 {
      let mut margin = self.offsets[node];
      for (h, q) in self.hyperplanes.row(node).iter().zip(query.iter()) {
        margin += h * q;
      }
      let go_left = if margin == 0.0 {
        rng.random::<bool>()
      } else {
        margin > 0.0
      };
      node = if go_left {
        self.children[node][0] as usize
      } else {
        self.children[node][1] as usize
      };
    }
    let range = self.ranges[node];
    &self.indices[range[0] as usize..range[1] as usize]
  }
}

enum Node {
  Leaf(Vec<u32>),
  Internal {
    hyperplane: Vec<f32>,
    offset: f32,
    left: Box<Node>,
    right: Box<Node>,
  },
}

/// Split by the perpendicular bisector of two randomly chosen points.
fn euclidean_split(
  data: ArrayView2<f32>,
  indices: &[u32],
  rng: &mut SmallRng,
) -> (Vec<u32>, Vec<u32>, Vec<f32>, f32) {
  let dim = data.shape()[1];
  let left_anchor = rng.random_range(0..indices.len());
  let mut right_anchor = rng.random_range(0..indices.len());
  while right_anchor == left_anchor {
    right_anchor = rng.random_range(0..indices.len());
  }
  let left = data.row(indices[left_anchor] as usize);
  let right = data.row(indices[right_anchor] as usize);

  let mut hyperplane = vec![0.0f32; dim];
  let mut offset = 0.0f32;
  for d in 0..dim {
    hyperplane[d] = left[d] - right[d];
    offset -= hyperplane[d] * (left[d] + right[d]) / 2.0;
  }

  partition(data, indices, &hyperplane, offset, rng)
}

/// Split by the great circle between two randomly chosen directions.
fn angular_split(
  data: ArrayView2<f32>,
  indices: &[u32],
  rng: &mut SmallRng,
) -> (Vec<u32>, Vec<u32>, Vec<f32>, f32) {
  let dim = data.shape()[1];
  let left_anchor = rng.random_range(0..indices.len());
  let mut right_anchor = rng.random_range(0..indices.len());
  while right_anchor == left_anchor {
    right_anchor = rng.random_range(0..indices.len());
  }
  let left = data.row(indices[left_anchor] as usize);
  let right = data.row(indices[right_anchor] as usize);

  let mut left_norm: f32 = left.iter().map(|v| v * v).sum::<f32>().sqrt();
  let mut right_norm: f32 = right.iter().map(|v| v * v).sum::<f32>().sqrt();
  if left_norm == 0.0 {
    left_norm = 1.0;
  }
  if right_norm == 0.0 {
    right_norm = 1.0;
  }

  let mut hyperplane = vec![0.0f32; dim];
  for d in 0..dim {
    hyperplane[d] = left[d] / left_norm - right[d] / right_norm;
  }

  partition(data, indices, &hyperplane, 0.0, rng)
}

fn partition(
  data: ArrayView2<f32>,
  indices: &[u32],
  hyperplane: &[f32],
  offset: f32,
  rng: &mut SmallRng,
) -> (Vec<u32>, Vec<u32>, Vec<f32>, f32) {
  let mut left_indices = Vec::new();
  let mut right_indices = Vec::new();
  for &idx in indices {
    let mut margin = offset;
    for (h, v) in hyperplane.iter().zip(data.row(idx as usize).iter()) {
      margin += h * v;
    }
    let go_left = if margin == 0.0 {
      rng.random::<bool>()
    } else {
      margin > 0.0
    };
    if go_left {
      left_indices.push(idx);
    } else {
      right_indices.push(idx);
    }
  }

  // Degenerate hyperplane (duplicate points): fall back to a random
  // partition so the recursion keeps terminating.
  if left_indices.is_empty() || right_indices.is_empty() {
    left_indices.clear();
    right_indices.clear();
    for &idx in indices {
      if rng.random::<bool>() {
        left_indices.push(idx);
      } else {
        right_indices.push(idx);
      }
    }
  }

  (left_indices, right_indices, hyperplane.to_vec(), offset)
}

fn make_tree(
  data: ArrayView2<f32>,
  indices: Vec<u32>,
  leaf_size: usize,
  angular: bool,
  rng: &mut SmallRng,
  depth: usize,
) -> Node {
  if indices.len() <= leaf_size || depth >= MAX_DEPTH {
    return Node::Leaf(indices);
  }
  let (left_indices, right_indices, hyperplane, offset) = if angular {
    angular_split(data, &indices, rng)
  } else {
    euclidean_split(data, &indices, rng)
  };
  let left = make_tree(data, left_indices, leaf_size, angular, rng, depth + 1);
  let right = make_tree(data, right_indices, leaf_size, angular, rng, depth + 1);
  Node::Internal {
    hyperplane,
    offset,
    left: Box::new(left),
    right: Box::new(right),
  }
}

struct FlattenState {
  hyperplanes: Vec<f32>,
  offsets: Vec<f32>,
  children: Vec<[i32; 2]>,
  ranges: Vec<[u32; 2]>,
  indices: Vec<u32>,
  dim: usize,
}

impl FlattenState {
  fn visit(&mut self, node: &Node) -> i32 {
    let id = self.offsets.len();
    self.hyperplanes.extend(std::iter::repeat(0.0).take(self.dim));
    self.offsets.push(0.0);
    self.children.push([-1, -1]);
    self.ranges.push([0, 0]);

    match node {
      Node::Leaf(leaf_indices) => {
        let start = self.indices.len() as u32;
        self.indices.extend_from_slice(leaf_indices);
        self.ranges[id] = [start, self.indices.len() as u32];
      }
      Node::Internal {
        hyperplane,
        offset,
        left,
        right,
      } => {
        self.hyperplanes[id * self.dim..(id + 1) * self.dim].copy_from_slice(hyperplane);
        self.offsets[id] = *offset;
        let left_id = self.visit(left);
        let right_id = self.visit(right);
        self.children[id] = [left_id, right_id];
      }
    }
    id as i32
  }
}

fn flatten(root: &Node, dim: usize, leaf_size: usize) -> FlatTree {
  let mut state = FlattenState {
    hyperplanes: Vec::new(),
    offsets: Vec::new(),
    children: Vec::new(),
    ranges: Vec::new(),
    indices: Vec::new(),
    dim,
  };
  state.visit(root);
  let n_nodes = state.offsets.len();
  FlatTree {
    hyperplanes: Array2::from_shape_vec((n_nodes, dim), state.hyperplanes)
      .expect("flat layout"),
    offsets: state.offsets,
    children: state.children,
    ranges: state.ranges,
    indices: state.indices,
    leaf_size,
  }
}

/// Build a forest of `n_trees` independent random-projection trees.
///
/// Leaves hold at most `max(10, n_neighbors)` points. Each tree draws its
/// randomness from a generator derived from `seed`, so forests are
/// reproducible and trees can build in parallel.
pub fn make_forest(
  data: ArrayView2<f32>,
  n_neighbors: usize,
  n_trees: usize,
  angular: bool,
  seed: u64,
) -> Vec<FlatTree> {
  let n_samples = data.shape()[0];
  let dim = data.shape()[1];
  let leaf_size = 10.max(n_neighbors);

  let started = std::time::Instant::now();
  let forest: Vec<FlatTree> = (0..n_trees)
    .into_par_iter()
    .map(|tree_no| {
      let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(tree_no as u64));
      let all_indices: Vec<u32> = (0..n_samples as u32).collect();
      let root = make_tree(data, all_indices, leaf_size, angular, &mut rng, 0);
      flatten(&root, dim, leaf_size)
    })
    .collect();
  info!(
    duration_ms = started.elapsed().as_millis(),
    n_trees, leaf_size, angular, "random projection forest built"
  );
  forest
}

/// Concatenate every leaf of every tree into one padded array.
///
/// Rows shorter than the widest leaf are padded with -1; NN-descent skips
/// the padding when seeding.
pub fn leaf_array(forest: &[FlatTree]) -> Array2<i32> {
  let n_leaves: usize = forest.iter().map(|t| t.n_leaves()).sum();
  if n_leaves == 0 {
    return Array2::from_elem((0, 1), -1);
  }
  let width = forest
    .iter()
    .flat_map(|t| t.leaves().map(|l| l.len()))
    .max()
    .unwrap_or(1);

  let mut result = Array2::from_elem((n_leaves, width), -1i32);
  let mut row = 0usize;
  for tree in forest {
    for leaf in tree.leaves() {
      for (j, &idx) in leaf.iter().enumerate() {
        result[(row, j)] = idx as i32;
      }
      row += 1;
    }
  }
  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::Array2;

  fn grid_data(n: usize, dim: usize) -> Array2<f32> {
    let mut rng = SmallRng::seed_from_u64(13);
    Array2::from_shape_fn((n, dim), |_| rng.random::<f32>() * 4.0)
  }

  #[test]
  fn every_point_lands_in_exactly_one_leaf_per_tree() {
    let data = grid_data(120, 5);
    let forest = make_forest(data.view(), 8, 3, false, 42);
    assert_eq!(forest.len(), 3);
    for tree in &forest {
      let mut seen = vec![0usize; 120];
      for leaf in tree.leaves() {
        assert!(leaf.len() <= tree.leaf_size());
        for &idx in leaf {
          seen[idx as usize] += 1;
        }
      }
      assert!(seen.iter().all(|&c| c == 1));
    }
  }

  #[test]
  fn search_reaches_a_leaf_containing_close_points() {
    let data = grid_data(200, 4);
    let forest = make_forest(data.view(), 10, 1, false, 7);
    let mut rng = SmallRng::seed_from_u64(99);
    // A training point's own leaf must contain it: the search walk follows
    // the same margins the builder used (modulo exact-zero ties).
    let leaf = forest[0].search(data.row(17), &mut rng);
    assert!(leaf.contains(&17));
  }

  #[test]
  fn leaf_array_pads_with_minus_one() {
    let data = grid_data(53, 3);
    let forest = make_forest(data.view(), 4, 2, false, 3);
    let leaves = leaf_array(&forest);
    assert_eq!(leaves.shape()[0], forest.iter().map(|t| t.n_leaves()).sum::<usize>());
    let mut seen = vec![false; 53];
    for row in leaves.rows() {
      for &v in row {
        assert!(v >= -1 && v < 53);
        if v >= 0 {
          seen[v as usize] = true;
        }
      }
    }
    assert!(seen.iter().all(|&s| s));
  }

  #[test]
  fn angular_forest_builds_and_covers() {
    let data = grid_data(80, 6);
    let forest = make_forest(data.view(), 5, 2, true, 11);
    for tree in &forest {
      let total: usize = tree.leaves().map(|l| l.len()).sum();
      assert_eq!(total, 80);
    }
  }
}
