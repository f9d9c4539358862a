use dashmap::DashSet;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use typed_builder::TypedBuilder;

/*
  Construct the membership strength data for the 1-skeleton of each local
  fuzzy simplicial set: triplet arrays for a coo matrix in which row i holds
  the membership of the 1-simplex from sample i to each of its neighbors.

  A neighbor index of -1 (the search failed to fill that slot) and positions
  recorded in `knn_disconnections` contribute no entry. Self-edges get
  weight zero unless `bipartite` is set, in which case equal row and column
  indices refer to distinct points (new data scored against training data)
  and are kept. A neighbor within the local connectivity cutoff rho has
  full membership; beyond it, membership decays as exp(-(d - rho) / sigma).

  Zero-weight entries are retained; zero elimination is a separate,
  explicit step.
*/
#[derive(TypedBuilder)]
pub struct ComputeMembershipStrengths<'a, 's, 'r, 'd> {
  knn_indices: ArrayView2<'a, i32>,
  knn_dists: ArrayView2<'a, f32>,
  knn_disconnections: &'d DashSet<(usize, usize)>,
  sigmas: &'s ArrayView1<'s, f32>,
  rhos: &'r ArrayView1<'r, f32>,
  #[builder(default = false)]
  bipartite: bool,
}

impl<'a, 's, 'r, 'd> ComputeMembershipStrengths<'a, 's, 'r, 'd> {
  pub fn exec(self) -> (Vec<u32>, Vec<u32>, Vec<f32>) {
    let Self {
      knn_indices,
      knn_dists,
      knn_disconnections,
      sigmas,
      rhos,
      bipartite,
    } = self;

    let n_samples = knn_indices.shape()[0];
    let n_neighbors = knn_indices.shape()[1];

    let mut rows = Vec::with_capacity(n_samples * n_neighbors);
    let mut cols = Vec::with_capacity(n_samples * n_neighbors);
    let mut vals = Vec::with_capacity(n_samples * n_neighbors);

    for i in 0..n_samples {
      let sigma = sigmas[i];
      let rho = rhos[i];
      for j in 0..n_neighbors {
        let neighbor = knn_indices[(i, j)];
        if neighbor < 0 || knn_disconnections.contains(&(i, j)) {
          continue;
        }

        let strength;
        if !bipartite && neighbor as usize == i {
          strength = 0.0;
        } else {
          let shifted = knn_dists[(i, j)] - rho;
          if shifted <= 0.0 || sigma == 0.0 {
            strength = 1.0;
          } else {
            strength = (-shifted / sigma).exp();
          }
        }

        rows.push(i as u32);
        cols.push(neighbor as u32);
        vals.push(strength);
      }
    }

    (rows, cols, vals)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::arr1;
  use ndarray::arr2;

  #[test]
  fn nearest_neighbors_inside_rho_get_full_membership() {
    let knn_indices = arr2(&[[0, 1, 2], [1, 0, 2], [2, 1, -1]]);
    let knn_dists = arr2(&[[0.0f32, 1.0, 2.0], [0.0, 1.0, 3.0], [0.0, 2.0, 0.0]]);
    let sigmas = arr1(&[1.0f32, 1.0, 1.0]);
    let rhos = arr1(&[1.0f32, 1.0, 2.0]);
    let disconnections = DashSet::new();

    let (rows, cols, vals) = ComputeMembershipStrengths::builder()
      .knn_indices(knn_indices.view())
      .knn_dists(knn_dists.view())
      .knn_disconnections(&disconnections)
      .sigmas(&sigmas.view())
      .rhos(&rhos.view())
      .build()
      .exec();

    // row 2's -1 slot contributes nothing
    assert_eq!(rows.len(), 8);
    // self-edges have weight zero
    let self_edge = rows
      .iter()
      .zip(&cols)
      .zip(&vals)
      .find(|((r, c), _)| r == c)
      .unwrap();
    assert_eq!(*self_edge.1, 0.0);
    // an edge at exactly rho has weight one
    let at_rho = rows
      .iter()
      .zip(&cols)
      .zip(&vals)
      .find(|((r, c), _)| **r == 0 && **c == 1)
      .unwrap();
    assert_eq!(*at_rho.1, 1.0);
    // an edge beyond rho decays
    let beyond = rows
      .iter()
      .zip(&cols)
      .zip(&vals)
      .find(|((r, c), _)| **r == 0 && **c == 2)
      .unwrap();
    assert!((*beyond.1 - f32::exp(-1.0)).abs() < 1e-6);
  }

  #[test]
  fn disconnections_are_skipped() {
    let knn_indices = arr2(&[[0, 1], [1, 0]]);
    let knn_dists = arr2(&[[0.0f32, 9.0], [0.0, 9.0]]);
    let sigmas = arr1(&[1.0f32, 1.0]);
    let rhos = arr1(&[0.0f32, 0.0]);
    let disconnections = DashSet::new();
    disconnections.insert((0usize, 1usize));

    let (rows, cols, _) = ComputeMembershipStrengths::builder()
      .knn_indices(knn_indices.view())
      .knn_dists(knn_dists.view())
      .knn_disconnections(&disconnections)
      .sigmas(&sigmas.view())
      .rhos(&rhos.view())
      .build()
      .exec();
    assert!(!rows.iter().zip(&cols).any(|(r, c)| *r == 0 && *c == 1));
  }

  #[test]
  fn bipartite_keeps_equal_index_pairs() {
    let knn_indices = arr2(&[[0, 1]]);
    let knn_dists = arr2(&[[0.0f32, 1.0]]);
    let sigmas = arr1(&[1.0f32]);
    let rhos = arr1(&[0.0f32]);
    let disconnections = DashSet::new();

    let (_, cols, vals) = ComputeMembershipStrengths::builder()
      .knn_indices(knn_indices.view())
      .knn_dists(knn_dists.view())
      .knn_disconnections(&disconnections)
      .sigmas(&sigmas.view())
      .rhos(&rhos.view())
      .bipartite(true)
      .build()
      .exec();
    // query 0 sitting on training point 0 keeps membership 1
    assert_eq!(cols[0], 0);
    assert_eq!(vals[0], 1.0);
  }
}
