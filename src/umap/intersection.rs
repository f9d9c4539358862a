use crate::sparse::CooMatrix;

/*
  Supervised simplicial set intersections.

  A fuzzy graph built from the data can be sharpened by a target variable:
  categorical labels multiply memberships of cross-label edges down by
  exp(-far_dist) (and edges touching an unknown label by exp(-unknown_dist)),
  while a continuous target contributes its own fuzzy graph that is combined
  edge-by-edge with the data graph.

  After either operation the local connectivity assumption is restored:
  every point must again have full confidence in at least one 1-simplex.
*/

/// Fast path for categorical target data: scale down memberships of edges
/// whose endpoints disagree on the label. A label of -1 means unknown.
pub fn fast_intersection(
  graph: &CooMatrix,
  target: &[f32],
  unknown_dist: f32,
  far_dist: f32,
) -> CooMatrix {
  graph.map_data(|r, c, v| {
    let ti = target[r as usize];
    let tj = target[c as usize];
    if ti == -1.0 || tj == -1.0 {
      v * f32::exp(-unknown_dist)
    } else if ti != tj {
      v * f32::exp(-far_dist)
    } else {
      v
    }
  })
}

/// Reset the local connectivity requirement: rescale each row by its
/// maximum membership and re-merge with the fuzzy union.
pub fn reset_local_connectivity(graph: &CooMatrix) -> CooMatrix {
  let normalized = graph.row_normalize();
  let prod = normalized
    .hadamard_transpose()
    .expect("fuzzy graph is square");
  normalized
    .add_transpose()
    .expect("fuzzy graph is square")
    .subtract(&prod)
    .expect("combinators preserve shape")
    .eliminate_zeros()
}

/// Intersect a fuzzy graph with categorical label data.
pub fn categorical_simplicial_set_intersection(
  graph: &CooMatrix,
  target: &[f32],
  unknown_dist: f32,
  far_dist: f32,
) -> CooMatrix {
  let intersected = fast_intersection(graph, target, unknown_dist, far_dist).eliminate_zeros();
  reset_local_connectivity(&intersected)
}

fn min_membership(graph: &CooMatrix) -> f32 {
  graph
    .triplets()
    .map(|(_, _, v)| v)
    .fold(f32::INFINITY, f32::min)
}

/// Combine two fuzzy graphs built over the same points (data and a
/// continuous target), weighting the target's influence by `weight`.
///
/// The support is the union of both supports. Each edge keeps the dominant
/// membership scaled by the other side raised to `weight / (1 - weight)`
/// (or the reciprocal exponent when the target dominates); entries missing
/// from one side fall back to half that side's minimum membership.
pub fn general_simplicial_set_intersection(
  left: &CooMatrix,
  right: &CooMatrix,
  weight: f32,
) -> CooMatrix {
  let support = left.add(right).expect("graphs cover the same points");
  let left_min = (min_membership(left) / 2.0).max(1e-8);
  let right_min = (min_membership(right) / 2.0).max(1e-8);

  support.map_data(|r, c, summed| {
    let mut left_val = left.get(r as usize, c as usize);
    if left_val == 0.0 {
      left_val = left_min;
    }
    let mut right_val = right.get(r as usize, c as usize);
    if right_val == 0.0 {
      right_val = right_min;
    }
    if left_val > left_min || right_val > right_min {
      if weight < 0.5 {
        left_val * right_val.powf(weight / (1.0 - weight))
      } else {
        right_val * left_val.powf((1.0 - weight) / weight)
      }
    } else {
      summed
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn toy_graph() -> CooMatrix {
    // symmetric 4-point graph, two tight pairs
    CooMatrix::from_triplets(
      (4, 4),
      vec![0, 1, 2, 3, 0, 2],
      vec![1, 0, 3, 2, 2, 0],
      vec![1.0, 1.0, 1.0, 1.0, 0.5, 0.5],
    )
    .unwrap()
  }

  #[test]
  fn cross_label_edges_are_suppressed() {
    let graph = toy_graph();
    let target = [0.0f32, 0.0, 1.0, 1.0];
    let result = fast_intersection(&graph, &target, 1.0, 5.0);
    // same-label edges untouched
    assert_eq!(result.get(0, 1), 1.0);
    assert_eq!(result.get(2, 3), 1.0);
    // cross-label edge crushed by exp(-5)
    assert!((result.get(0, 2) - 0.5 * f32::exp(-5.0)).abs() < 1e-9);
  }

  #[test]
  fn unknown_labels_get_the_milder_penalty() {
    let graph = toy_graph();
    let target = [0.0f32, -1.0, 1.0, 1.0];
    let result = fast_intersection(&graph, &target, 1.0, 5.0);
    assert!((result.get(0, 1) - f32::exp(-1.0)).abs() < 1e-7);
  }

  #[test]
  fn reset_restores_full_confidence_per_point() {
    let graph = toy_graph();
    let target = [0.0f32, 0.0, 1.0, 1.0];
    let result =
      categorical_simplicial_set_intersection(&graph, &target, 1.0, 5.0);
    // every row has at least one edge of strength ~1 again
    for i in 0..4usize {
      let row_max = result
        .triplets()
        .filter(|(r, _, _)| *r as usize == i)
        .map(|(_, _, v)| v)
        .fold(f32::NEG_INFINITY, f32::max);
      assert!(row_max >= 1.0 - 1e-6, "row {i} max {row_max}");
    }
    // symmetry preserved
    for (r, c, v) in result.triplets() {
      assert!((result.get(c as usize, r as usize) - v).abs() < 1e-6);
    }
  }

  #[test]
  fn general_intersection_respects_the_weight_extremes() {
    let left = toy_graph();
    let right = CooMatrix::from_triplets(
      (4, 4),
      vec![0, 1, 1, 2],
      vec![1, 0, 2, 1],
      vec![0.8, 0.8, 0.6, 0.6],
    )
    .unwrap();

    // weight 1.0: the target side wins outright on shared edges
    let target_only = general_simplicial_set_intersection(&left, &right, 1.0);
    assert!((target_only.get(0, 1) - 0.8).abs() < 1e-6);

    // weight 0.0: the data side wins outright
    let data_only = general_simplicial_set_intersection(&left, &right, 0.0);
    assert!((data_only.get(0, 1) - 1.0).abs() < 1e-6);
  }
}
