use ndarray::Array2;
use ndarray::ArrayView2;
use sprs::CsMatView;

/*
  Given a bipartite membership graph between new points and the training
  set, along with the training embedding, initialize the positions of the
  new points as the weighted average of their neighbors' embedding
  locations.

  The graph rows have constant degree (one entry per found neighbor), so
  the reference implementation reshapes the CSR arrays into dense
  (n_new_samples, n_neighbors) blocks; walking the CSR rows directly is
  equivalent and also covers rows left short by missing neighbors. A row
  with no neighbors at all embeds as the NaN vector.
*/
pub fn init_transform(graph: CsMatView<f32>, embedding: ArrayView2<f32>) -> Array2<f32> {
  let dim = embedding.shape()[1];
  let mut result = Array2::<f32>::zeros((graph.shape().0, dim));

  for (row_index, row) in graph.outer_iterator().enumerate() {
    if row.nnz() == 0 {
      for d in 0..dim {
        result[(row_index, d)] = f32::NAN;
      }
      continue;
    }
    let row_sum: f32 = row.data().iter().sum();
    for (col_index, &weight) in row.iter() {
      for d in 0..dim {
        result[(row_index, d)] += weight / row_sum * embedding[(col_index, d)];
      }
    }
  }

  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sparse::CooMatrix;
  use ndarray::arr2;

  #[test]
  fn new_points_average_their_neighbors() {
    let embedding = arr2(&[[0.0f32, 0.0], [2.0, 2.0], [4.0, 0.0]]);
    // query 0: equally tied to points 0 and 1; query 1: all on point 2
    let graph = CooMatrix::from_triplets(
      (2, 3),
      vec![0, 0, 1],
      vec![0, 1, 2],
      vec![0.5, 0.5, 1.0],
    )
    .unwrap()
    .to_csr();

    let init = init_transform(graph.view(), embedding.view());
    assert_eq!(init[(0, 0)], 1.0);
    assert_eq!(init[(0, 1)], 1.0);
    assert_eq!(init[(1, 0)], 4.0);
    assert_eq!(init[(1, 1)], 0.0);
  }

  #[test]
  fn neighborless_rows_embed_as_nan() {
    let embedding = arr2(&[[1.0f32, 1.0]]);
    let graph = CooMatrix::from_triplets((2, 1), vec![1], vec![0], vec![1.0])
      .unwrap()
      .to_csr();
    let init = init_transform(graph.view(), embedding.view());
    assert!(init[(0, 0)].is_nan());
    assert_eq!(init[(1, 0)], 1.0);
  }
}
