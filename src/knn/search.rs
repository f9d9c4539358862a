use crate::knn::heap::rejection_sample;
use crate::knn::heap::NeighborHeap;
use crate::knn::rp_tree::FlatTree;
use crate::metric::Metric;
use ndarray::ArrayView2;
use rand::rngs::SmallRng;
use sprs::CsMatView;

/// Seed a search heap for `query_data` against the training set.
///
/// Each query's heap (sized `n_neighbors * transform_queue_size` by the
/// caller) is primed with random training points plus the members of the
/// forest leaf each tree routes the query to.
pub fn initialise_search(
  forest: &[FlatTree],
  train_data: ArrayView2<f32>,
  query_data: ArrayView2<f32>,
  n_slots: usize,
  metric: &dyn Metric,
  rng: &mut SmallRng,
) -> NeighborHeap {
  let n_queries = query_data.shape()[0];
  let n_train = train_data.shape()[0];
  let mut heap = NeighborHeap::new(n_queries, n_slots);

  let n_random = n_slots.min(n_train);
  for i in 0..n_queries {
    for idx in rejection_sample(n_random, n_train, rng) {
      let d = metric.distance(train_data.row(idx as usize), query_data.row(i));
      heap.push(i, d, idx as i32, true);
    }
  }

  for tree in forest {
    for i in 0..n_queries {
      let leaf = tree.search(query_data.row(i), rng);
      for &idx in leaf {
        let d = metric.distance(train_data.row(idx as usize), query_data.row(i));
        heap.push(i, d, idx as i32, true);
      }
    }
  }

  heap
}

/// Refine a seeded search heap by expanding along the symmetric search
/// graph.
///
/// Repeatedly takes each query's closest not-yet-expanded candidate and
/// offers that vertex's graph neighbors to the heap; the duplicate-rejecting
/// push keeps the loop finite. This is the large-N kNN search `transform`
/// uses instead of full pairwise distances.
pub fn initialized_nnd_search(
  train_data: ArrayView2<f32>,
  search_graph: CsMatView<f32>,
  mut heap: NeighborHeap,
  query_data: ArrayView2<f32>,
  metric: &dyn Metric,
) -> NeighborHeap {
  let indptr = search_graph.indptr();
  let indices = search_graph.indices();

  for i in 0..query_data.shape()[0] {
    loop {
      let vertex = heap.smallest_flagged(i);
      if vertex < 0 {
        break;
      }
      let start = indptr.index(vertex as usize);
      let end = indptr.index(vertex as usize + 1);
      for &candidate in &indices[start..end] {
        if candidate == vertex as usize {
          continue;
        }
        let d = metric.distance(train_data.row(candidate), query_data.row(i));
        heap.push(i, d, candidate as i32, true);
      }
    }
  }
  heap
}
