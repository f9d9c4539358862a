pub mod optimize_layout_euclidean;
