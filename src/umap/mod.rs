pub mod compute_membership_strengths;
pub mod constants;
pub mod find_ab_params;
pub mod fuzzy_simplicial_set;
pub mod init_transform;
pub mod intersection;
pub mod make_epochs_per_sample;
pub mod simplicial_set_embedding;
pub mod smooth_knn_dist;
