use thiserror::Error;

/// Errors surfaced by the UMAP pipeline.
///
/// Configuration problems are reported by [`crate::Umap::new`] before any
/// computation starts; the remaining variants are reported at the `fit` /
/// `transform` boundaries. Nothing is caught and swallowed mid-pipeline.
#[derive(Debug, Clone, Error)]
pub enum UmapError {
  /// A parameter is outside its legal range.
  #[error("invalid parameter: {0}")]
  Config(String),

  /// A metric name the registry does not know.
  #[error("unknown metric name: {0}")]
  UnknownMetric(String),

  /// Array dimensions do not line up.
  #[error("shape mismatch: {0}")]
  ShapeMismatch(String),

  /// The requested operation is not available for this model.
  #[error("unsupported operation: {0}")]
  Unsupported(String),
}

#[cfg(test)]
mod tests {
  use super::UmapError;

  #[test]
  fn messages_carry_their_context() {
    let err = UmapError::UnknownMetric("warped".to_string());
    assert_eq!(err.to_string(), "unknown metric name: warped");
    let err = UmapError::Config("n_neighbors must be >= 2, got 0".to_string());
    assert!(err.to_string().starts_with("invalid parameter"));
  }
}
