/// Result alias that carries the custom [`PlacementError`] type.
pub type Result<T> = std::result::Result<T, PlacementError>;

/// Common error type for the core crate.
///
/// Placement is all-or-nothing: every variant raised by the engine is raised
/// before the destination chart is touched.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// The pattern cannot be placed, e.g. because it has no hit objects.
    #[error("invalid pattern: {0}")]
    InvalidPattern(&'static str),
    /// A redline carries a tempo that relative time math cannot work with.
    #[error("invalid timing: redline at {offset} ms has tempo {mpb} ms per beat")]
    InvalidTiming { offset: f64, mpb: f64 },
    /// Free-form error surfaced by the CLI and the config layer.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around JSON (de)serialization errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl PlacementError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for PlacementError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PlacementError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
