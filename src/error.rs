use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("geometry feature #{index} has no '{field}' identifier")]
    MissingIdentifier { index: usize, field: String },

    #[error("malformed tabular response: {0}")]
    MalformedTable(String),

    #[error("malformed geometry response: {0}")]
    MalformedGeometry(String),

    /// The boundary service answered with an error object.
    #[error("boundary service error {code}: {message}")]
    Upstream { code: i64, message: String },

    #[error("invalid hex color '{0}'")]
    InvalidColor(String),
}
