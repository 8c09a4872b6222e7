use thiserror::Error;

/// Failure classes of the acquisition pipeline.
///
/// Only `Invariant` escapes a pipeline call. The other variants are logged
/// where they happen and folded into the run report as degraded entries.
#[derive(Error, Debug)]
pub enum ScoutError {
    /// HTTP failure or timeout while fetching a page.
    #[error("network error on {target}: {message}")]
    Network { target: String, message: String },

    /// The rendered surface did not behave as expected (stale panel,
    /// missing control, reshuffled list).
    #[error("rendering desync at item {index}: {message}")]
    Desync { index: usize, message: String },

    /// A persisted file could not be parsed.
    #[error("malformed data in {path}: {message}")]
    DataShape { path: String, message: String },

    /// Configuration that cannot be guessed safely.
    #[error("invalid configuration: {0}")]
    Invariant(String),
}

impl ScoutError {
    pub fn network(target: impl Into<String>, message: impl ToString) -> Self {
        ScoutError::Network {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn data_shape(path: impl Into<String>, message: impl ToString) -> Self {
        ScoutError::DataShape {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
