use std::sync::Arc;

use thiserror::Error;

/// The error type for this crate.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// An error related to I/O operations.
    #[error(transparent)]
    Io(Arc<std::io::Error>),
    /// An error related to JSON parsing.
    #[error(transparent)]
    Json(Arc<serde_json::Error>),
    /// A factor's rows have inconsistent key sets, or the factor has no rows at all.
    #[error("Malformed factor `{0}`: {1}")]
    MalformedFactor(String, String),
    /// A query or evidence variable was not found in any factor's scope.
    #[error("Variable `{0}` is not found in any factor scope")]
    UnknownVariable(String),
    /// Evidence eliminated every row of a factor, making the model inconsistent.
    #[error("Evidence is incompatible with factor `{0}`: every row was eliminated")]
    IncompatibleEvidence(String),
    /// Renormalization was attempted on a factor whose weights sum to (numerically) zero.
    #[error("Cannot renormalize a factor whose weights sum to zero")]
    DegenerateFactor,
    /// The cluster graph produced by the clique-tree builder is not a tree.
    #[error("Cluster graph is not a tree: {0}")]
    NonTreeClusterGraph(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

/// A specialized [`Result`] type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
