use thiserror::Error;

/// Errors surfaced by the engine, mode controller and hardware path.
///
/// Bootstrap code keeps using `anyhow`; these variants exist so the HTTP
/// layer can map each failure onto a status code.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    /// The request is well-formed but illegal in the current mode.
    #[error("{0}")]
    Conflict(String),

    #[error("dataset error: {0}")]
    Dataset(#[from] csv::Error),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

pub type HubResult<T> = Result<T, HubError>;
