/// Error taxonomy for the serving engine. Every variant maps to exactly one
/// HTTP status at the dispatch layer.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{1}")]
    Unauthorized(u16, String),
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// The HTTP status this error maps to.
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthorized(status, _) => *status,
            Self::NotFound => 404,
            Self::Internal(_) => 500,
        }
    }

    /// Clone by re-rendering the message; `anyhow::Error` itself isn't
    /// `Clone`, and the scheduler needs to hand the same rejection to every
    /// request in a drained batch.
    pub fn clone_for_reject(&self) -> CoreError {
        match self {
            Self::BadRequest(msg) => Self::BadRequest(msg.clone()),
            Self::Unauthorized(status, msg) => Self::Unauthorized(*status, msg.clone()),
            Self::NotFound => Self::NotFound,
            Self::Internal(err) => Self::Internal(anyhow::anyhow!("{err}")),
        }
    }
}
