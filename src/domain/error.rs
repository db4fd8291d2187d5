use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("webhook signature: {0}")]
    SignatureInvalid(String),

    #[error("unknown webhook provider")]
    UnknownProvider,

    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("ordering conflict: {0}")]
    OrderingConflict(String),

    #[error("replayed event, no change")]
    ReplayNoop,

    #[error("transient persistence failure: {0}")]
    PersistenceTransient(String),

    #[error("persistence failed after retries: {0}")]
    PersistenceFatal(String),

    #[error("persistence timed out")]
    Timeout,

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether the reconciliation retry loop should try again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PersistenceTransient(_) | Self::Timeout => true,
            Self::Database(err) => !matches!(
                err,
                sqlx::Error::RowNotFound
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::Decode(_)
                    | sqlx::Error::TypeNotFound { .. }
            ),
            _ => false,
        }
    }
}
