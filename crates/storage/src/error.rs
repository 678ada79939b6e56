use stickies_core::EntityId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("remote write failed: {0}")]
    Persistence(String),

    #[error("{} of {total} batch items failed", failed.len())]
    PartialBatch { failed: Vec<EntityId>, total: usize },

    #[error("not found: {0}")]
    NotFound(EntityId),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("core error: {0}")]
    Core(#[from] stickies_core::CoreError),
}

impl GatewayError {
    /// Whether the remote rejected the payload itself rather than failing to
    /// write it.
    pub fn is_validation(&self) -> bool {
        use stickies_core::CoreError;
        matches!(
            self,
            GatewayError::Validation(_)
                | GatewayError::Core(
                    CoreError::MissingField(_)
                        | CoreError::InvalidColor(_)
                        | CoreError::FieldType { .. }
                        | CoreError::UnknownField(_)
                )
        )
    }
}
