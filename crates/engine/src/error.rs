use stickies_core::{CoreError, EntityId};
use stickies_storage::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected locally before any network call.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("{} of {total} batch items failed", failed.len())]
    PartialBatch { failed: Vec<EntityId>, total: usize },

    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("folder not found: {0}")]
    FolderNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("core error: {0}")]
    Core(CoreError),
}

impl EngineError {
    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }
}

impl From<CoreError> for EngineError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::MissingField(_)
            | CoreError::InvalidColor(_)
            | CoreError::FieldType { .. }
            | CoreError::UnknownField(_) => EngineError::Validation(e.to_string()),
            other => EngineError::Core(other),
        }
    }
}

impl From<GatewayError> for EngineError {
    fn from(e: GatewayError) -> Self {
        if e.is_validation() {
            return EngineError::Validation(e.to_string());
        }
        match e {
            GatewayError::PartialBatch { failed, total } => EngineError::PartialBatch { failed, total },
            GatewayError::NotFound(id) => EngineError::EntityNotFound(id),
            other => EngineError::Persistence(other.to_string()),
        }
    }
}
