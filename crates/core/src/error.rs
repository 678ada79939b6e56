use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid color: {0}")]
    InvalidColor(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("field {field} expects {expected}")]
    FieldType { field: String, expected: &'static str },

    #[error("invalid data: {0}")]
    InvalidData(String),
}
