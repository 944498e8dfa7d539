use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{rule} rule expected {expected}, found {found}")]
    UnexpectedShape {
        rule: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("timestamp {0} cannot be expressed in milliseconds")]
    TimestampOutOfRange(String),

    #[error("record root must be a mapping, found {0}")]
    NotAMapping(&'static str),
}
