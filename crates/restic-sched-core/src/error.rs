use thiserror::Error;

/// Errors raised while validating decoded job configuration.
///
/// All of these are fatal at load time: a job set containing any invalid job
/// never reaches the scheduler.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("mutually exclusive fields: {0}")]
    MutuallyExclusive(String),

    #[error("invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("invalid schedule expression {expr:?}: {reason}")]
    InvalidSchedule { expr: String, reason: String },
}

impl ValidationError {
    pub fn missing(field: impl Into<String>) -> Self {
        ValidationError::MissingField(field.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        ValidationError::InvalidValue(reason.into())
    }
}
