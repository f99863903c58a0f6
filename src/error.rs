use thiserror::Error;

/// Result type for A3C operations
pub type Result<T> = std::result::Result<T, A3cError>;

/// Main error type for the training core
#[derive(Error, Debug)]
pub enum A3cError {
    /// Invalid dimensions for operations
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: String,
        actual: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        name: String,
        reason: String,
    },

    /// Simulator fault during reset/step/render. Always fatal.
    #[error("Environment error: {0}")]
    Environment(String),

    /// Requested policy type is not registered
    #[error("Unknown policy type '{name}' (known: {known})")]
    UnknownPolicy {
        name: String,
        known: String,
    },

    /// Requested environment id is not registered
    #[error("Unknown environment '{id}' (known: {known})")]
    UnknownEnvironment {
        id: String,
        known: String,
    },

    /// Checkpoint could not be written, found or restored
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// The trajectory producer is gone (stopped or panicked)
    #[error("Trajectory producer stopped")]
    ProducerStopped,

    /// `start` was called on a producer that is already running
    #[error("Trajectory producer already started")]
    ProducerAlreadyStarted,

    /// A trajectory with no timesteps reached the consumer
    #[error("Empty trajectory")]
    EmptyTrajectory,

    /// Numerical computation errors
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// IO errors (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for A3cError {
    fn from(err: bincode::Error) -> Self {
        A3cError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for A3cError {
    fn from(err: serde_json::Error) -> Self {
        A3cError::Serialization(err.to_string())
    }
}

// Helper functions for common error patterns
impl A3cError {
    pub fn dimension_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        A3cError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter<S: Into<String>>(name: S, reason: S) -> Self {
        A3cError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn environment<S: Into<String>>(msg: S) -> Self {
        A3cError::Environment(msg.into())
    }
}
