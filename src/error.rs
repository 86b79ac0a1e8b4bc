//! Error types for pgharness.

use thiserror::Error;

/// The main error type for sampler runs and conformance scenarios.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Failed to open a connection or pool.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Statement execution error.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller passed an argument the operation cannot work with.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A literal fixture value could not be parsed.
    #[error("Invalid fixture value '{value}': {message}")]
    Fixture { value: String, message: String },

    /// A value read back from the database differs from the expected one.
    #[error("{label}\nGot:  {got}\nWant: {want}")]
    Mismatch {
        label: String,
        got: String,
        want: String,
    },

    /// A column expected to hold a value was NULL.
    #[error("{0} is null")]
    Null(String),

    /// A column expected to be NULL held a value.
    #[error("{0} is not null")]
    NotNull(String),

    /// A scenario step failed.
    #[error("failed to {step}: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<HarnessError>,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// `<field> mismatch` with the printed values.
    pub fn mismatch(
        field: &str,
        got: impl std::fmt::Display,
        want: impl std::fmt::Display,
    ) -> Self {
        Self::Mismatch {
            label: format!("{} mismatch", field),
            got: got.to_string(),
            want: want.to_string(),
        }
    }

    /// `<what> mismatch for <subject>` with the printed values.
    pub fn mismatch_for(
        what: &str,
        subject: &str,
        got: impl std::fmt::Display,
        want: impl std::fmt::Display,
    ) -> Self {
        Self::Mismatch {
            label: format!("{} mismatch for {}", what, subject),
            got: got.to_string(),
            want: want.to_string(),
        }
    }

    /// Wrap an error with the scenario step that produced it.
    pub fn step(step: impl Into<String>, source: HarnessError) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Create a fixture error.
    pub fn fixture(value: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Fixture {
            value: value.into(),
            message: message.to_string(),
        }
    }
}

/// Result type alias for pgharness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_display() {
        let err = HarnessError::mismatch("Age", 61, 62);
        assert_eq!(err.to_string(), "Age mismatch\nGot:  61\nWant: 62");

        let err = HarnessError::mismatch_for("affected row count", "Blog", 0, 1);
        assert_eq!(
            err.to_string(),
            "affected row count mismatch for Blog\nGot:  0\nWant: 1"
        );
    }

    #[test]
    fn test_step_display() {
        let err = HarnessError::step(
            "create User",
            HarnessError::Execution("duplicate key".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "failed to create User: Execution error: duplicate key"
        );
    }

    #[test]
    fn test_null_display() {
        assert_eq!(
            HarnessError::Null("Email".into()).to_string(),
            "Email is null"
        );
        assert_eq!(
            HarnessError::NotNull("ColBool".into()).to_string(),
            "ColBool is not null"
        );
    }
}
