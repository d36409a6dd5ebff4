//! Typed failures surfaced by the analysis components.
//!
//! Component entry points return `Result<_, EngineError>`; the validation
//! harness and binaries wrap these in `anyhow` the way the rest of the
//! crate propagates errors.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient data: need {need}, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Stable machine-readable code for callers that log or render failures.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::InvalidInput(_) => ErrorCode::InvalidInput,
            EngineError::InsufficientData { .. } => ErrorCode::InsufficientData,
            EngineError::InvalidConfig(_) => ErrorCode::InvalidConfig,
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        EngineError::InvalidConfig(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        EngineError::InvalidInput(msg.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    InsufficientData,
    InvalidConfig,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InsufficientData => "INSUFFICIENT_DATA",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_variants() {
        assert_eq!(EngineError::invalid_input("x").code().as_str(), "INVALID_INPUT");
        assert_eq!(
            EngineError::InsufficientData { need: 10, got: 3 }.code().as_str(),
            "INSUFFICIENT_DATA"
        );
        assert_eq!(EngineError::invalid_config("x").code().as_str(), "INVALID_CONFIG");
    }

    #[test]
    fn test_display_includes_counts() {
        let err = EngineError::InsufficientData { need: 10, got: 3 };
        assert_eq!(err.to_string(), "insufficient data: need 10, got 3");
    }

    #[test]
    fn test_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::InvalidConfig).unwrap();
        assert_eq!(json, "\"INVALID_CONFIG\"");
    }
}
