use thiserror::Error;

/// Top-level error type for celeste-core.
#[derive(Debug, Error)]
pub enum CelesteError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid range for {field}: low={low} must be < high={high}")]
    InvalidRange { field: String, low: f32, high: f32 },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while converting raw game ticks into schema observations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Vision grid must be {expected}x{expected}, got {rows} rows with a {cols}-wide row")]
    VisionShape {
        expected: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Entity code {value} outside [0, {max}]")]
    EntityOutOfRange { value: i64, max: u8 },

    #[error("Schema mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: String, got: String },

    #[error("Unknown schema version: {0}")]
    UnknownVersion(String),
}

/// Action/observation validation errors.
///
/// Copy + static messages for cheap propagation on the step path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Action dimension mismatch: expected {expected}, got {got}")]
    ActionDimMismatch { expected: usize, got: usize },

    #[error("Action axis {axis} out of range: {value} >= {max}")]
    ActionOutOfRange { axis: usize, value: u32, max: usize },

    #[error("Observation does not match the configured observation space")]
    ObservationOutsideSpace,
}

/// Failure of a call to a policy source.
///
/// Wire-level failures are split into retryable and fatal so that callers
/// decide explicitly whether to reconnect; the episode loop treats both as
/// fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyCallError {
    #[error("{call} failed (retryable): {reason}")]
    Retryable { call: &'static str, reason: String },

    #[error("{call} failed: {reason}")]
    Fatal { call: &'static str, reason: String },
}

impl PolicyCallError {
    pub fn retryable(call: &'static str, reason: impl Into<String>) -> Self {
        Self::Retryable {
            call,
            reason: reason.into(),
        }
    }

    pub fn fatal(call: &'static str, reason: impl Into<String>) -> Self {
        Self::Fatal {
            call,
            reason: reason.into(),
        }
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    /// Name of the policy-source call that failed.
    pub const fn call(&self) -> &'static str {
        match self {
            Self::Retryable { call, .. } | Self::Fatal { call, .. } => call,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn celeste_error_from_config_error() {
        let err = ConfigError::invalid("routing.num_server_shards", "must be >= 1");
        let celeste_err: CelesteError = err.into();
        assert!(matches!(celeste_err, CelesteError::Config(_)));
        assert!(celeste_err.to_string().contains("num_server_shards"));
    }

    #[test]
    fn celeste_error_from_schema_error() {
        let err = SchemaError::EntityOutOfRange { value: 120, max: 100 };
        let celeste_err: CelesteError = err.into();
        assert!(matches!(celeste_err, CelesteError::Schema(_)));
        assert!(celeste_err.to_string().contains("120"));
    }

    #[test]
    fn config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let config_err: ConfigError = io_err.into();
        assert!(matches!(config_err, ConfigError::Io(_)));
    }

    #[test]
    fn validation_error_is_copy() {
        let err = ValidationError::ObservationOutsideSpace;
        let err2 = err;
        assert_eq!(err, err2);
    }

    #[test]
    fn validation_error_display_messages() {
        assert_eq!(
            ValidationError::ActionDimMismatch {
                expected: 4,
                got: 3
            }
            .to_string(),
            "Action dimension mismatch: expected 4, got 3"
        );
        assert_eq!(
            ValidationError::ActionOutOfRange {
                axis: 2,
                value: 5,
                max: 4
            }
            .to_string(),
            "Action axis 2 out of range: 5 >= 4"
        );
    }

    #[test]
    fn schema_error_display_messages() {
        assert_eq!(
            SchemaError::VisionShape {
                expected: 20,
                rows: 19,
                cols: 20
            }
            .to_string(),
            "Vision grid must be 20x20, got 19 rows with a 20-wide row"
        );
        assert_eq!(
            SchemaError::UnknownVersion("v9".into()).to_string(),
            "Unknown schema version: v9"
        );
    }

    #[test]
    fn policy_call_error_kinds() {
        let retry = PolicyCallError::retryable("get_action", "connection reset");
        let fatal = PolicyCallError::fatal("start_episode", "version mismatch");
        assert!(retry.is_retryable());
        assert!(!fatal.is_retryable());
        assert_eq!(retry.call(), "get_action");
        assert_eq!(fatal.to_string(), "start_episode failed: version mismatch");
    }
}
