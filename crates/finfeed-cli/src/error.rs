use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] finfeed_core::ValidationError),

    #[error(transparent)]
    Config(#[from] finfeed_core::ConfigError),

    #[error(transparent)]
    Core(#[from] finfeed_core::CoreError),

    #[error("command error: {0}")]
    Command(String),

    #[error("strict mode failed: {warning_count} warning(s)")]
    StrictModeViolation { warning_count: usize },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Command(_) => 2,
            Self::Config(_) => 2,
            Self::Core(finfeed_core::CoreError::Exhausted(_)) => 3,
            Self::Core(_) => 6,
            Self::StrictModeViolation { .. } => 5,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use finfeed_core::{ConfigError, CoreError, ExhaustionError};

    use super::*;

    #[test]
    fn exhaustion_maps_to_data_unavailable_code() {
        let error = CliError::Core(CoreError::Exhausted(ExhaustionError {
            symbol: finfeed_core::Symbol::parse("XYZ").expect("symbol"),
            market: finfeed_core::Market::Br,
            data_type: finfeed_core::DataType::Stock,
            provider: None,
            attempts: Vec::new(),
        }));
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn configuration_problems_are_usage_errors() {
        let error = CliError::Config(ConfigError::Invalid("ingest_concurrency must be > 0".into()));
        assert_eq!(error.exit_code(), 2);
    }
}
