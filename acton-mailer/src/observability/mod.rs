//! Logging setup
//!
//! The dispatcher logs through `tracing` with `request_id`, `link`, `phase`
//! and `queued` fields. Applications that have no subscriber of their own can
//! install one here.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with build-dependent defaults
///
/// Pretty output in debug builds, JSON in release builds. `RUST_LOG` overrides
/// the default filter.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
///
/// ```rust,no_run
/// use acton_mailer::observability;
///
/// # fn main() -> anyhow::Result<()> {
/// observability::init()?;
/// tracing::info!("mailer started");
/// # Ok(())
/// # }
/// ```
pub fn init() -> anyhow::Result<()> {
    init_with(&ObservabilityConfig::default())
}

/// Initialize logging from an explicit configuration
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_with(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("debug,acton_mailer=trace")
        } else {
            EnvFilter::new("info")
        }
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?;
    }

    tracing::debug!(service = %config.service_name, "logging initialized");
    Ok(())
}

/// Observability configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name attached to the startup log line
    pub service_name: String,

    /// Emit JSON instead of human-readable output
    pub log_json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "acton-mailer".to_string(),
            log_json: !cfg!(debug_assertions),
        }
    }
}

impl ObservabilityConfig {
    /// Create config for a named service
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Select JSON or pretty output
    #[must_use]
    pub fn with_json(mut self, log_json: bool) -> Self {
        self.log_json = log_json;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "acton-mailer");
        assert_eq!(config.log_json, !cfg!(debug_assertions));
    }

    #[test]
    fn test_builder() {
        let config = ObservabilityConfig::new("relay").with_json(true);

        assert_eq!(config.service_name, "relay");
        assert!(config.log_json);
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init();
        assert!(init().is_err());
    }
}
