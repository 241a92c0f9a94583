//! Configuration management for acton-mailer
//!
//! Configuration is loaded from multiple sources with clear precedence:
//!
//! 1. Environment variables (`ACTON_MAILER_*`, use `__` for nesting)
//! 2. `./mailer.toml`
//! 3. `~/.config/acton-mailer/{service_name}/mailer.toml`
//! 4. `/etc/acton-mailer/{service_name}/mailer.toml`
//! 5. Defaults
//!
//! # Example Configuration
//!
//! ```toml
//! [smtp]
//! host = "smtp.example.com"
//! secure = true
//! hello_name = "mailer.example.com"
//!
//! [smtp.auth]
//! user = "alice"
//! pass = "secret"
//!
//! [dispatch]
//! keep_alive = false
//! ```

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "ACTON_MAILER_";
const CONFIG_FILE: &str = "mailer.toml";

/// Complete mailer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailerConfig {
    /// SMTP relay settings
    #[serde(default)]
    pub smtp: SmtpSettings,

    /// Dispatcher behavior
    #[serde(default)]
    pub dispatch: DispatchSettings,
}

/// SMTP relay connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    /// Relay hostname
    pub host: String,

    /// Relay port; see [`SmtpSettings::effective_port`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Use implicit TLS from the first byte
    pub secure: bool,

    /// Do not upgrade plaintext connections with STARTTLS
    pub ignore_tls: bool,

    /// PEM file with a pinned root certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,

    /// Name announced in EHLO
    pub hello_name: String,

    /// Connect and command timeout in seconds
    pub timeout_secs: u64,

    /// Credentials for SMTP AUTH
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<SmtpAuth>,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            secure: false,
            ignore_tls: false,
            ca_file: None,
            hello_name: "localhost".to_string(),
            timeout_secs: 60,
            auth: None,
        }
    }
}

impl SmtpSettings {
    /// Port to connect to: the configured one, else 465 for implicit TLS and 25 otherwise
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.secure { 465 } else { 25 })
    }

    /// Connect and command timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// SMTP AUTH credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpAuth {
    /// Login name
    pub user: String,

    /// Password
    pub pass: String,
}

impl std::fmt::Debug for SmtpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpAuth")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}

/// Dispatcher settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Keep the shared session open after a delivered message
    pub keep_alive: bool,
}

impl MailerConfig {
    /// Load configuration for a specific service
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Default configuration cannot be serialized to TOML
    /// - A configuration file cannot be read or parsed
    /// - Configuration values fail type conversion
    pub fn load_for_service(service_name: &str) -> anyhow::Result<Self> {
        let mut figment = Figment::new()
            // 5. Defaults (lowest priority)
            .merge(Toml::string(&toml::to_string(&Self::default())?));

        // 4. System config
        let system_config = PathBuf::from("/etc/acton-mailer")
            .join(service_name)
            .join(CONFIG_FILE);
        if system_config.exists() {
            figment = figment.merge(Toml::file(&system_config));
        }

        // 3. User config
        let user_config = Self::recommended_path(service_name);
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }

        // 2. Local config
        let local_config = PathBuf::from(".").join(CONFIG_FILE);
        if local_config.exists() {
            figment = figment.merge(Toml::file(&local_config));
        }

        // 1. Environment variables
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// A missing file yields the defaults; environment variables still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file contains invalid TOML or values fail type conversion.
    pub fn load_from(path: &str) -> anyhow::Result<Self> {
        let config = Figment::new()
            .merge(Toml::string(&toml::to_string(&Self::default())?))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true))
            .extract()?;

        Ok(config)
    }

    /// Get the recommended XDG config path for a service
    #[must_use]
    pub fn recommended_path(service_name: &str) -> PathBuf {
        dirs::config_dir().map_or_else(
            || PathBuf::from(".").join(CONFIG_FILE),
            |config_dir| {
                config_dir
                    .join("acton-mailer")
                    .join(service_name)
                    .join(CONFIG_FILE)
            },
        )
    }
}
