//! TOML configuration for the tickerlink client
//!
//! Every section and field is optional and falls back to the service
//! defaults. Credentials are never stored in the file; `auth_token_env`
//! names the environment variable that holds the bearer token.

use crate::service::ServiceOptions;
use crate::transport::StompOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Client configuration loaded from `tickerlink.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
}

/// Connection section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSection {
    /// Broker endpoint (ws, wss, or a SockJS http/https endpoint)
    #[serde(default = "default_url")]
    pub url: String,
    /// Environment variable containing the bearer token
    #[serde(default)]
    pub auth_token_env: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub debug: bool,
    /// Custom STOMP connect headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_url() -> String {
    "http://localhost:8080/ws".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            auth_token_env: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            debug: false,
            headers: BTreeMap::new(),
        }
    }
}

/// Reconnect section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// STOMP heart-beat section, in milliseconds (0 disables a direction)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatSection {
    #[serde(default = "default_heartbeat_ms")]
    pub incoming_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub outgoing_ms: u64,
}

fn default_heartbeat_ms() -> u64 {
    4_000
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            incoming_ms: default_heartbeat_ms(),
            outgoing_ms: default_heartbeat_ms(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.connection.url).map_err(|e| {
            ConfigError::InvalidConfig(format!("connection.url '{}': {e}", self.connection.url))
        })?;
        if !matches!(url.scheme(), "ws" | "wss" | "http" | "https") {
            return Err(ConfigError::InvalidConfig(format!(
                "connection.url scheme must be ws, wss, http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.connection.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "connection.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.initial_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "reconnect.max_delay_ms ({}) must be >= initial_delay_ms ({})",
                self.reconnect.max_delay_ms, self.reconnect.initial_delay_ms
            )));
        }
        Ok(())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Bearer token from the configured environment variable, if set
    pub fn auth_token(&self) -> Option<String> {
        Self::get_env_var_optional(self.connection.auth_token_env.as_ref())
    }

    /// Like [`auth_token`](Self::auth_token), but a configured variable that
    /// is missing is an error
    pub fn require_auth_token(&self) -> Result<Option<String>, ConfigError> {
        match &self.connection.auth_token_env {
            None => Ok(None),
            Some(name) => std::env::var(name)
                .map(Some)
                .map_err(|_| ConfigError::EnvVarNotFound(name.clone())),
        }
    }

    /// Service options resolved from this configuration
    pub fn service_options(&self) -> ServiceOptions {
        let mut options = ServiceOptions::new(self.connection.url.clone())
            .with_auto_reconnect(self.reconnect.enabled)
            .with_max_reconnect_attempts(self.reconnect.max_attempts)
            .with_reconnect_delays(
                Duration::from_millis(self.reconnect.initial_delay_ms),
                Duration::from_millis(self.reconnect.max_delay_ms),
            )
            .with_connect_timeout(Duration::from_millis(self.connection.connect_timeout_ms))
            .with_debug(self.connection.debug);
        for (name, value) in &self.connection.headers {
            options = options.with_connect_header(name.clone(), value.clone());
        }
        if let Some(token) = self.auth_token() {
            options = options.with_auth_token(token);
        }
        options.heartbeat_incoming = Duration::from_millis(self.heartbeat.incoming_ms);
        options.heartbeat_outgoing = Duration::from_millis(self.heartbeat.outgoing_ms);
        options
    }

    pub fn stomp_options(&self) -> StompOptions {
        self.service_options().stomp_options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[connection]
url = "wss://feed.example.com/ws"
auth_token_env = "TICKERLINK_TEST_TOKEN_UNSET"
connect_timeout_ms = 5000
debug = true

[connection.headers]
X-Client = "cli"

[reconnect]
enabled = false
max_attempts = 3
initial_delay_ms = 500
max_delay_ms = 2000

[heartbeat]
incoming_ms = 0
outgoing_ms = 10000
"#;

        let config = ClientConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.connection.url, "wss://feed.example.com/ws");
        assert_eq!(config.connection.connect_timeout_ms, 5000);
        assert!(config.connection.debug);
        assert_eq!(config.connection.headers.get("X-Client").map(String::as_str), Some("cli"));
        assert!(!config.reconnect.enabled);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.heartbeat.incoming_ms, 0);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.connection.url, "http://localhost:8080/ws");
        assert_eq!(config.connection.connect_timeout_ms, 10_000);
        assert!(config.reconnect.enabled);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.initial_delay_ms, 1_000);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.heartbeat.incoming_ms, 4_000);
        assert_eq!(config.heartbeat.outgoing_ms, 4_000);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = ClientConfig::from_toml_str("[reconnect]\nmax_attempts = 9\n").unwrap();
        assert_eq!(config.reconnect.max_attempts, 9);
        assert!(config.reconnect.enabled);
        assert_eq!(config.reconnect.initial_delay_ms, 1_000);
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        let result = ClientConfig::from_toml_str("[connection]\nurl = \"ftp://localhost:21\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_unparseable_url() {
        let result = ClientConfig::from_toml_str("[connection]\nurl = \"not a url\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_bad_delays() {
        let zero = ClientConfig::from_toml_str("[reconnect]\ninitial_delay_ms = 0\n");
        assert!(matches!(zero, Err(ConfigError::InvalidConfig(_))));

        let inverted =
            ClientConfig::from_toml_str("[reconnect]\ninitial_delay_ms = 5000\nmax_delay_ms = 1000\n");
        assert!(matches!(inverted, Err(ConfigError::InvalidConfig(_))));

        let timeout = ClientConfig::from_toml_str("[connection]\nconnect_timeout_ms = 0\n");
        assert!(matches!(timeout, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let result = ClientConfig::from_toml_str("[connection\nurl = ");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_service_options_mapping() {
        let config = ClientConfig::from_toml_str(
            "[connection]\nurl = \"ws://localhost:61614\"\n[connection.headers]\nX-Client = \"cli\"\n[reconnect]\nmax_attempts = 2\n[heartbeat]\nincoming_ms = 0\n",
        )
        .unwrap();

        let options = config.service_options();
        assert_eq!(options.url, "ws://localhost:61614");
        assert_eq!(options.max_reconnect_attempts, 2);
        assert_eq!(options.heartbeat_incoming, Duration::ZERO);
        assert_eq!(options.heartbeat_outgoing, Duration::from_millis(4000));
        assert_eq!(
            options.build_connect_headers().get("X-Client").map(String::as_str),
            Some("cli")
        );
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_missing_auth_env_var() {
        let config = ClientConfig::from_toml_str(
            "[connection]\nauth_token_env = \"TICKERLINK_DEFINITELY_UNSET_VAR\"\n",
        )
        .unwrap();

        assert_eq!(config.auth_token(), None);
        assert!(matches!(
            config.require_auth_token(),
            Err(ConfigError::EnvVarNotFound(name)) if name == "TICKERLINK_DEFINITELY_UNSET_VAR"
        ));
        assert!(ClientConfig::default().require_auth_token().unwrap().is_none());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = ClientConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed = ClientConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
