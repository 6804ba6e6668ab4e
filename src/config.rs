//! Configuration system for the HTTP-to-MQTT bridge
//!
//! Configuration comes from an optional TOML file. Every field has a default,
//! so the bridge runs without a file; command line flags and the `MQTT_HOST` /
//! `MQTT_PORT` / `HTTP_PORT` environment variables override file values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Main bridge configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub mqtt: MqttSection,
}

/// HTTP listener section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpSection {
    /// Address the HTTP server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port the HTTP server listens on
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Largest accepted request body in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_http_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// MQTT broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker host name or IP address
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    /// Broker TCP port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Use TLS (`ssl://`) instead of plain TCP (`tcp://`)
    #[serde(default)]
    pub tls: bool,
    /// Prefix for generated client ids
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// MQTT keep alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Upper bound on the connect handshake (CONNACK wait)
    #[serde(default = "default_handshake_timeout")]
    pub connect_timeout_secs: u64,
    /// Upper bound on the publish handshake (PUBACK / PUBCOMP wait)
    #[serde(default = "default_handshake_timeout")]
    pub publish_timeout_secs: u64,
    /// Let the transport reconnect established sessions on its own
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    /// Cap on transport reconnection attempts (unset = unlimited)
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
    /// Environment variable containing username
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable containing password
    #[serde(default)]
    pub password_env: Option<String>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            tls: false,
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_handshake_timeout(),
            publish_timeout_secs: default_handshake_timeout(),
            auto_reconnect: default_auto_reconnect(),
            max_reconnect_attempts: None,
            username_env: None,
            password_env: None,
        }
    }
}

impl MqttSection {
    /// Broker URL assembled from host and port, e.g. `tcp://localhost:1883`
    pub fn broker_url(&self) -> String {
        let scheme = if self.tls { "ssl" } else { "tcp" };
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            // bare IPv6 literal
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("{scheme}://{host}:{}", self.port)
    }

    /// Get MQTT username from environment variable
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_ref())
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_body_limit() -> u64 {
    1024 * 1024
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id_prefix() -> String {
    "mqtt-bridge".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_auto_reconnect() -> bool {
    true
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

/// Values that take precedence over the config file (CLI flags / env vars)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub mqtt_host: Option<String>,
    pub mqtt_port: Option<u16>,
    pub http_port: Option<u16>,
}

impl BridgeConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI / environment overrides, then re-validate
    pub fn apply_overrides(mut self, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        if let Some(host) = overrides.mqtt_host {
            self.mqtt.host = host;
        }
        if let Some(port) = overrides.mqtt_port {
            self.mqtt.port = port;
        }
        if let Some(port) = overrides.http_port {
            self.http.port = port;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.host must not be empty".to_string(),
            ));
        }
        if self.mqtt.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.port must be greater than 0".to_string(),
            ));
        }
        if self.http.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "http.port must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 || self.mqtt.publish_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt handshake timeouts must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be at least 5".to_string(),
            ));
        }
        if self.mqtt.max_reconnect_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "mqtt.max_reconnect_attempts must be greater than 0 or unset for unlimited"
                    .to_string(),
            ));
        }
        if let Some(name) = &self.mqtt.username_env {
            if !name.is_empty() && std::env::var(name).is_err() {
                return Err(ConfigError::EnvVarNotFound(name.clone()));
            }
        }
        Ok(())
    }
}

/// Helper method to get environment variable with consistent error handling
fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}
