//! Pure connection state management for MQTT client
//!
//! This module contains pure functions for connection state management,
//! configuration handling, and option construction.

use crate::config::MqttSection;
use crate::protocol::QosLevel;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::{Host, Url};
use uuid::Uuid;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Transport is reconnecting (attempt count)
    Reconnecting(u32),
    /// Permanently disconnected - reconnection disabled or attempts exhausted
    PermanentlyDisconnected(String),
}

/// Transport-level reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Reconnect established sessions after network errors
    pub enabled: bool,
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Custom backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    pub fn from_section(config: &MqttSection) -> Self {
        Self {
            enabled: config.auto_reconnect,
            max_attempts: config.max_reconnect_attempts,
            ..Default::default()
        }
    }

    /// Calculate backoff delay for given attempt using custom pattern
    /// Pattern: 25ms, 50ms, 100ms, 250ms, then sustain at 250ms forever
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = (attempt.saturating_sub(1)) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing failed: {0}")]
    PublishFailed(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

/// Generate a client id unique to one connect sequence
pub fn generate_client_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Host and port extracted from a broker URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `tcp://`, `mqtt://`, `ssl://`, `tls://` or `mqtts://` broker URLs
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress, MqttError> {
    let invalid = || MqttError::InvalidBrokerUrl(broker_url.to_string());
    let url = Url::parse(broker_url).map_err(|_| invalid())?;

    let tls = match url.scheme() {
        "tcp" | "mqtt" => false,
        "ssl" | "tls" | "mqtts" => true,
        _ => return Err(invalid()),
    };

    let host = match url.host().ok_or_else(invalid)? {
        Host::Domain(domain) if !domain.is_empty() => domain.to_string(),
        Host::Domain(_) => return Err(invalid()),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    };
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerAddress { host, port, tls })
}

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(
    client_id: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let address = parse_broker_url(&config.broker_url())?;
    let mut mqtt_options = MqttOptions::new(client_id, address.host, address.port);

    if address.tls {
        let transport = RumqttcTransport::tls_with_default_config();
        mqtt_options.set_transport(transport);
    }

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(&username, &password);
    }

    // rumqttc panics below 5 s; BridgeConfig::validate enforces the floor
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    mqtt_options.set_connection_timeout(config.connect_timeout_secs);
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}

/// Map a validated QoS level onto the client library's type
pub fn to_mqtt_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}
