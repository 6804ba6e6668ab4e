//! MQTT v5 transport built on rumqttc
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, broker addressing and option construction
//! - [`message_handler`] - Pure event routing and publish acknowledgement tracking
//! - [`health_monitor`] - Pure state transitions and reconnection decisions
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_bridge::config::MqttSection;
//! use mqtt_bridge::protocol::{Message, QosLevel};
//! use mqtt_bridge::transport::mqtt::MqttTransport;
//! use mqtt_bridge::transport::{BrokerConnection, Transport};
//!
//! # tokio_test::block_on(async {
//! let transport = MqttTransport::new(MqttSection::default())?;
//! let connection = transport.connect().await?;
//! connection
//!     .publish(&Message {
//!         topic: "sensors/temp".to_string(),
//!         qos: QosLevel::AtLeastOnce,
//!         retained: false,
//!         payload: serde_json::json!(23.5),
//!     })
//!     .await?;
//! connection.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

// Re-export public types for convenience
pub use client::{MqttConnection, MqttTransport};
pub use connection::{BrokerAddress, ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{AckTracker, EventRoute, MessageHandler};
