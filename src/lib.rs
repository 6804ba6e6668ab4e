//! mqtt-bridge - HTTP-to-MQTT bridge
//!
//! Accepts publish requests over HTTP and forwards them to an MQTT broker
//! over a single, lazily (re)established connection.
//!
//! # Overview
//!
//! - [`protocol`] - request/response types and request validation
//! - [`bridge`] - the connection manager owning the broker connection
//! - [`transport`] - the transport seam and its MQTT v5 implementation
//! - [`server`] - the warp HTTP routes
//! - [`observability`] - structured logging and metrics
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_bridge::protocol::{prepare_message, QosLevel};
//!
//! let message = prepare_message(
//!     br#"{"topic":"sensors/temp","qos":1,"retained":false,"payload":23.5}"#,
//! )
//! .unwrap();
//!
//! assert_eq!(message.topic, "sensors/temp");
//! assert_eq!(message.qos, QosLevel::AtLeastOnce);
//! assert_eq!(message.payload_bytes(), b"23.5");
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod testing;
pub mod transport;

pub use bridge::ConnectionManager;
pub use config::*;
pub use error::{BridgeError, BridgeResult};
pub use protocol::*;
pub use server::BridgeServer;
pub use transport::mqtt::MqttTransport;
