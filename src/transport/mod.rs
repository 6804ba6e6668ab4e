//! Transport layer for broker communication
//!
//! This module provides the transport abstraction the connection manager
//! depends on, plus the MQTT implementation used in production.

use crate::protocol::Message;

pub mod mqtt;

use mqtt::{ConnectionState, MqttError};

/// Factory for broker connections
///
/// This trait provides an abstraction over the concrete client library
/// to enable dependency injection and testing.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Connection: BrokerConnection + 'static;

    /// Run a full connect sequence
    ///
    /// Resolves only after the broker accepted the session (CONNACK).
    async fn connect(&self) -> Result<Self::Connection, MqttError>;

    /// Broker URL this transport targets, for logging
    fn broker_url(&self) -> String;
}

/// One established broker session
#[async_trait::async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Check if the session is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Publish a message and wait for the publish handshake to complete
    async fn publish(&self, message: &Message) -> Result<(), MqttError>;

    /// Disconnect gracefully from the broker
    async fn disconnect(&self) -> Result<(), MqttError>;
}
