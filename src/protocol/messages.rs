//! Message types for the HTTP-to-MQTT bridge
//!
//! This module defines the raw publish request decoded from HTTP bodies,
//! the validated [`Message`] handed to the connection manager, and the
//! `{"message": ...}` response body shared by every endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// MQTT delivery guarantee requested for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    /// QoS 0 - at most once
    AtMostOnce,
    /// QoS 1 - at least once
    AtLeastOnce,
    /// QoS 2 - exactly once
    ExactlyOnce,
}

impl QosLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QosLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(format!("invalid qos level {other}")),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        qos.as_u8()
    }
}

impl fmt::Display for QosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Publish request exactly as decoded from an HTTP body
///
/// Missing fields fall back to their zero values, so structural checks
/// (empty topic, absent payload) happen in validation rather than decoding.
/// A JSON `null` payload and a missing payload both decode to `None`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PublishRequest {
    pub topic: String,
    pub qos: u8,
    pub retained: bool,
    pub payload: Option<Value>,
}

/// Validated message ready to be published
///
/// # Examples
/// ```
/// use mqtt_bridge::protocol::{Message, QosLevel};
/// use serde_json::json;
///
/// let message = Message {
///     topic: "sensors/temp".to_string(),
///     qos: QosLevel::AtLeastOnce,
///     retained: false,
///     payload: json!(23.5),
/// };
/// assert_eq!(message.payload_bytes(), b"23.5".to_vec());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Non-empty MQTT topic
    pub topic: String,
    /// Delivery guarantee
    pub qos: QosLevel,
    /// Ask the broker to keep this as the last known value for the topic
    pub retained: bool,
    /// Payload value, never JSON null
    pub payload: Value,
}

impl Message {
    /// Encode the payload for the wire
    ///
    /// Strings are sent as their raw UTF-8 bytes. Every other JSON value is
    /// sent as compact JSON; object keys come out sorted.
    pub fn payload_bytes(&self) -> Vec<u8> {
        match &self.payload {
            Value::String(text) => text.as_bytes().to_vec(),
            other => other.to_string().into_bytes(),
        }
    }
}

/// Body of every JSON response: `{"message": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseResponse {
    pub message: String,
}

impl BaseResponse {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}
