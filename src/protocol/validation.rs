//! Request validation for inbound publish requests
//!
//! Turns a raw HTTP body into a [`Message`] or a validation error. No network
//! action happens here.

use super::messages::{Message, PublishRequest, QosLevel};
use crate::error::{BridgeError, BridgeResult};

pub const EMPTY_TOPIC: &str = "topic must not be empty";
pub const EMPTY_PAYLOAD: &str = "payload must not be empty";
pub const INVALID_QOS: &str = "qos must be 0, 1 or 2";

/// Decode and validate a publish request body
///
/// An empty body is treated as `{}` and therefore fails the topic check.
pub fn prepare_message(body: &[u8]) -> BridgeResult<Message> {
    let request = decode_request(body)?;
    request.into_message()
}

/// Decode the body without applying any field checks
pub fn decode_request(body: &[u8]) -> BridgeResult<PublishRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PublishRequest::default());
    }

    serde_json::from_slice::<PublishRequest>(body)
        .map_err(|e| BridgeError::validation(e.to_string()))
}

impl PublishRequest {
    /// Apply field checks: topic first, then payload, then QoS range
    pub fn into_message(self) -> BridgeResult<Message> {
        if self.topic.is_empty() {
            return Err(BridgeError::validation(EMPTY_TOPIC));
        }

        let payload = self
            .payload
            .ok_or_else(|| BridgeError::validation(EMPTY_PAYLOAD))?;

        let qos = QosLevel::try_from(self.qos).map_err(|_| BridgeError::validation(INVALID_QOS))?;

        Ok(Message {
            topic: self.topic,
            qos,
            retained: self.retained,
            payload,
        })
    }
}
