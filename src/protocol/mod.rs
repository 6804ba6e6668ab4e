//! Publish request types and validation for the HTTP-to-MQTT bridge
//!
//! This module implements the message structures exchanged over HTTP and the
//! validator that turns request bodies into publishable messages.

pub mod messages;
pub mod validation;

pub use messages::*;
pub use validation::{decode_request, prepare_message};
