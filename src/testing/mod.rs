//! Testing utilities and mock implementations
//!
//! This module provides mock implementations for testing the bridge
//! without requiring an MQTT broker.

pub mod mocks;

pub use mocks::*;
