//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] whose connections record what they publish
//! and can be made to fail or drop on demand, so the bridge can be tested
//! without an MQTT broker.

use crate::protocol::{Message, QosLevel};
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::{BrokerConnection, Transport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;

/// A message as it would have gone over the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QosLevel,
    pub retained: bool,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("<binary>")
    }
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    pub connect_calls: Arc<AtomicUsize>,
    pub fail_connect: Arc<AtomicBool>,
    pub fail_publish: Arc<AtomicBool>,
    pub connect_delay: Option<Duration>,
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    current_link: Arc<StdMutex<Option<Arc<AtomicBool>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_failure() -> Self {
        let transport = Self::default();
        transport.set_fail_connect(true);
        transport
    }

    pub fn with_publish_failure() -> Self {
        let transport = Self::default();
        transport.set_fail_publish(true);
        transport
    }

    /// Make every connect sequence take at least `delay`
    pub fn with_connect_delay(delay: Duration) -> Self {
        Self {
            connect_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Simulate the broker dropping the most recent session
    pub fn drop_connection(&self) {
        let link = self
            .current_link
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(link) = link.as_ref() {
            link.store(false, Ordering::SeqCst);
        }
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, MqttError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(MqttError::ConnectionFailed(
                "Mock connection failure: connection refused".to_string(),
            ));
        }

        let link = Arc::new(AtomicBool::new(true));
        *self
            .current_link
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&link));

        Ok(MockConnection {
            link,
            fail_publish: Arc::clone(&self.fail_publish),
            published: Arc::clone(&self.published_messages),
        })
    }

    fn broker_url(&self) -> String {
        "tcp://mock-broker:1883".to_string()
    }
}

/// Connection handed out by [`MockTransport`]
#[derive(Debug)]
pub struct MockConnection {
    link: Arc<AtomicBool>,
    fail_publish: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<PublishedMessage>>>,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    fn is_connected(&self) -> bool {
        self.link.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected("Mock link dropped".to_string())
        }
    }

    async fn publish(&self, message: &Message) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected {
                state: self.connection_state(),
            });
        }

        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed(
                "Mock publish failure: NotAuthorized".to_string(),
            ));
        }

        self.published.lock().await.push(PublishedMessage {
            topic: message.topic.clone(),
            qos: message.qos,
            retained: message.retained,
            payload: message.payload_bytes(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        self.link.store(false, Ordering::SeqCst);
        Ok(())
    }
}
