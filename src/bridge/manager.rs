//! Broker connection manager
//!
//! Owns the single broker connection of the process. Every publish goes
//! through [`ConnectionManager::ensure_connection`], which reuses a healthy
//! connection and replaces a dead one with a fresh connect sequence.

use crate::error::{BridgeError, BridgeResult};
use crate::mqtt_span;
use crate::observability::metrics;
use crate::protocol::Message;
use crate::transport::{BrokerConnection, Transport};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn, Instrument};

/// Connection manager with dependency injection
///
/// The slot is guarded by an async mutex so only one connect sequence runs
/// at a time. Publishing happens outside the lock on a shared handle.
pub struct ConnectionManager<T>
where
    T: Transport + 'static,
{
    transport: T,
    connection: Mutex<Option<Arc<T::Connection>>>,
}

impl<T> ConnectionManager<T>
where
    T: Transport + 'static,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            connection: Mutex::new(None),
        }
    }

    /// Get the transport instance for testing
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Return a connected handle, connecting first if needed
    ///
    /// A failed connect leaves the previous handle (if any) installed.
    pub async fn ensure_connection(&self) -> BridgeResult<Arc<T::Connection>> {
        let mut slot = self.connection.lock().await;

        if let Some(connection) = slot.as_ref() {
            if connection.is_connected() {
                return Ok(Arc::clone(connection));
            }
            info!(
                state = ?connection.connection_state(),
                "Broker connection is down, reconnecting"
            );
        }

        let broker_url = self.transport.broker_url();
        metrics().mqtt_connection_attempt();

        let connection = self
            .transport
            .connect()
            .instrument(mqtt_span!(operation = "connect", broker_url = %broker_url))
            .await
            .map_err(|e| {
                metrics().mqtt_connection_failed();
                warn!(broker_url = %broker_url, error = %e, "Connect sequence failed");
                BridgeError::Connection(e)
            })?;

        metrics().mqtt_connection_established();
        info!(broker_url = %broker_url, "Connected to broker");

        let connection = Arc::new(connection);
        // The replaced handle is dropped here, which stops its event loop
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Publish a validated message and wait for the broker handshake
    pub async fn publish(&self, message: &Message) -> BridgeResult<()> {
        let connection = self.ensure_connection().await?;
        let started = Instant::now();

        let span = mqtt_span!(
            operation = "publish",
            topic = %message.topic,
            qos = %message.qos,
            retained = message.retained
        );

        async {
            match connection.publish(message).await {
                Ok(()) => {
                    metrics().mqtt_message_published(started.elapsed());
                    debug!("Message published");
                    Ok(())
                }
                Err(e) => {
                    metrics().mqtt_publish_failed();
                    Err(BridgeError::Publish(e))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Whether an installed connection exists and reports connected
    ///
    /// Never triggers a connect.
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|connection| connection.is_connected())
    }

    /// Disconnect the installed connection, if any, and clear the slot
    pub async fn shutdown(&self) {
        let connection = self.connection.lock().await.take();
        let Some(connection) = connection else {
            debug!("No broker connection to close");
            return;
        };

        match connection.disconnect().await {
            Ok(()) => info!("Disconnected from broker"),
            Err(e) => warn!("Broker disconnect failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QosLevel;
    use crate::testing::MockTransport;
    use crate::transport::mqtt::MqttError;
    use serde_json::json;
    use std::time::Duration;

    fn message(topic: &str) -> Message {
        Message {
            topic: topic.to_string(),
            qos: QosLevel::AtLeastOnce,
            retained: false,
            payload: json!(23.5),
        }
    }

    #[tokio::test]
    async fn test_connection_is_reused() {
        let manager = ConnectionManager::new(MockTransport::new());

        manager.publish(&message("a")).await.unwrap();
        manager.publish(&message("b")).await.unwrap();

        assert_eq!(manager.transport().connect_count(), 1);
        assert_eq!(manager.transport().get_published_messages().await.len(), 2);
    }

    #[tokio::test]
    async fn test_dead_connection_is_replaced_once() {
        let manager = ConnectionManager::new(MockTransport::new());
        manager.publish(&message("a")).await.unwrap();

        manager.transport().drop_connection();
        assert!(!manager.is_connected().await);

        manager.publish(&message("b")).await.unwrap();
        assert_eq!(manager.transport().connect_count(), 2);
        assert!(manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_failure_maps_to_connection_error() {
        let manager = ConnectionManager::new(MockTransport::with_connect_failure());

        let error = manager.publish(&message("a")).await.unwrap_err();
        assert!(matches!(
            error,
            BridgeError::Connection(MqttError::ConnectionFailed(_))
        ));
        assert!(!error.to_string().is_empty());
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_is_retried_on_every_request() {
        let manager = ConnectionManager::new(MockTransport::with_connect_failure());

        assert!(manager.publish(&message("a")).await.is_err());
        assert!(manager.publish(&message("a")).await.is_err());
        assert_eq!(manager.transport().connect_count(), 2);

        manager.transport().set_fail_connect(false);
        manager.publish(&message("a")).await.unwrap();
        assert_eq!(manager.transport().connect_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_previous_handle() {
        let manager = ConnectionManager::new(MockTransport::new());
        let first = manager.ensure_connection().await.unwrap();

        manager.transport().drop_connection();
        manager.transport().set_fail_connect(true);
        assert!(manager.ensure_connection().await.is_err());

        let slot = manager.connection.lock().await;
        let installed = slot.as_ref().expect("previous handle stays installed");
        assert!(Arc::ptr_eq(installed, &first));
    }

    #[tokio::test]
    async fn test_publish_failure_maps_to_publish_error() {
        let manager = ConnectionManager::new(MockTransport::with_publish_failure());

        let error = manager.publish(&message("a")).await.unwrap_err();
        assert!(matches!(
            error,
            BridgeError::Publish(MqttError::PublishFailed(_))
        ));
        assert!(error.to_string().contains("NotAuthorized"));
        assert_eq!(manager.transport().connect_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_publishes_share_one_connect() {
        let manager = Arc::new(ConnectionManager::new(MockTransport::with_connect_delay(
            Duration::from_millis(50),
        )));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.publish(&message(&format!("t/{i}"))).await })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(manager.transport().connect_count(), 1);
        assert_eq!(manager.transport().get_published_messages().await.len(), 8);
    }

    #[tokio::test]
    async fn test_is_connected_never_connects() {
        let manager = ConnectionManager::new(MockTransport::new());
        assert!(!manager.is_connected().await);
        assert_eq!(manager.transport().connect_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_and_clears() {
        let manager = ConnectionManager::new(MockTransport::new());
        let connection = manager.ensure_connection().await.unwrap();

        manager.shutdown().await;
        assert!(!connection.is_connected());
        assert!(!manager.is_connected().await);

        // idempotent
        manager.shutdown().await;
    }
}
