//! Impure I/O operations for MQTT client
//!
//! This module handles network communication, async coordination, and
//! integration with the rumqttc client. Everything that can be decided
//! without I/O lives in the sibling modules.

use super::connection::{
    configure_mqtt_options, generate_client_id, to_mqtt_qos, ConnectionState, MqttError,
    ReconnectConfig,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{AckOutcome, AckTracker, EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::observability::metrics;
use crate::protocol::Message;
use crate::transport::{BrokerConnection, Transport};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the request channel between client handle and event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long `disconnect` waits for the event loop to flush DISCONNECT
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Factory producing one MQTT session per connect sequence
pub struct MqttTransport {
    config: MqttSection,
    reconnect_config: ReconnectConfig,
}

impl MqttTransport {
    /// Create a transport for the configured broker
    ///
    /// The options are built once up front so a bad broker address is
    /// reported at startup instead of on the first request.
    pub fn new(config: MqttSection) -> Result<Self, MqttError> {
        configure_mqtt_options(&generate_client_id(&config.client_id_prefix), &config)?;
        let reconnect_config = ReconnectConfig::from_section(&config);
        Ok(Self {
            config,
            reconnect_config,
        })
    }

    pub fn config(&self) -> &MqttSection {
        &self.config
    }
}

#[async_trait]
impl Transport for MqttTransport {
    type Connection = MqttConnection;

    async fn connect(&self) -> Result<MqttConnection, MqttError> {
        MqttConnection::establish(&self.config, self.reconnect_config.clone()).await
    }

    fn broker_url(&self) -> String {
        self.config.broker_url()
    }
}

/// One MQTT session and the task driving its event loop
pub struct MqttConnection {
    client_id: String,
    client: AsyncClient,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    acks: Arc<StdMutex<AckTracker>>,
    /// Serializes submissions so waiters queue in channel order
    submit_lock: Mutex<()>,
    publish_timeout: Duration,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

/// Withdraws a queued waiter unless its request reached the event loop
struct PendingSubmission<'a> {
    acks: &'a StdMutex<AckTracker>,
    delivered: bool,
}

impl Drop for PendingSubmission<'_> {
    fn drop(&mut self) {
        if !self.delivered {
            MqttConnection::lock_acks(self.acks).cancel_last();
        }
    }
}

impl MqttConnection {
    /// Connect to the broker and wait for CONNACK
    pub async fn establish(
        config: &MqttSection,
        reconnect_config: ReconnectConfig,
    ) -> Result<Self, MqttError> {
        let client_id = generate_client_id(&config.client_id_prefix);
        let mqtt_options = configure_mqtt_options(&client_id, config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let acks = Arc::new(StdMutex::new(AckTracker::new()));

        info!(
            client_id = %client_id,
            broker_url = %config.broker_url(),
            "Connecting to MQTT broker"
        );

        let driver = tokio::spawn(Self::drive_event_loop(
            client_id.clone(),
            event_loop,
            state_tx,
            shutdown_rx,
            Arc::clone(&acks),
            reconnect_config,
        ));

        let connection = Self {
            client_id,
            client,
            state_rx: state_rx.clone(),
            shutdown_tx,
            acks,
            submit_lock: Mutex::new(()),
            publish_timeout: Duration::from_secs(config.publish_timeout_secs),
            driver: StdMutex::new(Some(driver)),
        };

        // Dropping the connection on failure stops the driver
        Self::wait_for_connection_confirmation(
            state_rx,
            Duration::from_secs(config.connect_timeout_secs),
        )
        .await?;

        info!(client_id = %connection.client_id, "MQTT session established");
        Ok(connection)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let wait = async {
            loop {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason)
                    | ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(reason));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {}
                }

                if state_rx.changed().await.is_err() {
                    // Driver is gone; its last state is still readable
                    let last = state_rx.borrow().clone();
                    return match last {
                        ConnectionState::Connected => Ok(()),
                        ConnectionState::Disconnected(reason)
                        | ConnectionState::PermanentlyDisconnected(reason) => {
                            Err(MqttError::ConnectionFailed(reason))
                        }
                        _ => Err(MqttError::ConnectionFailed(
                            "connection task stopped before CONNACK".to_string(),
                        )),
                    };
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| MqttError::Timeout("CONNACK from broker".to_string()))?
    }

    fn set_state(state_tx: &watch::Sender<ConnectionState>, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(event);
        let previous = state_tx.send_replace(next.clone());
        if previous != next {
            HealthMonitor::log_state_transition(&previous, &next);
        }
    }

    fn lock_acks(acks: &StdMutex<AckTracker>) -> MutexGuard<'_, AckTracker> {
        acks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Event loop driver: routes events and supervises reconnection
    ///
    /// A failure before the first CONNACK ends the task; the caller sees it
    /// as a failed connect. Later failures go through the reconnection
    /// policy, polling the same event loop again after a backoff delay.
    async fn drive_event_loop(
        client_id: String,
        mut event_loop: EventLoop,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        acks: Arc<StdMutex<AckTracker>>,
        reconnect_config: ReconnectConfig,
    ) {
        let mut ever_connected = false;
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(client_id = %client_id, "Shutdown signal received, stopping event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            if !Self::process_event_route(
                                route,
                                &state_tx,
                                &acks,
                                &mut ever_connected,
                                &mut reconnect_attempts,
                            ) {
                                break;
                            }
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            Self::set_state(&state_tx, ConnectionEvent::NetworkError(reason.clone()));

                            if !ever_connected {
                                debug!(client_id = %client_id, error = %reason, "Initial connect failed");
                                break;
                            }

                            error!(client_id = %client_id, error = %reason, "MQTT event loop error");
                            metrics().mqtt_connection_lost();
                            let retransmits =
                                MessageHandler::retransmitted_publish_ids(&event_loop.pending);
                            Self::lock_acks(&acks).connection_lost(&reason, &retransmits);

                            if !Self::handle_reconnection(
                                &client_id,
                                &mut reconnect_attempts,
                                &reconnect_config,
                                &state_tx,
                                shutdown_rx.clone(),
                            ).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        Self::lock_acks(&acks).fail_all("connection closed");
        debug!(client_id = %client_id, "MQTT event loop stopped");
    }

    /// Apply one routed event; returns false to stop the driver
    fn process_event_route(
        route: EventRoute,
        state_tx: &watch::Sender<ConnectionState>,
        acks: &StdMutex<AckTracker>,
        ever_connected: &mut bool,
        reconnect_attempts: &mut u32,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                Self::set_state(state_tx, ConnectionEvent::ConnAckReceived);
                if *ever_connected {
                    // The first CONNACK is recorded by the connection manager
                    metrics().mqtt_reconnected();
                }
                *ever_connected = true;
                *reconnect_attempts = 0;
            }
            EventRoute::PublishSent { pkid } => Self::lock_acks(acks).publish_sent(pkid),
            EventRoute::PublishAcknowledged { pkid, outcome } => {
                Self::lock_acks(acks).puback(pkid, outcome)
            }
            EventRoute::PublishReceived { pkid, outcome } => {
                Self::lock_acks(acks).pubrec(pkid, outcome)
            }
            EventRoute::PublishCompleted { pkid, outcome } => {
                Self::lock_acks(acks).pubcomp(pkid, outcome)
            }
            EventRoute::Disconnected { reason } => {
                warn!("Broker sent DISCONNECT: {}", reason);
                Self::set_state(state_tx, ConnectionEvent::DisconnectedByBroker(reason));
            }
            EventRoute::DisconnectSent => {
                Self::set_state(state_tx, ConnectionEvent::ClientDisconnected);
                return false;
            }
            EventRoute::InfrastructureEvent(event_str) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event_str);
            }
            EventRoute::OutgoingEvent => {}
        }
        true
    }

    /// Decide on and wait out one reconnection step
    /// Returns true to keep polling, false to stop the driver
    async fn handle_reconnection(
        client_id: &str,
        reconnect_attempts: &mut u32,
        reconnect_config: &ReconnectConfig,
        state_tx: &watch::Sender<ConnectionState>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            *reconnect_attempts,
            reconnect_config,
            *shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *reconnect_attempts = attempt;
                Self::set_state(state_tx, ConnectionEvent::ReconnectionStarted(attempt));

                let max_display = reconnect_config
                    .max_attempts
                    .map_or("∞".to_string(), |max| max.to_string());
                info!(
                    client_id = %client_id,
                    "Attempting reconnection {}/{} after {}ms delay",
                    attempt, max_display, delay_ms
                );

                Self::interruptible_sleep(shutdown_rx, delay_ms).await
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
            ReconnectionDecision::AbortReconnectDisabled => {
                Self::set_state(
                    state_tx,
                    ConnectionEvent::PermanentFailure("automatic reconnection disabled".into()),
                );
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    reconnect_config.max_attempts.unwrap_or(*reconnect_attempts)
                );
                Self::set_state(state_tx, ConnectionEvent::PermanentFailure(reason));
                false
            }
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Register a waiter and hand the request to the event loop
    ///
    /// The send waits while the request channel is full. Dropping this
    /// future before the send completes withdraws the waiter.
    async fn submit(&self, message: &Message) -> Result<oneshot::Receiver<AckOutcome>, MqttError> {
        let _order = self.submit_lock.lock().await;

        let ack = Self::lock_acks(&self.acks).enqueue(message.qos);
        let mut pending = PendingSubmission {
            acks: &self.acks,
            delivered: false,
        };

        self.client
            .publish(
                message.topic.clone(),
                to_mqtt_qos(message.qos),
                message.retained,
                message.payload_bytes(),
            )
            .await
            .map_err(|e| MqttError::PublishFailed(e.to_string()))?;

        pending.delivered = true;
        Ok(ack)
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let current_state = self.state_rx.borrow().clone();
        if !HealthMonitor::can_publish(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for MqttConnection {
    fn is_connected(&self) -> bool {
        HealthMonitor::can_publish(&self.state_rx.borrow())
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    async fn publish(&self, message: &Message) -> Result<(), MqttError> {
        self.check_connection_state()?;

        if message.topic.contains(['+', '#']) {
            return Err(MqttError::PublishFailed(format!(
                "topic '{}' contains a wildcard",
                message.topic
            )));
        }

        let handshake = async {
            match self.submit(message).await?.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(MqttError::PublishFailed(reason)),
                Err(_) => Err(MqttError::PublishFailed(
                    "connection closed before acknowledgement".to_string(),
                )),
            }
        };

        match tokio::time::timeout(self.publish_timeout, handshake).await {
            Ok(Ok(())) => {
                debug!(
                    topic = %message.topic,
                    qos = %message.qos,
                    retained = message.retained,
                    "Publish handshake complete"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(MqttError::Timeout(format!(
                "acknowledgement of publish to '{}'",
                message.topic
            ))),
        }
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        if let Err(e) = self.client.disconnect().await {
            debug!("DISCONNECT not queued, event loop already stopped: {}", e);
        }

        let handle = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            match tokio::time::timeout(DISCONNECT_GRACE, handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e);
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing stop");
                    let _ = self.shutdown_tx.send(true);
                }
            }
        }

        info!(client_id = %self.client_id, "MQTT client disconnected");
        Ok(())
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self
            .driver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}
