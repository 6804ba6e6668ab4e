//! Integration tests against a live MQTT broker
//!
//! Drive the HTTP routes through the real rumqttc transport into the
//! in-process broker from `mqtt_integration_helpers`. These tests validate:
//! - the QoS 0, 1 and 2 handshakes complete before the 204
//! - a PUBACK failure reason surfaces as a 500 and the session recovers
//! - a burst larger than the client's request channel is fully delivered


use mqtt_bridge::server::routes;
use mqtt_bridge::{ConnectionManager, MqttTransport};
use mqtt_integration_helpers::{FakeBroker, DENIED_PREFIX};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use warp::http::StatusCode;

const BODY_LIMIT: u64 = 1024 * 1024;

fn bridge(broker: &FakeBroker) -> Arc<ConnectionManager<MqttTransport>> {
    let transport = MqttTransport::new(broker.mqtt_config()).expect("valid broker config");
    Arc::new(ConnectionManager::new(transport))
}

async fn post_publish(
    manager: &Arc<ConnectionManager<MqttTransport>>,
    body: &str,
) -> (StatusCode, Vec<u8>) {
    let filter = routes(Arc::clone(manager), BODY_LIMIT);
    let response = tokio::time::timeout(
        Duration::from_secs(15),
        warp::test::request()
            .method("POST")
            .path("/publish")
            .body(body.to_string())
            .reply(&filter),
    )
    .await
    .expect("publish must not hang");
    (response.status(), response.body().to_vec())
}

async fn wait_until_connected(manager: &ConnectionManager<MqttTransport>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !manager.is_connected().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("session should come back");
}

#[tokio::test]
async fn test_qos1_round_trip_reaches_broker() {
    // Arrange
    let broker = FakeBroker::start().await;
    let manager = bridge(&broker);

    // Act
    let (status, body) = post_publish(
        &manager,
        r#"{"topic":"sensors/temp","qos":1,"retained":false,"payload":23.5}"#,
    )
    .await;

    // Assert: PUBACK arrived before the response, so the broker has it
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());

    let received = broker.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].topic, "sensors/temp");
    assert_eq!(received[0].qos, 1);
    assert!(!received[0].retain);
    assert_eq!(received[0].payload_str(), "23.5");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_each_qos_level_completes_its_handshake() {
    let broker = FakeBroker::start().await;
    let manager = bridge(&broker);

    for qos in 0..=2 {
        let body = format!(r#"{{"topic":"levels/{qos}","qos":{qos},"retained":true,"payload":"q{qos}"}}"#);
        let (status, _) = post_publish(&manager, &body).await;
        assert_eq!(status, StatusCode::NO_CONTENT, "qos {qos}");
    }

    // QoS 0 is complete once written, so give the broker a moment to read it
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut received = broker.received().await;
    received.sort_by_key(|publish| publish.qos);
    let seen: Vec<(u8, &str, bool)> = received
        .iter()
        .map(|publish| (publish.qos, publish.payload_str(), publish.retain))
        .collect();
    assert_eq!(
        seen,
        vec![(0, "q0", true), (1, "q1", true), (2, "q2", true)]
    );
    assert_eq!(broker.connection_count(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_puback_failure_reason_is_500_and_session_recovers() {
    let broker = FakeBroker::start().await;
    let manager = bridge(&broker);

    let body = format!(r#"{{"topic":"{DENIED_PREFIX}door","qos":1,"payload":"open"}}"#);
    let (status, response) = post_publish(&manager, &body).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message: Value = serde_json::from_slice(&response).unwrap();
    let message = message["message"].as_str().unwrap_or_default();
    assert!(message.contains("NotAuthorized"), "got: {message}");

    // The client drops the session on a failed acknowledgement and reconnects
    wait_until_connected(&manager).await;

    let (status, _) = post_publish(&manager, r#"{"topic":"allowed/door","qos":1,"payload":"open"}"#).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let topics: Vec<String> = broker
        .received()
        .await
        .into_iter()
        .map(|publish| publish.topic)
        .collect();
    assert_eq!(topics, vec!["denied/door", "allowed/door"]);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_burst_beyond_request_channel_is_fully_delivered() {
    let broker = FakeBroker::start().await;
    let manager = bridge(&broker);

    let requests = (0..150).map(|i| {
        let manager = Arc::clone(&manager);
        async move {
            let body = format!(r#"{{"topic":"burst/{i}","qos":1,"payload":{i}}}"#);
            post_publish(&manager, &body).await
        }
    });

    let responses = futures::future::join_all(requests).await;

    let failures: Vec<String> = responses
        .iter()
        .filter(|(status, _)| *status != StatusCode::NO_CONTENT)
        .map(|(status, body)| format!("{status}: {}", String::from_utf8_lossy(body)))
        .collect();
    assert!(failures.is_empty(), "{} failed, first: {:?}", failures.len(), failures.first());

    let received = broker.received().await;
    assert_eq!(received.len(), 150);
    assert_eq!(broker.connection_count(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_then_publish_opens_a_new_session() {
    let broker = FakeBroker::start().await;
    let manager = bridge(&broker);

    let (status, _) = post_publish(&manager, r#"{"topic":"a","qos":1,"payload":1}"#).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    manager.shutdown().await;
    assert!(!manager.is_connected().await);

    let (status, _) = post_publish(&manager, r#"{"topic":"a","qos":1,"payload":2}"#).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(broker.connection_count(), 2);

    manager.shutdown().await;
}
