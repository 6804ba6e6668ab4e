//! Pure event routing and publish acknowledgement tracking
//!
//! The client library reports publish progress only as a stream of events
//! keyed by packet id. [`AckTracker`] turns that stream back into one
//! completion per publish call.

use crate::protocol::QosLevel;
use rumqttc::v5::mqttbytes::v5::{Packet, PubAckReason, PubCompReason, PubRecReason};
use rumqttc::v5::{Event, Request};
use rumqttc::Outgoing;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Outcome reported by the broker for one publish step
pub type AckOutcome = Result<(), String>;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged {
                    pkid: puback.pkid,
                    outcome: Self::puback_outcome(&puback.reason),
                },
                Packet::PubRec(pubrec) => EventRoute::PublishReceived {
                    pkid: pubrec.pkid,
                    outcome: Self::pubrec_outcome(&pubrec.reason),
                },
                Packet::PubComp(pubcomp) => EventRoute::PublishCompleted {
                    pkid: pubcomp.pkid,
                    outcome: Self::pubcomp_outcome(&pubcomp.reason),
                },
                Packet::Disconnect(disconnect) => EventRoute::Disconnected {
                    reason: format!("{:?}", disconnect.reason_code),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent { pkid: *pkid },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    pub fn puback_outcome(reason: &PubAckReason) -> AckOutcome {
        match reason {
            PubAckReason::Success | PubAckReason::NoMatchingSubscribers => Ok(()),
            other => Err(format!("{other:?}")),
        }
    }

    pub fn pubrec_outcome(reason: &PubRecReason) -> AckOutcome {
        match reason {
            PubRecReason::Success | PubRecReason::NoMatchingSubscribers => Ok(()),
            other => Err(format!("{other:?}")),
        }
    }

    pub fn pubcomp_outcome(reason: &PubCompReason) -> AckOutcome {
        match reason {
            PubCompReason::Success => Ok(()),
            other => Err(format!("{other:?}")),
        }
    }

    /// Packet ids the client will resend as-is in the next session
    pub fn retransmitted_publish_ids<'a>(
        pending: impl IntoIterator<Item = &'a Request>,
    ) -> HashSet<u16> {
        pending
            .into_iter()
            .filter_map(|request| match request {
                Request::Publish(publish) if publish.pkid != 0 => Some(publish.pkid),
                _ => None,
            })
            .collect()
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish
    ConnectionAcknowledged,
    /// A PUBLISH packet left the client
    PublishSent { pkid: u16 },
    /// PUBACK for a QoS 1 publish
    PublishAcknowledged { pkid: u16, outcome: AckOutcome },
    /// PUBREC for a QoS 2 publish
    PublishReceived { pkid: u16, outcome: AckOutcome },
    /// PUBCOMP closing a QoS 2 publish
    PublishCompleted { pkid: u16, outcome: AckOutcome },
    /// MQTT broker disconnected
    Disconnected { reason: String },
    /// DISCONNECT sent by this client
    DisconnectSent,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

struct InFlight {
    waiter: oneshot::Sender<AckOutcome>,
    /// PUBREC arrived, only PUBCOMP is outstanding
    released: bool,
}

/// Matches publish calls to the broker's acknowledgements
///
/// Calls are queued in submission order. The client library emits one
/// outgoing publish event per request in that same order, which is when
/// the packet id becomes known.
#[derive(Default)]
pub struct AckTracker {
    queued: VecDeque<(QosLevel, oneshot::Sender<AckOutcome>)>,
    in_flight: HashMap<u16, InFlight>,
    /// Sent on a packet id the broker has not released yet; takes over the
    /// id once the current holder is acknowledged
    next_in_line: HashMap<u16, InFlight>,
    /// Packet ids whose waiters already failed; retransmits must not
    /// consume a queued waiter
    stale: HashSet<u16>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publish about to be handed to the client
    pub fn enqueue(&mut self, qos: QosLevel) -> oneshot::Receiver<AckOutcome> {
        let (tx, rx) = oneshot::channel();
        self.queued.push_back((qos, tx));
        rx
    }

    /// Drop the most recent registration after the client refused the request
    pub fn cancel_last(&mut self) {
        self.queued.pop_back();
    }

    pub fn publish_sent(&mut self, pkid: u16) {
        if pkid != 0 && self.stale.remove(&pkid) {
            debug!("Skipping retransmitted publish pkid={}", pkid);
            return;
        }

        let Some((qos, waiter)) = self.queued.pop_front() else {
            warn!("Publish pkid={} sent with no pending caller", pkid);
            return;
        };

        match qos {
            QosLevel::AtMostOnce => {
                let _ = waiter.send(Ok(()));
            }
            QosLevel::AtLeastOnce | QosLevel::ExactlyOnce => {
                let entry = InFlight {
                    waiter,
                    released: false,
                };
                if self.in_flight.contains_key(&pkid) {
                    debug!("Publish pkid={} reuses an unacknowledged id", pkid);
                    self.next_in_line.insert(pkid, entry);
                } else {
                    self.in_flight.insert(pkid, entry);
                }
            }
        }
    }

    pub fn puback(&mut self, pkid: u16, outcome: AckOutcome) {
        self.resolve(pkid, outcome);
    }

    pub fn pubrec(&mut self, pkid: u16, outcome: AckOutcome) {
        if outcome.is_err() {
            self.resolve(pkid, outcome);
        } else if let Some(entry) = self.in_flight.get_mut(&pkid) {
            entry.released = true;
        }
    }

    pub fn pubcomp(&mut self, pkid: u16, outcome: AckOutcome) {
        self.resolve(pkid, outcome);
    }

    /// Fail every publish already on the wire
    ///
    /// Queued calls stay queued: their requests are still buffered in the
    /// client and go out once the session is back. `retransmits` are the
    /// packet ids the client will resend; their waiters have failed here,
    /// so those resends must not claim a queued call.
    pub fn connection_lost(&mut self, reason: &str, retransmits: &HashSet<u16>) {
        let message = format!("connection lost before acknowledgement: {reason}");
        for (_, entry) in self.in_flight.drain().chain(self.next_in_line.drain()) {
            let _ = entry.waiter.send(Err(message.clone()));
        }
        self.stale = retransmits.clone();
    }

    /// Fail everything, used once the connection is gone for good
    pub fn fail_all(&mut self, reason: &str) {
        self.connection_lost(reason, &HashSet::new());
        for (_, waiter) in self.queued.drain(..) {
            let _ = waiter.send(Err(reason.to_string()));
        }
        self.stale.clear();
    }

    pub fn pending(&self) -> usize {
        self.queued.len() + self.in_flight.len() + self.next_in_line.len()
    }

    fn resolve(&mut self, pkid: u16, outcome: AckOutcome) {
        match self.in_flight.remove(&pkid) {
            Some(entry) => {
                let _ = entry.waiter.send(outcome);
                if let Some(next) = self.next_in_line.remove(&pkid) {
                    self.in_flight.insert(pkid, next);
                }
            }
            None => debug!("Acknowledgement for untracked pkid={}", pkid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, PubAck, PubComp, PubRec,
        PubRel, Publish,
    };
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_disconnect() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::ServerShuttingDown,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected {
                reason: "ServerShuttingDown".to_string()
            }
        );
    }

    #[test]
    fn test_route_publish_acknowledgements() {
        let puback = Event::Incoming(Packet::PubAck(PubAck {
            pkid: 7,
            reason: PubAckReason::NotAuthorized,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&puback),
            EventRoute::PublishAcknowledged {
                pkid: 7,
                outcome: Err("NotAuthorized".to_string())
            }
        );

        let pubrec = Event::Incoming(Packet::PubRec(PubRec {
            pkid: 8,
            reason: PubRecReason::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&pubrec),
            EventRoute::PublishReceived {
                pkid: 8,
                outcome: Ok(())
            }
        );

        let pubcomp = Event::Incoming(Packet::PubComp(PubComp {
            pkid: 8,
            reason: PubCompReason::PacketIdentifierNotFound,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&pubcomp),
            EventRoute::PublishCompleted { pkid: 8, outcome: Err(_) }
        ));
    }

    #[test]
    fn test_route_outgoing() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Publish(3))),
            EventRoute::PublishSent { pkid: 3 }
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::DisconnectSent
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        );
    }

    #[test]
    fn test_no_matching_subscribers_is_success() {
        assert!(MessageHandler::puback_outcome(&PubAckReason::NoMatchingSubscribers).is_ok());
        assert!(MessageHandler::pubrec_outcome(&PubRecReason::NoMatchingSubscribers).is_ok());
        assert!(MessageHandler::puback_outcome(&PubAckReason::QuotaExceeded).is_err());
    }

    #[test]
    fn test_qos0_resolves_when_sent() {
        let mut tracker = AckTracker::new();
        let mut rx = tracker.enqueue(QosLevel::AtMostOnce);
        assert!(rx.try_recv().is_err());

        tracker.publish_sent(0);
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_qos1_waits_for_puback() {
        let mut tracker = AckTracker::new();
        let mut rx = tracker.enqueue(QosLevel::AtLeastOnce);

        tracker.publish_sent(1);
        assert!(rx.try_recv().is_err());

        tracker.puback(1, Err("NotAuthorized".to_string()));
        assert_eq!(rx.try_recv().unwrap(), Err("NotAuthorized".to_string()));
    }

    #[test]
    fn test_qos2_waits_for_pubcomp() {
        let mut tracker = AckTracker::new();
        let mut rx = tracker.enqueue(QosLevel::ExactlyOnce);

        tracker.publish_sent(4);
        tracker.pubrec(4, Ok(()));
        assert!(rx.try_recv().is_err());

        tracker.pubcomp(4, Ok(()));
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_qos2_pubrec_failure_resolves_immediately() {
        let mut tracker = AckTracker::new();
        let mut rx = tracker.enqueue(QosLevel::ExactlyOnce);

        tracker.publish_sent(4);
        tracker.pubrec(4, Err("QuotaExceeded".to_string()));
        assert_eq!(rx.try_recv().unwrap(), Err("QuotaExceeded".to_string()));
    }

    #[test]
    fn test_waiters_bind_in_submission_order() {
        let mut tracker = AckTracker::new();
        let mut first = tracker.enqueue(QosLevel::AtLeastOnce);
        let mut second = tracker.enqueue(QosLevel::AtLeastOnce);

        tracker.publish_sent(10);
        tracker.publish_sent(11);
        tracker.puback(11, Ok(()));

        assert!(first.try_recv().is_err());
        assert_eq!(second.try_recv().unwrap(), Ok(()));

        tracker.puback(10, Err("UnspecifiedError".to_string()));
        assert!(first.try_recv().unwrap().is_err());
    }

    #[test]
    fn test_cancel_last_removes_registration() {
        let mut tracker = AckTracker::new();
        let _kept = tracker.enqueue(QosLevel::AtLeastOnce);
        let mut cancelled = tracker.enqueue(QosLevel::AtLeastOnce);

        tracker.cancel_last();
        assert_eq!(tracker.pending(), 1);
        assert!(matches!(
            cancelled.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_connection_lost_fails_in_flight_and_skips_retransmit() {
        let mut tracker = AckTracker::new();
        let mut lost = tracker.enqueue(QosLevel::AtLeastOnce);
        tracker.publish_sent(5);

        let mut queued = tracker.enqueue(QosLevel::AtLeastOnce);
        tracker.connection_lost("reset by peer", &HashSet::from([5]));

        let error = lost.try_recv().unwrap().unwrap_err();
        assert!(error.contains("reset by peer"));
        assert!(queued.try_recv().is_err());

        // retransmit of pkid 5, then the queued request
        tracker.publish_sent(5);
        tracker.publish_sent(6);
        tracker.puback(6, Ok(()));
        assert_eq!(queued.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_rejected_publish_is_not_treated_as_retransmit() {
        let mut tracker = AckTracker::new();
        let mut rejected = tracker.enqueue(QosLevel::AtLeastOnce);
        tracker.publish_sent(9);

        // the client drops a publish whose PUBACK carried a failure reason
        tracker.connection_lost(
            "Publish acknowledgement failed with reason 'NotAuthorized'",
            &HashSet::new(),
        );
        assert!(rejected.try_recv().unwrap().unwrap_err().contains("NotAuthorized"));

        let mut next = tracker.enqueue(QosLevel::AtLeastOnce);
        tracker.publish_sent(9);
        tracker.puback(9, Ok(()));
        assert_eq!(next.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_reused_packet_id_waits_for_current_holder() {
        let mut tracker = AckTracker::new();
        let mut first = tracker.enqueue(QosLevel::AtLeastOnce);
        let mut second = tracker.enqueue(QosLevel::AtLeastOnce);

        tracker.publish_sent(3);
        // resent on the same id once the broker frees it, reported before the ack
        tracker.publish_sent(3);
        assert_eq!(tracker.pending(), 2);

        tracker.puback(3, Ok(()));
        assert_eq!(first.try_recv().unwrap(), Ok(()));
        assert!(second.try_recv().is_err());

        tracker.puback(3, Err("QuotaExceeded".to_string()));
        assert_eq!(second.try_recv().unwrap(), Err("QuotaExceeded".to_string()));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_retransmitted_publish_ids_skip_fresh_requests() {
        let mut resent = Publish::new("t", QoS::AtLeastOnce, "x", None);
        resent.pkid = 12;
        let fresh = Publish::new("t", QoS::AtLeastOnce, "y", None);
        let pending = [
            Request::Publish(resent),
            Request::Publish(fresh),
            Request::PubRel(PubRel::new(4, None)),
        ];

        let ids = MessageHandler::retransmitted_publish_ids(&pending);
        assert_eq!(ids, HashSet::from([12]));
    }

    #[test]
    fn test_fail_all_drains_everything() {
        let mut tracker = AckTracker::new();
        let mut sent = tracker.enqueue(QosLevel::AtLeastOnce);
        tracker.publish_sent(1);
        let mut queued = tracker.enqueue(QosLevel::ExactlyOnce);

        tracker.fail_all("connection closed");
        assert!(sent.try_recv().unwrap().is_err());
        assert_eq!(
            queued.try_recv().unwrap(),
            Err("connection closed".to_string())
        );
        assert_eq!(tracker.pending(), 0);
    }
}
