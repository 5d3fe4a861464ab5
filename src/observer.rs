//! Bus subscribers - who gets told when a channel carries a payload
//!
//! A channel is just a name. Cognitons subscribe to the channels they list
//! as inputs; external observers subscribe through `Network::on` or
//! `Network::observe`. Every subscriber sees the same payload and timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;

/// Dynamically typed payload carried on every channel.
///
/// One envelope type for all channels keeps wiring free-form (any cogniton
/// may listen to any other); producers and consumers agree on shape by
/// convention.
pub type Payload = serde_json::Value;

/// Wall-clock time at which a payload was published.
pub type Timestamp = DateTime<Utc>;

/// A single payload as seen by a subscriber of one channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub channel: String,
    pub payload: Payload,
    pub timestamp: Timestamp,
}

/// Receiver of channel payloads
pub trait Subscriber: Send + Sync {
    /// Called once per publish on a channel this subscriber is registered to
    fn on_payload(&self, channel: &str, payload: &Payload, timestamp: Timestamp);
}

/// Function-based subscriber for simple cases
pub struct FnSubscriber<F: Fn(&Payload, Timestamp) + Send + Sync>(pub F);

impl<F: Fn(&Payload, Timestamp) + Send + Sync> Subscriber for FnSubscriber<F> {
    fn on_payload(&self, _channel: &str, payload: &Payload, timestamp: Timestamp) {
        (self.0)(payload, timestamp);
    }
}

/// Channel-based subscriber - forwards every delivery to an mpsc receiver
pub struct ChannelSubscriber {
    sender: Sender<Delivery>,
}

impl ChannelSubscriber {
    pub fn new(sender: Sender<Delivery>) -> Self {
        Self { sender }
    }
}

impl Subscriber for ChannelSubscriber {
    fn on_payload(&self, channel: &str, payload: &Payload, timestamp: Timestamp) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.sender.send(Delivery {
            channel: channel.to_string(),
            payload: payload.clone(),
            timestamp,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn test_fn_subscriber() {
        let hits = AtomicUsize::new(0);
        let subscriber = FnSubscriber(|payload: &Payload, _ts| {
            assert_eq!(payload, &json!(7));
            hits.fetch_add(1, Ordering::SeqCst);
        });

        subscriber.on_payload("a", &json!(7), Utc::now());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_channel_subscriber_forwards() {
        let (tx, rx) = mpsc::channel();
        let subscriber = ChannelSubscriber::new(tx);
        let now = Utc::now();

        subscriber.on_payload("sensor", &json!({"v": 1}), now);

        let delivery = rx.try_recv().unwrap();
        assert_eq!(delivery.channel, "sensor");
        assert_eq!(delivery.payload, json!({"v": 1}));
        assert_eq!(delivery.timestamp, now);
    }

    #[test]
    fn test_channel_subscriber_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        ChannelSubscriber::new(tx).on_payload("x", &json!(null), Utc::now());
    }
}
