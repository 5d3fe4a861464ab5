//! Channel Bus - named broadcast channels shared by one network
//!
//! Every publish walks an immutable snapshot of the channel's subscriber list,
//! so subscribers may publish (or subscribe) from inside a delivery without
//! disturbing the iteration in progress.
//!
//! Dispatch is serialised: one thread delivers at a time. A publish from
//! another thread waits for the running dispatch to finish, then delivers its
//! own payload before returning.
//!
//! ## Dispatch order
//!
//! - **BreadthFirst**: the subscriber list is captured at publish time and
//!   queued with the payload. The outermost publish on the dispatching thread
//!   drains the queue; re-entrant publishes on that thread are appended and
//!   delivered after the current fan-out.
//! - **DepthFirst**: every publish delivers immediately, recursing through
//!   reaction chains.

use crate::config::DispatchOrder;
use crate::observer::{Delivery, FnSubscriber, Payload, Subscriber, Timestamp};
use chrono::Utc;
use parking_lot::{ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    subscriber: Arc<dyn Subscriber>,
}

/// Bus counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub channels: usize,
    pub subscriptions: usize,
}

/// Publish/subscribe registry.
pub struct ChannelBus {
    order: DispatchOrder,
    channels: RwLock<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
    dispatch: ReentrantMutex<RefCell<Dispatch>>,
    published: AtomicU64,
    delivered: AtomicU64,
}

/// A queued payload together with the subscribers it was published to.
struct Pending {
    subscribers: Vec<Arc<dyn Subscriber>>,
    delivery: Delivery,
}

/// Breadth-first work queue, only touched by the thread holding the
/// dispatch lock.
#[derive(Default)]
struct Dispatch {
    queue: VecDeque<Pending>,
    draining: bool,
}

/// Clears the drain flag even if a subscriber panics mid-delivery.
struct DrainGuard<'a>(&'a RefCell<Dispatch>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().draining = false;
    }
}

impl ChannelBus {
    pub fn new(order: DispatchOrder) -> Self {
        Self {
            order,
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            dispatch: ReentrantMutex::new(RefCell::new(Dispatch::default())),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn order(&self) -> DispatchOrder {
        self.order
    }

    // =========================================================================
    // SUBSCRIPTION
    // =========================================================================

    /// Append a subscriber to a channel's list.
    pub fn subscribe(&self, channel: impl Into<String>, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let channel = channel.into();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(channel = %channel, subscription = id.0, "subscribe");

        self.channels
            .write()
            .entry(channel)
            .or_default()
            .push(Subscription { id, subscriber });
        id
    }

    /// Subscribe a closure.
    pub fn subscribe_fn<F>(&self, channel: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Payload, Timestamp) + Send + Sync + 'static,
    {
        self.subscribe(channel, Arc::new(FnSubscriber(handler)))
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut channels = self.channels.write();
        let mut found = None;
        for (name, subs) in channels.iter_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                found = Some((name.clone(), subs.is_empty()));
                break;
            }
        }

        match found {
            Some((name, now_empty)) => {
                if now_empty {
                    channels.remove(&name);
                }
                debug!(channel = %name, subscription = id.0, "unsubscribe");
                true
            }
            None => false,
        }
    }

    /// Number of subscribers currently registered on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.read().get(channel).map_or(0, Vec::len)
    }

    // =========================================================================
    // PUBLISHING
    // =========================================================================

    /// Notify every subscriber of `channel`, in subscription order.
    ///
    /// Publishing to a channel without subscribers is a no-op. Returns once
    /// the payload has been delivered, except for re-entrant breadth-first
    /// publishes, which the enclosing drain delivers.
    pub fn publish(&self, channel: &str, payload: Payload) {
        let timestamp = Utc::now();
        self.published.fetch_add(1, Ordering::Relaxed);
        trace!(channel, "publish");

        let subscribers = self.snapshot(channel);
        let dispatch = self.dispatch.lock();

        match self.order {
            DispatchOrder::DepthFirst => {
                self.deliver(&subscribers, channel, &payload, timestamp);
            }
            DispatchOrder::BreadthFirst => {
                let drain_here = {
                    let mut state = dispatch.borrow_mut();
                    state.queue.push_back(Pending {
                        subscribers,
                        delivery: Delivery {
                            channel: channel.to_string(),
                            payload,
                            timestamp,
                        },
                    });
                    !std::mem::replace(&mut state.draining, true)
                };
                if drain_here {
                    self.drain(&*dispatch);
                }
            }
        }
    }

    fn drain(&self, dispatch: &RefCell<Dispatch>) {
        let _guard = DrainGuard(dispatch);
        loop {
            let next = dispatch.borrow_mut().queue.pop_front();
            let Some(Pending { subscribers, delivery }) = next else {
                break;
            };
            self.deliver(
                &subscribers,
                &delivery.channel,
                &delivery.payload,
                delivery.timestamp,
            );
        }
    }

    fn snapshot(&self, channel: &str) -> Vec<Arc<dyn Subscriber>> {
        self.channels
            .read()
            .get(channel)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.subscriber)).collect())
            .unwrap_or_default()
    }

    fn deliver(
        &self,
        subscribers: &[Arc<dyn Subscriber>],
        channel: &str,
        payload: &Payload,
        timestamp: Timestamp,
    ) {
        for subscriber in subscribers {
            subscriber.on_payload(channel, payload, timestamp);
        }
        self.delivered
            .fetch_add(subscribers.len() as u64, Ordering::Relaxed);
    }

    // =========================================================================
    // METRICS
    // =========================================================================

    pub fn stats(&self) -> BusStats {
        let channels = self.channels.read();
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            channels: channels.len(),
            subscriptions: channels.values().map(Vec::len).sum(),
        }
    }
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new(DispatchOrder::default())
    }
}

impl fmt::Debug for ChannelBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBus")
            .field("order", &self.order)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ChannelSubscriber;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::mpsc;

    fn recorder(bus: &ChannelBus, channel: &str, tag: &'static str, log: &Arc<Mutex<Vec<String>>>) {
        let log = Arc::clone(log);
        bus.subscribe_fn(channel, move |payload, _| {
            log.lock().push(format!("{tag}:{payload}"));
        });
    }

    #[test]
    fn test_publish_in_subscription_order() {
        let bus = ChannelBus::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&bus, "a", "first", &log);
        recorder(&bus, "a", "second", &log);

        bus.publish("a", json!(1));

        assert_eq!(*log.lock(), vec!["first:1", "second:1"]);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = ChannelBus::default();
        bus.publish("nobody", json!("hello"));

        let stats = bus.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = ChannelBus::default();
        let (tx, rx) = mpsc::channel();
        let id = bus.subscribe("a", Arc::new(ChannelSubscriber::new(tx)));

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count("a"), 0);

        bus.publish("a", json!(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_breadth_first_reentrant_publish() {
        let bus = Arc::new(ChannelBus::new(DispatchOrder::BreadthFirst));
        let log = Arc::new(Mutex::new(Vec::new()));

        // "a" fans out to two subscribers, the first of which republishes on "b"
        {
            let weak = Arc::downgrade(&bus);
            let log = Arc::clone(&log);
            bus.subscribe_fn("a", move |_, _| {
                log.lock().push("a1".to_string());
                if let Some(bus) = weak.upgrade() {
                    bus.publish("b", json!(null));
                }
            });
        }
        recorder(&bus, "a", "a2", &log);
        recorder(&bus, "b", "b", &log);

        bus.publish("a", json!(0));

        assert_eq!(*log.lock(), vec!["a1", "a2:0", "b:null"]);
    }

    #[test]
    fn test_depth_first_reentrant_publish() {
        let bus = Arc::new(ChannelBus::new(DispatchOrder::DepthFirst));
        let log = Arc::new(Mutex::new(Vec::new()));

        {
            let weak = Arc::downgrade(&bus);
            let log = Arc::clone(&log);
            bus.subscribe_fn("a", move |_, _| {
                log.lock().push("a1".to_string());
                if let Some(bus) = weak.upgrade() {
                    bus.publish("b", json!(null));
                }
            });
        }
        recorder(&bus, "a", "a2", &log);
        recorder(&bus, "b", "b", &log);

        bus.publish("a", json!(0));

        assert_eq!(*log.lock(), vec!["a1", "b:null", "a2:0"]);
    }

    #[test]
    fn test_subscribe_during_delivery_uses_snapshot() {
        let bus = Arc::new(ChannelBus::default());
        let late_hits = Arc::new(Mutex::new(0));

        {
            let weak = Arc::downgrade(&bus);
            let late_hits = Arc::clone(&late_hits);
            bus.subscribe_fn("a", move |_, _| {
                if let Some(bus) = weak.upgrade() {
                    let late_hits = Arc::clone(&late_hits);
                    bus.subscribe_fn("a", move |_, _| *late_hits.lock() += 1);
                }
            });
        }

        bus.publish("a", json!(1));
        // The subscriber added mid-delivery only sees later publishes
        assert_eq!(*late_hits.lock(), 0);

        bus.publish("a", json!(2));
        assert_eq!(*late_hits.lock(), 1);
    }

    #[test]
    fn test_queued_delivery_keeps_publish_time_subscribers() {
        let bus = Arc::new(ChannelBus::new(DispatchOrder::BreadthFirst));
        let late_hits = Arc::new(Mutex::new(0));
        let early_hits = Arc::new(Mutex::new(0));
        {
            let early_hits = Arc::clone(&early_hits);
            bus.subscribe_fn("b", move |_, _| *early_hits.lock() += 1);
        }

        // Publishes on "b" while "a" is still being delivered, then subscribes
        // to "b" before the queued payload is drained
        {
            let weak = Arc::downgrade(&bus);
            let late_hits = Arc::clone(&late_hits);
            bus.subscribe_fn("a", move |_, _| {
                if let Some(bus) = weak.upgrade() {
                    bus.publish("b", json!("queued"));
                    let late_hits = Arc::clone(&late_hits);
                    bus.subscribe_fn("b", move |_, _| *late_hits.lock() += 1);
                }
            });
        }

        bus.publish("a", json!(1));

        assert_eq!(*early_hits.lock(), 1);
        assert_eq!(*late_hits.lock(), 0);
    }

    #[test]
    fn test_publish_from_other_thread_waits_for_running_dispatch() {
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let bus = Arc::new(ChannelBus::default());
        let heard = Arc::new(Mutex::new(Vec::new()));
        {
            let heard = Arc::clone(&heard);
            bus.subscribe_fn("fast", move |payload, _| heard.lock().push(payload.clone()));
        }

        let (entered_tx, entered_rx) = mpsc::channel();
        bus.subscribe_fn("slow", move |_, _| {
            let _ = entered_tx.send(());
            thread::sleep(Duration::from_millis(50));
        });

        let slow_bus = Arc::clone(&bus);
        let worker = thread::spawn(move || slow_bus.publish("slow", json!(null)));
        entered_rx.recv().unwrap();

        bus.publish("fast", json!(42));
        // Delivered on this thread before publish returned
        assert_eq!(*heard.lock(), vec![json!(42)]);

        worker.join().unwrap();
    }

    #[test]
    fn test_stats() {
        let bus = ChannelBus::default();
        bus.subscribe_fn("a", |_, _| {});
        bus.subscribe_fn("a", |_, _| {});
        bus.subscribe_fn("b", |_, _| {});

        bus.publish("a", json!(1));

        let stats = bus.stats();
        assert_eq!(stats.channels, 2);
        assert_eq!(stats.subscriptions, 3);
        assert_eq!(stats.delivered, 2);
    }
}
