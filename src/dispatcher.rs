// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{PacketId, Properties, QoS};
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot};

use crate::commands::{SubscribeResult, UnsubscribeResult};
use crate::error::Error;

/// Capacity of each listener channel. A listener that falls this far behind
/// starts losing messages instead of blocking the engine.
const LISTENER_CHANNEL_CAPACITY: usize = 64;

/// An application message delivered to publish listeners.
#[derive(Debug, Clone)]
pub struct PublishMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,

    /// v5 publish properties, empty under v3.1.1.
    pub properties: Properties,
}

struct PublishListener {
    tx: mpsc::Sender<PublishMessage>,

    /// Deliver only publishes carrying one of these subscription identifiers.
    /// `None` delivers everything.
    subscription_ids: Option<HashSet<usize>>,

    dropped: u64,
}

/// Demultiplexes acknowledgements to request waiters and publishes to
/// listeners.
///
/// SUBSCRIBE and UNSUBSCRIBE are correlated by packet id here; publish flows
/// keep their waiters inside the inflight store because those entries also
/// replay. CONNACK, PINGRESP and AUTH have single well-known waiters in the
/// engine itself.
#[derive(Default)]
pub struct Dispatcher {
    listeners: HashMap<String, PublishListener>,
    pending_subscribes: HashMap<PacketId, oneshot::Sender<SubscribeResult>>,
    pending_unsubscribes: HashMap<PacketId, oneshot::Sender<UnsubscribeResult>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named listener and hand back its receiving channel.
    ///
    /// Re-registering a name replaces the previous listener.
    pub fn add_listener(
        &mut self,
        name: &str,
        subscription_ids: Option<HashSet<usize>>,
    ) -> mpsc::Receiver<PublishMessage> {
        let (tx, rx) = mpsc::channel(LISTENER_CHANNEL_CAPACITY);
        self.listeners.insert(
            name.to_string(),
            PublishListener {
                tx,
                subscription_ids,
                dropped: 0,
            },
        );
        rx
    }

    /// Remove a listener by name. Returns false if the name is unknown.
    pub fn remove_listener(&mut self, name: &str) -> bool {
        self.listeners.remove(name).is_some()
    }

    /// Deliver `msg` to all listeners matching its subscription identifiers.
    ///
    /// Delivery is best effort per listener: a full channel drops the message
    /// for that listener rather than blocking the engine. Listeners whose
    /// receiver is gone are removed.
    pub fn deliver(&mut self, msg: &PublishMessage) {
        let publish_ids = msg.properties.subscription_identifiers();
        let mut gone = Vec::new();
        for (name, listener) in &mut self.listeners {
            if let Some(filter) = &listener.subscription_ids {
                // Publishes without identifiers are delivered unconditionally.
                if !publish_ids.is_empty() && !publish_ids.iter().any(|id| filter.contains(id)) {
                    continue;
                }
            }
            match listener.tx.try_send(msg.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_msg)) => {
                    listener.dropped += 1;
                    log::warn!(
                        "dispatcher: listener {name} is full, dropped {} messages",
                        listener.dropped
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_msg)) => {
                    gone.push(name.clone());
                }
            }
        }
        for name in gone {
            self.listeners.remove(&name);
        }
    }

    /// Register the waiter of an outgoing SUBSCRIBE.
    pub fn insert_subscribe(&mut self, packet_id: PacketId, tx: oneshot::Sender<SubscribeResult>) {
        self.pending_subscribes.insert(packet_id, tx);
    }

    /// Resolve a SUBSCRIBE waiter. Returns false if the id is unknown.
    pub fn resolve_subscribe(&mut self, packet_id: PacketId, result: SubscribeResult) -> bool {
        match self.pending_subscribes.remove(&packet_id) {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Register the waiter of an outgoing UNSUBSCRIBE.
    pub fn insert_unsubscribe(
        &mut self,
        packet_id: PacketId,
        tx: oneshot::Sender<UnsubscribeResult>,
    ) {
        self.pending_unsubscribes.insert(packet_id, tx);
    }

    /// Resolve an UNSUBSCRIBE waiter. Returns false if the id is unknown.
    pub fn resolve_unsubscribe(&mut self, packet_id: PacketId, result: UnsubscribeResult) -> bool {
        match self.pending_unsubscribes.remove(&packet_id) {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Cancel a pending request before transmission, releasing its waiter.
    pub fn cancel(&mut self, packet_id: PacketId) {
        self.pending_subscribes.remove(&packet_id);
        self.pending_unsubscribes.remove(&packet_id);
    }

    /// Packet ids of every pending subscribe and unsubscribe.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<PacketId> {
        self.pending_subscribes
            .keys()
            .chain(self.pending_unsubscribes.keys())
            .copied()
            .collect()
    }

    /// Returns true if no subscribe or unsubscribe awaits its ack.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.pending_subscribes.is_empty() && self.pending_unsubscribes.is_empty()
    }

    /// Connection death: fail every waiter with `err`.
    pub fn fail_all(&mut self, err: &Error) {
        for (_id, tx) in self.pending_subscribes.drain() {
            let _ = tx.send(Err(err.clone()));
        }
        for (_id, tx) in self.pending_unsubscribes.drain() {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{Property, VarInt};

    fn message(subscription_id: Option<usize>) -> PublishMessage {
        let mut properties = Properties::new();
        if let Some(id) = subscription_id {
            properties
                .push(Property::SubscriptionIdentifier(VarInt::from(id).unwrap()))
                .unwrap();
        }
        PublishMessage {
            topic: "t/a".to_string(),
            payload: b"x".to_vec(),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            properties,
        }
    }

    #[tokio::test]
    async fn test_deliver_unfiltered() {
        let mut dispatcher = Dispatcher::new();
        let mut rx = dispatcher.add_listener("all", None);
        dispatcher.deliver(&message(None));
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "t/a");
    }

    #[tokio::test]
    async fn test_deliver_subscription_id_filter() {
        let mut dispatcher = Dispatcher::new();
        let mut rx_match = dispatcher.add_listener("match", Some(HashSet::from([7])));
        let mut rx_miss = dispatcher.add_listener("miss", Some(HashSet::from([9])));

        dispatcher.deliver(&message(Some(7)));
        assert!(rx_match.try_recv().is_ok());
        assert!(rx_miss.try_recv().is_err());

        // A publish without identifiers reaches both.
        dispatcher.deliver(&message(None));
        assert!(rx_match.try_recv().is_ok());
        assert!(rx_miss.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_slow_listener_drops() {
        let mut dispatcher = Dispatcher::new();
        let _rx = dispatcher.add_listener("slow", None);
        for _ in 0..(LISTENER_CHANNEL_CAPACITY + 8) {
            dispatcher.deliver(&message(None));
        }
        let listener = dispatcher.listeners.get("slow").unwrap();
        assert_eq!(listener.dropped, 8);
    }

    #[tokio::test]
    async fn test_subscribe_resolution() {
        let mut dispatcher = Dispatcher::new();
        let (tx, rx) = oneshot::channel();
        dispatcher.insert_subscribe(PacketId::new(3), tx);
        assert!(dispatcher.resolve_subscribe(PacketId::new(3), Ok(vec![])));
        assert!(!dispatcher.resolve_subscribe(PacketId::new(3), Ok(vec![])));
        assert!(rx.await.unwrap().is_ok());
    }
}
