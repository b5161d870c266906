// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{PacketId, ProtocolVersion, PublishPacket};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::oneshot;

use crate::commands::PublishResult;

/// Acknowledgement progress of one outbound publish flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosState {
    /// PUBLISH sent, awaiting PUBACK (QoS 1) or PUBREC (QoS 2).
    PublishSent,

    /// Inbound QoS 2 PUBLISH accepted, awaiting PUBREL.
    PublishReceived,

    /// PUBREC received and PUBREL sent, awaiting PUBCOMP.
    ReleaseSent,

    /// PUBREC received, PUBREL not yet sent.
    RecordReceived,
}

/// One unacknowledged outbound publish flow.
pub struct InflightEntry {
    packet_id: PacketId,

    /// The original packet, kept unmodified so a replay carries the same
    /// payload and properties. The DUP flag is set at transmission time.
    packet: PublishPacket,

    state: QosState,

    /// Completion handle of the caller awaiting the acknowledgement chain.
    waiter: Option<oneshot::Sender<PublishResult>>,

    sent_at: Instant,

    /// Send order, used to replay in the original order.
    seq: u64,
}

impl InflightEntry {
    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub const fn packet(&self) -> &PublishPacket {
        &self.packet
    }

    #[must_use]
    pub const fn state(&self) -> QosState {
        self.state
    }

    #[must_use]
    pub const fn sent_at(&self) -> Instant {
        self.sent_at
    }

    /// Take the completion handle out of the entry.
    pub fn take_waiter(&mut self) -> Option<oneshot::Sender<PublishResult>> {
        self.waiter.take()
    }
}

/// Map of packet id to unacknowledged outbound publish flows.
///
/// Inbound QoS 2 deduplication is a plain id set and lives in the session,
/// as the server side retransmits its own packets.
#[derive(Default)]
pub struct InflightStore {
    entries: HashMap<PacketId, InflightEntry>,
    next_seq: u64,
}

impl InflightStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly sent publish flow.
    pub fn insert(
        &mut self,
        packet_id: PacketId,
        packet: PublishPacket,
        state: QosState,
        waiter: Option<oneshot::Sender<PublishResult>>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            packet_id,
            InflightEntry {
                packet_id,
                packet,
                state,
                waiter,
                sent_at: Instant::now(),
                seq,
            },
        );
    }

    #[must_use]
    pub fn contains(&self, packet_id: PacketId) -> bool {
        self.entries.contains_key(&packet_id)
    }

    #[must_use]
    pub fn get(&self, packet_id: PacketId) -> Option<&InflightEntry> {
        self.entries.get(&packet_id)
    }

    /// Update the QoS state of an entry and refresh its transmit timestamp.
    ///
    /// Returns false if the id is unknown.
    pub fn transition(&mut self, packet_id: PacketId, state: QosState) -> bool {
        match self.entries.get_mut(&packet_id) {
            Some(entry) => {
                entry.state = state;
                entry.sent_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove an entry, returning it for waiter resolution.
    pub fn remove(&mut self, packet_id: PacketId) -> Option<InflightEntry> {
        self.entries.remove(&packet_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain every entry, in no particular order. Used to fail waiters on
    /// connection death.
    pub fn drain(&mut self) -> Vec<InflightEntry> {
        self.entries.drain().map(|(_id, entry)| entry).collect()
    }

    /// Entries in original send order, for replay after reconnect.
    pub fn iter_send_order(&mut self) -> Vec<&mut InflightEntry> {
        let mut entries: Vec<&mut InflightEntry> = self.entries.values_mut().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
    }

    /// Ordered (packet id, raw packet bytes, state) triples for an optional
    /// journaling adapter.
    ///
    /// # Errors
    ///
    /// Returns error if a stored packet cannot be re-encoded.
    pub fn snapshot(
        &self,
        version: ProtocolVersion,
    ) -> Result<Vec<(u16, Vec<u8>, QosState)>, codec::EncodeError> {
        let mut entries: Vec<&InflightEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut buf = Vec::new();
            entry.packet.encode(&mut buf, version)?;
            out.push((entry.packet_id.value(), buf, entry.state));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;

    fn publish(topic: &str, packet_id: u16) -> PublishPacket {
        let mut packet = PublishPacket::new(topic, QoS::AtLeastOnce, b"payload").unwrap();
        packet.set_packet_id(PacketId::new(packet_id));
        packet
    }

    #[test]
    fn test_replay_preserves_send_order() {
        let mut store = InflightStore::new();
        store.insert(PacketId::new(2), publish("b", 2), QosState::PublishSent, None);
        store.insert(PacketId::new(1), publish("a", 1), QosState::PublishSent, None);
        store.insert(PacketId::new(3), publish("c", 3), QosState::PublishSent, None);

        let order: Vec<u16> = store
            .iter_send_order()
            .iter()
            .map(|entry| entry.packet_id().value())
            .collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn test_transition_and_remove() {
        let mut store = InflightStore::new();
        store.insert(PacketId::new(5), publish("t", 5), QosState::PublishSent, None);
        assert!(store.transition(PacketId::new(5), QosState::ReleaseSent));
        assert_eq!(
            store.get(PacketId::new(5)).unwrap().state(),
            QosState::ReleaseSent
        );
        assert!(!store.transition(PacketId::new(6), QosState::ReleaseSent));

        let entry = store.remove(PacketId::new(5)).unwrap();
        assert_eq!(entry.packet_id().value(), 5);
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_encodes_packets() {
        let mut store = InflightStore::new();
        store.insert(PacketId::new(1), publish("t", 1), QosState::PublishSent, None);
        let snapshot = store.snapshot(ProtocolVersion::V311).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, 1);
        assert_eq!(snapshot[0].1[0], 0x32);
    }
}
