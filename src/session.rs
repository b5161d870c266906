// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{Packet, PacketId, PublishReleasePacket};
use std::collections::HashSet;

use crate::error::{Error, ErrorKind};
use crate::inflight::{InflightEntry, InflightStore, QosState};
use crate::packet_id::PacketIdAllocator;

/// Per-connection session state which survives reconnects while the server
/// reports `Session Present` = 1.
///
/// Holds the outbound inflight store, the inbound QoS 2 deduplication set and
/// the packet id allocator.
#[derive(Default)]
pub struct SessionState {
    allocator: PacketIdAllocator,
    outbound: InflightStore,

    /// Inbound QoS 2 publishes acknowledged with PUBREC but not yet released
    /// with PUBREL.
    inbound_dedup: HashSet<u16>,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocator_mut(&mut self) -> &mut PacketIdAllocator {
        &mut self.allocator
    }

    pub fn outbound_mut(&mut self) -> &mut InflightStore {
        &mut self.outbound
    }

    #[must_use]
    pub fn outbound(&self) -> &InflightStore {
        &self.outbound
    }

    /// Number of unacknowledged outbound QoS >= 1 publishes, for the v5
    /// flow control window.
    #[must_use]
    pub fn outbound_in_flight(&self) -> usize {
        self.outbound.len()
    }

    /// Record an inbound QoS 2 packet id. Returns false if the id is already
    /// present, which marks the publish as a duplicate delivery.
    pub fn dedup_insert(&mut self, packet_id: PacketId) -> bool {
        self.inbound_dedup.insert(packet_id.value())
    }

    /// Forget an inbound QoS 2 packet id after PUBREL.
    ///
    /// Returns false if the id was unknown.
    pub fn dedup_remove(&mut self, packet_id: PacketId) -> bool {
        self.inbound_dedup.remove(&packet_id.value())
    }

    /// Number of inbound QoS 2 publishes between PUBREC and PUBREL.
    #[must_use]
    pub fn inbound_in_flight(&self) -> usize {
        self.inbound_dedup.len()
    }

    /// Packets to retransmit after a reconnect with `Session Present` = 1:
    /// unacknowledged PUBLISHes with DUP set, then PUBRELs, in original send
    /// order.
    ///
    /// # Errors
    ///
    /// Returns error if a stored packet cannot be updated.
    pub fn replay_packets(&mut self) -> Result<Vec<Packet>, Error> {
        let mut packets = Vec::new();
        for entry in self.outbound.iter_send_order() {
            match entry.state() {
                QosState::PublishSent => {
                    let mut packet = entry.packet().clone();
                    packet.set_dup(true).map_err(Error::from)?;
                    packets.push(Packet::Publish(packet));
                }
                QosState::ReleaseSent | QosState::RecordReceived => {
                    packets.push(Packet::PublishRelease(PublishReleasePacket::new(
                        entry.packet_id(),
                    )));
                }
                QosState::PublishReceived => {}
            }
        }
        Ok(packets)
    }

    /// Discard the whole session after the server reported
    /// `Session Present` = 0.
    ///
    /// Pending waiters are failed with `SessionReset`; inbound entries and
    /// all packet ids are dropped.
    pub fn reset(&mut self) {
        let entries: Vec<InflightEntry> = self.outbound.drain();
        for mut entry in entries {
            if let Some(waiter) = entry.take_waiter() {
                let _ = waiter.send(Err(Error::new(
                    ErrorKind::SessionReset,
                    "Session state was discarded after reconnect",
                )));
            }
        }
        self.inbound_dedup.clear();
        self.allocator.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{PublishPacket, QoS};

    #[test]
    fn test_replay_marks_dup() {
        let mut session = SessionState::new();
        let mut packet = PublishPacket::new("m1", QoS::AtLeastOnce, b"payload").unwrap();
        let packet_id = session.allocator_mut().allocate().unwrap();
        packet.set_packet_id(packet_id);
        session
            .outbound_mut()
            .insert(packet_id, packet, QosState::PublishSent, None);

        let packets = session.replay_packets().unwrap();
        assert_eq!(packets.len(), 1);
        match &packets[0] {
            Packet::Publish(publish) => {
                assert!(publish.dup());
                assert_eq!(publish.packet_id(), packet_id);
                assert_eq!(publish.message(), b"payload");
            }
            other => panic!("expected publish, got {other:?}"),
        }
    }

    #[test]
    fn test_replay_resends_pubrel() {
        let mut session = SessionState::new();
        let mut packet = PublishPacket::new("m2", QoS::ExactOnce, b"x").unwrap();
        let packet_id = session.allocator_mut().allocate().unwrap();
        packet.set_packet_id(packet_id);
        session
            .outbound_mut()
            .insert(packet_id, packet, QosState::ReleaseSent, None);

        let packets = session.replay_packets().unwrap();
        assert_eq!(packets.len(), 1);
        assert!(matches!(packets[0], Packet::PublishRelease(_)));
    }

    #[test]
    fn test_dedup_set() {
        let mut session = SessionState::new();
        let id = PacketId::new(5);
        assert!(session.dedup_insert(id));
        assert!(!session.dedup_insert(id));
        assert!(session.dedup_remove(id));
        assert!(!session.dedup_remove(id));
    }
}
