// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::HashMap;

/// Result of asking for an outbound topic alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasAssignment {
    /// First use: send both topic name and alias to set the mapping.
    Fresh(u16),

    /// Mapping already known to the peer: elide the topic name.
    Known(u16),
}

/// Topic alias mappings of one connection, v5 only.
///
/// The outbound map is bounded by the server's `Topic Alias Maximum` with
/// least-recently-used eviction. The inbound map is populated from peer
/// PUBLISH packets up to our advertised ceiling. Mappings never survive a
/// reconnect.
#[derive(Debug, Default)]
pub struct TopicAliasRegistry {
    /// topic name -> alias.
    outbound: HashMap<String, u16>,

    /// alias -> (topic name, last-used tick) for LRU eviction.
    outbound_by_alias: HashMap<u16, (String, u64)>,

    outbound_max: u16,

    /// alias -> topic name, from peer publishes.
    inbound: HashMap<u16, String>,

    inbound_max: u16,

    tick: u64,
}

impl TopicAliasRegistry {
    #[must_use]
    pub fn new(outbound_max: u16, inbound_max: u16) -> Self {
        Self {
            outbound_max,
            inbound_max,
            ..Self::default()
        }
    }

    /// Update the outbound ceiling from the server's CONNACK.
    pub fn set_outbound_max(&mut self, outbound_max: u16) {
        self.outbound_max = outbound_max;
    }

    /// Drop all mappings. Called on reconnect, aliases only live for one
    /// network connection [MQTT-3.3.2-7].
    pub fn reset(&mut self) {
        self.outbound.clear();
        self.outbound_by_alias.clear();
        self.inbound.clear();
        self.tick = 0;
    }

    /// Assign or reuse an outbound alias for `topic`.
    ///
    /// Returns `None` if the server accepts no aliases. When the alias space
    /// is full, the least recently used mapping is rebound to this topic.
    pub fn assign_outbound(&mut self, topic: &str) -> Option<AliasAssignment> {
        if self.outbound_max == 0 {
            return None;
        }
        self.tick += 1;

        if let Some(&alias) = self.outbound.get(topic) {
            if let Some(slot) = self.outbound_by_alias.get_mut(&alias) {
                slot.1 = self.tick;
            }
            return Some(AliasAssignment::Known(alias));
        }

        #[allow(clippy::cast_possible_truncation)]
        let used = self.outbound_by_alias.len() as u16;
        let alias = if used < self.outbound_max {
            // Aliases start at 1; 0 is illegal on the wire.
            used + 1
        } else {
            // Evict the least recently used mapping.
            let (&alias, _) = self
                .outbound_by_alias
                .iter()
                .min_by_key(|(_alias, (_topic, tick))| *tick)?;
            if let Some((old_topic, _tick)) = self.outbound_by_alias.remove(&alias) {
                self.outbound.remove(&old_topic);
            }
            alias
        };

        self.outbound.insert(topic.to_string(), alias);
        self.outbound_by_alias
            .insert(alias, (topic.to_string(), self.tick));
        Some(AliasAssignment::Fresh(alias))
    }

    /// Resolve an inbound publish carrying `alias` and possibly a topic name.
    ///
    /// A non-empty topic sets or replaces the mapping. An empty topic looks
    /// the mapping up; `None` means the alias is unknown and the connection
    /// must close with reason 0x94.
    pub fn resolve_inbound(&mut self, alias: u16, topic: &str) -> Option<String> {
        if alias == 0 || alias > self.inbound_max {
            return None;
        }
        if topic.is_empty() {
            self.inbound.get(&alias).cloned()
        } else {
            self.inbound.insert(alias, topic.to_string());
            Some(topic.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_alias_reuse() {
        let mut registry = TopicAliasRegistry::new(4, 0);
        assert_eq!(
            registry.assign_outbound("a/b"),
            Some(AliasAssignment::Fresh(1))
        );
        assert_eq!(
            registry.assign_outbound("a/b"),
            Some(AliasAssignment::Known(1))
        );
        assert_eq!(
            registry.assign_outbound("c/d"),
            Some(AliasAssignment::Fresh(2))
        );
    }

    #[test]
    fn test_outbound_alias_lru_eviction() {
        let mut registry = TopicAliasRegistry::new(2, 0);
        registry.assign_outbound("one");
        registry.assign_outbound("two");
        // Touch "one" so "two" becomes the eviction candidate.
        registry.assign_outbound("one");

        assert_eq!(
            registry.assign_outbound("three"),
            Some(AliasAssignment::Fresh(2))
        );
        // "two" lost its alias and gets a fresh assignment on next use.
        assert_eq!(
            registry.assign_outbound("two"),
            Some(AliasAssignment::Fresh(1))
        );
    }

    #[test]
    fn test_alias_disabled() {
        let mut registry = TopicAliasRegistry::new(0, 0);
        assert_eq!(registry.assign_outbound("a"), None);
    }

    #[test]
    fn test_inbound_alias_resolution() {
        let mut registry = TopicAliasRegistry::new(0, 8);
        assert_eq!(registry.resolve_inbound(2, "t/x"), Some("t/x".to_string()));
        assert_eq!(registry.resolve_inbound(2, ""), Some("t/x".to_string()));
        // Unknown alias.
        assert_eq!(registry.resolve_inbound(3, ""), None);
        // Above the advertised ceiling.
        assert_eq!(registry.resolve_inbound(9, "t/y"), None);
    }
}
