use std::array;

use bytes::Bytes;

use mqttsn_core::{
    QoS, TopicId, MAX_GATEWAY_TOPICS, MAX_TOPIC_NAME_LEN, TOPIC_NOT_ASSIGNED, TOPIC_UNSUBSCRIBED,
};

/// One topic name the gateway has handed an id out for.
///
/// The mapping also remembers whether the name is subscribed on the upstream
/// broker and at what granted qos, so subscriptions can be aggregated across
/// clients and replayed after a broker reconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMapping {
    pub(crate) name: Bytes,
    pub(crate) topic_id: TopicId,
    pub(crate) subscribed: bool,
    pub(crate) sub_qos: QoS,
}

impl TopicMapping {
    fn vacant() -> Self {
        TopicMapping {
            name: Bytes::new(),
            topic_id: TOPIC_NOT_ASSIGNED,
            subscribed: false,
            sub_qos: QoS::AtMostOnce,
        }
    }

    /// The topic name.
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// The assigned topic id.
    pub fn topic_id(&self) -> TopicId {
        self.topic_id
    }

    /// Whether the name is currently subscribed upstream.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }
}

/// The gateway's fixed-size table of topic-name mappings.
///
/// Ids are derived from the slot index and are stable for the life of the
/// process; nothing is ever garbage-collected.
pub struct TopicRegistry {
    mappings: [TopicMapping; MAX_GATEWAY_TOPICS],
}

impl Default for TopicRegistry {
    fn default() -> Self {
        TopicRegistry {
            mappings: array::from_fn(|_| TopicMapping::vacant()),
        }
    }
}

impl TopicRegistry {
    /// Looks `name` up, allocating a fresh mapping in the first free slot
    /// when it is new.
    ///
    /// Returns the sentinel `TOPIC_NOT_ASSIGNED` when the name is too long
    /// to ever travel in a REGISTER, or when the table is full.
    pub fn assign(&mut self, name: &[u8]) -> TopicId {
        if let Some(mapping) = self.mappings.iter().find(|m| m.name == name) {
            return mapping.topic_id;
        }

        if name.is_empty() || name.len() > MAX_TOPIC_NAME_LEN {
            return TOPIC_NOT_ASSIGNED;
        }

        for (idx, mapping) in self.mappings.iter_mut().enumerate() {
            if mapping.name.is_empty() {
                mapping.name = Bytes::copy_from_slice(name);
                // ids are slot-derived; the reserved sentinel values are
                // never handed out
                let mut topic_id = idx as TopicId + 1;
                while topic_id == TOPIC_NOT_ASSIGNED || topic_id == TOPIC_UNSUBSCRIBED {
                    topic_id += 1;
                }
                mapping.topic_id = topic_id;
                return topic_id;
            }
        }

        TOPIC_NOT_ASSIGNED
    }

    /// The mapping `topic_id` was assigned to, if any.
    pub fn get(&self, topic_id: TopicId) -> Option<&TopicMapping> {
        if topic_id == TOPIC_NOT_ASSIGNED {
            return None;
        }
        self.mappings.iter().find(|m| m.topic_id == topic_id)
    }

    pub(crate) fn get_mut(&mut self, topic_id: TopicId) -> Option<&mut TopicMapping> {
        if topic_id == TOPIC_NOT_ASSIGNED {
            return None;
        }
        self.mappings.iter_mut().find(|m| m.topic_id == topic_id)
    }

    /// All live mappings.
    pub fn iter(&self) -> impl Iterator<Item = &TopicMapping> {
        self.mappings.iter().filter(|m| !m.name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_is_stable() {
        let mut registry = TopicRegistry::default();

        let led = registry.assign(b"led");
        let button = registry.assign(b"button");
        assert_eq!(led, 1);
        assert_eq!(button, 2);
        assert_eq!(registry.assign(b"led"), led);
        assert_eq!(registry.get(led).unwrap().name(), b"led");
        assert_eq!(registry.get(TOPIC_NOT_ASSIGNED), None);
    }

    #[test]
    fn test_rejects_unusable_names() {
        let mut registry = TopicRegistry::default();
        assert_eq!(registry.assign(b""), TOPIC_NOT_ASSIGNED);
        assert_eq!(
            registry.assign(&[b'x'; MAX_TOPIC_NAME_LEN + 1]),
            TOPIC_NOT_ASSIGNED
        );
        assert_ne!(
            registry.assign(&[b'x'; MAX_TOPIC_NAME_LEN]),
            TOPIC_NOT_ASSIGNED
        );
    }

    #[test]
    fn test_table_exhaustion() {
        let mut registry = TopicRegistry::default();

        let mut seen = Vec::new();
        for n in 0..MAX_GATEWAY_TOPICS {
            let topic_id = registry.assign(format!("topic/{}", n).as_bytes());
            assert_ne!(topic_id, TOPIC_NOT_ASSIGNED);
            assert_ne!(topic_id, TOPIC_UNSUBSCRIBED);
            assert!(!seen.contains(&topic_id), "ids must be pairwise distinct");
            seen.push(topic_id);
        }

        assert_eq!(registry.assign(b"one/too/many"), TOPIC_NOT_ASSIGNED);
        assert_eq!(registry.iter().count(), MAX_GATEWAY_TOPICS);
    }
}
