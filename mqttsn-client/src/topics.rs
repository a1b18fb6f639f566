use bytes::Bytes;

use mqttsn_core::{Flags, TopicId, TOPIC_NOT_ASSIGNED};

/// A topic this client publishes to.
///
/// `topic_id` is assigned by the gateway through REGISTER/REGACK; the
/// sentinel 0 means the registration has not completed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PubTopic {
    /// the topic name
    pub name: Bytes,
    /// the gateway-assigned alias, 0 until registered
    pub topic_id: TopicId,
}

impl PubTopic {
    /// A topic pending registration.
    pub fn new(name: impl Into<Bytes>) -> Self {
        PubTopic {
            name: name.into(),
            topic_id: TOPIC_NOT_ASSIGNED,
        }
    }
}

/// A topic this client wants deliveries for.
///
/// `topic_id` is granted through SUBSCRIBE/SUBACK; the sentinel 0 means the
/// subscription has not been confirmed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct SubTopic {
    /// the topic name
    pub name: Bytes,
    /// the gateway-assigned alias, 0 until the SUBACK arrives
    pub topic_id: TopicId,
    /// subscription flags (qos group)
    pub flags: Flags,
}

impl SubTopic {
    /// A topic pending subscription.
    pub fn new(name: impl Into<Bytes>, flags: Flags) -> Self {
        SubTopic {
            name: name.into(),
            topic_id: TOPIC_NOT_ASSIGNED,
            flags,
        }
    }
}
