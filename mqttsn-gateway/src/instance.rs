use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use mqttsn_core::{
    Address, Flags, TopicId, Transport, DEFAULT_KEEPALIVE, MAX_INSTANCE_TOPICS, N_RETRY,
    TOPIC_NOT_ASSIGNED, T_RETRY,
};

/// Where a client instance stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// connected and inside its keep-alive window
    Active,
    /// the slot is free
    Disconnected,
    /// missed its keep-alive window or exhausted a retry ladder; about to be
    /// deregistered
    Lost,
}

#[derive(Debug, Clone, Copy, Default)]
struct SubTopicSlot {
    topic_id: TopicId,
    flags: Flags,
}

#[derive(Debug, Clone, Copy, Default)]
struct PubTopicSlot {
    topic_id: TopicId,
}

/// One connected client, as the gateway sees it.
///
/// A slot with an empty client id is free. The instance keeps a non-owning
/// handle on the gateway's transport so its own retry ladder can retransmit
/// without going through the gateway.
pub struct ClientInstance<T> {
    cid: Bytes,
    address: Address,
    flags: Flags,
    keep_alive: Duration,
    last_in: Instant,

    msg_inflight: Option<Vec<u8>>,
    unicast_timer: Instant,
    unicast_counter: u8,

    sub_topics: [SubTopicSlot; MAX_INSTANCE_TOPICS],
    pub_topics: [PubTopicSlot; MAX_INSTANCE_TOPICS],

    status: InstanceStatus,
    transport: Option<Rc<RefCell<T>>>,
}

impl<T> ClientInstance<T> {
    pub(crate) fn vacant(now: Instant) -> Self {
        ClientInstance {
            cid: Bytes::new(),
            address: Address::default(),
            flags: Flags::default(),
            keep_alive: Duration::from_secs(u64::from(DEFAULT_KEEPALIVE)),
            last_in: now,
            msg_inflight: None,
            unicast_timer: now,
            unicast_counter: 0,
            sub_topics: [SubTopicSlot::default(); MAX_INSTANCE_TOPICS],
            pub_topics: [PubTopicSlot::default(); MAX_INSTANCE_TOPICS],
            status: InstanceStatus::Disconnected,
            transport: None,
        }
    }

    /// Takes this slot for a (re)connecting client, clearing any topic and
    /// inflight state a previous session left behind.
    pub fn register(
        &mut self,
        cid: &[u8],
        address: Address,
        duration: u16,
        flags: Flags,
        transport: Rc<RefCell<T>>,
        now: Instant,
    ) {
        self.cid = Bytes::copy_from_slice(cid);
        self.address = address;
        self.keep_alive = Duration::from_secs(u64::from(duration));
        self.flags = flags;

        self.sub_topics = [SubTopicSlot::default(); MAX_INSTANCE_TOPICS];
        self.pub_topics = [PubTopicSlot::default(); MAX_INSTANCE_TOPICS];

        self.msg_inflight = None;
        self.unicast_counter = 0;
        self.status = InstanceStatus::Active;
        self.transport = Some(transport);
        self.mark_time(now);
    }

    /// Frees the slot.
    pub fn deregister(&mut self) {
        self.cid = Bytes::new();
        self.address = Address::default();
        self.status = InstanceStatus::Disconnected;
        self.msg_inflight = None;
        self.transport = None;
    }

    /// Whether the slot holds a client.
    pub fn is_occupied(&self) -> bool {
        !self.cid.is_empty()
    }

    /// The client's transport address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The client's id.
    pub fn client_id(&self) -> &[u8] {
        &self.cid
    }

    /// The flags the client connected with.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Current lifecycle status.
    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    /// Records an inbound control packet for keep-alive purposes.
    pub fn mark_time(&mut self, now: Instant) {
        self.last_in = now;
    }

    /// Adds `topic_id` to the subscription list, or updates its flags when
    /// already present. False when every slot is taken.
    pub fn add_sub_topic(&mut self, topic_id: TopicId, flags: Flags) -> bool {
        if let Some(slot) = self
            .sub_topics
            .iter_mut()
            .find(|slot| slot.topic_id == topic_id)
        {
            slot.flags = flags;
            return true;
        }

        match self
            .sub_topics
            .iter_mut()
            .find(|slot| slot.topic_id == TOPIC_NOT_ASSIGNED)
        {
            Some(slot) => {
                slot.topic_id = topic_id;
                slot.flags = flags;
                true
            }
            None => false,
        }
    }

    /// Adds `topic_id` to the publish list. False when every slot is taken.
    pub fn add_pub_topic(&mut self, topic_id: TopicId) -> bool {
        if self
            .pub_topics
            .iter()
            .any(|slot| slot.topic_id == topic_id)
        {
            return true;
        }

        match self
            .pub_topics
            .iter_mut()
            .find(|slot| slot.topic_id == TOPIC_NOT_ASSIGNED)
        {
            Some(slot) => {
                slot.topic_id = topic_id;
                true
            }
            None => false,
        }
    }

    /// Drops `topic_id` from the subscription list. Deleting an absent topic
    /// is not an error.
    pub fn delete_sub_topic(&mut self, topic_id: TopicId) {
        if let Some(slot) = self
            .sub_topics
            .iter_mut()
            .find(|slot| slot.topic_id == topic_id)
        {
            *slot = SubTopicSlot::default();
        }
    }

    /// Whether this client subscribed to `topic_id`.
    pub fn is_subscribed(&self, topic_id: TopicId) -> bool {
        topic_id != TOPIC_NOT_ASSIGNED
            && self.sub_topics.iter().any(|slot| slot.topic_id == topic_id)
    }

    /// Stores a request awaiting this client's acknowledgement; the retry
    /// ladder in [`check_status`] retransmits it.
    ///
    /// [`check_status`]: ClientInstance::check_status
    pub fn set_inflight(&mut self, packet: Vec<u8>, now: Instant) {
        self.msg_inflight = Some(packet);
        self.unicast_timer = now;
        self.unicast_counter = 0;
    }
}

impl<T: Transport> ClientInstance<T> {
    /// Services this client's timers: keep-alive expiry first, then the
    /// retry ladder of any request still awaiting its acknowledgement.
    ///
    /// A `Lost` verdict is the gateway's cue to deregister the slot.
    pub fn check_status(&mut self, now: Instant) -> InstanceStatus {
        if now.duration_since(self.last_in) > self.keep_alive * 3 / 2 {
            self.status = InstanceStatus::Lost;
            return self.status;
        }

        let packet = match &self.msg_inflight {
            Some(packet) => packet,
            None => return self.status,
        };
        if now.duration_since(self.unicast_timer) < T_RETRY {
            return self.status;
        }

        self.unicast_timer = now;
        self.unicast_counter += 1;
        if self.unicast_counter > N_RETRY {
            self.status = InstanceStatus::Lost;
            return self.status;
        }

        if let Some(transport) = &self.transport {
            transport.borrow_mut().write_packet(packet, &self.address);
        }
        self.status
    }
}
