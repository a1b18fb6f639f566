use std::array;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;

use mqttsn_core::{
    Address, Advertise, Connect, ConnectAck, Disconnect, Flags, GwInfo, Header, Message, PingReq,
    Publish, QoS, Register, RegisterAck, ReturnCode, SearchGw, Subscribe, SubscribeAck, Transport,
    Type, Unsubscribe, UnsubscribeAck, DEFAULT_KEEPALIVE, MAX_INSTANCE_TOPICS, N_RETRY,
    TOPIC_NOT_ASSIGNED, T_RETRY, T_SEARCHGW,
};

use crate::topics::{PubTopic, SubTopic};

/// Client session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// connected and exchanging traffic
    Active,
    /// the gateway stopped answering; reconnection is attempted from here
    Lost,
    /// sleeping for a negotiated duration
    Asleep,
    /// woken up to collect buffered messages
    Awake,
    /// not connected, by choice or after a rejected CONNECT
    Disconnected,
    /// CONNECT sent, CONNACK pending
    Connecting,
    /// broadcasting SEARCHGW until a gateway turns up
    Searching,
}

/// A gateway this client knows about, by discovery or seeding.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayInfo {
    /// the gateway's nonzero id
    pub gw_id: u8,
    /// where to unicast it
    pub gw_addr: Address,
    /// cleared when the gateway stops answering; a connect attempt with
    /// every entry cleared resets them all
    pub available: bool,
}

impl GatewayInfo {
    /// A freshly discovered gateway, presumed reachable.
    pub fn new(gw_id: u8, gw_addr: Address) -> Self {
        GatewayInfo {
            gw_id,
            gw_addr,
            available: true,
        }
    }
}

type PublishCallback = Box<dyn FnMut(&[u8], &[u8], Flags)>;

/// An MQTT-SN client session over a datagram transport.
///
/// The session is driven cooperatively: the owner calls [`poll`] on a short
/// cadence with a monotonic `now`, and all request/reply tracking, retries
/// and keep-alive run off that clock. No call blocks and no call performs
/// I/O beyond handing packets to the transport.
///
/// [`poll`]: Client::poll
pub struct Client<T> {
    transport: T,
    client_id: Bytes,
    state: ClientState,
    connected: bool,

    gateways: Vec<GatewayInfo>,
    curr_gateway: Option<usize>,

    // the serialized request awaiting its acknowledgement, kept whole for
    // retransmission; its header carries the type the reply must match
    msg_inflight: Option<Vec<u8>>,
    unicast_timer: Instant,
    unicast_counter: u8,

    keep_alive: Duration,
    last_in: Instant,
    last_out: Instant,

    ping_resp_pending: bool,
    pingreq_timer: Instant,

    searchgw_started: Instant,
    searchgw_delay: Duration,
    searchgw_pending: bool,

    curr_msg_id: u16,

    pub_topics: [Option<PubTopic>; MAX_INSTANCE_TOPICS],
    sub_topics: [Option<SubTopic>; MAX_INSTANCE_TOPICS],

    publish_cb: Option<PublishCallback>,
}

impl<T: Transport> Client<T> {
    /// A disconnected session owning `transport`, identified as `client_id`.
    pub fn new(client_id: impl Into<Bytes>, transport: T, now: Instant) -> Self {
        Client {
            transport,
            client_id: client_id.into(),
            state: ClientState::Disconnected,
            connected: false,
            gateways: Vec::new(),
            curr_gateway: None,
            msg_inflight: None,
            unicast_timer: now,
            unicast_counter: 0,
            keep_alive: Duration::from_secs(u64::from(DEFAULT_KEEPALIVE)),
            last_in: now,
            last_out: now,
            ping_resp_pending: false,
            pingreq_timer: now,
            searchgw_started: now,
            searchgw_delay: Duration::from_secs(0),
            searchgw_pending: false,
            curr_msg_id: 1,
            pub_topics: array::from_fn(|_| None),
            sub_topics: array::from_fn(|_| None),
            publish_cb: None,
        }
    }

    /// The current session state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Whether a CONNECT has been accepted and not yet torn down.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The gateways this session knows about.
    pub fn gateways(&self) -> &[GatewayInfo] {
        &self.gateways
    }

    /// Registers the delivery callback, invoked with (topic name, payload,
    /// flags) for every inbound PUBLISH on a confirmed subscription.
    pub fn on_message(&mut self, callback: impl FnMut(&[u8], &[u8], Flags) + 'static) {
        self.publish_cb = Some(Box::new(callback));
    }

    /// Seeds the gateway list. Entries already known by id or address are
    /// left alone.
    pub fn add_gateways(&mut self, gateways: &[GatewayInfo]) {
        for gw in gateways {
            self.add_gateway(gw.gw_id, gw.gw_addr.clone());
        }
    }

    fn add_gateway(&mut self, gw_id: u8, gw_addr: Address) {
        if self
            .gateways
            .iter()
            .any(|gw| gw.gw_id == gw_id || gw.gw_addr == gw_addr)
        {
            return;
        }
        debug!("gateway {} at {:?}", gw_id, gw_addr);
        self.gateways.push(GatewayInfo::new(gw_id, gw_addr));
    }

    /// Starts a discovery cycle: after a random delay in [0, T_SEARCHGW) a
    /// SEARCHGW is broadcast, and re-broadcast on the same schedule until a
    /// gateway answers.
    pub fn searchgw(&mut self, now: Instant) {
        self.searchgw_started = now;
        self.searchgw_delay = searchgw_jitter();
        self.searchgw_pending = true;
        self.state = ClientState::Searching;
    }

    /// Connects to a gateway. `gw_id` 0 picks any available entry; when
    /// every entry has been marked unavailable they are all reset first.
    ///
    /// Returns false when a request is already in flight or no gateway
    /// matches; true once the CONNECT is on the wire and the session is
    /// CONNECTING.
    pub fn connect(&mut self, now: Instant, gw_id: u8, flags: Flags, duration: u16) -> bool {
        if self.msg_inflight.is_some() {
            return false;
        }

        let target = if gw_id == 0 {
            match self.gateways.iter().position(|gw| gw.available) {
                Some(idx) => Some(idx),
                None if !self.gateways.is_empty() => {
                    for gw in &mut self.gateways {
                        gw.available = true;
                    }
                    Some(0)
                }
                None => None,
            }
        } else {
            self.gateways.iter().position(|gw| gw.gw_id == gw_id)
        };
        let target = match target {
            Some(idx) => idx,
            None => return false,
        };
        self.curr_gateway = Some(target);

        self.keep_alive = Duration::from_secs(u64::from(duration));
        let packet = Message::Connect(Connect {
            flags,
            duration,
            client_id: &self.client_id,
        })
        .pack();

        debug!("CONNECT to gateway {}", self.gateways[target].gw_id);
        self.send_inflight(packet, now);
        self.connected = false;
        self.state = ClientState::Connecting;
        true
    }

    /// Installs `topics` into the publish table and drives their
    /// registration, one REGISTER at a time.
    ///
    /// Returns true only once every installed topic has a gateway-assigned
    /// id; call again from the main loop until it does.
    pub fn register_topics(&mut self, now: Instant, topics: &[PubTopic]) -> bool {
        let mut installed_all = true;
        for topic in topics {
            installed_all &= self.install_pub_topic(&topic.name);
        }

        let pending = self
            .pub_topics
            .iter()
            .flatten()
            .find(|topic| topic.topic_id == TOPIC_NOT_ASSIGNED)
            .map(|topic| topic.name.clone());
        let name = match pending {
            Some(name) => name,
            None => return installed_all,
        };

        if !self.connected || self.msg_inflight.is_some() {
            return false;
        }

        let msg_id = self.next_msg_id();
        let packet = Message::Register(Register {
            topic_id: TOPIC_NOT_ASSIGNED,
            msg_id,
            topic_name: &name,
        })
        .pack();
        self.send_inflight(packet, now);
        false
    }

    /// Installs `topics` into the subscription table and drives their
    /// subscription, one SUBSCRIBE at a time; the counterpart of
    /// [`register_topics`].
    ///
    /// [`register_topics`]: Client::register_topics
    pub fn subscribe_topics(&mut self, now: Instant, topics: &[SubTopic]) -> bool {
        let mut installed_all = true;
        for topic in topics {
            installed_all &= self.install_sub_topic(&topic.name, topic.flags);
        }

        let pending = self
            .sub_topics
            .iter()
            .flatten()
            .find(|topic| topic.topic_id == TOPIC_NOT_ASSIGNED)
            .map(|topic| (topic.name.clone(), topic.flags));
        let (name, flags) = match pending {
            Some(pending) => pending,
            None => return installed_all,
        };

        if !self.connected || self.msg_inflight.is_some() {
            return false;
        }

        let msg_id = self.next_msg_id();
        let packet = Message::Subscribe(Subscribe {
            flags,
            msg_id,
            topic: &name,
        })
        .pack();
        self.send_inflight(packet, now);
        false
    }

    /// Publishes `data` on a registered topic. QoS 0 goes out with msg_id 0;
    /// QoS 1/2 allocate a fresh nonzero msg_id.
    ///
    /// Returns false when not connected or the topic was never registered.
    pub fn publish(&mut self, now: Instant, topic: &[u8], data: &[u8], flags: Flags) -> bool {
        if !self.connected {
            return false;
        }

        let topic_id = match self.pub_topics.iter().flatten().find(|t| t.name == topic) {
            Some(t) if t.topic_id != TOPIC_NOT_ASSIGNED => t.topic_id,
            _ => return false,
        };

        let msg_id = match flags.qos() {
            QoS::AtMostOnce => 0,
            _ => self.next_msg_id(),
        };
        let packet = Message::Publish(Publish {
            flags,
            topic_id,
            msg_id,
            data,
        })
        .pack();
        self.write_to_gateway(&packet, now);
        true
    }

    /// Unsubscribes from a confirmed subscription; the topic entry is
    /// removed when the UNSUBACK arrives.
    pub fn unsubscribe(&mut self, now: Instant, topic: &[u8], flags: Flags) -> bool {
        if !self.connected || self.msg_inflight.is_some() {
            return false;
        }
        if !self.sub_topics.iter().flatten().any(|t| t.name == topic) {
            return false;
        }

        let msg_id = self.next_msg_id();
        let packet = Message::Unsubscribe(Unsubscribe {
            flags,
            msg_id,
            topic,
        })
        .pack();
        self.send_inflight(packet, now);
        true
    }

    /// Tears the session down with a DISCONNECT.
    pub fn disconnect(&mut self, now: Instant) {
        let packet = Message::Disconnect(Disconnect { duration: None }).pack();
        self.write_to_gateway(&packet, now);
        self.connected = false;
        self.state = ClientState::Disconnected;
        self.msg_inflight = None;
        self.ping_resp_pending = false;
    }

    /// The drive step: drains inbound packets, services the inflight retry
    /// timer, then runs the current state's handler. Call on a short cadence
    /// with a monotonic clock.
    pub fn poll(&mut self, now: Instant) {
        self.handle_messages(now);
        self.service_inflight(now);

        match self.state {
            ClientState::Active => self.active_handler(now),
            ClientState::Searching => self.searching_handler(now),
            ClientState::Lost => self.lost_handler(now),
            ClientState::Connecting | ClientState::Disconnected => {
                if self.connected {
                    self.state = ClientState::Active;
                }
            }
            ClientState::Asleep | ClientState::Awake => {}
        }
    }

    fn handle_messages(&mut self, now: Instant) {
        while let Some((packet, from)) = self.transport.read_packet() {
            let (body, header) = match Header::parse::<()>(&packet) {
                Ok(parsed) => parsed,
                Err(_) => continue,
            };

            match header.msg_type {
                Type::ADVERTISE => self.handle_advertise(body, &from),
                Type::SEARCHGW => self.handle_searchgw(body, now),
                Type::GWINFO => self.handle_gwinfo(body, &from),
                Type::CONNACK => self.handle_connack(body, &from, now),
                Type::REGACK => self.handle_regack(body, &from, now),
                Type::SUBACK => self.handle_suback(body, &from, now),
                Type::UNSUBACK => self.handle_unsuback(body, &from, now),
                Type::PUBLISH => self.handle_publish(body),
                Type::PINGRESP => self.handle_pingresp(body, now),
                _ => {}
            }
        }
    }

    fn service_inflight(&mut self, now: Instant) {
        if self.msg_inflight.is_none() {
            return;
        }
        if now.duration_since(self.unicast_timer) < T_RETRY {
            return;
        }

        self.unicast_timer = now;
        self.unicast_counter += 1;
        if self.unicast_counter > N_RETRY {
            debug!("request retries exhausted, session lost");
            self.connected = false;
            self.msg_inflight = None;
            self.state = ClientState::Lost;
            self.mark_gateway_unavailable();
            return;
        }

        if let Some(packet) = self.msg_inflight.take() {
            self.write_to_gateway(&packet, now);
            self.msg_inflight = Some(packet);
        }
    }

    fn handle_advertise(&mut self, body: &[u8], from: &Address) {
        let msg = match Advertise::parse::<()>(body) {
            Ok((_, msg)) => msg,
            Err(_) => return,
        };
        self.add_gateway(msg.gw_id, from.clone());
    }

    fn handle_searchgw(&mut self, body: &[u8], now: Instant) {
        if SearchGw::parse::<()>(body).is_err() {
            return;
        }

        // another client beat us to it; hold our own broadcast back for a
        // fresh random delay and let its answer serve us both
        if self.searchgw_pending {
            self.searchgw_started = now;
            self.searchgw_delay = searchgw_jitter();
        }
    }

    fn handle_gwinfo(&mut self, body: &[u8], from: &Address) {
        let msg = match GwInfo::parse::<()>(body) {
            Ok((_, msg)) => msg,
            Err(_) => return,
        };

        if !self.gateways.iter().any(|gw| gw.gw_id == msg.gw_id) {
            // a gateway answers with its id alone; a relaying client
            // attaches the gateway's address
            let gw_addr = if msg.gw_addr.is_empty() {
                from.clone()
            } else {
                Address::new(msg.gw_addr.to_vec())
            };
            debug!("gateway {} at {:?}", msg.gw_id, gw_addr);
            self.gateways.push(GatewayInfo::new(msg.gw_id, gw_addr));
        }

        self.searchgw_pending = false;
    }

    fn handle_connack(&mut self, body: &[u8], from: &Address, now: Instant) {
        if self.inflight_request(from, Type::CONNECT).is_none() {
            return;
        }
        let msg = match ConnectAck::parse::<()>(body) {
            Ok((_, msg)) => msg,
            Err(_) => return,
        };

        if msg.return_code != ReturnCode::Accepted {
            debug!("CONNECT rejected: {}", msg.return_code);
            self.msg_inflight = None;
            self.state = ClientState::Disconnected;
            return;
        }

        debug!("connected");
        self.state = ClientState::Active;
        self.connected = true;
        self.msg_inflight = None;
        self.last_in = now;
    }

    fn handle_regack(&mut self, body: &[u8], from: &Address, now: Instant) {
        let sent = match self.inflight_request(from, Type::REGISTER) {
            Some(request) => match Register::parse::<()>(&request) {
                Ok((_, sent)) => (sent.msg_id, Bytes::copy_from_slice(sent.topic_name)),
                Err(_) => return,
            },
            None => return,
        };
        let msg = match RegisterAck::parse::<()>(body) {
            Ok((_, msg)) => msg,
            Err(_) => return,
        };
        if msg.msg_id != sent.0 || msg.return_code != ReturnCode::Accepted {
            return;
        }

        self.last_in = now;
        if let Some(topic) = self.pub_topics.iter_mut().flatten().find(|t| t.name == sent.1) {
            topic.topic_id = msg.topic_id;
        }
        self.msg_inflight = None;
    }

    fn handle_suback(&mut self, body: &[u8], from: &Address, now: Instant) {
        let sent = match self.inflight_request(from, Type::SUBSCRIBE) {
            Some(request) => match Subscribe::parse::<()>(&request) {
                Ok((_, sent)) => (sent.msg_id, Bytes::copy_from_slice(sent.topic)),
                Err(_) => return,
            },
            None => return,
        };
        let msg = match SubscribeAck::parse::<()>(body) {
            Ok((_, msg)) => msg,
            Err(_) => return,
        };
        if msg.msg_id != sent.0 || msg.return_code != ReturnCode::Accepted {
            return;
        }

        self.last_in = now;
        if let Some(topic) = self.sub_topics.iter_mut().flatten().find(|t| t.name == sent.1) {
            topic.topic_id = msg.topic_id;
        }
        self.msg_inflight = None;
    }

    fn handle_unsuback(&mut self, body: &[u8], from: &Address, now: Instant) {
        let sent = match self.inflight_request(from, Type::UNSUBSCRIBE) {
            Some(request) => match Unsubscribe::parse::<()>(&request) {
                Ok((_, sent)) => (sent.msg_id, Bytes::copy_from_slice(sent.topic)),
                Err(_) => return,
            },
            None => return,
        };
        let msg = match UnsubscribeAck::parse::<()>(body) {
            Ok((_, msg)) => msg,
            Err(_) => return,
        };
        if msg.msg_id != sent.0 {
            return;
        }

        self.last_in = now;
        // removal is idempotent: an UNSUBACK for a topic we no longer hold
        // still consumes the request
        if let Some(slot) = self
            .sub_topics
            .iter_mut()
            .find(|slot| slot.as_ref().map_or(false, |t| t.name == sent.1))
        {
            *slot = None;
        }
        self.msg_inflight = None;
    }

    fn handle_publish(&mut self, body: &[u8]) {
        if !self.connected {
            return;
        }

        let msg = match Publish::parse::<()>(body) {
            Ok((_, msg)) => msg,
            Err(_) => return,
        };
        // only QoS 0 deliveries are understood
        if msg.msg_id != 0 {
            return;
        }

        let name = match self
            .sub_topics
            .iter()
            .flatten()
            .find(|t| t.topic_id == msg.topic_id)
        {
            Some(topic) => topic.name.clone(),
            None => return,
        };

        if let Some(callback) = self.publish_cb.as_mut() {
            callback(&name, msg.data, msg.flags);
        }
    }

    fn handle_pingresp(&mut self, _body: &[u8], now: Instant) {
        self.last_in = now;
        self.ping_resp_pending = false;
    }

    /// The serialized request a reply from `from` of request type `expected`
    /// may consume, if there is one.
    fn inflight_request(&self, from: &Address, expected: Type) -> Option<Vec<u8>> {
        let curr = self.curr_gateway?;
        if *from != self.gateways[curr].gw_addr {
            return None;
        }

        let inflight = self.msg_inflight.as_deref()?;
        let (body, header) = Header::parse::<()>(inflight).ok()?;
        if header.msg_type != expected {
            return None;
        }
        Some(body.to_vec())
    }

    fn searching_handler(&mut self, now: Instant) {
        if self.searchgw_pending && now >= self.searchgw_started + self.searchgw_delay {
            let packet = Message::SearchGw(SearchGw { radius: 0 }).pack();
            self.transport.broadcast(&packet);
            self.searchgw_started = now;
            self.searchgw_delay = searchgw_jitter();
        }
    }

    fn lost_handler(&mut self, now: Instant) {
        if self.connected {
            self.state = ClientState::Active;
            return;
        }
        if self.msg_inflight.is_some() {
            return;
        }

        let duration = self.keep_alive.as_secs() as u16;
        self.connect(now, 0, Flags::default(), duration);
    }

    fn active_handler(&mut self, now: Instant) {
        if now < self.last_out + self.keep_alive && now < self.last_in + self.keep_alive {
            return;
        }

        if !self.ping_resp_pending {
            self.ping(now);
            self.ping_resp_pending = true;
            self.pingreq_timer = now;
        } else if now.duration_since(self.pingreq_timer) >= T_RETRY {
            if now >= self.last_in + self.keep_alive * 3 / 2 {
                debug!("keep-alive exhausted, session lost");
                self.state = ClientState::Lost;
                self.connected = false;
                self.ping_resp_pending = false;
                self.mark_gateway_unavailable();
            } else {
                self.ping(now);
                self.pingreq_timer = now;
            }
        }
    }

    fn ping(&mut self, now: Instant) {
        let packet = Message::PingReq(PingReq { client_id: b"" }).pack();
        self.write_to_gateway(&packet, now);
    }

    fn mark_gateway_unavailable(&mut self) {
        if let Some(curr) = self.curr_gateway {
            self.gateways[curr].available = false;
        }
    }

    fn send_inflight(&mut self, packet: Vec<u8>, now: Instant) {
        self.write_to_gateway(&packet, now);
        self.msg_inflight = Some(packet);
        self.unicast_timer = now;
        self.unicast_counter = 0;
    }

    fn write_to_gateway(&mut self, data: &[u8], now: Instant) {
        if let Some(curr) = self.curr_gateway {
            let dest = self.gateways[curr].gw_addr.clone();
            self.transport.write_packet(data, &dest);
            self.last_out = now;
        }
    }

    fn install_pub_topic(&mut self, name: &Bytes) -> bool {
        if self.pub_topics.iter().flatten().any(|t| t.name == *name) {
            return true;
        }
        match self.pub_topics.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(PubTopic::new(name.clone()));
                true
            }
            None => false,
        }
    }

    fn install_sub_topic(&mut self, name: &Bytes, flags: Flags) -> bool {
        if self.sub_topics.iter().flatten().any(|t| t.name == *name) {
            return true;
        }
        match self.sub_topics.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(SubTopic::new(name.clone(), flags));
                true
            }
            None => false,
        }
    }

    // msg_id 0 is reserved for QoS 0 publishes; the counter wraps 16-bit
    // and skips it
    fn next_msg_id(&mut self) -> u16 {
        if self.curr_msg_id == 0 {
            self.curr_msg_id = 1;
        }
        let msg_id = self.curr_msg_id;
        self.curr_msg_id = self.curr_msg_id.wrapping_add(1);
        msg_id
    }
}

fn searchgw_jitter() -> Duration {
    T_SEARCHGW.mul_f64(rand::thread_rng().gen::<f64>())
}
