use std::array;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

use mqttsn_core::{
    Address, Connect, ConnectAck, Flags, GwInfo, Header, Message, PingReq, Publish, QoS, Register,
    RegisterAck, ReturnCode, SearchGw, Subscribe, SubscribeAck, TopicId, Transport, Type,
    Unsubscribe, UnsubscribeAck, MAX_NUM_CLIENTS, MAX_QUEUED_PUBLISH, TOPIC_NOT_ASSIGNED,
};

use crate::broker::BrokerClient;
use crate::instance::{ClientInstance, InstanceStatus};
use crate::registry::TopicRegistry;

/// An MQTT-SN gateway: terminates MQTT-SN sessions on the datagram side and
/// bridges publishes and subscriptions to an upstream MQTT broker.
///
/// Driven cooperatively like the client: the owner calls [`poll`] on a short
/// cadence with a monotonic `now`. Upstream connection changes and
/// deliveries are marshaled in through [`on_broker_connect`] and
/// [`on_broker_publish`] on the same thread.
///
/// With no broker connected the gateway stands alone and fans inbound
/// publishes back out to its own subscribed clients.
///
/// [`poll`]: Gateway::poll
/// [`on_broker_connect`]: Gateway::on_broker_connect
/// [`on_broker_publish`]: Gateway::on_broker_publish
pub struct Gateway<T, M> {
    gw_id: u8,
    transport: Rc<RefCell<T>>,
    broker: M,
    connected: bool,

    clients: [ClientInstance<T>; MAX_NUM_CLIENTS],
    registry: TopicRegistry,

    // serialized QoS 0 PUBLISH packets awaiting local fan-out
    pub_queue: VecDeque<Vec<u8>>,
}

impl<T: Transport, M: BrokerClient> Gateway<T, M> {
    /// A gateway serving as id `gw_id`, owning the transport and the
    /// upstream broker handle.
    pub fn new(gw_id: u8, broker: M, transport: T, now: Instant) -> Self {
        Gateway {
            gw_id,
            transport: Rc::new(RefCell::new(transport)),
            broker,
            connected: false,
            clients: array::from_fn(|_| ClientInstance::vacant(now)),
            registry: TopicRegistry::default(),
            pub_queue: VecDeque::new(),
        }
    }

    /// The topic registry, stable for the life of the gateway.
    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// The drive step: drains inbound packets, services every client's
    /// keep-alive and retry timers, then fans queued publishes out. Returns
    /// whether the upstream broker is currently connected.
    pub fn poll(&mut self, now: Instant) -> bool {
        self.handle_messages(now);

        for client in self.clients.iter_mut() {
            if client.is_occupied() && client.check_status(now) == InstanceStatus::Lost {
                debug!("client {:?} lost", client.address());
                client.deregister();
            }
        }

        self.drain_publish_queue();
        self.connected
    }

    /// Reports an upstream connection state change.
    ///
    /// On a reconnect every aggregated subscription is replayed to the
    /// broker at its recorded qos.
    pub fn on_broker_connect(&mut self, connected: bool) {
        if !connected {
            debug!("broker disconnected");
            self.connected = false;
            return;
        }
        if self.connected {
            return;
        }

        debug!("broker connected");
        self.connected = true;
        for mapping in self.registry.iter() {
            if mapping.subscribed {
                self.broker.subscribe(&mapping.name, mapping.sub_qos);
            }
        }
    }

    /// Accepts one delivery from the upstream broker and queues it for
    /// fan-out to subscribed clients on the next [`poll`].
    ///
    /// [`poll`]: Gateway::poll
    pub fn on_broker_publish(&mut self, topic: &[u8], payload: &[u8], flags: Flags) {
        let topic_id = self.registry.assign(topic);
        if topic_id == TOPIC_NOT_ASSIGNED {
            return;
        }

        debug!(
            "broker publish on {} ({} bytes)",
            String::from_utf8_lossy(topic),
            payload.len()
        );
        let packet = Message::Publish(Publish {
            flags,
            topic_id,
            msg_id: 0,
            data: payload,
        })
        .pack();
        self.enqueue_publish(packet);
    }

    fn handle_messages(&mut self, now: Instant) {
        loop {
            let next = self.transport.borrow_mut().read_packet();
            let (packet, from) = match next {
                Some(next) => next,
                None => return,
            };

            let (body, header) = match Header::parse::<()>(&packet) {
                Ok(parsed) => parsed,
                Err(_) => continue,
            };

            match header.msg_type {
                Type::SEARCHGW => self.handle_searchgw(body),
                Type::CONNECT => self.handle_connect(body, &from, now),
                Type::REGISTER => self.handle_register(body, &from, now),
                Type::SUBSCRIBE => self.handle_subscribe(body, &from, now),
                Type::UNSUBSCRIBE => self.handle_unsubscribe(body, &from, now),
                Type::PUBLISH => self.handle_publish(body, &from),
                Type::PINGREQ => self.handle_pingreq(body, &from, now),
                _ => {}
            }
        }
    }

    fn handle_searchgw(&mut self, body: &[u8]) {
        if SearchGw::parse::<()>(body).is_err() {
            return;
        }

        debug!("SEARCHGW answered as gateway {}", self.gw_id);
        let reply = Message::GwInfo(GwInfo {
            gw_id: self.gw_id,
            gw_addr: &[],
        })
        .pack();
        self.transport.borrow_mut().broadcast(&reply);
    }

    fn handle_connect(&mut self, body: &[u8], from: &Address, now: Instant) {
        let msg = match Connect::parse::<()>(body) {
            Ok((_, msg)) => msg,
            Err(_) => return,
        };
        if msg.client_id.is_empty() {
            return;
        }

        info!(
            "CONNECT {} from {:?}",
            String::from_utf8_lossy(msg.client_id),
            from
        );

        // a repeat CONNECT from a known address overwrites that session
        let transport = Rc::clone(&self.transport);
        let slot = match self.instance_index(from) {
            Some(idx) => Some(idx),
            None => self.clients.iter().position(|c| !c.is_occupied()),
        };
        let return_code = match slot {
            Some(idx) => {
                self.clients[idx].register(
                    msg.client_id,
                    from.clone(),
                    msg.duration,
                    msg.flags,
                    transport,
                    now,
                );
                ReturnCode::Accepted
            }
            None => ReturnCode::Congestion,
        };

        let reply = Message::ConnectAck(ConnectAck { return_code }).pack();
        self.transport.borrow_mut().write_packet(&reply, from);
    }

    fn handle_register(&mut self, body: &[u8], from: &Address, now: Instant) {
        let idx = match self.instance_index(from) {
            Some(idx) => idx,
            None => return,
        };
        let msg = match Register::parse::<()>(body) {
            Ok((_, msg)) => msg,
            Err(_) => return,
        };
        // a client-initiated REGISTER never carries an id of its own
        if msg.topic_id != TOPIC_NOT_ASSIGNED {
            return;
        }

        debug!(
            "REGISTER {} from {:?}",
            String::from_utf8_lossy(msg.topic_name),
            from
        );
        self.clients[idx].mark_time(now);

        let topic_id = self.registry.assign(msg.topic_name);
        if topic_id == TOPIC_NOT_ASSIGNED {
            return;
        }

        let (topic_id, return_code) = if self.clients[idx].add_pub_topic(topic_id) {
            (topic_id, ReturnCode::Accepted)
        } else {
            (TOPIC_NOT_ASSIGNED, ReturnCode::Congestion)
        };
        let reply = Message::RegisterAck(RegisterAck {
            topic_id,
            msg_id: msg.msg_id,
            return_code,
        })
        .pack();
        self.transport.borrow_mut().write_packet(&reply, from);
    }

    fn handle_subscribe(&mut self, body: &[u8], from: &Address, now: Instant) {
        let idx = match self.instance_index(from) {
            Some(idx) => idx,
            None => return,
        };
        let msg = match Subscribe::parse::<()>(body) {
            Ok((_, msg)) => msg,
            Err(_) => return,
        };

        debug!(
            "SUBSCRIBE to {} from {:?}",
            String::from_utf8_lossy(msg.topic),
            from
        );
        self.clients[idx].mark_time(now);

        let topic_id = self.registry.assign(msg.topic);
        if topic_id == TOPIC_NOT_ASSIGNED {
            return;
        }

        let accepted = self.clients[idx].add_sub_topic(topic_id, msg.flags);
        let (granted, return_code) = if accepted {
            (topic_id, ReturnCode::Accepted)
        } else {
            (TOPIC_NOT_ASSIGNED, ReturnCode::Congestion)
        };
        let reply = Message::SubscribeAck(SubscribeAck {
            flags: Flags::default(),
            topic_id: granted,
            msg_id: msg.msg_id,
            return_code,
        })
        .pack();
        self.transport.borrow_mut().write_packet(&reply, from);

        if accepted {
            self.add_subscription(topic_id, msg.flags.qos());
        }
    }

    fn handle_unsubscribe(&mut self, body: &[u8], from: &Address, now: Instant) {
        let idx = match self.instance_index(from) {
            Some(idx) => idx,
            None => return,
        };
        let msg = match Unsubscribe::parse::<()>(body) {
            Ok((_, msg)) => msg,
            Err(_) => return,
        };

        debug!(
            "UNSUBSCRIBE from {} by {:?}",
            String::from_utf8_lossy(msg.topic),
            from
        );
        self.clients[idx].mark_time(now);

        let topic_id = self.registry.assign(msg.topic);
        if topic_id == TOPIC_NOT_ASSIGNED {
            return;
        }

        // dropping an absent subscription still gets its UNSUBACK
        self.clients[idx].delete_sub_topic(topic_id);

        let reply = Message::UnsubscribeAck(UnsubscribeAck { msg_id: msg.msg_id }).pack();
        self.transport.borrow_mut().write_packet(&reply, from);

        if self.clients.iter().any(|c| c.is_subscribed(topic_id)) {
            return;
        }
        self.delete_subscription(topic_id);
    }

    fn handle_publish(&mut self, body: &[u8], from: &Address) {
        if self.instance_index(from).is_none() {
            return;
        }

        let msg = match Publish::parse::<()>(body) {
            Ok((_, msg)) => msg,
            Err(_) => return,
        };
        // only QoS 0 is bridged
        if msg.msg_id != 0 {
            return;
        }

        let name = match self.registry.get(msg.topic_id) {
            Some(mapping) => mapping.name.clone(),
            None => return,
        };

        debug!(
            "PUBLISH on {} from {:?} ({} bytes)",
            String::from_utf8_lossy(&name),
            from,
            msg.data.len()
        );

        if self.connected {
            self.broker.publish(
                &name,
                msg.data,
                msg.flags.qos(),
                msg.flags.contains(Flags::RETAIN),
            );
        } else {
            // standing alone: queue it and serve our own subscribers
            let packet = Message::Publish(msg).pack();
            self.enqueue_publish(packet);
        }
    }

    fn handle_pingreq(&mut self, body: &[u8], from: &Address, now: Instant) {
        let idx = match self.instance_index(from) {
            Some(idx) => idx,
            None => return,
        };
        if PingReq::parse::<()>(body).is_err() {
            return;
        }

        self.clients[idx].mark_time(now);

        let reply = Message::PingResp.pack();
        self.transport.borrow_mut().write_packet(&reply, from);
    }

    /// Folds one client subscription into the aggregated upstream state: the
    /// first subscriber opens the upstream subscription, a later subscriber
    /// at a strictly higher qos upgrades it, anything else changes nothing.
    fn add_subscription(&mut self, topic_id: TopicId, qos: QoS) {
        let connected = self.connected;
        let mapping = match self.registry.get_mut(topic_id) {
            Some(mapping) => mapping,
            None => return,
        };

        if !mapping.subscribed {
            mapping.subscribed = true;
            mapping.sub_qos = qos;
        } else if qos > mapping.sub_qos {
            mapping.sub_qos = qos;
        } else {
            return;
        }

        let name = mapping.name.clone();
        if connected {
            self.broker.subscribe(&name, qos);
        }
    }

    fn delete_subscription(&mut self, topic_id: TopicId) {
        let connected = self.connected;
        let mapping = match self.registry.get_mut(topic_id) {
            Some(mapping) => mapping,
            None => return,
        };
        // the upstream side only sees the last subscriber leave
        if !mapping.subscribed {
            return;
        }

        mapping.subscribed = false;
        mapping.sub_qos = QoS::AtMostOnce;

        let name = mapping.name.clone();
        if connected {
            self.broker.unsubscribe(&name);
        }
    }

    fn enqueue_publish(&mut self, packet: Vec<u8>) {
        if self.pub_queue.len() == MAX_QUEUED_PUBLISH {
            self.pub_queue.pop_front();
        }
        self.pub_queue.push_back(packet);
    }

    fn drain_publish_queue(&mut self) {
        while let Some(packet) = self.pub_queue.pop_front() {
            let (body, header) = match Header::parse::<()>(&packet) {
                Ok(parsed) => parsed,
                Err(_) => continue,
            };
            if header.msg_type != Type::PUBLISH {
                continue;
            }
            let msg = match Publish::parse::<()>(body) {
                Ok((_, msg)) => msg,
                Err(_) => continue,
            };
            if msg.msg_id != 0 {
                continue;
            }

            for client in self
                .clients
                .iter()
                .filter(|c| c.is_subscribed(msg.topic_id))
            {
                self.transport
                    .borrow_mut()
                    .write_packet(&packet, client.address());
            }
        }
    }

    fn instance_index(&self, address: &Address) -> Option<usize> {
        self.clients
            .iter()
            .position(|c| c.is_occupied() && c.address() == address)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;

    #[derive(Default)]
    struct Wire {
        inbound: VecDeque<(Bytes, Address)>,
        unicasts: Vec<(Vec<u8>, Address)>,
        broadcasts: Vec<Vec<u8>>,
    }

    #[derive(Clone, Default)]
    struct MockTransport(Rc<RefCell<Wire>>);

    impl MockTransport {
        fn push(&self, message: Message, from: &Address) {
            self.0
                .borrow_mut()
                .inbound
                .push_back((message.pack().into(), from.clone()));
        }

        fn take_unicasts(&self) -> Vec<(Vec<u8>, Address)> {
            self.0.borrow_mut().unicasts.drain(..).collect()
        }

        fn take_broadcasts(&self) -> Vec<Vec<u8>> {
            self.0.borrow_mut().broadcasts.drain(..).collect()
        }
    }

    impl Transport for MockTransport {
        fn read_packet(&mut self) -> Option<(Bytes, Address)> {
            self.0.borrow_mut().inbound.pop_front()
        }

        fn write_packet(&mut self, data: &[u8], dest: &Address) -> usize {
            self.0
                .borrow_mut()
                .unicasts
                .push((data.to_vec(), dest.clone()));
            data.len()
        }

        fn broadcast(&mut self, data: &[u8]) -> usize {
            self.0.borrow_mut().broadcasts.push(data.to_vec());
            data.len()
        }
    }

    #[derive(Default)]
    struct BrokerLog {
        publishes: Vec<(Vec<u8>, Vec<u8>, QoS, bool)>,
        subscribes: Vec<(Vec<u8>, QoS)>,
        unsubscribes: Vec<Vec<u8>>,
    }

    #[derive(Clone, Default)]
    struct MockBroker(Rc<RefCell<BrokerLog>>);

    impl BrokerClient for MockBroker {
        fn publish(&mut self, topic: &[u8], payload: &[u8], qos: QoS, retain: bool) {
            self.0
                .borrow_mut()
                .publishes
                .push((topic.to_vec(), payload.to_vec(), qos, retain));
        }

        fn subscribe(&mut self, topic: &[u8], qos: QoS) {
            self.0.borrow_mut().subscribes.push((topic.to_vec(), qos));
        }

        fn unsubscribe(&mut self, topic: &[u8]) {
            self.0.borrow_mut().unsubscribes.push(topic.to_vec());
        }
    }

    fn gateway() -> (
        Gateway<MockTransport, MockBroker>,
        MockTransport,
        MockBroker,
        Instant,
    ) {
        let wire = MockTransport::default();
        let broker = MockBroker::default();
        let now = Instant::now();
        let gateway = Gateway::new(1, broker.clone(), wire.clone(), now);
        (gateway, wire, broker, now)
    }

    fn addr(n: u8) -> Address {
        Address::new(vec![n])
    }

    fn sent_message(packet: &[u8]) -> Message {
        match Message::parse::<()>(packet) {
            Ok((_, message)) => message,
            Err(err) => panic!("unparseable wire packet {:?}: {:?}", packet, err),
        }
    }

    fn connect_client(
        gateway: &mut Gateway<MockTransport, MockBroker>,
        wire: &MockTransport,
        from: &Address,
        now: Instant,
    ) {
        wire.push(
            Message::Connect(Connect {
                flags: Flags::default(),
                duration: 30,
                client_id: b"client",
            }),
            from,
        );
        gateway.poll(now);
        let sent = wire.take_unicasts();
        assert_eq!(
            sent_message(&sent[0].0),
            Message::ConnectAck(ConnectAck {
                return_code: ReturnCode::Accepted,
            })
        );
    }

    fn subscribe_client(
        gateway: &mut Gateway<MockTransport, MockBroker>,
        wire: &MockTransport,
        from: &Address,
        topic: &'static [u8],
        qos: QoS,
        now: Instant,
    ) -> TopicId {
        wire.push(
            Message::Subscribe(Subscribe {
                flags: Flags::from(qos),
                msg_id: 2,
                topic,
            }),
            from,
        );
        gateway.poll(now);
        let sent = wire.take_unicasts();
        match sent_message(&sent[0].0) {
            Message::SubscribeAck(ack) => {
                assert_eq!(ack.return_code, ReturnCode::Accepted);
                ack.topic_id
            }
            other => panic!("expected SUBACK, got {:?}", other),
        }
    }

    #[test]
    fn test_connect_fills_table_then_congestion() {
        let (mut gateway, wire, _broker, now) = gateway();

        for n in 0..MAX_NUM_CLIENTS as u8 {
            connect_client(&mut gateway, &wire, &addr(n + 10), now);
        }

        // the table is full: one more client is turned away
        wire.push(
            Message::Connect(Connect {
                flags: Flags::default(),
                duration: 30,
                client_id: b"straggler",
            }),
            &addr(99),
        );
        gateway.poll(now);
        let sent = wire.take_unicasts();
        assert_eq!(
            sent_message(&sent[0].0),
            Message::ConnectAck(ConnectAck {
                return_code: ReturnCode::Congestion,
            })
        );

        // but a repeat CONNECT from a known address overwrites in place
        connect_client(&mut gateway, &wire, &addr(10), now);
    }

    #[test]
    fn test_connect_empty_client_id_rejected() {
        let (mut gateway, wire, _broker, now) = gateway();
        wire.push(
            Message::Connect(Connect {
                flags: Flags::default(),
                duration: 30,
                client_id: b"",
            }),
            &addr(2),
        );
        gateway.poll(now);
        assert!(wire.take_unicasts().is_empty());
    }

    #[test]
    fn test_searchgw_answered_with_gwinfo() {
        let (mut gateway, wire, _broker, now) = gateway();
        wire.push(Message::SearchGw(SearchGw { radius: 0 }), &addr(2));
        gateway.poll(now);

        let broadcasts = wire.take_broadcasts();
        assert_eq!(
            sent_message(&broadcasts[0]),
            Message::GwInfo(GwInfo {
                gw_id: 1,
                gw_addr: b"",
            })
        );
    }

    #[test]
    fn test_register_assigns_topic_id() {
        let (mut gateway, wire, _broker, now) = gateway();
        connect_client(&mut gateway, &wire, &addr(2), now);

        wire.push(
            Message::Register(Register {
                topic_id: 0,
                msg_id: 7,
                topic_name: b"led",
            }),
            &addr(2),
        );
        gateway.poll(now);
        let sent = wire.take_unicasts();
        assert_eq!(
            sent_message(&sent[0].0),
            Message::RegisterAck(RegisterAck {
                topic_id: 1,
                msg_id: 7,
                return_code: ReturnCode::Accepted,
            })
        );

        // a nonzero topic id in a client REGISTER is malformed
        wire.push(
            Message::Register(Register {
                topic_id: 5,
                msg_id: 8,
                topic_name: b"led",
            }),
            &addr(2),
        );
        // and so is a REGISTER from a stranger
        wire.push(
            Message::Register(Register {
                topic_id: 0,
                msg_id: 9,
                topic_name: b"led",
            }),
            &addr(3),
        );
        gateway.poll(now);
        assert!(wire.take_unicasts().is_empty());
    }

    #[test]
    fn test_register_congestion_when_instance_table_full() {
        let (mut gateway, wire, _broker, now) = gateway();
        connect_client(&mut gateway, &wire, &addr(2), now);

        for n in 0..10 {
            wire.push(
                Message::Register(Register {
                    topic_id: 0,
                    msg_id: n,
                    topic_name: format!("topic/{}", n).into_bytes().leak(),
                }),
                &addr(2),
            );
        }
        gateway.poll(now);
        assert!(wire
            .take_unicasts()
            .iter()
            .all(|(packet, _)| match sent_message(packet) {
                Message::RegisterAck(ack) => ack.return_code == ReturnCode::Accepted,
                _ => false,
            }));

        wire.push(
            Message::Register(Register {
                topic_id: 0,
                msg_id: 11,
                topic_name: b"one/too/many",
            }),
            &addr(2),
        );
        gateway.poll(now);
        let sent = wire.take_unicasts();
        assert_eq!(
            sent_message(&sent[0].0),
            Message::RegisterAck(RegisterAck {
                topic_id: 0,
                msg_id: 11,
                return_code: ReturnCode::Congestion,
            })
        );
    }

    #[test]
    fn test_publish_bridged_upstream_when_connected() {
        let (mut gateway, wire, broker, now) = gateway();
        gateway.on_broker_connect(true);
        connect_client(&mut gateway, &wire, &addr(2), now);
        let topic_id = subscribe_client(&mut gateway, &wire, &addr(2), b"led", QoS::AtMostOnce, now);

        wire.push(
            Message::Publish(Publish {
                flags: Flags::RETAIN,
                topic_id,
                msg_id: 0,
                data: b"\x01",
            }),
            &addr(2),
        );
        // from a stranger: dropped
        wire.push(
            Message::Publish(Publish {
                flags: Flags::default(),
                topic_id,
                msg_id: 0,
                data: b"\x02",
            }),
            &addr(3),
        );
        // QoS 1: not bridged
        wire.push(
            Message::Publish(Publish {
                flags: Flags::from(QoS::AtLeastOnce),
                topic_id,
                msg_id: 42,
                data: b"\x03",
            }),
            &addr(2),
        );
        gateway.poll(now);

        assert_eq!(
            broker.0.borrow().publishes,
            vec![(b"led".to_vec(), b"\x01".to_vec(), QoS::AtMostOnce, true)]
        );
        // bridged upstream, not fanned out locally
        assert!(wire.take_unicasts().is_empty());
    }

    #[test]
    fn test_publish_fans_out_locally_without_broker() {
        let (mut gateway, wire, broker, now) = gateway();
        connect_client(&mut gateway, &wire, &addr(2), now);
        connect_client(&mut gateway, &wire, &addr(3), now);
        let topic_id = subscribe_client(&mut gateway, &wire, &addr(2), b"led", QoS::AtMostOnce, now);

        // client 3 publishes; only subscribed client 2 receives it
        wire.push(
            Message::Publish(Publish {
                flags: Flags::default(),
                topic_id,
                msg_id: 0,
                data: b"\x01",
            }),
            &addr(3),
        );
        gateway.poll(now);

        let sent = wire.take_unicasts();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, addr(2));
        assert_eq!(
            sent_message(&sent[0].0),
            Message::Publish(Publish {
                flags: Flags::default(),
                topic_id,
                msg_id: 0,
                data: b"\x01",
            })
        );
        assert!(broker.0.borrow().publishes.is_empty());
    }

    #[test]
    fn test_subscription_aggregation() {
        let (mut gateway, wire, broker, now) = gateway();
        gateway.on_broker_connect(true);
        connect_client(&mut gateway, &wire, &addr(2), now);
        connect_client(&mut gateway, &wire, &addr(3), now);

        // first subscriber opens the upstream subscription
        subscribe_client(&mut gateway, &wire, &addr(2), b"t", QoS::AtMostOnce, now);
        assert_eq!(
            broker.0.borrow().subscribes,
            vec![(b"t".to_vec(), QoS::AtMostOnce)]
        );

        // a second subscriber at the same qos changes nothing upstream
        subscribe_client(&mut gateway, &wire, &addr(3), b"t", QoS::AtMostOnce, now);
        assert_eq!(broker.0.borrow().subscribes.len(), 1);

        // re-subscribing at a higher qos upgrades upstream
        subscribe_client(&mut gateway, &wire, &addr(2), b"t", QoS::AtLeastOnce, now);
        assert_eq!(
            broker.0.borrow().subscribes,
            vec![
                (b"t".to_vec(), QoS::AtMostOnce),
                (b"t".to_vec(), QoS::AtLeastOnce),
            ]
        );

        // the first unsubscribe leaves the upstream subscription alone
        wire.push(
            Message::Unsubscribe(Unsubscribe {
                flags: Flags::default(),
                msg_id: 5,
                topic: b"t",
            }),
            &addr(2),
        );
        gateway.poll(now);
        let sent = wire.take_unicasts();
        assert_eq!(
            sent_message(&sent[0].0),
            Message::UnsubscribeAck(UnsubscribeAck { msg_id: 5 })
        );
        assert!(broker.0.borrow().unsubscribes.is_empty());

        // the last subscriber leaving tears it down
        wire.push(
            Message::Unsubscribe(Unsubscribe {
                flags: Flags::default(),
                msg_id: 6,
                topic: b"t",
            }),
            &addr(3),
        );
        gateway.poll(now);
        wire.take_unicasts();
        assert_eq!(broker.0.borrow().unsubscribes, vec![b"t".to_vec()]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let (mut gateway, wire, broker, now) = gateway();
        gateway.on_broker_connect(true);
        connect_client(&mut gateway, &wire, &addr(2), now);

        // never subscribed, yet acknowledged; upstream sees nothing
        wire.push(
            Message::Unsubscribe(Unsubscribe {
                flags: Flags::default(),
                msg_id: 5,
                topic: b"t",
            }),
            &addr(2),
        );
        gateway.poll(now);
        let sent = wire.take_unicasts();
        assert_eq!(
            sent_message(&sent[0].0),
            Message::UnsubscribeAck(UnsubscribeAck { msg_id: 5 })
        );
        assert!(broker.0.borrow().unsubscribes.is_empty());
    }

    #[test]
    fn test_broker_reconnect_replays_subscriptions() {
        let (mut gateway, wire, broker, now) = gateway();
        connect_client(&mut gateway, &wire, &addr(2), now);

        // aggregated while the broker is down, nothing goes upstream yet
        subscribe_client(&mut gateway, &wire, &addr(2), b"t", QoS::AtLeastOnce, now);
        assert!(broker.0.borrow().subscribes.is_empty());

        gateway.on_broker_connect(true);
        assert_eq!(
            broker.0.borrow().subscribes,
            vec![(b"t".to_vec(), QoS::AtLeastOnce)]
        );

        // a repeated "connected" report must not replay again
        gateway.on_broker_connect(true);
        assert_eq!(broker.0.borrow().subscribes.len(), 1);

        gateway.on_broker_connect(false);
        assert!(!gateway.poll(now));
    }

    #[test]
    fn test_lost_client_is_deregistered() {
        let (mut gateway, wire, _broker, now) = gateway();
        connect_client(&mut gateway, &wire, &addr(2), now);

        // a ping inside the window refreshes the client
        wire.push(Message::PingReq(PingReq { client_id: b"" }), &addr(2));
        let later = now + Duration::from_secs(40);
        gateway.poll(later);
        let sent = wire.take_unicasts();
        assert_eq!(sent_message(&sent[0].0), Message::PingResp);

        // then 1.5 x keep-alive of silence expires the slot
        let expired = later + Duration::from_secs(46);
        gateway.poll(expired);

        // the expired client is a stranger now
        wire.push(Message::PingReq(PingReq { client_id: b"" }), &addr(2));
        gateway.poll(expired);
        assert!(wire.take_unicasts().is_empty());
    }

    #[test]
    fn test_queue_overflow_drops_oldest() {
        let (mut gateway, wire, _broker, now) = gateway();
        connect_client(&mut gateway, &wire, &addr(2), now);
        let topic_id = subscribe_client(&mut gateway, &wire, &addr(2), b"t", QoS::AtMostOnce, now);

        for n in 0..=MAX_QUEUED_PUBLISH {
            gateway.on_broker_publish(b"t", &[n as u8], Flags::default());
        }
        gateway.poll(now);

        let sent = wire.take_unicasts();
        assert_eq!(sent.len(), MAX_QUEUED_PUBLISH);
        // payload 0 fell off the front of the queue
        assert_eq!(
            sent_message(&sent[0].0),
            Message::Publish(Publish {
                flags: Flags::default(),
                topic_id,
                msg_id: 0,
                data: b"\x01",
            })
        );
    }

    #[test]
    fn test_broker_publish_with_oversized_topic_dropped() {
        let (mut gateway, wire, _broker, now) = gateway();
        connect_client(&mut gateway, &wire, &addr(2), now);

        gateway.on_broker_publish(&[b'x'; 64], b"\x01", Flags::default());
        gateway.poll(now);
        assert!(wire.take_unicasts().is_empty());
    }
}
