use core::convert::TryFrom;

use num_enum::TryFromPrimitive;

use crate::proto::{MsgId, QoS, TopicId, TopicIdType};
use crate::ReturnCode;

/// MQTT-SN Control Packets
#[derive(Debug, PartialEq, Clone)]
pub enum Message<'a> {
    /// Gateway presence broadcast
    Advertise(Advertise),
    /// Client broadcast looking for a gateway
    SearchGw(SearchGw),
    /// Gateway discovery answer
    GwInfo(GwInfo<'a>),
    /// Client request to connect to a gateway
    Connect(Connect<'a>),
    /// Connect acknowledgment
    ConnectAck(ConnectAck),
    /// Topic name to topic id registration request
    Register(Register<'a>),
    /// Register acknowledgment
    RegisterAck(RegisterAck),
    /// Publish message
    Publish(Publish<'a>),
    /// Publish acknowledgment
    PublishAck(PublishAck),
    /// Client subscribe request
    Subscribe(Subscribe<'a>),
    /// Subscribe acknowledgment
    SubscribeAck(SubscribeAck),
    /// Unsubscribe request
    Unsubscribe(Unsubscribe<'a>),
    /// Unsubscribe acknowledgment
    UnsubscribeAck(UnsubscribeAck),
    /// PING request, keeps an idle session alive
    PingReq(PingReq<'a>),
    /// PING response
    PingResp,
    /// Client is disconnecting
    Disconnect(Disconnect),
}

/// Packet Header
///
/// Every MQTT-SN packet starts with the total packet length (header
/// included) followed by the message type code. Single-byte length framing
/// only: the length values 0 and 1 are invalid, 1 being the escape of the
/// unsupported 3-byte length form.
#[derive(Debug, PartialEq, Clone)]
pub struct Header {
    /// total packet length, including this header
    pub length: u8,
    /// MQTT-SN message type
    pub msg_type: Type,
}

/// MQTT-SN message type codes.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
#[allow(missing_docs)]
pub enum Type {
    ADVERTISE = 0x00,
    SEARCHGW = 0x01,
    GWINFO = 0x02,
    CONNECT = 0x04,
    CONNACK = 0x05,
    WILLTOPICREQ = 0x06,
    WILLTOPIC = 0x07,
    WILLMSGREQ = 0x08,
    WILLMSG = 0x09,
    REGISTER = 0x0A,
    REGACK = 0x0B,
    PUBLISH = 0x0C,
    PUBACK = 0x0D,
    PUBCOMP = 0x0E,
    PUBREC = 0x0F,
    PUBREL = 0x10,
    SUBSCRIBE = 0x12,
    SUBACK = 0x13,
    UNSUBSCRIBE = 0x14,
    UNSUBACK = 0x15,
    PINGREQ = 0x16,
    PINGRESP = 0x17,
    DISCONNECT = 0x18,
    WILLTOPICUPD = 0x1A,
    WILLTOPICRESP = 0x1B,
    WILLMSGUPD = 0x1C,
    WILLMSGRESP = 0x1D,
}

/// The value of the Protocol Id field of CONNECT.
pub const PROTOCOL_ID: u8 = 0x01;

bitflags! {
    /// The MQTT-SN flags byte, carried by CONNECT, PUBLISH, SUBSCRIBE,
    /// SUBACK and UNSUBSCRIBE.
    #[derive(Default)]
    pub struct Flags: u8 {
        /// this message is a re-delivery attempt
        const DUP           = 0b1000_0000;
        /// two-bit Quality of Service group
        const QOS           = 0b0110_0000;
        /// the receiver must retain this message for future subscribers
        const RETAIN        = 0b0001_0000;
        /// the client asks for WILL topic/message prompting
        const WILL          = 0b0000_1000;
        /// discard any state held for this client id
        const CLEAN_SESSION = 0b0000_0100;
        /// two-bit topic id kind group
        const TOPIC_ID_TYPE = 0b0000_0011;
    }
}

const QOS_SHIFT: usize = 5;

impl Flags {
    /// The Quality of Service level carried in the qos group.
    ///
    /// The reserved bit pattern 3 ("QoS -1") reads as QoS 0.
    pub fn qos(self) -> QoS {
        QoS::try_from((self & Self::QOS).bits() >> QOS_SHIFT).unwrap_or(QoS::AtMostOnce)
    }

    /// The topic id kind carried in the topic_id_type group.
    ///
    /// The reserved bit pattern 3 reads as a normal topic name.
    pub fn topic_id_type(self) -> TopicIdType {
        TopicIdType::try_from((self & Self::TOPIC_ID_TYPE).bits()).unwrap_or(TopicIdType::Normal)
    }
}

impl From<QoS> for Flags {
    fn from(qos: QoS) -> Self {
        Self::from_bits_truncate((qos as u8) << QOS_SHIFT)
    }
}

/// Broadcast periodically by a gateway to announce its presence.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Advertise {
    /// the id of the advertising gateway
    pub gw_id: u8,
    /// seconds until the next ADVERTISE
    pub duration: u16,
}

/// Broadcast by a client looking for a gateway.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct SearchGw {
    /// broadcast radius, in hops
    pub radius: u8,
}

/// Answers SEARCHGW.
///
/// A gateway answers with its id alone; a client relaying on behalf of a
/// gateway it knows also carries that gateway's transport address.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct GwInfo<'a> {
    /// the id of the discovered gateway
    pub gw_id: u8,
    /// the gateway's address when relayed by a client, empty otherwise
    pub gw_addr: &'a [u8],
}

/// Client request to connect to a gateway.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Connect<'a> {
    /// will and clean_session are the meaningful groups here
    pub flags: Flags,
    /// keep-alive duration in seconds
    pub duration: u16,
    /// identifies the client to the gateway
    pub client_id: &'a [u8],
}

/// Connect acknowledgment
#[derive(Debug, PartialEq, Clone)]
pub struct ConnectAck {
    /// the verdict on the CONNECT
    pub return_code: ReturnCode,
}

/// Binds a topic name to a gateway-assigned topic id.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Register<'a> {
    /// 0 when sent by a client; the assigned id when sent by a gateway
    pub topic_id: TopicId,
    /// matches the REGACK to this request
    pub msg_id: MsgId,
    /// the topic name being registered
    pub topic_name: &'a [u8],
}

/// Register acknowledgment
#[derive(Debug, PartialEq, Clone)]
pub struct RegisterAck {
    /// the assigned topic id, 0 on rejection
    pub topic_id: TopicId,
    /// echoes the REGISTER
    pub msg_id: MsgId,
    /// the verdict on the REGISTER
    pub return_code: ReturnCode,
}

/// Publish message
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Publish<'a> {
    /// dup, qos, retain and topic_id_type are meaningful here
    pub flags: Flags,
    /// the registered alias of the topic published to
    pub topic_id: TopicId,
    /// 0 for QoS 0, the acknowledgement key otherwise
    pub msg_id: MsgId,
    /// the application payload
    pub data: &'a [u8],
}

/// Publish acknowledgment
#[derive(Debug, PartialEq, Clone)]
pub struct PublishAck {
    /// echoes the PUBLISH
    pub topic_id: TopicId,
    /// echoes the PUBLISH
    pub msg_id: MsgId,
    /// the verdict on the PUBLISH
    pub return_code: ReturnCode,
}

/// Client subscribe request
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Subscribe<'a> {
    /// qos and topic_id_type are meaningful here
    pub flags: Flags,
    /// matches the SUBACK to this request
    pub msg_id: MsgId,
    /// the topic name subscribed to
    pub topic: &'a [u8],
}

/// Subscribe acknowledgment
#[derive(Debug, PartialEq, Clone)]
pub struct SubscribeAck {
    /// the granted qos group
    pub flags: Flags,
    /// the topic id to watch for in PUBLISH, 0 on rejection
    pub topic_id: TopicId,
    /// echoes the SUBSCRIBE
    pub msg_id: MsgId,
    /// the verdict on the SUBSCRIBE
    pub return_code: ReturnCode,
}

/// Unsubscribe request
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Unsubscribe<'a> {
    /// topic_id_type is the meaningful group here
    pub flags: Flags,
    /// matches the UNSUBACK to this request
    pub msg_id: MsgId,
    /// the topic name unsubscribed from
    pub topic: &'a [u8],
}

/// Unsubscribe acknowledgment
#[derive(Debug, Default, PartialEq, Clone)]
pub struct UnsubscribeAck {
    /// echoes the UNSUBSCRIBE
    pub msg_id: MsgId,
}

/// PING request
///
/// A sleeping client identifies itself to ask for buffered messages; an
/// active one pings anonymously.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct PingReq<'a> {
    /// the pinging client, empty for a plain keep-alive probe
    pub client_id: &'a [u8],
}

/// Client is disconnecting
///
/// A duration turns the disconnect into a request to sleep for that many
/// seconds.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Disconnect {
    /// requested sleep duration in seconds, if any
    pub duration: Option<u16>,
}

impl Message<'_> {
    /// The MQTT-SN message type code of this packet.
    pub fn msg_type(&self) -> Type {
        match *self {
            Message::Advertise(_) => Type::ADVERTISE,
            Message::SearchGw(_) => Type::SEARCHGW,
            Message::GwInfo(_) => Type::GWINFO,
            Message::Connect(_) => Type::CONNECT,
            Message::ConnectAck(_) => Type::CONNACK,
            Message::Register(_) => Type::REGISTER,
            Message::RegisterAck(_) => Type::REGACK,
            Message::Publish(_) => Type::PUBLISH,
            Message::PublishAck(_) => Type::PUBACK,
            Message::Subscribe(_) => Type::SUBSCRIBE,
            Message::SubscribeAck(_) => Type::SUBACK,
            Message::Unsubscribe(_) => Type::UNSUBSCRIBE,
            Message::UnsubscribeAck(_) => Type::UNSUBACK,
            Message::PingReq(_) => Type::PINGREQ,
            Message::PingResp => Type::PINGRESP,
            Message::Disconnect(_) => Type::DISCONNECT,
        }
    }
}
