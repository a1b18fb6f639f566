use std::time::Duration;

use derive_more::Display;
use num_enum::TryFromPrimitive;

/// Quality of Service levels
///
/// MQTT-SN reuses the MQTT delivery semantics; the two-bit qos group of the
/// flags byte carries the level.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive)]
pub enum QoS {
    /// At most once delivery
    ///
    /// The message is delivered according to the capabilities of the
    /// underlying network. No response is sent by the receiver and no retry
    /// is performed by the sender.
    AtMostOnce = 0,

    /// At least once delivery
    ///
    /// A QoS 1 PUBLISH carries a nonzero message id and is acknowledged by a
    /// PUBACK.
    AtLeastOnce = 1,

    /// Exactly once delivery
    ExactlyOnce = 2,
}

/// Topic id kinds carried in the two-bit topic_id_type group of the flags
/// byte.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
pub enum TopicIdType {
    /// A registered topic name.
    Normal = 0,
    /// A pre-defined topic id agreed out of band.
    Predefined = 1,
    /// A two-character short topic name.
    Short = 2,
}

/// The result of an operation, carried in CONNACK, REGACK, PUBACK and SUBACK.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive, Display)]
pub enum ReturnCode {
    /// Accepted
    #[display(fmt = "Accepted")]
    Accepted = 0x00,
    /// Rejected: congestion
    #[display(fmt = "Rejected: congestion")]
    Congestion = 0x01,
    /// Rejected: invalid topic ID
    #[display(fmt = "Rejected: invalid topic ID")]
    InvalidTopicId = 0x02,
    /// Rejected: not supported
    #[display(fmt = "Rejected: not supported")]
    NotSupported = 0x03,
}

/// Message Identifier
///
/// Matches an acknowledgement to the request that solicited it. The value 0
/// is reserved and stands for "no id" (QoS 0 PUBLISH).
pub type MsgId = u16;

/// Topic Identifier
///
/// A small integer alias for a topic name, assigned by the gateway through
/// REGISTER/SUBSCRIBE and carried in PUBLISH instead of the name.
pub type TopicId = u16;

/// The `TopicId` value standing for "not assigned yet".
pub const TOPIC_NOT_ASSIGNED: TopicId = 0x0000;

/// The `TopicId` value standing for "unsubscribed"; never assigned to a
/// mapping.
pub const TOPIC_UNSUBSCRIBED: TopicId = 0xFFFF;

/// Ceiling on the total packet length the codec will emit, header included.
///
/// Trailing variable-length fields are truncated to fit. The protocol itself
/// allows up to 255 with single-byte framing; this stack targets constrained
/// links and caps lower.
pub const MAX_MSG_LEN: usize = 32;

/// Length of the `<length, type>` packet header.
pub const HEADER_LEN: usize = 2;

/// Longest client id a CONNECT or PINGREQ will carry.
pub const MAX_CLIENT_ID_LEN: usize = 23;

/// Longest topic name the gateway registry accepts: the largest name a
/// REGISTER frame can carry without truncation.
pub const MAX_TOPIC_NAME_LEN: usize = MAX_MSG_LEN - HEADER_LEN - 4;

/// Longest gateway address a GWINFO will carry.
pub const GW_ADDR_LENGTH: usize = 2;

/// Keep-alive duration (seconds) used when the application does not pick one.
pub const DEFAULT_KEEPALIVE: u16 = 30;

/// Delay between retransmissions of an unacknowledged unicast request.
pub const T_RETRY: Duration = Duration::from_secs(5);

/// How many retransmissions are attempted before a session is given up on.
pub const N_RETRY: u8 = 3;

/// Upper bound of the random delay preceding a SEARCHGW broadcast.
pub const T_SEARCHGW: Duration = Duration::from_secs(5);

/// Topic table slots per client, on both sides of the protocol.
pub const MAX_INSTANCE_TOPICS: usize = 10;

/// Topic-name mappings a gateway can hold.
pub const MAX_GATEWAY_TOPICS: usize = 60;

/// Client instances a gateway can serve at once.
pub const MAX_NUM_CLIENTS: usize = 10;

/// Serialized PUBLISH packets the gateway fan-out queue will hold; the
/// oldest entry is dropped on overflow.
pub const MAX_QUEUED_PUBLISH: usize = 64;
