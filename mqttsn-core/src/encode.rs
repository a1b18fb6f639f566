use core::mem;

use bytes::BufMut;

use crate::packet::*;
use crate::proto::*;

/// A trait for packet parts which can be written to byte-oriented sinks.
pub trait WriteTo {
    /// Gets the encoded size of this part, truncation applied.
    fn size(&self) -> usize;

    /// Writes this part to the given byte-oriented sink.
    fn write_to<T: BufMut>(&self, buf: &mut T);
}

/// Clamps a trailing variable-length field so the whole packet, whose fixed
/// part (header included) is `fixed` bytes, stays within MAX_MSG_LEN.
fn tail(field: &[u8], fixed: usize) -> &[u8] {
    &field[..field.len().min(MAX_MSG_LEN - fixed)]
}

impl Message<'_> {
    /// Serializes the complete framed packet, header included.
    ///
    /// Trailing variable-length fields are truncated so the result never
    /// exceeds MAX_MSG_LEN; the emitted length byte is always the true
    /// total packet length.
    pub fn pack(&self) -> Vec<u8> {
        let length = HEADER_LEN + self.size();
        let mut buf = Vec::with_capacity(length);

        Header {
            length: length as u8,
            msg_type: self.msg_type(),
        }
        .write_to(&mut buf);
        self.write_to(&mut buf);
        buf
    }
}

impl WriteTo for Message<'_> {
    fn size(&self) -> usize {
        match self {
            Message::Advertise(advertise) => advertise.size(),
            Message::SearchGw(search_gw) => search_gw.size(),
            Message::GwInfo(gw_info) => gw_info.size(),
            Message::Connect(connect) => connect.size(),
            Message::ConnectAck(connect_ack) => connect_ack.size(),
            Message::Register(register) => register.size(),
            Message::RegisterAck(register_ack) => register_ack.size(),
            Message::Publish(publish) => publish.size(),
            Message::PublishAck(publish_ack) => publish_ack.size(),
            Message::Subscribe(subscribe) => subscribe.size(),
            Message::SubscribeAck(subscribe_ack) => subscribe_ack.size(),
            Message::Unsubscribe(unsubscribe) => unsubscribe.size(),
            Message::UnsubscribeAck(unsubscribe_ack) => unsubscribe_ack.size(),
            Message::PingReq(ping_req) => ping_req.size(),
            Message::PingResp => 0,
            Message::Disconnect(disconnect) => disconnect.size(),
        }
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        match self {
            Message::Advertise(advertise) => advertise.write_to(buf),
            Message::SearchGw(search_gw) => search_gw.write_to(buf),
            Message::GwInfo(gw_info) => gw_info.write_to(buf),
            Message::Connect(connect) => connect.write_to(buf),
            Message::ConnectAck(connect_ack) => connect_ack.write_to(buf),
            Message::Register(register) => register.write_to(buf),
            Message::RegisterAck(register_ack) => register_ack.write_to(buf),
            Message::Publish(publish) => publish.write_to(buf),
            Message::PublishAck(publish_ack) => publish_ack.write_to(buf),
            Message::Subscribe(subscribe) => subscribe.write_to(buf),
            Message::SubscribeAck(subscribe_ack) => subscribe_ack.write_to(buf),
            Message::Unsubscribe(unsubscribe) => unsubscribe.write_to(buf),
            Message::UnsubscribeAck(unsubscribe_ack) => unsubscribe_ack.write_to(buf),
            Message::PingReq(ping_req) => ping_req.write_to(buf),
            Message::PingResp => {}
            Message::Disconnect(disconnect) => disconnect.write_to(buf),
        }
    }
}

impl WriteTo for Header {
    fn size(&self) -> usize {
        HEADER_LEN
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(self.length);
        buf.put_u8(self.msg_type as u8);
    }
}

impl WriteTo for Advertise {
    fn size(&self) -> usize {
        mem::size_of::<u8>() + mem::size_of::<u16>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(self.gw_id);
        buf.put_u16(self.duration);
    }
}

impl WriteTo for SearchGw {
    fn size(&self) -> usize {
        mem::size_of::<u8>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(self.radius);
    }
}

impl GwInfo<'_> {
    fn gw_addr(&self) -> &[u8] {
        &self.gw_addr[..self.gw_addr.len().min(GW_ADDR_LENGTH)]
    }
}

impl WriteTo for GwInfo<'_> {
    fn size(&self) -> usize {
        mem::size_of::<u8>() + self.gw_addr().len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(self.gw_id);
        buf.put_slice(self.gw_addr());
    }
}

impl Connect<'_> {
    fn client_id(&self) -> &[u8] {
        &self.client_id[..self.client_id.len().min(MAX_CLIENT_ID_LEN)]
    }
}

impl WriteTo for Connect<'_> {
    fn size(&self) -> usize {
        mem::size_of::<Flags>()
            + mem::size_of::<u8>()      // protocol_id
            + mem::size_of::<u16>()     // duration
            + self.client_id().len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(self.flags.bits());
        buf.put_u8(PROTOCOL_ID);
        buf.put_u16(self.duration);
        buf.put_slice(self.client_id());
    }
}

impl WriteTo for ConnectAck {
    fn size(&self) -> usize {
        mem::size_of::<ReturnCode>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(self.return_code as u8);
    }
}

const REGISTER_FIXED_LEN: usize = HEADER_LEN + mem::size_of::<TopicId>() + mem::size_of::<MsgId>();

impl WriteTo for Register<'_> {
    fn size(&self) -> usize {
        mem::size_of::<TopicId>()
            + mem::size_of::<MsgId>()
            + tail(self.topic_name, REGISTER_FIXED_LEN).len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.topic_id);
        buf.put_u16(self.msg_id);
        buf.put_slice(tail(self.topic_name, REGISTER_FIXED_LEN));
    }
}

impl WriteTo for RegisterAck {
    fn size(&self) -> usize {
        mem::size_of::<TopicId>() + mem::size_of::<MsgId>() + mem::size_of::<ReturnCode>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.topic_id);
        buf.put_u16(self.msg_id);
        buf.put_u8(self.return_code as u8);
    }
}

const PUBLISH_FIXED_LEN: usize =
    HEADER_LEN + mem::size_of::<Flags>() + mem::size_of::<TopicId>() + mem::size_of::<MsgId>();

impl WriteTo for Publish<'_> {
    fn size(&self) -> usize {
        mem::size_of::<Flags>()
            + mem::size_of::<TopicId>()
            + mem::size_of::<MsgId>()
            + tail(self.data, PUBLISH_FIXED_LEN).len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.topic_id);
        buf.put_u16(self.msg_id);
        buf.put_slice(tail(self.data, PUBLISH_FIXED_LEN));
    }
}

impl WriteTo for PublishAck {
    fn size(&self) -> usize {
        mem::size_of::<TopicId>() + mem::size_of::<MsgId>() + mem::size_of::<ReturnCode>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.topic_id);
        buf.put_u16(self.msg_id);
        buf.put_u8(self.return_code as u8);
    }
}

const SUBSCRIBE_FIXED_LEN: usize = HEADER_LEN + mem::size_of::<Flags>() + mem::size_of::<MsgId>();

impl WriteTo for Subscribe<'_> {
    fn size(&self) -> usize {
        mem::size_of::<Flags>()
            + mem::size_of::<MsgId>()
            + tail(self.topic, SUBSCRIBE_FIXED_LEN).len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.msg_id);
        buf.put_slice(tail(self.topic, SUBSCRIBE_FIXED_LEN));
    }
}

impl WriteTo for SubscribeAck {
    fn size(&self) -> usize {
        mem::size_of::<Flags>()
            + mem::size_of::<TopicId>()
            + mem::size_of::<MsgId>()
            + mem::size_of::<ReturnCode>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.topic_id);
        buf.put_u16(self.msg_id);
        buf.put_u8(self.return_code as u8);
    }
}

impl WriteTo for Unsubscribe<'_> {
    fn size(&self) -> usize {
        mem::size_of::<Flags>()
            + mem::size_of::<MsgId>()
            + tail(self.topic, SUBSCRIBE_FIXED_LEN).len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.msg_id);
        buf.put_slice(tail(self.topic, SUBSCRIBE_FIXED_LEN));
    }
}

impl WriteTo for UnsubscribeAck {
    fn size(&self) -> usize {
        mem::size_of::<MsgId>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.msg_id);
    }
}

impl PingReq<'_> {
    fn client_id(&self) -> &[u8] {
        &self.client_id[..self.client_id.len().min(MAX_CLIENT_ID_LEN)]
    }
}

impl WriteTo for PingReq<'_> {
    fn size(&self) -> usize {
        self.client_id().len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_slice(self.client_id());
    }
}

impl WriteTo for Disconnect {
    fn size(&self) -> usize {
        self.duration.map_or(0, |_| mem::size_of::<u16>())
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        if let Some(duration) = self.duration {
            buf.put_u16(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::QoS;

    macro_rules! assert_packet {
        ($message:expr, $right:expr) => {
            assert_eq!(
                $message.size(),
                $right.len() - HEADER_LEN,
                "assert body size"
            );

            let packet = $message.pack();
            assert_eq!(packet, &$right[..], "assert packet content: {:#?}", $message);
            assert_eq!(packet[0] as usize, packet.len(), "assert framed length");
        };
    }

    #[test]
    fn test_discovery() {
        assert_packet!(
            Message::Advertise(Advertise {
                gw_id: 1,
                duration: 900,
            }),
            b"\x05\x00\x01\x03\x84"
        );
        assert_packet!(Message::SearchGw(SearchGw { radius: 1 }), b"\x03\x01\x01");
        assert_packet!(
            Message::GwInfo(GwInfo {
                gw_id: 2,
                gw_addr: b"",
            }),
            b"\x03\x02\x02"
        );
        assert_packet!(
            Message::GwInfo(GwInfo {
                gw_id: 2,
                gw_addr: b"\x01",
            }),
            b"\x04\x02\x02\x01"
        );
    }

    #[test]
    fn test_connect() {
        assert_packet!(
            Message::Connect(Connect {
                flags: Flags::CLEAN_SESSION,
                duration: 30,
                client_id: b"test",
            }),
            b"\x0a\x04\x04\x01\x00\x1etest"
        );
        assert_packet!(
            Message::ConnectAck(ConnectAck {
                return_code: ReturnCode::Accepted,
            }),
            b"\x03\x05\x00"
        );
        assert_packet!(
            Message::Disconnect(Disconnect { duration: None }),
            b"\x02\x18"
        );
        assert_packet!(
            Message::Disconnect(Disconnect { duration: Some(60) }),
            b"\x04\x18\x00\x3c"
        );
    }

    #[test]
    fn test_register() {
        assert_packet!(
            Message::Register(Register {
                topic_id: 0,
                msg_id: 1,
                topic_name: b"led",
            }),
            b"\x09\x0a\x00\x00\x00\x01led"
        );
        assert_packet!(
            Message::RegisterAck(RegisterAck {
                topic_id: 7,
                msg_id: 1,
                return_code: ReturnCode::Accepted,
            }),
            b"\x07\x0b\x00\x07\x00\x01\x00"
        );
    }

    #[test]
    fn test_publish() {
        assert_packet!(
            Message::Publish(Publish {
                flags: Flags::default(),
                topic_id: 7,
                msg_id: 0,
                data: b"\x01",
            }),
            b"\x08\x0c\x00\x00\x07\x00\x00\x01"
        );
        assert_packet!(
            Message::Publish(Publish {
                flags: Flags::from(QoS::AtLeastOnce) | Flags::RETAIN,
                topic_id: 7,
                msg_id: 42,
                data: b"data",
            }),
            b"\x0b\x0c\x30\x00\x07\x00\x2adata"
        );
        assert_packet!(
            Message::PublishAck(PublishAck {
                topic_id: 7,
                msg_id: 42,
                return_code: ReturnCode::InvalidTopicId,
            }),
            b"\x07\x0d\x00\x07\x00\x2a\x02"
        );
    }

    #[test]
    fn test_subscribe() {
        assert_packet!(
            Message::Subscribe(Subscribe {
                flags: Flags::default(),
                msg_id: 2,
                topic: b"button",
            }),
            b"\x0b\x12\x00\x00\x02button"
        );
        assert_packet!(
            Message::SubscribeAck(SubscribeAck {
                flags: Flags::default(),
                topic_id: 7,
                msg_id: 2,
                return_code: ReturnCode::Accepted,
            }),
            b"\x08\x13\x00\x00\x07\x00\x02\x00"
        );
        assert_packet!(
            Message::Unsubscribe(Unsubscribe {
                flags: Flags::default(),
                msg_id: 3,
                topic: b"button",
            }),
            b"\x0b\x14\x00\x00\x03button"
        );
        assert_packet!(
            Message::UnsubscribeAck(UnsubscribeAck { msg_id: 3 }),
            b"\x04\x15\x00\x03"
        );
    }

    #[test]
    fn test_ping() {
        assert_packet!(Message::PingReq(PingReq { client_id: b"" }), b"\x02\x16");
        assert_packet!(
            Message::PingReq(PingReq { client_id: b"test" }),
            b"\x06\x16test"
        );
        assert_packet!(Message::PingResp, b"\x02\x17");
    }

    #[test]
    fn test_truncation() {
        let long = [0x55; 64];

        let packet = Message::Publish(Publish {
            flags: Flags::default(),
            topic_id: 7,
            msg_id: 0,
            data: &long,
        })
        .pack();
        assert_eq!(packet.len(), MAX_MSG_LEN);
        assert_eq!(packet[0] as usize, MAX_MSG_LEN);
        assert_eq!(&packet[7..], &long[..MAX_MSG_LEN - PUBLISH_FIXED_LEN]);

        let packet = Message::Connect(Connect {
            flags: Flags::default(),
            duration: 30,
            client_id: &long,
        })
        .pack();
        assert_eq!(packet.len(), HEADER_LEN + 4 + MAX_CLIENT_ID_LEN);

        let packet = Message::Register(Register {
            topic_id: 0,
            msg_id: 1,
            topic_name: &long,
        })
        .pack();
        assert_eq!(packet.len(), MAX_MSG_LEN);

        let packet = Message::GwInfo(GwInfo {
            gw_id: 1,
            gw_addr: &long,
        })
        .pack();
        assert_eq!(packet.len(), HEADER_LEN + 1 + GW_ADDR_LENGTH);
    }
}
