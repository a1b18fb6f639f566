use core::convert::TryFrom;

use nom::{
    combinator::{map, map_opt, rest, verify},
    error::ParseError,
    number::complete::{be_u16, be_u8},
    sequence::tuple,
    IResult,
};

use crate::packet::*;
use crate::proto::*;

fn flags<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], Flags, E> {
    map(be_u8, Flags::from_bits_truncate)(input)
}

fn return_code<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], ReturnCode, E> {
    map_opt(be_u8, |b| ReturnCode::try_from(b).ok())(input)
}

fn topic_id<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], TopicId, E> {
    be_u16(input)
}

fn msg_id<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], MsgId, E> {
    be_u16(input)
}

impl Header {
    /// Splits the two-byte header off a packet.
    ///
    /// Rejects the invalid length bytes 0 and 1 and any type code the
    /// protocol does not define.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], Self, E> {
        map(
            tuple((
                verify(be_u8, |&length| length as usize >= HEADER_LEN),
                map_opt(be_u8, |b| Type::try_from(b).ok()),
            )),
            |(length, msg_type)| Header { length, msg_type },
        )(input)
    }
}

impl Advertise {
    /// Parses an ADVERTISE body.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], Self, E> {
        map(tuple((be_u8, be_u16)), |(gw_id, duration)| Advertise {
            gw_id,
            duration,
        })(input)
    }
}

impl SearchGw {
    /// Parses a SEARCHGW body.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], Self, E> {
        map(be_u8, |radius| SearchGw { radius })(input)
    }
}

impl GwInfo<'_> {
    /// Parses a GWINFO body; the gateway address is whatever trails the id.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], GwInfo<'a>, E> {
        map(tuple((be_u8, rest)), |(gw_id, gw_addr)| GwInfo {
            gw_id,
            gw_addr,
        })(input)
    }
}

impl Connect<'_> {
    /// Parses a CONNECT body, rejecting any protocol id but 0x01.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(
        input: &'a [u8],
    ) -> IResult<&'a [u8], Connect<'a>, E> {
        map(
            tuple((
                flags,
                verify(be_u8, |&protocol_id| protocol_id == PROTOCOL_ID),
                be_u16,
                rest,
            )),
            |(flags, _, duration, client_id)| Connect {
                flags,
                duration,
                client_id,
            },
        )(input)
    }
}

impl ConnectAck {
    /// Parses a CONNACK body.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], Self, E> {
        map(return_code, |return_code| ConnectAck { return_code })(input)
    }
}

impl Register<'_> {
    /// Parses a REGISTER body; the topic name is whatever trails the ids.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(
        input: &'a [u8],
    ) -> IResult<&'a [u8], Register<'a>, E> {
        map(
            tuple((topic_id, msg_id, rest)),
            |(topic_id, msg_id, topic_name)| Register {
                topic_id,
                msg_id,
                topic_name,
            },
        )(input)
    }
}

impl RegisterAck {
    /// Parses a REGACK body.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], Self, E> {
        map(
            tuple((topic_id, msg_id, return_code)),
            |(topic_id, msg_id, return_code)| RegisterAck {
                topic_id,
                msg_id,
                return_code,
            },
        )(input)
    }
}

impl Publish<'_> {
    /// Parses a PUBLISH body; the payload is whatever trails the ids.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(
        input: &'a [u8],
    ) -> IResult<&'a [u8], Publish<'a>, E> {
        map(
            tuple((flags, topic_id, msg_id, rest)),
            |(flags, topic_id, msg_id, data)| Publish {
                flags,
                topic_id,
                msg_id,
                data,
            },
        )(input)
    }
}

impl PublishAck {
    /// Parses a PUBACK body.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], Self, E> {
        map(
            tuple((topic_id, msg_id, return_code)),
            |(topic_id, msg_id, return_code)| PublishAck {
                topic_id,
                msg_id,
                return_code,
            },
        )(input)
    }
}

impl Subscribe<'_> {
    /// Parses a SUBSCRIBE body.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(
        input: &'a [u8],
    ) -> IResult<&'a [u8], Subscribe<'a>, E> {
        map(tuple((flags, msg_id, rest)), |(flags, msg_id, topic)| {
            Subscribe {
                flags,
                msg_id,
                topic,
            }
        })(input)
    }
}

impl SubscribeAck {
    /// Parses a SUBACK body.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], Self, E> {
        map(
            tuple((flags, topic_id, msg_id, return_code)),
            |(flags, topic_id, msg_id, return_code)| SubscribeAck {
                flags,
                topic_id,
                msg_id,
                return_code,
            },
        )(input)
    }
}

impl Unsubscribe<'_> {
    /// Parses an UNSUBSCRIBE body.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(
        input: &'a [u8],
    ) -> IResult<&'a [u8], Unsubscribe<'a>, E> {
        map(tuple((flags, msg_id, rest)), |(flags, msg_id, topic)| {
            Unsubscribe {
                flags,
                msg_id,
                topic,
            }
        })(input)
    }
}

impl UnsubscribeAck {
    /// Parses an UNSUBACK body.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], Self, E> {
        map(msg_id, |msg_id| UnsubscribeAck { msg_id })(input)
    }
}

impl PingReq<'_> {
    /// Parses a PINGREQ body; the whole body is the optional client id.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(
        input: &'a [u8],
    ) -> IResult<&'a [u8], PingReq<'a>, E> {
        map(rest, |client_id| PingReq { client_id })(input)
    }
}

impl Disconnect {
    /// Parses a DISCONNECT body, empty or carrying a sleep duration.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(input: &'a [u8]) -> IResult<&'a [u8], Self, E> {
        if input.is_empty() {
            Ok((input, Disconnect { duration: None }))
        } else {
            map(be_u16, |duration| Disconnect {
                duration: Some(duration),
            })(input)
        }
    }
}

impl Message<'_> {
    /// Parses a complete framed packet, header included.
    ///
    /// Type codes the protocol defines but this stack does not model (the
    /// WILL and QoS>0 acknowledgement family) parse as an error and are left
    /// to the caller to drop.
    pub fn parse<'a, E: ParseError<&'a [u8]>>(
        input: &'a [u8],
    ) -> IResult<&'a [u8], Message<'a>, E> {
        let (input, header) = Header::parse(input)?;

        match header.msg_type {
            Type::ADVERTISE => map(Advertise::parse, Message::Advertise)(input),
            Type::SEARCHGW => map(SearchGw::parse, Message::SearchGw)(input),
            Type::GWINFO => map(GwInfo::parse, Message::GwInfo)(input),
            Type::CONNECT => map(Connect::parse, Message::Connect)(input),
            Type::CONNACK => map(ConnectAck::parse, Message::ConnectAck)(input),
            Type::REGISTER => map(Register::parse, Message::Register)(input),
            Type::REGACK => map(RegisterAck::parse, Message::RegisterAck)(input),
            Type::PUBLISH => map(Publish::parse, Message::Publish)(input),
            Type::PUBACK => map(PublishAck::parse, Message::PublishAck)(input),
            Type::SUBSCRIBE => map(Subscribe::parse, Message::Subscribe)(input),
            Type::SUBACK => map(SubscribeAck::parse, Message::SubscribeAck)(input),
            Type::UNSUBSCRIBE => map(Unsubscribe::parse, Message::Unsubscribe)(input),
            Type::UNSUBACK => map(UnsubscribeAck::parse, Message::UnsubscribeAck)(input),
            Type::PINGREQ => map(PingReq::parse, Message::PingReq)(input),
            Type::PINGRESP => Ok((input, Message::PingResp)),
            Type::DISCONNECT => map(Disconnect::parse, Message::Disconnect)(input),
            _ => Err(nom::Err::Error(E::from_error_kind(
                input,
                nom::error::ErrorKind::Switch,
            ))),
        }
    }
}
