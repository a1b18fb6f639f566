//! MQTT-SN works by exchanging a series of control packets over a datagram
//! transport.
//!
//! This crate describes the format of these packets, together with the
//! nonblocking transport contract both protocol engines are driven through.
#![warn(missing_docs)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

mod decode;
mod encode;
mod packet;
mod proto;
mod transport;
mod udp;

pub use crate::encode::WriteTo;
pub use crate::packet::*;
pub use crate::proto::*;
pub use crate::transport::{Address, Transport};
pub use crate::udp::UdpTransport;
