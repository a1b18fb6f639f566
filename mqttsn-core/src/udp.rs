use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use bytes::Bytes;

use crate::proto::MAX_MSG_LEN;
use crate::transport::{Address, Transport};

const BROADCAST: u8 = 0xFF;

// one-byte source and destination link addresses ahead of the packet
const PREFIX_LEN: usize = 2;

/// MQTT-SN datagram transport over a broadcast UDP socket.
///
/// All parties share one UDP port and tell each other apart by a one-byte
/// link address: every datagram is `<from, to, packet>`, sent to the subnet
/// broadcast address, with `to` 0xFF addressing everyone. The receive path
/// drops frames meant for someone else and frames this socket sent itself.
pub struct UdpTransport {
    socket: UdpSocket,
    local: u8,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Binds the shared port under the one-byte link address `local`.
    pub fn bind(port: u16, local: u8) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;

        Ok(UdpTransport {
            socket,
            local,
            peer: (Ipv4Addr::BROADCAST, port).into(),
        })
    }

    /// The link address this transport stamps on outbound frames.
    pub fn local_address(&self) -> Address {
        Address::new(vec![self.local])
    }

    fn send(&self, to: u8, data: &[u8]) -> usize {
        let mut frame = Vec::with_capacity(PREFIX_LEN + data.len());
        frame.push(self.local);
        frame.push(to);
        frame.extend_from_slice(data);

        match self.socket.send_to(&frame, self.peer) {
            Ok(sent) => sent,
            Err(err) => {
                warn!("udp send to {:02x} failed: {}", to, err);
                0
            }
        }
    }
}

impl Transport for UdpTransport {
    fn read_packet(&mut self) -> Option<(Bytes, Address)> {
        let mut buf = [0; PREFIX_LEN + MAX_MSG_LEN];

        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, _)) => {
                    if len < PREFIX_LEN {
                        continue;
                    }
                    let (from, to) = (buf[0], buf[1]);
                    // someone else's frame, or our own echo
                    if (to != self.local && to != BROADCAST) || from == self.local {
                        continue;
                    }
                    return Some((
                        Bytes::copy_from_slice(&buf[PREFIX_LEN..len]),
                        Address::new(vec![from]),
                    ));
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return None,
                Err(err) => {
                    warn!("udp recv failed: {}", err);
                    return None;
                }
            }
        }
    }

    fn write_packet(&mut self, data: &[u8], dest: &Address) -> usize {
        match dest.as_bytes().first() {
            Some(&to) => self.send(to, data),
            None => 0,
        }
    }

    fn broadcast(&mut self, data: &[u8]) -> usize {
        self.send(BROADCAST, data)
    }
}
