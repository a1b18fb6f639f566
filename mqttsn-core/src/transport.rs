use core::fmt;

use bytes::Bytes;

/// A transport peer address.
///
/// Opaque to the protocol engines: the transport frames its own addressing,
/// and the engines only ever compare addresses bytewise and hand them back
/// unchanged.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Address(Bytes);

impl Address {
    /// Wraps raw address bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Address(bytes.into())
    }

    /// The raw address bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this is the empty (unset) address.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Address(")?;
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// The nonblocking datagram transport both engines are driven through.
///
/// Framing is datagram-oriented: one call moves exactly one MQTT-SN packet.
/// Implementations must not block; a send that cannot complete is dropped
/// and left to the protocol retry path.
pub trait Transport {
    /// Fetches one inbound packet and its source, if any is pending.
    fn read_packet(&mut self) -> Option<(Bytes, Address)>;

    /// Unicasts one packet. Returns the number of bytes sent, 0 when the
    /// packet was dropped.
    fn write_packet(&mut self, data: &[u8], dest: &Address) -> usize;

    /// Broadcasts one packet to every peer on the link.
    fn broadcast(&mut self, data: &[u8]) -> usize;
}
