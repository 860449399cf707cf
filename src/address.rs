//! Endpoint addresses seen while peeling a capture: MAC, IPv4, IPv4+port (B/IP) and the
//! BACnet network-layer forms carried in NPDU routing fields.
//!
//! An address may carry a *route*: the transport-level address that actually delivered a
//! packet whose logical source is elsewhere (forwarded broadcasts, routed NPDUs). Routes are
//! only attached when route-aware decoding is enabled.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// The shape of an address, independent of any route annotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// Ethernet MAC.
    Mac([u8; 6]),
    /// IPv4 host without a port (non-UDP IP traffic).
    Ip(Ipv4Addr),
    /// IPv4 host and UDP port; the BACnet/IP station form.
    IpPort(SocketAddrV4),
    /// Station on a remote BACnet network.
    RemoteStation { net: u16, addr: Vec<u8> },
    RemoteBroadcast(u16),
    GlobalBroadcast,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub kind: AddressKind,
    route: Option<Box<Address>>,
}

impl Address {
    pub fn new(kind: AddressKind) -> Self {
        Address { kind, route: None }
    }

    pub fn mac(bytes: [u8; 6]) -> Self {
        Address::new(AddressKind::Mac(bytes))
    }

    pub fn ip(addr: Ipv4Addr) -> Self {
        Address::new(AddressKind::Ip(addr))
    }

    pub fn ip_port(addr: Ipv4Addr, port: u16) -> Self {
        Address::new(AddressKind::IpPort(SocketAddrV4::new(addr, port)))
    }

    pub fn remote_station(net: u16, addr: Vec<u8>) -> Self {
        Address::new(AddressKind::RemoteStation { net, addr })
    }

    /// Decode the 6-octet B/IP form: four IPv4 octets then a big-endian port.
    pub fn from_bip(octets: &[u8; 6]) -> Self {
        let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
        let port = u16::from_be_bytes([octets[4], octets[5]]);
        Address::ip_port(ip, port)
    }

    /// Same address, annotated with the transport address that carried it.
    pub fn with_route(mut self, route: Address) -> Self {
        self.route = Some(Box::new(route));
        self
    }

    pub fn route(&self) -> Option<&Address> {
        self.route.as_deref()
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(
            self.kind,
            AddressKind::RemoteBroadcast(_) | AddressKind::GlobalBroadcast
        )
    }
}

impl From<AddressKind> for Address {
    fn from(kind: AddressKind) -> Self {
        Address::new(kind)
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8], sep: &str) -> fmt::Result {
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressKind::Mac(b) => write_hex(f, b, ":"),
            AddressKind::Ip(ip) => write!(f, "{}", ip),
            AddressKind::IpPort(sa) => write!(f, "{}", sa),
            AddressKind::RemoteStation { net, addr } => {
                write!(f, "{}:0x", net)?;
                write_hex(f, addr, "")
            }
            AddressKind::RemoteBroadcast(net) => write!(f, "{}:*", net),
            AddressKind::GlobalBroadcast => f.write_str("*:*"),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(route) = &self.route {
            write!(f, "@{}", route)?;
        }
        Ok(())
    }
}
