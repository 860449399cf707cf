//! Frame peeling: Ethernet, an optional 802.1Q tag, then IPv4 and UDP when present.
//!
//! The result is a [`TransportPdu`]: the innermost payload reached plus the most specific
//! source/destination addresses seen on the way down (MAC, IPv4, or IPv4+port).

use crate::address::Address;
use crate::error::DecodeError;
use byteorder::{BigEndian, ByteOrder};
use std::net::Ipv4Addr;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const VLAN_TAG_LEN: usize = 4;
pub const IPV4_MIN_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_VLAN: u16 = 0x8100;
pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Payload plus endpoints; the envelope every layer above the frame works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPdu {
    pub data: Vec<u8>,
    pub source: Address,
    pub destination: Address,
}

impl TransportPdu {
    pub fn new(data: Vec<u8>, source: Address, destination: Address) -> Self {
        TransportPdu {
            data,
            source,
            destination,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub destination: [u8; 6],
    pub source: [u8; 6],
    pub ethertype: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTag {
    pub priority: u8,
    pub cfi: u8,
    pub vlan: u16,
    pub ethertype: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    /// In 32-bit words.
    pub header_len: u8,
    pub tos: u8,
    pub total_len: u16,
    pub id: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub options: Option<Vec<u8>>,
}

impl Ipv4Header {
    pub fn protocol_name(&self) -> Option<&'static str> {
        match self.protocol {
            IPPROTO_ICMP => Some("icmp"),
            IPPROTO_TCP => Some("tcp"),
            IPPROTO_UDP => Some("udp"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub length: u16,
    pub checksum: u16,
}

/// Every header peeled from one captured frame, plus the resulting transport PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ethernet: EthernetHeader,
    pub vlan: Option<VlanTag>,
    pub ipv4: Option<Ipv4Header>,
    pub udp: Option<UdpHeader>,
    pub pdu: TransportPdu,
}

pub fn decode_ethernet(raw: &[u8]) -> Result<(EthernetHeader, &[u8]), DecodeError> {
    DecodeError::check_len("Ethernet", raw, ETHERNET_HEADER_LEN)?;
    let mut destination = [0u8; 6];
    let mut source = [0u8; 6];
    destination.copy_from_slice(&raw[0..6]);
    source.copy_from_slice(&raw[6..12]);
    let header = EthernetHeader {
        destination,
        source,
        ethertype: BigEndian::read_u16(&raw[12..14]),
    };
    Ok((header, &raw[ETHERNET_HEADER_LEN..]))
}

pub fn decode_vlan(data: &[u8]) -> Result<(VlanTag, &[u8]), DecodeError> {
    DecodeError::check_len("VLAN", data, VLAN_TAG_LEN)?;
    let tci = BigEndian::read_u16(&data[0..2]);
    let tag = VlanTag {
        priority: ((tci >> 13) & 0x07) as u8,
        cfi: ((tci >> 12) & 0x01) as u8,
        vlan: tci & 0x0fff,
        ethertype: BigEndian::read_u16(&data[2..4]),
    };
    Ok((tag, &data[VLAN_TAG_LEN..]))
}

/// IPv4 header with options. The payload is everything after the header; the total length
/// field is recorded but not used to trim.
pub fn decode_ipv4(data: &[u8]) -> Result<(Ipv4Header, &[u8]), DecodeError> {
    DecodeError::check_len("IPv4", data, IPV4_MIN_HEADER_LEN)?;
    let header_len = data[0] & 0x0f;
    if (header_len as usize) * 4 < IPV4_MIN_HEADER_LEN {
        return Err(DecodeError::Malformed {
            layer: "IPv4",
            reason: format!("header length {} words is below the minimum of 5", header_len),
        });
    }
    let hlen = header_len as usize * 4;
    DecodeError::check_len("IPv4", data, hlen)?;

    let options = if hlen > IPV4_MIN_HEADER_LEN {
        Some(data[IPV4_MIN_HEADER_LEN..hlen].to_vec())
    } else {
        None
    };
    let header = Ipv4Header {
        version: (data[0] & 0xf0) >> 4,
        header_len,
        tos: data[1],
        total_len: BigEndian::read_u16(&data[2..4]),
        id: BigEndian::read_u16(&data[4..6]),
        flags: (data[6] & 0xe0) >> 5,
        fragment_offset: BigEndian::read_u16(&data[6..8]) & 0x1fff,
        ttl: data[8],
        protocol: data[9],
        checksum: BigEndian::read_u16(&data[10..12]),
        source: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
        destination: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        options,
    };
    Ok((header, &data[hlen..]))
}

/// UDP header. The payload is `length - 8` bytes as declared, cut short only if the
/// capture holds fewer bytes than that.
pub fn decode_udp(data: &[u8]) -> Result<(UdpHeader, &[u8]), DecodeError> {
    DecodeError::check_len("UDP", data, UDP_HEADER_LEN)?;
    let header = UdpHeader {
        source_port: BigEndian::read_u16(&data[0..2]),
        destination_port: BigEndian::read_u16(&data[2..4]),
        length: BigEndian::read_u16(&data[4..6]),
        checksum: BigEndian::read_u16(&data[6..8]),
    };
    let declared = (header.length as usize).saturating_sub(UDP_HEADER_LEN);
    let end = (UDP_HEADER_LEN + declared).min(data.len());
    Ok((header, &data[UDP_HEADER_LEN..end]))
}

/// Peel one raw captured frame. `Ok(None)` means the frame decoded but left nothing to
/// look at (zero-length payload); that is not a fault.
pub fn decode_frame(raw: &[u8]) -> Result<Option<Frame>, DecodeError> {
    let (ethernet, mut data) = decode_ethernet(raw)?;
    let mut source = Address::mac(ethernet.source);
    let mut destination = Address::mac(ethernet.destination);
    let mut ethertype = ethernet.ethertype;

    let mut vlan = None;
    if ethertype == ETHERTYPE_VLAN {
        let (tag, rest) = decode_vlan(data)?;
        log::trace!("vlan {} priority {}", tag.vlan, tag.priority);
        ethertype = tag.ethertype;
        data = rest;
        vlan = Some(tag);
    }

    let mut ipv4 = None;
    let mut udp = None;
    if ethertype == ETHERTYPE_IPV4 {
        let (ip, rest) = decode_ipv4(data)?;
        data = rest;
        source = Address::ip(ip.source);
        destination = Address::ip(ip.destination);

        if ip.protocol == IPPROTO_UDP {
            let (u, rest) = decode_udp(data)?;
            data = rest;
            source = Address::ip_port(ip.source, u.source_port);
            destination = Address::ip_port(ip.destination, u.destination_port);
            udp = Some(u);
        } else {
            log::trace!("IPv4 protocol {} is not UDP", ip.protocol);
        }
        ipv4 = Some(ip);
    }

    if data.is_empty() {
        log::trace!("empty payload");
        return Ok(None);
    }

    Ok(Some(Frame {
        ethernet,
        vlan,
        ipv4,
        udp,
        pdu: TransportPdu::new(data.to_vec(), source, destination),
    }))
}
