//! BACnet network layer (clause 6): NPDU header, routing fields and network-layer messages.

use crate::address::{Address, AddressKind};
use crate::codec::{expect_end, read_u16_list, read_vec, remaining, rest, CodecError, Reader};
use crate::error::DecodeError;
use crate::frame::TransportPdu;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

pub const NPDU_VERSION: u8 = 0x01;

const CONTROL_NETWORK_MESSAGE: u8 = 0x80;
const CONTROL_DESTINATION: u8 = 0x20;
const CONTROL_SOURCE: u8 = 0x08;
const CONTROL_EXPECTING_REPLY: u8 = 0x04;
const CONTROL_PRIORITY: u8 = 0x03;

const GLOBAL_NETWORK: u16 = 0xffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkMessageKind {
    WhoIsRouterToNetwork,
    IAmRouterToNetwork,
    ICouldBeRouterToNetwork,
    RejectMessageToNetwork,
    RouterBusyToNetwork,
    RouterAvailableToNetwork,
    InitializeRoutingTable,
    InitializeRoutingTableAck,
    EstablishConnectionToNetwork,
    DisconnectConnectionToNetwork,
    WhatIsNetworkNumber,
    NetworkNumberIs,
}

impl NetworkMessageKind {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => NetworkMessageKind::WhoIsRouterToNetwork,
            0x01 => NetworkMessageKind::IAmRouterToNetwork,
            0x02 => NetworkMessageKind::ICouldBeRouterToNetwork,
            0x03 => NetworkMessageKind::RejectMessageToNetwork,
            0x04 => NetworkMessageKind::RouterBusyToNetwork,
            0x05 => NetworkMessageKind::RouterAvailableToNetwork,
            0x06 => NetworkMessageKind::InitializeRoutingTable,
            0x07 => NetworkMessageKind::InitializeRoutingTableAck,
            0x08 => NetworkMessageKind::EstablishConnectionToNetwork,
            0x09 => NetworkMessageKind::DisconnectConnectionToNetwork,
            0x12 => NetworkMessageKind::WhatIsNetworkNumber,
            0x13 => NetworkMessageKind::NetworkNumberIs,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            NetworkMessageKind::WhoIsRouterToNetwork => "WhoIsRouterToNetwork",
            NetworkMessageKind::IAmRouterToNetwork => "IAmRouterToNetwork",
            NetworkMessageKind::ICouldBeRouterToNetwork => "ICouldBeRouterToNetwork",
            NetworkMessageKind::RejectMessageToNetwork => "RejectMessageToNetwork",
            NetworkMessageKind::RouterBusyToNetwork => "RouterBusyToNetwork",
            NetworkMessageKind::RouterAvailableToNetwork => "RouterAvailableToNetwork",
            NetworkMessageKind::InitializeRoutingTable => "InitializeRoutingTable",
            NetworkMessageKind::InitializeRoutingTableAck => "InitializeRoutingTableAck",
            NetworkMessageKind::EstablishConnectionToNetwork => "EstablishConnectionToNetwork",
            NetworkMessageKind::DisconnectConnectionToNetwork => "DisconnectConnectionToNetwork",
            NetworkMessageKind::WhatIsNetworkNumber => "WhatIsNetworkNumber",
            NetworkMessageKind::NetworkNumberIs => "NetworkNumberIs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTableEntry {
    pub network: u16,
    pub port_id: u8,
    pub port_info: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
    WhoIsRouterToNetwork { network: Option<u16> },
    IAmRouterToNetwork(Vec<u16>),
    ICouldBeRouterToNetwork { network: u16, performance_index: u8 },
    RejectMessageToNetwork { reason: u8, network: u16 },
    RouterBusyToNetwork(Vec<u16>),
    RouterAvailableToNetwork(Vec<u16>),
    InitializeRoutingTable(Vec<RoutingTableEntry>),
    InitializeRoutingTableAck(Vec<RoutingTableEntry>),
    EstablishConnectionToNetwork { network: u16, termination_time: u8 },
    DisconnectConnectionToNetwork { network: u16 },
    WhatIsNetworkNumber,
    NetworkNumberIs { network: u16, configured: bool },
}

impl NetworkMessage {
    pub fn kind(&self) -> NetworkMessageKind {
        match self {
            NetworkMessage::WhoIsRouterToNetwork { .. } => NetworkMessageKind::WhoIsRouterToNetwork,
            NetworkMessage::IAmRouterToNetwork(_) => NetworkMessageKind::IAmRouterToNetwork,
            NetworkMessage::ICouldBeRouterToNetwork { .. } => NetworkMessageKind::ICouldBeRouterToNetwork,
            NetworkMessage::RejectMessageToNetwork { .. } => NetworkMessageKind::RejectMessageToNetwork,
            NetworkMessage::RouterBusyToNetwork(_) => NetworkMessageKind::RouterBusyToNetwork,
            NetworkMessage::RouterAvailableToNetwork(_) => NetworkMessageKind::RouterAvailableToNetwork,
            NetworkMessage::InitializeRoutingTable(_) => NetworkMessageKind::InitializeRoutingTable,
            NetworkMessage::InitializeRoutingTableAck(_) => NetworkMessageKind::InitializeRoutingTableAck,
            NetworkMessage::EstablishConnectionToNetwork { .. } => NetworkMessageKind::EstablishConnectionToNetwork,
            NetworkMessage::DisconnectConnectionToNetwork { .. } => NetworkMessageKind::DisconnectConnectionToNetwork,
            NetworkMessage::WhatIsNetworkNumber => NetworkMessageKind::WhatIsNetworkNumber,
            NetworkMessage::NetworkNumberIs { .. } => NetworkMessageKind::NetworkNumberIs,
        }
    }
}

/// A decoded NPDU. `pdu` keeps the transport-level endpoints; `source`/`destination` are the
/// routed SADR/DADR fields when present. `pdu.data` is what follows the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRecord {
    pub pdu: TransportPdu,
    pub version: u8,
    pub control: u8,
    pub destination: Option<Address>,
    pub source: Option<Address>,
    pub hop_count: Option<u8>,
    /// Set for network-layer messages; such records never carry an APDU.
    pub message_type: Option<u8>,
    pub vendor_id: Option<u16>,
    pub message: Option<NetworkMessage>,
}

impl NetworkRecord {
    pub fn is_network_message(&self) -> bool {
        self.message_type.is_some()
    }

    pub fn expecting_reply(&self) -> bool {
        self.control & CONTROL_EXPECTING_REPLY != 0
    }

    pub fn priority(&self) -> u8 {
        self.control & CONTROL_PRIORITY
    }

    pub fn message_kind(&self) -> Option<NetworkMessageKind> {
        self.message_type.and_then(NetworkMessageKind::from_code)
    }
}

#[derive(Debug)]
pub enum NetworkDecode {
    /// First byte is not the supported protocol version (or there is no first byte).
    WrongVersion,
    Decoded(NetworkRecord),
}

fn read_destination(r: &mut Reader<'_>) -> Result<Address, CodecError> {
    let net = r.read_u16::<BigEndian>()?;
    let len = r.read_u8()? as usize;
    let addr = read_vec(r, len)?;
    Ok(if net == GLOBAL_NETWORK {
        Address::new(AddressKind::GlobalBroadcast)
    } else if addr.is_empty() {
        Address::new(AddressKind::RemoteBroadcast(net))
    } else {
        Address::remote_station(net, addr)
    })
}

fn read_source(r: &mut Reader<'_>) -> Result<Address, CodecError> {
    let net = r.read_u16::<BigEndian>()?;
    if net == GLOBAL_NETWORK {
        return Err(CodecError::Validation("SNET cannot be the global network".to_string()));
    }
    let len = r.read_u8()? as usize;
    if len == 0 {
        return Err(CodecError::Validation("SLEN of zero".to_string()));
    }
    Ok(Address::remote_station(net, read_vec(r, len)?))
}

/// Structural NPDU header decode.
pub fn decode_header(pdu: &TransportPdu) -> Result<NetworkRecord, CodecError> {
    let mut r = Cursor::new(pdu.data.as_slice());
    let version = r.read_u8()?;
    let control = r.read_u8()?;

    let destination = if control & CONTROL_DESTINATION != 0 {
        Some(read_destination(&mut r)?)
    } else {
        None
    };
    let source = if control & CONTROL_SOURCE != 0 {
        Some(read_source(&mut r)?)
    } else {
        None
    };
    let hop_count = if destination.is_some() {
        Some(r.read_u8()?)
    } else {
        None
    };
    let (message_type, vendor_id) = if control & CONTROL_NETWORK_MESSAGE != 0 {
        let t = r.read_u8()?;
        let vendor = if t >= 0x80 {
            Some(r.read_u16::<BigEndian>()?)
        } else {
            None
        };
        (Some(t), vendor)
    } else {
        (None, None)
    };

    Ok(NetworkRecord {
        pdu: TransportPdu::new(rest(&r), pdu.source.clone(), pdu.destination.clone()),
        version,
        control,
        destination,
        source,
        hop_count,
        message_type,
        vendor_id,
        message: None,
    })
}

fn read_routing_table(r: &mut Reader<'_>) -> Result<Vec<RoutingTableEntry>, CodecError> {
    let count = r.read_u8()? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let network = r.read_u16::<BigEndian>()?;
        let port_id = r.read_u8()?;
        let info_len = r.read_u8()? as usize;
        entries.push(RoutingTableEntry {
            network,
            port_id,
            port_info: read_vec(r, info_len)?,
        });
    }
    Ok(entries)
}

/// Decode the body of a known network-layer message.
pub fn decode_message(kind: NetworkMessageKind, body: &[u8]) -> Result<NetworkMessage, CodecError> {
    let mut r = Cursor::new(body);
    let message = match kind {
        NetworkMessageKind::WhoIsRouterToNetwork => {
            let network = if remaining(&r) > 0 {
                Some(r.read_u16::<BigEndian>()?)
            } else {
                None
            };
            NetworkMessage::WhoIsRouterToNetwork { network }
        }
        NetworkMessageKind::IAmRouterToNetwork => NetworkMessage::IAmRouterToNetwork(read_u16_list(&mut r)?),
        NetworkMessageKind::ICouldBeRouterToNetwork => NetworkMessage::ICouldBeRouterToNetwork {
            network: r.read_u16::<BigEndian>()?,
            performance_index: r.read_u8()?,
        },
        NetworkMessageKind::RejectMessageToNetwork => NetworkMessage::RejectMessageToNetwork {
            reason: r.read_u8()?,
            network: r.read_u16::<BigEndian>()?,
        },
        NetworkMessageKind::RouterBusyToNetwork => NetworkMessage::RouterBusyToNetwork(read_u16_list(&mut r)?),
        NetworkMessageKind::RouterAvailableToNetwork => {
            NetworkMessage::RouterAvailableToNetwork(read_u16_list(&mut r)?)
        }
        NetworkMessageKind::InitializeRoutingTable => {
            NetworkMessage::InitializeRoutingTable(read_routing_table(&mut r)?)
        }
        NetworkMessageKind::InitializeRoutingTableAck => {
            NetworkMessage::InitializeRoutingTableAck(read_routing_table(&mut r)?)
        }
        NetworkMessageKind::EstablishConnectionToNetwork => NetworkMessage::EstablishConnectionToNetwork {
            network: r.read_u16::<BigEndian>()?,
            termination_time: r.read_u8()?,
        },
        NetworkMessageKind::DisconnectConnectionToNetwork => NetworkMessage::DisconnectConnectionToNetwork {
            network: r.read_u16::<BigEndian>()?,
        },
        NetworkMessageKind::WhatIsNetworkNumber => NetworkMessage::WhatIsNetworkNumber,
        NetworkMessageKind::NetworkNumberIs => NetworkMessage::NetworkNumberIs {
            network: r.read_u16::<BigEndian>()?,
            configured: r.read_u8()? != 0,
        },
    };
    expect_end(&r, kind.name())?;
    Ok(message)
}

/// Decode the network layer of `pdu`.
///
/// A version mismatch is a normal negative result. A header that matches the version but
/// does not decode is surfaced as [`DecodeError::Network`]. Network-layer messages are
/// specialised when their type is known; a body fault leaves the generic header in place.
pub fn decode_network(pdu: &TransportPdu) -> Result<NetworkDecode, DecodeError> {
    if pdu.data.first() != Some(&NPDU_VERSION) {
        log::trace!("not a version 1 packet: {:02x?}", &pdu.data[..pdu.data.len().min(30)]);
        return Ok(NetworkDecode::WrongVersion);
    }

    let mut record = decode_header(pdu).map_err(DecodeError::Network)?;

    let Some(message_type) = record.message_type else {
        return Ok(NetworkDecode::Decoded(record));
    };

    let kind = match NetworkMessageKind::from_code(message_type) {
        Some(k) => k,
        None => {
            log::debug!("no network layer decoder: {:#04x}", message_type);
            return Ok(NetworkDecode::Decoded(record));
        }
    };

    match decode_message(kind, &record.pdu.data) {
        Ok(message) => record.message = Some(message),
        Err(e) => log::debug!("{} decoding error: {}", kind.name(), e),
    }
    Ok(NetworkDecode::Decoded(record))
}
