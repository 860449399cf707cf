//! BACnet Virtual Link Layer (Annex J, BACnet/IP).
//!
//! A BVLL frame starts with the `0x81` marker, a function code and a 16-bit length that
//! covers the whole frame. Four functions wrap an NPDU; the rest are BBMD/foreign-device
//! management messages that end the decode.

use crate::address::Address;
use crate::codec::{expect_end, read_bip, remaining, rest, CodecError, Reader};
use crate::frame::TransportPdu;
use crate::pipeline::DecodeOptions;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::net::Ipv4Addr;

pub const BVLL_TYPE_BIP: u8 = 0x81;
pub const BVLL_HEADER_LEN: usize = 4;

const BDT_ENTRY_LEN: usize = 10;
const FDT_ENTRY_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BvllFunction {
    Result,
    WriteBroadcastDistributionTable,
    ReadBroadcastDistributionTable,
    ReadBroadcastDistributionTableAck,
    ForwardedNpdu,
    RegisterForeignDevice,
    ReadForeignDeviceTable,
    ReadForeignDeviceTableAck,
    DeleteForeignDeviceTableEntry,
    DistributeBroadcastToNetwork,
    OriginalUnicastNpdu,
    OriginalBroadcastNpdu,
    SecureBvll,
}

impl BvllFunction {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => BvllFunction::Result,
            0x01 => BvllFunction::WriteBroadcastDistributionTable,
            0x02 => BvllFunction::ReadBroadcastDistributionTable,
            0x03 => BvllFunction::ReadBroadcastDistributionTableAck,
            0x04 => BvllFunction::ForwardedNpdu,
            0x05 => BvllFunction::RegisterForeignDevice,
            0x06 => BvllFunction::ReadForeignDeviceTable,
            0x07 => BvllFunction::ReadForeignDeviceTableAck,
            0x08 => BvllFunction::DeleteForeignDeviceTableEntry,
            0x09 => BvllFunction::DistributeBroadcastToNetwork,
            0x0a => BvllFunction::OriginalUnicastNpdu,
            0x0b => BvllFunction::OriginalBroadcastNpdu,
            0x0c => BvllFunction::SecureBvll,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        match self {
            BvllFunction::Result => 0x00,
            BvllFunction::WriteBroadcastDistributionTable => 0x01,
            BvllFunction::ReadBroadcastDistributionTable => 0x02,
            BvllFunction::ReadBroadcastDistributionTableAck => 0x03,
            BvllFunction::ForwardedNpdu => 0x04,
            BvllFunction::RegisterForeignDevice => 0x05,
            BvllFunction::ReadForeignDeviceTable => 0x06,
            BvllFunction::ReadForeignDeviceTableAck => 0x07,
            BvllFunction::DeleteForeignDeviceTableEntry => 0x08,
            BvllFunction::DistributeBroadcastToNetwork => 0x09,
            BvllFunction::OriginalUnicastNpdu => 0x0a,
            BvllFunction::OriginalBroadcastNpdu => 0x0b,
            BvllFunction::SecureBvll => 0x0c,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BvllFunction::Result => "Result",
            BvllFunction::WriteBroadcastDistributionTable => "WriteBroadcastDistributionTable",
            BvllFunction::ReadBroadcastDistributionTable => "ReadBroadcastDistributionTable",
            BvllFunction::ReadBroadcastDistributionTableAck => "ReadBroadcastDistributionTableAck",
            BvllFunction::ForwardedNpdu => "ForwardedNPDU",
            BvllFunction::RegisterForeignDevice => "RegisterForeignDevice",
            BvllFunction::ReadForeignDeviceTable => "ReadForeignDeviceTable",
            BvllFunction::ReadForeignDeviceTableAck => "ReadForeignDeviceTableAck",
            BvllFunction::DeleteForeignDeviceTableEntry => "DeleteForeignDeviceTableEntry",
            BvllFunction::DistributeBroadcastToNetwork => "DistributeBroadcastToNetwork",
            BvllFunction::OriginalUnicastNpdu => "OriginalUnicastNPDU",
            BvllFunction::OriginalBroadcastNpdu => "OriginalBroadcastNPDU",
            BvllFunction::SecureBvll => "SecureBVLL",
        }
    }

    /// True for the functions whose body ends in an NPDU.
    pub fn carries_npdu(self) -> bool {
        matches!(
            self,
            BvllFunction::ForwardedNpdu
                | BvllFunction::DistributeBroadcastToNetwork
                | BvllFunction::OriginalUnicastNpdu
                | BvllFunction::OriginalBroadcastNpdu
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BdtEntry {
    pub address: Address,
    pub mask: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdtEntry {
    pub address: Address,
    pub ttl: u16,
    pub remaining: u16,
}

/// Function-specific BVLL body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BvllMessage {
    Result { code: u16 },
    WriteBroadcastDistributionTable(Vec<BdtEntry>),
    ReadBroadcastDistributionTable,
    ReadBroadcastDistributionTableAck(Vec<BdtEntry>),
    /// Broadcast re-sent by a BBMD; `address` is the originating B/IP station.
    ForwardedNpdu { address: Address },
    RegisterForeignDevice { ttl: u16 },
    ReadForeignDeviceTable,
    ReadForeignDeviceTableAck(Vec<FdtEntry>),
    DeleteForeignDeviceTableEntry { address: Address },
    DistributeBroadcastToNetwork,
    OriginalUnicastNpdu,
    OriginalBroadcastNpdu,
    SecureBvll(Vec<u8>),
}

impl BvllMessage {
    pub fn function(&self) -> BvllFunction {
        match self {
            BvllMessage::Result { .. } => BvllFunction::Result,
            BvllMessage::WriteBroadcastDistributionTable(_) => BvllFunction::WriteBroadcastDistributionTable,
            BvllMessage::ReadBroadcastDistributionTable => BvllFunction::ReadBroadcastDistributionTable,
            BvllMessage::ReadBroadcastDistributionTableAck(_) => BvllFunction::ReadBroadcastDistributionTableAck,
            BvllMessage::ForwardedNpdu { .. } => BvllFunction::ForwardedNpdu,
            BvllMessage::RegisterForeignDevice { .. } => BvllFunction::RegisterForeignDevice,
            BvllMessage::ReadForeignDeviceTable => BvllFunction::ReadForeignDeviceTable,
            BvllMessage::ReadForeignDeviceTableAck(_) => BvllFunction::ReadForeignDeviceTableAck,
            BvllMessage::DeleteForeignDeviceTableEntry { .. } => BvllFunction::DeleteForeignDeviceTableEntry,
            BvllMessage::DistributeBroadcastToNetwork => BvllFunction::DistributeBroadcastToNetwork,
            BvllMessage::OriginalUnicastNpdu => BvllFunction::OriginalUnicastNpdu,
            BvllMessage::OriginalBroadcastNpdu => BvllFunction::OriginalBroadcastNpdu,
            BvllMessage::SecureBvll(_) => BvllFunction::SecureBvll,
        }
    }
}

/// A decoded BVLL frame. `pdu.data` holds what follows the header (for NPDU carriers, the
/// NPDU itself once the body is decoded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub pdu: TransportPdu,
    pub function: u8,
    pub length: u16,
    pub message: Option<BvllMessage>,
}

impl LinkRecord {
    pub fn kind(&self) -> Option<BvllFunction> {
        BvllFunction::from_code(self.function)
    }
}

/// Outcome of [`decode_link`].
#[derive(Debug)]
pub enum LinkDecode {
    /// No BVLL marker; the transport PDU is returned untouched.
    NotBvll(TransportPdu),
    /// Marker present but the header was rejected; the transport PDU is returned untouched.
    Malformed(TransportPdu, CodecError),
    /// Function code not in the registry.
    Unknown(LinkRecord),
    /// Known function whose body did not decode.
    BodyFault(LinkRecord, CodecError),
    Decoded(LinkRecord),
}

impl LinkDecode {
    /// The BVLL record, when the header decoded.
    pub fn record(&self) -> Option<&LinkRecord> {
        match self {
            LinkDecode::Unknown(rec) | LinkDecode::BodyFault(rec, _) | LinkDecode::Decoded(rec) => Some(rec),
            LinkDecode::NotBvll(_) | LinkDecode::Malformed(..) => None,
        }
    }

    /// Whether the network layer should be tried next: plain traffic without a BVLL header,
    /// or a decoded function that wraps an NPDU.
    pub fn descends(&self) -> bool {
        match self {
            LinkDecode::NotBvll(_) => true,
            LinkDecode::Decoded(rec) => rec.kind().map_or(false, BvllFunction::carries_npdu),
            LinkDecode::Malformed(..) | LinkDecode::Unknown(_) | LinkDecode::BodyFault(..) => false,
        }
    }

    /// Split into the link record (if any) and the PDU the next layer would read.
    pub fn into_parts(self) -> (Option<LinkRecord>, TransportPdu) {
        match self {
            LinkDecode::NotBvll(pdu) | LinkDecode::Malformed(pdu, _) => (None, pdu),
            LinkDecode::Unknown(rec) | LinkDecode::BodyFault(rec, _) | LinkDecode::Decoded(rec) => {
                let pdu = rec.pdu.clone();
                (Some(rec), pdu)
            }
        }
    }
}

fn decode_header(pdu: &TransportPdu) -> Result<LinkRecord, CodecError> {
    let mut r = Cursor::new(pdu.data.as_slice());
    let _marker = r.read_u8()?;
    let function = r.read_u8()?;
    let length = r.read_u16::<BigEndian>()?;
    if length as usize != pdu.data.len() {
        return Err(CodecError::Length {
            declared: length as usize,
            actual: pdu.data.len(),
        });
    }
    Ok(LinkRecord {
        pdu: TransportPdu::new(rest(&r), pdu.source.clone(), pdu.destination.clone()),
        function,
        length,
        message: None,
    })
}

fn read_bdt(r: &mut Reader<'_>) -> Result<Vec<BdtEntry>, CodecError> {
    if remaining(r) % BDT_ENTRY_LEN != 0 {
        return Err(CodecError::Validation(format!(
            "BDT body of {} bytes is not a whole number of entries",
            remaining(r)
        )));
    }
    let mut entries = Vec::new();
    while remaining(r) > 0 {
        let address = read_bip(r)?;
        let mut mask = [0u8; 4];
        r.read_exact(&mut mask)?;
        entries.push(BdtEntry {
            address,
            mask: Ipv4Addr::from(mask),
        });
    }
    Ok(entries)
}

fn read_fdt(r: &mut Reader<'_>) -> Result<Vec<FdtEntry>, CodecError> {
    if remaining(r) % FDT_ENTRY_LEN != 0 {
        return Err(CodecError::Validation(format!(
            "FDT body of {} bytes is not a whole number of entries",
            remaining(r)
        )));
    }
    let mut entries = Vec::new();
    while remaining(r) > 0 {
        entries.push(FdtEntry {
            address: read_bip(r)?,
            ttl: r.read_u16::<BigEndian>()?,
            remaining: r.read_u16::<BigEndian>()?,
        });
    }
    Ok(entries)
}

/// Decode a function-specific body. Returns the message and whatever follows it.
pub fn decode_message(function: BvllFunction, body: &[u8]) -> Result<(BvllMessage, Vec<u8>), CodecError> {
    let mut r = Cursor::new(body);
    let message = match function {
        BvllFunction::Result => {
            let code = r.read_u16::<BigEndian>()?;
            expect_end(&r, "Result")?;
            BvllMessage::Result { code }
        }
        BvllFunction::WriteBroadcastDistributionTable => BvllMessage::WriteBroadcastDistributionTable(read_bdt(&mut r)?),
        BvllFunction::ReadBroadcastDistributionTable => {
            expect_end(&r, "ReadBroadcastDistributionTable")?;
            BvllMessage::ReadBroadcastDistributionTable
        }
        BvllFunction::ReadBroadcastDistributionTableAck => {
            BvllMessage::ReadBroadcastDistributionTableAck(read_bdt(&mut r)?)
        }
        BvllFunction::ForwardedNpdu => BvllMessage::ForwardedNpdu {
            address: read_bip(&mut r)?,
        },
        BvllFunction::RegisterForeignDevice => {
            let ttl = r.read_u16::<BigEndian>()?;
            expect_end(&r, "RegisterForeignDevice")?;
            BvllMessage::RegisterForeignDevice { ttl }
        }
        BvllFunction::ReadForeignDeviceTable => {
            expect_end(&r, "ReadForeignDeviceTable")?;
            BvllMessage::ReadForeignDeviceTable
        }
        BvllFunction::ReadForeignDeviceTableAck => BvllMessage::ReadForeignDeviceTableAck(read_fdt(&mut r)?),
        BvllFunction::DeleteForeignDeviceTableEntry => {
            let address = read_bip(&mut r)?;
            expect_end(&r, "DeleteForeignDeviceTableEntry")?;
            BvllMessage::DeleteForeignDeviceTableEntry { address }
        }
        BvllFunction::DistributeBroadcastToNetwork => BvllMessage::DistributeBroadcastToNetwork,
        BvllFunction::OriginalUnicastNpdu => BvllMessage::OriginalUnicastNpdu,
        BvllFunction::OriginalBroadcastNpdu => BvllMessage::OriginalBroadcastNpdu,
        BvllFunction::SecureBvll => {
            let data = rest(&r);
            r.set_position(body.len() as u64);
            BvllMessage::SecureBvll(data)
        }
    };
    Ok((message, rest(&r)))
}

/// Decode the virtual link layer of a transport PDU.
///
/// Faults here never escape: a bad header falls back to the transport PDU, a bad body falls
/// back to the header-only record. For Forwarded-NPDU in route-aware mode the originating
/// station becomes the source, with the BBMD's address kept as its route.
pub fn decode_link(pdu: &TransportPdu, options: &DecodeOptions) -> LinkDecode {
    if pdu.data.first() != Some(&BVLL_TYPE_BIP) {
        return LinkDecode::NotBvll(pdu.clone());
    }
    log::trace!("BVLL header found");

    let mut record = match decode_header(pdu) {
        Ok(rec) => rec,
        Err(e) => {
            log::debug!("BVLL decoding error: {}", e);
            return LinkDecode::Malformed(pdu.clone(), e);
        }
    };

    let function = match BvllFunction::from_code(record.function) {
        Some(f) => f,
        None => {
            log::debug!("unknown BVLL function: {:#04x}", record.function);
            return LinkDecode::Unknown(record);
        }
    };

    let (message, npdu) = match decode_message(function, &record.pdu.data) {
        Ok(decoded) => decoded,
        Err(e) => {
            log::debug!("{} decoding error: {}", function.name(), e);
            return LinkDecode::BodyFault(record, e);
        }
    };

    if let BvllMessage::ForwardedNpdu { address } = &message {
        if options.route_aware {
            let relay = record.pdu.source.clone();
            record.pdu.source = address.clone().with_route(relay);
        }
    }

    record.pdu.data = npdu;
    record.message = Some(message);
    LinkDecode::Decoded(record)
}
