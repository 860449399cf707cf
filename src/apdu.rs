//! BACnet application layer (clause 20): APDU headers, routed-address lifting and the
//! tagged service-parameter sequence carried by requests and complex acks.

use crate::address::Address;
use crate::codec::{read_vec, remaining, rest, CodecError, Reader};
use crate::error::DecodeError;
use crate::npdu::NetworkRecord;
use crate::pipeline::DecodeOptions;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

const PDU_SEGMENTED: u8 = 0x08;
const PDU_MORE_FOLLOWS: u8 = 0x04;
const PDU_SEGMENTED_RESPONSE_ACCEPTED: u8 = 0x02;
const PDU_NEGATIVE_ACK: u8 = 0x02;
const PDU_SERVER: u8 = 0x01;

/// Confirmed service choices, clause 21 `BACnetConfirmedServiceChoice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfirmedService {
    AcknowledgeAlarm,
    ConfirmedCovNotification,
    ConfirmedEventNotification,
    GetAlarmSummary,
    GetEnrollmentSummary,
    SubscribeCov,
    AtomicReadFile,
    AtomicWriteFile,
    AddListElement,
    RemoveListElement,
    CreateObject,
    DeleteObject,
    ReadProperty,
    ReadPropertyConditional,
    ReadPropertyMultiple,
    WriteProperty,
    WritePropertyMultiple,
    DeviceCommunicationControl,
    ConfirmedPrivateTransfer,
    ConfirmedTextMessage,
    ReinitializeDevice,
    VtOpen,
    VtClose,
    VtData,
    Authenticate,
    RequestKey,
    ReadRange,
    LifeSafetyOperation,
    SubscribeCovProperty,
    GetEventInformation,
    SubscribeCovPropertyMultiple,
    ConfirmedCovNotificationMultiple,
    ConfirmedAuditNotification,
    AuditLogQuery,
}

impl ConfirmedService {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => ConfirmedService::AcknowledgeAlarm,
            1 => ConfirmedService::ConfirmedCovNotification,
            2 => ConfirmedService::ConfirmedEventNotification,
            3 => ConfirmedService::GetAlarmSummary,
            4 => ConfirmedService::GetEnrollmentSummary,
            5 => ConfirmedService::SubscribeCov,
            6 => ConfirmedService::AtomicReadFile,
            7 => ConfirmedService::AtomicWriteFile,
            8 => ConfirmedService::AddListElement,
            9 => ConfirmedService::RemoveListElement,
            10 => ConfirmedService::CreateObject,
            11 => ConfirmedService::DeleteObject,
            12 => ConfirmedService::ReadProperty,
            13 => ConfirmedService::ReadPropertyConditional,
            14 => ConfirmedService::ReadPropertyMultiple,
            15 => ConfirmedService::WriteProperty,
            16 => ConfirmedService::WritePropertyMultiple,
            17 => ConfirmedService::DeviceCommunicationControl,
            18 => ConfirmedService::ConfirmedPrivateTransfer,
            19 => ConfirmedService::ConfirmedTextMessage,
            20 => ConfirmedService::ReinitializeDevice,
            21 => ConfirmedService::VtOpen,
            22 => ConfirmedService::VtClose,
            23 => ConfirmedService::VtData,
            24 => ConfirmedService::Authenticate,
            25 => ConfirmedService::RequestKey,
            26 => ConfirmedService::ReadRange,
            27 => ConfirmedService::LifeSafetyOperation,
            28 => ConfirmedService::SubscribeCovProperty,
            29 => ConfirmedService::GetEventInformation,
            30 => ConfirmedService::SubscribeCovPropertyMultiple,
            31 => ConfirmedService::ConfirmedCovNotificationMultiple,
            32 => ConfirmedService::ConfirmedAuditNotification,
            33 => ConfirmedService::AuditLogQuery,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ConfirmedService::AcknowledgeAlarm => "acknowledgeAlarm",
            ConfirmedService::ConfirmedCovNotification => "confirmedCOVNotification",
            ConfirmedService::ConfirmedEventNotification => "confirmedEventNotification",
            ConfirmedService::GetAlarmSummary => "getAlarmSummary",
            ConfirmedService::GetEnrollmentSummary => "getEnrollmentSummary",
            ConfirmedService::SubscribeCov => "subscribeCOV",
            ConfirmedService::AtomicReadFile => "atomicReadFile",
            ConfirmedService::AtomicWriteFile => "atomicWriteFile",
            ConfirmedService::AddListElement => "addListElement",
            ConfirmedService::RemoveListElement => "removeListElement",
            ConfirmedService::CreateObject => "createObject",
            ConfirmedService::DeleteObject => "deleteObject",
            ConfirmedService::ReadProperty => "readProperty",
            ConfirmedService::ReadPropertyConditional => "readPropertyConditional",
            ConfirmedService::ReadPropertyMultiple => "readPropertyMultiple",
            ConfirmedService::WriteProperty => "writeProperty",
            ConfirmedService::WritePropertyMultiple => "writePropertyMultiple",
            ConfirmedService::DeviceCommunicationControl => "deviceCommunicationControl",
            ConfirmedService::ConfirmedPrivateTransfer => "confirmedPrivateTransfer",
            ConfirmedService::ConfirmedTextMessage => "confirmedTextMessage",
            ConfirmedService::ReinitializeDevice => "reinitializeDevice",
            ConfirmedService::VtOpen => "vtOpen",
            ConfirmedService::VtClose => "vtClose",
            ConfirmedService::VtData => "vtData",
            ConfirmedService::Authenticate => "authenticate",
            ConfirmedService::RequestKey => "requestKey",
            ConfirmedService::ReadRange => "readRange",
            ConfirmedService::LifeSafetyOperation => "lifeSafetyOperation",
            ConfirmedService::SubscribeCovProperty => "subscribeCOVProperty",
            ConfirmedService::GetEventInformation => "getEventInformation",
            ConfirmedService::SubscribeCovPropertyMultiple => "subscribeCOVPropertyMultiple",
            ConfirmedService::ConfirmedCovNotificationMultiple => "confirmedCOVNotificationMultiple",
            ConfirmedService::ConfirmedAuditNotification => "confirmedAuditNotification",
            ConfirmedService::AuditLogQuery => "auditLogQuery",
        }
    }
}

/// Unconfirmed service choices, clause 21 `BACnetUnconfirmedServiceChoice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnconfirmedService {
    IAm,
    IHave,
    UnconfirmedCovNotification,
    UnconfirmedEventNotification,
    UnconfirmedPrivateTransfer,
    UnconfirmedTextMessage,
    TimeSynchronization,
    WhoHas,
    WhoIs,
    UtcTimeSynchronization,
    WriteGroup,
    UnconfirmedCovNotificationMultiple,
    UnconfirmedAuditNotification,
    WhoAmI,
    YouAre,
}

impl UnconfirmedService {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => UnconfirmedService::IAm,
            1 => UnconfirmedService::IHave,
            2 => UnconfirmedService::UnconfirmedCovNotification,
            3 => UnconfirmedService::UnconfirmedEventNotification,
            4 => UnconfirmedService::UnconfirmedPrivateTransfer,
            5 => UnconfirmedService::UnconfirmedTextMessage,
            6 => UnconfirmedService::TimeSynchronization,
            7 => UnconfirmedService::WhoHas,
            8 => UnconfirmedService::WhoIs,
            9 => UnconfirmedService::UtcTimeSynchronization,
            10 => UnconfirmedService::WriteGroup,
            11 => UnconfirmedService::UnconfirmedCovNotificationMultiple,
            12 => UnconfirmedService::UnconfirmedAuditNotification,
            13 => UnconfirmedService::WhoAmI,
            14 => UnconfirmedService::YouAre,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            UnconfirmedService::IAm => "iAm",
            UnconfirmedService::IHave => "iHave",
            UnconfirmedService::UnconfirmedCovNotification => "unconfirmedCOVNotification",
            UnconfirmedService::UnconfirmedEventNotification => "unconfirmedEventNotification",
            UnconfirmedService::UnconfirmedPrivateTransfer => "unconfirmedPrivateTransfer",
            UnconfirmedService::UnconfirmedTextMessage => "unconfirmedTextMessage",
            UnconfirmedService::TimeSynchronization => "timeSynchronization",
            UnconfirmedService::WhoHas => "whoHas",
            UnconfirmedService::WhoIs => "whoIs",
            UnconfirmedService::UtcTimeSynchronization => "utcTimeSynchronization",
            UnconfirmedService::WriteGroup => "writeGroup",
            UnconfirmedService::UnconfirmedCovNotificationMultiple => "unconfirmedCOVNotificationMultiple",
            UnconfirmedService::UnconfirmedAuditNotification => "unconfirmedAuditNotification",
            UnconfirmedService::WhoAmI => "whoAmI",
            UnconfirmedService::YouAre => "youAre",
        }
    }
}

/// The service a parameter sequence belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Confirmed(ConfirmedService),
    Unconfirmed(UnconfirmedService),
}

impl Service {
    pub fn name(self) -> &'static str {
        match self {
            Service::Confirmed(s) => s.name(),
            Service::Unconfirmed(s) => s.name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApduType {
    ConfirmedRequest,
    UnconfirmedRequest,
    SimpleAck,
    ComplexAck,
    SegmentAck,
    Error,
    Reject,
    Abort,
}

impl ApduType {
    pub fn from_nibble(n: u8) -> Option<Self> {
        Some(match n {
            0 => ApduType::ConfirmedRequest,
            1 => ApduType::UnconfirmedRequest,
            2 => ApduType::SimpleAck,
            3 => ApduType::ComplexAck,
            4 => ApduType::SegmentAck,
            5 => ApduType::Error,
            6 => ApduType::Reject,
            7 => ApduType::Abort,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ApduType::ConfirmedRequest => "ConfirmedRequestPDU",
            ApduType::UnconfirmedRequest => "UnconfirmedRequestPDU",
            ApduType::SimpleAck => "SimpleAckPDU",
            ApduType::ComplexAck => "ComplexAckPDU",
            ApduType::SegmentAck => "SegmentAckPDU",
            ApduType::Error => "ErrorPDU",
            ApduType::Reject => "RejectPDU",
            ApduType::Abort => "AbortPDU",
        }
    }

    /// Header kinds followed by a service-parameter sequence.
    pub fn has_service_sequence(self) -> bool {
        matches!(
            self,
            ApduType::ConfirmedRequest | ApduType::UnconfirmedRequest | ApduType::ComplexAck
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApduHeader {
    ConfirmedRequest {
        segmented: bool,
        more_follows: bool,
        segmented_response_accepted: bool,
        max_segments: u8,
        max_apdu: u8,
        invoke_id: u8,
        sequence_number: Option<u8>,
        proposed_window_size: Option<u8>,
        service_choice: u8,
    },
    UnconfirmedRequest {
        service_choice: u8,
    },
    SimpleAck {
        invoke_id: u8,
        service_choice: u8,
    },
    ComplexAck {
        segmented: bool,
        more_follows: bool,
        invoke_id: u8,
        sequence_number: Option<u8>,
        proposed_window_size: Option<u8>,
        service_choice: u8,
    },
    SegmentAck {
        negative: bool,
        server: bool,
        invoke_id: u8,
        sequence_number: u8,
        actual_window_size: u8,
    },
    Error {
        invoke_id: u8,
        service_choice: u8,
    },
    Reject {
        invoke_id: u8,
        reason: u8,
    },
    Abort {
        server: bool,
        invoke_id: u8,
        reason: u8,
    },
}

impl ApduHeader {
    pub fn kind(&self) -> ApduType {
        match self {
            ApduHeader::ConfirmedRequest { .. } => ApduType::ConfirmedRequest,
            ApduHeader::UnconfirmedRequest { .. } => ApduType::UnconfirmedRequest,
            ApduHeader::SimpleAck { .. } => ApduType::SimpleAck,
            ApduHeader::ComplexAck { .. } => ApduType::ComplexAck,
            ApduHeader::SegmentAck { .. } => ApduType::SegmentAck,
            ApduHeader::Error { .. } => ApduType::Error,
            ApduHeader::Reject { .. } => ApduType::Reject,
            ApduHeader::Abort { .. } => ApduType::Abort,
        }
    }

    pub fn invoke_id(&self) -> Option<u8> {
        match self {
            ApduHeader::ConfirmedRequest { invoke_id, .. }
            | ApduHeader::SimpleAck { invoke_id, .. }
            | ApduHeader::ComplexAck { invoke_id, .. }
            | ApduHeader::SegmentAck { invoke_id, .. }
            | ApduHeader::Error { invoke_id, .. }
            | ApduHeader::Reject { invoke_id, .. }
            | ApduHeader::Abort { invoke_id, .. } => Some(*invoke_id),
            ApduHeader::UnconfirmedRequest { .. } => None,
        }
    }

    pub fn service_choice(&self) -> Option<u8> {
        match self {
            ApduHeader::ConfirmedRequest { service_choice, .. }
            | ApduHeader::UnconfirmedRequest { service_choice }
            | ApduHeader::SimpleAck { service_choice, .. }
            | ApduHeader::ComplexAck { service_choice, .. }
            | ApduHeader::Error { service_choice, .. } => Some(*service_choice),
            ApduHeader::SegmentAck { .. } | ApduHeader::Reject { .. } | ApduHeader::Abort { .. } => None,
        }
    }

    /// Standard name of the service, when the header names one.
    pub fn service_name(&self) -> Option<&'static str> {
        match self {
            ApduHeader::UnconfirmedRequest { service_choice } => {
                UnconfirmedService::from_code(*service_choice).map(UnconfirmedService::name)
            }
            _ => self
                .service_choice()
                .and_then(ConfirmedService::from_code)
                .map(ConfirmedService::name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    Application,
    Context,
    Opening,
    Closing,
}

/// One encoded BACnet tag. For an application-class boolean the value lives in the tag
/// octet itself; `data` then holds that single value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub class: TagClass,
    pub number: u8,
    pub data: Vec<u8>,
}

const APPLICATION_BOOLEAN: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSequence {
    pub service: Service,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRecord {
    pub source: Address,
    pub destination: Address,
    pub header: ApduHeader,
    /// Bytes after the fixed header.
    pub data: Vec<u8>,
    pub service: Option<ServiceSequence>,
}

impl ApplicationRecord {
    pub fn kind(&self) -> ApduType {
        self.header.kind()
    }
}

/// Generic APDU header decode. Returns the header and the remaining service data.
pub fn decode_header(data: &[u8]) -> Result<(ApduHeader, Vec<u8>), CodecError> {
    let mut r = Cursor::new(data);
    let b0 = r.read_u8()?;
    let kind = ApduType::from_nibble(b0 >> 4).ok_or(CodecError::UnknownType(b0 >> 4))?;
    let header = match kind {
        ApduType::ConfirmedRequest => {
            let segmented = b0 & PDU_SEGMENTED != 0;
            let b1 = r.read_u8()?;
            let invoke_id = r.read_u8()?;
            let (sequence_number, proposed_window_size) = if segmented {
                (Some(r.read_u8()?), Some(r.read_u8()?))
            } else {
                (None, None)
            };
            ApduHeader::ConfirmedRequest {
                segmented,
                more_follows: b0 & PDU_MORE_FOLLOWS != 0,
                segmented_response_accepted: b0 & PDU_SEGMENTED_RESPONSE_ACCEPTED != 0,
                max_segments: (b1 >> 4) & 0x07,
                max_apdu: b1 & 0x0f,
                invoke_id,
                sequence_number,
                proposed_window_size,
                service_choice: r.read_u8()?,
            }
        }
        ApduType::UnconfirmedRequest => ApduHeader::UnconfirmedRequest {
            service_choice: r.read_u8()?,
        },
        ApduType::SimpleAck => ApduHeader::SimpleAck {
            invoke_id: r.read_u8()?,
            service_choice: r.read_u8()?,
        },
        ApduType::ComplexAck => {
            let segmented = b0 & PDU_SEGMENTED != 0;
            let invoke_id = r.read_u8()?;
            let (sequence_number, proposed_window_size) = if segmented {
                (Some(r.read_u8()?), Some(r.read_u8()?))
            } else {
                (None, None)
            };
            ApduHeader::ComplexAck {
                segmented,
                more_follows: b0 & PDU_MORE_FOLLOWS != 0,
                invoke_id,
                sequence_number,
                proposed_window_size,
                service_choice: r.read_u8()?,
            }
        }
        ApduType::SegmentAck => ApduHeader::SegmentAck {
            negative: b0 & PDU_NEGATIVE_ACK != 0,
            server: b0 & PDU_SERVER != 0,
            invoke_id: r.read_u8()?,
            sequence_number: r.read_u8()?,
            actual_window_size: r.read_u8()?,
        },
        ApduType::Error => ApduHeader::Error {
            invoke_id: r.read_u8()?,
            service_choice: r.read_u8()?,
        },
        ApduType::Reject => ApduHeader::Reject {
            invoke_id: r.read_u8()?,
            reason: r.read_u8()?,
        },
        ApduType::Abort => ApduHeader::Abort {
            server: b0 & PDU_SERVER != 0,
            invoke_id: r.read_u8()?,
            reason: r.read_u8()?,
        },
    };
    Ok((header, rest(&r)))
}

fn read_tag(r: &mut Reader<'_>) -> Result<Tag, CodecError> {
    let b = r.read_u8()?;
    let mut number = b >> 4;
    let context = b & 0x08 != 0;
    let lvt = b & 0x07;
    if number == 0x0f {
        number = r.read_u8()?;
    }

    if context && lvt == 6 {
        return Ok(Tag { class: TagClass::Opening, number, data: Vec::new() });
    }
    if context && lvt == 7 {
        return Ok(Tag { class: TagClass::Closing, number, data: Vec::new() });
    }
    if !context && number == APPLICATION_BOOLEAN {
        return Ok(Tag { class: TagClass::Application, number, data: vec![lvt] });
    }
    if lvt > 5 {
        return Err(CodecError::Validation(format!(
            "application tag {} with length/value/type {}",
            number, lvt
        )));
    }

    let len = if lvt == 5 {
        match r.read_u8()? {
            254 => r.read_u16::<BigEndian>()? as usize,
            255 => r.read_u32::<BigEndian>()? as usize,
            n => n as usize,
        }
    } else {
        lvt as usize
    };
    if len > remaining(r) {
        return Err(CodecError::Length {
            declared: len,
            actual: remaining(r),
        });
    }
    let class = if context { TagClass::Context } else { TagClass::Application };
    Ok(Tag { class, number, data: read_vec(r, len)? })
}

/// Decode a run of tags, checking that opening and closing tags pair up.
pub fn decode_tags(data: &[u8]) -> Result<Vec<Tag>, CodecError> {
    let mut r = Cursor::new(data);
    let mut tags = Vec::new();
    let mut open: Vec<u8> = Vec::new();
    while remaining(&r) > 0 {
        let tag = read_tag(&mut r)?;
        match tag.class {
            TagClass::Opening => open.push(tag.number),
            TagClass::Closing => match open.pop() {
                Some(n) if n == tag.number => {}
                Some(n) => {
                    return Err(CodecError::Validation(format!(
                        "closing tag {} does not match opening tag {}",
                        tag.number, n
                    )))
                }
                None => {
                    return Err(CodecError::Validation(format!(
                        "closing tag {} without opening tag",
                        tag.number
                    )))
                }
            },
            TagClass::Application | TagClass::Context => {}
        }
        tags.push(tag);
    }
    if let Some(n) = open.last() {
        return Err(CodecError::Validation(format!("opening tag {} is never closed", n)));
    }
    Ok(tags)
}

/// Refine a request or complex ack into its service-parameter sequence.
///
/// Returns [`CodecError::NoSequence`] when no sequence applies (segmented message, service
/// choice outside the registry, or a header kind without parameters); tag-level faults come
/// back as other variants.
pub fn decode_service_sequence(header: &ApduHeader, data: &[u8]) -> Result<ServiceSequence, CodecError> {
    let service = match header {
        ApduHeader::ConfirmedRequest { segmented: true, .. } | ApduHeader::ComplexAck { segmented: true, .. } => {
            return Err(CodecError::NoSequence("segmented message".to_string()))
        }
        ApduHeader::ConfirmedRequest { service_choice, .. } | ApduHeader::ComplexAck { service_choice, .. } => {
            ConfirmedService::from_code(*service_choice)
                .map(Service::Confirmed)
                .ok_or_else(|| CodecError::NoSequence(format!("confirmed service {}", service_choice)))?
        }
        ApduHeader::UnconfirmedRequest { service_choice } => UnconfirmedService::from_code(*service_choice)
            .map(Service::Unconfirmed)
            .ok_or_else(|| CodecError::NoSequence(format!("unconfirmed service {}", service_choice)))?,
        other => {
            return Err(CodecError::NoSequence(format!(
                "{} has no service parameters",
                other.kind().name()
            )))
        }
    };
    Ok(ServiceSequence {
        service,
        tags: decode_tags(data)?,
    })
}

/// Decode the application layer carried by an NPDU.
///
/// `Ok(None)` for network-layer messages and for headers that do not decode. Routed SADR/DADR
/// fields become the record's endpoints; in route-aware mode the lifted source keeps the
/// NPDU's transport source as its route.
pub fn decode_application(
    net: &NetworkRecord,
    options: &DecodeOptions,
) -> Result<Option<ApplicationRecord>, DecodeError> {
    if net.is_network_message() {
        log::trace!("network layer message, not an APDU");
        return Ok(None);
    }

    let (header, data) = match decode_header(&net.pdu.data) {
        Ok(decoded) => decoded,
        Err(e) => {
            log::debug!("APDU decoding error: {}", e);
            return Ok(None);
        }
    };

    let source = match &net.source {
        Some(sadr) if options.route_aware => sadr.clone().with_route(net.pdu.source.clone()),
        Some(sadr) => sadr.clone(),
        None => net.pdu.source.clone(),
    };
    let destination = net.destination.clone().unwrap_or_else(|| net.pdu.destination.clone());

    let service = if header.kind().has_service_sequence() {
        match decode_service_sequence(&header, &data) {
            Ok(seq) => Some(seq),
            Err(CodecError::NoSequence(reason)) => {
                log::debug!("no service sequence: {}", reason);
                None
            }
            Err(e) => return Err(DecodeError::Service(e)),
        }
    } else {
        None
    };

    Ok(Some(ApplicationRecord {
        source,
        destination,
        header,
        data,
        service,
    }))
}
