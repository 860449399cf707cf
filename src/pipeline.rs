//! The layered decode: frame → BVLL → NPDU → APDU.
//!
//! [`Pipeline::decode_layers`] is the single traversal; the deepest-only and full-record
//! entry points are both projections of its result, so they cannot drift apart.

use crate::apdu::{decode_application, ApplicationRecord};
use crate::bvll::{decode_link, LinkRecord};
use crate::error::DecodeError;
use crate::frame::{decode_frame, Frame, TransportPdu};
use crate::npdu::{decode_network, NetworkDecode, NetworkRecord};

/// Decoder configuration, passed to every step that rewrites addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Keep the pre-lift transport address as a route annotation when a forwarded or routed
    /// source address is promoted.
    pub route_aware: bool,
}

impl DecodeOptions {
    pub fn route_aware() -> Self {
        DecodeOptions { route_aware: true }
    }
}

/// One captured frame as handed over by a capture reader.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub data: Vec<u8>,
    /// Seconds since the epoch.
    pub timestamp: f64,
    /// 1-based position in the capture.
    pub number: u64,
}

impl RawRecord {
    pub fn new(number: u64, timestamp: f64, data: Vec<u8>) -> Self {
        RawRecord {
            data,
            timestamp,
            number,
        }
    }
}

/// The deepest layer that decoded for a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    Transport(TransportPdu),
    Link(LinkRecord),
    Network(NetworkRecord),
    Application(ApplicationRecord),
}

/// Borrowed view of a [`Layer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRef<'a> {
    Transport(&'a TransportPdu),
    Link(&'a LinkRecord),
    Network(&'a NetworkRecord),
    Application(&'a ApplicationRecord),
}

impl Layer {
    pub fn view(&self) -> LayerRef<'_> {
        match self {
            Layer::Transport(p) => LayerRef::Transport(p),
            Layer::Link(l) => LayerRef::Link(l),
            Layer::Network(n) => LayerRef::Network(n),
            Layer::Application(a) => LayerRef::Application(a),
        }
    }
}

impl LayerRef<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            LayerRef::Transport(_) => "PDU",
            LayerRef::Link(_) => "LPDU",
            LayerRef::Network(_) => "NPDU",
            LayerRef::Application(_) => "APDU",
        }
    }
}

/// Every layer reached for one frame, lowest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layers {
    pub frame: Frame,
    pub link: Option<LinkRecord>,
    pub network: Option<NetworkRecord>,
    pub application: Option<ApplicationRecord>,
}

impl Layers {
    pub fn deepest(&self) -> LayerRef<'_> {
        if let Some(a) = &self.application {
            LayerRef::Application(a)
        } else if let Some(n) = &self.network {
            LayerRef::Network(n)
        } else if let Some(l) = &self.link {
            LayerRef::Link(l)
        } else {
            LayerRef::Transport(&self.frame.pdu)
        }
    }

    pub fn into_deepest(self) -> Layer {
        match self {
            Layers { application: Some(a), .. } => Layer::Application(a),
            Layers { network: Some(n), .. } => Layer::Network(n),
            Layers { link: Some(l), .. } => Layer::Link(l),
            Layers { frame, .. } => Layer::Transport(frame.pdu),
        }
    }
}

/// Full decode of one capture record. Built once and never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    number: u64,
    timestamp: f64,
    layers: Layers,
}

impl DecodedPacket {
    pub fn new(number: u64, timestamp: f64, layers: Layers) -> Self {
        DecodedPacket {
            number,
            timestamp,
            layers,
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn frame(&self) -> &Frame {
        &self.layers.frame
    }

    /// The transport PDU as peeled from the frame, before any address lifting.
    pub fn pdu(&self) -> &TransportPdu {
        &self.layers.frame.pdu
    }

    pub fn link(&self) -> Option<&LinkRecord> {
        self.layers.link.as_ref()
    }

    pub fn network(&self) -> Option<&NetworkRecord> {
        self.layers.network.as_ref()
    }

    pub fn application(&self) -> Option<&ApplicationRecord> {
        self.layers.application.as_ref()
    }

    pub fn layers(&self) -> &Layers {
        &self.layers
    }

    pub fn deepest(&self) -> LayerRef<'_> {
        self.layers.deepest()
    }
}

/// Deepest-layer result tagged with its capture position.
#[derive(Debug, Clone, PartialEq)]
pub struct DeepestPacket {
    pub number: u64,
    pub timestamp: f64,
    pub layer: Layer,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Pipeline {
    options: DecodeOptions,
}

impl Pipeline {
    pub fn new(options: DecodeOptions) -> Self {
        Pipeline { options }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Run every layer over one raw frame. `Ok(None)` when the frame has no payload.
    ///
    /// The network layer is tried on plain traffic and on BVLL functions that wrap an NPDU;
    /// a malformed, unknown or management-only BVLL frame ends the decode at the link layer.
    /// The application layer is tried only on NPDUs that are not network-layer messages.
    pub fn decode_layers(&self, raw: &[u8]) -> Result<Option<Layers>, DecodeError> {
        let Some(frame) = decode_frame(raw)? else {
            return Ok(None);
        };

        let link_decode = decode_link(&frame.pdu, &self.options);
        let descends = link_decode.descends();
        let (link, current) = link_decode.into_parts();

        let mut network = None;
        let mut application = None;
        if descends {
            match decode_network(&current)? {
                NetworkDecode::Decoded(npdu) => {
                    if !npdu.is_network_message() {
                        application = decode_application(&npdu, &self.options)?;
                    }
                    network = Some(npdu);
                }
                NetworkDecode::WrongVersion => {}
            }
        }

        Ok(Some(Layers {
            frame,
            link,
            network,
            application,
        }))
    }

    /// Deepest layer reached for `raw`.
    pub fn decode_depth(&self, raw: &[u8]) -> Result<Option<Layer>, DecodeError> {
        Ok(self.decode_layers(raw)?.map(Layers::into_deepest))
    }

    /// Every layer reached for `record`, stamped with its number and timestamp.
    pub fn decode_full(&self, record: &RawRecord) -> Result<Option<DecodedPacket>, DecodeError> {
        Ok(self
            .decode_layers(&record.data)?
            .map(|layers| DecodedPacket::new(record.number, record.timestamp, layers)))
    }

    pub fn decode_deepest(&self, record: &RawRecord) -> Result<Option<DeepestPacket>, DecodeError> {
        Ok(self.decode_depth(&record.data)?.map(|layer| DeepestPacket {
            number: record.number,
            timestamp: record.timestamp,
            layer,
        }))
    }
}
