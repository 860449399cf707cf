//! # bacnet-analysis — offline BACnet/IP capture dissector
//!
//! Decodes captured Ethernet frames layer by layer into BACnet/IP protocol data units and
//! streams the results, one packet per capture record.
//!
//! ## Layers
//!
//! - **Frame**: Ethernet II, one optional 802.1Q tag, IPv4, UDP ([`frame`])
//! - **BVLL**: the BACnet/IP virtual link layer, marker `0x81` ([`bvll`])
//! - **NPDU**: the network layer, routed addresses and network-layer messages ([`npdu`])
//! - **APDU**: application headers and tagged service parameters ([`apdu`])
//!
//! Each layer falls back to the one below when it does not apply: a UDP payload that is not
//! BVLL stays a transport PDU, an NPDU with the wrong version stays a link record, and so on.
//! Only a truncated fixed header (or an NPDU/service fault with no coarser fallback) rejects
//! a record, and [`source`] drops such records and carries on.
//!
//! ## Usage
//!
//! ```no_run
//! use bacnet_analysis::{packets, CaptureReader, DecodeOptions, Pipeline};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let reader = CaptureReader::open("capture.pcap")?;
//! let pipeline = Pipeline::new(DecodeOptions::default());
//! for pkt in packets(reader.records(), pipeline) {
//!     println!("{} {}", pkt.number(), pkt.deepest().name());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! See `tests/integration.rs` for frame-level examples.

pub mod address;
pub mod apdu;
pub mod bvll;
pub mod capture;
pub mod codec;
pub mod dump;
pub mod error;
pub mod frame;
pub mod npdu;
pub mod pipeline;
pub mod source;
pub mod tracer;

pub use address::{Address, AddressKind};
pub use apdu::{decode_application, ApduHeader, ApduType, ApplicationRecord, ConfirmedService, Service, UnconfirmedService};
pub use bvll::{decode_link, BvllFunction, BvllMessage, LinkDecode, LinkRecord};
pub use capture::{CaptureError, CaptureReader};
pub use codec::CodecError;
pub use error::DecodeError;
pub use frame::{decode_frame, Frame, TransportPdu};
pub use npdu::{decode_network, NetworkDecode, NetworkMessage, NetworkRecord};
pub use pipeline::{DecodeOptions, DecodedPacket, DeepestPacket, Layer, LayerRef, Layers, Pipeline, RawRecord};
pub use source::{deepest_packets, packets, Packets};
pub use tracer::{trace, StateMachine, Trace, Tracer, Transition};
