//! Text rendering of decoded packets: timestamps, layer class names and field dumps.

use crate::apdu::{ApduHeader, ApplicationRecord, Tag, TagClass};
use crate::bvll::{BvllMessage, LinkRecord};
use crate::frame::TransportPdu;
use crate::npdu::{NetworkMessage, NetworkRecord};
use crate::pipeline::{DecodedPacket, LayerRef};
use chrono::DateTime;
use std::fmt::Display;

/// Capture timestamp as `DD-Mon-YYYY HH:MM:SS.uuuuuu UTC`.
pub fn format_timestamp(ts: f64) -> String {
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1e9).round().min(999_999_999.0) as u32;
    match DateTime::from_timestamp(secs as i64, nanos) {
        Some(dt) => dt.format("%d-%b-%Y %H:%M:%S%.6f UTC").to_string(),
        None => format!("{:.6}", ts),
    }
}

pub fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// Class name of a layer: the message or function name when one is known.
pub fn layer_name(layer: LayerRef<'_>) -> &'static str {
    match layer {
        LayerRef::Transport(_) => "PDU",
        LayerRef::Link(l) => l.kind().map_or("LPDU", |f| f.name()),
        LayerRef::Network(n) => n.message_kind().map_or("NPDU", |k| k.name()),
        LayerRef::Application(a) => a.kind().name(),
    }
}

struct Lines {
    lines: Vec<String>,
    indent: usize,
}

impl Lines {
    fn new(indent: usize) -> Self {
        Lines {
            lines: Vec::new(),
            indent,
        }
    }

    fn field(&mut self, key: &str, value: impl Display) {
        self.lines.push(format!("{}{} = {}", "  ".repeat(self.indent), key, value));
    }

    fn opt<T: Display>(&mut self, key: &str, value: Option<T>) {
        if let Some(v) = value {
            self.field(key, v);
        }
    }

    fn nested(&mut self, key: &str, f: impl FnOnce(&mut Lines)) {
        self.lines.push(format!("{}{}", "  ".repeat(self.indent), key));
        self.indent += 1;
        f(self);
        self.indent -= 1;
    }
}

fn dump_pdu(out: &mut Lines, pdu: &TransportPdu) {
    out.field("source", &pdu.source);
    out.field("destination", &pdu.destination);
    if !pdu.data.is_empty() {
        out.field("data", hex_string(&pdu.data));
    }
}

fn dump_link(out: &mut Lines, link: &LinkRecord) {
    out.field("source", &link.pdu.source);
    out.field("destination", &link.pdu.destination);
    out.field("function", format!("{:#04x}", link.function));
    out.field("length", link.length);
    match &link.message {
        Some(BvllMessage::Result { code }) => out.field("result", format!("{:#06x}", code)),
        Some(BvllMessage::WriteBroadcastDistributionTable(entries))
        | Some(BvllMessage::ReadBroadcastDistributionTableAck(entries)) => {
            out.nested("bdt", |out| {
                for e in entries {
                    out.field("entry", format!("{}/{}", e.address, e.mask));
                }
            });
        }
        Some(BvllMessage::ReadForeignDeviceTableAck(entries)) => {
            out.nested("fdt", |out| {
                for e in entries {
                    out.field("entry", format!("{} ttl={} remaining={}", e.address, e.ttl, e.remaining));
                }
            });
        }
        Some(BvllMessage::ForwardedNpdu { address }) => out.field("originator", address),
        Some(BvllMessage::RegisterForeignDevice { ttl }) => out.field("ttl", ttl),
        Some(BvllMessage::DeleteForeignDeviceTableEntry { address }) => out.field("address", address),
        Some(BvllMessage::SecureBvll(body)) => out.field("body", hex_string(body)),
        Some(_) | None => {}
    }
}

fn join_networks(list: &[u16]) -> String {
    list.iter().map(u16::to_string).collect::<Vec<_>>().join(", ")
}

fn dump_network_message(out: &mut Lines, message: &NetworkMessage) {
    match message {
        NetworkMessage::WhoIsRouterToNetwork { network } => out.opt("network", *network),
        NetworkMessage::IAmRouterToNetwork(list)
        | NetworkMessage::RouterBusyToNetwork(list)
        | NetworkMessage::RouterAvailableToNetwork(list) => out.field("networks", join_networks(list)),
        NetworkMessage::ICouldBeRouterToNetwork {
            network,
            performance_index,
        } => {
            out.field("network", network);
            out.field("performance_index", performance_index);
        }
        NetworkMessage::RejectMessageToNetwork { reason, network } => {
            out.field("reason", reason);
            out.field("network", network);
        }
        NetworkMessage::InitializeRoutingTable(entries) | NetworkMessage::InitializeRoutingTableAck(entries) => {
            out.nested("routing_table", |out| {
                for e in entries {
                    out.field("entry", format!("net={} port={} info=[{}]", e.network, e.port_id, hex_string(&e.port_info)));
                }
            });
        }
        NetworkMessage::EstablishConnectionToNetwork {
            network,
            termination_time,
        } => {
            out.field("network", network);
            out.field("termination_time", termination_time);
        }
        NetworkMessage::DisconnectConnectionToNetwork { network } => out.field("network", network),
        NetworkMessage::WhatIsNetworkNumber => {}
        NetworkMessage::NetworkNumberIs { network, configured } => {
            out.field("network", network);
            out.field("configured", configured);
        }
    }
}

fn dump_network(out: &mut Lines, npdu: &NetworkRecord) {
    out.field("source", &npdu.pdu.source);
    out.field("destination", &npdu.pdu.destination);
    out.field("version", npdu.version);
    out.field("control", format!("{:#04x}", npdu.control));
    if npdu.expecting_reply() {
        out.field("expecting_reply", true);
    }
    out.field("priority", npdu.priority());
    out.opt("dadr", npdu.destination.as_ref());
    out.opt("sadr", npdu.source.as_ref());
    out.opt("hop_count", npdu.hop_count);
    out.opt("message_type", npdu.message_type.map(|t| format!("{:#04x}", t)));
    out.opt("vendor_id", npdu.vendor_id);
    match &npdu.message {
        Some(message) => dump_network_message(out, message),
        None if !npdu.pdu.data.is_empty() => out.field("data", hex_string(&npdu.pdu.data)),
        None => {}
    }
}

fn tag_line(tag: &Tag) -> String {
    match tag.class {
        TagClass::Application => format!("application {} [{}]", tag.number, hex_string(&tag.data)),
        TagClass::Context => format!("context {} [{}]", tag.number, hex_string(&tag.data)),
        TagClass::Opening => format!("opening {}", tag.number),
        TagClass::Closing => format!("closing {}", tag.number),
    }
}

fn dump_application(out: &mut Lines, apdu: &ApplicationRecord) {
    out.field("source", &apdu.source);
    out.field("destination", &apdu.destination);
    out.opt("invoke_id", apdu.header.invoke_id());
    match &apdu.header {
        ApduHeader::ConfirmedRequest {
            segmented,
            more_follows,
            segmented_response_accepted,
            max_segments,
            max_apdu,
            sequence_number,
            proposed_window_size,
            ..
        } => {
            out.field("segmented", segmented);
            out.field("more_follows", more_follows);
            out.field("segmented_response_accepted", segmented_response_accepted);
            out.field("max_segments", max_segments);
            out.field("max_apdu", max_apdu);
            out.opt("sequence_number", *sequence_number);
            out.opt("proposed_window_size", *proposed_window_size);
        }
        ApduHeader::ComplexAck {
            segmented,
            more_follows,
            sequence_number,
            proposed_window_size,
            ..
        } => {
            out.field("segmented", segmented);
            out.field("more_follows", more_follows);
            out.opt("sequence_number", *sequence_number);
            out.opt("proposed_window_size", *proposed_window_size);
        }
        ApduHeader::SegmentAck {
            negative,
            server,
            sequence_number,
            actual_window_size,
            ..
        } => {
            out.field("negative", negative);
            out.field("server", server);
            out.field("sequence_number", sequence_number);
            out.field("actual_window_size", actual_window_size);
        }
        ApduHeader::Reject { reason, .. } => out.field("reason", reason),
        ApduHeader::Abort { server, reason, .. } => {
            out.field("server", server);
            out.field("reason", reason);
        }
        ApduHeader::UnconfirmedRequest { .. } | ApduHeader::SimpleAck { .. } | ApduHeader::Error { .. } => {}
    }
    if let Some(choice) = apdu.header.service_choice() {
        match apdu.header.service_name() {
            Some(name) => out.field("service", format!("{} ({})", name, choice)),
            None => out.field("service", choice),
        }
    }
    match &apdu.service {
        Some(seq) => out.nested("parameters", |out| {
            for tag in &seq.tags {
                out.lines.push(format!("{}{}", "  ".repeat(out.indent), tag_line(tag)));
            }
        }),
        None if !apdu.data.is_empty() => out.field("data", hex_string(&apdu.data)),
        None => {}
    }
}

/// Field dump of one layer, one `key = value` per line.
pub fn describe(layer: LayerRef<'_>) -> Vec<String> {
    describe_indented(layer, 0)
}

fn describe_indented(layer: LayerRef<'_>, indent: usize) -> Vec<String> {
    let mut out = Lines::new(indent);
    match layer {
        LayerRef::Transport(p) => dump_pdu(&mut out, p),
        LayerRef::Link(l) => dump_link(&mut out, l),
        LayerRef::Network(n) => dump_network(&mut out, n),
        LayerRef::Application(a) => dump_application(&mut out, a),
    }
    out.lines
}

/// Every layer of a full decode, deepest first, each under a `APDU:`-style heading.
pub fn describe_packet(packet: &DecodedPacket) -> Vec<String> {
    let mut layers = Vec::new();
    if let Some(a) = packet.application() {
        layers.push(LayerRef::Application(a));
    }
    if let Some(n) = packet.network() {
        layers.push(LayerRef::Network(n));
    }
    if let Some(l) = packet.link() {
        layers.push(LayerRef::Link(l));
    }
    layers.push(LayerRef::Transport(packet.pdu()));

    let mut lines = Vec::new();
    for layer in layers {
        lines.push(format!("{}: {}", layer.name(), layer_name(layer)));
        lines.extend(describe_indented(layer, 1));
    }
    lines
}
