//! Integration tests: frame peeling, layer fallbacks, route-aware lifting and packet streams.

mod common;

use bacnet_analysis::apdu::TagClass;
use bacnet_analysis::bvll::BvllMessage;
use bacnet_analysis::npdu::NetworkMessage;
use bacnet_analysis::{
    deepest_packets, packets, Address, AddressKind, ApduType, ConfirmedService, DecodeError, DecodeOptions, Layer,
    LayerRef, Pipeline, RawRecord, Service, UnconfirmedService,
};
use common::*;
use std::net::Ipv4Addr;

fn host() -> Address {
    Address::ip_port(Ipv4Addr::from(HOST), BACNET_PORT)
}

fn plain() -> Pipeline {
    Pipeline::new(DecodeOptions::default())
}

fn route_aware() -> Pipeline {
    Pipeline::new(DecodeOptions::route_aware())
}

fn forwarded_who_is() -> Vec<u8> {
    let body = concat(&[&[10, 0, 0, 5, 0xba, 0xc0], &PLAIN_NPDU, &WHO_IS]);
    bip_frame(&bvll(0x04, &body))
}

#[test]
fn test_who_is_decodes_to_application() {
    let layer = plain().decode_depth(&who_is_frame()).expect("decode").expect("payload");
    let Layer::Application(apdu) = layer else {
        panic!("expected an APDU");
    };
    assert_eq!(apdu.kind(), ApduType::UnconfirmedRequest);
    assert_eq!(apdu.header.service_name(), Some("whoIs"));
    assert_eq!(apdu.source, host());
    assert_eq!(apdu.destination, Address::ip_port(Ipv4Addr::from(BROADCAST), BACNET_PORT));
    let seq = apdu.service.expect("service sequence");
    assert_eq!(seq.service, Service::Unconfirmed(UnconfirmedService::WhoIs));
    assert!(seq.tags.is_empty());
}

#[test]
fn test_read_property_parameters() {
    let raw = read_property_frame(7);
    let pkt = plain()
        .decode_full(&RawRecord::new(1, 0.0, raw))
        .expect("decode")
        .expect("payload");
    let npdu = pkt.network().expect("npdu");
    assert!(npdu.expecting_reply());
    let apdu = pkt.application().expect("apdu");
    assert_eq!(apdu.header.invoke_id(), Some(7));
    let seq = apdu.service.as_ref().expect("service sequence");
    assert_eq!(seq.service, Service::Confirmed(ConfirmedService::ReadProperty));
    assert_eq!(seq.service.name(), "readProperty");
    assert_eq!(seq.tags.len(), 2);
    assert_eq!(seq.tags[0].class, TagClass::Context);
    assert_eq!(seq.tags[0].number, 0);
    assert_eq!(seq.tags[0].data, vec![0x02, 0x00, 0x00, 0x01]);
    assert_eq!(seq.tags[1].data, vec![0x55]);
}

#[test]
fn test_full_decode_keeps_every_layer() {
    let pkt = plain()
        .decode_full(&RawRecord::new(4, 12.5, who_is_frame()))
        .expect("decode")
        .expect("payload");
    assert_eq!(pkt.number(), 4);
    assert_eq!(pkt.timestamp(), 12.5);
    assert!(pkt.frame().udp.is_some());
    let link = pkt.link().expect("link");
    assert_eq!(link.function, 0x0b);
    assert_eq!(link.message, Some(BvllMessage::OriginalBroadcastNpdu));
    assert!(pkt.network().is_some());
    assert!(matches!(pkt.deepest(), LayerRef::Application(_)));
    assert_eq!(pkt.deepest().name(), "APDU");
}

#[test]
fn test_non_bvll_payload_stays_transport() {
    let raw = bip_frame(&[0x02, 0x03, 0x04]);
    match plain().decode_depth(&raw).expect("decode") {
        Some(Layer::Transport(pdu)) => {
            assert_eq!(pdu.data, vec![0x02, 0x03, 0x04]);
            assert_eq!(pdu.source, host());
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_bare_npdu_without_bvll_reaches_application() {
    let raw = bip_frame(&concat(&[&PLAIN_NPDU, &WHO_IS]));
    let pkt = plain()
        .decode_full(&RawRecord::new(1, 0.0, raw))
        .expect("decode")
        .expect("payload");
    assert!(pkt.link().is_none());
    assert!(pkt.network().is_some());
    assert!(pkt.application().is_some());
}

#[test]
fn test_non_udp_ip_has_portless_addresses() {
    let raw = ethernet(0x0800, &ipv4(6, HOST, BROADCAST, &[0xde, 0xad, 0xbe, 0xef]));
    let pkt = plain()
        .decode_full(&RawRecord::new(1, 0.0, raw))
        .expect("decode")
        .expect("payload");
    assert!(pkt.frame().udp.is_none());
    assert_eq!(pkt.frame().ipv4.as_ref().and_then(|ip| ip.protocol_name()), Some("tcp"));
    assert_eq!(pkt.pdu().source, Address::ip(Ipv4Addr::from(HOST)));
    assert_eq!(pkt.pdu().data, vec![0xde, 0xad, 0xbe, 0xef]);
    assert!(matches!(pkt.deepest(), LayerRef::Transport(_)));
}

#[test]
fn test_non_ip_frame_has_mac_addresses() {
    let raw = ethernet(0x86dd, &[0x60, 0x00, 0x00, 0x00]);
    match plain().decode_depth(&raw).expect("decode") {
        Some(Layer::Transport(pdu)) => {
            assert_eq!(pdu.source, Address::mac(SRC_MAC));
            assert_eq!(pdu.destination.kind, AddressKind::Mac(DST_MAC));
            assert_eq!(pdu.source.to_string(), "00:11:22:33:44:55");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_vlan_tagged_frame() {
    let inner = ipv4(17, HOST, BROADCAST, &udp(BACNET_PORT, BACNET_PORT, &bvll(0x0b, &concat(&[&PLAIN_NPDU, &WHO_IS]))));
    let raw = vlan(5, 3, 0x0800, &inner);
    let pkt = plain()
        .decode_full(&RawRecord::new(1, 0.0, raw))
        .expect("decode")
        .expect("payload");
    let tag = pkt.frame().vlan.expect("vlan tag");
    assert_eq!(tag.vlan, 5);
    assert_eq!(tag.priority, 3);
    assert_eq!(tag.ethertype, 0x0800);
    assert!(pkt.application().is_some());
}

#[test]
fn test_ip_options_are_kept() {
    let mut ip = ipv4(17, HOST, BROADCAST, &udp(BACNET_PORT, BACNET_PORT, &[0x02]));
    ip[0] = 0x46;
    ip.splice(20..20, [0x01, 0x01, 0x01, 0x00]);
    let pkt = plain()
        .decode_full(&RawRecord::new(1, 0.0, ethernet(0x0800, &ip)))
        .expect("decode")
        .expect("payload");
    let header = pkt.frame().ipv4.as_ref().expect("ipv4");
    assert_eq!(header.header_len, 6);
    assert_eq!(header.options, Some(vec![0x01, 0x01, 0x01, 0x00]));
    assert_eq!(pkt.pdu().data, vec![0x02]);
}

#[test]
fn test_udp_payload_excludes_ethernet_padding() {
    let mut raw = bip_frame(&[0x02, 0x03]);
    raw.extend_from_slice(&[0u8; 6]);
    match plain().decode_depth(&raw).expect("decode") {
        Some(Layer::Transport(pdu)) => assert_eq!(pdu.data, vec![0x02, 0x03]),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_forwarded_npdu_without_route_awareness() {
    let pkt = plain()
        .decode_full(&RawRecord::new(1, 0.0, forwarded_who_is()))
        .expect("decode")
        .expect("payload");
    let link = pkt.link().expect("link");
    let originator = Address::ip_port(Ipv4Addr::new(10, 0, 0, 5), BACNET_PORT);
    assert_eq!(link.message, Some(BvllMessage::ForwardedNpdu { address: originator }));
    assert_eq!(link.pdu.source, host());
    let apdu = pkt.application().expect("apdu");
    assert_eq!(apdu.source, host());
    assert!(apdu.source.route().is_none());
}

#[test]
fn test_forwarded_npdu_route_aware_lifts_source() {
    let pkt = route_aware()
        .decode_full(&RawRecord::new(1, 0.0, forwarded_who_is()))
        .expect("decode")
        .expect("payload");
    let originator = Address::ip_port(Ipv4Addr::new(10, 0, 0, 5), BACNET_PORT);
    let lifted = originator.with_route(host());
    assert_eq!(pkt.link().expect("link").pdu.source, lifted);
    let apdu = pkt.application().expect("apdu");
    assert_eq!(apdu.source, lifted);
    assert_eq!(apdu.source.route(), Some(&host()));
    assert_eq!(apdu.source.to_string(), "10.0.0.5:47808@192.168.1.10:47808");
    // the frame's own PDU is never rewritten
    assert_eq!(pkt.pdu().source, host());
}

#[test]
fn test_routed_source_is_lifted_to_application() {
    // SNET 5, SLEN 1, SADR 0x07
    let npdu = [0x01, 0x08, 0x00, 0x05, 0x01, 0x07];
    let raw = bip_frame(&bvll(0x0a, &concat(&[&npdu, &WHO_IS])));
    let remote = Address::remote_station(5, vec![0x07]);

    let off = plain().decode_depth(&raw).expect("decode");
    let Some(Layer::Application(apdu)) = off else {
        panic!("expected an APDU");
    };
    assert_eq!(apdu.source, remote);

    let on = route_aware().decode_depth(&raw).expect("decode");
    let Some(Layer::Application(apdu)) = on else {
        panic!("expected an APDU");
    };
    assert_eq!(apdu.source, remote.with_route(host()));
}

#[test]
fn test_routed_destination_replaces_transport_destination() {
    // DNET 0xffff (global broadcast), DLEN 0, hop count 255
    let npdu = [0x01, 0x20, 0xff, 0xff, 0x00, 0xff];
    let raw = bip_frame(&bvll(0x0b, &concat(&[&npdu, &WHO_IS])));
    let Some(Layer::Application(apdu)) = plain().decode_depth(&raw).expect("decode") else {
        panic!("expected an APDU");
    };
    assert_eq!(apdu.destination, Address::new(AddressKind::GlobalBroadcast));
    assert!(apdu.destination.is_broadcast());
}

#[test]
fn test_npdu_version_mismatch_falls_back_to_link() {
    let raw = bip_frame(&bvll(0x0a, &[0x02, 0x00, 0x10, 0x08]));
    match plain().decode_depth(&raw).expect("decode") {
        Some(Layer::Link(link)) => {
            assert_eq!(link.message, Some(BvllMessage::OriginalUnicastNpdu));
            assert_eq!(link.pdu.data, vec![0x02, 0x00, 0x10, 0x08]);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_terminal_functions_stop_at_link_layer() {
    // Result, Register-Foreign-Device and Read-BDT bodies that happen to start with 0x01
    let frames = [
        bip_frame(&bvll(0x00, &[0x01, 0x00])),
        bip_frame(&bvll(0x05, &[0x01, 0x2c])),
        bip_frame(&bvll(0x02, &[])),
    ];
    for raw in &frames {
        let pkt = plain()
            .decode_full(&RawRecord::new(1, 0.0, raw.clone()))
            .expect("decode")
            .expect("payload");
        assert!(pkt.link().and_then(|l| l.message.as_ref()).is_some());
        assert!(pkt.network().is_none(), "network layer tried on {:?}", pkt.link());
        assert!(matches!(pkt.deepest(), LayerRef::Link(_)));
    }
}

#[test]
fn test_unknown_function_stops_at_link_layer() {
    let raw = bip_frame(&bvll(0x0d, &concat(&[&PLAIN_NPDU, &WHO_IS])));
    match plain().decode_depth(&raw).expect("decode") {
        Some(Layer::Link(link)) => {
            assert_eq!(link.function, 0x0d);
            assert!(link.kind().is_none());
            assert!(link.message.is_none());
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_body_fault_keeps_header_only_record() {
    // Register-Foreign-Device needs exactly two bytes of TTL
    let raw = bip_frame(&bvll(0x05, &[0x00]));
    match plain().decode_depth(&raw).expect("decode") {
        Some(Layer::Link(link)) => {
            assert_eq!(link.function, 0x05);
            assert!(link.message.is_none());
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_bad_bvll_length_falls_back_to_transport() {
    let mut payload = bvll(0x0a, &concat(&[&PLAIN_NPDU, &WHO_IS]));
    payload[3] += 1;
    let pkt = plain()
        .decode_full(&RawRecord::new(1, 0.0, bip_frame(&payload)))
        .expect("decode")
        .expect("payload");
    assert!(pkt.link().is_none());
    assert!(pkt.network().is_none());
    assert!(matches!(pkt.deepest(), LayerRef::Transport(_)));
}

#[test]
fn test_network_message_has_no_application() {
    let npdu = [0x01, 0x80, 0x01, 0x00, 0x05];
    let pkt = plain()
        .decode_full(&RawRecord::new(1, 0.0, bip_frame(&bvll(0x0b, &npdu))))
        .expect("decode")
        .expect("payload");
    let net = pkt.network().expect("npdu");
    assert_eq!(net.message, Some(NetworkMessage::IAmRouterToNetwork(vec![5])));
    assert!(pkt.application().is_none());
    assert!(matches!(pkt.deepest(), LayerRef::Network(_)));
}

#[test]
fn test_bad_apdu_header_stops_at_network() {
    let raw = bip_frame(&bvll(0x0a, &concat(&[&PLAIN_NPDU, &[0x90, 0x00]])));
    assert!(matches!(plain().decode_depth(&raw).expect("decode"), Some(Layer::Network(_))));
}

#[test]
fn test_segmented_request_keeps_header_without_sequence() {
    let apdu = [0x08, 0x05, 0x01, 0x00, 0x04, 0x0c, 0x0c];
    let raw = bip_frame(&bvll(0x0a, &concat(&[&PLAIN_NPDU, &apdu])));
    let Some(Layer::Application(apdu)) = plain().decode_depth(&raw).expect("decode") else {
        panic!("expected an APDU");
    };
    assert!(apdu.service.is_none());
    assert_eq!(apdu.data, vec![0x0c]);
}

#[test]
fn test_unbalanced_service_tags_reject_the_record() {
    let raw = bip_frame(&bvll(0x0b, &concat(&[&PLAIN_NPDU, &WHO_IS, &[0x1f]])));
    assert!(matches!(plain().decode_depth(&raw), Err(DecodeError::Service(_))));
}

#[test]
fn test_truncated_npdu_header_rejects_the_record() {
    // destination flag set but DNET cut short
    let raw = bip_frame(&bvll(0x0a, &[0x01, 0x20, 0x00]));
    assert!(matches!(plain().decode_depth(&raw), Err(DecodeError::Network(_))));
}

#[test]
fn test_empty_udp_payload_is_nothing_to_decode() {
    let raw = bip_frame(&[]);
    assert!(plain().decode_depth(&raw).expect("decode").is_none());
    assert!(plain().decode_full(&RawRecord::new(1, 0.0, raw)).expect("decode").is_none());
}

#[test]
fn test_short_frames_are_bounds_faults() {
    for raw in [Vec::new(), vec![0u8; 5], vec![0u8; 13]] {
        assert!(
            matches!(plain().decode_depth(&raw), Err(DecodeError::Truncated { layer: "Ethernet", .. })),
            "{} bytes",
            raw.len()
        );
    }
    let short_ip = ethernet(0x0800, &[0x45, 0x00, 0x00]);
    assert!(matches!(plain().decode_depth(&short_ip), Err(DecodeError::Truncated { layer: "IPv4", .. })));
    let short_udp = ethernet(0x0800, &ipv4(17, HOST, BROADCAST, &[0xba, 0xc0]));
    assert!(matches!(plain().decode_depth(&short_udp), Err(DecodeError::Truncated { layer: "UDP", .. })));
    let short_vlan = ethernet(0x8100, &[0x00]);
    assert!(matches!(plain().decode_depth(&short_vlan), Err(DecodeError::Truncated { layer: "VLAN", .. })));
}

#[test]
fn test_ip_header_word_count_below_five_is_malformed() {
    let mut ip = ipv4(17, HOST, BROADCAST, &udp(BACNET_PORT, BACNET_PORT, &[0x02]));
    ip[0] = 0x44;
    assert!(matches!(
        plain().decode_depth(&ethernet(0x0800, &ip)),
        Err(DecodeError::Malformed { layer: "IPv4", .. })
    ));
}

fn sample_frames() -> Vec<Vec<u8>> {
    vec![
        who_is_frame(),
        read_property_frame(1),
        simple_ack_frame(1),
        forwarded_who_is(),
        bip_frame(&[0x02, 0x03]),
        bip_frame(&bvll(0x00, &[0x00, 0x00])),
        bip_frame(&bvll(0x0a, &[0x02, 0x00])),
        bip_frame(&bvll(0x0b, &[0x01, 0x80, 0x01, 0x00, 0x05])),
        bip_frame(&bvll(0x0a, &[0x01, 0x20, 0x00])),
        bip_frame(&[]),
        ethernet(0x0800, &ipv4(1, HOST, BROADCAST, &[0x08, 0x00])),
        vec![0u8; 9],
    ]
}

#[test]
fn test_depth_and_full_decode_agree() {
    for options in [DecodeOptions::default(), DecodeOptions::route_aware()] {
        let pipeline = Pipeline::new(options);
        for (i, raw) in sample_frames().into_iter().enumerate() {
            let depth = pipeline.decode_depth(&raw);
            let full = pipeline.decode_full(&RawRecord::new(i as u64 + 1, 0.0, raw));
            match (depth, full) {
                (Ok(d), Ok(f)) => assert_eq!(d, f.map(|p| p.layers().clone().into_deepest()), "frame {}", i),
                (Err(_), Err(_)) => {}
                (d, f) => panic!("frame {}: depth {:?} but full {:?}", i, d, f),
            }
        }
    }
}

#[test]
fn test_stream_skips_faulted_records() {
    // Original-Unicast-NPDU whose version-matched NPDU header is cut short
    let broken = bip_frame(&bvll(0x0a, &[0x01, 0x20, 0x00]));
    let records = vec![
        RawRecord::new(1, 1.0, read_property_frame(1)),
        RawRecord::new(2, 2.0, broken),
        RawRecord::new(3, 3.0, who_is_frame()),
    ];
    let mut stream = packets(records, plain());
    let numbers: Vec<u64> = stream.by_ref().map(|p| p.number()).collect();
    assert_eq!(numbers, vec![1, 3]);
    assert_eq!(stream.records_read(), 3);
    assert_eq!(stream.records_faulted(), 1);
    assert_eq!(stream.records_empty(), 0);
}

#[test]
fn test_stream_skips_runt_frames() {
    let records = vec![
        RawRecord::new(1, 1.0, who_is_frame()),
        RawRecord::new(2, 2.0, vec![0u8; 5]),
        RawRecord::new(3, 3.0, read_property_frame(2)),
    ];
    let numbers: Vec<u64> = packets(records, plain()).map(|p| p.number()).collect();
    assert_eq!(numbers, vec![1, 3]);
}

#[test]
fn test_stream_keeps_frames_with_a_rejected_bvll_header() {
    let mut bad_length = bvll(0x0a, &concat(&[&PLAIN_NPDU, &WHO_IS]));
    bad_length[3] += 1;
    let records = vec![
        RawRecord::new(1, 1.0, read_property_frame(1)),
        RawRecord::new(2, 2.0, bip_frame(&bad_length)),
        RawRecord::new(3, 3.0, bip_frame(&[0x81, 0x0a])),
        RawRecord::new(4, 4.0, who_is_frame()),
    ];
    let mut stream = packets(records, plain());
    let out: Vec<_> = stream.by_ref().collect();
    assert_eq!(out.iter().map(|p| p.number()).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    for pkt in &out[1..3] {
        assert!(pkt.link().is_none());
        assert!(matches!(pkt.deepest(), LayerRef::Transport(_)));
    }
    assert_eq!(stream.records_faulted(), 0);
}

#[test]
fn test_pipeline_reports_its_options() {
    assert!(route_aware().options().route_aware);
    assert!(!plain().options().route_aware);
    assert_eq!(Pipeline::default().options(), &DecodeOptions::default());
}

#[test]
fn test_deepest_stream_skips_empty_records() {
    let records = vec![
        RawRecord::new(1, 1.0, bip_frame(&[])),
        RawRecord::new(2, 2.0, who_is_frame()),
        RawRecord::new(3, 3.0, bip_frame(&bvll(0x0a, &[0x01, 0x20, 0x00]))),
        RawRecord::new(4, 4.5, bip_frame(&[0x02])),
    ];
    let mut stream = deepest_packets(records, plain());
    let out: Vec<_> = stream.by_ref().collect();
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].number, 2);
    assert!(matches!(out[0].layer, Layer::Application(_)));
    assert_eq!(out[1].number, 4);
    assert_eq!(out[1].timestamp, 4.5);
    assert!(matches!(out[1].layer, Layer::Transport(_)));
    assert_eq!(stream.records_empty(), 1);
    assert_eq!(stream.records_faulted(), 1);
}

#[test]
fn test_stream_is_lazy() {
    let mut pulled = 0;
    let records = (1..=1000u64).map(|n| {
        pulled += 1;
        RawRecord::new(n, 0.0, who_is_frame())
    });
    let first: Vec<_> = packets(records, plain()).take(2).collect();
    assert_eq!(first.len(), 2);
    assert_eq!(pulled, 2);
}
