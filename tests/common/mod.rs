//! Frame builders shared by the integration tests.

#![allow(dead_code)]

pub const BACNET_PORT: u16 = 47808;
pub const HOST: [u8; 4] = [192, 168, 1, 10];
pub const BROADCAST: [u8; 4] = [192, 168, 1, 255];
pub const SRC_MAC: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
pub const DST_MAC: [u8; 6] = [0xff; 6];

/// Who-Is with no range, as an unconfirmed request.
pub const WHO_IS: [u8; 2] = [0x10, 0x08];
/// NPDU header without routing fields or network message.
pub const PLAIN_NPDU: [u8; 2] = [0x01, 0x00];

pub fn ethernet(ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut f = Vec::with_capacity(14 + payload.len());
    f.extend_from_slice(&DST_MAC);
    f.extend_from_slice(&SRC_MAC);
    f.extend_from_slice(&ethertype.to_be_bytes());
    f.extend_from_slice(payload);
    f
}

pub fn vlan(id: u16, priority: u8, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let tci = (u16::from(priority) << 13) | (id & 0x0fff);
    let mut f = Vec::new();
    f.extend_from_slice(&tci.to_be_bytes());
    f.extend_from_slice(&ethertype.to_be_bytes());
    f.extend_from_slice(payload);
    ethernet(0x8100, &f)
}

/// IPv4 header with no options; checksum left at zero.
pub fn ipv4(protocol: u8, src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let total = (20 + payload.len()) as u16;
    let mut p = vec![0x45, 0x00];
    p.extend_from_slice(&total.to_be_bytes());
    p.extend_from_slice(&[0x12, 0x34, 0x40, 0x00, 64, protocol, 0x00, 0x00]);
    p.extend_from_slice(&src);
    p.extend_from_slice(&dst);
    p.extend_from_slice(payload);
    p
}

pub fn udp(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let len = (8 + payload.len()) as u16;
    let mut p = Vec::new();
    p.extend_from_slice(&sport.to_be_bytes());
    p.extend_from_slice(&dport.to_be_bytes());
    p.extend_from_slice(&len.to_be_bytes());
    p.extend_from_slice(&[0x00, 0x00]);
    p.extend_from_slice(payload);
    p
}

pub fn bvll(function: u8, body: &[u8]) -> Vec<u8> {
    let len = (4 + body.len()) as u16;
    let mut p = vec![0x81, function];
    p.extend_from_slice(&len.to_be_bytes());
    p.extend_from_slice(body);
    p
}

/// A full Ethernet/IPv4/UDP frame from `HOST` to the subnet broadcast on port 47808.
pub fn bip_frame(udp_payload: &[u8]) -> Vec<u8> {
    ethernet(0x0800, &ipv4(17, HOST, BROADCAST, &udp(BACNET_PORT, BACNET_PORT, udp_payload)))
}

pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    parts.iter().flat_map(|p| p.iter().copied()).collect()
}

/// Original-Broadcast-NPDU carrying a plain Who-Is.
pub fn who_is_frame() -> Vec<u8> {
    bip_frame(&bvll(0x0b, &concat(&[&PLAIN_NPDU, &WHO_IS])))
}

/// Original-Unicast-NPDU carrying a ReadProperty request (device 1, present-value).
pub fn read_property_frame(invoke_id: u8) -> Vec<u8> {
    let apdu = [0x00, 0x05, invoke_id, 0x0c, 0x0c, 0x02, 0x00, 0x00, 0x01, 0x19, 0x55];
    bip_frame(&bvll(0x0a, &concat(&[&[0x01, 0x04], &apdu])))
}

/// SimpleAck answering a confirmed request.
pub fn simple_ack_frame(invoke_id: u8) -> Vec<u8> {
    bip_frame(&bvll(0x0a, &concat(&[&PLAIN_NPDU, &[0x20, invoke_id, 0x0f]])))
}
