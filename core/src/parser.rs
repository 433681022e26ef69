//! Parses a VXLAN-encapsulated datagram down to its inner 5-tuple.
//!
//! Layout: VXLAN header (8 bytes) + inner Ethernet (14 bytes) + inner IPv4
//! (>=20 bytes, length from IHL) + inner TCP/UDP ports (4 bytes, optional).

use crate::flow::{FlowKey, PROTO_TCP, PROTO_UDP};

const VXLAN_HEADER_LEN: usize = 8;
const ETH_HEADER_LEN: usize = 14;
const ETH_TYPE_OFFSET: usize = 12;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IPV4_MIN_HEADER_LEN: usize = 20;

/// A successfully parsed inner packet: its flow identity plus the IPv4
/// total_length field (the byte count attributed to this flow).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPacket {
    pub key: FlowKey,
    pub len: u32,
}

/// Parse a VXLAN datagram payload. Returns `None` on any malformed or
/// truncated input; never panics or allocates.
pub fn parse_vxlan_packet(data: &[u8]) -> Option<ParsedPacket> {
    if data.len() < VXLAN_HEADER_LEN {
        return None;
    }
    let eth = &data[VXLAN_HEADER_LEN..];
    if eth.len() < ETH_HEADER_LEN {
        return None;
    }
    let ethertype = u16::from_be_bytes([eth[ETH_TYPE_OFFSET], eth[ETH_TYPE_OFFSET + 1]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }

    let ip = &eth[ETH_HEADER_LEN..];
    if ip.len() < IPV4_MIN_HEADER_LEN {
        return None;
    }
    let ihl = ((ip[0] & 0x0F) as usize) * 4;
    if ihl < IPV4_MIN_HEADER_LEN || ip.len() < ihl {
        return None;
    }

    let total_length = u16::from_be_bytes([ip[2], ip[3]]) as u32;
    let proto = ip[9];
    let src_ip = u32::from_be_bytes([ip[12], ip[13], ip[14], ip[15]]);
    let dst_ip = u32::from_be_bytes([ip[16], ip[17], ip[18], ip[19]]);

    let (src_port, dst_port) = if (proto == PROTO_TCP || proto == PROTO_UDP) && ip.len() >= ihl + 4
    {
        let sport = u16::from_be_bytes([ip[ihl], ip[ihl + 1]]);
        let dport = u16::from_be_bytes([ip[ihl + 2], ip[ihl + 3]]);
        (sport, dport)
    } else {
        (0, 0)
    };

    Some(ParsedPacket {
        key: FlowKey::new(src_ip, dst_ip, proto, src_port, dst_port),
        len: total_length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds VXLAN(8) + Ethernet(14) + IPv4(20) [+ TCP/UDP ports(4)] for tests.
    fn build_packet(
        ethertype: u16,
        ip_total_len: u16,
        ihl_words: u8,
        proto: u8,
        src_ip: [u8; 4],
        dst_ip: [u8; 4],
        ports: Option<(u16, u16)>,
        truncate_to: Option<usize>,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; VXLAN_HEADER_LEN];
        buf.extend_from_slice(&[0u8; 12]); // dst mac + src mac
        buf.extend_from_slice(&ethertype.to_be_bytes());

        let mut ip = vec![0u8; 20];
        ip[0] = 0x40 | (ihl_words & 0x0F);
        ip[2..4].copy_from_slice(&ip_total_len.to_be_bytes());
        ip[9] = proto;
        ip[12..16].copy_from_slice(&src_ip);
        ip[16..20].copy_from_slice(&dst_ip);
        buf.extend_from_slice(&ip);

        if let Some((sport, dport)) = ports {
            buf.extend_from_slice(&sport.to_be_bytes());
            buf.extend_from_slice(&dport.to_be_bytes());
        }

        if let Some(n) = truncate_to {
            buf.truncate(n);
        }
        buf
    }

    #[test]
    fn parses_basic_tcp() {
        let pkt = build_packet(
            0x0800,
            60,
            5,
            6,
            [10, 0, 1, 100],
            [10, 0, 2, 200],
            Some((55555, 443)),
            None,
        );
        let parsed = parse_vxlan_packet(&pkt).expect("should parse");
        assert_eq!(parsed.key.src_ip, u32::from_be_bytes([10, 0, 1, 100]));
        assert_eq!(parsed.key.dst_ip, u32::from_be_bytes([10, 0, 2, 200]));
        assert_eq!(parsed.key.proto, 6);
        assert_eq!(parsed.key.src_port, 55555);
        assert_eq!(parsed.key.dst_port, 443);
        assert_eq!(parsed.len, 60);
    }

    #[test]
    fn parses_basic_udp() {
        let pkt = build_packet(
            0x0800,
            80,
            5,
            17,
            [192, 168, 1, 1],
            [192, 168, 1, 2],
            Some((53, 33000)),
            None,
        );
        let parsed = parse_vxlan_packet(&pkt).expect("should parse");
        assert_eq!(parsed.key.proto, 17);
        assert_eq!(parsed.key.src_port, 53);
        assert_eq!(parsed.key.dst_port, 33000);
    }

    #[test]
    fn icmp_has_zero_ports() {
        let pkt = build_packet(0x0800, 64, 5, 1, [10, 0, 0, 1], [10, 0, 0, 2], None, None);
        let parsed = parse_vxlan_packet(&pkt).expect("should parse");
        assert_eq!(parsed.key.proto, 1);
        assert_eq!(parsed.key.src_port, 0);
        assert_eq!(parsed.key.dst_port, 0);
    }

    #[test]
    fn rejects_too_short_vxlan() {
        let pkt = vec![0u8; 5];
        assert!(parse_vxlan_packet(&pkt).is_none());
    }

    #[test]
    fn rejects_too_short_ethernet() {
        let pkt = build_packet(
            0x0800,
            60,
            5,
            6,
            [10, 0, 1, 100],
            [10, 0, 2, 200],
            Some((1, 2)),
            Some(18),
        );
        assert!(parse_vxlan_packet(&pkt).is_none());
    }

    #[test]
    fn rejects_non_ipv4_ethertype() {
        let pkt = build_packet(
            0x86DD,
            60,
            5,
            6,
            [10, 0, 1, 100],
            [10, 0, 2, 200],
            Some((1, 2)),
            None,
        );
        assert!(parse_vxlan_packet(&pkt).is_none());
    }

    #[test]
    fn rejects_too_short_ip_header() {
        let pkt = build_packet(
            0x0800,
            60,
            5,
            6,
            [10, 0, 1, 100],
            [10, 0, 2, 200],
            None,
            Some(VXLAN_HEADER_LEN + ETH_HEADER_LEN + 15),
        );
        assert!(parse_vxlan_packet(&pkt).is_none());
    }

    #[test]
    fn rejects_invalid_ihl() {
        // IHL=3 words = 12 bytes, below the 20-byte minimum.
        let pkt = build_packet(0x0800, 60, 3, 6, [10, 0, 1, 100], [10, 0, 2, 200], None, None);
        assert!(parse_vxlan_packet(&pkt).is_none());
    }

    #[test]
    fn missing_port_bytes_yields_zero_ports() {
        let mut pkt = build_packet(
            0x0800,
            60,
            5,
            6,
            [10, 0, 1, 100],
            [10, 0, 2, 200],
            None,
            None,
        );
        pkt.truncate(VXLAN_HEADER_LEN + ETH_HEADER_LEN + 20);
        let parsed = parse_vxlan_packet(&pkt).expect("should parse");
        assert_eq!(parsed.key.src_port, 0);
        assert_eq!(parsed.key.dst_port, 0);
    }
}
