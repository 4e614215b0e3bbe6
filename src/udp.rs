use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{Ipv4Packet, MutableIpv4Packet};
use pnet_packet::udp::MutableUdpPacket;
use std::net::Ipv4Addr;

pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
/// IPv4 + UDP headers
pub const HEADERS_LEN: usize = IPV4_HEADER_LEN + UDP_HEADER_LEN;

const IPTOS_LOWDELAY: u8 = 0x10;
const TTL: u8 = 16;
const IPV4_CHECKSUM_OFFSET: usize = 10;

/// One's complement accumulation of `data` on top of a previous partial `sum`.
///
/// Pairs of bytes are read as big-endian words, a trailing byte is the high byte of the last
/// word, and the carry is folded back after every addition. Use [`wrapsum`] to get the value
/// stored in a header.
pub fn checksum(data: &[u8], mut sum: u32) -> u32 {
    let mut words = data.chunks_exact(2);
    for w in &mut words {
        sum += u16::from_be_bytes([w[0], w[1]]) as u32;
        if sum > 0xFFFF {
            sum -= 0xFFFF;
        }
    }
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
        if sum > 0xFFFF {
            sum -= 0xFFFF;
        }
    }
    sum
}

/// The checksum field value, to be written in network byte order
pub fn wrapsum(sum: u32) -> u16 {
    !sum as u16
}

/// A complete IPv4/UDP packet reused for every send of the raw path.
/// Only the UDP source port changes between two sends.
#[derive(Debug, Clone)]
pub struct PacketTemplate {
    data: Vec<u8>,
}

impl PacketTemplate {
    /// Build the template. `len` is the total packet length, at least [`HEADERS_LEN`].
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, dst_port: u16, len: usize) -> Self {
        assert!(len >= HEADERS_LEN && len <= u16::MAX as usize);
        let mut data = vec![0; len];

        {
            // the size is already checked, it cannot fail
            let mut ip = MutableIpv4Packet::new(&mut data).unwrap();
            ip.set_version(4);
            ip.set_header_length(5);
            ip.set_dscp(IPTOS_LOWDELAY >> 2);
            ip.set_ecn(IPTOS_LOWDELAY & 0b11);
            ip.set_total_length(len as u16);
            ip.set_identification(0);
            ip.set_flags(0);
            ip.set_fragment_offset(0);
            ip.set_ttl(TTL);
            ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
            ip.set_source(src);
            ip.set_destination(dst);
            ip.set_checksum(0);
        }
        let sum = wrapsum(checksum(&data[..IPV4_HEADER_LEN], 0));
        data[IPV4_CHECKSUM_OFFSET..IPV4_CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());

        let mut udp = MutableUdpPacket::new(&mut data[IPV4_HEADER_LEN..]).unwrap();
        udp.set_destination(dst_port);
        udp.set_source(0); // filled when sent
        udp.set_length((len - IPV4_HEADER_LEN) as u16);
        udp.set_checksum(0); // no checksum

        PacketTemplate { data }
    }

    pub fn set_source_port(&mut self, port: u16) {
        self.data[IPV4_HEADER_LEN..IPV4_HEADER_LEN + 2].copy_from_slice(&port.to_be_bytes());
    }

    pub fn source_port(&self) -> u16 {
        u16::from_be_bytes([self.data[IPV4_HEADER_LEN], self.data[IPV4_HEADER_LEN + 1]])
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// View of the whole packet, as handed to a layer 3 raw socket
    pub fn ipv4_packet(&self) -> Ipv4Packet<'_> {
        // the buffer always holds a full header
        Ipv4Packet::new(&self.data).unwrap()
    }

    /// The UDP payload (zero padding)
    pub fn payload(&self) -> &[u8] {
        &self.data[HEADERS_LEN..]
    }
}
