use super::Transmitter;
use crate::structs::PortId;
use crate::udp::HEADERS_LEN;

use anyhow::Context;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

/// Sends the payload part of the packets through a regular UDP socket. The kernel builds the
/// headers, so the source port is the one picked when the socket was connected.
pub struct UdpTransmitter {
    socket: UdpSocket,
    payload: Vec<u8>,
}

impl UdpTransmitter {
    /// `packet_len` includes the IPv4 and UDP headers
    pub fn connect(dst: SocketAddrV4, packet_len: usize) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .context("failed to create UDP socket")?;
        socket
            .connect(dst)
            .with_context(|| format!("failed to connect UDP socket to {dst}"))?;
        log::debug!("UDP socket {:?} connected to {dst}", socket.local_addr().ok());
        Ok(UdpTransmitter {
            socket,
            payload: vec![0; packet_len.saturating_sub(HEADERS_LEN)],
        })
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

impl Transmitter for UdpTransmitter {
    type Id = PortId;

    fn transmit(&mut self, port: PortId) -> io::Result<usize> {
        let n = self.socket.send(&self.payload)?;
        log::debug!("{n} bytes sent for flow {port}");
        Ok(n)
    }
}
