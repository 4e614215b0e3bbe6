use super::Transmitter;
use crate::structs::PortId;
use crate::udp::PacketTemplate;

use anyhow::Context;
use pnet::transport::{transport_channel, TransportChannelType, TransportSender};
use pnet_packet::ip::IpNextHeaderProtocols;
use std::io;
use std::net::{IpAddr, Ipv4Addr};

/// Rewrites the source port of the template and sends the whole packet for each scheduled flow
pub struct RawIpTransmitter {
    tx: TransportSender,
    template: PacketTemplate,
    dst: IpAddr,
}

impl RawIpTransmitter {
    /// Open the raw socket. It requires root privilege (or CAP_NET_RAW).
    pub fn new(template: PacketTemplate, dst: Ipv4Addr) -> anyhow::Result<Self> {
        // the kernel does not add any IP header with a layer 3 channel
        let channel_type = TransportChannelType::Layer3(IpNextHeaderProtocols::Udp);
        let (tx, _) = transport_channel(4096, channel_type)
            .context("failed to create raw socket. Please retry with root privilege.")?;
        Ok(RawIpTransmitter {
            tx,
            template,
            dst: IpAddr::V4(dst),
        })
    }
}

impl Transmitter for RawIpTransmitter {
    type Id = PortId;

    fn transmit(&mut self, port: PortId) -> io::Result<usize> {
        self.template.set_source_port(port);
        let n = self.tx.send_to(self.template.ipv4_packet(), self.dst)?;
        if n != self.template.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("only {n} bytes out of {} were sent", self.template.len()),
            ));
        }
        log::debug!("{n} bytes sent from port {port}");
        Ok(n)
    }
}
