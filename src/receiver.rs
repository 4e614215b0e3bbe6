use crate::stats::Stats;

use anyhow::Context;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// How often the receiver checks the stop flag while no packet arrives
const STOP_CHECK_PERIOD: Duration = Duration::from_millis(500);

/// A UDP sink counting the datagrams it receives
pub struct Receiver {
    socket: UdpSocket,
    received: u64,
    buf: Vec<u8>,
}

impl Receiver {
    pub fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let socket =
            UdpSocket::bind(addr).with_context(|| format!("failed to bind receiver on {addr}"))?;
        socket
            .set_read_timeout(Some(STOP_CHECK_PERIOD))
            .context("failed to set receiver timeout")?;
        log::info!("Receiver listening on {addr}");
        Ok(Receiver {
            socket,
            received: 0,
            buf: vec![0; 65536],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Number of datagrams received so far
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Wait for one datagram. Returns its size, or `None` on timeout.
    pub fn recv_one(&mut self) -> io::Result<Option<usize>> {
        match self.socket.recv(&mut self.buf) {
            Ok(n) => {
                self.received += 1;
                Ok(Some(n))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Drain the socket until the stop flag is raised. Any receive error ends the receiver.
    pub fn run(mut self, stats: &Stats) -> anyhow::Result<u64> {
        while !stats.should_stop() {
            if let Some(n) = self.recv_one().context("receive failed")? {
                stats.packet_received(n);
                log::debug!("{n} bytes received (packet {})", self.received);
            }
        }
        log::info!("Receiver stops after {} packets", self.received);
        Ok(self.received)
    }
}
