use crate::config::{Configuration, Transport, UDP_SRC_PORTS};
use crate::distribution::Planner;
use crate::engine::Engine;
use crate::ports::{self, Allocation};
use crate::stats::Stats;
use crate::structs::Outcome;
use crate::udp::PacketTemplate;

use anyhow::bail;
use rand::SeedableRng;
use rand_pcg::Pcg32;
use std::fmt::Debug;
use std::io;
use std::net::SocketAddrV4;

/// Sends packets through a layer 3 raw socket, IP header included
pub mod raw;
pub use raw::RawIpTransmitter;
/// Sends payloads through a connected UDP socket
pub mod socket;
pub use socket::UdpTransmitter;

/// A way to send one unit of traffic on behalf of a flow
pub trait Transmitter {
    /// What identifies a flow for this transmitter
    type Id: Copy + PartialEq + Debug;

    /// Send one unit for the flow `id` and return the number of bytes sent
    fn transmit(&mut self, id: Self::Id) -> io::Result<usize>;
}

/// The UDP generator: allocate the source ports, plan the schedule, then send until done
pub fn run(config: &Configuration, stats: &Stats) -> anyhow::Result<Outcome> {
    let mut rng = Pcg32::seed_from_u64(config.seed());
    let ports = ports::allocate(
        config.flow_count,
        Allocation::new(config.randomize_ports),
        UDP_SRC_PORTS,
        &mut rng,
    )?;
    let planner = Planner::new(config.distribution, config.schedule_capacity());
    let schedule = planner.plan(&ports, &mut rng);
    let engine = Engine::new(config);

    match config.transport {
        Transport::RawIp => {
            let template = PacketTemplate::new(
                config.src_addr,
                config.dst_addr,
                config.dst_port(),
                config.packet_len,
            );
            let mut tx = RawIpTransmitter::new(template, config.dst_addr)?;
            Ok(engine.run(&schedule, &mut tx, stats))
        }
        Transport::UdpSocket => {
            let dst = SocketAddrV4::new(config.dst_addr, config.dst_port());
            let mut tx = UdpTransmitter::connect(dst, config.packet_len)?;
            Ok(engine.run(&schedule, &mut tx, stats))
        }
        Transport::Tcp => bail!("TCP flows are sent by the TCP client"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DistributionPolicy;
    use std::net::{Ipv4Addr, UdpSocket};
    use std::time::Duration;

    #[test]
    fn udp_socket_generator_stops_at_the_cap() {
        let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
        sink.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let config = Configuration {
            dst_addr: Ipv4Addr::LOCALHOST,
            port: Some(sink.local_addr().unwrap().port()),
            transport: Transport::UdpSocket,
            flow_count: 4,
            distribution: DistributionPolicy::Random,
            packet_len: 100,
            count: 10,
            seed: Some(3),
            ..Default::default()
        };
        let stats = Stats::default();
        assert_eq!(run(&config, &stats).unwrap(), Outcome::CountReached(10));
        let mut buf = [0; 2048];
        for _ in 0..10 {
            assert_eq!(sink.recv(&mut buf).unwrap(), 72);
        }
    }

    #[test]
    fn tcp_is_refused() {
        let config = Configuration {
            transport: Transport::Tcp,
            ..Default::default()
        };
        assert!(run(&config, &Stats::default()).is_err());
    }
}
