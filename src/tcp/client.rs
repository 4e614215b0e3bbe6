use crate::config::{ConnectFailure, Configuration, TCP_SRC_PORTS};
use crate::distribution::Planner;
use crate::engine::Engine;
use crate::inject::Transmitter;
use crate::ports::{self, Allocation};
use crate::stats::Stats;
use crate::structs::*;

use anyhow::{bail, Context};
use rand::SeedableRng;
use rand_pcg::Pcg32;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};

/// Writes a fixed-size payload on the connection of the scheduled flow
pub struct TcpTransmitter {
    streams: Vec<TcpStream>,
    payload: Vec<u8>,
}

impl TcpTransmitter {
    pub fn new(streams: Vec<TcpStream>, payload_len: usize) -> Self {
        TcpTransmitter {
            streams,
            payload: vec![0; payload_len],
        }
    }

    /// The flow identifiers: one per connection
    pub fn ids(&self) -> Vec<ConnId> {
        (0..self.streams.len()).collect()
    }
}

impl Transmitter for TcpTransmitter {
    type Id = ConnId;

    fn transmit(&mut self, id: ConnId) -> io::Result<usize> {
        let stream = self.streams.get_mut(id).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no connection {id}"))
        })?;
        stream.write_all(&self.payload)?;
        log::debug!("write {} bytes to connection {id}", self.payload.len());
        Ok(self.payload.len())
    }
}

/// Open a connection to `dst`, from `src_port` when one is given
pub fn connect_one(dst: SocketAddrV4, src_port: Option<u16>) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    if let Some(port) = src_port {
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    }
    socket.connect(&dst.into())?;
    Ok(socket.into())
}

/// Open `n` connections to `dst`. `src_ports`, when given, holds one local port per flow.
pub fn connect_flows(
    dst: SocketAddrV4,
    n: usize,
    src_ports: Option<&[u16]>,
    on_failure: ConnectFailure,
) -> anyhow::Result<Vec<TcpStream>> {
    let mut streams = Vec::with_capacity(n);
    for flow in 0..n {
        let src_port = src_ports.and_then(|p| p.get(flow).copied());
        match connect_one(dst, src_port) {
            Ok(stream) => {
                log::debug!(
                    "Flow {flow:3} connected from {:?}",
                    stream.local_addr().ok()
                );
                streams.push(stream);
            }
            Err(e) => match on_failure {
                // the connections already opened are closed when dropped
                ConnectFailure::Abort => {
                    return Err(e).with_context(|| format!("flow {flow} failed to connect to {dst}"))
                }
                ConnectFailure::Skip => {
                    log::warn!("Flow {flow} failed to connect to {dst}: {e}. Skipped.")
                }
            },
        }
    }
    if streams.is_empty() {
        bail!("no flow could connect to {dst}");
    }
    log::info!("{} connections established to {dst}", streams.len());
    Ok(streams)
}

/// The client role: connect every flow, then write according to the distribution
pub fn run(config: &Configuration, stats: &Stats) -> anyhow::Result<Outcome> {
    let mut rng = Pcg32::seed_from_u64(config.seed());
    let dst = SocketAddrV4::new(config.dst_addr, config.dst_port());
    let src_ports = if config.randomize_ports {
        Some(ports::allocate(
            config.flow_count,
            Allocation::Randomized,
            TCP_SRC_PORTS,
            &mut rng,
        )?)
    } else {
        None
    };
    let streams = connect_flows(
        dst,
        config.flow_count,
        src_ports.as_deref(),
        config.connect_failure,
    )?;

    let mut tx = TcpTransmitter::new(streams, config.payload_len);
    let planner = Planner::new(config.distribution, config.schedule_capacity());
    let schedule = planner.plan(&tx.ids(), &mut rng);
    Ok(Engine::new(config).run(&schedule, &mut tx, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DistributionPolicy, Role, Transport};
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn connect_and_write() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let dst = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        let streams = connect_flows(dst, 2, None, ConnectFailure::Abort).unwrap();
        let (mut a, _) = listener.accept().unwrap();
        let (mut b, _) = listener.accept().unwrap();

        let mut tx = TcpTransmitter::new(streams, 16);
        assert_eq!(tx.ids(), vec![0, 1]);
        assert_eq!(tx.transmit(0).unwrap(), 16);
        assert_eq!(tx.transmit(1).unwrap(), 16);
        assert!(tx.transmit(2).is_err());

        let mut buf = [1u8; 16];
        a.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0; 16]);
        b.read_exact(&mut buf).unwrap();
    }

    #[test]
    fn connection_failure_policies() {
        // nobody listens on this port anymore
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let dst = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        assert!(connect_flows(dst, 3, None, ConnectFailure::Abort).is_err());
        assert!(connect_flows(dst, 3, None, ConnectFailure::Skip).is_err());
    }

    #[test]
    fn failed_flow_is_skipped_or_aborts() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let dst = SocketAddrV4::new(Ipv4Addr::LOCALHOST, listener.local_addr().unwrap().port());
        // a listening socket holds this port: binding to it fails
        let busy = TcpListener::bind("0.0.0.0:0").unwrap();
        let busy_port = busy.local_addr().unwrap().port();
        let src_ports = [0, busy_port, 0];

        let streams = connect_flows(dst, 3, Some(&src_ports), ConnectFailure::Skip).unwrap();
        assert_eq!(streams.len(), 2);
        assert!(streams
            .iter()
            .all(|s| s.local_addr().unwrap().port() != busy_port));

        assert!(connect_flows(dst, 3, Some(&src_ports), ConnectFailure::Abort).is_err());
    }

    #[test]
    fn randomized_source_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = Configuration {
            dst_addr: Ipv4Addr::LOCALHOST,
            port: Some(port),
            transport: Transport::Tcp,
            flow_count: 5,
            distribution: DistributionPolicy::Uniform,
            payload_len: 10,
            count: 40,
            randomize_ports: true,
            seed: Some(11),
            ..Default::default()
        };
        config.validate().unwrap();
        let reader = thread::spawn(move || {
            let mut conns: Vec<(TcpStream, std::net::SocketAddr)> =
                (0..5).map(|_| listener.accept().unwrap()).collect();
            let mut total = 0;
            for (c, _) in conns.iter_mut() {
                let mut buf = vec![];
                total += c.read_to_end(&mut buf).unwrap();
            }
            let ports: Vec<u16> = conns.iter().map(|(_, peer)| peer.port()).collect();
            (ports, total)
        });
        let outcome = run(&config, &Stats::default()).unwrap();
        assert_eq!(outcome, Outcome::CountReached(40));
        let (ports, total) = reader.join().unwrap();
        assert_eq!(total, 400);
        assert!(ports.iter().all(|p| TCP_SRC_PORTS.contains(*p)));
    }

    #[test]
    fn client_role_with_count() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = Configuration {
            dst_addr: Ipv4Addr::LOCALHOST,
            port: Some(port),
            transport: Transport::Tcp,
            role: Role::Client,
            flow_count: 3,
            distribution: DistributionPolicy::PowerLaw,
            payload_len: 100,
            count: 50,
            seed: Some(1),
            ..Default::default()
        };
        config.validate().unwrap();
        let reader = thread::spawn(move || {
            let mut total = 0;
            let mut conns: Vec<TcpStream> = (0..3).map(|_| listener.accept().unwrap().0).collect();
            for c in conns.iter_mut() {
                let mut buf = vec![];
                total += c.read_to_end(&mut buf).unwrap();
            }
            total
        });
        let stats = Stats::default();
        let outcome = run(&config, &stats).unwrap();
        assert_eq!(outcome, Outcome::CountReached(50));
        assert_eq!(reader.join().unwrap(), 50 * 100);
    }
}
