use anyhow::{bail, Context};
use clap::ValueEnum;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::ports::PortRange;

/// Destination port of the generated UDP traffic, also the port of the receiver
pub const UDP_PORT: u16 = 49152;
/// Listening port of the TCP server
pub const TCP_PORT: u16 = 5002;

/// Source ports of the UDP flows
pub const UDP_SRC_PORTS: PortRange = PortRange {
    start: 49153,
    end: 65534,
};
/// Local ports used by the TCP client when the source ports are randomized
pub const TCP_SRC_PORTS: PortRange = PortRange {
    start: 5003,
    end: 65000,
};

/// Flow count must be strictly lower than this
pub const FLOW_MAX: usize = 256;
/// Schedule capacity of the UDP paths
pub const UDP_SCHEDULE_CAPACITY: usize = 4096;
/// Schedule capacity of the TCP client
pub const TCP_SCHEDULE_CAPACITY: usize = 1000;

pub const PACKET_MIN_LEN: usize = 64;
pub const PACKET_MAX_LEN: usize = 8192;
pub const TCP_PAYLOAD_MAX_LEN: usize = 9216;
/// Default number of simultaneous connections of the multiplexed server
pub const MAX_CONNECTIONS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// How the output is shared between the flows
pub enum DistributionPolicy {
    /// Every flow has the same throughput
    #[value(alias = "same")]
    #[serde(alias = "same")]
    Uniform,
    /// Every flow draws a random throughput
    Random,
    /// Throughputs follow a power law: later flows are much heavier
    #[value(name = "power", alias = "power-law")]
    #[serde(rename = "power", alias = "power-law")]
    PowerLaw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    /// Hand-crafted IPv4/UDP packets sent through a raw socket (requires root)
    RawIp,
    /// Payloads sent through a regular UDP socket
    UdpSocket,
    /// TCP byte streams, one connection per flow
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Generate traffic
    Client,
    /// Accept and drain TCP connections
    Server,
    /// Only count the incoming UDP packets
    Receiver,
    /// Generate traffic and count the incoming UDP packets
    ClientReceiver,
    /// TCP client and server in the same process
    ClientServer,
}

impl Role {
    pub fn transmits(&self) -> bool {
        matches!(self, Role::Client | Role::ClientReceiver | Role::ClientServer)
    }

    pub fn receives(&self) -> bool {
        matches!(self, Role::Receiver | Role::ClientReceiver)
    }

    pub fn serves(&self) -> bool {
        matches!(self, Role::Server | Role::ClientServer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// What the TCP client does when a flow cannot connect
pub enum ConnectFailure {
    /// Close everything and give up
    Abort,
    /// Go on with the flows that could connect
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
/// The configuration of a run. It is built once at startup and then only read.
pub struct Configuration {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub flow_count: usize,
    pub distribution: DistributionPolicy,
    /// Total packet length on the raw and UDP paths
    pub packet_len: usize,
    /// Size of each TCP write
    pub payload_len: usize,
    /// Delay between two sends, in microseconds
    pub interval_us: u64,
    /// Number of units to send before stopping. 0 means unlimited.
    pub count: u64,
    pub randomize_ports: bool,
    pub transport: Transport,
    pub role: Role,
    pub thread_per_connection: bool,
    pub verbose: bool,
    pub seed: Option<u64>,
    /// Overrides the well-known destination/listening port
    pub port: Option<u16>,
    pub connect_failure: ConnectFailure,
    /// Pause after a failed send before restarting the schedule, in microseconds
    pub error_backoff_us: u64,
    pub max_connections: usize,
    /// Overrides the schedule capacity of the transport
    pub capacity: Option<usize>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            src_addr: Ipv4Addr::new(10, 1, 0, 10),
            dst_addr: Ipv4Addr::new(10, 2, 0, 10),
            flow_count: 10,
            distribution: DistributionPolicy::Uniform,
            packet_len: 1024,
            payload_len: 984, // 1024-byte packets without the Ethernet header
            interval_us: 0,
            count: 0,
            randomize_ports: false,
            transport: Transport::RawIp,
            role: Role::Client,
            thread_per_connection: false,
            verbose: false,
            seed: None,
            port: None,
            connect_failure: ConnectFailure::Abort,
            error_backoff_us: 0,
            max_connections: MAX_CONNECTIONS,
            capacity: None,
        }
    }
}

impl Configuration {
    /// Destination port of the transport, or the port to listen on
    pub fn dst_port(&self) -> u16 {
        self.port.unwrap_or(match self.transport {
            Transport::Tcp => TCP_PORT,
            Transport::RawIp | Transport::UdpSocket => UDP_PORT,
        })
    }

    /// Port of the UDP receiver
    pub fn receiver_port(&self) -> u16 {
        self.port.unwrap_or(UDP_PORT)
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval_us > 0).then(|| Duration::from_micros(self.interval_us))
    }

    pub fn error_backoff(&self) -> Option<Duration> {
        (self.error_backoff_us > 0).then(|| Duration::from_micros(self.error_backoff_us))
    }

    pub fn packet_cap(&self) -> Option<u64> {
        (self.count > 0).then_some(self.count)
    }

    pub fn schedule_capacity(&self) -> usize {
        self.capacity.unwrap_or(match self.transport {
            Transport::Tcp => TCP_SCHEDULE_CAPACITY,
            Transport::RawIp | Transport::UdpSocket => UDP_SCHEDULE_CAPACITY,
        })
    }

    /// The seed of the run: the configured one or the current time
    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default()
        })
    }

    /// Range used when the source ports are randomized
    pub fn src_port_range(&self) -> PortRange {
        match self.transport {
            Transport::Tcp => TCP_SRC_PORTS,
            Transport::RawIp | Transport::UdpSocket => UDP_SRC_PORTS,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.flow_count < 1 || self.flow_count >= FLOW_MAX {
            bail!(
                "flow count must be larger than 0 and smaller than {FLOW_MAX} (got {})",
                self.flow_count
            );
        }
        match self.transport {
            Transport::RawIp | Transport::UdpSocket => {
                if !(PACKET_MIN_LEN..=PACKET_MAX_LEN).contains(&self.packet_len) {
                    bail!(
                        "packet length must be between {PACKET_MIN_LEN} and {PACKET_MAX_LEN} (got {})",
                        self.packet_len
                    );
                }
            }
            Transport::Tcp => {
                if !(1..=TCP_PAYLOAD_MAX_LEN).contains(&self.payload_len) {
                    bail!(
                        "payload length must be between 1 and {TCP_PAYLOAD_MAX_LEN} (got {})",
                        self.payload_len
                    );
                }
            }
        }
        if self.flow_count > self.schedule_capacity() {
            bail!(
                "{} flows cannot fit in a schedule of {} slots",
                self.flow_count,
                self.schedule_capacity()
            );
        }
        if self.role.serves() && self.transport != Transport::Tcp {
            bail!("the {:?} role requires the TCP transport", self.role);
        }
        if self.max_connections == 0 {
            bail!("the server needs at least one connection slot");
        }
        if self.randomize_ports && self.src_port_range().len() < self.flow_count {
            bail!("not enough source ports for {} flows", self.flow_count);
        }
        Ok(())
    }
}

/// Parse a TOML configuration file. Missing fields keep their default value.
pub fn import_config(config_str: &str) -> anyhow::Result<Configuration> {
    let config: Configuration =
        toml::from_str(config_str).context("Ill-formed configuration file")?;
    log::trace!("Configuration: {config:?}");
    Ok(config)
}
