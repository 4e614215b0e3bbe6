use clap::Parser;
use flowgen::config::{self, Configuration, ConnectFailure, DistributionPolicy, Role, Transport};

use anyhow::Context;
use std::fs;
use std::net::Ipv4Addr;

/// Every option overrides the corresponding field of the configuration file
#[derive(Debug, Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value = None, help = "TOML configuration file")]
    pub config: Option<String>,
    #[arg(short, long, help = "Source IPv4 address of the raw packets")]
    pub src: Option<Ipv4Addr>,
    #[arg(short, long, help = "Destination IPv4 address")]
    pub dst: Option<Ipv4Addr>,
    #[arg(short = 'n', long, help = "Number of flows, between 1 and 255")]
    pub flows: Option<usize>,
    #[arg(short = 't', long, help = "How the throughput is shared between the flows")]
    pub distribution: Option<DistributionPolicy>,
    #[arg(short = 'l', long, help = "Packet length in bytes (raw IP and UDP socket)")]
    pub length: Option<usize>,
    #[arg(long, help = "Size of each TCP write in bytes")]
    pub payload_length: Option<usize>,
    #[arg(short, long, help = "Delay between two sends, in microseconds")]
    pub interval: Option<u64>,
    #[arg(short = 'x', long, help = "Stop after this many packets (0: never)")]
    pub count: Option<u64>,
    #[arg(short, long, default_value_t = false, help = "Randomize the source ports")]
    pub randomize: bool,
    #[arg(short = 'm', long, help = "Seed for random number generation")]
    pub seed: Option<u64>,
    #[arg(
        short = 'p',
        long,
        default_value_t = false,
        help = "TCP server: one thread per connection instead of readiness polling"
    )]
    pub thread_per_connection: bool,
    #[arg(short, long, default_value_t = false, help = "Log every send and receive")]
    pub verbose: bool,
    #[arg(long, help = "How the traffic is sent")]
    pub transport: Option<Transport>,
    #[arg(long, help = "What this process does")]
    pub role: Option<Role>,
    #[arg(long, help = "Destination port, or the port to listen on")]
    pub port: Option<u16>,
    #[arg(
        long,
        default_value_t = false,
        help = "TCP client: go on with the flows that could connect"
    )]
    pub skip_failed_connections: bool,
    #[arg(long, help = "Pause after a failed send, in microseconds")]
    pub error_backoff: Option<u64>,
    #[arg(long, help = "Maximum number of connections of the TCP server")]
    pub max_connections: Option<usize>,
    #[arg(long, help = "Number of slots of the schedule")]
    pub capacity: Option<usize>,
}

impl Args {
    /// Load the configuration file, if any, apply the command line, then validate
    pub fn into_config(self) -> anyhow::Result<Configuration> {
        let mut c = match &self.config {
            Some(path) => {
                let config_str = fs::read_to_string(path)
                    .with_context(|| format!("Cannot access the configuration file {path}"))?;
                config::import_config(&config_str)?
            }
            None => Configuration::default(),
        };
        if let Some(src) = self.src {
            c.src_addr = src;
        }
        if let Some(dst) = self.dst {
            c.dst_addr = dst;
        }
        if let Some(n) = self.flows {
            c.flow_count = n;
        }
        if let Some(d) = self.distribution {
            c.distribution = d;
        }
        if let Some(l) = self.length {
            c.packet_len = l;
        }
        if let Some(l) = self.payload_length {
            c.payload_len = l;
        }
        if let Some(i) = self.interval {
            c.interval_us = i;
        }
        if let Some(x) = self.count {
            c.count = x;
        }
        if let Some(t) = self.transport {
            c.transport = t;
        }
        if let Some(r) = self.role {
            c.role = r;
        }
        if let Some(b) = self.error_backoff {
            c.error_backoff_us = b;
        }
        if let Some(m) = self.max_connections {
            c.max_connections = m;
        }
        c.seed = self.seed.or(c.seed);
        c.port = self.port.or(c.port);
        c.capacity = self.capacity.or(c.capacity);
        c.randomize_ports |= self.randomize;
        c.thread_per_connection |= self.thread_per_connection;
        c.verbose |= self.verbose;
        if self.skip_failed_connections {
            c.connect_failure = ConnectFailure::Skip;
        }
        c.validate()?;
        Ok(c)
    }
}
