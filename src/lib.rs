//! Multi-flow synthetic network load generator.
//! Shares the output between many flows (UDP source ports or TCP connections) according to
//! a uniform, random or power-law distribution.

/// Run configuration
pub mod config;
/// Shared counters and stop flag
pub mod stats;

#[doc(hidden)]
/// Structures used throughout the library
pub mod structs;

#[doc(inline)]
pub use structs::*;

/// IPv4/UDP packet template and Internet checksum
pub mod udp;

/// Flow identifier allocation
pub mod ports;

/// Bandwidth share of each flow and schedule construction
pub mod distribution;

/// Transmission loop
pub mod engine;

/// Packet injection
pub mod inject;

/// TCP client and servers
pub mod tcp;

/// UDP sink
pub mod receiver;
