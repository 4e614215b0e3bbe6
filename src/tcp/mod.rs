use crate::config::Configuration;
use crate::stats::Stats;

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;

/// One connection per flow, written according to the schedule
pub mod client;
pub use client::TcpTransmitter;
/// Accept and drain the connections of the clients
pub mod server;
pub use server::{MultiplexedServer, ThreadedServer};

/// Create a listening socket with SO_REUSEADDR
pub fn listen(addr: SocketAddr, backlog: usize) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as usize) as i32)?;
    Ok(socket.into())
}

/// Bind the listening socket of the server role on every interface
pub fn bind(config: &Configuration) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.dst_port()));
    listen(addr, config.max_connections).with_context(|| format!("bind failed on {addr}"))
}

/// Run the server role on `listener` until the stop flag is raised
pub fn serve(
    listener: TcpListener,
    config: &Configuration,
    stats: Arc<Stats>,
) -> anyhow::Result<()> {
    if config.thread_per_connection {
        log::info!("Thread mode on");
        ThreadedServer::new(listener)?.run(stats)
    } else {
        MultiplexedServer::new(listener, config.max_connections)?.run(&stats)
    }
}
