use crate::config::TCP_PAYLOAD_MAX_LEN;
use crate::stats::Stats;

use anyhow::Context;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const LISTENER: Token = Token(0);
/// The servers check the stop flag at least this often
const POLL_TIMEOUT: Duration = Duration::from_millis(250);
const EVENTS_CAPACITY: usize = 1024;

struct Connection {
    stream: mio::net::TcpStream,
    peer: SocketAddr,
    bytes: u64,
}

/// Serves every connection from a single thread with readiness polling.
///
/// Connections live in a fixed number of slots. A new connection takes the lowest free slot,
/// and a slot is freed as soon as its peer disconnects. When every slot is taken, new
/// connections are accepted and closed right away.
pub struct MultiplexedServer {
    poll: Poll,
    events: Events,
    listener: mio::net::TcpListener,
    slots: Vec<Option<Connection>>,
    buf: Vec<u8>,
}

impl MultiplexedServer {
    pub fn new(listener: TcpListener, max_connections: usize) -> anyhow::Result<Self> {
        listener.set_nonblocking(true)?;
        let mut listener = mio::net::TcpListener::from_std(listener);
        let poll = Poll::new().context("failed to create the poller")?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        Ok(MultiplexedServer {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener,
            slots: (0..max_connections).map(|_| None).collect(),
            buf: vec![0; TCP_PAYLOAD_MAX_LEN],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn active_connections(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// The slot of the connection coming from `peer`
    pub fn slot_of(&self, peer: SocketAddr) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|c| c.peer == peer))
    }

    /// Wait for readiness events, then accept and drain whatever is ready
    pub fn poll_once(&mut self, timeout: Option<Duration>, stats: &Stats) -> anyhow::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e).context("poll failed"),
        }
        let tokens: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
        for token in tokens {
            if token == LISTENER {
                self.accept_all(stats)?;
            } else {
                self.drain(token.0 - 1, stats);
            }
        }
        Ok(())
    }

    fn accept_all(&mut self, stats: &Stats) -> anyhow::Result<()> {
        // readiness is edge-triggered: accept until the backlog is empty
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let free = self.slots.iter().position(Option::is_none);
                    match free {
                        Some(slot) => self.admit(slot, stream, peer, stats),
                        None => log::warn!(
                            "All {} connection slots are taken: {peer} is closed",
                            self.slots.len()
                        ),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("accept failed"),
            }
        }
    }

    /// Put an accepted connection in `slot`. A connection that cannot be watched is closed.
    fn admit(
        &mut self,
        slot: usize,
        mut stream: mio::net::TcpStream,
        peer: SocketAddr,
        stats: &Stats,
    ) {
        let token = Token(slot + 1);
        if let Err(e) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
            log::warn!("Cannot watch the connection from {peer}, it is closed: {e}");
            return;
        }
        log::info!("Connection from {peer} in slot {slot}");
        stats.connection_accepted();
        self.slots[slot] = Some(Connection {
            stream,
            peer,
            bytes: 0,
        });
    }

    fn drain(&mut self, slot: usize, stats: &Stats) {
        let Some(conn) = self.slots.get_mut(slot).and_then(Option::as_mut) else {
            return;
        };
        let closed = loop {
            match conn.stream.read(&mut self.buf) {
                Ok(0) => break true,
                Ok(n) => {
                    conn.bytes += n as u64;
                    stats.bytes_read(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break false,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("Read error from {}: {e}", conn.peer);
                    break true;
                }
            }
        };
        if closed {
            self.close(slot, stats);
        }
    }

    fn close(&mut self, slot: usize, stats: &Stats) {
        if let Some(mut conn) = self.slots[slot].take() {
            if let Err(e) = self.poll.registry().deregister(&mut conn.stream) {
                log::debug!("Cannot deregister slot {slot}: {e}");
            }
            log::info!(
                "{} disconnected after {} bytes, slot {slot} is free",
                conn.peer,
                conn.bytes
            );
            stats.connection_closed();
        }
    }

    pub fn run(mut self, stats: &Stats) -> anyhow::Result<()> {
        log::info!(
            "Server listening on {} ({} slots)",
            self.local_addr()?,
            self.slots.len()
        );
        while !stats.should_stop() {
            self.poll_once(Some(POLL_TIMEOUT), stats)?;
        }
        log::info!(
            "Server stops with {} open connections",
            self.active_connections()
        );
        Ok(())
    }
}

struct Worker {
    handle: JoinHandle<u64>,
    /// Used to unblock the worker on shutdown
    stream: TcpStream,
}

/// Serves every connection from its own thread
pub struct ThreadedServer {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    workers: Vec<Worker>,
    next_id: u64,
}

impl ThreadedServer {
    pub fn new(listener: TcpListener) -> anyhow::Result<Self> {
        listener.set_nonblocking(true)?;
        let poll = Poll::new().context("failed to create the poller")?;
        poll.registry().register(
            &mut SourceFd(&listener.as_raw_fd()),
            LISTENER,
            Interest::READABLE,
        )?;
        Ok(ThreadedServer {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener,
            workers: vec![],
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// Wait for new connections and hand each of them to a new thread
    pub fn poll_once(
        &mut self,
        timeout: Option<Duration>,
        stats: &Arc<Stats>,
    ) -> anyhow::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e).context("poll failed"),
        }
        if self.events.iter().any(|e| e.token() == LISTENER) {
            self.accept_all(stats)?;
        }
        self.reap();
        Ok(())
    }

    fn accept_all(&mut self, stats: &Arc<Stats>) -> anyhow::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.spawn_worker(stream, peer, stats) {
                        log::warn!("Connection from {peer} is closed: {e:#}");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("accept failed"),
            }
        }
    }

    fn spawn_worker(
        &mut self,
        stream: TcpStream,
        peer: SocketAddr,
        stats: &Arc<Stats>,
    ) -> anyhow::Result<()> {
        stream.set_nonblocking(false)?;
        let clone = stream.try_clone()?;
        let id = self.next_id;
        self.next_id += 1;
        let worker_stats = Arc::clone(stats);
        let handle = thread::Builder::new()
            .name(format!("TcpConn-{id}"))
            .spawn(move || serve_connection(stream, peer, &worker_stats))
            .context("failed to spawn a connection thread")?;
        log::info!("Connection {id} from {peer}");
        stats.connection_accepted();
        self.workers.push(Worker {
            handle,
            stream: clone,
        });
        Ok(())
    }

    /// Join the workers whose peer has left
    fn reap(&mut self) {
        let (done, running): (Vec<Worker>, Vec<Worker>) = std::mem::take(&mut self.workers)
            .into_iter()
            .partition(|w| w.handle.is_finished());
        self.workers = running;
        for worker in done {
            if worker.handle.join().is_err() {
                log::error!("A connection thread panicked");
            }
        }
    }

    pub fn run(mut self, stats: Arc<Stats>) -> anyhow::Result<()> {
        log::info!("Server listening on {}", self.local_addr()?);
        while !stats.should_stop() {
            self.poll_once(Some(POLL_TIMEOUT), &stats)?;
        }
        log::info!("Server stops, closing {} connections", self.active_workers());
        for worker in self.workers {
            let _ = worker.stream.shutdown(Shutdown::Both);
            if worker.handle.join().is_err() {
                log::error!("A connection thread panicked");
            }
        }
        Ok(())
    }
}

/// Read from the connection until the peer leaves. Returns the number of bytes read.
fn serve_connection(mut stream: TcpStream, peer: SocketAddr, stats: &Stats) -> u64 {
    let mut buf = vec![0; TCP_PAYLOAD_MAX_LEN];
    let mut total = 0;
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                stats.bytes_read(n);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("Read error from {peer}: {e}");
                break;
            }
        }
    }
    log::info!("{peer} disconnected after {total} bytes");
    stats.connection_closed();
    total
}
