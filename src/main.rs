use flowgen::config::{Configuration, Transport};
use flowgen::receiver::Receiver;
use flowgen::stats::{self, Stats};
use flowgen::*;
mod cmd;

use std::net::{Ipv4Addr, SocketAddr};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{bounded, Sender};

const CHANNEL_SIZE: usize = 8;

/// What a worker thread reports to the main thread when it ends
enum Event {
    Done(String, Option<Outcome>),
    Failed(String, anyhow::Error),
}

/// The entry point of the application.
///
/// Builds the configuration from the command line, then starts the roles it asks for.
fn main() {
    let config = cmd::Args::parse().into_config();
    let filter = match &config {
        Ok(c) if c.verbose => "debug",
        _ => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = match config {
        Ok(c) => Arc::new(c),
        Err(e) => {
            log::error!("Invalid configuration: {e:#}");
            process::exit(1);
        }
    };
    log::debug!("Configuration: {config:?}");
    process::exit(run(config));
}

fn spawn_worker<F>(name: &str, tx: Sender<Event>, f: F) -> anyhow::Result<JoinHandle<()>>
where
    F: FnOnce() -> anyhow::Result<Option<Outcome>> + Send + 'static,
{
    let n = name.to_string();
    thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let event = match f() {
                Ok(outcome) => Event::Done(n, outcome),
                Err(e) => Event::Failed(n, e),
            };
            // the main thread may already be gone
            let _ = tx.send(event);
        })
        .with_context(|| format!("cannot spawn the {name} thread"))
}

/// Start the workers and wait for them. Returns the exit status of the process.
fn run(config: Arc<Configuration>) -> i32 {
    let stats = Arc::new(Stats::default());

    // Handle ctrl+C
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let stats = Arc::clone(&stats);
        let interrupted = Arc::clone(&interrupted);
        if let Err(e) = ctrlc::set_handler(move || {
            if !interrupted.swap(true, Ordering::Relaxed) {
                log::warn!("Stopping, please wait");
                stats.stop_early();
            } else {
                log::warn!("Ending immediately");
                process::exit(1);
            }
        }) {
            log::warn!("Cannot set the Ctrl-C handler: {e}");
        }
    }

    let (tx, rx) = bounded::<Event>(CHANNEL_SIZE);
    let mut workers = vec![];
    let started = start_workers(&config, &stats, &tx, &mut workers);
    drop(tx);

    let mut status = 0;
    if let Err(e) = started {
        log::error!("{e:#}");
        stats.stop_early();
        status = 1;
    }

    let monitoring = {
        let stats = Arc::clone(&stats);
        thread::Builder::new()
            .name("Monitoring".into())
            .spawn(move || stats::show_progression(stats))
    };

    // every sender is owned by a worker: the channel is closed once they all ended
    for event in rx.iter() {
        match event {
            Event::Done(name, Some(outcome)) => {
                log::info!("{name} stopped after {} packets", outcome.sent());
                if let Outcome::CountReached(_) = outcome {
                    // the cap ends the whole run
                    stats.stop_early();
                }
            }
            Event::Done(name, None) => log::info!("{name} stopped"),
            Event::Failed(name, e) => {
                log::error!("{name} failed: {e:#}");
                stats.stop_early();
                status = 1;
            }
        }
    }

    stats.stop_early();
    for w in workers {
        if w.join().is_err() {
            status = 1;
        }
    }
    match monitoring {
        Ok(m) => {
            let _ = m.join();
        }
        Err(e) => log::warn!("Cannot start the monitoring thread: {e}"),
    }
    log::info!(
        "{} packets sent, {} packets received",
        stats.sent_packets.load(Ordering::Relaxed),
        stats.received_packets.load(Ordering::Relaxed)
    );
    status
}

fn start_workers(
    config: &Arc<Configuration>,
    stats: &Arc<Stats>,
    tx: &Sender<Event>,
    workers: &mut Vec<JoinHandle<()>>,
) -> anyhow::Result<()> {
    // the server listens before the client of the same process connects
    if config.role.serves() {
        let listener = tcp::bind(config)?;
        let config = Arc::clone(config);
        let stats = Arc::clone(stats);
        workers.push(spawn_worker("TcpServer", tx.clone(), move || {
            tcp::serve(listener, &config, stats).map(|_| None)
        })?);
    }

    if config.role.receives() {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.receiver_port()));
        let receiver = Receiver::bind(addr)?;
        let stats = Arc::clone(stats);
        workers.push(spawn_worker("Receiver", tx.clone(), move || {
            receiver.run(&stats).map(|_| None)
        })?);
    }

    if config.role.transmits() {
        let config = Arc::clone(config);
        let stats = Arc::clone(stats);
        let handle = if config.transport == Transport::Tcp {
            spawn_worker("TcpClient", tx.clone(), move || {
                tcp::client::run(&config, &stats).map(Some)
            })?
        } else {
            spawn_worker("Transmitter", tx.clone(), move || {
                inject::run(&config, &stats).map(Some)
            })?
        };
        workers.push(handle);
    }
    Ok(())
}
