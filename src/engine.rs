use crate::config::Configuration;
use crate::inject::Transmitter;
use crate::stats::Stats;
use crate::structs::*;

use std::thread;
use std::time::Duration;

/// Cycles a schedule, sending one unit per slot
#[derive(Debug, Clone, Default)]
pub struct Engine {
    /// Pause between two sends
    pub interval: Option<Duration>,
    /// Stop after this many units
    pub count: Option<u64>,
    /// Pause after a failed send, before the schedule restarts
    pub error_backoff: Option<Duration>,
}

impl Engine {
    pub fn new(config: &Configuration) -> Self {
        Engine {
            interval: config.interval(),
            count: config.packet_cap(),
            error_backoff: config.error_backoff(),
        }
    }

    /// Walk the schedule from start to end, again and again.
    ///
    /// A failed send aborts the current pass and the next one starts from the beginning of
    /// the schedule. The loop only ends when the packet cap is reached or when the stop flag
    /// of `stats` is raised.
    pub fn run<T: Transmitter>(
        &self,
        schedule: &Schedule<T::Id>,
        tx: &mut T,
        stats: &Stats,
    ) -> Outcome {
        if self.count == Some(0) || schedule.is_empty() {
            return Outcome::CountReached(0);
        }
        log::info!(
            "Start transmission over {} slots{}",
            schedule.len(),
            self.count
                .map(|c| format!(", {c} units to send"))
                .unwrap_or_default()
        );
        let mut sent: u64 = 0;
        'cycle: loop {
            for id in schedule.iter() {
                if stats.should_stop() {
                    log::info!("Transmission stopped after {sent} units");
                    return Outcome::Stopped(sent);
                }
                match tx.transmit(*id) {
                    Ok(n) => {
                        stats.packet_sent(n);
                        sent += 1;
                    }
                    Err(e) => {
                        log::error!("Failed to send to flow {id:?}: {e}");
                        stats.send_failed();
                        if let Some(backoff) = self.error_backoff {
                            thread::sleep(backoff);
                        }
                        continue 'cycle;
                    }
                }
                if self.count.is_some_and(|c| sent >= c) {
                    log::info!("{sent} units sent");
                    return Outcome::CountReached(sent);
                }
                if let Some(interval) = self.interval {
                    thread::sleep(interval);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Records the flows it is asked to send for, and fails on demand
    struct Recorder {
        sent: Vec<u16>,
        fail_on: Vec<usize>,
        calls: usize,
        stop_after: Option<(usize, std::sync::Arc<Stats>)>,
    }

    impl Recorder {
        fn new() -> Self {
            Recorder {
                sent: vec![],
                fail_on: vec![],
                calls: 0,
                stop_after: None,
            }
        }
    }

    impl Transmitter for Recorder {
        type Id = u16;

        fn transmit(&mut self, id: u16) -> io::Result<usize> {
            let call = self.calls;
            self.calls += 1;
            if let Some((n, stats)) = &self.stop_after {
                if self.calls >= *n {
                    stats.stop_early();
                }
            }
            if self.fail_on.contains(&call) {
                return Err(io::Error::new(io::ErrorKind::Other, "unreachable"));
            }
            self.sent.push(id);
            Ok(100)
        }
    }

    fn schedule(ids: &[u16]) -> Schedule<u16> {
        let flows: Vec<Flow<u16>> = ids
            .iter()
            .map(|id| Flow {
                id: *id,
                weight: 1.,
                ratio: 1,
            })
            .collect();
        Schedule::from_flows(&flows, 4096)
    }

    #[test]
    fn count_cap() {
        let engine = Engine {
            count: Some(10),
            ..Default::default()
        };
        let stats = Stats::default();
        let mut tx = Recorder::new();
        let outcome = engine.run(&schedule(&[49153]), &mut tx, &stats);
        assert_eq!(outcome, Outcome::CountReached(10));
        assert_eq!(tx.sent, vec![49153; 10]);
        assert_eq!(stats.sent_bytes.load(std::sync::atomic::Ordering::Relaxed), 1000);
    }

    #[test]
    fn schedule_order_is_kept_across_cycles() {
        let engine = Engine {
            count: Some(7),
            ..Default::default()
        };
        let mut tx = Recorder::new();
        engine.run(&schedule(&[1, 2, 3]), &mut tx, &Stats::default());
        assert_eq!(tx.sent, vec![1, 2, 3, 1, 2, 3, 1]);
    }

    #[test]
    fn failure_restarts_the_schedule() {
        let engine = Engine {
            count: Some(5),
            ..Default::default()
        };
        let stats = Stats::default();
        let mut tx = Recorder::new();
        // the second send (flow 2) fails: the pass is aborted and restarts at flow 1
        tx.fail_on = vec![1];
        let outcome = engine.run(&schedule(&[1, 2, 3]), &mut tx, &stats);
        assert_eq!(outcome, Outcome::CountReached(5));
        assert_eq!(tx.sent, vec![1, 1, 2, 3, 1]);
        assert_eq!(stats.send_errors.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn backoff_after_failure() {
        let engine = Engine {
            count: Some(2),
            error_backoff: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let stats = Stats::default();
        let mut tx = Recorder::new();
        tx.fail_on = vec![0];
        let start = std::time::Instant::now();
        let outcome = engine.run(&schedule(&[1]), &mut tx, &stats);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(outcome, Outcome::CountReached(2));
        assert_eq!(tx.sent, vec![1, 1]);
        assert_eq!(stats.send_errors.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn stop_flag() {
        let engine = Engine::default();
        let stats = std::sync::Arc::new(Stats::default());
        let mut tx = Recorder::new();
        tx.stop_after = Some((25, stats.clone()));
        let outcome = engine.run(&schedule(&[1, 2]), &mut tx, &stats);
        assert_eq!(outcome, Outcome::Stopped(25));
    }

    #[test]
    fn interval_is_honored() {
        let engine = Engine {
            count: Some(3),
            interval: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let start = std::time::Instant::now();
        engine.run(&schedule(&[1]), &mut Recorder::new(), &Stats::default());
        // no pause after the last unit
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
