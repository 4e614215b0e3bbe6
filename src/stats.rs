use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const REPORT_PERIOD: Duration = Duration::from_secs(5);

/// Counters shared by the worker threads, plus the stop flag
pub struct Stats {
    pub start_time: Instant,
    pub sent_packets: AtomicU64,
    pub sent_bytes: AtomicU64,
    pub send_errors: AtomicU64,
    pub received_packets: AtomicU64,
    pub received_bytes: AtomicU64,
    /// Bytes read by the TCP servers
    pub read_bytes: AtomicU64,
    pub accepted_connections: AtomicU64,
    pub closed_connections: AtomicU64,
    early_stop: AtomicBool,
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            start_time: Instant::now(),
            sent_packets: AtomicU64::new(0),
            sent_bytes: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            received_packets: AtomicU64::new(0),
            received_bytes: AtomicU64::new(0),
            read_bytes: AtomicU64::new(0),
            accepted_connections: AtomicU64::new(0),
            closed_connections: AtomicU64::new(0),
            early_stop: AtomicBool::new(false),
        }
    }
}

impl Stats {
    pub fn packet_sent(&self, bytes: usize) {
        self.sent_packets.fetch_add(1, Ordering::Relaxed);
        self.sent_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_received(&self, bytes: usize) {
        self.received_packets.fetch_add(1, Ordering::Relaxed);
        self.received_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Bytes read on a TCP connection
    pub fn bytes_read(&self, bytes: usize) {
        self.read_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn connection_accepted(&self) {
        self.accepted_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.closed_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn should_stop(&self) -> bool {
        self.early_stop.load(Ordering::Relaxed)
    }

    pub fn stop_early(&self) {
        self.early_stop.store(true, Ordering::Relaxed);
    }
}

fn format_throughput(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs == 0. {
        return "-".into();
    }
    let throughput = 8. * (bytes as f64) / secs / 1_000_000.;
    if throughput < 1. {
        format!("{:.2} kbps", throughput * 1000.)
    } else if throughput < 1000. {
        format!("{throughput:.2} Mbps")
    } else {
        format!("{:.2} Gbps", throughput / 1000.)
    }
}

/// Periodically log the counters until the stop flag is raised
pub fn show_progression(stats: Arc<Stats>) {
    while !stats.should_stop() {
        for _ in 0..REPORT_PERIOD.as_millis() / 100 {
            thread::sleep(Duration::from_millis(100));
            if stats.should_stop() {
                break;
            }
        }
        log::info!("{}", progress_line(&stats, stats.start_time.elapsed()));
    }
}

fn progress_line(stats: &Stats, elapsed: Duration) -> String {
    let sp = stats.sent_packets.load(Ordering::Relaxed);
    let sb = stats.sent_bytes.load(Ordering::Relaxed);
    let se = stats.send_errors.load(Ordering::Relaxed);
    let rp = stats.received_packets.load(Ordering::Relaxed);
    let rb = stats.received_bytes.load(Ordering::Relaxed);
    let tb = stats.read_bytes.load(Ordering::Relaxed);
    let ac = stats.accepted_connections.load(Ordering::Relaxed);
    let cc = stats.closed_connections.load(Ordering::Relaxed);
    format!(
        "{sp} packets sent ({}, {se} errors), {rp} datagrams received ({}), \
         {} read over {} TCP connections",
        format_throughput(sb, elapsed),
        format_throughput(rb, elapsed),
        format_throughput(tb, elapsed),
        ac.saturating_sub(cc)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters() {
        let stats = Stats::default();
        stats.packet_sent(100);
        stats.packet_sent(100);
        stats.send_failed();
        stats.packet_received(72);
        assert_eq!(stats.sent_packets.load(Ordering::Relaxed), 2);
        assert_eq!(stats.sent_bytes.load(Ordering::Relaxed), 200);
        assert_eq!(stats.send_errors.load(Ordering::Relaxed), 1);
        assert_eq!(stats.received_bytes.load(Ordering::Relaxed), 72);
        assert!(!stats.should_stop());
        stats.stop_early();
        assert!(stats.should_stop());
    }

    #[test]
    fn tcp_bytes_are_not_datagrams() {
        let stats = Stats::default();
        stats.connection_accepted();
        stats.bytes_read(125_000);
        assert_eq!(stats.received_bytes.load(Ordering::Relaxed), 0);
        assert_eq!(
            progress_line(&stats, Duration::from_secs(1)),
            "0 packets sent (0.00 kbps, 0 errors), 0 datagrams received (0.00 kbps), \
             1.00 Mbps read over 1 TCP connections"
        );
    }

    #[test]
    fn throughput_units() {
        let s = Duration::from_secs(1);
        assert_eq!(format_throughput(125, s), "1.00 kbps");
        assert_eq!(format_throughput(125_000, s), "1.00 Mbps");
        assert_eq!(format_throughput(125_000_000, s), "1.00 Gbps");
    }
}
