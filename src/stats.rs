use std::time::{Duration, Instant};

/// Sliding window length for the management page's throughput figure.
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(10);

/// Bytes delivered to client-facing sockets since the window started.
/// Incremented by every successful send on a proxy or tunnel client socket,
/// read and reset by the management renderer.
#[derive(Debug)]
pub struct Stats {
    bytes_delivered: u64,
    window_start: Instant,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            bytes_delivered: 0,
            window_start: Instant::now(),
        }
    }

    pub fn add(&mut self, n: u64) {
        self.bytes_delivered += n;
    }

    /// Returns (seconds since the window started, bytes/second). When the
    /// window has elapsed the counters reset and the rate reads zero.
    pub fn throughput(&mut self) -> (u64, f64) {
        let elapsed = self.window_start.elapsed();
        let seconds = elapsed.as_secs_f64().round() as u64;
        if elapsed < THROUGHPUT_WINDOW {
            let secs = elapsed.as_secs_f64();
            let rate = if secs > 0.0 {
                self.bytes_delivered as f64 / secs
            } else {
                0.0
            };
            (seconds, rate)
        } else {
            self.bytes_delivered = 0;
            self.window_start = Instant::now();
            (seconds, 0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_reflects_delivered_bytes() {
        let mut stats = Stats::new();
        stats.add(100);
        stats.add(50);
        std::thread::sleep(Duration::from_millis(20));
        let (_, rate) = stats.throughput();
        assert!(rate > 0.0);
    }

    #[test]
    fn elapsed_window_resets() {
        let mut stats = Stats::new();
        stats.add(4096);
        stats.window_start = Instant::now() - Duration::from_secs(11);
        let (seconds, rate) = stats.throughput();
        assert!(seconds >= 11);
        assert_eq!(rate, 0.0);
        // fresh window after the reset
        std::thread::sleep(Duration::from_millis(20));
        stats.add(10);
        let (_, rate) = stats.throughput();
        assert!(rate > 0.0);
    }
}
