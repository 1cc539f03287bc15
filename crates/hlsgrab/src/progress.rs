use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub throughput_bytes_per_sec: f64,
}

impl ProgressSnapshot {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.
        } else {
            self.completed as f64 / self.total as f64 * 100.
        }
    }
}

/// Rate-limited view over the bytes handed to the sink.
///
/// At most one snapshot is produced per `interval`, plus one final snapshot
/// when the job ends.
pub struct ProgressReporter {
    total: usize,
    completed: usize,
    total_bytes: u64,

    interval: Duration,
    started_at: Instant,
    last_report: Instant,
    last_bytes: u64,
}

impl ProgressReporter {
    pub fn new(total: usize, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            total,
            completed: 0,
            total_bytes: 0,
            interval,
            started_at: now,
            last_report: now,
            last_bytes: 0,
        }
    }

    /// Account one emitted segment. Returns a snapshot when one is due.
    pub fn record(&mut self, bytes: usize) -> Option<ProgressSnapshot> {
        self.completed += 1;
        self.total_bytes += bytes as u64;

        let now = Instant::now();
        if now.duration_since(self.last_report) < self.interval {
            return None;
        }
        Some(self.snapshot(now))
    }

    /// Snapshot emitted once the job is terminal, regardless of the interval.
    pub fn finish(&mut self) -> ProgressSnapshot {
        self.snapshot(Instant::now())
    }

    fn snapshot(&mut self, now: Instant) -> ProgressSnapshot {
        let elapsed = now.duration_since(self.last_report).as_secs_f64();
        let throughput = if elapsed > 0. {
            (self.total_bytes - self.last_bytes) as f64 / elapsed
        } else {
            0.
        };
        self.last_report = now;
        self.last_bytes = self.total_bytes;

        ProgressSnapshot {
            completed: self.completed,
            total: self.total,
            throughput_bytes_per_sec: throughput,
        }
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Bytes per second over the whole job.
    pub fn average_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0. {
            self.total_bytes as f64 / elapsed
        } else {
            0.
        }
    }
}
