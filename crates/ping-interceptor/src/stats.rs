//! Round-trip statistics for a single connection.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::messages::Pong;

/// One completed ping/pong exchange.
#[derive(Debug, Clone)]
struct Sample {
    rtt: Duration,
    #[allow(dead_code)]
    recorded_at: DateTime<Utc>,
}

/// Bounded history of ping/pong exchanges plus running counters.
///
/// The history is capped at `max` samples; older samples fall off the front.
/// The sent/received counters are unbounded so the success rate reflects the
/// whole lifetime of the connection, not just the retained window.
#[derive(Debug)]
pub struct PingStats {
    samples: Vec<Sample>,
    max: u16,
    sent: u64,
    received: u64,
    recent: Option<Duration>,
}

impl PingStats {
    pub fn new(max: u16) -> Self {
        Self {
            samples: Vec::new(),
            max,
            sent: 0,
            received: 0,
            recent: None,
        }
    }

    /// Record an outgoing ping.
    pub fn record_sent(&mut self) {
        self.sent += 1;
    }

    /// Record a received pong; the RTT is the pong timestamp minus the echoed
    /// ping timestamp.
    pub fn record_pong(&mut self, pong: &Pong) {
        let rtt = (pong.timestamp - pong.ping_timestamp)
            .to_std()
            .unwrap_or_default();

        self.recent = Some(rtt);
        if self.max > 0 && self.samples.len() >= usize::from(self.max) {
            self.samples.remove(0);
        }
        self.samples.push(Sample {
            rtt,
            recorded_at: Utc::now(),
        });
        self.received += 1;
    }

    /// RTT of the most recent pong, or zero before the first one.
    pub fn recent_rtt(&self) -> Duration {
        self.recent.unwrap_or_default()
    }

    /// Mean RTT over the retained window.
    pub fn average_rtt(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().map(|s| s.rtt).sum();
        total / self.samples.len() as u32
    }

    pub fn max_rtt(&self) -> Duration {
        self.samples
            .iter()
            .map(|s| s.rtt)
            .max()
            .unwrap_or_default()
    }

    pub fn min_rtt(&self) -> Duration {
        self.samples
            .iter()
            .map(|s| s.rtt)
            .min()
            .unwrap_or_default()
    }

    /// Percentage of sent pings that were answered; zero before the first
    /// ping goes out.
    pub fn success_rate(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        100.0 * self.received as f64 / self.sent as f64
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Point-in-time copy of the statistics, safe to hand out of the lock.
    pub fn snapshot(&self) -> PingStatsSnapshot {
        PingStatsSnapshot {
            recent_rtt: self.recent_rtt(),
            average_rtt: self.average_rtt(),
            min_rtt: self.min_rtt(),
            max_rtt: self.max_rtt(),
            success_rate: self.success_rate(),
            sent: self.sent,
            received: self.received,
        }
    }
}

/// Read-only view of a connection's liveness statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct PingStatsSnapshot {
    pub recent_rtt: Duration,
    pub average_rtt: Duration,
    pub min_rtt: Duration,
    pub max_rtt: Duration,
    pub success_rate: f64,
    pub sent: u64,
    pub received: u64,
}
