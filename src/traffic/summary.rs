//! Run summary and per-issuer tallies.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Result of one issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    /// The target answered.
    Response { status: u16, latency: Duration },
    /// No answer within the request timeout.
    Timeout,
    /// Connection refused, reset, or similar.
    Transport,
}

/// Counters one issuer accumulates; merged at the end of the run.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    pub issued: u64,
    pub succeeded: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub transport_errors: u64,
    pub timeouts: u64,
    pub abandoned: u64,
    latencies: Vec<Duration>,
}

impl Tally {
    pub fn record(&mut self, sample: Sample) {
        match sample {
            Sample::Response { status, latency } => {
                match status {
                    400..=499 => self.client_errors += 1,
                    500..=599 => self.server_errors += 1,
                    _ => self.succeeded += 1,
                }
                self.latencies.push(latency);
            }
            Sample::Timeout => self.timeouts += 1,
            Sample::Transport => self.transport_errors += 1,
        }
    }

    pub fn failed(&self) -> u64 {
        self.client_errors + self.server_errors + self.transport_errors + self.timeouts
    }

    pub fn merge(&mut self, other: Tally) {
        self.issued += other.issued;
        self.succeeded += other.succeeded;
        self.client_errors += other.client_errors;
        self.server_errors += other.server_errors;
        self.transport_errors += other.transport_errors;
        self.timeouts += other.timeouts;
        self.abandoned += other.abandoned;
        self.latencies.extend(other.latencies);
    }

    pub fn into_summary(self, elapsed: Duration, cancelled: bool) -> RunSummary {
        let elapsed_secs = elapsed.as_secs_f64();
        RunSummary {
            issued: self.issued,
            succeeded: self.succeeded,
            failed: self.failed(),
            client_errors: self.client_errors,
            server_errors: self.server_errors,
            transport_errors: self.transport_errors,
            timeouts: self.timeouts,
            abandoned: self.abandoned,
            cancelled,
            elapsed_secs,
            achieved_rate: if elapsed_secs > 0.0 {
                self.issued as f64 / elapsed_secs
            } else {
                0.0
            },
            latency: LatencySummary::from_samples(self.latencies),
        }
    }
}

/// Response latency distribution in milliseconds.
///
/// Only requests that got an answer contribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    pub fn from_samples(mut samples: Vec<Duration>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        let total: f64 = samples.iter().map(|d| ms(*d)).sum();
        Self {
            samples: samples.len(),
            mean_ms: total / samples.len() as f64,
            p50_ms: ms(percentile(&samples, 50.0)),
            p90_ms: ms(percentile(&samples, 90.0)),
            p95_ms: ms(percentile(&samples, 95.0)),
            p99_ms: ms(percentile(&samples, 99.0)),
            max_ms: ms(samples[samples.len() - 1]),
        }
    }
}

/// Nearest-rank percentile of an ascending, non-empty slice.
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// What a generator run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub issued: u64,
    pub succeeded: u64,
    /// Client errors + server errors + transport errors + timeouts.
    pub failed: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub transport_errors: u64,
    pub timeouts: u64,
    /// In flight when the run was interrupted and not finished within the
    /// drain timeout.
    pub abandoned: u64,
    /// The run was interrupted before reaching its quota or deadline.
    pub cancelled: bool,
    pub elapsed_secs: f64,
    pub achieved_rate: f64,
    pub latency: LatencySummary,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Run {} after {:.2}s ({:.2} req/s)",
            if self.cancelled { "interrupted" } else { "completed" },
            self.elapsed_secs,
            self.achieved_rate
        )?;
        writeln!(f, "  issued:     {}", self.issued)?;
        writeln!(f, "  succeeded:  {}", self.succeeded)?;
        writeln!(
            f,
            "  failed:     {} (4xx {}, 5xx {}, transport {}, timeout {})",
            self.failed, self.client_errors, self.server_errors, self.transport_errors, self.timeouts
        )?;
        if self.abandoned > 0 {
            writeln!(f, "  abandoned:  {}", self.abandoned)?;
        }
        let l = &self.latency;
        write!(
            f,
            "  latency ms: mean {:.1} | p50 {:.1} | p90 {:.1} | p95 {:.1} | p99 {:.1} | max {:.1}",
            l.mean_ms, l.p50_ms, l.p90_ms, l.p95_ms, l.p99_ms, l.max_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(ms: u64) -> Sample {
        Sample::Response {
            status: 200,
            latency: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_nearest_rank_percentiles() {
        let samples: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        let summary = LatencySummary::from_samples(samples);
        assert_eq!(summary.samples, 100);
        assert!((summary.p50_ms - 50.0).abs() < 1e-9);
        assert!((summary.p90_ms - 90.0).abs() < 1e-9);
        assert!((summary.p99_ms - 99.0).abs() < 1e-9);
        assert!((summary.max_ms - 100.0).abs() < 1e-9);
        assert!((summary.mean_ms - 50.5).abs() < 1e-9);

        let single = LatencySummary::from_samples(vec![Duration::from_millis(7)]);
        assert!((single.p50_ms - 7.0).abs() < 1e-9);
        assert!((single.p99_ms - 7.0).abs() < 1e-9);

        assert_eq!(LatencySummary::from_samples(Vec::new()), LatencySummary::default());
    }

    #[test]
    fn test_tally_classification_and_merge() {
        let mut a = Tally {
            issued: 4,
            ..Tally::default()
        };
        a.record(ok(10));
        a.record(Sample::Response {
            status: 404,
            latency: Duration::from_millis(5),
        });
        a.record(Sample::Timeout);
        a.record(Sample::Transport);

        let mut b = Tally {
            issued: 2,
            abandoned: 1,
            ..Tally::default()
        };
        b.record(Sample::Response {
            status: 503,
            latency: Duration::from_millis(20),
        });

        a.merge(b);
        let summary = a.into_summary(Duration::from_secs(2), true);
        assert_eq!(summary.issued, 6);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 4);
        assert_eq!(summary.client_errors, 1);
        assert_eq!(summary.server_errors, 1);
        assert_eq!(summary.abandoned, 1);
        assert_eq!(summary.issued, summary.succeeded + summary.failed + summary.abandoned);
        assert_eq!(summary.latency.samples, 3);
        assert!((summary.achieved_rate - 3.0).abs() < 1e-9);
        assert!(summary.cancelled);
    }

    #[test]
    fn test_summary_renders() {
        let mut t = Tally {
            issued: 1,
            ..Tally::default()
        };
        t.record(ok(12));
        let summary = t.into_summary(Duration::from_secs(1), false);

        let text = summary.to_string();
        assert!(text.starts_with("Run completed"));
        assert!(text.contains("issued:     1"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["succeeded"], 1);
        assert_eq!(json["latency"]["samples"], 1);
    }
}
