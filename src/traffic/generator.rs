//! Concurrent request issuers.
//!
//! # Responsibilities
//! - Probe the target before the run
//! - Split the request quota across independent issuers
//! - Pace each issuer, optionally with several requests in flight
//! - Stop issuing on interrupt and drain or abandon what is in flight
//!
//! # Design Decisions
//! - Issuers never share state; tallies are merged once they finish
//! - Request failures are samples, never errors of the run
//! - Each issuer derives its own RNG from the run seed (`seed + index`)

use std::time::Duration;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use url::Url;

use crate::faults::{FaultKind, FAULT_PARAM};
use crate::traffic::config::{TrafficConfig, TrafficError};
use crate::traffic::summary::{RunSummary, Sample, Tally};

/// Largest id substituted into `{...}` template segments.
const MAX_TEMPLATE_ID: u64 = 1000;

/// Check that something answers HTTP at `{base_url}/health` within `timeout`.
///
/// Any status proves reachability; transport failures and timeouts do not.
pub async fn probe(client: &reqwest::Client, base_url: &Url, timeout: Duration) -> Result<(), TrafficError> {
    let url = endpoint_url(base_url, "/health");
    match client.get(url.clone()).timeout(timeout).send().await {
        Ok(response) => {
            tracing::info!(url = %url, status = response.status().as_u16(), "Target reachable");
            Ok(())
        }
        Err(source) => Err(TrafficError::Unreachable {
            url: url.to_string(),
            source,
        }),
    }
}

/// Execute one run and report what happened.
///
/// Fails when the config is invalid, the startup probe fails, or an issuer
/// task dies. A message on `shutdown` interrupts the run; the summary is
/// still returned.
pub async fn run(
    config: TrafficConfig,
    client: reqwest::Client,
    shutdown: broadcast::Receiver<()>,
) -> Result<RunSummary, TrafficError> {
    config.validate()?;
    probe(&client, &config.base_url, config.request_timeout).await?;

    let plan = RequestPlan::new(&config)?;
    let quota = config.quota();
    let issuers = config.issuers as u64;
    let period = config.period()?;
    let started = Instant::now();
    let deadline = started
        .checked_add(config.duration)
        .ok_or_else(|| TrafficError::invalid("duration", "too long"))?;

    tracing::info!(
        url = %config.base_url,
        rate = config.rate,
        duration_secs = config.duration.as_secs_f64(),
        quota,
        issuers,
        burst = config.burst,
        fault_fraction = config.fault_fraction,
        "Traffic run starting"
    );

    let mut tasks = JoinSet::new();
    for index in 0..issuers {
        let share = quota / issuers + u64::from(index < quota % issuers);
        if share == 0 {
            continue;
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index)),
            None => StdRng::from_entropy(),
        };
        let issuer = Issuer {
            index,
            quota: share,
            client: client.clone(),
            plan: plan.clone(),
            rng,
            burst: config.burst,
            request_timeout: config.request_timeout,
            drain_timeout: config.drain_timeout,
            // Spread issuer start times across one period.
            first_tick: started
                .checked_add(period.mul_f64(index as f64 / issuers as f64))
                .unwrap_or(deadline)
                .min(deadline),
            period,
            deadline,
            shutdown: shutdown.resubscribe(),
        };
        tasks.spawn(issuer.run());
    }
    drop(shutdown);

    let mut tally = Tally::default();
    let mut cancelled = false;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((issuer_tally, issuer_cancelled)) => {
                tally.merge(issuer_tally);
                cancelled |= issuer_cancelled;
            }
            Err(e) => {
                tracing::error!(error = %e, "Issuer task failed");
                return Err(e.into());
            }
        }
    }

    let summary = tally.into_summary(started.elapsed(), cancelled);
    tracing::info!(
        issued = summary.issued,
        succeeded = summary.succeeded,
        failed = summary.failed,
        abandoned = summary.abandoned,
        cancelled = summary.cancelled,
        "Traffic run finished"
    );
    Ok(summary)
}

/// Shared description of what to request.
#[derive(Debug, Clone)]
struct RequestPlan {
    base_url: Url,
    paths: Vec<String>,
    weights: WeightedIndex<u32>,
    fault_fraction: f64,
    fault_kind: FaultKind,
}

impl RequestPlan {
    fn new(config: &TrafficConfig) -> Result<Self, TrafficError> {
        let weights = WeightedIndex::new(config.endpoints.iter().map(|e| e.weight)).map_err(|e| {
            TrafficError::Invalid {
                field: "endpoints",
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            base_url: config.base_url.clone(),
            paths: config.endpoints.iter().map(|e| e.path.clone()).collect(),
            weights,
            fault_fraction: config.fault_fraction,
            fault_kind: config.fault_kind,
        })
    }

    /// Pick the next URL to request.
    fn next_url<R: Rng>(&self, rng: &mut R) -> Url {
        let template = &self.paths[self.weights.sample(rng)];
        let path = fill_template(template, rng);
        let mut url = endpoint_url(&self.base_url, &path);
        if self.fault_fraction > 0.0 && rng.gen_bool(self.fault_fraction) {
            url.query_pairs_mut()
                .append_pair(FAULT_PARAM, self.fault_kind.as_str());
        }
        url
    }
}

/// Replace every `{...}` segment with a random id.
fn fill_template<R: Rng>(template: &str, rng: &mut R) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(&rng.gen_range(1..=MAX_TEMPLATE_ID).to_string());
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    out
}

fn endpoint_url(base_url: &Url, path: &str) -> Url {
    let mut url = base_url.clone();
    url.set_path(&format!("{}{}", base_url.path().trim_end_matches('/'), path));
    url.set_query(None);
    url
}

struct Issuer {
    index: u64,
    quota: u64,
    client: reqwest::Client,
    plan: RequestPlan,
    rng: StdRng,
    burst: usize,
    request_timeout: Duration,
    drain_timeout: Duration,
    first_tick: Instant,
    period: Duration,
    deadline: Instant,
    shutdown: broadcast::Receiver<()>,
}

impl Issuer {
    /// Returns the issuer's tally and whether it was interrupted.
    async fn run(mut self) -> (Tally, bool) {
        let mut tally = Tally::default();
        let mut in_flight: JoinSet<Sample> = JoinSet::new();
        let mut ticker = tokio::time::interval_at(self.first_tick, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cancelled = false;

        'issue: while tally.issued < self.quota {
            tokio::select! {
                biased;
                _ = interrupted(&mut self.shutdown) => {
                    cancelled = true;
                    break 'issue;
                }
                _ = tokio::time::sleep_until(self.deadline) => break 'issue,
                _ = ticker.tick() => {}
            }
            if Instant::now() >= self.deadline {
                break;
            }

            while in_flight.len() >= self.burst {
                tokio::select! {
                    biased;
                    _ = interrupted(&mut self.shutdown) => {
                        cancelled = true;
                        break 'issue;
                    }
                    Some(joined) = in_flight.join_next() => record(&mut tally, joined),
                }
            }

            let url = self.plan.next_url(&mut self.rng);
            tally.issued += 1;
            in_flight.spawn(send(self.client.clone(), url, self.request_timeout));
        }

        let mut drain_deadline = cancelled.then(|| Instant::now() + self.drain_timeout);
        while !in_flight.is_empty() {
            let joined = match drain_deadline {
                Some(deadline) => tokio::select! {
                    joined = in_flight.join_next() => joined,
                    _ = tokio::time::sleep_until(deadline) => {
                        tally.abandoned += in_flight.len() as u64;
                        in_flight.abort_all();
                        break;
                    }
                },
                None => tokio::select! {
                    joined = in_flight.join_next() => joined,
                    _ = interrupted(&mut self.shutdown) => {
                        cancelled = true;
                        drain_deadline = Some(Instant::now() + self.drain_timeout);
                        continue;
                    }
                },
            };
            if let Some(joined) = joined {
                record(&mut tally, joined);
            }
        }

        tracing::debug!(
            issuer = self.index,
            issued = tally.issued,
            abandoned = tally.abandoned,
            cancelled,
            "Issuer finished"
        );
        (tally, cancelled)
    }
}

/// Resolves when shutdown is signalled. A dropped coordinator is not a signal.
async fn interrupted(shutdown: &mut broadcast::Receiver<()>) {
    if let Err(broadcast::error::RecvError::Closed) = shutdown.recv().await {
        std::future::pending::<()>().await;
    }
}

fn record(tally: &mut Tally, joined: Result<Sample, tokio::task::JoinError>) {
    match joined {
        Ok(sample) => tally.record(sample),
        Err(e) => {
            tracing::warn!(error = %e, "Request task failed");
            tally.record(Sample::Transport);
        }
    }
}

async fn send(client: reqwest::Client, url: Url, timeout: Duration) -> Sample {
    let started = Instant::now();
    let result = client.get(url.clone()).timeout(timeout).send().await;
    let response = match result {
        Ok(response) => response,
        Err(e) if e.is_timeout() => {
            tracing::debug!(url = %url, "Request timed out");
            return Sample::Timeout;
        }
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Request failed");
            return Sample::Transport;
        }
    };
    let status = response.status().as_u16();
    match response.bytes().await {
        Ok(_) => Sample::Response {
            status,
            latency: started.elapsed(),
        },
        Err(e) if e.is_timeout() => Sample::Timeout,
        Err(_) => Sample::Transport,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::config::EndpointWeight;

    fn config() -> TrafficConfig {
        TrafficConfig::new(Url::parse("http://127.0.0.1:8000/").unwrap())
    }

    #[test]
    fn test_fill_template() {
        let mut rng = StdRng::seed_from_u64(1);
        let path = fill_template("/items/{id}", &mut rng);
        let id: u64 = path.strip_prefix("/items/").unwrap().parse().unwrap();
        assert!((1..=MAX_TEMPLATE_ID).contains(&id));

        assert_eq!(fill_template("/health", &mut rng), "/health");
        assert_eq!(fill_template("/broken/{id", &mut rng), "/broken/{id");

        let two = fill_template("/a/{x}/b/{y}", &mut rng);
        assert!(!two.contains('{'));
        assert!(two.starts_with("/a/"));
        assert!(two.contains("/b/"));
    }

    #[test]
    fn test_endpoint_url_keeps_base_path() {
        let base = Url::parse("http://host:9000/prefix/").unwrap();
        assert_eq!(
            endpoint_url(&base, "/health").as_str(),
            "http://host:9000/prefix/health"
        );
        let root = Url::parse("http://host:9000").unwrap();
        assert_eq!(endpoint_url(&root, "/").as_str(), "http://host:9000/");
    }

    #[test]
    fn test_plan_respects_weights_and_fault_fraction() {
        let mut c = config();
        c.endpoints = vec![EndpointWeight::new("/a", 3), EndpointWeight::new("/b", 1)];
        c.fault_fraction = 0.5;
        c.fault_kind = FaultKind::ServerError;
        let plan = RequestPlan::new(&c).unwrap();
        let mut rng = StdRng::seed_from_u64(99);

        let n = 4000;
        let mut a = 0;
        let mut faults = 0;
        for _ in 0..n {
            let url = plan.next_url(&mut rng);
            if url.path() == "/a" {
                a += 1;
            }
            if url.query() == Some("fault=server_error") {
                faults += 1;
            }
        }
        assert!((2800..3200).contains(&a), "a={a}");
        assert!((1800..2200).contains(&faults), "faults={faults}");
    }

    #[test]
    fn test_plan_is_reproducible() {
        let mut c = config();
        c.endpoints = vec![
            EndpointWeight::new("/", 1),
            EndpointWeight::new("/items/{id}", 1),
        ];
        c.fault_fraction = 0.3;
        let plan = RequestPlan::new(&c).unwrap();
        let urls = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..50).map(|_| plan.next_url(&mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(urls(5), urls(5));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_probe() {
        let mut c = config();
        c.rate = -1.0;
        let (_tx, rx) = broadcast::channel(1);
        let result = run(c, reqwest::Client::new(), rx).await;
        assert!(matches!(result, Err(TrafficError::Invalid { field: "rate", .. })));
    }

    #[tokio::test]
    async fn test_zero_period_rate_is_rejected() {
        let mut c = config();
        c.rate = 1e11;
        c.duration = Duration::from_nanos(100);
        let (_tx, rx) = broadcast::channel(1);
        let result = run(c, reqwest::Client::new(), rx).await;
        assert!(matches!(result, Err(TrafficError::Invalid { field: "rate", .. })));
    }
}
