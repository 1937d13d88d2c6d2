//! In-process telemetry aggregation
//!
//! Recording never fails and never blocks on I/O; all state sits behind one
//! short-lived lock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use action_locator::{ProbeSample, ResolutionFailure, ResolutionObserver};
use autobot_core_types::{FailureKind, SnapshotId};
use chrono::Utc;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::export::{
    ActionTelemetry, FailureSnapshot, ProbeTelemetry, ResolutionFailureCount, SelectorTelemetry,
    TelemetrySnapshot,
};

const EXCERPT_LIMIT: usize = 600;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Failure snapshots captured per run before truncation kicks in.
    pub snapshot_cap: usize,
    /// Snapshots kept in memory across runs.
    pub retained_snapshots: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            snapshot_cap: 20,
            retained_snapshots: 200,
        }
    }
}

/// Failure context handed to [`TelemetryCollector::record`].
#[derive(Clone, Debug, Default)]
pub struct FailureDetail {
    pub cause: String,
    pub target: Option<String>,
    pub excerpt: Option<String>,
    pub capture_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub enum Outcome {
    Success,
    Failure {
        kind: FailureKind,
        detail: FailureDetail,
    },
}

impl Outcome {
    pub fn failure(kind: FailureKind, cause: impl Into<String>) -> Self {
        Outcome::Failure {
            kind,
            detail: FailureDetail {
                cause: cause.into(),
                ..FailureDetail::default()
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

type ActionKey = (String, String);

struct ActionStats {
    successes: u64,
    failures: u64,
    histogram: Option<Histogram<u64>>,
    sum_ms: u128,
    last_failure: Option<FailureKind>,
}

impl ActionStats {
    fn new() -> Self {
        Self {
            successes: 0,
            failures: 0,
            histogram: Histogram::<u64>::new(3).ok(),
            sum_ms: 0,
            last_failure: None,
        }
    }
}

#[derive(Default)]
struct Counter {
    ok: u64,
    failed: u64,
}

#[derive(Default)]
struct Inner {
    actions: BTreeMap<ActionKey, ActionStats>,
    selectors: BTreeMap<(String, String, String), Counter>,
    probes: BTreeMap<(String, String, String, String), Counter>,
    exhausted: BTreeMap<(String, String, String), u64>,
    last_tried: BTreeMap<ActionKey, Vec<String>>,
    snapshots: VecDeque<FailureSnapshot>,
    run_snapshots: HashMap<String, usize>,
    truncated: u64,
    evicted: u64,
}

pub struct TelemetryCollector {
    inner: Mutex<Inner>,
    config: TelemetryConfig,
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(TelemetryConfig::default())
    }
}

impl TelemetryCollector {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
        }
    }

    /// Open a fresh snapshot budget for `run`. Aggregates are kept.
    pub fn begin_run(&self, run: &str) {
        self.inner.lock().run_snapshots.insert(run.to_string(), 0);
    }

    /// Release the budget of a finished run.
    pub fn end_run(&self, run: &str) {
        self.inner.lock().run_snapshots.remove(run);
    }

    /// Record one dispatch attempt made by `run`. Returns the snapshot id
    /// when a failure snapshot was captured.
    pub fn record(
        &self,
        run: &str,
        adapter: &str,
        action: &str,
        outcome: &Outcome,
        duration: Duration,
        selector_used: Option<&str>,
    ) -> Option<SnapshotId> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let key = (adapter.to_string(), action.to_string());
        let mut inner = self.inner.lock();

        let stats = inner
            .actions
            .entry(key.clone())
            .or_insert_with(ActionStats::new);
        if let Some(histogram) = stats.histogram.as_mut() {
            if let Err(err) = histogram.record(millis) {
                debug!("duration sample dropped: {}", err);
            }
        }
        stats.sum_ms += u128::from(millis);

        let failure = match outcome {
            Outcome::Success => {
                stats.successes += 1;
                None
            }
            Outcome::Failure { kind, detail } => {
                stats.failures += 1;
                stats.last_failure = Some(*kind);
                Some((*kind, detail))
            }
        };

        if let Some(selector) = selector_used {
            let counter = inner
                .selectors
                .entry((key.0.clone(), key.1.clone(), selector.to_string()))
                .or_default();
            if failure.is_some() {
                counter.failed += 1;
            } else {
                counter.ok += 1;
            }
        }

        let (kind, detail) = failure?;
        let taken = inner.run_snapshots.get(run).copied().unwrap_or(0);
        if taken >= self.config.snapshot_cap {
            inner.truncated += 1;
            warn!(
                run,
                adapter,
                action,
                truncated = inner.truncated,
                "failure snapshot cap reached, snapshot dropped"
            );
            return None;
        }

        let tried_locators = if kind == FailureKind::SelectorNotFound {
            inner.last_tried.remove(&key).unwrap_or_default()
        } else {
            Vec::new()
        };
        let snapshot = FailureSnapshot {
            id: SnapshotId::new(),
            adapter: key.0,
            action: key.1,
            kind,
            cause: detail.cause.clone(),
            target: detail.target.clone(),
            excerpt: detail
                .excerpt
                .as_ref()
                .map(|text| text.chars().take(EXCERPT_LIMIT).collect()),
            capture_path: detail.capture_path.clone(),
            tried_locators,
            recorded_at: Utc::now(),
        };
        let id = snapshot.id.clone();
        *inner.run_snapshots.entry(run.to_string()).or_insert(0) += 1;
        inner.snapshots.push_back(snapshot);
        while inner.snapshots.len() > self.config.retained_snapshots {
            inner.snapshots.pop_front();
            inner.evicted += 1;
        }
        Some(id)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let inner = self.inner.lock();

        let actions = inner
            .actions
            .iter()
            .map(|((adapter, action), stats)| {
                let samples = stats.successes + stats.failures;
                let (p50, p90, max) = stats
                    .histogram
                    .as_ref()
                    .filter(|h| !h.is_empty())
                    .map(|h| (h.value_at_quantile(0.5), h.value_at_quantile(0.9), h.max()))
                    .unwrap_or((0, 0, 0));
                ActionTelemetry {
                    adapter: adapter.clone(),
                    action: action.clone(),
                    successes: stats.successes,
                    failures: stats.failures,
                    samples,
                    mean_ms: if samples == 0 {
                        0.0
                    } else {
                        stats.sum_ms as f64 / samples as f64
                    },
                    p50_ms: p50,
                    p90_ms: p90,
                    max_ms: max,
                    last_failure: stats.last_failure,
                }
            })
            .collect();

        let selectors = inner
            .selectors
            .iter()
            .map(|((adapter, action, selector), counter)| SelectorTelemetry {
                adapter: adapter.clone(),
                action: action.clone(),
                selector: selector.clone(),
                successes: counter.ok,
                failures: counter.failed,
            })
            .collect();

        let probes = inner
            .probes
            .iter()
            .map(|((adapter, action, logical, locator), counter)| ProbeTelemetry {
                adapter: adapter.clone(),
                action: action.clone(),
                logical_name: logical.clone(),
                locator: locator.clone(),
                matched: counter.ok,
                missed: counter.failed,
            })
            .collect();

        let resolution_failures = inner
            .exhausted
            .iter()
            .map(|((adapter, action, logical), count)| ResolutionFailureCount {
                adapter: adapter.clone(),
                action: action.clone(),
                logical_name: logical.clone(),
                count: *count,
            })
            .collect();

        TelemetrySnapshot {
            actions,
            selectors,
            probes,
            resolution_failures,
            failures: inner.snapshots.iter().cloned().collect(),
            truncated_snapshots: inner.truncated,
            evicted_snapshots: inner.evicted,
            generated_at: Some(Utc::now()),
        }
    }

    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
    }
}

impl ResolutionObserver for TelemetryCollector {
    fn on_probe(&self, sample: &ProbeSample) {
        let mut inner = self.inner.lock();
        let counter = inner
            .probes
            .entry((
                sample.adapter.clone(),
                sample.action.clone(),
                sample.logical_name.clone(),
                sample.locator.clone(),
            ))
            .or_default();
        if sample.matched {
            counter.ok += 1;
        } else {
            counter.failed += 1;
        }
    }

    fn on_exhausted(&self, failure: &ResolutionFailure) {
        let mut inner = self.inner.lock();
        *inner
            .exhausted
            .entry((
                failure.adapter.clone(),
                failure.action.clone(),
                failure.logical_name.clone(),
            ))
            .or_insert(0) += 1;
        inner.last_tried.insert(
            (failure.adapter.clone(), failure.action.clone()),
            failure.tried.clone(),
        );
    }
}
