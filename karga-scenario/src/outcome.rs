use hdrhistogram::Histogram;
use karga::{Aggregate, Metric, Report};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    time::Duration,
};

/// Why a task did not succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Connection, timeout or body read error.
    Network,
    /// Non 2xx HTTP status.
    Status,
    /// The body is not JSON.
    Decode,
    /// The success predicate rejected the body, usually `rtn != 0`, or the
    /// request could not be built from the task.
    Application,
}

/// Result of a single task execution.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct TaskOutcome {
    pub task: String,
    pub success: bool,
    pub status: Option<u16>,
    pub latency: Duration,
    pub failure: Option<FailureKind>,
    pub raw_response: Option<String>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TaskOutcome {
    pub(crate) fn failed(task: &str, kind: FailureKind) -> Self {
        Self {
            task: task.to_string(),
            success: false,
            status: None,
            latency: Duration::ZERO,
            failure: Some(kind),
            raw_response: None,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }
}

impl Metric for TaskOutcome {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTally {
    pub count: u64,
    pub failures: u64,
}

#[derive(Clone)]
pub struct ScenarioAggregate {
    pub latency_hist: Histogram<u64>,
    pub status_count: HashMap<u16, u64>,
    pub failure_kinds: HashMap<FailureKind, u64>,
    pub per_task: BTreeMap<String, TaskTally>,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub count: u64,
    pub failure_count: u64,
    pub pauses: u64,
    pub paused_for: Duration,
}

impl fmt::Debug for ScenarioAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioAggregate")
            .field("latency_samples", &self.latency_hist.len())
            .field("status_count", &self.status_count)
            .field("failure_kinds", &self.failure_kinds)
            .field("per_task", &self.per_task)
            .field("total_bytes_sent", &self.total_bytes_sent)
            .field("total_bytes_received", &self.total_bytes_received)
            .field("count", &self.count)
            .field("failure_count", &self.failure_count)
            .field("pauses", &self.pauses)
            .field("paused_for", &self.paused_for)
            .finish()
    }
}

impl ScenarioAggregate {
    /// Think time is not a metric of the target, it is kept apart from `consume`.
    pub fn record_pause(&mut self, pause: Duration) {
        self.pauses += 1;
        self.paused_for += pause;
    }
}

impl Aggregate for ScenarioAggregate {
    type Metric = TaskOutcome;

    fn new() -> Self {
        Self {
            latency_hist: Histogram::new(3).expect("Create histogram"),
            status_count: HashMap::new(),
            failure_kinds: HashMap::new(),
            per_task: BTreeMap::new(),
            total_bytes_sent: 0,
            total_bytes_received: 0,
            count: 0,
            failure_count: 0,
            pauses: 0,
            paused_for: Duration::ZERO,
        }
    }

    fn consume(&mut self, metric: &Self::Metric) {
        self.count += 1;
        let tally = self.per_task.entry(metric.task.clone()).or_default();
        tally.count += 1;

        if let Some(status) = metric.status {
            *self.status_count.entry(status).or_default() += 1;
            if let Err(err) = self.latency_hist.record(metric.latency.as_nanos() as u64) {
                tracing::warn!("Ignoring latency reading due to error: {err}");
            }
        }
        self.total_bytes_sent += metric.bytes_sent;
        self.total_bytes_received += metric.bytes_received;

        if !metric.success {
            tally.failures += 1;
            self.failure_count += 1;
            let kind = metric.failure.unwrap_or(FailureKind::Application);
            *self.failure_kinds.entry(kind).or_default() += 1;
        }
    }

    fn merge(&mut self, other: Self) {
        if let Err(err) = self.latency_hist.add(&other.latency_hist) {
            tracing::warn!("Dropping latency histogram while merging: {err}");
        }

        for (status_code, other_count) in other.status_count {
            *self.status_count.entry(status_code).or_default() += other_count;
        }
        for (kind, other_count) in other.failure_kinds {
            *self.failure_kinds.entry(kind).or_default() += other_count;
        }
        for (task, other_tally) in other.per_task {
            let tally = self.per_task.entry(task).or_default();
            tally.count += other_tally.count;
            tally.failures += other_tally.failures;
        }
        self.total_bytes_sent += other.total_bytes_sent;
        self.total_bytes_received += other.total_bytes_received;
        self.failure_count += other.failure_count;
        self.count += other.count;
        self.pauses += other.pauses;
        self.paused_for += other.paused_for;
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LatencyStats {
    pub avg: Duration,
    pub min: Duration,
    pub med: Duration,
    pub max: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ScenarioReport {
    pub req_duration: LatencyStats,
    pub reqs_total: u64,
    pub req_failure_ratio: f64,
    pub status_codes: HashMap<u16, u64>,
    pub failures: HashMap<FailureKind, u64>,
    pub tasks: BTreeMap<String, TaskTally>,
    pub data_sent: u64,
    pub data_received: u64,
    pub think_time_avg: Duration,
}

impl From<ScenarioAggregate> for ScenarioReport {
    fn from(value: ScenarioAggregate) -> Self {
        let hist = &value.latency_hist;
        let at = |q: f64| Duration::from_nanos(hist.value_at_quantile(q));
        let req_duration = LatencyStats {
            avg: Duration::from_nanos(hist.mean() as u64),
            min: Duration::from_nanos(hist.min()),
            med: at(0.5),
            max: Duration::from_nanos(hist.max()),
            p90: at(0.90),
            p95: at(0.95),
            p99: at(0.99),
        };

        let req_failure_ratio = if value.count == 0 {
            0.0
        } else {
            (value.failure_count as f64 / value.count as f64) * 100.0
        };
        let think_time_avg = match u32::try_from(value.pauses) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => value.paused_for / n,
        };

        Self {
            req_duration,
            reqs_total: value.count,
            req_failure_ratio,
            status_codes: value.status_count,
            failures: value.failure_kinds,
            tasks: value.per_task,
            data_sent: value.total_bytes_sent,
            data_received: value.total_bytes_received,
            think_time_avg,
        }
    }
}

impl Report<ScenarioAggregate> for ScenarioReport {}
