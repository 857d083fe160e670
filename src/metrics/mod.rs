//! # Metric aggregation
//!
//! ## Responsibility
//! Accumulate the per-call measurements the traffic-splitting proxy reports
//! during one stage run, and summarise them when the stage ends.
//!
//! ## Guarantees
//! - All mutation goes through a single exclusive lock; the summary
//!   observes every sample that was acknowledged with 200
//! - [`MetricAggregator::summarize`] is idempotent between samples
//! - One aggregator instance serves exactly one stage run; no state is
//!   carried across stages
//!
//! ## NOT Responsible For
//! - Deciding when a stage ends (that belongs to `release::runner`)
//! - Evaluating success criteria (that belongs to `release::evaluate`)

pub mod server;

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Port the ingestion server binds in production. The proxy is configured
/// to POST to `AGENTHOST:9999/push`.
pub const INGEST_PORT: u16 = 9999;

/// The expected format of one incoming sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub metric_name: String,
    pub value: f64,
}

/// The expected format of the incoming JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricPayload {
    pub program: String,
    pub metrics: Vec<MetricSample>,
}

/// Mutable aggregation state, guarded by the aggregator's lock.
#[derive(Debug, Default)]
struct MetricState {
    call_count: f64,
    f1_count: f64,
    f2_count: f64,
    f1_err_count: f64,
    f2_err_count: f64,
    proxy_times: Vec<f64>,
    f1_times: Vec<f64>,
    f2_times: Vec<f64>,
    other: HashMap<String, f64>,
}

/// Per-stage metric accumulator.
///
/// Created at stage start, fed by the ingestion handler, frozen at stage
/// end and summarised.
#[derive(Debug)]
pub struct MetricAggregator {
    /// Program tag the proxy reports under, e.g. `test-sieve`.
    pub program: String,
    /// Stage this aggregator belongs to.
    pub stage_name: String,
    state: Mutex<MetricState>,
}

/// Consistent snapshot for the observation loop's 1 Hz tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Total calls the proxy has reported so far.
    pub call_count: f64,
    /// Most recently reported proxy processing time, if any.
    pub last_proxy_time: Option<f64>,
}

impl MetricAggregator {
    pub fn new(program: impl Into<String>, stage_name: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            stage_name: stage_name.into(),
            state: Mutex::new(MetricState::default()),
        }
    }

    /// Apply one payload of samples under the lock.
    ///
    /// Dispatch by metric name; unrecognised names overwrite an entry in
    /// the `other` map so nothing the proxy sends is silently lost.
    pub fn apply(&self, payload: &MetricPayload) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for sample in &payload.metrics {
            match sample.metric_name.as_str() {
                "call_count" => state.call_count += sample.value,
                "f1_count" => state.f1_count += sample.value,
                "f2_count" => state.f2_count += sample.value,
                "proxy_time" => state.proxy_times.push(sample.value),
                "f1_time" => state.f1_times.push(sample.value),
                "f2_time" => state.f2_times.push(sample.value),
                "f1_error_count" => {
                    state.f1_err_count += sample.value;
                    error!("proxy reported error calling f1");
                }
                "f2_error_count" => {
                    state.f2_err_count += sample.value;
                    error!("proxy reported error calling f2");
                }
                other => {
                    state.other.insert(other.to_string(), sample.value);
                    warn!(metric = other, "unknown metric name, stored in 'other'");
                }
            }
        }
    }

    /// Take a consistent snapshot of the fields the observation loop polls.
    pub fn observation(&self) -> Observation {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Observation {
            call_count: state.call_count,
            last_proxy_time: state.proxy_times.last().copied(),
        }
    }

    /// Error counters for the baseline version: `(errors, calls)`.
    pub fn f1_errors(&self) -> (f64, f64) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        (state.f1_err_count, state.f1_count)
    }

    /// Summarise the accumulated samples into a [`ResultSummary`].
    ///
    /// Empty sample vectors summarise to `{-1, -1, -1}`; a zero call count
    /// yields a zero error rate. Status is left at `Pending` for the caller
    /// to post-process.
    pub fn summarize(&self) -> ResultSummary {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let f1_err_rate = if state.f1_count > 0.0 {
            state.f1_err_count / state.f1_count
        } else {
            0.0
        };
        let f2_err_rate = if state.f2_count > 0.0 {
            state.f2_err_count / state.f2_count
        } else {
            0.0
        };
        if state.f1_count + state.f2_count < 1.0 {
            warn!("no calls were made to f1 or f2; summarising regardless");
        }

        ResultSummary {
            stage_name: self.stage_name.clone(),
            proxy_times: summarize_samples(&state.proxy_times),
            f1_times_summary: summarize_samples(&state.f1_times),
            f2_times_summary: summarize_samples(&state.f2_times),
            f1_err_rate,
            f2_err_rate,
            status: StageStatus::Pending,
        }
    }

    /// Human-readable digest printed at stage end.
    pub fn summary_text(&self) -> String {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut msg = format!("f1 errors: {}/{}", state.f1_err_count, state.f1_count);
        msg.push_str(&format!(
            "\nf2 errors: {}/{}",
            state.f2_err_count, state.f2_count
        ));
        msg.push_str(&format!(
            "\nTotal calls (f1:f2): {} ({}:{})\n",
            state.call_count, state.f1_count, state.f2_count
        ));
        let proxy = summarize_samples(&state.proxy_times);
        if state.proxy_times.is_empty() {
            msg.push_str("ProxyTimes - No data available\n");
        } else {
            msg.push_str(&format!(
                "ProxyTimes - Med: {}, Min: {}, Max: {}\n",
                proxy.median, proxy.minimum, proxy.maximum
            ));
        }
        msg
    }
}

/// Min, max, and order-statistic median of a sample vector.
///
/// An empty vector summarises to all `-1`; an even-length vector's median
/// is the mean of the two middle elements.
fn summarize_samples(samples: &[f64]) -> TimeSummary {
    if samples.is_empty() {
        return TimeSummary {
            median: -1.0,
            minimum: -1.0,
            maximum: -1.0,
        };
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    };

    TimeSummary {
        median,
        minimum: sorted[0],
        maximum: sorted[n - 1],
    }
}

/// `{median, minimum, maximum}` of one sample vector; all `-1` when the
/// vector was empty.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeSummary {
    pub median: f64,
    pub minimum: f64,
    pub maximum: f64,
}

/// Stage lifecycle status, reported upstream with each summary.
///
/// Serialised as its integer discriminant; the parent protocol counts on
/// the numeric values staying stable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StageStatus {
    #[default]
    Pending = 0,
    /// The stage is running and the parent has been notified.
    InProgress = 1,
    /// WaitForSignal only: conditions were met and the agent is holding
    /// for the parent's end signal.
    SuccessWaiting = 2,
    /// WaitForSignal only: the parent has asked the stage to finish.
    ShouldEnd = 3,
    Completed = 4,
    Failure = 5,
    Error = 6,
}

impl StageStatus {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::InProgress),
            2 => Some(Self::SuccessWaiting),
            3 => Some(Self::ShouldEnd),
            4 => Some(Self::Completed),
            5 => Some(Self::Failure),
            6 => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::SuccessWaiting => "SuccessWaiting",
            Self::ShouldEnd => "ShouldEnd",
            Self::Completed => "Completed",
            Self::Failure => "Failure",
            Self::Error => "Error",
        };
        f.write_str(label)
    }
}

impl Serialize for StageStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for StageStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        Self::from_u8(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown stage status {value}")))
    }
}

/// Per-stage result reported to the parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultSummary {
    pub stage_name: String,
    pub proxy_times: TimeSummary,
    pub f1_times_summary: TimeSummary,
    pub f2_times_summary: TimeSummary,
    pub f1_err_rate: f64,
    pub f2_err_rate: f64,
    pub status: StageStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(samples: &[(&str, f64)]) -> MetricPayload {
        MetricPayload {
            program: "test-sieve".into(),
            metrics: samples
                .iter()
                .map(|(name, value)| MetricSample {
                    metric_name: name.to_string(),
                    value: *value,
                })
                .collect(),
        }
    }

    #[test]
    fn test_apply_dispatches_by_metric_name() {
        let agg = MetricAggregator::new("test-sieve", "canary");
        agg.apply(&payload(&[
            ("call_count", 1.0),
            ("f1_count", 1.0),
            ("f1_time", 90.0),
            ("proxy_time", 95.0),
        ]));
        agg.apply(&payload(&[
            ("call_count", 1.0),
            ("f2_count", 1.0),
            ("f2_time", 80.0),
            ("f2_error_count", 1.0),
            ("proxy_time", 85.0),
        ]));

        let obs = agg.observation();
        assert_eq!(obs.call_count, 2.0);
        assert_eq!(obs.last_proxy_time, Some(85.0));

        let summary = agg.summarize();
        assert_eq!(summary.f1_times_summary.median, 90.0);
        assert_eq!(summary.f2_times_summary.median, 80.0);
        assert_eq!(summary.f2_err_rate, 1.0);
        assert_eq!(summary.f1_err_rate, 0.0);
    }

    #[test]
    fn test_apply_stores_unknown_metric_in_other() {
        let agg = MetricAggregator::new("p", "s");
        agg.apply(&payload(&[("cold_start_time", 120.0)]));
        agg.apply(&payload(&[("cold_start_time", 80.0)]));
        // Overwrite semantics: the latest value wins. Known counters are
        // unaffected.
        let state = agg.state.lock().expect("test: lock");
        assert_eq!(state.other.get("cold_start_time"), Some(&80.0));
        assert_eq!(state.call_count, 0.0);
    }

    #[test]
    fn test_observation_on_empty_aggregator() {
        let agg = MetricAggregator::new("p", "s");
        let obs = agg.observation();
        assert_eq!(obs.call_count, 0.0);
        assert_eq!(obs.last_proxy_time, None);
    }

    #[test]
    fn test_summarize_empty_vectors_yield_minus_one() {
        let agg = MetricAggregator::new("p", "s");
        let summary = agg.summarize();
        for ts in [
            summary.proxy_times,
            summary.f1_times_summary,
            summary.f2_times_summary,
        ] {
            assert_eq!(ts.median, -1.0);
            assert_eq!(ts.minimum, -1.0);
            assert_eq!(ts.maximum, -1.0);
        }
        assert_eq!(summary.f1_err_rate, 0.0);
        assert_eq!(summary.f2_err_rate, 0.0);
    }

    #[test]
    fn test_summarize_single_sample_collapses_to_that_value() {
        let agg = MetricAggregator::new("p", "s");
        agg.apply(&payload(&[("proxy_time", 42.0)]));
        let ts = agg.summarize().proxy_times;
        assert_eq!((ts.median, ts.minimum, ts.maximum), (42.0, 42.0, 42.0));
    }

    #[test]
    fn test_summarize_even_count_median_averages_middle_pair() {
        let agg = MetricAggregator::new("p", "s");
        for value in [10.0, 30.0, 20.0, 40.0] {
            agg.apply(&payload(&[("f2_time", value)]));
        }
        let ts = agg.summarize().f2_times_summary;
        assert_eq!(ts.median, 25.0);
        assert_eq!(ts.minimum, 10.0);
        assert_eq!(ts.maximum, 40.0);
    }

    #[test]
    fn test_summarize_median_within_min_max() {
        let agg = MetricAggregator::new("p", "s");
        for value in [5.0, 1.0, 9.0, 7.0, 3.0] {
            agg.apply(&payload(&[("proxy_time", value)]));
        }
        let ts = agg.summarize().proxy_times;
        assert!(ts.minimum <= ts.median && ts.median <= ts.maximum);
        assert_eq!(ts.median, 5.0);
    }

    #[test]
    fn test_summarize_is_idempotent() {
        let agg = MetricAggregator::new("p", "s");
        agg.apply(&payload(&[
            ("f2_count", 2.0),
            ("f2_error_count", 1.0),
            ("f2_time", 100.0),
            ("f2_time", 200.0),
        ]));
        let first = agg.summarize();
        let second = agg.summarize();
        assert_eq!(first, second);
    }

    #[test]
    fn test_error_rate_zero_denominator_yields_zero() {
        let agg = MetricAggregator::new("p", "s");
        // Error counts without call counts; the proxy should not produce
        // this, but the summary must not divide by zero.
        agg.apply(&payload(&[("f2_error_count", 3.0)]));
        assert_eq!(agg.summarize().f2_err_rate, 0.0);
    }

    #[test]
    fn test_stage_status_serializes_as_integer() {
        let json = serde_json::to_string(&StageStatus::SuccessWaiting).expect("test: serialize");
        assert_eq!(json, "2");
        let json = serde_json::to_string(&StageStatus::Error).expect("test: serialize");
        assert_eq!(json, "6");
    }

    #[test]
    fn test_stage_status_deserializes_from_integer() {
        let status: StageStatus = serde_json::from_str("4").expect("test: deserialize");
        assert_eq!(status, StageStatus::Completed);
        assert!(serde_json::from_str::<StageStatus>("9").is_err());
    }

    #[test]
    fn test_result_summary_wire_format() {
        let agg = MetricAggregator::new("test-sieve", "canary");
        agg.apply(&payload(&[("proxy_time", 10.0)]));
        let mut summary = agg.summarize();
        summary.status = StageStatus::Completed;

        let json = serde_json::to_value(&summary).expect("test: serialize");
        assert_eq!(json["stage_name"], "canary");
        assert_eq!(json["status"], 4);
        assert_eq!(json["proxy_times"]["median"], 10.0);
        assert!(json.get("f1_times_summary").is_some());
        assert!(json.get("f2_err_rate").is_some());
    }

    #[test]
    fn test_summary_text_mentions_counts() {
        let agg = MetricAggregator::new("p", "s");
        agg.apply(&payload(&[
            ("call_count", 2.0),
            ("f1_count", 1.0),
            ("f2_count", 1.0),
        ]));
        let text = agg.summary_text();
        assert!(text.contains("Total calls"));
        assert!(text.contains("No data available"));
    }
}
