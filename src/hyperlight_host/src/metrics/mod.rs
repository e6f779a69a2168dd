/// A named bundle of histograms, keyed by a set of label values.
pub(crate) mod histogram_vec;
/// A single named counter.
pub(crate) mod int_counter;
/// A named bundle of counters, keyed by a set of label values.
pub(crate) mod int_counter_vec;

use std::collections::HashMap;

pub(crate) use histogram_vec::HistogramVec;
pub(crate) use int_counter::IntCounter;
pub(crate) use int_counter_vec::IntCounterVec;
use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, Opts, Registry};
use strum::IntoEnumIterator;

use crate::{new_error, Result};

static METRICS_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// The registry every metric in this crate is registered with. Exposed so
/// callers can scrape it (e.g. via a Prometheus exporter) if they choose.
pub fn get_metrics_registry() -> &'static Registry {
    &METRICS_REGISTRY
}

fn get_metric_opts(name: &'static str, help: &str) -> Opts {
    Opts::new(name, help)
}

fn get_histogram_opts(name: &'static str, help: &str, buckets: Vec<f64>) -> HistogramOpts {
    HistogramOpts::new(name, help).buckets(buckets)
}

/// A single metric instance, owned by the registry returned from
/// [`get_metrics_registry`].
#[derive(Debug)]
pub(crate) enum HyperlightMetric {
    IntCounter(IntCounter),
    IntCounterVec(IntCounterVec),
    HistogramVec(HistogramVec),
}

/// Implemented by types that can be looked up as a [`HyperlightMetric`] in
/// the registry, such as [`SandboxMetric`].
pub(crate) trait HyperlightMetricOps {
    fn get_metric(&self) -> Result<&HyperlightMetric>;
}

/// Narrows a [`HyperlightMetric`] lookup to one specific metric kind `T`.
pub(crate) trait GetHyperlightMetric<T> {
    fn metric(&self) -> Result<&T>;
}

const CALL_DURATION_BUCKETS_US: &[f64] = &[
    10.0, 50.0, 100.0, 500.0, 1_000.0, 5_000.0, 10_000.0, 50_000.0, 100_000.0, 500_000.0,
];

/// The catalogue of metrics this crate records, gated behind the
/// `function_call_metrics` feature. Each variant is registered with the
/// global registry the first time it is looked up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum::EnumIter)]
pub(crate) enum SandboxMetric {
    /// Wall-clock time to dispatch one guest function call, labelled by
    /// function name.
    GuestFunctionCallDurationMicroseconds,
    /// Wall-clock time to service one host function call made from the
    /// guest, labelled by function name.
    HostFunctionCallsDurationMicroseconds,
    /// Count of guest errors surfaced from the guest error buffer, labelled
    /// by error code and message.
    GuestErrorCount,
}

impl SandboxMetric {
    fn register(&self) -> Result<HyperlightMetric> {
        match self {
            SandboxMetric::GuestFunctionCallDurationMicroseconds => Ok(HistogramVec::new(
                "hyperlight_guest_function_call_duration_microseconds",
                "Time taken to dispatch a guest function call, in microseconds",
                &["function_name"],
                CALL_DURATION_BUCKETS_US.to_vec(),
            )?
            .into()),
            SandboxMetric::HostFunctionCallsDurationMicroseconds => Ok(HistogramVec::new(
                "hyperlight_host_function_call_duration_microseconds",
                "Time taken to service a host function call from the guest, in microseconds",
                &["function_name"],
                CALL_DURATION_BUCKETS_US.to_vec(),
            )?
            .into()),
            SandboxMetric::GuestErrorCount => Ok(IntCounterVec::new(
                "hyperlight_guest_error_count",
                "Count of guest errors, by error code and message",
                &["code", "message"],
            )?
            .into()),
        }
    }
}

static METRICS: Lazy<HashMap<SandboxMetric, HyperlightMetric>> = Lazy::new(|| {
    SandboxMetric::iter()
        .filter_map(|metric| match metric.register() {
            Ok(registered) => Some((metric, registered)),
            Err(e) => {
                log::error!("failed to register metric {:?}: {}", metric, e);
                None
            }
        })
        .collect()
});

impl HyperlightMetricOps for SandboxMetric {
    fn get_metric(&self) -> Result<&HyperlightMetric> {
        METRICS
            .get(self)
            .ok_or_else(|| new_error!("metric {:?} was not registered", self))
    }
}
