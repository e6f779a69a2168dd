use prometheus::{register_int_counter_vec_with_registry, IntCounterVec as PIntCounterVec};

use super::{
    get_metric_opts, get_metrics_registry, GetHyperlightMetric, HyperlightMetric,
    HyperlightMetricOps,
};
use crate::{new_error, HyperlightError, Result};

/// A named bundle of counters, keyed by a set of label values.
#[derive(Debug)]
pub struct IntCounterVec {
    counter: PIntCounterVec,
    /// The name of the counter vec
    pub name: &'static str,
}

impl IntCounterVec {
    /// Creates a new counter vec and registers it with the metric registry
    pub fn new(name: &'static str, help: &str, labels: &[&str]) -> Result<Self> {
        let registry = get_metrics_registry();
        let opts = get_metric_opts(name, help);
        let counter = register_int_counter_vec_with_registry!(opts, labels, registry)?;
        Ok(Self { counter, name })
    }

    /// Increments the counter for the given label values by 1
    pub fn inc(&self, label_vals: &[&str]) -> Result<()> {
        self.counter.get_metric_with_label_values(label_vals)?.inc();
        Ok(())
    }

    /// Gets the value of the counter for the given label values
    pub fn get(&self, label_vals: &[&str]) -> Result<u64> {
        Ok(self.counter.get_metric_with_label_values(label_vals)?.get())
    }
}

impl<S: HyperlightMetricOps> GetHyperlightMetric<IntCounterVec> for S {
    fn metric(&self) -> Result<&IntCounterVec> {
        let metric = self.get_metric()?;
        <&HyperlightMetric as TryInto<&IntCounterVec>>::try_into(metric)
    }
}

impl<'a> TryFrom<&'a HyperlightMetric> for &'a IntCounterVec {
    type Error = HyperlightError;
    fn try_from(metric: &'a HyperlightMetric) -> Result<Self> {
        match metric {
            HyperlightMetric::IntCounterVec(counter) => Ok(counter),
            _ => Err(new_error!("metric is not a IntCounterVec")),
        }
    }
}

impl From<IntCounterVec> for HyperlightMetric {
    fn from(counter: IntCounterVec) -> Self {
        HyperlightMetric::IntCounterVec(counter)
    }
}

/// Increments an IntCounterVec by 1 for the given label values, or logs an
/// error if the metric is not found
#[macro_export]
macro_rules! int_counter_vec_inc {
    ($metric:expr, $label_vals:expr) => {{
        match $crate::metrics::GetHyperlightMetric::<$crate::metrics::IntCounterVec>::metric(
            $metric,
        ) {
            Ok(val) => {
                if let Err(e) = val.inc($label_vals) {
                    log::error!(
                        "error incrementing metric with labels {:?}: {}",
                        $label_vals,
                        e
                    )
                }
            }
            Err(e) => log::error!("error getting metric: {}", e),
        };
    }};
}
