//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Create an isolated Prometheus registry per service
//! - Hand out a factory for service-specific counters, gauges and histograms
//! - Render the registry in the Prometheus text exposition format
//!
//! # Metrics
//! - `http_request_duration_seconds` (histogram): request latency by status, method, route
//! - `http_request_summary_seconds` (summary): same observations, as quantiles
//! - process and runtime gauges when default collectors are enabled
//!
//! # Design Decisions
//! - The recorder is never installed globally; handles are registered
//!   directly against it, so two services in one process never collide
//! - A metric name can be registered once per registry; a second attempt
//!   is an error (or a panic, for the non-`try_` constructors)
//! - Histograms without configured buckets are rendered as summaries
//! - Histogram samples are buffered until the next upkeep; a serving
//!   service runs [`MetricsRegistry::run_upkeep`] every [`UPKEEP_INTERVAL`]
//!   so memory stays bounded when nothing scrapes

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Label, Level, Metadata, Recorder, SharedString,
};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};

use crate::observability::collectors::{Collector, ProcessCollector, RuntimeCollector};

/// Request latency histogram name.
pub const REQUEST_DURATION_HISTOGRAM: &str = "http_request_duration_seconds";

/// Request latency summary name.
pub const REQUEST_DURATION_SUMMARY: &str = "http_request_summary_seconds";

/// Bucket boundaries of the request latency histogram, in seconds.
pub const REQUEST_DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.5, 1.0, 3.0, 5.0, 10.0];

/// Quantiles reported by every summary.
pub const SUMMARY_QUANTILES: &[f64] = &[0.5, 0.9, 0.95, 0.99];

/// Interval of the background upkeep while a service is serving.
pub const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Error type for metrics setup and registration.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metric `{0}` is already registered")]
    AlreadyRegistered(String),
    #[error("failed to build metrics recorder: {0}")]
    Build(#[from] BuildError),
}

/// Capability for services that expose their own metrics.
///
/// Called once, while the service is constructed, with the factory bound to
/// the service's isolated registry.
pub trait MetricsRegistrar: Send + Sync {
    fn register(&self, factory: &MetricsFactory);
}

struct Inner {
    recorder: PrometheusRecorder,
    names: Mutex<HashSet<String>>,
    collectors: Mutex<Vec<Box<dyn Collector>>>,
}

impl Inner {
    fn claim(&self, name: &str) -> Result<(), MetricsError> {
        let mut names = self.names.lock().expect("metrics registry mutex poisoned");
        if !names.insert(name.to_string()) {
            return Err(MetricsError::AlreadyRegistered(name.to_string()));
        }
        Ok(())
    }
}

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

/// Isolated metrics registry owned by one service.
#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Arc<Inner>,
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    fn new() -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(REQUEST_DURATION_HISTOGRAM.to_string()),
                REQUEST_DURATION_BUCKETS,
            )?
            .set_quantiles(SUMMARY_QUANTILES)?
            .build_recorder();
        let handle = recorder.handle();

        Ok(Self {
            inner: Arc::new(Inner {
                recorder,
                names: Mutex::new(HashSet::new()),
                collectors: Mutex::new(Vec::new()),
            }),
            handle,
        })
    }

    /// Factory bound to this registry.
    pub fn factory(&self) -> MetricsFactory {
        MetricsFactory {
            inner: self.inner.clone(),
        }
    }

    /// Attach a collector refreshed before every render.
    pub fn attach(&self, collector: Box<dyn Collector>) {
        self.inner
            .collectors
            .lock()
            .expect("metrics registry mutex poisoned")
            .push(collector);
    }

    /// Whether `name` is registered in this registry.
    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .names
            .lock()
            .expect("metrics registry mutex poisoned")
            .contains(name)
    }

    /// Fold buffered histogram samples into their distributions.
    ///
    /// Rendering does the same; this covers registries nobody scrapes.
    pub fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        for collector in self
            .inner
            .collectors
            .lock()
            .expect("metrics registry mutex poisoned")
            .iter()
        {
            collector.collect();
        }
        self.handle.render()
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

/// Creates metrics inside one isolated registry.
#[derive(Clone)]
pub struct MetricsFactory {
    inner: Arc<Inner>,
}

impl MetricsFactory {
    fn describe(&self, name: &str, help: &str, kind: Kind) {
        let key = KeyName::from(name.to_string());
        let help = SharedString::from(help.to_string());
        let recorder = &self.inner.recorder;
        match kind {
            Kind::Counter => recorder.describe_counter(key, None, help),
            Kind::Gauge => recorder.describe_gauge(key, None, help),
            Kind::Histogram => recorder.describe_histogram(key, None, help),
        }
    }

    fn claim(&self, name: &str, help: &str, kind: Kind) -> Result<(), MetricsError> {
        self.inner.claim(name)?;
        if !help.is_empty() {
            self.describe(name, help, kind);
        }
        Ok(())
    }

    pub fn try_counter(&self, name: &str, help: &str) -> Result<Counter, MetricsError> {
        self.claim(name, help, Kind::Counter)?;
        Ok(self
            .inner
            .recorder
            .register_counter(&Key::from_name(name.to_string()), &metadata()))
    }

    pub fn try_gauge(&self, name: &str, help: &str) -> Result<Gauge, MetricsError> {
        self.claim(name, help, Kind::Gauge)?;
        Ok(self
            .inner
            .recorder
            .register_gauge(&Key::from_name(name.to_string()), &metadata()))
    }

    pub fn try_histogram(&self, name: &str, help: &str) -> Result<Histogram, MetricsError> {
        self.claim(name, help, Kind::Histogram)?;
        Ok(self
            .inner
            .recorder
            .register_histogram(&Key::from_name(name.to_string()), &metadata()))
    }

    pub fn try_counter_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<CounterVec, MetricsError> {
        self.claim(name, help, Kind::Counter)?;
        Ok(CounterVec {
            family: self.family(name, labels),
        })
    }

    pub fn try_histogram_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<HistogramVec, MetricsError> {
        self.claim(name, help, Kind::Histogram)?;
        Ok(HistogramVec {
            family: self.family(name, labels),
        })
    }

    /// Register a counter.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered in this registry.
    pub fn counter(&self, name: &str, help: &str) -> Counter {
        self.try_counter(name, help).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Register a gauge.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered in this registry.
    pub fn gauge(&self, name: &str, help: &str) -> Gauge {
        self.try_gauge(name, help).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Register a histogram.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered in this registry.
    pub fn histogram(&self, name: &str, help: &str) -> Histogram {
        self.try_histogram(name, help).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Register a labeled counter family.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered in this registry.
    pub fn counter_vec(&self, name: &str, help: &str, labels: &[&str]) -> CounterVec {
        self.try_counter_vec(name, help, labels)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Register a labeled histogram family.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered in this registry.
    pub fn histogram_vec(&self, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
        self.try_histogram_vec(name, help, labels)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    fn family(&self, name: &str, labels: &[&str]) -> Family {
        Family {
            name: name.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            inner: self.inner.clone(),
        }
    }
}

impl std::fmt::Debug for MetricsFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsFactory").finish_non_exhaustive()
    }
}

#[derive(Clone, Copy)]
enum Kind {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Clone)]
struct Family {
    name: String,
    labels: Vec<String>,
    inner: Arc<Inner>,
}

impl Family {
    fn key(&self, values: &[&str]) -> Key {
        assert_eq!(
            values.len(),
            self.labels.len(),
            "metric `{}` expects {} label values",
            self.name,
            self.labels.len()
        );
        let labels: Vec<Label> = self
            .labels
            .iter()
            .zip(values)
            .map(|(key, value)| Label::new(key.clone(), value.to_string()))
            .collect();
        Key::from_parts(self.name.clone(), labels)
    }
}

/// Counter family keyed by label values.
#[derive(Clone)]
pub struct CounterVec {
    family: Family,
}

impl CounterVec {
    /// Counter for the given label values, in declaration order.
    ///
    /// # Panics
    ///
    /// Panics if the number of values does not match the declared labels.
    pub fn with_label_values(&self, values: &[&str]) -> Counter {
        self.family
            .inner
            .recorder
            .register_counter(&self.family.key(values), &metadata())
    }
}

/// Histogram family keyed by label values.
#[derive(Clone)]
pub struct HistogramVec {
    family: Family,
}

impl HistogramVec {
    /// Histogram for the given label values, in declaration order.
    ///
    /// # Panics
    ///
    /// Panics if the number of values does not match the declared labels.
    pub fn with_label_values(&self, values: &[&str]) -> Histogram {
        self.family
            .inner
            .recorder
            .register_histogram(&self.family.key(values), &metadata())
    }
}

/// Create an isolated registry and the factory bound to it.
///
/// With `enable_default_collectors`, process and runtime gauges are
/// registered and refreshed on every render.
pub fn initialize_metrics(
    enable_default_collectors: bool,
) -> Result<(MetricsRegistry, MetricsFactory), MetricsError> {
    let registry = MetricsRegistry::new()?;
    let factory = registry.factory();

    if enable_default_collectors {
        registry.attach(Box::new(ProcessCollector::register(&factory)?));
        registry.attach(Box::new(RuntimeCollector::register(&factory)?));
    }

    Ok((registry, factory))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_line<'a>(rendered: &'a str, prefix: &str, fragments: &[&str]) -> Option<&'a str> {
        rendered
            .lines()
            .find(|line| line.starts_with(prefix) && fragments.iter().all(|f| line.contains(f)))
    }

    #[test]
    fn test_factory_without_default_collectors() {
        let (registry, factory) = initialize_metrics(false).unwrap();
        assert!(!registry.contains("process_resident_memory_bytes"));

        // Free to take the name since no collector claimed it.
        let counter = factory.counter("process_resident_memory_bytes", "");
        counter.increment(1);
        assert!(registry.contains("process_resident_memory_bytes"));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_default_collectors_claim_names() {
        let (_registry, factory) = initialize_metrics(true).unwrap();
        factory.counter("process_resident_memory_bytes", "");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let (_registry, factory) = initialize_metrics(false).unwrap();
        factory.try_counter("greetings_total", "greetings").unwrap();

        let err = factory.try_counter("greetings_total", "again").unwrap_err();
        assert!(matches!(err, MetricsError::AlreadyRegistered(name) if name == "greetings_total"));

        // Kind does not matter: the name is taken.
        assert!(factory.try_gauge("greetings_total", "").is_err());
    }

    #[test]
    fn test_distinct_registries_do_not_conflict() {
        let (first, first_factory) = initialize_metrics(true).unwrap();
        let (second, second_factory) = initialize_metrics(true).unwrap();

        first_factory.counter("jobs_total", "jobs").increment(3);
        second_factory.counter("jobs_total", "jobs").increment(5);

        assert!(first.render().contains("jobs_total 3"));
        assert!(second.render().contains("jobs_total 5"));
    }

    #[test]
    fn test_histogram_vec_renders_buckets() {
        let (registry, factory) = initialize_metrics(false).unwrap();
        let histogram = factory.histogram_vec(
            REQUEST_DURATION_HISTOGRAM,
            "request duration in seconds",
            &["status", "method", "route"],
        );
        histogram
            .with_label_values(&["200", "GET", "/greetings"])
            .record(0.07);

        let rendered = registry.render();
        assert!(rendered.contains("# HELP http_request_duration_seconds request duration in seconds"));
        assert!(rendered.contains("http_request_duration_seconds_bucket"));
        let count = count_line(
            &rendered,
            "http_request_duration_seconds_count{",
            &["status=\"200\"", "method=\"GET\"", "route=\"/greetings\""],
        )
        .expect("count line rendered");
        assert!(count.ends_with(" 1"));
    }

    #[test]
    fn test_histogram_without_buckets_renders_summary() {
        let (registry, factory) = initialize_metrics(false).unwrap();
        let summary = factory.histogram_vec(REQUEST_DURATION_SUMMARY, "", &["route"]);
        summary.with_label_values(&["/"]).record(0.2);

        let rendered = registry.render();
        assert!(count_line(
            &rendered,
            "http_request_summary_seconds{",
            &["quantile=\"0.99\""]
        )
        .is_some());
        assert!(!rendered.contains("http_request_summary_seconds_bucket"));
    }

    #[test]
    #[should_panic(expected = "expects 2 label values")]
    fn test_label_arity_is_checked() {
        let (_registry, factory) = initialize_metrics(false).unwrap();
        let counter = factory.counter_vec("calls_total", "", &["a", "b"]);
        counter.with_label_values(&["only-one"]);
    }

    #[test]
    fn test_upkeep_keeps_counts_without_render() {
        let (registry, factory) = initialize_metrics(false).unwrap();
        let names = ["status", "method", "route"];
        let labels = ["200", "GET", "/"];
        let histogram = factory.histogram_vec(REQUEST_DURATION_HISTOGRAM, "", &names);
        let summary = factory.histogram_vec(REQUEST_DURATION_SUMMARY, "", &names);

        for _ in 0..1000 {
            histogram.with_label_values(&labels).record(0.07);
            summary.with_label_values(&labels).record(0.07);
        }
        registry.run_upkeep();
        registry.run_upkeep();
        for _ in 0..500 {
            histogram.with_label_values(&labels).record(2.0);
            summary.with_label_values(&labels).record(2.0);
        }
        registry.run_upkeep();

        let rendered = registry.render();
        let histogram_count = count_line(&rendered, "http_request_duration_seconds_count{", &[])
            .expect("histogram count rendered");
        assert!(histogram_count.ends_with(" 1500"));
        let summary_count = count_line(&rendered, "http_request_summary_seconds_count{", &[])
            .expect("summary count rendered");
        assert!(summary_count.ends_with(" 1500"));
        let everything = count_line(
            &rendered,
            "http_request_duration_seconds_bucket{",
            &["le=\"+Inf\""],
        )
        .expect("bucket rendered");
        assert!(everything.ends_with(" 1500"));
    }

    #[test]
    fn test_default_collectors_render() {
        let (registry, _factory) = initialize_metrics(true).unwrap();
        let rendered = registry.render();
        assert!(rendered.contains("service_start_time_seconds"));
        assert!(registry.contains("tokio_runtime_workers"));
    }
}
