//! Default process and runtime collectors.
//!
//! Gauges are refreshed right before the registry is rendered, so a scrape
//! always sees current values without a background task.
//!
//! Start time and uptime are measured from the creation of the service's
//! registry, hence the `service_*` names.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use metrics::Gauge;

use crate::observability::metrics::{MetricsError, MetricsFactory};

/// A source of metrics sampled on every scrape.
pub trait Collector: Send + Sync {
    fn collect(&self);
}

/// Memory of the current process and uptime of the owning service.
pub struct ProcessCollector {
    started_at: SystemTime,
    started: Instant,
    start_time: Gauge,
    uptime: Gauge,
    resident_memory: Gauge,
    virtual_memory: Gauge,
}

impl ProcessCollector {
    pub fn register(factory: &MetricsFactory) -> Result<Self, MetricsError> {
        Ok(Self {
            started_at: SystemTime::now(),
            started: Instant::now(),
            start_time: factory.try_gauge(
                "service_start_time_seconds",
                "Start time of the service since unix epoch in seconds.",
            )?,
            uptime: factory.try_gauge("service_uptime_seconds", "Service uptime in seconds.")?,
            resident_memory: factory.try_gauge(
                "process_resident_memory_bytes",
                "Resident memory size in bytes.",
            )?,
            virtual_memory: factory.try_gauge(
                "process_virtual_memory_bytes",
                "Virtual memory size in bytes.",
            )?,
        })
    }
}

impl Collector for ProcessCollector {
    fn collect(&self) {
        if let Ok(since_epoch) = self.started_at.duration_since(UNIX_EPOCH) {
            self.start_time.set(since_epoch.as_secs_f64());
        }
        self.uptime.set(self.started.elapsed().as_secs_f64());

        if let Some(usage) = memory_stats::memory_stats() {
            self.resident_memory.set(usage.physical_mem as f64);
            self.virtual_memory.set(usage.virtual_mem as f64);
        }
    }
}

/// Tokio runtime gauges, sampled from the runtime serving the scrape.
pub struct RuntimeCollector {
    workers: Gauge,
    alive_tasks: Gauge,
}

impl RuntimeCollector {
    pub fn register(factory: &MetricsFactory) -> Result<Self, MetricsError> {
        Ok(Self {
            workers: factory.try_gauge(
                "tokio_runtime_workers",
                "Number of worker threads used by the runtime.",
            )?,
            alive_tasks: factory.try_gauge(
                "tokio_runtime_alive_tasks",
                "Number of alive tasks in the runtime.",
            )?,
        })
    }
}

impl Collector for RuntimeCollector {
    fn collect(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let metrics = handle.metrics();
        self.workers.set(metrics.num_workers() as f64);
        self.alive_tasks.set(metrics.num_alive_tasks() as f64);
    }
}

#[cfg(test)]
mod tests {
    use crate::observability::metrics::initialize_metrics;

    #[tokio::test]
    async fn test_runtime_gauges_sampled_inside_runtime() {
        let (registry, _factory) = initialize_metrics(true).unwrap();
        let rendered = registry.render();

        let workers = rendered
            .lines()
            .find(|line| line.starts_with("tokio_runtime_workers "))
            .expect("workers gauge rendered");
        // current_thread runtime in #[tokio::test]
        assert_eq!(workers, "tokio_runtime_workers 1");
    }

    fn gauge(rendered: &str, name: &str) -> f64 {
        rendered
            .lines()
            .find(|line| line.starts_with(&format!("{name} ")))
            .and_then(|line| line.rsplit(' ').next())
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or_else(|| panic!("{name} rendered"))
    }

    #[test]
    fn test_uptime_counts_from_registry_creation() {
        let (older, _factory) = initialize_metrics(true).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));
        let (newer, _factory) = initialize_metrics(true).unwrap();

        let older = older.render();
        let newer = newer.render();
        assert!(gauge(&older, "service_uptime_seconds") >= 0.2);
        assert!(gauge(&newer, "service_uptime_seconds") < gauge(&older, "service_uptime_seconds"));
        assert!(
            gauge(&newer, "service_start_time_seconds")
                > gauge(&older, "service_start_time_seconds")
        );
        assert!(!older.contains("process_start_time_seconds"));
    }
}
