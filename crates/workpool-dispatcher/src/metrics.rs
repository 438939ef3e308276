use crate::dispatcher::PoolStats;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::time::Duration;

/// Prometheus metrics for a worker pool
pub struct PoolMetrics {
    pub registry: Registry,

    // Task counters
    pub tasks_total: IntCounterVec,

    // Task gauges
    pub tasks_queued: IntGauge,
    pub tasks_in_flight: IntGauge,

    // Execution duration
    pub task_duration: Histogram,

    // Worker metrics
    pub workers: IntGaugeVec,
    pub worker_respawns: IntCounter,
}

impl PoolMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let tasks_total = IntCounterVec::new(
            Opts::new("wp_tasks_total", "Total number of tasks by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(tasks_total.clone()))?;

        let tasks_queued = IntGauge::new("wp_tasks_queued", "Number of queued tasks")?;
        registry.register(Box::new(tasks_queued.clone()))?;

        let tasks_in_flight = IntGauge::new("wp_tasks_in_flight", "Number of dispatched tasks")?;
        registry.register(Box::new(tasks_in_flight.clone()))?;

        let task_duration = Histogram::with_opts(HistogramOpts::new(
            "wp_task_duration_seconds",
            "Time from dispatch to completion in seconds",
        ))?;
        registry.register(Box::new(task_duration.clone()))?;

        let workers = IntGaugeVec::new(
            Opts::new("wp_workers", "Workers by lifecycle state"),
            &["state"],
        )?;
        registry.register(Box::new(workers.clone()))?;

        let worker_respawns = IntCounter::new("wp_worker_respawns_total", "Replacement workers started")?;
        registry.register(Box::new(worker_respawns.clone()))?;

        Ok(PoolMetrics {
            registry,
            tasks_total,
            tasks_queued,
            tasks_in_flight,
            task_duration,
            workers,
            worker_respawns,
        })
    }

    /// Count a finished task under `outcome` ("succeeded" or an error label)
    pub fn inc_tasks_total(&self, outcome: &str) {
        self.tasks_total.with_label_values(&[outcome]).inc();
    }

    pub fn observe_duration(&self, duration: Duration) {
        self.task_duration.observe(duration.as_secs_f64());
    }

    /// Refresh the gauges from a stats snapshot
    pub fn update(&self, stats: &PoolStats) {
        self.tasks_queued.set(stats.queued as i64);
        self.tasks_in_flight.set(stats.in_flight as i64);
        self.workers
            .with_label_values(&["starting"])
            .set(stats.starting as i64);
        self.workers.with_label_values(&["ready"]).set(stats.ready as i64);
        self.workers.with_label_values(&["busy"]).set(stats.busy as i64);
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> String {
        use prometheus::{Encoder, TextEncoder};

        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
