// ZNS metrics: counters, moving averages, gauges, health computation and
// Prometheus-style text export

use ghostbridge_shared::types::{ResolutionSource, ZnsErrorCode};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Samples kept for latency and QPS averages
const LATENCY_WINDOW: usize = 60;
/// Samples kept for hit-rate and error-rate averages
const RATE_WINDOW: usize = 100;

/// Fixed-window moving average
#[derive(Debug)]
pub struct MovingWindow {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl MovingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Overall service health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Inputs to the health decision, captured at evaluation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub error_rate: f64,
    pub cpu_percent: f64,
    pub avg_response_time_ms: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
}

/// unhealthy: memory above 90% of the limit.
/// degraded: error rate above 10%, or CPU above 80%, or average response
/// time above 5000ms.
pub fn compute_health(snapshot: &HealthSnapshot) -> HealthState {
    if snapshot.memory_limit_bytes > 0
        && snapshot.memory_usage_bytes as f64 > snapshot.memory_limit_bytes as f64 * 0.9
    {
        return HealthState::Unhealthy;
    }
    if snapshot.error_rate > 0.10
        || snapshot.cpu_percent > 80.0
        || snapshot.avg_response_time_ms > 5_000.0
    {
        return HealthState::Degraded;
    }
    HealthState::Healthy
}

/// Serializable point-in-time report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub uptime_seconds: u64,
    pub total_queries: u64,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub queries_per_second: f64,
    pub avg_resolution_time_ms: f64,
    pub cache_hit_rate: f64,
    pub error_rate: f64,
    pub memory_usage_bytes: u64,
    pub cpu_percent: f64,
    pub open_connections: u64,
    pub active_subscriptions: u64,
    pub per_resolver: HashMap<String, u64>,
    pub per_error: HashMap<String, u64>,
    pub per_tld: HashMap<String, u64>,
    pub health: HealthState,
}

pub struct MetricsCollector {
    started_at: Instant,
    memory_limit_bytes: u64,

    total_queries: AtomicU64,
    successful_queries: AtomicU64,
    failed_queries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    memory_usage_bytes: AtomicU64,
    open_connections: AtomicU64,
    active_subscriptions: AtomicU64,
    cpu_percent: Mutex<f64>,

    per_resolver: RwLock<HashMap<String, u64>>,
    per_error: RwLock<HashMap<ZnsErrorCode, u64>>,
    per_tld: RwLock<HashMap<String, u64>>,
    per_source: RwLock<HashMap<ResolutionSource, u64>>,

    resolution_times: Mutex<MovingWindow>,
    qps_samples: Mutex<MovingWindow>,
    hit_rate_samples: Mutex<MovingWindow>,
    error_rate_samples: Mutex<MovingWindow>,

    // (instant, total at instant) for QPS sampling
    last_qps_sample: Mutex<(Instant, u64)>,
    // (instant, cumulative cpu ticks) for CPU sampling
    cpu_sampler: Mutex<Option<(Instant, u64)>>,
}

impl MetricsCollector {
    pub fn new(memory_limit_bytes: u64) -> Self {
        Self {
            started_at: Instant::now(),
            memory_limit_bytes,
            total_queries: AtomicU64::new(0),
            successful_queries: AtomicU64::new(0),
            failed_queries: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            memory_usage_bytes: AtomicU64::new(0),
            open_connections: AtomicU64::new(0),
            active_subscriptions: AtomicU64::new(0),
            cpu_percent: Mutex::new(0.0),
            per_resolver: RwLock::new(HashMap::new()),
            per_error: RwLock::new(HashMap::new()),
            per_tld: RwLock::new(HashMap::new()),
            per_source: RwLock::new(HashMap::new()),
            resolution_times: Mutex::new(MovingWindow::new(LATENCY_WINDOW)),
            qps_samples: Mutex::new(MovingWindow::new(LATENCY_WINDOW)),
            hit_rate_samples: Mutex::new(MovingWindow::new(RATE_WINDOW)),
            error_rate_samples: Mutex::new(MovingWindow::new(RATE_WINDOW)),
            last_qps_sample: Mutex::new((Instant::now(), 0)),
            cpu_sampler: Mutex::new(None),
        }
    }

    /// Count a query. Rate-limited requests pass `None`: they never touch
    /// per-TLD counters.
    pub fn record_query(&self, tld: Option<&str>) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        if let Some(tld) = tld {
            *self.per_tld.write().entry(tld.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_success(&self, source: ResolutionSource, duration_ms: u64) {
        self.successful_queries.fetch_add(1, Ordering::Relaxed);
        *self.per_source.write().entry(source).or_insert(0) += 1;
        self.resolution_times.lock().push(duration_ms as f64);
        self.error_rate_samples.lock().push(0.0);
    }

    pub fn record_failure(&self, code: ZnsErrorCode, duration_ms: u64) {
        self.failed_queries.fetch_add(1, Ordering::Relaxed);
        *self.per_error.write().entry(code).or_insert(0) += 1;
        self.resolution_times.lock().push(duration_ms as f64);
        self.error_rate_samples.lock().push(1.0);
    }

    pub fn record_resolver_query(&self, resolver_name: &str) {
        *self
            .per_resolver
            .write()
            .entry(resolver_name.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.hit_rate_samples.lock().push(1.0);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.hit_rate_samples.lock().push(0.0);
    }

    pub fn set_memory_usage(&self, bytes: u64) {
        self.memory_usage_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn set_open_connections(&self, count: u64) {
        self.open_connections.store(count, Ordering::Relaxed);
    }

    pub fn set_active_subscriptions(&self, count: u64) {
        self.active_subscriptions.store(count, Ordering::Relaxed);
    }

    pub fn error_count(&self, code: ZnsErrorCode) -> u64 {
        self.per_error.read().get(&code).copied().unwrap_or(0)
    }

    /// Periodic resource sampling: QPS window, process memory, CPU percent.
    /// Idempotent and safe to call concurrently with request processing.
    pub fn update_resource_usage(&self, fallback_memory_bytes: u64) {
        {
            let mut last = self.last_qps_sample.lock();
            let now = Instant::now();
            let total = self.total_queries.load(Ordering::Relaxed);
            let elapsed = now.duration_since(last.0).as_secs_f64();
            if elapsed > 0.0 {
                let qps = (total.saturating_sub(last.1)) as f64 / elapsed;
                self.qps_samples.lock().push(qps);
            }
            *last = (now, total);
        }

        let memory = read_process_rss_bytes().unwrap_or(fallback_memory_bytes);
        self.set_memory_usage(memory);

        if let Some(percent) = self.sample_cpu_percent() {
            *self.cpu_percent.lock() = percent;
        }
    }

    fn sample_cpu_percent(&self) -> Option<f64> {
        let ticks = read_process_cpu_ticks()?;
        let now = Instant::now();
        let mut sampler = self.cpu_sampler.lock();
        let result = sampler.map(|(last_instant, last_ticks)| {
            let elapsed = now.duration_since(last_instant).as_secs_f64();
            if elapsed <= 0.0 {
                return 0.0;
            }
            let tick_hz = 100.0;
            let used = ticks.saturating_sub(last_ticks) as f64 / tick_hz;
            (used / elapsed * 100.0).min(100.0)
        });
        *sampler = Some((now, ticks));
        result
    }

    pub fn health(&self) -> HealthState {
        compute_health(&self.health_snapshot())
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            error_rate: self.error_rate_samples.lock().average(),
            cpu_percent: *self.cpu_percent.lock(),
            avg_response_time_ms: self.resolution_times.lock().average(),
            memory_usage_bytes: self.memory_usage_bytes.load(Ordering::Relaxed),
            memory_limit_bytes: self.memory_limit_bytes,
        }
    }

    pub fn report(&self) -> MetricsReport {
        // Guards must not outlive their statement: health() re-locks the
        // sample windows
        let queries_per_second = self.qps_samples.lock().average();
        let avg_resolution_time_ms = self.resolution_times.lock().average();
        let cache_hit_rate = self.hit_rate_samples.lock().average();
        let error_rate = self.error_rate_samples.lock().average();
        let cpu_percent = *self.cpu_percent.lock();
        let per_resolver = self.per_resolver.read().clone();
        let per_tld = self.per_tld.read().clone();
        let per_error: HashMap<String, u64> = self
            .per_error
            .read()
            .iter()
            .map(|(code, count)| (code.as_str().to_string(), *count))
            .collect();
        let health = self.health();

        MetricsReport {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            total_queries: self.total_queries.load(Ordering::Relaxed),
            successful_queries: self.successful_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            queries_per_second,
            avg_resolution_time_ms,
            cache_hit_rate,
            error_rate,
            memory_usage_bytes: self.memory_usage_bytes.load(Ordering::Relaxed),
            cpu_percent,
            open_connections: self.open_connections.load(Ordering::Relaxed),
            active_subscriptions: self.active_subscriptions.load(Ordering::Relaxed),
            per_resolver,
            per_error,
            per_tld,
            health,
        }
    }

    /// Prometheus text exposition of the counters and gauges
    pub fn prometheus(&self) -> String {
        let report = self.report();
        let mut out = String::with_capacity(2_048);

        counter(&mut out, "zns_queries_total", "Total resolution queries", report.total_queries);
        counter(
            &mut out,
            "zns_queries_successful_total",
            "Successful resolution queries",
            report.successful_queries,
        );
        counter(
            &mut out,
            "zns_queries_failed_total",
            "Failed resolution queries",
            report.failed_queries,
        );
        counter(&mut out, "zns_cache_hits_total", "Resolution cache hits", report.cache_hits);
        counter(&mut out, "zns_cache_misses_total", "Resolution cache misses", report.cache_misses);

        labelled_counters(
            &mut out,
            "zns_resolver_queries_total",
            "Queries issued per upstream resolver",
            "resolver",
            &report.per_resolver,
        );
        labelled_counters(
            &mut out,
            "zns_errors_total",
            "Failures per error kind",
            "code",
            &report.per_error,
        );
        labelled_counters(
            &mut out,
            "zns_tld_queries_total",
            "Queries per top-level domain",
            "tld",
            &report.per_tld,
        );
        let per_source: HashMap<String, u64> = self
            .per_source
            .read()
            .iter()
            .map(|(source, count)| (source.as_str().to_string(), *count))
            .collect();
        labelled_counters(
            &mut out,
            "zns_source_responses_total",
            "Successful responses per resolution source",
            "source",
            &per_source,
        );

        gauge(&mut out, "zns_queries_per_second", "Moving-average QPS", report.queries_per_second);
        gauge(
            &mut out,
            "zns_resolution_time_ms",
            "Moving-average resolution time in milliseconds",
            report.avg_resolution_time_ms,
        );
        gauge(&mut out, "zns_cache_hit_rate", "Moving-average cache hit rate", report.cache_hit_rate);
        gauge(&mut out, "zns_error_rate", "Moving-average error rate", report.error_rate);
        gauge(
            &mut out,
            "zns_memory_usage_bytes",
            "Memory usage in bytes",
            report.memory_usage_bytes as f64,
        );
        gauge(&mut out, "zns_cpu_percent", "CPU usage percent", report.cpu_percent);
        gauge(
            &mut out,
            "zns_open_connections",
            "Open gateway connections",
            report.open_connections as f64,
        );
        gauge(
            &mut out,
            "zns_active_subscriptions",
            "Active subscriptions",
            report.active_subscriptions as f64,
        );
        gauge(&mut out, "zns_uptime_seconds", "Process uptime in seconds", report.uptime_seconds as f64);

        out
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!(
        "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
    ));
}

fn gauge(out: &mut String, name: &str, help: &str, value: f64) {
    out.push_str(&format!(
        "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"
    ));
}

fn labelled_counters(
    out: &mut String,
    name: &str,
    help: &str,
    label: &str,
    values: &HashMap<String, u64>,
) {
    if values.is_empty() {
        return;
    }
    out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} counter\n"));
    let mut sorted: Vec<_> = values.iter().collect();
    sorted.sort();
    for (key, value) in sorted {
        out.push_str(&format!("{name}{{{label}=\"{key}\"}} {value}\n"));
    }
}

/// Resident set size from /proc, where available
fn read_process_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(rss_pages * 4_096)
}

/// Cumulative utime+stime ticks from /proc, where available
fn read_process_cpu_ticks() -> Option<u64> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    // Skip past the parenthesised command name; fields count from there
    let after_comm = stat.rsplit(')').next()?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}
