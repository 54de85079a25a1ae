//! In-process tracer.
//!
//! # Lifecycle
//!
//! ```text
//! apm::start(config, exporter)  → TracerGuard (derefs to Arc<Tracer>)
//!        ↓
//! tracer.start_span(..)         → Span, children via span.child(..)
//!        ↓  last span of a trace finishes
//! export queue                  ← chunk of SpanData
//!        ↓  flush(): periodic task, graceful shutdown, fatal exit, guard drop
//! Exporter::export
//! ```
//!
//! Dropping the [`TracerGuard`] flushes whatever is still queued, so every
//! exit path that unwinds through `main` exports its traces. Paths that call
//! `std::process::exit` must call [`Tracer::flush`] themselves.

pub mod client;
pub mod context;
pub mod export;
pub mod propagation;
pub mod span;
pub mod user;

use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::HeaderMap;
use tracing::{debug, error};

use crate::appsec::Monitor;

pub use client::TracedClient;
pub use context::{SpanContext, TraceId};
pub use export::{Exporter, JsonLinesExporter, MemoryExporter};
pub use propagation::{CompositePropagator, PropagationStyle, Propagator};
pub use span::{Span, SpanData};
pub use user::{User, set_user};

use span::lock;

/// Tracer settings, usually derived from [`Config`](crate::Config).
#[derive(Clone, Debug)]
pub struct TracerConfig {
    pub service: String,
    pub env: Option<String>,
    pub version: Option<String>,
    /// When false no spans are opened for incoming requests.
    pub enabled: bool,
    pub appsec_enabled: bool,
    /// Fraction of locally rooted traces kept, `0.0..=1.0`.
    pub sample_rate: f64,
    pub propagation_styles: Vec<PropagationStyle>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            service: "weblog".to_owned(),
            env: None,
            version: None,
            enabled: true,
            appsec_enabled: true,
            sample_rate: 1.0,
            propagation_styles: vec![PropagationStyle::Datadog, PropagationStyle::TraceContext],
        }
    }
}

/// Process-wide tracer state shared by every span.
pub struct Tracer {
    config: TracerConfig,
    propagator: CompositePropagator,
    appsec: Monitor,
    queue: Mutex<Vec<Vec<SpanData>>>,
    exporter: Box<dyn Exporter>,
}

impl Tracer {
    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn propagator(&self) -> &dyn Propagator {
        &self.propagator
    }

    pub fn appsec(&self) -> &Monitor {
        &self.appsec
    }

    /// Opens a local root span, continuing `parent` when it is valid.
    pub fn start_span(self: &Arc<Self>, name: &str, parent: Option<&SpanContext>) -> Span {
        Span::root(Arc::clone(self), name, parent)
    }

    /// Opens a local root span continuing whatever context `headers` carry.
    pub fn start_span_from_headers(self: &Arc<Self>, name: &str, headers: &HeaderMap) -> Span {
        let parent = self.propagator.extract(headers);
        self.start_span(name, parent.as_ref())
    }

    /// Sampling decision for a trace that starts here.
    pub(crate) fn sample(&self) -> i32 {
        if fastrand::f64() < self.config.sample_rate {
            context::priority::AUTO_KEEP
        } else {
            context::priority::AUTO_REJECT
        }
    }

    pub(crate) fn enqueue(&self, chunk: Vec<SpanData>) {
        lock(&self.queue).push(chunk);
    }

    /// Exports every queued trace chunk. Export failures are logged.
    pub fn flush(&self) {
        let traces = std::mem::take(&mut *lock(&self.queue));
        if traces.is_empty() {
            return;
        }
        match self.exporter.export(&traces) {
            Ok(()) => debug!(count = traces.len(), "traces flushed"),
            Err(e) => error!(count = traces.len(), "trace export failed: {e}"),
        }
    }

    /// Flushes every `interval` until the tracer is the last owner left.
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let tracer = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match tracer.upgrade() {
                    Some(tracer) => tracer.flush(),
                    None => break,
                }
            }
        })
    }
}

/// Owns the tracer for the lifetime of the process. Flushes on drop.
pub struct TracerGuard {
    tracer: Arc<Tracer>,
}

impl Deref for TracerGuard {
    type Target = Arc<Tracer>;

    fn deref(&self) -> &Self::Target {
        &self.tracer
    }
}

impl Drop for TracerGuard {
    fn drop(&mut self) {
        self.tracer.flush();
    }
}

/// Builds the tracer. Call once at process start and keep the guard alive.
pub fn start(config: TracerConfig, exporter: Box<dyn Exporter>) -> TracerGuard {
    let tracer = Tracer {
        propagator: CompositePropagator::new(config.propagation_styles.clone()),
        appsec: Monitor::new(config.appsec_enabled),
        queue: Mutex::new(Vec::new()),
        exporter,
        config,
    };
    tracing::info!(
        service = %tracer.config.service,
        enabled = tracer.config.enabled,
        appsec = tracer.config.appsec_enabled,
        sample_rate = tracer.config.sample_rate,
        "tracer started"
    );
    TracerGuard { tracer: Arc::new(tracer) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context::priority;

    #[test]
    fn guard_drop_flushes_pending_traces() {
        let exporter = MemoryExporter::default();
        {
            let tracer = start(TracerConfig::default(), Box::new(exporter.clone()));
            tracer.start_span("op", None).finish();
            assert!(exporter.traces().is_empty());
        }
        assert_eq!(exporter.traces().len(), 1);
    }

    #[test]
    fn sample_rate_bounds_decide_priority() {
        let keep_all = start(TracerConfig::default(), Box::new(MemoryExporter::default()));
        let drop_all = start(
            TracerConfig { sample_rate: 0.0, ..TracerConfig::default() },
            Box::new(MemoryExporter::default()),
        );
        for _ in 0..100 {
            assert_eq!(keep_all.sample(), priority::AUTO_KEEP);
            assert_eq!(drop_all.sample(), priority::AUTO_REJECT);
        }
    }

    #[test]
    fn spans_continue_context_from_headers() {
        let tracer = start(TracerConfig::default(), Box::new(MemoryExporter::default()));
        let mut headers = HeaderMap::new();
        headers.insert("x-datadog-trace-id", "42".parse().unwrap());
        headers.insert("x-datadog-parent-id", "7".parse().unwrap());
        headers.insert("x-datadog-sampling-priority", "-1".parse().unwrap());

        let span = tracer.start_span_from_headers("http.request", &headers);
        assert_eq!(span.trace_id().low(), 42);
        assert_eq!(span.sampling_priority(), Some(priority::USER_REJECT));
    }

    #[tokio::test(start_paused = true)]
    async fn flusher_exports_periodically() {
        let exporter = MemoryExporter::default();
        let tracer = start(TracerConfig::default(), Box::new(exporter.clone()));
        let handle = tracer.spawn_flusher(Duration::from_millis(100));

        tracer.start_span("op", None).finish();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(exporter.traces().len(), 1);

        drop(tracer);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(handle.is_finished());
    }
}
