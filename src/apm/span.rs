//! Spans and the per-trace state they share.
//!
//! A [`Span`] is a cheap handle (one `Arc`) that can be cloned into any task.
//! All spans of one local trace share a `TraceState`: sampling priority,
//! propagating tags and the list of spans already finished. When the last
//! open span of a trace finishes, the whole chunk is handed to the
//! [`Tracer`] export queue.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::Tracer;
use super::context::{PROPAGATING_TAG_PREFIX, SpanContext, TraceId};

/// Metric key carrying the sampling decision on the local root span.
pub const SAMPLING_PRIORITY_KEY: &str = "_sampling_priority_v1";

/// A finished span, laid out the way trace intakes expect it.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SpanData {
    pub trace_id: u64,
    pub span_id: u64,
    pub parent_id: u64,
    pub name: String,
    pub resource: String,
    pub service: String,
    #[serde(rename = "type")]
    pub span_type: String,
    pub start: i64,
    pub duration: i64,
    pub error: i32,
    pub meta: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
}

struct TraceState {
    trace_id: TraceId,
    inner: Mutex<TraceInner>,
}

struct TraceInner {
    sampling_priority: Option<i32>,
    origin: Option<String>,
    propagating_tags: BTreeMap<String, String>,
    open: usize,
    finished: Vec<SpanData>,
}

struct SpanInner {
    tracer: Arc<Tracer>,
    trace: Arc<TraceState>,
    /// `None` when this span is the local root.
    root: Option<Span>,
    started: Instant,
    finished: AtomicBool,
    data: Mutex<SpanData>,
}

/// Handle to an open span.
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

impl std::fmt::Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = lock(&self.inner.data);
        f.debug_struct("Span")
            .field("trace_id", &self.inner.trace.trace_id)
            .field("span_id", &data.span_id)
            .field("name", &data.name)
            .finish()
    }
}

impl Span {
    /// Opens a local root span, continuing `parent` when it is a valid
    /// remote context.
    pub(crate) fn root(tracer: Arc<Tracer>, name: &str, parent: Option<&SpanContext>) -> Self {
        let parent = parent.filter(|p| p.is_valid());
        let trace_id = parent.map_or_else(TraceId::generate, |p| p.trace_id);

        let mut propagating_tags = parent
            .map(|p| p.propagating_tags.clone())
            .unwrap_or_default();
        if trace_id.high() != 0 {
            propagating_tags.insert(
                super::context::TRACE_ID_HIGH_TAG.to_owned(),
                format!("{:016x}", trace_id.high()),
            );
        }

        let sampling_priority = parent
            .and_then(|p| p.sampling_priority)
            .or_else(|| Some(tracer.sample()));

        let trace = Arc::new(TraceState {
            trace_id,
            inner: Mutex::new(TraceInner {
                sampling_priority,
                origin: parent.and_then(|p| p.origin.clone()),
                propagating_tags,
                open: 0,
                finished: Vec::new(),
            }),
        });

        let parent_id = parent.map_or(0, |p| p.span_id);
        Self::open(tracer, trace, None, parent_id, name)
    }

    /// Opens a child of this span in the same trace.
    pub fn child(&self, name: &str) -> Span {
        let root = self.local_root();
        Self::open(
            Arc::clone(&self.inner.tracer),
            Arc::clone(&self.inner.trace),
            Some(root),
            self.span_id(),
            name,
        )
    }

    fn open(
        tracer: Arc<Tracer>,
        trace: Arc<TraceState>,
        root: Option<Span>,
        parent_id: u64,
        name: &str,
    ) -> Self {
        lock(&trace.inner).open += 1;

        let config = tracer.config();
        let mut meta = BTreeMap::new();
        if let Some(env) = &config.env {
            meta.insert("env".to_owned(), env.clone());
        }
        if let Some(version) = &config.version {
            meta.insert("version".to_owned(), version.clone());
        }
        meta.insert("language".to_owned(), "rust".to_owned());

        let data = SpanData {
            trace_id: trace.trace_id.low(),
            span_id: super::context::new_span_id(),
            parent_id,
            name: name.to_owned(),
            resource: name.to_owned(),
            service: config.service.clone(),
            start: unix_nanos(),
            meta,
            ..SpanData::default()
        };

        Self {
            inner: Arc::new(SpanInner {
                tracer,
                trace,
                root,
                started: Instant::now(),
                finished: AtomicBool::new(false),
                data: Mutex::new(data),
            }),
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.inner.trace.trace_id
    }

    pub fn span_id(&self) -> u64 {
        lock(&self.inner.data).span_id
    }

    pub fn is_local_root(&self) -> bool {
        self.inner.root.is_none()
    }

    /// The first span of this trace opened in this process.
    pub fn local_root(&self) -> Span {
        self.inner.root.clone().unwrap_or_else(|| self.clone())
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.inner.tracer
    }

    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        lock(&self.inner.data).meta.insert(key.into(), value.into());
    }

    pub fn set_metric(&self, key: impl Into<String>, value: f64) {
        lock(&self.inner.data).metrics.insert(key.into(), value);
    }

    pub fn tag(&self, key: &str) -> Option<String> {
        lock(&self.inner.data).meta.get(key).cloned()
    }

    pub fn set_resource(&self, resource: impl Into<String>) {
        lock(&self.inner.data).resource = resource.into();
    }

    pub fn set_span_type(&self, span_type: impl Into<String>) {
        lock(&self.inner.data).span_type = span_type.into();
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let mut data = lock(&self.inner.data);
        data.error = 1;
        data.meta.insert("error.message".to_owned(), message.into());
    }

    pub fn sampling_priority(&self) -> Option<i32> {
        lock(&self.inner.trace.inner).sampling_priority
    }

    pub fn set_sampling_priority(&self, priority: i32) {
        lock(&self.inner.trace.inner).sampling_priority = Some(priority);
    }

    pub fn set_origin(&self, origin: impl Into<String>) {
        lock(&self.inner.trace.inner).origin = Some(origin.into());
    }

    /// Sets a trace-level tag that is injected into outbound requests.
    ///
    /// Keys without the `_dd.p.` prefix get it prepended.
    pub fn set_propagating_tag(&self, key: &str, value: impl Into<String>) {
        let key = if key.starts_with(PROPAGATING_TAG_PREFIX) {
            key.to_owned()
        } else {
            format!("{PROPAGATING_TAG_PREFIX}{key}")
        };
        lock(&self.inner.trace.inner).propagating_tags.insert(key, value.into());
    }

    pub fn propagating_tag(&self, key: &str) -> Option<String> {
        lock(&self.inner.trace.inner).propagating_tags.get(key).cloned()
    }

    /// Snapshot of what would be propagated for this span.
    pub fn context(&self) -> SpanContext {
        let span_id = self.span_id();
        let trace = lock(&self.inner.trace.inner);
        SpanContext {
            trace_id: self.inner.trace.trace_id,
            span_id,
            sampling_priority: trace.sampling_priority,
            origin: trace.origin.clone(),
            propagating_tags: trace.propagating_tags.clone(),
        }
    }

    /// Finishes the span. Later calls are no-ops.
    pub fn finish(&self) {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut data = {
            let mut data = lock(&self.inner.data);
            data.duration = i64::try_from(self.inner.started.elapsed().as_nanos()).unwrap_or(i64::MAX);
            data.clone()
        };

        let chunk = {
            let mut trace = lock(&self.inner.trace.inner);
            if self.is_local_root() {
                if let Some(priority) = trace.sampling_priority {
                    data.metrics.insert(SAMPLING_PRIORITY_KEY.to_owned(), f64::from(priority));
                }
                if let Some(origin) = &trace.origin {
                    data.meta.insert("_dd.origin".to_owned(), origin.clone());
                }
                data.meta.extend(trace.propagating_tags.clone());
            }
            trace.finished.push(data);
            trace.open -= 1;
            (trace.open == 0).then(|| std::mem::take(&mut trace.finished))
        };

        if let Some(chunk) = chunk {
            self.inner.tracer.enqueue(chunk);
        }
    }
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Locks a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
