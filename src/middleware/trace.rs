//! Per-request server span.
//!
//! Continues the caller's trace from the propagation headers, opens the
//! `http.request` server span, hands it to the handler through
//! [`Request::span`] and finishes it once the response is built. The handler
//! also runs inside a `tracing` span so log lines carry method, route and
//! trace id.

use std::future::Future;
use std::sync::Arc;

use http::header::USER_AGENT;
use tracing::{Instrument, debug, info_span};

use crate::apm::Tracer;
use crate::request::Request;
use crate::response::Response;

pub const SERVER_SPAN_NAME: &str = "http.request";

/// Runs `next` under a server span when the tracer is enabled.
///
/// `route` is the registered pattern, `None` for requests no route matched.
pub async fn traced<F, Fut>(tracer: &Arc<Tracer>, route: Option<&str>, mut req: Request, next: F) -> Response
where
    F: FnOnce(Request) -> Fut,
    Fut: Future<Output = Response>,
{
    let method = req.method().clone();
    let log_span = info_span!(
        "request",
        method = %method,
        path = %req.path(),
        route = route.unwrap_or("-"),
        trace_id = tracing::field::Empty,
    );

    if !tracer.is_enabled() {
        return next(req).instrument(log_span).await;
    }

    let span = tracer.start_span_from_headers(SERVER_SPAN_NAME, req.headers());
    log_span.record("trace_id", span.trace_id().low());

    span.set_resource(match route {
        Some(route) => format!("{method} {route}"),
        None => method.to_string(),
    });
    span.set_span_type("web");
    span.set_tag("span.kind", "server");
    span.set_tag("component", "weblog");
    span.set_tag("http.method", method.as_str());
    span.set_tag("http.url", req.uri().to_string());
    if let Some(route) = route {
        span.set_tag("http.route", route);
    }
    if let Some(agent) = req.header(USER_AGENT.as_str()) {
        span.set_tag("http.useragent", agent);
    }

    req.set_span(span.clone());
    let res = next(req).instrument(log_span).await;

    let status = res.status_code();
    span.set_tag("http.status_code", status.as_str());
    if status.is_server_error() {
        span.set_error(format!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or("")));
    }
    span.finish();
    debug!(status = status.as_u16(), "request span finished");
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apm::{self, MemoryExporter, TracerConfig, TracerGuard};
    use bytes::Bytes;
    use http::StatusCode;

    fn tracer(enabled: bool) -> (TracerGuard, MemoryExporter) {
        let exporter = MemoryExporter::default();
        let config = TracerConfig { enabled, ..TracerConfig::default() };
        (apm::start(config, Box::new(exporter.clone())), exporter)
    }

    fn request(uri: &str) -> Request {
        Request::from_http(
            http::Request::builder()
                .method("POST")
                .uri(uri)
                .header("user-agent", "system-tests")
                .header("x-datadog-trace-id", "123")
                .header("x-datadog-parent-id", "456")
                .body(Bytes::new())
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn server_span_is_tagged_and_exported() {
        let (tracer, exporter) = tracer(true);
        let res = traced(&tracer, Some("/params/{myParam}"), request("/params/7?x=1"), |req| async move {
            assert!(req.span().is_some());
            Response::status(StatusCode::BAD_GATEWAY)
        })
        .await;
        assert_eq!(res.status_code(), StatusCode::BAD_GATEWAY);
        tracer.flush();

        let spans = exporter.spans_named(SERVER_SPAN_NAME);
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.trace_id, 123);
        assert_eq!(span.parent_id, 456);
        assert_eq!(span.resource, "POST /params/{myParam}");
        assert_eq!(span.span_type, "web");
        assert_eq!(span.error, 1);
        assert_eq!(span.meta["http.status_code"], "502");
        assert_eq!(span.meta["http.route"], "/params/{myParam}");
        assert_eq!(span.meta["http.url"], "/params/7?x=1");
        assert_eq!(span.meta["http.useragent"], "system-tests");
    }

    #[tokio::test]
    async fn unmatched_request_uses_method_as_resource() {
        let (tracer, exporter) = tracer(true);
        traced(&tracer, None, request("/nope"), |_| async { Response::status(StatusCode::NOT_FOUND) }).await;
        tracer.flush();
        let spans = exporter.spans_named(SERVER_SPAN_NAME);
        let span = &spans[0];
        assert_eq!(span.resource, "POST");
        assert_eq!(span.error, 0);
        assert!(!span.meta.contains_key("http.route"));
    }

    #[tokio::test]
    async fn disabled_tracer_opens_no_span() {
        let (tracer, exporter) = tracer(false);
        let res = traced(&tracer, Some("/"), request("/"), |req| async move {
            assert!(req.span().is_none());
            Response::text("OK")
        })
        .await;
        assert_eq!(res.body(), b"OK");
        tracer.flush();
        assert!(exporter.traces().is_empty());
    }
}
