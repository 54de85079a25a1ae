//! Outbound HTTP client that carries the current trace downstream.

use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Empty};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use super::Tracer;
use super::span::Span;
use crate::error::Error;

/// Wraps a hyper client: every call opens a client span under the caller's
/// span and injects the configured propagation headers.
///
/// Speaks `http` and `https` (rustls, webpki roots). No timeouts are applied.
#[derive(Clone)]
pub struct TracedClient {
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
    tracer: Arc<Tracer>,
}

impl TracedClient {
    pub fn new(tracer: Arc<Tracer>) -> Self {
        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client, tracer }
    }

    /// Issues `GET url`, returning the downstream status.
    ///
    /// Without a `parent` span the request is sent untraced.
    pub async fn get(&self, parent: Option<&Span>, url: &str) -> Result<StatusCode, Error> {
        let uri = parse_uri(url)?;
        let span = parent.map(|p| p.child("http.request"));

        let mut req = Request::builder().method(Method::GET).uri(uri.clone()).body(Empty::new())?;

        if let Some(span) = &span {
            span.set_resource("GET");
            span.set_span_type("http");
            span.set_tag("span.kind", "client");
            span.set_tag("component", "hyper");
            span.set_tag("http.method", "GET");
            span.set_tag("http.url", redact_userinfo(&uri));
            if let Some(host) = uri.host() {
                span.set_tag("out.host", host);
            }
            self.tracer.propagator().inject(&span.context(), req.headers_mut());
        }

        let result = self.client.request(req).await;

        match result {
            Ok(resp) => {
                let status = resp.status();
                if let Some(span) = &span {
                    span.set_tag("http.status_code", status.as_str());
                    if status.is_server_error() {
                        span.set_error(format!("{status}"));
                    }
                    span.finish();
                }
                // Drain so the connection can go back to the pool.
                let _ = resp.into_body().collect().await;
                debug!(url = %uri, status = status.as_u16(), "outbound call complete");
                Ok(status)
            }
            Err(e) => {
                if let Some(span) = &span {
                    span.set_error(e.to_string());
                    span.finish();
                }
                Err(e.into())
            }
        }
    }
}

fn parse_uri(raw: &str) -> Result<Uri, Error> {
    let invalid = |reason: String| Error::InvalidUri { uri: raw.to_owned(), reason };
    let url = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    url.as_str().parse::<Uri>().map_err(|e| invalid(e.to_string()))
}

fn redact_userinfo(uri: &Uri) -> String {
    let scheme = uri.scheme_str().unwrap_or("http");
    let host = uri.host().unwrap_or_default();
    let port = uri.port_u16().map(|p| format!(":{p}")).unwrap_or_default();
    format!("{scheme}://{host}{port}{}", uri.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apm::export::MemoryExporter;
    use crate::apm::propagation::{TRACEPARENT, X_DATADOG_PARENT_ID, X_DATADOG_TAGS};
    use crate::apm::{TracerConfig, User, set_user, start};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one connection, returns the raw request head it received.
    async fn one_shot_server() -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut head = Vec::new();
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                head.extend_from_slice(&buf[..n]);
                if n == 0 || head.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            stream
                .write_all(b"HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&head).to_ascii_lowercase()
        });
        (format!("http://{addr}/downstream?x=1"), handle)
    }

    #[tokio::test]
    async fn injects_context_of_the_client_span() {
        let exporter = MemoryExporter::default();
        let tracer = start(TracerConfig::default(), Box::new(exporter.clone()));
        let client = TracedClient::new(Arc::clone(&*tracer));
        let root = tracer.start_span("http.request", None);
        set_user(&root, User::new("usr.id").propagate(true));

        let (url, server) = one_shot_server().await;
        let status = client.get(Some(&root), &url).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        root.finish();
        tracer.flush();

        let head = server.await.unwrap();
        let client_span = exporter.spans_named("http.request")
            .into_iter()
            .find(|s| s.meta.get("span.kind").map(String::as_str) == Some("client"))
            .unwrap();

        assert!(head.contains(&format!("{X_DATADOG_PARENT_ID}: {}", client_span.span_id)));
        assert!(head.contains(TRACEPARENT));
        assert!(head.contains(X_DATADOG_TAGS));
        assert!(head.contains("_dd.p.usr.id=dxnylmlk"));
        assert_eq!(client_span.meta["http.status_code"], "204");
        assert_eq!(client_span.parent_id, root.span_id());
    }

    #[tokio::test]
    async fn untraced_call_sends_no_context() {
        let tracer = start(TracerConfig::default(), Box::new(MemoryExporter::default()));
        let client = TracedClient::new(Arc::clone(&*tracer));

        let (url, server) = one_shot_server().await;
        client.get(None, &url).await.unwrap();

        let head = server.await.unwrap();
        assert!(!head.contains(TRACEPARENT));
        assert!(!head.contains(X_DATADOG_PARENT_ID));
    }

    #[tokio::test]
    async fn rejects_unsupported_urls() {
        let tracer = start(TracerConfig::default(), Box::new(MemoryExporter::default()));
        let client = TracedClient::new(Arc::clone(&*tracer));
        assert!(matches!(client.get(None, "not a url").await, Err(Error::InvalidUri { .. })));
        assert!(matches!(client.get(None, "ftp://example.com/file").await, Err(Error::InvalidUri { .. })));
    }

    #[tokio::test]
    async fn https_urls_go_through_tls() {
        let tracer = start(TracerConfig::default(), Box::new(MemoryExporter::default()));
        let client = TracedClient::new(Arc::clone(&*tracer));

        // A plain TCP peer that hangs up: the handshake fails at transport
        // level instead of the URL being refused up front.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let result = client.get(None, &format!("https://{addr}/")).await;
        assert!(matches!(result, Err(Error::Client(_))), "{result:?}");
        peer.await.unwrap();
    }

    #[test]
    fn url_tag_keeps_scheme_and_drops_userinfo() {
        let uri: Uri = "https://user:pw@example.com:8443/a?b=c".parse().unwrap();
        assert_eq!(redact_userinfo(&uri), "https://example.com:8443/a");
    }

    #[tokio::test]
    async fn transport_failure_marks_span_as_error() {
        let exporter = MemoryExporter::default();
        let tracer = start(TracerConfig::default(), Box::new(exporter.clone()));
        let client = TracedClient::new(Arc::clone(&*tracer));
        let root = tracer.start_span("http.request", None);

        // Bind then drop so nothing listens on the port.
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let result = client.get(Some(&root), &format!("http://{addr}/")).await;
        assert!(matches!(result, Err(Error::Client(_))));

        root.finish();
        tracer.flush();
        let spans = exporter.traces().concat();
        let failed = spans.iter().find(|s| s.span_id != root.span_id()).unwrap();
        assert_eq!(failed.error, 1);
    }
}
