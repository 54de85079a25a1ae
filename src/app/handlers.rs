//! Route handlers.
//!
//! Each handler calls into the tracer or the appsec layer through the
//! request's span and answers with a canned response. None of them fail: a
//! bad input is ignored and a missing span makes the instrumentation call a
//! no-op.

use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, error};

use super::App;
use super::body::parse_body;
use crate::apm::{User, set_user};
use crate::appsec::{
    Metadata, monitor_parsed_http_body, monitor_path_params, track_custom_event, track_user_login_failure_event,
    track_user_login_success_event,
};
use crate::request::Request;
use crate::response::Response;

pub const WAF_BODY: &str = "Hello, WAF!\n";
pub const HEADERS_BODY: &str = "Hello, headers!";
pub const DEFAULT_EVENT_USER_ID: &str = "system_tests_user";
pub const DEFAULT_EVENT_NAME: &str = "system_tests_event";

/// `/`: empty 200. Under a prefix router this pattern also catches every
/// unmatched path, which gets a 404.
pub async fn root(req: Request) -> Response {
    if req.path() != "/" {
        return Response::status(StatusCode::NOT_FOUND);
    }
    Response::status(StatusCode::OK)
}

pub async fn ok(_req: Request) -> Response {
    Response::text("OK")
}

/// `/params/{myParam}`: the parameter goes through the appsec monitor.
pub async fn params(req: Request) -> Response {
    if let Some(value) = req.param("myParam") {
        monitor_path_params(req.span(), [("myParam", value)]);
    }
    Response::text("OK")
}

pub async fn waf(req: Request) -> Response {
    monitor_body(&req);
    Response::text(WAF_BODY)
}

/// `/waf/...`: same as [`waf`], with the response written under a child span.
pub async fn waf_subtree(req: Request) -> Response {
    monitor_body(&req);
    let child = req.span().map(|span| span.child("child.span"));
    let res = Response::text(WAF_BODY);
    if let Some(child) = child {
        child.finish();
    }
    res
}

fn monitor_body(req: &Request) {
    match parse_body(req.header("content-type"), req.body()) {
        Ok(body) => {
            monitor_parsed_http_body(req.span(), &body);
        }
        Err(e) => debug!("request body not monitored: {e}"),
    }
}

/// `/status?code=N`: N when it is a valid final status code, else 200.
///
/// 1xx codes are informational and cannot end a response, so they fall
/// back to 200 like any other unusable value.
pub async fn status(req: Request) -> Response {
    let code = req
        .query("code")
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .filter(|code| !code.is_informational())
        .unwrap_or(StatusCode::OK);
    Response::builder().status(code).text("OK")
}

/// `/make_distant_call?url=U`: traced `GET U`.
///
/// A transport failure is fatal: the request span is closed with the error,
/// the tracer is flushed and the process exits with status 1.
pub async fn make_distant_call(app: Arc<App>, req: Request) -> Response {
    if let Some(url) = req.query_non_empty("url") {
        match app.client.get(req.span(), &url).await {
            Ok(status) => debug!(%url, status = status.as_u16(), "distant call done"),
            Err(e) => {
                error!(%url, "distant call failed: {e}");
                if let Some(span) = req.span() {
                    let root = span.local_root();
                    root.set_error(e.to_string());
                    root.finish();
                }
                app.tracer.flush();
                std::process::exit(1);
            }
        }
    }
    Response::text("OK")
}

pub async fn headers(_req: Request) -> Response {
    Response::builder()
        .header("content-type", "text/plain")
        .header("content-length", &HEADERS_BODY.len().to_string())
        .header("content-language", "en-US")
        .header("x-content-type-options", "nosniff")
        .text(HEADERS_BODY)
}

pub async fn identify(req: Request) -> Response {
    if let Some(span) = req.span() {
        set_user(span, identity(false));
    }
    Response::text("Hello, identify!")
}

pub async fn identify_propagate(req: Request) -> Response {
    if let Some(span) = req.span() {
        set_user(span, identity(true));
    }
    Response::text("Hello, identify-propagate!")
}

fn identity(propagate: bool) -> User {
    User::new("usr.id")
        .email("usr.email")
        .name("usr.name")
        .session_id("usr.session_id")
        .role("usr.role")
        .scope("usr.scope")
        .propagate(propagate)
}

pub async fn user_login_success_event(req: Request) -> Response {
    let user_id = req.query_non_empty("event_user_id");
    let user_id = user_id.as_deref().unwrap_or(DEFAULT_EVENT_USER_ID);
    track_user_login_success_event(req.span(), user_id, &event_metadata());
    Response::status(StatusCode::OK)
}

pub async fn user_login_failure_event(req: Request) -> Response {
    let user_id = req.query_non_empty("event_user_id");
    let user_id = user_id.as_deref().unwrap_or(DEFAULT_EVENT_USER_ID);
    let exists = user_exists(req.query_non_empty("event_user_exists").as_deref());
    track_user_login_failure_event(req.span(), user_id, exists, &event_metadata());
    Response::status(StatusCode::OK)
}

pub async fn custom_event(req: Request) -> Response {
    let name = req.query_non_empty("event_name");
    let name = name.as_deref().unwrap_or(DEFAULT_EVENT_NAME);
    track_custom_event(req.span(), name, &event_metadata());
    Response::status(StatusCode::OK)
}

fn event_metadata() -> Metadata {
    Metadata::from([
        ("metadata0".to_owned(), "value0".to_owned()),
        ("metadata1".to_owned(), "value1".to_owned()),
    ])
}

/// The `exists` flag of the login failure event.
///
/// Defaults to true and only turns false when `event_user_exists` is given
/// and is *not* a boolean. Test harnesses assert on this exact behavior, so
/// `event_user_exists=false` still reports `true`.
pub fn user_exists(raw: Option<&str>) -> bool {
    match raw {
        Some(raw) => parse_bool(raw).is_some(),
        None => true,
    }
}

/// Accepts the spellings `1 t T TRUE true True` and `0 f F FALSE false False`.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn get(uri: &str) -> Request {
        Request::from_http(http::Request::builder().uri(uri).body(Bytes::new()).unwrap())
    }

    #[tokio::test]
    async fn status_echoes_valid_codes_only() {
        for (uri, expected) in [
            ("/status?code=201", 201),
            ("/status?code=418", 418),
            ("/status?code=999", 999),
            ("/status?code=100", 200),
            ("/status?code=103", 200),
            ("/status?code=200", 200),
            ("/status?code=99", 200),
            ("/status?code=1000", 200),
            ("/status?code=abc", 200),
            ("/status?code=", 200),
            ("/status?code=-5", 200),
            ("/status", 200),
        ] {
            let res = status(get(uri)).await;
            assert_eq!(res.status_code().as_u16(), expected, "{uri}");
            assert_eq!(res.body(), b"OK");
        }
    }

    #[tokio::test]
    async fn root_is_exact() {
        assert_eq!(root(get("/")).await.status_code(), StatusCode::OK);
        assert!(root(get("/")).await.body().is_empty());
        assert_eq!(root(get("/elsewhere")).await.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn headers_are_fixed() {
        let res = headers(get("/headers")).await;
        assert_eq!(res.header("content-type"), Some("text/plain"));
        assert_eq!(res.header("content-length"), Some("15"));
        assert_eq!(res.header("content-language"), Some("en-US"));
        assert_eq!(res.header("x-content-type-options"), Some("nosniff"));
        assert_eq!(res.body(), HEADERS_BODY.as_bytes());
    }

    #[tokio::test]
    async fn handlers_without_span_still_answer() {
        assert_eq!(identify(get("/identify")).await.body(), b"Hello, identify!");
        assert_eq!(
            identify_propagate(get("/identify-propagate")).await.body(),
            b"Hello, identify-propagate!"
        );
        assert_eq!(custom_event(get("/custom_event")).await.status_code(), StatusCode::OK);
        assert_eq!(waf_subtree(get("/waf/x")).await.body(), WAF_BODY.as_bytes());
    }

    #[test]
    fn login_failure_exists_flag_keeps_inverted_parse() {
        assert!(user_exists(None));
        assert!(user_exists(Some("false")));
        assert!(user_exists(Some("true")));
        assert!(user_exists(Some("0")));
        assert!(!user_exists(Some("nope")));
        assert!(!user_exists(Some("yes")));
    }

    #[test]
    fn metadata_is_fixed() {
        let metadata = event_metadata();
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["metadata0"], "value0");
        assert_eq!(metadata["metadata1"], "value1");
    }
}
