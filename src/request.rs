//! Incoming HTTP request type.

use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Uri};

use crate::apm::Span;

/// An incoming request with its body fully buffered.
///
/// Carries the request's active span when the trace middleware opened one.
pub struct Request {
    parts: Parts,
    body: Bytes,
    params: HashMap<String, String>,
    span: Option<Span>,
}

impl Request {
    pub(crate) fn new(parts: Parts, body: Bytes, params: HashMap<String, String>) -> Self {
        Self { parts, body, params, span: None }
    }

    /// Builds a request outside the server, mostly for handler tests.
    pub fn from_http(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::new(parts, body, HashMap::new())
    }

    pub fn method(&self) -> &Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Header value as a string, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/params/{myParam}`, `req.param("myParam")` on
    /// `/params/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// First value of query parameter `key`, percent-decoded.
    ///
    /// A key present with an empty value (`?code=`) yields `Some("")`.
    pub fn query(&self, key: &str) -> Option<Cow<'_, str>> {
        let query = self.parts.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Like [`query`](Self::query), treating an empty value as absent.
    pub fn query_non_empty(&self, key: &str) -> Option<Cow<'_, str>> {
        self.query(key).filter(|v| !v.is_empty())
    }

    /// The span opened for this request, if tracing is enabled.
    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub(crate) fn set_span(&mut self, span: Span) {
        self.span = Some(span);
    }
}
