//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Build a [`Response`] in the handler and return it. `content-length` is
//! filled in by hyper from the body unless the handler sets it explicitly.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use tracing::warn;

const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

/// An outgoing HTTP response.
///
/// # Shortcuts
///
/// ```rust
/// use weblog::Response;
/// use http::StatusCode;
///
/// Response::text("OK");
/// Response::status(StatusCode::NOT_FOUND);
/// ```
///
/// # Builder
///
/// ```rust
/// use weblog::Response;
/// use http::StatusCode;
///
/// Response::builder()
///     .status(StatusCode::IM_A_TEAPOT)
///     .header("content-language", "en-US")
///     .text("OK");
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { status: code, headers: HeaderMap::new(), body: Bytes::new() }
    }

    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { status: StatusCode::OK, headers: HeaderMap::new() }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

/// Fluent builder for [`Response`]. Defaults to `200 OK`.
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Sets a header, replacing an earlier value of the same name.
    ///
    /// An invalid name or value is logged and dropped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(header = name, "dropping invalid response header"),
        }
        self
    }

    /// Terminates with a text body. Keeps an explicitly set `content-type`.
    pub fn text(mut self, body: impl Into<String>) -> Response {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN_UTF8));
        }
        Response {
            status: self.status,
            headers: self.headers,
            body: Bytes::from(body.into()),
        }
    }
}

/// Conversion into an HTTP [`Response`], implemented for everything a
/// handler may return.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

/// `200 OK` with an empty body.
impl IntoResponse for () {
    fn into_response(self) -> Response { Response::status(StatusCode::OK) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_content_type_survives_text_body() {
        let res = Response::builder()
            .header("content-type", "text/plain")
            .header("content-length", "15")
            .text("Hello, headers!");
        assert_eq!(res.header("content-type"), Some("text/plain"));
        assert_eq!(res.headers().get_all("content-length").iter().count(), 1);
        assert_eq!(res.body(), b"Hello, headers!");
    }

    #[test]
    fn invalid_header_is_dropped() {
        let res = Response::builder().header("bad header", "x").text("");
        assert_eq!(res.headers().len(), 1);
        assert!(res.headers().contains_key(CONTENT_TYPE));
    }

    #[test]
    fn conversions() {
        assert_eq!(().into_response().status_code(), StatusCode::OK);
        assert!(().into_response().body().is_empty());
        assert_eq!(StatusCode::NOT_FOUND.into_response().status_code(), StatusCode::NOT_FOUND);
        assert_eq!("OK".into_response().header("content-type"), Some(TEXT_PLAIN_UTF8));
    }

    #[test]
    fn into_inner_keeps_status_and_headers() {
        let res = Response::builder()
            .status(StatusCode::IM_A_TEAPOT)
            .header("x-content-type-options", "nosniff")
            .text("OK")
            .into_inner();
        assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(res.headers()["x-content-type-options"], "nosniff");
    }
}
