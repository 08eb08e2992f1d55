//! Outgoing response type and the [`IntoResponse`] conversion trait.
//!
//! The pipeline hands a [`Response`] back to the transport untouched. How it
//! reaches the wire is the transport's business.

use http::StatusCode;
use serde::Serialize;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::body`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing response.
///
/// # Shortcuts (200 OK)
///
/// ```rust
/// use gatehouse::Response;
/// use http::StatusCode;
///
/// Response::json(r#"{"id":1}"#);
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use gatehouse::{ContentType, Response};
/// use http::StatusCode;
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(r#"{"id":42}"#);
///
/// Response::builder().body(ContentType::Xml, "<ok/>");
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) body: String,
    pub(crate) content_type: String,
    pub(crate) headers: Vec<(String, String)>,
}

impl Response {
    /// `200 OK` with `application/json`.
    pub fn json(body: impl Into<String>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK` with the serialised form of `value`, or a bare 500 if the
    /// value cannot be serialised.
    pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self::json(body),
            Err(_)   => Self::status(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// `200 OK` with `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// `200 OK` with `text/html; charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::builder().body(ContentType::Html, body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::builder().status(code).no_body()
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Vec::new(), status: StatusCode::OK }
    }

    /// Replaces the status code.
    pub fn with_status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Sets a header. `content-type` replaces the content type instead of
    /// adding a second header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if name.eq_ignore_ascii_case("content-type") {
            self.content_type = value.to_owned();
        } else {
            self.headers.push((name.to_owned(), value.to_owned()));
        }
        self
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn body(&self) -> &str { &self.body }
    pub fn content_type(&self) -> &str { &self.content_type }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
#[derive(Debug)]
pub struct ResponseBuilder {
    headers: Vec<(String, String)>,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<String>) -> Response {
        self.body(ContentType::Json, body)
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.body(ContentType::Text, body)
    }

    /// Terminate with a typed body.
    pub fn body(self, content_type: ContentType, body: impl Into<String>) -> Response {
        Response {
            status: self.status,
            body: body.into(),
            content_type: content_type.as_str().to_owned(),
            headers: self.headers,
        }
    }

    /// Terminate with no body (e.g. `204 No Content`).
    pub fn no_body(self) -> Response {
        Response {
            status: self.status,
            body: String::new(),
            content_type: ContentType::Text.as_str().to_owned(),
            headers: self.headers,
        }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into a [`Response`].
///
/// Implement on your own types to return them directly from handlers.
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

/// Return a [`StatusCode`] directly from a handler: `Ok(StatusCode::NO_CONTENT)`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

impl IntoResponse for serde_json::Value {
    fn into_response(self) -> Response { Response::json(self.to_string()) }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn content_type_header_replaces_content_type() {
        let res = Response::text("<p/>").with_header("Content-Type", "text/html");
        assert_eq!(res.content_type(), "text/html");
        assert!(res.headers().is_empty());

        let res = res.with_header("x-trace", "1");
        assert_eq!(res.header("X-Trace"), Some("1"));
    }

    #[test]
    fn builder_keeps_status_and_headers() {
        let res = Response::builder()
            .status(StatusCode::CREATED)
            .header("location", "/users/99")
            .json(r#"{"id":"99"}"#);
        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.header("location"), Some("/users/99"));
        assert_eq!(res.content_type(), "application/json");
    }

    #[test]
    fn json_value_renders_as_json() {
        let res = json!({"ok": true}).into_response();
        assert_eq!(res.body(), r#"{"ok":true}"#);
        assert_eq!(res.content_type(), "application/json");
    }
}
