//! Incoming request type, as handed over by the transport.

use std::collections::HashMap;

use http::Method;
use serde_json::{Map, Value};

/// An incoming request, already parsed by the transport.
///
/// `claims` is populated only when the transport verified the caller's
/// credentials for a route flagged as requiring authentication.
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Option<String>,
    pub(crate) params: HashMap<String, String>,
    pub(crate) claims: Option<Map<String, Value>>,
}

impl Request {
    /// Starts building a request for `method` + `path`.
    pub fn builder(method: Method, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            inner: Request {
                method,
                path: path.into(),
                headers: Vec::new(),
                body: None,
                params: HashMap::new(),
                claims: None,
            },
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn params(&self) -> &HashMap<String, String> { &self.params }

    /// Raw body text, if the transport received one.
    pub fn body(&self) -> Option<&str> { self.body.as_deref() }

    /// Validated credential claims, if the caller is authenticated.
    pub fn claims(&self) -> Option<&Map<String, Value>> { self.claims.as_ref() }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Parses the body as JSON. An absent or blank body reads as `{}`.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        match self.body.as_deref().map(str::trim) {
            None | Some("") => Ok(Value::Object(Map::new())),
            Some(text) => serde_json::from_str(text),
        }
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }
}

/// Fluent builder for [`Request`]. Obtain via [`Request::builder`].
#[derive(Debug)]
pub struct RequestBuilder {
    inner: Request,
}

impl RequestBuilder {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.inner.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.inner.params.insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.inner.body = Some(body.into());
        self
    }

    /// Attaches authenticated claims. Non-object values are ignored.
    pub fn claims(mut self, claims: Value) -> Self {
        if let Value::Object(map) = claims {
            self.inner.claims = Some(map);
        }
        self
    }

    pub fn build(self) -> Request {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let req = Request::builder(Method::GET, "/")
            .header("X-Request-Id", "abc")
            .build();
        assert_eq!(req.header("x-request-id"), Some("abc"));
        assert_eq!(req.header("missing"), None);
    }

    #[test]
    fn blank_body_reads_as_empty_object() {
        let req = Request::builder(Method::POST, "/users").body("   ").build();
        assert_eq!(req.json().unwrap(), json!({}));

        let req = Request::builder(Method::POST, "/users").build();
        assert_eq!(req.json().unwrap(), json!({}));
    }

    #[test]
    fn claims_must_be_an_object() {
        let req = Request::builder(Method::GET, "/")
            .claims(json!("not-a-map"))
            .build();
        assert!(req.claims().is_none());

        let req = Request::builder(Method::GET, "/")
            .claims(json!({"sub": "u1"}))
            .build();
        assert_eq!(req.claims().unwrap()["sub"], "u1");
    }
}
