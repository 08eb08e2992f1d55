//! Unified error type.

use http::{Method, StatusCode};
use serde_json::json;
use thiserror::Error;

use crate::contract::SchemaError;
use crate::guard::Denial;
use crate::registry::Capability;
use crate::response::{IntoResponse, Response};

/// Boxed error produced by collaborator code: providers, guards, handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by the dispatch pipeline.
///
/// Caller-input problems ([`AccessDenied`](Error::AccessDenied),
/// [`ContractValidationFailed`](Error::ContractValidationFailed),
/// [`RouteNotFound`](Error::RouteNotFound)) render as 4xx responses with
/// enough detail to act on. Everything else renders as a generic 500.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no provider registered for capability `{0}`")]
    UnregisteredCapability(Capability),

    #[error("provider for capability `{capability}` failed: {source}")]
    ProviderFailed {
        capability: Capability,
        #[source]
        source: BoxError,
    },

    #[error("contract validation failed for parameter `{param}`: {source}")]
    ContractValidationFailed {
        param: String,
        #[source]
        source: SchemaError,
    },

    #[error("access denied: {0}")]
    AccessDenied(#[source] Denial),

    /// Raised by the handler itself. Passed through uninspected.
    #[error("handler `{handler}` failed: {source}")]
    HandlerRaised {
        handler: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("no route for {method} {path}")]
    RouteNotFound { method: Method, path: String },
}

impl Error {
    /// The status class the transport should answer with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::AccessDenied(_)                => StatusCode::FORBIDDEN,
            Self::ContractValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RouteNotFound { .. }           => StatusCode::NOT_FOUND,
            Self::UnregisteredCapability(_)
            | Self::ProviderFailed { .. }
            | Self::HandlerRaised { .. }         => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::AccessDenied(denial) => json!({
                "error": "forbidden",
                "guard": denial.guard(),
            }),
            Self::ContractValidationFailed { param, source } => json!({
                "error": "validation_failed",
                "param": param,
                "detail": source.to_string(),
                "errors": source.field_errors(),
            }),
            Self::RouteNotFound { .. } => json!({ "error": "not_found" }),
            Self::UnregisteredCapability(_)
            | Self::ProviderFailed { .. }
            | Self::HandlerRaised { .. } => json!({ "error": "internal server error" }),
        };
        Response::builder().status(status).json(body.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::contract::{FieldType, Schema};

    #[test]
    fn server_side_failures_do_not_leak_detail() {
        let err = Error::HandlerRaised {
            handler: "create_user",
            source: "database password is hunter2".into(),
        };
        let res = err.into_response();
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!res.body().contains("hunter2"));
        assert!(!res.body().contains("create_user"));
    }

    #[test]
    fn validation_failure_lists_every_field() {
        let schema = Schema::new("CreateUser")
            .field("username", FieldType::String)
            .field("age", FieldType::Integer);
        let source = schema.parse(&json!({"age": "old"})).unwrap_err();
        let res = Error::ContractValidationFailed { param: "payload".into(), source }.into_response();

        assert_eq!(res.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = serde_json::from_str(res.body()).unwrap();
        assert_eq!(body["param"], "payload");
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);
        assert_eq!(body["errors"][0]["code"], "REQUIRED");
        assert_eq!(body["errors"][1]["code"], "INVALID_TYPE");
    }

    #[test]
    fn missing_route_is_not_found() {
        let err = Error::RouteNotFound { method: Method::GET, path: "/nope".into() };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "no route for GET /nope");
    }
}
