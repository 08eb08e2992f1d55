//! # gatehouse
//!
//! Guarded, dependency-injected request dispatch for async HTTP handlers.
//! The part between "a request matched a route" and "the handler runs".
//!
//! ## The contract
//!
//! The transport parses HTTP, verifies credentials and hands over a
//! [`Request`] carrying method, path, headers, body and claims. gatehouse does
//! not open sockets, verify tokens or run an event loop.
//!
//! What gatehouse does for every request:
//!
//! - **Guards**: an ordered [`GuardChain`]; the first refusal stops it (403)
//! - **Injection**: handler parameters filled from registered [`Provider`]s,
//!   the request itself, or a validated [`Contract`] body (422 on failure)
//! - **Merging**: path parameters, then explicit arguments, then injected
//!   values, later ones winning
//!
//! Each handler's parameters are classified once, on first dispatch, into a
//! cached [`HandlerPlan`]. Requests only follow the plan.
//!
//! ## Quick start
//!
//! ```rust
//! use gatehouse::{App, Args, AuthGuard, BoxError, Capability, ClaimsProvider, Controller,
//!                 CurrentUser, DeclaredType, FieldType, HandlerRef, Request, Response, Schema};
//! use http::{Method, StatusCode};
//! use serde_json::json;
//!
//! async fn create_user(args: Args) -> Result<Response, BoxError> {
//!     let user = args.value("user")?;
//!     let payload = args.contract("payload")?;
//!     Ok(Response::to_json(&json!({ "by": user["sub"], "created": payload }))
//!         .with_status(StatusCode::CREATED))
//! }
//!
//! # tokio_test();
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn tokio_test() {
//! let schema = Schema::new("CreateUser")
//!     .field("username", FieldType::String)
//!     .field("age", FieldType::Integer);
//!
//! let app = App::new()
//!     .provider(Capability::of::<CurrentUser>(), ClaimsProvider)
//!     .controller(
//!         Controller::new("/users").guard(AuthGuard).route(
//!             Method::POST,
//!             "/",
//!             HandlerRef::new("create_user", create_user)
//!                 .param("user", DeclaredType::capability::<CurrentUser>())
//!                 .param("payload", DeclaredType::contract(schema)),
//!         ),
//!     );
//!
//! let res = app
//!     .dispatch(
//!         Request::builder(Method::POST, "/users/")
//!             .claims(json!({ "sub": "u1" }))
//!             .body(r#"{"username":"alice","age":"30"}"#)
//!             .build(),
//!     )
//!     .await;
//! assert_eq!(res.status_code(), StatusCode::CREATED);
//! # }
//! ```

mod app;
mod contract;
mod endpoint;
mod error;
mod guard;
mod handler;
mod injector;
mod registry;
mod request;
mod response;

pub mod health;

pub use app::{App, Controller, RouteMeta};
pub use contract::{Contract, Field, FieldError, FieldErrors, FieldType, Schema, SchemaError};
pub use endpoint::Endpoint;
pub use error::{BoxError, Error};
pub use guard::{AuthGuard, Denial, DenyReason, FnGuard, Guard, GuardChain, guard_fn};
pub use handler::{Arg, ArgError, Args, BoxFuture, DeclaredType, Handler, HandlerBuilder, HandlerId, HandlerRef, Param};
pub use injector::{HandlerPlan, Injector, ParameterKind, ResolvedParameter};
pub use registry::{Capability, ClaimsProvider, CurrentUser, FnProvider, Provider, ProviderRegistry, provider_fn};
pub use request::{Request, RequestBuilder};
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
