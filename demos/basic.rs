//! Minimal gatehouse example: a guarded users controller driven in-process.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! No sockets are opened. Each request below goes through route lookup,
//! guards, injection and the handler, and the response is printed.

use gatehouse::{
    App, Args, AuthGuard, BoxError, Capability, ClaimsProvider, Controller, CurrentUser,
    DeclaredType, FieldType, GuardChain, HandlerRef, Request, Response, Schema, guard_fn,
    provider_fn,
};
use http::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Capability tag for the tenant the caller belongs to.
struct Tenant;

#[derive(Debug, Deserialize)]
struct CreateUser {
    username: String,
    age: i64,
    admin: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let create_schema = Schema::new("CreateUser")
        .field("username", FieldType::String)
        .field("age", FieldType::Integer)
        .field_or("admin", FieldType::Boolean, json!(false));

    let users = Controller::new("/users")
        .guard(AuthGuard)
        .route(
            Method::GET,
            "/{id}",
            HandlerRef::new("get_user", get_user)
                .param("id", DeclaredType::Plain("u64"))
                .param("tenant", DeclaredType::capability::<Tenant>()),
        )
        .route(
            Method::POST,
            "/",
            HandlerRef::new("create_user", create_user)
                .param("user", DeclaredType::capability::<CurrentUser>())
                .param("payload", DeclaredType::contract(create_schema)),
        )
        .route_guarded(
            Method::DELETE,
            "/{id}",
            HandlerRef::blocking("delete_user", |_: Args| Ok::<_, BoxError>(StatusCode::NO_CONTENT)),
            GuardChain::new().with(guard_fn("admins_only", |req| {
                req.claims().and_then(|c| c.get("role")).is_some_and(|r| r == "admin")
            })),
        );

    let app = App::new()
        .provider(Capability::of::<CurrentUser>(), ClaimsProvider)
        .provider(Capability::of::<Tenant>(), provider_fn(|req| async move {
            Ok::<_, BoxError>(json!(req.header("x-tenant").unwrap_or("default")))
        }))
        .controller(users)
        .health("/health");
    app.mark_ready();

    for route in app.routes() {
        println!("{:<6} {:<14} auth={}", route.method, route.path, route.auth_required);
    }

    let alice = json!({ "sub": "u1", "role": "member" });
    let requests = [
        Request::builder(Method::GET, "/users/42").header("x-tenant", "acme").claims(alice.clone()).build(),
        Request::builder(Method::GET, "/users/42").build(),
        Request::builder(Method::POST, "/users/")
            .claims(alice.clone())
            .body(r#"{"username":"alice","age":"30"}"#)
            .build(),
        Request::builder(Method::POST, "/users/").claims(alice.clone()).body(r#"{"age":"thirty"}"#).build(),
        Request::builder(Method::DELETE, "/users/42").claims(alice).build(),
        Request::builder(Method::GET, "/health").build(),
        Request::builder(Method::GET, "/nowhere").build(),
    ];

    for request in requests {
        let line = format!("{} {}", request.method(), request.path());
        let res = app.dispatch(request).await;
        println!("{line:<22} -> {} {}", res.status_code().as_u16(), res.body());
    }
}

// GET /users/{id}
async fn get_user(args: Args) -> Result<Response, BoxError> {
    let id: u64 = args.parse("id")?;
    let tenant = args.str("tenant")?;
    Ok(Response::to_json(&json!({ "id": id, "tenant": tenant })))
}

// POST /users/
//
// The payload was validated and coerced before the handler runs; "30" is 30.
async fn create_user(args: Args) -> Result<Response, BoxError> {
    let by = args.value("user")?["sub"].clone();
    let input: CreateUser = args.contract_as("payload")?;

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json(json!({ "id": 99, "username": input.username, "age": input.age, "admin": input.admin, "by": by }).to_string()))
}
