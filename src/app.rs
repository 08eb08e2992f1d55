//! Application assembly: route table, controllers and in-process dispatch.
//!
//! One radix tree per HTTP method, O(path-length) lookup. Routes are
//! registered during assembly, before traffic; after that the table is only
//! read. A transport adapter turns its native request into a [`Request`] and
//! hands it to [`App::dispatch`].

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::guard::{Guard, GuardChain};
use crate::handler::{Args, HandlerId, HandlerRef};
use crate::health::HealthState;
use crate::injector::Injector;
use crate::registry::{Capability, Provider};
use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── RouteMeta ─────────────────────────────────────────────────────────────────

/// What was registered for one route. Never changes after registration.
#[derive(Clone, Debug)]
pub struct RouteMeta {
    pub method: Method,
    pub path: String,
    pub handler_id: HandlerId,
    pub handler_name: &'static str,
    pub guards: GuardChain,
    /// True when any guard asks the transport to verify credentials first.
    pub auth_required: bool,
}

// ── App ───────────────────────────────────────────────────────────────────────

/// The application: provider registry, plan cache and route table.
///
/// Build it once at startup. Each builder call returns `self` so
/// registrations chain:
///
/// ```rust
/// use gatehouse::{App, Args, AuthGuard, BoxError, Capability, ClaimsProvider, CurrentUser,
///                 DeclaredType, GuardChain, HandlerRef};
/// use http::Method;
///
/// async fn me(args: Args) -> Result<serde_json::Value, BoxError> {
///     Ok(args.value("user")?.clone())
/// }
///
/// let app = App::new()
///     .provider(Capability::of::<CurrentUser>(), ClaimsProvider)
///     .route_guarded(
///         Method::GET,
///         "/me",
///         HandlerRef::new("me", me).param("user", DeclaredType::capability::<CurrentUser>()),
///         GuardChain::new().with(AuthGuard),
///     );
/// assert!(app.routes()[0].auth_required);
/// ```
pub struct App {
    injector: Arc<Injector>,
    routes: HashMap<Method, MatchitRouter<Arc<Endpoint>>>,
    meta: Vec<RouteMeta>,
    health: HealthState,
}

impl App {
    pub fn new() -> Self {
        Self::with_injector(Arc::new(Injector::new()))
    }

    /// Assembles around an existing injector, e.g. one shared with other apps.
    pub fn with_injector(injector: Arc<Injector>) -> Self {
        Self { injector, routes: HashMap::new(), meta: Vec::new(), health: HealthState::new() }
    }

    /// Registers `provider` for `capability`, replacing any earlier one.
    ///
    /// Register providers before the routes that use them are first
    /// dispatched: a handler's plan is fixed on its first call.
    pub fn provider(self, capability: Capability, provider: impl Provider) -> Self {
        self.injector.register(capability, provider);
        self
    }

    /// Registers an unguarded route.
    ///
    /// Path parameters use `{name}` syntax. Panics if the pattern is invalid
    /// or conflicts with an existing route.
    pub fn route(self, method: Method, path: &str, handler: impl Into<HandlerRef>) -> Self {
        self.route_guarded(method, path, handler, GuardChain::new())
    }

    /// Registers a route behind `guards`.
    ///
    /// The same handler (or a clone of it) may be mounted on several routes
    /// only with the same guard names. Panics otherwise.
    pub fn route_guarded(
        mut self,
        method: Method,
        path: &str,
        handler: impl Into<HandlerRef>,
        guards: GuardChain,
    ) -> Self {
        self.add(method, path, handler.into(), guards);
        self
    }

    /// Mounts every route of `controller` under its prefix.
    pub fn controller(mut self, controller: Controller) -> Self {
        let Controller { prefix, guards, routes } = controller;
        debug!(prefix = %prefix, routes = routes.len(), "mounting controller");
        for route in routes {
            let path = join_path(&prefix, &route.path);
            self.add(route.method, &path, route.handler, guards.then(&route.guards));
        }
        self
    }

    /// Mounts the health endpoint at `path` (`GET`).
    pub fn health(mut self, path: &str) -> Self {
        let handler = self.health.handler();
        self.add(Method::GET, path, handler, GuardChain::new());
        self
    }

    /// Flips the health status from `starting` to `healthy`.
    pub fn mark_ready(&self) {
        self.health.mark_ready();
        info!(routes = self.meta.len(), "application ready");
    }

    pub fn injector(&self) -> &Arc<Injector> { &self.injector }
    pub fn routes(&self) -> &[RouteMeta] { &self.meta }
    pub fn health_state(&self) -> &HealthState { &self.health }

    fn add(&mut self, method: Method, path: &str, handler: HandlerRef, guards: GuardChain) {
        // A handler's plan, guards included, is shared by every route it is
        // mounted on, so all of those routes must declare the same chain.
        if let Some(mounted) = self.meta.iter().find(|m| m.handler_id == handler.id()) {
            if !mounted.guards.names().eq(guards.names()) {
                panic!(
                    "handler `{}` mounted at `{path}` with guards {guards:?}, \
                     but already mounted at `{}` with guards {:?}",
                    handler.name(),
                    mounted.path,
                    mounted.guards,
                );
            }
        }

        let meta = RouteMeta {
            method: method.clone(),
            path: path.to_owned(),
            handler_id: handler.id(),
            handler_name: handler.name(),
            auth_required: guards.requires_authentication(),
            guards: guards.clone(),
        };
        let endpoint = Endpoint::new(Arc::clone(&self.injector), handler, guards);

        self.routes
            .entry(method)
            .or_default()
            .insert(path, Arc::new(endpoint))
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));

        debug!(
            method = %meta.method,
            path = %meta.path,
            handler = meta.handler_name,
            auth_required = meta.auth_required,
            "route registered",
        );
        self.meta.push(meta);
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(Arc<Endpoint>, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let endpoint = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((endpoint, params))
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Routes and runs one request, rendering any error as a response.
    pub async fn dispatch(&self, request: Request) -> Response {
        let method = request.method().clone();
        let path = request.path().to_owned();

        let response = self.try_dispatch(request).await.unwrap_or_else(|e| e.into_response());
        debug!(method = %method, path = %path, status = response.status_code().as_u16(), "dispatched");
        response
    }

    /// Routes and runs one request.
    pub async fn try_dispatch(&self, request: Request) -> Result<Response, Error> {
        self.dispatch_with(request, Args::new()).await
    }

    /// Like [`try_dispatch`](Self::try_dispatch), with extra arguments that
    /// override path parameters.
    pub async fn dispatch_with(&self, mut request: Request, explicit: Args) -> Result<Response, Error> {
        let Some((endpoint, params)) = self.lookup(request.method(), request.path()) else {
            debug!(method = %request.method(), path = request.path(), "no route");
            return Err(Error::RouteNotFound {
                method: request.method().clone(),
                path: request.path().to_owned(),
            });
        };

        request.set_params(params);
        endpoint.call(Arc::new(request), explicit).await
    }
}

impl Default for App {
    fn default() -> Self { Self::new() }
}

/// `prefix` without its trailing slashes, then `path` with a leading one.
fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix('/') {
        Some(rest) => format!("{prefix}/{rest}"),
        None       => format!("{prefix}/{path}"),
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

struct ControllerRoute {
    method: Method,
    path: String,
    handler: HandlerRef,
    guards: GuardChain,
}

/// A group of routes sharing a path prefix and a guard list.
///
/// Controller guards run before each route's own guards.
///
/// ```rust
/// use gatehouse::{App, Args, AuthGuard, BoxError, Controller, HandlerRef};
/// use http::Method;
///
/// async fn list(_: Args) -> Result<&'static str, BoxError> { Ok("[]") }
///
/// let users = Controller::new("/users")
///     .guard(AuthGuard)
///     .route(Method::GET, "/", HandlerRef::new("list_users", list));
/// let app = App::new().controller(users);
/// assert_eq!(app.routes()[0].path, "/users/");
/// ```
pub struct Controller {
    prefix: String,
    guards: GuardChain,
    routes: Vec<ControllerRoute>,
}

impl Controller {
    pub fn new(prefix: &str) -> Self {
        Self { prefix: prefix.to_owned(), guards: GuardChain::new(), routes: Vec::new() }
    }

    /// Adds a guard for every route of this controller.
    pub fn guard(mut self, guard: impl Guard) -> Self {
        self.guards = self.guards.with(guard);
        self
    }

    pub fn route(self, method: Method, path: &str, handler: impl Into<HandlerRef>) -> Self {
        self.route_guarded(method, path, handler, GuardChain::new())
    }

    /// Adds a route with guards of its own, run after the controller's.
    pub fn route_guarded(
        mut self,
        method: Method,
        path: &str,
        handler: impl Into<HandlerRef>,
        guards: GuardChain,
    ) -> Self {
        self.routes.push(ControllerRoute { method, path: path.to_owned(), handler: handler.into(), guards });
        self
    }

    pub fn prefix(&self) -> &str { &self.prefix }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use serde_json::{Value, json};

    use super::*;
    use crate::error::BoxError;
    use crate::guard::{AuthGuard, guard_fn};
    use crate::handler::DeclaredType;

    async fn show(args: Args) -> Result<String, BoxError> {
        Ok(format!("item {}", args.str("id")?))
    }

    fn body(res: &Response) -> Value {
        serde_json::from_str(res.body()).unwrap()
    }

    #[test]
    fn joins_prefix_and_path() {
        assert_eq!(join_path("/users/", "/{id}"), "/users/{id}");
        assert_eq!(join_path("/users", "{id}"), "/users/{id}");
        assert_eq!(join_path("", ""), "/");
        assert_eq!(join_path("/", "/"), "/");
        assert_eq!(join_path("/users", ""), "/users/");
    }

    #[test]
    fn controller_guards_run_before_route_guards() {
        let app = App::new().controller(
            Controller::new("/admin")
                .guard(AuthGuard)
                .route_guarded(
                    Method::DELETE,
                    "/{id}",
                    HandlerRef::new("delete", show),
                    GuardChain::new().with(guard_fn("admins_only", |_| true)),
                )
                .route(Method::GET, "/stats", HandlerRef::new("stats", show)),
        );

        let routes = app.routes();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].path, "/admin/{id}");
        assert_eq!(routes[0].guards.names().collect::<Vec<_>>(), ["AuthGuard", "admins_only"]);
        assert!(routes[0].auth_required);
        assert_eq!(routes[1].guards.names().collect::<Vec<_>>(), ["AuthGuard"]);
    }

    #[test]
    fn unguarded_route_needs_no_auth() {
        let app = App::new().route(Method::GET, "/items/{id}", HandlerRef::new("show", show));
        assert!(!app.routes()[0].auth_required);
        assert_eq!(app.routes()[0].handler_name, "show");
    }

    #[test]
    #[should_panic(expected = "invalid route `/items/{id}`")]
    fn duplicate_route_panics() {
        let _ = App::new()
            .route(Method::GET, "/items/{id}", HandlerRef::new("a", show))
            .route(Method::GET, "/items/{id}", HandlerRef::new("b", show));
    }

    #[test]
    #[should_panic(expected = "already mounted at `/public`")]
    fn shared_handler_with_different_guards_panics() {
        let shared = HandlerRef::new("show", show).build();
        let _ = App::new()
            .route(Method::GET, "/public", shared.clone())
            .route_guarded(Method::GET, "/admin", shared, GuardChain::new().with(AuthGuard));
    }

    #[tokio::test]
    async fn shared_handler_with_the_same_guards_is_allowed() {
        let shared = HandlerRef::blocking("hello", |_: Args| Ok::<_, BoxError>("hello")).build();
        let app = App::new()
            .route_guarded(Method::GET, "/a", shared.clone(), GuardChain::new().with(AuthGuard))
            .controller(Controller::new("/b").guard(AuthGuard).route(Method::GET, "/", shared));
        assert_eq!(app.routes().len(), 2);

        let anonymous = app.dispatch(Request::builder(Method::GET, "/a").build()).await;
        assert_eq!(anonymous.status_code(), StatusCode::FORBIDDEN);
        let anonymous = app.dispatch(Request::builder(Method::GET, "/b/").build()).await;
        assert_eq!(anonymous.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn path_parameters_reach_the_handler() {
        let app = App::new().route(
            Method::GET,
            "/items/{id}",
            HandlerRef::new("show", show).param("id", DeclaredType::Plain("String")),
        );

        let res = app.dispatch(Request::builder(Method::GET, "/items/42").build()).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body(), "item 42");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = App::new().route(Method::GET, "/items/{id}", HandlerRef::new("show", show));

        let err = app.try_dispatch(Request::builder(Method::POST, "/items/1").build()).await.unwrap_err();
        assert!(matches!(err, Error::RouteNotFound { ref method, .. } if *method == Method::POST));

        let res = app.dispatch(Request::builder(Method::GET, "/nope").build()).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(body(&res), json!({"error": "not_found"}));
    }

    #[tokio::test]
    async fn health_reports_readiness() {
        let app = App::new().health("/health");

        let res = app.dispatch(Request::builder(Method::GET, "/health").build()).await;
        assert_eq!(body(&res)["status"], "starting");

        app.mark_ready();
        let res = app.dispatch(Request::builder(Method::GET, "/health").build()).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(body(&res)["status"], "healthy");
    }
}
