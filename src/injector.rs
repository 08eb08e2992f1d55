//! Handler metadata cache and per-request dependency resolution.
//!
//! Resolution happens in two phases:
//!
//! 1. **Plan** (once per handler). [`Injector::register_handler`] walks the
//!    handler's declared parameters and classifies each one into a
//!    [`ParameterKind`]. The result, a [`HandlerPlan`], is stored under the
//!    handler's [`HandlerId`] and never rebuilt.
//! 2. **Resolve** (every request). [`Injector::resolve`] walks the plan and
//!    branches on the precomputed kind only. No declaration is inspected on
//!    the hot path.
//!
//! The first registration of a handler fixes its guard list. Registering the
//! same handler again, even with different guards, returns the stored plan
//! unchanged.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::contract::{Schema, SchemaError};
use crate::error::Error;
use crate::guard::GuardChain;
use crate::handler::{Arg, Args, DeclaredType, HandlerId, HandlerRef};
use crate::registry::{Capability, Provider, ProviderRegistry};
use crate::request::Request;

/// How a parameter gets its value. Fixed when the plan is built.
#[derive(Clone, Debug)]
pub enum ParameterKind {
    /// The request itself.
    RequestRef,
    /// Resolved through the provider registry.
    ProviderRef(Capability),
    /// The request body, validated against the schema.
    ContractRef(Arc<Schema>),
    /// Left for the caller: path parameters or explicit arguments.
    PlainRef,
}

#[derive(Clone, Debug)]
pub struct ResolvedParameter {
    pub name: String,
    pub declared_type: DeclaredType,
    pub kind: ParameterKind,
}

/// Precomputed resolution strategy for one handler.
pub struct HandlerPlan {
    handler: HandlerRef,
    params: Vec<ResolvedParameter>,
    is_suspending: bool,
    guards: GuardChain,
}

impl HandlerPlan {
    pub fn handler(&self) -> &HandlerRef { &self.handler }
    pub fn params(&self) -> &[ResolvedParameter] { &self.params }
    pub fn is_suspending(&self) -> bool { self.is_suspending }
    pub fn guards(&self) -> &GuardChain { &self.guards }
}

impl fmt::Debug for HandlerPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerPlan")
            .field("handler", &self.handler.name())
            .field("id", &self.handler.id())
            .field("params", &self.params)
            .field("is_suspending", &self.is_suspending)
            .field("guards", &self.guards)
            .finish()
    }
}

/// Owns the provider registry and the plan cache.
#[derive(Debug, Default)]
pub struct Injector {
    registry: ProviderRegistry,
    plans: DashMap<HandlerId, Arc<HandlerPlan>>,
}

impl Injector {
    pub fn new() -> Self { Self::default() }

    pub fn with_registry(registry: ProviderRegistry) -> Self {
        Self { registry, plans: DashMap::new() }
    }

    pub fn registry(&self) -> &ProviderRegistry { &self.registry }

    /// Shorthand for `registry().register(..)`.
    pub fn register(&self, capability: Capability, provider: impl Provider) {
        self.registry.register(capability, provider);
    }

    /// Returns the plan for `handler`, building it on first sight.
    ///
    /// Concurrent first calls for the same handler store exactly one plan and
    /// all of them get that one back.
    pub fn register_handler(&self, handler: &HandlerRef, guards: &GuardChain) -> Arc<HandlerPlan> {
        if let Some(plan) = self.plans.get(&handler.id()) {
            return Arc::clone(plan.value());
        }

        let plan = self.plans
            .entry(handler.id())
            .or_insert_with(|| Arc::new(self.build_plan(handler, guards)));
        Arc::clone(plan.value())
    }

    pub fn plan(&self, id: HandlerId) -> Option<Arc<HandlerPlan>> {
        self.plans.get(&id).map(|plan| Arc::clone(plan.value()))
    }

    pub fn plan_count(&self) -> usize { self.plans.len() }

    fn build_plan(&self, handler: &HandlerRef, guards: &GuardChain) -> HandlerPlan {
        let params = handler.params().iter()
            .map(|param| ResolvedParameter {
                name: param.name().to_owned(),
                declared_type: param.declared_type().clone(),
                kind: self.classify(handler, param.name(), param.declared_type()),
            })
            .collect();

        let plan = HandlerPlan {
            handler: handler.clone(),
            params,
            is_suspending: handler.is_suspending(),
            guards: guards.clone(),
        };
        debug!(
            handler = handler.name(),
            id = %handler.id(),
            params = plan.params.len(),
            guards = plan.guards.len(),
            "handler plan built",
        );
        plan
    }

    fn classify(&self, handler: &HandlerRef, name: &str, declared: &DeclaredType) -> ParameterKind {
        match declared {
            DeclaredType::Request => ParameterKind::RequestRef,
            DeclaredType::Capability(capability) if self.registry.contains(*capability) => {
                ParameterKind::ProviderRef(*capability)
            }
            DeclaredType::Contract(schema) => ParameterKind::ContractRef(Arc::clone(schema)),
            DeclaredType::Capability(capability) => {
                warn!(
                    handler = handler.name(),
                    param = name,
                    capability = %capability,
                    "no provider registered; parameter left for the caller",
                );
                ParameterKind::PlainRef
            }
            DeclaredType::Plain(_) => ParameterKind::PlainRef,
        }
    }

    /// Produces the injected arguments for one request.
    ///
    /// Parameters are resolved in declaration order; the first failure stops
    /// resolution. `PlainRef` parameters are left out.
    pub async fn resolve(&self, plan: &HandlerPlan, request: &Arc<Request>) -> Result<Args, Error> {
        let mut args = Args::with_capacity(plan.params.len());

        for param in &plan.params {
            match &param.kind {
                ParameterKind::RequestRef => {
                    args.insert(&param.name, Arg::Request(Arc::clone(request)));
                }
                ParameterKind::ProviderRef(capability) => {
                    let value = self.registry.resolve(*capability, request).await?;
                    args.insert(&param.name, Arg::Value(value));
                }
                ParameterKind::ContractRef(schema) => {
                    let contract = request.json()
                        .map_err(SchemaError::from)
                        .and_then(|payload| schema.parse(&payload))
                        .map_err(|source| Error::ContractValidationFailed {
                            param: param.name.clone(),
                            source,
                        })?;
                    args.insert(&param.name, Arg::Contract(contract));
                }
                ParameterKind::PlainRef => {}
            }
        }

        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::Method;
    use serde_json::{Value, json};

    use super::*;
    use crate::contract::FieldType;
    use crate::error::BoxError;
    use crate::guard::{AuthGuard, guard_fn};
    use crate::registry::{ClaimsProvider, CurrentUser, provider_fn};
    use crate::response::Response;

    struct Clock;

    async fn noop(_: Args) -> Result<Response, BoxError> {
        Ok(Response::text("ok"))
    }

    fn schema() -> Schema {
        Schema::new("CreateUser")
            .field("username", FieldType::String)
            .field("age", FieldType::Integer)
    }

    fn handler() -> HandlerRef {
        HandlerRef::new("create_user", noop)
            .param("req", DeclaredType::Request)
            .param("user", DeclaredType::capability::<CurrentUser>())
            .param("payload", DeclaredType::contract(schema()))
            .param("id", DeclaredType::Plain("u64"))
            .build()
    }

    fn injector() -> Injector {
        let injector = Injector::new();
        injector.register(Capability::of::<CurrentUser>(), ClaimsProvider);
        injector
    }

    fn kinds(plan: &HandlerPlan) -> Vec<String> {
        plan.params().iter()
            .map(|p| match &p.kind {
                ParameterKind::RequestRef => format!("{}:request", p.name),
                ParameterKind::ProviderRef(c) => format!("{}:provider({c})", p.name),
                ParameterKind::ContractRef(s) => format!("{}:contract({})", p.name, s.name()),
                ParameterKind::PlainRef => format!("{}:plain", p.name),
            })
            .collect()
    }

    #[test]
    fn classifies_each_parameter_in_declaration_order() {
        let plan = injector().register_handler(&handler(), &GuardChain::new());
        assert_eq!(kinds(&plan), [
            "req:request",
            "user:provider(CurrentUser)",
            "payload:contract(CreateUser)",
            "id:plain",
        ]);
        assert!(plan.is_suspending());
    }

    #[test]
    fn unregistered_capability_is_left_for_the_caller() {
        let handler = HandlerRef::new("now", noop)
            .param("clock", DeclaredType::capability::<Clock>())
            .build();
        let plan = injector().register_handler(&handler, &GuardChain::new());
        assert!(matches!(plan.params()[0].kind, ParameterKind::PlainRef));
    }

    #[test]
    fn registration_is_idempotent_and_first_guards_win() {
        let injector = injector();
        let handler = handler();

        let first = injector.register_handler(&handler, &GuardChain::new().with(AuthGuard));
        let second = injector.register_handler(
            &handler.clone(),
            &GuardChain::new().with(guard_fn("other", |_| true)).with(AuthGuard),
        );

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(kinds(&first), kinds(&second));
        assert_eq!(second.guards().names().collect::<Vec<_>>(), ["AuthGuard"]);
        assert_eq!(injector.plan_count(), 1);
        assert!(injector.plan(handler.id()).is_some());
    }

    #[test]
    fn concurrent_first_registrations_converge() {
        let injector = Arc::new(injector());
        let handler = handler();

        let plans: Vec<_> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| injector.register_handler(&handler, &GuardChain::new())))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert!(plans.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(injector.plan_count(), 1);
    }

    #[tokio::test]
    async fn resolves_request_provider_and_contract() {
        let injector = injector();
        let plan = injector.register_handler(&handler(), &GuardChain::new());
        let request = Arc::new(
            Request::builder(Method::POST, "/users")
                .claims(json!({"sub": "u1"}))
                .body(r#"{"username":"alice","age":"30"}"#)
                .build(),
        );

        let args = injector.resolve(&plan, &request).await.unwrap();

        assert!(Arc::ptr_eq(args.request("req").unwrap(), &request));
        assert_eq!(args.value("user").unwrap(), &json!({"sub": "u1"}));
        assert_eq!(args.contract("payload").unwrap().get("age"), Some(&json!(30)));
        assert!(!args.contains("id"));
    }

    #[tokio::test]
    async fn empty_body_is_validated_as_an_empty_object() {
        let injector = injector();
        let plan = injector.register_handler(&handler(), &GuardChain::new());
        let request = Arc::new(Request::builder(Method::POST, "/users").build());

        let err = injector.resolve(&plan, &request).await.unwrap_err();
        match err {
            Error::ContractValidationFailed { param, source } => {
                assert_eq!(param, "payload");
                assert_eq!(source.field_errors().len(), 2);
            }
            other => panic!("expected a validation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_and_non_object_bodies_fail_validation() {
        let injector = injector();
        let plan = injector.register_handler(&handler(), &GuardChain::new());

        for (body, expect_json_error) in [("{oops", true), ("[1]", false)] {
            let request = Arc::new(Request::builder(Method::POST, "/users").body(body).build());
            match injector.resolve(&plan, &request).await.unwrap_err() {
                Error::ContractValidationFailed { param, source } => {
                    assert_eq!(param, "payload");
                    assert_eq!(matches!(source, SchemaError::InvalidJson(_)), expect_json_error);
                    assert!(source.field_errors().is_empty());
                }
                other => panic!("expected a validation failure, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn provider_failure_stops_resolution() {
        struct Flaky;
        let calls = Arc::new(AtomicUsize::new(0));
        let injector = Injector::new();
        let counter = Arc::clone(&calls);
        injector.register(Capability::of::<Flaky>(), provider_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<Value, BoxError>("down".into()) }
        }));

        let handler = HandlerRef::new("flaky", noop)
            .param("a", DeclaredType::capability::<Flaky>())
            .param("payload", DeclaredType::contract(schema()))
            .build();
        let plan = injector.register_handler(&handler, &GuardChain::new());
        let request = Arc::new(Request::builder(Method::GET, "/").build());

        let err = injector.resolve(&plan, &request).await.unwrap_err();
        assert!(matches!(err, Error::ProviderFailed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
