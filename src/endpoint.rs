//! The dispatch wrapper: guards + injection + handler as one callable.
//!
//! ```text
//! request ──▶ guard chain ──denied──▶ Error::AccessDenied
//!                 │ ok
//!                 ▼
//!         injector.resolve(plan) ──▶ DI args
//!                 ▼
//!   path params ◀ explicit args ◀ DI args     (right-hand side wins)
//!                 ▼
//!            handler(args) ──▶ Response | Error::HandlerRaised
//! ```

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::guard::GuardChain;
use crate::handler::{Arg, Args, HandlerRef};
use crate::injector::{HandlerPlan, Injector};
use crate::request::Request;
use crate::response::Response;

struct Prepared {
    plan: Arc<HandlerPlan>,
    known_params: HashSet<String>,
}

/// A handler made callable by the transport.
///
/// The plan is fetched from the injector on the first call and kept for the
/// endpoint's lifetime.
pub struct Endpoint {
    injector: Arc<Injector>,
    handler: HandlerRef,
    guards: GuardChain,
    prepared: OnceLock<Prepared>,
}

impl Endpoint {
    pub fn new(injector: Arc<Injector>, handler: impl Into<HandlerRef>, guards: GuardChain) -> Self {
        Self { injector, handler: handler.into(), guards, prepared: OnceLock::new() }
    }

    pub fn handler(&self) -> &HandlerRef { &self.handler }

    /// The plan this endpoint dispatches with. Builds it if no call has yet.
    pub fn plan(&self) -> &Arc<HandlerPlan> {
        &self.prepared().plan
    }

    fn prepared(&self) -> &Prepared {
        self.prepared.get_or_init(|| {
            let plan = self.injector.register_handler(&self.handler, &self.guards);
            let known_params = plan.params().iter().map(|p| p.name.clone()).collect();
            Prepared { plan, known_params }
        })
    }

    /// Runs the pipeline for one request.
    ///
    /// Argument precedence, lowest to highest: path parameters (only those
    /// naming a declared parameter), `explicit`, injected values.
    pub async fn call(&self, request: Arc<Request>, explicit: Args) -> Result<Response, Error> {
        let Prepared { plan, known_params } = self.prepared();
        let handler = plan.handler();

        if let Err(denial) = plan.guards().evaluate(&request).await {
            warn!(
                handler = handler.name(),
                method = %request.method(),
                path = request.path(),
                guard = denial.guard(),
                index = denial.index(),
                "access denied",
            );
            return Err(Error::AccessDenied(denial));
        }

        let injected = self.injector.resolve(plan, &request).await?;

        let mut args = Args::with_capacity(known_params.len());
        for (name, value) in request.params() {
            if known_params.contains(name) {
                args.insert(name, Arg::Value(Value::String(value.clone())));
            }
        }
        args.extend(explicit);
        args.extend(injected);

        debug!(handler = handler.name(), args = args.len(), suspending = plan.is_suspending(), "invoking handler");

        handler.call(args).await.map_err(|source| {
            error!(handler = handler.name(), error = %source, "handler failed");
            Error::HandlerRaised { handler: handler.name(), source }
        })
    }
}
