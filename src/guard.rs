//! Authorization guards and the ordered chain that runs them.
//!
//! Guards run in registration order. The first one that answers `false` or
//! fails stops the chain; the guards after it are never called.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::BoxError;
use crate::handler::BoxFuture;
use crate::registry::short_name;
use crate::request::Request;

// ── Guard ─────────────────────────────────────────────────────────────────────

/// A per-request authorization check.
pub trait Guard: Send + Sync + 'static {
    /// `Ok(true)` lets the request through, `Ok(false)` refuses it, and an
    /// error refuses it with a cause.
    fn can_activate<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<bool, BoxError>>;

    /// Marks routes whose credentials the transport must verify before
    /// dispatch. Read once, when the route is registered.
    fn requires_authentication(&self) -> bool { false }

    fn name(&self) -> &str { short_name(type_name::<Self>()) }
}

/// Requires an authenticated caller.
///
/// Routes carrying this guard are flagged `auth_required`, so the transport
/// verifies credentials first. In-process it only confirms that claims are
/// present.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthGuard;

impl Guard for AuthGuard {
    fn can_activate<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<bool, BoxError>> {
        Box::pin(std::future::ready(Ok(request.claims().is_some())))
    }

    fn requires_authentication(&self) -> bool { true }
}

/// Adapts a synchronous predicate into a named [`Guard`].
///
/// ```rust
/// use gatehouse::guard_fn;
///
/// let admins_only = guard_fn("admins_only", |req| {
///     req.claims().and_then(|c| c.get("role")).is_some_and(|r| r == "admin")
/// });
/// # let _ = admins_only;
/// ```
pub fn guard_fn<F>(name: &'static str, predicate: F) -> FnGuard<F>
where
    F: Fn(&Request) -> bool + Send + Sync + 'static,
{
    FnGuard { name, predicate }
}

/// See [`guard_fn`].
pub struct FnGuard<F> {
    name: &'static str,
    predicate: F,
}

impl<F> Guard for FnGuard<F>
where
    F: Fn(&Request) -> bool + Send + Sync + 'static,
{
    fn can_activate<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<bool, BoxError>> {
        Box::pin(std::future::ready(Ok((self.predicate)(request))))
    }

    fn name(&self) -> &str { self.name }
}

// ── Denial ────────────────────────────────────────────────────────────────────

/// Why the chain stopped.
#[derive(Debug)]
pub enum DenyReason {
    /// The guard answered `false`.
    Refused,
    /// The guard failed.
    Failed(BoxError),
}

/// The guard that stopped a request, and why.
#[derive(Debug)]
pub struct Denial {
    index: usize,
    guard: String,
    reason: DenyReason,
}

impl Denial {
    /// Position of the denying guard in the chain.
    pub fn index(&self) -> usize { self.index }
    pub fn guard(&self) -> &str { &self.guard }
    pub fn reason(&self) -> &DenyReason { &self.reason }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            DenyReason::Refused => write!(f, "guard #{} `{}` refused the request", self.index, self.guard),
            DenyReason::Failed(e) => write!(f, "guard #{} `{}` failed: {e}", self.index, self.guard),
        }
    }
}

impl std::error::Error for Denial {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.reason {
            DenyReason::Refused => None,
            DenyReason::Failed(e) => Some(e.as_ref()),
        }
    }
}

// ── GuardChain ────────────────────────────────────────────────────────────────

/// An ordered list of guards. Cheap to clone.
#[derive(Clone, Default)]
pub struct GuardChain {
    guards: Vec<Arc<dyn Guard>>,
}

impl GuardChain {
    pub fn new() -> Self { Self::default() }

    /// Appends a guard. Returns `self` for chaining.
    pub fn with(mut self, guard: impl Guard) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    /// `self`'s guards followed by `other`'s.
    pub fn then(&self, other: &GuardChain) -> GuardChain {
        let mut guards = self.guards.clone();
        guards.extend(other.guards.iter().cloned());
        GuardChain { guards }
    }

    pub fn len(&self) -> usize { self.guards.len() }
    pub fn is_empty(&self) -> bool { self.guards.is_empty() }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.guards.iter().map(|g| g.name())
    }

    /// True if any guard asks the transport to verify credentials.
    pub fn requires_authentication(&self) -> bool {
        self.guards.iter().any(|g| g.requires_authentication())
    }

    /// Runs the guards in order, stopping at the first refusal or failure.
    pub async fn evaluate(&self, request: &Request) -> Result<(), Denial> {
        for (index, guard) in self.guards.iter().enumerate() {
            let reason = match guard.can_activate(request).await {
                Ok(true) => continue,
                Ok(false) => DenyReason::Refused,
                Err(e) => DenyReason::Failed(e),
            };
            debug!(index, guard = guard.name(), "guard denied request");
            return Err(Denial { index, guard: guard.name().to_owned(), reason });
        }
        Ok(())
    }
}

impl fmt::Debug for GuardChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
