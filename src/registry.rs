//! Provider registry: capability -> provider.
//!
//! A [`Capability`] names an abstract dependency ("the current user", "the
//! tenant", "a clock"). A [`Provider`] knows how to produce a value for it from
//! the current request. The registry holds at most one provider per
//! capability; registering again replaces the earlier one.
//!
//! Providers receive the registry itself, so one capability may be built on
//! another. Cycles are not detected: a provider that transitively depends on
//! itself recurses until the stack runs out.

use std::any::{TypeId, type_name};
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{BoxError, Error};
use crate::handler::BoxFuture;
use crate::request::Request;

// ── Capability ────────────────────────────────────────────────────────────────

/// Registry key: a type tag standing for one abstraction.
///
/// ```rust
/// use gatehouse::Capability;
///
/// struct Tenant;
/// assert_eq!(Capability::of::<Tenant>(), Capability::of::<Tenant>());
/// assert_eq!(Capability::of::<Tenant>().to_string(), "Tenant");
/// ```
#[derive(Clone, Copy)]
pub struct Capability {
    id: TypeId,
    name: &'static str,
}

impl Capability {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self { id: TypeId::of::<T>(), name: type_name::<T>() }
    }

    /// Fully qualified type name of the tag.
    pub fn name(&self) -> &'static str { self.name }
}

impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool { self.id == other.id }
}

impl Eq for Capability {}

impl Hash for Capability {
    fn hash<H: Hasher>(&self, state: &mut H) { self.id.hash(state) }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({})", self.name)
    }
}

/// Prints the last path segment: `app::auth::CurrentUser` → `CurrentUser`.
impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(short_name(self.name))
    }
}

pub(crate) fn short_name(path: &'static str) -> &'static str {
    let base = path.split('<').next().unwrap_or(path);
    match base.rfind("::") {
        Some(i) => &path[i + 2..],
        None => path,
    }
}

// ── Provider ──────────────────────────────────────────────────────────────────

/// Produces the value for a capability, per request.
///
/// Implement it directly when the provider needs other capabilities:
///
/// ```rust
/// use std::sync::Arc;
/// use gatehouse::{BoxError, BoxFuture, Capability, CurrentUser, Provider, ProviderRegistry, Request};
/// use serde_json::{Value, json};
///
/// struct Greeting;
///
/// impl Provider for Greeting {
///     fn provide<'a>(
///         &'a self,
///         request: &'a Arc<Request>,
///         registry: &'a ProviderRegistry,
///     ) -> BoxFuture<'a, Result<Value, BoxError>> {
///         Box::pin(async move {
///             let user = registry.resolve(Capability::of::<CurrentUser>(), request).await?;
///             Ok(json!(format!("hello {}", user["sub"])))
///         })
///     }
/// }
/// ```
///
/// or wrap an async closure with [`provider_fn`].
pub trait Provider: Send + Sync + 'static {
    fn provide<'a>(
        &'a self,
        request: &'a Arc<Request>,
        registry: &'a ProviderRegistry,
    ) -> BoxFuture<'a, Result<Value, BoxError>>;
}

/// Adapts an async closure over the request into a [`Provider`].
///
/// ```rust
/// use gatehouse::provider_fn;
/// use serde_json::json;
///
/// let tenant = provider_fn(|req| async move {
///     Ok::<_, std::convert::Infallible>(json!(req.header("x-tenant").unwrap_or("default")))
/// });
/// # let _ = tenant;
/// ```
pub fn provider_fn<F, Fut, E>(f: F) -> FnProvider<F>
where
    F: Fn(Arc<Request>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, E>> + Send + 'static,
    E: Into<BoxError>,
{
    FnProvider(f)
}

/// See [`provider_fn`].
pub struct FnProvider<F>(F);

impl<F, Fut, E> Provider for FnProvider<F>
where
    F: Fn(Arc<Request>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, E>> + Send + 'static,
    E: Into<BoxError>,
{
    fn provide<'a>(
        &'a self,
        request: &'a Arc<Request>,
        _registry: &'a ProviderRegistry,
    ) -> BoxFuture<'a, Result<Value, BoxError>> {
        let fut = (self.0)(Arc::clone(request));
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}

// ── Built-in: CurrentUser ─────────────────────────────────────────────────────

/// Capability tag for the authenticated caller's claims.
pub struct CurrentUser;

/// Provides [`CurrentUser`]: the request's claims as a JSON object, or `null`
/// when the request is anonymous.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClaimsProvider;

impl Provider for ClaimsProvider {
    fn provide<'a>(
        &'a self,
        request: &'a Arc<Request>,
        _registry: &'a ProviderRegistry,
    ) -> BoxFuture<'a, Result<Value, BoxError>> {
        let claims = request.claims().cloned().map_or(Value::Null, Value::Object);
        Box::pin(std::future::ready(Ok(claims)))
    }
}

// ── ProviderRegistry ──────────────────────────────────────────────────────────

/// Capability -> provider map, owned by the application.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<Capability, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self { Self::default() }

    /// Registers `provider` for `capability`, replacing any earlier one.
    pub fn register(&self, capability: Capability, provider: impl Provider) {
        let replaced = self.providers.insert(capability, Arc::new(provider)).is_some();
        debug!(capability = %capability, replaced, "provider registered");
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.providers.contains_key(&capability)
    }

    pub fn len(&self) -> usize { self.providers.len() }
    pub fn is_empty(&self) -> bool { self.providers.is_empty() }

    /// Produces the value for `capability` from `request`.
    pub async fn resolve(&self, capability: Capability, request: &Arc<Request>) -> Result<Value, Error> {
        // Clone the Arc out so no map guard is held across the await.
        let provider = self.providers
            .get(&capability)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::UnregisteredCapability(capability))?;

        provider.provide(request, self).await.map_err(|source| {
            error!(capability = %capability, error = %source, "provider failed");
            Error::ProviderFailed { capability, source }
        })
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.providers.iter().map(|e| e.key().name).collect();
        names.sort_unstable();
        f.debug_struct("ProviderRegistry").field("capabilities", &names).finish()
    }
}
