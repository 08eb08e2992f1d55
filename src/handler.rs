//! Handler declaration, argument maps and type erasure.
//!
//! # How handlers are stored
//!
//! Endpoints hold handlers of *different* closure types side by side, so the
//! concrete type is hidden behind a trait object (`dyn ErasedHandler`). Every
//! handler receives the same thing, an [`Args`] map, and produces the same
//! thing, a `Result<Response, BoxError>`.
//!
//! ```text
//! async fn create_user(args: Args) -> Result<Response, E> { … }  ← user writes this
//!        ↓ HandlerRef::new("create_user", create_user)
//! create_user.into_erased()                                       ← Handler blanket impl
//!        ↓
//! Box::new(FnHandler(create_user))                                ← heap-allocated wrapper
//!        ↓  shared behind Arc<HandlerInner> with its parameter list
//! handler.call(args)  at request time                             ← one vtable dispatch
//! ```
//!
//! Each [`HandlerRef`] also carries the parameters the handler declares and a
//! [`HandlerId`] token fixed at declaration time. Clones share the token, so
//! the same handler mounted twice is still one handler to the plan cache.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::contract::{Contract, Schema};
use crate::error::BoxError;
use crate::registry::Capability;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A heap-allocated, type-erased future.
///
/// `Pin<Box<…>>` because the runtime polls it in place; `Send` so the host
/// runtime may move it across worker threads between polls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) type HandlerFuture = BoxFuture<'static, Result<Response, BoxError>>;

// ── HandlerId ─────────────────────────────────────────────────────────────────

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Registration token identifying a handler for the life of the process.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HandlerId(u64);

impl HandlerId {
    fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Parameter declarations ────────────────────────────────────────────────────

/// What a handler parameter declares itself to be.
///
/// The injector turns this into a [`ParameterKind`](crate::ParameterKind)
/// once, when the handler's plan is built.
#[derive(Clone, Debug)]
pub enum DeclaredType {
    /// The current request.
    Request,
    /// A value produced by the provider registered for this capability.
    Capability(Capability),
    /// The request body, validated against this schema.
    Contract(Arc<Schema>),
    /// Supplied by the caller: path parameters or explicit arguments.
    /// The string names the expected type for diagnostics only.
    Plain(&'static str),
}

impl DeclaredType {
    pub fn capability<T: ?Sized + 'static>() -> Self {
        Self::Capability(Capability::of::<T>())
    }

    pub fn contract(schema: Schema) -> Self {
        Self::Contract(Arc::new(schema))
    }
}

/// A named handler parameter.
#[derive(Clone, Debug)]
pub struct Param {
    pub(crate) name: String,
    pub(crate) ty: DeclaredType,
}

impl Param {
    pub fn name(&self) -> &str { &self.name }
    pub fn declared_type(&self) -> &DeclaredType { &self.ty }
}

// ── Internal dispatch interface ───────────────────────────────────────────────

#[doc(hidden)]
pub trait ErasedHandler: Send + Sync {
    fn call(&self, args: Args) -> HandlerFuture;

    /// `false` for handlers that finish without awaiting.
    fn is_suspending(&self) -> bool;
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every async handler function.
///
/// You never implement this yourself. It is satisfied by any
///
/// ```text
/// async fn name(args: Args) -> Result<impl IntoResponse, impl Into<BoxError>>
/// ```
///
/// Sealed so that only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_erased(self) -> Box<dyn ErasedHandler>;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R, E> private::Sealed for F
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoResponse + 'static,
    E: Into<BoxError> + 'static,
{
}

impl<F, Fut, R, E> Handler for F
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoResponse + 'static,
    E: Into<BoxError> + 'static,
{
    fn into_erased(self) -> Box<dyn ErasedHandler> {
        Box::new(FnHandler(self))
    }
}

/// Holds an async handler `F` and bridges it to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R, E> ErasedHandler for FnHandler<F>
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoResponse + 'static,
    E: Into<BoxError> + 'static,
{
    fn call(&self, args: Args) -> HandlerFuture {
        let fut = (self.0)(args);
        Box::pin(async move { fut.await.map(IntoResponse::into_response).map_err(Into::into) })
    }

    fn is_suspending(&self) -> bool { true }
}

/// Holds a plain synchronous handler. Runs inline on the calling task.
struct BlockingHandler<F>(F);

impl<F, R, E> ErasedHandler for BlockingHandler<F>
where
    F: Fn(Args) -> Result<R, E> + Send + Sync,
    R: IntoResponse,
    E: Into<BoxError>,
{
    fn call(&self, args: Args) -> HandlerFuture {
        let result = (self.0)(args).map(IntoResponse::into_response).map_err(Into::into);
        Box::pin(std::future::ready(result))
    }

    fn is_suspending(&self) -> bool { false }
}

// ── HandlerRef ────────────────────────────────────────────────────────────────

struct HandlerInner {
    id: HandlerId,
    name: &'static str,
    params: Vec<Param>,
    func: Box<dyn ErasedHandler>,
}

/// A declared handler: function, parameter list and identity.
///
/// Cheap to clone; clones are the same handler.
#[derive(Clone)]
pub struct HandlerRef {
    inner: Arc<HandlerInner>,
}

impl HandlerRef {
    /// Declares an async handler.
    ///
    /// ```rust
    /// use gatehouse::{Args, DeclaredType, HandlerRef, Response};
    ///
    /// async fn get_user(args: Args) -> Result<Response, gatehouse::ArgError> {
    ///     let id: u64 = args.parse("id")?;
    ///     Ok(Response::json(format!(r#"{{"id":{id}}}"#)))
    /// }
    ///
    /// let handler = HandlerRef::new("get_user", get_user)
    ///     .param("id", DeclaredType::Plain("u64"))
    ///     .build();
    /// assert!(handler.is_suspending());
    /// ```
    #[allow(clippy::new_ret_no_self)]
    pub fn new(name: &'static str, handler: impl Handler) -> HandlerBuilder {
        HandlerBuilder { name, params: Vec::new(), func: handler.into_erased() }
    }

    /// Declares a synchronous handler.
    pub fn blocking<F, R, E>(name: &'static str, handler: F) -> HandlerBuilder
    where
        F: Fn(Args) -> Result<R, E> + Send + Sync + 'static,
        R: IntoResponse + 'static,
        E: Into<BoxError> + 'static,
    {
        HandlerBuilder { name, params: Vec::new(), func: Box::new(BlockingHandler(handler)) }
    }

    pub fn id(&self) -> HandlerId { self.inner.id }
    pub fn name(&self) -> &'static str { self.inner.name }
    pub fn params(&self) -> &[Param] { &self.inner.params }
    pub fn is_suspending(&self) -> bool { self.inner.func.is_suspending() }

    pub(crate) fn call(&self, args: Args) -> HandlerFuture {
        self.inner.func.call(args)
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRef")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("params", &self.inner.params)
            .finish_non_exhaustive()
    }
}

/// Collects a handler's parameter declarations. Finish with
/// [`build`](HandlerBuilder::build), or pass it anywhere a [`HandlerRef`] is
/// expected.
pub struct HandlerBuilder {
    name: &'static str,
    params: Vec<Param>,
    func: Box<dyn ErasedHandler>,
}

impl HandlerBuilder {
    /// Declares the next parameter. Names must be unique per handler; a
    /// repeated name replaces the earlier declaration.
    pub fn param(mut self, name: &str, ty: DeclaredType) -> Self {
        match self.params.iter().position(|p| p.name == name) {
            Some(i) => self.params[i].ty = ty,
            None => self.params.push(Param { name: name.to_owned(), ty }),
        }
        self
    }

    /// Assigns the handler its identity.
    pub fn build(self) -> HandlerRef {
        HandlerRef {
            inner: Arc::new(HandlerInner {
                id: HandlerId::next(),
                name: self.name,
                params: self.params,
                func: self.func,
            }),
        }
    }
}

impl From<HandlerBuilder> for HandlerRef {
    fn from(builder: HandlerBuilder) -> Self { builder.build() }
}

// ── Args ──────────────────────────────────────────────────────────────────────

/// One resolved argument.
#[derive(Clone, Debug)]
pub enum Arg {
    Request(Arc<Request>),
    Value(Value),
    Contract(Contract),
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self { Self::Value(value) }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self { Self::Value(Value::String(value.to_owned())) }
}

impl From<String> for Arg {
    fn from(value: String) -> Self { Self::Value(Value::String(value)) }
}

impl From<Contract> for Arg {
    fn from(contract: Contract) -> Self { Self::Contract(contract) }
}

impl From<Arc<Request>> for Arg {
    fn from(request: Arc<Request>) -> Self { Self::Request(request) }
}

/// Why an argument could not be read.
#[derive(Debug, Error)]
pub enum ArgError {
    #[error("missing argument `{0}`")]
    Missing(String),

    #[error("argument `{name}` is not a {expected}")]
    WrongKind { name: String, expected: &'static str },

    #[error("argument `{name}` is invalid: {reason}")]
    Invalid { name: String, reason: String },
}

/// The argument map a handler is called with, keyed by parameter name.
#[derive(Clone, Debug, Default)]
pub struct Args {
    values: HashMap<String, Arg>,
}

impl Args {
    pub fn new() -> Self { Self::default() }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self { values: HashMap::with_capacity(capacity) }
    }

    /// Adds an argument. Returns `self` for chaining.
    pub fn with(mut self, name: &str, value: impl Into<Arg>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts `value`, replacing any argument of the same name.
    pub fn insert(&mut self, name: &str, value: impl Into<Arg>) {
        self.values.insert(name.to_owned(), value.into());
    }

    /// Moves every argument of `other` in, overriding same-named ones.
    pub fn extend(&mut self, other: Args) {
        self.values.extend(other.values);
    }

    pub fn get(&self, name: &str) -> Option<&Arg> { self.values.get(name) }
    pub fn contains(&self, name: &str) -> bool { self.values.contains_key(name) }
    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }
    pub fn names(&self) -> impl Iterator<Item = &str> { self.values.keys().map(String::as_str) }

    pub fn request(&self, name: &str) -> Result<&Arc<Request>, ArgError> {
        match self.require(name)? {
            Arg::Request(request) => Ok(request),
            _ => Err(ArgError::WrongKind { name: name.to_owned(), expected: "request" }),
        }
    }

    pub fn value(&self, name: &str) -> Result<&Value, ArgError> {
        match self.require(name)? {
            Arg::Value(value) => Ok(value),
            _ => Err(ArgError::WrongKind { name: name.to_owned(), expected: "value" }),
        }
    }

    pub fn contract(&self, name: &str) -> Result<&Contract, ArgError> {
        match self.require(name)? {
            Arg::Contract(contract) => Ok(contract),
            _ => Err(ArgError::WrongKind { name: name.to_owned(), expected: "contract" }),
        }
    }

    /// String argument, e.g. a path parameter.
    pub fn str(&self, name: &str) -> Result<&str, ArgError> {
        self.value(name)?
            .as_str()
            .ok_or_else(|| ArgError::WrongKind { name: name.to_owned(), expected: "string" })
    }

    /// Parses a scalar argument with [`FromStr`]. Path parameters arrive as
    /// strings; this is the usual way to read them typed.
    pub fn parse<T>(&self, name: &str) -> Result<T, ArgError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = match self.value(name)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b)   => b.to_string(),
            _ => return Err(ArgError::WrongKind { name: name.to_owned(), expected: "scalar" }),
        };
        raw.parse().map_err(|e: T::Err| ArgError::Invalid { name: name.to_owned(), reason: e.to_string() })
    }

    /// Deserialises a contract argument into a typed struct.
    pub fn contract_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArgError> {
        self.contract(name)?
            .deserialize()
            .map_err(|e| ArgError::Invalid { name: name.to_owned(), reason: e.to_string() })
    }

    fn require(&self, name: &str) -> Result<&Arg, ArgError> {
        self.values.get(name).ok_or_else(|| ArgError::Missing(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn echo(args: Args) -> Result<String, ArgError> {
        Ok(args.str("word")?.to_owned())
    }

    #[test]
    fn clones_share_identity_and_builds_do_not() {
        let a = HandlerRef::new("echo", echo).build();
        let b = a.clone();
        let c = HandlerRef::new("echo", echo).build();
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn repeated_param_name_replaces_declaration() {
        let handler = HandlerRef::new("echo", echo)
            .param("word", DeclaredType::Plain("i64"))
            .param("word", DeclaredType::Plain("String"))
            .build();
        assert_eq!(handler.params().len(), 1);
        assert!(matches!(handler.params()[0].declared_type(), DeclaredType::Plain("String")));
    }

    #[tokio::test]
    async fn blocking_handler_is_not_suspending() {
        let handler = HandlerRef::blocking("answer", |_: Args| Ok::<_, ArgError>("42")).build();
        assert!(!handler.is_suspending());
        let res = handler.call(Args::new()).await.unwrap();
        assert_eq!(res.body(), "42");
    }

    #[tokio::test]
    async fn handler_error_is_boxed() {
        let handler = HandlerRef::new("echo", echo).build();
        let err = handler.call(Args::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "missing argument `word`");
    }

    #[test]
    fn typed_access() {
        let args = Args::new()
            .with("id", "42")
            .with("count", json!(3))
            .with("flag", json!({"nested": true}));

        assert_eq!(args.parse::<u32>("id").unwrap(), 42);
        assert_eq!(args.parse::<u8>("count").unwrap(), 3);
        assert!(matches!(args.parse::<u8>("flag"), Err(ArgError::WrongKind { .. })));
        assert!(matches!(args.parse::<u8>("missing"), Err(ArgError::Missing(_))));
        assert!(matches!(args.contract("id"), Err(ArgError::WrongKind { expected: "contract", .. })));
    }
}
