//! Method registry for dispatching requests by name.
//!
//! Every handler is stored behind the same object-safe [`Handler`] trait:
//! raw request bytes in, JSON value out. The typed adapter built at
//! registration time owns the knowledge of the parameter type, so the server
//! never needs to know handler signatures.
//!
//! Dispatch decodes a request in two stages:
//! 1. as a [`RequestHeader`] to read `name` only;
//! 2. as `Request<T>` by the adapter registered under that name.
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//! use pipe_rpc::MethodRegistry;
//!
//! let registry = MethodRegistry::new();
//! assert!(registry.register_fn("Double", |x: i64| Ok::<_, Infallible>(x * 2)));
//! assert!(!registry.register_fn("Double", |x: i64| Ok::<_, Infallible>(x * 3)));
//! assert!(registry.parameter_type("Double").unwrap().is::<i64>());
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::codec::JsonCodec;
use crate::envelope::{Request, RequestHeader, Response};
use crate::error::PipeRpcError;

/// Response message for an empty request payload.
pub const EMPTY_MESSAGE: &str = "Received message was empty.";
/// Response message for an unregistered method name.
pub const METHOD_NOT_FOUND_MESSAGE: &str = "Unable to find method on server.";
/// Response message for a handler that failed or panicked.
pub const METHOD_FAILED_MESSAGE: &str = "Unable to execute method on server.";

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Why a dispatch did not produce data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// The request payload was empty.
    #[error("request payload is empty")]
    Empty,

    /// The payload was not a request envelope, or its parameter did not
    /// match the registered type.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No handler is registered under the name.
    #[error("no method registered as '{0}'")]
    NotFound(String),

    /// The handler returned an error or panicked.
    #[error("method '{method}' failed: {reason}")]
    Failed {
        /// Method name.
        method: String,
        /// Handler error text.
        reason: String,
    },
}

impl InvokeError {
    /// Message placed in the failure response sent to the client.
    pub fn response_message(&self) -> String {
        match self {
            Self::Empty => EMPTY_MESSAGE.to_string(),
            Self::InvalidRequest(reason) => reason.clone(),
            Self::NotFound(_) => METHOD_NOT_FOUND_MESSAGE.to_string(),
            Self::Failed { .. } => METHOD_FAILED_MESSAGE.to_string(),
        }
    }

    /// Wrap into a failure response.
    pub fn into_response<T>(self) -> Response<T> {
        Response::failure(self.response_message())
    }
}

/// Descriptor of a handler's parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterType {
    name: &'static str,
    id: TypeId,
}

impl ParameterType {
    /// Descriptor for `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }

    /// Rust type name of the parameter.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this describes `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Uniform handler interface: raw request bytes in, JSON data out.
pub trait Handler: Send + Sync + 'static {
    /// Decode the full request and run the handler.
    fn call(&self, name: &str, request: &[u8]) -> BoxFuture<'static, Result<Value, InvokeError>>;
}

/// Adapter that decodes `Request<T>`, runs an async handler and encodes
/// its result.
pub struct TypedHandler<F, T, R, E, Fut> {
    handler: Arc<F>,
    _phantom: PhantomData<fn(T) -> (R, E, Fut)>,
}

impl<F, T, R, E, Fut> TypedHandler<F, T, R, E, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: fmt::Display + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, E, Fut> Handler for TypedHandler<F, T, R, E, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: fmt::Display + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    fn call(&self, name: &str, request: &[u8]) -> BoxFuture<'static, Result<Value, InvokeError>> {
        let method = name.to_string();
        let request: Request<T> = match JsonCodec::decode(request) {
            Ok(request) => request,
            Err(e) => {
                return Box::pin(async move {
                    Err(InvokeError::InvalidRequest(format!(
                        "Invalid parameter for method '{method}': {e}"
                    )))
                })
            }
        };

        let handler = self.handler.clone();
        Box::pin(async move {
            // Run on its own task so a panicking handler only kills that task.
            let joined = tokio::spawn(async move { handler(request.parameter).await }).await;

            let reason = match joined {
                Ok(Ok(data)) => {
                    return serde_json::to_value(data).map_err(|e| InvokeError::Failed {
                        method,
                        reason: format!("result could not be encoded: {e}"),
                    })
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) if e.is_panic() => "handler panicked".to_string(),
                Err(_) => "handler task was cancelled".to_string(),
            };
            Err(InvokeError::Failed { method, reason })
        })
    }
}

struct MethodEntry {
    handler: Arc<dyn Handler>,
    parameter_type: ParameterType,
}

/// Thread-safe name → handler table.
///
/// Registration is insert-if-absent under a write lock; lookups take a read
/// lock only long enough to clone the handler `Arc`.
#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<HashMap<String, MethodEntry>>,
}

impl MethodRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler.
    ///
    /// Returns `false` and leaves the registry untouched if `name` is
    /// already registered.
    pub fn register<F, T, R, E, Fut>(&self, name: &str, handler: F) -> bool
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.insert(
            name,
            Arc::new(TypedHandler::new(handler)),
            ParameterType::of::<T>(),
        )
    }

    /// Register a synchronous handler.
    ///
    /// The closure runs on a runtime worker, so it should not block for long.
    pub fn register_fn<F, T, R, E>(&self, name: &str, handler: F) -> bool
    where
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(name, move |parameter: T| {
            let handler = handler.clone();
            async move { handler(parameter) }
        })
    }

    /// Register a handler, failing with `DuplicateMethod` instead of `false`.
    pub fn try_register<F, T, R, E, Fut>(&self, name: &str, handler: F) -> crate::Result<()>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        if self.register(name, handler) {
            Ok(())
        } else {
            Err(PipeRpcError::DuplicateMethod(name.to_string()))
        }
    }

    fn insert(&self, name: &str, handler: Arc<dyn Handler>, parameter_type: ParameterType) -> bool {
        let mut methods = self
            .methods
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match methods.entry(name.to_string()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(MethodEntry {
                    handler,
                    parameter_type,
                });
                true
            }
        }
    }

    /// Parameter type registered under `name`.
    pub fn parameter_type(&self, name: &str) -> Option<ParameterType> {
        self.methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|entry| entry.parameter_type)
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.parameter_type(name).is_some()
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|entry| entry.handler.clone())
    }

    /// Invoke the handler registered under `name` with a full encoded request.
    ///
    /// `request` must be the whole `{"name", "parameter"}` envelope, not the
    /// bare parameter; the handler decodes it as `Request<T>`. Its `name`
    /// field is ignored and `name` alone selects the handler.
    ///
    /// Handler errors and panics come back as [`InvokeError::Failed`]; they
    /// never propagate to the caller.
    pub async fn invoke(&self, name: &str, request: &[u8]) -> Result<Value, InvokeError> {
        let handler = self
            .handler(name)
            .ok_or_else(|| InvokeError::NotFound(name.to_string()))?;
        handler.call(name, request).await
    }

    /// Resolve and run the method named inside an encoded request.
    pub async fn dispatch(&self, request: &[u8]) -> Result<Value, InvokeError> {
        if request.iter().all(u8::is_ascii_whitespace) {
            return Err(InvokeError::Empty);
        }

        let header: RequestHeader = JsonCodec::decode(request)
            .map_err(|e| InvokeError::InvalidRequest(format!("Invalid request: {e}")))?;

        if header.name.is_empty() {
            return Err(InvokeError::InvalidRequest(
                "Request name is empty.".to_string(),
            ));
        }

        self.invoke(&header.name, request).await
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.names())
            .finish()
    }
}
