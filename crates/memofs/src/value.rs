//! The dynamic values that flow into and out of memoized functions.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A dynamically typed value.
///
/// Arguments, results and callback parameters of memoized functions are all expressed as
/// [`Value`]s. Plain containers ([`Value::Array`], [`Value::Object`]) own their children, while
/// [`Value::Shared`] is a reference node with pointer identity, which is the only way to build
/// shared sub-objects and cycles.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// The absence of a value.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Shared(SharedValue),
    Function(Function),
}

impl Value {
    /// Creates an object from `(key, value)` pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Wraps this value into a new [`SharedValue`] reference node.
    pub fn into_shared(self) -> SharedValue {
        SharedValue::new(self)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Looks up a property of an object, following a [`Value::Shared`] node if needed.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Self::Object(map) => map.get(key).cloned(),
            Self::Shared(node) => node.read().get(key),
            _ => None,
        }
    }

    /// JavaScript truthiness, used to decide whether an errback received an error.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) | Self::Shared(_) | Self::Function(_) => true,
        }
    }

    /// Whether the envelope stores this value through the structural serializer.
    ///
    /// Everything else is a "primitive" and is rendered verbatim.
    pub(crate) fn is_object_or_string(&self) -> bool {
        matches!(
            self,
            Self::String(_) | Self::Array(_) | Self::Object(_) | Self::Shared(_)
        )
    }
}

/// Structural equality.
///
/// Functions compare by identity, shared nodes compare by identity first and by contents
/// otherwise. Comparing two distinct cyclic graphs does not terminate.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Shared(a), Self::Shared(b)) => a.ptr_eq(b) || *a.read() == *b.read(),
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(&a.body, &b.body),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<SharedValue> for Value {
    fn from(node: SharedValue) -> Self {
        Self::Shared(node)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Self::Function(f)
    }
}

/// A reference-counted, mutable node inside a value graph.
///
/// Cloning a [`SharedValue`] clones the reference, not the contents.
#[derive(Clone, Default)]
pub struct SharedValue(Arc<RwLock<Value>>);

impl SharedValue {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Value> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Value> {
        self.0.write()
    }

    /// Replaces the contents of this node.
    pub fn set(&self, value: Value) {
        *self.write() = value;
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// An address that identifies this node for as long as it is alive.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the contents may be cyclic, so only print the identity
        write!(f, "SharedValue({:#x})", self.identity())
    }
}

/// The error "thrown" by a function body.
#[derive(Clone, Debug, PartialEq)]
pub struct CallError {
    message: String,
    value: Value,
}

impl CallError {
    /// Creates an error with a message, like `new Error(message)`.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let value = Value::object([("message", Value::String(message.clone()))]);
        Self { message, value }
    }

    /// Creates an error from an arbitrary thrown value.
    ///
    /// The message is taken from a `message` property if there is one.
    pub fn from_value(value: Value) -> Self {
        let message = match value.get("message") {
            Some(Value::String(message)) => message,
            _ => match &value {
                Value::String(s) => s.clone(),
                other => crate::serialize::to_js_string(other),
            },
        };
        Self { message, value }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The thrown value.
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CallError {}

/// What a function body hands back to its caller.
pub enum Returned {
    /// A synchronously returned value.
    Value(Value),
    /// A value that will be available later.
    Pending(BoxFuture<'static, Result<Value, CallError>>),
}

impl Returned {
    /// Waits for the value, whether it is ready or still pending.
    pub async fn resolve(self) -> Result<Value, CallError> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Pending(future) => future.await,
        }
    }
}

impl fmt::Debug for Returned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// The outcome of invoking a [`Function`].
pub type CallResult = Result<Returned, CallError>;

type Body = dyn Fn(Vec<Value>) -> CallResult + Send + Sync;

/// A callable value.
///
/// Besides its body, a function carries the source text that identifies it in cache keys and
/// its declared arity, which decides whether a trailing function argument is an errback.
#[derive(Clone)]
pub struct Function {
    source: Arc<str>,
    arity: usize,
    body: Arc<Body>,
}

impl Function {
    /// Creates a function from a raw body.
    pub fn new<F>(source: impl Into<Arc<str>>, arity: usize, body: F) -> Self
    where
        F: Fn(Vec<Value>) -> CallResult + Send + Sync + 'static,
    {
        Self {
            source: source.into(),
            arity,
            body: Arc::new(body),
        }
    }

    /// Creates a function that returns its value synchronously.
    pub fn sync<F>(source: impl Into<Arc<str>>, arity: usize, body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        Self::new(source, arity, move |args| body(args).map(Returned::Value))
    }

    /// Creates a function that returns a future.
    pub fn future<F, Fut>(source: impl Into<Arc<str>>, arity: usize, body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CallError>> + Send + 'static,
    {
        Self::new(source, arity, move |args| {
            Ok(Returned::Pending(body(args).boxed()))
        })
    }

    /// The source text of this function.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The number of declared parameters.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Invokes the function.
    pub fn call(&self, args: Vec<Value>) -> CallResult {
        (self.body)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("source", &self.source)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}
