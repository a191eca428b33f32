//! The control flow of a single memoized call.
//!
//! An [`Invocation`] reads the cache file for its key, and either hands back the cached result or
//! runs the target function and persists what it produced. Failures of the target are never
//! written to disk.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{self, Either};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::ResolvedOptions;
use crate::error::Error;
use crate::fs;
use crate::value::{CallError, Function, Returned, Value};

/// How a memoized function hands back its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStyle {
    /// The result is the return value, or what the returned future resolves to.
    DirectReturn,
    /// The last argument is a callback that receives `(err, ...results)`.
    Errback,
}

impl CallStyle {
    /// A call is errback-style if its last argument is a function that declares parameters.
    pub fn of(args: &[Value]) -> Self {
        match args.last() {
            Some(Value::Function(f)) if f.arity() > 0 => Self::Errback,
            _ => Self::DirectReturn,
        }
    }
}

/// Whether the most recently settled call was served from the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallOutcome {
    /// The result was read from a cache file.
    Hit,
    /// The function was executed and its result written.
    Miss,
    /// No call has settled yet, or the last one failed.
    #[default]
    Unknown,
}

impl CallOutcome {
    pub fn cache_hit(self) -> Option<bool> {
        match self {
            Self::Hit => Some(true),
            Self::Miss => Some(false),
            Self::Unknown => None,
        }
    }
}

/// One call of a memoized function, bound to the cache file it reads and writes.
pub(crate) struct Invocation {
    pub function: Function,
    pub args: Vec<Value>,
    pub path: PathBuf,
    pub options: Arc<ResolvedOptions>,
}

impl Invocation {
    pub async fn run(self) -> Result<(Value, CallOutcome), Error> {
        let style = CallStyle::of(&self.args);

        let cached = if self.options.take_force() {
            tracing::trace!("Forced recompute of `{}`", self.path.display());
            None
        } else {
            fs::read_if_fresh(&self.path, self.options.max_age).await?
        };

        if let Some(contents) = cached {
            let value = match std::str::from_utf8(&contents) {
                Ok(text) => self.options.codec.decode_envelope(text),
                Err(e) => {
                    tracing::trace!(
                        error = &e as &dyn std::error::Error,
                        "Discarding cache contents"
                    );
                    Value::Undefined
                }
            };

            if self.options.retry_on_invalid_cache && value.is_undefined() {
                tracing::trace!("Invalid cache file `{}`, recomputing", self.path.display());
            } else {
                tracing::trace!("Cache hit for `{}`", self.path.display());
                let value = self.replay(style, value).await?;
                return Ok((value, CallOutcome::Hit));
            }
        } else {
            tracing::trace!("Cache miss for `{}`", self.path.display());
        }

        let value = match style {
            CallStyle::DirectReturn => self.execute_direct().await?,
            CallStyle::Errback => self.execute_errback().await?,
        };
        Ok((value, CallOutcome::Miss))
    }

    /// Hands a cached result back in the calling convention of this call.
    async fn replay(self, style: CallStyle, value: Value) -> Result<Value, Error> {
        let callback = match (style, self.args.last()) {
            (CallStyle::Errback, Some(Value::Function(callback))) => callback.clone(),
            _ => return Ok(value),
        };

        let args = match value {
            Value::Array(items) => items,
            Value::Undefined => Vec::new(),
            other => vec![other],
        };
        Ok(callback.call(args)?.resolve().await?)
    }

    async fn execute_direct(self) -> Result<Value, Error> {
        let value = self.function.call(self.args)?.resolve().await?;

        let envelope = self.options.codec.encode_envelope(&value);
        fs::write_entry(&self.path, &envelope, self.options.max_age).await?;

        Ok(value)
    }

    async fn execute_errback(mut self) -> Result<Value, Error> {
        let Some(Value::Function(callback)) = self.args.pop() else {
            return Err(Error::CallbackDropped);
        };

        let (sender, receiver) = oneshot::channel();
        let sender = Arc::new(Mutex::new(Some(sender)));
        let intercept = Function::sync("function (err, ...results) {}", 1, move |args| {
            let sender = sender.lock().take();
            if let Some(sender) = sender {
                // the invocation may have given up waiting already
                sender.send(args).ok();
            }
            Ok(Value::Undefined)
        });
        self.args.push(intercept.into());

        let callback_args = match self.function.call(self.args)? {
            Returned::Value(_) => receiver.await.map_err(|_| Error::CallbackDropped)?,
            Returned::Pending(pending) => match future::select(pending, receiver).await {
                Either::Left((Ok(_), receiver)) => {
                    receiver.await.map_err(|_| Error::CallbackDropped)?
                }
                Either::Left((Err(err), _)) => return Err(err.into()),
                Either::Right((received, pending)) => {
                    // let the function finish whatever it does after calling back
                    tokio::spawn(drain(pending));
                    received.map_err(|_| Error::CallbackDropped)?
                }
            },
        };

        let mut results = callback_args.into_iter();
        let err = results.next().unwrap_or_default();
        if err.is_truthy() {
            return Err(CallError::from_value(err).into());
        }

        let args: Vec<Value> = std::iter::once(Value::Null).chain(results).collect();
        let envelope = self.options.codec.encode_envelope(&Value::Array(args.clone()));
        fs::write_entry(&self.path, &envelope, self.options.max_age).await?;

        Ok(callback.call(args)?.resolve().await?)
    }
}

async fn drain(pending: futures::future::BoxFuture<'static, Result<Value, CallError>>) {
    if let Err(err) = pending.await {
        tracing::debug!(
            error = &err as &dyn std::error::Error,
            "Memoized function failed after calling back"
        );
    }
}
