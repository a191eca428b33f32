use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::task::JoinError;

use crate::cache_key::CacheKey;
use crate::config::{MemoizerConfig, Options, ResolvedOptions, namespace_path};
use crate::error::Error;
use crate::fs;
use crate::invocation::{CallOutcome, Invocation};
use crate::syntax::{SourceParser, TokenTreeParser};
use crate::value::{Function, Value};

type PendingMap = Arc<Mutex<HashMap<PathBuf, Pending>>>;

/// Persists the results of function calls in a cache directory.
///
/// A [`Memoizer`] is cheap to clone, all clones share the same registry of running calls.
#[derive(Clone)]
pub struct Memoizer {
    inner: Arc<MemoizerInner>,
}

struct MemoizerInner {
    cache_path: PathBuf,
    defaults: Options,
    parser: Arc<dyn SourceParser>,
    /// The calls that are currently running, by the path of their cache file.
    pending: PendingMap,
    outcome: Arc<Mutex<CallOutcome>>,
}

impl Memoizer {
    /// Creates a memoizer that identifies functions in `ast_body` mode with the built-in
    /// [`TokenTreeParser`].
    pub fn new(config: MemoizerConfig) -> Result<Self, Error> {
        Self::with_parser(config, TokenTreeParser)
    }

    /// Creates a memoizer with a custom [`SourceParser`].
    pub fn with_parser(
        config: MemoizerConfig,
        parser: impl SourceParser + 'static,
    ) -> Result<Self, Error> {
        let cache_path = config.validated_cache_path()?.to_owned();
        config.options.validate()?;

        Ok(Self {
            inner: Arc::new(MemoizerInner {
                cache_path,
                defaults: config.options,
                parser: Arc::new(parser),
                pending: Default::default(),
                outcome: Default::default(),
            }),
        })
    }

    /// The root directory of the cache.
    pub fn cache_path(&self) -> &Path {
        &self.inner.cache_path
    }

    /// Wraps `target` into a memoized function.
    ///
    /// `options` override the defaults of this memoizer. This creates the cache root and the
    /// namespace directory if they do not exist yet.
    pub async fn fn_(&self, target: Function, options: Options) -> Result<MemoizedFn, Error> {
        let options = self.resolve(&options)?;

        fs::ensure_namespace(&self.inner.cache_path, true).await?;
        fs::ensure_namespace(&options.namespace_dir(), options.throw_error).await?;

        Ok(MemoizedFn {
            inner: Arc::clone(&self.inner),
            function: target,
            options: Arc::new(options),
        })
    }

    /// Returns the path of the cache file that calling `target` with `args` would use.
    ///
    /// This does not touch the file system.
    pub fn cache_file_path(
        &self,
        target: &Function,
        args: &[Value],
        options: &Options,
    ) -> Result<PathBuf, Error> {
        let options = self.resolve(options)?;
        let key = CacheKey::for_call(target, args, &options, &*self.inner.parser)?;
        Ok(key.cache_path(&options))
    }

    /// Removes every cache file in the namespace `cache_id`, or the whole cache root if `None`.
    ///
    /// `cache_id` is resolved like the `cache_id` option, so it never leaves the cache root.
    ///
    /// Fails if the directory does not exist.
    pub async fn invalidate(&self, cache_id: Option<&str>) -> Result<(), Error> {
        let path = match cache_id {
            Some(cache_id) => namespace_path(&self.inner.cache_path, cache_id),
            None => self.inner.cache_path.clone(),
        };
        fs::remove_namespace(&path).await
    }

    /// Whether the most recently settled call was served from the cache.
    ///
    /// `None` before the first call has settled, and after a call failed.
    pub fn cache_hit(&self) -> Option<bool> {
        self.inner.outcome.lock().cache_hit()
    }

    fn resolve(&self, options: &Options) -> Result<ResolvedOptions, Error> {
        options.validate()?;
        self.inner
            .defaults
            .merge(options)
            .resolve(&self.inner.cache_path)
    }
}

impl fmt::Debug for Memoizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.inner.pending.lock().len();
        f.debug_struct("Memoizer")
            .field("cache_path", &self.inner.cache_path)
            .field("defaults", &self.inner.defaults)
            .field("running calls", &pending)
            .finish()
    }
}

/// A function whose results are persisted by a [`Memoizer`].
#[derive(Clone)]
pub struct MemoizedFn {
    inner: Arc<MemoizerInner>,
    function: Function,
    options: Arc<ResolvedOptions>,
}

impl MemoizedFn {
    /// Calls the function, or reads its result from the cache.
    ///
    /// Concurrent calls that map to the same cache file share a single execution.
    ///
    /// NOTE: This function itself is *not* `async`. The call is spawned eagerly on the current
    /// tokio runtime, even if the returned [`Pending`] is never awaited. It panics when called
    /// outside of a runtime.
    pub fn call(&self, args: Vec<Value>) -> Pending {
        let parser = &*self.inner.parser;
        let key = match CacheKey::for_call(&self.function, &args, &self.options, parser) {
            Ok(key) => key,
            Err(err) => return Pending::failed(err),
        };
        let path = key.cache_path(&self.options);

        let mut pending = self.inner.pending.lock();
        if let Some(running) = pending.get(&path) {
            tracing::trace!("Joining running call for `{}`", path.display());
            return running.clone();
        }

        let done_token = {
            let path = path.clone();
            let pending = Arc::clone(&self.inner.pending);
            CallOnDrop::new(move || {
                pending.lock().remove(&path);
            })
        };

        let invocation = Invocation {
            function: self.function.clone(),
            args,
            path: path.clone(),
            options: Arc::clone(&self.options),
        };
        let outcome = Arc::clone(&self.inner.outcome);

        let task = async move {
            let _done_token = done_token; // move into the future

            let result = invocation.run().await;
            *outcome.lock() = match &result {
                Ok((_, outcome)) => *outcome,
                Err(_) => CallOutcome::Unknown,
            };
            result.map(|(value, _)| value)
        };

        tracing::trace!("Spawning memoized call for `{}`", path.display());
        let handle = tokio::spawn(task);
        let running =
            Pending::new(handle.map(|joined| joined.unwrap_or_else(|e| Err(panicked(e)))));

        let evicted = pending.insert(path, running.clone());
        debug_assert!(evicted.is_none());
        running
    }

    /// The resolved options of this function.
    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }
}

impl fmt::Debug for MemoizedFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedFn")
            .field("function", &self.function)
            .field("options", &self.options)
            .finish()
    }
}

/// The eventual result of a [`MemoizedFn::call`].
///
/// Every clone resolves to the same result.
#[derive(Clone)]
#[must_use = "the result of a memoized call should be awaited"]
pub struct Pending {
    inner: Shared<BoxFuture<'static, Result<Value, Error>>>,
}

impl Pending {
    fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, Error>> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
        }
    }

    fn failed(err: Error) -> Self {
        Self::new(futures::future::ready(Err(err)))
    }
}

impl Future for Pending {
    type Output = Result<Value, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}

/// Runs a closure when dropped.
struct CallOnDrop {
    f: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl CallOnDrop {
    fn new<F: FnOnce() + Send + 'static>(f: F) -> CallOnDrop {
        CallOnDrop {
            f: Some(Box::new(f)),
        }
    }
}

impl Drop for CallOnDrop {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}

fn panicked(err: JoinError) -> Error {
    let message = match err.try_into_panic() {
        Ok(payload) => match payload.downcast_ref::<&str>() {
            Some(message) => (*message).to_owned(),
            None => payload
                .downcast_ref::<String>()
                .cloned()
                .unwrap_or_else(|| "unknown panic".to_owned()),
        },
        Err(err) => err.to_string(),
    };
    Error::Panicked(message)
}
