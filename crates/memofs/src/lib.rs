//! # memofs
//!
//! Memoizes function calls by persisting their results to the file system, so that repeated
//! calls with equivalent arguments skip re-execution, across process restarts.
//!
//! Each result lives in its own file below the cache root:
//!
//! ```text
//! <cache_path>/<cache_id>/<32 hex chars>
//! ```
//!
//! The file name is a hash over the function (its source text, its syntax tree, or nothing at
//! all), the serialized arguments and an optional salt. The file holds a small JSON envelope
//! `{"data": <result>}`.
//!
//! A call goes through the following steps:
//! - The cache file path is derived from the function, the arguments and the options.
//! - If a call for the same path is already running, its result is shared.
//! - Unless forced, the cache file is read. A file that is older than `max_age` counts as missing.
//! - On a hit, the decoded result is returned, or handed to the callback of errback-style calls.
//! - On a miss, the function runs. A successful result is written to the cache file, while
//!   errors are returned to the caller and never persisted.
//!
//! ## Example
//!
//! ```no_run
//! use memofs::{Function, Memoizer, MemoizerConfig, Options, Value};
//!
//! # async fn run() -> Result<(), memofs::Error> {
//! let memoizer = Memoizer::new(MemoizerConfig::new("/tmp/memofs"))?;
//! let add = Function::sync("function (a, b) { return a + b }", 2, |args| {
//!     Ok(Value::from(args.iter().filter_map(Value::as_f64).sum::<f64>()))
//! });
//!
//! let add = memoizer.fn_(add, Options::default()).await?;
//! assert_eq!(add.call(vec![1.into(), 2.into()]).await?, Value::from(3));
//! # Ok(())
//! # }
//! ```

mod cache_key;
mod config;
mod error;
mod fs;
mod invocation;
pub mod logging;
mod memoizer;
pub mod serialize;
pub mod syntax;
mod value;

pub use cache_key::{CacheKey, CacheKeyBuilder};
pub use config::{DEFAULT_CACHE_ID, LogFormat, Logging, MemoizerConfig, Options, ResolvedOptions};
pub use error::Error;
pub use invocation::{CallOutcome, CallStyle};
pub use memoizer::{MemoizedFn, Memoizer, Pending};
pub use serialize::{Codec, DecodeError, DeserializeFn, SerializeFn};
pub use syntax::{ParseError, SourceParser, SyntaxNode, TokenTreeParser};
pub use value::{CallError, CallResult, Function, Returned, SharedValue, Value};
