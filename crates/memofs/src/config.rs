use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::error::Error;
use crate::serialize::{Codec, DeserializeFn, SerializeFn};

/// The namespace used when no `cache_id` is configured: the cache root itself.
pub const DEFAULT_CACHE_ID: &str = "./";

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty, multi-line output
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for memofs itself.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Simplified,
        }
    }
}

/// One layer of memoization options.
///
/// Options are layered: library defaults, then the options given to the
/// [`Memoizer`](crate::Memoizer), then the options given when wrapping a function. A field
/// that is `None` inherits the value of the layer below it.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct Options {
    /// The namespace, a sub directory of the cache root. Defaults to the cache root itself.
    pub cache_id: Option<String>,
    /// Mixed into every cache key.
    pub salt: Option<String>,
    /// Cache files older than this are ignored, and deleted once this much time has passed
    /// after writing them.
    #[serde(with = "humantime_serde")]
    pub max_age: Option<Duration>,
    /// Recompute and overwrite on the next call, even if a cached result exists.
    pub force: Option<bool>,
    /// Identify the function by its syntax tree instead of its source text.
    pub ast_body: Option<bool>,
    /// Leave the function out of the cache key entirely.
    pub no_body: Option<bool>,
    /// Fail when the namespace path exists but is not a directory.
    pub throw_error: Option<bool>,
    /// Recompute when a cache file cannot be decoded.
    pub retry_on_invalid_cache: Option<bool>,
    /// Custom serializer. Must be given together with [`deserialize`](Self::deserialize).
    #[serde(skip)]
    pub serialize: Option<SerializeFn>,
    /// Custom deserializer. Must be given together with [`serialize`](Self::serialize).
    #[serde(skip)]
    pub deserialize: Option<DeserializeFn>,
}

impl Options {
    /// Returns a new layer where every option set in `other` overrides the one in `self`.
    pub fn merge(&self, other: &Options) -> Options {
        Options {
            cache_id: other.cache_id.clone().or_else(|| self.cache_id.clone()),
            salt: other.salt.clone().or_else(|| self.salt.clone()),
            max_age: other.max_age.or(self.max_age),
            force: other.force.or(self.force),
            ast_body: other.ast_body.or(self.ast_body),
            no_body: other.no_body.or(self.no_body),
            throw_error: other.throw_error.or(self.throw_error),
            retry_on_invalid_cache: other.retry_on_invalid_cache.or(self.retry_on_invalid_cache),
            serialize: other.serialize.clone().or_else(|| self.serialize.clone()),
            deserialize: other.deserialize.clone().or_else(|| self.deserialize.clone()),
        }
    }

    /// Checks the options of a single layer.
    pub fn validate(&self) -> Result<(), Error> {
        if self.cache_id.as_deref() == Some("") {
            return Err(Error::config("cache_id must not be empty"));
        }
        if self.max_age == Some(Duration::ZERO) {
            return Err(Error::config("max_age must be greater than zero"));
        }
        if self.serialize.is_some() != self.deserialize.is_some() {
            return Err(Error::config(
                "serialize and deserialize must be given together",
            ));
        }
        Ok(())
    }

    /// Resolves these options against a cache root.
    pub(crate) fn resolve(&self, cache_path: &Path) -> Result<ResolvedOptions, Error> {
        self.validate()?;

        let codec = match (&self.serialize, &self.deserialize) {
            (Some(serialize), Some(deserialize)) => {
                Codec::new(serialize.clone(), deserialize.clone())
            }
            _ => Codec::default(),
        };

        Ok(ResolvedOptions {
            cache_path: cache_path.to_owned(),
            cache_id: self
                .cache_id
                .clone()
                .unwrap_or_else(|| DEFAULT_CACHE_ID.to_owned()),
            salt: self.salt.clone().unwrap_or_default(),
            max_age: self.max_age,
            force: Arc::new(AtomicBool::new(self.force.unwrap_or(false))),
            ast_body: self.ast_body.unwrap_or(false),
            no_body: self.no_body.unwrap_or(false),
            throw_error: self.throw_error.unwrap_or(true),
            retry_on_invalid_cache: self.retry_on_invalid_cache.unwrap_or(false),
            codec,
        })
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("cache_id", &self.cache_id)
            .field("salt", &self.salt)
            .field("max_age", &self.max_age)
            .field("force", &self.force)
            .field("ast_body", &self.ast_body)
            .field("no_body", &self.no_body)
            .field("throw_error", &self.throw_error)
            .field("retry_on_invalid_cache", &self.retry_on_invalid_cache)
            .field("serialize", &self.serialize.is_some())
            .field("deserialize", &self.deserialize.is_some())
            .finish()
    }
}

/// The fully merged options of one memoized function.
///
/// Everything is immutable except for the `force` flag, which is consumed by the first call
/// that observes it.
#[derive(Clone, Debug)]
pub struct ResolvedOptions {
    pub cache_path: PathBuf,
    pub cache_id: String,
    pub salt: String,
    pub max_age: Option<Duration>,
    force: Arc<AtomicBool>,
    pub ast_body: bool,
    pub no_body: bool,
    pub throw_error: bool,
    pub retry_on_invalid_cache: bool,
    pub codec: Codec,
}

impl ResolvedOptions {
    /// The directory holding the cache files of this namespace.
    ///
    /// Interior `.` components are dropped, so the default namespace is the cache root itself.
    pub fn namespace_dir(&self) -> PathBuf {
        namespace_path(&self.cache_path, &self.cache_id)
    }

    /// Clears the force flag, returning whether it was set.
    pub(crate) fn take_force(&self) -> bool {
        self.force.swap(false, Ordering::AcqRel)
    }
}

/// Joins a namespace id onto the cache root.
///
/// The id is always relative to the root: leading `/` and drive prefixes are ignored, and `..`
/// never climbs above the root.
pub(crate) fn namespace_path(cache_path: &Path, cache_id: &str) -> PathBuf {
    let mut path: PathBuf = cache_path.components().collect();
    let mut depth = 0usize;
    for component in Path::new(cache_id).components() {
        match component {
            Component::Normal(part) => {
                path.push(part);
                depth += 1;
            }
            Component::ParentDir if depth > 0 => {
                path.pop();
                depth -= 1;
            }
            _ => {}
        }
    }
    path
}

/// Configuration of a [`Memoizer`](crate::Memoizer).
///
/// Can be loaded from a YAML file:
///
/// ```yaml
/// cache_path: /var/cache/memofs
/// cache_id: reports
/// max_age: 1h
/// logging:
///   level: debug
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct MemoizerConfig {
    /// The cache root directory.
    pub cache_path: Option<PathBuf>,
    /// Default options for every function wrapped by the memoizer.
    #[serde(flatten)]
    pub options: Options,
    /// Configuration for internal logging.
    pub logging: Logging,
}

impl MemoizerConfig {
    /// Creates a configuration with the given cache root and default options.
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: Some(cache_path.into()),
            ..Default::default()
        }
    }

    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(MemoizerConfig::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }

    /// Returns the configured cache root, which must be a non-empty path.
    pub(crate) fn validated_cache_path(&self) -> Result<&Path, Error> {
        match self.cache_path.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => Ok(path),
            Some(_) => Err(Error::config("cache_path must not be empty")),
            None => Err(Error::config("cache_path is required")),
        }
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
