use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::ResolvedOptions;
use crate::error::Error;
use crate::syntax::SourceParser;
use crate::value::{Function, Value};

/// The identity of one memoized call.
///
/// The key is the first 16 bytes of a sha-256 hash over the function material, the serialized
/// arguments and the salt, in that order.
#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    metadata: Arc<str>,
    hash: [u8; 16],
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl CacheKey {
    /// Derives the key for calling `function` with `args`.
    ///
    /// In `ast_body` mode the source of `function` is parsed with `parser`, which is the only way
    /// this can fail.
    pub fn for_call(
        function: &Function,
        args: &[Value],
        options: &ResolvedOptions,
        parser: &dyn SourceParser,
    ) -> Result<Self, Error> {
        let mut builder = CacheKeyBuilder::default();

        if !options.no_body {
            if options.ast_body {
                let tree = parser.parse(function.source())?;
                builder.push(&tree.to_json()?);
            } else {
                builder.push(function.source());
            }
        }
        builder.push(&options.codec.serialize(&Value::Array(args.to_vec())));
        builder.push(&options.salt);

        Ok(builder.build())
    }

    /// Returns the text that was hashed into this key.
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Returns the name of the cache file: the hash as 32 lowercase hex characters.
    pub fn file_name(&self) -> String {
        hex::encode(self.hash)
    }

    /// Returns the full path of the cache file for this key.
    pub fn cache_path(&self, options: &ResolvedOptions) -> PathBuf {
        options.namespace_dir().join(self.file_name())
    }
}

/// A builder for [`CacheKey`]s.
///
/// The builder accepts **stable** input, which is concatenated and hashed to form the
/// [`CacheKey`].
#[derive(Debug, Default)]
pub struct CacheKeyBuilder {
    metadata: String,
}

impl CacheKeyBuilder {
    pub fn push(&mut self, material: &str) {
        self.metadata.push_str(material);
    }

    /// Finalize the [`CacheKey`].
    pub fn build(self) -> CacheKey {
        let digest = Sha256::digest(self.metadata.as_bytes());
        let mut hash = [0; 16];
        hash.copy_from_slice(&digest[..16]);

        CacheKey {
            metadata: self.metadata.into(),
            hash,
        }
    }
}
