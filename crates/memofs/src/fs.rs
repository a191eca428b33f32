//! The on-disk side of the cache: one file per memoized result.
//!
//! Freshness is tracked through the `mtime` of each cache file, which is set whenever the file is
//! (re)written. Nothing else about a file is trusted, and there is no index next to the files.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, IoResultExt};

/// Creates the directory of a cache namespace, including all of its parents.
///
/// A path that already exists but is not a directory is an error, unless `throw_error` is
/// `false`, in which case it is silently accepted. Later writes into such a namespace will fail.
pub async fn ensure_namespace(path: &Path, throw_error: bool) -> Result<(), Error> {
    match tokio::fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && !throw_error => {
            tracing::debug!(
                error = &e as &dyn std::error::Error,
                "Ignoring existing non-directory namespace `{}`",
                path.display()
            );
            Ok(())
        }
        Err(e) => Err(e).or_namespace(path),
    }
}

/// Reads a cache file, unless it does not exist or is older than `max_age`.
pub async fn read_if_fresh(
    path: &Path,
    max_age: Option<Duration>,
) -> Result<Option<Vec<u8>>, Error> {
    let Some(metadata) = catch_not_found(tokio::fs::metadata(path)).await.or_read(path)? else {
        tracing::trace!("No cache file at `{}`", path.display());
        return Ok(None);
    };

    if let Some(max_age) = max_age {
        let mtime = metadata.modified().or_read(path)?;
        // an mtime in the future counts as fresh
        let elapsed = mtime.elapsed().unwrap_or_default();
        if elapsed > max_age {
            tracing::trace!(
                "Cache file `{}` expired {:?} ago",
                path.display(),
                elapsed - max_age
            );
            return Ok(None);
        }
    }

    // the file may have been removed in between
    catch_not_found(tokio::fs::read(path)).await.or_read(path)
}

/// Writes a cache file.
///
/// With a `max_age`, a detached task removes the file again once `max_age` has passed. That task
/// never fails: a file that is already gone is fine, and other errors are only logged.
pub async fn write_entry(
    path: &Path,
    contents: &str,
    max_age: Option<Duration>,
) -> Result<(), Error> {
    tokio::fs::write(path, contents).await.or_write(path)?;
    tracing::debug!("Wrote cache file `{}`", path.display());

    if let Some(max_age) = max_age {
        tokio::spawn(expire_entry(path.to_owned(), max_age));
    }

    Ok(())
}

async fn expire_entry(path: PathBuf, max_age: Duration) {
    tokio::time::sleep(max_age).await;

    match catch_not_found(tokio::fs::remove_file(&path)).await {
        Ok(Some(())) => tracing::debug!("Expired cache file `{}`", path.display()),
        Ok(None) => tracing::trace!("Expired cache file `{}` was already gone", path.display()),
        Err(e) => tracing::warn!(
            error = &e as &dyn std::error::Error,
            "Failed to expire cache file `{}`",
            path.display()
        ),
    }
}

/// Recursively removes a namespace directory and every cache file in it.
pub async fn remove_namespace(path: &Path) -> Result<(), Error> {
    tokio::fs::remove_dir_all(path).await.or_invalidate(path)?;
    tracing::debug!("Removed cache directory `{}`", path.display());
    Ok(())
}

/// Turns a [`io::ErrorKind::NotFound`] error into `None`.
pub(crate) async fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: Future<Output = io::Result<R>>,
{
    match f.await {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}
