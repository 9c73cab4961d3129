//! Visibility into discarded cache-tier failures.
//!
//! Mirroring onto the cache never reports errors to the caller. Every
//! discarded error is logged at `debug` and, if one is installed, handed to
//! a [`MirrorObserver`].

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// The cache-tier operation whose failure was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorOp {
    Open,
    LazyOpen,
    Mkdir,
    Remove,
    RemoveAll,
    Rename,
    Chmod,
    Chtimes,
    Chown,
    Write,
    WriteAt,
    Seek,
    Sync,
    Truncate,
    Close,
}

impl fmt::Display for MirrorOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MirrorOp::Open => "open",
            MirrorOp::LazyOpen => "lazy_open",
            MirrorOp::Mkdir => "mkdir",
            MirrorOp::Remove => "remove",
            MirrorOp::RemoveAll => "remove_all",
            MirrorOp::Rename => "rename",
            MirrorOp::Chmod => "chmod",
            MirrorOp::Chtimes => "chtimes",
            MirrorOp::Chown => "chown",
            MirrorOp::Write => "write",
            MirrorOp::WriteAt => "write_at",
            MirrorOp::Seek => "seek",
            MirrorOp::Sync => "sync",
            MirrorOp::Truncate => "truncate",
            MirrorOp::Close => "close",
        };
        f.write_str(name)
    }
}

/// A cache-tier failure that was swallowed.
#[derive(Debug)]
pub struct MirrorFailure<'a> {
    pub op: MirrorOp,
    pub path: &'a Path,
    pub error: &'a io::Error,
}

/// Hook for counting or logging cache failures.
///
/// Observers see failures after the fact; they cannot change the result
/// returned to the caller.
pub trait MirrorObserver: Send + Sync {
    fn mirror_failed(&self, failure: &MirrorFailure<'_>);
}

/// Discards the result of a cache-tier call, reporting failures.
#[derive(Clone, Default)]
pub(crate) struct Mirror {
    observer: Option<Arc<dyn MirrorObserver>>,
}

impl Mirror {
    pub(crate) fn new(observer: Option<Arc<dyn MirrorObserver>>) -> Self {
        Self { observer }
    }

    pub(crate) fn discard<T>(&self, op: MirrorOp, path: &Path, result: io::Result<T>) {
        match result {
            Ok(_) => tracing::trace!(op = %op, path = %path.display(), "cache mirrored"),
            Err(error) => self.report(op, path, error),
        }
    }

    fn report(&self, op: MirrorOp, path: &Path, error: io::Error) {
        tracing::debug!(op = %op, path = %path.display(), error = %error, "cache mirror failed");
        if let Some(observer) = &self.observer {
            observer.mirror_failed(&MirrorFailure {
                op,
                path,
                error: &error,
            });
        }
    }
}

impl fmt::Debug for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mirror")
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
