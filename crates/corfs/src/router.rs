//! The cache-on-read router.
//!
//! [`CorFs`] sends every operation to the primary store first. The cache
//! store either receives a best-effort copy of the operation (mutations) or
//! answers in the primary's place when the primary fails (lookups).
//!
//! | Operation                         | Primary ok              | Primary fails        |
//! |-----------------------------------|-------------------------|----------------------|
//! | open, write intent                | wrap primary + cache    | primary error        |
//! | open, read only                   | wrap primary, lazy cache| raw cache handle     |
//! | mkdir/remove/rename/chmod/...     | primary result          | primary result       |
//! | stat, read_dir, read_file         | primary result          | cache result         |
//!
//! Mutations are replayed on the cache whatever the primary returned, and the
//! cache's answer is discarded. When the primary fails and a cache fallback
//! also fails, the primary's error is the one reported.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::CorFsConfig;
use crate::error;
use crate::file::{DualFile, LazyCache};
use crate::observer::{Mirror, MirrorObserver, MirrorOp};
use crate::remove_all::remove_all;
use crate::store::{DirEntry, FileHandle, OpenFlags, RemoveAll, Store, SubtreeStore, clean_dir};

/// A filesystem reading from `primary` and mirroring into `cache`.
///
/// `CorFs` is itself a [`Store`], so it can be stacked under another router
/// or re-rooted with [`subtree`](CorFs::subtree).
#[derive(Clone)]
pub struct CorFs {
    primary: Arc<dyn Store>,
    cache: Option<Arc<dyn Store>>,
    config: CorFsConfig,
    mirror: Mirror,
}

impl CorFs {
    /// Create a router over a primary and a cache store.
    pub fn new(primary: impl Store + 'static, cache: impl Store + 'static) -> Self {
        Self {
            primary: Arc::new(primary),
            cache: Some(Arc::new(cache)),
            config: CorFsConfig::default(),
            mirror: Mirror::default(),
        }
    }

    /// Derive a router rooted at `dir` of the given stores.
    ///
    /// With no cache the view behaves as a plain re-rooted primary: no
    /// fallback, no mirroring.
    pub async fn derive(
        primary: Arc<dyn Store>,
        cache: Option<Arc<dyn Store>>,
        dir: &Path,
    ) -> io::Result<Self> {
        Self::rebase(primary, cache, dir, CorFsConfig::default(), Mirror::default()).await
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: CorFsConfig) -> Self {
        self.config = config;
        self
    }

    /// Report discarded cache failures to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn MirrorObserver>) -> Self {
        self.mirror = Mirror::new(Some(observer));
        self
    }

    pub fn config(&self) -> &CorFsConfig {
        &self.config
    }

    pub fn primary(&self) -> &Arc<dyn Store> {
        &self.primary
    }

    pub fn cache(&self) -> Option<&Arc<dyn Store>> {
        self.cache.as_ref()
    }

    /// A router over the same stores, rooted at `dir`.
    ///
    /// Fails with the not-a-directory sentinel if `dir` is malformed or
    /// names a file on the primary.
    pub async fn subtree(&self, dir: &Path) -> io::Result<CorFs> {
        Self::rebase(
            self.primary.clone(),
            self.cache.clone(),
            dir,
            self.config.clone(),
            self.mirror.clone(),
        )
        .await
    }

    async fn rebase(
        primary: Arc<dyn Store>,
        cache: Option<Arc<dyn Store>>,
        dir: &Path,
        config: CorFsConfig,
        mirror: Mirror,
    ) -> io::Result<Self> {
        clean_dir(dir)?;
        // The directory may not exist yet; only an existing file is refused.
        if let Ok(entry) = primary.stat(dir).await
            && !entry.is_dir()
        {
            return Err(error::not_dir(dir));
        }

        let primary: Arc<dyn Store> = Arc::new(SubtreeStore::new(primary, dir)?);
        let cache = match cache {
            Some(cache) => Some(Arc::new(SubtreeStore::new(cache, dir)?) as Arc<dyn Store>),
            None => None,
        };
        Ok(Self {
            primary,
            cache,
            config,
            mirror,
        })
    }

    /// Build the file object for a successful open.
    fn wrap(
        &self,
        path: &Path,
        primary: Box<dyn FileHandle>,
        cache: Option<Box<dyn FileHandle>>,
    ) -> DualFile {
        let lazy = self.cache.as_ref().map(|store| {
            LazyCache::new(
                store.clone(),
                self.config.cache_file_mode,
                self.config.lazy_cache,
            )
        });
        DualFile::new(path, primary, cache, lazy, self.mirror.clone())
    }

    /// Copy freshly read primary content into the cache.
    async fn mirror_contents(&self, cache: &dyn Store, path: &Path, data: &[u8]) {
        let flags = OpenFlags::CREATE | OpenFlags::WRITE_ONLY | OpenFlags::TRUNCATE;
        let mut file = match cache.open(path, flags, self.config.cache_file_mode).await {
            Ok(file) => file,
            Err(e) => {
                self.mirror.discard::<()>(MirrorOp::Open, path, Err(e));
                return;
            }
        };
        let written = file.write(data).await;
        self.mirror.discard(MirrorOp::Write, path, written);
        let closed = file.close().await;
        self.mirror.discard(MirrorOp::Close, path, closed);
    }
}

/// Recursive removal using the store's own capability when it has one.
async fn remove_tree(store: &dyn Store, path: &Path) -> io::Result<()> {
    match store.as_remove_all() {
        Some(remover) => remover.remove_all(path).await,
        None => remove_all(store, path).await,
    }
}

impl std::fmt::Debug for CorFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorFs")
            .field("cache", &self.cache.is_some())
            .field("config", &self.config)
            .field("mirror", &self.mirror)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Store for CorFs {
    async fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> io::Result<Box<dyn FileHandle>> {
        let primary = self.primary.open(path, flags, mode).await;

        if flags.has_write_intent() {
            // Writes must land on the primary; no fallback.
            let primary = primary?;
            let cache = match &self.cache {
                Some(cache) => match cache.open(path, flags, mode).await {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        self.mirror.discard::<()>(MirrorOp::Open, path, Err(e));
                        None
                    }
                },
                None => None,
            };
            return Ok(Box::new(self.wrap(path, primary, cache)));
        }

        let primary_err = match primary {
            Ok(handle) => return Ok(Box::new(self.wrap(path, handle, None))),
            Err(e) => e,
        };
        let Some(cache) = &self.cache else {
            return Err(primary_err);
        };

        tracing::debug!(path = %path.display(), error = %primary_err, "primary open failed, trying cache");
        match cache.open(path, flags, mode).await {
            // Served from cache alone from here on.
            Ok(handle) => Ok(handle),
            Err(cache_err) => {
                tracing::debug!(path = %path.display(), error = %cache_err, "cache open failed");
                Err(primary_err)
            }
        }
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        let result = self.primary.mkdir(path, mode).await;
        if let Some(cache) = &self.cache {
            self.mirror
                .discard(MirrorOp::Mkdir, path, cache.mkdir(path, mode).await);
        }
        result
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let result = self.primary.remove(path).await;
        if let Some(cache) = &self.cache {
            self.mirror
                .discard(MirrorOp::Remove, path, cache.remove(path).await);
        }
        result
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let result = self.primary.rename(from, to).await;
        if let Some(cache) = &self.cache {
            self.mirror
                .discard(MirrorOp::Rename, from, cache.rename(from, to).await);
        }
        result
    }

    async fn stat(&self, path: &Path) -> io::Result<DirEntry> {
        match (self.primary.stat(path).await, &self.cache) {
            (Err(e), Some(cache)) => {
                tracing::debug!(path = %path.display(), error = %e, "primary stat failed, trying cache");
                cache.stat(path).await
            }
            (result, _) => result,
        }
    }

    async fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        let result = self.primary.chmod(path, mode).await;
        if let Some(cache) = &self.cache {
            self.mirror
                .discard(MirrorOp::Chmod, path, cache.chmod(path, mode).await);
        }
        result
    }

    async fn chtimes(
        &self,
        path: &Path,
        accessed: SystemTime,
        modified: SystemTime,
    ) -> io::Result<()> {
        let result = self.primary.chtimes(path, accessed, modified).await;
        if let Some(cache) = &self.cache {
            let mirrored = cache.chtimes(path, accessed, modified).await;
            self.mirror.discard(MirrorOp::Chtimes, path, mirrored);
        }
        result
    }

    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        let result = self.primary.chown(path, uid, gid).await;
        if let Some(cache) = &self.cache {
            self.mirror
                .discard(MirrorOp::Chown, path, cache.chown(path, uid, gid).await);
        }
        result
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        match (self.primary.read_dir(path).await, &self.cache) {
            (Err(e), Some(cache)) => {
                tracing::debug!(path = %path.display(), error = %e, "primary read_dir failed, trying cache");
                cache.read_dir(path).await
            }
            (result, _) => result,
        }
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        let data = match (self.primary.read_file(path).await, &self.cache) {
            (Err(e), Some(cache)) => {
                tracing::debug!(path = %path.display(), error = %e, "primary read_file failed, trying cache");
                return cache.read_file(path).await;
            }
            (result, _) => result?,
        };

        if !data.is_empty()
            && self.config.mirror_whole_file_reads
            && let Some(cache) = &self.cache
        {
            self.mirror_contents(cache.as_ref(), path, &data).await;
        }
        Ok(data)
    }

    fn as_remove_all(&self) -> Option<&dyn RemoveAll> {
        Some(self)
    }
}

#[async_trait]
impl RemoveAll for CorFs {
    async fn remove_all(&self, path: &Path) -> io::Result<()> {
        let result = remove_tree(self.primary.as_ref(), path).await;
        if let Some(cache) = &self.cache {
            self.mirror.discard(
                MirrorOp::RemoveAll,
                path,
                remove_tree(cache.as_ref(), path).await,
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn pair() -> (MemoryStore, MemoryStore, CorFs) {
        let primary = MemoryStore::new();
        let cache = MemoryStore::new();
        let fs = CorFs::new(primary.clone(), cache.clone());
        (primary, cache, fs)
    }

    #[tokio::test]
    async fn test_write_intent_open_mirrors() {
        let (primary, cache, fs) = pair();
        let mut file = fs
            .open(Path::new("/w.txt"), OpenFlags::CREATE | OpenFlags::WRITE_ONLY, 0o644)
            .await
            .unwrap();
        file.write(b"both").await.unwrap();
        file.close().await.unwrap();

        assert_eq!(primary.read_file(Path::new("/w.txt")).await.unwrap(), b"both");
        assert_eq!(cache.read_file(Path::new("/w.txt")).await.unwrap(), b"both");
    }

    #[tokio::test]
    async fn test_read_only_falls_back_to_cache() {
        let (_primary, cache, fs) = pair();
        cache.write_file(Path::new("/f.txt"), b"hello").await.unwrap();

        let mut file = fs
            .open(Path::new("/f.txt"), OpenFlags::READ_ONLY, 0)
            .await
            .unwrap();
        let mut buf = [0u8; 10];
        let n = file.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn test_read_file_populates_cache() {
        let (primary, cache, fs) = pair();
        primary.write_file(Path::new("/doc.md"), b"# title").await.unwrap();

        assert_eq!(fs.read_file(Path::new("/doc.md")).await.unwrap(), b"# title");
        assert_eq!(cache.read_file(Path::new("/doc.md")).await.unwrap(), b"# title");
    }

    #[tokio::test]
    async fn test_read_file_mirroring_can_be_disabled() {
        let (primary, cache, fs) = pair();
        let fs = fs.with_config(CorFsConfig {
            mirror_whole_file_reads: false,
            ..CorFsConfig::default()
        });
        primary.write_file(Path::new("/doc.md"), b"# title").await.unwrap();

        fs.read_file(Path::new("/doc.md")).await.unwrap();
        assert!(cache.stat(Path::new("/doc.md")).await.is_err());
    }

    #[tokio::test]
    async fn test_truncate_through_router() {
        let (primary, cache, fs) = pair();
        primary.write_file(Path::new("/t"), b"0123456789").await.unwrap();
        cache.write_file(Path::new("/t"), b"0123456789").await.unwrap();

        fs.truncate(Path::new("/t"), 3).await.unwrap();
        assert_eq!(primary.read_file(Path::new("/t")).await.unwrap(), b"012");
        assert_eq!(cache.read_file(Path::new("/t")).await.unwrap(), b"012");
    }

    #[tokio::test]
    async fn test_truncate_missing_file() {
        let (_primary, _cache, fs) = pair();
        let err = fs.truncate(Path::new("/missing"), 0).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_subtree_of_file_is_not_dir() {
        let (primary, _cache, fs) = pair();
        primary.write_file(Path::new("/plain"), b"x").await.unwrap();
        let err = fs.subtree(Path::new("/plain")).await.unwrap_err();
        assert!(error::is_not_dir(&err));
    }
}
