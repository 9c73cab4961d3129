//! The open-file object handed out by [`CorFs`](crate::CorFs).
//!
//! A `DualFile` owns a primary handle and, once cache participation is
//! established, a cache handle. Mutations on the primary are replayed on the
//! cache; cache failures are discarded through [`Mirror`].

use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::LazyCachePolicy;
use crate::error::CorFsError;
use crate::observer::{Mirror, MirrorOp};
use crate::store::{DirEntry, FileHandle, OpenFlags, Store, is_dot_name};

/// The one capability a file needs from its router: opening the cache copy
/// of a name it has started reading.
#[derive(Clone)]
pub(crate) struct LazyCache {
    store: Arc<dyn Store>,
    mode: u32,
    policy: LazyCachePolicy,
}

impl LazyCache {
    pub(crate) fn new(store: Arc<dyn Store>, mode: u32, policy: LazyCachePolicy) -> Self {
        Self {
            store,
            mode,
            policy,
        }
    }

    async fn open(&self, path: &Path) -> io::Result<Box<dyn FileHandle>> {
        self.store
            .open(path, OpenFlags::CREATE | OpenFlags::WRITE_ONLY, self.mode)
            .await
    }
}

/// A file open on the primary store, mirrored onto the cache store.
///
/// Only sequential [`read`](FileHandle::read) populates the cache lazily;
/// [`read_at`](FileHandle::read_at) reads the primary and nothing else.
pub struct DualFile {
    name: String,
    path: PathBuf,
    primary: Option<Box<dyn FileHandle>>,
    cache: Option<Box<dyn FileHandle>>,
    lazy: Option<LazyCache>,
    lazy_attempted: bool,
    mirror: Mirror,
}

impl DualFile {
    pub(crate) fn new(
        path: &Path,
        primary: Box<dyn FileHandle>,
        cache: Option<Box<dyn FileHandle>>,
        lazy: Option<LazyCache>,
        mirror: Mirror,
    ) -> Self {
        Self {
            name: path.display().to_string(),
            path: path.to_path_buf(),
            primary: Some(primary),
            cache,
            lazy,
            lazy_attempted: false,
            mirror,
        }
    }

    /// True once a cache handle is attached.
    pub fn has_cache_handle(&self) -> bool {
        self.cache.is_some()
    }

    fn primary(&mut self) -> io::Result<&mut (dyn FileHandle + 'static)> {
        match self.primary.as_deref_mut() {
            Some(handle) => Ok(handle),
            None => Err(CorFsError::Closed(self.name.clone()).into()),
        }
    }

    /// Attach a cache handle after `read_len` bytes came off the primary.
    async fn open_lazy(&mut self, read_len: usize) {
        let Some(lazy) = &self.lazy else {
            return;
        };
        if self.lazy_attempted && lazy.policy == LazyCachePolicy::Once {
            return;
        }
        self.lazy_attempted = true;

        let mut cache = match lazy.open(&self.path).await {
            Ok(cache) => cache,
            Err(e) => {
                self.mirror.discard::<()>(MirrorOp::LazyOpen, &self.path, Err(e));
                return;
            }
        };

        // Line the cache up with the offset the triggering read started at.
        if let Some(primary) = self.primary.as_deref_mut()
            && let Ok(end) = primary.seek(SeekFrom::Current(0)).await
        {
            let start = end.saturating_sub(read_len as u64);
            if start > 0 {
                let result = cache.seek(SeekFrom::Start(start)).await;
                self.mirror.discard(MirrorOp::Seek, &self.path, result);
            }
        }

        tracing::trace!(path = %self.path.display(), "lazily attached cache handle");
        self.cache = Some(cache);
    }

    /// At primary EOF, cut any longer stale cache copy down to the primary's length.
    async fn trim_cache_tail(&mut self) {
        let (Some(primary), Some(cache)) = (self.primary.as_deref_mut(), self.cache.as_deref_mut())
        else {
            return;
        };
        let Ok(len) = primary.seek(SeekFrom::Current(0)).await else {
            return;
        };
        let result = cache.truncate(len).await;
        self.mirror.discard(MirrorOp::Truncate, &self.path, result);
    }
}

#[async_trait]
impl FileHandle for DualFile {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.primary()?.read(buf).await?;
        if n == 0 {
            if !buf.is_empty() {
                self.trim_cache_tail().await;
            }
            return Ok(0);
        }

        if self.cache.is_none() {
            self.open_lazy(n).await;
        }
        if let Some(cache) = self.cache.as_deref_mut() {
            let result = cache.write(&buf[..n]).await;
            self.mirror.discard(MirrorOp::Write, &self.path, result);
        }
        Ok(n)
    }

    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.primary()?.read_at(buf, offset).await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.primary()?.write(buf).await?;
        if n > 0
            && let Some(cache) = self.cache.as_deref_mut()
        {
            let result = cache.write(&buf[..n]).await;
            self.mirror.discard(MirrorOp::Write, &self.path, result);
        }
        Ok(n)
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let n = self.primary()?.write_at(buf, offset).await?;
        if n > 0
            && let Some(cache) = self.cache.as_deref_mut()
        {
            let result = cache.write_at(&buf[..n], offset).await;
            self.mirror.discard(MirrorOp::WriteAt, &self.path, result);
        }
        Ok(n)
    }

    async fn write_str(&mut self, s: &str) -> io::Result<usize> {
        let n = self.primary()?.write_str(s).await?;
        if n > 0
            && let Some(cache) = self.cache.as_deref_mut()
        {
            let result = if n == s.len() {
                cache.write_str(s).await
            } else {
                cache.write(&s.as_bytes()[..n]).await
            };
            self.mirror.discard(MirrorOp::Write, &self.path, result);
        }
        Ok(n)
    }

    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let result = self.primary()?.seek(pos).await;
        if let Some(cache) = self.cache.as_deref_mut() {
            let mirrored = cache.seek(pos).await;
            self.mirror.discard(MirrorOp::Seek, &self.path, mirrored);
        }
        result
    }

    async fn stat(&mut self) -> io::Result<DirEntry> {
        self.primary()?.stat().await
    }

    async fn sync(&mut self) -> io::Result<()> {
        let result = self.primary()?.sync().await;
        if let Some(cache) = self.cache.as_deref_mut() {
            let mirrored = cache.sync().await;
            self.mirror.discard(MirrorOp::Sync, &self.path, mirrored);
        }
        result
    }

    async fn truncate(&mut self, size: u64) -> io::Result<()> {
        let result = self.primary()?.truncate(size).await;
        if let Some(cache) = self.cache.as_deref_mut() {
            let mirrored = cache.truncate(size).await;
            self.mirror.discard(MirrorOp::Truncate, &self.path, mirrored);
        }
        result
    }

    async fn read_dir(&mut self, limit: Option<usize>) -> io::Result<Vec<DirEntry>> {
        let mut entries = self.primary()?.read_dir(limit).await?;
        entries.retain(|e| !e.is_dot());
        Ok(entries)
    }

    async fn read_dir_names(&mut self, limit: Option<usize>) -> io::Result<Vec<String>> {
        let mut names = self.primary()?.read_dir_names(limit).await?;
        names.retain(|name| !is_dot_name(name));
        Ok(names)
    }

    async fn close(&mut self) -> io::Result<()> {
        let mut primary = self
            .primary
            .take()
            .ok_or_else(|| io::Error::from(CorFsError::Closed(self.name.clone())))?;
        let result = primary.close().await;
        if let Some(mut cache) = self.cache.take() {
            let closed = cache.close().await;
            self.mirror.discard(MirrorOp::Close, &self.path, closed);
        }
        result
    }
}

impl std::fmt::Debug for DualFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualFile")
            .field("name", &self.name)
            .field("open", &self.primary.is_some())
            .field("cached", &self.cache.is_some())
            .field("lazy_attempted", &self.lazy_attempted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn open_pair(content: &[u8]) -> (Arc<MemoryStore>, Arc<MemoryStore>, DualFile) {
        let primary = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryStore::new());
        primary.write_file(Path::new("/f.txt"), content).await.unwrap();

        let handle = primary
            .open(Path::new("/f.txt"), OpenFlags::READ_ONLY, 0)
            .await
            .unwrap();
        let lazy = LazyCache::new(cache.clone(), 0o644, LazyCachePolicy::Retry);
        let file = DualFile::new(
            Path::new("/f.txt"),
            handle,
            None,
            Some(lazy),
            Mirror::default(),
        );
        (primary, cache, file)
    }

    #[tokio::test]
    async fn test_read_attaches_cache() {
        let (_primary, cache, mut file) = open_pair(b"hello").await;
        assert!(!file.has_cache_handle());

        let mut buf = [0u8; 16];
        let n = file.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert!(file.has_cache_handle());

        file.close().await.unwrap();
        assert_eq!(cache.read_file(Path::new("/f.txt")).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_read_at_does_not_cache() {
        let (_primary, cache, mut file) = open_pair(b"hello").await;

        let mut buf = [0u8; 3];
        let n = file.read_at(&mut buf, 1).await.unwrap();
        assert_eq!(&buf[..n], b"ell");
        assert!(!file.has_cache_handle());

        file.close().await.unwrap();
        assert!(cache.stat(Path::new("/f.txt")).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_read_does_not_cache() {
        let (_primary, cache, mut file) = open_pair(b"").await;

        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf).await.unwrap(), 0);
        assert!(!file.has_cache_handle());

        file.close().await.unwrap();
        assert!(cache.stat(Path::new("/f.txt")).await.is_err());
    }

    #[tokio::test]
    async fn test_lazy_cache_starts_at_read_offset() {
        let (_primary, cache, mut file) = open_pair(b"0123456789").await;

        file.seek(SeekFrom::Start(4)).await.unwrap();
        let mut buf = [0u8; 3];
        file.read(&mut buf).await.unwrap();
        file.close().await.unwrap();

        let cached = cache.read_file(Path::new("/f.txt")).await.unwrap();
        assert_eq!(&cached[4..], b"456");
    }

    #[tokio::test]
    async fn test_use_after_close() {
        let (_primary, _cache, mut file) = open_pair(b"data").await;
        file.close().await.unwrap();

        let mut buf = [0u8; 4];
        let err = file.read(&mut buf).await.unwrap_err();
        assert!(crate::error::is_closed(&err));
        assert!(file.close().await.is_err());
    }
}
