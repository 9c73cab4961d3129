//! A store view rooted at a directory of another store.

use super::traits::{DirEntry, FileHandle, OpenFlags, RemoveAll, Store};
use crate::error::{self, CorFsError};
use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Re-roots every path at `prefix` before delegating to `inner`.
///
/// `open("a.txt")` on a view of `docs` opens `docs/a.txt` on the inner store.
/// Paths that climb above the view's root are refused.
#[derive(Clone)]
pub struct SubtreeStore {
    inner: Arc<dyn Store>,
    prefix: PathBuf,
}

impl SubtreeStore {
    /// Create a view of `inner` rooted at `dir`.
    ///
    /// `dir` must be a plain relative-or-absolute directory path: no `..`,
    /// not empty. Anything else yields the not-a-directory sentinel.
    pub fn new(inner: Arc<dyn Store>, dir: &Path) -> io::Result<Self> {
        let prefix = clean_dir(dir)?;
        Ok(Self { inner, prefix })
    }

    /// The directory this view is rooted at, relative to the inner store.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        let mut relative = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(s) => relative.push(s),
                Component::ParentDir => {
                    if !relative.pop() {
                        return Err(CorFsError::EscapesRoot(path.to_path_buf()).into());
                    }
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        Ok(Path::new("/").join(&self.prefix).join(relative))
    }
}

/// Validate a subtree directory and strip it down to normal components.
pub(crate) fn clean_dir(dir: &Path) -> io::Result<PathBuf> {
    let mut cleaned = PathBuf::new();
    for component in dir.components() {
        match component {
            Component::Normal(s) => cleaned.push(s),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return Err(error::not_dir(dir)),
        }
    }
    if dir.as_os_str().is_empty() {
        return Err(error::not_dir(dir));
    }
    Ok(cleaned)
}

impl std::fmt::Debug for SubtreeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubtreeStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Store for SubtreeStore {
    async fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> io::Result<Box<dyn FileHandle>> {
        self.inner.open(&self.resolve(path)?, flags, mode).await
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.inner.mkdir(&self.resolve(path)?, mode).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        self.inner.remove(&self.resolve(path)?).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.inner
            .rename(&self.resolve(from)?, &self.resolve(to)?)
            .await
    }

    async fn stat(&self, path: &Path) -> io::Result<DirEntry> {
        self.inner.stat(&self.resolve(path)?).await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.inner.chmod(&self.resolve(path)?, mode).await
    }

    async fn chtimes(
        &self,
        path: &Path,
        accessed: SystemTime,
        modified: SystemTime,
    ) -> io::Result<()> {
        self.inner
            .chtimes(&self.resolve(path)?, accessed, modified)
            .await
    }

    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        self.inner.chown(&self.resolve(path)?, uid, gid).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        self.inner.read_dir(&self.resolve(path)?).await
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read_file(&self.resolve(path)?).await
    }

    fn as_remove_all(&self) -> Option<&dyn RemoveAll> {
        // Only claim the capability when the inner store really has it.
        self.inner.as_remove_all().map(|_| self as &dyn RemoveAll)
    }
}

#[async_trait]
impl RemoveAll for SubtreeStore {
    async fn remove_all(&self, path: &Path) -> io::Result<()> {
        let resolved = self.resolve(path)?;
        match self.inner.as_remove_all() {
            Some(remover) => remover.remove_all(&resolved).await,
            None => crate::remove_all::remove_all(self.inner.as_ref(), &resolved).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn view() -> (Arc<MemoryStore>, SubtreeStore) {
        let inner = Arc::new(MemoryStore::new());
        inner.write_file(Path::new("/docs/a.txt"), b"a").await.unwrap();
        inner.write_file(Path::new("/docs/sub/b.txt"), b"b").await.unwrap();
        inner.write_file(Path::new("/other.txt"), b"o").await.unwrap();
        let view = SubtreeStore::new(inner.clone(), Path::new("/docs")).unwrap();
        (inner, view)
    }

    #[tokio::test]
    async fn test_paths_are_rebased() {
        let (_inner, view) = view().await;
        assert_eq!(view.read_file(Path::new("a.txt")).await.unwrap(), b"a");
        assert_eq!(view.read_file(Path::new("/sub/b.txt")).await.unwrap(), b"b");

        let names: Vec<_> = view
            .read_dir(Path::new("/"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "sub"]);
    }

    #[tokio::test]
    async fn test_writes_land_under_prefix() {
        let (inner, view) = view().await;
        view.mkdir(Path::new("new"), 0o755).await.unwrap();
        assert!(inner.stat(Path::new("/docs/new")).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_escape_refused() {
        let (_inner, view) = view().await;
        let err = view.stat(Path::new("../other.txt")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        // `..` that stays inside the view is fine
        assert!(view.stat(Path::new("sub/../a.txt")).await.is_ok());
    }

    #[test]
    fn test_invalid_dir_shapes() {
        let inner: Arc<dyn Store> = Arc::new(MemoryStore::new());
        for dir in ["", "../up", "a/../../b"] {
            let err = SubtreeStore::new(inner.clone(), Path::new(dir)).unwrap_err();
            assert!(error::is_not_dir(&err), "{dir:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_remove_all_capability_follows_inner() {
        let (inner, view) = view().await;
        let remover = view.as_remove_all().unwrap();
        remover.remove_all(Path::new("sub")).await.unwrap();
        assert!(inner.stat(Path::new("/docs/sub")).await.is_err());
        assert!(inner.stat(Path::new("/docs/a.txt")).await.is_ok());
    }
}
