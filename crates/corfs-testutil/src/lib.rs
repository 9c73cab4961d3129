//! Test utilities for corfs.
//!
//! Store wrappers that make the router's behaviour observable:
//! - [`FaultyStore`]: fails chosen operations on demand
//! - [`RecordingStore`]: logs every store call in order
//! - [`ListingStore`]: adds `.` and `..` to directory handle listings, or
//!   lists entries in reverse order
//! - [`CollectingObserver`]: keeps every discarded cache failure

use async_trait::async_trait;
use corfs::{DirEntry, FileHandle, MirrorFailure, MirrorObserver, MirrorOp, OpenFlags, RemoveAll, Store};
use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An operation that a [`FaultyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Open,
    Mkdir,
    Remove,
    RemoveAll,
    Rename,
    Stat,
    Chmod,
    Chtimes,
    Chown,
    ReadDir,
    Read,
    Write,
    Seek,
    Sync,
    Truncate,
    Close,
}

type Faults = Arc<Mutex<HashMap<Op, io::ErrorKind>>>;

fn check(faults: &Faults, op: Op, path: &Path) -> io::Result<()> {
    match lock(faults).get(&op) {
        Some(kind) => Err(io::Error::new(
            *kind,
            format!("injected {op:?} failure: {}", path.display()),
        )),
        None => Ok(()),
    }
}

/// Wraps a store and fails selected operations.
///
/// Faults apply to store calls and to calls on handles the store opened,
/// including handles opened before the fault was set. Clones share faults.
#[derive(Clone)]
pub struct FaultyStore<S> {
    inner: S,
    faults: Faults,
}

impl<S: Store> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Arc::default(),
        }
    }

    /// Make `op` fail with `io::ErrorKind::Other`.
    pub fn fail(&self, op: Op) {
        self.fail_with(op, io::ErrorKind::Other);
    }

    /// Make `op` fail with an error of `kind`.
    pub fn fail_with(&self, op: Op, kind: io::ErrorKind) {
        lock(&self.faults).insert(op, kind);
    }

    /// Stop failing `op`.
    pub fn heal(&self, op: Op) {
        lock(&self.faults).remove(&op);
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: Store> Store for FaultyStore<S> {
    async fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> io::Result<Box<dyn FileHandle>> {
        check(&self.faults, Op::Open, path)?;
        let inner = self.inner.open(path, flags, mode).await?;
        Ok(Box::new(FaultyHandle {
            inner,
            path: path.to_path_buf(),
            faults: self.faults.clone(),
        }))
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        check(&self.faults, Op::Mkdir, path)?;
        self.inner.mkdir(path, mode).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        check(&self.faults, Op::Remove, path)?;
        self.inner.remove(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        check(&self.faults, Op::Rename, from)?;
        self.inner.rename(from, to).await
    }

    async fn stat(&self, path: &Path) -> io::Result<DirEntry> {
        check(&self.faults, Op::Stat, path)?;
        self.inner.stat(path).await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        check(&self.faults, Op::Chmod, path)?;
        self.inner.chmod(path, mode).await
    }

    async fn chtimes(
        &self,
        path: &Path,
        accessed: SystemTime,
        modified: SystemTime,
    ) -> io::Result<()> {
        check(&self.faults, Op::Chtimes, path)?;
        self.inner.chtimes(path, accessed, modified).await
    }

    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        check(&self.faults, Op::Chown, path)?;
        self.inner.chown(path, uid, gid).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        check(&self.faults, Op::ReadDir, path)?;
        self.inner.read_dir(path).await
    }

    fn as_remove_all(&self) -> Option<&dyn RemoveAll> {
        self.inner.as_remove_all().map(|_| self as &dyn RemoveAll)
    }
}

#[async_trait]
impl<S: Store> RemoveAll for FaultyStore<S> {
    async fn remove_all(&self, path: &Path) -> io::Result<()> {
        check(&self.faults, Op::RemoveAll, path)?;
        match self.inner.as_remove_all() {
            Some(remover) => remover.remove_all(path).await,
            None => corfs::remove_all(&self.inner, path).await,
        }
    }
}

struct FaultyHandle {
    inner: Box<dyn FileHandle>,
    path: PathBuf,
    faults: Faults,
}

impl FaultyHandle {
    fn check(&self, op: Op) -> io::Result<()> {
        check(&self.faults, op, &self.path)
    }
}

#[async_trait]
impl FileHandle for FaultyHandle {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check(Op::Read)?;
        self.inner.read(buf).await
    }

    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.check(Op::Read)?;
        self.inner.read_at(buf, offset).await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check(Op::Write)?;
        self.inner.write(buf).await
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        self.check(Op::Write)?;
        self.inner.write_at(buf, offset).await
    }

    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.check(Op::Seek)?;
        self.inner.seek(pos).await
    }

    async fn stat(&mut self) -> io::Result<DirEntry> {
        self.check(Op::Stat)?;
        self.inner.stat().await
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.check(Op::Sync)?;
        self.inner.sync().await
    }

    async fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.check(Op::Truncate)?;
        self.inner.truncate(size).await
    }

    async fn read_dir(&mut self, limit: Option<usize>) -> io::Result<Vec<DirEntry>> {
        self.check(Op::ReadDir)?;
        self.inner.read_dir(limit).await
    }

    async fn close(&mut self) -> io::Result<()> {
        // The inner handle is released either way.
        let closed = self.inner.close().await;
        self.check(Op::Close)?;
        closed
    }
}

/// Wraps a store and logs each call as `"<op> <path>"`.
///
/// Renames are logged as `"rename <from> <to>"`. Handle calls are not logged.
#[derive(Clone)]
pub struct RecordingStore<S> {
    inner: S,
    log: Arc<Mutex<Vec<String>>>,
    native_remove_all: bool,
}

impl<S: Store> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            log: Arc::default(),
            native_remove_all: true,
        }
    }

    /// Stop advertising the inner store's recursive removal.
    pub fn without_remove_all(mut self) -> Self {
        self.native_remove_all = false;
        self
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.log).clone()
    }

    /// Calls whose op is `op`, e.g. `"remove"`.
    pub fn calls_of(&self, op: &str) -> Vec<String> {
        let prefix = format!("{op} ");
        lock(&self.log)
            .iter()
            .filter(|call| call.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls_of(op).len()
    }

    pub fn clear(&self) {
        lock(&self.log).clear();
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn record(&self, op: &str, path: &Path) {
        lock(&self.log).push(format!("{op} {}", path.display()));
    }
}

#[async_trait]
impl<S: Store> Store for RecordingStore<S> {
    async fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> io::Result<Box<dyn FileHandle>> {
        self.record("open", path);
        self.inner.open(path, flags, mode).await
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.record("mkdir", path);
        self.inner.mkdir(path, mode).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        self.record("remove", path);
        self.inner.remove(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        lock(&self.log).push(format!("rename {} {}", from.display(), to.display()));
        self.inner.rename(from, to).await
    }

    async fn stat(&self, path: &Path) -> io::Result<DirEntry> {
        self.record("stat", path);
        self.inner.stat(path).await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.record("chmod", path);
        self.inner.chmod(path, mode).await
    }

    async fn chtimes(
        &self,
        path: &Path,
        accessed: SystemTime,
        modified: SystemTime,
    ) -> io::Result<()> {
        self.record("chtimes", path);
        self.inner.chtimes(path, accessed, modified).await
    }

    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        self.record("chown", path);
        self.inner.chown(path, uid, gid).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        self.record("read_dir", path);
        self.inner.read_dir(path).await
    }

    fn as_remove_all(&self) -> Option<&dyn RemoveAll> {
        if !self.native_remove_all {
            return None;
        }
        self.inner.as_remove_all().map(|_| self as &dyn RemoveAll)
    }
}

#[async_trait]
impl<S: Store> RemoveAll for RecordingStore<S> {
    async fn remove_all(&self, path: &Path) -> io::Result<()> {
        self.record("remove_all", path);
        match self.inner.as_remove_all() {
            Some(remover) => remover.remove_all(path).await,
            None => corfs::remove_all(&self.inner, path).await,
        }
    }
}

/// Wraps a store and changes how directories are listed.
///
/// Some backing stores report the `.` and `..` pseudo-entries, and few
/// promise any order; the in-memory store does neither.
#[derive(Clone)]
pub struct ListingStore<S> {
    inner: S,
    dots: bool,
    reversed: bool,
}

impl<S: Store> ListingStore<S> {
    /// Directory handles list `.` and `..` first.
    pub fn with_dots(inner: S) -> Self {
        Self {
            inner,
            dots: true,
            reversed: false,
        }
    }

    /// Every listing comes back in reverse order.
    pub fn reversed(inner: S) -> Self {
        Self {
            inner,
            dots: false,
            reversed: true,
        }
    }
}

#[async_trait]
impl<S: Store> Store for ListingStore<S> {
    async fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> io::Result<Box<dyn FileHandle>> {
        let inner = self.inner.open(path, flags, mode).await?;
        Ok(Box::new(ListingHandle {
            inner,
            dots_pending: self.dots,
            reversed: self.reversed,
        }))
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.inner.mkdir(path, mode).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        self.inner.remove(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.inner.rename(from, to).await
    }

    async fn stat(&self, path: &Path) -> io::Result<DirEntry> {
        self.inner.stat(path).await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.inner.chmod(path, mode).await
    }

    async fn chtimes(
        &self,
        path: &Path,
        accessed: SystemTime,
        modified: SystemTime,
    ) -> io::Result<()> {
        self.inner.chtimes(path, accessed, modified).await
    }

    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        self.inner.chown(path, uid, gid).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = self.inner.read_dir(path).await?;
        if self.reversed {
            entries.reverse();
        }
        Ok(entries)
    }
}

struct ListingHandle {
    inner: Box<dyn FileHandle>,
    dots_pending: bool,
    reversed: bool,
}

#[async_trait]
impl FileHandle for ListingHandle {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).await
    }

    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.inner.read_at(buf, offset).await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf).await
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        self.inner.write_at(buf, offset).await
    }

    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos).await
    }

    async fn stat(&mut self) -> io::Result<DirEntry> {
        self.inner.stat().await
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.inner.sync().await
    }

    async fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.inner.truncate(size).await
    }

    async fn read_dir(&mut self, limit: Option<usize>) -> io::Result<Vec<DirEntry>> {
        let mut entries = self.inner.read_dir(limit).await?;
        if self.reversed {
            entries.reverse();
        }
        if self.dots_pending {
            self.dots_pending = false;
            entries.insert(0, DirEntry::directory(".."));
            entries.insert(0, DirEntry::directory("."));
        }
        Ok(entries)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.close().await
    }
}

/// A discarded cache failure, owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFailure {
    pub op: MirrorOp,
    pub path: PathBuf,
    pub kind: io::ErrorKind,
}

/// Observer that keeps every failure it is shown.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    failures: Mutex<Vec<RecordedFailure>>,
}

impl CollectingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failures(&self) -> Vec<RecordedFailure> {
        lock(&self.failures).clone()
    }

    pub fn count(&self, op: MirrorOp) -> usize {
        lock(&self.failures).iter().filter(|f| f.op == op).count()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.failures).is_empty()
    }
}

impl MirrorObserver for CollectingObserver {
    fn mirror_failed(&self, failure: &MirrorFailure<'_>) {
        lock(&self.failures).push(RecordedFailure {
            op: failure.op,
            path: failure.path.to_path_buf(),
            kind: failure.error.kind(),
        });
    }
}
