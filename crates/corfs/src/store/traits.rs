//! Core store traits and types.

use async_trait::async_trait;
use bitflags::bitflags;
use std::io::{self, SeekFrom};
use std::path::Path;
use std::time::SystemTime;

bitflags! {
    /// Flags controlling how a file is opened.
    ///
    /// Read-only is the empty set, mirroring `O_RDONLY == 0`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const WRITE_ONLY = 1 << 0;
        const READ_WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const TRUNCATE = 1 << 3;
        const APPEND = 1 << 4;
        const EXCLUSIVE = 1 << 5;
    }
}

impl OpenFlags {
    /// Open for reading only.
    pub const READ_ONLY: OpenFlags = OpenFlags::empty();

    /// True if the open creates the file or may write to it.
    pub fn has_write_intent(self) -> bool {
        self.intersects(OpenFlags::CREATE | OpenFlags::WRITE_ONLY | OpenFlags::READ_WRITE)
    }

    /// True if reads are permitted on the resulting handle.
    pub fn readable(self) -> bool {
        !self.contains(OpenFlags::WRITE_ONLY)
    }

    /// True if writes are permitted on the resulting handle.
    pub fn writable(self) -> bool {
        self.intersects(OpenFlags::WRITE_ONLY | OpenFlags::READ_WRITE)
    }
}

/// Kind of directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEntryKind {
    File,
    Directory,
}

/// A directory entry, the unified file metadata type.
///
/// Returned by `stat()` on stores and handles, and by directory listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Name of the entry (not full path).
    pub name: String,
    /// Kind of entry.
    pub kind: DirEntryKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Permission bits (e.g., 0o644).
    pub mode: u32,
    /// Last modification time, if available.
    pub modified: Option<SystemTime>,
    /// Last access time, if available.
    pub accessed: Option<SystemTime>,
    /// Owning user id, if the store tracks one.
    pub uid: Option<u32>,
    /// Owning group id, if the store tracks one.
    pub gid: Option<u32>,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DirEntryKind::Directory,
            size: 0,
            mode: 0o755,
            modified: None,
            accessed: None,
            uid: None,
            gid: None,
        }
    }

    /// Create a new file entry.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: DirEntryKind::File,
            size,
            mode: 0o644,
            modified: None,
            accessed: None,
            uid: None,
            gid: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == DirEntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == DirEntryKind::File
    }

    /// True for the self (".") and parent ("..") pseudo-entries.
    pub fn is_dot(&self) -> bool {
        is_dot_name(&self.name)
    }
}

/// True for "." and "..".
pub fn is_dot_name(name: &str) -> bool {
    name == "." || name == ".."
}

/// An open file or directory on some store.
///
/// Handles keep their own cursor. `read` and `write` advance it;
/// `read_at` and `write_at` leave it alone. Reads at end of file return `Ok(0)`.
#[async_trait]
pub trait FileHandle: Send + Sync {
    /// The name the handle was opened under.
    fn name(&self) -> &str;

    /// Read into `buf` from the cursor.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Read into `buf` starting at `offset`.
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write `buf` at the cursor (or at end of file for append handles).
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Write `buf` starting at `offset`.
    async fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize>;

    /// Write a UTF-8 string at the cursor.
    async fn write_str(&mut self, s: &str) -> io::Result<usize> {
        self.write(s.as_bytes()).await
    }

    /// Move the cursor. Returns the new absolute position.
    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// Metadata for the open file.
    async fn stat(&mut self) -> io::Result<DirEntry>;

    /// Flush to durable storage.
    async fn sync(&mut self) -> io::Result<()>;

    /// Resize the file to `size` bytes.
    async fn truncate(&mut self, size: u64) -> io::Result<()>;

    /// Read up to `limit` directory entries, continuing from the previous call.
    ///
    /// `None` returns every remaining entry.
    async fn read_dir(&mut self, limit: Option<usize>) -> io::Result<Vec<DirEntry>>;

    /// Like `read_dir`, but only names.
    async fn read_dir_names(&mut self, limit: Option<usize>) -> io::Result<Vec<String>> {
        Ok(self
            .read_dir(limit)
            .await?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    /// Release the handle. Further calls on it fail.
    async fn close(&mut self) -> io::Result<()>;
}

/// Native recursive removal, offered by stores that can do it themselves.
#[async_trait]
pub trait RemoveAll: Send + Sync {
    /// Remove `path` and everything beneath it.
    async fn remove_all(&self, path: &Path) -> io::Result<()>;
}

/// Abstract store interface.
///
/// All paths are interpreted relative to the store's root; a leading `/` is
/// accepted and ignored.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a file or directory.
    async fn open(&self, path: &Path, flags: OpenFlags, mode: u32)
    -> io::Result<Box<dyn FileHandle>>;

    /// Create a single directory. The parent must exist.
    async fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Create a directory and any missing parents.
    async fn mkdir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut current = std::path::PathBuf::from("/");
        for component in path.components() {
            if let std::path::Component::Normal(s) = component {
                current.push(s);
                match self.mkdir(&current, mode).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        if !self.stat(&current).await?.is_dir() {
                            return Err(e);
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Remove a file or empty directory.
    async fn remove(&self, path: &Path) -> io::Result<()>;

    /// Rename (move) a file or directory.
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Get metadata for a file or directory.
    async fn stat(&self, path: &Path) -> io::Result<DirEntry>;

    /// Change permission bits.
    async fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Change access and modification times.
    async fn chtimes(&self, path: &Path, accessed: SystemTime, modified: SystemTime)
    -> io::Result<()>;

    /// Change owner and group.
    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;

    /// List entries in a directory, sorted by name.
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Read the entire contents of a file.
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut file = self.open(path, OpenFlags::READ_ONLY, 0).await?;
        let mut data = Vec::new();
        let mut buf = [0u8; 8192];
        let result = loop {
            match file.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => data.extend_from_slice(&buf[..n]),
                Err(e) => break Err(e),
            }
        };
        let closed = file.close().await;
        result?;
        closed?;
        Ok(data)
    }

    /// Resize the named file, opening it write-only (no create, no truncate).
    async fn truncate(&self, path: &Path, size: u64) -> io::Result<()> {
        let mut file = self.open(path, OpenFlags::WRITE_ONLY, 0o666).await?;
        let result = file.truncate(size).await;
        let closed = file.close().await;
        result?;
        closed
    }

    /// Native recursive removal, if this store has it.
    fn as_remove_all(&self) -> Option<&dyn RemoveAll> {
        None
    }
}

#[async_trait]
impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    async fn open(&self, path: &Path, flags: OpenFlags, mode: u32)
    -> io::Result<Box<dyn FileHandle>> {
        (**self).open(path, flags, mode).await
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        (**self).mkdir(path, mode).await
    }

    async fn mkdir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        (**self).mkdir_all(path, mode).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        (**self).remove(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        (**self).rename(from, to).await
    }

    async fn stat(&self, path: &Path) -> io::Result<DirEntry> {
        (**self).stat(path).await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        (**self).chmod(path, mode).await
    }

    async fn chtimes(&self, path: &Path, accessed: SystemTime, modified: SystemTime)
    -> io::Result<()> {
        (**self).chtimes(path, accessed, modified).await
    }

    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        (**self).chown(path, uid, gid).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        (**self).read_dir(path).await
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        (**self).read_file(path).await
    }

    async fn truncate(&self, path: &Path, size: u64) -> io::Result<()> {
        (**self).truncate(path, size).await
    }

    fn as_remove_all(&self) -> Option<&dyn RemoveAll> {
        (**self).as_remove_all()
    }
}
