//! Local filesystem backend.
//!
//! Maps store paths onto a directory of the real filesystem.

use super::traits::{DirEntry, DirEntryKind, FileHandle, OpenFlags, RemoveAll, Store};
use crate::error::CorFsError;
use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/var/cache/corfs`, then `open("docs/a.md")` opens
/// `/var/cache/corfs/docs/a.md`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a new local store rooted at the given path.
    ///
    /// The path must exist and be a directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a store path to a path under the root.
    ///
    /// Normalizes `.` and `..` lexically and refuses paths that climb out
    /// of the root.
    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        let mut normalized = self.root.clone();
        for component in path.components() {
            match component {
                Component::ParentDir => {
                    if normalized == self.root {
                        return Err(CorFsError::EscapesRoot(path.to_path_buf()).into());
                    }
                    normalized.pop();
                }
                Component::Normal(c) => normalized.push(c),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        Ok(normalized)
    }
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string())
}

/// Build a [`DirEntry`] from real metadata.
#[cfg(unix)]
fn to_entry(name: String, meta: &std::fs::Metadata) -> DirEntry {
    use std::os::unix::fs::MetadataExt;

    // Special files (sockets, pipes, devices) are reported as files.
    let kind = if meta.is_dir() {
        DirEntryKind::Directory
    } else {
        DirEntryKind::File
    };
    DirEntry {
        name,
        kind,
        size: if meta.is_dir() { 0 } else { meta.len() },
        mode: meta.mode() & 0o7777,
        modified: meta.modified().ok(),
        accessed: meta.accessed().ok(),
        uid: Some(meta.uid()),
        gid: Some(meta.gid()),
    }
}

#[cfg(not(unix))]
fn to_entry(name: String, meta: &std::fs::Metadata) -> DirEntry {
    let kind = if meta.is_dir() {
        DirEntryKind::Directory
    } else {
        DirEntryKind::File
    };
    DirEntry {
        name,
        kind,
        size: if meta.is_dir() { 0 } else { meta.len() },
        mode: if meta.permissions().readonly() { 0o444 } else { 0o644 },
        modified: meta.modified().ok(),
        accessed: meta.accessed().ok(),
        uid: None,
        gid: None,
    }
}

/// Run a blocking std call off the async runtime.
async fn blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

async fn list_dir(full_path: &Path) -> io::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    let mut dir = fs::read_dir(full_path).await?;

    while let Some(entry) = dir.next_entry().await? {
        let metadata = fs::metadata(entry.path()).await?;
        entries.push(to_entry(
            entry.file_name().to_string_lossy().into_owned(),
            &metadata,
        ));
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[async_trait]
impl Store for LocalStore {
    async fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> io::Result<Box<dyn FileHandle>> {
        let full_path = self.resolve(path)?;

        // Directories get a listing-only handle.
        if let Ok(meta) = fs::metadata(&full_path).await
            && meta.is_dir()
        {
            if flags.writable() {
                return Err(io::Error::new(
                    io::ErrorKind::IsADirectory,
                    format!("is a directory: {}", path.display()),
                ));
            }
            return Ok(Box::new(LocalHandle {
                name: path.display().to_string(),
                full_path,
                file: None,
                flags,
                dir_cursor: 0,
                closed: false,
            }));
        }

        let mut options = fs::OpenOptions::new();
        options
            .read(flags.readable())
            .write(flags.writable())
            .append(flags.contains(OpenFlags::APPEND))
            .truncate(flags.contains(OpenFlags::TRUNCATE));
        #[cfg(unix)]
        options.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;

        let creating = flags.contains(OpenFlags::CREATE);
        let exclusive = flags.contains(OpenFlags::EXCLUSIVE);
        if creating && !flags.writable() && !flags.contains(OpenFlags::APPEND) {
            // std refuses `create` on a read-only open; make the file first.
            let mut create = fs::OpenOptions::new();
            create.write(true);
            #[cfg(unix)]
            create.mode(mode);
            if exclusive {
                create.create_new(true);
            } else {
                create.create(true);
            }
            drop(create.open(&full_path).await?);
        } else if creating && exclusive {
            options.create_new(true);
        } else if creating {
            options.create(true);
        }

        let file = options.open(&full_path).await?;
        Ok(Box::new(LocalHandle {
            name: path.display().to_string(),
            full_path,
            file: Some(file),
            flags,
            dir_cursor: 0,
            closed: false,
        }))
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        let full_path = self.resolve(path)?;
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(&full_path).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let full_path = self.resolve(path)?;
        if full_path == self.root {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot remove root directory",
            ));
        }
        let meta = fs::metadata(&full_path).await?;

        if meta.is_dir() {
            fs::remove_dir(&full_path).await
        } else {
            fs::remove_file(&full_path).await
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        fs::rename(&from_path, &to_path).await
    }

    async fn stat(&self, path: &Path) -> io::Result<DirEntry> {
        let full_path = self.resolve(path)?;
        let meta = fs::metadata(&full_path).await?;
        Ok(to_entry(entry_name(path), &meta))
    }

    async fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        let full_path = self.resolve(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(mode)).await
        }
        #[cfg(not(unix))]
        {
            let mut perms = fs::metadata(&full_path).await?.permissions();
            perms.set_readonly(mode & 0o222 == 0);
            fs::set_permissions(&full_path, perms).await
        }
    }

    async fn chtimes(
        &self,
        path: &Path,
        accessed: SystemTime,
        modified: SystemTime,
    ) -> io::Result<()> {
        let full_path = self.resolve(path)?;
        blocking(move || {
            let times = std::fs::FileTimes::new()
                .set_accessed(accessed)
                .set_modified(modified);
            std::fs::File::open(&full_path)?.set_times(times)
        })
        .await
    }

    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        let full_path = self.resolve(path)?;
        #[cfg(unix)]
        {
            blocking(move || std::os::unix::fs::chown(&full_path, Some(uid), Some(gid))).await
        }
        #[cfg(not(unix))]
        {
            let _ = (full_path, uid, gid);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "chown is not supported on this platform",
            ))
        }
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let full_path = self.resolve(path)?;
        list_dir(&full_path).await
    }

    fn as_remove_all(&self) -> Option<&dyn RemoveAll> {
        Some(self)
    }
}

#[async_trait]
impl RemoveAll for LocalStore {
    async fn remove_all(&self, path: &Path) -> io::Result<()> {
        let full_path = self.resolve(path)?;
        if full_path == self.root {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot remove root directory",
            ));
        }
        if fs::metadata(&full_path).await?.is_dir() {
            fs::remove_dir_all(&full_path).await
        } else {
            fs::remove_file(&full_path).await
        }
    }
}

/// An open file or directory in a [`LocalStore`].
struct LocalHandle {
    name: String,
    full_path: PathBuf,
    /// `None` for directories.
    file: Option<fs::File>,
    flags: OpenFlags,
    dir_cursor: usize,
    closed: bool,
}

impl LocalHandle {
    fn file(&mut self) -> io::Result<&mut fs::File> {
        if self.closed {
            return Err(CorFsError::Closed(self.name.clone()).into());
        }
        self.file.as_mut().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {}", self.name),
            )
        })
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            Err(CorFsError::Closed(self.name.clone()).into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FileHandle for LocalHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file()?.read(buf).await
    }

    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let file = self.file()?;
        let saved = file.stream_position().await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let result = file.read(buf).await;
        file.seek(SeekFrom::Start(saved)).await?;
        result
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self.file()?;
        file.write_all(buf).await?;
        file.flush().await?;
        Ok(buf.len())
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let file = self.file()?;
        let saved = file.stream_position().await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let result = file.write_all(buf).await;
        file.flush().await?;
        file.seek(SeekFrom::Start(saved)).await?;
        result.map(|()| buf.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if self.file.is_none() {
            // Directory handles have no byte offset.
            self.check_open()?;
            return Ok(0);
        }
        self.file()?.seek(pos).await
    }

    async fn stat(&mut self) -> io::Result<DirEntry> {
        self.check_open()?;
        let meta = fs::metadata(&self.full_path).await?;
        Ok(to_entry(entry_name(Path::new(&self.name)), &meta))
    }

    async fn sync(&mut self) -> io::Result<()> {
        if self.file.is_none() {
            return self.check_open();
        }
        self.file()?.sync_all().await
    }

    async fn truncate(&mut self, size: u64) -> io::Result<()> {
        if !self.flags.writable() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("not open for writing: {}", self.name),
            ));
        }
        self.file()?.set_len(size).await
    }

    async fn read_dir(&mut self, limit: Option<usize>) -> io::Result<Vec<DirEntry>> {
        self.check_open()?;
        if self.file.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("not a directory: {}", self.name),
            ));
        }
        let listing = list_dir(&self.full_path).await?;
        let remaining = listing.into_iter().skip(self.dir_cursor);
        let batch: Vec<DirEntry> = match limit {
            Some(n) => remaining.take(n).collect(),
            None => remaining.collect(),
        };
        self.dir_cursor += batch.len();
        Ok(batch)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.check_open()?;
        self.closed = true;
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (LocalStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (LocalStore::new(dir.path()), dir)
    }

    async fn write(store: &LocalStore, path: &str, data: &[u8]) {
        let mut handle = store
            .open(
                Path::new(path),
                OpenFlags::CREATE | OpenFlags::WRITE_ONLY | OpenFlags::TRUNCATE,
                0o644,
            )
            .await
            .unwrap();
        handle.write(data).await.unwrap();
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (store, _dir) = setup();

        write(&store, "test.txt", b"hello").await;
        let data = store.read_file(Path::new("test.txt")).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_read_at_keeps_cursor() {
        let (store, _dir) = setup();
        write(&store, "f", b"0123456789").await;

        let mut handle = store.open(Path::new("f"), OpenFlags::READ_ONLY, 0).await.unwrap();
        let mut buf = [0u8; 2];
        handle.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"01");
        handle.read_at(&mut buf, 6).await.unwrap();
        assert_eq!(&buf, b"67");
        handle.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"23");
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_and_stat() {
        let (store, _dir) = setup();

        write(&store, "b.txt", b"b").await;
        write(&store, "a.txt", b"aa").await;
        store.mkdir(Path::new("subdir"), 0o755).await.unwrap();

        let names: Vec<_> = store
            .read_dir(Path::new(""))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "subdir"]);

        let file_entry = store.stat(Path::new("a.txt")).await.unwrap();
        assert!(file_entry.is_file());
        assert_eq!(file_entry.size, 2);
        assert!(store.stat(Path::new("subdir")).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_directory_handle_lists() {
        let (store, _dir) = setup();
        store.mkdir(Path::new("d"), 0o755).await.unwrap();
        write(&store, "d/one", b"1").await;
        write(&store, "d/two", b"2").await;

        let mut handle = store.open(Path::new("d"), OpenFlags::READ_ONLY, 0).await.unwrap();
        assert_eq!(handle.read_dir_names(Some(1)).await.unwrap(), vec!["one"]);
        assert_eq!(handle.read_dir_names(None).await.unwrap(), vec!["two"]);
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_and_remove_all() {
        let (store, _dir) = setup();
        write(&store, "file.txt", b"data").await;
        store.remove(Path::new("file.txt")).await.unwrap();
        assert!(store.stat(Path::new("file.txt")).await.is_err());

        store.mkdir_all(Path::new("a/b"), 0o755).await.unwrap();
        write(&store, "a/b/c", b"x").await;
        store
            .as_remove_all()
            .unwrap()
            .remove_all(Path::new("a"))
            .await
            .unwrap();
        assert!(store.stat(Path::new("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_path_escape_blocked() {
        let (store, _dir) = setup();

        let err = store.stat(Path::new("../../../etc/passwd")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_chmod_and_chtimes() {
        let (store, _dir) = setup();
        write(&store, "f", b"x").await;
        let then = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);

        store.chmod(Path::new("f"), 0o600).await.unwrap();
        store.chtimes(Path::new("f"), then, then).await.unwrap();

        let entry = store.stat(Path::new("f")).await.unwrap();
        assert_eq!(entry.mode, 0o600);
        assert_eq!(entry.modified, Some(then));
    }

    #[tokio::test]
    async fn test_create_without_write_access() {
        let (store, dir) = setup();

        let mut handle = store.open(Path::new("new"), OpenFlags::CREATE, 0o644).await.unwrap();
        assert!(dir.path().join("new").is_file());
        let mut buf = [0u8; 4];
        assert_eq!(handle.read(&mut buf).await.unwrap(), 0);
        assert!(handle.write(b"x").await.is_err());
        handle.close().await.unwrap();

        let err = store
            .open(Path::new("new"), OpenFlags::CREATE | OpenFlags::EXCLUSIVE, 0o644)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }
}
