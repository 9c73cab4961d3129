//! In-memory store implementation.
//!
//! Used for tests and as a throwaway cache tier. All data is ephemeral.

use super::traits::{DirEntry, DirEntryKind, FileHandle, OpenFlags, RemoveAll, Store};
use crate::error::CorFsError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;

/// Per-entry metadata.
#[derive(Debug, Clone)]
struct Meta {
    mode: u32,
    modified: SystemTime,
    accessed: SystemTime,
    uid: u32,
    gid: u32,
}

impl Meta {
    fn new(mode: u32) -> Self {
        let now = SystemTime::now();
        Self {
            mode: mode & 0o7777,
            modified: now,
            accessed: now,
            uid: 0,
            gid: 0,
        }
    }
}

/// Entry in the memory store.
#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, meta: Meta },
    Directory { meta: Meta },
}

impl Node {
    fn meta_mut(&mut self) -> &mut Meta {
        match self {
            Node::File { meta, .. } | Node::Directory { meta } => meta,
        }
    }

    fn entry(&self, name: String) -> DirEntry {
        let (kind, size, meta) = match self {
            Node::File { data, meta } => (DirEntryKind::File, data.len() as u64, meta),
            Node::Directory { meta } => (DirEntryKind::Directory, 0, meta),
        };
        DirEntry {
            name,
            kind,
            size,
            mode: meta.mode,
            modified: Some(meta.modified),
            accessed: Some(meta.accessed),
            uid: Some(meta.uid),
            gid: Some(meta.gid),
        }
    }
}

type Entries = Arc<RwLock<HashMap<PathBuf, Node>>>;

/// In-memory store.
///
/// Thread-safe via internal `RwLock`. Handles share the tree with the store,
/// so writes through a handle are visible to `read_file` immediately.
/// Cloning yields another reference to the same tree.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Entries,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(PathBuf::new(), Node::Directory { meta: Meta::new(0o755) });
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Write a whole file, creating parent directories as needed.
    pub async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let normalized = normalize(path);
        let mut entries = self.entries.write().await;

        let mut current = PathBuf::new();
        for component in normalized.parent().into_iter().flat_map(|p| p.components()) {
            if let Component::Normal(s) = component {
                current.push(s);
                match entries.get(&current) {
                    Some(Node::Directory { .. }) => {}
                    Some(Node::File { .. }) => return Err(not_a_directory(&current)),
                    None => {
                        entries.insert(current.clone(), Node::Directory { meta: Meta::new(0o755) });
                    }
                }
            }
        }

        match entries.get_mut(&normalized) {
            Some(Node::Directory { .. }) => Err(is_a_directory(path)),
            Some(Node::File { data: existing, meta }) => {
                *existing = data.to_vec();
                meta.modified = SystemTime::now();
                Ok(())
            }
            None => {
                entries.insert(
                    normalized,
                    Node::File {
                        data: data.to_vec(),
                        meta: Meta::new(0o644),
                    },
                );
                Ok(())
            }
        }
    }

    /// Number of entries, root excluded.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len() - 1
    }

    /// True if nothing but the root exists.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Normalize a path: remove leading `/`, resolve `.` and `..`.
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                result.pop();
            }
            Component::Normal(s) => result.push(s),
        }
    }
    result
}

fn display_name(key: &Path) -> String {
    key.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string())
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("not found: {}", path.display()),
    )
}

fn not_a_directory(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotADirectory,
        format!("not a directory: {}", path.display()),
    )
}

fn is_a_directory(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::IsADirectory,
        format!("is a directory: {}", path.display()),
    )
}

/// The parent of `key` must exist and be a directory.
fn check_parent(entries: &HashMap<PathBuf, Node>, key: &Path, path: &Path) -> io::Result<()> {
    let parent = key.parent().unwrap_or(Path::new(""));
    match entries.get(parent) {
        Some(Node::Directory { .. }) => Ok(()),
        Some(Node::File { .. }) => Err(not_a_directory(path)),
        None => Err(not_found(path)),
    }
}

/// Direct children of `key`, sorted by name.
fn children(entries: &HashMap<PathBuf, Node>, key: &Path) -> Vec<DirEntry> {
    let mut result: Vec<DirEntry> = entries
        .iter()
        .filter(|(entry_path, _)| entry_path.parent() == Some(key) && entry_path.as_path() != key)
        .map(|(entry_path, node)| node.entry(display_name(entry_path)))
        .collect();
    result.sort_by(|a, b| a.name.cmp(&b.name));
    result
}

#[async_trait]
impl Store for MemoryStore {
    async fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> io::Result<Box<dyn FileHandle>> {
        let normalized = normalize(path);
        let mut entries = self.entries.write().await;

        match entries.get_mut(&normalized) {
            Some(_) if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("file exists: {}", path.display()),
                ));
            }
            Some(Node::Directory { .. }) => {
                if flags.writable() {
                    return Err(is_a_directory(path));
                }
            }
            Some(Node::File { data, meta }) => {
                if flags.contains(OpenFlags::TRUNCATE) && flags.writable() {
                    data.clear();
                    meta.modified = SystemTime::now();
                }
            }
            None => {
                if !flags.contains(OpenFlags::CREATE) {
                    return Err(not_found(path));
                }
                check_parent(&entries, &normalized, path)?;
                entries.insert(
                    normalized.clone(),
                    Node::File {
                        data: Vec::new(),
                        meta: Meta::new(mode),
                    },
                );
            }
        }

        Ok(Box::new(MemoryHandle {
            entries: self.entries.clone(),
            name: path.display().to_string(),
            key: normalized,
            flags,
            pos: 0,
            dir_cursor: 0,
            closed: false,
        }))
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        let normalized = normalize(path);
        let mut entries = self.entries.write().await;

        if entries.contains_key(&normalized) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("file exists: {}", path.display()),
            ));
        }
        check_parent(&entries, &normalized, path)?;

        entries.insert(normalized, Node::Directory { meta: Meta::new(mode) });
        Ok(())
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        let normalized = normalize(path);

        if normalized.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot remove root directory",
            ));
        }

        let mut entries = self.entries.write().await;

        // Check if it's a non-empty directory
        if let Some(Node::Directory { .. }) = entries.get(&normalized) {
            let has_children = entries.keys().any(|k| k.parent() == Some(normalized.as_path()));
            if has_children {
                return Err(io::Error::new(
                    io::ErrorKind::DirectoryNotEmpty,
                    format!("directory not empty: {}", path.display()),
                ));
            }
        }

        entries.remove(&normalized).ok_or_else(|| not_found(path))?;
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let from_normalized = normalize(from);
        let to_normalized = normalize(to);

        if from_normalized.as_os_str().is_empty() || to_normalized.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot rename root directory",
            ));
        }
        if from_normalized == to_normalized {
            return Ok(());
        }
        if to_normalized.starts_with(&from_normalized) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot move {} inside itself",
                    from.display()
                ),
            ));
        }

        let mut entries = self.entries.write().await;

        if !entries.contains_key(&from_normalized) {
            return Err(not_found(from));
        }
        check_parent(&entries, &to_normalized, to)?;

        // Check we're not overwriting a directory with a file or vice versa
        if let (Some(source), Some(existing)) =
            (entries.get(&from_normalized), entries.get(&to_normalized))
        {
            match (source, existing) {
                (Node::File { .. }, Node::Directory { .. }) => {
                    return Err(io::Error::new(
                        io::ErrorKind::IsADirectory,
                        format!("destination is a directory: {}", to.display()),
                    ));
                }
                (Node::Directory { .. }, Node::File { .. }) => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotADirectory,
                        format!("destination is not a directory: {}", to.display()),
                    ));
                }
                (Node::Directory { .. }, Node::Directory { .. }) => {
                    if entries.keys().any(|k| k.parent() == Some(to_normalized.as_path())) {
                        return Err(io::Error::new(
                            io::ErrorKind::DirectoryNotEmpty,
                            format!("directory not empty: {}", to.display()),
                        ));
                    }
                }
                (Node::File { .. }, Node::File { .. }) => {}
            }
        }

        // Move the entry and everything beneath it (can't modify while iterating)
        let moved: Vec<PathBuf> = entries
            .keys()
            .filter(|k| k.starts_with(&from_normalized))
            .cloned()
            .collect();
        for old_path in moved {
            if let (Some(node), Ok(relative)) = (
                entries.remove(&old_path),
                old_path.strip_prefix(&from_normalized),
            ) {
                let new_path = if relative.as_os_str().is_empty() {
                    to_normalized.clone()
                } else {
                    to_normalized.join(relative)
                };
                entries.insert(new_path, node);
            }
        }
        Ok(())
    }

    async fn stat(&self, path: &Path) -> io::Result<DirEntry> {
        let normalized = normalize(path);
        let entries = self.entries.read().await;
        entries
            .get(&normalized)
            .map(|node| node.entry(display_name(&normalized)))
            .ok_or_else(|| not_found(path))
    }

    async fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut entries = self.entries.write().await;
        let node = entries.get_mut(&normalize(path)).ok_or_else(|| not_found(path))?;
        node.meta_mut().mode = mode & 0o7777;
        Ok(())
    }

    async fn chtimes(
        &self,
        path: &Path,
        accessed: SystemTime,
        modified: SystemTime,
    ) -> io::Result<()> {
        let mut entries = self.entries.write().await;
        let node = entries.get_mut(&normalize(path)).ok_or_else(|| not_found(path))?;
        let meta = node.meta_mut();
        meta.accessed = accessed;
        meta.modified = modified;
        Ok(())
    }

    async fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        let mut entries = self.entries.write().await;
        let node = entries.get_mut(&normalize(path)).ok_or_else(|| not_found(path))?;
        let meta = node.meta_mut();
        meta.uid = uid;
        meta.gid = gid;
        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let normalized = normalize(path);
        let entries = self.entries.read().await;

        match entries.get(&normalized) {
            Some(Node::Directory { .. }) => Ok(children(&entries, &normalized)),
            Some(Node::File { .. }) => Err(not_a_directory(path)),
            None => Err(not_found(path)),
        }
    }

    fn as_remove_all(&self) -> Option<&dyn RemoveAll> {
        Some(self)
    }
}

#[async_trait]
impl RemoveAll for MemoryStore {
    async fn remove_all(&self, path: &Path) -> io::Result<()> {
        let normalized = normalize(path);
        if normalized.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot remove root directory",
            ));
        }

        let mut entries = self.entries.write().await;
        if !entries.contains_key(&normalized) {
            return Err(not_found(path));
        }
        entries.retain(|k, _| !k.starts_with(&normalized));
        Ok(())
    }
}

/// An open file or directory in a [`MemoryStore`].
struct MemoryHandle {
    entries: Entries,
    name: String,
    key: PathBuf,
    flags: OpenFlags,
    pos: u64,
    dir_cursor: usize,
    closed: bool,
}

impl MemoryHandle {
    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            Err(CorFsError::Closed(self.name.clone()).into())
        } else {
            Ok(())
        }
    }

    fn check_readable(&self) -> io::Result<()> {
        self.check_open()?;
        if self.flags.readable() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("not open for reading: {}", self.name),
            ))
        }
    }

    fn check_writable(&self) -> io::Result<()> {
        self.check_open()?;
        if self.flags.writable() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("not open for writing: {}", self.name),
            ))
        }
    }

    async fn read_from(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let entries = self.entries.read().await;
        match entries.get(&self.key) {
            Some(Node::File { data, .. }) => {
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
                let n = buf.len().min(data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                Ok(n)
            }
            Some(Node::Directory { .. }) => Err(is_a_directory(Path::new(&self.name))),
            None => Err(not_found(Path::new(&self.name))),
        }
    }

    /// Write `buf` at `offset` (or at the end for append handles).
    /// Returns the offset just past the written bytes.
    async fn write_to(&self, buf: &[u8], offset: u64) -> io::Result<u64> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&self.key) {
            Some(Node::File { data, meta }) => {
                let start = if self.flags.contains(OpenFlags::APPEND) {
                    data.len()
                } else {
                    usize::try_from(offset)
                        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?
                };
                let end = start.checked_add(buf.len()).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "offset too large")
                })?;
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(buf);
                meta.modified = SystemTime::now();
                Ok(end as u64)
            }
            Some(Node::Directory { .. }) => Err(is_a_directory(Path::new(&self.name))),
            None => Err(not_found(Path::new(&self.name))),
        }
    }
}

#[async_trait]
impl FileHandle for MemoryHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_readable()?;
        let n = self.read_from(buf, self.pos).await?;
        self.pos += n as u64;
        Ok(n)
    }

    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.check_readable()?;
        self.read_from(buf, offset).await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_writable()?;
        self.pos = self.write_to(buf, self.pos).await?;
        Ok(buf.len())
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        self.check_writable()?;
        self.write_to(buf, offset).await?;
        Ok(buf.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.check_open()?;
        let len = match self.entries.read().await.get(&self.key) {
            Some(Node::File { data, .. }) => data.len() as u64,
            Some(Node::Directory { .. }) => 0,
            None => return Err(not_found(Path::new(&self.name))),
        };
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => len.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative offset")
        })?;
        self.pos = target;
        Ok(target)
    }

    async fn stat(&mut self) -> io::Result<DirEntry> {
        self.check_open()?;
        let entries = self.entries.read().await;
        entries
            .get(&self.key)
            .map(|node| node.entry(display_name(&self.key)))
            .ok_or_else(|| not_found(Path::new(&self.name)))
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.check_open()
    }

    async fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.check_writable()?;
        let size = usize::try_from(size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "size too large"))?;
        let mut entries = self.entries.write().await;
        match entries.get_mut(&self.key) {
            Some(Node::File { data, meta }) => {
                data.resize(size, 0);
                meta.modified = SystemTime::now();
                Ok(())
            }
            Some(Node::Directory { .. }) => Err(is_a_directory(Path::new(&self.name))),
            None => Err(not_found(Path::new(&self.name))),
        }
    }

    async fn read_dir(&mut self, limit: Option<usize>) -> io::Result<Vec<DirEntry>> {
        self.check_open()?;
        let listing = {
            let entries = self.entries.read().await;
            match entries.get(&self.key) {
                Some(Node::Directory { .. }) => children(&entries, &self.key),
                Some(Node::File { .. }) => return Err(not_a_directory(Path::new(&self.name))),
                None => return Err(not_found(Path::new(&self.name))),
            }
        };
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
        Ok(())
    }
}
