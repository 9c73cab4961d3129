//! corfs: a cache-on-read filesystem.
//!
//! This crate provides:
//!
//! - **Store**: The async capability contract every backing store satisfies
//! - **CorFs**: A router over a primary store and a best-effort cache store
//! - **DualFile**: The open-file object that replays I/O onto both tiers
//! - **remove_all**: Depth-first removal for stores without a native one
//! - **MemoryStore / LocalStore / SubtreeStore**: Bundled backends
//!
//! ```no_run
//! use corfs::{CorFs, LocalStore, MemoryStore, Store};
//! use std::path::Path;
//!
//! # async fn demo() -> std::io::Result<()> {
//! let fs = CorFs::new(LocalStore::new("/srv/data"), MemoryStore::new());
//! let bytes = fs.read_file(Path::new("/report.csv")).await?; // now also cached
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
mod file;
pub mod observer;
pub mod remove_all;
mod router;
pub mod store;

pub use config::{ConfigError, CorFsConfig, LazyCachePolicy};
pub use error::{CorFsError, is_not_dir};
pub use file::DualFile;
pub use observer::{MirrorFailure, MirrorObserver, MirrorOp};
pub use remove_all::remove_all;
pub use router::CorFs;
pub use store::{
    DirEntry, DirEntryKind, FileHandle, LocalStore, MemoryStore, OpenFlags, RemoveAll, Store,
    SubtreeStore,
};
