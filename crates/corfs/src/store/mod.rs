//! The store contract and bundled store implementations.
//!
//! A [`Store`] is anything that can open files and manage a directory tree.
//! The router treats stores as opaque collaborators; these backends exist so
//! the router has something real to sit on:
//!
//! - **MemoryStore**: In-memory ephemeral storage (tests, throwaway caches)
//! - **LocalStore**: A directory on the real filesystem
//! - **SubtreeStore**: Any store, re-rooted at one of its directories

mod local;
mod memory;
mod subtree;
mod traits;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use subtree::SubtreeStore;
pub(crate) use subtree::clean_dir;
pub use traits::{DirEntry, DirEntryKind, FileHandle, OpenFlags, RemoveAll, Store, is_dot_name};
