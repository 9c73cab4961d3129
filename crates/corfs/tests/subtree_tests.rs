//! Integration tests for re-rooted routers.

use corfs::{CorFs, CorFsConfig, MemoryStore, OpenFlags, Store, is_not_dir};
use rstest::rstest;
use std::io;
use std::path::Path;
use std::sync::Arc;

async fn stores() -> (MemoryStore, MemoryStore) {
    let primary = MemoryStore::new();
    primary.write_file(Path::new("/docs/a.txt"), b"alpha").await.unwrap();
    primary.write_file(Path::new("/docs/guide/b.txt"), b"beta").await.unwrap();
    primary.write_file(Path::new("/secret.txt"), b"nope").await.unwrap();
    let cache = MemoryStore::new();
    cache.mkdir(Path::new("/docs"), 0o755).await.unwrap();
    (primary, cache)
}

#[tokio::test]
async fn subtree_reads_and_mirrors_under_its_root() {
    let (primary, cache) = stores().await;
    let fs = CorFs::new(primary, cache.clone());
    let docs = fs.subtree(Path::new("/docs")).await.unwrap();

    assert_eq!(docs.read_file(Path::new("a.txt")).await.unwrap(), b"alpha");
    assert_eq!(cache.read_file(Path::new("/docs/a.txt")).await.unwrap(), b"alpha");
}

#[tokio::test]
async fn subtree_handles_cache_lazily() {
    let (primary, cache) = stores().await;
    let fs = CorFs::new(primary, cache.clone());
    let docs = fs.subtree(Path::new("docs")).await.unwrap();

    let mut file = docs.open(Path::new("/a.txt"), OpenFlags::READ_ONLY, 0).await.unwrap();
    let mut buf = [0u8; 16];
    let n = file.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"alpha");
    file.close().await.unwrap();

    assert_eq!(cache.read_file(Path::new("/docs/a.txt")).await.unwrap(), b"alpha");
}

#[tokio::test]
async fn nested_subtrees_compose() {
    let (primary, cache) = stores().await;
    let fs = CorFs::new(primary, cache);

    let guide = fs
        .subtree(Path::new("/docs"))
        .await
        .unwrap()
        .subtree(Path::new("guide"))
        .await
        .unwrap();
    assert_eq!(guide.read_file(Path::new("b.txt")).await.unwrap(), b"beta");
}

#[tokio::test]
async fn subtree_cannot_climb_out() {
    let (primary, cache) = stores().await;
    let fs = CorFs::new(primary, cache);
    let docs = fs.subtree(Path::new("/docs")).await.unwrap();

    let err = docs.read_file(Path::new("../secret.txt")).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
}

#[rstest]
#[case("")]
#[case("../up")]
#[case("/docs/../../up")]
#[case("/secret.txt")]
#[tokio::test]
async fn subtree_rejects_non_directories(#[case] dir: &str) {
    let (primary, cache) = stores().await;
    let fs = CorFs::new(primary, cache);

    let err = fs.subtree(Path::new(dir)).await.unwrap_err();
    assert!(is_not_dir(&err), "{dir:?}: {err}");
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
}

#[tokio::test]
async fn subtree_of_missing_directory_is_allowed() {
    let (primary, cache) = stores().await;
    let fs = CorFs::new(primary.clone(), cache);

    let later = fs.subtree(Path::new("/later")).await.unwrap();
    primary.mkdir(Path::new("/later"), 0o755).await.unwrap();
    later.mkdir(Path::new("inside"), 0o755).await.unwrap();
    assert!(primary.stat(Path::new("/later/inside")).await.unwrap().is_dir());
}

#[tokio::test]
async fn subtree_keeps_router_config() {
    let (primary, cache) = stores().await;
    let fs = CorFs::new(primary, cache.clone()).with_config(CorFsConfig {
        mirror_whole_file_reads: false,
        ..CorFsConfig::default()
    });
    let docs = fs.subtree(Path::new("/docs")).await.unwrap();

    assert!(!docs.config().mirror_whole_file_reads);
    docs.read_file(Path::new("a.txt")).await.unwrap();
    assert!(cache.stat(Path::new("/docs/a.txt")).await.is_err());
}

#[tokio::test]
async fn derive_without_cache_is_a_plain_view() {
    let (primary, _cache) = stores().await;
    let docs = CorFs::derive(Arc::new(primary), None, Path::new("/docs"))
        .await
        .unwrap();

    assert!(docs.cache().is_none());
    assert_eq!(docs.read_file(Path::new("a.txt")).await.unwrap(), b"alpha");

    let mut file = docs.open(Path::new("a.txt"), OpenFlags::READ_ONLY, 0).await.unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(file.read(&mut buf).await.unwrap(), 5);
    file.close().await.unwrap();

    let err = docs.stat(Path::new("missing")).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
}

#[tokio::test]
async fn derive_with_cache_falls_back_under_its_root() {
    let primary = MemoryStore::new();
    primary.mkdir(Path::new("/docs"), 0o755).await.unwrap();
    let cache = MemoryStore::new();
    cache.write_file(Path::new("/docs/cached.txt"), b"from cache").await.unwrap();

    let cache: Arc<dyn Store> = Arc::new(cache);
    let docs = CorFs::derive(Arc::new(primary), Some(cache), Path::new("/docs"))
        .await
        .unwrap();

    assert_eq!(
        docs.read_file(Path::new("cached.txt")).await.unwrap(),
        b"from cache"
    );
}
