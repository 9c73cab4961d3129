//! Integration tests for recursive removal.

use corfs::{CorFs, MemoryStore, MirrorOp, Store};
use corfs_testutil::{CollectingObserver, FaultyStore, ListingStore, Op, RecordingStore};
use std::io;
use std::path::Path;

async fn tree() -> MemoryStore {
    let store = MemoryStore::new();
    store.write_file(Path::new("/a/x"), b"x").await.unwrap();
    store.write_file(Path::new("/a/y/z"), b"z").await.unwrap();
    store.write_file(Path::new("/keep"), b"k").await.unwrap();
    store
}

#[tokio::test]
async fn helper_removes_children_before_parents() {
    let store = RecordingStore::new(tree().await).without_remove_all();
    assert!(store.as_remove_all().is_none());

    corfs::remove_all(&store, Path::new("/a")).await.unwrap();

    assert_eq!(
        store.calls_of("remove"),
        vec!["remove /a/x", "remove /a/y/z", "remove /a/y", "remove /a"]
    );
    assert!(store.stat(Path::new("/keep")).await.is_ok());
}

#[tokio::test]
async fn helper_ignores_listing_order() {
    let store = RecordingStore::new(ListingStore::reversed(tree().await)).without_remove_all();

    corfs::remove_all(&store, Path::new("/a")).await.unwrap();

    let removed = store.calls_of("remove");
    assert_eq!(
        removed,
        vec!["remove /a/y/z", "remove /a/y", "remove /a/x", "remove /a"]
    );
    let at = |call: &str| removed.iter().position(|c| c == call).unwrap();
    for (child, parent) in [("/a/y/z", "/a/y"), ("/a/y", "/a"), ("/a/x", "/a")] {
        assert!(at(&format!("remove {child}")) < at(&format!("remove {parent}")));
    }
    assert!(store.stat(Path::new("/a")).await.is_err());
    assert!(store.stat(Path::new("/keep")).await.is_ok());
}

#[tokio::test]
async fn helper_skips_dot_entries() {
    let store = ListingStore::with_dots(tree().await);

    corfs::remove_all(&store, Path::new("/a")).await.unwrap();

    assert!(store.stat(Path::new("/a")).await.is_err());
    assert!(store.stat(Path::new("/keep")).await.is_ok());
}

#[tokio::test]
async fn helper_stops_at_first_failure() {
    let faulty = FaultyStore::new(tree().await);
    faulty.fail_with(Op::Remove, io::ErrorKind::PermissionDenied);
    let store = RecordingStore::new(faulty);

    let err = corfs::remove_all(&store, Path::new("/a")).await.unwrap_err();

    assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    assert_eq!(store.calls_of("remove"), vec!["remove /a/x"]);
}

#[tokio::test]
async fn helper_reports_target_close_failure_last() {
    let faulty = FaultyStore::new(tree().await);
    faulty.fail(Op::Close);

    let err = corfs::remove_all(&faulty, Path::new("/a/y")).await.unwrap_err();

    // The walk still finished; only then did the close error surface.
    assert_eq!(err.kind(), io::ErrorKind::Other);
    assert!(faulty.inner().stat(Path::new("/a/y")).await.is_err());
    assert!(faulty.inner().stat(Path::new("/a/x")).await.is_ok());
}

#[tokio::test]
async fn router_uses_helper_when_primary_lacks_native_removal() {
    let primary = RecordingStore::new(tree().await).without_remove_all();
    let cache = RecordingStore::new(tree().await);
    let fs = CorFs::new(primary.clone(), cache.clone());

    let remover = fs.as_remove_all().unwrap();
    remover.remove_all(Path::new("/a")).await.unwrap();

    assert_eq!(primary.count("remove_all"), 0);
    assert_eq!(primary.count("remove"), 4);
    assert_eq!(cache.calls_of("remove_all"), vec!["remove_all /a"]);
    assert_eq!(cache.count("remove"), 0);
    assert!(cache.inner().stat(Path::new("/a")).await.is_err());
}

#[tokio::test]
async fn router_cleans_cache_even_when_primary_fails() {
    let primary = MemoryStore::new();
    let cache = tree().await;
    let fs = CorFs::new(primary, cache.clone());

    let err = fs
        .as_remove_all()
        .unwrap()
        .remove_all(Path::new("/a"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), io::ErrorKind::NotFound);
    assert!(cache.stat(Path::new("/a")).await.is_err());
}

#[tokio::test]
async fn router_discards_cache_removal_failure() {
    let primary = tree().await;
    let cache = FaultyStore::new(tree().await);
    cache.fail(Op::RemoveAll);
    let observer = CollectingObserver::new();
    let fs = CorFs::new(primary.clone(), cache).with_observer(observer.clone());

    fs.as_remove_all()
        .unwrap()
        .remove_all(Path::new("/a"))
        .await
        .unwrap();

    assert!(primary.stat(Path::new("/a")).await.is_err());
    assert_eq!(observer.count(MirrorOp::RemoveAll), 1);
}
