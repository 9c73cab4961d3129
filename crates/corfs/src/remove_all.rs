//! Recursive removal for stores without a native `RemoveAll`.

use std::future::Future;
use std::io;
use std::path::Path;
use std::pin::Pin;

use crate::store::{OpenFlags, Store, is_dot_name};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Remove `path` and everything beneath it using only basic store calls.
///
/// Children are removed depth-first before their parent, whatever order the
/// store lists them in. The first failure stops the walk. A failure to close
/// the probing handle is only reported if nothing else went wrong.
pub fn remove_all<'a>(store: &'a dyn Store, path: &'a Path) -> BoxFuture<'a, io::Result<()>> {
    Box::pin(async move {
        let mut target = store.open(path, OpenFlags::READ_ONLY, 0).await?;
        let info = target.stat().await;
        let close_result = target.close().await;
        let info = info?;

        if !info.is_dir() {
            return store.remove(path).await;
        }

        let mut dir = store.open(path, OpenFlags::READ_ONLY, 0).await?;
        let names = dir.read_dir_names(None).await;
        // Only the listing matters here.
        let _ = dir.close().await;
        let names = names?;

        for name in names.iter().filter(|name| !is_dot_name(name)) {
            let child = path.join(name);
            tracing::trace!(path = %child.display(), "removing child");
            remove_all(store, &child).await?;
        }

        store.remove(path).await?;
        close_result
    })
}
