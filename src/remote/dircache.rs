use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::RemoteStore;
use crate::logger::Logger;
use crate::paths;

/// Memoized remote `mkdir -p`.
///
/// Each directory gets one shared creation task; concurrent callers join
/// it. Parents are created before children. Creation errors are logged and
/// swallowed: a directory that really is unusable surfaces as a failed write.
pub struct DirectoryCache {
    store: Arc<dyn RemoteStore>,
    dirs: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl DirectoryCache {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            dirs: Mutex::new(HashMap::new()),
        }
    }

    pub fn ensure<'a>(&'a self, dir: &'a str, logger: &'a dyn Logger) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if paths::is_remote_root(dir) {
                return;
            }
            let cell = {
                let mut dirs = self.dirs.lock();
                dirs.entry(dir.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone()
            };
            cell.get_or_init(|| async {
                if let Some(parent) = paths::remote_parent(dir) {
                    self.ensure(parent, logger).await;
                }
                if let Err(e) = self.store.create_directory(dir).await {
                    logger.warn("mkdir", dir, &e.to_string());
                }
            })
            .await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;
    use crate::remote::{PutOptions, PutOutcome, RemoteError, UploadBody};
    use async_trait::async_trait;

    #[derive(Default)]
    struct MkdirLog {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteStore for MkdirLog {
        fn label(&self) -> String {
            "mkdir-log".into()
        }
        async fn exists(&self, _path: &str) -> Result<bool, RemoteError> {
            Ok(false)
        }
        async fn create_directory(&self, path: &str) -> Result<(), RemoteError> {
            tokio::task::yield_now().await;
            self.calls.lock().push(path.to_string());
            if path == "/a" {
                return Err(RemoteError::Unavailable("already exists".into()));
            }
            Ok(())
        }
        async fn put_file_contents(
            &self,
            _path: &str,
            _body: UploadBody,
            _options: PutOptions,
        ) -> Result<PutOutcome, RemoteError> {
            Ok(PutOutcome::Stored)
        }
    }

    #[tokio::test]
    async fn creates_each_directory_once_parents_first() {
        let store = Arc::new(MkdirLog::default());
        let cache = Arc::new(DirectoryCache::new(store.clone()));

        let mut handles = Vec::new();
        for dir in ["/a/b/c", "/a/b/c", "/a/b/d", "/a/b", "/"] {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.ensure(dir, &NoopLogger).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let calls = store.calls.lock().clone();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], "/a");
        assert_eq!(calls[1], "/a/b");
        let mut rest = calls[2..].to_vec();
        rest.sort();
        assert_eq!(rest, vec!["/a/b/c", "/a/b/d"]);
    }
}
