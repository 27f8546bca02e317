use async_trait::async_trait;
use std::sync::Arc;

use super::{PutOptions, PutOutcome, RemoteError, RemoteStore, UploadBody};
use crate::logger::Logger;

/// Reports what would be sent and answers success without touching the network.
pub struct DryRunStore {
    label: String,
    logger: Arc<dyn Logger>,
}

impl DryRunStore {
    pub fn new(label: &str, logger: Arc<dyn Logger>) -> Self {
        Self {
            label: label.to_string(),
            logger,
        }
    }
}

#[async_trait]
impl RemoteStore for DryRunStore {
    fn label(&self) -> String {
        format!("dry-run:{}", self.label)
    }

    async fn exists(&self, _path: &str) -> Result<bool, RemoteError> {
        Ok(false)
    }

    async fn create_directory(&self, path: &str) -> Result<(), RemoteError> {
        self.logger.info("dry-run", path, "mkdir");
        Ok(())
    }

    async fn put_file_contents(
        &self,
        path: &str,
        _body: UploadBody,
        options: PutOptions,
    ) -> Result<PutOutcome, RemoteError> {
        self.logger
            .info("dry-run", path, &format!("put {} bytes", options.content_length));
        Ok(PutOutcome::Stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Lines(Mutex<Vec<String>>);

    impl Logger for Lines {
        fn info(&self, context: &str, path: &str, msg: &str) {
            self.0.lock().push(format!("{context} {path} {msg}"));
        }
    }

    #[tokio::test]
    async fn operations_go_to_the_logger() {
        let lines = Arc::new(Lines::default());
        let store = DryRunStore::new("https://dav.example.com/", lines.clone());

        store.create_directory("/a").await.unwrap();
        let out = store
            .put_file_contents(
                "/a/b.txt",
                UploadBody::Bytes(vec![0; 7]),
                PutOptions {
                    overwrite: true,
                    content_length: 7,
                    on_progress: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(out, PutOutcome::Stored);
        assert!(!store.exists("/a/b.txt").await.unwrap());
        assert_eq!(
            *lines.0.lock(),
            vec!["dry-run /a mkdir", "dry-run /a/b.txt put 7 bytes"]
        );
    }
}
