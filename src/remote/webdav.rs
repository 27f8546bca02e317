use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Method, StatusCode, Url};
use std::time::Duration;
use tokio_util::io::ReaderStream;

use super::{PutOptions, PutOutcome, RemoteError, RemoteStore, UploadBody};

#[derive(Debug, Clone)]
pub struct WebDavSettings {
    pub url: String,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

/// Minimal WebDAV client: HEAD, MKCOL and PUT with basic auth.
#[derive(Debug, Clone)]
pub struct WebDavClient {
    base: Url,
    username: String,
    password: String,
    http: reqwest::Client,
}

impl WebDavClient {
    pub fn new(settings: &WebDavSettings) -> anyhow::Result<Self> {
        let base = Url::parse(&settings.url)?;
        if base.cannot_be_a_base() {
            anyhow::bail!("WebDAV URL cannot be used as a base: {}", settings.url);
        }
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            base,
            username: settings.username.clone(),
            password: settings.password.clone(),
            http,
        })
    }

    fn url(&self, path: &str) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RemoteError::InvalidPath(path.to_string()))?;
            segments.pop_if_empty();
            for s in path.split('/').filter(|s| !s.is_empty()) {
                if s == "." || s == ".." {
                    return Err(RemoteError::InvalidPath(path.to_string()));
                }
                segments.push(s);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send(
        &self,
        op: &'static str,
        path: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RemoteError> {
        req.send().await.map_err(|source| RemoteError::Transport {
            op,
            path: path.to_string(),
            source,
        })
    }
}

fn http_error(op: &'static str, path: &str, status: StatusCode) -> RemoteError {
    RemoteError::Http {
        op,
        path: path.to_string(),
        status: status.as_u16(),
    }
}

#[async_trait]
impl RemoteStore for WebDavClient {
    fn label(&self) -> String {
        self.base.to_string()
    }

    async fn exists(&self, path: &str) -> Result<bool, RemoteError> {
        let url = self.url(path)?;
        let resp = self.send("HEAD", path, self.request(Method::HEAD, url)).await?;
        let status = resp.status();
        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(http_error("HEAD", path, status))
        }
    }

    async fn create_directory(&self, path: &str) -> Result<(), RemoteError> {
        let url = self.url(path)?;
        let mkcol = Method::from_bytes(b"MKCOL")
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        let resp = self.send("MKCOL", path, self.request(mkcol, url)).await?;
        let status = resp.status();
        // 405: the collection already exists.
        if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
            Ok(())
        } else {
            Err(http_error("MKCOL", path, status))
        }
    }

    async fn put_file_contents(
        &self,
        path: &str,
        body: UploadBody,
        options: PutOptions,
    ) -> Result<PutOutcome, RemoteError> {
        let url = self.url(path)?;
        let total = options.content_length;
        let body = match body {
            UploadBody::Bytes(buf) => {
                if let Some(cb) = &options.on_progress {
                    cb(buf.len() as u64, total);
                }
                reqwest::Body::from(buf)
            }
            UploadBody::File(file) => {
                let progress = options.on_progress.clone();
                let mut sent = 0u64;
                let stream = ReaderStream::new(file).map(move |chunk| {
                    if let (Ok(bytes), Some(cb)) = (&chunk, &progress) {
                        sent += bytes.len() as u64;
                        cb(sent, total);
                    }
                    chunk
                });
                reqwest::Body::wrap_stream(stream)
            }
        };

        let req = self
            .request(Method::PUT, url)
            .header("Overwrite", if options.overwrite { "T" } else { "F" })
            .header(CONTENT_LENGTH, total)
            .body(body);
        let resp = self.send("PUT", path, req).await?;
        let status = resp.status();
        if status.is_success() {
            Ok(PutOutcome::Stored)
        } else if status == StatusCode::PRECONDITION_FAILED {
            Ok(PutOutcome::NotStored)
        } else {
            Err(http_error("PUT", path, status))
        }
    }
}
