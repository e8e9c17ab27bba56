//! Where catalog payloads come from.

use async_trait::async_trait;
use conductor_shared::{DispatchError, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "catalog";

/// Fetches the raw catalog payload
#[async_trait]
pub trait CommandSource: Send + Sync {
    /// Human-readable location for logs
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<String>;
}

/// Pick a source implementation from the URL scheme
pub fn source_from_url(url: &str, timeout: Duration) -> Result<Arc<dyn CommandSource>> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Arc::new(HttpCommandSource::new(url, timeout)?))
    } else if let Some(path) = url.strip_prefix("file://") {
        Ok(Arc::new(FileCommandSource::new(path)))
    } else {
        Err(DispatchError::Configuration(format!(
            "Unsupported catalog source URL: {}",
            url
        )))
    }
}

pub struct HttpCommandSource {
    client: reqwest::Client,
    url: String,
}

impl HttpCommandSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("conductord/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DispatchError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

fn map_reqwest(err: reqwest::Error) -> DispatchError {
    if err.is_timeout() {
        DispatchError::Timeout(format!("catalog fetch: {}", err))
    } else if err.is_connect() || err.is_request() {
        DispatchError::Network(format!("catalog fetch: {}", err))
    } else {
        DispatchError::ExternalService {
            service: SERVICE.to_string(),
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl CommandSource for HttpCommandSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> Result<String> {
        debug!("Fetching catalog from {}", self.url);
        let response = self.client.get(&self.url).send().await.map_err(map_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::ExternalService {
                service: SERVICE.to_string(),
                status: Some(status.as_u16()),
                message: format!("GET {} returned {}", self.url, status),
            });
        }
        response.text().await.map_err(map_reqwest)
    }
}

/// Catalog read from a local file (`file://` URLs)
pub struct FileCommandSource {
    path: PathBuf,
}

impl FileCommandSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CommandSource for FileCommandSource {
    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }

    async fn fetch(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| DispatchError::ExternalService {
                service: SERVICE.to_string(),
                status: None,
                message: format!("{}: {}", self.path.display(), e),
            })
    }
}

/// Failure a [`StaticCommandSource`] can be told to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFailure {
    /// Upstream answered with this HTTP status
    Status(u16),
    Network,
    Timeout,
}

impl SourceFailure {
    fn to_error(self) -> DispatchError {
        match self {
            SourceFailure::Status(code) => DispatchError::ExternalService {
                service: SERVICE.to_string(),
                status: Some(code),
                message: format!("upstream returned {}", code),
            },
            SourceFailure::Network => DispatchError::Network("connection refused".to_string()),
            SourceFailure::Timeout => DispatchError::Timeout("catalog fetch".to_string()),
        }
    }
}

/// In-memory source with a fetch counter, optional latency and failure
/// injection. Used by tests and embedders with a fixed command set.
pub struct StaticCommandSource {
    payload: Mutex<String>,
    failure: Mutex<Option<SourceFailure>>,
    delay: Mutex<Option<Duration>>,
    fetches: AtomicU64,
}

impl StaticCommandSource {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: Mutex::new(payload.into()),
            failure: Mutex::new(None),
            delay: Mutex::new(None),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap_or_else(|p| p.into_inner()) = Some(delay);
        self
    }

    pub fn set_payload(&self, payload: impl Into<String>) {
        *self.payload.lock().unwrap_or_else(|p| p.into_inner()) = payload.into();
    }

    /// Make every following fetch fail (or succeed again with `None`)
    pub fn set_failure(&self, failure: Option<SourceFailure>) {
        *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = failure;
    }

    /// Fetch attempts so far, failed ones included
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandSource for StaticCommandSource {
    fn describe(&self) -> String {
        "static".to_string()
    }

    async fn fetch(&self) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = *self.failure.lock().unwrap_or_else(|p| p.into_inner());
        match failure {
            Some(f) => Err(f.to_error()),
            None => Ok(self
                .payload
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_static_source_counts_and_fails() {
        let source = StaticCommandSource::new("## /ping");
        assert_eq!(source.fetch().await.unwrap(), "## /ping");
        source.set_failure(Some(SourceFailure::Status(503)));
        let err = source.fetch().await.unwrap_err();
        assert_eq!(err.kind(), conductor_shared::ErrorKind::ExternalService);
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "## /ping").unwrap();
        let url = format!("file://{}", file.path().display());
        let source = source_from_url(&url, Duration::from_secs(1)).unwrap();
        assert!(source.fetch().await.unwrap().contains("/ping"));
    }

    #[tokio::test]
    async fn test_missing_file_is_external_failure() {
        let source = FileCommandSource::new("/nonexistent/conductor/commands.md");
        let err = source.fetch().await.unwrap_err();
        assert_eq!(err.kind(), conductor_shared::ErrorKind::ExternalService);
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(source_from_url("ftp://example.com/x", Duration::from_secs(1)).is_err());
        assert!(source_from_url("https://example.com/x", Duration::from_secs(1)).is_ok());
    }
}
