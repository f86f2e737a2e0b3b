use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, ClientBuilder, Proxy};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use crate::errors::{AppError, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Streams a URL into a local file. Implemented over HTTP by [`HttpPool`];
/// provisioning and artwork download go through this seam.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Writes the body of `url` to `dest` and returns the byte count.
    /// `on_progress` receives `(downloaded, total)` with `total` when known.
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &(dyn Fn(u64, Option<u64>) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// HTTP connection pool shared by every network consumer
pub struct HttpPool {
    client: Client,
    stall_timeout: Duration,
}

fn base_builder(max_connections: usize) -> ClientBuilder {
    ClientBuilder::new()
        .pool_max_idle_per_host(max_connections)
        .pool_idle_timeout(Some(Duration::from_secs(30)))
        .connect_timeout(Duration::from_secs(15))
        .user_agent(USER_AGENT)
        .gzip(true)
        .brotli(true)
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
}

impl HttpPool {
    /// `stall_timeout_seconds` bounds the wait for each body chunk; large
    /// artifacts have no overall deadline.
    pub fn new(max_connections: usize, stall_timeout_seconds: u64, proxy: Option<&str>) -> Result<Self> {
        let mut builder = base_builder(max_connections);
        if let Some(proxy_url) = proxy.filter(|p| !p.trim().is_empty()) {
            log::info!("🌐 [HTTP] Using proxy {}", proxy_url);
            builder = builder.proxy(Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            stall_timeout: Duration::from_secs(stall_timeout_seconds),
        })
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }

    async fn stream_to_file(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &(dyn Fn(u64, Option<u64>) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Network(format!("HTTP {} for {}", response.status(), url)));
        }

        let total_size = response.content_length().filter(|size| *size > 0);
        let mut file = tokio::fs::File::create(dest).await?;
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                next = tokio::time::timeout(self.stall_timeout, stream.next()) => next,
            };
            let chunk = match next {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => break,
                Err(_) => {
                    return Err(AppError::Network(format!(
                        "No data received for {:?} from {}",
                        self.stall_timeout, url
                    )))
                }
            };
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            on_progress(downloaded, total_size);
        }
        file.flush().await?;

        if let Some(total) = total_size {
            if downloaded < total {
                return Err(AppError::Network(format!(
                    "Truncated body from {}: {} of {} bytes",
                    url, downloaded, total
                )));
            }
        }
        Ok(downloaded)
    }
}

#[async_trait]
impl ArtifactSource for HttpPool {
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &(dyn Fn(u64, Option<u64>) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        log::info!("🌐 [HTTP] GET {} -> {:?}", url, dest);
        let result = self.stream_to_file(url, dest, on_progress, cancel).await;
        if let Err(e) = &result {
            log::warn!("⚠️ [HTTP] Download from {} failed: {}", url, e);
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_and_without_proxy() {
        assert!(HttpPool::new(4, 30, None).is_ok());
        assert!(HttpPool::new(4, 30, Some("")).is_ok());
        assert!(HttpPool::new(4, 30, Some("socks5://127.0.0.1:9050")).is_ok());
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error_and_leaves_no_file() {
        let pool = HttpPool::new(1, 5, None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("artifact.part");

        let err = pool
            .fetch_to_file("http://127.0.0.1:9/missing", &dest, &|_, _| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_network());
        assert!(!dest.exists());
    }
}
