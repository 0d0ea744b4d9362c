use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use log::{info, warn};
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::NetworkError;
use crate::util::format_speed;

/// Connect and per-read inactivity limit; a slow but live transfer never times out.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct NetworkClient {
    client: Client,
}

impl NetworkClient {
    pub fn new() -> Self {
        Self::with_timeout(DOWNLOAD_TIMEOUT)
    }

    pub fn with_timeout(idle: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(idle)
            .read_timeout(idle)
            .user_agent(concat!("bruce-launcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self { client }
    }

    /// Stream `url` into `dest`, calling `progress` with (downloaded, total, speed_text).
    ///
    /// `dest` is truncated first. A failure mid-stream leaves whatever was
    /// already written in place.
    pub async fn download_to_path<F>(
        &self,
        url: &str,
        dest: &Path,
        mut progress: F,
    ) -> Result<u64, NetworkError>
    where
        F: FnMut(u64, Option<u64>, &str),
    {
        let io_err = |source: std::io::Error| NetworkError::Io {
            path: dest.to_path_buf(),
            source,
        };

        info!("download: {url} -> {}", dest.display());
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| NetworkError::Request {
                url: url.to_owned(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut file = File::create(dest).await.map_err(io_err)?;

        let total = response.content_length();
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_tick = Instant::now();
        let mut last_bytes = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(NetworkError::Stream)?;
            file.write_all(&chunk).await.map_err(io_err)?;
            downloaded += chunk.len() as u64;

            let since = last_tick.elapsed().as_secs_f32();
            if since > 0.2 {
                let speed = (downloaded - last_bytes) as f32 / since;
                progress(downloaded, total, &format_speed(speed));
                last_tick = Instant::now();
                last_bytes = downloaded;
            }
        }

        // Final callback.
        progress(downloaded, total, "0 B/s");

        file.flush().await.map_err(io_err)?;

        if let Some(total) = total
            && downloaded < total
        {
            return Err(NetworkError::Incomplete {
                received: downloaded,
                expected: total,
            });
        }

        info!("download: wrote {downloaded} bytes");
        Ok(downloaded)
    }
}
