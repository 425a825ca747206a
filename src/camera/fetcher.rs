use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::CameraConfig;

use super::CameraRegistry;

const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unknown camera '{0}'")]
    UnknownCamera(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("camera {camera} returned status {status}")]
    Status { camera: String, status: u16 },
    #[error("malformed image from camera {camera}: {source}")]
    MalformedImage {
        camera: String,
        source: image::ImageError,
    },
    #[error("failed to encode snapshot: {0}")]
    Encode(image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(_) => true,
            FetchError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Most recent image of one camera, re-encoded as JPEG.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub camera: String,
    pub jpeg: Vec<u8>,
    pub path: PathBuf,
}

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, camera: &str) -> Result<Snapshot, FetchError>;
}

pub struct SnapshotFetcher {
    client: reqwest::Client,
    registry: Arc<CameraRegistry>,
    images_dir: PathBuf,
    retries: u32,
    backoff: Duration,
    locks: HashMap<String, Mutex<()>>,
}

impl SnapshotFetcher {
    pub fn new(registry: Arc<CameraRegistry>, config: &CameraConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let locks = registry
            .names()
            .map(|name| (name.to_string(), Mutex::new(())))
            .collect();

        Ok(Self {
            client,
            registry,
            images_dir: PathBuf::from(&config.images_dir),
            retries: config.retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
            locks,
        })
    }

    pub fn snapshot_path(&self, camera: &str) -> PathBuf {
        self.images_dir.join(format!("{camera}_snapshot.jpg"))
    }

    async fn download(&self, camera: &str, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;
        loop {
            match self.try_download(camera, url).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < self.retries && e.is_retryable() => {
                    attempt += 1;
                    tracing::warn!(
                        camera = %camera,
                        attempt,
                        error = %e,
                        "snapshot download failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_download(&self, camera: &str, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                camera: camera.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Writes through a temp file so readers never see a partial image.
    async fn persist(&self, camera: &str, jpeg: &[u8]) -> Result<PathBuf, FetchError> {
        tokio::fs::create_dir_all(&self.images_dir).await?;
        let path = self.snapshot_path(camera);
        let tmp = path.with_extension("jpg.tmp");
        tokio::fs::write(&tmp, jpeg).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }
}

#[async_trait]
impl SnapshotSource for SnapshotFetcher {
    async fn fetch(&self, camera: &str) -> Result<Snapshot, FetchError> {
        let (Some(url), Some(lock)) = (self.registry.url(camera), self.locks.get(camera)) else {
            return Err(FetchError::UnknownCamera(camera.to_string()));
        };

        let _guard = lock.lock().await;

        tracing::debug!(camera = %camera, url = %url, "fetching snapshot");
        let body = self.download(camera, &url).await?;

        let name = camera.to_string();
        let jpeg = tokio::task::spawn_blocking(move || reencode(&name, &body)).await??;
        let path = self.persist(camera, &jpeg).await?;

        tracing::info!(camera = %camera, path = %path.display(), bytes = jpeg.len(), "snapshot saved");

        Ok(Snapshot {
            camera: camera.to_string(),
            jpeg,
            path,
        })
    }
}

fn reencode(camera: &str, body: &[u8]) -> Result<Vec<u8>, FetchError> {
    let image = image::load_from_memory(body).map_err(|source| FetchError::MalformedImage {
        camera: camera.to_string(),
        source,
    })?;

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&image.to_rgb8())
        .map_err(FetchError::Encode)?;
    Ok(out)
}
