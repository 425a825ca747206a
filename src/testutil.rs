use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;

use crate::alert::{Alert, AlertSink, DeliveryError, Destination};
use crate::analytics::{Analyzer, FALLBACK_DESCRIPTION};
use crate::bot::CommandRouter;
use crate::camera::{CameraRegistry, FetchError, Snapshot, SnapshotSource};
use crate::config::Config;

pub const SAMPLE_CONFIG: &str = r#"
discord_token = "token"
user_id = 42
api_key = "secret"
ollama_server = "http://ollama.local:11434"
camera_server = "http://nvr.local:5000"

[camera_endpoints]
front = "/api/front/latest.jpg"
back = "/api/back/latest.jpg"
shed = "/api/shed/latest.jpg"
road = "/api/road/latest.jpg"
"#;

pub fn sample_config() -> Config {
    Config::from_toml(SAMPLE_CONFIG).unwrap()
}

/// Serves `app` on an ephemeral local port and returns its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 30, 30]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[derive(Default)]
pub struct FakeSnapshots {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl FakeSnapshots {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail(&self, camera: &str) {
        self.failing.lock().unwrap().insert(camera.to_string());
    }

    pub fn delay(&self, camera: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(camera.to_string(), delay);
    }
}

#[async_trait]
impl SnapshotSource for FakeSnapshots {
    async fn fetch(&self, camera: &str) -> Result<Snapshot, FetchError> {
        self.calls.lock().unwrap().push(camera.to_string());

        let delay = self.delays.lock().unwrap().get(camera).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().unwrap().contains(camera) {
            return Err(FetchError::Status {
                camera: camera.to_string(),
                status: 503,
            });
        }

        Ok(Snapshot {
            camera: camera.to_string(),
            jpeg: camera.as_bytes().to_vec(),
            path: PathBuf::from(format!("images/{camera}_snapshot.jpg")),
        })
    }
}

#[derive(Default)]
pub struct FakeAnalyzer {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeAnalyzer {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail(&self, camera: &str) {
        self.failing.lock().unwrap().insert(camera.to_string());
    }
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn describe(&self, snapshot: &Snapshot) -> String {
        self.calls.lock().unwrap().push(snapshot.camera.clone());
        if self.failing.lock().unwrap().contains(&snapshot.camera) {
            FALLBACK_DESCRIPTION.to_string()
        } else {
            format!("{} is clear", snapshot.camera)
        }
    }
}

#[derive(Default)]
pub struct FakeSink {
    sent: Mutex<Vec<(Destination, Alert)>>,
    failing: AtomicBool,
}

impl FakeSink {
    pub fn sent(&self) -> Vec<(Destination, Alert)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AlertSink for FakeSink {
    async fn send(&self, destination: Destination, alert: &Alert) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Status {
                status: 500,
                body: "boom".to_string(),
            });
        }
        self.sent.lock().unwrap().push((destination, alert.clone()));
        Ok(())
    }
}

/// Recording stand-ins for every collaborator of the command router.
#[derive(Default, Clone)]
pub struct Fakes {
    pub snapshots: Arc<FakeSnapshots>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub sink: Arc<FakeSink>,
}

impl Fakes {
    pub fn router(&self) -> CommandRouter {
        self.router_with(&sample_config())
    }

    pub fn router_with(&self, config: &Config) -> CommandRouter {
        CommandRouter::new(
            config,
            Arc::new(CameraRegistry::from_config(config)),
            self.snapshots.clone(),
            self.analyzer.clone(),
            self.sink.clone(),
        )
    }
}
