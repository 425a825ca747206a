use std::collections::BTreeMap;

use crate::config::Config;

/// Static mapping from camera identifier to the URL it is fetched from.
#[derive(Debug, Clone)]
pub struct CameraRegistry {
    server: String,
    endpoints: BTreeMap<String, String>,
}

impl CameraRegistry {
    pub fn new(server: impl Into<String>, endpoints: BTreeMap<String, String>) -> Self {
        Self {
            server: server.into(),
            endpoints,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.camera_server.clone(), config.camera_endpoints.clone())
    }

    pub fn contains(&self, camera: &str) -> bool {
        self.endpoints.contains_key(camera)
    }

    /// Full snapshot URL; the endpoint is appended to the server verbatim.
    pub fn url(&self, camera: &str) -> Option<String> {
        self.endpoints
            .get(camera)
            .map(|endpoint| format!("{}{}", self.server, endpoint))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }
}
