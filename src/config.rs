use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "CAMALERT_CONFIG";
const OPTIONS_ENV: &str = "OPTIONS";

/// Discord allows ten embeds per message and one is the summary.
pub const MAX_GROUP_CAMERAS: usize = 9;

pub const DEFAULT_PROMPT: &str = "ONLY mention if you see any people, vehicles, or animals. \
Keep it under 10 words. If empty just say 'Clear'.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to parse OPTIONS: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{field} is not a valid http(s) url: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("no cameras configured")]
    NoCameras,
    #[error("{context} references unknown camera '{camera}'")]
    UnknownCamera { context: String, camera: String },
    #[error("group '{group}' has no cameras")]
    EmptyGroup { group: String },
    #[error("group '{group}' has {count} cameras, at most {max} fit in one alert", max = MAX_GROUP_CAMERAS)]
    GroupTooLarge { group: String, count: usize },
    #[error("camera '{camera}' is configured more than once")]
    DuplicateCamera { camera: String },
    #[error("command '{earlier}' shadows later command '{later}'")]
    ShadowedCommand { earlier: String, later: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_http_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraConfig {
    #[serde(default = "default_camera_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_images_dir")]
    pub images_dir: String,
}

fn default_camera_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    1
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_images_dir() -> String {
    "images".to_string()
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_camera_timeout(),
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff(),
            images_dir: default_images_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisionConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_vision_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

fn default_model() -> String {
    "llava".to_string()
}

fn default_vision_timeout() -> u64 {
    30
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            timeout_secs: default_vision_timeout(),
            prompt: default_prompt(),
        }
    }
}

/// A command prefix bound to an ordered list of cameras.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub command: String,
    pub cameras: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl GroupConfig {
    fn new(command: &str, cameras: &[&str], description: &str) -> Self {
        Self {
            command: command.to_string(),
            cameras: cameras.iter().map(|c| c.to_string()).collect(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    #[serde(default = "default_door_camera")]
    pub door_camera: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_groups")]
    pub groups: Vec<GroupConfig>,
}

fn default_door_camera() -> String {
    "front".to_string()
}

fn default_command_timeout() -> u64 {
    120
}

fn default_groups() -> Vec<GroupConfig> {
    vec![
        GroupConfig::new(
            "check all",
            &["front", "back", "shed", "road"],
            "View all cameras",
        ),
        GroupConfig::new(
            "check front",
            &["front", "road"],
            "View front door and road cameras",
        ),
        GroupConfig::new(
            "check back",
            &["back", "shed"],
            "View back yard and shed cameras",
        ),
        GroupConfig::new("check shed", &["shed"], "View shed camera only"),
        GroupConfig::new("check road", &["road"], "View road camera only"),
    ]
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            door_camera: default_door_camera(),
            command_timeout_secs: default_command_timeout(),
            groups: default_groups(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub discord_token: String,
    #[serde(deserialize_with = "numeric_id")]
    pub user_id: u64,
    pub api_key: String,
    pub ollama_server: String,
    pub camera_server: String,
    pub camera_endpoints: BTreeMap<String, String>,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub bot: BotConfig,
}

impl Config {
    /// Loads from the `OPTIONS` JSON document when present, otherwise from the
    /// TOML file named by `CAMALERT_CONFIG` (default `config.toml`).
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(options) = std::env::var(OPTIONS_ENV) {
            tracing::debug!("loading config from {}", OPTIONS_ENV);
            return Self::from_json(&options);
        }

        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        tracing::debug!(path = %path, "loading config file");
        Self::load_from(path)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_json::from_str(content)?;
        config.normalize()?;
        config.validate()?;
        Ok(config)
    }

    /// Chat content is matched trimmed and lower-cased, so camera names and
    /// group commands are stored the same way.
    fn normalize(&mut self) -> Result<(), ConfigError> {
        let mut endpoints = BTreeMap::new();
        for (camera, endpoint) in std::mem::take(&mut self.camera_endpoints) {
            let camera = normalize_name(&camera);
            if endpoints.insert(camera.clone(), endpoint).is_some() {
                return Err(ConfigError::DuplicateCamera { camera });
            }
        }
        self.camera_endpoints = endpoints;

        self.bot.door_camera = normalize_name(&self.bot.door_camera);
        for group in &mut self.bot.groups {
            group.command = normalize_name(&group.command);
            for camera in &mut group.cameras {
                *camera = normalize_name(camera);
            }
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.discord_token.trim().is_empty() {
            return Err(ConfigError::Empty("discord_token"));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Empty("api_key"));
        }
        check_url("ollama_server", &self.ollama_server)?;
        check_url("camera_server", &self.camera_server)?;

        if self.camera_endpoints.is_empty() {
            return Err(ConfigError::NoCameras);
        }

        if !self.camera_endpoints.contains_key(&self.bot.door_camera) {
            return Err(ConfigError::UnknownCamera {
                context: "door_camera".to_string(),
                camera: self.bot.door_camera.clone(),
            });
        }

        for group in &self.bot.groups {
            if group.cameras.is_empty() {
                return Err(ConfigError::EmptyGroup {
                    group: group.command.clone(),
                });
            }
            if group.cameras.len() > MAX_GROUP_CAMERAS {
                return Err(ConfigError::GroupTooLarge {
                    group: group.command.clone(),
                    count: group.cameras.len(),
                });
            }
            if let Some(camera) = group
                .cameras
                .iter()
                .find(|c| !self.camera_endpoints.contains_key(*c))
            {
                return Err(ConfigError::UnknownCamera {
                    context: format!("group '{}'", group.command),
                    camera: camera.clone(),
                });
            }
        }

        // Groups are matched by prefix in definition order, so an earlier
        // command that prefixes a later one makes the later one unreachable.
        let commands: Vec<&str> = self.bot.groups.iter().map(|g| g.command.as_str()).collect();
        for (i, earlier) in commands.iter().enumerate() {
            if let Some(later) = commands[i + 1..].iter().find(|c| c.starts_with(earlier)) {
                return Err(ConfigError::ShadowedCommand {
                    earlier: earlier.to_string(),
                    later: later.to_string(),
                });
            }
        }

        Ok(())
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Add-on option forms may carry the id as a string.
fn numeric_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    match reqwest::Url::parse(value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sample_config, SAMPLE_CONFIG as SAMPLE};

    #[test]
    fn test_defaults_applied() {
        let config = sample_config();
        assert_eq!(config.user_id, 42);
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.http.host, "127.0.0.1");
        assert_eq!(config.vision.model, "llava");
        assert_eq!(config.vision.timeout_secs, 30);
        assert_eq!(config.vision.prompt, DEFAULT_PROMPT);
        assert_eq!(config.camera.images_dir, "images");
        assert_eq!(config.bot.door_camera, "front");
        assert_eq!(config.bot.groups.len(), 5);
        assert_eq!(config.bot.groups[1].cameras, vec!["front", "road"]);
    }

    #[test]
    fn test_options_json() {
        let json = r#"{
            "discord_token": "token",
            "user_id": "7",
            "api_key": "secret",
            "ollama_server": "http://ollama.local:11434",
            "camera_server": "http://nvr.local:5000",
            "camera_endpoints": {
                "front": "/front.jpg", "back": "/back.jpg",
                "shed": "/shed.jpg", "road": "/road.jpg"
            },
            "vision": { "timeout_secs": 5 }
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.user_id, 7);
        assert_eq!(config.vision.timeout_secs, 5);
        assert_eq!(config.camera_endpoints["front"], "/front.jpg");
    }

    #[test]
    fn test_options_is_never_evaluated() {
        let json = r#"{"discord_token": __import__('os').system('true')}"#;
        assert!(matches!(Config::from_json(json), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_missing_required_field() {
        let content = SAMPLE.replace("api_key = \"secret\"\n", "");
        assert!(matches!(
            Config::from_toml(&content),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let content = format!("debug_eval = true\n{SAMPLE}");
        assert!(matches!(
            Config::from_toml(&content),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_invalid_server_url() {
        let content = SAMPLE.replace("http://ollama.local:11434", "ollama.local");
        assert!(matches!(
            Config::from_toml(&content),
            Err(ConfigError::InvalidUrl { field: "ollama_server", .. })
        ));
    }

    #[test]
    fn test_group_with_unknown_camera() {
        let content = format!(
            "{SAMPLE}\n[bot]\ngroups = [{{ command = \"check garage\", cameras = [\"garage\"] }}]\n"
        );
        match Config::from_toml(&content) {
            Err(ConfigError::UnknownCamera { camera, .. }) => assert_eq!(camera, "garage"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_shadowed_command_rejected() {
        let content = format!(
            "{SAMPLE}\n[bot]\ngroups = [\n\
             {{ command = \"check front\", cameras = [\"front\"] }},\n\
             {{ command = \"check frontyard\", cameras = [\"road\"] }},\n]\n"
        );
        match Config::from_toml(&content) {
            Err(ConfigError::ShadowedCommand { earlier, later }) => {
                assert_eq!(earlier, "check front");
                assert_eq!(later, "check frontyard");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_longer_command_first_is_allowed() {
        let content = format!(
            "{SAMPLE}\n[bot]\ngroups = [\n\
             {{ command = \"check frontyard\", cameras = [\"road\"] }},\n\
             {{ command = \"check front\", cameras = [\"front\"] }},\n]\n"
        );
        assert!(Config::from_toml(&content).is_ok());
    }

    #[test]
    fn test_names_are_lowercased() {
        let content = SAMPLE.replace("front = ", "Front = ")
            + "\n[bot]\ndoor_camera = \" FRONT\"\ngroups = [{ command = \"Check All \", cameras = [\"Front\", \"ROAD\"] }]\n";
        let config = Config::from_toml(&content).unwrap();

        assert!(config.camera_endpoints.contains_key("front"));
        assert!(!config.camera_endpoints.contains_key("Front"));
        assert_eq!(config.bot.door_camera, "front");
        assert_eq!(config.bot.groups[0].command, "check all");
        assert_eq!(config.bot.groups[0].cameras, vec!["front", "road"]);
    }

    #[test]
    fn test_duplicate_camera_after_lowercasing() {
        let content = SAMPLE.replace("[camera_endpoints]\n", "[camera_endpoints]\nFRONT = \"/other.jpg\"\n");
        match Config::from_toml(&content) {
            Err(ConfigError::DuplicateCamera { camera }) => assert_eq!(camera, "front"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_group_too_large_for_one_message() {
        let cameras = vec!["\"front\""; MAX_GROUP_CAMERAS + 1].join(", ");
        let content = format!(
            "{SAMPLE}\n[bot]\ngroups = [{{ command = \"check many\", cameras = [{cameras}] }}]\n"
        );
        match Config::from_toml(&content) {
            Err(ConfigError::GroupTooLarge { group, count }) => {
                assert_eq!(group, "check many");
                assert_eq!(count, 10);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let cameras = vec!["\"front\""; MAX_GROUP_CAMERAS].join(", ");
        let content = format!(
            "{SAMPLE}\n[bot]\ngroups = [{{ command = \"check many\", cameras = [{cameras}] }}]\n"
        );
        assert!(Config::from_toml(&content).is_ok());
    }
}
