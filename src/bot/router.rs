use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;

use crate::alert::{Alert, AlertSink, CameraOutcome, CameraReport, DeliveryError, Destination};
use crate::analytics::Analyzer;
use crate::camera::{CameraRegistry, SnapshotSource};
use crate::chat::ChatMessage;
use crate::config::{Config, GroupConfig};

use super::commands::{self, Command, DOOR_PHRASES};

pub const DOOR_TITLE: &str = "Door Alert";
pub const MOTION_TITLE: &str = "Door Alert - Motion Detected";

const HELP_PHRASE_COUNT: usize = 5;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("command did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

/// Turns authorized triggers into camera alerts.
pub struct CommandRouter {
    principal: u64,
    door_camera: String,
    groups: Vec<GroupConfig>,
    deadline: Duration,
    registry: Arc<CameraRegistry>,
    snapshots: Arc<dyn SnapshotSource>,
    analyzer: Arc<dyn Analyzer>,
    sink: Arc<dyn AlertSink>,
}

impl CommandRouter {
    pub fn new(
        config: &Config,
        registry: Arc<CameraRegistry>,
        snapshots: Arc<dyn SnapshotSource>,
        analyzer: Arc<dyn Analyzer>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            principal: config.user_id,
            door_camera: config.bot.door_camera.clone(),
            groups: config.bot.groups.clone(),
            deadline: Duration::from_secs(config.bot.command_timeout_secs),
            registry,
            snapshots,
            analyzer,
            sink,
        }
    }

    pub fn principal(&self) -> u64 {
        self.principal
    }

    pub fn is_authorized(&self, user_id: u64) -> bool {
        user_id == self.principal
    }

    pub async fn handle_message(&self, message: &ChatMessage) -> Result<(), CommandError> {
        if !self.is_authorized(message.author_id) {
            tracing::debug!(author = message.author_id, "ignoring message from unauthorized user");
            return Ok(());
        }

        let content = message.content.trim().to_lowercase();
        let Some(command) = commands::parse(&content, &self.groups) else {
            return Ok(());
        };

        let destination = Destination::Channel(message.channel_id);
        tracing::info!(channel = message.channel_id, command = ?command, "handling command");

        match command {
            Command::Help => self.deliver(destination, &help_alert(&self.groups)).await,
            Command::Door => self.door_check(destination, DOOR_TITLE).await,
            Command::Snapshot(name) if self.registry.contains(name) => {
                let title = format!("Snapshot - {}", name.to_uppercase());
                self.check_cameras(&[name.to_string()], &title, destination)
                    .await
            }
            Command::Snapshot(name) => {
                self.deliver(destination, &unknown_camera_alert(name, &self.registry))
                    .await
            }
            Command::Group(group) => {
                let title = format!("Camera Alert - {}", commands::title_case(&group.command));
                self.check_cameras(&group.cameras, &title, destination)
                    .await
            }
        }
    }

    pub async fn door_check(&self, destination: Destination, title: &str) -> Result<(), CommandError> {
        self.check_cameras(std::slice::from_ref(&self.door_camera), title, destination)
            .await
    }

    /// Fetches and analyzes every camera concurrently and sends one alert
    /// whose entries follow the order of `cameras`.
    pub async fn check_cameras(
        &self,
        cameras: &[String],
        title: &str,
        destination: Destination,
    ) -> Result<(), CommandError> {
        let work = async {
            let reports = join_all(cameras.iter().map(|camera| self.inspect(camera))).await;
            self.sink.send(destination, &Alert::compose(title, reports)).await
        };

        match tokio::time::timeout(self.deadline, work).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::error!(title = %title, "command deadline exceeded");
                Err(CommandError::DeadlineExceeded(self.deadline))
            }
        }
    }

    async fn inspect(&self, camera: &str) -> CameraReport {
        let outcome = match self.snapshots.fetch(camera).await {
            Ok(snapshot) => {
                tracing::debug!(camera = %camera, path = %snapshot.path.display(), "analyzing snapshot");
                let description = self.analyzer.describe(&snapshot).await;
                CameraOutcome::Analyzed {
                    snapshot,
                    description,
                }
            }
            Err(e) => {
                tracing::warn!(camera = %camera, error = %e, "snapshot fetch failed");
                CameraOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        };

        CameraReport {
            camera: camera.to_string(),
            outcome,
        }
    }

    async fn deliver(&self, destination: Destination, alert: &Alert) -> Result<(), CommandError> {
        Ok(self.sink.send(destination, alert).await?)
    }
}

fn help_alert(groups: &[GroupConfig]) -> Alert {
    let door = format!(
        "{}\n*(and similar phrases)*",
        DOOR_PHRASES[..HELP_PHRASE_COUNT].join("\n")
    );
    let sections = groups
        .iter()
        .map(|g| format!("`{}` - {}", g.command, g.description))
        .collect::<Vec<String>>()
        .join("\n");

    Alert::text("Camera Bot Commands", "Here are all available commands:")
        .with_field("🚪 Door Check Commands", door)
        .with_field("📷 Camera Section Commands", sections)
        .with_field("🖼️ Snapshot Command", "`snapshot <camera>` - View a single camera")
}

fn unknown_camera_alert(name: &str, registry: &CameraRegistry) -> Alert {
    let valid = registry.names().collect::<Vec<&str>>().join(", ");
    let description = if name.is_empty() {
        format!("Usage: `snapshot <camera>`. Valid cameras: {valid}")
    } else {
        format!("Unknown camera '{name}'. Valid cameras: {valid}")
    };
    Alert::text("Unknown camera", description)
}
