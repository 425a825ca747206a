use async_trait::async_trait;
use thiserror::Error;

use crate::camera::Snapshot;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat api returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Where an alert is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Channel(u64),
    /// Private channel with the given user, opened on demand.
    DirectMessage(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub camera: String,
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub enum CameraOutcome {
    Analyzed {
        snapshot: Snapshot,
        description: String,
    },
    Unavailable {
        reason: String,
    },
}

/// Result of one fetch + analyze cycle.
#[derive(Debug)]
pub struct CameraReport {
    pub camera: String,
    pub outcome: CameraOutcome,
}

/// One outbound chat message: a summary embed plus image attachments.
#[derive(Debug, Clone)]
pub struct Alert {
    pub title: String,
    pub description: String,
    pub fields: Vec<Field>,
    pub attachments: Vec<Attachment>,
}

impl Alert {
    pub fn text(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Summary lines and attachments follow the order of `reports`.
    pub fn compose(title: impl Into<String>, reports: Vec<CameraReport>) -> Self {
        let mut lines = Vec::with_capacity(reports.len());
        let mut attachments = Vec::new();

        for report in reports {
            let name = report.camera.to_uppercase();
            match report.outcome {
                CameraOutcome::Analyzed {
                    snapshot,
                    description,
                } => {
                    lines.push(format!("{name}: {description}"));
                    attachments.push(Attachment {
                        filename: format!("{}.jpg", report.camera),
                        camera: report.camera,
                        data: snapshot.jpeg,
                    });
                }
                CameraOutcome::Unavailable { reason } => {
                    lines.push(format!("{name}: snapshot unavailable ({reason})"));
                }
            }
        }

        Self {
            title: title.into(),
            description: lines.join("\n"),
            fields: Vec::new(),
            attachments,
        }
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Sends the alert as a single message; nothing is delivered on error.
    async fn send(&self, destination: Destination, alert: &Alert) -> Result<(), DeliveryError>;
}
