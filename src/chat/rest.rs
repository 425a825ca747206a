use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::alert::{Alert, AlertSink, DeliveryError, Destination};

const API_BASE: &str = "https://discord.com/api/v10";
const EMBED_COLOR: u32 = 0x00ff00;

#[derive(Deserialize)]
struct Channel {
    #[serde(deserialize_with = "super::snowflake")]
    id: u64,
}

/// Discord REST client used to deliver alerts.
pub struct DiscordClient {
    client: reqwest::Client,
    base: String,
    token: String,
    dm_channels: Mutex<HashMap<u64, u64>>,
}

impl DiscordClient {
    pub fn new(token: &str) -> Result<Self, DeliveryError> {
        Self::with_base(token, API_BASE)
    }

    pub fn with_base(token: &str, base: &str) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("camalert/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            dm_channels: Mutex::new(HashMap::new()),
        })
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn channel_for(&self, destination: Destination) -> Result<u64, DeliveryError> {
        match destination {
            Destination::Channel(id) => Ok(id),
            Destination::DirectMessage(user_id) => self.dm_channel(user_id).await,
        }
    }

    async fn dm_channel(&self, user_id: u64) -> Result<u64, DeliveryError> {
        let mut channels = self.dm_channels.lock().await;
        if let Some(id) = channels.get(&user_id) {
            return Ok(*id);
        }

        let response = self
            .client
            .post(format!("{}/users/@me/channels", self.base))
            .header("Authorization", self.authorization())
            .json(&json!({ "recipient_id": user_id.to_string() }))
            .send()
            .await?;
        let response = check_status(response).await?;
        let channel: Channel = serde_json::from_slice(&response.bytes().await?)?;

        tracing::debug!(user = user_id, channel = channel.id, "opened dm channel");
        channels.insert(user_id, channel.id);
        Ok(channel.id)
    }
}

#[async_trait]
impl AlertSink for DiscordClient {
    async fn send(&self, destination: Destination, alert: &Alert) -> Result<(), DeliveryError> {
        let channel_id = self.channel_for(destination).await?;

        let payload = message_payload(alert);
        let mut form = Form::new().text("payload_json", serde_json::to_string(&payload)?);
        for (i, attachment) in alert.attachments.iter().enumerate() {
            let part = Part::bytes(attachment.data.clone())
                .file_name(attachment.filename.clone())
                .mime_str("image/jpeg")?;
            form = form.part(format!("files[{i}]"), part);
        }

        let response = self
            .client
            .post(format!("{}/channels/{}/messages", self.base, channel_id))
            .header("Authorization", self.authorization())
            .multipart(form)
            .send()
            .await?;
        check_status(response).await?;

        tracing::info!(
            channel = channel_id,
            title = %alert.title,
            attachments = alert.attachments.len(),
            "alert delivered"
        );
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DeliveryError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Summary embed first, then one image embed per attachment.
fn message_payload(alert: &Alert) -> Value {
    let fields: Vec<Value> = alert
        .fields
        .iter()
        .map(|f| json!({ "name": f.name, "value": f.value, "inline": false }))
        .collect();

    let mut embeds = vec![json!({
        "title": alert.title,
        "description": alert.description,
        "color": EMBED_COLOR,
        "fields": fields,
    })];
    embeds.extend(alert.attachments.iter().map(|a| {
        json!({
            "title": format!("{} Camera", a.camera.to_uppercase()),
            "color": EMBED_COLOR,
            "image": { "url": format!("attachment://{}", a.filename) },
        })
    }));

    let attachments: Vec<Value> = alert
        .attachments
        .iter()
        .enumerate()
        .map(|(i, a)| json!({ "id": i, "filename": a.filename }))
        .collect();

    json!({ "embeds": embeds, "attachments": attachments })
}
