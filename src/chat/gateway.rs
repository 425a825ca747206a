use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::ChatMessage;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
const INTENT_DIRECT_MESSAGES: u64 = 1 << 12;
const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;
const INTENTS: u64 = INTENT_GUILD_MESSAGES | INTENT_DIRECT_MESSAGES | INTENT_MESSAGE_CONTENT;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid gateway payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gateway closed: {0}")]
    Closed(String),
}

#[derive(Deserialize)]
struct Frame {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

#[derive(Deserialize)]
struct User {
    #[serde(deserialize_with = "super::snowflake")]
    id: u64,
}

#[derive(Deserialize)]
struct Ready {
    user: User,
}

#[derive(Deserialize)]
struct MessageCreate {
    #[serde(deserialize_with = "super::snowflake")]
    channel_id: u64,
    #[serde(default)]
    content: String,
    author: User,
}

#[derive(Debug, PartialEq, Eq)]
enum GatewayEvent {
    Hello { heartbeat_interval: u64 },
    Ready { user_id: u64 },
    Message(ChatMessage),
    HeartbeatRequest,
    HeartbeatAck,
    Reconnect,
    InvalidSession,
    Ignored,
}

/// Decodes one gateway frame into its sequence number and event.
fn decode(raw: &str) -> Result<(Option<u64>, GatewayEvent), GatewayError> {
    let frame: Frame = serde_json::from_str(raw)?;

    let event = match frame.op {
        OP_HELLO => {
            let hello: Hello = serde_json::from_value(frame.d)?;
            GatewayEvent::Hello {
                heartbeat_interval: hello.heartbeat_interval,
            }
        }
        OP_DISPATCH => match frame.t.as_deref() {
            Some("READY") => {
                let ready: Ready = serde_json::from_value(frame.d)?;
                GatewayEvent::Ready {
                    user_id: ready.user.id,
                }
            }
            Some("MESSAGE_CREATE") => {
                let message: MessageCreate = serde_json::from_value(frame.d)?;
                GatewayEvent::Message(ChatMessage {
                    author_id: message.author.id,
                    channel_id: message.channel_id,
                    content: message.content,
                })
            }
            _ => GatewayEvent::Ignored,
        },
        OP_HEARTBEAT => GatewayEvent::HeartbeatRequest,
        OP_HEARTBEAT_ACK => GatewayEvent::HeartbeatAck,
        OP_RECONNECT => GatewayEvent::Reconnect,
        OP_INVALID_SESSION => GatewayEvent::InvalidSession,
        _ => GatewayEvent::Ignored,
    };

    Ok((frame.s, event))
}

fn identify_payload(token: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "camalert",
                "device": "camalert",
            },
        },
    })
}

fn heartbeat_payload(sequence: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": sequence })
}

/// Discord gateway connection that forwards every message not written by the
/// bot itself.
pub struct GatewayListener {
    token: String,
    url: String,
}

impl GatewayListener {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            url: GATEWAY_URL.to_string(),
        }
    }

    /// Runs until the receiving side of `tx` is dropped, reconnecting after
    /// every session end.
    pub async fn run(self, tx: mpsc::Sender<ChatMessage>) {
        loop {
            tracing::info!(url = %self.url, "connecting to chat gateway");

            match self.session(&tx).await {
                Ok(()) => tracing::info!("gateway session ended"),
                Err(e) => tracing::error!(error = %e, "gateway session failed"),
            }

            if tx.is_closed() {
                return;
            }

            tracing::info!("reconnecting in 5 seconds");
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn session(&self, tx: &mpsc::Sender<ChatMessage>) -> Result<(), GatewayError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        let mut last_sequence: Option<u64> = None;
        let mut self_id: Option<u64> = None;

        let interval_ms = loop {
            let Some(raw) = next_text(&mut stream).await? else {
                continue;
            };
            if let (_, GatewayEvent::Hello { heartbeat_interval }) = decode(&raw)? {
                break heartbeat_interval;
            }
        };
        tracing::debug!(interval_ms, "gateway hello");

        sink.send(Message::Text(identify_payload(&self.token).to_string().into()))
            .await?;

        let mut heartbeat = tokio::time::interval(Duration::from_millis(interval_ms));
        heartbeat.tick().await;
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    // No ack since the previous beat: the connection is dead.
                    if awaiting_ack {
                        return Err(GatewayError::Closed("heartbeat not acknowledged".to_string()));
                    }
                    sink.send(Message::Text(heartbeat_payload(last_sequence).to_string().into()))
                        .await?;
                    awaiting_ack = true;
                }
                raw = next_text(&mut stream) => {
                    let Some(raw) = raw? else {
                        continue;
                    };

                    let (sequence, event) = match decode(&raw) {
                        Ok(decoded) => decoded,
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping undecodable gateway frame");
                            continue;
                        }
                    };
                    if sequence.is_some() {
                        last_sequence = sequence;
                    }

                    match event {
                        GatewayEvent::Ready { user_id } => {
                            tracing::info!(user = user_id, "connected to chat gateway");
                            self_id = Some(user_id);
                        }
                        GatewayEvent::Message(message) => {
                            if Some(message.author_id) == self_id {
                                continue;
                            }
                            if tx.send(message).await.is_err() {
                                return Ok(());
                            }
                        }
                        GatewayEvent::HeartbeatRequest => {
                            sink.send(Message::Text(heartbeat_payload(last_sequence).to_string().into()))
                                .await?;
                        }
                        GatewayEvent::Reconnect => {
                            tracing::warn!("gateway requested reconnect");
                            return Ok(());
                        }
                        GatewayEvent::InvalidSession => {
                            tracing::warn!("gateway invalidated the session");
                            return Ok(());
                        }
                        GatewayEvent::HeartbeatAck => {
                            tracing::trace!("heartbeat acknowledged");
                            awaiting_ack = false;
                        }
                        GatewayEvent::Hello { .. } | GatewayEvent::Ignored => {}
                    }
                }
            }
        }
    }
}

/// Next text payload; `None` for control frames.
async fn next_text<S>(stream: &mut S) -> Result<Option<String>, GatewayError>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    match stream.next().await {
        Some(Ok(Message::Text(text))) => Ok(Some(text.as_str().to_owned())),
        Some(Ok(Message::Binary(bytes))) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Some(Ok(Message::Close(frame))) => Err(GatewayError::Closed(
            frame.map(|f| f.reason.as_str().to_owned()).unwrap_or_default(),
        )),
        Some(Ok(_)) => Ok(None),
        Some(Err(e)) => Err(e.into()),
        None => Err(GatewayError::Closed("stream ended".to_string())),
    }
}
