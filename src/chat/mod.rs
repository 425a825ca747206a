mod gateway;
mod rest;

use serde::{Deserialize, Deserializer};

pub use gateway::GatewayListener;
pub use rest::DiscordClient;

/// An inbound chat message as seen by the command router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub author_id: u64,
    pub channel_id: u64,
    pub content: String,
}

/// Discord ids are snowflakes serialized as strings.
fn snowflake<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        Raw::Num(n) => Ok(n),
    }
}
