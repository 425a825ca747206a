mod commands;
mod router;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::chat::ChatMessage;

pub use router::{CommandRouter, MOTION_TITLE};

/// Handles each inbound chat message on its own task so a slow camera never
/// stalls the gateway.
pub async fn dispatch_messages(router: Arc<CommandRouter>, mut rx: mpsc::Receiver<ChatMessage>) {
    while let Some(message) = rx.recv().await {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            if let Err(e) = router.handle_message(&message).await {
                tracing::error!(channel = message.channel_id, error = %e, "command failed");
            }
        });
    }
    tracing::info!("chat message channel closed");
}
