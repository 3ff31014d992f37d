//! Outbound world-intent delivery.
//!
//! A bounded per-NPC channel; the host consumes the receiver. Sends await
//! when the channel is full so back-pressure reaches the pipeline instead of
//! intents being dropped silently. Per-NPC ordering is the channel's FIFO
//! order.

use tokio::sync::mpsc;

use loreguard_memory::WorldIntent;

/// The pipeline-side handle. The dispatcher is the sole emitter of intents;
/// nothing reaches into parsed output directly.
#[derive(Debug, Clone)]
pub struct IntentDispatcher {
    tx: mpsc::Sender<WorldIntent>,
}

pub fn intent_channel(capacity: usize) -> (IntentDispatcher, mpsc::Receiver<WorldIntent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (IntentDispatcher { tx }, rx)
}

impl IntentDispatcher {
    /// Deliver one intent, waiting if the host is behind. Returns `false`
    /// (after logging) only when the host dropped the receiver.
    pub async fn emit(&self, intent: WorldIntent) -> bool {
        match self.tx.send(intent).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(intent_type = %error.0.intent_type,
                    "intent receiver dropped; intent undeliverable");
                false
            }
        }
    }
}
