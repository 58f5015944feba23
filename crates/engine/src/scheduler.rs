use core::time::Duration;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::random::RandomSource;

/// Host-side collaborator that actually transmits a reply. Best effort:
/// the scheduler logs failures and moves on.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, sender_id: &str, text: &str) -> Result<()>;
}

struct Outgoing {
    sender_id: String,
    text: String,
}

/// Defers each reply by a randomized human-like delay, then hands it to the
/// [`DeliverySink`] from a single background worker so outgoing replies are
/// paced one at a time. `schedule` never blocks the caller.
pub struct ReplyScheduler {
    tx: mpsc::UnboundedSender<Outgoing>,
    delay_min_ms: u64,
    delay_max_ms: u64,
    random: Arc<dyn RandomSource>,
}

impl ReplyScheduler {
    /// Spawns the delivery worker; must be called inside a tokio runtime.
    #[must_use]
    pub fn new(
        sink: Arc<dyn DeliverySink>,
        delay_min_ms: u64,
        delay_max_ms: u64,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
        tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                if let Err(e) = sink.deliver(&out.sender_id, &out.text).await {
                    warn!(sender = %out.sender_id, error = %e, "Delivery failed");
                }
            }
            debug!("Reply worker shutting down");
        });
        Self {
            tx,
            delay_min_ms,
            delay_max_ms,
            random,
        }
    }

    /// Queue `text` for delivery to `sender_id` after a randomized delay.
    pub fn schedule(&self, sender_id: &str, text: String) {
        let delay = Duration::from_millis(self.random.delay_ms(self.delay_min_ms, self.delay_max_ms));
        let out = Outgoing {
            sender_id: sender_id.to_owned(),
            text,
        };
        let tx = self.tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            // A closed channel just means the scheduler is gone.
            let _ = tx.send(out);
        });
    }
}
