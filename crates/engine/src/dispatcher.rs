use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::Settings;
use crate::cooldown::CooldownGate;
use crate::engine::{MatchEngine, Outcome};
use crate::random::RandomSource;
use crate::rules::RuleTable;
use crate::scheduler::{DeliverySink, ReplyScheduler};
use crate::state::StateStore;

/// Observer for suppress-and-signal outcomes (e.g. abuse or an explicit
/// self-admission): no reply goes out, but the host gets told.
#[async_trait]
pub trait SuppressionObserver: Send + Sync {
    async fn on_suppressed(&self, sender_id: &str, category: &str, text: &str);
}

/// Sole entry point the host calls per inbound message. Orchestrates
/// cooldown gate -> state store -> match engine -> reply scheduler.
pub struct Dispatcher {
    enabled: AtomicBool,
    gate: CooldownGate,
    store: StateStore,
    engine: MatchEngine,
    scheduler: ReplyScheduler,
    observer: Arc<dyn SuppressionObserver>,
}

impl Dispatcher {
    /// Builds the full pipeline; must be called inside a tokio runtime
    /// (the scheduler spawns its delivery worker). Starts disabled.
    #[must_use]
    pub fn new(
        table: RuleTable,
        settings: &Settings,
        sink: Arc<dyn DeliverySink>,
        observer: Arc<dyn SuppressionObserver>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            gate: CooldownGate::new(Duration::from_millis(settings.cooldown_ms)),
            store: StateStore::new(settings.session_budget_minutes),
            engine: MatchEngine::new(table, Arc::clone(&random)),
            scheduler: ReplyScheduler::new(
                sink,
                settings.reply_delay_min_ms,
                settings.reply_delay_max_ms,
                random,
            ),
            observer,
        }
    }

    /// Process one inbound message. Never propagates an error to the host;
    /// the worst case for a single message is "no reply sent".
    pub async fn handle(&self, sender_id: &str, raw: &str) {
        if !self.is_enabled() {
            return;
        }
        if raw.trim().is_empty() {
            return;
        }
        let now = Instant::now();
        if !self.gate.try_admit(sender_id, now) {
            debug!(sender = %sender_id, "Cooldown active, message dropped");
            return;
        }

        let state = self.store.get_or_create(sender_id, now).await;
        let mut state = state.lock().await;
        state.message_count += 1;
        state.last_message_at = Some(now);

        match self.engine.evaluate(sender_id, raw, &mut state, now) {
            Outcome::Reply(text) => self.scheduler.schedule(sender_id, text),
            Outcome::Suppressed { category } => {
                self.observer.on_suppressed(sender_id, &category, raw).await;
            }
            Outcome::NoMatch => {
                debug!(sender = %sender_id, "No rule produced an outcome");
            }
        }
    }

    /// Flip the responder on or off. Turning it off clears every session so
    /// nothing stale survives a stop/start cycle.
    pub async fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was && !enabled {
            self.store.clear_all().await;
            info!("Responder disabled, all session state cleared");
        } else if !was && enabled {
            info!("Responder enabled");
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Drop one sender's session; safe if none exists.
    pub async fn clear_one(&self, sender_id: &str) {
        self.store.remove(sender_id).await;
    }

    /// Drop every session; safe when already empty.
    pub async fn clear_all(&self) {
        self.store.clear_all().await;
    }

    /// Number of live sessions, for the status surface.
    pub async fn active_sessions(&self) -> usize {
        self.store.len().await
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::EngineConfig;
    use crate::random::SeededRandom;

    struct CaptureSink {
        tx: mpsc::UnboundedSender<(String, String)>,
    }

    #[async_trait]
    impl DeliverySink for CaptureSink {
        async fn deliver(&self, sender_id: &str, text: &str) -> Result<()> {
            let _ = self.tx.send((sender_id.to_owned(), text.to_owned()));
            Ok(())
        }
    }

    struct CaptureObserver {
        tx: mpsc::UnboundedSender<(String, String)>,
    }

    #[async_trait]
    impl SuppressionObserver for CaptureObserver {
        async fn on_suppressed(&self, sender_id: &str, category: &str, _text: &str) {
            let _ = self.tx.send((sender_id.to_owned(), category.to_owned()));
        }
    }

    const TEST_CONFIG: &str = r#"
settings:
  cooldown_ms: 0
  reply_delay_min_ms: 0
  reply_delay_max_ms: 0
rules:
  - category: admission
    priority: 95
    trigger: { type: keyword-set, any: ["i am cheating"] }
    suppress: true
  - category: code
    priority: 85
    trigger: { type: numeric-code }
    sets_flags: [code_supplied]
    responses: ["Accept the request"]
  - category: catchall
    priority: 10
    trigger: { type: always }
    responses: ["Still waiting"]
"#;

    struct Harness {
        dispatcher: Dispatcher,
        replies: mpsc::UnboundedReceiver<(String, String)>,
        signals: mpsc::UnboundedReceiver<(String, String)>,
    }

    fn harness(config_yaml: &str) -> Harness {
        let cfg: EngineConfig = serde_yaml::from_str(config_yaml).expect("valid config");
        cfg.settings.validate().expect("valid settings");
        let table = RuleTable::compile(cfg.rules).expect("table compiles");
        let (reply_tx, replies) = mpsc::unbounded_channel();
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            table,
            &cfg.settings,
            Arc::new(CaptureSink { tx: reply_tx }),
            Arc::new(CaptureObserver { tx: signal_tx }),
            Arc::new(SeededRandom::new(11)),
        );
        Harness {
            dispatcher,
            replies,
            signals,
        }
    }

    async fn recv_reply(rx: &mut mpsc::UnboundedReceiver<(String, String)>) -> (String, String) {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("reply within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn disabled_dispatcher_ignores_messages() {
        let h = harness(TEST_CONFIG);
        h.dispatcher.handle("alice", "hello").await;
        assert_eq!(h.dispatcher.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn reply_flows_through_scheduler_to_sink() {
        let mut h = harness(TEST_CONFIG);
        h.dispatcher.set_enabled(true).await;
        h.dispatcher.handle("alice", "123456").await;
        let (sender, text) = recv_reply(&mut h.replies).await;
        assert_eq!(sender, "alice");
        assert_eq!(text, "Accept the request");
    }

    #[tokio::test]
    async fn suppression_raises_signal_and_no_reply() {
        let mut h = harness(TEST_CONFIG);
        h.dispatcher.set_enabled(true).await;
        h.dispatcher.handle("bob", "ok, I am cheating").await;
        let (sender, category) = recv_reply(&mut h.signals).await;
        assert_eq!(sender, "bob");
        assert_eq!(category, "admission");
        assert!(h.replies.try_recv().is_err());
    }

    #[tokio::test]
    async fn blank_text_is_a_silent_noop() {
        let h = harness(TEST_CONFIG);
        h.dispatcher.set_enabled(true).await;
        h.dispatcher.handle("alice", "   ").await;
        assert_eq!(h.dispatcher.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn cooldown_denial_leaves_state_untouched() {
        let config = TEST_CONFIG.replace("cooldown_ms: 0", "cooldown_ms: 60000");
        let mut h = harness(&config);
        h.dispatcher.set_enabled(true).await;
        h.dispatcher.handle("alice", "first").await;
        h.dispatcher.handle("alice", "123456").await; // denied: inside the window

        let _ = recv_reply(&mut h.replies).await;
        assert!(h.replies.try_recv().is_err());

        // Only the first message counted; the code rule never ran.
        let state = h
            .dispatcher
            .store
            .get_or_create("alice", Instant::now())
            .await;
        let state = state.lock().await;
        assert_eq!(state.message_count, 1);
        assert!(state.flags.is_empty());
    }

    #[tokio::test]
    async fn disable_clears_sessions_and_restarts_fresh() {
        let mut h = harness(TEST_CONFIG);
        h.dispatcher.set_enabled(true).await;
        for _ in 0..3 {
            h.dispatcher.handle("alice", "hello again").await;
            let _ = recv_reply(&mut h.replies).await;
        }
        assert_eq!(h.dispatcher.active_sessions().await, 1);

        h.dispatcher.set_enabled(false).await;
        assert_eq!(h.dispatcher.active_sessions().await, 0);

        h.dispatcher.set_enabled(true).await;
        h.dispatcher.handle("alice", "back again").await;
        let _ = recv_reply(&mut h.replies).await;
        let state = h
            .dispatcher
            .store
            .get_or_create("alice", Instant::now())
            .await;
        assert_eq!(state.lock().await.message_count, 1);
    }

    #[tokio::test]
    async fn clear_operations_are_safe_without_entries() {
        let h = harness(TEST_CONFIG);
        h.dispatcher.clear_one("nobody").await;
        h.dispatcher.clear_all().await;
        assert_eq!(h.dispatcher.active_sessions().await, 0);
    }
}
