use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Named booleans the rule table reads and flips over the life of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionFlag {
    /// The sender has been asked to set up the remote-assist tool.
    ToolRequested,
    /// The sender has supplied a numeric access code.
    CodeSupplied,
    /// A leniency offer has already been made this session.
    LeniencyOffered,
    /// The alternate tool has already been suggested.
    AltToolSuggested,
    /// The backup tool has already been suggested.
    BackupToolSuggested,
}

impl SessionFlag {
    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Compact set of [`SessionFlag`]s.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlagSet(u8);

impl FlagSet {
    #[must_use]
    pub const fn contains(self, flag: SessionFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub const fn insert(&mut self, flag: SessionFlag) {
        self.0 |= flag.bit();
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Per-sender record of session progress.
///
/// One exists per sender once a message has passed the cooldown gate, and it
/// only ever goes away through [`StateStore::remove`] or
/// [`StateStore::clear_all`], never by timeout.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// First observed message for this sender; anchors the countdown.
    pub started_at: Instant,
    /// Messages processed (cooldown-suppressed messages do not count).
    pub message_count: u32,
    pub flags: FlagSet,
    /// Category of the most recently matched rule, for diagnostics.
    pub last_category: Option<String>,
    pub last_message_at: Option<Instant>,
    budget_minutes: u64,
}

impl SessionState {
    #[must_use]
    pub fn new(now: Instant, budget_minutes: u64) -> Self {
        Self {
            started_at: now,
            message_count: 0,
            flags: FlagSet::default(),
            last_category: None,
            last_message_at: None,
            budget_minutes,
        }
    }

    /// Whole minutes since the session started.
    #[must_use]
    pub fn elapsed_minutes(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.started_at).as_secs() / 60
    }

    /// Minutes left on the session budget, floored at 1 so late-session
    /// replies always show a non-zero countdown.
    #[must_use]
    pub fn remaining_minutes(&self, now: Instant) -> u64 {
        self.budget_minutes
            .saturating_sub(self.elapsed_minutes(now))
            .max(1)
    }
}

/// Concurrent registry of sender -> [`SessionState`].
///
/// Each state sits behind its own `Mutex` so two in-flight messages from the
/// same sender serialize on the whole read-modify-write, while different
/// senders never contend past the brief map access.
#[derive(Debug, Clone)]
pub struct StateStore {
    inner: Arc<RwLock<HashMap<String, Arc<Mutex<SessionState>>>>>,
    budget_minutes: u64,
}

impl StateStore {
    #[must_use]
    pub fn new(budget_minutes: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            budget_minutes,
        }
    }

    /// Fetch the sender's state, creating it anchored at `now` if absent.
    pub async fn get_or_create(&self, sender_id: &str, now: Instant) -> Arc<Mutex<SessionState>> {
        {
            let map = self.inner.read().await;
            if let Some(state) = map.get(sender_id) {
                return Arc::clone(state);
            }
        }
        let mut map = self.inner.write().await;
        // Re-check: another task may have created it between the locks.
        Arc::clone(map.entry(sender_id.to_owned()).or_insert_with(|| {
            debug!(sender = %sender_id, "Opening session");
            Arc::new(Mutex::new(SessionState::new(now, self.budget_minutes)))
        }))
    }

    pub async fn remove(&self, sender_id: &str) {
        self.inner.write().await.remove(sender_id);
    }

    pub async fn clear_all(&self) {
        self.inner.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
