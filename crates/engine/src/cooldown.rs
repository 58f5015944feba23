use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-sender minimum-interval gate.
///
/// Admission stamps the sender immediately, so the gate rate-limits
/// processing attempts, not just successful replies: a message whose outcome
/// ends up suppressed still holds the window closed. Deliberate, inherited
/// behavior.
#[derive(Debug)]
pub struct CooldownGate {
    interval: Duration,
    last_admitted: Mutex<HashMap<String, Instant>>,
}

impl CooldownGate {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_admitted: Mutex::new(HashMap::new()),
        }
    }

    /// `true` admits the message and stamps `now`; `false` denies it and
    /// changes nothing. Senders with no prior entry are always admitted.
    pub fn try_admit(&self, sender_id: &str, now: Instant) -> bool {
        let mut map = self
            .last_admitted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(last) = map.get(sender_id)
            && now.saturating_duration_since(*last) < self.interval
        {
            return false;
        }
        map.insert(sender_id.to_owned(), now);
        true
    }
}
