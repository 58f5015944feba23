use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::random::RandomSource;
use crate::rules::{MessageView, RuleTable};
use crate::state::SessionState;

/// Result of evaluating one message against the rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send this text back to the sender.
    Reply(String),
    /// Match recognized, no reply; the dispatcher raises a signal.
    Suppressed { category: String },
    /// Defensive fallback only: a valid catalogue ends in a catch-all,
    /// so in practice every message produces one of the above.
    NoMatch,
}

/// Evaluates messages against the sorted rule table, first match wins.
pub struct MatchEngine {
    table: RuleTable,
    random: Arc<dyn RandomSource>,
}

impl MatchEngine {
    #[must_use]
    pub fn new(table: RuleTable, random: Arc<dyn RandomSource>) -> Self {
        Self { table, random }
    }

    #[must_use]
    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    /// Walk the table in priority order and return the first rule's outcome.
    ///
    /// A single misbehaving rule is logged under its category and skipped;
    /// the rest of the table still gets its chance.
    pub fn evaluate(
        &self,
        sender_id: &str,
        raw: &str,
        state: &mut SessionState,
        now: Instant,
    ) -> Outcome {
        let normalized = raw.trim().to_lowercase();
        let msg = MessageView {
            raw,
            normalized: &normalized,
            sender: sender_id,
        };

        for rule in self.table.rules() {
            if !rule.matches(&msg, state, now) {
                continue;
            }
            match rule.respond(&msg, state, now, self.random.as_ref()) {
                Ok(Some(text)) => {
                    state.last_category = Some(rule.category().to_owned());
                    info!(
                        sender = %sender_id,
                        category = %rule.category(),
                        reply = %text,
                        "Rule matched"
                    );
                    return Outcome::Reply(text);
                }
                Ok(None) => {
                    state.last_category = Some(rule.category().to_owned());
                    info!(
                        sender = %sender_id,
                        category = %rule.category(),
                        "Rule matched, reply suppressed"
                    );
                    return Outcome::Suppressed {
                        category: rule.category().to_owned(),
                    };
                }
                Err(e) => {
                    warn!(
                        sender = %sender_id,
                        category = %rule.category(),
                        error = %e,
                        "Rule responder failed, continuing down the table"
                    );
                }
            }
        }

        Outcome::NoMatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeededRandom;
    use crate::rules::RuleSpec;
    use crate::state::SessionFlag;

    fn engine_from_yaml(yaml: &str, seed: u64) -> MatchEngine {
        let specs: Vec<RuleSpec> = serde_yaml::from_str(yaml).expect("valid rule YAML");
        let table = RuleTable::compile(specs).expect("table compiles");
        MatchEngine::new(table, Arc::new(SeededRandom::new(seed)))
    }

    const SMALL_CATALOGUE: &str = r#"
- category: admission
  priority: 95
  trigger: { type: keyword-set, any: ["i am cheating", "i use hacks"] }
  suppress: true
- category: code
  priority: 85
  trigger: { type: numeric-code }
  sets_flags: [code_supplied]
  responses: ["Accept the request", "Connecting now"]
- category: greeting
  priority: 80
  trigger: { type: keyword-set, any: ["hello", "hi there"] }
  when: { max_messages: 3 }
  responses: ["Hello, the session timer is running"]
- category: catchall
  priority: 10
  trigger: { type: always }
  cases:
    - when: { max_messages: 1 }
      responses: ["This is a screening session, you have {remaining} minutes"]
    - when: { min_messages: 9, flag_unset: leniency_offered }
      sets_flags: [leniency_offered]
      responses: ["Admitting it reduces the penalty"]
  responses: ["Still waiting", "Waiting on the assist tool"]
"#;

    fn fresh_state() -> SessionState {
        SessionState::new(Instant::now(), 7)
    }

    #[test]
    fn every_message_gets_an_outcome() {
        let engine = engine_from_yaml(SMALL_CATALOGUE, 1);
        let mut state = fresh_state();
        let now = state.started_at;
        for text in ["hello", "???", "unrelated rambling", "123456", "i use hacks"] {
            state.message_count += 1;
            let outcome = engine.evaluate("alice", text, &mut state, now);
            assert_ne!(outcome, Outcome::NoMatch, "input {text:?} fell through");
        }
    }

    #[test]
    fn seeded_evaluation_is_deterministic() {
        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let engine = engine_from_yaml(SMALL_CATALOGUE, 99);
            let mut state = fresh_state();
            let now = state.started_at;
            let run: Vec<Outcome> = ["hello", "still here", "123456", "anything else"]
                .iter()
                .map(|text| {
                    state.message_count += 1;
                    engine.evaluate("alice", text, &mut state, now)
                })
                .collect();
            outcomes.push(run);
        }
        assert_eq!(outcomes[0], outcomes[1]);
    }

    #[test]
    fn numeric_code_reply_sets_code_supplied() {
        let engine = engine_from_yaml(SMALL_CATALOGUE, 5);
        let mut state = fresh_state();
        let now = state.started_at;
        state.message_count = 1;
        let outcome = engine.evaluate("alice", "12-34-56-78", &mut state, now);
        assert!(matches!(outcome, Outcome::Reply(_)));
        assert!(state.flags.contains(SessionFlag::CodeSupplied));
        assert_eq!(state.last_category.as_deref(), Some("code"));
    }

    #[test]
    fn admission_is_suppressed_with_category() {
        let engine = engine_from_yaml(SMALL_CATALOGUE, 5);
        let mut state = fresh_state();
        let now = state.started_at;
        state.message_count = 1;
        let outcome = engine.evaluate("bob", "ok fine, I am cheating", &mut state, now);
        assert_eq!(
            outcome,
            Outcome::Suppressed {
                category: "admission".to_owned()
            }
        );
        assert_eq!(state.last_category.as_deref(), Some("admission"));
    }

    #[test]
    fn faulty_rule_does_not_mask_lower_priority_match() {
        let yaml = r#"
- category: broken
  priority: 90
  trigger: { type: always }
  responses: ["{bogus}"]
- category: catchall
  priority: 10
  trigger: { type: always }
  responses: ["Still waiting"]
"#;
        let engine = engine_from_yaml(yaml, 2);
        let mut state = fresh_state();
        let now = state.started_at;
        state.message_count = 1;
        let outcome = engine.evaluate("alice", "whatever", &mut state, now);
        assert_eq!(outcome, Outcome::Reply("Still waiting".to_owned()));
        assert_eq!(state.last_category.as_deref(), Some("catchall"));
    }

    #[test]
    fn catch_all_escalates_exactly_once() {
        let engine = engine_from_yaml(SMALL_CATALOGUE, 4);
        let mut state = fresh_state();
        let now = state.started_at;

        let mut escalations = 0;
        for _ in 0..12 {
            state.message_count += 1;
            let outcome = engine.evaluate("carol", "random filler text", &mut state, now);
            if outcome == Outcome::Reply("Admitting it reduces the penalty".to_owned()) {
                escalations += 1;
            }
        }
        assert_eq!(escalations, 1);
        assert!(state.flags.contains(SessionFlag::LeniencyOffered));
    }

    #[test]
    fn greeting_only_early_in_session() {
        let engine = engine_from_yaml(SMALL_CATALOGUE, 6);
        let mut state = fresh_state();
        let now = state.started_at;

        state.message_count = 2;
        let early = engine.evaluate("dave", "hello", &mut state, now);
        assert_eq!(
            early,
            Outcome::Reply("Hello, the session timer is running".to_owned())
        );

        state.message_count = 5;
        let late = engine.evaluate("dave", "hello", &mut state, now);
        assert_ne!(
            late,
            Outcome::Reply("Hello, the session timer is running".to_owned())
        );
    }
}
