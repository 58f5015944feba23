//! Rule-driven auto-reply engine for bounded interactive chat sessions.
//!
//! Classifies short messages from named senders against an ordered,
//! first-match-wins rule table, tracks per-sender session state (message
//! counters, behavioral flags, a countdown), and paces outgoing replies with
//! a cooldown gate plus a randomized humanizing delay.
//!
//! The engine stays transport-agnostic: the host feeds normalized
//! `(sender, text)` pairs into [`Dispatcher::handle`] and provides a
//! [`DeliverySink`] for outgoing replies and a [`SuppressionObserver`] for
//! matched-but-silenced messages.

pub mod config;
pub mod cooldown;
pub mod dispatcher;
pub mod engine;
pub mod random;
pub mod rules;
pub mod scheduler;
pub mod state;

pub use config::{EngineConfig, Settings};
pub use cooldown::CooldownGate;
pub use dispatcher::{Dispatcher, SuppressionObserver};
pub use engine::{MatchEngine, Outcome};
pub use random::{RandomSource, SeededRandom, ThreadRandom};
pub use rules::{MessageView, Rule, RuleSpec, RuleTable};
pub use scheduler::{DeliverySink, ReplyScheduler};
pub use state::{FlagSet, SessionFlag, SessionState, StateStore};
