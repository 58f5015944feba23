use std::time::Instant;

use anyhow::{Context as _, Result, bail, ensure};
use regex::Regex;
use serde::Deserialize;

use crate::random::RandomSource;
use crate::state::{SessionFlag, SessionState};

/// One message as seen by the rule table: the raw text, the normalized
/// (lowercased, trimmed) text, and who sent it.
#[derive(Debug, Clone, Copy)]
pub struct MessageView<'a> {
    pub raw: &'a str,
    pub normalized: &'a str,
    pub sender: &'a str,
}

/// Declarative shape of one rule in the catalogue file.
///
/// Example YAML:
/// ```yaml
/// - category: code
///   priority: 85
///   trigger: { type: numeric-code }
///   sets_flags: [code_supplied]
///   responses: ["Accept the request", "Connecting now"]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub category: String,
    pub priority: i32,
    pub trigger: TriggerSpec,
    /// Extra state condition ANDed with the trigger.
    #[serde(default)]
    pub when: Option<StateCond>,
    /// Ordered refinements; the first matching case overrides the
    /// rule-level responses/flags/suppress.
    #[serde(default)]
    pub cases: Vec<CaseSpec>,
    #[serde(default)]
    pub responses: Vec<String>,
    /// Flags set whenever this rule produces an outcome.
    #[serde(default)]
    pub sets_flags: Vec<SessionFlag>,
    /// Match without replying; the dispatcher raises a signal instead.
    #[serde(default)]
    pub suppress: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TriggerSpec {
    /// Any of the keywords occurs as a substring of the normalized text.
    KeywordSet { any: Vec<String> },
    /// The normalized text equals one of the candidates exactly.
    ExactMatch { any: Vec<String> },
    /// The normalized text matches the pattern.
    Regex { pattern: String },
    /// The sender just sent a number: after stripping every non-digit
    /// character the remaining digit run is `min_digits..=max_digits` long.
    NumericCode {
        #[serde(default = "default_min_digits")]
        min_digits: usize,
        #[serde(default = "default_max_digits")]
        max_digits: usize,
    },
    /// Pure state condition, independent of the message text.
    StatePredicate {
        #[serde(flatten)]
        cond: StateCond,
    },
    /// Unconditional; reserved for the catch-all.
    Always,
}

const fn default_min_digits() -> usize {
    6
}

const fn default_max_digits() -> usize {
    10
}

/// Condition over the sender's running session state.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateCond {
    /// `message_count >= min_messages`.
    #[serde(default)]
    pub min_messages: Option<u32>,
    /// `message_count <= max_messages`.
    #[serde(default)]
    pub max_messages: Option<u32>,
    /// Whole minutes since the session started, inclusive lower bound.
    #[serde(default)]
    pub min_elapsed_minutes: Option<u64>,
    #[serde(default)]
    pub flag_set: Option<SessionFlag>,
    #[serde(default)]
    pub flag_unset: Option<SessionFlag>,
}

impl StateCond {
    fn matches(&self, state: &SessionState, now: Instant) -> bool {
        if let Some(min) = self.min_messages
            && state.message_count < min
        {
            return false;
        }
        if let Some(max) = self.max_messages
            && state.message_count > max
        {
            return false;
        }
        if let Some(min) = self.min_elapsed_minutes
            && state.elapsed_minutes(now) < min
        {
            return false;
        }
        if let Some(flag) = self.flag_set
            && !state.flags.contains(flag)
        {
            return false;
        }
        if let Some(flag) = self.flag_unset
            && state.flags.contains(flag)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaseSpec {
    #[serde(default)]
    pub when: Option<StateCond>,
    /// Keyword refinement on the normalized text (any-of).
    #[serde(default)]
    pub contains: Vec<String>,
    /// Empty means fall back to the rule-level responses.
    #[serde(default)]
    pub responses: Vec<String>,
    #[serde(default)]
    pub sets_flags: Vec<SessionFlag>,
    #[serde(default)]
    pub suppress: bool,
}

#[derive(Debug)]
enum Trigger {
    Keywords(Vec<String>),
    Exact(Vec<String>),
    Pattern(Regex),
    NumericCode { min_digits: usize, max_digits: usize },
    State(StateCond),
    Always,
}

/// One compiled, immutable classification rule.
#[derive(Debug)]
pub struct Rule {
    category: String,
    priority: i32,
    trigger: Trigger,
    when: Option<StateCond>,
    cases: Vec<CaseSpec>,
    responses: Vec<String>,
    sets_flags: Vec<SessionFlag>,
    suppress: bool,
}

impl Rule {
    fn compile(spec: RuleSpec) -> Result<Self> {
        let trigger = match spec.trigger {
            TriggerSpec::KeywordSet { any } => {
                ensure!(!any.is_empty(), "keyword-set trigger needs at least one keyword");
                Trigger::Keywords(any.into_iter().map(|k| k.to_lowercase()).collect())
            }
            TriggerSpec::ExactMatch { any } => {
                ensure!(!any.is_empty(), "exact-match trigger needs at least one candidate");
                Trigger::Exact(any.into_iter().map(|k| k.trim().to_lowercase()).collect())
            }
            TriggerSpec::Regex { pattern } => {
                let re = Regex::new(&pattern)
                    .with_context(|| format!("invalid trigger pattern `{pattern}`"))?;
                Trigger::Pattern(re)
            }
            TriggerSpec::NumericCode {
                min_digits,
                max_digits,
            } => {
                ensure!(
                    min_digits >= 1 && min_digits <= max_digits,
                    "numeric-code digit bounds are inverted"
                );
                Trigger::NumericCode {
                    min_digits,
                    max_digits,
                }
            }
            TriggerSpec::StatePredicate { cond } => Trigger::State(cond),
            TriggerSpec::Always => Trigger::Always,
        };

        Ok(Self {
            category: spec.category,
            priority: spec.priority,
            trigger,
            when: spec.when,
            cases: spec.cases,
            responses: spec.responses,
            sets_flags: spec.sets_flags,
            suppress: spec.suppress,
        })
    }

    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Trigger predicate plus the optional rule-level state condition.
    #[must_use]
    pub fn matches(&self, msg: &MessageView<'_>, state: &SessionState, now: Instant) -> bool {
        if let Some(cond) = &self.when
            && !cond.matches(state, now)
        {
            return false;
        }
        match &self.trigger {
            Trigger::Keywords(keywords) => contains_any(msg.normalized, keywords),
            Trigger::Exact(candidates) => candidates.iter().any(|c| c == msg.normalized),
            Trigger::Pattern(re) => re.is_match(msg.normalized),
            Trigger::NumericCode {
                min_digits,
                max_digits,
            } => {
                let digits = msg.raw.chars().filter(char::is_ascii_digit).count();
                digits >= *min_digits && digits <= *max_digits
            }
            Trigger::State(cond) => cond.matches(state, now),
            Trigger::Always => true,
        }
    }

    /// Produce the rule's outcome, mutating flags as configured.
    /// `Ok(None)` means suppress-and-signal.
    pub fn respond(
        &self,
        msg: &MessageView<'_>,
        state: &mut SessionState,
        now: Instant,
        random: &dyn RandomSource,
    ) -> Result<Option<String>> {
        for flag in &self.sets_flags {
            state.flags.insert(*flag);
        }

        if let Some(case) = self.matching_case(msg, state, now) {
            // Clone out of self so the &mut state borrow below is clean.
            let sets = case.sets_flags.clone();
            let suppress = case.suppress;
            let responses = if case.responses.is_empty() {
                self.responses.clone()
            } else {
                case.responses.clone()
            };
            for flag in sets {
                state.flags.insert(flag);
            }
            if suppress {
                return Ok(None);
            }
            return self.pick_response(&responses, msg, state, now, random).map(Some);
        }

        if self.suppress {
            return Ok(None);
        }
        self.pick_response(&self.responses, msg, state, now, random)
            .map(Some)
    }

    fn matching_case(
        &self,
        msg: &MessageView<'_>,
        state: &SessionState,
        now: Instant,
    ) -> Option<&CaseSpec> {
        self.cases.iter().find(|case| {
            if !case.contains.is_empty() && !contains_any(msg.normalized, &case.contains) {
                return false;
            }
            case.when
                .as_ref()
                .is_none_or(|cond| cond.matches(state, now))
        })
    }

    fn pick_response(
        &self,
        responses: &[String],
        msg: &MessageView<'_>,
        state: &SessionState,
        now: Instant,
        random: &dyn RandomSource,
    ) -> Result<String> {
        ensure!(
            !responses.is_empty(),
            "rule `{}` matched but has no responses configured",
            self.category
        );
        let template = &responses[random.pick(responses.len())];
        render(template, msg.sender, state, now)
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| haystack.contains(n.as_str()))
}

/// Expand `{remaining}`, `{elapsed}` and `{sender}` placeholders.
/// Unknown placeholders are a fault, isolated per rule by the engine.
fn render(template: &str, sender: &str, state: &SessionState, now: Instant) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push('{');
            rest = after;
            continue;
        };
        match &after[..end] {
            "remaining" => out.push_str(&state.remaining_minutes(now).to_string()),
            "elapsed" => out.push_str(&state.elapsed_minutes(now).to_string()),
            "sender" => out.push_str(sender),
            other => bail!("unknown placeholder `{{{other}}}`"),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// The ordered rule table: built once at startup, immutable thereafter.
///
/// Sort key is `(priority desc, declaration order asc)`; the table refuses to
/// build without an unconditional catch-all at the lowest priority, so every
/// message is guaranteed an outcome.
#[derive(Debug)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn compile(specs: Vec<RuleSpec>) -> Result<Self> {
        ensure!(!specs.is_empty(), "rule catalogue is empty");

        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            let category = spec.category.clone();
            let rule = Rule::compile(spec)
                .with_context(|| format!("compiling rule `{category}`"))?;
            rules.push(rule);
        }

        // Stable sort keeps declaration order within equal priorities.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let last = rules.last().context("rule catalogue is empty")?;
        let is_catch_all = matches!(last.trigger, Trigger::Always)
            && last.when.is_none()
            && !last.suppress
            && !last.responses.is_empty();
        ensure!(
            is_catch_all,
            "catalogue must end with an unconditional catch-all rule \
             (always trigger, no `when`, non-suppressing, with responses); \
             lowest-priority rule is `{}`",
            last.category
        );

        Ok(Self { rules })
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
