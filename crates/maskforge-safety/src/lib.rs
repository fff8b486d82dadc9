#![warn(missing_docs)]
//! # maskforge-safety
//!
//! ## Purpose
//! Coarse keyword prefilter for request text, plus the model-level safety
//! instruction layered on top of it.
//!
//! ## Responsibilities
//! - Hold the ordered lowercase blocklist.
//! - Produce a [`SafetyVerdict`] for any free-text field.
//! - Shape the user-facing rejection.
//!
//! ## Data flow
//! Route handler -> [`SafetyGate::check`] -> blocked: [`SafetyPolicy::rejection`]
//! is returned without touching storage or the backend; passed: the
//! orchestrator sends [`SafetyPolicy::instruction`] ahead of the user text.
//!
//! ## Security and privacy notes
//! The blocklist is not exhaustive. It stops obvious cases before any file is
//! written or any backend call is made; the instruction is a second layer,
//! not a replacement.

use maskforge_core::SafetyVerdict;

/// User-facing message for every keyword rejection.
pub const SAFETY_REJECTION_MESSAGE: &str = "This request is NSFW and cannot be processed.";

/// Instruction sent as the first content part of every generation request.
pub const DEFAULT_SAFETY_INSTRUCTION: &str = "You are an image generation and editing assistant. \
Before acting on a request, decide whether it asks for NSFW material: explicit sexual content, \
nudity, pornography, any sexualization of minors, sexual violence, or graphic fetish content. \
If it does, do not produce an image; reply in text that the request is NSFW and cannot be fulfilled. \
Also refuse, with a short text reply, any request depicting real public figures such as royalty, \
heads of state, governors, politicians, or celebrities. Otherwise, process the request normally.";

/// Built-in blocklist as `(token, category)` pairs, checked in order.
///
/// Entries must be lowercase.
pub const DEFAULT_BLOCKLIST: &[(&str, &str)] = &[
    ("nsfw", "sexual"),
    ("nude", "sexual"),
    ("nudity", "sexual"),
    ("naked", "sexual"),
    ("porn", "sexual"),
    ("hentai", "sexual"),
    ("explicit sex", "sexual"),
    ("topless", "sexual"),
    ("lingerie", "sexual"),
    ("undress", "sexual"),
    ("fetish", "sexual"),
    ("child abuse", "minors"),
    ("underage", "minors"),
    ("gore", "violence"),
    ("beheading", "violence"),
    ("dismember", "violence"),
];

/// One banned substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedToken {
    /// Lowercase substring.
    pub token: String,
    /// Coarse category label for diagnostics.
    pub category: String,
}

/// Ordered, case-insensitive substring blocklist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyGate {
    entries: Vec<BlockedToken>,
}

impl SafetyGate {
    /// Creates a gate from explicit entries. Tokens are lowercased and blank
    /// tokens are dropped.
    pub fn new(entries: impl IntoIterator<Item = BlockedToken>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .filter_map(|entry| {
                    let token = entry.token.trim().to_lowercase();
                    (!token.is_empty()).then_some(BlockedToken {
                        token,
                        category: entry.category,
                    })
                })
                .collect(),
        }
    }

    /// Appends operator-supplied tokens after the existing entries.
    pub fn with_extra_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for raw in tokens {
            let token = raw.as_ref().trim().to_lowercase();
            if !token.is_empty() && !self.entries.iter().any(|entry| entry.token == token) {
                self.entries.push(BlockedToken {
                    token,
                    category: "operator".to_string(),
                });
            }
        }
        self
    }

    /// Checks `text`; the first entry contained anywhere in it wins.
    pub fn check(&self, text: &str) -> SafetyVerdict {
        let lowered = text.to_lowercase();
        self.entries
            .iter()
            .find(|entry| lowered.contains(entry.token.as_str()))
            .map(|entry| SafetyVerdict::blocked(entry.token.clone()))
            .unwrap_or_else(SafetyVerdict::pass)
    }

    /// Category of a token returned by [`SafetyGate::check`].
    pub fn category_of(&self, token: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.token == token)
            .map(|entry| entry.category.as_str())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the gate has no entries and passes everything.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCKLIST.iter().map(|(token, category)| BlockedToken {
            token: (*token).to_string(),
            category: (*category).to_string(),
        }))
    }
}

/// Rejection body returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Fixed user-facing message.
    pub message: String,
    /// Matched token, only outside production.
    pub matched_token: Option<String>,
}

/// Gate plus instruction and disclosure settings.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    /// Keyword prefilter.
    pub gate: SafetyGate,
    /// Model-level instruction.
    pub instruction: String,
    /// Whether rejections disclose the matched token.
    pub expose_matched_token: bool,
}

impl SafetyPolicy {
    /// Policy with the built-in blocklist and instruction.
    pub fn new(expose_matched_token: bool) -> Self {
        Self {
            gate: SafetyGate::default(),
            instruction: DEFAULT_SAFETY_INSTRUCTION.to_string(),
            expose_matched_token,
        }
    }

    /// Checks one text field.
    pub fn check(&self, text: &str) -> SafetyVerdict {
        self.gate.check(text)
    }

    /// Builds the rejection for a blocked verdict, `None` when it passed.
    pub fn rejection(&self, verdict: &SafetyVerdict) -> Option<Rejection> {
        if !verdict.blocked {
            return None;
        }
        Some(Rejection {
            message: SAFETY_REJECTION_MESSAGE.to_string(),
            matched_token: if self.expose_matched_token {
                verdict.matched_token.clone()
            } else {
                None
            },
        })
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for keyword matching.

    use super::*;

    #[test]
    fn matches_substring_case_insensitively() {
        let gate = SafetyGate::default();
        let verdict = gate.check("Make the portrait NUDE please");
        assert!(verdict.blocked);
        assert_eq!(verdict.matched_token.as_deref(), Some("nude"));
        assert_eq!(gate.category_of("nude"), Some("sexual"));
    }

    #[test]
    fn first_entry_in_list_order_wins() {
        let gate = SafetyGate::default();
        let verdict = gate.check("gore and nudity");
        assert_eq!(verdict.matched_token.as_deref(), Some("nudity"));
    }

    #[test]
    fn clean_text_passes() {
        assert_eq!(
            SafetyGate::default().check("replace the sky with a sunset"),
            SafetyVerdict::pass()
        );
    }

    #[test]
    fn extra_tokens_are_normalized_and_deduplicated() {
        let gate = SafetyGate::new(Vec::new()).with_extra_tokens(["  Forbidden ", "", "forbidden"]);
        assert_eq!(gate.len(), 1);
        assert!(gate.check("a FORBIDDEN word").blocked);
    }

    #[test]
    fn production_policy_hides_matched_token() {
        let policy = SafetyPolicy::new(false);
        let verdict = policy.check("porn");
        let rejection = policy.rejection(&verdict).expect("blocked verdict rejects");
        assert_eq!(rejection.message, SAFETY_REJECTION_MESSAGE);
        assert_eq!(rejection.matched_token, None);
        assert!(policy.rejection(&SafetyVerdict::pass()).is_none());
    }
}
