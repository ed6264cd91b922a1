//! Multi-action detection.
//!
//! Decides whether a request asks for more than one side effect. The pattern
//! detector is a heuristic over raw text; it will misread some requests and is
//! kept behind [`MultiActionDetector`] so enforcement can be tested with
//! [`FixedDetector`] instead.

use regex::Regex;

use crate::error::{OrchestrationError, Result};

const COORDINATOR: &str = r"(?i)\b(?:and|then|also|both|each|all)\b";
const RECIPIENT: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";
const REPEATED_ACTIONS: [&str; 2] = [
    r"(?i)\b(?:create|schedule|book|set up)\s+(?:(?:a|an|another)\s+)?(?:meeting|event|call|appointment)\b",
    r"(?i)\bsend\s+(?:(?:a|an|another)\s+)?(?:email|message|invite)\b",
];

/// What a detector found in a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// At most one action implied
    Single,
    /// Coordinating language with several distinct recipients, lowercased in order of appearance
    MultiRecipient(Vec<String>),
    /// One action phrase repeated; every occurrence in order
    RepeatedAction(Vec<String>),
}

impl Detection {
    /// Whether more than one action was implied
    pub fn is_multi_action(&self) -> bool {
        !matches!(self, Self::Single)
    }

    /// Detected targets, used as a hint in redirects
    pub fn targets(&self) -> &[String] {
        match self {
            Self::Single => &[],
            Self::MultiRecipient(targets) | Self::RepeatedAction(targets) => targets,
        }
    }
}

/// Classifies request text
pub trait MultiActionDetector: Send + Sync {
    /// Inspect `request`
    fn detect(&self, request: &str) -> Detection;
}

/// Regex heuristic over the request text
#[derive(Debug, Clone)]
pub struct PatternDetector {
    coordinator: Regex,
    recipient: Regex,
    repeated: Vec<Regex>,
}

impl PatternDetector {
    /// Detector with the built-in patterns
    pub fn new() -> Result<Self> {
        let compile = |p: &str| Regex::new(p).map_err(|e| OrchestrationError::Config(e.to_string()));
        Ok(Self {
            coordinator: compile(COORDINATOR)?,
            recipient: compile(RECIPIENT)?,
            repeated: REPEATED_ACTIONS.iter().map(|p| compile(p)).collect::<Result<_>>()?,
        })
    }

    /// Add domain-specific repeated-action patterns
    #[must_use]
    pub fn with_patterns(mut self, patterns: impl IntoIterator<Item = Regex>) -> Self {
        self.repeated.extend(patterns);
        self
    }

    fn recipients(&self, request: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for m in self.recipient.find_iter(request) {
            let address = m.as_str().to_lowercase();
            if !found.contains(&address) {
                found.push(address);
            }
        }
        found
    }
}

impl MultiActionDetector for PatternDetector {
    fn detect(&self, request: &str) -> Detection {
        if self.coordinator.is_match(request) {
            let recipients = self.recipients(request);
            if recipients.len() > 1 {
                return Detection::MultiRecipient(recipients);
            }
        }

        for pattern in &self.repeated {
            let occurrences: Vec<String> = pattern.find_iter(request).map(|m| m.as_str().to_string()).collect();
            if occurrences.len() > 1 {
                return Detection::RepeatedAction(occurrences);
            }
        }

        Detection::Single
    }
}

/// Detector that always returns the same answer
#[derive(Debug, Clone)]
pub struct FixedDetector(pub Detection);

impl MultiActionDetector for FixedDetector {
    fn detect(&self, _request: &str) -> Detection {
        self.0.clone()
    }
}
