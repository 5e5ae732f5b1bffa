use std::fmt;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

/// Upper bound on the compiled program of a user-supplied pattern.
const REGEX_SIZE_LIMIT: usize = 1 << 20;
const REGEX_DFA_SIZE_LIMIT: usize = 2 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Contains,
    Regex,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contains => write!(f, "contains"),
            Self::Regex => write!(f, "regex"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    pub mode: MatchMode,
    pub pattern: String,
}

impl MatchRule {
    pub fn contains(pattern: impl Into<String>) -> Self {
        Self {
            mode: MatchMode::Contains,
            pattern: pattern.into(),
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            mode: MatchMode::Regex,
            pattern: pattern.into(),
        }
    }

    /// Compile-checks a regex rule. Contains rules always validate.
    pub fn validate(&self) -> Result<(), String> {
        match self.mode {
            MatchMode::Contains => Ok(()),
            MatchMode::Regex => build_regex(&self.pattern).map(|_| ()),
        }
    }

    pub fn evaluate(&self, body: &str) -> MatchResult {
        let (matched, detail) = match self.mode {
            MatchMode::Contains => {
                if body.contains(self.pattern.as_str()) {
                    (true, format!("Found \"{}\"", self.pattern))
                } else {
                    (false, format!("\"{}\" not found in response body", self.pattern))
                }
            }
            MatchMode::Regex => match build_regex(&self.pattern) {
                Ok(re) => match re.find(body) {
                    Some(m) => (true, format!("Pattern matched at byte {}", m.start())),
                    None => (false, "Pattern did not match response body".to_string()),
                },
                Err(e) => (false, e),
            },
        };

        MatchResult {
            rule: self.clone(),
            matched,
            detail,
        }
    }
}

fn build_regex(pattern: &str) -> Result<regex::Regex, String> {
    RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .dfa_size_limit(REGEX_DFA_SIZE_LIMIT)
        .build()
        .map_err(|e| match e {
            regex::Error::CompiledTooBig(limit) => {
                format!("Regex exceeds complexity limit of {} bytes", limit)
            }
            other => format!("Invalid regex: {}", other),
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub rule: MatchRule,
    pub matched: bool,
    pub detail: String,
}

/// An ordered set of content rules applied to a response body.
///
/// Use [`MatchRules::none`] when a check has no content expectations; it
/// always passes the content stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchRules(Vec<MatchRule>);

impl MatchRules {
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn new(rules: Vec<MatchRule>) -> Self {
        Self(rules)
    }

    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatchRule> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<MatchRule> {
        self.0
    }

    pub fn evaluate(&self, body: &str) -> Vec<MatchResult> {
        self.0.iter().map(|rule| rule.evaluate(body)).collect()
    }
}

impl From<Vec<MatchRule>> for MatchRules {
    fn from(rules: Vec<MatchRule>) -> Self {
        Self(rules)
    }
}

pub fn all_matched(results: &[MatchResult]) -> bool {
    results.iter().all(|r| r.matched)
}
