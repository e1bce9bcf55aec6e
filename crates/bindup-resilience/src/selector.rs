//! Selector candidates and element queries.
//!
//! One logical UI element is described by an ordered list of
//! [`SelectorCandidate`]s. Candidates are tried strictly in list order and
//! the first usable match wins; there is no scoring beyond position.
//!
//! String forms follow the Playwright conventions used in the suites:
//!
//! | Form                      | Kind        |
//! |---------------------------|-------------|
//! | `text=ブロックを追加`       | `Text`      |
//! | `text="保存"`              | `Text` (exact) |
//! | `role=button[name="Save"]` | `Role`      |
//! | `generated=メニュー`        | `Generated` |
//! | `//div[@id='x']`, `xpath=` | `Css` (XPath query) |
//! | anything else, `css=`     | `Css`       |

use crate::driver::{NamePattern, Query};
use crate::result::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How a candidate locates an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    /// CSS or XPath selector
    Css,
    /// Text content match
    Text,
    /// ARIA role (with optional accessible name)
    Role,
    /// Text synthesized from the term map
    Generated,
}

impl SelectorKind {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::Text => "text",
            Self::Role => "role",
            Self::Generated => "generated",
        }
    }
}

/// One way to find an element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectorCandidate {
    /// Candidate kind
    pub kind: SelectorKind,
    /// Selector text, text to match, or role expression
    pub value: String,
}

impl SelectorCandidate {
    /// Create a candidate
    #[must_use]
    pub fn new(kind: SelectorKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    /// CSS (or XPath) candidate
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::new(SelectorKind::Css, selector)
    }

    /// Text candidate
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(SelectorKind::Text, text)
    }

    /// Role candidate (`button` or `button[name="Save"]`)
    #[must_use]
    pub fn role(role: impl Into<String>) -> Self {
        Self::new(SelectorKind::Role, role)
    }

    /// Generated text candidate
    #[must_use]
    pub fn generated(text: impl Into<String>) -> Self {
        Self::new(SelectorKind::Generated, text)
    }

    /// Parse the prefixed string form
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("text=") {
            Self::text(rest)
        } else if let Some(rest) = raw.strip_prefix("role=") {
            Self::role(rest)
        } else if let Some(rest) = raw.strip_prefix("generated=") {
            Self::generated(rest)
        } else if let Some(rest) = raw.strip_prefix("css=") {
            Self::css(rest)
        } else {
            Self::css(raw)
        }
    }

    /// Map to the driver query. Pure; no page access.
    pub fn to_query(&self) -> EngineResult<Query> {
        match self.kind {
            SelectorKind::Css => Ok(css_or_xpath(&self.value)),
            SelectorKind::Text | SelectorKind::Generated => Ok(text_query(&self.value)),
            SelectorKind::Role => role_query(&self.value),
        }
    }
}

fn css_or_xpath(value: &str) -> Query {
    if let Some(xpath) = value.strip_prefix("xpath=") {
        Query::XPath(xpath.to_string())
    } else if value.starts_with("//") || value.starts_with("(//") {
        Query::XPath(value.to_string())
    } else {
        Query::Css(value.to_string())
    }
}

fn text_query(value: &str) -> Query {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        Query::Text {
            text: value[1..value.len() - 1].to_string(),
            exact: true,
        }
    } else {
        Query::text(value)
    }
}

fn role_query(value: &str) -> EngineResult<Query> {
    let (role, rest) = match value.split_once('[') {
        Some((role, rest)) => (role.trim(), Some(rest)),
        None => (value.trim(), None),
    };
    if role.is_empty() {
        return Err(EngineError::config(format!("empty role in {value:?}")));
    }

    let name = match rest {
        None => None,
        Some(rest) => {
            let inner = rest
                .strip_suffix(']')
                .and_then(|r| r.trim().strip_prefix("name="))
                .ok_or_else(|| EngineError::config(format!("malformed role selector {value:?}")))?;
            let name = inner.trim().trim_matches(|c| c == '"' || c == '\'');
            Some(NamePattern::literal(name)?)
        }
    };

    Ok(Query::Role {
        role: role.to_string(),
        name,
    })
}

impl std::fmt::Display for SelectorCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            SelectorKind::Css => f.write_str(&self.value),
            kind => write!(f, "{}={}", kind.as_str(), self.value),
        }
    }
}

impl FromStr for SelectorCandidate {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for SelectorCandidate {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// A resolution request: a label plus ordered candidates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementQuery {
    /// Human-readable label, also used for special-case routing
    pub description: String,
    /// First candidate
    pub primary: SelectorCandidate,
    /// Remaining candidates, in order
    pub fallbacks: Vec<SelectorCandidate>,
}

impl ElementQuery {
    /// Create a query with no fallbacks
    #[must_use]
    pub fn new(description: impl Into<String>, primary: impl Into<SelectorCandidate>) -> Self {
        Self {
            description: description.into(),
            primary: primary.into(),
            fallbacks: Vec::new(),
        }
    }

    /// Build from string forms
    #[must_use]
    pub fn from_strs(description: impl Into<String>, primary: &str, fallbacks: &[&str]) -> Self {
        Self {
            description: description.into(),
            primary: SelectorCandidate::parse(primary),
            fallbacks: fallbacks.iter().map(|s| SelectorCandidate::parse(s)).collect(),
        }
    }

    /// Append a fallback
    #[must_use]
    pub fn with_fallback(mut self, candidate: impl Into<SelectorCandidate>) -> Self {
        self.fallbacks.push(candidate.into());
        self
    }

    /// All candidates, primary first
    pub fn candidates(&self) -> impl Iterator<Item = &SelectorCandidate> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }

    /// Number of caller-supplied candidates
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        1 + self.fallbacks.len()
    }
}
