//! Identifier patterns
//!
//! A pattern is four dot-separated segments, `NET.STA.LOC.CHA`, each of
//! which is a literal code or a shell-style wildcard (`*` any run, `?` one
//! character). Matching is case-sensitive.
//!
//! ```text
//! "UU.SRU..HHZ"   -> UU / SRU / <any> / HHZ
//! "UU.*.*.HH?"    -> UU / <any> / <any> / HH?
//! "UU"            -> UU / <any> / <any> / <any>
//! ```
//!
//! Empty or missing segments mean "don't care", never a literal empty code.

use crate::query::error::{PatternError, PatternResult};
use crate::storage::types::Identifier;
use regex::Regex;
use std::sync::OnceLock;
use wildmatch::WildMatch;

static VALID_SEGMENT: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// Characters allowed in one pattern segment, compiled once per process
fn segment_validator() -> Result<&'static Regex, &'static regex::Error> {
    VALID_SEGMENT
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-*?]*$"))
        .as_ref()
}

const SEGMENT_COUNT: usize = 4;

/// Matcher for one identifier segment
#[derive(Debug, Clone)]
pub enum SegmentMatcher {
    /// Matches every value
    Any,
    /// Matches one literal value
    Exact(String),
    /// Shell-style wildcard
    Glob { pattern: String, wild: WildMatch },
}

impl SegmentMatcher {
    fn parse(raw: &str, segment: &str, valid: &Regex) -> PatternResult<Self> {
        if !valid.is_match(segment) {
            return Err(PatternError::new(
                raw,
                format!(
                    "segment '{}' may only contain letters, digits, '_', '-', '*' and '?'",
                    segment
                ),
            ));
        }
        if segment.is_empty() || segment.chars().all(|c| c == '*') {
            return Ok(SegmentMatcher::Any);
        }
        if segment.contains(['*', '?']) {
            return Ok(SegmentMatcher::Glob {
                pattern: segment.to_string(),
                wild: WildMatch::new(segment),
            });
        }
        Ok(SegmentMatcher::Exact(segment.to_string()))
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            SegmentMatcher::Any => true,
            SegmentMatcher::Exact(code) => code == value,
            SegmentMatcher::Glob { wild, .. } => wild.matches(value),
        }
    }

    /// Literal value, when the segment has no wildcard
    pub fn exact(&self) -> Option<&str> {
        match self {
            SegmentMatcher::Exact(code) => Some(code),
            _ => None,
        }
    }
}

impl PartialEq for SegmentMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SegmentMatcher::Any, SegmentMatcher::Any) => true,
            (SegmentMatcher::Exact(a), SegmentMatcher::Exact(b)) => a == b,
            (SegmentMatcher::Glob { pattern: a, .. }, SegmentMatcher::Glob { pattern: b, .. }) => {
                a == b
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for SegmentMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentMatcher::Any => write!(f, "*"),
            SegmentMatcher::Exact(code) => write!(f, "{}", code),
            SegmentMatcher::Glob { pattern, .. } => write!(f, "{}", pattern),
        }
    }
}

/// Fixed-arity identifier pattern
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierPattern {
    segments: [SegmentMatcher; SEGMENT_COUNT],
}

impl IdentifierPattern {
    /// Parse a dotted pattern such as `UU.SRU..HH?`
    pub fn parse(raw: &str) -> PatternResult<Self> {
        let parts: Vec<&str> = raw.trim().split('.').collect();
        if parts.len() > SEGMENT_COUNT {
            return Err(PatternError::new(
                raw,
                format!(
                    "expected at most {} segments, found {}",
                    SEGMENT_COUNT,
                    parts.len()
                ),
            ));
        }

        let valid = segment_validator()
            .map_err(|e| PatternError::new(raw, format!("validator error: {}", e)))?;

        let mut segments: [SegmentMatcher; SEGMENT_COUNT] = Default::default();
        for (slot, part) in segments.iter_mut().zip(parts) {
            *slot = SegmentMatcher::parse(raw, part, valid)?;
        }
        Ok(Self { segments })
    }

    /// Build a pattern from optional per-segment codes
    pub fn from_parts(
        network: Option<&str>,
        station: Option<&str>,
        location: Option<&str>,
        channel: Option<&str>,
    ) -> PatternResult<Self> {
        let parts = [network, station, location, channel];
        for part in parts.iter().flatten() {
            if part.contains('.') {
                return Err(PatternError::new(*part, "segment may not contain '.'"));
            }
        }
        let joined = parts.map(|p| p.unwrap_or("")).join(".");
        Self::parse(&joined)
    }

    /// Pattern that matches every identifier
    pub fn any() -> Self {
        Self {
            segments: Default::default(),
        }
    }

    pub fn segments(&self) -> &[SegmentMatcher; SEGMENT_COUNT] {
        &self.segments
    }

    pub fn matches(&self, identifier: &Identifier) -> bool {
        self.segments
            .iter()
            .zip(identifier.segments())
            .all(|(matcher, value)| matcher.matches(value))
    }

    /// Whether this pattern can match exactly one identifier
    pub fn is_exact(&self) -> bool {
        self.segments.iter().all(|s| s.exact().is_some())
    }
}

impl Default for SegmentMatcher {
    fn default() -> Self {
        SegmentMatcher::Any
    }
}

impl std::str::FromStr for IdentifierPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for IdentifierPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [n, s, l, c] = &self.segments;
        write!(f, "{}.{}.{}.{}", n, s, l, c)
    }
}

impl From<&Identifier> for IdentifierPattern {
    fn from(id: &Identifier) -> Self {
        let exact = |v: &str| {
            if v.is_empty() {
                SegmentMatcher::Any
            } else {
                SegmentMatcher::Exact(v.to_string())
            }
        };
        Self {
            segments: [
                exact(&id.network),
                exact(&id.station),
                exact(&id.location),
                exact(&id.channel),
            ],
        }
    }
}
