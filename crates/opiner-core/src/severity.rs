//! Opinion severity levels
//!
//! Severities are part of the public report format.
//! Only `must` failures affect the process exit status.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Enforcement strength of an opinion
///
/// Ordered so that `Must > Should`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Recommended practice - reported, never fails the run
    Should,

    /// Required practice - a failure makes the run exit non-zero
    Must,
}

impl Severity {
    /// Numeric weight used by reports (`must` = 2, `should` = 1)
    pub fn weight(&self) -> u8 {
        match self {
            Self::Must => 2,
            Self::Should => 1,
        }
    }

    /// Stable lowercase identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Must => "must",
            Self::Should => "should",
        }
    }

    /// Whether a failure at this severity fails the run
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Must)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "must" => Ok(Self::Must),
            "should" => Ok(Self::Should),
            other => Err(format!("unknown severity '{}', expected 'must' or 'should'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn must_outranks_should() {
        assert!(Severity::Must > Severity::Should);
        assert_eq!(Severity::Must.weight(), 2);
        assert_eq!(Severity::Should.weight(), 1);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("MUST".parse::<Severity>(), Ok(Severity::Must));
        assert_eq!(" should ".parse::<Severity>(), Ok(Severity::Should));
        assert!("could".parse::<Severity>().is_err());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Must).unwrap();
        assert_eq!(json, "\"must\"");
    }
}
