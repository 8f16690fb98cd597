//! OSC address pattern matching
//!
//! Patterns are `/`-delimited. A `*` segment matches exactly one address
//! segment; a `*` in last position additionally swallows any further trailing
//! segments ("this prefix plus anything"). Without the trailing wildcard the
//! segment counts must match exactly.

use crate::error::{Error, Result};

/// A parsed, validated address pattern
#[derive(Debug, Clone)]
pub struct AddressPattern {
    segments: Vec<String>,
    // Last segment is `*`: stands for one or more trailing segments
    trailing_wildcard: bool,
    raw: String,
}

impl AddressPattern {
    /// Parse a pattern. Patterns must start with `/` and contain no empty
    /// segments.
    pub fn parse(pattern: &str) -> Result<Self> {
        let Some(body) = pattern.strip_prefix('/') else {
            return Err(Error::InvalidPattern(pattern.to_string()));
        };
        if body.is_empty() {
            return Err(Error::InvalidPattern(pattern.to_string()));
        }
        let segments: Vec<String> = body.split('/').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(Error::InvalidPattern(pattern.to_string()));
        }
        let trailing_wildcard = segments.last().is_some_and(|s| s == "*");
        Ok(Self {
            segments,
            trailing_wildcard,
            raw: pattern.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Test an incoming address against this pattern
    pub fn matches(&self, address: &str) -> bool {
        let Some(body) = address.strip_prefix('/') else {
            return false;
        };
        let parts: Vec<&str> = body.split('/').collect();

        if self.trailing_wildcard {
            if parts.len() < self.segments.len() {
                return false;
            }
        } else if parts.len() != self.segments.len() {
            return false;
        }

        // With a trailing wildcard the zip stops at the pattern's length,
        // leaving the extra trailing segments to the wildcard.
        self.segments
            .iter()
            .zip(parts.iter())
            .all(|(segment, part)| segment == "*" || segment == part)
    }
}
