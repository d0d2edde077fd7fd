use regex::Regex;
use std::fmt;

use super::path::{FieldPath, PathParseError};
use super::extract_all;

/// What an extracted value has to look like
#[derive(Debug, Clone)]
pub enum Expectation {
    Equals(String),
    Contains(String),
    Matches(Regex),
}

impl Expectation {
    pub fn equals(value: impl Into<String>) -> Self {
        Self::Equals(value.into())
    }

    pub fn contains(value: impl Into<String>) -> Self {
        Self::Contains(value.into())
    }

    pub fn matches(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Matches(Regex::new(pattern)?))
    }

    pub fn is_satisfied_by(&self, value: &str) -> bool {
        match self {
            Self::Equals(expected) => value == expected,
            Self::Contains(needle) => value.contains(needle.as_str()),
            Self::Matches(re) => re.is_match(value),
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(v) => write!(f, "== {:?}", v),
            Self::Contains(v) => write!(f, "contains {:?}", v),
            Self::Matches(re) => write!(f, "=~ /{}/", re.as_str()),
        }
    }
}

/// A path plus the expectation its value must meet
#[derive(Debug, Clone)]
pub struct LineFilter {
    path: FieldPath,
    expectation: Expectation,
}

impl LineFilter {
    pub fn new(path: FieldPath, expectation: Expectation) -> Self {
        Self { path, expectation }
    }

    /// Shorthand for the common "field equals literal" filter
    pub fn field_equals(path: &str, value: impl Into<String>) -> Result<Self, PathParseError> {
        Ok(Self::new(FieldPath::parse(path)?, Expectation::equals(value)))
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn expectation(&self) -> &Expectation {
        &self.expectation
    }

    /// The first selected value that meets the expectation. Lines that are not
    /// JSON or lack the field never match.
    pub fn matching_value(&self, line: &str) -> Option<String> {
        let values = extract_all(line, &self.path).ok()?;
        values
            .into_iter()
            .find(|value| self.expectation.is_satisfied_by(value))
    }

    pub fn matches(&self, line: &str) -> bool {
        self.matching_value(line).is_some()
    }
}

impl fmt::Display for LineFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.path, self.expectation)
    }
}
