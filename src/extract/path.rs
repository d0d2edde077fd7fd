//! Field path parsing and evaluation
//!
//! Accepted forms: `a.b.c`, `a[0]`, `a[*]`, `a['key.with.dots']`, plus the jsonpath
//! wrappers `{$.a}`, `$.a` and `.a` that kubectl users tend to write.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid field path '{path}' at offset {offset}: {message}")]
pub struct PathParseError {
    pub path: String,
    pub offset: usize,
    pub message: String,
}

/// A parsed field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    source: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, PathParseError> {
        let segments = Parser::new(path).parse()?;
        Ok(Self {
            source: path.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Every value the path selects, in document order
    pub fn select<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match (segment, value) {
                    (Segment::Key(key), Value::Object(map)) => next.extend(map.get(key)),
                    (Segment::Index(i), Value::Array(items)) => next.extend(items.get(*i)),
                    (Segment::Wildcard, Value::Array(items)) => next.extend(items.iter()),
                    (Segment::Wildcard, Value::Object(map)) => next.extend(map.values()),
                    _ => {}
                }
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for FieldPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

struct Parser<'a> {
    path: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(path: &'a str) -> Self {
        Self {
            path,
            chars: path.char_indices().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> PathParseError {
        let offset = self
            .chars
            .get(self.pos)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.path.len());
        PathParseError {
            path: self.path.to_string(),
            offset,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn expect(&mut self, expected: char) -> Result<(), PathParseError> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => {
                self.pos -= 1;
                Err(self.error(format!("expected '{}', found '{}'", expected, c)))
            }
            None => Err(self.error(format!("expected '{}', found end of path", expected))),
        }
    }

    /// Drop surrounding whitespace and the `{...}` / `$` / leading `.` wrappers.
    fn strip_wrappers(&mut self) -> Result<usize, PathParseError> {
        let mut end = self.chars.len();
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        while end > self.pos && self.chars[end - 1].1.is_whitespace() {
            end -= 1;
        }

        if self.peek() == Some('{') {
            if end == self.pos + 1 || self.chars[end - 1].1 != '}' {
                return Err(self.error("unbalanced '{'"));
            }
            self.pos += 1;
            end -= 1;
        }
        if self.peek() == Some('$') {
            self.pos += 1;
        }
        if self.peek() == Some('.') {
            self.pos += 1;
        }
        Ok(end)
    }

    fn parse(mut self) -> Result<Vec<Segment>, PathParseError> {
        let end = self.strip_wrappers()?;
        self.chars.truncate(end);

        let mut segments = Vec::new();
        let mut expect_key = true;
        while let Some(c) = self.peek() {
            match c {
                '[' => {
                    segments.push(self.bracket()?);
                    expect_key = false;
                }
                '.' if !expect_key => {
                    self.pos += 1;
                    expect_key = true;
                    if matches!(self.peek(), None | Some('.')) {
                        return Err(self.error("empty path segment"));
                    }
                }
                '.' => return Err(self.error("empty path segment")),
                _ if expect_key => {
                    segments.push(self.key()?);
                    expect_key = false;
                }
                other => return Err(self.error(format!("unexpected '{}'", other))),
            }
        }
        Ok(segments)
    }

    fn key(&mut self) -> Result<Segment, PathParseError> {
        let mut key = String::new();
        while let Some(c) = self.peek() {
            if c == '.' || c == '[' {
                break;
            }
            if c == ']' || c == '\'' || c == '"' {
                return Err(self.error(format!("unexpected '{}' in key", c)));
            }
            key.push(c);
            self.pos += 1;
        }
        if key == "*" {
            return Ok(Segment::Wildcard);
        }
        Ok(Segment::Key(key))
    }

    fn bracket(&mut self) -> Result<Segment, PathParseError> {
        self.expect('[')?;
        let segment = match self.peek() {
            Some('*') => {
                self.pos += 1;
                Segment::Wildcard
            }
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                let mut key = String::new();
                loop {
                    match self.bump() {
                        Some(c) if c == quote => break,
                        Some(c) => key.push(c),
                        None => return Err(self.error("unterminated quoted key")),
                    }
                }
                Segment::Key(key)
            }
            Some(c) if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(c) = self.peek().filter(char::is_ascii_digit) {
                    digits.push(c);
                    self.pos += 1;
                }
                let index = digits
                    .parse()
                    .map_err(|_| self.error("array index out of range"))?;
                Segment::Index(index)
            }
            Some(c) => return Err(self.error(format!("unexpected '{}' in brackets", c))),
            None => return Err(self.error("unterminated '['")),
        };
        self.expect(']')?;
        Ok(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(path: &str) -> Vec<Segment> {
        FieldPath::parse(path).unwrap().segments().to_vec()
    }

    fn key(k: &str) -> Segment {
        Segment::Key(k.to_string())
    }

    #[test]
    fn test_dotted_and_bracketed_paths() {
        assert_eq!(
            segments("status.policy.proxy-statistics[*].location"),
            vec![
                key("status"),
                key("policy"),
                key("proxy-statistics"),
                Segment::Wildcard,
                key("location")
            ]
        );
        assert_eq!(
            segments("items[2]['app.kubernetes.io/name']"),
            vec![key("items"), Segment::Index(2), key("app.kubernetes.io/name")]
        );
    }

    #[test]
    fn test_jsonpath_wrappers_are_equivalent() {
        let plain = segments("Type");
        assert_eq!(segments("{$.Type}"), plain);
        assert_eq!(segments("$.Type"), plain);
        assert_eq!(segments(".Type"), plain);
        assert_eq!(segments(" {.Type} "), plain);
    }

    #[test]
    fn test_root_level_wildcard() {
        assert_eq!(
            segments("[*].status"),
            vec![Segment::Wildcard, key("status")]
        );
        assert_eq!(segments("$"), Vec::<Segment>::new());
    }

    #[test]
    fn test_parse_errors_carry_offset() {
        let err = FieldPath::parse("a..b").unwrap_err();
        assert_eq!(err.offset, 2);

        assert!(FieldPath::parse("a[").is_err());
        assert!(FieldPath::parse("a[x]").is_err());
        assert!(FieldPath::parse("a['open").is_err());
        assert!(FieldPath::parse("{$.a").is_err());
        assert!(FieldPath::parse("a[0]b").is_err());
    }

    #[test]
    fn test_select_missing_branch_is_empty() {
        let value: Value = serde_json::json!({"a": {"b": [1, 2]}});
        let path = FieldPath::parse("a.c[*]").unwrap();
        assert!(path.select(&value).is_empty());

        let path = FieldPath::parse("a.b[5]").unwrap();
        assert!(path.select(&value).is_empty());
    }
}
