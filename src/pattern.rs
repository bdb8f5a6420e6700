//! Byte pattern search with wildcard support.
//!
//! Patterns are written as hex tokens separated by whitespace, with `??`
//! (or a single `?`) standing for a byte that matches anything:
//! `"48 8B ?? 05"`. Tokens longer than two characters are read as runs of
//! two-character groups, so `"488B??05"` is the same pattern.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, InvalidPattern, Result};

/// A byte sequence where some positions may be wildcards.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BytePattern {
    bytes: Vec<Option<u8>>,
}

impl BytePattern {
    pub fn new(bytes: Vec<Option<u8>>) -> Self {
        BytePattern { bytes }
    }

    /// Pattern matching `bytes` exactly, no wildcards.
    pub fn exact(bytes: &[u8]) -> Self {
        BytePattern {
            bytes: bytes.iter().copied().map(Some).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn wildcards(&self) -> usize {
        self.bytes.iter().filter(|b| b.is_none()).count()
    }

    /// Whether the pattern matches `data` starting at `offset`.
    pub fn matches_at(&self, data: &[u8], offset: usize) -> bool {
        match offset.checked_add(self.bytes.len()) {
            Some(end) if end <= data.len() => self
                .bytes
                .iter()
                .zip(&data[offset..end])
                .all(|(p, b)| p.map_or(true, |p| p == *b)),
            _ => false,
        }
    }

    /// Every start offset in `[start, end)` where the pattern matches.
    ///
    /// A match may begin anywhere inside the window and only needs to fit
    /// inside `data`. `end` is clamped to the buffer length.
    pub fn find_all<'a>(&'a self, data: &'a [u8], start: usize, end: usize) -> Matches<'a> {
        Matches::new(self, data, start, end)
    }

    /// Shorthand for searching the whole buffer.
    pub fn find_in<'a>(&'a self, data: &'a [u8]) -> Matches<'a> {
        self.find_all(data, 0, data.len())
    }
}

impl FromStr for BytePattern {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let invalid = |reason: String| {
            InvalidPattern {
                text: text.to_string(),
                reason,
            }
            .fail()
        };

        let mut bytes = Vec::new();
        for token in text.split_whitespace() {
            if token == "?" {
                bytes.push(None);
                continue;
            }
            if token.len() % 2 != 0 {
                return invalid(format!("odd number of digits in '{}'", token));
            }
            let mut rest = token;
            while !rest.is_empty() {
                if !rest.is_char_boundary(2) {
                    return invalid(format!("invalid hex byte in '{}'", token));
                }
                let (group, tail) = rest.split_at(2);
                rest = tail;
                if group == "??" {
                    bytes.push(None);
                    continue;
                }
                // from_str_radix tolerates a sign, so check the digits first.
                if !group.bytes().all(|c| c.is_ascii_hexdigit()) {
                    return invalid(format!("invalid hex byte '{}'", group));
                }
                match u8::from_str_radix(group, 16) {
                    Ok(b) => bytes.push(Some(b)),
                    Err(_) => return invalid(format!("invalid hex byte '{}'", group)),
                }
            }
        }

        if bytes.is_empty() {
            return invalid("empty pattern".to_string());
        }

        Ok(BytePattern { bytes })
    }
}

impl fmt::Display for BytePattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, b) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match b {
                Some(b) => write!(f, "{:02X}", b)?,
                None => f.write_str("??")?,
            }
        }
        Ok(())
    }
}

impl Serialize for BytePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BytePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

/// Lazy iterator over the match offsets of a [`BytePattern`].
///
/// Holds nothing but its inputs and a cursor, so building a new one over the
/// same buffer restarts the search from scratch.
pub struct Matches<'a> {
    pattern: &'a BytePattern,
    data: &'a [u8],
    next: usize,
    end: usize,
}

impl<'a> Matches<'a> {
    fn new(pattern: &'a BytePattern, data: &'a [u8], start: usize, end: usize) -> Self {
        let end = if pattern.is_empty() || pattern.len() > data.len() {
            0
        } else {
            // Last start offset that still leaves room for the whole pattern.
            end.min(data.len() - pattern.len() + 1)
        };
        Matches {
            pattern,
            data,
            next: start,
            end,
        }
    }
}

impl<'a> Iterator for Matches<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.next < self.end {
            let offset = self.next;
            self.next += 1;
            if self.pattern.matches_at(self.data, offset) {
                return Some(offset);
            }
        }
        None
    }
}
