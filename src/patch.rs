use hex_buffer_serde::{Hex as _, HexForm};
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::pattern::BytePattern;

/// Definition document as stored on disk, before validation.
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct RawDocument {
    #[serde(default)]
    pub builds: Vec<RawBuild>,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct RawBuild {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub signature: Option<RawSignature>,
    #[serde(default)]
    pub patches: Vec<RawPatch>,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct RawSignature {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub range_start: Option<usize>,
    #[serde(default)]
    pub range_end: Option<usize>,
}

#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Addressing {
    Pattern,
    Offset,
}

impl Default for Addressing {
    fn default() -> Self {
        Addressing::Pattern
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct RawPatch {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub addressing: Addressing,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub range_start: Option<usize>,
    #[serde(default)]
    pub range_end: Option<usize>,
    #[serde(default, with = "HexForm::<Vec<u8>>")]
    pub replacement: Vec<u8>,
    #[serde(default)]
    pub expected_occurrences: Option<usize>,
}

/// Window of start offsets a pattern may be found at. `end` of `None` means
/// the end of the file.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SearchRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl SearchRange {
    pub fn whole() -> Self {
        SearchRange::default()
    }

    /// Resolve against a buffer of `len` bytes.
    pub fn bounds(&self, len: usize) -> (usize, usize) {
        (self.start, self.end.map_or(len, |end| end.min(len)))
    }
}

/// Byte signature used to recognise a build. Never patched.
#[derive(Clone, PartialEq, Debug)]
pub struct Signature {
    pub pattern: BytePattern,
    pub range: SearchRange,
}

/// How a patch finds the bytes it rewrites.
#[derive(Clone, PartialEq, Debug)]
pub enum PatchTarget {
    Pattern {
        pattern: BytePattern,
        range: SearchRange,
        expected_occurrences: usize,
    },
    Offset(usize),
}

#[derive(Clone, PartialEq, Debug)]
pub struct Patch {
    pub description: String,
    pub target: PatchTarget,
    pub replacement: Vec<u8>,
}

impl Patch {
    /// Byte range rewritten by an offset patch. Pattern patches only know
    /// theirs after matching.
    pub fn fixed_region(&self) -> Option<Range<usize>> {
        match self.target {
            PatchTarget::Offset(offset) => {
                Some(offset..offset.saturating_add(self.replacement.len()))
            }
            PatchTarget::Pattern { .. } => None,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct GameBuild {
    pub id: String,
    pub signature: Signature,
    pub patches: Vec<Patch>,
}
