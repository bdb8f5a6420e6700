//! Applying a build's patches to an in-memory file.

use log::debug;
use snafu::Snafu;
use std::ops::Range;

use crate::patch::{Patch, PatchTarget};

/// Why a single patch was not applied. Never fatal to the batch.
#[derive(Clone, PartialEq, Eq, Debug, Snafu)]
pub enum PatchFailure {
    #[snafu(display("pattern not found"))]
    NotFound,

    #[snafu(display("pattern found {} times, expected {}", found, expected))]
    Ambiguous { found: usize, expected: usize },

    #[snafu(display(
        "{} bytes at offset {:#x} exceed file size {:#x}",
        len,
        offset,
        size
    ))]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[snafu(display("region at offset {:#x} was already patched", offset))]
    Overlaps { offset: usize },

    #[snafu(display("region at offset {:#x} covers the build signature", offset))]
    TouchesSignature { offset: usize },
}

/// Outcome of one patch. On success holds the offsets that were rewritten.
#[derive(Clone, PartialEq, Debug)]
pub struct PatchResult<'a> {
    pub patch: &'a Patch,
    pub outcome: Result<Vec<usize>, PatchFailure>,
}

impl<'a> PatchResult<'a> {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Apply `patches` to `buffer` in order, one result per patch.
///
/// Each patch either writes all of its occurrences or nothing. Later patches
/// see the bytes written by earlier ones.
pub fn apply<'a>(buffer: &mut [u8], patches: &'a [Patch]) -> Vec<PatchResult<'a>> {
    apply_protected(buffer, patches, &[])
}

/// Like [`apply`], but any patch whose region intersects one of `protected`
/// fails with [`PatchFailure::TouchesSignature`] and writes nothing.
pub fn apply_protected<'a>(
    buffer: &mut [u8],
    patches: &'a [Patch],
    protected: &[Range<usize>],
) -> Vec<PatchResult<'a>> {
    let mut written: Vec<Range<usize>> = Vec::new();

    patches
        .iter()
        .map(|patch| {
            let outcome = locate(buffer, patch).and_then(|offsets| {
                let len = patch.replacement.len();
                if let Some(&offset) = offsets
                    .iter()
                    .find(|&&o| protected.iter().any(|p| intersects(&(o..o + len), p)))
                {
                    return Err(PatchFailure::TouchesSignature { offset });
                }
                check_untouched(&written, &offsets, len)?;
                for &offset in &offsets {
                    let region = offset..offset + len;
                    buffer[region.clone()].copy_from_slice(&patch.replacement);
                    written.push(region);
                }
                Ok(offsets)
            });

            match &outcome {
                Ok(offsets) => debug!("'{}' written at {:x?}", patch.description, offsets),
                Err(failure) => debug!("'{}' skipped: {}", patch.description, failure),
            }
            PatchResult { patch, outcome }
        })
        .collect()
}

/// Find where `patch` would write, without touching the buffer.
pub fn locate(buffer: &[u8], patch: &Patch) -> Result<Vec<usize>, PatchFailure> {
    let len = patch.replacement.len();
    match &patch.target {
        PatchTarget::Offset(offset) => {
            let offset = *offset;
            match offset.checked_add(len) {
                Some(end) if end <= buffer.len() => Ok(vec![offset]),
                _ => Err(PatchFailure::OutOfBounds {
                    offset,
                    len,
                    size: buffer.len(),
                }),
            }
        }
        PatchTarget::Pattern {
            pattern,
            range,
            expected_occurrences,
        } => {
            let expected = *expected_occurrences;
            let (start, end) = range.bounds(buffer.len());
            // One past the expected count is enough to tell "too many".
            let offsets: Vec<usize> = pattern
                .find_all(buffer, start, end)
                .take(expected + 1)
                .collect();

            if offsets.is_empty() {
                return Err(PatchFailure::NotFound);
            }
            if offsets.len() != expected {
                let found = if offsets.len() > expected {
                    offsets.len() + pattern.find_all(buffer, offsets[expected] + 1, end).count()
                } else {
                    offsets.len()
                };
                return Err(PatchFailure::Ambiguous { found, expected });
            }
            if let Some(&offset) = offsets.iter().find(|&&o| o + len > buffer.len()) {
                return Err(PatchFailure::OutOfBounds {
                    offset,
                    len,
                    size: buffer.len(),
                });
            }
            Ok(offsets)
        }
    }
}

fn check_untouched(
    written: &[Range<usize>],
    offsets: &[usize],
    len: usize,
) -> Result<(), PatchFailure> {
    let mut claimed: Vec<Range<usize>> = Vec::with_capacity(offsets.len());
    for &offset in offsets {
        let region = offset..offset + len;
        if written
            .iter()
            .chain(&claimed)
            .any(|other| intersects(&region, other))
        {
            return Err(PatchFailure::Overlaps { offset });
        }
        claimed.push(region);
    }
    Ok(())
}

fn intersects(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}
