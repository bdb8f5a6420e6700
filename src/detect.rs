//! Build detection by signature.

use log::{debug, warn};
use std::ops::Range;

use crate::patch::{GameBuild, Signature};

/// A detected build and where its signature sits in the file.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Detected<'a> {
    pub build: &'a GameBuild,
    pub signature_offset: usize,
}

impl<'a> Detected<'a> {
    /// Bytes that identify the build. Patches must leave them alone.
    pub fn signature_region(&self) -> Range<usize> {
        self.signature_offset..self.signature_offset + self.build.signature.pattern.len()
    }
}

/// Offset of `signature` in `data`, if it occurs exactly once inside its range.
pub fn find_signature(signature: &Signature, data: &[u8]) -> Option<usize> {
    let (start, end) = signature.range.bounds(data.len());
    let mut matches = signature.pattern.find_all(data, start, end);
    match (matches.next(), matches.next()) {
        (Some(offset), None) => Some(offset),
        _ => None,
    }
}

pub fn signature_matches(signature: &Signature, data: &[u8]) -> bool {
    find_signature(signature, data).is_some()
}

/// Pick the single build whose signature identifies `data`.
///
/// Returns `None` when no build matches, and also when more than one does:
/// patching with the wrong build's definitions is worse than not patching.
pub fn detect<'a>(data: &[u8], builds: &'a [GameBuild]) -> Option<Detected<'a>> {
    let mut found: Option<Detected> = None;
    let mut candidates = 0;

    for build in builds {
        match find_signature(&build.signature, data) {
            Some(signature_offset) => {
                debug!(
                    "signature of build '{}' matches at {:#x}",
                    build.id, signature_offset
                );
                candidates += 1;
                if found.is_none() {
                    found = Some(Detected {
                        build,
                        signature_offset,
                    });
                }
            }
            None => debug!("signature of build '{}' does not match", build.id),
        }
    }

    match candidates {
        1 => found,
        0 => None,
        n => {
            warn!("{} build signatures match this file, refusing to pick one", n);
            None
        }
    }
}
