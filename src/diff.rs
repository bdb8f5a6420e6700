//! Generating definitions by comparing an original and a patched executable.

use log::{debug, warn};
use snafu::ensure;

use crate::error::{malformed, Result, SizeMismatch};
use crate::patch::{Addressing, RawBuild, RawPatch, RawSignature};
use crate::pattern::BytePattern;

/// A run of bytes that differs between the two files.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct DiffSection {
    pub start: usize,
    pub original: Vec<u8>,
    pub patched: Vec<u8>,
}

impl DiffSection {
    pub fn end(&self) -> usize {
        self.start + self.original.len()
    }
}

/// Collect the differing sections of two equally sized buffers.
///
/// Runs of up to `bad_bytes` equal bytes between two differences are folded
/// into the surrounding section instead of splitting it.
pub fn sections(original: &[u8], patched: &[u8], bad_bytes: usize) -> Result<Vec<DiffSection>> {
    ensure!(
        original.len() == patched.len(),
        SizeMismatch {
            original: original.len(),
            patched: patched.len(),
        }
    );

    let mut sections: Vec<DiffSection> = Vec::new();
    for (i, (&before, &after)) in original.iter().zip(patched).enumerate() {
        if before == after {
            continue;
        }
        match sections.last_mut() {
            Some(section) if i - section.end() <= bad_bytes => {
                let from = section.end();
                section.original.extend_from_slice(&original[from..=i]);
                section.patched.extend_from_slice(&patched[from..=i]);
            }
            _ => {
                debug!("starting section {} at {:#x}", sections.len(), i);
                sections.push(DiffSection {
                    start: i,
                    original: vec![before],
                    patched: vec![after],
                });
            }
        }
    }
    Ok(sections)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EntryOptions {
    pub addressing: Addressing,
    pub signature_offset: usize,
    pub signature_len: usize,
}

impl Default for EntryOptions {
    fn default() -> Self {
        EntryOptions {
            addressing: Addressing::Pattern,
            signature_offset: 0,
            signature_len: 64,
        }
    }
}

/// Turn diff sections into a definition entry for the original file's build.
///
/// The signature is the original file's bytes at the chosen window, pinned
/// to that offset.
pub fn build_entry(
    id: &str,
    original: &[u8],
    sections: &[DiffSection],
    options: EntryOptions,
) -> Result<RawBuild> {
    let start = options.signature_offset;
    let end = match start.checked_add(options.signature_len) {
        Some(end) if options.signature_len > 0 && end <= original.len() => end,
        _ => {
            return malformed(format!(
                "signature window {:#x}+{} lies outside the {} byte file",
                start,
                options.signature_len,
                original.len()
            ))
        }
    };
    if let Some(section) = sections
        .iter()
        .find(|s| s.start < end && start < s.end())
    {
        return malformed(format!(
            "section at {:#x} changes the signature window {:#x}..{:#x}, pick another signature offset",
            section.start, start, end
        ));
    }
    let signature = BytePattern::exact(&original[start..end]);

    let patches = sections
        .iter()
        .enumerate()
        .map(|(n, section)| {
            let description = format!("Section {} at {:#x}", n, section.start);
            match options.addressing {
                Addressing::Pattern => {
                    let pattern = BytePattern::exact(&section.original);
                    let found = pattern.find_in(original).take(2).count();
                    if found != 1 {
                        warn!(
                            "{}: original bytes are not unique in the file, patch will not apply",
                            description
                        );
                    }
                    RawPatch {
                        description: Some(description),
                        addressing: Addressing::Pattern,
                        pattern: Some(pattern.to_string()),
                        replacement: section.patched.clone(),
                        ..RawPatch::default()
                    }
                }
                Addressing::Offset => RawPatch {
                    description: Some(description),
                    addressing: Addressing::Offset,
                    offset: Some(section.start),
                    replacement: section.patched.clone(),
                    ..RawPatch::default()
                },
            }
        })
        .collect();

    Ok(RawBuild {
        id: Some(id.to_string()),
        signature: Some(RawSignature {
            pattern: Some(signature.to_string()),
            range_start: Some(start),
            range_end: Some(start + 1),
        }),
        patches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::apply;
    use crate::definitions::DefinitionStore;
    use crate::detect::detect;
    use crate::error::Error;
    use crate::patch::RawDocument;

    #[test]
    fn size_mismatch() {
        match sections(&[0, 1], &[0], 1) {
            Err(Error::SizeMismatch { original, patched }) => {
                assert_eq!((original, patched), (2, 1))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn identical_files_have_no_sections() {
        assert!(sections(&[1, 2, 3], &[1, 2, 3], 1).unwrap().is_empty());
    }

    #[test]
    fn short_gaps_are_bridged() {
        let original = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        let patched = [0, 9, 2, 9, 4, 5, 6, 9, 8, 9];
        let found = sections(&original, &patched, 1).unwrap();
        assert_eq!(
            found,
            vec![
                DiffSection {
                    start: 1,
                    original: vec![1, 2, 3],
                    patched: vec![9, 2, 9],
                },
                DiffSection {
                    start: 7,
                    original: vec![7, 8, 9],
                    patched: vec![9, 8, 9],
                },
            ]
        );

        let strict = sections(&original, &patched, 0).unwrap();
        assert_eq!(strict.len(), 4);
        let loose = sections(&original, &patched, 3).unwrap();
        assert_eq!(loose.len(), 1);
        assert_eq!(loose[0].end(), 10);
    }

    #[test]
    fn generated_entry_patches_the_original() {
        let original: Vec<u8> = (0u8..32).collect();
        let mut patched = original.clone();
        patched[10] = 0xAA;
        patched[11] = 0xBB;
        patched[20] = 0xCC;

        let found = sections(&original, &patched, 1).unwrap();
        for &addressing in &[Addressing::Pattern, Addressing::Offset] {
            let entry = build_entry(
                "generated",
                &original,
                &found,
                EntryOptions {
                    addressing,
                    signature_offset: 0,
                    signature_len: 4,
                },
            )
            .unwrap();
            let store = DefinitionStore::from_document(RawDocument {
                builds: vec![entry],
            })
            .unwrap();

            let mut buffer = original.clone();
            let build = detect(&buffer, store.builds()).unwrap().build;
            let results = apply(&mut buffer, &build.patches);
            assert!(results.iter().all(|r| r.success()));
            assert_eq!(buffer, patched);
        }
    }

    #[test]
    fn signature_window_must_fit() {
        let options = EntryOptions {
            signature_offset: 2,
            signature_len: 8,
            ..EntryOptions::default()
        };
        assert!(build_entry("x", &[0; 4], &[], options).is_err());
    }

    #[test]
    fn signature_window_must_not_be_patched() {
        let original: Vec<u8> = (0u8..16).collect();
        let mut patched = original.clone();
        patched[2] = 0xFF;
        let found = sections(&original, &patched, 0).unwrap();

        let options = EntryOptions {
            signature_len: 4,
            ..EntryOptions::default()
        };
        assert!(build_entry("x", &original, &found, options).is_err());

        let moved = EntryOptions {
            signature_offset: 8,
            ..options
        };
        assert!(build_entry("x", &original, &found, moved).is_ok());
    }
}
