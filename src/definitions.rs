//! Patch definition store.
//!
//! Decodes a definition document and validates every build and patch up
//! front, so the rest of the engine only ever sees well-formed records.

use log::debug;
use snafu::ResultExt;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{malformed, DecodeBincode, DecodeJson, EncodeBincode, EncodeJson, Result};
use crate::patch::{
    Addressing, GameBuild, Patch, PatchTarget, RawBuild, RawDocument, RawPatch, RawSignature,
    SearchRange, Signature,
};
use crate::pattern::BytePattern;

/// Encoding of a definition document.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Format {
    Json,
    Bincode,
}

impl Format {
    /// `.rbp` files are bincode, anything else is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("rbp") => Format::Bincode,
            _ => Format::Json,
        }
    }

    pub fn decode(self, raw: &[u8]) -> Result<RawDocument> {
        match self {
            Format::Json => serde_json::from_slice(raw).context(DecodeJson),
            Format::Bincode => bincode::deserialize(raw).context(DecodeBincode),
        }
    }

    pub fn encode(self, document: &RawDocument) -> Result<Vec<u8>> {
        match self {
            Format::Json => serde_json::to_vec_pretty(document).context(EncodeJson),
            Format::Bincode => bincode::serialize(document).context(EncodeBincode),
        }
    }
}

/// Validated builds, keyed by id, in document order.
#[derive(Clone, Debug, Default)]
pub struct DefinitionStore {
    builds: Vec<GameBuild>,
    index: HashMap<String, usize>,
}

impl DefinitionStore {
    pub fn load(raw: &[u8], format: Format) -> Result<Self> {
        Self::from_document(format.decode(raw)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Self::load(text.as_bytes(), Format::Json)
    }

    /// Validate a decoded document. Nothing is kept if any entry is invalid.
    pub fn from_document(document: RawDocument) -> Result<Self> {
        let mut store = DefinitionStore::default();
        for raw in document.builds {
            let build = parse_build(raw)?;
            if store.index.contains_key(&build.id) {
                return malformed(format!("duplicate build id '{}'", build.id));
            }
            debug!(
                "loaded build '{}' with {} patches",
                build.id,
                build.patches.len()
            );
            store.index.insert(build.id.clone(), store.builds.len());
            store.builds.push(build);
        }
        Ok(store)
    }

    pub fn count_builds(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&GameBuild> {
        self.index.get(id).map(|&i| &self.builds[i])
    }

    pub fn builds(&self) -> &[GameBuild] {
        &self.builds
    }
}

fn parse_build(raw: RawBuild) -> Result<GameBuild> {
    let id = match raw.id {
        Some(id) if !id.trim().is_empty() => id,
        _ => return malformed("build without an id"),
    };
    let signature = match raw.signature {
        Some(signature) => parse_signature(&id, signature)?,
        None => return malformed(format!("build '{}' has no signature", id)),
    };

    let mut patches = Vec::with_capacity(raw.patches.len());
    for (i, patch) in raw.patches.into_iter().enumerate() {
        patches.push(parse_patch(&id, i, patch)?);
    }
    check_overlaps(&id, &patches)?;
    check_signature_untouched(&id, &signature, &patches)?;

    Ok(GameBuild {
        id,
        signature,
        patches,
    })
}

fn parse_signature(id: &str, raw: RawSignature) -> Result<Signature> {
    let pattern = match raw.pattern {
        Some(text) => parse_pattern(id, "signature", &text)?,
        None => return malformed(format!("build '{}' signature has no pattern", id)),
    };
    let range = parse_range(id, "signature", raw.range_start, raw.range_end)?;
    Ok(Signature { pattern, range })
}

fn parse_patch(id: &str, index: usize, raw: RawPatch) -> Result<Patch> {
    let description = match raw.description {
        Some(description) => description,
        None => format!("Patch #{}", index + 1),
    };
    let label = format!("patch '{}'", description);

    if raw.replacement.is_empty() {
        return malformed(format!("build '{}' {} has no replacement bytes", id, label));
    }
    if raw.expected_occurrences == Some(0) {
        return malformed(format!(
            "build '{}' {} expects zero occurrences",
            id, label
        ));
    }

    let target = match raw.addressing {
        Addressing::Pattern => {
            let pattern = match raw.pattern {
                Some(text) => parse_pattern(id, &label, &text)?,
                None => return malformed(format!("build '{}' {} has no pattern", id, label)),
            };
            if pattern.len() != raw.replacement.len() {
                return malformed(format!(
                    "build '{}' {} replaces {} pattern bytes with {} bytes",
                    id,
                    label,
                    pattern.len(),
                    raw.replacement.len()
                ));
            }
            PatchTarget::Pattern {
                pattern,
                range: parse_range(id, &label, raw.range_start, raw.range_end)?,
                expected_occurrences: raw.expected_occurrences.unwrap_or(1),
            }
        }
        Addressing::Offset => {
            let offset = match raw.offset {
                Some(offset) => offset,
                None => return malformed(format!("build '{}' {} has no offset", id, label)),
            };
            if raw.expected_occurrences.map_or(false, |n| n != 1) {
                return malformed(format!(
                    "build '{}' {} is offset-addressed and can only occur once",
                    id, label
                ));
            }
            if offset.checked_add(raw.replacement.len()).is_none() {
                return malformed(format!("build '{}' {} offset overflows", id, label));
            }
            PatchTarget::Offset(offset)
        }
    };

    Ok(Patch {
        description,
        target,
        replacement: raw.replacement,
    })
}

fn parse_pattern(id: &str, what: &str, text: &str) -> Result<BytePattern> {
    match text.parse() {
        Ok(pattern) => Ok(pattern),
        Err(e) => malformed(format!("build '{}' {}: {}", id, what, e)),
    }
}

fn parse_range(
    id: &str,
    what: &str,
    start: Option<usize>,
    end: Option<usize>,
) -> Result<SearchRange> {
    let start = start.unwrap_or(0);
    if let Some(end) = end {
        if end < start {
            return malformed(format!(
                "build '{}' {} range {}..{} is inverted",
                id, what, start, end
            ));
        }
    }
    Ok(SearchRange { start, end })
}

/// A signature pinned to one offset has a known region, and no offset patch
/// may write into it.
fn check_signature_untouched(id: &str, signature: &Signature, patches: &[Patch]) -> Result<()> {
    let start = signature.range.start;
    if signature.range.end != start.checked_add(1) {
        return Ok(());
    }
    let end = start.saturating_add(signature.pattern.len());

    for patch in patches {
        if let Some(region) = patch.fixed_region() {
            if region.start < end && start < region.end {
                return malformed(format!(
                    "build '{}' patch '{}' overwrites the signature at offset {:#x}",
                    id, patch.description, start
                ));
            }
        }
    }
    Ok(())
}

/// Offset patches declare their region up front, so two of them touching
/// the same bytes is a definition error.
fn check_overlaps(id: &str, patches: &[Patch]) -> Result<()> {
    let mut regions: Vec<_> = patches
        .iter()
        .filter_map(|p| p.fixed_region().map(|r| (r, &p.description)))
        .collect();
    regions.sort_by_key(|(r, _)| r.start);

    for pair in regions.windows(2) {
        let (a, a_name) = &pair[0];
        let (b, b_name) = &pair[1];
        if b.start < a.end {
            return malformed(format!(
                "build '{}' patches '{}' and '{}' overlap at offset {:#x}",
                id, a_name, b_name, b.start
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    const TWO_BUILDS: &str = r#"{
        "builds": [
            {
                "id": "1.0 (update 1)",
                "signature": { "pattern": "4D 5A ?? 01", "range_start": 0, "range_end": 16 },
                "patches": [
                    { "description": "Unlock console", "pattern": "12 34", "replacement": "5678" },
                    { "description": "Skip intro", "addressing": "offset", "offset": 32, "replacement": "eb" }
                ]
            },
            {
                "id": "1.1",
                "signature": { "pattern": "4D 5A ?? 02" },
                "patches": []
            }
        ]
    }"#;

    fn expect_malformed(json: &str) -> String {
        match DefinitionStore::from_json(json) {
            Err(Error::MalformedDefinition { reason }) => reason,
            other => panic!("expected malformed definition, got {:?}", other),
        }
    }

    #[test]
    fn load_builds_in_order() {
        let store = DefinitionStore::from_json(TWO_BUILDS).unwrap();
        assert_eq!(store.count_builds(), 2);
        let ids: Vec<_> = store.builds().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["1.0 (update 1)", "1.1"]);

        let build = store.get("1.0 (update 1)").unwrap();
        assert_eq!(build.signature.range, SearchRange { start: 0, end: Some(16) });
        assert_eq!(build.patches.len(), 2);
        assert_eq!(build.patches[0].replacement, vec![0x56, 0x78]);
        assert_eq!(
            build.patches[0].target,
            PatchTarget::Pattern {
                pattern: BytePattern::exact(&[0x12, 0x34]),
                range: SearchRange::whole(),
                expected_occurrences: 1,
            }
        );
        assert_eq!(build.patches[1].target, PatchTarget::Offset(32));

        assert_eq!(store.get("1.1").unwrap().signature.range, SearchRange::whole());
        assert!(store.get("2.0").is_none());
    }

    #[test]
    fn empty_document_loads_zero_builds() {
        let store = DefinitionStore::from_json(r#"{ "builds": [] }"#).unwrap();
        assert_eq!(store.count_builds(), 0);
        assert!(DefinitionStore::from_json("{}").unwrap().is_empty());
    }

    #[test]
    fn syntax_errors_are_decode_errors() {
        match DefinitionStore::from_json("{ not json") {
            Err(Error::DecodeJson { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn duplicate_ids_rejected() {
        let reason = expect_malformed(
            r#"{ "builds": [
                { "id": "a", "signature": { "pattern": "01" } },
                { "id": "a", "signature": { "pattern": "02" } }
            ] }"#,
        );
        assert!(reason.contains("duplicate"));
    }

    #[test]
    fn missing_fields_rejected() {
        expect_malformed(r#"{ "builds": [ { "signature": { "pattern": "01" } } ] }"#);
        expect_malformed(r#"{ "builds": [ { "id": " ", "signature": { "pattern": "01" } } ] }"#);
        expect_malformed(r#"{ "builds": [ { "id": "a" } ] }"#);
        expect_malformed(r#"{ "builds": [ { "id": "a", "signature": {} } ] }"#);
        expect_malformed(
            r#"{ "builds": [ { "id": "a", "signature": { "pattern": "01" },
                "patches": [ { "description": "p", "replacement": "00" } ] } ] }"#,
        );
        expect_malformed(
            r#"{ "builds": [ { "id": "a", "signature": { "pattern": "01" },
                "patches": [ { "description": "p", "addressing": "offset", "replacement": "00" } ] } ] }"#,
        );
        expect_malformed(
            r#"{ "builds": [ { "id": "a", "signature": { "pattern": "01" },
                "patches": [ { "description": "p", "pattern": "00" } ] } ] }"#,
        );
    }

    #[test]
    fn replacement_length_must_match_pattern() {
        let reason = expect_malformed(
            r#"{ "builds": [ { "id": "a", "signature": { "pattern": "01" },
                "patches": [ { "description": "p", "pattern": "12 34 56", "replacement": "5678" } ] } ] }"#,
        );
        assert!(reason.contains("replaces 3 pattern bytes with 2 bytes"));
    }

    #[test]
    fn bad_patterns_and_ranges_rejected() {
        expect_malformed(r#"{ "builds": [ { "id": "a", "signature": { "pattern": "XY" } } ] }"#);
        expect_malformed(r#"{ "builds": [ { "id": "a", "signature": { "pattern": "+1 +F" } } ] }"#);
        expect_malformed(
            r#"{ "builds": [ { "id": "a", "signature": { "pattern": "01", "range_start": 9, "range_end": 3 } } ] }"#,
        );
    }

    #[test]
    fn occurrence_counts_validated() {
        expect_malformed(
            r#"{ "builds": [ { "id": "a", "signature": { "pattern": "01" },
                "patches": [ { "description": "p", "pattern": "00", "replacement": "01", "expected_occurrences": 0 } ] } ] }"#,
        );
        expect_malformed(
            r#"{ "builds": [ { "id": "a", "signature": { "pattern": "01" },
                "patches": [ { "description": "p", "addressing": "offset", "offset": 1, "replacement": "01", "expected_occurrences": 2 } ] } ] }"#,
        );
        let store = DefinitionStore::from_json(
            r#"{ "builds": [ { "id": "a", "signature": { "pattern": "01" },
                "patches": [ { "description": "p", "pattern": "00", "replacement": "01", "expected_occurrences": 3 } ] } ] }"#,
        )
        .unwrap();
        match &store.get("a").unwrap().patches[0].target {
            PatchTarget::Pattern {
                expected_occurrences,
                ..
            } => assert_eq!(*expected_occurrences, 3),
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn overlapping_offset_patches_rejected() {
        let reason = expect_malformed(
            r#"{ "builds": [ { "id": "a", "signature": { "pattern": "01" },
                "patches": [
                    { "description": "first", "addressing": "offset", "offset": 16, "replacement": "01020304" },
                    { "description": "second", "addressing": "offset", "offset": 19, "replacement": "05" }
                ] } ] }"#,
        );
        assert!(reason.contains("overlap"));
    }

    #[test]
    fn offset_patch_into_pinned_signature_rejected() {
        let reason = expect_malformed(
            r#"{ "builds": [ { "id": "a",
                "signature": { "pattern": "4D 5A 90", "range_start": 8, "range_end": 9 },
                "patches": [
                    { "description": "header", "addressing": "offset", "offset": 10, "replacement": "0000" }
                ] } ] }"#,
        );
        assert!(reason.contains("overwrites the signature"));

        // Just past the signature, or with a floating signature, is fine.
        DefinitionStore::from_json(
            r#"{ "builds": [ { "id": "a",
                "signature": { "pattern": "4D 5A 90", "range_start": 8, "range_end": 9 },
                "patches": [
                    { "description": "header", "addressing": "offset", "offset": 11, "replacement": "0000" }
                ] } ] }"#,
        )
        .unwrap();
        DefinitionStore::from_json(
            r#"{ "builds": [ { "id": "a",
                "signature": { "pattern": "4D 5A 90", "range_start": 8 },
                "patches": [
                    { "description": "header", "addressing": "offset", "offset": 10, "replacement": "0000" }
                ] } ] }"#,
        )
        .unwrap();
    }

    #[test]
    fn adjacent_offset_patches_allowed() {
        let store = DefinitionStore::from_json(
            r#"{ "builds": [ { "id": "a", "signature": { "pattern": "01" },
                "patches": [
                    { "description": "second", "addressing": "offset", "offset": 20, "replacement": "05" },
                    { "description": "first", "addressing": "offset", "offset": 16, "replacement": "01020304" }
                ] } ] }"#,
        )
        .unwrap();
        assert_eq!(store.get("a").unwrap().patches.len(), 2);
    }

    #[test]
    fn unnamed_patches_get_a_label() {
        let store = DefinitionStore::from_json(
            r#"{ "builds": [ { "id": "a", "signature": { "pattern": "01" },
                "patches": [ { "pattern": "00", "replacement": "01" } ] } ] }"#,
        )
        .unwrap();
        assert_eq!(store.get("a").unwrap().patches[0].description, "Patch #1");
    }

    #[test]
    fn bincode_document_loads() {
        let document = Format::Json.decode(TWO_BUILDS.as_bytes()).unwrap();
        let encoded = Format::Bincode.encode(&document).unwrap();
        let store = DefinitionStore::load(&encoded, Format::Bincode).unwrap();
        assert_eq!(store.count_builds(), 2);
        assert_eq!(
            store.get("1.0 (update 1)").unwrap().patches[1].replacement,
            vec![0xEB]
        );
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(Format::from_path(Path::new("defs.rbp")), Format::Bincode);
        assert_eq!(Format::from_path(Path::new("defs.RBP")), Format::Bincode);
        assert_eq!(Format::from_path(Path::new("defs.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("defs")), Format::Json);
    }
}
