//! Ties loading, detection and patching together for one target.

use log::info;
use snafu::{ensure, OptionExt};
use std::path::Path;

use crate::apply::{apply_protected, PatchResult};
use crate::definitions::DefinitionStore;
use crate::detect::detect;
use crate::error::{NoPatchesLoaded, NoSupportedBuild, Result};
use crate::patch::GameBuild;
use crate::target;

/// What happened to one target: the detected build and each patch's result.
#[derive(Debug)]
pub struct Report<'a> {
    build: &'a GameBuild,
    results: Vec<PatchResult<'a>>,
}

impl<'a> Report<'a> {
    pub fn build(&self) -> &'a GameBuild {
        self.build
    }

    pub fn results(&self) -> &[PatchResult<'a>] {
        &self.results
    }

    pub fn successes(&self) -> usize {
        self.results.iter().filter(|r| r.success()).count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// True only when every patch of the build was applied.
    pub fn is_complete(&self) -> bool {
        self.successes() == self.total()
    }
}

/// Detect the build of `buffer` and apply its patches in place.
pub fn patch_buffer<'a>(store: &'a DefinitionStore, buffer: &mut [u8]) -> Result<Report<'a>> {
    ensure!(!store.is_empty(), NoPatchesLoaded);

    let detected = detect(buffer, store.builds()).context(NoSupportedBuild)?;
    let build = detected.build;
    info!("{} detected", build.id);

    // The signature must survive so the patched file is still recognised.
    let results = apply_protected(buffer, &build.patches, &[detected.signature_region()]);
    Ok(Report { build, results })
}

/// Patch the file at `path`: one read, and one write-back if anything changed.
pub fn patch_file<'a>(store: &'a DefinitionStore, path: &Path) -> Result<Report<'a>> {
    ensure!(!store.is_empty(), NoPatchesLoaded);

    let mut buffer = target::read(path)?;
    info!("read {} bytes from {}", buffer.len(), path.display());

    let report = patch_buffer(store, &mut buffer)?;
    if report.successes() > 0 {
        target::write(path, &buffer)?;
        info!("wrote {}", path.display());
    } else {
        info!("no patch applied, {} left untouched", path.display());
    }
    Ok(report)
}
