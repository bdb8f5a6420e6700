//! Build-aware binary patching.
//!
//! A definition document lists known builds of an executable, each with a
//! byte signature that identifies it and the patches that apply to it.
//! [`runner::patch_file`] reads a target, works out which build it is and
//! applies that build's patches, reporting each one separately.

pub mod apply;
pub mod definitions;
pub mod detect;
pub mod diff;
pub mod error;
pub mod patch;
pub mod pattern;
pub mod runner;
pub mod target;
pub mod update;

pub use apply::{PatchFailure, PatchResult};
pub use definitions::{DefinitionStore, Format};
pub use error::{Error, Result};
pub use patch::{GameBuild, Patch, PatchTarget, SearchRange, Signature};
pub use pattern::BytePattern;
pub use runner::{patch_buffer, patch_file, Report};
