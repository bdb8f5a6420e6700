//! Refreshing the local definitions file.
//!
//! Only the local side of an update lives here: a candidate document is
//! validated before it may replace the current one. How the candidate got
//! onto disk is up to the caller.

use log::info;
use std::path::Path;

use crate::definitions::{DefinitionStore, Format};
use crate::error::Result;
use crate::target;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Refresh {
    Updated,
    UpToDate,
}

/// Copy the document at `source` over `destination` if their contents differ.
///
/// The source must load cleanly; a broken document never replaces a working one.
pub fn refresh(source: &Path, destination: &Path) -> Result<Refresh> {
    let from = Format::from_path(source);
    let to = Format::from_path(destination);

    let candidate = target::read(source)?;
    let document = from.decode(&candidate)?;
    let store = DefinitionStore::from_document(document.clone())?;
    info!("{} holds {} builds", source.display(), store.count_builds());

    if from == to {
        replace(destination, &candidate)
    } else {
        replace(destination, &to.encode(&document)?)
    }
}

fn replace(destination: &Path, data: &[u8]) -> Result<Refresh> {
    if destination.exists() && target::read(destination)? == data {
        return Ok(Refresh::UpToDate);
    }
    target::write(destination, data)?;
    info!("updated {}", destination.display());
    Ok(Refresh::Updated)
}
