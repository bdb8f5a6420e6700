//! Whole-file access to the executable being patched.

use snafu::ResultExt;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{PersistFile, ReadFile, Result, WriteFile};

pub fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).context(ReadFile { path })
}

/// Replace the contents of `path` with `data`.
///
/// The bytes go to a temporary file next to the target which is then renamed
/// over it, so an interrupted run leaves either the old or the new file.
pub fn write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let permissions = fs::metadata(path).map(|m| m.permissions()).ok();

    let mut file = tempfile::NamedTempFile::new_in(dir).context(WriteFile { path })?;
    file.write_all(data).context(WriteFile { path })?;
    file.as_file().sync_all().context(WriteFile { path })?;
    if let Some(permissions) = permissions {
        fs::set_permissions(file.path(), permissions).context(WriteFile { path })?;
    }
    file.persist(path).context(PersistFile { path })?;
    Ok(())
}
