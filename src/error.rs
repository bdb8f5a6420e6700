use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Malformed patch definitions: {}", reason))]
    MalformedDefinition { reason: String },

    #[snafu(display("Invalid byte pattern '{}': {}", text, reason))]
    InvalidPattern { text: String, reason: String },

    #[snafu(display("Unable to decode JSON definitions: {}", source))]
    DecodeJson { source: serde_json::Error },

    #[snafu(display("Unable to decode binary definitions: {}", source))]
    DecodeBincode { source: bincode::Error },

    #[snafu(display("Unable to encode JSON definitions: {}", source))]
    EncodeJson { source: serde_json::Error },

    #[snafu(display("Unable to encode binary definitions: {}", source))]
    EncodeBincode { source: bincode::Error },

    #[snafu(display("0 patches loaded"))]
    NoPatchesLoaded,

    #[snafu(display("unsupported game build detected"))]
    NoSupportedBuild,

    #[snafu(display("Unable to read {}: {}", path.display(), source))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to write {}: {}", path.display(), source))]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to replace {}: {}", path.display(), source))]
    PersistFile {
        path: PathBuf,
        source: tempfile::PersistError,
    },

    #[snafu(display("Different file sizes: {} and {} bytes", original, patched))]
    SizeMismatch { original: usize, patched: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) fn malformed<T>(reason: impl Into<String>) -> Result<T> {
    MalformedDefinition {
        reason: reason.into(),
    }
    .fail()
}
