/// Crate-level error types for visuals diagnostics.
use std::path::PathBuf;

use crate::types::{AssetType, Location};

/// All errors in visuals carry enough context to produce a useful diagnostic
/// without a debugger. Each variant names the asset, document, file, or reason for failure.
///
/// Backend failures are not represented here: they are recorded on the affected
/// occurrence's state and never abort a build.
#[allow(clippy::error_impl_error, reason = "crate-level error type")]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two partitions disagree on where an asset is defined.
    #[error("asset `{asset_id}` is defined twice: at {existing} and at {incoming}")]
    ConflictingDefinition {
        /// Asset whose definition is duplicated.
        asset_id: String,
        /// Definition location already recorded in the receiving catalog.
        existing: Location,
        /// Definition location carried by the catalog being merged in.
        incoming: Location,
    },

    /// A document was discovered again without being purged first.
    #[error("document `{document}` was discovered twice without an intervening purge")]
    DocumentNotPurged {
        /// Document identifier.
        document: String,
    },

    /// A configured file does not exist on disk.
    #[error("file not found: {}", path.display())]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Underlying I/O error from the filesystem.
    #[error("io: {0}")]
    Io(
        /// The wrapped I/O error.
        #[from]
        std::io::Error,
    ),

    /// JSON serialization failed.
    #[error("json: {0}")]
    Json(
        /// The wrapped JSON error.
        #[from]
        serde_json::Error,
    ),

    /// A directive pattern failed to compile.
    #[error("regex: {0}")]
    Regex(
        /// The wrapped regex error.
        #[from]
        regex::Error,
    ),

    /// Snapshot exists but its records are inconsistent.
    #[error("snapshot corrupt: {reason}")]
    SnapshotCorrupt {
        /// Description of the corruption.
        reason: String,
    },

    /// Snapshot was written by an incompatible format version.
    #[error("snapshot version {found} is not supported (expected {expected})")]
    SnapshotVersion {
        /// Version supported by this build.
        expected: u32,
        /// Version found in the file.
        found: u32,
    },

    /// TOML deserialization failed.
    #[error("toml deserialize: {0}")]
    TomlDe(
        /// The wrapped TOML deserialization error.
        #[from]
        toml::de::Error,
    ),

    /// TOML serialization failed.
    #[error("toml serialize: {0}")]
    TomlSer(
        /// The wrapped TOML serialization error.
        #[from]
        toml::ser::Error,
    ),

    /// A directive declared a type outside the known set.
    #[error("unknown asset type: `{value}` (expected photo, video, link or rich)")]
    UnknownAssetType {
        /// The rejected `:type:` value.
        value: String,
    },

    /// A directive declared a type the renderer cannot emit yet.
    #[error("{document}:{line}: visuals does not support {kind} content yet")]
    UnsupportedAssetType {
        /// Document containing the directive.
        document: String,
        /// The declared type.
        kind: AssetType,
        /// One-based line of the directive.
        line: u32,
    },

    /// The filesystem watcher could not be set up.
    #[error("watch: {0}")]
    Watch(
        /// The wrapped watcher error.
        #[from]
        notify::Error,
    ),
}
