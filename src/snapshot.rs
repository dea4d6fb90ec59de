//! Snapshot persistence: parsing, serialization, and ordering enforcement.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::catalog::AssetRecord;
use crate::error::Error;
use crate::state::StateRecord;
use crate::types::ContentHash;

/// Format version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Content hash of one document as of the run that wrote the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Project-relative document identifier.
    pub document: String,
    /// Hash of the whole document source. Absent when the document must be
    /// reparsed regardless, e.g. because some directive in it was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
}

/// Everything a build carries over to the next one. Records are sorted:
/// documents by identifier, assets by id, states by key then partition.
/// Constructed only via `Snapshot::new()` or `Snapshot::parse()`, both of
/// which enforce that ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// One record per asset.
    #[serde(default)]
    pub assets: Vec<AssetRecord>,
    /// One record per document seen by the last build.
    #[serde(default)]
    pub documents: Vec<DocumentRecord>,
    /// One record per stored occurrence state.
    #[serde(default)]
    pub states: Vec<StateRecord>,
    /// Format version.
    pub version: u32,
}

/// Only the version, read before committing to the full layout.
#[derive(Deserialize)]
struct VersionProbe {
    /// Format version.
    version: u32,
}

impl Snapshot {
    /// Create a snapshot from unsorted records. Sorts them.
    pub fn new(mut assets: Vec<AssetRecord>, mut documents: Vec<DocumentRecord>, mut states: Vec<StateRecord>) -> Self {
        assets.sort_by(|a, b| return a.id.cmp(&b.id));
        documents.sort_by(|a, b| return a.document.cmp(&b.document));
        states.sort_by(|a, b| return (&a.key, a.partition).cmp(&(&b.key, b.partition)));
        return Self { assets, documents, states, version: SNAPSHOT_VERSION };
    }

    /// Parse a snapshot from TOML content.
    ///
    /// # Errors
    ///
    /// Returns `Error::TomlDe` if the content is not valid TOML,
    /// `Error::SnapshotVersion` if it was written by another format version,
    /// or `Error::SnapshotCorrupt` if records are unsorted or repeated.
    pub fn parse(content: &str) -> Result<Self, Error> {
        let probe: VersionProbe = toml::from_str(content)?;
        if probe.version != SNAPSHOT_VERSION {
            return Err(Error::SnapshotVersion { expected: SNAPSHOT_VERSION, found: probe.version });
        }
        let snapshot: Self = toml::from_str(content)?;
        enforce_strict_order("documents", &snapshot.documents, |r| return r.document.clone())?;
        enforce_strict_order("assets", &snapshot.assets, |r| return r.id.clone())?;
        enforce_strict_order("states", &snapshot.states, |r| return (r.key.clone(), r.partition))?;
        return Ok(snapshot);
    }

    /// Read and parse a snapshot from disk. A missing file means no build
    /// has run yet and yields `None`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` for read failures other than not-found, and any
    /// error of [`Snapshot::parse`].
    pub fn read(path: &Path) -> Result<Option<Self>, Error> {
        let content = match std::fs::read_to_string(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no snapshot yet");
                return Ok(None);
            },
            Err(e) => return Err(Error::Io(e)),
            Ok(c) => c,
        };
        let snapshot = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            documents = snapshot.documents.len(),
            assets = snapshot.assets.len(),
            states = snapshot.states.len(),
            "loaded snapshot"
        );
        return Ok(Some(snapshot));
    }

    /// Serialize to TOML.
    ///
    /// # Errors
    ///
    /// Returns `Error::TomlSer` if serialization fails.
    pub fn serialize(&self) -> Result<String, Error> {
        return Ok(toml::to_string_pretty(self)?);
    }

    /// Write the snapshot to disk, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns `Error::TomlSer` if serialization fails,
    /// or `Error::Io` if the file cannot be written.
    pub fn write(&self, path: &Path) -> Result<(), Error> {
        let content = self.serialize()?;
        if let Some(parent) = path.parent().filter(|p| return !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        tracing::info!(path = %path.display(), "wrote snapshot");
        return Ok(());
    }
}

/// Validate that records are strictly increasing by `sort_key`.
///
/// # Errors
///
/// Returns `Error::SnapshotCorrupt` if any adjacent pair is out of order or equal.
fn enforce_strict_order<T, K, F>(section: &str, records: &[T], sort_key: F) -> Result<(), Error>
where
    K: Ord + std::fmt::Debug,
    F: Fn(&T) -> K,
{
    for window in records.windows(2) {
        let (Some(first), Some(second)) = (window.first(), window.get(1)) else {
            return Err(Error::SnapshotCorrupt { reason: format!("{section}: window underflow") });
        };
        let (first, second) = (sort_key(first), sort_key(second));
        if first >= second {
            return Err(Error::SnapshotCorrupt {
                reason: format!("{section} not sorted: {first:?} >= {second:?}"),
            });
        }
    }
    return Ok(());
}
