//! Build lifecycle glue: the catalog, the state store and per-document hashes
//! of one project, driven through discover, purge, merge, reconcile and process.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::catalog::{AssetCatalog, Instance};
use crate::error::Error;
use crate::hasher;
use crate::machine::AssetStateMachine;
use crate::snapshot::{DocumentRecord, Snapshot};
use crate::state::{AssetState, AssetStateStore, Partition};
use crate::types::{AssetOptions, ContentHash, Location, OccurrenceDescriptor, OccurrenceKey};

/// Everything the engine knows about one project between two builds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Project {
    /// What exists structurally.
    catalog: AssetCatalog,
    /// Source hash of every document currently discovered. `None` forces a
    /// reparse on the next build.
    documents: BTreeMap<String, Option<ContentHash>>,
    /// What has been learned per occurrence.
    states: AssetStateStore,
}

/// Counts over every occurrence after a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    /// Confirmed retrievable, placeholders included.
    pub available: usize,
    /// Carrying a backend error.
    pub errors: usize,
    /// All occurrences in the catalog.
    pub occurrences: usize,
    /// Rendered with the placeholder graphic.
    pub placeholders: usize,
    /// Generation requested.
    pub requested: usize,
}

impl Project {
    /// The asset catalog.
    pub const fn catalog(&self) -> &AssetCatalog {
        return &self.catalog;
    }

    /// Record the directives found in `document`, in source order, and return
    /// the location assigned to each. `hash` is compared against the source by
    /// the next build; without one the document is always reparsed.
    ///
    /// # Errors
    ///
    /// Returns `Error::DocumentNotPurged` if the document is already known, or
    /// `Error::ConflictingDefinition` if a directive defines an asset that is
    /// already defined elsewhere.
    pub fn discover_document(
        &mut self,
        document: &str,
        hash: Option<ContentHash>,
        occurrences: &[OccurrenceDescriptor],
    ) -> Result<Vec<Location>, Error> {
        if self.documents.contains_key(document) || self.catalog.contains_document(document) {
            return Err(Error::DocumentNotPurged { document: document.to_string() });
        }

        let mut locations = Vec::with_capacity(occurrences.len());
        for occurrence in occurrences {
            if !occurrence.is_reference
                && let Some(existing) = self.catalog.definition_of(&occurrence.asset_id)
            {
                return Err(Error::ConflictingDefinition {
                    asset_id: occurrence.asset_id.clone(),
                    existing: existing.clone(),
                    incoming: Location::new(
                        document,
                        self.catalog.instance_count(&occurrence.asset_id, document),
                    ),
                });
            }

            let options = AssetOptions::filtered(occurrence.options.clone());
            let mut instance = Instance::new(options, occurrence.declared_type);
            if let Some(content) = occurrence.content.as_deref().filter(|_| return !occurrence.is_reference) {
                instance = instance.with_content_hash(hasher::hash_content(content));
            }
            let location =
                self.catalog.add_occurrence(document, &occurrence.asset_id, instance, occurrence.is_reference);
            locations.push(location);
        }

        self.documents.insert(document.to_string(), hash);
        tracing::debug!(document, occurrences = locations.len(), "discovered document");
        return Ok(locations);
    }

    /// Hash recorded for `document` by the build that discovered it.
    pub fn document_hash(&self, document: &str) -> Option<&ContentHash> {
        return self.documents.get(document).and_then(Option::as_ref);
    }

    /// Every discovered document.
    pub fn documents(&self) -> impl Iterator<Item = &str> {
        return self.documents.keys().map(String::as_str);
    }

    /// Post-build hook: copy `placeholder_image` into `out_dir` when any
    /// occurrence is rendered as a placeholder, and return the copy's path.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileNotFound` if the image is needed but missing, or
    /// `Error::Io` if the copy fails.
    pub fn finish(&self, placeholder_image: Option<&Path>, out_dir: &Path) -> Result<Option<PathBuf>, Error> {
        let needed = self
            .catalog
            .list_all_instances(None)
            .iter()
            .any(|key| return self.states.get(key).is_some_and(AssetState::placeholder));
        let Some(image) = placeholder_image.filter(|_| return needed) else {
            return Ok(None);
        };
        if !image.is_file() {
            return Err(Error::FileNotFound { path: image.to_path_buf() });
        }
        let Some(name) = image.file_name() else {
            return Err(Error::FileNotFound { path: image.to_path_buf() });
        };

        std::fs::create_dir_all(out_dir)?;
        let target = out_dir.join(name);
        std::fs::copy(image, &target)?;
        tracing::info!(target = %target.display(), "copied placeholder image");
        return Ok(Some(target));
    }

    /// Rebuild a project from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::SnapshotCorrupt` if the asset records are inconsistent.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, Error> {
        let catalog = AssetCatalog::from_records(snapshot.assets)?;
        let documents = snapshot.documents.into_iter().map(|record| return (record.document, record.hash)).collect();
        let states = AssetStateStore::from_records(snapshot.states);
        return Ok(Self { catalog, documents, states });
    }

    /// Forget everything `document` contributed. Its state is parked for a
    /// later rediscovery, or dropped when the document was `removed`.
    /// Returns the number of catalog occurrences purged.
    pub fn invalidate_document(&mut self, document: &str, removed: bool) -> usize {
        let purged = self.catalog.purge_document(document);
        self.states.purge_document(document, removed);
        self.documents.remove(document);
        tracing::debug!(document, purged, removed, "invalidated document");
        return purged;
    }

    /// Fold a worker's partial project for `documents` into this one.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConflictingDefinition` if the partial defines an asset
    /// that is defined at another location here. Nothing is merged then.
    pub fn merge_partition(&mut self, documents: &BTreeSet<String>, partial: &Self) -> Result<(), Error> {
        self.catalog.merge_from(documents, &partial.catalog)?;
        self.states.merge_from(documents, &partial.states);
        for (document, hash) in partial.documents.iter().filter(|(doc, _)| return documents.contains(*doc)) {
            self.documents.insert(document.clone(), hash.clone());
        }
        return Ok(());
    }

    /// A worker's starting point for `documents`: an empty catalog and a copy
    /// of whatever state this project holds for them.
    pub fn partial(&self, documents: &BTreeSet<String>) -> Self {
        let mut states = AssetStateStore::default();
        states.merge_from(documents, &self.states);
        return Self { catalog: AssetCatalog::default(), documents: BTreeMap::new(), states };
    }

    /// Drive every occurrence through the enabled backends: request generation
    /// for definitions, confirm availability, flag what is still missing for a
    /// placeholder and let the backends claim those.
    pub fn process(&mut self, machine: &mut AssetStateMachine) -> BuildSummary {
        let definitions = self.catalog.list_definitions(None);
        let occurrences = self.catalog.list_all_instances(None);

        AssetStateMachine::reopen_placeholder_requests(&self.catalog, &mut self.states, &definitions);
        machine.request_generation(&self.catalog, &mut self.states, &definitions);
        machine.ensure_available(&self.catalog, &mut self.states, &occurrences);
        let flagged = AssetStateMachine::mark_for_placeholder_if_unavailable(&self.catalog, &mut self.states, &occurrences);
        if flagged > 0 {
            machine.ensure_available(&self.catalog, &mut self.states, &occurrences);
        }

        let summary = self.summary();
        tracing::info!(
            occurrences = summary.occurrences,
            available = summary.available,
            placeholders = summary.placeholders,
            errors = summary.errors,
            "processed assets"
        );
        return summary;
    }

    /// The synchronization point after discovery: references take their
    /// definition's type and the state store is brought in line with the catalog.
    pub fn project_ready(&mut self) {
        let retyped = self.catalog.reconcile_reference_types();
        self.states.reconcile_with_catalog(&self.catalog, AssetState::default);
        tracing::debug!(
            retyped,
            definitions = self.states.count(Partition::Definitions),
            references = self.states.count(Partition::References),
            fallback = self.states.count(Partition::Fallback),
            "project ready"
        );
    }

    /// State of one occurrence.
    pub fn state_of(&self, key: &OccurrenceKey) -> Option<&AssetState> {
        return self.states.get(key);
    }

    /// The state store.
    pub const fn states(&self) -> &AssetStateStore {
        return &self.states;
    }

    /// Count occurrence states across the catalog.
    pub fn summary(&self) -> BuildSummary {
        let mut summary = BuildSummary::default();
        for key in self.catalog.list_all_instances(None) {
            summary.occurrences = summary.occurrences.saturating_add(1);
            let Some(state) = self.states.get(&key) else {
                continue;
            };
            for (set, counter) in [
                (state.available(), &mut summary.available),
                (state.error().is_some(), &mut summary.errors),
                (state.placeholder(), &mut summary.placeholders),
                (state.requested(), &mut summary.requested),
            ] {
                if set {
                    *counter = counter.saturating_add(1);
                }
            }
        }
        return summary;
    }

    /// Persisted form of the whole project.
    pub fn to_snapshot(&self) -> Snapshot {
        let documents = self
            .documents
            .iter()
            .map(|(document, hash)| return DocumentRecord { document: document.clone(), hash: hash.clone() })
            .collect();
        return Snapshot::new(self.catalog.records(), documents, self.states.records());
    }
}
