//! Asset catalog: every known asset and every occurrence of it in the current build.
//!
//! The catalog describes what exists structurally. It is rebuilt every run from
//! the documents that were (re)parsed plus the documents reused unchanged, and
//! never holds generation state; that lives in [`crate::state::AssetStateStore`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::{AssetOptions, AssetType, ContentHash, Location, OccurrenceKey};

/// One asset: its definition, if any, and its ordered occurrences per document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct AssetEntry {
    /// Where the single definition lives. `None` for externally managed assets.
    definition: Option<Location>,
    /// Occurrences per document, indexed by instance ordinal.
    instances: BTreeMap<String, Vec<Instance>>,
    /// Type declared by the definition. Meaningful only while `definition` is set.
    kind: Option<AssetType>,
}

impl AssetEntry {
    /// Total occurrences across all documents.
    fn instance_count(&self) -> usize {
        return self.instances.values().map(Vec::len).sum();
    }
}

/// The authoritative registry of assets and occurrences for one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetCatalog {
    /// Assets keyed by author-supplied id.
    assets: BTreeMap<String, AssetEntry>,
}

/// Persisted form of one asset entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Definition location, absent for reference-only assets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Location>,
    /// Asset identifier.
    pub id: String,
    /// Ordered occurrences per document.
    pub instances: BTreeMap<String, Vec<Instance>>,
    /// Definition type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AssetType>,
}

/// What the catalog records about a single occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Hash of the definition content. Only definitions carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
    /// Type written on the directive. Never rewritten.
    pub declared: AssetType,
    /// Effective type: the definition's type for references of a defined
    /// asset once [`AssetCatalog::reconcile_reference_types`] has run,
    /// otherwise `declared`.
    pub kind: AssetType,
    /// Filtered presentation hints.
    #[serde(default)]
    pub options: AssetOptions,
}

impl Instance {
    /// A fresh occurrence record without content.
    pub const fn new(options: AssetOptions, kind: AssetType) -> Self {
        return Self { content_hash: None, declared: kind, kind, options };
    }

    /// Attach the hash of the definition content.
    #[must_use]
    pub fn with_content_hash(mut self, hash: ContentHash) -> Self {
        self.content_hash = Some(hash);
        return self;
    }
}

impl AssetCatalog {
    /// Record one occurrence of `asset_id` in `document` and return its location.
    ///
    /// The instance ordinal is the number of occurrences of the same asset
    /// already recorded in the document, so adding in source order yields
    /// `0..n`. A definition becomes the asset's definition only when none is
    /// recorded yet; a second definition is left as a plain occurrence here and
    /// is caught by [`AssetCatalog::merge_from`].
    ///
    /// Not idempotent: re-adding a document's occurrences without calling
    /// [`AssetCatalog::purge_document`] first appends duplicates.
    pub fn add_occurrence(
        &mut self,
        document: &str,
        asset_id: &str,
        instance: Instance,
        is_reference: bool,
    ) -> Location {
        let entry = self.assets.entry(asset_id.to_string()).or_default();
        let kind = instance.declared;
        let occurrences = entry.instances.entry(document.to_string()).or_default();
        let location = Location::new(document, occurrences.len());
        occurrences.push(instance);

        if !is_reference && entry.definition.is_none() {
            entry.definition = Some(location.clone());
            entry.kind = Some(kind);
        }
        return location;
    }

    /// Hash of the definition content behind this occurrence, if it is a definition.
    pub fn content_hash_of(&self, key: &OccurrenceKey) -> Option<&ContentHash> {
        return self.instance(key).and_then(|i| return i.content_hash.as_ref());
    }

    /// Whether any occurrence lives in `document`.
    pub fn contains_document(&self, document: &str) -> bool {
        return self.assets.values().any(|entry| return entry.instances.contains_key(document));
    }

    /// Content hash of the asset's definition, if it has one.
    pub fn definition_hash(&self, asset_id: &str) -> Option<&ContentHash> {
        let entry = self.assets.get(asset_id)?;
        let location = entry.definition.as_ref()?;
        return entry
            .instances
            .get(&location.document)
            .and_then(|list| return list.get(location.instance))
            .and_then(|instance| return instance.content_hash.as_ref());
    }

    /// The asset's definition location, if defined in this project.
    pub fn definition_of(&self, asset_id: &str) -> Option<&Location> {
        return self.assets.get(asset_id).and_then(|entry| return entry.definition.as_ref());
    }

    /// Every document holding at least one occurrence.
    pub fn documents(&self) -> BTreeSet<String> {
        return self
            .assets
            .values()
            .flat_map(|entry| return entry.instances.keys().cloned())
            .collect();
    }

    /// Rebuild a catalog from persisted records.
    ///
    /// # Errors
    ///
    /// Returns `Error::SnapshotCorrupt` if an id repeats or a definition points
    /// at an occurrence that does not exist.
    pub fn from_records(records: Vec<AssetRecord>) -> Result<Self, Error> {
        let mut assets = BTreeMap::new();
        for record in records {
            let entry = AssetEntry {
                definition: record.definition,
                instances: record.instances,
                kind: record.kind,
            };
            if let Some(location) = &entry.definition {
                let exists = entry
                    .instances
                    .get(&location.document)
                    .is_some_and(|list| return location.instance < list.len());
                if !exists {
                    return Err(Error::SnapshotCorrupt {
                        reason: format!("asset `{}` is defined at missing occurrence {location}", record.id),
                    });
                }
            }
            if assets.insert(record.id.clone(), entry).is_some() {
                return Err(Error::SnapshotCorrupt { reason: format!("asset `{}` recorded twice", record.id) });
            }
        }
        return Ok(Self { assets });
    }

    /// The record behind one occurrence.
    fn instance(&self, key: &OccurrenceKey) -> Option<&Instance> {
        return self
            .assets
            .get(&key.asset_id)
            .and_then(|entry| return entry.instances.get(key.document()))
            .and_then(|list| return list.get(key.location.instance));
    }

    /// Number of occurrences of `asset_id` recorded in `document`.
    pub fn instance_count(&self, asset_id: &str, document: &str) -> usize {
        return self
            .assets
            .get(asset_id)
            .and_then(|entry| return entry.instances.get(document))
            .map_or(0, Vec::len);
    }

    /// Whether this occurrence is its asset's definition.
    pub fn is_definition(&self, key: &OccurrenceKey) -> bool {
        return self.definition_of(&key.asset_id) == Some(&key.location);
    }

    /// True when the catalog holds no asset.
    pub fn is_empty(&self) -> bool {
        return self.assets.is_empty();
    }

    /// Effective type of one occurrence.
    pub fn kind_of(&self, key: &OccurrenceKey) -> Option<AssetType> {
        return self.instance(key).map(|i| return i.kind);
    }

    /// Number of assets, defined or not.
    pub fn len(&self) -> usize {
        return self.assets.len();
    }

    /// Every occurrence, definitions and references alike, optionally
    /// restricted to `documents`. Within a document, keys come in source order.
    pub fn list_all_instances(&self, documents: Option<&BTreeSet<String>>) -> Vec<OccurrenceKey> {
        return self.collect_occurrences(documents, |_, _| return true);
    }

    /// Every definition, optionally restricted to definitions living in `documents`.
    pub fn list_definitions(&self, documents: Option<&BTreeSet<String>>) -> Vec<OccurrenceKey> {
        return self
            .assets
            .iter()
            .filter_map(|(id, entry)| {
                let location = entry.definition.as_ref()?;
                let wanted = documents.is_none_or(|docs| return docs.contains(&location.document));
                return wanted.then(|| return OccurrenceKey::new(id.clone(), location.clone()));
            })
            .collect();
    }

    /// Every occurrence that is not its asset's definition, optionally
    /// restricted to `documents`.
    pub fn list_references(&self, documents: Option<&BTreeSet<String>>) -> Vec<OccurrenceKey> {
        return self.collect_occurrences(documents, |entry, location| {
            return entry.definition.as_ref() != Some(location);
        });
    }

    /// Walk every occurrence in the selected documents that satisfies `keep`.
    fn collect_occurrences<F>(&self, documents: Option<&BTreeSet<String>>, keep: F) -> Vec<OccurrenceKey>
    where
        F: Fn(&AssetEntry, &Location) -> bool,
    {
        let mut keys = Vec::new();
        for (id, entry) in &self.assets {
            for (document, list) in &entry.instances {
                if documents.is_some_and(|docs| return !docs.contains(document)) {
                    continue;
                }
                for instance in 0..list.len() {
                    let location = Location::new(document.clone(), instance);
                    if keep(entry, &location) {
                        keys.push(OccurrenceKey::new(id.clone(), location));
                    }
                }
            }
        }
        return keys;
    }

    /// Fold the occurrences another catalog recorded for `documents` into this one.
    ///
    /// Occurrences are replayed in document order and source order, so
    /// instance ordinals survive as long as this catalog holds nothing for those
    /// documents yet (the caller purges them first).
    ///
    /// # Errors
    ///
    /// Returns `Error::ConflictingDefinition` if an asset is defined at one
    /// location here and at a different one in `other`. Nothing is merged then.
    pub fn merge_from(&mut self, documents: &BTreeSet<String>, other: &Self) -> Result<(), Error> {
        let relevant: Vec<(&String, &AssetEntry)> = other
            .assets
            .iter()
            .filter(|(_, entry)| return entry.instances.keys().any(|doc| return documents.contains(doc)))
            .collect();

        for (id, theirs) in &relevant {
            let mine = self.assets.get(*id).and_then(|entry| return entry.definition.as_ref());
            if let (Some(existing), Some(incoming)) = (mine, theirs.definition.as_ref())
                && existing != incoming
            {
                return Err(Error::ConflictingDefinition {
                    asset_id: (*id).clone(),
                    existing: existing.clone(),
                    incoming: incoming.clone(),
                });
            }
        }

        let mut replayed = 0_usize;
        for (id, theirs) in relevant {
            for (document, list) in theirs.instances.iter().filter(|(doc, _)| return documents.contains(*doc)) {
                for (index, instance) in list.iter().enumerate() {
                    let is_definition = theirs
                        .definition
                        .as_ref()
                        .is_some_and(|def| return def.document == *document && def.instance == index);
                    self.add_occurrence(document, id, instance.clone(), !is_definition);
                    replayed = replayed.saturating_add(1);
                }
            }
        }
        tracing::debug!(documents = documents.len(), replayed, "merged partial asset catalog");
        return Ok(());
    }

    /// Recorded options of one occurrence.
    pub fn options_of(&self, asset_id: &str, location: &Location) -> Option<&AssetOptions> {
        return self
            .assets
            .get(asset_id)
            .and_then(|entry| return entry.instances.get(&location.document))
            .and_then(|list| return list.get(location.instance))
            .map(|instance| return &instance.options);
    }

    /// Remove every occurrence recorded for `document` and return how many went.
    ///
    /// Assets left without any occurrence disappear. Assets whose definition
    /// lived in `document` but are still referenced elsewhere are demoted to
    /// reference-only: their type and definition location are cleared.
    pub fn purge_document(&mut self, document: &str) -> usize {
        let mut removed = 0_usize;
        self.assets.retain(|id, entry| {
            if let Some(list) = entry.instances.remove(document) {
                removed = removed.saturating_add(list.len());
            }
            if entry.definition.as_ref().is_some_and(|def| return def.document == document) {
                tracing::debug!(asset = %id, document, "definition purged");
                entry.definition = None;
                entry.kind = None;
            }
            return entry.instance_count() > 0;
        });
        return removed;
    }

    /// Persisted form of every asset, sorted by id.
    pub fn records(&self) -> Vec<AssetRecord> {
        return self
            .assets
            .iter()
            .map(|(id, entry)| {
                return AssetRecord {
                    definition: entry.definition.clone(),
                    id: id.clone(),
                    instances: entry.instances.clone(),
                    kind: entry.kind,
                };
            })
            .collect();
    }

    /// Recompute the effective type of every occurrence and return how many
    /// changed. References of a defined asset take the definition's type;
    /// everything else, including references whose definition has since
    /// gone, falls back to the type it declared.
    pub fn reconcile_reference_types(&mut self) -> usize {
        let mut changed = 0_usize;
        for entry in self.assets.values_mut() {
            let defined = entry.definition.as_ref().zip(entry.kind);
            for (document, list) in &mut entry.instances {
                for (index, instance) in list.iter_mut().enumerate() {
                    let is_definition = defined
                        .is_some_and(|(def, _)| return def.document == *document && def.instance == index);
                    let effective = match defined {
                        Some((_, kind)) if !is_definition => kind,
                        _ => instance.declared,
                    };
                    if instance.kind != effective {
                        instance.kind = effective;
                        changed = changed.saturating_add(1);
                    }
                }
            }
        }
        return changed;
    }

    /// Current definition type of an asset, absent when it has no definition.
    pub fn type_of(&self, asset_id: &str) -> Option<AssetType> {
        return self.assets.get(asset_id).and_then(|entry| return entry.kind);
    }
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc, reason = "tests")]
mod tests {
    use super::*;

    fn photo() -> Instance {
        return Instance::new(AssetOptions::default(), AssetType::Photo);
    }

    fn docs(names: &[&str]) -> BTreeSet<String> {
        return names.iter().map(ToString::to_string).collect();
    }

    fn key(id: &str, doc: &str, instance: usize) -> OccurrenceKey {
        return OccurrenceKey::new(id, Location::new(doc, instance));
    }

    fn sorted(mut keys: Vec<OccurrenceKey>) -> Vec<OccurrenceKey> {
        keys.sort();
        return keys;
    }

    #[test]
    fn instance_indices_follow_call_order() {
        let mut catalog = AssetCatalog::default();
        let assigned: Vec<usize> = (0..4)
            .map(|_| return catalog.add_occurrence("guide", "logo", photo(), true).instance)
            .collect();
        assert_eq!(assigned, vec![0, 1, 2, 3]);

        let in_guide = catalog.list_all_instances(Some(&docs(&["guide"])));
        assert_eq!(in_guide.len(), 4);
        assert!(in_guide.iter().all(|k| return k.asset_id == "logo"));
    }

    #[test]
    fn first_definition_wins_within_a_catalog() {
        let mut catalog = AssetCatalog::default();
        catalog.add_occurrence("a", "logo", photo(), true);
        catalog.add_occurrence("a", "logo", photo(), false);
        catalog.add_occurrence("b", "logo", Instance::new(AssetOptions::default(), AssetType::Rich), false);

        assert_eq!(catalog.definition_of("logo"), Some(&Location::new("a", 1)));
        assert_eq!(catalog.type_of("logo"), Some(AssetType::Photo));
        assert_eq!(catalog.list_definitions(None), vec![key("logo", "a", 1)]);
        assert_eq!(
            sorted(catalog.list_references(None)),
            vec![key("logo", "a", 0), key("logo", "b", 0)]
        );
    }

    #[test]
    fn definition_hash_follows_the_definition() {
        let mut catalog = AssetCatalog::default();
        let hash = ContentHash("ab".repeat(32));
        catalog.add_occurrence("a", "logo", photo().with_content_hash(hash.clone()), false);
        catalog.add_occurrence("b", "logo", photo(), true);
        assert_eq!(catalog.definition_hash("logo"), Some(&hash));

        catalog.purge_document("a");
        assert_eq!(catalog.definition_hash("logo"), None);
        assert_eq!(catalog.definition_hash("missing"), None);
    }

    #[test]
    fn reference_only_asset_has_no_type() {
        let mut catalog = AssetCatalog::default();
        catalog.add_occurrence("a", "external", Instance::new(AssetOptions::default(), AssetType::Rich), true);
        assert_eq!(catalog.type_of("external"), None);
        assert_eq!(catalog.kind_of(&key("external", "a", 0)), Some(AssetType::Rich));
        assert!(catalog.list_definitions(None).is_empty());
    }

    #[test]
    fn purge_removes_assets_only_in_document() {
        let mut catalog = AssetCatalog::default();
        catalog.add_occurrence("a", "solo", photo(), false);
        catalog.add_occurrence("a", "solo", photo(), true);

        assert_eq!(catalog.purge_document("a"), 2);
        assert!(catalog.is_empty());
        assert!(catalog.list_all_instances(Some(&docs(&["a"]))).is_empty());
    }

    #[test]
    fn purge_of_defining_document_demotes_asset() {
        let mut catalog = AssetCatalog::default();
        catalog.add_occurrence("a", "logo", photo(), false);
        catalog.add_occurrence("b", "logo", photo(), true);
        catalog.add_occurrence("b", "logo", photo(), true);

        catalog.purge_document("a");

        assert_eq!(catalog.definition_of("logo"), None);
        assert_eq!(catalog.type_of("logo"), None);
        assert_eq!(catalog.instance_count("logo", "b"), 2);
        assert_eq!(
            sorted(catalog.list_references(None)),
            vec![key("logo", "b", 0), key("logo", "b", 1)]
        );
    }

    #[test]
    fn purge_of_referencing_document_keeps_definition() {
        let mut catalog = AssetCatalog::default();
        catalog.add_occurrence("a", "logo", photo(), false);
        catalog.add_occurrence("b", "logo", photo(), true);

        catalog.purge_document("b");

        assert_eq!(catalog.definition_of("logo"), Some(&Location::new("a", 0)));
        assert!(!catalog.contains_document("b"));
    }

    #[test]
    fn merge_replays_target_documents_only() {
        let mut partial = AssetCatalog::default();
        partial.add_occurrence("b", "logo", photo(), true);
        partial.add_occurrence("b", "logo", photo(), false);
        partial.add_occurrence("c", "logo", photo(), true);

        let mut master = AssetCatalog::default();
        master.merge_from(&docs(&["b"]), &partial).unwrap();

        assert_eq!(master.definition_of("logo"), Some(&Location::new("b", 1)));
        assert_eq!(master.instance_count("logo", "b"), 2);
        assert_eq!(master.instance_count("logo", "c"), 0);
    }

    #[test]
    fn merge_rejects_conflicting_definitions() {
        let mut master = AssetCatalog::default();
        master.add_occurrence("a", "logo", photo(), false);

        let mut partial = AssetCatalog::default();
        partial.add_occurrence("b", "logo", photo(), false);

        let err = master.merge_from(&docs(&["b"]), &partial).unwrap_err();
        assert!(matches!(
            err,
            Error::ConflictingDefinition { ref asset_id, ref existing, ref incoming }
                if asset_id == "logo"
                    && *existing == Location::new("a", 0)
                    && *incoming == Location::new("b", 0)
        ));
        // Nothing from the failed merge is committed.
        assert_eq!(master.instance_count("logo", "b"), 0);
    }

    #[test]
    fn merge_accepts_matching_definitions() {
        let mut master = AssetCatalog::default();
        master.add_occurrence("a", "logo", photo(), false);

        let mut partial = AssetCatalog::default();
        partial.add_occurrence("a", "logo", photo(), false);
        partial.add_occurrence("b", "logo", photo(), true);

        master.merge_from(&docs(&["b"]), &partial).unwrap();
        assert_eq!(master.definition_of("logo"), Some(&Location::new("a", 0)));
        assert_eq!(master.instance_count("logo", "b"), 1);
    }

    #[test]
    fn merged_references_stay_references() {
        let mut partial = AssetCatalog::default();
        partial.add_occurrence("b", "external", photo(), true);

        let mut master = AssetCatalog::default();
        master.merge_from(&docs(&["b"]), &partial).unwrap();
        assert_eq!(master.definition_of("external"), None);
        assert_eq!(master.list_references(None), vec![key("external", "b", 0)]);
    }

    #[test]
    fn references_inherit_definition_type() {
        let mut catalog = AssetCatalog::default();
        catalog.add_occurrence("a", "logo", photo(), false);
        catalog.add_occurrence("b", "logo", Instance::new(AssetOptions::default(), AssetType::Rich), true);
        catalog.add_occurrence("b", "elsewhere", Instance::new(AssetOptions::default(), AssetType::Rich), true);

        assert_eq!(catalog.reconcile_reference_types(), 1);
        assert_eq!(catalog.kind_of(&key("logo", "b", 0)), Some(AssetType::Photo));
        assert_eq!(catalog.kind_of(&key("elsewhere", "b", 0)), Some(AssetType::Rich));
    }

    #[test]
    fn references_recover_declared_type_when_definition_goes() {
        let mut catalog = AssetCatalog::default();
        catalog.add_occurrence("a", "card", photo(), false);
        catalog.add_occurrence("b", "card", Instance::new(AssetOptions::default(), AssetType::Rich), true);
        catalog.reconcile_reference_types();
        assert_eq!(catalog.kind_of(&key("card", "b", 0)), Some(AssetType::Photo));

        catalog.purge_document("a");
        assert_eq!(catalog.reconcile_reference_types(), 1);
        assert_eq!(catalog.type_of("card"), None);
        assert_eq!(catalog.kind_of(&key("card", "b", 0)), Some(AssetType::Rich));

        // Surviving a snapshot round trip keeps the declared type.
        let restored = AssetCatalog::from_records(catalog.records()).unwrap();
        assert_eq!(restored.kind_of(&key("card", "b", 0)), Some(AssetType::Rich));
    }

    #[test]
    fn options_are_looked_up_per_occurrence() {
        let mut catalog = AssetCatalog::default();
        let wide = AssetOptions::filtered(BTreeMap::from([("width".to_string(), "800".to_string())]));
        catalog.add_occurrence("a", "logo", photo(), false);
        let second = catalog.add_occurrence("a", "logo", Instance::new(wide.clone(), AssetType::Photo), true);

        assert_eq!(catalog.options_of("logo", &second), Some(&wide));
        assert_eq!(catalog.options_of("logo", &Location::new("a", 0)), Some(&AssetOptions::default()));
        assert_eq!(catalog.options_of("logo", &Location::new("a", 2)), None);
    }

    #[test]
    fn records_round_trip_and_reject_dangling_definition() {
        let mut catalog = AssetCatalog::default();
        catalog.add_occurrence("a", "logo", photo(), false);
        let restored = AssetCatalog::from_records(catalog.records()).unwrap();
        assert_eq!(restored, catalog);

        let mut records = catalog.records();
        if let Some(record) = records.first_mut() {
            record.definition = Some(Location::new("a", 3));
        }
        assert!(matches!(AssetCatalog::from_records(records), Err(Error::SnapshotCorrupt { .. })));
    }
}
