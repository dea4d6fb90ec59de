//! Per-occurrence asset state with a live/fallback storage discipline.
//!
//! Two live partitions hold state for definitions and references discovered in
//! the current catalog. A third, fallback, parks state of purged documents so
//! that a document reparsed unchanged gets its learned state back. Only
//! [`AssetStateStore::reconcile_with_catalog`] promotes entries into the live
//! partitions; plain writes of unknown keys land in fallback. Whatever is
//! still parked once reconciliation has run belongs to an occurrence that no
//! longer exists and is dropped.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::catalog::AssetCatalog;
use crate::types::{ContentHash, OccurrenceKey};

/// What has been learned about generating and fetching one occurrence.
///
/// Fields are only mutated through [`crate::machine::Transitions`].
#[allow(clippy::struct_excessive_bools, reason = "independent lifecycle flags")]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetState {
    /// Content is confirmed retrievable.
    #[serde(default)]
    pub(crate) available: bool,
    /// Hash of the asset's definition content this state was learned for.
    /// Stamped by reconciliation; once the definition changes the state
    /// starts over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) content_hash: Option<ContentHash>,
    /// Content was materialized locally.
    #[serde(default)]
    pub(crate) downloaded: bool,
    /// Last error reported by a backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    /// Render a stand-in because real content is not available.
    #[serde(default)]
    pub(crate) placeholder: bool,
    /// A generation request was issued.
    #[serde(default)]
    pub(crate) requested: bool,
    /// Resolved content URI, once a backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) uri: Option<String>,
}

impl AssetState {
    /// Content is confirmed retrievable.
    pub const fn available(&self) -> bool {
        return self.available;
    }

    /// Definition content the state was learned for, if the asset is defined.
    pub const fn content_hash(&self) -> Option<&ContentHash> {
        return self.content_hash.as_ref();
    }

    /// Content was materialized locally.
    pub const fn downloaded(&self) -> bool {
        return self.downloaded;
    }

    /// Last backend error, if any.
    pub fn error(&self) -> Option<&str> {
        return self.error.as_deref();
    }

    /// Rendering should use the placeholder graphic.
    pub const fn placeholder(&self) -> bool {
        return self.placeholder;
    }

    /// A generation request was issued.
    pub const fn requested(&self) -> bool {
        return self.requested;
    }

    /// Resolved content URI.
    pub fn uri(&self) -> Option<&str> {
        return self.uri.as_deref();
    }
}

/// The partition an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Live state of definitions.
    Definitions,
    /// Parked state of purged documents.
    Fallback,
    /// Live state of references.
    References,
}

/// Persisted form of one state entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Occurrence the state belongs to.
    pub key: OccurrenceKey,
    /// Partition the entry lives in.
    pub partition: Partition,
    /// The state itself.
    pub state: AssetState,
}

/// Asset state for every known occurrence, across live and fallback partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetStateStore {
    /// Live state of definitions.
    definitions: BTreeMap<OccurrenceKey, AssetState>,
    /// Parked state of purged documents, pending resurrection.
    fallback: BTreeMap<OccurrenceKey, AssetState>,
    /// Live state of references.
    references: BTreeMap<OccurrenceKey, AssetState>,
}

impl AssetStateStore {
    /// Whether any partition holds `key`.
    pub fn contains(&self, key: &OccurrenceKey) -> bool {
        return self.partition_of(key).is_some();
    }

    /// Number of entries in one partition.
    pub fn count(&self, partition: Partition) -> usize {
        return self.partition(partition).len();
    }

    /// Rebuild a store from persisted records. Later records for the same key win.
    pub fn from_records(records: Vec<StateRecord>) -> Self {
        let mut store = Self::default();
        for record in records {
            store.partition_mut(record.partition).insert(record.key, record.state);
        }
        return store;
    }

    /// Look a key up in definitions, then references, then fallback.
    pub fn get(&self, key: &OccurrenceKey) -> Option<&AssetState> {
        return self
            .definitions
            .get(key)
            .or_else(|| return self.references.get(key))
            .or_else(|| return self.fallback.get(key));
    }

    /// Mutable lookup with the same precedence as [`AssetStateStore::get`].
    pub(crate) fn get_mut(&mut self, key: &OccurrenceKey) -> Option<&mut AssetState> {
        if let Some(state) = self.definitions.get_mut(key) {
            return Some(state);
        }
        if let Some(state) = self.references.get_mut(key) {
            return Some(state);
        }
        return self.fallback.get_mut(key);
    }

    /// Write `state` for `key`. An existing live entry is overwritten in place;
    /// anything else goes to fallback, since only reconciliation may create
    /// live entries.
    pub fn insert(&mut self, key: OccurrenceKey, state: AssetState) {
        if let Some(slot) = self.definitions.get_mut(&key) {
            *slot = state;
        } else if let Some(slot) = self.references.get_mut(&key) {
            *slot = state;
        } else {
            self.fallback.insert(key, state);
        }
    }

    /// Total entries across every partition.
    pub fn len(&self) -> usize {
        return self.definitions.len().saturating_add(self.references.len()).saturating_add(self.fallback.len());
    }

    /// True when every partition is empty.
    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    /// Overwrite this store's entries for `documents` with those of `other`.
    ///
    /// Live entries of `other` replace the matching live partition here (and any
    /// stale copy parked in fallback); fallback entries follow the
    /// [`AssetStateStore::insert`] rule. The last partial store merged wins, and
    /// merge order across partitions is not defined.
    pub fn merge_from(&mut self, documents: &BTreeSet<String>, other: &Self) {
        let wanted = |key: &OccurrenceKey| return documents.contains(key.document());

        for (key, state) in other.definitions.iter().filter(|(key, _)| return wanted(key)) {
            self.fallback.remove(key);
            self.references.remove(key);
            self.definitions.insert(key.clone(), state.clone());
        }
        for (key, state) in other.references.iter().filter(|(key, _)| return wanted(key)) {
            self.fallback.remove(key);
            self.definitions.remove(key);
            self.references.insert(key.clone(), state.clone());
        }
        for (key, state) in other.fallback.iter().filter(|(key, _)| return wanted(key)) {
            self.insert(key.clone(), state.clone());
        }
    }

    /// Borrow one partition.
    const fn partition(&self, partition: Partition) -> &BTreeMap<OccurrenceKey, AssetState> {
        return match partition {
            Partition::Definitions => &self.definitions,
            Partition::Fallback => &self.fallback,
            Partition::References => &self.references,
        };
    }

    /// Mutably borrow one partition.
    const fn partition_mut(&mut self, partition: Partition) -> &mut BTreeMap<OccurrenceKey, AssetState> {
        return match partition {
            Partition::Definitions => &mut self.definitions,
            Partition::Fallback => &mut self.fallback,
            Partition::References => &mut self.references,
        };
    }

    /// The partition currently holding `key`, with lookup precedence.
    pub fn partition_of(&self, key: &OccurrenceKey) -> Option<Partition> {
        if self.definitions.contains_key(key) {
            return Some(Partition::Definitions);
        }
        if self.references.contains_key(key) {
            return Some(Partition::References);
        }
        return self.fallback.contains_key(key).then_some(Partition::Fallback);
    }

    /// Move live entries of `document` into fallback, or delete them outright
    /// when the document left the project. A permanent purge also drops
    /// whatever the document still has parked. Returns the number of live
    /// entries affected.
    pub fn purge_document(&mut self, document: &str, drop_permanently: bool) -> usize {
        let mut purged = Vec::new();
        for live in [&mut self.definitions, &mut self.references] {
            let keys: Vec<OccurrenceKey> =
                live.keys().filter(|key| return key.document() == document).cloned().collect();
            for key in keys {
                if let Some(state) = live.remove(&key) {
                    purged.push((key, state));
                }
            }
        }

        let count = purged.len();
        if drop_permanently {
            self.fallback.retain(|key, _| return key.document() != document);
        } else {
            self.fallback.extend(purged);
        }
        tracing::debug!(document, count, drop_permanently, "purged asset state");
        return count;
    }

    /// Make the live partitions mirror `catalog`.
    ///
    /// Every catalog definition gets a live definitions entry and every
    /// reference a live references entry. Existing entries keep their value,
    /// parked entries are resurrected with their value, and the rest are
    /// created from `default_state`. An entry found in the other live
    /// partition (an occurrence that switched role) moves across with its value.
    ///
    /// An entry learned for other definition content than the catalog now
    /// records is replaced by `default_state`, so edited content is requested
    /// and its references are resolved again. Fallback entries matching no
    /// catalog occurrence are dropped.
    pub fn reconcile_with_catalog<F>(&mut self, catalog: &AssetCatalog, mut default_state: F)
    where
        F: FnMut() -> AssetState,
    {
        let mut resurrected = 0_usize;
        let mut created = 0_usize;
        let mut stale = 0_usize;

        for (keys, role) in [
            (catalog.list_definitions(None), Partition::Definitions),
            (catalog.list_references(None), Partition::References),
        ] {
            let other_live = if role == Partition::Definitions { Partition::References } else { Partition::Definitions };
            for key in keys {
                let content_hash = catalog.definition_hash(&key.asset_id);
                let mut existing = self.partition_mut(role).remove(&key);
                if existing.is_none() {
                    existing = self
                        .partition_mut(other_live)
                        .remove(&key)
                        .or_else(|| return self.fallback.remove(&key));
                    if existing.is_some() {
                        resurrected = resurrected.saturating_add(1);
                    }
                }
                let mut state = match existing {
                    Some(state) if state.content_hash.as_ref() == content_hash => state,
                    Some(_) => {
                        stale = stale.saturating_add(1);
                        default_state()
                    },
                    None => {
                        created = created.saturating_add(1);
                        default_state()
                    },
                };
                state.content_hash = content_hash.cloned();
                self.partition_mut(role).insert(key, state);
            }
        }

        let dropped = self.fallback.len();
        self.fallback.clear();
        tracing::debug!(resurrected, created, stale, dropped, "reconciled asset state with catalog");
    }

    /// Persisted form of every entry, sorted by key then partition.
    pub fn records(&self) -> Vec<StateRecord> {
        let mut records: Vec<StateRecord> = [Partition::Definitions, Partition::References, Partition::Fallback]
            .into_iter()
            .flat_map(|partition| {
                return self.partition(partition).iter().map(move |(key, state)| {
                    return StateRecord { key: key.clone(), partition, state: state.clone() };
                });
            })
            .collect();
        records.sort_by(|a, b| return (&a.key, a.partition).cmp(&(&b.key, b.partition)));
        return records;
    }
}
