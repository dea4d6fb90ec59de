//! The asset state machine: drives the ordered backends over a working set of
//! occurrences and owns the only sanctioned way of mutating [`AssetState`].

use crate::backend::Backend;
use crate::catalog::AssetCatalog;
use crate::state::{AssetState, AssetStateStore};
use crate::types::OccurrenceKey;

/// Orchestrates enabled backends, in priority order, against asset occurrences.
///
/// Dispatch is first-match-wins: each backend only sees the work earlier
/// backends left unresolved, except for availability checks after a
/// generation request, which always cover the full set.
pub struct AssetStateMachine {
    /// Enabled backends, lowest priority value first.
    backends: Vec<Box<dyn Backend>>,
}

/// Read access to the catalog plus the batch state mutators handed to backends.
///
/// Keys without state are skipped: reconciliation creates state for every
/// catalog occurrence before any backend runs.
pub struct Transitions<'a> {
    /// Structure of the current build.
    catalog: &'a AssetCatalog,
    /// State being mutated.
    store: &'a mut AssetStateStore,
}

impl AssetStateMachine {
    /// Names of the enabled backends, in dispatch order.
    pub fn backend_names(&self) -> Vec<&str> {
        return self.backends.iter().map(|b| return b.name()).collect();
    }

    /// Ask every backend, in order, to confirm availability of whatever is
    /// still unavailable or still showing a placeholder.
    pub fn ensure_available(&mut self, catalog: &AssetCatalog, store: &mut AssetStateStore, occurrences: &[OccurrenceKey]) {
        let mut transitions = Transitions::new(catalog, store);
        for backend in &mut self.backends {
            let pending: Vec<OccurrenceKey> = occurrences
                .iter()
                .filter(|key| {
                    return transitions
                        .state(key)
                        .is_some_and(|state| return !state.available || state.placeholder);
                })
                .cloned()
                .collect();
            if pending.is_empty() {
                continue;
            }
            tracing::debug!(backend = backend.name(), pending = pending.len(), "checking availability");
            backend.check_availability(&pending, &mut transitions);
        }
    }

    /// Flag every occurrence that is still unavailable for placeholder
    /// rendering and return how many were flagged.
    pub fn mark_for_placeholder_if_unavailable(
        catalog: &AssetCatalog,
        store: &mut AssetStateStore,
        occurrences: &[OccurrenceKey],
    ) -> usize {
        let mut transitions = Transitions::new(catalog, store);
        let unavailable: Vec<OccurrenceKey> = occurrences
            .iter()
            .filter(|key| return transitions.state(key).is_some_and(|state| return !state.available))
            .cloned()
            .collect();
        transitions.placeholder_needed(&unavailable);
        return unavailable.len();
    }

    /// Wrap already ordered backends.
    pub fn new(backends: Vec<Box<dyn Backend>>) -> Self {
        return Self { backends };
    }

    /// Withdraw the request flag of definitions still shown as a placeholder
    /// and return how many were withdrawn. The placeholder backend counts its
    /// stand-in as requested; withdrawing it before the next request pass
    /// lets a backend enabled since then generate the real content.
    pub fn reopen_placeholder_requests(
        catalog: &AssetCatalog,
        store: &mut AssetStateStore,
        definitions: &[OccurrenceKey],
    ) -> usize {
        let mut transitions = Transitions::new(catalog, store);
        let stand_ins: Vec<OccurrenceKey> = definitions
            .iter()
            .filter(|key| return transitions.state(key).is_some_and(|state| return state.placeholder && state.requested))
            .cloned()
            .collect();
        transitions.mark_not_requested(&stand_ins);
        return stand_ins.len();
    }

    /// Request generation for definitions not requested yet, backend by
    /// backend, letting each one also report availability over the full set.
    pub fn request_generation(&mut self, catalog: &AssetCatalog, store: &mut AssetStateStore, definitions: &[OccurrenceKey]) {
        let mut transitions = Transitions::new(catalog, store);
        for backend in &mut self.backends {
            let not_requested: Vec<OccurrenceKey> = definitions
                .iter()
                .filter(|key| return transitions.state(key).is_some_and(|state| return !state.requested))
                .cloned()
                .collect();
            tracing::debug!(backend = backend.name(), pending = not_requested.len(), "requesting generation");
            backend.request_generation(&not_requested, &mut transitions);
            backend.check_availability(definitions, &mut transitions);
        }
    }
}

impl<'a> Transitions<'a> {
    /// Apply `change` to the state of every key that has one.
    fn apply<F>(&mut self, keys: &[OccurrenceKey], change: F)
    where
        F: Fn(&mut AssetState),
    {
        for key in keys {
            match self.store.get_mut(key) {
                Some(state) => change(state),
                None => tracing::debug!(occurrence = %key, "no state to update"),
            }
        }
    }

    /// The catalog of the current build.
    pub const fn catalog(&self) -> &AssetCatalog {
        return self.catalog;
    }

    /// Forget recorded errors.
    pub fn clear_errors(&mut self, keys: &[OccurrenceKey]) {
        self.apply(keys, |state| state.error = None);
    }

    /// Mark content as confirmed retrievable.
    pub fn mark_available(&mut self, keys: &[OccurrenceKey]) {
        self.apply(keys, |state| state.available = true);
    }

    /// Mark content as materialized locally.
    pub fn mark_downloaded(&mut self, keys: &[OccurrenceKey]) {
        self.apply(keys, |state| state.downloaded = true);
    }

    /// Withdraw availability.
    pub fn mark_not_available(&mut self, keys: &[OccurrenceKey]) {
        self.apply(keys, |state| state.available = false);
    }

    /// Withdraw the local copy.
    pub fn mark_not_downloaded(&mut self, keys: &[OccurrenceKey]) {
        self.apply(keys, |state| state.downloaded = false);
    }

    /// Withdraw the generation request.
    pub fn mark_not_requested(&mut self, keys: &[OccurrenceKey]) {
        self.apply(keys, |state| state.requested = false);
    }

    /// Mark a generation request as issued.
    pub fn mark_requested(&mut self, keys: &[OccurrenceKey]) {
        self.apply(keys, |state| state.requested = true);
    }

    /// Wrap a catalog and store for one dispatch round.
    pub(crate) const fn new(catalog: &'a AssetCatalog, store: &'a mut AssetStateStore) -> Self {
        return Self { catalog, store };
    }

    /// Request placeholder rendering.
    pub fn placeholder_needed(&mut self, keys: &[OccurrenceKey]) {
        self.apply(keys, |state| state.placeholder = true);
    }

    /// Real content replaced the placeholder.
    pub fn placeholder_not_needed(&mut self, keys: &[OccurrenceKey]) {
        self.apply(keys, |state| state.placeholder = false);
    }

    /// Record a backend failure for one occurrence. Flags are left as they are.
    pub fn record_error(&mut self, key: &OccurrenceKey, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(occurrence = %key, %message, "backend failed");
        self.apply(std::slice::from_ref(key), |state| state.error = Some(message.clone()));
    }

    /// Record where the content of one occurrence can be fetched.
    pub fn record_uri(&mut self, key: &OccurrenceKey, uri: impl Into<String>) {
        let uri = uri.into();
        self.apply(std::slice::from_ref(key), |state| state.uri = Some(uri.clone()));
    }

    /// Current state of one occurrence.
    pub fn state(&self, key: &OccurrenceKey) -> Option<&AssetState> {
        return self.store.get(key);
    }
}
