//! Pluggable asset backends and the registry that orders them.
//!
//! A backend maps some external service onto asset occurrences: it can ask for
//! content to be generated and report when content is available. The host
//! program registers every backend it knows about; configuration decides
//! which ones run, and priority decides in which order.

pub mod placeholder;
pub mod service;

use std::collections::BTreeMap;

use crate::config::BackendSettings;
use crate::machine::{AssetStateMachine, Transitions};
use crate::types::OccurrenceKey;

/// Builds a configured backend instance.
pub type BackendFactory = Box<dyn Fn(&BackendSettings) -> Box<dyn Backend>>;

/// A provider that can generate asset content and confirm its availability.
///
/// Implementations must skip occurrences they cannot handle without failing,
/// and record a failure on an occurrence they do claim through
/// [`Transitions::record_error`] instead of marking it.
pub trait Backend {
    /// Mark whichever of `occurrences` now have retrievable content.
    fn check_availability(&mut self, occurrences: &[OccurrenceKey], transitions: &mut Transitions<'_>);

    /// Configuration key of this backend.
    fn name(&self) -> &str;

    /// Issue generation requests for the occurrences this backend handles and
    /// mark the ones that were accepted as requested.
    fn request_generation(&mut self, occurrences: &[OccurrenceKey], transitions: &mut Transitions<'_>);
}

/// Registration metadata for one backend kind.
pub struct BackendDescriptor {
    /// Run without being enabled in configuration.
    enabled_by_default: bool,
    /// Constructor handed the backend's configuration.
    factory: BackendFactory,
    /// Configuration key.
    name: String,
    /// Lower runs first.
    priority: i32,
}

impl BackendDescriptor {
    /// Priority after applying a configured override.
    pub fn effective_priority(&self, settings: &BackendSettings) -> i32 {
        return settings.priority.unwrap_or(self.priority);
    }

    /// Whether this backend runs under `settings`: either configuration turns
    /// it on or it is on by default.
    pub const fn is_enabled(&self, settings: &BackendSettings) -> bool {
        return settings.enabled || self.enabled_by_default;
    }

    /// Configuration key.
    pub fn name(&self) -> &str {
        return &self.name;
    }

    /// Describe a backend kind.
    pub fn new<F>(name: impl Into<String>, priority: i32, enabled_by_default: bool, factory: F) -> Self
    where
        F: Fn(&BackendSettings) -> Box<dyn Backend> + 'static,
    {
        return Self { enabled_by_default, factory: Box::new(factory), name: name.into(), priority };
    }

    /// Declared priority, before configuration.
    pub const fn priority(&self) -> i32 {
        return self.priority;
    }
}

/// Every backend kind known to the host, in registration order.
#[derive(Default)]
pub struct BackendRegistry {
    /// Registered descriptors. Registration order breaks priority ties.
    descriptors: Vec<BackendDescriptor>,
}

impl BackendRegistry {
    /// Instantiate the enabled backends, ordered by effective priority, and
    /// hand them to a state machine for the rest of the build.
    pub fn activate(&self, config: &BTreeMap<String, BackendSettings>) -> AssetStateMachine {
        let unconfigured = BackendSettings::default();
        let backends = self
            .enabled(config)
            .into_iter()
            .map(|descriptor| {
                let settings = config.get(descriptor.name()).unwrap_or(&unconfigured);
                return (descriptor.factory)(settings);
            })
            .collect();
        return AssetStateMachine::new(backends);
    }

    /// The registry the `visuals` binary runs with: the visuals service
    /// backend and the placeholder backend.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(service::descriptor());
        registry.register(placeholder::descriptor());
        return registry;
    }

    /// Enabled descriptors sorted by effective priority. The sort is stable,
    /// so equal priorities keep registration order.
    pub fn enabled(&self, config: &BTreeMap<String, BackendSettings>) -> Vec<&BackendDescriptor> {
        let unconfigured = BackendSettings::default();
        let mut enabled: Vec<(i32, &BackendDescriptor)> = self
            .descriptors
            .iter()
            .filter_map(|descriptor| {
                let settings = config.get(descriptor.name()).unwrap_or(&unconfigured);
                let on = descriptor.is_enabled(settings);
                tracing::debug!(backend = descriptor.name(), enabled = on, "backend discovered");
                return on.then(|| return (descriptor.effective_priority(settings), descriptor));
            })
            .collect();
        enabled.sort_by_key(|(priority, _)| return *priority);
        return enabled.into_iter().map(|(_, descriptor)| return descriptor).collect();
    }

    /// Add a backend kind. Later registrations lose priority ties.
    pub fn register(&mut self, descriptor: BackendDescriptor) {
        self.descriptors.push(descriptor);
    }
}
