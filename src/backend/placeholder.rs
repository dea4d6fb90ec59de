//! Backend that serves the placeholder graphic for occurrences flagged for it.

use crate::backend::{Backend, BackendDescriptor};
use crate::machine::Transitions;
use crate::types::OccurrenceKey;

/// Configuration key.
pub const NAME: &str = "placeholder";

/// Runs after every other backend: the placeholder is always obtainable.
pub const PRIORITY: i32 = 999;

/// Claims only occurrences already flagged `placeholder`, and treats them as
/// requested and available at once.
#[derive(Debug, Default)]
pub struct PlaceholderBackend;

impl PlaceholderBackend {
    /// Occurrences currently flagged for a placeholder.
    fn flagged(occurrences: &[OccurrenceKey], transitions: &Transitions<'_>) -> Vec<OccurrenceKey> {
        return occurrences
            .iter()
            .filter(|key| return transitions.state(key).is_some_and(|state| return state.placeholder()))
            .cloned()
            .collect();
    }
}

impl Backend for PlaceholderBackend {
    fn check_availability(&mut self, occurrences: &[OccurrenceKey], transitions: &mut Transitions<'_>) {
        let flagged = Self::flagged(occurrences, transitions);
        transitions.mark_available(&flagged);
    }

    fn name(&self) -> &str {
        return NAME;
    }

    fn request_generation(&mut self, occurrences: &[OccurrenceKey], transitions: &mut Transitions<'_>) {
        let flagged = Self::flagged(occurrences, transitions);
        transitions.mark_requested(&flagged);
    }
}

/// Registration entry: on by default, lowest priority.
pub fn descriptor() -> BackendDescriptor {
    return BackendDescriptor::new(NAME, PRIORITY, true, |_| return Box::new(PlaceholderBackend));
}
