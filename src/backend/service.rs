//! Backend for the visuals generation service.
//!
//! Definitions are requested by content hash, references by asset id alone.
//! The network client is behind [`GenerationClient`]; the crate ships a
//! [`SimulatedClient`] that answers from memory.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::backend::{Backend, BackendDescriptor};
use crate::catalog::AssetCatalog;
use crate::config::BackendSettings;
use crate::machine::Transitions;
use crate::types::{AssetOptions, AssetType, ContentHash, Location, OccurrenceKey};

/// Configuration key.
pub const NAME: &str = "visuals";

/// Runs before the placeholder backend.
pub const PRIORITY: i32 = 100;

/// URI prefix the simulated service hands out for finished assets.
const DEFAULT_URI_BASE: &str = "https://placehold.it/500x100?text=";

/// Hex digits of the content hash the simulated service puts in its URIs.
const URI_HASH_DIGITS: usize = 8;

/// Transport-level failure talking to the service.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The service did not answer in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Anything else between us and the service.
    #[error("transport: {0}")]
    Transport(String),
}

/// Talks to the external generation service.
pub trait GenerationClient {
    /// Submit a generation request and return the service's view of it.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` when the service cannot be reached.
    fn request(&mut self, request: &GenerationRequest<'_>) -> Result<RemoteStatus, ClientError>;

    /// Poll the status of previously requested content.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` when the service cannot be reached.
    fn status(&mut self, key: &RequestKey) -> Result<RemoteStatus, ClientError>;
}

/// Everything the service needs to produce one occurrence.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    /// Asset identifier.
    pub asset_id: &'a str,
    /// Definition content hash; `None` for references.
    pub content_hash: Option<&'a ContentHash>,
    /// Effective type of the occurrence.
    pub kind: AssetType,
    /// Occurrence location, so the service can size per placement.
    pub location: &'a Location,
    /// Presentation hints.
    pub options: &'a AssetOptions,
}

impl GenerationRequest<'_> {
    /// Key the service tracks this request under.
    pub fn key(&self) -> RequestKey {
        return match self.content_hash {
            Some(hash) => RequestKey::Content(hash.clone()),
            None => RequestKey::AssetId(self.asset_id.to_string()),
        };
    }
}

/// How the service identifies a piece of content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestKey {
    /// An asset known to the service by id (references, externally managed assets).
    AssetId(String),
    /// Content generated from a definition, by hash.
    Content(ContentHash),
}

/// Lifecycle of content on the service side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Generated and published.
    Done {
        /// Where the content can be fetched.
        uri: String,
    },
    /// Generation failed for good.
    Failed {
        /// Reason reported by the service.
        message: String,
    },
    /// Rendering the content.
    Generating,
    /// Accepted, waiting to be processed.
    New,
    /// The service has never heard of it.
    NotFound,
    /// Processing uploaded content.
    Processing,
    /// Generated, being pushed to its final location.
    Uploading,
}

impl RemoteStatus {
    /// Parse a `simulate` option value other than `done`.
    fn from_option(value: &str) -> Option<Self> {
        return match value {
            "failed" => Some(Self::Failed { message: "generation failed".to_string() }),
            "generating" => Some(Self::Generating),
            "new" => Some(Self::New),
            "processing" => Some(Self::Processing),
            "uploading" => Some(Self::Uploading),
            _ => None,
        };
    }
}

/// Drives a [`GenerationClient`] for the occurrences of one build.
pub struct ServiceBackend {
    /// Connection to the service.
    client: Box<dyn GenerationClient>,
}

impl ServiceBackend {
    /// Build the request for one occurrence. `None` when the catalog no longer
    /// knows the occurrence, or a definition has no content to hash.
    fn build_request<'a>(catalog: &'a AssetCatalog, key: &'a OccurrenceKey) -> Option<GenerationRequest<'a>> {
        let kind = catalog.kind_of(key)?;
        let options = catalog.options_of(&key.asset_id, &key.location)?;
        let content_hash = if catalog.is_definition(key) {
            Some(catalog.content_hash_of(key)?)
        } else {
            None
        };
        return Some(GenerationRequest { asset_id: &key.asset_id, content_hash, kind, location: &key.location, options });
    }

    /// Use a specific client.
    pub fn with_client(client: Box<dyn GenerationClient>) -> Self {
        return Self { client };
    }
}

impl Backend for ServiceBackend {
    fn check_availability(&mut self, occurrences: &[OccurrenceKey], transitions: &mut Transitions<'_>) {
        for key in occurrences {
            let Some(request_key) = Self::build_request(transitions.catalog(), key).map(|r| return r.key()) else {
                continue;
            };
            match self.client.status(&request_key) {
                Ok(RemoteStatus::Done { uri }) => {
                    let claimed = std::slice::from_ref(key);
                    transitions.record_uri(key, uri);
                    transitions.mark_available(claimed);
                    transitions.placeholder_not_needed(claimed);
                    transitions.clear_errors(claimed);
                },
                Ok(RemoteStatus::Failed { message }) => transitions.record_error(key, message),
                Ok(_) => {},
                Err(e) => transitions.record_error(key, e.to_string()),
            }
        }
    }

    fn name(&self) -> &str {
        return NAME;
    }

    fn request_generation(&mut self, occurrences: &[OccurrenceKey], transitions: &mut Transitions<'_>) {
        for key in occurrences {
            let outcome = match Self::build_request(transitions.catalog(), key) {
                Some(request) => self.client.request(&request),
                None => continue,
            };
            match outcome {
                Ok(RemoteStatus::Failed { message }) => transitions.record_error(key, message),
                Ok(RemoteStatus::NotFound) => {
                    tracing::debug!(occurrence = %key, "service does not know this asset");
                },
                Ok(_) => {
                    let claimed = std::slice::from_ref(key);
                    transitions.mark_requested(claimed);
                    transitions.clear_errors(claimed);
                },
                Err(e) => transitions.record_error(key, e.to_string()),
            }
        }
    }
}

/// In-memory stand-in for the service. Every accepted definition moves
/// straight to the configured status; references resolve only to assets the
/// service was asked to generate.
#[derive(Debug, Clone)]
pub struct SimulatedClient {
    /// Status new requests end up in. `None` stands for done.
    outcome: Option<RemoteStatus>,
    /// Known content and its status.
    remote: BTreeMap<RequestKey, RemoteStatus>,
    /// Prefix of generated URIs.
    uri_base: String,
}

impl SimulatedClient {
    /// Read `simulate` (done, failed, generating, new, processing, uploading)
    /// and `uri_base` from the backend settings.
    pub fn from_settings(settings: &BackendSettings) -> Self {
        let uri_base = settings.str_option("uri_base").unwrap_or(DEFAULT_URI_BASE).to_string();
        let outcome = match settings.str_option("simulate") {
            None | Some("done") => None,
            Some(value) => {
                let parsed = RemoteStatus::from_option(value);
                if parsed.is_none() {
                    tracing::warn!(value, "unknown `simulate` value for the visuals backend, assuming done");
                }
                parsed
            },
        };
        return Self { outcome, remote: BTreeMap::new(), uri_base };
    }

    /// Status a fresh request for `asset_id` with `content` ends up in. Each
    /// content version gets its own URI.
    fn outcome_for(&self, asset_id: &str, content: &ContentHash) -> RemoteStatus {
        return self.outcome.clone().unwrap_or_else(|| {
            let slug = asset_id.split_whitespace().collect::<Vec<_>>().join("+");
            let version = content.0.get(..URI_HASH_DIGITS).unwrap_or(&content.0);
            return RemoteStatus::Done { uri: format!("{}{slug}+{version}", self.uri_base) };
        });
    }
}

impl GenerationClient for SimulatedClient {
    fn request(&mut self, request: &GenerationRequest<'_>) -> Result<RemoteStatus, ClientError> {
        let Some(content) = request.content_hash else {
            return self.status(&request.key());
        };
        let status = self.outcome_for(request.asset_id, content);
        self.remote.insert(request.key(), status.clone());
        self.remote.insert(RequestKey::AssetId(request.asset_id.to_string()), status.clone());
        return Ok(status);
    }

    fn status(&mut self, key: &RequestKey) -> Result<RemoteStatus, ClientError> {
        return Ok(self.remote.get(key).cloned().unwrap_or(RemoteStatus::NotFound));
    }
}

/// Registration entry: off unless configured, runs before the placeholder.
pub fn descriptor() -> BackendDescriptor {
    return BackendDescriptor::new(NAME, PRIORITY, false, |settings| {
        return Box::new(ServiceBackend::with_client(Box::new(SimulatedClient::from_settings(settings))));
    });
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc, reason = "tests")]
mod tests {
    use super::*;
    use crate::catalog::Instance;
    use crate::hasher::hash_content;
    use crate::state::{AssetState, AssetStateStore};

    /// Fails every call.
    struct Unreachable;

    impl GenerationClient for Unreachable {
        fn request(&mut self, _: &GenerationRequest<'_>) -> Result<RemoteStatus, ClientError> {
            return Err(ClientError::Timeout(Duration::from_secs(30)));
        }

        fn status(&mut self, _: &RequestKey) -> Result<RemoteStatus, ClientError> {
            return Err(ClientError::Transport("connection refused".into()));
        }
    }

    fn project() -> (AssetCatalog, AssetStateStore, OccurrenceKey, OccurrenceKey) {
        let mut catalog = AssetCatalog::default();
        let def = Instance::new(AssetOptions::default(), AssetType::Photo).with_content_hash(hash_content("a cat"));
        let def_at = catalog.add_occurrence("a", "cat", def, false);
        let ref_at = catalog.add_occurrence("b", "cat", Instance::new(AssetOptions::default(), AssetType::Photo), true);
        let mut store = AssetStateStore::default();
        store.reconcile_with_catalog(&catalog, AssetState::default);
        return (catalog, store, OccurrenceKey::new("cat", def_at), OccurrenceKey::new("cat", ref_at));
    }

    fn settings(pairs: &[(&str, &str)]) -> BackendSettings {
        let mut settings = BackendSettings::default();
        for (key, value) in pairs {
            settings.extra.insert((*key).to_string(), toml::Value::String((*value).to_string()));
        }
        return settings;
    }

    #[test]
    fn definitions_are_requested_then_references_resolve() {
        let (catalog, mut store, def, reference) = project();
        let client = SimulatedClient::from_settings(&settings(&[("uri_base", "https://cdn/")]));
        let mut backend = ServiceBackend::with_client(Box::new(client));
        let both = [def.clone(), reference.clone()];

        let mut transitions = Transitions::new(&catalog, &mut store);
        backend.request_generation(std::slice::from_ref(&def), &mut transitions);
        backend.check_availability(&both, &mut transitions);

        let state = store.get(&def).unwrap();
        assert!(state.requested() && state.available());
        let version = hash_content("a cat").0.get(..8).unwrap().to_string();
        assert_eq!(state.uri(), Some(format!("https://cdn/cat+{version}").as_str()));
        assert!(store.get(&reference).unwrap().available());
    }

    #[test]
    fn unknown_references_are_skipped_silently() {
        let (catalog, mut store, _, reference) = project();
        let mut backend = ServiceBackend::with_client(Box::new(SimulatedClient::from_settings(&settings(&[]))));

        let mut transitions = Transitions::new(&catalog, &mut store);
        backend.request_generation(std::slice::from_ref(&reference), &mut transitions);
        backend.check_availability(std::slice::from_ref(&reference), &mut transitions);

        assert_eq!(store.get(&reference), Some(&AssetState::default()));
    }

    #[test]
    fn pending_generation_is_requested_but_unavailable() {
        let (catalog, mut store, def, _) = project();
        let client = SimulatedClient::from_settings(&settings(&[("simulate", "processing")]));
        let mut backend = ServiceBackend::with_client(Box::new(client));

        let mut transitions = Transitions::new(&catalog, &mut store);
        backend.request_generation(std::slice::from_ref(&def), &mut transitions);
        backend.check_availability(std::slice::from_ref(&def), &mut transitions);

        let state = store.get(&def).unwrap();
        assert!(state.requested());
        assert!(!state.available());
    }

    #[test]
    fn failures_are_recorded_without_marking() {
        let (catalog, mut store, def, _) = project();
        let mut backend = ServiceBackend::with_client(Box::new(Unreachable));

        let mut transitions = Transitions::new(&catalog, &mut store);
        backend.request_generation(std::slice::from_ref(&def), &mut transitions);
        assert_eq!(transitions.state(&def).unwrap().error(), Some("request timed out after 30s"));

        backend.check_availability(std::slice::from_ref(&def), &mut transitions);
        let state = store.get(&def).unwrap();
        assert_eq!(state.error(), Some("transport: connection refused"));
        assert!(!state.requested() && !state.available());
    }

    #[test]
    fn remote_failure_is_recorded() {
        let (catalog, mut store, def, _) = project();
        let client = SimulatedClient::from_settings(&settings(&[("simulate", "failed")]));
        let mut backend = ServiceBackend::with_client(Box::new(client));

        let mut transitions = Transitions::new(&catalog, &mut store);
        backend.request_generation(std::slice::from_ref(&def), &mut transitions);

        let state = store.get(&def).unwrap();
        assert_eq!(state.error(), Some("generation failed"));
        assert!(!state.requested());
    }

    #[test]
    fn new_content_gets_a_new_uri() {
        let mut client = SimulatedClient::from_settings(&settings(&[]));
        let location = Location::new("a", 0);
        let options = AssetOptions::default();
        let mut uri_for = |content: &str| {
            let hash = hash_content(content);
            let request = GenerationRequest {
                asset_id: "cat",
                content_hash: Some(&hash),
                kind: AssetType::Photo,
                location: &location,
                options: &options,
            };
            return client.request(&request).unwrap();
        };
        assert_ne!(uri_for("a cat"), uri_for("a dog"));
    }

    #[test]
    fn definitions_key_by_hash_and_references_by_id() {
        let (catalog, _, def, reference) = project();
        let def_request = ServiceBackend::build_request(&catalog, &def).unwrap();
        let ref_request = ServiceBackend::build_request(&catalog, &reference).unwrap();
        assert_eq!(def_request.key(), RequestKey::Content(hash_content("a cat")));
        assert_eq!(ref_request.key(), RequestKey::AssetId("cat".to_string()));
    }
}
