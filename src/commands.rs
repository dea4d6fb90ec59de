//! CLI commands for visuals: build and status.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use serde::Serialize;

use crate::backend::BackendRegistry;
use crate::config::Config;
use crate::diagnostics;
use crate::error::Error;
use crate::project::{BuildSummary, Project};
use crate::scanner::{self, DirectiveSyntax, SourceDocument};
use crate::snapshot::Snapshot;

/// Exit code of a build that skipped at least one directive.
const EXIT_DIRECTIVE_FAILED: u8 = 2;

/// Knobs of one `visuals build` run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Number of partitions changed documents are split into.
    pub jobs: usize,
    /// Output directory for build artifacts, relative to the project root.
    pub out: PathBuf,
}

/// What one worker produced for its partition of changed documents.
struct PartitionOutput {
    /// Directives that had to be skipped.
    diagnostics: Vec<Error>,
    /// Documents the worker owned.
    documents: BTreeSet<String>,
    /// The worker's partial project.
    partial: Project,
}

/// One occurrence as reported by `visuals status`.
#[derive(Debug, Serialize)]
struct OccurrenceStatus {
    /// Asset identifier.
    asset_id: String,
    /// Content is confirmed retrievable.
    available: bool,
    /// Document holding the occurrence.
    document: String,
    /// Content was materialized locally.
    downloaded: bool,
    /// Last backend error.
    error: Option<String>,
    /// Ordinal within the document.
    instance: usize,
    /// Effective type.
    kind: Option<String>,
    /// Rendered with the placeholder graphic.
    placeholder: bool,
    /// A generation request was issued.
    requested: bool,
    /// `definition` or `reference`.
    role: &'static str,
    /// Resolved content URI.
    uri: Option<String>,
}

/// JSON document printed by `visuals status --json`.
#[derive(Debug, Serialize)]
struct StatusReport {
    /// Every occurrence in catalog order.
    occurrences: Vec<OccurrenceStatus>,
    /// Aggregate counts.
    summary: BuildSummary,
}

/// Scan the project, bring the catalog and state up to date, run the enabled
/// backends, and persist the result.
///
/// Unchanged documents are reused from the snapshot; changed ones are purged
/// and rediscovered in `options.jobs` partitions; documents that disappeared
/// are purged for good.
///
/// # Errors
///
/// Returns configuration, scan, snapshot and integrity errors. Rejected
/// directives are reported but do not abort the build.
pub fn build(root: &Path, options: &BuildOptions) -> Result<ExitCode, Error> {
    let config = Config::load(root)?;
    let snapshot_path = root.join(&config.snapshot);
    let mut project = load_project(&snapshot_path)?;

    let sources = scanner::scan(root, &config)?;
    let present: BTreeSet<&str> = sources.iter().map(|s| return s.document.as_str()).collect();
    let vanished: Vec<String> =
        project.documents().filter(|doc| return !present.contains(doc)).map(str::to_string).collect();
    for document in &vanished {
        project.invalidate_document(document, true);
    }

    let changed: Vec<&SourceDocument> = sources
        .iter()
        .filter(|source| return project.document_hash(&source.document) != Some(&source.hash))
        .collect();
    for source in &changed {
        project.invalidate_document(&source.document, false);
    }
    tracing::info!(
        documents = sources.len(),
        changed = changed.len(),
        removed = vanished.len(),
        "scanned project"
    );

    let syntax = DirectiveSyntax::new()?;
    let rejected = discover_in_partitions(&mut project, &syntax, &changed, options.jobs)?;

    project.project_ready();
    let mut machine = BackendRegistry::builtin().activate(&config.backends);
    let summary = project.process(&mut machine);

    let placeholder_image = config.placeholder_image.as_ref().map(|image| return root.join(image));
    if let Some(copied) = project.finish(placeholder_image.as_deref(), &root.join(&options.out))? {
        eprintln!("Copied placeholder to {}", copied.display());
    }
    project.to_snapshot().write(&snapshot_path)?;

    print_backend_errors(&project);
    for e in &rejected {
        diagnostics::print_error(e);
    }
    println!(
        "Built {} documents ({} reparsed, {} removed): {} occurrences, {} available, {} placeholders, {} errors",
        sources.len(),
        changed.len(),
        vanished.len(),
        summary.occurrences,
        summary.available,
        summary.placeholders,
        summary.errors,
    );

    if rejected.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }
    println!("{} directives skipped", rejected.len());
    return Ok(ExitCode::from(EXIT_DIRECTIVE_FAILED));
}

/// Parse `changed` documents on scoped worker threads, one partial project per
/// partition, and merge the partials into `project` in partition order.
/// Returns the diagnostics of rejected directives.
///
/// # Errors
///
/// Returns the first integrity error raised by a worker or by a merge.
fn discover_in_partitions(
    project: &mut Project,
    syntax: &DirectiveSyntax,
    changed: &[&SourceDocument],
    jobs: usize,
) -> Result<Vec<Error>, Error> {
    if changed.is_empty() {
        return Ok(Vec::new());
    }
    let size = changed.len().div_ceil(jobs.max(1));
    let base: &Project = project;

    let outputs: Vec<Result<PartitionOutput, Error>> = std::thread::scope(|scope| {
        let workers: Vec<_> = changed
            .chunks(size)
            .map(|partition| return scope.spawn(move || return discover_partition(base, syntax, partition)))
            .collect();
        return workers
            .into_iter()
            .map(|worker| return worker.join().unwrap_or_else(|panic| return std::panic::resume_unwind(panic)))
            .collect();
    });
    tracing::debug!(partitions = outputs.len(), "discovered changed documents");

    let mut rejected = Vec::new();
    for output in outputs {
        let output = output?;
        project.merge_partition(&output.documents, &output.partial)?;
        rejected.extend(output.diagnostics);
    }
    return Ok(rejected);
}

/// Work of one partition: parse and discover its documents into a partial
/// project seeded from `base`.
///
/// # Errors
///
/// Returns integrity errors from discovery.
fn discover_partition(
    base: &Project,
    syntax: &DirectiveSyntax,
    partition: &[&SourceDocument],
) -> Result<PartitionOutput, Error> {
    let documents: BTreeSet<String> = partition.iter().map(|source| return source.document.clone()).collect();
    let mut partial = base.partial(&documents);
    let mut diagnostics = Vec::new();

    for source in partition {
        let parsed = syntax.parse(&source.document, &source.content);
        // A document with rejected directives is reparsed until it is fixed.
        let hash = parsed.diagnostics.is_empty().then(|| return source.hash.clone());
        partial.discover_document(&source.document, hash, &parsed.occurrences)?;
        diagnostics.extend(parsed.diagnostics);
    }
    return Ok(PartitionOutput { diagnostics, documents, partial });
}

/// Read the previous build, or start empty.
///
/// # Errors
///
/// Returns snapshot read and consistency errors.
fn load_project(snapshot_path: &Path) -> Result<Project, Error> {
    return match Snapshot::read(snapshot_path)? {
        Some(snapshot) => Project::from_snapshot(snapshot),
        None => Ok(Project::default()),
    };
}

/// List occurrences carrying a backend error.
fn print_backend_errors(project: &Project) {
    for key in project.catalog().list_all_instances(None) {
        if let Some(message) = project.state_of(&key).and_then(|state| return state.error()) {
            println!("ERROR   {key} ({message})");
        }
    }
}

/// Report every occurrence with its state, as markdown or JSON.
///
/// # Errors
///
/// Returns configuration or snapshot errors, or `Error::Json` if the report
/// cannot be serialized.
pub fn status(root: &Path, json: bool) -> Result<(), Error> {
    let config = Config::load(root)?;
    let project = load_project(&root.join(&config.snapshot))?;
    let report = StatusReport { occurrences: collect_status(&project), summary: project.summary() };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.occurrences.is_empty() {
        println!("No visuals recorded. Run `visuals build` first.");
        return Ok(());
    }
    println!("| Occurrence | Role | Type | State | URI |");
    println!("|------------|------|------|-------|-----|");
    for row in &report.occurrences {
        println!(
            "| {}@{}#{} | {} | {} | {} | {} |",
            row.asset_id,
            row.document,
            row.instance,
            row.role,
            row.kind.as_deref().unwrap_or("-"),
            state_label(row),
            row.uri.as_deref().unwrap_or("-"),
        );
    }
    let summary = report.summary;
    println!();
    println!(
        "{} occurrences, {} available, {} placeholders, {} errors",
        summary.occurrences, summary.available, summary.placeholders, summary.errors
    );
    return Ok(());
}

/// One status row per catalog occurrence.
fn collect_status(project: &Project) -> Vec<OccurrenceStatus> {
    let catalog = project.catalog();
    return catalog
        .list_all_instances(None)
        .into_iter()
        .map(|key| {
            let state = project.state_of(&key).cloned().unwrap_or_default();
            let role = if catalog.is_definition(&key) { "definition" } else { "reference" };
            return OccurrenceStatus {
                available: state.available(),
                downloaded: state.downloaded(),
                error: state.error().map(str::to_string),
                kind: catalog.kind_of(&key).map(|kind| return kind.to_string()),
                placeholder: state.placeholder(),
                requested: state.requested(),
                role,
                uri: state.uri().map(str::to_string),
                asset_id: key.asset_id,
                document: key.location.document,
                instance: key.location.instance,
            };
        })
        .collect();
}

/// Short label for the markdown status table.
fn state_label(row: &OccurrenceStatus) -> String {
    if let Some(error) = &row.error {
        return format!("error: {error}");
    }
    let label = match (row.available, row.placeholder, row.requested) {
        (true, false, _) => "available",
        (true, true, _) => "placeholder",
        (false, true, _) => "placeholder pending",
        (false, false, true) => "requested",
        (false, false, false) => "new",
    };
    return label.to_string();
}
