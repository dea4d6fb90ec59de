//! File watcher: runs `build` on startup, then re-runs on document changes.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use notify::{RecursiveMode, Watcher as _};

use crate::commands::{self, BuildOptions};
use crate::diagnostics;
use crate::error::Error;

/// Debounce delay between filesystem events and rebuild.
const DEBOUNCE_MS: u64 = 100;

/// Exit code when the last build failed outright.
const EXIT_RUNTIME_ERROR: u8 = 3;

/// Whether a changed path can affect the build: a markdown document or the
/// project configuration. The snapshot and build output never qualify, so a
/// rebuild does not trigger itself.
fn affects_build(path: &Path) -> bool {
    let is_markdown = path.extension().is_some_and(|ext| return ext == "md");
    let is_config = path.file_name().is_some_and(|name| return name == ".visuals.toml");
    return is_markdown || is_config;
}

/// Create a filesystem watcher that sends relevant events on the given channel.
///
/// # Errors
///
/// Returns `Error::Watch` if the watcher cannot be created.
fn create_watcher(tx: crossbeam_channel::Sender<()>) -> Result<notify::RecommendedWatcher, Error> {
    let watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        if let Ok(event) = res
            && matches!(
                event.kind,
                notify::EventKind::Create(_) | notify::EventKind::Modify(_) | notify::EventKind::Remove(_)
            )
            && event.paths.iter().any(|path| return affects_build(path))
        {
            let _ = tx.send(());
        }
    })?;
    return Ok(watcher);
}

/// Entry point for the watch command.
///
/// Runs an initial build, then watches the project tree and rebuilds on changes.
///
/// # Errors
///
/// Returns `Error::Watch` if the watcher cannot be set up.
pub fn run(root: &Path, options: &BuildOptions) -> Result<ExitCode, Error> {
    eprintln!("watch: initial build");
    let mut last_code = run_build(root, options);

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut watcher = create_watcher(tx)?;
    let watched: PathBuf = root.to_path_buf();
    watcher.watch(&watched, RecursiveMode::Recursive)?;
    eprintln!("watch: monitoring {}, press Ctrl+C to stop", watched.display());

    while rx.recv().is_ok() {
        let debounce = Duration::from_millis(DEBOUNCE_MS);
        while rx.recv_timeout(debounce).is_ok() {}
        eprintln!("watch: change detected, rebuilding...");
        last_code = run_build(root, options);
    }

    return Ok(last_code);
}

/// Run build once and print errors. Returns the exit code from build.
fn run_build(root: &Path, options: &BuildOptions) -> ExitCode {
    return match commands::build(root, options) {
        Ok(code) => code,
        Err(e) => {
            diagnostics::print_error(&e);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        },
    };
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc, reason = "tests")]
mod tests {
    use super::*;

    #[test]
    fn only_documents_and_config_trigger_rebuilds() {
        assert!(affects_build(Path::new("docs/guide.md")));
        assert!(affects_build(Path::new("./.visuals.toml")));
        assert!(!affects_build(Path::new(".visuals-state.toml")));
        assert!(!affects_build(Path::new("_build/placeholder.svg")));
    }
}
