use std::path::Path;
use std::process::{Command, Output};

const SERVICE_CONFIG: &str = "[backends.visuals]\nenabled = true\n";

const GUIDE: &str = "\
# Guide

```visual red logo
:alt: The logo
:align: center

A red circle on white.
```

Later on, the same logo again:

```visual red logo
```
";

const OTHER: &str = "\
# Other

```visual red logo
:caption: Borrowed
```

```visual partner badge
```
";

fn visuals_cmd(root: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_visuals"));
    cmd.current_dir(root);
    return cmd;
}

fn project(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }
    return dir;
}

fn build(root: &Path, extra: &[&str]) -> Output {
    return visuals_cmd(root).arg("build").args(extra).output().unwrap();
}

fn status_json(root: &Path) -> serde_json::Value {
    let output = visuals_cmd(root).args(["status", "--json"]).output().unwrap();
    assert!(output.status.success(), "status failed: {}", String::from_utf8_lossy(&output.stderr));
    return serde_json::from_slice(&output.stdout).unwrap();
}

fn occurrences(status: &serde_json::Value) -> &Vec<serde_json::Value> {
    return status["occurrences"].as_array().unwrap();
}

#[test]
fn service_build_resolves_every_occurrence() {
    let dir = project(&[(".visuals.toml", SERVICE_CONFIG), ("docs/guide.md", GUIDE), ("docs/other.md", OTHER)]);

    let output = build(dir.path(), &[]);
    assert!(output.status.success(), "build failed: {}", String::from_utf8_lossy(&output.stderr));
    assert!(dir.path().join(".visuals-state.toml").exists(), "snapshot not written");

    let status = status_json(dir.path());
    let rows = occurrences(&status);
    assert_eq!(rows.len(), 4);

    let logo: Vec<&serde_json::Value> = rows.iter().filter(|r| return r["asset_id"] == "red logo").collect();
    assert_eq!(logo.len(), 3);
    assert!(logo.iter().all(|r| return r["available"] == true && r["placeholder"] == false && r["uri"].is_string()));
    assert_eq!(logo.iter().filter(|r| return r["role"] == "definition").count(), 1);

    // Defined nowhere in the project, so nothing can produce it.
    let badge = rows.iter().find(|r| return r["asset_id"] == "partner badge").unwrap();
    assert_eq!(badge["placeholder"], true);
}

#[test]
fn unchanged_documents_are_reused() {
    let dir = project(&[(".visuals.toml", SERVICE_CONFIG), ("docs/guide.md", GUIDE), ("docs/other.md", OTHER)]);
    assert!(build(dir.path(), &[]).status.success());
    let first = status_json(dir.path());

    let second = build(dir.path(), &[]);
    assert!(second.status.success());
    assert!(String::from_utf8_lossy(&second.stdout).contains("(0 reparsed, 0 removed)"));
    assert_eq!(status_json(dir.path()), first);

    std::fs::write(dir.path().join("docs/other.md"), format!("{OTHER}\nA new paragraph.\n")).unwrap();
    let third = build(dir.path(), &[]);
    assert!(String::from_utf8_lossy(&third.stdout).contains("(1 reparsed, 0 removed)"));
    assert_eq!(status_json(dir.path()), first);
}

#[test]
fn edited_definition_is_regenerated_everywhere() {
    let dir = project(&[(".visuals.toml", SERVICE_CONFIG), ("docs/guide.md", GUIDE), ("docs/other.md", OTHER)]);
    assert!(build(dir.path(), &[]).status.success());
    let uris = |status: &serde_json::Value| -> Vec<String> {
        return occurrences(status)
            .iter()
            .filter(|r| return r["asset_id"] == "red logo")
            .map(|r| return r["uri"].as_str().unwrap().to_string())
            .collect();
    };
    let before = uris(&status_json(dir.path()));

    let edited = GUIDE.replace("A red circle on white.", "A red square on white.");
    std::fs::write(dir.path().join("docs/guide.md"), edited).unwrap();
    let output = build(dir.path(), &[]);
    assert!(output.status.success(), "build failed: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("(1 reparsed, 0 removed)"));

    let after = uris(&status_json(dir.path()));
    assert_eq!(after.len(), 3);
    assert!(after.iter().all(|uri| return *uri == after[0]), "occurrences disagree: {after:?}");
    assert!(!before.contains(&after[0]), "stale uri kept: {after:?}");
}

#[test]
fn enabling_the_service_replaces_placeholders() {
    let dir = project(&[("docs/guide.md", GUIDE)]);
    assert!(build(dir.path(), &[]).status.success());
    assert!(build(dir.path(), &[]).status.success());
    assert_eq!(status_json(dir.path())["summary"]["placeholders"], 2);

    std::fs::write(dir.path().join(".visuals.toml"), SERVICE_CONFIG).unwrap();
    assert!(build(dir.path(), &[]).status.success());
    let status = status_json(dir.path());
    assert_eq!(status["summary"]["placeholders"], 0);
    assert!(occurrences(&status).iter().all(|r| return r["uri"].is_string()));
}

#[test]
fn placeholder_image_is_copied_without_a_service() {
    let config = "placeholder_image = \"assets/placeholder.svg\"\n";
    let dir = project(&[(".visuals.toml", config), ("assets/placeholder.svg", "<svg/>"), ("docs/guide.md", GUIDE)]);

    let output = build(dir.path(), &["--out", "site"]);
    assert!(output.status.success(), "build failed: {}", String::from_utf8_lossy(&output.stderr));
    assert!(dir.path().join("site/placeholder.svg").exists(), "placeholder not copied");

    let status = status_json(dir.path());
    assert!(occurrences(&status).iter().all(|r| return r["placeholder"] == true && r["available"] == true));
    assert_eq!(status["summary"]["placeholders"], 2);
}

#[test]
fn unsupported_directives_fail_the_build_but_not_the_rest() {
    let doc = "```visual intro clip\n:type: video\n\nA short clip.\n```\n\n```visual diagram\nBoxes and arrows.\n```\n";
    let dir = project(&[(".visuals.toml", SERVICE_CONFIG), ("guide.md", doc)]);

    let output = build(dir.path(), &[]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unsupported Asset Type"));

    let status = status_json(dir.path());
    let rows = occurrences(&status);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["asset_id"], "diagram");

    // The document keeps being reparsed until it is fixed.
    assert_eq!(build(dir.path(), &[]).status.code(), Some(2));
}

#[test]
fn conflicting_definitions_abort_without_writing() {
    let dir = project(&[
        ("a.md", "```visual logo\nRed.\n```\n"),
        ("b.md", "```visual logo\nBlue.\n```\n"),
    ]);

    let output = build(dir.path(), &["--jobs", "2"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Conflicting Definition"));
    assert!(!dir.path().join(".visuals-state.toml").exists());
}

#[test]
fn removed_documents_are_forgotten() {
    let dir = project(&[(".visuals.toml", SERVICE_CONFIG), ("docs/guide.md", GUIDE), ("docs/other.md", OTHER)]);
    assert!(build(dir.path(), &[]).status.success());

    std::fs::remove_file(dir.path().join("docs/other.md")).unwrap();
    let output = build(dir.path(), &[]);
    assert!(String::from_utf8_lossy(&output.stdout).contains("(0 reparsed, 1 removed)"));

    let status = status_json(dir.path());
    assert!(occurrences(&status).iter().all(|r| return r["document"] == "docs/guide.md"));
    let snapshot = std::fs::read_to_string(dir.path().join(".visuals-state.toml")).unwrap();
    assert!(!snapshot.contains("docs/other.md"));
}

#[test]
fn parallel_build_matches_serial_build() {
    let files: Vec<(String, String)> = (0..6)
        .map(|i| {
            let body = if i == 0 {
                "```visual shared\nA shared diagram.\n```\n".to_string()
            } else {
                format!("```visual shared\n```\n\n```visual local {i}\nPicture {i}.\n```\n")
            };
            return (format!("docs/page{i}.md"), body);
        })
        .collect();
    let mut with_config: Vec<(&str, &str)> = files.iter().map(|(p, c)| return (p.as_str(), c.as_str())).collect();
    with_config.push((".visuals.toml", SERVICE_CONFIG));

    let serial = project(&with_config);
    let parallel = project(&with_config);
    assert!(build(serial.path(), &["--jobs", "1"]).status.success());
    assert!(build(parallel.path(), &["--jobs", "4"]).status.success());

    let serial_status = status_json(serial.path());
    assert_eq!(occurrences(&serial_status).len(), 11);
    assert_eq!(serial_status, status_json(parallel.path()));
}

#[test]
fn status_without_a_build_is_empty() {
    let dir = project(&[("guide.md", GUIDE)]);
    let output = visuals_cmd(dir.path()).arg("status").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Run `visuals build` first"));
}
