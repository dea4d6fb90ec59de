use crate::error::Error;
use crate::types::{AssetType, Location};

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Render an error as valid markdown with bold headings and print to stderr.
pub fn print_error(e: &Error) {
    let md = render_error(e);
    for line in md.lines() {
        if line.starts_with('#') {
            eprintln!("{BOLD}{line}{RESET}");
        } else {
            eprintln!("{line}");
        }
    }
}

/// Render an error as a structured markdown diagnostic.
///
/// Each variant produces a block with what happened and, where the author can
/// act on it, how to fix it.
pub fn render_error(e: &Error) -> String {
    return match e {
        Error::ConflictingDefinition { asset_id, existing, incoming } => {
            render_conflicting_definition(asset_id, existing, incoming)
        },
        Error::DocumentNotPurged { document } => format!(
            "\
# Error: Document Not Purged

`{document}` was discovered twice in one build. This is a bug in the build
pipeline, not in the document.
"
        ),
        Error::SnapshotCorrupt { reason } => format!(
            "\
# Error: Snapshot Corrupt

{reason}

## Fix

Delete the snapshot and rebuild. Every asset will be requested again:

    rm .visuals-state.toml
    visuals build
"
        ),
        Error::SnapshotVersion { expected, found } => format!(
            "\
# Error: Snapshot Version

The snapshot was written with format version {found}; this build reads version {expected}.

## Fix

Delete the snapshot and rebuild:

    visuals build
"
        ),
        Error::UnknownAssetType { value } => render_unknown_type(value),
        Error::UnsupportedAssetType { document, kind, line } => format!(
            "\
# Error: Unsupported Asset Type

{document}:{line} declares `:type: {kind}`, which cannot be rendered yet.

## Fix

Use `:type: photo` or remove the directive.
"
        ),
        _ => render_generic(e),
    };
}

fn render_generic(e: &Error) -> String {
    return match e {
        Error::FileNotFound { path } => format!(
            "\
# Error: File Not Found

`{}` does not exist.

## Fix

Check `placeholder_image` in your `.visuals.toml`.
",
            path.display()
        ),
        Error::Io(e) => format!(
            "\
# Error: I/O

{e}
"
        ),
        Error::TomlDe(e) => format!(
            "\
# Error: Invalid TOML

{e}
"
        ),
        _ => format!(
            "\
# Error

{e}
"
        ),
    };
}

fn render_conflicting_definition(asset_id: &str, existing: &Location, incoming: &Location) -> String {
    return format!(
        "\
# Error: Conflicting Definition

Asset `{asset_id}` is defined in two places:

- {existing}
- {incoming}

An asset has at most one definition. Every other occurrence must be a reference.

## Fix

Empty the body of one of the two `visual {asset_id}` blocks to turn it into a
reference, or give one of them a different id.
"
    );
}

fn render_unknown_type(value: &str) -> String {
    let known: Vec<&str> = AssetType::ALL.iter().map(|kind| return kind.as_str()).collect();
    return format!(
        "\
# Error: Unknown Asset Type

`:type: {value}` is not a known asset type.

## Known types

{}
",
        known.iter().map(|k| return format!("- `{k}`")).collect::<Vec<_>>().join("\n")
    );
}
