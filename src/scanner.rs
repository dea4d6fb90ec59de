use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::Error;
use crate::hasher;
use crate::types::{AssetType, ContentHash, OccurrenceDescriptor};

/// One markdown document selected for the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Full source text.
    pub content: String,
    /// Project-relative path with `/` separators.
    pub document: String,
    /// Hash of `content`, for change detection.
    pub hash: ContentHash,
}

/// Directives of one document plus the ones that had to be skipped.
#[derive(Debug, Default)]
pub struct ParsedDocument {
    /// Why skipped directives were skipped.
    pub diagnostics: Vec<Error>,
    /// Accepted directives in source order.
    pub occurrences: Vec<OccurrenceDescriptor>,
}

/// Compiled patterns of the `visual` fenced block:
///
/// ````text
/// ```visual <asset id>
/// :key: value
/// content
/// ```
/// ````
pub struct DirectiveSyntax {
    /// Closing fence.
    close: Regex,
    /// Opening fence capturing the asset id.
    open: Regex,
    /// `:key: value` option line at the head of a block.
    option: Regex,
}

impl DirectiveSyntax {
    /// Compile the directive patterns.
    ///
    /// # Errors
    ///
    /// Returns `Error::Regex` if a pattern fails to compile.
    pub fn new() -> Result<Self, Error> {
        return Ok(Self {
            close: Regex::new(r"^\s*```\s*$")?,
            open: Regex::new(r"^\s*```visual\s+(\S.*?)\s*$")?,
            option: Regex::new(r"^:([A-Za-z][\w-]*):\s*(.*?)\s*$")?,
        });
    }

    /// Extract every `visual` block of `content`, in source order. A block
    /// whose body is blank is a reference. An unterminated block runs to the
    /// end of the document.
    pub fn parse(&self, document: &str, content: &str) -> ParsedDocument {
        let mut parsed = ParsedDocument::default();
        let mut lines = content.lines().enumerate();

        while let Some((index, line)) = lines.next() {
            let Some(asset_id) = self.open.captures(line).and_then(|c| return c.get(1)) else {
                continue;
            };
            let line_number = u32::try_from(index.saturating_add(1)).unwrap_or(u32::MAX);

            let mut options = BTreeMap::new();
            let mut body: Vec<&str> = Vec::new();
            for (_, inner) in lines.by_ref() {
                if self.close.is_match(inner) {
                    break;
                }
                if body.is_empty()
                    && let Some(option) = self.option.captures(inner)
                    && let (Some(key), Some(value)) = (option.get(1), option.get(2))
                {
                    options.insert(key.as_str().to_string(), value.as_str().to_string());
                    continue;
                }
                body.push(inner);
            }

            let text = body.join("\n").trim().to_string();
            let is_reference = text.is_empty();
            match declared_type(document, line_number, options.get("type").map(String::as_str)) {
                Ok(declared_type) => parsed.occurrences.push(OccurrenceDescriptor {
                    asset_id: asset_id.as_str().to_string(),
                    content: (!is_reference).then_some(text),
                    declared_type,
                    is_reference,
                    line: line_number,
                    options,
                }),
                Err(e) => {
                    tracing::warn!(document, line = line_number, error = %e, "skipping visual directive");
                    parsed.diagnostics.push(e);
                },
            }
        }
        return parsed;
    }
}

/// Resolve the `:type:` option. Photo when absent.
///
/// # Errors
///
/// Returns `Error::UnknownAssetType` for values outside the known set, or
/// `Error::UnsupportedAssetType` for types that cannot be rendered yet.
fn declared_type(document: &str, line: u32, value: Option<&str>) -> Result<AssetType, Error> {
    let kind = match value {
        None => AssetType::Photo,
        Some(v) => v.parse::<AssetType>()?,
    };
    if !kind.is_renderable() {
        return Err(Error::UnsupportedAssetType { document: document.to_string(), kind, line });
    }
    return Ok(kind);
}

/// Read every markdown document under `root` that the config selects,
/// sorted by path.
///
/// # Errors
///
/// Returns `Error::Io` if any markdown file cannot be read.
pub fn scan(root: &Path, config: &Config) -> Result<Vec<SourceDocument>, Error> {
    let mut documents = Vec::new();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| return e.file_type().is_file() && e.path().extension().is_some_and(|ext| return ext == "md"))
    {
        let md_path = entry.path();
        let relative = md_path.strip_prefix(root).unwrap_or(md_path);
        let document = relative.to_string_lossy().replace('\\', "/");
        if !config.should_scan(&document) {
            continue;
        }

        let content = std::fs::read_to_string(md_path)?;
        let hash = hasher::hash_content(&content);
        documents.push(SourceDocument { content, document, hash });
    }

    documents.sort_by(|a, b| return a.document.cmp(&b.document));
    tracing::debug!(documents = documents.len(), "scanned markdown");
    return Ok(documents);
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc, reason = "tests")]
mod tests {
    use super::*;

    fn parse(content: &str) -> ParsedDocument {
        return DirectiveSyntax::new().unwrap().parse("guide.md", content);
    }

    #[test]
    fn definition_with_options() {
        let parsed = parse(
            "# Guide\n\n```visual red logo\n:alt: Our logo\n:width: 200\n\nA red circle\non white.\n```\n",
        );
        assert!(parsed.diagnostics.is_empty());
        let [occurrence] = parsed.occurrences.as_slice() else { panic!("one directive expected") };
        assert_eq!(occurrence.asset_id, "red logo");
        assert_eq!(occurrence.line, 3);
        assert!(!occurrence.is_reference);
        assert_eq!(occurrence.content.as_deref(), Some("A red circle\non white."));
        assert_eq!(occurrence.options.get("alt").map(String::as_str), Some("Our logo"));
        assert_eq!(occurrence.declared_type, AssetType::Photo);
    }

    #[test]
    fn empty_body_is_a_reference() {
        let parsed = parse("```visual logo\n:caption: again\n```\n\n```visual logo\n```\n");
        assert_eq!(parsed.occurrences.len(), 2);
        assert!(parsed.occurrences.iter().all(|o| return o.is_reference && o.content.is_none()));
    }

    #[test]
    fn option_lines_only_at_the_head() {
        let parsed = parse("```visual chart\nBars\n:alt: not an option\n```\n");
        let occurrence = parsed.occurrences.first().unwrap();
        assert!(occurrence.options.is_empty());
        assert_eq!(occurrence.content.as_deref(), Some("Bars\n:alt: not an option"));
    }

    #[test]
    fn other_fences_are_ignored() {
        let parsed = parse("```rust\nfn main() {}\n```\n\n```visual\n```\n");
        assert!(parsed.occurrences.is_empty());
    }

    #[test]
    fn unsupported_and_unknown_types_are_skipped() {
        let parsed = parse(
            "```visual clip\n:type: video\nA clip\n```\n```visual odd\n:type: hologram\nx\n```\n```visual ok\n:type: photo\ny\n```\n",
        );
        assert_eq!(parsed.occurrences.len(), 1);
        assert!(matches!(
            parsed.diagnostics.as_slice(),
            [Error::UnsupportedAssetType { kind: AssetType::Video, line: 1, .. }, Error::UnknownAssetType { .. }]
        ));
    }

    #[test]
    fn scan_applies_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs/drafts")).unwrap();
        std::fs::write(dir.path().join("docs/b.md"), "b").unwrap();
        std::fs::write(dir.path().join("docs/a.md"), "a").unwrap();
        std::fs::write(dir.path().join("docs/drafts/c.md"), "c").unwrap();
        std::fs::write(dir.path().join("docs/notes.txt"), "n").unwrap();
        let config = Config::parse("exclude = [\"docs/drafts/\"]").unwrap();

        let documents = scan(dir.path(), &config).unwrap();
        let names: Vec<&str> = documents.iter().map(|d| return d.document.as_str()).collect();
        assert_eq!(names, vec!["docs/a.md", "docs/b.md"]);
        assert_eq!(documents.first().unwrap().hash, hasher::hash_content("a"));
    }
}
