/// Core domain types for visual assets, their occurrences, and options.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Option keys that only shape markup (captions, alt text, css classes, link
/// targets, the raw type tag) and never affect how an asset is generated or sized.
const MARKUP_OPTION_KEYS: [&str; 8] = [
    "alt", "caption", "class", "figclass", "figwidth", "name", "target", "type",
];

/// Presentation hints attached to one occurrence, with markup-only keys removed.
///
/// Constructed only through [`AssetOptions::filtered`], so a stored value never
/// carries a denylisted key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetOptions(
    /// Remaining option key/value pairs, sorted by key.
    BTreeMap<String, String>,
);

impl AssetOptions {
    /// Drop every markup-only key from a raw directive option bag.
    pub fn filtered(raw: BTreeMap<String, String>) -> Self {
        let kept = raw
            .into_iter()
            .filter(|(key, _)| return !MARKUP_OPTION_KEYS.contains(&key.as_str()))
            .collect();
        return Self(kept);
    }

    /// Look up a single option value.
    pub fn get(&self, key: &str) -> Option<&str> {
        return self.0.get(key).map(String::as_str);
    }

    /// True when no option survived filtering.
    pub fn is_empty(&self) -> bool {
        return self.0.is_empty();
    }

    /// Iterate option pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        return self.0.iter().map(|(k, v)| return (k.as_str(), v.as_str()));
    }

    /// Number of options kept.
    pub fn len(&self) -> usize {
        return self.0.len();
    }
}

/// The kind of media an asset resolves to. Modelled after oEmbed resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    /// A plain link to external content.
    Link,
    /// A still image. The default for a directive without `:type:`.
    Photo,
    /// Arbitrary embedded HTML.
    Rich,
    /// A playable video.
    Video,
}

impl AssetType {
    /// Every type a directive may declare, in oEmbed declaration order.
    pub const ALL: [Self; 4] = [Self::Photo, Self::Video, Self::Link, Self::Rich];

    /// Lowercase name used in directives, snapshots, and reports.
    pub const fn as_str(self) -> &'static str {
        return match self {
            Self::Link => "link",
            Self::Photo => "photo",
            Self::Rich => "rich",
            Self::Video => "video",
        };
    }

    /// Whether the rendering stage can emit this type today. Only photos are.
    pub const fn is_renderable(self) -> bool {
        return matches!(self, Self::Photo);
    }
}

impl fmt::Display for AssetType {
    /// Write the lowercase type name.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(self.as_str());
    }
}

impl FromStr for AssetType {
    type Err = Error;

    /// Parse a directive `:type:` value, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        return Self::ALL
            .into_iter()
            .find(|kind| return kind.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| return Error::UnknownAssetType { value: wanted.to_string() });
    }
}

/// A SHA-256 content hash: 64 hex chars, always lowercase.
/// Newtype prevents mixing with asset ids or other strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(
    /// The hex-encoded SHA-256 digest string.
    pub String,
);

impl fmt::Display for ContentHash {
    /// Write the hex digest.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(&self.0);
    }
}

/// Where one occurrence sits: a document and its ordinal among mentions of the
/// same asset in that document, assigned in source order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Project-relative document identifier.
    pub document: String,
    /// Zero-based ordinal among mentions of the same asset within `document`.
    pub instance: usize,
}

impl Location {
    /// Build a location from its parts.
    pub fn new(document: impl Into<String>, instance: usize) -> Self {
        return Self { document: document.into(), instance };
    }
}

impl fmt::Display for Location {
    /// Render as `document#instance`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{}#{}", self.document, self.instance);
    }
}

/// Uniquely identifies one mention of an asset anywhere in the project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OccurrenceKey {
    /// Author-supplied asset identifier.
    pub asset_id: String,
    /// Document and ordinal of this mention.
    pub location: Location,
}

impl OccurrenceKey {
    /// Build a key from an asset id and a location.
    pub fn new(asset_id: impl Into<String>, location: Location) -> Self {
        return Self { asset_id: asset_id.into(), location };
    }

    /// The document this occurrence lives in.
    pub fn document(&self) -> &str {
        return &self.location.document;
    }
}

impl fmt::Display for OccurrenceKey {
    /// Render as `asset@document#instance`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{}@{}", self.asset_id, self.location);
    }
}

/// One asset directive as discovered by the document parser, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceDescriptor {
    /// Identifier the directive names.
    pub asset_id: String,
    /// Generation content of a definition. `None` for references.
    pub content: Option<String>,
    /// Type declared on the directive, `photo` unless stated.
    pub declared_type: AssetType,
    /// True when the directive carries no content.
    pub is_reference: bool,
    /// One-based line of the directive in its document.
    pub line: u32,
    /// Raw, unfiltered directive options.
    pub options: BTreeMap<String, String>,
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc, reason = "tests")]
mod tests {
    use super::*;

    #[test]
    fn filtering_strips_markup_keys() {
        let raw = BTreeMap::from([
            ("height".to_string(), "100".to_string()),
            ("alt".to_string(), "x".to_string()),
            ("caption".to_string(), "c".to_string()),
            ("scale".to_string(), "50".to_string()),
        ]);
        let options = AssetOptions::filtered(raw);

        let kept: Vec<(&str, &str)> = options.iter().collect();
        assert_eq!(kept, vec![("height", "100"), ("scale", "50")]);
    }

    #[test]
    fn filtering_keeps_alignment_hint() {
        let raw = BTreeMap::from([
            ("align".to_string(), "center".to_string()),
            ("class".to_string(), "wide".to_string()),
            ("type".to_string(), "photo".to_string()),
        ]);
        let options = AssetOptions::filtered(raw);
        assert_eq!(options.len(), 1);
        assert_eq!(options.get("align"), Some("center"));
    }

    #[test]
    fn parses_known_types_case_insensitively() {
        assert_eq!("Photo".parse::<AssetType>().unwrap(), AssetType::Photo);
        assert_eq!(" rich ".parse::<AssetType>().unwrap(), AssetType::Rich);
        assert!(matches!(
            "gif".parse::<AssetType>(),
            Err(Error::UnknownAssetType { value }) if value == "gif"
        ));
    }

    #[test]
    fn only_photos_render() {
        assert!(AssetType::Photo.is_renderable());
        assert!(!AssetType::Video.is_renderable());
        assert!(!AssetType::Link.is_renderable());
    }
}
