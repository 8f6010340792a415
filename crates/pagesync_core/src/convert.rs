//! Canonical markdown form and document rendering.
//!
//! These are the pure conversion functions the engine calls at the boundary
//! between file bytes and remote document content. The canonical form is
//! what gets hashed and written, so it must be stable:
//! `canonicalize(x) == canonicalize(canonicalize(x))` for all inputs.

use std::path::Path;

use indexmap::IndexMap;
use serde_yaml::Value;

use crate::error::{Result, SyncError};
use crate::frontmatter::{self, ParsedDocument};
use crate::state::EntryKind;

/// Normalize text into canonical form: LF line endings and exactly one
/// trailing newline. Empty input stays empty.
#[must_use]
pub fn canonicalize(text: &str) -> String {
    let mut out = text.replace("\r\n", "\n");
    if out.is_empty() {
        return out;
    }
    while out.ends_with('\n') {
        out.pop();
    }
    out.push('\n');
    out
}

/// Render a document's properties and body into canonical file bytes.
///
/// Leaf and container pages render the bare body; database entries render
/// YAML frontmatter followed by the body. Databases themselves render their
/// schema as YAML.
pub fn render(kind: EntryKind, doc: &ParsedDocument) -> Result<String> {
    let text = match kind {
        EntryKind::DatabaseEntry => frontmatter::serialize(&doc.properties, &doc.body)?,
        EntryKind::Database => serde_yaml::to_string(&doc.properties)?,
        EntryKind::Leaf | EntryKind::ContainerPage => doc.body.clone(),
    };
    Ok(canonicalize(&text))
}

/// Parse canonical file bytes into properties and body for the given kind.
pub fn parse(kind: EntryKind, path: &str, text: &str) -> Result<ParsedDocument> {
    match kind {
        EntryKind::DatabaseEntry => {
            frontmatter::parse(text).map_err(|e| conversion_error(path, e))
        }
        EntryKind::Database => {
            let properties: IndexMap<String, Value> =
                serde_yaml::from_str(text).map_err(|e| conversion_error(path, e.into()))?;
            Ok(ParsedDocument {
                properties,
                body: String::new(),
            })
        }
        EntryKind::Leaf | EntryKind::ContainerPage => Ok(ParsedDocument {
            properties: IndexMap::new(),
            body: text.to_string(),
        }),
    }
}

fn conversion_error(path: &str, e: SyncError) -> SyncError {
    SyncError::Conversion {
        path: path.to_string(),
        message: e.to_string(),
    }
}

/// Derive a document title from a file or directory name (the stem).
#[must_use]
pub fn title_from_path(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Turn a remote title into a filesystem-safe name component.
///
/// Path separators and characters that are unlikely to survive every
/// filesystem are replaced; leading dots are stripped so synthesized names
/// never collide with the metadata directory or hidden files.
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            _ => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.').to_string();
    if trimmed.is_empty() {
        "Untitled".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_is_idempotent() {
        for input in ["a\r\nb", "a\nb\n\n\n", "a", ""] {
            let once = canonicalize(input);
            assert_eq!(once, canonicalize(&once));
        }
    }

    #[test]
    fn test_canonicalize_single_trailing_newline() {
        assert_eq!(canonicalize("hello"), "hello\n");
        assert_eq!(canonicalize("hello\n\n"), "hello\n");
        assert_eq!(canonicalize(""), "");
    }

    #[test]
    fn test_render_parse_roundtrip_database_entry() {
        let text = "---\nstatus: open\n---\nsome notes\n";
        let doc = parse(EntryKind::DatabaseEntry, "Tasks/A.md", text).unwrap();
        let rendered = render(EntryKind::DatabaseEntry, &doc).unwrap();
        assert_eq!(rendered, text);
    }

    #[test]
    fn test_render_leaf_ignores_properties() {
        let doc = ParsedDocument {
            properties: IndexMap::new(),
            body: "hello world".to_string(),
        };
        assert_eq!(render(EntryKind::Leaf, &doc).unwrap(), "hello world\n");
    }

    #[test]
    fn test_title_from_path() {
        assert_eq!(title_from_path("Projects/Alpha.md"), "Alpha");
        assert_eq!(title_from_path("Notes.md"), "Notes");
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("a/b: c"), "a-b- c");
        assert_eq!(sanitize_title(".hidden"), "hidden");
        assert_eq!(sanitize_title("  "), "Untitled");
    }
}
