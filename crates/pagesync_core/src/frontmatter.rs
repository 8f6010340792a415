//! YAML frontmatter parsing and serialization.
//!
//! Database entries carry their property values as YAML frontmatter; leaf
//! pages are body-only. Key order is preserved so a parse/serialize
//! round-trip is byte-stable, which the content hasher depends on.

use indexmap::IndexMap;
use serde_yaml::Value;

use crate::error::Result;

/// Result of splitting a markdown document into frontmatter and body.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    /// The parsed frontmatter as an ordered map. Empty if none was present.
    pub properties: IndexMap<String, Value>,
    /// The body content after the frontmatter.
    pub body: String,
}

/// Parse frontmatter and body, returning empty properties if none exists.
///
/// Malformed frontmatter (an opening delimiter with no closing one) is
/// treated as plain body; unparseable YAML between valid delimiters is an
/// error the caller surfaces as a conversion failure.
pub fn parse(content: &str) -> Result<ParsedDocument> {
    if !content.starts_with("---\n") && !content.starts_with("---\r\n") {
        return Ok(ParsedDocument {
            properties: IndexMap::new(),
            body: content.to_string(),
        });
    }

    let rest = &content[4..]; // Skip first "---\n"
    let end_idx = rest.find("\n---\n").or_else(|| rest.find("\n---\r\n"));

    match end_idx {
        Some(idx) => {
            let frontmatter_str = &rest[..idx];
            let body = &rest[idx + 5..]; // Skip "\n---\n"

            let properties: IndexMap<String, Value> = serde_yaml::from_str(frontmatter_str)?;

            Ok(ParsedDocument {
                properties,
                body: body.to_string(),
            })
        }
        None => Ok(ParsedDocument {
            properties: IndexMap::new(),
            body: content.to_string(),
        }),
    }
}

/// Serialize properties and body back to markdown content.
///
/// Documents without properties serialize to the bare body.
pub fn serialize(properties: &IndexMap<String, Value>, body: &str) -> Result<String> {
    if properties.is_empty() {
        return Ok(body.to_string());
    }
    let yaml_str = serde_yaml::to_string(properties)?;
    Ok(format!("---\n{}---\n{}", yaml_str, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_frontmatter() {
        let doc = parse("---\ntitle: Hello\ncount: 3\n---\nbody text\n").unwrap();
        assert_eq!(doc.properties.len(), 2);
        assert_eq!(doc.properties["title"], Value::from("Hello"));
        assert_eq!(doc.body, "body text\n");
    }

    #[test]
    fn test_parse_without_frontmatter() {
        let doc = parse("just a body\n").unwrap();
        assert!(doc.properties.is_empty());
        assert_eq!(doc.body, "just a body\n");
    }

    #[test]
    fn test_parse_unterminated_frontmatter_is_body() {
        let doc = parse("---\ntitle: Hello\nno closing").unwrap();
        assert!(doc.properties.is_empty());
        assert!(doc.body.starts_with("---\n"));
    }

    #[test]
    fn test_serialize_roundtrip_preserves_order() {
        let src = "---\nzebra: 1\napple: 2\n---\nbody\n";
        let doc = parse(src).unwrap();
        let out = serialize(&doc.properties, &doc.body).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn test_serialize_empty_properties_is_bare_body() {
        let out = serialize(&IndexMap::new(), "hello\n").unwrap();
        assert_eq!(out, "hello\n");
    }
}
