//! Field paths and `{placeholder}` format templates.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("format template parse error: {0}")]
    Parse(String),
    #[error("invalid field path '{0}'")]
    InvalidPath(String),
}

/// Where a path starts looking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathRoot {
    /// The object being mastered.
    Own,
    /// The object a modifier is applied to.
    Source,
    /// An enclosing object, `n` nesting levels up.
    Parent(usize),
}

/// A dotted reference to a field: `value`, `source.name`, `parent.prefix`,
/// `weapon.damage`.
///
/// Segments after the first step into nested mastered objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    root: PathRoot,
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(input: &str) -> Result<Self, FormatError> {
        let parts: Vec<&str> = input.trim().split('.').collect();
        let mut idx = 0;
        let root = match parts[0] {
            "source" => {
                idx = 1;
                PathRoot::Source
            }
            "parent" => {
                while parts.get(idx) == Some(&"parent") {
                    idx += 1;
                }
                PathRoot::Parent(idx)
            }
            _ => PathRoot::Own,
        };

        let segments: Vec<String> = parts[idx..].iter().map(|s| s.to_string()).collect();
        if segments.is_empty() || !segments.iter().all(|s| is_identifier(s)) {
            return Err(FormatError::InvalidPath(input.to_string()));
        }
        Ok(Self { root, segments })
    }

    pub fn root(&self) -> PathRoot {
        self.root
    }

    /// The field looked up on the root object.
    pub fn field(&self) -> &str {
        &self.segments[0]
    }

    /// Segments stepping into nested objects after [`FieldPath::field`].
    pub fn rest(&self) -> &[String] {
        &self.segments[1..]
    }

    /// The sibling field this path reads, if it starts on the object itself.
    pub fn own_field(&self) -> Option<&str> {
        match self.root {
            PathRoot::Own => Some(self.field()),
            _ => None,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root {
            PathRoot::Own => {}
            PathRoot::Source => write!(f, "source.")?,
            PathRoot::Parent(n) => {
                for _ in 0..n {
                    write!(f, "parent.")?;
                }
            }
        }
        write!(f, "{}", self.segments.join("."))
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// A segment of a parsed format template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text, emitted as-is.
    Literal(String),
    /// A field reference: `{source.name}`.
    Field(FieldPath),
}

/// A parsed format template like `"{prefix} {source.name}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatTemplate {
    text: String,
    segments: Vec<Segment>,
}

impl FormatTemplate {
    /// Parse a template string into segments.
    ///
    /// - `{path}` → `Field`
    /// - `{{` / `}}` → literal braces
    /// - everything else → `Literal`
    pub fn parse(input: &str) -> Result<FormatTemplate, FormatError> {
        let mut segments = Vec::new();
        let mut literal_buf = String::new();
        let chars: Vec<char> = input.chars().collect();
        let len = chars.len();
        let mut i = 0;

        while i < len {
            if chars[i] == '{' {
                if i + 1 < len && chars[i + 1] == '{' {
                    literal_buf.push('{');
                    i += 2;
                    continue;
                }

                if !literal_buf.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal_buf)));
                }

                let start = i + 1;
                let mut end = start;
                let mut closed = false;
                while end < len {
                    if chars[end] == '{' {
                        return Err(FormatError::Parse(
                            "nested braces are not allowed".to_string(),
                        ));
                    }
                    if chars[end] == '}' {
                        closed = true;
                        break;
                    }
                    end += 1;
                }

                if !closed {
                    return Err(FormatError::Parse("unclosed brace".to_string()));
                }

                let content: String = chars[start..end].iter().collect();
                if content.trim().is_empty() {
                    return Err(FormatError::Parse("empty braces".to_string()));
                }

                segments.push(Segment::Field(FieldPath::parse(&content)?));
                i = end + 1;
            } else if chars[i] == '}' {
                if i + 1 < len && chars[i + 1] == '}' {
                    literal_buf.push('}');
                    i += 2;
                    continue;
                }
                return Err(FormatError::Parse("unmatched closing brace".to_string()));
            } else {
                literal_buf.push(chars[i]);
                i += 1;
            }
        }

        if !literal_buf.is_empty() {
            segments.push(Segment::Literal(literal_buf));
        }

        Ok(FormatTemplate {
            text: input.to_string(),
            segments,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Every field path the template reads.
    pub fn paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(path) => Some(path),
            Segment::Literal(_) => None,
        })
    }

    /// Render by asking `lookup` for each referenced field.
    pub fn render<E>(
        &self,
        mut lookup: impl FnMut(&FieldPath) -> Result<String, E>,
    ) -> Result<String, E> {
        let mut out = String::with_capacity(self.text.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(path) => out.push_str(&lookup(path)?),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_literal_only() {
        let t = FormatTemplate::parse("Worn Spear").unwrap();
        assert_eq!(t.segments(), &[Segment::Literal("Worn Spear".to_string())]);
    }

    #[test]
    fn parse_field_refs() {
        let t = FormatTemplate::parse("{prefix} {source.name} of DOOM").unwrap();
        assert_eq!(t.segments().len(), 4);
        let paths: Vec<String> = t.paths().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["prefix", "source.name"]);
    }

    #[test]
    fn parse_escaped_braces() {
        let t = FormatTemplate::parse("Use {{braces}} here.").unwrap();
        assert_eq!(
            t.segments(),
            &[Segment::Literal("Use {braces} here.".to_string())]
        );
    }

    #[test]
    fn parse_errors() {
        assert!(FormatTemplate::parse("Bad {} here").is_err());
        assert!(FormatTemplate::parse("Bad {outer{inner}} here").is_err());
        assert!(FormatTemplate::parse("Bad {unclosed here").is_err());
        assert!(FormatTemplate::parse("Bad } here").is_err());
        assert!(matches!(
            FormatTemplate::parse("{source.}"),
            Err(FormatError::InvalidPath(_))
        ));
    }

    #[test]
    fn path_roots() {
        let own = FieldPath::parse("weapon.damage").unwrap();
        assert_eq!(own.root(), PathRoot::Own);
        assert_eq!(own.field(), "weapon");
        assert_eq!(own.rest(), &["damage".to_string()]);
        assert_eq!(own.own_field(), Some("weapon"));

        let source = FieldPath::parse("source.name").unwrap();
        assert_eq!(source.root(), PathRoot::Source);
        assert_eq!(source.own_field(), None);

        let grandparent = FieldPath::parse("parent.parent.name").unwrap();
        assert_eq!(grandparent.root(), PathRoot::Parent(2));
        assert_eq!(grandparent.to_string(), "parent.parent.name");
    }

    #[test]
    fn path_rejects_bare_roots() {
        assert!(FieldPath::parse("source").is_err());
        assert!(FieldPath::parse("parent").is_err());
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse("has space").is_err());
    }

    #[test]
    fn render_with_lookup() {
        let t = FormatTemplate::parse("{prefix} {source.name}").unwrap();
        let out: Result<String, ()> = t.render(|path| {
            Ok(match path.field() {
                "prefix" => "Gnarled".to_string(),
                _ => "Club".to_string(),
            })
        });
        assert_eq!(out.unwrap(), "Gnarled Club");
    }
}
