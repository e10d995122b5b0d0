use rustc_hash::FxHashSet;
use serde::Serialize;
use std::fmt;

/// A set of normalized tag tokens.
///
/// Every token is lowercase, non-empty and free of whitespace. Sets are built
/// once and combined with [`TagSet::union`] and [`TagSet::difference`]; there
/// is no way to mutate a set in place from outside the crate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagSet {
    tags: FxHashSet<String>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a whitespace-separated tag string: `"primitive Piercing"`.
    pub fn parse(input: &str) -> Self {
        input.split_whitespace().collect()
    }

    /// Derive tags from a type name by splitting it at case transitions.
    ///
    /// `PointedStick` yields `pointed` and `stick`; `HTTPServer` yields `http`
    /// and `server`. Underscores, hyphens and spaces also split.
    pub fn from_type_name(name: &str) -> Self {
        split_case_transitions(name).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Returns true if the set holds the tag. The argument is normalized first.
    pub fn contains(&self, tag: &str) -> bool {
        match normalize(tag) {
            Some(tag) => self.tags.contains(&tag),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    /// Tags in lexical order, for stable display and logging.
    pub fn sorted(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.iter().collect();
        tags.sort_unstable();
        tags
    }

    pub fn union(&self, other: &TagSet) -> TagSet {
        TagSet {
            tags: self.tags.union(&other.tags).cloned().collect(),
        }
    }

    pub fn difference(&self, other: &TagSet) -> TagSet {
        TagSet {
            tags: self.tags.difference(&other.tags).cloned().collect(),
        }
    }

    /// Returns true if at least one tag is shared.
    pub fn intersects(&self, other: &TagSet) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.tags.iter().any(|tag| large.tags.contains(tag))
    }

    pub fn is_superset(&self, other: &TagSet) -> bool {
        self.tags.is_superset(&other.tags)
    }

    pub(crate) fn insert_normalized(&mut self, tag: String) {
        self.tags.insert(tag);
    }
}

impl<S: AsRef<str>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = TagSet::default();
        for raw in iter {
            for token in raw.as_ref().split_whitespace() {
                if let Some(tag) = normalize(token) {
                    set.insert_normalized(tag);
                }
            }
        }
        set
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sorted().join(" "))
    }
}

/// Lowercase a single token. Returns `None` for empty or whitespace-bearing input.
pub fn normalize(token: &str) -> Option<String> {
    let token = token.trim();
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return None;
    }
    Some(token.to_lowercase())
}

fn split_case_transitions(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }

        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            // fooBar, foo2Bar, and the `S` in HTTPServer
            if !prev.is_uppercase() || next_is_lower {
                tokens.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Readable name for a type: its case-split words joined by spaces, case kept.
///
/// `PointedStick` becomes `Pointed Stick`.
pub fn spaced_type_name(name: &str) -> String {
    split_case_transitions(name).join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_whitespace_and_lowercases() {
        let tags = TagSet::parse("  Primitive\tpiercing\n SHARP ");
        assert_eq!(tags.sorted(), vec!["piercing", "primitive", "sharp"]);
    }

    #[test]
    fn parse_empty_string() {
        assert!(TagSet::parse("").is_empty());
        assert!(TagSet::parse("   \n").is_empty());
    }

    #[test]
    fn type_name_compound() {
        let tags = TagSet::from_type_name("PointedStick");
        assert_eq!(tags.sorted(), vec!["pointed", "stick"]);
    }

    #[test]
    fn type_name_single_word() {
        assert_eq!(TagSet::from_type_name("Item").sorted(), vec!["item"]);
    }

    #[test]
    fn type_name_acronym_and_separators() {
        assert_eq!(
            TagSet::from_type_name("HTTPServer").sorted(),
            vec!["http", "server"]
        );
        assert_eq!(
            TagSet::from_type_name("magic_ring").sorted(),
            vec!["magic", "ring"]
        );
        assert_eq!(
            TagSet::from_type_name("Potion2Heal").sorted(),
            vec!["heal", "potion2"]
        );
    }

    #[test]
    fn serializes_normalized_tokens() {
        let text = ron::to_string(&TagSet::parse("SHARP")).unwrap();
        assert!(text.contains("\"sharp\""), "{text}");
        assert!(!text.contains("SHARP"), "{text}");
    }

    #[test]
    fn spaced_names_keep_case() {
        assert_eq!(spaced_type_name("PointedStick"), "Pointed Stick");
        assert_eq!(spaced_type_name("HTTPServer"), "HTTP Server");
        assert_eq!(spaced_type_name("magic_ring"), "magic ring");
        assert_eq!(spaced_type_name("Item"), "Item");
    }

    #[test]
    fn tokens_never_empty_or_whitespace() {
        let tags = TagSet::from_type_name("__Odd  NameHere__");
        for tag in tags.iter() {
            assert!(!tag.is_empty());
            assert!(!tag.chars().any(char::is_whitespace));
        }
        assert_eq!(tags.sorted(), vec!["here", "name", "odd"]);
    }

    #[test]
    fn contains_is_case_insensitive() {
        let tags = TagSet::parse("weapon");
        assert!(tags.contains("Weapon"));
        assert!(!tags.contains(""));
        assert!(!tags.contains("armor"));
    }

    #[test]
    fn union_and_difference() {
        let a = TagSet::parse("foo bar");
        let b = TagSet::parse("bar baz");
        assert_eq!(a.union(&b).sorted(), vec!["bar", "baz", "foo"]);
        assert_eq!(a.difference(&b).sorted(), vec!["foo"]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&TagSet::parse("qux")));
        assert!(a.union(&b).is_superset(&a));
    }

    #[test]
    fn display_is_sorted() {
        assert_eq!(TagSet::parse("b a c").to_string(), "a b c");
    }
}
