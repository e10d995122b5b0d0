use serde::{Deserialize, Serialize};
use std::fmt;

/// Newtype wrapper for declared template type IDs.
///
/// IDs are assigned in declaration order, so ordering by ID is ordering by
/// declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub u32);

/// Newtype wrapper for tag repository IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryId(pub u32);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a template type is used for.
///
/// Kinds are fixed per lineage: a template declared under a modifier is a
/// modifier, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TemplateKind {
    /// A plain template, mastered into an object.
    #[default]
    Blueprint,
    /// Rewrites a source object's fields into a new mastered object.
    Modifier,
    /// Selects a `product` and applies a list of modifiers to it.
    Factory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_ids_order_by_declaration() {
        let mut ids = vec![TemplateId(3), TemplateId(1), TemplateId(2)];
        ids.sort();
        assert_eq!(ids, vec![TemplateId(1), TemplateId(2), TemplateId(3)]);
        assert_eq!(TemplateId(7).to_string(), "#7");
    }

    #[test]
    fn kind_defaults_to_blueprint() {
        assert_eq!(TemplateKind::default(), TemplateKind::Blueprint);
    }
}
