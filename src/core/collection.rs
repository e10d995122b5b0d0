//! Seeded, unbounded collections of mastered objects.

use std::ops::Range;
use std::sync::Arc;

use crate::core::catalog::Catalog;
use crate::core::engine::{self, ResolveError};
use crate::core::random::{seed_from_str, seeded};
use crate::schema::mastered::MasteredObject;
use crate::schema::template::TemplateId;
use crate::schema::value::Value;

/// An endless, reproducible sequence of masterings of one template.
///
/// Item `i` is mastered with a random source seeded from `"{seed}{i}"`, so
/// the same collection yields the same item at the same index on every run.
pub struct Collection<'c> {
    catalog: &'c Catalog,
    template: TemplateId,
    seed: String,
    overrides: Vec<(String, Value)>,
}

impl<'c> Collection<'c> {
    pub fn new(catalog: &'c Catalog, template: TemplateId, seed: impl Into<String>) -> Self {
        Self {
            catalog,
            template,
            seed: seed.into(),
            overrides: Vec::new(),
        }
    }

    /// Apply `value` to every item as an override.
    pub fn with_override(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides.push((name.into(), value.into()));
        self
    }

    pub fn template(&self) -> TemplateId {
        self.template
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Master with the collection's own seed.
    pub fn master(&self) -> Result<Arc<MasteredObject>, ResolveError> {
        self.master_seeded(&self.seed)
    }

    pub fn get(&self, index: usize) -> Result<Arc<MasteredObject>, ResolveError> {
        self.master_seeded(&format!("{}{}", self.seed, index))
    }

    pub fn range(&self, range: Range<usize>) -> Result<Vec<Arc<MasteredObject>>, ResolveError> {
        range.map(|i| self.get(i)).collect()
    }

    pub fn take(&self, n: usize) -> Result<Vec<Arc<MasteredObject>>, ResolveError> {
        self.range(0..n)
    }

    /// Items from index 0 on, without end.
    pub fn iter(&self) -> impl Iterator<Item = Result<Arc<MasteredObject>, ResolveError>> + '_ {
        (0..).map(move |i| self.get(i))
    }

    fn master_seeded(&self, seed: &str) -> Result<Arc<MasteredObject>, ResolveError> {
        let mut rng = seeded(seed_from_str(seed));
        engine::master(self.catalog, self.template, &self.overrides, None, None, &mut rng)
            .map(Arc::new)
    }
}

impl Catalog {
    pub fn collection(&self, template: TemplateId, seed: impl Into<String>) -> Collection<'_> {
        Collection::new(self, template, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::TemplateDecl;
    use crate::core::field::Field;

    fn catalog() -> (Catalog, TemplateId) {
        let mut catalog = Catalog::new();
        let id = catalog
            .declare(
                TemplateDecl::new("Gem")
                    .field("value", Field::random_int(1, 1_000_000))
                    .value("kind", "ruby"),
            )
            .unwrap();
        (catalog, id)
    }

    #[test]
    fn same_index_same_item() {
        let (catalog, gem) = catalog();
        let a = catalog.collection(gem, "hoard");
        let b = catalog.collection(gem, "hoard");
        assert_eq!(a.get(3).unwrap(), b.get(3).unwrap());
        assert!(!Arc::ptr_eq(&a.get(3).unwrap(), &b.get(3).unwrap()));
    }

    #[test]
    fn indices_differ() {
        let (catalog, gem) = catalog();
        let hoard = catalog.collection(gem, "hoard");
        let items = hoard.take(5).unwrap();
        assert_eq!(items.len(), 5);
        let distinct: std::collections::BTreeSet<i64> = items
            .iter()
            .map(|item| item.get("value").and_then(Value::as_int).unwrap())
            .collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn iter_matches_get() {
        let (catalog, gem) = catalog();
        let hoard = catalog.collection(gem, "hoard");
        let first: Vec<_> = hoard.iter().take(3).map(Result::unwrap).collect();
        assert_eq!(first, hoard.range(0..3).unwrap());
    }

    #[test]
    fn overrides_apply_to_every_item() {
        let (catalog, gem) = catalog();
        let emeralds = catalog.collection(gem, "x").with_override("kind", "emerald");
        for item in emeralds.take(3).unwrap() {
            assert_eq!(item.get("kind"), Some(&Value::from("emerald")));
        }
        assert_eq!(emeralds.master().unwrap().get("kind"), Some(&Value::from("emerald")));
    }
}
