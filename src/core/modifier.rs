//! Modifier and factory composition on top of the resolution engine.

use std::sync::Arc;
use tracing::debug;

use crate::core::catalog::Catalog;
use crate::core::engine::{self, ResolveError};
use crate::core::random::RandomSource;
use crate::schema::mastered::{MasteredObject, SourceRef};
use crate::schema::template::{TemplateId, TemplateKind};
use crate::schema::value::Value;

/// What a modifier is applied to.
#[derive(Debug, Clone)]
pub enum ModTarget {
    /// A template type, mastered first.
    Template(TemplateId),
    /// An existing object. It is read, never changed.
    Object(Arc<MasteredObject>),
}

impl From<TemplateId> for ModTarget {
    fn from(id: TemplateId) -> Self {
        Self::Template(id)
    }
}

impl From<Arc<MasteredObject>> for ModTarget {
    fn from(obj: Arc<MasteredObject>) -> Self {
        Self::Object(obj)
    }
}

impl From<&Arc<MasteredObject>> for ModTarget {
    fn from(obj: &Arc<MasteredObject>) -> Self {
        Self::Object(Arc::clone(obj))
    }
}

impl Catalog {
    /// Apply a modifier, producing a new object.
    ///
    /// The result has the target's fields overridden or extended by the
    /// modifier's, keeps the target's template type, and refers back to the
    /// target.
    pub fn apply_modifier(
        &self,
        modifier: TemplateId,
        target: impl Into<ModTarget>,
        rng: &mut dyn RandomSource,
    ) -> Result<Arc<MasteredObject>, ResolveError> {
        let def = self
            .template(modifier)
            .ok_or_else(|| ResolveError::UnknownTemplate(modifier.to_string()))?;
        if def.kind() != TemplateKind::Modifier {
            return Err(ResolveError::NotAModifier(def.name().to_string()));
        }

        let (source, back_ref) = match target.into() {
            ModTarget::Template(id) => (
                Arc::new(engine::master(self, id, &[], None, None, rng)?),
                SourceRef::Template(id),
            ),
            ModTarget::Object(obj) => {
                let weak = Arc::downgrade(&obj);
                (obj, SourceRef::Object(weak))
            }
        };

        let modded = engine::master(self, modifier, &[], Some(&source), None, rng)?;
        debug!(
            modifier = def.name(),
            source = source.type_name(),
            "applied modifier"
        );

        let (changes, _) = modded.into_parts();
        let fields = overlay(source.fields(), changes);
        Ok(Arc::new(MasteredObject::new(
            source.template(),
            source.type_name().to_string(),
            fields,
            Some(back_ref),
            Arc::clone(source.generators()),
        )))
    }

    pub fn apply_modifier_by_name(
        &self,
        modifier: &str,
        target: impl Into<ModTarget>,
        rng: &mut dyn RandomSource,
    ) -> Result<Arc<MasteredObject>, ResolveError> {
        let id = self
            .id_of(modifier)
            .ok_or_else(|| ResolveError::UnknownTemplate(modifier.to_string()))?;
        self.apply_modifier(id, target, rng)
    }

    /// Run a factory: master it, take its `product`, apply its modifiers in
    /// order, then copy the factory's other fields onto the result.
    ///
    /// The result refers back to the product's template.
    pub fn produce(
        &self,
        factory: TemplateId,
        rng: &mut dyn RandomSource,
    ) -> Result<Arc<MasteredObject>, ResolveError> {
        let def = self
            .template(factory)
            .ok_or_else(|| ResolveError::UnknownTemplate(factory.to_string()))?;
        if def.kind() != TemplateKind::Factory {
            return Err(ResolveError::NotAFactory(def.name().to_string()));
        }

        let order = engine::master(self, factory, &[], None, None, rng)?;
        let (fields, _) = order.into_parts();
        let mut product = None;
        let mut extras = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            if name == "product" {
                product = Some(value);
            } else {
                extras.push((name, value));
            }
        }

        let mut item = match product {
            Some(Value::Object(obj)) => obj,
            Some(Value::Template(id)) => Arc::new(engine::master(self, id, &[], None, None, rng)?),
            other => {
                return Err(ResolveError::ProductNotBlueprint {
                    factory: def.name().to_string(),
                    found: other.as_ref().map_or("nothing", Value::type_name),
                })
            }
        };
        let product_template = item.template();

        for &modifier in def.modifiers() {
            item = self.apply_modifier(modifier, ModTarget::Object(item), rng)?;
        }

        debug!(
            factory = def.name(),
            product = item.type_name(),
            modifiers = def.modifiers().len(),
            "produced item"
        );

        let fields = overlay(item.fields(), extras);
        Ok(Arc::new(MasteredObject::new(
            item.template(),
            item.type_name().to_string(),
            fields,
            Some(SourceRef::Template(product_template)),
            Arc::clone(item.generators()),
        )))
    }

    pub fn produce_by_name(
        &self,
        factory: &str,
        rng: &mut dyn RandomSource,
    ) -> Result<Arc<MasteredObject>, ResolveError> {
        let id = self
            .id_of(factory)
            .ok_or_else(|| ResolveError::UnknownTemplate(factory.to_string()))?;
        self.produce(id, rng)
    }
}

/// `base` with `changes` replacing same-named fields in place and appending
/// the rest.
fn overlay<'a>(
    base: impl Iterator<Item = (&'a str, &'a Value)>,
    changes: Vec<(String, Value)>,
) -> Vec<(String, Value)> {
    let mut fields: Vec<(String, Value)> = base
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();
    for (name, value) in changes {
        match fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => fields.push((name, value)),
        }
    }
    fields
}
