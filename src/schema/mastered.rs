use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use super::template::TemplateId;
use super::value::Value;

/// A callable attached to mastered objects at declaration time.
///
/// Generators are never run while mastering; they are the object's surface
/// toward whatever renders it into a final game entity.
pub type Generator = Arc<dyn Fn(&MasteredObject) -> Value + Send + Sync>;

/// Non-owning back-reference from a modifier or factory result to what it
/// was built from.
#[derive(Debug, Clone)]
pub enum SourceRef {
    /// The source was a template type, mastered on the fly.
    Template(TemplateId),
    /// The source was an existing mastered object.
    Object(Weak<MasteredObject>),
}

/// The immutable result of mastering a template type.
pub struct MasteredObject {
    template: TemplateId,
    type_name: String,
    fields: Vec<(String, Value)>,
    source: Option<SourceRef>,
    generators: Arc<Vec<(String, Generator)>>,
}

impl MasteredObject {
    pub(crate) fn new(
        template: TemplateId,
        type_name: String,
        fields: Vec<(String, Value)>,
        source: Option<SourceRef>,
        generators: Arc<Vec<(String, Generator)>>,
    ) -> Self {
        Self {
            template,
            type_name,
            fields,
            source,
            generators,
        }
    }

    /// The template type this object is an instance of.
    pub fn template(&self) -> TemplateId {
        self.template
    }

    /// Name of the template type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Fields in resolution-independent declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn source(&self) -> Option<&SourceRef> {
        self.source.as_ref()
    }

    /// The source object, if this was built from one that is still alive.
    pub fn source_object(&self) -> Option<Arc<MasteredObject>> {
        match &self.source {
            Some(SourceRef::Object(weak)) => weak.upgrade(),
            _ => None,
        }
    }

    /// The `name` field when it is a string, otherwise the type name.
    pub fn display_name(&self) -> &str {
        match self.get("name") {
            Some(Value::Str(name)) => name,
            _ => &self.type_name,
        }
    }

    pub fn generator_names(&self) -> impl Iterator<Item = &str> {
        self.generators.iter().map(|(name, _)| name.as_str())
    }

    pub fn has_generator(&self, name: &str) -> bool {
        self.generators.iter().any(|(n, _)| n == name)
    }

    /// Invoke a generator by name.
    pub fn generate(&self, name: &str) -> Option<Value> {
        self.generators
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, generator)| generator(self))
    }

    /// Every field value keyed by name.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.fields.iter().cloned().collect()
    }

    pub(crate) fn into_parts(self) -> (Vec<(String, Value)>, Arc<Vec<(String, Generator)>>) {
        (self.fields, self.generators)
    }

    pub(crate) fn generators(&self) -> &Arc<Vec<(String, Generator)>> {
        &self.generators
    }
}

impl PartialEq for MasteredObject {
    fn eq(&self, other: &Self) -> bool {
        self.template == other.template && self.fields == other.fields
    }
}

impl fmt::Debug for MasteredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let generators: Vec<&str> = self.generator_names().collect();
        f.debug_struct("MasteredObject")
            .field("template", &self.template)
            .field("type_name", &self.type_name)
            .field("fields", &self.fields)
            .field("source", &self.source)
            .field("generators", &generators)
            .finish()
    }
}

impl Serialize for MasteredObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
