//! Template declaration and the catalog that owns every template and tag
//! repository.

use rand::rngs::StdRng;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::core::engine::{self, ResolveError};
use crate::core::field::FieldSpec;
use crate::core::format::is_identifier;
use crate::core::random::{self, RandomSource};
use crate::core::repository::TagRepository;
use crate::schema::mastered::{Generator, MasteredObject};
use crate::schema::tags::{spaced_type_name, TagSet};
use crate::schema::template::{RepositoryId, TemplateId, TemplateKind};
use crate::schema::value::Value;

/// Attribute names a field path reserves for its own roots.
pub const RESERVED_NAMES: [&str; 2] = ["source", "parent"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("template names must not be empty")]
    EmptyName,
    #[error("template '{0}' is already declared")]
    DuplicateTemplate(String),
    #[error("'{template}' extends unknown template '{parent}'")]
    UnknownParent { template: String, parent: String },
    #[error("'{field}' on '{template}' is a reserved name")]
    ReservedName { template: String, field: String },
    #[error("'{field}' on '{template}' is not a valid field name")]
    InvalidFieldName { template: String, field: String },
    #[error("field '{field}' of '{template}' depends on unknown field '{dependency}'")]
    UnknownDependency {
        template: String,
        field: String,
        dependency: String,
    },
    #[error("attribute '{field}' of '{template}' is required but never set")]
    UnresolvableField { template: String, field: String },
    #[error("factory '{0}' declares no product")]
    MissingProduct(String),
    #[error("'{template}' uses unknown modifier '{modifier}'")]
    UnknownModifier { template: String, modifier: String },
    #[error("'{template}' lists '{modifier}', which is not a modifier")]
    NotAModifier { template: String, modifier: String },
    #[error("'{template}' is declared as {declared:?} but extends a {inherited:?}")]
    KindMismatch {
        template: String,
        declared: TemplateKind,
        inherited: TemplateKind,
    },
    #[error("'{0}' lists modifiers but is not a factory")]
    ModifiersOnNonFactory(String),
}

/// One declared attribute of a template.
#[derive(Debug, Clone)]
pub enum Attribute {
    /// Copied verbatim into every mastered object.
    Static(Value),
    /// Produced anew on every mastering.
    Dynamic(FieldSpec),
    /// Must be set by a descendant or an override.
    Required,
}

/// A template declaration, built up and handed to [`Catalog::declare`].
///
/// ```
/// use blueprint_engine::{Catalog, Field, TemplateDecl};
///
/// let mut catalog = Catalog::new();
/// catalog
///     .declare(
///         TemplateDecl::new("Weapon")
///             .tags("item")
///             .value("name", "club")
///             .field("damage", Field::dice("1d6").unwrap()),
///     )
///     .unwrap();
/// ```
#[derive(Default)]
pub struct TemplateDecl {
    name: String,
    parent: Option<String>,
    tags: TagSet,
    is_abstract: bool,
    kind: Option<TemplateKind>,
    modifiers: Option<Vec<String>>,
    attributes: Vec<(String, Attribute)>,
    generators: Vec<(String, Generator)>,
}

impl TemplateDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Add whitespace-separated tags.
    pub fn tags(mut self, tags: &str) -> Self {
        self.tags = self.tags.union(&TagSet::parse(tags));
        self
    }

    /// Keep the template out of its repository. Descendants still inherit
    /// its tags and attributes.
    pub fn mark_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn kind(mut self, kind: TemplateKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn modifier(self) -> Self {
        self.kind(TemplateKind::Modifier)
    }

    /// A factory applying `modifiers` in order to its `product`.
    pub fn factory<I, S>(mut self, modifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modifiers = Some(modifiers.into_iter().map(Into::into).collect());
        self.kind(TemplateKind::Factory)
    }

    /// A static attribute.
    pub fn value(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attribute(name, Attribute::Static(value.into()))
    }

    /// A dynamic attribute.
    pub fn field(self, name: impl Into<String>, spec: impl Into<FieldSpec>) -> Self {
        self.attribute(name, Attribute::Dynamic(spec.into()))
    }

    /// A slot descendants must fill.
    pub fn require(self, name: impl Into<String>) -> Self {
        self.attribute(name, Attribute::Required)
    }

    pub fn attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        let name = name.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = attribute,
            None => self.attributes.push((name, attribute)),
        }
        self
    }

    pub fn generator<F>(mut self, name: impl Into<String>, generator: F) -> Self
    where
        F: Fn(&MasteredObject) -> Value + Send + Sync + 'static,
    {
        self.generators.push((name.into(), Arc::new(generator)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A registered template type. Immutable once declared.
#[derive(Clone)]
pub struct TemplateDef {
    id: TemplateId,
    name: String,
    parent: Option<TemplateId>,
    kind: TemplateKind,
    is_abstract: bool,
    tags: TagSet,
    repository: RepositoryId,
    attributes: Vec<(String, Attribute)>,
    modifiers: Vec<TemplateId>,
    generators: Arc<Vec<(String, Generator)>>,
}

impl TemplateDef {
    pub fn id(&self) -> TemplateId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<TemplateId> {
        self.parent
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Effective tags: own-name, declared and inherited.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn repository(&self) -> RepositoryId {
        self.repository
    }

    /// Attributes merged down the inheritance chain, in declaration order.
    pub fn attributes(&self) -> &[(String, Attribute)] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, attribute)| attribute)
    }

    /// Modifiers a factory applies, in order.
    pub fn modifiers(&self) -> &[TemplateId] {
        &self.modifiers
    }

    pub fn generator_names(&self) -> impl Iterator<Item = &str> {
        self.generators.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn generators(&self) -> &Arc<Vec<(String, Generator)>> {
        &self.generators
    }
}

impl fmt::Debug for TemplateDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateDef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("kind", &self.kind)
            .field("is_abstract", &self.is_abstract)
            .field("tags", &self.tags.sorted())
            .field("repository", &self.repository)
            .field("attributes", &self.attributes)
            .field("modifiers", &self.modifiers)
            .field("generators", &self.generator_names().collect::<Vec<_>>())
            .finish()
    }
}

/// Every declared template and the tag repositories of their lineages.
///
/// Declaration takes `&mut self`; once everything is declared the catalog is
/// shared read-only and mastering takes `&self`.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    templates: Vec<TemplateDef>,
    by_name: FxHashMap<String, TemplateId>,
    repositories: Vec<TagRepository>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template type.
    pub fn declare(&mut self, decl: TemplateDecl) -> Result<TemplateId, RegistryError> {
        let name = decl.name.trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateTemplate(name));
        }

        let parent = match &decl.parent {
            Some(parent_name) => Some(self.get(parent_name).ok_or_else(|| {
                RegistryError::UnknownParent {
                    template: name.clone(),
                    parent: parent_name.clone(),
                }
            })?),
            None => None,
        };

        for (field, _) in &decl.attributes {
            if RESERVED_NAMES.contains(&field.as_str()) {
                return Err(RegistryError::ReservedName {
                    template: name,
                    field: field.clone(),
                });
            }
            if !is_identifier(field) {
                return Err(RegistryError::InvalidFieldName {
                    template: name,
                    field: field.clone(),
                });
            }
        }

        let kind = match (decl.kind, parent) {
            (Some(declared), Some(p)) if declared != p.kind => {
                return Err(RegistryError::KindMismatch {
                    template: name,
                    declared,
                    inherited: p.kind,
                })
            }
            (_, Some(p)) => p.kind,
            (Some(declared), None) => declared,
            (None, None) => TemplateKind::Blueprint,
        };

        let modifiers = match (&decl.modifiers, parent) {
            (Some(names), _) => {
                if kind != TemplateKind::Factory && !names.is_empty() {
                    return Err(RegistryError::ModifiersOnNonFactory(name));
                }
                self.resolve_modifiers(&name, names)?
            }
            (None, Some(p)) => p.modifiers.clone(),
            (None, None) => Vec::new(),
        };

        let mut attributes = parent.map(|p| p.attributes.clone()).unwrap_or_default();
        for (field, attribute) in decl.attributes {
            match attributes.iter_mut().find(|(n, _)| *n == field) {
                Some((_, existing)) => *existing = attribute,
                None => attributes.push((field, attribute)),
            }
        }
        // Blueprints with no name anywhere in their lineage are named after their type.
        if kind == TemplateKind::Blueprint && !attributes.iter().any(|(n, _)| n == "name") {
            let default_name = Value::Str(spaced_type_name(&name));
            attributes.insert(0, ("name".to_string(), Attribute::Static(default_name)));
        }
        validate_attributes(&name, &attributes, decl.is_abstract, kind)?;

        let mut generators: Vec<(String, Generator)> = parent
            .map(|p| p.generators.as_ref().clone())
            .unwrap_or_default();
        for (gen_name, generator) in decl.generators {
            match generators.iter_mut().find(|(n, _)| *n == gen_name) {
                Some((_, existing)) => *existing = generator,
                None => generators.push((gen_name, generator)),
            }
        }

        let mut tags = TagSet::from_type_name(&name).union(&decl.tags);
        if let Some(p) = parent {
            tags = tags.union(&p.tags);
        }

        let id = TemplateId(self.templates.len() as u32);
        let parent_id = parent.map(|p| p.id);
        let inherited_repository = parent.map(|p| p.repository);
        let repository = match inherited_repository {
            Some(repo_id) => repo_id,
            None => {
                let repo_id = RepositoryId(self.repositories.len() as u32);
                self.repositories.push(TagRepository::new(repo_id, id));
                debug!(template = %name, repository = repo_id.0, "created tag repository");
                repo_id
            }
        };

        if !decl.is_abstract {
            if let Some(repo) = self.repositories.get_mut(repository.0 as usize) {
                repo.register(id, tags.clone());
            }
        }

        debug!(
            template = %name,
            id = id.0,
            kind = ?kind,
            is_abstract = decl.is_abstract,
            tags = %tags,
            "declared template"
        );

        self.by_name.insert(name.clone(), id);
        self.templates.push(TemplateDef {
            id,
            name,
            parent: parent_id,
            kind,
            is_abstract: decl.is_abstract,
            tags,
            repository,
            attributes,
            modifiers,
            generators: Arc::new(generators),
        });
        Ok(id)
    }

    fn resolve_modifiers(
        &self,
        template: &str,
        names: &[String],
    ) -> Result<Vec<TemplateId>, RegistryError> {
        names
            .iter()
            .map(|modifier| {
                let def = self.get(modifier).ok_or_else(|| RegistryError::UnknownModifier {
                    template: template.to_string(),
                    modifier: modifier.clone(),
                })?;
                if def.kind != TemplateKind::Modifier {
                    return Err(RegistryError::NotAModifier {
                        template: template.to_string(),
                        modifier: modifier.clone(),
                    });
                }
                Ok(def.id)
            })
            .collect()
    }

    pub fn template(&self, id: TemplateId) -> Option<&TemplateDef> {
        self.templates.get(id.0 as usize)
    }

    /// Look a template up by name.
    pub fn get(&self, name: &str) -> Option<&TemplateDef> {
        self.id_of(name).and_then(|id| self.template(id))
    }

    pub fn id_of(&self, name: &str) -> Option<TemplateId> {
        self.by_name.get(name).copied()
    }

    /// Templates in declaration order.
    pub fn templates(&self) -> impl Iterator<Item = &TemplateDef> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Effective tags of a template, abstract or not.
    pub fn tags_of(&self, id: TemplateId) -> Option<&TagSet> {
        self.template(id).map(TemplateDef::tags)
    }

    pub fn repository(&self, id: RepositoryId) -> Option<&TagRepository> {
        self.repositories.get(id.0 as usize)
    }

    /// The repository of the template's lineage.
    pub fn repository_of(&self, template: TemplateId) -> Option<&TagRepository> {
        self.template(template)
            .and_then(|def| self.repository(def.repository))
    }

    pub fn repositories(&self) -> impl Iterator<Item = &TagRepository> {
        self.repositories.iter()
    }

    /// Whether `template` is `ancestor` or descends from it.
    pub fn is_a(&self, template: TemplateId, ancestor: TemplateId) -> bool {
        let mut current = self.template(template);
        while let Some(def) = current {
            if def.id == ancestor {
                return true;
            }
            current = def.parent.and_then(|p| self.template(p));
        }
        false
    }

    /// Master a template into a new object.
    pub fn master(
        &self,
        template: TemplateId,
        rng: &mut dyn RandomSource,
    ) -> Result<Arc<MasteredObject>, ResolveError> {
        engine::master(self, template, &[], None, None, rng).map(Arc::new)
    }

    pub fn master_by_name(
        &self,
        name: &str,
        rng: &mut dyn RandomSource,
    ) -> Result<Arc<MasteredObject>, ResolveError> {
        let id = self
            .id_of(name)
            .ok_or_else(|| ResolveError::UnknownTemplate(name.to_string()))?;
        self.master(id, rng)
    }

    /// Master with named values standing in for attributes.
    ///
    /// Overrides are copied like statics before any field resolves, and
    /// fields depending on them read the override.
    pub fn master_with<I, K, V>(
        &self,
        template: TemplateId,
        overrides: I,
        rng: &mut dyn RandomSource,
    ) -> Result<Arc<MasteredObject>, ResolveError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let overrides: Vec<(String, Value)> = overrides
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        engine::master(self, template, &overrides, None, None, rng).map(Arc::new)
    }

    /// Master with a fresh [`StdRng`] seeded from `seed`.
    pub fn master_seeded(
        &self,
        template: TemplateId,
        seed: u64,
    ) -> Result<Arc<MasteredObject>, ResolveError> {
        let mut rng: StdRng = random::seeded(seed);
        self.master(template, &mut rng)
    }
}

fn validate_attributes(
    template: &str,
    attributes: &[(String, Attribute)],
    is_abstract: bool,
    kind: TemplateKind,
) -> Result<(), RegistryError> {
    for (field, attribute) in attributes {
        match attribute {
            Attribute::Dynamic(spec) => {
                if let Some(dependency) = spec
                    .depends_on
                    .iter()
                    .find(|dep| !attributes.iter().any(|(n, _)| n == *dep))
                {
                    return Err(RegistryError::UnknownDependency {
                        template: template.to_string(),
                        field: field.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
            Attribute::Required if !is_abstract => {
                return Err(RegistryError::UnresolvableField {
                    template: template.to_string(),
                    field: field.clone(),
                });
            }
            Attribute::Static(_) | Attribute::Required => {}
        }
    }

    if kind == TemplateKind::Factory
        && !is_abstract
        && !attributes.iter().any(|(n, _)| n == "product")
    {
        return Err(RegistryError::MissingProduct(template.to_string()));
    }
    Ok(())
}
