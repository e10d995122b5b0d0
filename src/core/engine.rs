//! Field resolution: orders a template's fields and evaluates them into a
//! mastered object.
//!
//! Statics and overrides are visible before any producer runs; a template
//! stored as a static is mastered into a nested object first. Dynamic fields
//! are split into an immediate and a deferred partition, each evaluated in
//! dependency order with ties broken by declaration order.

use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

use crate::core::catalog::{Attribute, Catalog, TemplateDef};
use crate::core::dice::DiceError;
use crate::core::field::{BinOp, FieldSpec};
use crate::core::format::{FieldPath, FormatError, PathRoot};
use crate::core::random::RandomSource;
use crate::core::repository::TagRepository;
use crate::schema::mastered::MasteredObject;
use crate::schema::template::TemplateId;
use crate::schema::value::Value;

/// Nested masterings deeper than this fail instead of recursing forever.
pub const MAX_NESTING_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("circular dependency in '{template}': {}", .fields.join(" -> "))]
    CircularDependency {
        template: String,
        fields: Vec<String>,
    },
    #[error("unknown template '{0}'")]
    UnknownTemplate(String),
    #[error("'{template}' has no field '{field}'")]
    UnknownField { template: String, field: String },
    #[error("field '{0}' was read before it was resolved")]
    UnresolvedReference(String),
    #[error("'{0}' reads a source, but nothing is being modified")]
    MissingSource(String),
    #[error("'{0}' reads an enclosing object that does not exist")]
    MissingParent(String),
    #[error("attribute '{field}' of '{template}' is required but was never set")]
    UnresolvableField { template: String, field: String },
    #[error(transparent)]
    Dice(#[from] DiceError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("cannot apply '{op}' to {left} and {right}")]
    Arithmetic {
        op: BinOp,
        left: &'static str,
        right: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("operator '{op}' has no operands")]
    MissingOperands { op: BinOp },
    #[error("nothing to choose from")]
    EmptyChoice,
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("factory '{factory}' produced {found}, not a blueprint")]
    ProductNotBlueprint { factory: String, found: &'static str },
    #[error("'{0}' is not a modifier")]
    NotAModifier(String),
    #[error("'{0}' is not a factory")]
    NotAFactory(String),
    #[error("mastering '{template}' exceeds the nesting limit of {depth}")]
    NestingTooDeep { template: String, depth: usize },
    #[error("in {template}.{field}: {source}")]
    InField {
        template: String,
        field: String,
        source: Box<ResolveError>,
    },
    #[error("{0}")]
    Custom(String),
}

impl ResolveError {
    /// The innermost error, past any field context.
    pub fn root_cause(&self) -> &ResolveError {
        let mut err = self;
        while let ResolveError::InField { source, .. } = err {
            err = source;
        }
        err
    }
}

/// The in-progress view of one mastering, handed to every producer.
pub struct Scope<'a> {
    catalog: &'a Catalog,
    template: &'a TemplateDef,
    values: FxHashMap<String, Value>,
    source: Option<&'a MasteredObject>,
    parent: Option<&'a Scope<'a>>,
    depth: usize,
}

impl<'a> Scope<'a> {
    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    /// The template being mastered.
    pub fn template(&self) -> &'a TemplateDef {
        self.template
    }

    /// An already-resolved field of the object being mastered.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// The object a modifier is being applied to.
    pub fn source(&self) -> Option<&'a MasteredObject> {
        self.source
    }

    /// The scope of the enclosing mastering, for nested templates.
    pub fn parent(&self) -> Option<&'a Scope<'a>> {
        self.parent
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The tag repository of the template's lineage.
    pub fn repository(&self) -> Result<&'a TagRepository, ResolveError> {
        self.repository_for(None)
    }

    /// The repository of `lineage`'s lineage, or of this template's.
    pub fn repository_for(
        &self,
        lineage: Option<&str>,
    ) -> Result<&'a TagRepository, ResolveError> {
        let (name, repo) = match lineage {
            Some(name) => (
                name,
                self.catalog
                    .id_of(name)
                    .and_then(|id| self.catalog.repository_of(id)),
            ),
            None => (
                self.template.name(),
                self.catalog.repository(self.template.repository()),
            ),
        };
        repo.ok_or_else(|| ResolveError::UnknownTemplate(name.to_string()))
    }

    /// Read the value at `path`.
    pub fn lookup(&self, path: &FieldPath) -> Result<Value, ResolveError> {
        let mut current = match path.root() {
            PathRoot::Own => self.own_value(path.field())?,
            PathRoot::Source => {
                let source = self
                    .source
                    .ok_or_else(|| ResolveError::MissingSource(path.to_string()))?;
                field_of(source, path.field())?
            }
            PathRoot::Parent(levels) => {
                let mut scope: &Scope<'_> = self;
                for _ in 0..levels {
                    scope = scope
                        .parent
                        .ok_or_else(|| ResolveError::MissingParent(path.to_string()))?;
                }
                scope.own_value(path.field())?
            }
        };

        for segment in path.rest() {
            current = match &current {
                Value::Object(obj) => field_of(obj, segment)?,
                other => {
                    return Err(ResolveError::TypeMismatch {
                        expected: "object",
                        found: other.type_name(),
                    })
                }
            };
        }
        Ok(current)
    }

    fn own_value(&self, field: &str) -> Result<Value, ResolveError> {
        if let Some(value) = self.values.get(field) {
            return Ok(value.clone());
        }
        if self.template.attribute(field).is_some() {
            Err(ResolveError::UnresolvedReference(field.to_string()))
        } else {
            Err(ResolveError::UnknownField {
                template: self.template.name().to_string(),
                field: field.to_string(),
            })
        }
    }

    /// Master `template` as a fresh object nested in this one.
    pub fn master_nested(
        &self,
        template: TemplateId,
        rng: &mut dyn RandomSource,
    ) -> Result<Arc<MasteredObject>, ResolveError> {
        if self.depth + 1 > MAX_NESTING_DEPTH {
            let name = self
                .catalog
                .template(template)
                .map_or_else(|| template.to_string(), |def| def.name().to_string());
            return Err(ResolveError::NestingTooDeep {
                template: name,
                depth: MAX_NESTING_DEPTH,
            });
        }
        master(self.catalog, template, &[], None, Some(self), rng).map(Arc::new)
    }
}

fn field_of(obj: &MasteredObject, field: &str) -> Result<Value, ResolveError> {
    obj.get(field)
        .cloned()
        .ok_or_else(|| ResolveError::UnknownField {
            template: obj.type_name().to_string(),
            field: field.to_string(),
        })
}

/// Master `template` into an object with no back-reference.
///
/// `overrides` replace attributes of the same name and are copied like
/// statics; names the template does not declare are appended.
pub(crate) fn master(
    catalog: &Catalog,
    template: TemplateId,
    overrides: &[(String, Value)],
    source: Option<&MasteredObject>,
    parent: Option<&Scope<'_>>,
    rng: &mut dyn RandomSource,
) -> Result<MasteredObject, ResolveError> {
    let def = catalog
        .template(template)
        .ok_or_else(|| ResolveError::UnknownTemplate(template.to_string()))?;

    let mut scope = Scope {
        catalog,
        template: def,
        values: FxHashMap::default(),
        source,
        parent,
        depth: parent.map_or(0, |p| p.depth + 1),
    };

    let mut dynamic: Vec<(&str, &FieldSpec)> = Vec::new();
    for (name, attribute) in def.attributes() {
        if let Some((_, value)) = overrides.iter().find(|(n, _)| n == name) {
            scope.values.insert(name.clone(), value.clone());
            continue;
        }
        match attribute {
            Attribute::Static(value) => {
                scope.values.insert(name.clone(), value.clone());
            }
            Attribute::Dynamic(spec) => dynamic.push((name.as_str(), spec)),
            Attribute::Required => {
                return Err(ResolveError::UnresolvableField {
                    template: def.name().to_string(),
                    field: name.clone(),
                })
            }
        }
    }
    for (name, value) in overrides {
        scope
            .values
            .entry(name.clone())
            .or_insert_with(|| value.clone());
    }

    // A template stored as a plain value becomes a fresh object on every mastering.
    let templated: Vec<(&str, TemplateId)> = def
        .attributes()
        .iter()
        .map(|(name, _)| name.as_str())
        .chain(
            overrides
                .iter()
                .map(|(name, _)| name.as_str())
                .filter(|name| def.attribute(name).is_none()),
        )
        .filter_map(|name| match scope.values.get(name) {
            Some(Value::Template(id)) => Some((name, *id)),
            _ => None,
        })
        .collect();
    for (name, id) in templated {
        let nested = scope
            .master_nested(id, rng)
            .map_err(|err| ResolveError::InField {
                template: def.name().to_string(),
                field: name.to_string(),
                source: Box::new(err),
            })?;
        scope.values.insert(name.to_string(), Value::Object(nested));
    }

    let order = resolution_order(def.name(), &dynamic)?;
    trace!(
        template = def.name(),
        order = ?order.iter().map(|&i| dynamic[i].0).collect::<Vec<_>>(),
        "field resolution order"
    );

    for index in order {
        let (name, spec) = dynamic[index];
        let value = spec
            .field
            .resolve(&scope, rng)
            .map_err(|err| ResolveError::InField {
                template: def.name().to_string(),
                field: name.to_string(),
                source: Box::new(err),
            })?;
        trace!(template = def.name(), field = name, value = %value, "resolved field");
        scope.values.insert(name.to_string(), value);
    }

    let mut values = scope.values;
    let mut fields = Vec::with_capacity(values.len());
    let names = def
        .attributes()
        .iter()
        .map(|(name, _)| name)
        .chain(overrides.iter().map(|(name, _)| name));
    for name in names {
        if let Some(value) = values.remove(name) {
            fields.push((name.clone(), value));
        }
    }

    Ok(MasteredObject::new(
        def.id(),
        def.name().to_string(),
        fields,
        None,
        Arc::clone(def.generators()),
    ))
}

/// Evaluation order over `specs`: immediate fields first, then deferred
/// ones, each topologically sorted with declaration order breaking ties.
///
/// A field depending on a deferred field is itself deferred. Dependencies on
/// names outside `specs` are already satisfied.
pub(crate) fn resolution_order(
    template: &str,
    specs: &[(&str, &FieldSpec)],
) -> Result<Vec<usize>, ResolveError> {
    let index_of: FxHashMap<&str, usize> = specs
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (*name, i))
        .collect();

    let deps: Vec<Vec<usize>> = specs
        .iter()
        .map(|(_, spec)| {
            spec.dependencies()
                .iter()
                .filter_map(|dep| index_of.get(dep.as_str()).copied())
                .collect()
        })
        .collect();

    let mut deferred: Vec<bool> = specs.iter().map(|(_, spec)| spec.deferred).collect();
    loop {
        let mut changed = false;
        for (i, node_deps) in deps.iter().enumerate() {
            if !deferred[i] && node_deps.iter().any(|&d| deferred[d]) {
                deferred[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let n = specs.len();
    let mut pending: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, node_deps) in deps.iter().enumerate() {
        for &d in node_deps {
            dependents[d].push(i);
        }
    }

    let mut done = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while order.len() < n {
        let next = (0..n)
            .filter(|&i| !done[i] && pending[i] == 0)
            .min_by_key(|&i| (deferred[i], i));
        let Some(i) = next else {
            let fields = find_cycle(&deps, &done)
                .into_iter()
                .map(|i| specs[i].0.to_string())
                .collect();
            return Err(ResolveError::CircularDependency {
                template: template.to_string(),
                fields,
            });
        };
        done[i] = true;
        order.push(i);
        for &j in &dependents[i] {
            pending[j] -= 1;
        }
    }
    Ok(order)
}

/// Follow unresolved dependency edges until a node repeats. Every node not
/// yet done has at least one such edge when Kahn's algorithm stalls.
fn find_cycle(deps: &[Vec<usize>], done: &[bool]) -> Vec<usize> {
    let Some(start) = done.iter().position(|d| !d) else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut node = start;
    loop {
        let Some(next) = deps[node].iter().copied().find(|&d| !done[d]) else {
            return path;
        };
        if let Some(pos) = path.iter().position(|&p| p == next) {
            return path.split_off(pos);
        }
        path.push(next);
        node = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::Field;

    fn spec(deps: &str) -> FieldSpec {
        FieldSpec::new(Field::value(0)).depends_on(deps)
    }

    fn names<'a>(specs: &[(&'a str, &FieldSpec)], order: &[usize]) -> Vec<&'a str> {
        order.iter().map(|&i| specs[i].0).collect()
    }

    #[test]
    fn declaration_order_without_dependencies() {
        let (a, b, c) = (spec(""), spec(""), spec(""));
        let specs = [("a", &a), ("b", &b), ("c", &c)];
        let order = resolution_order("T", &specs).unwrap();
        assert_eq!(names(&specs, &order), vec!["a", "b", "c"]);
    }

    #[test]
    fn dependencies_come_first() {
        let (a, b, c) = (spec("c"), spec(""), spec("b"));
        let specs = [("a", &a), ("b", &b), ("c", &c)];
        let order = resolution_order("T", &specs).unwrap();
        assert_eq!(names(&specs, &order), vec!["b", "c", "a"]);
    }

    #[test]
    fn deferral_is_transitive() {
        let label = FieldSpec::new(Field::format("{value}").unwrap());
        let shout = spec("label");
        let value = spec("");
        let specs = [("label", &label), ("shout", &shout), ("value", &value)];
        let order = resolution_order("T", &specs).unwrap();
        assert_eq!(names(&specs, &order), vec!["value", "label", "shout"]);
    }

    #[test]
    fn unknown_dependencies_are_ignored() {
        let a = spec("static_value");
        let specs = [("a", &a)];
        assert_eq!(resolution_order("T", &specs).unwrap(), vec![0]);
    }

    #[test]
    fn two_field_cycle() {
        let (a, b, c) = (spec("b"), spec("a"), spec(""));
        let specs = [("a", &a), ("b", &b), ("c", &c)];
        match resolution_order("Loop", &specs) {
            Err(ResolveError::CircularDependency { template, fields }) => {
                assert_eq!(template, "Loop");
                assert_eq!(fields, vec!["a", "b"]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn cycle_path_excludes_tail() {
        let (a, b, c) = (spec("b"), spec("c"), spec("b"));
        let specs = [("a", &a), ("b", &b), ("c", &c)];
        match resolution_order("T", &specs) {
            Err(ResolveError::CircularDependency { fields, .. }) => {
                assert_eq!(fields, vec!["b", "c"]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let a = FieldSpec::new(Field::reference("a").unwrap());
        let specs = [("a", &a)];
        assert!(matches!(
            resolution_order("T", &specs),
            Err(ResolveError::CircularDependency { .. })
        ));
    }

    #[test]
    fn root_cause_unwraps_field_context() {
        let err = ResolveError::InField {
            template: "Outer".into(),
            field: "inner".into(),
            source: Box::new(ResolveError::InField {
                template: "Inner".into(),
                field: "x".into(),
                source: Box::new(ResolveError::DivisionByZero),
            }),
        };
        assert!(matches!(err.root_cause(), ResolveError::DivisionByZero));
        assert_eq!(err.to_string(), "in Outer.inner: in Inner.x: division by zero");
    }
}
