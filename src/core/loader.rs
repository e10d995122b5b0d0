//! Loading template declarations from RON, and the catalog builder.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::catalog::{Attribute, Catalog, RegistryError, TemplateDecl};
use crate::core::dice::{DiceError, DiceExpr, DiceTable};
use crate::core::field::{BinOp, Field, FieldSpec};
use crate::core::format::{FieldPath, FormatError, FormatTemplate};
use crate::schema::template::{TemplateId, TemplateKind};
use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("dice error: {0}")]
    Dice(#[from] DiceError),
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    #[error("'{0}' is referenced before it is declared")]
    UnknownTemplate(String),
    #[error("{template}.{field}: Required is only valid as a whole field")]
    MisplacedRequired { template: String, field: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename = "Template")]
struct RonTemplate {
    name: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    tags: String,
    #[serde(default, rename = "abstract")]
    is_abstract: bool,
    #[serde(default)]
    kind: Option<TemplateKind>,
    #[serde(default)]
    modifiers: Option<Vec<String>>,
    #[serde(default)]
    fields: Vec<RonField>,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "Field")]
struct RonField {
    name: String,
    field: RonFieldKind,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    deferred: Option<bool>,
}

#[derive(Debug, Deserialize)]
enum RonFieldKind {
    Value(RonValue),
    Required,
    RandomInt(i64, i64),
    Dice(String),
    Table(String),
    PickOne(Vec<RonFieldKind>),
    PickFrom(Box<RonFieldKind>),
    All(Vec<RonFieldKind>),
    WithTags(String),
    WithTagsIn(String, String),
    Select(String),
    SelectIn(String, String),
    Nested(String),
    Ref(String),
    Format(String),
    Add(Vec<RonFieldKind>),
    Sub(Vec<RonFieldKind>),
    Mul(Vec<RonFieldKind>),
    Div(Vec<RonFieldKind>),
    FloorDiv(Vec<RonFieldKind>),
}

#[derive(Debug, Deserialize)]
enum RonValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<RonValue>),
    /// A declared template, by name.
    Template(String),
}

impl RonValue {
    fn into_value(self, catalog: &Catalog) -> Result<Value, LoadError> {
        Ok(match self {
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::Int(i),
            Self::Float(x) => Value::Float(x),
            Self::Str(s) => Value::Str(s),
            Self::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| item.into_value(catalog))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Template(name) => Value::Template(
                catalog
                    .id_of(&name)
                    .ok_or(LoadError::UnknownTemplate(name))?,
            ),
        })
    }
}

struct FieldContext<'a> {
    catalog: &'a Catalog,
    template: &'a str,
    field: &'a str,
}

impl RonFieldKind {
    fn into_field(self, cx: &FieldContext<'_>) -> Result<Field, LoadError> {
        let operands = |items: Vec<RonFieldKind>, op: BinOp| -> Result<Field, LoadError> {
            Ok(Field::Op {
                op,
                operands: into_fields(items, cx)?,
            })
        };

        Ok(match self {
            Self::Value(value) => Field::Value(value.into_value(cx.catalog)?),
            Self::Required => {
                return Err(LoadError::MisplacedRequired {
                    template: cx.template.to_string(),
                    field: cx.field.to_string(),
                })
            }
            Self::RandomInt(low, high) => Field::random_int(low, high),
            Self::Dice(expr) => Field::Dice(DiceExpr::compile(&expr)?),
            Self::Table(table) => Field::Table(DiceTable::compile(&table)?.map(Field::value)),
            Self::PickOne(items) => Field::PickOne(into_fields(items, cx)?),
            Self::PickFrom(inner) => Field::PickFrom(Box::new(inner.into_field(cx)?)),
            Self::All(items) => Field::All(into_fields(items, cx)?),
            Self::WithTags(query) => Field::with_tags(&query),
            Self::WithTagsIn(lineage, query) => Field::with_tags_in(lineage, &query),
            Self::Select(query) => Field::select(&query),
            Self::SelectIn(lineage, query) => Field::select_in(lineage, &query),
            Self::Nested(name) => Field::Nested(name),
            Self::Ref(path) => Field::Ref(FieldPath::parse(&path)?),
            Self::Format(text) => Field::Format(FormatTemplate::parse(&text)?),
            Self::Add(items) => operands(items, BinOp::Add)?,
            Self::Sub(items) => operands(items, BinOp::Sub)?,
            Self::Mul(items) => operands(items, BinOp::Mul)?,
            Self::Div(items) => operands(items, BinOp::Div)?,
            Self::FloorDiv(items) => operands(items, BinOp::FloorDiv)?,
        })
    }
}

fn into_fields(items: Vec<RonFieldKind>, cx: &FieldContext<'_>) -> Result<Vec<Field>, LoadError> {
    items.into_iter().map(|item| item.into_field(cx)).collect()
}

impl RonTemplate {
    fn into_decl(self, catalog: &Catalog) -> Result<TemplateDecl, LoadError> {
        let mut decl = TemplateDecl::new(self.name.as_str()).tags(&self.tags);
        if let Some(parent) = self.parent {
            decl = decl.parent(parent);
        }
        if self.is_abstract {
            decl = decl.mark_abstract();
        }
        if let Some(kind) = self.kind {
            decl = decl.kind(kind);
        }
        if let Some(modifiers) = self.modifiers {
            decl = decl.factory(modifiers);
        }

        for ron_field in self.fields {
            let attribute = match ron_field.field {
                RonFieldKind::Required => Attribute::Required,
                RonFieldKind::Value(value) => Attribute::Static(value.into_value(catalog)?),
                kind => {
                    let cx = FieldContext {
                        catalog,
                        template: &self.name,
                        field: &ron_field.name,
                    };
                    let mut spec = FieldSpec::new(kind.into_field(&cx)?);
                    spec.depends_on = ron_field.depends_on;
                    if let Some(deferred) = ron_field.deferred {
                        spec.deferred = deferred;
                    }
                    Attribute::Dynamic(spec)
                }
            };
            decl = decl.attribute(ron_field.name, attribute);
        }
        Ok(decl)
    }
}

impl Catalog {
    /// Declare every template in a RON string, in order.
    ///
    /// Either every template in the input is declared or, on error, none is.
    pub fn parse_ron(&mut self, input: &str) -> Result<Vec<TemplateId>, LoadError> {
        let raw: Vec<RonTemplate> = ron::from_str(input)?;
        let mut staged = self.clone();
        let mut ids = Vec::with_capacity(raw.len());
        for template in raw {
            let decl = template.into_decl(&staged)?;
            ids.push(staged.declare(decl)?);
        }
        *self = staged;
        Ok(ids)
    }

    /// Declare every template in a RON file.
    pub fn load_from_ron(&mut self, path: &Path) -> Result<Vec<TemplateId>, LoadError> {
        let contents = std::fs::read_to_string(path)?;
        let ids = self.parse_ron(&contents)?;
        debug!(path = %path.display(), templates = ids.len(), "loaded declarations");
        Ok(ids)
    }

    /// Declare every `.ron` file in a directory, in file name order.
    pub fn load_dir(&mut self, dir: &Path) -> Result<Vec<TemplateId>, LoadError> {
        let mut ids = Vec::new();
        for path in ron_files_in(dir)? {
            ids.extend(self.load_from_ron(&path)?);
        }
        Ok(ids)
    }

    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }
}

fn ron_files_in(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) == Some("ron") {
            files.push(path);
        } else {
            warn!(path = %path.display(), "skipping non-RON entry");
        }
    }
    files.sort();
    Ok(files)
}

/// Builder for a [`Catalog`] assembled from files, strings and declarations.
///
/// Sources are applied in this order: directories, files, RON strings,
/// then declarations.
#[derive(Default)]
pub struct CatalogBuilder {
    dirs: Vec<PathBuf>,
    files: Vec<PathBuf>,
    sources: Vec<String>,
    decls: Vec<TemplateDecl>,
}

impl CatalogBuilder {
    pub fn declarations_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.dirs.push(path.as_ref().to_path_buf());
        self
    }

    pub fn declarations_file(mut self, path: impl AsRef<Path>) -> Self {
        self.files.push(path.as_ref().to_path_buf());
        self
    }

    /// Provide RON text directly (for tests without files).
    pub fn with_ron(mut self, input: impl Into<String>) -> Self {
        self.sources.push(input.into());
        self
    }

    pub fn declare(mut self, decl: TemplateDecl) -> Self {
        self.decls.push(decl);
        self
    }

    /// Missing directories and files are skipped with a warning.
    pub fn build(self) -> Result<Catalog, LoadError> {
        let mut catalog = Catalog::new();

        for dir in &self.dirs {
            if dir.is_dir() {
                catalog.load_dir(dir)?;
            } else {
                warn!(path = %dir.display(), "declarations directory not found, skipping");
            }
        }

        for file in &self.files {
            if file.exists() {
                catalog.load_from_ron(file)?;
            } else {
                warn!(path = %file.display(), "declarations file not found, skipping");
            }
        }

        for source in &self.sources {
            catalog.parse_ron(source)?;
        }

        for decl in self.decls {
            catalog.declare(decl)?;
        }

        Ok(catalog)
    }
}
