//! Field producers: the deferred values attached to template attributes.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::sync::Arc;

use crate::core::dice::{DiceExpr, DiceTable};
use crate::core::engine::{ResolveError, Scope};
use crate::core::format::{FieldPath, FormatTemplate};
use crate::core::random::RandomSource;
use crate::core::repository::TagQuery;
use crate::schema::template::TemplateId;
use crate::schema::value::Value;

/// Longest string `Str * Int` may build, in bytes.
pub const MAX_REPEAT_LEN: usize = 1 << 20;

/// Resolve-on-demand contract for custom producers.
///
/// A producer reads already-resolved siblings (and the source or enclosing
/// objects) through the scope and draws randomness from `rng` only.
pub trait Producer: Send + Sync {
    fn produce(
        &self,
        scope: &Scope<'_>,
        rng: &mut dyn RandomSource,
    ) -> Result<Value, ResolveError>;
}

impl<F> Producer for F
where
    F: Fn(&Scope<'_>, &mut dyn RandomSource) -> Result<Value, ResolveError> + Send + Sync,
{
    fn produce(
        &self,
        scope: &Scope<'_>,
        rng: &mut dyn RandomSource,
    ) -> Result<Value, ResolveError> {
        self(scope, rng)
    }
}

/// Arithmetic operators, folded left over their operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// True division; two integers yield a float.
    Div,
    /// Division rounded toward negative infinity.
    FloorDiv,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
        }
    }

    /// Apply the operator to two values.
    ///
    /// Dice rolls count as their total. Strings and lists concatenate with
    /// `+`, and a string repeats with `* n` for `n >= 0`, up to
    /// [`MAX_REPEAT_LEN`] bytes.
    pub fn apply(self, left: &Value, right: &Value) -> Result<Value, ResolveError> {
        let mismatch = || ResolveError::Arithmetic {
            op: self,
            left: left.type_name(),
            right: right.type_name(),
        };

        match (left, right) {
            (Value::Str(a), Value::Str(b)) if self == Self::Add => {
                return Ok(Value::Str(format!("{a}{b}")));
            }
            (Value::List(a), Value::List(b)) if self == Self::Add => {
                return Ok(Value::List(a.iter().chain(b).cloned().collect()));
            }
            (Value::Str(s), Value::Int(n)) if self == Self::Mul => {
                return usize::try_from(*n)
                    .ok()
                    .filter(|&n| s.len().checked_mul(n).is_some_and(|len| len <= MAX_REPEAT_LEN))
                    .map(|n| Value::Str(s.repeat(n)))
                    .ok_or_else(mismatch);
            }
            _ => {}
        }

        if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
            return self.apply_int(a, b).ok_or_else(|| {
                if b == 0 {
                    ResolveError::DivisionByZero
                } else {
                    mismatch()
                }
            });
        }

        let (Some(a), Some(b)) = (left.as_float(), right.as_float()) else {
            return Err(mismatch());
        };
        if b == 0.0 && matches!(self, Self::Div | Self::FloorDiv) {
            return Err(ResolveError::DivisionByZero);
        }
        Ok(Value::Float(match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::FloorDiv => (a / b).floor(),
        }))
    }

    /// `None` on overflow or division by zero.
    fn apply_int(self, a: i64, b: i64) -> Option<Value> {
        match self {
            Self::Add => a.checked_add(b).map(Value::Int),
            Self::Sub => a.checked_sub(b).map(Value::Int),
            Self::Mul => a.checked_mul(b).map(Value::Int),
            Self::Div => (b != 0).then(|| Value::Float(a as f64 / b as f64)),
            Self::FloorDiv => {
                let q = a.checked_div(b)?;
                let floored = if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q };
                Some(Value::Int(floored))
            }
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A deferred-value producer.
#[derive(Clone)]
pub enum Field {
    /// Passthrough. A template reference is mastered into a nested object.
    Value(Value),
    /// Uniform integer in `[low, high]`.
    RandomInt { low: i64, high: i64 },
    /// A dice roll, kept as its result list.
    Dice(DiceExpr),
    /// A range table whose outcomes are themselves fields.
    Table(DiceTable<Field>),
    /// One of the choices, resolved after picking.
    PickOne(Vec<Field>),
    /// One item of the list the inner field resolves to.
    PickFrom(Box<Field>),
    /// Every item, resolved in order, as a list.
    All(Vec<Field>),
    /// References to every template matching the query, in declaration
    /// order. Searches the lineage of `lineage` when given, otherwise the
    /// lineage of the template being mastered.
    WithTags {
        lineage: Option<String>,
        query: TagQuery,
    },
    /// The best match for the query, mastered. Searches like `WithTags`.
    Select {
        lineage: Option<String>,
        query: TagQuery,
    },
    /// A fresh mastering of the named template.
    Nested(String),
    /// The value at a field path.
    Ref(FieldPath),
    /// A rendered format template.
    Format(FormatTemplate),
    Op { op: BinOp, operands: Vec<Field> },
    Custom(Arc<dyn Producer>),
}

impl Field {
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    pub fn template(id: TemplateId) -> Self {
        Self::Value(Value::Template(id))
    }

    pub fn random_int(low: i64, high: i64) -> Self {
        Self::RandomInt {
            low: low.min(high),
            high: low.max(high),
        }
    }

    pub fn dice(expr: &str) -> Result<Self, ResolveError> {
        Ok(Self::Dice(DiceExpr::compile(expr)?))
    }

    /// A table of string outcomes, e.g. `"1..3 -> common; 4..6 -> rare"`.
    pub fn table(table: &str) -> Result<Self, ResolveError> {
        Ok(Self::Table(DiceTable::compile(table)?.map(Field::value)))
    }

    pub fn pick_one<I, F>(choices: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        Self::PickOne(choices.into_iter().map(Into::into).collect())
    }

    pub fn pick_from(list: impl Into<Field>) -> Self {
        Self::PickFrom(Box::new(list.into()))
    }

    pub fn all<I, F>(items: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Field>,
    {
        Self::All(items.into_iter().map(Into::into).collect())
    }

    pub fn with_tags(query: &str) -> Self {
        Self::WithTags {
            lineage: None,
            query: TagQuery::parse(query),
        }
    }

    /// Like [`Field::with_tags`], searching the lineage `template` belongs to.
    pub fn with_tags_in(template: impl Into<String>, query: &str) -> Self {
        Self::WithTags {
            lineage: Some(template.into()),
            query: TagQuery::parse(query),
        }
    }

    pub fn select(query: &str) -> Self {
        Self::Select {
            lineage: None,
            query: TagQuery::parse(query),
        }
    }

    /// Like [`Field::select`], searching the lineage `template` belongs to.
    pub fn select_in(template: impl Into<String>, query: &str) -> Self {
        Self::Select {
            lineage: Some(template.into()),
            query: TagQuery::parse(query),
        }
    }

    pub fn nested(template: impl Into<String>) -> Self {
        Self::Nested(template.into())
    }

    pub fn reference(path: &str) -> Result<Self, ResolveError> {
        Ok(Self::Ref(FieldPath::parse(path)?))
    }

    pub fn format(template: &str) -> Result<Self, ResolveError> {
        Ok(Self::Format(FormatTemplate::parse(template)?))
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Scope<'_>, &mut dyn RandomSource) -> Result<Value, ResolveError>
            + Send
            + Sync
            + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn floor_div(self, rhs: impl Into<Field>) -> Self {
        self.combine(BinOp::FloorDiv, rhs.into())
    }

    fn combine(self, op: BinOp, rhs: Field) -> Self {
        match self {
            Self::Op { op: lhs_op, mut operands } if lhs_op == op => {
                operands.push(rhs);
                Self::Op { op, operands }
            }
            lhs => Self::Op {
                op,
                operands: vec![lhs, rhs],
            },
        }
    }

    /// Whether the field is deferred unless declared otherwise.
    pub fn deferred_by_default(&self) -> bool {
        matches!(self, Self::Format(_))
    }

    /// Sibling fields this field reads through `Ref` and `Format` paths.
    pub fn implied_dependencies(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_dependencies(&mut out);
        out
    }

    fn collect_dependencies(&self, out: &mut Vec<String>) {
        match self {
            Self::Ref(path) => {
                if let Some(name) = path.own_field() {
                    push_unique(out, name);
                }
            }
            Self::Format(template) => {
                for name in template.paths().filter_map(FieldPath::own_field) {
                    push_unique(out, name);
                }
            }
            Self::PickOne(items) | Self::All(items) | Self::Op { operands: items, .. } => {
                for item in items {
                    item.collect_dependencies(out);
                }
            }
            Self::PickFrom(inner) => inner.collect_dependencies(out),
            Self::Table(table) => {
                for entry in table.entries() {
                    entry.outcome.collect_dependencies(out);
                }
            }
            Self::Value(_)
            | Self::RandomInt { .. }
            | Self::Dice(_)
            | Self::WithTags { .. }
            | Self::Select { .. }
            | Self::Nested(_)
            | Self::Custom(_) => {}
        }
    }

    /// Produce a concrete value in `scope`.
    pub fn resolve(
        &self,
        scope: &Scope<'_>,
        rng: &mut dyn RandomSource,
    ) -> Result<Value, ResolveError> {
        match self {
            Self::Value(value) => materialize(value.clone(), scope, rng),
            Self::RandomInt { low, high } => Ok(Value::Int(rng.int_in_range(*low, *high))),
            Self::Dice(expr) => Ok(Value::Rolls(expr.roll(rng))),
            Self::Table(table) => {
                let outcome = table.roll(rng)?;
                let value = outcome.resolve(scope, rng)?;
                materialize(value, scope, rng)
            }
            Self::PickOne(choices) => {
                if choices.is_empty() {
                    return Err(ResolveError::EmptyChoice);
                }
                let value = choices[rng.choose_index(choices.len())].resolve(scope, rng)?;
                materialize(value, scope, rng)
            }
            Self::PickFrom(inner) => {
                let list = inner.resolve(scope, rng)?;
                let Value::List(items) = list else {
                    return Err(ResolveError::TypeMismatch {
                        expected: "list",
                        found: list.type_name(),
                    });
                };
                if items.is_empty() {
                    return Err(ResolveError::EmptyChoice);
                }
                let picked = items[rng.choose_index(items.len())].clone();
                materialize(picked, scope, rng)
            }
            Self::All(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let value = item.resolve(scope, rng)?;
                    values.push(materialize(value, scope, rng)?);
                }
                Ok(Value::List(values))
            }
            Self::WithTags { lineage, query } => {
                let repo = scope.repository_for(lineage.as_deref())?;
                Ok(Value::List(
                    repo.query_ordered(query)
                        .into_iter()
                        .map(Value::Template)
                        .collect(),
                ))
            }
            Self::Select { lineage, query } => {
                let repo = scope.repository_for(lineage.as_deref())?;
                let id = repo.select(query, rng).ok_or(ResolveError::EmptyChoice)?;
                Ok(Value::Object(scope.master_nested(id, rng)?))
            }
            Self::Nested(name) => {
                let id = scope
                    .catalog()
                    .id_of(name)
                    .ok_or_else(|| ResolveError::UnknownTemplate(name.clone()))?;
                Ok(Value::Object(scope.master_nested(id, rng)?))
            }
            Self::Ref(path) => scope.lookup(path),
            Self::Format(template) => {
                let text = template.render(|path| scope.lookup(path).map(|v| v.to_string()))?;
                Ok(Value::Str(text))
            }
            Self::Op { op, operands } => {
                let Some((first, rest)) = operands.split_first() else {
                    return Err(ResolveError::MissingOperands { op: *op });
                };
                let mut acc = first.resolve(scope, rng)?;
                for operand in rest {
                    let rhs = operand.resolve(scope, rng)?;
                    acc = op.apply(&acc, &rhs)?;
                }
                Ok(acc)
            }
            Self::Custom(producer) => producer.produce(scope, rng),
        }
    }
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}

/// Master a template reference into a fresh nested object.
fn materialize(
    value: Value,
    scope: &Scope<'_>,
    rng: &mut dyn RandomSource,
) -> Result<Value, ResolveError> {
    match value {
        Value::Template(id) => Ok(Value::Object(scope.master_nested(id, rng)?)),
        other => Ok(other),
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::RandomInt { low, high } => write!(f, "RandomInt({low}, {high})"),
            Self::Dice(expr) => write!(f, "Dice({expr})"),
            Self::Table(table) => f.debug_tuple("Table").field(table).finish(),
            Self::PickOne(items) => f.debug_tuple("PickOne").field(items).finish(),
            Self::PickFrom(inner) => f.debug_tuple("PickFrom").field(inner).finish(),
            Self::All(items) => f.debug_tuple("All").field(items).finish(),
            Self::WithTags { lineage, query } => match lineage {
                Some(root) => write!(f, "WithTags({root}: {query})"),
                None => write!(f, "WithTags({query})"),
            },
            Self::Select { lineage, query } => match lineage {
                Some(root) => write!(f, "Select({root}: {query})"),
                None => write!(f, "Select({query})"),
            },
            Self::Nested(name) => write!(f, "Nested({name})"),
            Self::Ref(path) => write!(f, "Ref({path})"),
            Self::Format(t) => write!(f, "Format({:?})", t.text()),
            Self::Op { op, operands } => f
                .debug_struct("Op")
                .field("op", op)
                .field("operands", operands)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl<T: Into<Value>> From<T> for Field {
    fn from(value: T) -> Self {
        Self::Value(value.into())
    }
}

macro_rules! field_arithmetic {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Field>> $trait<R> for Field {
            type Output = Field;

            fn $method(self, rhs: R) -> Field {
                self.combine($op, rhs.into())
            }
        }
    };
}

field_arithmetic!(Add, add, BinOp::Add);
field_arithmetic!(Sub, sub, BinOp::Sub);
field_arithmetic!(Mul, mul, BinOp::Mul);
field_arithmetic!(Div, div, BinOp::Div);

/// A field plus its declared dependencies and deferral flag.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub field: Field,
    pub depends_on: Vec<String>,
    pub deferred: bool,
}

impl FieldSpec {
    pub fn new(field: Field) -> Self {
        Self {
            deferred: field.deferred_by_default(),
            field,
            depends_on: Vec::new(),
        }
    }

    /// Add dependencies from a whitespace-separated list of field names.
    pub fn depends_on(mut self, names: &str) -> Self {
        for name in names.split_whitespace() {
            if !self.depends_on.iter().any(|n| n == name) {
                self.depends_on.push(name.to_string());
            }
        }
        self
    }

    /// Resolve after every non-deferred field.
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Resolve with the non-deferred fields even if deferred by default.
    pub fn immediate(mut self) -> Self {
        self.deferred = false;
        self
    }

    /// Declared dependencies followed by the implied ones, without repeats.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps = self.depends_on.clone();
        for name in self.field.implied_dependencies() {
            if !deps.contains(&name) {
                deps.push(name);
            }
        }
        deps
    }
}

impl From<Field> for FieldSpec {
    fn from(field: Field) -> Self {
        Self::new(field)
    }
}
