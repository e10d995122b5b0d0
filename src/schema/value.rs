use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::mastered::MasteredObject;
use super::template::TemplateId;
use crate::core::dice::ResultList;

/// A concrete value held by a mastered object or produced by a field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// A dice roll; behaves as its total in arithmetic.
    Rolls(ResultList),
    /// A reference to a template type that has not been mastered.
    Template(TemplateId),
    /// A nested mastered object.
    Object(Arc<MasteredObject>),
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Rolls(_) => "rolls",
            Self::Template(_) => "template",
            Self::Object(_) => "object",
        }
    }

    /// Integer view: ints, and dice rolls by their total.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Rolls(r) => Some(r.total()),
            _ => None,
        }
    }

    /// Numeric view: floats, ints and dice totals.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::Rolls(r) => Some(r.total() as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_rolls(&self) -> Option<&ResultList> {
        match self {
            Self::Rolls(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_template(&self) -> Option<TemplateId> {
        match self {
            Self::Template(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<MasteredObject>> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => write!(f, "{}", s),
            Self::Rolls(r) => write!(f, "{}", r),
            Self::Template(id) => write!(f, "{}", id),
            Self::Object(obj) => write!(f, "{}", obj.display_name()),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<ResultList> for Value {
    fn from(r: ResultList) -> Self {
        Self::Rolls(r)
    }
}

impl From<TemplateId> for Value {
    fn from(id: TemplateId) -> Self {
        Self::Template(id)
    }
}

impl From<Arc<MasteredObject>> for Value {
    fn from(obj: Arc<MasteredObject>) -> Self {
        Self::Object(obj)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}
