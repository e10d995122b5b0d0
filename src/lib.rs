//! Blueprint Engine: procedural content templates for games.
//!
//! Template types ("blueprints") describe their attributes as ranges, dice,
//! choices and formulas instead of fixed values. Mastering a template
//! resolves every attribute into a concrete, immutable object. Templates are
//! indexed by tags so fields can pick from a filtered population, and
//! modifiers and factories compose existing templates into new objects.
//!
//! ```
//! use blueprint_engine::{seeded, Catalog, Field, TemplateDecl, Value};
//!
//! let mut catalog = Catalog::new();
//! let club = catalog
//!     .declare(
//!         TemplateDecl::new("Club")
//!             .tags("weapon primitive")
//!             .value("name", "Club")
//!             .field("damage", Field::dice("1d6+1").unwrap()),
//!     )
//!     .unwrap();
//!
//! let item = catalog.master(club, &mut seeded(7)).unwrap();
//! let damage = item.get("damage").and_then(Value::as_int).unwrap();
//! assert!((2..=7).contains(&damage));
//! ```

pub mod core;
pub mod schema;

pub use crate::core::catalog::{Attribute, Catalog, RegistryError, TemplateDecl, TemplateDef};
pub use crate::core::collection::Collection;
pub use crate::core::dice::{DiceError, DiceExpr, DiceTable, DiceTerm, ResultList, Sides};
pub use crate::core::engine::{ResolveError, Scope, MAX_NESTING_DEPTH};
pub use crate::core::field::{BinOp, Field, FieldSpec, Producer, MAX_REPEAT_LEN};
pub use crate::core::format::{FieldPath, FormatError, FormatTemplate};
pub use crate::core::loader::{CatalogBuilder, LoadError};
pub use crate::core::modifier::ModTarget;
pub use crate::core::random::{seed_from_str, seeded, RandomSource, ScriptedRandom};
pub use crate::core::repository::{TagQuery, TagRepository};
pub use crate::schema::mastered::{Generator, MasteredObject, SourceRef};
pub use crate::schema::tags::{spaced_type_name, TagSet};
pub use crate::schema::template::{RepositoryId, TemplateId, TemplateKind};
pub use crate::schema::value::Value;
