//! Relational entity mapping over sqlx.
//!
//! Entities declare their columns and relations once; the engine builds the
//! SQL to load, save and delete them, keeps one-to-many and many-to-many links
//! in pivot tables, and resolves related entities lazily through
//! [`LazyAssociation`]. [`Search`] compiles fluent predicates into id queries.
//!
//! Every operation takes an [`Executor`]: the connection, the error sink and
//! the [`Settings`] it runs with.

pub use async_trait;
pub use sqlx;

pub mod association;
pub mod connection;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod naming;
pub mod record;
pub mod registry;
pub mod search;
pub mod settings;
pub mod test_utils;
pub mod value;

#[cfg(test)]
mod fixtures;

pub use association::{LazyAssociation, Resolved};
pub use connection::{Connection, connect};
pub use dialect::Dialect;
pub use entity::Entity;
pub use error::{Error, Result};
pub use executor::{ErrorSink, Executor, TracingSink};
pub use metadata::{EntityType, Field, Filters, Relation, RelationKind, Rule, RuleKind, Validators};
pub use record::{Record, Slot};
pub use search::{Glue, Limit, Operand, Operator, Search, SearchResult};
pub use settings::Settings;
pub use value::{FromValue, Id, Row, Value};

pub mod prelude {
    pub use crate::{
        Entity, Error, Executor, Field, Filters, LazyAssociation, Record, Relation, Resolved,
        Search, Settings, Validators, Value,
    };
}
