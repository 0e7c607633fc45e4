//! # Pivotal
//!
//! Relational entity mapping with lazy, pivot-table backed associations.
//!
//! An entity wraps a [`Record`] and declares its columns and relations with
//! `#[derive(Entity)]`. One-to-many and many-to-many links live in pivot
//! tables named after both tables (`articles_tags`); collections hold ids and
//! resolve entities only when asked. [`Search`] turns fluent predicates into
//! an id query.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pivotal::prelude::*;
//!
//! #[derive(Entity)]
//! #[fields(label: String)]
//! pub struct Tag {
//!     record: Record<Tag>,
//! }
//!
//! #[derive(Entity)]
//! #[fields(title: String)]
//! #[many_to_many(Tag)]
//! pub struct Article {
//!     record: Record<Article>,
//! }
//!
//! # async fn example() -> pivotal::Result<()> {
//! let mut conn = pivotal::connect("sqlite::memory:").await?;
//! let mut ex = Executor::new(conn.as_mut());
//!
//! let mut article = Article::new();
//! article.set_title("Hello");
//! article.tags_mut().append(1);
//! article.save(&mut ex).await?;
//! article.flush_associations(&mut ex).await?;
//!
//! let recent = Article::search(&mut ex)
//!     .more_than("id", 10)
//!     .limit_to(5)
//!     .start()
//!     .await?
//!     .into_ids();
//! # let _ = recent;
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! `sqlite` is enabled by default; `postgres` and `mysql` are cargo features.
//! `metrics` records a duration histogram and a counter per statement.

pub use pivotal_core::*;
pub use pivotal_macros::Entity;

pub mod prelude {
    pub use pivotal_core::prelude::*;

    pub use crate::Entity;
}
