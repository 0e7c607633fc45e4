//! Hand-written entities shared by the unit tests.

use crate::entity::Entity;
use crate::error::Result;
use crate::executor::Executor;
use crate::metadata::{Field, Filters, Relation, Validators};
use crate::record::Record;
use crate::test_utils::apply_schema;
use crate::value::Value;

pub const SCHEMA: &str = "
    CREATE TABLE authors (id INTEGER PRIMARY KEY, name TEXT);
    CREATE TABLE articles (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL UNIQUE,
        body TEXT,
        views INTEGER,
        rating REAL,
        published BOOLEAN,
        author_id INTEGER
    );
    CREATE TABLE comments (id INTEGER PRIMARY KEY, body TEXT);
    CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT);
    CREATE TABLE articles_comments (article_id INTEGER NOT NULL, comment_id INTEGER NOT NULL);
    CREATE TABLE articles_tags (
        article_id INTEGER NOT NULL,
        tag_id INTEGER NOT NULL,
        UNIQUE (article_id, tag_id)
    )
";

pub async fn install(ex: &mut Executor<'_>) -> Result<()> {
    apply_schema(ex, SCHEMA).await
}

/// Article 1 by author 1, tagged 1..=3, with comments 10 and 11 (comment 12 is unlinked).
pub async fn seed_linked_article(ex: &mut Executor<'_>) -> Result<()> {
    apply_schema(
        ex,
        "
        INSERT INTO authors (id, name) VALUES (1, 'Ada');
        INSERT INTO articles (id, title, views, author_id) VALUES (1, 'Linked', 3, 1);
        INSERT INTO tags (id, label) VALUES (1, 'a'), (2, 'b'), (3, 'c');
        INSERT INTO comments (id, body) VALUES (10, 'x'), (11, 'y'), (12, 'z');
        INSERT INTO articles_tags (article_id, tag_id) VALUES (1, 1), (1, 2), (1, 3);
        INSERT INTO articles_comments (article_id, comment_id) VALUES (1, 10), (1, 11)
        ",
    )
    .await
}

#[derive(Debug)]
pub struct Article {
    record: Record<Article>,
}

impl Entity for Article {
    const NAME: &'static str = "Article";

    fn fields() -> Vec<Field> {
        ["title", "body", "views", "rating", "published", "author_id"]
            .into_iter()
            .map(Field::new)
            .collect()
    }

    fn relations() -> Vec<Relation> {
        vec![
            Relation::one_to_many::<Comment>(),
            Relation::many_to_many::<Tag>(),
            Relation::one_to_one::<Author>().parent_column("author_id"),
        ]
    }

    fn validators() -> Validators {
        Validators::new()
            .sanitize("title", |v| {
                if let Value::Text(s) = v {
                    *s = s.trim().to_owned();
                }
            })
            .check("title", |v| !v.is_empty())
    }

    fn record(&self) -> &Record<Self> {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record<Self> {
        &mut self.record
    }

    fn from_record(record: Record<Self>) -> Self {
        Self { record }
    }
}

impl Article {
    pub fn title(&self) -> Option<String> {
        self.record.get_as("title")
    }

    pub fn set_title(&mut self, title: &str) -> bool {
        self.record.set("title", title)
    }

    pub fn tags(&self) -> &crate::LazyAssociation {
        self.record.many("tags")
    }

    pub fn tags_mut(&mut self) -> &mut crate::LazyAssociation {
        self.record.many_mut("tags")
    }

    pub fn comments(&self) -> &crate::LazyAssociation {
        self.record.many("comments")
    }

    pub fn author(&self) -> Option<&Author> {
        self.record.related("author")
    }
}

#[derive(Debug)]
pub struct Comment {
    record: Record<Comment>,
}

impl Entity for Comment {
    const NAME: &'static str = "Comment";

    fn fields() -> Vec<Field> {
        vec![Field::new("body")]
    }

    fn record(&self) -> &Record<Self> {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record<Self> {
        &mut self.record
    }

    fn from_record(record: Record<Self>) -> Self {
        Self { record }
    }
}

#[derive(Debug)]
pub struct Tag {
    record: Record<Tag>,
}

impl Entity for Tag {
    const NAME: &'static str = "Tag";

    fn fields() -> Vec<Field> {
        vec![Field::new("label")]
    }

    fn filters() -> Filters {
        Filters::new().filter("label", |v| match v {
            Value::Text(s) => Value::Text(s.to_lowercase()),
            other => other,
        })
    }

    fn record(&self) -> &Record<Self> {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record<Self> {
        &mut self.record
    }

    fn from_record(record: Record<Self>) -> Self {
        Self { record }
    }
}

impl Tag {
    pub fn label(&self) -> Option<String> {
        self.record.get_as("label")
    }
}

#[derive(Debug)]
pub struct Author {
    record: Record<Author>,
}

impl Entity for Author {
    const NAME: &'static str = "Author";

    fn fields() -> Vec<Field> {
        vec![Field::new("name")]
    }

    fn record(&self) -> &Record<Self> {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record<Self> {
        &mut self.record
    }

    fn from_record(record: Record<Self>) -> Self {
        Self { record }
    }
}

impl Author {
    pub fn name(&self) -> Option<String> {
        self.record.get_as("name")
    }
}
