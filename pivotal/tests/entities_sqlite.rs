#![cfg(feature = "sqlite")]

use futures_util::TryStreamExt;
use pivotal::prelude::*;
use pivotal::test_utils::{RecordingSink, apply_schema, memory_sqlite};
use pivotal::{Connection, Resolved, SearchResult};

const SCHEMA: &str = "
    CREATE TABLE writers (id INTEGER PRIMARY KEY, name TEXT);
    CREATE TABLE posts (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL UNIQUE,
        views INTEGER,
        draft BOOLEAN,
        writer_id INTEGER
    );
    CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
    CREATE TABLE labels (id INTEGER PRIMARY KEY, label TEXT);
    CREATE TABLE posts_notes (post_id INTEGER NOT NULL, note_id INTEGER NOT NULL);
    CREATE TABLE posts_labels (
        post_id INTEGER NOT NULL,
        label_id INTEGER NOT NULL,
        UNIQUE (post_id, label_id)
    )
";

fn post_rules() -> Validators {
    Validators::new()
        .sanitize("title", |v| {
            if let Value::Text(s) = v {
                *s = s.trim().to_owned();
            }
        })
        .check("title", |v| !v.is_empty())
        .check("views", |v| v.as_i64().is_none_or(|n| n >= 0))
}

fn label_filters() -> Filters {
    Filters::new().filter("label", |v| match v {
        Value::Text(s) => Value::Text(s.to_uppercase()),
        other => other,
    })
}

#[derive(Entity, Debug)]
#[entity(validators = post_rules)]
#[fields(title: String, views: i64, draft: bool, writer_id: i64)]
#[one_to_many(Note)]
#[many_to_many(Label)]
#[one_to_one(Writer, column = "writer_id")]
pub struct Post {
    record: Record<Post>,
}

#[derive(Entity, Debug)]
#[fields(body: String)]
pub struct Note {
    record: Record<Note>,
}

#[derive(Entity, Debug)]
#[entity(filters = label_filters)]
#[fields(label: String)]
pub struct Label {
    record: Record<Label>,
}

#[derive(Entity, Debug)]
#[fields(name: String)]
pub struct Writer {
    record: Record<Writer>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

async fn setup() -> Box<dyn Connection> {
    init_tracing();
    let mut conn = memory_sqlite().await.expect("sqlite");
    let mut ex = Executor::new(&mut *conn);
    apply_schema(&mut ex, SCHEMA).await.expect("schema");
    conn
}

async fn count(ex: &mut Executor<'_>, table: &str) -> i64 {
    let rows = ex
        .fetch_all(&format!("SELECT COUNT(*) AS n FROM {}", table), &[])
        .await
        .expect("count");
    rows[0].id("n").expect("count column")
}

async fn saved_label(ex: &mut Executor<'_>, text: &str) -> Label {
    let mut label = Label::new();
    label.set_label(text);
    label.save(ex).await.expect("save label");
    label
}

#[test]
fn derived_metadata_uses_naming_defaults() {
    let ty = Post::entity_type();
    assert_eq!(ty.name(), "Post");
    assert_eq!(ty.table(), "posts");
    let columns: Vec<_> = ty.fields().iter().map(|f| f.column()).collect();
    assert_eq!(columns, ["title", "views", "draft", "writer_id"]);

    let labels = ty.relation("labels").expect("labels relation");
    assert_eq!(labels.pivot_table(ty), "posts_labels");
    assert_eq!(labels.owner_column(ty), "post_id");
    assert_eq!(labels.target_column(), "label_id");
    assert_eq!(ty.relation("writer").expect("writer").foreign_key_column(), "writer_id");
    assert!(ty.relation("notes").is_some());
}

#[test]
fn typed_setters_validate() {
    let mut post = Post::new();
    assert!(post.set_title("  Padded "));
    assert_eq!(post.title().as_deref(), Some("Padded"));
    assert!(!post.set_title(""));
    assert!(post.set_views(3));
    assert!(!post.set_views(-1));
    assert_eq!(post.views(), Some(3));
    assert!(post.draft().is_none());
}

#[tokio::test]
async fn save_then_find_round_trips_fields_and_links() {
    let mut conn = setup().await;
    let mut ex = Executor::new(&mut *conn);

    let rust = saved_label(&mut ex, "rust").await;
    let sql = saved_label(&mut ex, "sql").await;

    let mut post = Post::new();
    assert!(!post.is_persisted());
    post.set_title("Pivots");
    post.set_draft(false);
    assert!(post.labels_mut().append_entity(&rust));
    assert!(post.labels_mut().append_entity(&sql));
    assert!(!post.labels_mut().append_entity(&Label::new()));

    assert!(post.save(&mut ex).await.unwrap());
    assert!(post.is_persisted());
    let id = post.id().unwrap();
    assert!(id > 0);
    assert_eq!(post.flush_associations(&mut ex).await.unwrap(), 2);

    let found = Post::find(&mut ex, id).await.unwrap().unwrap();
    assert_eq!(found.title().as_deref(), Some("Pivots"));
    assert_eq!(found.draft(), Some(false));
    assert_eq!(found.views(), None);
    assert_eq!(found.labels().ids(), [rust.id().unwrap(), sql.id().unwrap()]);
    assert!(found.notes().is_empty());
    assert!(found.writer().is_none());
}

#[tokio::test]
async fn appends_are_deduplicated_and_flushed_once() {
    let mut conn = setup().await;
    let mut ex = Executor::new(&mut *conn);

    let mut post = Post::new();
    post.set_title("Dedup");
    assert!(post.labels_mut().append(5));
    assert!(!post.labels_mut().append(5));
    assert_eq!(post.labels().len(), 1);

    post.save(&mut ex).await.unwrap();
    assert_eq!(post.flush_associations(&mut ex).await.unwrap(), 1);
    assert_eq!(post.flush_associations(&mut ex).await.unwrap(), 0);
    assert_eq!(count(&mut ex, "posts_labels").await, 1);

    assert!(post.labels_mut().append(6));
    assert_eq!(post.labels().pending(), [6]);
    assert_eq!(post.flush_associations(&mut ex).await.unwrap(), 1);
    assert_eq!(count(&mut ex, "posts_labels").await, 2);
}

#[tokio::test]
async fn delete_removes_links_and_owned_notes() {
    let mut conn = setup().await;
    let mut ex = Executor::new(&mut *conn);

    let mut keep = Note::new();
    keep.set_body("unrelated");
    keep.save(&mut ex).await.unwrap();

    let mut post = Post::new();
    post.set_title("Doomed");
    post.save(&mut ex).await.unwrap();
    for body in ["first", "second"] {
        let mut note = Note::new();
        note.set_body(body);
        note.save(&mut ex).await.unwrap();
        post.notes_mut().append_entity(&note);
    }
    post.labels_mut().append(1);
    post.flush_associations(&mut ex).await.unwrap();

    assert!(post.delete(&mut ex).await.unwrap());
    assert!(!post.is_persisted());
    assert!(post.id().is_none());

    assert_eq!(count(&mut ex, "posts").await, 0);
    assert_eq!(count(&mut ex, "posts_labels").await, 0);
    assert_eq!(count(&mut ex, "posts_notes").await, 0);
    assert_eq!(count(&mut ex, "notes").await, 1);
    assert!(Note::find(&mut ex, keep.id().unwrap()).await.unwrap().is_some());
}

#[tokio::test]
async fn failed_insert_is_reported_once_and_stays_virtual() {
    let mut conn = setup().await;
    let sink = RecordingSink::default();
    let mut ex = Executor::new(&mut *conn).with_sink(&sink);

    let mut first = Post::new();
    first.set_title("Unique");
    first.save(&mut ex).await.unwrap();
    assert!(sink.is_empty());

    let mut second = Post::new();
    second.set_title("Unique");
    second.labels_mut().append(9);
    let err = second.save(&mut ex).await.unwrap_err();
    assert!(err.is_data_access());
    assert!(err.to_string().contains("inserting Post"));
    assert!(!second.is_persisted());
    assert_eq!(second.labels().pending(), [9]);

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "inserting Post");
    assert_eq!(count(&mut ex, "posts").await, 1);
}

#[tokio::test]
async fn one_to_one_target_is_loaded_with_its_owner() {
    let mut conn = setup().await;
    let mut ex = Executor::new(&mut *conn);

    let mut writer = Writer::new();
    writer.set_name("Lin");
    writer.save(&mut ex).await.unwrap();
    let writer_id = writer.id().unwrap();

    let mut post = Post::new();
    post.set_title("Bylined");
    assert!(post.set_writer(writer));
    assert_eq!(post.writer_id(), Some(writer_id));
    post.save(&mut ex).await.unwrap();

    let found = Post::find(&mut ex, post.id().unwrap()).await.unwrap().unwrap();
    let writer = found.writer().expect("writer loaded");
    assert!(writer.is_persisted());
    assert_eq!(writer.name().as_deref(), Some("Lin"));
}

#[tokio::test]
async fn collections_stream_resolved_entities() {
    let mut conn = setup().await;
    let mut ex = Executor::new(&mut *conn);

    let mut post = Post::new();
    post.set_title("Streamed");
    post.save(&mut ex).await.unwrap();
    for text in ["a", "b", "c"] {
        let label = saved_label(&mut ex, text).await;
        post.labels_mut().append_entity(&label);
    }
    post.flush_associations(&mut ex).await.unwrap();

    let found = Post::find(&mut ex, post.id().unwrap()).await.unwrap().unwrap();
    let labels: Vec<Resolved<Label>> = found.labels().stream(&mut ex).try_collect().await.unwrap();
    let texts: Vec<_> = labels
        .into_iter()
        .filter_map(Resolved::into_entity)
        .filter_map(|l| l.label())
        .collect();
    assert_eq!(texts, ["A", "B", "C"]);

    let first = found.labels().get::<Label>(&mut ex, 0).await.unwrap();
    assert!(matches!(first, Some(Resolved::Entity(_))));
    let err = found.labels().get::<Note>(&mut ex, 0).await.unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
}

#[tokio::test]
async fn search_finds_ids_and_raw_rows() {
    let mut conn = setup().await;
    let mut ex = Executor::new(&mut *conn);

    for (title, views) in [("alpha", 5), ("beta", 50), ("gamma", 500), ("alphabet", 7)] {
        let mut post = Post::new();
        post.set_title(title);
        post.set_views(views);
        post.save(&mut ex).await.unwrap();
    }

    let popular = Post::search(&mut ex)
        .more_or_equal("views", 50)
        .order_by(["views DESC"])
        .start()
        .await
        .unwrap()
        .into_ids();
    assert_eq!(popular.ids(), [3, 2]);
    assert!(popular.target().is_some_and(|t| t.is::<Post>()));

    let alphas = Post::search(&mut ex)
        .like("title", "alpha%")
        .equal("views", 5)
        .not()
        .start()
        .await
        .unwrap()
        .into_ids();
    assert_eq!(alphas.ids(), [4]);

    let nothing = Post::search(&mut ex)
        .is_in("id", Vec::<i64>::new())
        .start()
        .await
        .unwrap()
        .into_ids();
    assert!(nothing.is_empty());

    let paged = Post::search(&mut ex)
        .more_than("id", 0)
        .order_by(["id"])
        .limit_to((1, 2))
        .start()
        .await
        .unwrap()
        .into_ids();
    assert_eq!(paged.ids(), [2, 3]);

    let rows = Post::search(&mut ex)
        .raw_query("SELECT title FROM posts WHERE views < ? ORDER BY id")
        .bind_values([10])
        .start()
        .await
        .unwrap();
    let SearchResult::Rows(rows) = rows else {
        panic!("raw queries return rows");
    };
    let titles: Vec<_> = rows
        .iter()
        .filter_map(|r| r.get("title").and_then(Value::as_str).map(str::to_owned))
        .collect();
    assert_eq!(titles, ["alpha", "alphabet"]);
}
