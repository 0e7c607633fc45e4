use futures_util::stream::BoxStream;

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::metadata::{EntityType, Relation};
use crate::naming;
use crate::value::{Id, Value};

/// An element of a [`LazyAssociation`] as handed out to callers.
#[derive(Debug)]
pub enum Resolved<T> {
    /// The related entity, constructed on access. It is virtual if the id no
    /// longer matches a row.
    Entity(T),
    /// The raw id, when resolve-on-access is off or the target type is unknown.
    Id(Id),
}

impl<T: Entity> Resolved<T> {
    pub fn id(&self) -> Option<Id> {
        match self {
            Resolved::Entity(entity) => entity.id(),
            Resolved::Id(id) => Some(*id),
        }
    }

    pub fn into_entity(self) -> Option<T> {
        match self {
            Resolved::Entity(entity) => Some(entity),
            Resolved::Id(_) => None,
        }
    }
}

/// Ids of related entities, resolved into entities only when they are read.
///
/// Ids appended while virtual mode is on are also recorded as pending; they
/// are written to the pivot table by [`flush`](LazyAssociation::flush).
/// Loading from the database turns virtual mode off so that existing links
/// are never written twice.
#[derive(Debug, Clone)]
pub struct LazyAssociation {
    ids: Vec<Id>,
    pending: Vec<Id>,
    virtual_mode: bool,
    resolve_on_access: bool,
    owner: Option<&'static EntityType>,
    target: Option<&'static EntityType>,
    relation: Option<&'static Relation>,
}

impl Default for LazyAssociation {
    fn default() -> Self {
        Self::new()
    }
}

impl LazyAssociation {
    /// An untyped collection: elements resolve to raw ids and it cannot be flushed.
    pub const fn new() -> Self {
        Self {
            ids: Vec::new(),
            pending: Vec::new(),
            virtual_mode: true,
            resolve_on_access: true,
            owner: None,
            target: None,
            relation: None,
        }
    }

    /// A collection of `target` entities with no owner.
    pub fn of(target: &'static EntityType) -> Self {
        Self {
            target: Some(target),
            ..Self::new()
        }
    }

    /// The collection backing `relation` on an `owner` entity.
    pub fn for_relation(owner: &'static EntityType, relation: &'static Relation) -> Self {
        Self {
            owner: Some(owner),
            target: Some(relation.target()),
            relation: Some(relation),
            ..Self::new()
        }
    }

    pub fn set_owner(&mut self, owner: &'static EntityType) {
        self.owner = Some(owner);
    }

    pub fn owner(&self) -> Option<&'static EntityType> {
        self.owner
    }

    pub fn target(&self) -> Option<&'static EntityType> {
        self.target
    }

    /// Adds an id unless it is already present. Returns whether it was added.
    pub fn append(&mut self, id: Id) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        self.ids.push(id);
        if self.virtual_mode {
            self.pending.push(id);
        }
        true
    }

    /// Appends a persisted entity's id. Virtual entities and entities of
    /// another type than the collection's target are refused.
    pub fn append_entity<E: Entity>(&mut self, entity: &E) -> bool {
        if self.target.is_some_and(|t| !t.is::<E>()) {
            return false;
        }
        match entity.id() {
            Some(id) if entity.is_persisted() => self.append(id),
            _ => false,
        }
    }

    /// Swap-removes the id at `index` and drops it from the pending set.
    pub fn remove(&mut self, index: usize) -> Option<Id> {
        if index >= self.ids.len() {
            return None;
        }
        let id = self.ids.swap_remove(index);
        self.pending.retain(|p| *p != id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn count(&self) -> usize {
        self.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: Id) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    pub fn pending(&self) -> &[Id] {
        &self.pending
    }

    pub fn id_at(&self, index: usize) -> Option<Id> {
        self.ids.get(index).copied()
    }

    /// Raw ids in order; each call starts over.
    pub fn iter(&self) -> impl Iterator<Item = Id> + '_ {
        self.ids.iter().copied()
    }

    pub fn enable_virtual_mode(&mut self) {
        self.virtual_mode = true;
    }

    pub fn disable_virtual_mode(&mut self) {
        self.virtual_mode = false;
    }

    pub fn is_virtual_mode(&self) -> bool {
        self.virtual_mode
    }

    pub fn enable_resolve_on_access(&mut self) {
        self.resolve_on_access = true;
    }

    pub fn disable_resolve_on_access(&mut self) {
        self.resolve_on_access = false;
    }

    pub fn resolves_on_access(&self) -> bool {
        self.resolve_on_access
    }

    /// Element at `index`, constructed as `T` when resolve-on-access is on
    /// and the target type is known.
    pub async fn get<T: Entity>(
        &self,
        ex: &mut Executor<'_>,
        index: usize,
    ) -> Result<Option<Resolved<T>>> {
        let Some(id) = self.id_at(index) else {
            return Ok(None);
        };
        match self.target {
            Some(target) if self.resolve_on_access => {
                if !target.is::<T>() {
                    return Err(Error::TypeMismatch {
                        expected: target.name(),
                        found: T::NAME,
                    });
                }
                let entity = T::construct(ex, Some(id)).await?;
                Ok(Some(Resolved::Entity(entity)))
            }
            _ => Ok(Some(Resolved::Id(id))),
        }
    }

    /// Streams every element in order, resolving each one as it is polled.
    pub fn stream<'a, T: Entity>(
        &'a self,
        ex: &'a mut Executor<'_>,
    ) -> BoxStream<'a, Result<Resolved<T>>> {
        Box::pin(async_stream::try_stream! {
            for index in 0..self.ids.len() {
                if let Some(item) = self.get::<T>(ex, index).await? {
                    yield item;
                }
            }
        })
    }

    /// Writes every pending id to the pivot table as `(owner_id, id)`.
    ///
    /// Stops at the first failing insert; ids not yet written stay pending.
    #[tracing::instrument(skip(self, ex), fields(pending = self.pending.len()))]
    pub async fn flush(&mut self, ex: &mut Executor<'_>, owner_id: Id) -> Result<usize> {
        let (Some(owner), Some(target)) = (self.owner, self.target) else {
            let err = Error::missing_owner();
            ex.report("flushing association", &err);
            return Err(err);
        };
        if self.pending.is_empty() {
            return Ok(0);
        }

        let (pivot, owner_column, target_column) = match self.relation {
            Some(relation) => (
                relation.pivot_table(owner),
                relation.owner_column(owner),
                relation.target_column(),
            ),
            None => (
                naming::pivot_table(owner.table(), target.table()),
                naming::foreign_key(owner.name()),
                naming::foreign_key(target.name()),
            ),
        };
        let dialect = ex.dialect();
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES ({})",
            dialect.quote_identifier(&pivot),
            dialect.quote_identifier(&owner_column),
            dialect.quote_identifier(&target_column),
            dialect.placeholders(1, 2)
        );

        let pending = self.pending.clone();
        for (written, id) in pending.iter().enumerate() {
            if let Err(err) = ex.execute(&sql, &[Value::Int(owner_id), Value::Int(*id)]).await {
                self.pending.drain(..written);
                let context = format!(
                    "flushing {} links of {} with id {}",
                    target.name(),
                    owner.name(),
                    owner_id
                );
                return Err(ex.failed(context, err));
            }
        }
        self.pending.clear();
        tracing::debug!(table = %pivot, written = pending.len(), "flushed association");
        Ok(pending.len())
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::fixtures::{self, Article, Comment, Tag};
    use crate::registry::entity_type;
    use crate::test_utils::{RecordingSink, memory_sqlite};
    use futures_util::TryStreamExt;

    #[test]
    fn append_deduplicates_and_tracks_pending() {
        let mut tags = LazyAssociation::of(entity_type::<Tag>());
        assert!(tags.append(1));
        assert!(!tags.append(1));
        assert!(tags.append(2));
        assert_eq!(tags.ids(), [1, 2]);
        assert_eq!(tags.pending(), [1, 2]);

        tags.disable_virtual_mode();
        assert!(tags.append(3));
        assert_eq!(tags.pending(), [1, 2]);
        assert_eq!(tags.count(), 3);
        assert!(tags.contains(3));
    }

    #[test]
    fn remove_swaps_last_into_place() {
        let mut c = LazyAssociation::new();
        for id in [10, 20, 30] {
            c.append(id);
        }
        assert_eq!(c.remove(0), Some(10));
        assert_eq!(c.ids(), [30, 20]);
        assert_eq!(c.pending(), [20, 30]);
        assert_eq!(c.remove(5), None);
        assert_eq!(c.iter().collect::<Vec<_>>(), [30, 20]);
    }

    #[test]
    fn append_entity_requires_persisted_target() {
        let mut tags = LazyAssociation::of(entity_type::<Tag>());
        let tag = Tag::new();
        assert!(!tags.append_entity(&tag));
        let comment = Comment::new();
        assert!(!tags.append_entity(&comment));
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn flush_without_owner_is_an_association_error() {
        let mut conn = memory_sqlite().await.unwrap();
        let sink = RecordingSink::default();
        let mut ex = Executor::new(&mut *conn).with_sink(&sink);

        let mut c = LazyAssociation::of(entity_type::<Tag>());
        c.append(1);
        let err = c.flush(&mut ex, 1).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot persist an association without a known owner and relation type"
        );
        assert_eq!(c.pending(), [1]);
        assert_eq!(sink.entries().len(), 1);
    }

    #[tokio::test]
    async fn flush_writes_pending_once() {
        let mut conn = memory_sqlite().await.unwrap();
        let mut ex = Executor::new(&mut *conn);
        fixtures::install(&mut ex).await.unwrap();

        let owner = entity_type::<Article>();
        let relation = owner.relation("tags").unwrap();
        let mut tags = LazyAssociation::for_relation(owner, relation);
        tags.append(1);
        tags.append(2);

        assert_eq!(tags.flush(&mut ex, 7).await.unwrap(), 2);
        assert!(tags.pending().is_empty());
        assert_eq!(tags.flush(&mut ex, 7).await.unwrap(), 0);

        let rows = ex
            .fetch_all("SELECT tag_id FROM articles_tags WHERE article_id = 7 ORDER BY tag_id", &[])
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().filter_map(|r| r.id("tag_id")).collect();
        assert_eq!(ids, [1, 2]);
    }

    #[tokio::test]
    async fn failed_flush_keeps_unwritten_ids_pending() {
        let mut conn = memory_sqlite().await.unwrap();
        let mut ex = Executor::new(&mut *conn);
        fixtures::install(&mut ex).await.unwrap();
        ex.execute("INSERT INTO articles_tags (article_id, tag_id) VALUES (7, 2)", &[])
            .await
            .unwrap();

        let owner = entity_type::<Article>();
        let mut tags = LazyAssociation::for_relation(owner, owner.relation("tags").unwrap());
        for id in [1, 2, 3] {
            tags.append(id);
        }
        let err = tags.flush(&mut ex, 7).await.unwrap_err();
        assert!(err.is_data_access());
        assert!(err.to_string().starts_with("flushing Tag links of Article with id 7"));
        assert_eq!(tags.pending(), [2, 3]);
    }

    #[tokio::test]
    async fn get_resolves_or_returns_ids() {
        let mut conn = memory_sqlite().await.unwrap();
        let mut ex = Executor::new(&mut *conn);
        fixtures::install(&mut ex).await.unwrap();
        ex.execute("INSERT INTO tags (id, label) VALUES (4, 'rust')", &[])
            .await
            .unwrap();

        let mut tags = LazyAssociation::of(entity_type::<Tag>());
        tags.append(4);
        tags.append(99);

        let first = tags.get::<Tag>(&mut ex, 0).await.unwrap().unwrap();
        let tag = first.into_entity().unwrap();
        assert!(tag.is_persisted());
        assert_eq!(tag.label(), Some("rust".to_owned()));

        let missing = tags.get::<Tag>(&mut ex, 1).await.unwrap().unwrap();
        assert!(!missing.into_entity().unwrap().is_persisted());

        assert!(tags.get::<Tag>(&mut ex, 2).await.unwrap().is_none());
        let err = tags.get::<Comment>(&mut ex, 0).await.unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { expected: "Tag", found: "Comment" }));

        tags.disable_resolve_on_access();
        let raw = tags.get::<Tag>(&mut ex, 0).await.unwrap().unwrap();
        assert!(matches!(raw, Resolved::Id(4)));
    }

    #[tokio::test]
    async fn stream_is_restartable() {
        let mut conn = memory_sqlite().await.unwrap();
        let mut ex = Executor::new(&mut *conn);
        fixtures::install(&mut ex).await.unwrap();

        let mut tags = LazyAssociation::of(entity_type::<Tag>());
        tags.disable_resolve_on_access();
        tags.append(5);
        tags.append(6);

        for _ in 0..2 {
            let items: Vec<Resolved<Tag>> = tags.stream(&mut ex).try_collect().await.unwrap();
            let ids: Vec<_> = items.iter().filter_map(Resolved::id).collect();
            assert_eq!(ids, [5, 6]);
        }
    }
}
