use std::future::Future;

use crate::error::Result;
use crate::executor::Executor;
use crate::metadata::{EntityType, Field, Filters, Relation, Validators};
use crate::record::Record;
use crate::registry;
use crate::search::Search;
use crate::value::Id;

/// The core trait for mapped entities.
///
/// An entity wraps a [`Record<Self>`] and declares its columns, relations,
/// validators and filters. Everything else (loading, saving, deleting,
/// searching) is provided. It is usually implemented with `#[derive(Entity)]`.
///
/// Declaration functions must be pure: they are called once, when the type's
/// metadata is first built, and must not ask for any entity's metadata.
pub trait Entity: Sized + Send + Sync + 'static {
    /// Type name, used for the default table and foreign-key names.
    const NAME: &'static str;

    /// Table override. Defaults to the pluralized, lower-cased type name.
    fn table() -> Option<&'static str> {
        None
    }

    /// Persisted scalar columns, in order. `id` is implicit.
    fn fields() -> Vec<Field>;

    fn relations() -> Vec<Relation> {
        Vec::new()
    }

    fn validators() -> Validators {
        Validators::default()
    }

    fn filters() -> Filters {
        Filters::default()
    }

    fn record(&self) -> &Record<Self>;

    fn record_mut(&mut self) -> &mut Record<Self>;

    fn from_record(record: Record<Self>) -> Self;

    /// Cached metadata for this type.
    fn entity_type() -> &'static EntityType {
        registry::entity_type::<Self>()
    }

    /// A new virtual entity.
    fn new() -> Self {
        Self::from_record(Record::new())
    }

    /// Builds an entity, loading row `id` when one is given.
    ///
    /// A missing row is not an error: the entity is returned virtual.
    fn construct(
        ex: &mut Executor<'_>,
        id: Option<Id>,
    ) -> impl Future<Output = Result<Self>> + Send {
        async move {
            let mut entity = Self::new();
            if let Some(id) = id {
                entity.record_mut().load(ex, id).await?;
            }
            Ok(entity)
        }
    }

    /// The entity with id `id`, if its row exists.
    fn find(ex: &mut Executor<'_>, id: Id) -> impl Future<Output = Result<Option<Self>>> + Send {
        async move {
            let entity = Self::construct(ex, Some(id)).await?;
            Ok(entity.is_persisted().then_some(entity))
        }
    }

    /// Reloads this entity from row `id`. Returns whether a row was found.
    fn load(&mut self, ex: &mut Executor<'_>, id: Id) -> impl Future<Output = Result<bool>> + Send {
        self.record_mut().load(ex, id)
    }

    fn save(&mut self, ex: &mut Executor<'_>) -> impl Future<Output = Result<bool>> + Send {
        self.record_mut().save(ex)
    }

    fn save_with_id(
        &mut self,
        ex: &mut Executor<'_>,
        id: Option<Id>,
    ) -> impl Future<Output = Result<bool>> + Send {
        self.record_mut().save_with_id(ex, id)
    }

    fn delete(&mut self, ex: &mut Executor<'_>) -> impl Future<Output = Result<bool>> + Send {
        self.record_mut().delete(ex)
    }

    fn flush_associations(
        &mut self,
        ex: &mut Executor<'_>,
    ) -> impl Future<Output = Result<usize>> + Send {
        self.record_mut().flush_associations(ex)
    }

    /// A search over this entity's table.
    fn search<'a, 'e>(ex: &'a mut Executor<'e>) -> Search<'a, 'e> {
        Search::for_entity::<Self>(ex)
    }

    fn id(&self) -> Option<Id> {
        self.record().id()
    }

    fn is_persisted(&self) -> bool {
        self.record().is_persisted()
    }
}
