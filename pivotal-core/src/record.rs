use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use crate::association::LazyAssociation;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::metadata::{EntityType, RelationKind};
use crate::value::{FromValue, Id, Value};

const ID: &str = "id";

/// What a record holds under one column or one-to-one key.
pub enum Slot {
    Scalar(Value),
    /// A resolved one-to-one target, type-erased.
    One(Box<dyn Any + Send + Sync>),
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Slot::One(_) => f.write_str("One(..)"),
        }
    }
}

/// The state of one entity instance: its values, collections and persistence flags.
///
/// Entity types wrap a `Record<Self>`; the engine works on the record and the
/// wrapper exposes typed accessors over it. Collections are kept apart from
/// column values, so no collection key can shadow a column.
pub struct Record<E> {
    values: BTreeMap<String, Slot>,
    collections: BTreeMap<String, LazyAssociation>,
    persisted: bool,
    use_transactions: bool,
    _marker: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for Record<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("values", &self.values)
            .field("collections", &self.collections)
            .field("persisted", &self.persisted)
            .finish_non_exhaustive()
    }
}

impl<E: Entity> Default for Record<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Commits or rolls back a transaction around `result`, reporting failures.
async fn settle<T>(
    ex: &mut Executor<'_>,
    transactional: bool,
    result: Result<T>,
    context: String,
) -> Result<T> {
    match result {
        Ok(value) => {
            if transactional {
                if let Err(err) = ex.commit().await {
                    ex.rollback().await;
                    return Err(ex.failed(context, err));
                }
            }
            Ok(value)
        }
        Err(err) => {
            if transactional {
                ex.rollback().await;
            }
            Err(ex.failed(context, err))
        }
    }
}

impl<E: Entity> Record<E> {
    /// A virtual record with an empty collection for every pivot relation.
    pub fn new() -> Self {
        let mut record = Self {
            values: BTreeMap::new(),
            collections: BTreeMap::new(),
            persisted: false,
            use_transactions: true,
            _marker: PhantomData,
        };
        record.reset();
        record
    }

    fn reset(&mut self) {
        let ty = E::entity_type();
        self.values.clear();
        self.collections.clear();
        self.persisted = false;
        for relation in ty.relations().iter().filter(|r| r.kind().uses_pivot()) {
            self.collections
                .insert(relation.key(), LazyAssociation::for_relation(ty, relation));
        }
    }

    pub fn entity_type(&self) -> &'static EntityType {
        E::entity_type()
    }

    pub fn id(&self) -> Option<Id> {
        match self.values.get(ID) {
            Some(Slot::Scalar(v)) => v.as_i64().filter(|id| *id > 0),
            _ => None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Whether the last load found a row, or the record was saved since.
    pub fn loaded(&self) -> bool {
        self.persisted
    }

    pub fn set_use_transactions(&mut self, enabled: bool) {
        self.use_transactions = enabled;
    }

    pub fn uses_transactions(&self) -> bool {
        self.use_transactions
    }

    /// A scalar value passed through the field's read filters.
    pub fn get(&self, field: &str) -> Option<Value> {
        match self.values.get(field) {
            Some(Slot::Scalar(v)) => Some(E::entity_type().filters().apply(field, v.clone())),
            _ => None,
        }
    }

    pub fn get_as<T: FromValue>(&self, field: &str) -> Option<T> {
        self.get(field).and_then(|v| T::from_value(&v))
    }

    /// Stores a value for a declared field after it passes validation.
    ///
    /// Returns false, leaving the old value, for undeclared fields and
    /// rejected candidates.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> bool {
        let ty = E::entity_type();
        if !ty.has_field(field) || ty.relation(field).is_some() {
            tracing::debug!(entity = ty.name(), field, "refusing to set undeclared field");
            return false;
        }
        match ty.validators().apply(field, value.into()) {
            Some(accepted) => {
                self.values.insert(field.to_owned(), Slot::Scalar(accepted));
                true
            }
            None => false,
        }
    }

    pub fn association(&self, key: &str) -> Option<&LazyAssociation> {
        self.collections.get(key)
    }

    pub fn association_mut(&mut self, key: &str) -> Option<&mut LazyAssociation> {
        self.collections.get_mut(key)
    }

    /// The collection under `key`, or an empty untyped one when `key` is not
    /// a pivot relation.
    pub fn many(&self, key: &str) -> &LazyAssociation {
        static EMPTY: LazyAssociation = LazyAssociation::new();
        self.association(key).unwrap_or(&EMPTY)
    }

    /// The collection under `key`, created on first use.
    ///
    /// Keys that are not pivot relations get an untyped collection that is
    /// never flushed, saved or serialized; column values under the same key
    /// are left alone.
    pub fn many_mut(&mut self, key: &str) -> &mut LazyAssociation {
        let ty = E::entity_type();
        self.collections.entry(key.to_owned()).or_insert_with(|| {
            ty.relation(key)
                .filter(|r| r.kind().uses_pivot())
                .map_or_else(LazyAssociation::new, |r| LazyAssociation::for_relation(ty, r))
        })
    }

    /// The resolved one-to-one target stored under `key`.
    pub fn related<U: Entity>(&self, key: &str) -> Option<&U> {
        match self.values.get(key) {
            Some(Slot::One(entity)) => entity.downcast_ref::<U>(),
            _ => None,
        }
    }

    /// Attaches a one-to-one target and copies its id into the foreign-key
    /// field when that column is declared.
    pub fn set_related<U: Entity>(&mut self, key: &str, entity: U) -> bool {
        let ty = E::entity_type();
        let Some(relation) = ty
            .relation(key)
            .filter(|r| r.kind() == RelationKind::OneToOne && r.target().is::<U>())
        else {
            return false;
        };
        if let Some(id) = entity.id() {
            let column = relation.foreign_key_column();
            if ty.has_field(&column) {
                self.set(&column, id);
            }
        }
        self.values.insert(key.to_owned(), Slot::One(Box::new(entity)));
        true
    }

    /// Scalars (filtered) and collection ids as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, slot) in &self.values {
            if let (Slot::Scalar(_), Some(v)) = (slot, self.get(key)) {
                let json = serde_json::to_value(v).unwrap_or(serde_json::Value::Null);
                map.insert(key.clone(), json);
            }
        }
        for relation in E::entity_type().relations().iter().filter(|r| r.kind().uses_pivot()) {
            let key = relation.key();
            if let Some(c) = self.collections.get(&key) {
                map.insert(key, serde_json::Value::from(c.ids().to_vec()));
            }
        }
        serde_json::Value::Object(map)
    }

    fn scalar(&self, field: &str) -> Option<&Value> {
        match self.values.get(field) {
            Some(Slot::Scalar(v)) => Some(v),
            _ => None,
        }
    }

    /// Replaces the record's state with the row `id` and its relations.
    ///
    /// Returns false when no row matched; the record is then virtual and empty.
    /// A failed query leaves the record as it was.
    #[tracing::instrument(skip(self, ex), fields(entity = E::NAME))]
    pub async fn load(&mut self, ex: &mut Executor<'_>, id: Id) -> Result<bool> {
        if id <= 0 {
            self.reset();
            return Ok(false);
        }
        let ty = E::entity_type();
        let dialect = ex.dialect();
        let q = |ident: &str| dialect.quote_identifier(ident);

        let mut select = vec![format!("{}.{} AS {}", q("t"), q(ID), q(ID))];
        for field in ty.fields() {
            select.push(format!("{}.{} AS {}", q("t"), q(field.column()), q(field.column())));
        }
        let mut joins = String::new();
        for (n, relation) in ty.relations().iter().enumerate() {
            let alias = q(&format!("rel_{}", n));
            match relation.kind() {
                RelationKind::OneToOne => {
                    select.push(format!(
                        "{}.{} AS {}",
                        q("t"),
                        q(&relation.foreign_key_column()),
                        alias
                    ));
                }
                RelationKind::OneToMany | RelationKind::ManyToMany => {
                    let join = q(&format!("j{}", n));
                    select.push(format!("{}.{} AS {}", join, q(&relation.target_column()), alias));
                    joins.push_str(&format!(
                        " LEFT JOIN {} AS {} ON {}.{} = {}.{}",
                        q(&relation.pivot_table(ty)),
                        join,
                        join,
                        q(&relation.owner_column(ty)),
                        q("t"),
                        q(ID)
                    ));
                }
            }
        }
        let sql = format!(
            "SELECT {} FROM {} AS {}{} WHERE {}.{} = {}",
            select.join(", "),
            q(ty.table()),
            q("t"),
            joins,
            q("t"),
            q(ID),
            dialect.placeholder(1)
        );

        let context = format!("loading {} with id {}", E::NAME, id);
        let rows = match ex.fetch_all(&sql, &[Value::Int(id)]).await {
            Ok(rows) => rows,
            Err(err) => return Err(ex.failed(context, err)),
        };
        self.reset();
        let Some(first) = rows.first() else {
            return Ok(false);
        };

        self.values
            .insert(ID.to_owned(), Slot::Scalar(first.get(ID).cloned().unwrap_or(Value::Int(id))));
        for field in ty.fields() {
            let value = first.get(field.column()).cloned().unwrap_or_default();
            self.values.insert(field.column().to_owned(), Slot::Scalar(value));
        }

        let mut one_to_one = Vec::new();
        for (n, relation) in ty.relations().iter().enumerate() {
            let alias = format!("rel_{}", n);
            if !relation.kind().uses_pivot() {
                if let Some(fk) = first.id(&alias).filter(|fk| *fk > 0) {
                    one_to_one.push((relation, fk));
                }
                continue;
            }
            let Some(collection) = self.association_mut(&relation.key()) else {
                continue;
            };
            collection.disable_virtual_mode();
            collection.disable_resolve_on_access();
            for child in rows.iter().filter_map(|row| row.id(&alias)) {
                collection.append(child);
            }
            collection.enable_resolve_on_access();
            collection.enable_virtual_mode();
        }
        self.persisted = true;

        for (relation, fk) in one_to_one {
            let loaded = (relation.loader())(ex, fk).await?;
            self.values.insert(relation.key(), Slot::One(loaded));
        }
        tracing::debug!(entity = E::NAME, id, rows = rows.len(), "loaded entity");
        Ok(true)
    }

    pub async fn save(&mut self, ex: &mut Executor<'_>) -> Result<bool> {
        self.save_with_id(ex, None).await
    }

    /// Inserts a virtual record (with `id` when given) or updates a persisted one.
    ///
    /// Returns whether the record is persisted afterwards. Pending association
    /// ids are not written; see [`Record::flush_associations`].
    #[tracing::instrument(skip(self, ex), fields(entity = E::NAME, persisted = self.persisted))]
    pub async fn save_with_id(&mut self, ex: &mut Executor<'_>, id: Option<Id>) -> Result<bool> {
        if self.persisted {
            self.update(ex).await?;
        } else {
            self.insert(ex, id.filter(|id| *id > 0)).await?;
        }
        Ok(self.persisted)
    }

    async fn insert(&mut self, ex: &mut Executor<'_>, explicit: Option<Id>) -> Result<()> {
        let ty = E::entity_type();
        let dialect = ex.dialect();

        let mut columns = Vec::new();
        let mut params = Vec::new();
        if let Some(id) = explicit {
            columns.push(dialect.quote_identifier(ID));
            params.push(Value::Int(id));
        }
        for field in ty.fields() {
            if let Some(value) = self.scalar(field.column()).filter(|v| !v.is_empty()) {
                columns.push(dialect.quote_identifier(field.column()));
                params.push(value.clone());
            }
        }
        let sql = if columns.is_empty() {
            dialect.insert_default_values(ty.table())
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                dialect.quote_identifier(ty.table()),
                columns.join(", "),
                dialect.placeholders(1, params.len())
            )
        };

        let context = match explicit {
            Some(id) => format!("inserting {} with id {}", E::NAME, id),
            None => format!("inserting {}", E::NAME),
        };
        let transactional = self.use_transactions;
        if transactional {
            if let Err(err) = ex.begin().await {
                return Err(ex.failed(context, err));
            }
        }
        let result = ex.insert(&sql, &params).await;
        let generated = settle(ex, transactional, result, context).await?;

        if let Some(id) = generated.or(explicit) {
            self.values.insert(ID.to_owned(), Slot::Scalar(Value::Int(id)));
            self.persisted = true;
            tracing::debug!(entity = E::NAME, id, "inserted entity");
        }
        Ok(())
    }

    async fn update(&mut self, ex: &mut Executor<'_>) -> Result<()> {
        let ty = E::entity_type();
        let id = self.id().ok_or_else(|| {
            Error::Association(format!("{} is marked persisted but has no id", E::NAME))
        })?;
        if ty.fields().is_empty() {
            return Ok(());
        }
        let dialect = ex.dialect();

        let mut assignments = Vec::with_capacity(ty.fields().len());
        let mut params = Vec::with_capacity(ty.fields().len() + 1);
        for (i, field) in ty.fields().iter().enumerate() {
            assignments.push(format!(
                "{} = {}",
                dialect.quote_identifier(field.column()),
                dialect.placeholder(i + 1)
            ));
            params.push(self.scalar(field.column()).cloned().unwrap_or_default());
        }
        params.push(Value::Int(id));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            dialect.quote_identifier(ty.table()),
            assignments.join(", "),
            dialect.quote_identifier(ID),
            dialect.placeholder(params.len())
        );

        let context = format!("updating {} with id {}", E::NAME, id);
        let transactional = self.use_transactions;
        if transactional {
            if let Err(err) = ex.begin().await {
                return Err(ex.failed(context, err));
            }
        }
        let result = ex.execute(&sql, &params).await;
        settle(ex, transactional, result, context).await?;
        Ok(())
    }

    /// Deletes the row, and unless cascades are left to the database, the
    /// owner's pivot rows and the child rows of one-to-many relations.
    ///
    /// Returns false for virtual records. Afterwards the record is virtual
    /// and has no id.
    #[tracing::instrument(skip(self, ex), fields(entity = E::NAME, id = ?self.id()))]
    pub async fn delete(&mut self, ex: &mut Executor<'_>) -> Result<bool> {
        let Some(id) = self.id().filter(|_| self.persisted) else {
            return Ok(false);
        };
        let context = format!("deleting {} with id {}", E::NAME, id);
        let transactional = self.use_transactions;
        if transactional {
            if let Err(err) = ex.begin().await {
                return Err(ex.failed(context, err));
            }
        }
        let result = self.delete_rows(ex, id).await;
        settle(ex, transactional, result, context).await?;

        self.values.remove(ID);
        self.persisted = false;
        tracing::debug!(entity = E::NAME, id, "deleted entity");
        Ok(true)
    }

    async fn delete_rows(&self, ex: &mut Executor<'_>, id: Id) -> Result<()> {
        let ty = E::entity_type();
        let dialect = ex.dialect();

        if !ex.settings().cascade_in_database {
            for relation in ty.relations().iter().filter(|r| r.kind().uses_pivot()) {
                let children: Vec<Value> = self
                    .association(&relation.key())
                    .map(|c| c.iter().map(Value::Int).collect())
                    .unwrap_or_default();

                let sql = format!(
                    "DELETE FROM {} WHERE {} = {}",
                    dialect.quote_identifier(&relation.pivot_table(ty)),
                    dialect.quote_identifier(&relation.owner_column(ty)),
                    dialect.placeholder(1)
                );
                ex.execute(&sql, &[Value::Int(id)]).await?;

                if relation.kind() == RelationKind::OneToMany && !children.is_empty() {
                    let sql = format!(
                        "DELETE FROM {} WHERE {} IN ({})",
                        dialect.quote_identifier(relation.target().table()),
                        dialect.quote_identifier(ID),
                        dialect.placeholders(1, children.len())
                    );
                    ex.execute(&sql, &children).await?;
                }
            }
        }

        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            dialect.quote_identifier(ty.table()),
            dialect.quote_identifier(ID),
            dialect.placeholder(1)
        );
        ex.execute(&sql, &[Value::Int(id)]).await?;
        Ok(())
    }

    /// Flushes every collection's pending ids to its pivot table.
    ///
    /// The record must be persisted. Stops at the first failing collection.
    pub async fn flush_associations(&mut self, ex: &mut Executor<'_>) -> Result<usize> {
        let Some(owner_id) = self.id().filter(|_| self.persisted) else {
            let err = Error::Association(format!(
                "{} must be saved before its associations can be flushed",
                E::NAME
            ));
            ex.report("flushing associations", &err);
            return Err(err);
        };
        let ty = E::entity_type();
        let mut written = 0;
        for relation in ty.relations().iter().filter(|r| r.kind().uses_pivot()) {
            if let Some(collection) = self.collections.get_mut(&relation.key()) {
                written += collection.flush(ex, owner_id).await?;
            }
        }
        Ok(written)
    }
}
