//! Per-type entity metadata: fields, relations, validators and read filters.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::entity::Entity;
use crate::error::Result;
use crate::executor::Executor;
use crate::naming;
use crate::value::{Id, Value};

/// A persisted scalar column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field {
    column: &'static str,
}

impl Field {
    pub const fn new(column: &'static str) -> Self {
        Self { column }
    }

    pub fn column(&self) -> &'static str {
        self.column
    }
}

impl From<&'static str> for Field {
    fn from(column: &'static str) -> Self {
        Self::new(column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Foreign key column on the owning table.
    OneToOne,
    /// Pivot table; child rows are deleted with the owner.
    OneToMany,
    /// Pivot table; child rows outlive the owner.
    ManyToMany,
}

impl RelationKind {
    /// Whether the relation is stored in a pivot table.
    pub fn uses_pivot(self) -> bool {
        !matches!(self, RelationKind::OneToOne)
    }
}

/// Builds a related entity by id, type-erased so relations can point at any entity type.
pub type Loader =
    for<'a, 'e> fn(&'a mut Executor<'e>, Id) -> BoxFuture<'a, Result<Box<dyn Any + Send + Sync>>>;

fn load_related<'a, 'e, U: Entity>(
    ex: &'a mut Executor<'e>,
    id: Id,
) -> BoxFuture<'a, Result<Box<dyn Any + Send + Sync>>> {
    Box::pin(async move {
        let entity = U::construct(ex, Some(id)).await?;
        Ok(Box::new(entity) as Box<dyn Any + Send + Sync>)
    })
}

/// A declared relation from an owner type to a target type.
#[derive(Clone)]
pub struct Relation {
    kind: RelationKind,
    target_name: &'static str,
    target: fn() -> &'static EntityType,
    loader: Loader,
    parent_column: Option<String>,
    child_column: Option<String>,
    name: Option<String>,
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("kind", &self.kind)
            .field("target", &self.target_name)
            .field("parent_column", &self.parent_column)
            .field("child_column", &self.child_column)
            .field("name", &self.name)
            .finish()
    }
}

impl Relation {
    fn of<U: Entity>(kind: RelationKind) -> Self {
        Self {
            kind,
            target_name: U::NAME,
            target: crate::registry::entity_type::<U>,
            loader: load_related::<U>,
            parent_column: None,
            child_column: None,
            name: None,
        }
    }

    /// The owner stores `U`'s id in a foreign-key column (see [`Relation::parent_column`]).
    pub fn one_to_one<U: Entity>() -> Self {
        Self::of::<U>(RelationKind::OneToOne)
    }

    pub fn one_to_many<U: Entity>() -> Self {
        Self::of::<U>(RelationKind::OneToMany)
    }

    pub fn many_to_many<U: Entity>() -> Self {
        Self::of::<U>(RelationKind::ManyToMany)
    }

    /// Pivot column holding the owner id, or the foreign-key column of a one-to-one.
    pub fn parent_column(mut self, column: impl Into<String>) -> Self {
        self.parent_column = Some(column.into());
        self
    }

    /// Pivot column holding the child id.
    pub fn child_column(mut self, column: impl Into<String>) -> Self {
        self.child_column = Some(column.into());
        self
    }

    /// Key under which the relation is stored in a record.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn target_name(&self) -> &'static str {
        self.target_name
    }

    /// Target metadata, resolved through the registry on first use.
    pub fn target(&self) -> &'static EntityType {
        (self.target)()
    }

    pub(crate) fn loader(&self) -> Loader {
        self.loader
    }

    /// Record key: the explicit name, else `tags` for pivot relations and `author` for one-to-one.
    pub fn key(&self) -> String {
        match (&self.name, self.kind) {
            (Some(name), _) => name.clone(),
            (None, RelationKind::OneToOne) => self.target_name.to_lowercase(),
            (None, _) => naming::table_for(self.target_name),
        }
    }

    /// Pivot column for the owner id, defaulting to `{owner}_id`.
    pub fn owner_column(&self, owner: &EntityType) -> String {
        self.parent_column
            .clone()
            .unwrap_or_else(|| naming::foreign_key(owner.name()))
    }

    /// Pivot column for the child id, defaulting to `{target}_id`.
    pub fn target_column(&self) -> String {
        self.child_column
            .clone()
            .unwrap_or_else(|| naming::foreign_key(self.target_name))
    }

    /// Owner-table column holding a one-to-one target id, defaulting to `{target}_id`.
    pub fn foreign_key_column(&self) -> String {
        self.parent_column
            .clone()
            .unwrap_or_else(|| naming::foreign_key(self.target_name))
    }

    /// `{ownerTable}_{targetTable}`.
    pub fn pivot_table(&self, owner: &EntityType) -> String {
        naming::pivot_table(owner.table(), self.target().table())
    }
}

/// Kind of a validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Accepts or rejects the candidate.
    Boolean,
    /// Rewrites the candidate.
    Sanitizer,
}

type Check = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
type Sanitize = Arc<dyn Fn(&mut Value) + Send + Sync>;
type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

#[derive(Clone)]
pub enum Rule {
    Check(Check),
    Sanitize(Sanitize),
}

impl Rule {
    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Check(_) => RuleKind::Boolean,
            Rule::Sanitize(_) => RuleKind::Sanitizer,
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rule::{:?}", self.kind())
    }
}

/// Field validators, kept in declaration order per field.
#[derive(Debug, Clone, Default)]
pub struct Validators {
    rules: BTreeMap<String, Vec<Rule>>,
}

impl Validators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a boolean check; every check of a field must accept a candidate.
    pub fn check<F>(mut self, field: &str, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.push(field, Rule::Check(Arc::new(check)));
        self
    }

    /// Adds a sanitizer; sanitizers rewrite the candidate in order.
    pub fn sanitize<F>(mut self, field: &str, sanitize: F) -> Self
    where
        F: Fn(&mut Value) + Send + Sync + 'static,
    {
        self.push(field, Rule::Sanitize(Arc::new(sanitize)));
        self
    }

    fn push(&mut self, field: &str, rule: Rule) {
        self.rules.entry(field.to_owned()).or_default().push(rule);
    }

    pub fn rules(&self, field: &str) -> &[Rule] {
        self.rules.get(field).map_or(&[], Vec::as_slice)
    }

    /// Runs the field's rules over a candidate. `None` means it was rejected.
    pub fn apply(&self, field: &str, mut candidate: Value) -> Option<Value> {
        for rule in self.rules(field) {
            match rule {
                Rule::Check(check) => {
                    if !check(&candidate) {
                        return None;
                    }
                }
                Rule::Sanitize(sanitize) => sanitize(&mut candidate),
            }
        }
        Some(candidate)
    }
}

/// Output transforms applied when a field is read.
#[derive(Clone, Default)]
pub struct Filters {
    transforms: BTreeMap<String, Vec<Transform>>,
}

impl fmt::Debug for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.transforms.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter<F>(mut self, field: &str, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transforms
            .entry(field.to_owned())
            .or_default()
            .push(Arc::new(transform));
        self
    }

    pub fn apply(&self, field: &str, value: Value) -> Value {
        self.transforms
            .get(field)
            .into_iter()
            .flatten()
            .fold(value, |acc, transform| transform(acc))
    }
}

/// Metadata of one entity type, built once and shared for the life of the process.
#[derive(Debug)]
pub struct EntityType {
    type_id: TypeId,
    name: &'static str,
    table: String,
    fields: Vec<Field>,
    relations: Vec<Relation>,
    validators: Validators,
    filters: Filters,
}

impl EntityType {
    /// Collects the declarations of `E`. Does not touch the registry.
    pub fn build<E: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: E::NAME,
            table: E::table().map_or_else(|| naming::table_for(E::NAME), str::to_owned),
            fields: E::fields(),
            relations: E::relations(),
            validators: E::validators(),
            filters: E::filters(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn is<E: Entity>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn has_field(&self, column: &str) -> bool {
        self.fields.iter().any(|f| f.column() == column)
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, key: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.key() == key)
    }

    pub fn validators(&self) -> &Validators {
        &self.validators
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }
}
