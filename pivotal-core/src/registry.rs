//! Process-wide cache of [`EntityType`] metadata, keyed by type.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use crate::entity::Entity;
use crate::metadata::EntityType;

static REGISTRY: OnceLock<RwLock<HashMap<TypeId, &'static EntityType>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<TypeId, &'static EntityType>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Metadata for `E`, built once on first request.
///
/// The build runs under the write lock, so racing first uses wait for the
/// single build instead of making their own. Declarations must not ask for
/// metadata themselves.
pub fn entity_type<E: Entity>() -> &'static EntityType {
    let key = TypeId::of::<E>();
    if let Some(ty) = registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        return *ty;
    }

    let mut map = registry().write().unwrap_or_else(PoisonError::into_inner);
    if let Some(ty) = map.get(&key) {
        return *ty;
    }
    let built = EntityType::build::<E>();
    tracing::debug!(entity = E::NAME, table = built.table(), "registered entity type");
    let leaked: &'static EntityType = Box::leak(Box::new(built));
    map.insert(key, leaked);
    leaked
}

/// Number of registered types.
pub fn len() -> usize {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .len()
}
