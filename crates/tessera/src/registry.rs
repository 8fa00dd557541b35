//! Process-wide registry of type mappings.

use crate::error::{OrmError, OrmResult};
use crate::mapping::{Mapping, MappingBuilder, Relation};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// All registered [`Mapping`]s, keyed by host type.
///
/// Registration happens once at startup; lookups afterwards are
/// read-mostly, so the map sits behind an `RwLock` and hands out
/// `Arc<Mapping>` clones.
#[derive(Default)]
pub struct MappingRegistry {
    mappings: RwLock<HashMap<TypeId, Arc<Mapping>>>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a finished mapping. Registration happens once at
    /// startup; registering the same type twice is an error.
    pub fn register(&self, mapping: Mapping) -> OrmResult<Arc<Mapping>> {
        let mapping = Arc::new(mapping);
        let mut mappings = self.mappings.write().expect("mapping registry poisoned");
        if mappings.contains_key(&mapping.type_id()) {
            return Err(OrmError::mapping(format!(
                "{} is already registered",
                mapping.type_name()
            )));
        }
        mappings.insert(mapping.type_id(), Arc::clone(&mapping));
        Ok(mapping)
    }

    /// Build and register a mapping in one step.
    pub fn register_with<T, F>(&self, table: &str, configure: F) -> OrmResult<Arc<Mapping>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(MappingBuilder<T>) -> MappingBuilder<T>,
    {
        let mapping = configure(MappingBuilder::<T>::new(table)).build()?;
        self.register(mapping)
    }

    /// Look up the mapping for `T`.
    pub fn get<T: 'static>(&self) -> OrmResult<Arc<Mapping>> {
        self.get_by_id(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    /// Look up a mapping by raw type id, e.g. a relation's foreign side.
    pub fn get_by_id(&self, id: TypeId, type_name: &str) -> OrmResult<Arc<Mapping>> {
        self.mappings
            .read()
            .expect("mapping registry poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| OrmError::mapping(format!("no mapping registered for {}", type_name)))
    }

    /// The mapping on the foreign side of a relation.
    pub fn foreign_mapping(&self, relation: &Relation) -> OrmResult<Arc<Mapping>> {
        self.get_by_id(relation.foreign, &relation.name)
    }

    /// Whether `T` has a mapping.
    pub fn contains<T: 'static>(&self) -> bool {
        self.mappings
            .read()
            .expect("mapping registry poisoned")
            .contains_key(&TypeId::of::<T>())
    }

    /// Snapshot of every registered mapping, in no particular order.
    pub fn all(&self) -> Vec<Arc<Mapping>> {
        self.mappings
            .read()
            .expect("mapping registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.mappings
            .read()
            .expect("mapping registry poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Tag {
        id: i64,
        label: String,
    }

    #[test]
    fn register_and_look_up() {
        let registry = MappingRegistry::new();
        assert!(!registry.contains::<Tag>());

        registry
            .register_with::<Tag, _>("tags", |b| {
                b.auto_id("id", "id", |t| t.id, |t, v| t.id = v)
                    .map("label", "label", |t| t.label.clone(), |t, v| t.label = v)
            })
            .unwrap();

        assert!(registry.contains::<Tag>());
        let mapping = registry.get::<Tag>().unwrap();
        assert_eq!(mapping.table_name, "tags");
    }

    #[test]
    fn missing_mapping_is_an_error() {
        let registry = MappingRegistry::new();
        let err = registry.get::<Tag>().unwrap_err();
        assert!(matches!(err, OrmError::Mapping(_)));
    }

    #[test]
    fn re_registration_is_an_error() {
        let registry = MappingRegistry::new();
        registry
            .register_with::<Tag, _>("tags", |b| {
                b.auto_id("id", "id", |t| t.id, |t, v| t.id = v)
            })
            .unwrap();
        let err = registry
            .register_with::<Tag, _>("labels", |b| {
                b.auto_id("id", "id", |t| t.id, |t, v| t.id = v)
            })
            .unwrap_err();
        assert!(matches!(err, OrmError::Mapping(_)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get::<Tag>().unwrap().table_name, "tags");
    }
}
