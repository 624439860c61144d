//! `Model` — the per-record-type column schema consulted by the INSERT and
//! UPDATE processors, lazily built and cached by record type for the
//! lifetime of the process.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::alias::Name;
use crate::schema::{ColumnDef, RecordDescriptor, SchemaIntrospector, TableNameResolver};

/// A built, immutable model for one record type.
#[derive(Debug, Clone)]
pub struct Model {
    pub type_id: TypeId,
    pub simple_name: &'static str,
    pub table: Name,
    pub columns: Vec<ColumnDef>,
}

impl Model {
    pub fn primary_key(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.primary_key)
    }
}

/// Builds and caches [`Model`]s by record type. Shared by all threads that
/// compile templates; entries are never evicted — the model cache, unlike
/// the template cache, lives for the process.
#[derive(Debug, Default)]
pub struct ModelBuilder {
    cache: Mutex<HashMap<TypeId, Arc<Model>>>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        ModelBuilder {
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn build(
        &self,
        descriptor: &dyn RecordDescriptor,
        introspector: &dyn SchemaIntrospector,
        table_resolver: Option<&dyn TableNameResolver>,
    ) -> Arc<Model> {
        let type_id = descriptor.type_id();
        if let Some(existing) = self.cache.lock().unwrap().get(&type_id) {
            return existing.clone();
        }

        let table = introspector.table_name(descriptor, table_resolver);
        let model = Arc::new(Model {
            type_id,
            simple_name: descriptor.simple_name(),
            table,
            columns: descriptor.columns().to_vec(),
        });

        let mut cache = self.cache.lock().unwrap();
        Arc::clone(cache.entry(type_id).or_insert(model))
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    /// Test/diagnostic hook — the live cache is otherwise unbounded and
    /// indefinite.
    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
    }
}
