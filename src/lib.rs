//! sql-template-engine: a typed SQL template compiler with a sharded LRU
//! cache.
//!
//! Ingests structured SQL templates — literal text fragments interleaved
//! with [`Element`]s (`SELECT`, `FROM`, `JOIN`, `WHERE`, `INSERT`, `UPDATE`,
//! `DELETE`, `SET`, `VALUES`, `PARAM`, `BINDVAR`, `SUBQUERY`, `UNSAFE`, and
//! `CACHEABLE`-wrapped expressions) parameterized over a record schema —
//! and produces a finalized SQL string plus an ordered list of positional
//! parameters ready for a driver to execute. Compilation (shape) and
//! binding (runtime values) are strictly separated so compiled shapes are
//! reusable across different parameter values; [`cache::SegmentedLruCache`]
//! amortizes that reuse across repeated calls with the same template shape.
//!
//! The driver/execution layer, the fluent query-builder API, dialect
//! grammar beyond the [`dialect::Dialect`] capability, and record-field
//! reflection beyond the [`schema::SchemaIntrospector`] boundary are
//! external collaborators, out of scope for this crate.

pub mod alias;
pub mod bind;
pub mod bindvars;
pub mod cache;
pub mod compile;
pub mod dialect;
pub mod element;
pub mod error;
pub mod join;
pub mod metrics;
pub mod schema;
pub mod table_use;
pub mod template;
pub mod value;

pub use bind::{PositionalParameter, TemplateBinder};
pub use bindvars::{BatchListener, BindVars, RecordListener};
pub use cache::SegmentedLruCache;
pub use compile::{CompileContext, CompiledTemplate, TemplateCompiler};
pub use dialect::{AnsiDialect, Dialect, SqlServerDialect};
pub use element::{Element, JoinType, SelectMode};
pub use error::{Result, TemplateError};
pub use metrics::{MetricsSnapshot, TemplateMetrics};
pub use schema::{
    ColumnDef, Data, ForeignKeyDef, Generation, Record, RecordDescriptor, Ref, SchemaIntrospector,
};
pub use template::TemplateString;
pub use value::Value;

use std::any::Any;
use std::sync::Arc;

use schema::model::ModelBuilder;
use schema::{ColumnNameResolver, ForeignKeyResolver, StaticSchemaIntrospector, TableNameResolver};

/// Default `SegmentedLruCache` capacity for a freshly constructed
/// [`TemplateEngine`] — large enough to hold a realistic application's
/// working set of distinct template shapes without configuration.
pub const DEFAULT_CACHE_SIZE: usize = 4096;

/// Ties the compiler, binder, segmented LRU cache, record-model cache, and
/// request metrics together into the single object a caller actually holds
/// — the ambient "front door" so callers don't wire the pipeline themselves
/// for every request.
pub struct TemplateEngine {
    dialect: Arc<dyn Dialect>,
    introspector: Arc<dyn SchemaIntrospector>,
    table_resolver: Option<Arc<dyn TableNameResolver>>,
    column_resolver: Option<Arc<dyn ColumnNameResolver>>,
    fk_resolver: Option<Arc<dyn ForeignKeyResolver>>,
    model_builder: ModelBuilder,
    cache: SegmentedLruCache<Vec<compile::KeyPart>, Arc<CompiledTemplate>>,
    metrics: TemplateMetrics,
}

impl TemplateEngine {
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self::with_cache_size(dialect, DEFAULT_CACHE_SIZE)
    }

    pub fn with_cache_size(dialect: Arc<dyn Dialect>, max_cache_size: usize) -> Self {
        TemplateEngine {
            dialect,
            introspector: Arc::new(StaticSchemaIntrospector),
            table_resolver: None,
            column_resolver: None,
            fk_resolver: None,
            model_builder: ModelBuilder::new(),
            cache: SegmentedLruCache::new(max_cache_size),
            metrics: TemplateMetrics::new(),
        }
    }

    pub fn with_resolvers(
        mut self,
        table_resolver: Option<Arc<dyn TableNameResolver>>,
        column_resolver: Option<Arc<dyn ColumnNameResolver>>,
        fk_resolver: Option<Arc<dyn ForeignKeyResolver>>,
    ) -> Self {
        self.table_resolver = table_resolver;
        self.column_resolver = column_resolver;
        self.fk_resolver = fk_resolver;
        self
    }

    pub fn metrics(&self) -> &TemplateMetrics {
        &self.metrics
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Resets the template cache, the model cache, and metrics — the
    /// reset/configure surface callers need for tests.
    pub fn reset(&self) {
        self.cache.clear();
        self.model_builder.clear();
        self.metrics.reset();
    }

    /// Compiles `template`, fronted by the segmented LRU cache: a
    /// cacheable shape already in the cache is returned without redoing
    /// schema reflection or text assembly; a non-cacheable shape (any
    /// element's key is `null`) always recompiles.
    pub fn compile(&self, template: &TemplateString) -> Result<Arc<CompiledTemplate>> {
        let mut timer = self.metrics.start();

        let mut ctx = CompileContext::new(
            self.dialect.as_ref(),
            self.introspector.as_ref(),
            &self.model_builder,
        )
        .with_resolvers(
            self.table_resolver.as_deref(),
            self.column_resolver.as_deref(),
            self.fk_resolver.as_deref(),
        );

        let (compiled, key) = TemplateCompiler::compile(template, &mut ctx)?;

        let result = match key {
            Some(key) => {
                let candidate = Arc::new(compiled);
                let stored = self.cache.get_or_compute(key, || Arc::clone(&candidate));
                let hit = !Arc::ptr_eq(&candidate, &stored);
                timer.mark_compiled(hit);
                stored
            }
            None => {
                timer.mark_compiled(false);
                Arc::new(compiled)
            }
        };

        timer.close();
        Ok(result)
    }

    /// Binds runtime records against a previously compiled template,
    /// producing the SQL text (unchanged from compile time), the ordered
    /// positional parameters, and any database-generated key names.
    pub fn bind<'a>(
        &self,
        compiled: &'a CompiledTemplate,
        records: &[&dyn Any],
    ) -> Result<(&'a str, Vec<PositionalParameter>, &'a [alias::Name])> {
        TemplateBinder::bind_full(compiled, records)
    }

    /// Builds a fresh [`BindVars`] batch-binding surface seeded from
    /// `compiled`'s registered record extractors.
    pub fn bind_vars(&self, compiled: &CompiledTemplate) -> BindVars {
        BindVars::from_compiled(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor_of;

    struct User {
        name: String,
    }

    impl Record for User {
        const TABLE: &'static str = "user";
        fn columns() -> &'static [ColumnDef] {
            static COLS: &[ColumnDef] = &[
                ColumnDef::primary_key("id", Generation::Identity),
                ColumnDef::column("name"),
            ];
            COLS
        }
        fn value_of(&self, column: &str) -> Value {
            match column {
                "name" => Value::Str(self.name.clone()),
                _ => Value::Null,
            }
        }
    }

    #[test]
    fn engine_caches_compiled_templates_across_calls() {
        let engine = TemplateEngine::new(Arc::new(AnsiDialect));
        let _ = descriptor_of::<User>();

        let build = || {
            TemplateString::new()
                .literal("SELECT ")
                .element(Element::column::<User>("name"))
                .literal(" ")
                .element(Element::from_table::<User>(Some("u"), false))
        };

        let first = engine.compile(&build()).unwrap();
        let second = engine.compile(&build()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.cache_len(), 1);

        let snap = engine.metrics().snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 1);
    }

    #[test]
    fn engine_binds_compiled_template_end_to_end() {
        let engine = TemplateEngine::new(Arc::new(AnsiDialect));

        let t = TemplateString::new()
            .literal("INSERT INTO ")
            .element(Element::insert::<User>(false))
            .literal(" ")
            .element(Element::values_from::<User>());

        let compiled = engine.compile(&t).unwrap();
        let user = User {
            name: "ada".into(),
        };
        let records: Vec<&dyn Any> = vec![&user];
        let (sql, params, generated) = engine.bind(&compiled, &records).unwrap();

        assert_eq!(sql, "INSERT INTO \"user\" (\"name\") VALUES (?)");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].value, Value::Str("ada".into()));
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].name, "id");
    }
}
