//! `TemplateBinder` — walks a `CompiledTemplate`'s bind program against
//! runtime records and emits the positional parameter list. The SQL text
//! is never recomputed here.

use std::any::Any;

use crate::compile::{BindStep, CompiledTemplate};
use crate::error::{Result, TemplateError};
use crate::value::Value;

/// One emitted parameter. Indices are 1-based and contiguous, matching
/// placeholder order in the compiled SQL text.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionalParameter {
    pub index: usize,
    pub value: Value,
    pub converter: Option<&'static str>,
}

/// Replays a `CompiledTemplate`'s bind program against the runtime records
/// supplied for its record-backed slots, in dispatch order.
pub struct TemplateBinder;

impl TemplateBinder {
    /// `records` supplies one runtime value per distinct slot the compiled
    /// template's bind program references, indexed by slot number (the
    /// per-request runtime context). A `Param`/`Cacheable` literal step needs no
    /// entry.
    pub fn bind(
        compiled: &CompiledTemplate,
        records: &[&dyn Any],
    ) -> Result<Vec<PositionalParameter>> {
        let mut params = Vec::with_capacity(compiled.bind_program.len());
        let mut index = 1usize;

        for step in &compiled.bind_program {
            match step {
                BindStep::Literal { value, converter } => {
                    params.push(PositionalParameter {
                        index,
                        value: value.clone(),
                        converter: *converter,
                    });
                    index += 1;
                }
                BindStep::Record { slot, extractor } => {
                    let record = records.get(*slot).copied().ok_or_else(|| {
                        TemplateError::template(format!(
                            "bind program references slot {slot} but only {} record(s) were supplied",
                            records.len()
                        ))
                    })?;
                    let value = extractor(record)?;
                    params.push(PositionalParameter {
                        index,
                        value,
                        converter: None,
                    });
                    index += 1;
                }
            }
        }

        Ok(params)
    }

    /// Binds and returns the rendered SQL alongside the parameter list and
    /// any database-generated key names.
    pub fn bind_full<'a>(
        compiled: &'a CompiledTemplate,
        records: &[&dyn Any],
    ) -> Result<(&'a str, Vec<PositionalParameter>, &'a [crate::alias::Name])> {
        log::trace!("binding compiled template against {} record(s)", records.len());
        let params = Self::bind(compiled, records)?;
        log::debug!("bound {} parameter(s)", params.len());
        Ok((&compiled.sql, params, &compiled.generated_keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SegmentedLruCache;
    use crate::dialect::AnsiDialect;
    use crate::element::Element;
    use crate::schema::model::ModelBuilder;
    use crate::schema::{descriptor_of, ColumnDef, Generation, Record, StaticSchemaIntrospector};
    use crate::template::TemplateString;

    struct User {
        id: i64,
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
                "id" => Value::I64(self.id),
                "name" => Value::Str(self.name.clone()),
                _ => Value::Null,
            }
        }
    }

    #[test]
    fn param_ordering_is_contiguous_and_matches_emission() {
        let dialect = AnsiDialect;
        let introspector = StaticSchemaIntrospector;
        let model_builder = ModelBuilder::new();
        let mut ctx = crate::compile::CompileContext::new(&dialect, &introspector, &model_builder);

        let t = TemplateString::new()
            .literal("WHERE a = ")
            .element(Element::param(1i64))
            .literal(" AND b = ")
            .element(Element::param(2i64));

        let (compiled, _key) = crate::compile::TemplateCompiler::compile(&t, &mut ctx).unwrap();
        let params = TemplateBinder::bind(&compiled, &[]).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].index, 1);
        assert_eq!(params[1].index, 2);
        assert_eq!(params[0].value, Value::I64(1));
        assert_eq!(params[1].value, Value::I64(2));
    }

    #[test]
    fn bind_var_extracts_from_supplied_record() {
        let dialect = AnsiDialect;
        let introspector = StaticSchemaIntrospector;
        let model_builder = ModelBuilder::new();
        let mut ctx = crate::compile::CompileContext::new(&dialect, &introspector, &model_builder);
        let _descriptor = descriptor_of::<User>();

        let t = TemplateString::new()
            .literal("VALUES (")
            .element(Element::bind_var::<User>("name_slot", "name"))
            .literal(")");

        let (compiled, _key) = crate::compile::TemplateCompiler::compile(&t, &mut ctx).unwrap();
        let user = User {
            id: 1,
            name: "ada".into(),
        };
        let records: Vec<&dyn Any> = vec![&user];
        let params = TemplateBinder::bind(&compiled, &records).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].value, Value::Str("ada".into()));
    }

    #[test]
    fn cache_round_trip_returns_same_compiled_shape() {
        let cache: SegmentedLruCache<&str, i32> = SegmentedLruCache::new(8);
        cache.put("k", 7);
        assert_eq!(cache.get(&"k"), Some(7));
    }
}
