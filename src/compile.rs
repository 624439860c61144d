//! `TemplateCompiler` — walks a `TemplateString`'s expanded fragments,
//! renders SQL text, derives a compilation key describing the query's
//! reusable *shape*, and builds the bind program the binder later replays.

use std::any::TypeId;
use std::sync::Arc;

use crate::alias::{AliasMapper, Name, Scope};
use crate::dialect::Dialect;
use crate::element::{
    CacheableExpr, Element, JoinType, Metamodel, ObjectValue, SelectMode, Source, Target,
};
use crate::error::{Result, TemplateError};
use crate::join::JoinDeriver;
use crate::schema::model::ModelBuilder;
use crate::schema::{
    ColumnDef, ColumnNameResolver, Extractor, ForeignKeyResolver, Generation, RecordDescriptor,
    SchemaIntrospector, TableNameResolver,
};
use crate::table_use::TableUse;
use crate::template::{Fragment, TemplateString};
use crate::value::Value;

/// Collections bound through `Cacheable` above this size taint the template
/// as non-cacheable — an unbounded `IN (...)` list would otherwise mint a
/// fresh compiled shape (and cache entry) per distinct size forever.
pub const MAX_CACHEABLE_COLLECTION_ARITY: usize = 2;

/// One literal span or element shape in a template's compilation key, in
/// fragment order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Literal(String),
    Element(ElementKey),
}

/// The key of a (possibly nested) template: `None` once any element inside
/// it is non-cacheable — that taint is infectious outward through `From`,
/// `Join`, `Subquery`, `Set`, `Values`, and `Cacheable(Template)`.
pub type SubKey = Option<Vec<KeyPart>>;

/// The reusable shape contributed by one element, independent of the
/// runtime values it carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementKey {
    Alias {
        type_id: TypeId,
        scope: Scope,
    },
    Column {
        type_id: TypeId,
        column: &'static str,
        alias: Option<String>,
    },
    Table {
        type_id: TypeId,
        alias: Option<String>,
    },
    FromTable {
        type_id: TypeId,
        alias: Option<String>,
        auto_join: bool,
    },
    FromTemplate {
        inner: SubKey,
        alias: Option<String>,
        auto_join: bool,
    },
    Join {
        source_type: TypeId,
        source_alias: Option<String>,
        target_type: TypeId,
        target_alias: Option<String>,
        join_type: JoinType,
        auto_join: bool,
    },
    JoinTemplate {
        source: SubKey,
        target: SubKey,
        join_type: JoinType,
        auto_join: bool,
    },
    Select {
        type_id: TypeId,
        mode: SelectMode,
    },
    Insert {
        type_id: TypeId,
        ignore_auto_generate: bool,
    },
    Update {
        type_id: TypeId,
        alias: Option<String>,
    },
    Delete {
        type_id: TypeId,
        alias: Option<String>,
    },
    Where {
        inner: SubKey,
    },
    SetColumns {
        type_id: TypeId,
        columns: Vec<&'static str>,
    },
    SetTemplate {
        inner: SubKey,
    },
    ValuesColumns {
        type_id: TypeId,
        columns: Vec<&'static str>,
    },
    ValuesTemplate {
        inner: SubKey,
    },
    Param {
        type_tag: &'static str,
        converter: Option<&'static str>,
    },
    BindVar {
        variable: &'static str,
        type_id: TypeId,
        column: &'static str,
    },
    Subquery {
        inner: SubKey,
        correlate: bool,
    },
    Unsafe {
        sql: String,
    },
    CacheableTemplate {
        inner: SubKey,
    },
    CacheableObject {
        metamodel: Option<(TypeId, String, bool)>,
        operator: &'static str,
        shape: ObjectShape,
    },
}

/// Type tag sentinel for an empty collection, where there is no first
/// element to derive a `typeShape` from.
const ANY_TYPE_SHAPE: &str = "Any";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectShape {
    Single(&'static str),
    Collection { size: usize, element_shape: &'static str },
}

/// A step of the bind program: either a value already known at compile
/// time, or an extractor that must be run against a runtime record when
/// binding.
#[derive(Clone)]
pub enum BindStep {
    Literal {
        value: Value,
        converter: Option<&'static str>,
    },
    Record {
        slot: usize,
        extractor: Extractor,
    },
}

impl std::fmt::Debug for BindStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindStep::Literal { value, .. } => {
                f.debug_struct("Literal").field("value", value).finish()
            }
            BindStep::Record { slot, .. } => f.debug_struct("Record").field("slot", slot).finish(),
        }
    }
}

/// The output of a compile pass: rendered SQL, the bind program needed to
/// produce positional parameters later, and any columns the database
/// generated (omitted from the INSERT column list).
#[derive(Clone)]
pub struct CompiledTemplate {
    pub sql: String,
    pub bind_program: Vec<BindStep>,
    pub generated_keys: Vec<Name>,
    pub slot_count: usize,
    pub cacheable: bool,
}

impl std::fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("sql", &self.sql)
            .field("bind_steps", &self.bind_program.len())
            .field("slot_count", &self.slot_count)
            .field("cacheable", &self.cacheable)
            .finish()
    }
}

impl CompiledTemplate {
    /// Extractors registered for record-backed slots, in bind-program
    /// order. Used to seed a `BindVarsImpl` for batch binding against the
    /// same compiled shape.
    pub fn record_extractors(&self) -> Vec<(usize, Extractor)> {
        self.bind_program
            .iter()
            .filter_map(|step| match step {
                BindStep::Record { slot, extractor } => Some((*slot, extractor.clone())),
                _ => None,
            })
            .collect()
    }
}

/// The environment a single compile pass runs against: the schema
/// reflection capability, naming policy overrides, and the per-compilation
/// state (`AliasMapper`, `TableUse`) that is discarded once compilation
/// finishes.
pub struct CompileContext<'a> {
    pub dialect: &'a dyn Dialect,
    pub introspector: &'a dyn SchemaIntrospector,
    pub model_builder: &'a ModelBuilder,
    pub table_resolver: Option<&'a dyn TableNameResolver>,
    pub column_resolver: Option<&'a dyn ColumnNameResolver>,
    pub fk_resolver: Option<&'a dyn ForeignKeyResolver>,
    alias_mapper: AliasMapper,
    table_use: TableUse,
    generated_keys: Vec<Name>,
    bind_program: Vec<BindStep>,
    next_slot: usize,
    where_emitted: bool,
}

impl<'a> CompileContext<'a> {
    pub fn new(
        dialect: &'a dyn Dialect,
        introspector: &'a dyn SchemaIntrospector,
        model_builder: &'a ModelBuilder,
    ) -> Self {
        CompileContext {
            dialect,
            introspector,
            model_builder,
            table_resolver: None,
            column_resolver: None,
            fk_resolver: None,
            alias_mapper: AliasMapper::new(),
            table_use: TableUse::new(),
            generated_keys: Vec::new(),
            bind_program: Vec::new(),
            next_slot: 0,
            where_emitted: false,
        }
    }

    fn next_slot(&mut self) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    /// Runs `f` with `where_emitted` reset, restoring the prior value
    /// afterward. Entering a nested query level (a derived table, a
    /// subquery, a join's ON predicate) must not let that level's `WHERE`
    /// bookkeeping leak into the enclosing statement's, and vice versa.
    fn in_nested_scope<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = self.where_emitted;
        self.where_emitted = false;
        let result = f(self);
        self.where_emitted = saved;
        result
    }

    /// Builder-style resolver override, used by [`crate::TemplateEngine`] to
    /// thread its configured policy functions through without exposing the
    /// private per-compilation fields.
    pub fn with_resolvers(
        mut self,
        table_resolver: Option<&'a dyn TableNameResolver>,
        column_resolver: Option<&'a dyn ColumnNameResolver>,
        fk_resolver: Option<&'a dyn ForeignKeyResolver>,
    ) -> Self {
        self.table_resolver = table_resolver;
        self.column_resolver = column_resolver;
        self.fk_resolver = fk_resolver;
        self
    }
}

/// Compiles a `TemplateString` into a `CompiledTemplate`, caching nothing
/// itself — callers typically front this with a `SegmentedLruCache` keyed
/// on the returned key (see `crate::cache`).
pub struct TemplateCompiler;

impl TemplateCompiler {
    pub fn compile(template: &TemplateString, ctx: &mut CompileContext) -> Result<(CompiledTemplate, SubKey)> {
        log::trace!("compiling template with {} fragments", template.fragments().len());
        let fragments = template.expand();
        // Join pruning and column resolution are order-independent over the
        // whole template — the join text is emitted iff *some* element
        // references the source table's alias, not only elements textually
        // preceding it. Register every declared alias
        // first, then mark every column reference, so the emission pass
        // below sees complete alias/table-use state regardless of whether a
        // `Column` or `Join` happens to come first in the fragment list.
        collect_aliases(&fragments, Scope::Inner, ctx);
        collect_table_use(&fragments, Scope::Inner, ctx)?;

        let (sql, key, binds) = compile_fragments(&fragments, Scope::Inner, ctx)?;
        let compiled = CompiledTemplate {
            sql,
            bind_program: binds,
            generated_keys: std::mem::take(&mut ctx.generated_keys),
            slot_count: ctx.next_slot,
            cacheable: key.is_some(),
        };
        log::debug!(
            "compiled template: {} bytes, cacheable={}",
            compiled.sql.len(),
            compiled.cacheable
        );
        Ok((compiled, key))
    }
}

/// First prepass half: registers the alias every table-bearing element
/// declares, in template order, before any SQL is emitted.
fn collect_aliases(fragments: &[Fragment], scope: Scope, ctx: &mut CompileContext) {
    for fragment in fragments {
        if let Fragment::El(element) = fragment {
            collect_aliases_element(element, scope, ctx);
        }
    }
}

fn collect_aliases_element(element: &Element, scope: Scope, ctx: &mut CompileContext) {
    match element {
        Element::Alias { table, scope: alias_scope } => {
            ctx.alias_mapper.get_alias(table.as_ref(), None, *alias_scope);
        }
        Element::Table { descriptor, alias } => {
            ctx.alias_mapper.get_alias(descriptor.as_ref(), alias.as_deref(), scope);
        }
        Element::From { source, alias, .. } => match source {
            Source::Table(descriptor) => {
                ctx.alias_mapper.get_alias(descriptor.as_ref(), alias.as_deref(), scope);
            }
            Source::Template(template) => collect_aliases(&template.expand(), Scope::Outer, ctx),
        },
        Element::Join { source, source_alias, target, target_alias, .. } => {
            match source {
                Source::Table(descriptor) => {
                    ctx.alias_mapper.get_alias(descriptor.as_ref(), source_alias.as_deref(), scope);
                }
                Source::Template(template) => collect_aliases(&template.expand(), Scope::Outer, ctx),
            }
            match target {
                Target::Table(descriptor) => {
                    ctx.alias_mapper.get_alias(descriptor.as_ref(), target_alias.as_deref(), scope);
                }
                Target::Template(template) => collect_aliases(&template.expand(), Scope::Outer, ctx),
            }
        }
        Element::Update { descriptor, alias } | Element::Delete { descriptor, alias } => {
            ctx.alias_mapper.get_alias(descriptor.as_ref(), alias.as_deref(), scope);
        }
        Element::Where { predicate } => collect_aliases(&predicate.expand(), scope, ctx),
        Element::Set { template, .. } | Element::Values { template, .. } => {
            if let Some(template) = template {
                collect_aliases(&template.expand(), scope, ctx);
            }
        }
        Element::Subquery { template, .. } => collect_aliases(&template.expand(), Scope::Outer, ctx),
        Element::Cacheable { expression: CacheableExpr::Template(template) } => {
            collect_aliases(&template.expand(), scope, ctx)
        }
        _ => {}
    }
}

/// Second prepass half: marks every `Column` reference against the alias
/// state `collect_aliases` just finished registering, so auto-join pruning
/// (evaluated during the emission pass) sees usage from anywhere in the
/// template, not only text preceding the join.
fn collect_table_use(fragments: &[Fragment], scope: Scope, ctx: &mut CompileContext) -> Result<()> {
    for fragment in fragments {
        if let Fragment::El(element) = fragment {
            collect_table_use_element(element, scope, ctx)?;
        }
    }
    Ok(())
}

fn collect_table_use_element(element: &Element, scope: Scope, ctx: &mut CompileContext) -> Result<()> {
    match element {
        Element::Column { descriptor, .. } => {
            let alias = ctx.alias_mapper.resolve(descriptor.as_ref(), scope)?.to_string();
            ctx.table_use.mark(descriptor.type_id(), alias);
        }
        Element::From { source: Source::Template(template), .. } => {
            collect_table_use(&template.expand(), Scope::Outer, ctx)?;
        }
        Element::Join { source, target, .. } => {
            if let Source::Template(template) = source {
                collect_table_use(&template.expand(), Scope::Outer, ctx)?;
            }
            if let Target::Template(template) = target {
                collect_table_use(&template.expand(), Scope::Outer, ctx)?;
            }
        }
        Element::Where { predicate } => collect_table_use(&predicate.expand(), scope, ctx)?,
        Element::Set { template, .. } | Element::Values { template, .. } => {
            if let Some(template) = template {
                collect_table_use(&template.expand(), scope, ctx)?;
            }
        }
        Element::Subquery { template, .. } => collect_table_use(&template.expand(), Scope::Outer, ctx)?,
        Element::Cacheable { expression: CacheableExpr::Template(template) } => {
            collect_table_use(&template.expand(), scope, ctx)?;
        }
        _ => {}
    }
    Ok(())
}

fn compile_fragments(
    fragments: &[Fragment],
    scope: Scope,
    ctx: &mut CompileContext,
) -> Result<(String, SubKey, Vec<BindStep>)> {
    let mut sql = String::new();
    let mut parts: Vec<KeyPart> = Vec::new();
    let mut binds: Vec<BindStep> = Vec::new();
    let mut cacheable = true;

    for fragment in fragments {
        match fragment {
            Fragment::Literal(text) => {
                sql.push_str(text);
                parts.push(KeyPart::Literal(text.clone()));
            }
            Fragment::El(element) => {
                let (text, key, mut element_binds) = dispatch_element(element, scope, ctx)?;
                sql.push_str(&text);
                binds.append(&mut element_binds);
                match key {
                    Some(k) => parts.push(KeyPart::Element(k)),
                    None => cacheable = false,
                }
            }
        }
    }

    let key = if cacheable { Some(parts) } else { None };
    Ok((sql, key, binds))
}

fn qualify_table(
    ctx: &CompileContext,
    descriptor: &dyn RecordDescriptor,
) -> Name {
    ctx.introspector.table_name(descriptor, ctx.table_resolver)
}

/// Renders a `Metamodel`'s root + path as the table alias or qualified
/// column it names, resolving the alias already registered for its root
/// type in this scope.
fn render_metamodel(metamodel: &Metamodel, scope: Scope, ctx: &CompileContext) -> Result<String> {
    let alias = ctx.alias_mapper.resolve(metamodel.root.as_ref(), scope)?;
    let safe_alias = ctx.dialect.get_safe_identifier(alias);
    if metamodel.is_table {
        Ok(safe_alias)
    } else {
        let col_def = find_column(metamodel.root.as_ref(), &metamodel.path)?;
        let col_name = ctx
            .introspector
            .column_name(metamodel.root.as_ref(), &col_def, ctx.column_resolver);
        Ok(format!("{safe_alias}.{}", col_name.qualify(ctx.dialect)))
    }
}

#[allow(clippy::too_many_lines)]
fn dispatch_element(
    element: &Element,
    scope: Scope,
    ctx: &mut CompileContext,
) -> Result<(String, Option<ElementKey>, Vec<BindStep>)> {
    match element {
        Element::Alias { table, scope: alias_scope } => {
            ctx.alias_mapper.get_alias(table.as_ref(), None, *alias_scope);
            Ok((
                String::new(),
                Some(ElementKey::Alias {
                    type_id: table.type_id(),
                    scope: *alias_scope,
                }),
                Vec::new(),
            ))
        }

        Element::Column { descriptor, column, alias } => {
            let table_alias = ctx.alias_mapper.resolve(descriptor.as_ref(), scope)?.to_string();
            ctx.table_use.mark(descriptor.type_id(), table_alias.clone());
            let col_def = find_column(descriptor.as_ref(), column)?;
            let col_name = ctx
                .introspector
                .column_name(descriptor.as_ref(), &col_def, ctx.column_resolver);
            let safe_alias = ctx.dialect.get_safe_identifier(&table_alias);
            let mut text = format!("{safe_alias}.{}", col_name.qualify(ctx.dialect));
            if let Some(output_alias) = alias {
                text.push_str(" AS ");
                text.push_str(output_alias);
            }
            Ok((
                text,
                Some(ElementKey::Column {
                    type_id: descriptor.type_id(),
                    column: *column,
                    alias: alias.clone(),
                }),
                Vec::new(),
            ))
        }

        Element::Table { descriptor, alias } => {
            let resolved = ctx
                .alias_mapper
                .get_alias(descriptor.as_ref(), alias.as_deref(), scope);
            let safe_alias = ctx.dialect.get_safe_identifier(&resolved);
            let table = qualify_table(ctx, descriptor.as_ref());
            let text = format!("{} {safe_alias}", table.qualify(ctx.dialect));
            Ok((
                text,
                Some(ElementKey::Table {
                    type_id: descriptor.type_id(),
                    alias: alias.clone(),
                }),
                Vec::new(),
            ))
        }

        Element::From { source, alias, auto_join } => match source {
            Source::Table(descriptor) => {
                let resolved = ctx
                    .alias_mapper
                    .get_alias(descriptor.as_ref(), alias.as_deref(), scope);
                let safe_alias = ctx.dialect.get_safe_identifier(&resolved);
                let table = qualify_table(ctx, descriptor.as_ref());
                let text = format!("FROM {} {safe_alias}", table.qualify(ctx.dialect));
                Ok((
                    text,
                    Some(ElementKey::FromTable {
                        type_id: descriptor.type_id(),
                        alias: alias.clone(),
                        auto_join: *auto_join,
                    }),
                    Vec::new(),
                ))
            }
            Source::Template(inner) => {
                let (inner_sql, inner_key, binds) = ctx
                    .in_nested_scope(|ctx| compile_fragments(&inner.expand(), Scope::Outer, ctx))?;
                let resolved_alias = alias.clone().unwrap_or_default();
                let text = format!("FROM ({inner_sql}) {resolved_alias}");
                Ok((
                    text,
                    Some(ElementKey::FromTemplate {
                        inner: inner_key,
                        alias: alias.clone(),
                        auto_join: *auto_join,
                    }),
                    binds,
                ))
            }
        },

        Element::Join {
            source,
            source_alias,
            target,
            target_alias,
            join_type,
            auto_join,
        } => compile_join(source, source_alias, target, target_alias, *join_type, *auto_join, scope, ctx),

        Element::Select { descriptor, mode } => {
            let text = match mode {
                SelectMode::All => "SELECT".to_string(),
                SelectMode::Distinct => "SELECT DISTINCT".to_string(),
            };
            Ok((
                text,
                Some(ElementKey::Select {
                    type_id: descriptor.type_id(),
                    mode: *mode,
                }),
                Vec::new(),
            ))
        }

        Element::Insert { descriptor, ignore_auto_generate } => {
            let model = ctx
                .model_builder
                .build(descriptor.as_ref(), ctx.introspector, ctx.table_resolver);
            let (included, generated) = included_columns(&model.columns, *ignore_auto_generate);
            for col in &generated {
                ctx.generated_keys.push(ctx.introspector.column_name(
                    descriptor.as_ref(),
                    col,
                    ctx.column_resolver,
                ));
            }
            let col_list = included
                .iter()
                .map(|c| {
                    ctx.introspector
                        .column_name(descriptor.as_ref(), c, ctx.column_resolver)
                        .qualify(ctx.dialect)
                })
                .collect::<Vec<_>>()
                .join(", ");
            let text = format!("{} ({col_list})", model.table.qualify(ctx.dialect));
            Ok((
                text,
                Some(ElementKey::Insert {
                    type_id: descriptor.type_id(),
                    ignore_auto_generate: *ignore_auto_generate,
                }),
                Vec::new(),
            ))
        }

        Element::Update { descriptor, alias } => {
            let resolved = ctx
                .alias_mapper
                .get_alias(descriptor.as_ref(), alias.as_deref(), scope);
            let safe_alias = ctx.dialect.get_safe_identifier(&resolved);
            let table = qualify_table(ctx, descriptor.as_ref());
            let text = format!("UPDATE {} {safe_alias}", table.qualify(ctx.dialect));
            Ok((
                text,
                Some(ElementKey::Update {
                    type_id: descriptor.type_id(),
                    alias: alias.clone(),
                }),
                Vec::new(),
            ))
        }

        Element::Delete { descriptor, alias } => {
            let resolved = ctx
                .alias_mapper
                .get_alias(descriptor.as_ref(), alias.as_deref(), scope);
            let safe_alias = ctx.dialect.get_safe_identifier(&resolved);
            let table = qualify_table(ctx, descriptor.as_ref());
            let text = format!("DELETE FROM {} {safe_alias}", table.qualify(ctx.dialect));
            Ok((
                text,
                Some(ElementKey::Delete {
                    type_id: descriptor.type_id(),
                    alias: alias.clone(),
                }),
                Vec::new(),
            ))
        }

        Element::Set { descriptor, template } => compile_set(descriptor, template, scope, ctx),

        Element::Where { predicate } => {
            let (inner_sql, inner_key, binds) =
                compile_fragments(&predicate.expand(), scope, ctx)?;
            let prefix = if ctx.where_emitted { " AND " } else { "WHERE " };
            ctx.where_emitted = true;
            let text = format!("{prefix}({inner_sql})");
            Ok((text, Some(ElementKey::Where { inner: inner_key }), binds))
        }

        Element::Values { descriptor, template } => compile_values(descriptor, template, scope, ctx),

        Element::Param { name: _, value, converter } => {
            let key = ElementKey::Param {
                type_tag: value.type_tag(),
                converter: *converter,
            };
            Ok((
                "?".to_string(),
                Some(key),
                vec![BindStep::Literal {
                    value: value.clone(),
                    converter: *converter,
                }],
            ))
        }

        Element::BindVar { variable, descriptor, column } => {
            let slot = ctx.next_slot();
            let extractor = descriptor.extractor(column);
            let key = ElementKey::BindVar {
                variable: *variable,
                type_id: descriptor.type_id(),
                column: *column,
            };
            Ok((
                "?".to_string(),
                Some(key),
                vec![BindStep::Record { slot, extractor }],
            ))
        }

        Element::Subquery { template, correlate } => {
            let (inner_sql, inner_key, binds) = ctx
                .in_nested_scope(|ctx| compile_fragments(&template.expand(), Scope::Outer, ctx))?;
            let text = format!("({inner_sql})");
            Ok((
                text,
                Some(ElementKey::Subquery {
                    inner: inner_key,
                    correlate: *correlate,
                }),
                binds,
            ))
        }

        Element::Unsafe { sql } => Ok((
            sql.clone(),
            Some(ElementKey::Unsafe { sql: sql.clone() }),
            Vec::new(),
        )),

        Element::Cacheable { expression } => compile_cacheable(expression, scope, ctx),

        Element::Wrapped { .. } => {
            unreachable!("Wrapped must be flattened by TemplateString::expand before dispatch")
        }
    }
}

fn find_column(descriptor: &dyn RecordDescriptor, name: &str) -> Result<ColumnDef> {
    descriptor
        .columns()
        .iter()
        .find(|c| c.name == name)
        .cloned()
        .ok_or_else(|| {
            TemplateError::template(format!(
                "`{}` has no column `{name}`",
                descriptor.simple_name()
            ))
        })
}

/// Filters a record's declared columns down to those that belong in an
/// INSERT column/VALUES list, and separately collects the ones the
/// database generates (identity columns), which are omitted and reported
/// back via `generatedKeys`.
fn included_columns(columns: &[ColumnDef], ignore_auto_generate: bool) -> (Vec<ColumnDef>, Vec<ColumnDef>) {
    let mut included = Vec::new();
    let mut generated = Vec::new();
    for c in columns {
        if !c.insertable {
            continue;
        }
        if c.primary_key && !ignore_auto_generate {
            match c.generation {
                Generation::Identity => {
                    generated.push(c.clone());
                    continue;
                }
                Generation::Sequence(None) => continue,
                Generation::Sequence(Some(_)) => {
                    included.push(c.clone());
                    continue;
                }
                Generation::None => {}
            }
        }
        included.push(c.clone());
    }
    (included, generated)
}

fn compile_set(
    descriptor: &Option<Arc<dyn RecordDescriptor>>,
    template: &Option<Arc<TemplateString>>,
    scope: Scope,
    ctx: &mut CompileContext,
) -> Result<(String, Option<ElementKey>, Vec<BindStep>)> {
    if let Some(descriptor) = descriptor {
        let model = ctx
            .model_builder
            .build(descriptor.as_ref(), ctx.introspector, ctx.table_resolver);
        let updatable: Vec<ColumnDef> = model
            .columns
            .iter()
            .filter(|c| c.updatable)
            .cloned()
            .collect();
        let slot = ctx.next_slot();
        let assignments: Vec<String> = updatable
            .iter()
            .map(|c| {
                let name = ctx
                    .introspector
                    .column_name(descriptor.as_ref(), c, ctx.column_resolver);
                format!("{} = ?", name.qualify(ctx.dialect))
            })
            .collect();
        let binds = updatable
            .iter()
            .map(|c| BindStep::Record {
                slot,
                extractor: descriptor.extractor(c.name),
            })
            .collect();
        let text = format!("SET {}", assignments.join(", "));
        let key = ElementKey::SetColumns {
            type_id: descriptor.type_id(),
            columns: updatable.iter().map(|c| c.name).collect(),
        };
        return Ok((text, Some(key), binds));
    }

    if let Some(template) = template {
        let (inner_sql, inner_key, binds) = compile_fragments(&template.expand(), scope, ctx)?;
        let text = format!("SET {inner_sql}");
        return Ok((text, Some(ElementKey::SetTemplate { inner: inner_key }), binds));
    }

    Err(TemplateError::template("`Set` element has neither a descriptor nor a template"))
}

fn compile_values(
    descriptor: &Option<Arc<dyn RecordDescriptor>>,
    template: &Option<Arc<TemplateString>>,
    scope: Scope,
    ctx: &mut CompileContext,
) -> Result<(String, Option<ElementKey>, Vec<BindStep>)> {
    if let Some(descriptor) = descriptor {
        let model = ctx
            .model_builder
            .build(descriptor.as_ref(), ctx.introspector, ctx.table_resolver);
        let (included, _generated) = included_columns(&model.columns, false);
        let slot = ctx.next_slot();
        let placeholders = vec!["?"; included.len()].join(", ");
        let binds = included
            .iter()
            .map(|c| BindStep::Record {
                slot,
                extractor: descriptor.extractor(c.name),
            })
            .collect();
        let text = format!("VALUES ({placeholders})");
        let key = ElementKey::ValuesColumns {
            type_id: descriptor.type_id(),
            columns: included.iter().map(|c| c.name).collect(),
        };
        return Ok((text, Some(key), binds));
    }

    if let Some(template) = template {
        let (inner_sql, inner_key, binds) = compile_fragments(&template.expand(), scope, ctx)?;
        let text = format!("VALUES ({inner_sql})");
        return Ok((text, Some(ElementKey::ValuesTemplate { inner: inner_key }), binds));
    }

    Err(TemplateError::template("`Values` element has neither a descriptor nor a template"))
}

#[allow(clippy::too_many_arguments)]
fn compile_join(
    source: &Source,
    source_alias: &Option<String>,
    target: &Target,
    target_alias: &Option<String>,
    join_type: JoinType,
    auto_join: bool,
    scope: Scope,
    ctx: &mut CompileContext,
) -> Result<(String, Option<ElementKey>, Vec<BindStep>)> {
    match (source, target) {
        (Source::Table(source_desc), Target::Table(target_desc)) => {
            let resolved_source = ctx
                .alias_mapper
                .get_alias(source_desc.as_ref(), source_alias.as_deref(), scope);

            if auto_join && !ctx.table_use.is_referenced(source_desc.type_id(), &resolved_source) {
                return Ok((
                    String::new(),
                    Some(ElementKey::Join {
                        source_type: source_desc.type_id(),
                        source_alias: source_alias.clone(),
                        target_type: target_desc.type_id(),
                        target_alias: target_alias.clone(),
                        join_type,
                        auto_join,
                    }),
                    Vec::new(),
                ));
            }

            let resolved_target = ctx
                .alias_mapper
                .get_alias(target_desc.as_ref(), target_alias.as_deref(), scope);
            let deriver = JoinDeriver {
                introspector: ctx.introspector,
                fk_resolver: ctx.fk_resolver,
                col_resolver: ctx.column_resolver,
            };
            let predicate = deriver.derive(source_desc.as_ref(), target_desc.as_ref())?;
            let target_table = qualify_table(ctx, target_desc.as_ref());
            let safe_target_alias = ctx.dialect.get_safe_identifier(&resolved_target);
            let on_clause = predicate.render(&resolved_source, &resolved_target, ctx.dialect);
            let text = format!(
                "{} {} {safe_target_alias} ON {on_clause}",
                join_type.sql_keyword(),
                target_table.qualify(ctx.dialect)
            );
            Ok((
                text,
                Some(ElementKey::Join {
                    source_type: source_desc.type_id(),
                    source_alias: source_alias.clone(),
                    target_type: target_desc.type_id(),
                    target_alias: target_alias.clone(),
                    join_type,
                    auto_join,
                }),
                Vec::new(),
            ))
        }
        _ => {
            // Template-backed join operands: derived-table joins can't be
            // pruned by `TableUse` (there is no single record type to
            // check), so they always emit. A `TemplateSource` embeds its
            // parsed sub-template as a derived table `(...)`; a
            // `TemplateTarget` supplies the ON predicate text directly
            // (there's no FK relationship to derive one from without a
            // concrete record type on both sides) and contributes no table
            // text of its own.
            let (source_sql, source_key, mut binds) = match source {
                Source::Template(t) => {
                    let (sql, key, binds) = ctx
                        .in_nested_scope(|ctx| compile_fragments(&t.expand(), Scope::Outer, ctx))?;
                    (format!("({sql})"), key, binds)
                }
                Source::Table(d) => {
                    let table = qualify_table(ctx, d.as_ref());
                    let alias = ctx
                        .alias_mapper
                        .get_alias(d.as_ref(), source_alias.as_deref(), scope);
                    let safe_alias = ctx.dialect.get_safe_identifier(&alias);
                    (
                        format!("{} {safe_alias}", table.qualify(ctx.dialect)),
                        Some(Vec::new()),
                        Vec::new(),
                    )
                }
            };
            let (target_sql, on_predicate, target_key, mut target_binds) = match target {
                Target::Template(t) => {
                    let (sql, key, binds) = ctx
                        .in_nested_scope(|ctx| compile_fragments(&t.expand(), Scope::Outer, ctx))?;
                    (String::new(), Some(sql), key, binds)
                }
                Target::Table(d) => {
                    let table = qualify_table(ctx, d.as_ref());
                    let alias = ctx
                        .alias_mapper
                        .get_alias(d.as_ref(), target_alias.as_deref(), scope);
                    let safe_alias = ctx.dialect.get_safe_identifier(&alias);
                    (
                        format!("{} {safe_alias}", table.qualify(ctx.dialect)),
                        None,
                        Some(Vec::new()),
                        Vec::new(),
                    )
                }
            };
            binds.append(&mut target_binds);

            let mut text = format!("{} {source_sql}", join_type.sql_keyword());
            if !target_sql.is_empty() {
                text.push(' ');
                text.push_str(&target_sql);
            }
            if let Some(on_sql) = on_predicate {
                text.push_str(" ON (");
                text.push_str(&on_sql);
                text.push(')');
            }

            Ok((
                text,
                Some(ElementKey::JoinTemplate {
                    source: source_key,
                    target: target_key,
                    join_type,
                    auto_join,
                }),
                binds,
            ))
        }
    }
}

fn compile_cacheable(
    expression: &CacheableExpr,
    scope: Scope,
    ctx: &mut CompileContext,
) -> Result<(String, Option<ElementKey>, Vec<BindStep>)> {
    match expression {
        CacheableExpr::Template(template) => {
            let (inner_sql, inner_key, binds) = compile_fragments(&template.expand(), scope, ctx)?;
            Ok((
                inner_sql,
                Some(ElementKey::CacheableTemplate { inner: inner_key }),
                binds,
            ))
        }
        CacheableExpr::Object { metamodel, operator, object } => {
            // A `null` inside a `Cacheable` expression is a compile-time
            // error in every shape — callers must use the `IS_NULL`
            // operator explicitly instead.
            let reject_null = |values: &[Value]| -> Result<()> {
                if values.iter().any(Value::is_null) {
                    Err(TemplateError::template(
                        "null value in a Cacheable expression; use IS_NULL explicitly",
                    ))
                } else {
                    Ok(())
                }
            };

            let lhs = match metamodel {
                Some(m) => Some(render_metamodel(m, scope, ctx)?),
                None => None,
            };
            let metamodel_key = metamodel
                .as_ref()
                .map(|m| (m.root.type_id(), m.path.clone(), m.is_table));
            let prefix = lhs.as_deref().map_or(String::new(), |s| format!("{s} "));

            let (text, shape, values) = match object {
                ObjectValue::Single(value) => {
                    reject_null(std::slice::from_ref(value))?;
                    let text = format!("{prefix}{operator} ?");
                    (text, Some(ObjectShape::Single(value.type_tag())), vec![value.clone()])
                }
                ObjectValue::Collection(values) => {
                    reject_null(values)?;
                    let placeholders = vec!["?"; values.len()].join(", ");
                    let text = format!("{prefix}{operator} ({placeholders})");
                    let shape = if values.len() > MAX_CACHEABLE_COLLECTION_ARITY {
                        None
                    } else {
                        let element_shape = values.first().map_or(ANY_TYPE_SHAPE, Value::type_tag);
                        Some(ObjectShape::Collection { size: values.len(), element_shape })
                    };
                    (text, shape, values.clone())
                }
                ObjectValue::UnknownSizeIterable(values) => {
                    reject_null(values)?;
                    // Size isn't statically bounded, so the shape can't be
                    // assumed stable across invocations: always non-cacheable,
                    // but still compiles and renders.
                    let placeholders = vec!["?"; values.len()].join(", ");
                    let text = format!("{prefix}{operator} ({placeholders})");
                    (text, None, values.clone())
                }
            };
            let key = shape.map(|s| ElementKey::CacheableObject {
                metamodel: metamodel_key,
                operator: *operator,
                shape: s,
            });
            let binds = values
                .into_iter()
                .map(|v| BindStep::Literal { value: v, converter: None })
                .collect();
            Ok((text, key, binds))
        }
    }
}
