//! The record-reflection boundary.
//!
//! Field reflection (how PKs, FKs, column names, and
//! sequence annotations are discovered from a record type) as an opaque
//! external collaborator, faced only through `SchemaIntrospector`. This
//! module gives that boundary a concrete, testable shape: record types
//! implement [`Record`] directly (no derive macro — the metadata is a
//! handful of `const`s, in the spirit of the `Table`/`Bind` traits found in
//! ORM-shaped crates this engine's ecosystem favors), and `Element`
//! dispatch carries them around as a type-erased [`RecordDescriptor`].

pub mod model;

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Result, TemplateError};
use crate::value::Value;

/// How a primary key column's value is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// Caller supplies the value; nothing special happens on INSERT.
    None,
    /// Database-assigned identity column; omitted from INSERT column lists
    /// and recorded in `generatedKeys`.
    Identity,
    /// Sequence-backed. `Some(name)` means the caller is expected to emit
    /// `nextval` for `name`; `None` means the column is DB-default-assigned
    /// and is omitted from the INSERT column list (an open
    /// question — preserved as-is here).
    Sequence(Option<&'static str>),
}

/// One column of a [`Record`]'s model.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: &'static str,
    pub primary_key: bool,
    pub generation: Generation,
    pub insertable: bool,
    pub updatable: bool,
}

impl ColumnDef {
    pub const fn column(name: &'static str) -> Self {
        ColumnDef {
            name,
            primary_key: false,
            generation: Generation::None,
            insertable: true,
            updatable: true,
        }
    }

    pub const fn primary_key(name: &'static str, generation: Generation) -> Self {
        ColumnDef {
            name,
            primary_key: true,
            generation,
            insertable: true,
            updatable: false,
        }
    }
}

/// A foreign-key component declared on the referring side of a relation.
#[derive(Clone)]
pub struct ForeignKeyDef {
    pub target: fn() -> TypeId,
    pub target_name: &'static str,
    /// FK columns on this record, ordered to align positionally with the
    /// target's primary-key columns.
    pub columns: &'static [&'static str],
}

impl fmt::Debug for ForeignKeyDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignKeyDef")
            .field("target_name", &self.target_name)
            .field("columns", &self.columns)
            .finish()
    }
}

/// A function able to pull one column's value out of a type-erased record
/// instance, built generically from a concrete `Record` at element
/// construction time.
pub type Extractor = Arc<dyn Fn(&dyn Any) -> Result<Value> + Send + Sync>;

/// A record type with a table-bearing schema.
///
/// Implemented directly by host types; this is the concrete stand-in for
/// an opaque reflection layer. No macro is required —
/// the metadata is a short, hand-written `const` table, matching how
/// `atmosphere-core`'s `Table` trait is used in this crate's ecosystem.
pub trait Record: Send + Sync + 'static {
    const TABLE: &'static str;
    const SCHEMA: Option<&'static str> = None;

    fn columns() -> &'static [ColumnDef];
    fn foreign_keys() -> &'static [ForeignKeyDef] {
        &[]
    }

    /// Extract the runtime value of `column` from `self`.
    fn value_of(&self, column: &str) -> Value;
}

/// Blanket marker for table-bearing record types (glossary: `Data`).
pub trait Data: Record {}
impl<T: Record> Data for T {}

/// A deferred reference to a record, identified only by primary key.
pub struct Ref<T: Record> {
    pub pk: Value,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> Ref<T> {
    pub fn new(pk: impl Into<Value>) -> Self {
        Ref {
            pk: pk.into(),
            _marker: PhantomData,
        }
    }

    pub fn target_type() -> TypeId {
        TypeId::of::<T>()
    }
}

impl<T: Record> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Ref {
            pk: self.pk.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ref").field(&self.pk).finish()
    }
}

/// Type-erased view of a [`Record`], carried by `Element` variants that
/// reference a record type. Built via [`Descriptor::new`].
pub trait RecordDescriptor: Send + Sync + fmt::Debug {
    fn type_id(&self) -> TypeId;
    fn simple_name(&self) -> &'static str;
    fn table(&self) -> &'static str;
    fn schema(&self) -> Option<&'static str>;
    fn columns(&self) -> &'static [ColumnDef];
    fn foreign_keys(&self) -> &'static [ForeignKeyDef];
    fn extractor(&self, column: &'static str) -> Extractor;
}

struct Descriptor<T>(PhantomData<fn() -> T>);

impl<T: Record> RecordDescriptor for Descriptor<T> {
    fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn simple_name(&self) -> &'static str {
        let full = std::any::type_name::<T>();
        full.rsplit("::").next().unwrap_or(full)
    }

    fn table(&self) -> &'static str {
        T::TABLE
    }

    fn schema(&self) -> Option<&'static str> {
        T::SCHEMA
    }

    fn columns(&self) -> &'static [ColumnDef] {
        T::columns()
    }

    fn foreign_keys(&self) -> &'static [ForeignKeyDef] {
        T::foreign_keys()
    }

    fn extractor(&self, column: &'static str) -> Extractor {
        Arc::new(move |any: &dyn Any| {
            any.downcast_ref::<T>()
                .map(|rec| rec.value_of(column))
                .ok_or_else(|| {
                    TemplateError::template(format!(
                        "record type mismatch binding column `{column}`"
                    ))
                })
        })
    }
}

impl<T> fmt::Debug for Descriptor<T>
where
    T: Record,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Descriptor").field(&self.simple_name()).finish()
    }
}

/// Build a type-erased descriptor for `T`. Cheap — no allocation beyond the
/// `Arc` box itself, and descriptors are typically built once per template
/// construction site and cloned (`Arc::clone`) thereafter.
pub fn descriptor_of<T: Record>() -> Arc<dyn RecordDescriptor> {
    Arc::new(Descriptor::<T>(PhantomData))
}

/// Policy for resolving a record's table name; the default uses
/// `Record::TABLE`/`Record::SCHEMA` verbatim.
pub trait TableNameResolver: Send + Sync {
    fn resolve(&self, descriptor: &dyn RecordDescriptor) -> crate::alias::Name;
}

/// Policy for resolving a column's SQL name; the default uses the column's
/// declared name verbatim.
pub trait ColumnNameResolver: Send + Sync {
    fn resolve(&self, descriptor: &dyn RecordDescriptor, column: &ColumnDef) -> crate::alias::Name;
}

/// Policy for resolving which side of a relation carries the foreign key;
/// the default defers entirely to [`SchemaIntrospector::foreign_key_referring_to`].
pub trait ForeignKeyResolver: Send + Sync {
    fn resolve<'a>(
        &self,
        descriptor: &dyn RecordDescriptor,
        candidates: &'a [ForeignKeyDef],
        target: TypeId,
    ) -> Option<&'a ForeignKeyDef>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTableNameResolver;

impl TableNameResolver for DefaultTableNameResolver {
    fn resolve(&self, descriptor: &dyn RecordDescriptor) -> crate::alias::Name {
        match descriptor.schema() {
            Some(schema) => crate::alias::Name::new(format!("{schema}.{}", descriptor.table())),
            None => crate::alias::Name::new(descriptor.table()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultColumnNameResolver;

impl ColumnNameResolver for DefaultColumnNameResolver {
    fn resolve(&self, _descriptor: &dyn RecordDescriptor, column: &ColumnDef) -> crate::alias::Name {
        crate::alias::Name::new(column.name)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultForeignKeyResolver;

impl ForeignKeyResolver for DefaultForeignKeyResolver {
    fn resolve<'a>(
        &self,
        _descriptor: &dyn RecordDescriptor,
        candidates: &'a [ForeignKeyDef],
        target: TypeId,
    ) -> Option<&'a ForeignKeyDef> {
        candidates.iter().find(|fk| (fk.target)() == target)
    }
}

/// The external schema-reflection capability consumed by the compiler
/// boundary. Concretely implemented here in terms of
/// [`RecordDescriptor`], since this crate cannot depend on a real
/// reflection layer that lives outside its scope.
pub trait SchemaIntrospector: Send + Sync {
    fn table_name(
        &self,
        descriptor: &dyn RecordDescriptor,
        resolver: Option<&dyn TableNameResolver>,
    ) -> crate::alias::Name;

    fn primary_key_columns(&self, descriptor: &dyn RecordDescriptor) -> Result<Vec<ColumnDef>>;

    fn foreign_key_referring_to(
        &self,
        descriptor: &dyn RecordDescriptor,
        target: TypeId,
        resolver: Option<&dyn ForeignKeyResolver>,
    ) -> Option<ForeignKeyDef>;

    fn column_name(
        &self,
        descriptor: &dyn RecordDescriptor,
        column: &ColumnDef,
        resolver: Option<&dyn ColumnNameResolver>,
    ) -> crate::alias::Name;

    /// As [`Self::column_name`], but looked up by raw name rather than by
    /// an already-resolved `ColumnDef` — used by `JoinDeriver` for foreign
    /// key columns, which `ForeignKeyDef` records only as bare names.
    fn column_name_by_name(
        &self,
        descriptor: &dyn RecordDescriptor,
        name: &str,
        resolver: Option<&dyn ColumnNameResolver>,
    ) -> crate::alias::Name {
        match descriptor.columns().iter().find(|c| c.name == name) {
            Some(column) => self.column_name(descriptor, column, resolver),
            None => crate::alias::Name::new(name),
        }
    }
}

/// The sole concrete [`SchemaIntrospector`]: reads straight off the
/// type-erased [`RecordDescriptor`]'s static metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticSchemaIntrospector;

impl SchemaIntrospector for StaticSchemaIntrospector {
    fn table_name(
        &self,
        descriptor: &dyn RecordDescriptor,
        resolver: Option<&dyn TableNameResolver>,
    ) -> crate::alias::Name {
        match resolver {
            Some(r) => r.resolve(descriptor),
            None => DefaultTableNameResolver.resolve(descriptor),
        }
    }

    fn primary_key_columns(&self, descriptor: &dyn RecordDescriptor) -> Result<Vec<ColumnDef>> {
        let pk: Vec<ColumnDef> = descriptor
            .columns()
            .iter()
            .filter(|c| c.primary_key)
            .cloned()
            .collect();
        if pk.is_empty() {
            return Err(TemplateError::schema(format!(
                "record `{}` declares no primary key",
                descriptor.simple_name()
            )));
        }
        Ok(pk)
    }

    fn foreign_key_referring_to(
        &self,
        descriptor: &dyn RecordDescriptor,
        target: TypeId,
        resolver: Option<&dyn ForeignKeyResolver>,
    ) -> Option<ForeignKeyDef> {
        let candidates = descriptor.foreign_keys();
        match resolver {
            Some(r) => r.resolve(descriptor, candidates, target).cloned(),
            None => DefaultForeignKeyResolver
                .resolve(descriptor, candidates, target)
                .cloned(),
        }
    }

    fn column_name(
        &self,
        descriptor: &dyn RecordDescriptor,
        column: &ColumnDef,
        resolver: Option<&dyn ColumnNameResolver>,
    ) -> crate::alias::Name {
        match resolver {
            Some(r) => r.resolve(descriptor, column),
            None => DefaultColumnNameResolver.resolve(descriptor, column),
        }
    }
}
