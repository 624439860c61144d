//! `Element` — the tagged variants that make up a `TemplateString`'s
//! structured content.

use std::any::TypeId;
use std::sync::Arc;

use crate::schema::{descriptor_of, Record, RecordDescriptor};
use crate::template::TemplateString;
use crate::value::Value;

/// The source side of a `FROM`/`JOIN`.
#[derive(Clone, Debug)]
pub enum Source {
    Table(Arc<dyn RecordDescriptor>),
    Template(Arc<TemplateString>),
}

/// The target side of a `JOIN`.
#[derive(Clone, Debug)]
pub enum Target {
    Table(Arc<dyn RecordDescriptor>),
    Template(Arc<TemplateString>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub fn sql_keyword(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SelectMode {
    All,
    Distinct,
}

/// A path descriptor into a record: root type + dotted path, tagged as
/// either a table reference or a plain column reference.
#[derive(Clone, Debug)]
pub struct Metamodel {
    pub root: Arc<dyn RecordDescriptor>,
    pub path: String,
    pub is_table: bool,
}

/// The operand of a `Cacheable(ObjectExpression)` — a single value, a
/// fixed-size collection/array, or an iterable whose size isn't known
/// statically. All three carry their already-materialized values (the
/// element only knows "unknown size" in the sense that the *shape* can't
/// be assumed stable across calls — the bind-time count is always known by
/// the time an element is actually compiled).
#[derive(Clone, Debug)]
pub enum ObjectValue {
    Single(Value),
    Collection(Vec<Value>),
    UnknownSizeIterable(Vec<Value>),
}

#[derive(Clone, Debug)]
pub enum CacheableExpr {
    Template(Arc<TemplateString>),
    Object {
        metamodel: Option<Metamodel>,
        operator: &'static str,
        object: ObjectValue,
    },
}

/// A tagged unit of structured template content.
#[derive(Clone, Debug)]
pub enum Element {
    Alias {
        table: Arc<dyn RecordDescriptor>,
        scope: crate::alias::Scope,
    },
    Column {
        descriptor: Arc<dyn RecordDescriptor>,
        column: &'static str,
        alias: Option<String>,
    },
    Table {
        descriptor: Arc<dyn RecordDescriptor>,
        alias: Option<String>,
    },
    From {
        source: Source,
        alias: Option<String>,
        auto_join: bool,
    },
    Join {
        source: Source,
        source_alias: Option<String>,
        target: Target,
        target_alias: Option<String>,
        join_type: JoinType,
        auto_join: bool,
    },
    Select {
        descriptor: Arc<dyn RecordDescriptor>,
        mode: SelectMode,
    },
    Insert {
        descriptor: Arc<dyn RecordDescriptor>,
        ignore_auto_generate: bool,
    },
    Update {
        descriptor: Arc<dyn RecordDescriptor>,
        alias: Option<String>,
    },
    Delete {
        descriptor: Arc<dyn RecordDescriptor>,
        alias: Option<String>,
    },
    Set {
        descriptor: Option<Arc<dyn RecordDescriptor>>,
        template: Option<Arc<TemplateString>>,
    },
    Where {
        predicate: Arc<TemplateString>,
    },
    Values {
        descriptor: Option<Arc<dyn RecordDescriptor>>,
        template: Option<Arc<TemplateString>>,
    },
    Param {
        name: Option<String>,
        value: Value,
        converter: Option<&'static str>,
    },
    BindVar {
        variable: &'static str,
        descriptor: Arc<dyn RecordDescriptor>,
        column: &'static str,
    },
    Subquery {
        template: Arc<TemplateString>,
        correlate: bool,
    },
    Unsafe {
        sql: String,
    },
    Cacheable {
        expression: CacheableExpr,
    },
    /// Carries a pre-wrapped element list, flattened into its parent
    /// sequence before dispatch. Must never survive past
    /// `TemplateString::expand`.
    Wrapped {
        elements: Vec<Element>,
    },
}

impl Element {
    pub fn table<T: Record>(alias: Option<&str>) -> Self {
        Element::Table {
            descriptor: descriptor_of::<T>(),
            alias: alias.map(str::to_string),
        }
    }

    pub fn column<T: Record>(column: &'static str) -> Self {
        Element::Column {
            descriptor: descriptor_of::<T>(),
            column,
            alias: None,
        }
    }

    pub fn column_aliased<T: Record>(column: &'static str, alias: impl Into<String>) -> Self {
        Element::Column {
            descriptor: descriptor_of::<T>(),
            column,
            alias: Some(alias.into()),
        }
    }

    pub fn from_table<T: Record>(alias: Option<&str>, auto_join: bool) -> Self {
        Element::From {
            source: Source::Table(descriptor_of::<T>()),
            alias: alias.map(str::to_string),
            auto_join,
        }
    }

    pub fn join<S: Record, Tg: Record>(
        source_alias: Option<&str>,
        target_alias: Option<&str>,
        join_type: JoinType,
        auto_join: bool,
    ) -> Self {
        Element::Join {
            source: Source::Table(descriptor_of::<S>()),
            source_alias: source_alias.map(str::to_string),
            target: Target::Table(descriptor_of::<Tg>()),
            target_alias: target_alias.map(str::to_string),
            join_type,
            auto_join,
        }
    }

    pub fn select<T: Record>(mode: SelectMode) -> Self {
        Element::Select {
            descriptor: descriptor_of::<T>(),
            mode,
        }
    }

    pub fn insert<T: Record>(ignore_auto_generate: bool) -> Self {
        Element::Insert {
            descriptor: descriptor_of::<T>(),
            ignore_auto_generate,
        }
    }

    pub fn update<T: Record>(alias: Option<&str>) -> Self {
        Element::Update {
            descriptor: descriptor_of::<T>(),
            alias: alias.map(str::to_string),
        }
    }

    pub fn delete<T: Record>(alias: Option<&str>) -> Self {
        Element::Delete {
            descriptor: descriptor_of::<T>(),
            alias: alias.map(str::to_string),
        }
    }

    pub fn set_from<T: Record>() -> Self {
        Element::Set {
            descriptor: Some(descriptor_of::<T>()),
            template: None,
        }
    }

    pub fn values_from<T: Record>() -> Self {
        Element::Values {
            descriptor: Some(descriptor_of::<T>()),
            template: None,
        }
    }

    pub fn param(value: impl Into<Value>) -> Self {
        Element::Param {
            name: None,
            value: value.into(),
            converter: None,
        }
    }

    pub fn named_param(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Element::Param {
            name: Some(name.into()),
            value: value.into(),
            converter: None,
        }
    }

    pub fn bind_var<T: Record>(variable: &'static str, column: &'static str) -> Self {
        Element::BindVar {
            variable,
            descriptor: descriptor_of::<T>(),
            column,
        }
    }

    pub fn unsafe_sql(sql: impl Into<String>) -> Self {
        Element::Unsafe { sql: sql.into() }
    }

    pub fn type_id_of(descriptor: &dyn RecordDescriptor) -> TypeId {
        descriptor.type_id()
    }
}
