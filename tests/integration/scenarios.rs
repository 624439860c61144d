//! Black-box coverage of the six concrete scenarios and the invariants in
//! scenarios, driven entirely through the public `TemplateEngine` API.

use std::any::Any;
use std::sync::Arc;

use sql_template_engine::{
    AnsiDialect, ColumnDef, Element, ForeignKeyDef, Generation, JoinType, Record, TemplateEngine,
    TemplateString, Value,
};

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

struct Role;

impl Record for Role {
    const TABLE: &'static str = "role";

    fn columns() -> &'static [ColumnDef] {
        static COLS: &[ColumnDef] = &[
            ColumnDef::primary_key("id", Generation::Identity),
            ColumnDef::column("user_id"),
        ];
        COLS
    }

    fn foreign_keys() -> &'static [ForeignKeyDef] {
        static FK: &[ForeignKeyDef] = &[ForeignKeyDef {
            target: || std::any::TypeId::of::<User>(),
            target_name: "User",
            columns: &["user_id"],
        }];
        FK
    }

    fn value_of(&self, _column: &str) -> Value {
        Value::Null
    }
}

fn engine() -> TemplateEngine {
    TemplateEngine::new(Arc::new(AnsiDialect))
}

/// Scenario 1: trivial select.
#[test]
fn trivial_select() {
    let engine = engine();
    let t = TemplateString::new()
        .literal("SELECT ")
        .element(Element::column::<User>("name"))
        .literal(" ")
        .element(Element::from_table::<User>(Some("u"), false));

    let compiled = engine.compile(&t).unwrap();
    assert_eq!(compiled.sql, "SELECT \"u\".\"name\" FROM \"user\" \"u\"");

    let (_sql, params, _generated) = engine.bind(&compiled, &[]).unwrap();
    assert!(params.is_empty());
}

/// Scenario 2: a bound parameter renders a placeholder and a positional
/// parameter with a contiguous, 1-based index.
#[test]
fn parameter_binding() {
    let engine = engine();
    let t = TemplateString::new()
        .literal("SELECT ")
        .element(Element::column::<User>("id"))
        .literal(" ")
        .element(Element::from_table::<User>(Some("u"), false))
        .literal(" WHERE ")
        .element(Element::column::<User>("id"))
        .literal(" = ")
        .element(Element::param(42i64));

    let compiled = engine.compile(&t).unwrap();
    assert!(compiled.sql.ends_with("= ?"));

    let (_sql, params, _generated) = engine.bind(&compiled, &[]).unwrap();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].index, 1);
    assert_eq!(params[0].value, Value::I64(42));
}

/// Scenario 3: an auto-join whose source table is never referenced is
/// pruned from the emitted SQL.
#[test]
fn auto_join_prune() {
    let engine = engine();
    let t = TemplateString::new()
        .literal("SELECT ")
        .element(Element::column::<User>("name"))
        .literal(" ")
        .element(Element::from_table::<User>(Some("u"), false))
        .literal(" ")
        .element(Element::join::<Role, User>(
            Some("r"),
            Some("u"),
            JoinType::Inner,
            true,
        ));

    let compiled = engine.compile(&t).unwrap();
    assert!(!compiled.sql.contains("JOIN"));
}

/// Scenario 3b: the same auto-join emits once some element in the
/// template references the source table's alias — regardless of whether
/// that reference appears before or after the join in element order
/// (join pruning is evaluated over the whole template, not a left-to-right
/// scan).
#[test]
fn auto_join_emits_when_referenced() {
    let engine = engine();
    let t = TemplateString::new()
        .literal("SELECT ")
        .element(Element::column::<User>("name"))
        .literal(", ")
        .element(Element::column::<Role>("id"))
        .literal(" ")
        .element(Element::from_table::<User>(Some("u"), false))
        .literal(" ")
        .element(Element::join::<Role, User>(
            None,
            Some("u"),
            JoinType::Inner,
            true,
        ));

    let compiled = engine.compile(&t).unwrap();
    assert!(compiled.sql.contains("INNER JOIN"));
    assert!(compiled.sql.contains("\"role\".\"user_id\" = \"u\".\"id\""));
}

/// Scenario 4: an identity primary key is omitted from the INSERT column
/// list and reported exactly once in `generated_keys`.
#[test]
fn identity_pk_omitted_from_insert() {
    let engine = engine();
    let t = TemplateString::new()
        .literal("INSERT INTO ")
        .element(Element::insert::<User>(false));

    let compiled = engine.compile(&t).unwrap();
    assert_eq!(compiled.sql, "INSERT INTO \"user\" (\"name\")");
    assert_eq!(compiled.generated_keys.len(), 1);
    assert_eq!(compiled.generated_keys[0].name, "id");
}

/// Scenario 5: a `Cacheable` collection above `MAX_ARITY` taints the whole
/// template as non-cacheable — repeated identical invocations never hit
/// the segmented LRU cache, but the emitted SQL is still correct.
#[test]
fn oversized_collection_is_never_cached() {
    let engine = engine();

    let build = || {
        TemplateString::new()
            .literal("WHERE m ")
            .element(Element::Cacheable {
                expression: sql_template_engine::element::CacheableExpr::Object {
                    metamodel: None,
                    operator: "IN",
                    object: sql_template_engine::element::ObjectValue::Collection(vec![
                        Value::I64(1),
                        Value::I64(2),
                        Value::I64(3),
                    ]),
                },
            })
    };

    let first = engine.compile(&build()).unwrap();
    let second = engine.compile(&build()).unwrap();

    assert_eq!(first.sql, "WHERE m IN (?, ?, ?)");
    assert_eq!(second.sql, first.sql);
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(engine.cache_len(), 0);
}

/// A cacheable shape is compiled once and every subsequent identical
/// invocation returns the same cached `Arc`.
#[test]
fn cacheable_shape_is_reused_across_calls() {
    let engine = engine();
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
}

/// `BindVars` batch-binding surface: one extractor registered per
/// insertable column, delivered to the configured batch listener.
#[test]
fn bind_vars_batch_binds_multiple_records() {
    use std::sync::Mutex;

    let engine = engine();
    let t = TemplateString::new()
        .literal("INSERT INTO ")
        .element(Element::insert::<User>(false))
        .literal(" ")
        .element(Element::values_from::<User>());
    let compiled = engine.compile(&t).unwrap();

    let vars = engine.bind_vars(&compiled);
    let seen: Mutex<Vec<usize>> = Mutex::new(Vec::new());

    struct Listener<'a>(&'a Mutex<Vec<usize>>);
    impl<'a> sql_template_engine::BatchListener for Listener<'a> {
        fn on_batch(&self, params: &[sql_template_engine::PositionalParameter]) {
            self.0.lock().unwrap().push(params.len());
        }
    }
    vars.set_batch_listener(Listener(&seen)).unwrap();

    let alice = User {
        id: 1,
        name: "alice".into(),
    };
    let bob = User {
        id: 2,
        name: "bob".into(),
    };

    for user in [&alice, &bob] {
        let record: &dyn Any = user;
        let params = vars.handle(record).unwrap();
        assert_eq!(params.len(), 1);
    }

    assert_eq!(*seen.lock().unwrap(), vec![1, 1]);
}

/// Metrics record one request per compile call and split hits from misses.
#[test]
fn metrics_track_hits_and_misses() {
    let engine = engine();
    let build = || {
        TemplateString::new()
            .literal("SELECT ")
            .element(Element::column::<User>("name"))
            .literal(" ")
            .element(Element::from_table::<User>(Some("u"), false))
    };

    engine.compile(&build()).unwrap();
    engine.compile(&build()).unwrap();
    engine.compile(&build()).unwrap();

    let snap = engine.metrics().snapshot();
    assert_eq!(snap.requests, 3);
    assert_eq!(snap.misses, 1);
    assert_eq!(snap.hits, 2);
    assert!((snap.hit_ratio_percent - 200.0 / 3.0).abs() < 0.01);
}
