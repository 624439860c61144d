//! `JoinDeriver` — PK↔FK discovery and join predicate construction
//! construction.

use crate::alias::Name;
use crate::dialect::Dialect;
use crate::error::{Result, TemplateError};
use crate::schema::{ColumnNameResolver, ForeignKeyResolver, RecordDescriptor, SchemaIntrospector};

/// One `left = right` equality conjunct of a derived join predicate.
#[derive(Debug, Clone)]
pub struct Equality {
    pub left: Name,
    pub right: Name,
}

/// The derived predicate for a two-table join: an ordered, conjoined list
/// of equalities, one per aligned PK/FK column pair.
#[derive(Debug, Clone)]
pub struct JoinPredicate {
    pub equalities: Vec<Equality>,
}

impl JoinPredicate {
    pub fn render(&self, left_alias: &str, right_alias: &str, dialect: &dyn Dialect) -> String {
        let left_alias = dialect.get_safe_identifier(left_alias);
        let right_alias = dialect.get_safe_identifier(right_alias);
        self.equalities
            .iter()
            .map(|eq| {
                format!(
                    "{left_alias}.{} = {right_alias}.{}",
                    eq.left.qualify(dialect),
                    eq.right.qualify(dialect)
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// Derives the join predicate between two table-bearing record types.
pub struct JoinDeriver<'a> {
    pub introspector: &'a dyn SchemaIntrospector,
    pub fk_resolver: Option<&'a dyn ForeignKeyResolver>,
    pub col_resolver: Option<&'a dyn ColumnNameResolver>,
}

impl<'a> JoinDeriver<'a> {
    pub fn new(introspector: &'a dyn SchemaIntrospector) -> Self {
        JoinDeriver {
            introspector,
            fk_resolver: None,
            col_resolver: None,
        }
    }

    /// Determines which side holds the foreign key and builds the join
    /// predicate: prefer an FK on the
    /// target side, fall back to one on the source side, error if neither
    /// exists; require the PK/FK arities to match.
    pub fn derive(
        &self,
        source: &dyn RecordDescriptor,
        target: &dyn RecordDescriptor,
    ) -> Result<JoinPredicate> {
        if let Some(fk) = self
            .introspector
            .foreign_key_referring_to(target, source.type_id(), self.fk_resolver)
        {
            let pk = self.introspector.primary_key_columns(source)?;
            return self.build_predicate(target, &fk.columns, source, &pk);
        }

        if let Some(fk) = self
            .introspector
            .foreign_key_referring_to(source, target.type_id(), self.fk_resolver)
        {
            let pk = self.introspector.primary_key_columns(target)?;
            return self.build_predicate(source, &fk.columns, target, &pk);
        }

        Err(TemplateError::schema(format!(
            "no matching foreign key between `{}` and `{}`",
            source.simple_name(),
            target.simple_name()
        )))
    }

    fn build_predicate(
        &self,
        fk_side: &dyn RecordDescriptor,
        fk_columns: &[&'static str],
        pk_side: &dyn RecordDescriptor,
        pk_columns: &[crate::schema::ColumnDef],
    ) -> Result<JoinPredicate> {
        if fk_columns.len() != pk_columns.len() {
            return Err(TemplateError::schema(format!(
                "foreign key on `{}` has {} column(s) but `{}`'s primary key has {}",
                fk_side.simple_name(),
                fk_columns.len(),
                pk_side.simple_name(),
                pk_columns.len()
            )));
        }

        let equalities = fk_columns
            .iter()
            .zip(pk_columns.iter())
            .map(|(fk_col, pk_col)| Equality {
                left: self
                    .introspector
                    .column_name_by_name(fk_side, fk_col, self.col_resolver),
                right: self
                    .introspector
                    .column_name(pk_side, pk_col, self.col_resolver),
            })
            .collect();

        Ok(JoinPredicate { equalities })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::AnsiDialect;
    use crate::schema::{descriptor_of, ColumnDef, Generation, Record, StaticSchemaIntrospector};
    use crate::value::Value;
    use std::any::TypeId;

    struct User;
    impl Record for User {
        const TABLE: &'static str = "user";
        fn columns() -> &'static [ColumnDef] {
            static COLS: &[ColumnDef] = &[ColumnDef::primary_key("id", Generation::Identity)];
            COLS
        }
        fn value_of(&self, _c: &str) -> Value {
            Value::Null
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
        fn foreign_keys() -> &'static [crate::schema::ForeignKeyDef] {
            static FK: &[crate::schema::ForeignKeyDef] = &[crate::schema::ForeignKeyDef {
                target: || TypeId::of::<User>(),
                target_name: "User",
                columns: &["user_id"],
            }];
            FK
        }
        fn value_of(&self, _c: &str) -> Value {
            Value::Null
        }
    }

    #[test]
    fn derives_predicate_from_fk_on_target_side() {
        let introspector = StaticSchemaIntrospector;
        let deriver = JoinDeriver::new(&introspector);
        let user = descriptor_of::<User>();
        let role = descriptor_of::<Role>();

        let predicate = deriver.derive(user.as_ref(), role.as_ref()).unwrap();
        let sql = predicate.render("u", "r", &AnsiDialect);
        assert_eq!(sql, "\"r\".\"user_id\" = \"u\".\"id\"");
    }

    #[test]
    fn join_symmetry_up_to_operand_order() {
        let introspector = StaticSchemaIntrospector;
        let deriver = JoinDeriver::new(&introspector);
        let user = descriptor_of::<User>();
        let role = descriptor_of::<Role>();

        let ur = deriver.derive(user.as_ref(), role.as_ref()).unwrap();
        let ru = deriver.derive(role.as_ref(), user.as_ref()).unwrap();

        assert_eq!(ur.equalities[0].left, ru.equalities[0].right);
        assert_eq!(ur.equalities[0].right, ru.equalities[0].left);
    }

    #[test]
    fn errors_when_no_fk_exists() {
        struct Orphan;
        impl Record for Orphan {
            const TABLE: &'static str = "orphan";
            fn columns() -> &'static [ColumnDef] {
                static COLS: &[ColumnDef] = &[ColumnDef::primary_key("id", Generation::Identity)];
                COLS
            }
            fn value_of(&self, _c: &str) -> Value {
                Value::Null
            }
        }
        let introspector = StaticSchemaIntrospector;
        let deriver = JoinDeriver::new(&introspector);
        let user = descriptor_of::<User>();
        let orphan = descriptor_of::<Orphan>();
        assert!(deriver.derive(user.as_ref(), orphan.as_ref()).is_err());
    }
}
