//! `Name`/`Identifier` and the per-compilation `AliasMapper`.

use std::any::TypeId;
use std::collections::HashMap;

use crate::dialect::Dialect;
use crate::error::{Result, TemplateError};
use crate::schema::RecordDescriptor;

/// An identifier value together with its escape policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub name: String,
    pub escape: bool,
}

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Name {
            name: name.into(),
            escape: true,
        }
    }

    /// An identifier that should be emitted verbatim, unquoted.
    pub fn raw(name: impl Into<String>) -> Self {
        Name {
            name: name.into(),
            escape: false,
        }
    }

    pub fn qualify(&self, dialect: &dyn Dialect) -> String {
        if self.escape {
            dialect.get_safe_identifier(&self.name)
        } else {
            self.name.clone()
        }
    }
}

/// Subquery nesting scope an alias is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Inner,
    Outer,
}

/// Per-compilation resolver from record type (+ scope) to a stable SQL
/// alias. Discarded at compile end.
#[derive(Debug, Default)]
pub struct AliasMapper {
    aliases: HashMap<(TypeId, Scope), String>,
    counters: HashMap<&'static str, u32>,
}

impl AliasMapper {
    pub fn new() -> Self {
        AliasMapper::default()
    }

    /// Returns `explicit` if given (and registers it); otherwise the
    /// previously registered alias in this scope; otherwise allocates a new
    /// monotone alias derived from the type's simple name.
    pub fn get_alias(
        &mut self,
        descriptor: &dyn RecordDescriptor,
        explicit: Option<&str>,
        scope: Scope,
    ) -> String {
        let key = (descriptor.type_id(), scope);

        if let Some(explicit) = explicit {
            self.aliases.insert(key, explicit.to_string());
            return explicit.to_string();
        }

        if let Some(existing) = self.aliases.get(&key) {
            return existing.clone();
        }

        let base = descriptor.simple_name().to_lowercase();
        let count = self.counters.entry(descriptor.simple_name()).or_insert(0);
        let alias = if *count == 0 {
            base
        } else {
            format!("{base}_{count}")
        };
        *count += 1;

        self.aliases.insert(key, alias.clone());
        alias
    }

    /// Looks up a previously registered alias; a missing alias is an error
    /// rather than a silently-allocated one, since the caller is asking for
    /// a specific binding, not declaring a new table reference.
    pub fn resolve(&self, descriptor: &dyn RecordDescriptor, scope: Scope) -> Result<&str> {
        self.aliases
            .get(&(descriptor.type_id(), scope))
            .map(|s| s.as_str())
            .ok_or_else(|| {
                TemplateError::template(format!(
                    "no alias registered for `{}` in scope {:?}",
                    descriptor.simple_name(),
                    scope
                ))
            })
    }
}
