//! Property-name to column-name transforms.

use std::sync::Arc;

/// Deterministic transform from a logical property name to a column name.
/// Applied only when no explicit column override is present.
#[derive(Clone)]
pub enum NamingPolicy {
    /// Use the property name untouched.
    Verbatim,
    /// `firstName` -> `first_name`. The default.
    SnakeCase,
    /// `firstName` -> `FIRST_NAME`.
    ScreamingSnakeCase,
    /// User-supplied transform.
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl NamingPolicy {
    pub fn column_name(&self, property: &str) -> String {
        match self {
            NamingPolicy::Verbatim => property.to_string(),
            NamingPolicy::SnakeCase => camel_to_snake(property),
            NamingPolicy::ScreamingSnakeCase => camel_to_snake(property).to_uppercase(),
            NamingPolicy::Custom(f) => f(property),
        }
    }
}

impl Default for NamingPolicy {
    fn default() -> Self {
        NamingPolicy::SnakeCase
    }
}

impl std::fmt::Debug for NamingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NamingPolicy::Verbatim => "Verbatim",
            NamingPolicy::SnakeCase => "SnakeCase",
            NamingPolicy::ScreamingSnakeCase => "ScreamingSnakeCase",
            NamingPolicy::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

/// Lower-case with an underscore inserted before each interior upper-case
/// letter. Consecutive capitals each get their own underscore, so acronyms
/// come out as `a_b_c`; names already in snake_case pass through unchanged.
pub fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
