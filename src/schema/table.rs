//! Resolved table descriptors.
//!
//! A [`TableSchema`] is the immutable, per-type product of introspection:
//! the table name, the ordered property descriptors with their final column
//! names, the primary-key subset, and lazily derived SQL fragments for
//! inserts and updates.

use crate::error::{OrmError, OrmResult};
use crate::schema::entity::{Getter, MapperCtx, PopulatedFlag, ReferenceSpec, Setter};
use crate::value::{Value, ValueKind};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::error;

/// One mapped property with its resolved column name and erased accessors.
pub struct PropertyDescriptor {
    pub name: String,
    pub column: String,
    pub kind: ValueKind,
    pub primary_key: bool,
    pub insertable: bool,
    pub updatable: bool,
    pub sequence: Option<String>,
    pub(crate) getter: Getter,
    pub(crate) setter: Option<Setter>,
    pub(crate) reference: Option<ReferenceSpec>,
}

impl PropertyDescriptor {
    pub fn get(&self, entity: &dyn Any, ctx: &MapperCtx) -> OrmResult<Value> {
        (self.getter)(entity, ctx)
    }

    /// Assign a value through the registered mutator, coercing on the way
    /// in. A property registered without a mutator rejects assignment.
    pub fn set(&self, entity: &mut dyn Any, value: Value, ctx: &MapperCtx) -> OrmResult<()> {
        match &self.setter {
            Some(setter) => setter(entity, value, ctx),
            None => Err(OrmError::config(format!(
                "Property '{}' has no registered mutator",
                self.name
            ))),
        }
    }

    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }

    pub(crate) fn reference_target(&self) -> Option<TypeId> {
        self.reference.as_ref().map(|r| r.target)
    }
}

impl std::fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("kind", &self.kind)
            .field("primary_key", &self.primary_key)
            .field("insertable", &self.insertable)
            .field("updatable", &self.updatable)
            .field("sequence", &self.sequence)
            .field("reference", &self.reference.as_ref().map(|r| r.target_name))
            .finish()
    }
}

/// Whether an instance carries usable primary-key values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// The type maps no primary-key properties at all.
    NoKeyProperties,
    /// Key properties exist but at least one holds null.
    NullKey,
    /// Every key property holds a non-null value.
    KeyPresent,
}

/// The key values read off one instance, with their columns.
#[derive(Debug)]
pub struct EntityData {
    pub keys: Vec<(String, Value)>,
    pub status: KeyStatus,
}

/// Immutable schema for one entity type.
pub struct TableSchema {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub table: String,
    pub properties: Vec<PropertyDescriptor>,
    key_indices: Vec<usize>,
    by_column: HashMap<String, Vec<usize>>,
    populated_flag: Option<PopulatedFlag>,
    insert_columns: OnceLock<String>,
    insert_placeholders: OnceLock<String>,
    update_assignments: OnceLock<String>,
    key_filter: OnceLock<String>,
}

impl TableSchema {
    pub(crate) fn new(
        type_id: TypeId,
        type_name: &'static str,
        table: String,
        properties: Vec<PropertyDescriptor>,
        populated_flag: Option<PopulatedFlag>,
    ) -> Self {
        let key_indices: Vec<usize> = properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.primary_key)
            .map(|(i, _)| i)
            .collect();
        let mut by_column: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, prop) in properties.iter().enumerate() {
            by_column
                .entry(prop.column.to_lowercase())
                .or_default()
                .push(i);
        }
        let schema = Self {
            type_id,
            type_name,
            table,
            properties,
            key_indices,
            by_column,
            populated_flag,
            insert_columns: OnceLock::new(),
            insert_placeholders: OnceLock::new(),
            update_assignments: OnceLock::new(),
            key_filter: OnceLock::new(),
        };
        schema.check_consistency();
        schema
    }

    /// A column shared by several properties must have at most one
    /// insertable and at most one updatable member, or writes become
    /// ambiguous. Reported at error level, never fatal.
    fn check_consistency(&self) {
        for (column, indices) in &self.by_column {
            if indices.len() < 2 {
                continue;
            }
            let insertable = indices
                .iter()
                .filter(|&&i| self.properties[i].insertable)
                .count();
            let updatable = indices
                .iter()
                .filter(|&&i| self.properties[i].updatable)
                .count();
            if insertable > 1 || updatable > 1 {
                error!(
                    entity = self.type_name,
                    column = column.as_str(),
                    insertable,
                    updatable,
                    "Ambiguous shared column: more than one insertable or updatable property"
                );
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn key_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.key_indices.iter().map(|&i| &self.properties[i])
    }

    pub fn has_keys(&self) -> bool {
        !self.key_indices.is_empty()
    }

    /// The single primary-key property, or a configuration error when the
    /// type has none or a composite key.
    pub fn single_key(&self) -> OrmResult<&PropertyDescriptor> {
        match self.key_indices.as_slice() {
            [i] => Ok(&self.properties[*i]),
            [] => Err(OrmError::config(format!(
                "No primary key mapped for {}",
                self.type_name
            ))),
            _ => Err(OrmError::config(format!(
                "Composite primary key on {} where a single key is required",
                self.type_name
            ))),
        }
    }

    /// Properties mapped to `column`, case-insensitive. A column may be
    /// shared by several properties; all of them receive the value.
    pub fn properties_for_column(&self, column: &str) -> impl Iterator<Item = &PropertyDescriptor> {
        self.by_column
            .get(&column.to_lowercase())
            .into_iter()
            .flatten()
            .map(|&i| &self.properties[i])
    }

    pub fn insertable_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.insertable)
    }

    pub fn updatable_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.updatable && !p.primary_key)
    }

    /// Comma-separated insertable column list, derived once.
    pub fn insert_columns(&self) -> &str {
        self.insert_columns.get_or_init(|| {
            self.insertable_properties()
                .map(|p| p.column.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
    }

    /// Placeholder list matching [`Self::insert_columns`].
    pub fn insert_placeholders(&self) -> &str {
        self.insert_placeholders.get_or_init(|| {
            let count = self.insertable_properties().count();
            vec!["?"; count].join(", ")
        })
    }

    /// Comma-separated `column = ?` list over non-key updatable properties.
    pub fn update_assignments(&self) -> &str {
        self.update_assignments.get_or_init(|| {
            self.updatable_properties()
                .map(|p| format!("{} = ?", p.column))
                .collect::<Vec<_>>()
                .join(", ")
        })
    }

    /// `key = ? AND key2 = ?` filter over the primary-key properties.
    pub fn key_filter(&self) -> &str {
        self.key_filter.get_or_init(|| {
            self.key_properties()
                .map(|p| format!("{} = ?", p.column))
                .collect::<Vec<_>>()
                .join(" AND ")
        })
    }

    /// Read the key values off an instance and classify them.
    pub fn entity_data(&self, entity: &dyn Any, ctx: &MapperCtx) -> OrmResult<EntityData> {
        if self.key_indices.is_empty() {
            return Ok(EntityData {
                keys: Vec::new(),
                status: KeyStatus::NoKeyProperties,
            });
        }
        let mut keys = Vec::with_capacity(self.key_indices.len());
        let mut any_null = false;
        for prop in self.key_properties() {
            let value = prop.get(entity, ctx)?;
            any_null |= value.is_null();
            keys.push((prop.column.clone(), value));
        }
        Ok(EntityData {
            keys,
            status: if any_null {
                KeyStatus::NullKey
            } else {
                KeyStatus::KeyPresent
            },
        })
    }

    /// Whether the model registered a lazy-population flag.
    pub fn tracks_population(&self) -> bool {
        self.populated_flag.is_some()
    }

    /// Mutable access to the instance's populated flag, when registered.
    pub(crate) fn populated_mut<'a>(
        &self,
        entity: &'a mut dyn Any,
    ) -> OrmResult<Option<&'a mut bool>> {
        match &self.populated_flag {
            Some(flag) => flag(entity).map(Some),
            None => Ok(None),
        }
    }

    /// Set the populated flag if the model registered one.
    pub(crate) fn mark_populated(&self, entity: &mut dyn Any, populated: bool) -> OrmResult<()> {
        if let Some(slot) = self.populated_mut(entity)? {
            *slot = populated;
        }
        Ok(())
    }

    /// A reference property matched by its referenced type, for detail
    /// lookups that do not name the property explicitly. Errors when the
    /// match is absent or ambiguous.
    pub(crate) fn reference_by_target(&self, target: TypeId) -> OrmResult<&PropertyDescriptor> {
        let mut matches = self
            .properties
            .iter()
            .filter(|p| p.reference_target() == Some(target));
        match (matches.next(), matches.next()) {
            (Some(prop), None) => Ok(prop),
            (None, _) => Err(OrmError::config(format!(
                "No reference property on {} for the requested type",
                self.type_name
            ))),
            (Some(_), Some(_)) => Err(OrmError::config(format!(
                "Multiple reference properties on {} for the requested type; name one explicitly",
                self.type_name
            ))),
        }
    }

    pub(crate) fn reference_by_name(&self, name: &str) -> OrmResult<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|p| p.name == name && p.is_reference())
            .ok_or_else(|| {
                OrmError::config(format!(
                    "No reference property '{}' on {}",
                    name, self.type_name
                ))
            })
    }
}

impl std::fmt::Debug for TableSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSchema")
            .field("type_name", &self.type_name)
            .field("table", &self.table)
            .field("properties", &self.properties)
            .finish()
    }
}
