//! The memoizing introspector.
//!
//! Turns an [`Entity`] model into a [`TableSchema`] exactly once per type
//! and caches the result by `TypeId`. Column names are resolved with a
//! fixed override precedence, primary keys fall back to pluggable
//! resolvers, and blacklisted properties are dropped before anything else
//! looks at them.

use crate::config::OrmConfig;
use crate::error::OrmResult;
use crate::schema::entity::{Entity, PropSpec};
use crate::schema::table::{PropertyDescriptor, TableSchema};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

type KeyMatcher = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

struct KeyResolver {
    priority: i32,
    matcher: KeyMatcher,
}

pub struct Introspector {
    config: OrmConfig,
    cache: RwLock<HashMap<TypeId, Arc<TableSchema>>>,
    /// Sorted by descending priority; one resolver per priority level.
    resolvers: RwLock<Vec<KeyResolver>>,
}

impl Introspector {
    pub fn new(config: OrmConfig) -> Self {
        let introspector = Self {
            config,
            cache: RwLock::new(HashMap::new()),
            resolvers: RwLock::new(Vec::new()),
        };
        // Built-in fallback: a column literally named "id" is the key.
        introspector.register_key_resolver(0, |_table, column| column == "id");
        introspector
    }

    /// Register a primary-key resolver `(table_name, column_name) -> bool`.
    /// Higher priority is consulted first; registering at an occupied
    /// priority replaces the previous resolver at that level.
    pub fn register_key_resolver<F>(&self, priority: i32, matcher: F)
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        let mut resolvers = self.resolvers.write().expect("resolver list poisoned");
        resolvers.retain(|r| r.priority != priority);
        resolvers.push(KeyResolver {
            priority,
            matcher: Arc::new(matcher),
        });
        resolvers.sort_by_key(|r| std::cmp::Reverse(r.priority));
    }

    /// The schema for `T`, built on first request and cached forever.
    pub fn schema<T: Entity>(&self) -> OrmResult<Arc<TableSchema>> {
        let type_id = TypeId::of::<T>();
        {
            let cache = self.cache.read().expect("schema cache poisoned");
            if let Some(schema) = cache.get(&type_id) {
                return Ok(Arc::clone(schema));
            }
        }
        // Build outside the lock; reference properties resolve their target
        // schemas lazily at access time, so building never recurses here.
        let built = Arc::new(self.build::<T>()?);
        let mut cache = self.cache.write().expect("schema cache poisoned");
        // Double-check: another task may have built it meanwhile.
        Ok(Arc::clone(
            cache.entry(type_id).or_insert(built),
        ))
    }

    fn build<T: Entity>(&self) -> OrmResult<TableSchema> {
        let model = T::model();
        let type_name = std::any::type_name::<T>();
        let simple_name = type_name.rsplit("::").next().unwrap_or(type_name);

        let table = model
            .table
            .or(model.compat_table)
            .unwrap_or_else(|| self.config.naming.column_name(simple_name));

        let specs: Vec<PropSpec> = model
            .properties
            .into_iter()
            .filter(|spec| !self.config.blacklist.contains(&spec.name))
            .collect();

        let mut properties: Vec<PropertyDescriptor> = specs
            .into_iter()
            .map(|spec| {
                let column = spec
                    .column
                    .or(spec.compat_column)
                    .unwrap_or_else(|| self.config.naming.column_name(&spec.name));
                PropertyDescriptor {
                    name: spec.name,
                    column,
                    kind: spec.kind,
                    primary_key: spec.primary_key,
                    insertable: spec.insertable,
                    updatable: spec.updatable,
                    sequence: spec.sequence,
                    getter: spec.getter,
                    setter: spec.setter,
                    reference: spec.reference,
                }
            })
            .collect();

        if !properties.iter().any(|p| p.primary_key) {
            self.resolve_keys(&table, &mut properties);
        }

        let schema = TableSchema::new(
            TypeId::of::<T>(),
            type_name,
            table,
            properties,
            model.populated_flag,
        );
        debug!(
            entity = type_name,
            table = schema.table.as_str(),
            properties = schema.properties.len(),
            keys = schema.key_properties().count(),
            "Built table schema"
        );
        Ok(schema)
    }

    /// Try each resolver in descending priority; the first one matching at
    /// least one property claims all of its matches as the key set.
    fn resolve_keys(&self, table: &str, properties: &mut [PropertyDescriptor]) {
        let resolvers = self.resolvers.read().expect("resolver list poisoned");
        for resolver in resolvers.iter() {
            let matches: Vec<usize> = properties
                .iter()
                .enumerate()
                .filter(|(_, p)| (resolver.matcher)(table, &p.column))
                .map(|(i, _)| i)
                .collect();
            if !matches.is_empty() {
                for i in matches {
                    properties[i].primary_key = true;
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::entity::{ModelBuilder, Prop};
    use crate::schema::table::KeyStatus;
    use crate::coerce::CoercionRegistry;
    use crate::schema::MapperCtx;
    use crate::value::Value;

    #[derive(Default)]
    struct Person {
        id: Option<i64>,
        first_name: String,
        age: i32,
    }

    impl Entity for Person {
        fn model() -> crate::schema::EntityModel {
            ModelBuilder::<Person>::new()
                .prop(Prop::new("id", |p: &Person| p.id, |p, v| p.id = v))
                .prop(Prop::new(
                    "firstName",
                    |p: &Person| p.first_name.clone(),
                    |p, v| p.first_name = v,
                ))
                .prop(Prop::new("age", |p: &Person| p.age, |p, v| p.age = v))
                .build()
        }
    }

    #[derive(Default)]
    struct Widget {
        code: Option<String>,
        label: String,
    }

    impl Entity for Widget {
        fn model() -> crate::schema::EntityModel {
            ModelBuilder::<Widget>::new()
                .table("widgets")
                .prop(Prop::new(
                    "code",
                    |w: &Widget| w.code.clone(),
                    |w, v| w.code = v,
                ))
                .prop(Prop::new(
                    "label",
                    |w: &Widget| w.label.clone(),
                    |w, v| w.label = v,
                ))
                .build()
        }
    }

    fn ctx<'a>(
        introspector: &'a Introspector,
        coercions: &'a CoercionRegistry,
    ) -> MapperCtx<'a> {
        MapperCtx {
            introspector,
            coercions,
        }
    }

    #[test]
    fn test_schema_derivation_is_deterministic() {
        let introspector = Introspector::new(OrmConfig::default());
        let first = introspector.schema::<Person>().unwrap();
        let second = introspector.schema::<Person>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.table, "person");
        let columns: Vec<&str> = first.properties.iter().map(|p| p.column.as_str()).collect();
        assert_eq!(columns, vec!["id", "first_name", "age"]);
    }

    #[test]
    fn test_builtin_id_resolver_claims_key() {
        let introspector = Introspector::new(OrmConfig::default());
        let schema = introspector.schema::<Person>().unwrap();
        let keys: Vec<&str> = schema.key_properties().map(|p| p.name.as_str()).collect();
        assert_eq!(keys, vec!["id"]);
    }

    #[test]
    fn test_higher_priority_resolver_wins() {
        let introspector = Introspector::new(OrmConfig::default());
        introspector.register_key_resolver(10, |_, column| column == "code");
        let schema = introspector.schema::<Widget>().unwrap();
        let keys: Vec<&str> = schema.key_properties().map(|p| p.name.as_str()).collect();
        assert_eq!(keys, vec!["code"]);
    }

    #[test]
    fn test_resolver_is_scoped_by_table_name() {
        let introspector = Introspector::new(OrmConfig::default());
        introspector
            .register_key_resolver(10, |table, column| table == "widgets" && column == "code");
        let widget = introspector.schema::<Widget>().unwrap();
        let keys: Vec<&str> = widget.key_properties().map(|p| p.name.as_str()).collect();
        assert_eq!(keys, vec!["code"]);
        // Other tables fall through to the built-in resolver.
        let person = introspector.schema::<Person>().unwrap();
        let keys: Vec<&str> = person.key_properties().map(|p| p.name.as_str()).collect();
        assert_eq!(keys, vec!["id"]);
    }

    #[test]
    fn test_blacklist_drops_property() {
        let config = OrmConfig::default().blacklist(["age"]);
        let introspector = Introspector::new(config);
        let schema = introspector.schema::<Person>().unwrap();
        assert!(schema.properties.iter().all(|p| p.name != "age"));
        assert_eq!(schema.properties.len(), 2);
    }

    #[test]
    fn test_zero_property_type_is_degenerate() {
        struct Marker;
        impl Default for Marker {
            fn default() -> Self {
                Marker
            }
        }
        impl Entity for Marker {
            fn model() -> crate::schema::EntityModel {
                ModelBuilder::<Marker>::new().table("markers").build()
            }
        }
        let introspector = Introspector::new(OrmConfig::default());
        let schema = introspector.schema::<Marker>().unwrap();
        assert_eq!(schema.table, "markers");
        assert!(schema.properties.is_empty());
        assert!(!schema.has_keys());
    }

    #[test]
    fn test_entity_data_states() {
        let introspector = Introspector::new(OrmConfig::default());
        let coercions = CoercionRegistry::new();
        let ctx = ctx(&introspector, &coercions);
        let schema = introspector.schema::<Person>().unwrap();

        let blank = Person::default();
        let data = schema.entity_data(&blank, &ctx).unwrap();
        assert_eq!(data.status, KeyStatus::NullKey);

        let saved = Person {
            id: Some(7),
            ..Default::default()
        };
        let data = schema.entity_data(&saved, &ctx).unwrap();
        assert_eq!(data.status, KeyStatus::KeyPresent);
        assert_eq!(data.keys, vec![("id".to_string(), Value::Int(7))]);
    }

    #[test]
    fn test_column_override_precedence() {
        #[derive(Default)]
        struct Legacy {
            id: Option<i64>,
            both: String,
            compat_only: String,
        }
        impl Entity for Legacy {
            fn model() -> crate::schema::EntityModel {
                ModelBuilder::<Legacy>::new()
                    .prop(Prop::new("id", |e: &Legacy| e.id, |e, v| e.id = v))
                    .prop(
                        Prop::new("both", |e: &Legacy| e.both.clone(), |e, v| e.both = v)
                            .column("explicit_col")
                            .compat_column("compat_col"),
                    )
                    .prop(
                        Prop::new(
                            "compatOnly",
                            |e: &Legacy| e.compat_only.clone(),
                            |e, v| e.compat_only = v,
                        )
                        .compat_column("legacy_col"),
                    )
                    .build()
            }
        }
        let introspector = Introspector::new(OrmConfig::default());
        let schema = introspector.schema::<Legacy>().unwrap();
        let by_name: HashMap<&str, &str> = schema
            .properties
            .iter()
            .map(|p| (p.name.as_str(), p.column.as_str()))
            .collect();
        assert_eq!(by_name["both"], "explicit_col");
        assert_eq!(by_name["compatOnly"], "legacy_col");
    }

    #[test]
    fn test_derived_sql_fragments() {
        let introspector = Introspector::new(OrmConfig::default());
        let schema = introspector.schema::<Person>().unwrap();
        assert_eq!(schema.insert_columns(), "id, first_name, age");
        assert_eq!(schema.insert_placeholders(), "?, ?, ?");
        assert_eq!(schema.update_assignments(), "first_name = ?, age = ?");
        assert_eq!(schema.key_filter(), "id = ?");
    }

    #[test]
    fn test_shared_column_split() {
        #[derive(Default)]
        struct Dual {
            id: Option<i64>,
            raw: String,
            pretty: String,
        }
        impl Entity for Dual {
            fn model() -> crate::schema::EntityModel {
                ModelBuilder::<Dual>::new()
                    .prop(Prop::new("id", |e: &Dual| e.id, |e, v| e.id = v))
                    .prop(
                        Prop::new("raw", |e: &Dual| e.raw.clone(), |e, v| e.raw = v)
                            .column("payload")
                            .updatable(false),
                    )
                    .prop(
                        Prop::new("pretty", |e: &Dual| e.pretty.clone(), |e, v| e.pretty = v)
                            .column("payload")
                            .insertable(false),
                    )
                    .build()
            }
        }
        let introspector = Introspector::new(OrmConfig::default());
        let schema = introspector.schema::<Dual>().unwrap();
        // One insertable and one updatable member per shared column.
        assert_eq!(schema.insert_columns(), "id, payload");
        assert_eq!(schema.update_assignments(), "payload = ?");
        // Both properties receive the column on materialization.
        assert_eq!(schema.properties_for_column("payload").count(), 2);
        assert_eq!(schema.properties_for_column("PAYLOAD").count(), 2);
    }
}
