//! Entity models: the startup-time property registration tables that domain
//! types supply instead of runtime reflection.
//!
//! A domain type implements [`Entity`] and describes itself through a typed
//! [`ModelBuilder`]. The builder erases the typed accessors into boxed
//! closures over `dyn Any`, so everything downstream of the introspector
//! works uniformly regardless of the concrete type.

use crate::coerce::CoercionRegistry;
use crate::error::{OrmError, OrmResult};
use crate::schema::registry::Introspector;
use crate::value::{FromValue, IntoValue, Value, ValueKind};
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

/// A type the engine can map to a table.
///
/// `model()` is called at most once per process (the introspector memoizes
/// the derived schema by `TypeId`).
pub trait Entity: Any + Sized {
    fn model() -> EntityModel;
}

/// Shared services handed to erased accessors: the introspector for
/// resolving referenced types and the coercion registry for value casts.
pub struct MapperCtx<'a> {
    pub introspector: &'a Introspector,
    pub coercions: &'a CoercionRegistry,
}

pub(crate) type Getter = Arc<dyn Fn(&dyn Any, &MapperCtx) -> OrmResult<Value> + Send + Sync>;
pub(crate) type Setter =
    Arc<dyn Fn(&mut dyn Any, Value, &MapperCtx) -> OrmResult<()> + Send + Sync>;
pub(crate) type PopulatedFlag =
    Arc<dyn for<'a> Fn(&'a mut dyn Any) -> OrmResult<&'a mut bool> + Send + Sync>;

/// Reference-typed property plumbing, resolved against the referenced
/// type's own schema at access time.
pub(crate) struct ReferenceSpec {
    pub target: TypeId,
    pub target_name: &'static str,
    /// Writes a concrete instance of the referenced type into the owning
    /// entity. The box must hold the referenced type exactly.
    pub assign: Arc<dyn Fn(&mut dyn Any, Box<dyn Any>) -> OrmResult<()> + Send + Sync>,
}

/// One registered property, still carrying its override channels; the
/// introspector resolves these into a final column name.
pub(crate) struct PropSpec {
    pub name: String,
    pub column: Option<String>,
    pub compat_column: Option<String>,
    pub kind: ValueKind,
    pub getter: Getter,
    pub setter: Option<Setter>,
    pub primary_key: bool,
    pub insertable: bool,
    pub updatable: bool,
    pub sequence: Option<String>,
    pub reference: Option<ReferenceSpec>,
}

/// The registration table an [`Entity`] supplies: table-name overrides,
/// property specs, and the optional lazy-population flag accessor.
pub struct EntityModel {
    pub(crate) table: Option<String>,
    pub(crate) compat_table: Option<String>,
    pub(crate) properties: Vec<PropSpec>,
    pub(crate) populated_flag: Option<PopulatedFlag>,
}

fn type_mismatch<E>() -> OrmError {
    OrmError::config(format!(
        "Entity type mismatch: expected {}",
        std::any::type_name::<E>()
    ))
}

pub(crate) fn downcast_ref<E: 'static>(any: &dyn Any) -> OrmResult<&E> {
    any.downcast_ref::<E>().ok_or_else(type_mismatch::<E>)
}

pub(crate) fn downcast_mut<E: 'static>(any: &mut dyn Any) -> OrmResult<&mut E> {
    any.downcast_mut::<E>().ok_or_else(type_mismatch::<E>)
}

/// Typed builder for one property of entity type `E`.
pub struct Prop<E> {
    spec: PropSpec,
    _marker: PhantomData<fn(E)>,
}

impl<E: 'static> Prop<E> {
    /// A readable and writable scalar property.
    pub fn new<V>(name: &str, get: fn(&E) -> V, set: fn(&mut E, V)) -> Self
    where
        V: FromValue + IntoValue + 'static,
    {
        let getter: Getter = Arc::new(move |any, _ctx| {
            let entity = downcast_ref::<E>(any)?;
            Ok(get(entity).into_value())
        });
        let setter: Setter = Arc::new(move |any, value, ctx| {
            let entity = downcast_mut::<E>(any)?;
            set(entity, ctx.coercions.cast_into::<V>(value)?);
            Ok(())
        });
        Self {
            spec: PropSpec {
                name: name.to_string(),
                column: None,
                compat_column: None,
                kind: <V as FromValue>::KIND,
                getter,
                setter: Some(setter),
                primary_key: false,
                insertable: true,
                updatable: true,
                sequence: None,
                reference: None,
            },
            _marker: PhantomData,
        }
    }

    /// A property without a mutator. Assigning to it during materialization
    /// is a configuration error.
    pub fn read_only<V>(name: &str, get: fn(&E) -> V) -> Self
    where
        V: FromValue + IntoValue + 'static,
    {
        let getter: Getter = Arc::new(move |any, _ctx| {
            let entity = downcast_ref::<E>(any)?;
            Ok(get(entity).into_value())
        });
        Self {
            spec: PropSpec {
                name: name.to_string(),
                column: None,
                compat_column: None,
                kind: <V as FromValue>::KIND,
                getter,
                setter: None,
                primary_key: false,
                insertable: true,
                updatable: true,
                sequence: None,
                reference: None,
            },
            _marker: PhantomData,
        }
    }

    /// A property holding another mapped entity. The column carries the
    /// referenced type's primary key; reading the property yields that key,
    /// and materialization builds a placeholder instance carrying only the
    /// key, ready for lazy population.
    pub fn reference<R>(name: &str, get: fn(&E) -> Option<&R>, set: fn(&mut E, Option<R>)) -> Self
    where
        R: Entity + Default + 'static,
    {
        let getter: Getter = Arc::new(move |any, ctx| {
            let entity = downcast_ref::<E>(any)?;
            match get(entity) {
                None => Ok(Value::Null),
                Some(referenced) => {
                    let schema = ctx.introspector.schema::<R>()?;
                    let key = schema.single_key()?;
                    key.get(referenced, ctx)
                }
            }
        });
        let setter: Setter = Arc::new(move |any, value, ctx| {
            let entity = downcast_mut::<E>(any)?;
            if value.is_null() {
                set(entity, None);
                return Ok(());
            }
            let schema = ctx.introspector.schema::<R>()?;
            let key = schema.single_key()?;
            let mut placeholder = R::default();
            key.set(&mut placeholder, value, ctx)?;
            set(entity, Some(placeholder));
            Ok(())
        });
        let assign = Arc::new(
            move |any: &mut dyn Any, instance: Box<dyn Any>| -> OrmResult<()> {
                let entity = downcast_mut::<E>(any)?;
                let instance = instance.downcast::<R>().map_err(|_| type_mismatch::<R>())?;
                set(entity, Some(*instance));
                Ok(())
            },
        );
        Self {
            spec: PropSpec {
                name: name.to_string(),
                column: None,
                compat_column: None,
                // The bound value's real kind comes from the referenced
                // type's key property at access time.
                kind: ValueKind::Int,
                getter,
                setter: Some(setter),
                primary_key: false,
                insertable: true,
                updatable: true,
                sequence: None,
                reference: Some(ReferenceSpec {
                    target: TypeId::of::<R>(),
                    target_name: std::any::type_name::<R>(),
                    assign,
                }),
            },
            _marker: PhantomData,
        }
    }

    /// Explicit column-name override; wins over every other channel.
    pub fn column(mut self, column: &str) -> Self {
        self.spec.column = Some(column.to_string());
        self
    }

    /// Compatibility-layer column override; wins over the naming policy but
    /// loses to [`Prop::column`].
    pub fn compat_column(mut self, column: &str) -> Self {
        self.spec.compat_column = Some(column.to_string());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.spec.primary_key = true;
        self
    }

    /// Name of the database sequence filling this key on create when the
    /// dialect supports sequence fetch.
    pub fn sequence(mut self, sequence: &str) -> Self {
        self.spec.sequence = Some(sequence.to_string());
        self
    }

    pub fn insertable(mut self, insertable: bool) -> Self {
        self.spec.insertable = insertable;
        self
    }

    pub fn updatable(mut self, updatable: bool) -> Self {
        self.spec.updatable = updatable;
        self
    }
}

/// Typed builder for an [`EntityModel`].
pub struct ModelBuilder<E> {
    model: EntityModel,
    _marker: PhantomData<fn(E)>,
}

impl<E: 'static> ModelBuilder<E> {
    pub fn new() -> Self {
        Self {
            model: EntityModel {
                table: None,
                compat_table: None,
                properties: Vec::new(),
                populated_flag: None,
            },
            _marker: PhantomData,
        }
    }

    /// Explicit table-name override.
    pub fn table(mut self, name: &str) -> Self {
        self.model.table = Some(name.to_string());
        self
    }

    /// Compatibility-layer table override; loses to [`ModelBuilder::table`].
    pub fn compat_table(mut self, name: &str) -> Self {
        self.model.compat_table = Some(name.to_string());
        self
    }

    pub fn prop(mut self, prop: Prop<E>) -> Self {
        self.model.properties.push(prop.spec);
        self
    }

    /// Register the boolean field guarding lazy population. Without it the
    /// type cannot be populated lazily and reads never mark instances.
    pub fn populated_by(mut self, flag: fn(&mut E) -> &mut bool) -> Self {
        self.model.populated_flag = Some(Arc::new(move |any: &mut dyn Any| {
            let entity = downcast_mut::<E>(any)?;
            Ok(flag(entity))
        }));
        self
    }

    pub fn build(self) -> EntityModel {
        self.model
    }
}

impl<E: 'static> Default for ModelBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}
