//! relmap: a runtime object-relational mapping and transaction engine.
//!
//! The engine derives a table schema from an explicit, startup-time property
//! registration table supplied by each domain type, generates
//! dialect-correct SQL for CRUD and pagination, coerces values across type
//! boundaries through a registrable conversion registry, and manages
//! arbitrarily nested logical transactions on one connection per session
//! via savepoints.
//!
//! # Quick start
//!
//! ```no_run
//! use relmap::{Entity, EntityModel, ModelBuilder, Orm, OrmConfig, Prop};
//!
//! #[derive(Default, Clone)]
//! struct Person {
//!     id: Option<i64>,
//!     name: String,
//! }
//!
//! impl Entity for Person {
//!     fn model() -> EntityModel {
//!         ModelBuilder::<Person>::new()
//!             .prop(Prop::new("id", |p: &Person| p.id, |p, v| p.id = v))
//!             .prop(Prop::new("name", |p: &Person| p.name.clone(), |p, v| p.name = v))
//!             .build()
//!     }
//! }
//!
//! # async fn demo() -> relmap::OrmResult<()> {
//! let orm = Orm::new(OrmConfig::default());
//! orm.connect("sqlite::memory:").await?;
//!
//! let mut person = Person { id: None, name: "Ada".into() };
//! orm.create(None, &mut person).await?;
//! let found: Option<Person> = orm.find_by_id(None, person.id).await?;
//! # Ok(()) }
//! ```

pub mod coerce;
pub mod config;
pub mod db;
pub mod dialect;
pub mod error;
pub mod naming;
pub mod orm;
pub mod schema;
pub mod value;

pub use coerce::CoercionRegistry;
pub use config::{OrmConfig, PoolOptions};
pub use db::{DbPool, Session};
pub use dialect::{GeneratedKeyMode, SqlDialect};
pub use error::{OrmError, OrmResult};
pub use naming::NamingPolicy;
pub use orm::{Orm, SpMode, SpParam};
pub use schema::{
    Entity, EntityData, EntityModel, Introspector, KeyStatus, MapperCtx, ModelBuilder, Prop,
    PropertyDescriptor, TableSchema,
};
pub use value::{FromValue, IntoValue, Value, ValueKind};
