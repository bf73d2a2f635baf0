//! Schema inference: entity models, table descriptors, and the memoizing
//! introspector that turns one into the other.

mod entity;
mod registry;
mod table;

pub use entity::{Entity, EntityModel, MapperCtx, ModelBuilder, Prop};
pub use registry::Introspector;
pub use table::{EntityData, KeyStatus, PropertyDescriptor, TableSchema};
