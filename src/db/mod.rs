//! Database access layer.
//!
//! - Connection pool handling for the natively executed backends
//! - Parameter binding and placeholder expansion
//! - Row decoding into the uniform value representation
//! - Statement execution dispatched per backend
//! - Savepoint-nested transaction sessions

pub mod executor;
pub mod params;
pub mod pool;
pub mod session;
pub mod types;

pub use pool::DbPool;
pub use session::Session;
