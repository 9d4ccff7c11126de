//! Version store implementations

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Name of the table holding applied versions
pub const VERSION_TABLE: &str = "schema_migrations";
