//! FCM Storage Layer
//!
//! Diesel-based storage for notification requests, delivery logs, and the
//! default device registry.

mod memory;
mod models;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryRegistry;
pub use models::*;
pub use sqlite::SqliteStorage;
pub use traits::*;

use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
