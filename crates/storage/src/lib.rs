pub mod directory;
pub mod error;
pub mod gateway;
pub mod kv;
pub mod migration;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use directory::{HostFilesystem, HostSettings, LocalDirectory};
pub use error::StorageError;
pub use gateway::{DataGateway, WriteOutcome};
pub use kv::{KeyValueStore, KvLimits};
pub use migration::{MigrationManager, MigrationMarker, MigrationReport};
pub use sqlite::SqliteStore;
pub use traits::*;
