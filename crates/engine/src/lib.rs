pub mod config;
pub mod debounce;
pub mod error;
pub mod history;
pub mod roster;
pub mod store;
pub mod telemetry;

pub use config::EngineConfig;
pub use debounce::Debouncer;
pub use error::EngineError;
pub use history::{HistoryManager, Recorded};
pub use roster::CharacterRoster;
pub use store::{ProjectStore, StoreState};
pub use telemetry::init_tracing;
