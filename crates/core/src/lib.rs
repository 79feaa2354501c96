pub mod block_ops;
pub mod error;
pub mod ids;
pub mod keys;
pub mod model;
pub mod script_ops;

pub use error::CoreError;
pub use ids::*;
pub use keys::KeyNamespace;
pub use model::*;
