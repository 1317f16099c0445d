pub mod config;
pub mod error;
pub mod evaluator;
pub mod hub;
pub mod liveness;
pub mod model;
pub mod scheduler;
pub mod store;
pub mod transport;
pub mod vault;

pub use error::{CoreError, CoreResult};
pub use hub::{Hub, NewCredential};
pub use vault::Vault;
