//! Persistence interface consumed by the core
//!
//! The core never talks to a database directly. Everything goes through the
//! [`Store`] trait, which models the atomic create/read/update operations
//! and the uniqueness/foreign-key semantics of the data model.
//!
//! ## Implementations
//!
//! - **In-memory** (this crate): `RwLock`-guarded maps, used by tests and
//!   embedders without durability needs
//! - **Database-backed** (external layer): whatever engine the deployment
//!   chooses — the engine choice is deliberately outside this crate

pub mod backend;
pub mod memory;
#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    AlertFilter, NewAlert, NewAlertRule, NewMetric, NewServer, NewServerGroup, NewSshKey, Store,
};
pub use memory::MemoryStore;
