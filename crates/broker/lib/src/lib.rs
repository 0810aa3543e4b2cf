//! Form registry broker: the authority on which forms exist, who holds them,
//! and whether admitting another one would exceed a quota.

#![warn(missing_docs)]

pub mod collab;
pub mod config;
pub mod core;
pub mod error;
pub mod services;
pub mod storage;

pub use collab::Collaborators;
pub use config::RegistryConfig;
pub use core::FormRegistry;
pub use error::{ConfigError, FormError, Result};
pub use form_broker_proto as proto;
pub use storage::{FormStorage, LmdbStorage, MemoryStorage, StorageError};
