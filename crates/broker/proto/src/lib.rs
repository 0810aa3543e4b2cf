//! Shared types for the form broker.
//!
//! This crate defines the identifiers, request specs, persisted entries and
//! lifecycle events exchanged between the form registry and the collaborators
//! around it (transport, provider RPC, durable store, bundle event source).

#![warn(missing_docs)]

pub mod paths;
pub mod types;

pub use types::*;
