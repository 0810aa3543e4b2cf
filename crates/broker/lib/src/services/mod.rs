//! Actor services running beside the registry.
//!
//! The registry itself is a synchronous, lock-guarded object. Services wrap it
//! where work arrives asynchronously from outside the request path.

pub mod lifecycle;

#[cfg(test)]
mod tests;
