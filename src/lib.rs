//! Offline-first data access for the school management app.
//!
//! Reads go cache, then server, then local store ([`fetch`]). Writes go to
//! the server when reachable and into a durable queue otherwise ([`sync`]),
//! which is drained in order once [`connectivity`] comes back.

pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod db;
pub mod fetch;
pub mod logging;
pub mod models;
pub mod remote;
pub mod repos;
pub mod sync;

#[cfg(test)]
mod testing;
