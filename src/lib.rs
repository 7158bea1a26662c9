//! Relaygate - provisions ephemeral UDP relay containers on demand
//!
//! This library implements a small lifecycle manager for UDP forwarders:
//! - Allocates a unique public listen port for each request
//! - Provisions a socat container relaying that port to one fixed upstream
//! - Tracks active proxies in a concurrent in-memory registry
//! - Reclaims proxies after a configured lifetime via a background sweeper
//! - Guarantees each container is torn down at most once, no matter how
//!   many removers race for it

pub mod allocator;
pub mod api;
pub mod backend;
pub mod config;
pub mod docker;
pub mod error;
pub mod manager;
pub mod registry;
pub mod sweeper;
