//! Content-addressed caching of generated outputs.

pub mod cache_service;

pub use cache_service::{hash_bytes, hash_descriptor, CacheDescriptor, CacheLogEntry, CacheService};
