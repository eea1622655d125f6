//! In-memory response caching
//!
//! This module provides a TTL cache that keeps API results for a configurable
//! window. Expired entries remain readable through `peek`, with an
//! `is_expired` flag, so callers can fall back to stale data when the API is
//! unavailable.

mod ttl;

pub use ttl::{CachedValue, TtlCache};
