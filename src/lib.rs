//! carfx library
//!
//! Resilient access to the car marketplace currency API: a retrying request
//! executor, TTL caching, conversion with graceful degradation and display
//! currency selection. Exposed as a library for the binary and for
//! integration tests.

pub mod cache;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod currency;
pub mod logging;
pub mod preferences;
