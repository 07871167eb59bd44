//! Stampede-safe response-output cache.
//!
//! The [`cache`] module holds the core; [`config`] and [`infra`] carry the settings and telemetry
//! bootstrap used by the `rendercache` binary.

pub mod cache;
pub mod config;
pub mod error;
pub mod infra;
