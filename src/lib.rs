//! Prospect Search Library
//!
//! Queries several business-data providers for one search, normalizes their
//! results into a common record shape, merges records that describe the same
//! business and ranks the outcome by confidence.
//!
//! # Modules
//!
//! - `cache`: Search cache trait, moka-backed implementation and rolling source stats.
//! - `circuit_breaker`: Per-source circuit breakers.
//! - `config`: Configuration management.
//! - `dedup`: Pairwise duplicate rules and grouping.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `merge`: Field-by-field merging of duplicate groups.
//! - `models`: Core data models.
//! - `normalize`: Provider JSON coercion, text normalization and validators.
//! - `orchestrator`: Concurrent source fan-out with caching and timeouts.
//! - `pipeline`: Detect / merge / score / rank composition.
//! - `scoring`: Confidence scoring and ranking.
//! - `search`: Top-level search entry point.
//! - `similarity`: String, phone and geographic similarity.
//! - `sources`: Provider adapters (Google Maps, Nominatim, Pages Jaunes, Hunter).

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod dedup;
pub mod errors;
pub mod handlers;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod scoring;
pub mod search;
pub mod similarity;
pub mod sources;
