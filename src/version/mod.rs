//! Version management layer for tracked template dependencies
//!
//! This module provides the core functionality for fetching, caching, storing and
//! comparing dependency versions across registries (npm, Go proxy, GitHub releases).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Registries │────▶│   Manager   │────▶│   Storage   │
//! │ (npm,go,gh) │     │  (detect)   │     │   (store)   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │
//!        ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐
//! │     OSV     │     │    Cache    │
//! │ (security)  │     │ (ttl, file) │
//! └─────────────┘     └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`semver`]: SemVer values and ordering
//! - [`constraint`]: version constraint parsing and satisfaction
//! - [`compatibility`]: rules describing which package versions work together
//! - [`cache`]: cache trait and in-memory TTL cache
//! - [`file_cache`]: cache persisted to a JSON file with debounced saves
//! - [`storage`]: durable version store with backups
//! - [`registry`]: Registry trait for fetching versions from remote sources
//! - [`registries`]: Concrete registry implementations
//! - [`manager`]: detection and update facade over the pieces above
//! - [`error`]: Error types
//! - [`types`]: `VersionInfo`, `SecurityIssue` and related records

pub mod cache;
pub mod compatibility;
pub mod constraint;
pub mod error;
pub mod file_cache;
pub mod manager;
pub mod registries;
pub mod registry;
pub mod semver;
pub mod storage;
pub mod types;
