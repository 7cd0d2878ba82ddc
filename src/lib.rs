//! Dependency version tracking for project templates
//!
//! - [`version`]: semver algebra, compatibility rules, caches, storage, registries
//!   and the [`version::manager::VersionManager`] facade
//! - [`pipeline`]: the detect/approve/apply update pipeline with rollback
//! - [`config`]: constants and serde configuration
//! - [`logging`]: tracing subscriber setup for the binary

pub mod config;
pub mod fs;
pub mod logging;
pub mod pipeline;
pub mod version;
