//! Shared types, error model, and configuration for ingestkit.
//!
//! This crate is the foundation depended on by all other ingestkit crates.
//! It provides:
//! - [`IngestError`]: the unified error type
//! - Domain types ([`IngestRequest`], [`Phase`], [`Candidate`], [`ConnectorSpec`])
//! - Configuration ([`AppConfig`], [`OrchestratorConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConnectorDecl, OrchestratorConfig, OrchestratorSection, config_dir,
    config_file_path, init_config, load_config, load_config_from, starter_config,
    starter_fixtures, validate_config,
};
pub use error::{IngestError, Result};
pub use types::{Candidate, ConnectorSpec, Evidence, IngestMode, IngestRequest, Phase};
