//! Application configuration for ingestkit.
//!
//! User config lives at `~/.ingestkit/ingestkit.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::types::{ConnectorSpec, Phase};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "ingestkit.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".ingestkit";

// ---------------------------------------------------------------------------
// Config structs (matching ingestkit.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Orchestrator defaults.
    #[serde(default)]
    pub orchestrator: OrchestratorSection,

    /// Static connector wiring for every run.
    #[serde(default)]
    pub connectors: Vec<ConnectorDecl>,
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    /// Maximum connectors executing at once within a wave.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,

    /// Confidence goal for `RESOLVE_ONE` requests that do not set one.
    #[serde(default = "default_min_confidence")]
    pub default_min_confidence: f64,

    /// Budget ceiling for requests that do not set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_budget_usd: Option<f64>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            default_min_confidence: default_min_confidence(),
            default_budget_usd: None,
        }
    }
}

fn default_max_concurrency() -> u32 {
    4
}
fn default_min_confidence() -> f64 {
    0.8
}

/// `[[connectors]]` entry: a connector spec plus how to instantiate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorDecl {
    #[serde(flatten)]
    pub spec: ConnectorSpec,

    /// Built-in implementation to wire up (`fixture` or `static`).
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Fixture file for `fixture` connectors, relative to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Keep only fixture candidates that share a token with the query.
    #[serde(default)]
    pub match_query: bool,
}

fn default_kind() -> String {
    "fixture".into()
}

// ---------------------------------------------------------------------------
// Orchestrator config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime orchestrator configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum concurrent connector executions.
    pub max_concurrency: usize,
    /// Confidence goal applied when a `RESOLVE_ONE` request has none.
    pub default_min_confidence: f64,
    /// Budget applied when a request has none.
    pub default_budget_usd: Option<f64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_concurrency: config.orchestrator.max_concurrency.max(1) as usize,
            default_min_confidence: config.orchestrator.default_min_confidence,
            default_budget_usd: config.orchestrator.default_budget_usd,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.ingestkit/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| IngestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.ingestkit/ingestkit.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| IngestError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        IngestError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a starter config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| IngestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&starter_config())
        .map_err(|e| IngestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| IngestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    for (relative, fixture) in starter_fixtures() {
        let fixture_path = dir.join(relative);
        if fixture_path.exists() {
            continue;
        }
        if let Some(parent) = fixture_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
        }
        let body = serde_json::to_string_pretty(&fixture)?;
        std::fs::write(&fixture_path, body).map_err(|e| IngestError::io(&fixture_path, e))?;
        tracing::debug!(path = ?fixture_path, "wrote starter fixture");
    }

    Ok(path)
}

/// Fixture files referenced by [`starter_config`], keyed by relative path.
pub fn starter_fixtures() -> Vec<(&'static str, serde_json::Value)> {
    use serde_json::json;

    vec![
        (
            "fixtures/search_listing.json",
            json!({
                "candidates": [
                    {
                        "name": "Leeds Padel Club",
                        "identifiers": {"osm": "node/4815162342"},
                        "latitude": 53.7997,
                        "longitude": -1.5492,
                        "confidence": 0.6
                    },
                    {
                        "name": "Leeds Padel Club",
                        "identifiers": {"osm": "node/4815162342"},
                        "confidence": 0.55
                    },
                    {
                        "name": "Roundhay Padel",
                        "latitude": 53.8392,
                        "longitude": -1.4989,
                        "confidence": 0.5
                    },
                    {
                        "name": "Kirkstall Coffee House",
                        "attributes": {"category": "cafe"}
                    }
                ],
                "cost_usd": 0.08
            }),
        ),
        (
            "fixtures/places_registry.json",
            json!({
                "fields": {
                    "phone": "+44 113 496 0000",
                    "website": "https://leedspadel.example",
                    "tags": ["padel", "indoor"]
                },
                "evidence": [
                    {"field": "phone", "value": "+44 113 496 0000", "locator": "registry:record/88"}
                ],
                "confidence": 0.9
            }),
        ),
    ]
}

/// A config with one example fixture connector per phase.
pub fn starter_config() -> AppConfig {
    let decl = |spec: ConnectorSpec, path: &str| ConnectorDecl {
        spec,
        kind: default_kind(),
        path: Some(path.into()),
        match_query: true,
    };

    AppConfig {
        orchestrator: OrchestratorSection::default(),
        connectors: vec![
            decl(
                ConnectorSpec::new("search_listing", Phase::Discovery)
                    .trust(5)
                    .provides(["candidates"])
                    .query_only()
                    .cost(0.1),
                "fixtures/search_listing.json",
            ),
            decl(
                ConnectorSpec::new("places_registry", Phase::Structured)
                    .trust(9)
                    .requires(["candidates"])
                    .provides(["fields.phone", "fields.website"])
                    .cost(0.2),
                "fixtures/places_registry.json",
            ),
        ],
    }
}

/// Structural checks that do not need the plan builder.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.orchestrator.max_concurrency == 0 {
        return Err(IngestError::config("orchestrator.max_concurrency must be at least 1"));
    }
    let min = config.orchestrator.default_min_confidence;
    if !(0.0..=1.0).contains(&min) {
        return Err(IngestError::config(format!(
            "orchestrator.default_min_confidence must be within [0, 1], got {min}"
        )));
    }
    for decl in &config.connectors {
        if decl.spec.name.trim().is_empty() {
            return Err(IngestError::config("connector declared with an empty name"));
        }
        if decl.spec.estimated_cost_usd < 0.0 {
            return Err(IngestError::config(format!(
                "connector '{}' has a negative estimated cost",
                decl.spec.name
            )));
        }
    }
    Ok(())
}
