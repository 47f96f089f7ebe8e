//! Built-in connectors and registry wiring from config declarations.
//!
//! Real network connectors live outside this workspace; these two cover
//! offline runs, demos and tests.

mod fixed;
mod fixture;

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use ingestkit_core::{ConnectorOutput, ConnectorRegistry};
use ingestkit_shared::{ConnectorDecl, IngestError, Result};

pub use fixed::StaticConnector;
pub use fixture::FixtureConnector;

/// Wire every declaration to a built-in implementation by `kind`.
///
/// Relative fixture paths resolve against `base_dir` (the config file's
/// directory). `static` connectors read their optional file once, here;
/// `fixture` connectors read theirs on every call.
pub fn build_registry(decls: &[ConnectorDecl], base_dir: &Path) -> Result<ConnectorRegistry> {
    let mut registry = ConnectorRegistry::new();

    for decl in decls {
        let name = decl.spec.name.clone();
        let resolved = decl.path.as_deref().map(|p| base_dir.join(p));

        match decl.kind.as_str() {
            "fixture" => {
                let path = resolved.ok_or_else(|| {
                    IngestError::config(format!("fixture connector '{name}' has no path"))
                })?;
                debug!(connector = %name, path = %path.display(), "registering fixture connector");
                let connector = FixtureConnector::new(&name, path).match_query(decl.match_query);
                registry.register(name, Arc::new(connector))?;
            }
            "static" => {
                let output = match resolved {
                    Some(path) => {
                        let raw = std::fs::read_to_string(&path)
                            .map_err(|e| IngestError::io(&path, e))?;
                        serde_json::from_str::<ConnectorOutput>(&raw).map_err(|e| {
                            IngestError::config(format!(
                                "static connector '{name}': invalid output in {}: {e}",
                                path.display()
                            ))
                        })?
                    }
                    None => ConnectorOutput::default(),
                };
                debug!(connector = %name, "registering static connector");
                registry.register(name.clone(), Arc::new(StaticConnector::new(name, output)))?;
            }
            other => {
                return Err(IngestError::config(format!(
                    "connector '{name}' has unknown kind '{other}' (expected fixture or static)"
                )));
            }
        }
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestkit_shared::{ConnectorSpec, Phase};

    fn decl(name: &str, kind: &str, path: Option<&str>) -> ConnectorDecl {
        ConnectorDecl {
            spec: ConnectorSpec::new(name, Phase::Discovery).query_only(),
            kind: kind.into(),
            path: path.map(Into::into),
            match_query: false,
        }
    }

    #[test]
    fn wires_fixture_and_static_kinds() {
        let registry = build_registry(
            &[
                decl("listing", "fixture", Some("fixtures/listing.json")),
                decl("noop", "static", None),
            ],
            Path::new("/tmp"),
        )
        .unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["listing", "noop"]);
    }

    #[test]
    fn unknown_kind_is_config_error() {
        let err = build_registry(&[decl("web", "http", None)], Path::new(".")).unwrap_err();
        assert!(matches!(err, IngestError::Config { .. }));
        assert!(err.to_string().contains("unknown kind 'http'"));
    }

    #[test]
    fn fixture_without_path_is_config_error() {
        let err = build_registry(&[decl("listing", "fixture", None)], Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("has no path"));
    }

    #[test]
    fn duplicate_declaration_is_config_error() {
        let err = build_registry(
            &[decl("noop", "static", None), decl("noop", "static", None)],
            Path::new("."),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::Config { .. }));
    }

    #[test]
    fn static_reads_output_file_once() {
        let dir = std::env::temp_dir().join(format!("ik-static-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("out.json"), r#"{"seeds": ["https://example.org"]}"#).unwrap();

        let registry = build_registry(&[decl("seeded", "static", Some("out.json"))], &dir).unwrap();
        assert!(registry.contains("seeded"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
