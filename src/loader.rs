//! Definition loading
//!
//! Reads a fan-out definition file and layers environment overrides on top,
//! e.g. `FANOUT_EXECUTION__MAX_CONCURRENCY=8`.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use fanout_core::FanoutConfig;
use std::path::Path;
use tracing::info;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "FANOUT";

/// Load and validate a fan-out definition
pub fn load_definition(path: &Path) -> Result<FanoutConfig> {
    load_with_prefix(path, ENV_PREFIX)
}

fn load_with_prefix(path: &Path, prefix: &str) -> Result<FanoutConfig> {
    let settings = Config::builder()
        .add_source(File::from(path))
        // prefix_separator("_") keeps FANOUT_EXECUTION__X working; config-rs
        // would otherwise expect FANOUT__EXECUTION__X.
        .add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let definition: FanoutConfig = settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize {}", path.display()))?;

    definition
        .validate()
        .with_context(|| format!("Invalid fan-out definition in {}", path.display()))?;

    info!(
        tool = %definition.tool.name,
        execution_type = ?definition.execution.execution_type,
        "Loaded fan-out definition"
    );
    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::ExecutionType;
    use std::io::Write;
    use tokio_test::assert_ok;

    const DEFINITION: &str = r#"{
        "tool": {
            "name": "summarise_regions",
            "description": "Summarise every region",
            "parameters": [{"name": "period", "type": "string"}]
        },
        "execution": {
            "execution_type": "external_list",
            "external_list": ["us", "eu"],
            "external_list_label": "region"
        },
        "prompt": {"template": "Summarise {{_Parameter.Value}} for {{period}}"}
    }"#;

    fn write_definition(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_json_definition() {
        let file = write_definition(DEFINITION);
        let definition = assert_ok!(load_with_prefix(file.path(), "FANOUT_TEST_PLAIN"));

        assert_eq!(definition.tool.name, "summarise_regions");
        assert_eq!(definition.execution.execution_type, ExecutionType::ExternalList);
        assert_eq!(definition.execution.external_list, vec!["us", "eu"]);
        assert_eq!(definition.result_tool.name, "return_result");
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_definition(DEFINITION);
        std::env::set_var("FANOUT_TEST_ENV_EXECUTION__MAX_CONCURRENCY", "9");

        let definition = load_with_prefix(file.path(), "FANOUT_TEST_ENV").unwrap();
        std::env::remove_var("FANOUT_TEST_ENV_EXECUTION__MAX_CONCURRENCY");

        assert_eq!(definition.execution.max_concurrency, 9);
    }

    #[test]
    fn test_invalid_definition_rejected() {
        let file = write_definition(
            r#"{
                "tool": {"name": "t", "description": "", "parameters": []},
                "execution": {"execution_type": "external_list"},
                "prompt": {"template": "x"}
            }"#,
        );
        let err = load_with_prefix(file.path(), "FANOUT_TEST_INVALID").unwrap_err();
        assert!(format!("{err:#}").contains("external_list must not be empty"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_definition(Path::new("/nonexistent/fanout.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
