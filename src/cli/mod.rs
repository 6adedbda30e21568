//! CLI module for Fanout
//!
//! Provides commands for working with fan-out definitions:
//! - `validate`: Load a definition and report problems
//! - `plan`: Show the execution units a request would fan out to
//! - `tools`: Print the tool schemas a definition exposes

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fanout_core::{FanoutConfig, UnitSelector};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

use crate::loader::load_definition;

/// Fanout CLI
#[derive(Parser, Debug)]
#[command(name = "fanout")]
#[command(about = "Parallel sub-session orchestration")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check a fan-out definition
    Validate {
        /// Definition file (JSON)
        file: PathBuf,
    },
    /// Show the units a request would fan out to
    Plan {
        /// Definition file (JSON)
        file: PathBuf,
        /// Request arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Print the fan-out and result tool schemas
    Tools {
        /// Definition file (JSON)
        file: PathBuf,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Validate { file }) => {
            let definition = load_definition(&file)?;
            println!("{}", describe(&definition));
            Ok(())
        }
        Some(Commands::Plan { file, args }) => {
            let definition = load_definition(&file)?;
            let args = parse_args(&args)?;
            println!("{}", serde_json::to_string_pretty(&plan(&definition, &args)?)?);
            Ok(())
        }
        Some(Commands::Tools { file }) => {
            let definition = load_definition(&file)?;
            println!("{}", serde_json::to_string_pretty(&tools(&definition))?);
            Ok(())
        }
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn describe(definition: &FanoutConfig) -> String {
    let exec = &definition.execution;
    format!(
        "OK: `{}` ({:?}, {:?}, max {} concurrent, {} ms per session, result tool `{}`)",
        definition.tool.name,
        exec.execution_type,
        exec.result_strategy,
        exec.max_concurrency,
        exec.session_timeout_ms,
        definition.result_tool.name
    )
}

fn parse_args(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("--args is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--args must be a JSON object, got {other}"),
    }
}

fn plan(definition: &FanoutConfig, args: &Map<String, Value>) -> Result<Value> {
    let units = UnitSelector::new(definition).select(args)?;
    let prompts: Vec<Value> = units
        .iter()
        .enumerate()
        .map(|(index, unit)| {
            json!({
                "index": index,
                "name": unit.name,
                "value": unit.value,
                "context": unit.template_context(args),
            })
        })
        .collect();

    Ok(json!({
        "tool": definition.tool.name,
        "execution_type": definition.execution.execution_type,
        "max_concurrency": definition.execution.max_concurrency,
        "units": prompts,
    }))
}

fn tools(definition: &FanoutConfig) -> Value {
    let schema = |spec: &fanout_core::ToolSpec| {
        let def = spec.to_definition();
        json!({
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        })
    };
    json!({
        "fanout_tool": schema(&definition.tool),
        "result_tool": schema(&definition.result_tool),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> FanoutConfig {
        FanoutConfig::from_json_str(
            r#"{
                "tool": {
                    "name": "review_files",
                    "description": "Review files",
                    "parameters": [
                        {"name": "files", "type": "array", "required": true},
                        {"name": "focus", "type": "string"}
                    ]
                },
                "execution": {"execution_type": "list_based", "max_concurrency": 2},
                "prompt": {"template": "Review {{_Parameter.Value}}"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_cli_parses_plan() {
        let cli = Cli::parse_from(["fanout", "plan", "def.json", "--args", r#"{"files":[]}"#]);
        match cli.command {
            Some(Commands::Plan { file, args }) => {
                assert_eq!(file, PathBuf::from("def.json"));
                assert_eq!(args, r#"{"files":[]}"#);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_plan_lists_units_with_context() {
        let args = parse_args(r#"{"files": ["a.rs", "b.rs"], "focus": "safety"}"#).unwrap();
        let plan = plan(&definition(), &args).unwrap();

        assert_eq!(plan["execution_type"], "list_based");
        let units = plan["units"].as_array().unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[1]["value"], "b.rs");
        assert_eq!(units[1]["context"]["_Parameter"]["Name"], "files");
        assert_eq!(units[1]["context"]["focus"], "safety");
    }

    #[test]
    fn test_plan_surfaces_selection_errors() {
        let args = parse_args(r#"{"files": []}"#).unwrap();
        let err = plan(&definition(), &args).unwrap_err();
        assert!(err.to_string().contains("is empty"));
    }

    #[test]
    fn test_args_must_be_object() {
        assert!(parse_args("[1, 2]").is_err());
        assert!(parse_args("not json").is_err());
    }

    #[test]
    fn test_tools_schema() {
        let tools = tools(&definition());
        assert_eq!(tools["fanout_tool"]["name"], "review_files");
        assert_eq!(tools["fanout_tool"]["parameters"]["required"], json!(["files"]));
        assert_eq!(tools["result_tool"]["name"], "return_result");
    }

    #[test]
    fn test_describe() {
        let text = describe(&definition());
        assert!(text.starts_with("OK: `review_files`"));
        assert!(text.contains("ListBased"));
    }
}
