use serde_json::{Map, Value};
use tracing::debug;

use super::types::ExecutionUnit;
use crate::config::{ExecutionType, FanoutConfig};
use crate::error::{Error, Result};

/// Turns a request's arguments into an ordered list of execution units
pub struct UnitSelector<'a> {
    config: &'a FanoutConfig,
}

impl<'a> UnitSelector<'a> {
    /// Create a selector for one fan-out definition
    pub fn new(config: &'a FanoutConfig) -> Self {
        Self { config }
    }

    /// Select units for `args` according to the configured execution type
    pub fn select(&self, args: &Map<String, Value>) -> Result<Vec<ExecutionUnit>> {
        let units = match self.config.execution.execution_type {
            ExecutionType::None => vec![ExecutionUnit::new(
                self.config.tool.name.clone(),
                Value::Object(args.clone()),
            )],
            ExecutionType::ParameterBased => self.parameter_units(args)?,
            ExecutionType::ListBased => self.list_units(args)?,
            ExecutionType::ExternalList => self.external_units()?,
        };

        debug!(
            execution_type = ?self.config.execution.execution_type,
            units = units.len(),
            "Selected execution units"
        );
        Ok(units)
    }

    fn parameter_units(&self, args: &Map<String, Value>) -> Result<Vec<ExecutionUnit>> {
        let excluded = &self.config.execution.excluded_parameters;
        let declared = &self.config.tool.parameters;

        let units: Vec<ExecutionUnit> = if declared.is_empty() {
            args.iter()
                .filter(|(name, _)| !excluded.contains(*name))
                .map(|(name, value)| ExecutionUnit::new(name.clone(), value.clone()))
                .collect()
        } else {
            declared
                .iter()
                .filter(|p| !excluded.contains(&p.name))
                .filter_map(|p| {
                    args.get(&p.name)
                        .map(|value| ExecutionUnit::new(p.name.clone(), value.clone()))
                })
                .collect()
        };

        if units.is_empty() {
            return Err(Error::Configuration(
                "parameter_based execution found no eligible parameters in the request".into(),
            ));
        }
        Ok(units)
    }

    fn list_units(&self, args: &Map<String, Value>) -> Result<Vec<ExecutionUnit>> {
        let name = self.config.detect_list_parameter().ok_or_else(|| {
            Error::Configuration("list_based execution has no list parameter".into())
        })?;

        let raw = args.get(name).ok_or_else(|| {
            Error::Configuration(format!("list parameter '{name}' was not supplied"))
        })?;

        let items = match raw {
            Value::Array(items) => items.clone(),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Array(items)) => items,
                _ => {
                    return Err(Error::Configuration(format!(
                        "list parameter '{name}' must be an array"
                    )))
                }
            },
            _ => {
                return Err(Error::Configuration(format!(
                    "list parameter '{name}' must be an array"
                )))
            }
        };

        if items.is_empty() {
            return Err(Error::Configuration(format!(
                "list parameter '{name}' is empty"
            )));
        }

        Ok(items
            .into_iter()
            .map(|item| ExecutionUnit::new(name, item))
            .collect())
    }

    fn external_units(&self) -> Result<Vec<ExecutionUnit>> {
        let exec = &self.config.execution;
        if exec.external_list.is_empty() {
            return Err(Error::Configuration(
                "external_list must not be empty for external_list execution".into(),
            ));
        }
        Ok(exec
            .external_list
            .iter()
            .map(|entry| {
                ExecutionUnit::new(exec.external_list_label.clone(), Value::from(entry.clone()))
            })
            .collect())
    }
}
