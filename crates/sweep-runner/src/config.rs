use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Operator-edited options document, loaded once per run.
///
/// `options` maps each engine flag to its candidate values; the sweep runs
/// the engine once per combination. BTreeMap keeps the flag order stable, so
/// expansion order and result-store column order are reproducible for a
/// given option set.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    pub seconds_per_move: f64,
    pub results_file_format: ResultsFormat,
    pub options: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultsFormat {
    Xlsx,
    Csv,
}

impl ResultsFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ResultsFormat::Xlsx => "xlsx",
            ResultsFormat::Csv => "csv",
        }
    }
}

pub const OPTIONS_TEMPLATE: &str = r#"{
  "seconds_per_move": 5,
  "results_file_format": "xlsx",
  "options": {
    "backend": ["check"],
    "cpuct": [2.8, 3.0],
    "minibatch-size": [64, 128],
    "nncache": [1000000, 2000000],
    "threads": [2, 3],
    "multipv": [1]
  }
}
"#;

pub fn load_config(path: &Path) -> Result<SweepConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read options document {}", path.display()))?;
    let value: Value = serde_json::from_str(&data)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    // Check the required fields up front so the operator gets a specific
    // remediation message instead of a bare deserialization error.
    if value.get("seconds_per_move").is_none() {
        bail!("{} is missing the 'seconds_per_move' parameter", path.display());
    }
    if value.get("results_file_format").is_none() {
        bail!(
            "{} is missing the 'results_file_format' parameter - it must be one of: xlsx, csv",
            path.display()
        );
    }
    if value.get("options").is_none() {
        bail!(
            "{} is missing the 'options' object mapping engine flags to candidate values",
            path.display()
        );
    }

    let config: SweepConfig = serde_json::from_value(value).map_err(|e| {
        anyhow!(
            "{} is not set correctly ({}) - 'results_file_format' must be one of: xlsx, csv",
            path.display(),
            e
        )
    })?;
    config.validate()?;
    Ok(config)
}

/// Writes the options template for the operator to edit.
pub fn write_template(path: &Path) -> Result<()> {
    fs::write(path, OPTIONS_TEMPLATE)
        .with_context(|| format!("failed to write options template {}", path.display()))?;
    Ok(())
}

impl SweepConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.seconds_per_move > 0.0) {
            bail!(
                "'seconds_per_move' must be a positive number (got {})",
                self.seconds_per_move
            );
        }
        if self.options.is_empty() {
            bail!("the 'options' object is empty - add at least one engine flag with candidate values");
        }
        for (flag, values) in &self.options {
            if values.is_empty() {
                bail!(
                    "option '{}' has an empty candidate list - remove it or add at least one value",
                    flag
                );
            }
            for value in values {
                if !matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                    bail!(
                        "option '{}' has a non-scalar candidate value: {}",
                        flag,
                        value
                    );
                }
            }
        }
        Ok(())
    }

    /// Total number of configuration tasks the expander will produce.
    pub fn task_count(&self) -> usize {
        self.options.values().map(|v| v.len()).product()
    }
}
