use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use num::BigRational;
use pomdp_approx::{ApproximationChecker, CancellationToken, CheckError};
use pomdp_core::model::generator::random_pomdp;
use pomdp_core::{ModelError, Pomdp, PomdpFile, Property, Value};
use serde::Serialize;
use thiserror::Error;
use tracing::{Level, event};

use crate::config::{ModelSource, ResolvedOutputs, RunConfig, ValueType};

/// Runs one configured approximation and writes its artifacts.
pub struct ApproximationRunner {
    config: RunConfig,
    outputs: ResolvedOutputs,
}

/// Where the artifacts of a run went and what they say.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub record: ResultRecord,
    pub result_path: PathBuf,
    pub report_path: PathBuf,
}

/// Contents of the result JSON. Holds no timings, so equal configurations
/// produce byte-identical files.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub run_id: String,
    pub value_type: ValueType,
    pub property: Property,
    /// Bounds as printed by the value type (`"3/4"` for exact runs).
    pub lower_bound: String,
    pub upper_bound: String,
    pub lower_bound_approx: f64,
    pub upper_bound_approx: f64,
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refinement_steps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub over_approximation_states: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub under_approximation_states: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_resolution: Option<u64>,
}

impl ApproximationRunner {
    /// Build a runner from a validated configuration.
    pub fn new(config: RunConfig, outputs: ResolvedOutputs) -> Result<Self, RunnerError> {
        if let ModelSource::File { path } = &config.model {
            if !path.is_file() {
                return Err(RunnerError::MissingModel { path: path.clone() });
            }
        }
        Ok(Self { config, outputs })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Loads the model, bounds the property and writes the result JSON and
    /// the Markdown report. A cancelled run still writes both.
    pub fn run(&self, cancel: &CancellationToken) -> Result<RunSummary, RunnerError> {
        ensure_parent(self.outputs.result_json.parent())?;
        ensure_parent(self.outputs.report_md.parent())?;

        let (record, report) = match self.config.value_type {
            ValueType::Float => self.approximate::<f64>(cancel)?,
            ValueType::Exact => self.approximate::<BigRational>(cancel)?,
        };

        let mut writer = BufWriter::new(File::create(&self.outputs.result_json)?);
        serde_json::to_writer_pretty(&mut writer, &record)?;
        writeln!(writer)?;
        writer.flush()?;

        fs::write(&self.outputs.report_md, render_markdown(&record, &report))?;

        Ok(RunSummary {
            record,
            result_path: self.outputs.result_json.clone(),
            report_path: self.outputs.report_md.clone(),
        })
    }

    fn approximate<V: Value>(&self, cancel: &CancellationToken) -> Result<(ResultRecord, String), RunnerError> {
        let pomdp = self.load_model::<V>()?;
        event!(
            Level::INFO,
            run_id = %self.config.run_id,
            states = pomdp.num_states(),
            observations = pomdp.num_observations(),
            "model loaded"
        );

        let mut checker = ApproximationChecker::new(&pomdp, self.config.options.clone());
        let result = checker.check(&self.config.property, cancel)?;
        let statistics = checker.statistics();
        let record = ResultRecord {
            run_id: self.config.run_id.clone(),
            value_type: self.config.value_type,
            property: self.config.property.clone(),
            lower_bound: result.lower_bound.to_string(),
            upper_bound: result.upper_bound.to_string(),
            lower_bound_approx: result.lower_bound.to_f64(),
            upper_bound_approx: result.upper_bound.to_f64(),
            aborted: statistics.aborted,
            refinement_steps: statistics.refinement_steps,
            over_approximation_states: statistics.over_approximation.states,
            under_approximation_states: statistics.under_approximation.states,
            max_resolution: statistics.over_approximation.max_resolution,
        };
        Ok((record, checker.statistics_report().to_string()))
    }

    fn load_model<V: Value>(&self) -> Result<Pomdp<V>, RunnerError> {
        let precision = self.config.options.numeric_precision;
        match &self.config.model {
            ModelSource::Synthetic { params } => Ok(random_pomdp(*params)),
            ModelSource::File { path } => {
                let file = File::open(path).map_err(|source| RunnerError::ModelRead {
                    path: path.clone(),
                    source,
                })?;
                // YAML is a superset of JSON, so one parser reads both.
                let model: PomdpFile =
                    serde_yaml::from_reader(BufReader::new(file)).map_err(|source| RunnerError::ModelParse {
                        path: path.clone(),
                        source,
                    })?;
                let tolerance = if V::IS_EXACT { 0.0 } else { precision };
                model.into_pomdp(tolerance).map_err(|source| RunnerError::Model {
                    path: path.clone(),
                    source,
                })
            }
        }
    }
}

fn render_markdown(record: &ResultRecord, report: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Approximation run `{}`\n\n", record.run_id));
    out.push_str("| Bound | Value | Approx. |\n|---|---|---|\n");
    out.push_str(&format!(
        "| lower | {} | {:.6} |\n",
        record.lower_bound, record.lower_bound_approx
    ));
    out.push_str(&format!(
        "| upper | {} | {:.6} |\n\n",
        record.upper_bound, record.upper_bound_approx
    ));
    if record.aborted {
        out.push_str("The run was cancelled; the bounds are those known at that point.\n\n");
    }
    out.push_str("```text\n");
    out.push_str(report);
    out.push_str("\n```\n");
    out
}

fn ensure_parent(path: Option<&Path>) -> Result<(), RunnerError> {
    if let Some(dir) = path.filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("model file {path:?} does not exist")]
    MissingModel { path: PathBuf },
    #[error("failed to read model {path:?}: {source}")]
    ModelRead {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse model {path:?}: {source}")]
    ModelParse {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },
    #[error("invalid model {path:?}: {source}")]
    Model {
        #[source]
        source: ModelError,
        path: PathBuf,
    },
    #[error("approximation failed: {0}")]
    Check(#[from] CheckError),
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("failed to serialize result: {source}")]
    Serialize {
        #[from]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pomdp_core::OptimizationDirection;

    fn record(aborted: bool) -> ResultRecord {
        ResultRecord {
            run_id: "unit".to_string(),
            value_type: ValueType::Exact,
            property: Property::reachability(OptimizationDirection::Maximize, "goal"),
            lower_bound: "3/4".to_string(),
            upper_bound: "7/8".to_string(),
            lower_bound_approx: 0.75,
            upper_bound_approx: 0.875,
            aborted,
            refinement_steps: None,
            over_approximation_states: Some(7),
            under_approximation_states: Some(6),
            max_resolution: Some(2),
        }
    }

    #[test]
    fn markdown_lists_both_bounds_and_the_report() {
        let md = render_markdown(&record(false), "##### Grid Approximation Statistics ######");
        assert!(md.contains("| lower | 3/4 | 0.750000 |"));
        assert!(md.contains("| upper | 7/8 | 0.875000 |"));
        assert!(md.contains("##### Grid Approximation Statistics ######"));
        assert!(!md.contains("cancelled"));
        assert!(render_markdown(&record(true), "").contains("cancelled"));
    }

    #[test]
    fn result_json_skips_missing_statistics() {
        let json = serde_json::to_value(record(false)).expect("serialize");
        assert_eq!(json["value_type"], "exact");
        assert_eq!(json["property"]["kind"], "reachability");
        assert!(json.get("refinement_steps").is_none());
        assert_eq!(json["over_approximation_states"], 7);
    }
}
