//! Boundary to the external analysis package. Results are exchanged as a
//! JSON file, `<method>_results.json`, in the processing output directory.

use crate::MscopeError;
use crate::config::MscopeConfig;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Command;

pub const PARAMS_FILE: &str = "params.json";

pub type Image = Vec<Vec<f64>>;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AnalysisResult {
    /// Local time the analysis finished, `YYYY-MM-DD HH:MM:SS`.
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub package_version: String,
    #[serde(default)]
    pub motion_correction: Option<MotionCorrectionResult>,
    #[serde(default)]
    pub masks: Vec<MaskResult>,
    #[serde(default)]
    pub fluorescence: Vec<TraceResult>,
    /// extraction_method -> traces.
    #[serde(default)]
    pub activity: BTreeMap<String, Vec<ActivityResult>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MotionCorrectionResult {
    #[serde(default)]
    pub channel: i64,
    pub x_shifts: Vec<f64>,
    pub y_shifts: Vec<f64>,
    #[serde(default)]
    pub outlier_frames: Option<Vec<i64>>,
    #[serde(default)]
    pub ref_image: Option<Image>,
    #[serde(default)]
    pub average_image: Option<Image>,
    #[serde(default)]
    pub correlation_image: Option<Image>,
    #[serde(default)]
    pub max_proj_image: Option<Image>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MaskResult {
    pub mask_id: i64,
    #[serde(default)]
    pub channel: i64,
    pub xpix: Vec<i64>,
    pub ypix: Vec<i64>,
    #[serde(default)]
    pub weights: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TraceResult {
    pub mask_id: i64,
    #[serde(default)]
    pub channel: i64,
    pub trace: Vec<f64>,
    #[serde(default)]
    pub neuropil: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ActivityResult {
    pub mask_id: i64,
    #[serde(default)]
    pub channel: i64,
    pub trace: Vec<f64>,
}

/// What the external analysis needs to run one processing task.
#[derive(Debug)]
pub struct TriggerRequest<'a> {
    pub method: &'a str,
    pub params: &'a Value,
    pub raw_files: &'a [PathBuf],
    pub output_dir: &'a Path,
}

pub trait AnalysisLoader {
    /// Read finished results for `method` from `output_dir`.
    fn load(&self, method: &str, output_dir: &Path) -> Result<AnalysisResult, MscopeError>;

    /// Run the analysis; results land in `request.output_dir`.
    fn trigger(&self, request: &TriggerRequest<'_>) -> Result<(), MscopeError>;
}

pub fn results_path(output_dir: &Path, method: &str) -> PathBuf {
    output_dir.join(format!("{method}_results.json"))
}

/// Loads `<method>_results.json` and triggers analysis by running the
/// command configured under `[analysis.commands]`.
#[derive(Debug, Clone, Default)]
pub struct JsonResultLoader {
    commands: HashMap<String, Vec<String>>,
}

impl JsonResultLoader {
    pub fn new(commands: HashMap<String, Vec<String>>) -> Self {
        Self { commands }
    }

    pub fn from_config(config: &MscopeConfig) -> Self {
        Self::new(config.analysis.commands.clone())
    }
}

impl AnalysisLoader for JsonResultLoader {
    fn load(&self, method: &str, output_dir: &Path) -> Result<AnalysisResult, MscopeError> {
        let path = results_path(output_dir, method);
        if !path.is_file() {
            return Err(MscopeError::NotFound(format!(
                "{method} results: {}",
                path.display()
            )));
        }
        debug!("loading {}", path.display());
        let content = std::fs::read_to_string(&path)?;
        let result: AnalysisResult = serde_json::from_str(&content)
            .map_err(|e| MscopeError::Parse(format!("{}: {e}", path.display())))?;
        Ok(result)
    }

    fn trigger(&self, request: &TriggerRequest<'_>) -> Result<(), MscopeError> {
        let argv = self.commands.get(request.method).ok_or_else(|| {
            MscopeError::Config(format!(
                "no analysis command configured for {} ([analysis.commands])",
                request.method
            ))
        })?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| MscopeError::Config(format!("empty command for {}", request.method)))?;

        std::fs::create_dir_all(request.output_dir)?;
        std::fs::write(
            request.output_dir.join(PARAMS_FILE),
            serde_json::to_string_pretty(request.params)?,
        )?;

        info!(
            "running {} on {} file(s) -> {}",
            request.method,
            request.raw_files.len(),
            request.output_dir.display()
        );
        let output = Command::new(program)
            .args(args)
            .arg(request.output_dir)
            .args(request.raw_files)
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(MscopeError::External(format!(
                "{program} exited with {}: {}",
                output.status,
                tail.join(" | ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_results_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            results_path(dir.path(), "caiman"),
            json!({
                "creation_time": "2021-06-02 08:00:00",
                "package_version": "1.9.0",
                "motion_correction": {"x_shifts": [0.0, 1.0], "y_shifts": [0.5, 0.5]},
                "masks": [{"mask_id": 0, "xpix": [1, 2], "ypix": [3, 4], "weights": [0.5, 0.5]}],
                "fluorescence": [{"mask_id": 0, "trace": [1.0, 2.0]}],
                "activity": {"caiman_dff": [{"mask_id": 0, "trace": [0.1, 0.2]}]}
            })
            .to_string(),
        )
        .unwrap();

        let result = JsonResultLoader::default().load("caiman", dir.path()).unwrap();
        assert_eq!(result.package_version, "1.9.0");
        assert_eq!(result.masks.len(), 1);
        assert_eq!(result.fluorescence[0].neuropil, None);
        assert!(result.activity.contains_key("caiman_dff"));
        assert_eq!(result.motion_correction.unwrap().outlier_frames, None);
    }

    #[test]
    fn missing_results_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = JsonResultLoader::default().load("caiman", dir.path());
        assert!(matches!(err, Err(MscopeError::NotFound(_))));
    }

    #[test]
    fn trigger_without_command_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = JsonResultLoader::default().trigger(&TriggerRequest {
            method: "caiman",
            params: &json!({}),
            raw_files: &[],
            output_dir: dir.path(),
        });
        assert!(matches!(err, Err(MscopeError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn trigger_runs_command_with_output_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("caiman");
        // The command writes a marker into its first argument.
        let commands = HashMap::from([(
            "caiman".to_string(),
            vec!["sh".into(), "-c".into(), "touch \"$0/done\"".into()],
        )]);
        let loader = JsonResultLoader::new(commands);
        loader
            .trigger(&TriggerRequest {
                method: "caiman",
                params: &json!({"fr": 30}),
                raw_files: &[],
                output_dir: &out,
            })
            .unwrap();
        assert!(out.join("done").exists());
        assert!(out.join(PARAMS_FILE).exists());
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_external_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let commands = HashMap::from([("caiman".to_string(), vec!["false".to_string()])]);
        let err = JsonResultLoader::new(commands).trigger(&TriggerRequest {
            method: "caiman",
            params: &json!({}),
            raw_files: &[],
            output_dir: dir.path(),
        });
        assert!(matches!(err, Err(MscopeError::External(_))));
    }
}
