use crate::MscopeError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default, Clone)]
pub struct MscopeConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub custom: CustomConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    /// Names the default database file: `<prefix>mscope.db`.
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct CustomConfig {
    #[serde(default)]
    pub miniscope_root_data_dir: Vec<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessingConfig {
    #[serde(default = "default_output_subdir")]
    pub output_subdir: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            output_subdir: default_output_subdir(),
        }
    }
}

fn default_output_subdir() -> String {
    "caiman".into()
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AnalysisConfig {
    /// processing_method -> argv of the external analysis command.
    #[serde(default)]
    pub commands: HashMap<String, Vec<String>>,
}

/// Load config from an explicit path, MSCOPE_CONFIG, ~/.mscope/config.toml, or defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<MscopeConfig, MscopeError> {
    let path = explicit.map(Path::to_path_buf).or_else(config_path);
    match path {
        Some(p) if p.exists() => {
            let content = std::fs::read_to_string(&p)?;
            let config = parse_config(&content)
                .map_err(|e| MscopeError::Config(format!("{}: {e}", p.display())))?;
            Ok(config)
        }
        Some(p) if explicit.is_some() => Err(MscopeError::Config(format!(
            "config file not found: {}",
            p.display()
        ))),
        _ => Ok(MscopeConfig::default()),
    }
}

pub fn parse_config(content: &str) -> Result<MscopeConfig, MscopeError> {
    let config: MscopeConfig =
        toml::from_str(content).map_err(|e| MscopeError::Config(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MSCOPE_CONFIG") {
        return Some(PathBuf::from(p));
    }
    let home = std::env::var("HOME").ok()?;
    Some(Path::new(&home).join(".mscope").join("config.toml"))
}

fn validate_config(config: &MscopeConfig) -> Result<(), MscopeError> {
    for (i, root) in config.custom.miniscope_root_data_dir.iter().enumerate() {
        if root.as_os_str().is_empty() {
            return Err(MscopeError::Config(format!(
                "custom.miniscope_root_data_dir[{i}] is empty"
            )));
        }
    }
    for (method, argv) in &config.analysis.commands {
        if argv.is_empty() || argv[0].is_empty() {
            return Err(MscopeError::Config(format!(
                "analysis.commands.{method} must name a program"
            )));
        }
    }
    if config.processing.output_subdir.is_empty() {
        return Err(MscopeError::Config("processing.output_subdir is empty".into()));
    }
    Ok(())
}

pub fn default_db_path(config: &MscopeConfig) -> PathBuf {
    if let Some(p) = &config.database.path {
        return p.clone();
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".mscope")
        .join(format!("{}mscope.db", config.database.prefix))
}
