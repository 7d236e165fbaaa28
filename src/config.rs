use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("experiment name must not be empty")]
    EmptyName,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub epochs: usize,
    /// Completed steps of the checkpoint to resume from; 0 starts fresh.
    pub resume_iter: usize,
    pub name: String,
    pub ckp_dir: PathBuf,
    pub log_interval: usize,
    pub save_interval: usize,
    pub batch_size: usize,
    pub lr: f64,
    pub seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            resume_iter: 0,
            name: "default".to_string(),
            ckp_dir: PathBuf::from("checkpoints"),
            log_interval: 10,
            save_interval: 500,
            batch_size: 32,
            lr: 1e-5,
            seed: 0,
        }
    }
}

impl SolverConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_interval == 0 {
            return Err(ConfigError::NotPositive("log_interval"));
        }
        if self.save_interval == 0 {
            return Err(ConfigError::NotPositive("save_interval"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::NotPositive("batch_size"));
        }
        if self.lr.is_nan() || self.lr <= 0.0 {
            return Err(ConfigError::NotPositive("lr"));
        }
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        Ok(())
    }

    /// `<ckp_dir>/<name>`
    pub fn experiment_dir(&self) -> PathBuf {
        self.ckp_dir.join(&self.name)
    }
}
