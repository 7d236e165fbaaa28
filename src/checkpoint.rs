//! Checkpoint naming and the trainer state stored next to the model weights.
//!
//! A checkpoint is a single npz (zip) archive at `<dir>/model.npz-<step>`,
//! where `<step>` counts completed optimizer steps. Resuming with
//! `resume_iter = <step>` continues at exactly that iteration.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

pub const CHECKPOINT_STEM: &str = "model.npz";
/// Archive entry holding [TrainerState] as json.
pub const STATE_ENTRY: &str = "trainer.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub iteration: usize,
    pub best_accuracy: f32,
    pub optimizer: OptimizerState,
}

/// Adam hyperparameters; the moment buffers stay inside dfdx.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub lr: f64,
    pub betas: [f64; 2],
    pub eps: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint {0} does not exist")]
    Missing(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("model tensors: {0}")]
    Npz(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("trainer state: {0}")]
    State(#[from] serde_json::Error),
}

pub fn checkpoint_path<P: AsRef<Path>>(dir: P, step: usize) -> PathBuf {
    dir.as_ref().join(format!("{CHECKPOINT_STEM}-{step}"))
}

/// `<path>.partial`, the name a checkpoint is written under before it is
/// renamed into place.
pub fn partial_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut name = path.as_ref().as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Runs `write` on a fresh `<path>.partial` and renames it onto `path` once
/// `write` succeeds. On failure the partial file is removed and `path` is
/// left untouched.
pub fn write_atomically<P, F>(path: P, write: F) -> Result<(), CheckpointError>
where
    P: AsRef<Path>,
    F: FnOnce(File) -> Result<(), CheckpointError>,
{
    let path = path.as_ref();
    let partial = partial_path(path);
    let written = File::create(&partial)
        .map_err(CheckpointError::from)
        .and_then(write);
    match written {
        Ok(()) => {
            fs::rename(&partial, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

/// Creates `<ckp_dir>/<name>` and returns it.
pub fn ensure_dir<P: AsRef<Path>>(ckp_dir: P, name: &str) -> Result<PathBuf, CheckpointError> {
    let dir = ckp_dir.as_ref().join(name);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Highest step with a checkpoint in `dir`, if any.
pub fn latest_step<P: AsRef<Path>>(dir: P) -> Result<Option<usize>, CheckpointError> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(None);
    }
    let prefix = format!("{CHECKPOINT_STEM}-");
    let mut latest = None;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let step = name
            .to_str()
            .and_then(|n| n.strip_prefix(&prefix))
            .and_then(|s| s.parse::<usize>().ok());
        if let Some(step) = step {
            latest = latest.max(Some(step));
        }
    }
    Ok(latest)
}

/// Fails with [CheckpointError::Missing] rather than a bare io error.
pub fn require<P: AsRef<Path>>(path: P) -> Result<(), CheckpointError> {
    let path = path.as_ref();
    if path.is_file() {
        Ok(())
    } else {
        Err(CheckpointError::Missing(path.to_path_buf()))
    }
}
