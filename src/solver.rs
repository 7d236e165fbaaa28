//! Epoch loop with periodic evaluation and keep-the-best checkpointing.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{
    checkpoint::{self, CheckpointError, OptimizerState, TrainerState},
    config::{ConfigError, SolverConfig},
    datasets::DatasetError,
};

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("validation set is empty")]
    EmptyValidationSet,
    #[error("label {label} out of range for {classes} classes")]
    LabelOutOfRange { label: usize, classes: usize },
    #[error("optimizer update failed: {0}")]
    Optimizer(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("learner failed: {0}")]
    Learner(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Summed loss and correct predictions over one evaluation batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchScore {
    pub loss_sum: f32,
    pub correct: usize,
    pub count: usize,
}

/// The model + optimizer pair the solver drives.
pub trait Learner {
    type Batch;

    /// One optimizer step; returns the batch loss.
    fn train_step(&mut self, batch: &Self::Batch) -> Result<f32, SolverError>;

    /// Forward pass without gradient tracking.
    fn eval_batch(&mut self, batch: &Self::Batch) -> Result<BatchScore, SolverError>;

    fn optimizer_state(&self) -> OptimizerState;

    fn save(&self, path: &Path, state: &TrainerState) -> Result<(), CheckpointError>;

    fn load(&mut self, path: &Path) -> Result<TrainerState, CheckpointError>;
}

pub trait BatchLoader {
    type Batch;

    fn num_examples(&self) -> usize;

    fn batch_size(&self) -> usize;

    fn num_batches(&self) -> usize {
        let bs = self.batch_size().max(1);
        (self.num_examples() + bs - 1) / bs
    }

    /// One pass over the data.
    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Self::Batch, DatasetError>> + '_>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub best_accuracy: f32,
    /// Completed optimizer steps, including any resumed ones.
    pub iterations: usize,
    pub saved: Vec<PathBuf>,
}

pub struct Solver<L, T, V> {
    learner: L,
    train_loader: T,
    val_loader: V,
    config: SolverConfig,
    ckp_dir: PathBuf,
    iteration: usize,
}

impl<L, T, V> Solver<L, T, V>
where
    L: Learner,
    T: BatchLoader<Batch = L::Batch>,
    V: BatchLoader<Batch = L::Batch>,
{
    pub fn new(
        mut learner: L,
        train_loader: T,
        val_loader: V,
        config: SolverConfig,
    ) -> Result<Self, SolverError> {
        config.validate()?;
        let ckp_dir = checkpoint::ensure_dir(&config.ckp_dir, &config.name)?;
        let iteration = config.resume_iter;

        if iteration != 0 {
            let path = checkpoint::checkpoint_path(&ckp_dir, iteration);
            checkpoint::require(&path)?;
            let state = learner.load(&path)?;
            if state.iteration != iteration {
                warn!(
                    "checkpoint {} records iteration {}, resuming at {}",
                    path.display(),
                    state.iteration,
                    iteration
                );
            }
            info!("model loaded from {}", path.display());
        }

        Ok(Self {
            learner,
            train_loader,
            val_loader,
            config,
            ckp_dir,
            iteration,
        })
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.ckp_dir
    }

    pub fn learner(&self) -> &L {
        &self.learner
    }

    pub fn into_learner(self) -> L {
        self.learner
    }

    pub fn train(&mut self) -> Result<TrainReport, SolverError> {
        let mut saved = Vec::new();
        let mut best_acc = 0.0;
        if self.iteration > 0 {
            best_acc = self.eval()?;
        }

        let total = self.train_loader.num_examples();
        let num_batches = self.train_loader.num_batches().max(1);
        let batch_size = self.train_loader.batch_size();

        for ep in 0..self.config.epochs {
            for (batch_idx, batch) in self.train_loader.batches().enumerate() {
                let batch = batch?;
                let loss = self.learner.train_step(&batch)?;

                if self.iteration % self.config.log_interval == 0 && self.iteration > 0 {
                    info!(
                        "Train Epoch: {} [{}/{} ({:.0}%)]\tIteration: {}\tLoss: {:.6}",
                        ep,
                        batch_idx * batch_size,
                        total,
                        100.0 * batch_idx as f32 / num_batches as f32,
                        self.iteration,
                        loss
                    );
                }

                if self.iteration % self.config.save_interval == 0 && self.iteration > 0 {
                    let acc = evaluate(&mut self.learner, &mut self.val_loader)?;
                    if acc > best_acc {
                        best_acc = acc;
                        saved.push(save_checkpoint(
                            &self.learner,
                            &self.ckp_dir,
                            self.iteration + 1,
                            best_acc,
                        )?);
                    }
                }

                self.iteration += 1;
            }
        }

        let acc = self.eval()?;
        if acc > best_acc {
            best_acc = acc;
            saved.push(save_checkpoint(
                &self.learner,
                &self.ckp_dir,
                self.iteration,
                best_acc,
            )?);
        }

        Ok(TrainReport {
            best_accuracy: best_acc,
            iterations: self.iteration,
            saved,
        })
    }

    /// Validation accuracy in `[0, 1]`.
    pub fn eval(&mut self) -> Result<f32, SolverError> {
        evaluate(&mut self.learner, &mut self.val_loader)
    }
}

fn evaluate<L, V>(learner: &mut L, val_loader: &mut V) -> Result<f32, SolverError>
where
    L: Learner,
    V: BatchLoader<Batch = L::Batch>,
{
    let total = val_loader.num_examples();
    if total == 0 {
        return Err(SolverError::EmptyValidationSet);
    }

    let pb = indicatif::ProgressBar::new(val_loader.num_batches() as u64);
    let mut score = BatchScore::default();
    for batch in val_loader.batches() {
        let s = learner.eval_batch(&batch?)?;
        score.loss_sum += s.loss_sum;
        score.correct += s.correct;
        score.count += s.count;
        pb.inc(1);
    }
    pb.finish_and_clear();

    let acc = score.correct as f32 / total as f32;
    info!(
        "Val set: Average loss: {:.4}, Accuracy: {}/{} ({:.0}%)",
        score.loss_sum / total as f32,
        score.correct,
        total,
        100.0 * acc
    );
    Ok(acc)
}

fn save_checkpoint<L: Learner>(
    learner: &L,
    dir: &Path,
    step: usize,
    best_accuracy: f32,
) -> Result<PathBuf, SolverError> {
    let path = checkpoint::checkpoint_path(dir, step);
    let state = TrainerState {
        iteration: step,
        best_accuracy,
        optimizer: learner.optimizer_state(),
    };
    learner.save(&path, &state)?;
    info!("model saved to {}", path.display());
    Ok(path)
}
