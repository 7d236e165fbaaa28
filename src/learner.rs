use std::{fs::File, io::Write, path::Path};

use dfdx::{
    nn::{LoadFromNpz, SaveToNpz},
    optim::{Adam, AdamConfig, Optimizer},
    prelude::*,
    tensor::Gradients,
};
use zip::{write::FileOptions, ZipArchive, ZipWriter};

use crate::{
    checkpoint::{self, CheckpointError, OptimizerState, TrainerState, STATE_ENTRY},
    datasets::ImageBatch,
    model::{Classifier, Dev, Dtype, SmallResnet, NUM_CLASSES},
    solver::{BatchScore, Learner, SolverError},
};

/// [Classifier] trained with Adam on one-hot cross entropy.
pub struct DfdxLearner {
    dev: Dev,
    model: Classifier,
    grads: Option<Gradients<Dtype, Dev>>,
    opt: Adam<Classifier, Dtype, Dev>,
    cfg: AdamConfig,
}

impl DfdxLearner {
    pub fn new(dev: Dev, lr: f64) -> Self {
        let model = dev.build_module::<SmallResnet<NUM_CLASSES>, Dtype>();
        let grads = model.alloc_grads();
        let cfg = AdamConfig {
            lr,
            ..Default::default()
        };
        let opt = Adam::new(&model, cfg);
        Self {
            dev,
            model,
            grads: Some(grads),
            opt,
            cfg,
        }
    }

    pub fn model(&self) -> &Classifier {
        &self.model
    }

    fn one_hot(
        &self,
        labels: &[usize],
    ) -> Result<Tensor<(usize, Const<NUM_CLASSES>), Dtype, Dev>, SolverError> {
        let mut data = vec![0.0; labels.len() * NUM_CLASSES];
        for (i, &lbl) in labels.iter().enumerate() {
            if lbl >= NUM_CLASSES {
                return Err(SolverError::LabelOutOfRange {
                    label: lbl,
                    classes: NUM_CLASSES,
                });
            }
            data[i * NUM_CLASSES + lbl] = 1.0;
        }
        Ok(self
            .dev
            .tensor_from_vec(data, (labels.len(), Const::<NUM_CLASSES>)))
    }
}

impl Learner for DfdxLearner {
    type Batch = ImageBatch;

    fn train_step(&mut self, batch: &ImageBatch) -> Result<f32, SolverError> {
        let targets = self.one_hot(&batch.labels)?;
        let grads = match self.grads.take() {
            Some(grads) => grads,
            None => self.model.alloc_grads(),
        };

        let logits = self.model.forward_mut(batch.images.clone().traced(grads));
        let loss = cross_entropy_with_logits_loss(logits, targets);
        let loss_val = loss.array();

        let mut grads = loss.backward();
        self.opt
            .update(&mut self.model, &grads)
            .map_err(|e| SolverError::Optimizer(Box::new(e)))?;
        self.model.zero_grads(&mut grads);
        self.grads = Some(grads);
        Ok(loss_val)
    }

    fn eval_batch(&mut self, batch: &ImageBatch) -> Result<BatchScore, SolverError> {
        let n = batch.labels.len();
        let targets = self.one_hot(&batch.labels)?;
        let logits = self.model.forward(batch.images.clone());
        let scores = logits.as_vec();
        let loss = cross_entropy_with_logits_loss(logits, targets).array();

        let correct = scores
            .chunks(NUM_CLASSES)
            .zip(&batch.labels)
            .filter(|(row, lbl)| argmax(row) == **lbl)
            .count();
        Ok(BatchScore {
            loss_sum: loss * n as f32,
            correct,
            count: n,
        })
    }

    fn optimizer_state(&self) -> OptimizerState {
        OptimizerState {
            lr: self.cfg.lr,
            betas: self.cfg.betas,
            eps: self.cfg.eps,
        }
    }

    fn save(&self, path: &Path, state: &TrainerState) -> Result<(), CheckpointError> {
        checkpoint::write_atomically(path, |file| {
            let mut zip = ZipWriter::new(file);
            self.model.write(&mut zip)?;
            zip.start_file(STATE_ENTRY, FileOptions::default())?;
            zip.write_all(&serde_json::to_vec_pretty(state)?)?;
            zip.finish()?.sync_all()?;
            Ok(())
        })
    }

    fn load(&mut self, path: &Path) -> Result<TrainerState, CheckpointError> {
        let mut archive = ZipArchive::new(File::open(path)?)?;
        self.model
            .read(&mut archive)
            .map_err(|e| CheckpointError::Npz(Box::new(e)))?;
        let state: TrainerState = serde_json::from_reader(archive.by_name(STATE_ENTRY)?)?;

        self.cfg.lr = state.optimizer.lr;
        self.cfg.betas = state.optimizer.betas;
        self.cfg.eps = state.optimizer.eps;
        // moment estimates are not part of the archive and restart here
        self.opt = Adam::new(&self.model, self.cfg);
        Ok(state)
    }
}

fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        })
        .0
}
