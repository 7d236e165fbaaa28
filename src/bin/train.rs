use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use mini_imagenet_solver::{
    checkpoint,
    datasets::{train_val_sets, DatasetSplit, ImageLoader, Transform, ValidationSource},
    model::{Dev, NUM_CLASSES},
    DfdxLearner, Solver, SolverConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the residual classifier on mini-Imagenet")]
struct TrainArgs {
    /// Directory holding train.csv, val.csv and their image folders.
    #[arg(long, default_value = "hw4_data")]
    data_root: PathBuf,
    /// Validate on a csv split instead of held-out train rows. Its labels
    /// must all be train classes, which mini-Imagenet's own val split is not.
    #[arg(long)]
    val_split: Option<DatasetSplit>,
    /// Fraction of every train class held out for validation.
    #[arg(long, default_value_t = 0.1, conflicts_with = "val_split")]
    val_fraction: f64,
    /// Json file with a base solver config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Experiment name, checkpoints go to <ckp-dir>/<name>.
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    ckp_dir: Option<PathBuf>,
    #[arg(long)]
    epochs: Option<usize>,
    /// Resume from <ckp-dir>/<name>/model.npz-<resume-iter>.
    #[arg(long)]
    resume_iter: Option<usize>,
    /// Resume from the highest-numbered checkpoint of the experiment.
    #[arg(long, default_value_t = false, conflicts_with = "resume_iter")]
    resume_latest: bool,
    #[arg(long)]
    log_interval: Option<usize>,
    #[arg(long)]
    save_interval: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    lr: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
    /// Disable color jitter, flips and rotations on the train split.
    #[arg(long, default_value_t = false)]
    no_aug: bool,
}

impl TrainArgs {
    fn validation_source(&self, seed: u64) -> ValidationSource {
        match self.val_split {
            Some(split) => ValidationSource::Split(split),
            None => ValidationSource::HeldOut {
                fraction: self.val_fraction,
                seed,
            },
        }
    }

    fn solver_config(&self) -> anyhow::Result<SolverConfig> {
        let mut cfg = match &self.config {
            Some(path) => SolverConfig::from_json_file(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => SolverConfig::default(),
        };
        if let Some(name) = &self.name {
            cfg.name = name.clone();
        }
        if let Some(dir) = &self.ckp_dir {
            cfg.ckp_dir = dir.clone();
        }
        cfg.epochs = self.epochs.unwrap_or(cfg.epochs);
        cfg.resume_iter = self.resume_iter.unwrap_or(cfg.resume_iter);
        cfg.log_interval = self.log_interval.unwrap_or(cfg.log_interval);
        cfg.save_interval = self.save_interval.unwrap_or(cfg.save_interval);
        cfg.batch_size = self.batch_size.unwrap_or(cfg.batch_size);
        cfg.lr = self.lr.unwrap_or(cfg.lr);
        cfg.seed = self.seed.unwrap_or(cfg.seed);
        if self.resume_latest {
            cfg.resume_iter = checkpoint::latest_step(cfg.experiment_dir())?.unwrap_or(0);
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = TrainArgs::parse();
    let cfg = args.solver_config()?;
    let dev = Dev::seed_from_u64(cfg.seed);

    let source = args.validation_source(cfg.seed);
    let (train_set, val_set) = train_val_sets(&args.data_root, source)
        .with_context(|| format!("loading {source:?} from {}", args.data_root.display()))?;
    if train_set.num_classes() > NUM_CLASSES {
        anyhow::bail!(
            "train split has {} classes but the classifier has {NUM_CLASSES} outputs",
            train_set.num_classes()
        );
    }
    info!(
        "train: {} images / {} classes, val: {} images",
        train_set.len(),
        train_set.num_classes(),
        val_set.len()
    );

    let train_loader = ImageLoader::new(
        dev.clone(),
        train_set,
        Transform::new(!args.no_aug),
        cfg.batch_size,
    )
    .shuffled(cfg.seed)
    .with_progress();
    let val_loader = ImageLoader::new(dev.clone(), val_set, Transform::plain(), cfg.batch_size);

    let learner = DfdxLearner::new(dev, cfg.lr);
    let mut solver = Solver::new(learner, train_loader, val_loader, cfg)?;
    let report = solver.train()?;
    info!(
        "finished after {} iterations, best accuracy {:.4}, {} checkpoints written",
        report.iterations,
        report.best_accuracy,
        report.saved.len()
    );
    Ok(())
}
