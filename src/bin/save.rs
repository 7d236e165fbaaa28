use std::path::PathBuf;

use clap::Parser;
use mini_imagenet_solver::datasets::{DatasetSplit, MiniImagenet, Transform};
use rand::prelude::*;
use tracing::info;

/// Writes the first samples of a split as they come out of the augmentation
/// pipeline, before tensor conversion.
#[derive(Parser, Debug)]
#[command(name = "save")]
struct SaveArgs {
    #[arg(long, default_value = "hw4_data")]
    data_root: PathBuf,
    #[arg(long, default_value = "train")]
    split: DatasetSplit,
    #[arg(long, default_value_t = 10)]
    count: usize,
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    #[arg(long, default_value_t = false)]
    aug: bool,
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();
    let args = SaveArgs::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let dataset = MiniImagenet::new(&args.data_root, args.split)?;
    let transform = Transform::new(args.aug);
    std::fs::create_dir_all(&args.out_dir)?;

    for i in 0..args.count.min(dataset.len()) {
        let (img, lbl) = dataset.get(i)?;
        let img = transform.augment(&img, &mut rng);
        let name = dataset.label_name(lbl).unwrap_or("unknown");
        let path = args.out_dir.join(format!("img-{i}-{name}.png"));
        img.save(&path)?;
        info!("wrote {}", path.display());
    }
    Ok(())
}
