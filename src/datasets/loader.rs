use dfdx::{data::*, prelude::*};
use image::RgbImage;
use indicatif::ProgressBar;
use rand::{rngs::StdRng, SeedableRng};

use super::{errors::DatasetError, mini_imagenet::MiniImagenet, transforms::Transform};
use crate::model::{Dev, Dtype, ImageShape, IMG_SIZE};
use crate::solver::BatchLoader;

type Row = Result<(RgbImage, usize), DatasetError>;
type Sample = Result<(Tensor<Rank3<3, IMG_SIZE, IMG_SIZE>, Dtype, Dev>, usize), DatasetError>;

/// A stacked batch of normalized images with their class indices.
#[derive(Clone)]
pub struct ImageBatch {
    pub images: Tensor<ImageShape, Dtype, Dev>,
    pub labels: Vec<usize>,
}

impl ImageBatch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Yields [ImageBatch]es from a [MiniImagenet], keeping the final partial
/// batch.
pub struct ImageLoader {
    dataset: MiniImagenet,
    transform: Transform,
    batch_size: usize,
    shuffle: bool,
    order_rng: StdRng,
    aug_rng: StdRng,
    progress: bool,
    dev: Dev,
}

impl ImageLoader {
    pub fn new(dev: Dev, dataset: MiniImagenet, transform: Transform, batch_size: usize) -> Self {
        Self {
            dataset,
            transform: Transform {
                size: IMG_SIZE as u32,
                ..transform
            },
            batch_size: batch_size.max(1),
            shuffle: false,
            order_rng: StdRng::seed_from_u64(0),
            aug_rng: StdRng::seed_from_u64(0),
            progress: false,
            dev,
        }
    }

    /// Reshuffles the rows on every pass. `seed` also drives augmentation.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.order_rng = StdRng::seed_from_u64(seed);
        self.aug_rng = StdRng::seed_from_u64(seed.wrapping_add(1));
        self
    }

    /// Shows a progress bar over the batches of each pass.
    pub fn with_progress(mut self) -> Self {
        self.progress = true;
        self
    }

    pub fn dataset(&self) -> &MiniImagenet {
        &self.dataset
    }
}

impl BatchLoader for ImageLoader {
    type Batch = ImageBatch;

    fn num_examples(&self) -> usize {
        self.dataset.len()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<ImageBatch, DatasetError>> + '_> {
        let num_batches = self.num_batches() as u64;
        let Self {
            dataset,
            transform,
            batch_size,
            shuffle,
            order_rng,
            aug_rng,
            progress,
            dev,
        } = self;
        let dataset: &MiniImagenet = dataset;

        let rows: Box<dyn Iterator<Item = Row> + '_> = if *shuffle {
            Box::new(dataset.shuffled(order_rng))
        } else {
            // ExactSizeDataset::iter pops from the back, keep csv order instead
            Box::new((0..dataset.len()).map(move |i| dataset.get(i)))
        };

        let preprocess = move |row: Row| -> Sample {
            let (img, lbl) = row?;
            let pixels = transform.apply(&img, &mut *aug_rng);
            Ok((
                dev.tensor_from_vec(pixels, (Const::<3>, Const::<IMG_SIZE>, Const::<IMG_SIZE>)),
                lbl,
            ))
        };

        let pb = progress.then(|| ProgressBar::new(num_batches));
        Box::new(
            rows.map(preprocess)
                .batch_with_last(*batch_size)
                .map(move |batch| -> Result<ImageBatch, DatasetError> {
                    let (images, labels) = batch
                        .into_iter()
                        .collect::<Result<Vec<_>, _>>()?
                        .collated();
                    if let Some(pb) = &pb {
                        pb.inc(1);
                        if pb.position() >= num_batches {
                            pb.finish_and_clear();
                        }
                    }
                    Ok(ImageBatch {
                        images: images.stack(),
                        labels,
                    })
                }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn fixture(dir: &std::path::Path, n: usize) -> MiniImagenet {
        let csv_path = dir.join("train.csv");
        let mut w = csv::Writer::from_path(&csv_path).unwrap();
        w.write_record(["id", "filename", "label"]).unwrap();
        for i in 0..n {
            let name = format!("{i}.png");
            RgbImage::from_pixel(8, 8, Rgb([i as u8 * 10, 0, 0]))
                .save(dir.join(&name))
                .unwrap();
            let label = if i % 2 == 0 { "even" } else { "odd" };
            w.write_record([i.to_string().as_str(), name.as_str(), label])
                .unwrap();
        }
        w.flush().unwrap();
        MiniImagenet::from_csv(&csv_path, dir).unwrap()
    }

    #[test]
    fn keeps_the_partial_last_batch() {
        let dir = tempdir().unwrap();
        let dataset = fixture(dir.path(), 5);
        let mut loader = ImageLoader::new(Dev::default(), dataset, Transform::plain(), 2);
        assert_eq!(loader.num_examples(), 5);
        assert_eq!(loader.num_batches(), 3);

        let batches: Vec<ImageBatch> = loader.batches().collect::<Result<_, _>>().unwrap();
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(batches[0].labels, vec![0, 1]);
        assert_eq!(batches[2].images.shape().0, 1);
    }

    #[test]
    fn shuffling_covers_every_example_once() {
        let dir = tempdir().unwrap();
        let dataset = fixture(dir.path(), 6);
        let mut loader =
            ImageLoader::new(Dev::default(), dataset, Transform::augmented(), 4).shuffled(7);
        let mut seen: Vec<usize> = Vec::new();
        for batch in loader.batches() {
            seen.extend(batch.unwrap().labels);
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.iter().filter(|&&l| l == 0).count(), 3);
    }

    #[test]
    fn shuffled_passes_are_reproducible_from_the_seed() {
        let dir = tempdir().unwrap();
        let pass = |seed: u64| {
            let mut loader =
                ImageLoader::new(Dev::default(), fixture(dir.path(), 5), Transform::plain(), 2)
                    .shuffled(seed);
            loader
                .batches()
                .map(|b| b.unwrap().images.as_vec())
                .collect::<Vec<_>>()
        };
        assert_eq!(pass(11), pass(11));
    }

    #[test]
    fn progress_bar_does_not_change_the_batches() {
        let dir = tempdir().unwrap();
        let mut plain =
            ImageLoader::new(Dev::default(), fixture(dir.path(), 3), Transform::plain(), 2);
        let mut shown =
            ImageLoader::new(Dev::default(), fixture(dir.path(), 3), Transform::plain(), 2)
                .with_progress();
        let labels = |l: &mut ImageLoader| {
            l.batches().map(|b| b.unwrap().labels).collect::<Vec<_>>()
        };
        assert_eq!(labels(&mut plain), vec![vec![0, 1], vec![0]]);
        assert_eq!(labels(&mut shown), labels(&mut plain));
    }

    #[test]
    fn unreadable_image_surfaces_as_a_batch_error() {
        let dir = tempdir().unwrap();
        let dataset = fixture(dir.path(), 3);
        std::fs::remove_file(dir.path().join("2.png")).unwrap();
        let mut loader = ImageLoader::new(Dev::default(), dataset, Transform::plain(), 2);
        let results: Vec<_> = loader.batches().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(DatasetError::IoError(_))));
    }
}
