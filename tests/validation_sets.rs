use std::path::Path;

use image::{Rgb, RgbImage};
use mini_imagenet_solver::{
    datasets::{
        train_val_sets, DatasetError, DatasetSplit, ImageLoader, Transform, ValidationSource,
    },
    model::Dev,
    BatchLoader,
};
use tempfile::tempdir;

/// Writes `<root>/<split>.csv` and `<root>/<split>/*.png`, `per_class` rows
/// for each class in `classes`.
fn write_split(
    root: &Path,
    split: DatasetSplit,
    classes: &[&str],
    per_class: usize,
    first_id: u64,
) {
    let image_dir = split.image_dir(root);
    std::fs::create_dir_all(&image_dir).unwrap();
    let mut w = csv::Writer::from_path(split.csv_path(root)).unwrap();
    w.write_record(["id", "filename", "label"]).unwrap();
    let mut id = first_id;
    for class in classes {
        for _ in 0..per_class {
            let name = format!("{class}_{id}.png");
            RgbImage::from_pixel(12, 12, Rgb([id as u8, 40, 80]))
                .save(image_dir.join(&name))
                .unwrap();
            w.write_record([id.to_string().as_str(), name.as_str(), class])
                .unwrap();
            id += 1;
        }
    }
    w.flush().unwrap();
}

/// mini-Imagenet layout: val classes never appear in train.
fn disjoint_layout(root: &Path) {
    write_split(root, DatasetSplit::Train, &["n01", "n02"], 5, 0);
    write_split(root, DatasetSplit::Val, &["n10", "n11"], 3, 100);
}

#[test]
fn val_split_with_unseen_classes_is_rejected() {
    let dir = tempdir().unwrap();
    disjoint_layout(dir.path());
    let err = train_val_sets(dir.path(), ValidationSource::Split(DatasetSplit::Val))
        .err()
        .unwrap();
    assert!(matches!(err, DatasetError::UnknownLabel(ref l) if l == "n10"));
}

#[test]
fn held_out_rows_validate_a_disjoint_layout() {
    let dir = tempdir().unwrap();
    disjoint_layout(dir.path());
    let source = ValidationSource::HeldOut {
        fraction: 0.2,
        seed: 9,
    };
    let (train, val) = train_val_sets(dir.path(), source).unwrap();

    assert_eq!(train.classes(), &["n01".to_string(), "n02".to_string()]);
    assert_eq!(val.classes(), train.classes());
    assert_eq!(train.len(), 8);
    assert_eq!(val.labels(), vec![0, 1]);

    let mut train_loader =
        ImageLoader::new(Dev::default(), train, Transform::augmented(), 4).shuffled(9);
    let mut val_loader = ImageLoader::new(Dev::default(), val, Transform::plain(), 4);
    assert_eq!(train_loader.num_batches(), 2);
    assert_eq!(val_loader.num_batches(), 1);

    let train_rows: usize = train_loader.batches().map(|b| b.unwrap().len()).sum();
    let val_batch = val_loader.batches().next().unwrap().unwrap();
    assert_eq!(train_rows, 8);
    assert_eq!(val_batch.labels, vec![0, 1]);
}

#[test]
fn val_split_sharing_train_classes_still_loads() {
    let dir = tempdir().unwrap();
    write_split(dir.path(), DatasetSplit::Train, &["n01", "n02"], 2, 0);
    write_split(dir.path(), DatasetSplit::Val, &["n02"], 2, 50);
    let (train, val) =
        train_val_sets(dir.path(), ValidationSource::Split(DatasetSplit::Val)).unwrap();
    assert_eq!(train.len(), 4);
    assert_eq!(val.labels(), vec![1, 1]);
}
