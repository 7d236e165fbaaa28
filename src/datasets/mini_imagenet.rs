use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
};

use image::RgbImage;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Deserialize;

use super::{errors::DatasetError, split::DatasetSplit};

#[derive(Debug, Deserialize)]
struct Record {
    id: u64,
    filename: String,
    label: String,
}

#[derive(Debug, Clone)]
struct Entry {
    id: u64,
    filename: PathBuf,
    label: usize,
}

/// mini-Imagenet metadata backed by an `id,filename,label` csv.
///
/// Images are decoded lazily on [MiniImagenet::get]; only the metadata is
/// held in memory.
pub struct MiniImagenet {
    data_dir: PathBuf,
    entries: Vec<Entry>,
    by_id: HashMap<u64, usize>,
    classes: Vec<String>,
}

impl MiniImagenet {
    pub fn new<P: AsRef<Path>>(root: P, split: DatasetSplit) -> Result<Self, DatasetError> {
        let root = root.as_ref();
        Self::from_csv(split.csv_path(root), split.image_dir(root))
    }

    /// Class indices follow the sorted order of the distinct label names.
    pub fn from_csv<P: AsRef<Path>, Q: AsRef<Path>>(
        csv_path: P,
        data_dir: Q,
    ) -> Result<Self, DatasetError> {
        let records = read_records(csv_path)?;
        let classes: Vec<String> = records
            .iter()
            .map(|r| r.label.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self::build(records, data_dir, classes)
    }

    /// Reuses a class list (e.g. from the train split) so indices agree
    /// across splits.
    pub fn from_csv_with_classes<P: AsRef<Path>, Q: AsRef<Path>>(
        csv_path: P,
        data_dir: Q,
        classes: Vec<String>,
    ) -> Result<Self, DatasetError> {
        let records = read_records(csv_path)?;
        Self::build(records, data_dir, classes)
    }

    fn build<Q: AsRef<Path>>(
        records: Vec<Record>,
        data_dir: Q,
        classes: Vec<String>,
    ) -> Result<Self, DatasetError> {
        let class_index: HashMap<&str, usize> = classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let mut entries = Vec::with_capacity(records.len());
        let mut by_id = HashMap::with_capacity(records.len());
        for record in records {
            let label = *class_index
                .get(record.label.as_str())
                .ok_or_else(|| DatasetError::UnknownLabel(record.label.clone()))?;
            if by_id.insert(record.id, entries.len()).is_some() {
                return Err(DatasetError::DuplicateId(record.id));
            }
            entries.push(Entry {
                id: record.id,
                filename: PathBuf::from(record.filename),
                label,
            });
        }

        Ok(Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            entries,
            by_id,
            classes,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn label_name(&self, lbl: usize) -> Option<&str> {
        self.classes.get(lbl).map(String::as_str)
    }

    pub fn label(&self, index: usize) -> Option<usize> {
        self.entries.get(index).map(|e| e.label)
    }

    pub fn labels(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.label).collect()
    }

    pub fn id(&self, index: usize) -> Option<u64> {
        self.entries.get(index).map(|e| e.id)
    }

    pub fn image_path(&self, index: usize) -> Option<PathBuf> {
        self.entries
            .get(index)
            .map(|e| self.data_dir.join(&e.filename))
    }

    pub fn get(&self, index: usize) -> Result<(RgbImage, usize), DatasetError> {
        let entry = self
            .entries
            .get(index)
            .ok_or(DatasetError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })?;
        let path = self.data_dir.join(&entry.filename);
        let img = image::open(&path)
            .map_err(|source| match source {
                image::ImageError::IoError(e) => DatasetError::IoError(std::io::Error::new(
                    e.kind(),
                    format!("{}: {e}", path.display()),
                )),
                source => DatasetError::ImageError {
                    path: path.clone(),
                    source,
                },
            })?
            .to_rgb8();
        Ok((img, entry.label))
    }

    pub fn get_by_id(&self, id: u64) -> Result<(RgbImage, usize), DatasetError> {
        let index = *self.by_id.get(&id).ok_or(DatasetError::IdNotFound(id))?;
        self.get(index)
    }

    /// Moves a seeded `fraction` of every class into a second dataset.
    ///
    /// Each class keeps at least one training row. Both halves share this
    /// dataset's class list and keep csv row order.
    pub fn hold_out(&self, fraction: f64, seed: u64) -> Result<(Self, Self), DatasetError> {
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(DatasetError::InvalidFraction(fraction));
        }
        let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, entry) in self.entries.iter().enumerate() {
            by_class.entry(entry.label).or_default().push(i);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut held = vec![false; self.entries.len()];
        for rows in by_class.values() {
            let n_val = ((rows.len() as f64 * fraction).round() as usize).min(rows.len() - 1);
            for &i in rows.choose_multiple(&mut rng, n_val) {
                held[i] = true;
            }
        }

        let mut train = Vec::with_capacity(self.entries.len());
        let mut val = Vec::new();
        for (entry, held) in self.entries.iter().zip(held) {
            if held {
                val.push(entry.clone());
            } else {
                train.push(entry.clone());
            }
        }
        Ok((self.with_entries(train), self.with_entries(val)))
    }

    fn with_entries(&self, entries: Vec<Entry>) -> Self {
        let by_id = entries.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
        Self {
            data_dir: self.data_dir.clone(),
            entries,
            by_id,
            classes: self.classes.clone(),
        }
    }
}

/// Where validation examples come from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationSource {
    /// A csv split whose labels are all train classes.
    Split(DatasetSplit),
    /// A seeded per-class fraction of the train split. mini-Imagenet's own
    /// val split has classes disjoint from train, so this is what a
    /// classifier over the train classes can be validated on.
    HeldOut { fraction: f64, seed: u64 },
}

/// Loads `<root>/train.csv` and a validation set indexed by the same classes.
pub fn train_val_sets<P: AsRef<Path>>(
    root: P,
    source: ValidationSource,
) -> Result<(MiniImagenet, MiniImagenet), DatasetError> {
    let root = root.as_ref();
    let train = MiniImagenet::new(root, DatasetSplit::Train)?;
    match source {
        ValidationSource::Split(split) => {
            let val = MiniImagenet::from_csv_with_classes(
                split.csv_path(root),
                split.image_dir(root),
                train.classes().to_vec(),
            )?;
            Ok((train, val))
        }
        ValidationSource::HeldOut { fraction, seed } => train.hold_out(fraction, seed),
    }
}

impl dfdx::data::ExactSizeDataset for MiniImagenet {
    type Item<'a> = Result<(RgbImage, usize), DatasetError> where Self: 'a;
    fn get(&self, index: usize) -> Self::Item<'_> {
        MiniImagenet::get(self, index)
    }
    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn read_records<P: AsRef<Path>>(csv_path: P) -> Result<Vec<Record>, DatasetError> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut records = Vec::new();
    for record in reader.deserialize() {
        records.push(record?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::tempdir;

    fn write_fixture(dir: &Path, rows: &[(u64, &str, &str)]) -> PathBuf {
        let csv_path = dir.join("meta.csv");
        let mut w = csv::Writer::from_path(&csv_path).unwrap();
        w.write_record(["id", "filename", "label"]).unwrap();
        for (id, filename, label) in rows {
            w.write_record([id.to_string().as_str(), *filename, *label])
                .unwrap();
        }
        w.flush().unwrap();
        csv_path
    }

    #[test]
    fn classes_are_sorted_and_indexed() {
        let dir = tempdir().unwrap();
        let csv_path = write_fixture(
            dir.path(),
            &[
                (0, "a.png", "n02"),
                (1, "b.png", "n01"),
                (2, "c.png", "n02"),
            ],
        );
        let ds = MiniImagenet::from_csv(&csv_path, dir.path()).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.classes(), &["n01".to_string(), "n02".to_string()]);
        assert_eq!(ds.labels(), vec![1, 0, 1]);
        assert_eq!(ds.label(1).and_then(|l| ds.label_name(l)), Some("n01"));
    }

    #[test]
    fn metadata_lookups_past_the_end_are_none() {
        let dir = tempdir().unwrap();
        let csv_path = write_fixture(dir.path(), &[(3, "a.png", "n01")]);
        let ds = MiniImagenet::from_csv(&csv_path, dir.path()).unwrap();
        assert_eq!(ds.label(0), Some(0));
        assert_eq!(ds.id(0), Some(3));
        assert_eq!(ds.image_path(0), Some(dir.path().join("a.png")));
        assert_eq!(ds.label(1), None);
        assert_eq!(ds.id(1), None);
        assert_eq!(ds.image_path(1), None);
        assert_eq!(ds.label_name(1), None);
        assert!(matches!(
            ds.get(1),
            Err(DatasetError::IndexOutOfRange { index: 1, len: 1 })
        ));
    }

    fn ten_per_class(dir: &Path) -> MiniImagenet {
        let names: Vec<String> = (0..30).map(|i| format!("{i}.png")).collect();
        let rows: Vec<(u64, &str, &str)> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (i as u64, name.as_str(), ["a", "b", "c"][i % 3]))
            .collect();
        let csv_path = write_fixture(dir, &rows);
        MiniImagenet::from_csv(&csv_path, dir).unwrap()
    }

    #[test]
    fn hold_out_takes_a_fraction_of_every_class() {
        let dir = tempdir().unwrap();
        let ds = ten_per_class(dir.path());
        let (train, val) = ds.hold_out(0.2, 5).unwrap();

        assert_eq!(train.len(), 24);
        assert_eq!(val.len(), 6);
        assert_eq!(train.classes(), ds.classes());
        assert_eq!(val.classes(), ds.classes());
        for class in 0..3 {
            assert_eq!(val.labels().iter().filter(|&&l| l == class).count(), 2);
        }

        let mut ids: Vec<u64> = (0..train.len())
            .filter_map(|i| train.id(i))
            .chain((0..val.len()).filter_map(|i| val.id(i)))
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..30).collect::<Vec<u64>>());

        // ids still resolve after the split
        let held_id = val.id(0).unwrap();
        assert!(matches!(val.get_by_id(held_id), Err(DatasetError::IoError(_))));
        assert!(matches!(
            train.get_by_id(held_id),
            Err(DatasetError::IdNotFound(id)) if id == held_id
        ));
    }

    #[test]
    fn hold_out_is_seeded() {
        let dir = tempdir().unwrap();
        let ds = ten_per_class(dir.path());
        let ids = |d: &MiniImagenet| (0..d.len()).filter_map(|i| d.id(i)).collect::<Vec<_>>();
        let (_, a) = ds.hold_out(0.3, 1).unwrap();
        let (_, b) = ds.hold_out(0.3, 1).unwrap();
        let (_, c) = ds.hold_out(0.3, 2).unwrap();
        assert_eq!(ids(&a), ids(&b));
        assert_ne!(ids(&a), ids(&c));
    }

    #[test]
    fn hold_out_keeps_one_training_row_per_class() {
        let dir = tempdir().unwrap();
        let csv_path = write_fixture(
            dir.path(),
            &[(0, "a.png", "x"), (1, "b.png", "y"), (2, "c.png", "y")],
        );
        let ds = MiniImagenet::from_csv(&csv_path, dir.path()).unwrap();
        let (train, val) = ds.hold_out(0.9, 0).unwrap();
        assert_eq!(train.labels(), vec![0, 1]);
        assert_eq!(val.labels(), vec![1]);

        for bad in [0.0, 1.0, -0.5, f64::NAN] {
            assert!(matches!(ds.hold_out(bad, 0), Err(DatasetError::InvalidFraction(_))));
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let dir = tempdir().unwrap();
        let csv_path = write_fixture(dir.path(), &[(7, "a.png", "x"), (7, "b.png", "y")]);
        let err = MiniImagenet::from_csv(&csv_path, dir.path()).err().unwrap();
        assert!(matches!(err, DatasetError::DuplicateId(7)));
    }

    #[test]
    fn unknown_label_with_shared_classes() {
        let dir = tempdir().unwrap();
        let csv_path = write_fixture(dir.path(), &[(0, "a.png", "cat")]);
        let err = MiniImagenet::from_csv_with_classes(&csv_path, dir.path(), vec!["dog".into()])
            .err()
            .unwrap();
        assert!(matches!(err, DatasetError::UnknownLabel(ref l) if l == "cat"));
    }

    #[test]
    fn decodes_images_by_position_and_id() {
        let dir = tempdir().unwrap();
        RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]))
            .save(dir.path().join("a.png"))
            .unwrap();
        let csv_path = write_fixture(dir.path(), &[(42, "a.png", "n01")]);
        let ds = MiniImagenet::from_csv(&csv_path, dir.path()).unwrap();

        let (img, lbl) = ds.get(0).unwrap();
        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(img.get_pixel(2, 1), &Rgb([10, 20, 30]));
        assert_eq!(lbl, 0);

        let (by_id, _) = ds.get_by_id(42).unwrap();
        assert_eq!(by_id, img);
        assert!(matches!(ds.get_by_id(1), Err(DatasetError::IdNotFound(1))));
        assert!(matches!(
            ds.get(1),
            Err(DatasetError::IndexOutOfRange { index: 1, len: 1 })
        ));
    }

    #[test]
    fn missing_image_is_an_error() {
        let dir = tempdir().unwrap();
        let csv_path = write_fixture(dir.path(), &[(0, "gone.jpg", "n01")]);
        let ds = MiniImagenet::from_csv(&csv_path, dir.path()).unwrap();
        assert!(matches!(ds.get(0), Err(DatasetError::IoError(_))));
    }

    #[test]
    fn missing_csv_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(MiniImagenet::new(dir.path(), DatasetSplit::Train).is_err());
    }
}
