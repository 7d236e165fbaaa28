use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("metadata error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("failed to decode {path}: {source}")]
    ImageError {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("duplicate id {0} in metadata")]
    DuplicateId(u64),
    #[error("label `{0}` is not one of the known classes")]
    UnknownLabel(String),
    #[error("no row with id {0}")]
    IdNotFound(u64),
    #[error("index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("held-out fraction must be in (0, 1), got {0}")]
    InvalidFraction(f64),
    #[error(transparent)]
    Episode(#[from] EpisodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EpisodeError {
    #[error("an episode needs at least one class")]
    ZeroWay,
    #[error("only {found} classes have {needed} examples, need {n_way}")]
    NotEnoughClasses {
        found: usize,
        needed: usize,
        n_way: usize,
    },
}
