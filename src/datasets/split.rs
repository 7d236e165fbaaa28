use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetSplit {
    Train,
    Val,
    Test,
}

impl DatasetSplit {
    pub fn file_stem(&self) -> &'static str {
        match self {
            DatasetSplit::Train => "train",
            DatasetSplit::Val => "val",
            DatasetSplit::Test => "test",
        }
    }

    /// `<root>/<stem>.csv`
    pub fn csv_path<P: AsRef<Path>>(&self, root: P) -> PathBuf {
        root.as_ref().join(format!("{}.csv", self.file_stem()))
    }

    /// `<root>/<stem>/`
    pub fn image_dir<P: AsRef<Path>>(&self, root: P) -> PathBuf {
        root.as_ref().join(self.file_stem())
    }
}

impl std::str::FromStr for DatasetSplit {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Self::Train),
            "val" => Ok(Self::Val),
            "test" => Ok(Self::Test),
            _ => Err(format!("unknown split `{s}`, expected train, val or test")),
        }
    }
}
