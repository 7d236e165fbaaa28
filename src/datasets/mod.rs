pub mod episodes;
pub mod errors;
pub mod loader;
pub mod mini_imagenet;
pub mod split;
pub mod transforms;

pub use episodes::{Episode, EpisodeSampler};
pub use errors::{DatasetError, EpisodeError};
pub use loader::{ImageBatch, ImageLoader};
pub use mini_imagenet::{train_val_sets, MiniImagenet, ValidationSource};
pub use split::DatasetSplit;
pub use transforms::Transform;
