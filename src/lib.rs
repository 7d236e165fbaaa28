#![allow(incomplete_features)]
#![feature(generic_const_exprs)]

//! Image classification training on mini-Imagenet with [dfdx].
//!
//! [solver::Solver] runs the epoch loop, evaluating every `save_interval`
//! iterations and keeping a checkpoint whenever validation accuracy improves.
//! [datasets::MiniImagenet] reads the csv metadata and decodes images on
//! demand, and [datasets::Transform] applies the augmentation pipeline.

pub mod checkpoint;
pub mod config;
pub mod datasets;
pub mod learner;
pub mod model;
pub mod solver;

pub use config::SolverConfig;
pub use learner::DfdxLearner;
pub use solver::{BatchLoader, BatchScore, Learner, Solver, SolverError, TrainReport};
