//! Train Module - Training pipeline for SpeechMix
//!
//! This module provides the training infrastructure:
//! - TrainArgs: CLI arguments for training
//! - callbacks: gradual unfreezing and early stopping
//! - checkpoint: State saving/loading utilities
//! - evaluation: loss and CER/WER over the validation split
//! - trainer: the optimizer loop
//! - training_loop: wiring for the `train` command

pub mod args;
pub mod callbacks;
pub mod checkpoint;
pub mod evaluation;
pub mod trainer;
pub mod training_loop;

pub use args::{DatasetArgs, LoadedModel, ModelArgs, TrainArgs};
pub use callbacks::{EarlyStoppingCallback, FreezingCallback, TrainerCallback, TrainerControl};
pub use checkpoint::{save_securely, TrainerState};
pub use evaluation::{evaluate_split, EvalOutput};
pub use trainer::{Trainer, TrainerConfig, TrainOutput};
pub use training_loop::run;
