use crate::data::PrepareArgs;
use crate::evaluate::EvaluateArgs;
use crate::train::TrainArgs;
use crate::transcribe::TranscribeArgs;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "SpeechMix speech-to-text training toolchain", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a SpeechMix model
    Train(TrainArgs),

    /// Prepare and cache the train/valid splits
    Prepare(PrepareArgs),

    /// Evaluate a checkpoint on the validation split (loss, CER, WER)
    Evaluate(EvaluateArgs),

    /// Transcribe a WAV file with a checkpoint
    Transcribe(TranscribeArgs),
}
