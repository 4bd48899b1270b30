use anyhow::Result;
use candle_core::Device;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use crate::data::audio::load_audio;
use crate::train::ModelArgs;

#[derive(Args, Debug, Clone)]
pub struct TranscribeArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Checkpoint directory or safetensors file
    #[arg(long)]
    pub checkpoint: PathBuf,

    /// WAV file to transcribe
    #[arg(long)]
    pub audio: PathBuf,
}

pub fn run(args: TranscribeArgs) -> Result<()> {
    let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
    let loaded = args.model.load(&device, Some(&args.checkpoint))?;
    let waveform = load_audio(&args.audio)?;
    info!("Transcribing {:?} ({:.2}s)", args.audio, waveform.len() as f64 / crate::data::SAMPLING_RATE as f64);
    let text = loaded.model.transcribe(&waveform)?;
    println!("{}", text);
    Ok(())
}
