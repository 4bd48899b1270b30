use anyhow::Result;
use candle_core::Device;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use crate::data::{cache, DataCollatorWithPadding};
use crate::train::{evaluate_split, DatasetArgs, ModelArgs};

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub data: DatasetArgs,

    /// Checkpoint directory or safetensors file
    #[arg(long)]
    pub checkpoint: PathBuf,

    #[arg(long, default_value_t = 8)]
    pub batch: usize,
}

pub fn run(args: EvaluateArgs) -> Result<()> {
    info!("--- SpeechMix Evaluation ---");
    let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
    let loaded = args.model.load(&device, Some(&args.checkpoint))?;

    let location = args.data.location();
    let valid_path = location.valid_cache();
    let valid = if cache::is_cached(&valid_path) {
        cache::load_split(&valid_path)?
    } else {
        crate::data::load_or_prepare(&loaded.model, &location, loaded.variant.self_labeled())?.1
    };
    info!("Evaluating {} examples from {:?}", valid.len(), valid.path());

    let text_cfg = loaded.model.text_config();
    let collator = DataCollatorWithPadding::new(text_cfg.pad_token_id, text_cfg.bos_token_id);
    let out = evaluate_split(&loaded.model, &valid, &collator, args.batch)?;

    println!("eval_loss: {:.4}", out.loss);
    println!("eval_cer:  {:.4}", out.metrics.cer);
    println!("eval_wer:  {:.4}", out.metrics.wer);
    Ok(())
}
