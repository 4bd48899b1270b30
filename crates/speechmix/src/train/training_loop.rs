//! Training Loop - wiring of model, data, callbacks and trainer

use anyhow::{Context, Result};
use candle_core::Device;
use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::args::TrainArgs;
use super::callbacks::{EarlyStoppingCallback, FreezingCallback};
use super::trainer::{Trainer, TrainerConfig};
use crate::data::{load_or_prepare, DataCollatorWithPadding};
use crate::report::{HttpReporter, JsonlReporter, Reporter};

/// Sets a flag on the first Ctrl+C; exits on the second.
fn install_shutdown_handler() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    let presses = Arc::new(AtomicUsize::new(0));
    ctrlc::set_handler(move || {
        let count = presses.fetch_add(1, Ordering::SeqCst) + 1;
        if count == 1 {
            info!("\n\n🛑 Ctrl+C detected! Finishing current step and saving...");
            info!("   (Press Ctrl+C again to force quit WITHOUT saving)");
            flag.store(true, Ordering::SeqCst);
        } else {
            error!("\n⚠️  Force quit! Exiting immediately without saving.");
            std::process::exit(1);
        }
    })
    .context("Error setting Ctrl-C handler")?;
    Ok(shutdown)
}

pub fn trainer_config(args: &TrainArgs) -> TrainerConfig {
    TrainerConfig {
        output_dir: args.output_dir(),
        batch_size: args.batch.max(1),
        grad_accum: args.grad_accum.max(1),
        epochs: args.epoch,
        learning_rate: args.lr,
        warmup_steps: args.warmup_steps,
        logging_steps: args.logging_steps,
        eval_steps: args.eval_step,
        save_total_limit: args.save_total_limit,
        seed: args.seed,
    }
}

/// Main training function
pub fn run(args: TrainArgs) -> Result<()> {
    info!("--- SpeechMix Training ---");
    let config = trainer_config(&args);
    info!(
        "Config: Batch={}, GradAccum={}, Epochs={}, LR={}, Warmup={}, EvalStep={}",
        config.batch_size, config.grad_accum, config.epochs, config.learning_rate, config.warmup_steps, config.eval_steps
    );

    let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
    info!("Device initialized: {:?}", device);

    let loaded = args.model.load(&device, None)?;
    let selftype = loaded.variant.self_labeled();

    let (train_ds, valid_ds) = load_or_prepare(&loaded.model, &args.data.location(), selftype)?;
    info!("Data ready: {} train / {} valid examples", train_ds.len(), valid_ds.len());

    std::fs::create_dir_all(&config.output_dir)?;
    info!("📁 Output directory: {:?}", config.output_dir);
    let args_path = config.output_dir.join("training_args.json");
    serde_json::to_writer_pretty(File::create(&args_path)?, &args)?;

    let text_cfg = loaded.model.text_config();
    let collator = DataCollatorWithPadding::new(text_cfg.pad_token_id, text_cfg.bos_token_id);
    let freezing = FreezingCallback::new(&loaded.params, "encoder_model.", args.freeze_epoch);
    info!(
        "Freezing window: {} epochs over {} encoder parameters ({} released per epoch)",
        args.freeze_epoch,
        freezing.tracked().len(),
        freezing.freeze_layers()
    );

    let shutdown = install_shutdown_handler()?;
    let run_name = config
        .output_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "speechmix".to_string());

    let super::args::LoadedModel { model, mut varmap, params, .. } = loaded;
    let mut trainer = Trainer::new(&model, &mut varmap, params, config.clone(), collator, shutdown);

    if let Some(checkpoint) = &args.resume {
        trainer.resume(checkpoint)?;
    }
    let best = trainer.state.best_metric;
    trainer.add_callback(Box::new(EarlyStoppingCallback::new(args.early_stopping_patience).with_best(best)));
    trainer.add_callback(Box::new(freezing));

    trainer.add_reporter(Box::new(JsonlReporter::create(&config.output_dir)?));
    if args.wandb {
        match &args.tracking_url {
            Some(url) => {
                let mut remote = HttpReporter::new(url, &run_name);
                remote.config(&serde_json::to_value(&args)?)?;
                trainer.add_reporter(Box::new(remote));
                info!("📡 Reporting to {}", url);
            }
            None => warn!("⚠️ --wandb given without --tracking-url / SPEECHMIX_TRACKING_URL; reporting locally only"),
        }
    }

    let output = trainer.train(&train_ds, &valid_ds)?;
    if output.interrupted {
        info!("Exiting gracefully.");
    } else if output.stopped_early {
        info!("Stopped early at step {}", output.global_step);
    } else {
        info!("✅ Training complete at step {}", output.global_step);
    }
    Ok(())
}
