//! Trainer - the fit loop
//!
//! AdamW with linear warmup and linear decay, gradient accumulation,
//! evaluation and checkpointing every `eval_steps` optimizer steps, and
//! best-model reload at the end. Trainability comes from the `ParamSet`:
//! gradients of frozen parameters are dropped before every step.

use anyhow::{Context, Result};
use candle_core::backprop::GradStore;
use candle_core::DType;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use speechmix_core::{ParamSet, SpeechMix};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::callbacks::{TrainerCallback, TrainerControl};
use super::checkpoint::{rotate_checkpoints, save_checkpoint, save_securely, TrainerState, MODEL_FILE};
use super::evaluation::evaluate_split;
use crate::data::{CachedSplit, DataCollatorWithPadding, LengthGroupedSampler};
use crate::report::{LogRecord, Reporter, Reporters};

#[derive(Clone, Debug)]
pub struct TrainerConfig {
    pub output_dir: PathBuf,
    pub batch_size: usize,
    pub grad_accum: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub warmup_steps: usize,
    pub logging_steps: usize,
    pub eval_steps: usize,
    /// 0 keeps every checkpoint.
    pub save_total_limit: usize,
    pub seed: u64,
}

/// Learning rate for optimizer step `step` (0-based): linear ramp from 0
/// over `warmup` steps, then linear decay to 0 at `total`.
pub fn linear_schedule_with_warmup(step: usize, warmup: usize, total: usize, base: f64) -> f64 {
    if step < warmup {
        return base * step as f64 / warmup.max(1) as f64;
    }
    let remaining = total.saturating_sub(step) as f64;
    base * (remaining / total.saturating_sub(warmup).max(1) as f64).max(0.0)
}

#[derive(Clone, Debug, Default)]
pub struct TrainOutput {
    pub global_step: usize,
    /// Mean loss per optimizer step of this run.
    pub training_loss: f64,
    pub stopped_early: bool,
    pub interrupted: bool,
}

pub struct Trainer<'a> {
    model: &'a SpeechMix,
    varmap: &'a mut VarMap,
    params: ParamSet,
    config: TrainerConfig,
    collator: DataCollatorWithPadding,
    callbacks: Vec<Box<dyn TrainerCallback>>,
    reporters: Reporters,
    pub state: TrainerState,
    control: TrainerControl,
    shutdown: Arc<AtomicBool>,
}

impl<'a> Trainer<'a> {
    pub fn new(
        model: &'a SpeechMix,
        varmap: &'a mut VarMap,
        params: ParamSet,
        config: TrainerConfig,
        collator: DataCollatorWithPadding,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            model,
            varmap,
            params,
            config,
            collator,
            callbacks: Vec::new(),
            reporters: Reporters::default(),
            state: TrainerState::default(),
            control: TrainerControl::default(),
            shutdown,
        }
    }

    pub fn add_callback(&mut self, callback: Box<dyn TrainerCallback>) {
        self.callbacks.push(callback);
    }

    pub fn add_reporter(&mut self, reporter: Box<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    /// Restores weights and progress from a checkpoint directory. Optimizer
    /// moments start fresh.
    pub fn resume(&mut self, checkpoint: &Path) -> Result<()> {
        let weights = checkpoint.join(MODEL_FILE);
        self.varmap
            .load(&weights)
            .with_context(|| format!("loading {:?}", weights))?;
        self.state = TrainerState::load(checkpoint)?;
        info!(
            "📂 Resumed from {:?} at step {} (epoch {:.2})",
            checkpoint, self.state.global_step, self.state.epoch
        );
        Ok(())
    }

    fn each_callback(
        &mut self,
        mut f: impl FnMut(&mut dyn TrainerCallback, &TrainerState, &mut TrainerControl, &mut ParamSet) -> Result<()>,
    ) -> Result<()> {
        for cb in self.callbacks.iter_mut() {
            f(cb.as_mut(), &self.state, &mut self.control, &mut self.params)?;
        }
        Ok(())
    }

    fn log(&mut self, record: LogRecord) -> Result<()> {
        self.state.log_history.push(record.to_json());
        self.reporters.report(&record)?;
        let values = record.values.clone();
        for cb in self.callbacks.iter_mut() {
            cb.on_log(&self.state, &mut self.control, &values)?;
        }
        Ok(())
    }

    fn save(&mut self) -> Result<PathBuf> {
        let dir = save_checkpoint(self.varmap, &mut self.state, &self.config.output_dir)?;
        rotate_checkpoints(
            &self.config.output_dir,
            self.config.save_total_limit,
            self.state.best_model_checkpoint.as_deref(),
        )?;
        self.each_callback(|cb, state, control, params| cb.on_save(state, control, params))?;
        Ok(dir)
    }

    /// Evaluates `valid`, records the metrics, and saves a checkpoint.
    fn evaluate_and_save(&mut self, valid: &CachedSplit) -> Result<()> {
        let eval = evaluate_split(self.model, valid, &self.collator, self.config.batch_size)?;
        info!(
            "📊 Eval @ step {} | loss {:.4} | CER {:.4} | WER {:.4}",
            self.state.global_step, eval.loss, eval.metrics.cer, eval.metrics.wer
        );

        let metrics = eval.to_map();
        let mut record = LogRecord::new(self.state.global_step, self.state.epoch);
        record.values = metrics.clone();
        self.state.log_history.push(record.to_json());
        self.reporters.report(&record)?;
        for cb in self.callbacks.iter_mut() {
            cb.on_evaluate(&self.state, &mut self.control, &metrics)?;
        }

        if self.state.best_metric.map_or(true, |best| eval.loss < best) {
            info!("🌟 New best eval_loss: {:.4}", eval.loss);
            self.state.best_metric = Some(eval.loss);
            self.state.best_model_checkpoint = Some(super::checkpoint::checkpoint_dir(
                &self.config.output_dir,
                self.state.global_step,
            ));
        }
        self.save()?;
        Ok(())
    }

    pub fn train(&mut self, train: &CachedSplit, valid: &CachedSplit) -> Result<TrainOutput> {
        let cfg = self.config.clone();
        let grad_accum = cfg.grad_accum.max(1);
        let sampler = LengthGroupedSampler::new(train.lengths(), cfg.batch_size, cfg.seed);
        let num_batches = sampler.num_batches();
        if num_batches == 0 {
            anyhow::bail!("❌ Training split is empty");
        }
        let updates_per_epoch = num_batches.div_ceil(grad_accum);
        self.state.max_steps = updates_per_epoch * cfg.epochs;
        std::fs::create_dir_all(&cfg.output_dir)?;

        let mut opt = AdamW::new(
            self.params.vars(),
            ParamsAdamW {
                lr: cfg.learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        info!(
            "Starting training: {} examples, {} batches/epoch, {} optimizer steps ({} trainable parameters)",
            train.len(),
            num_batches,
            self.state.max_steps,
            self.params.trainable_count()
        );
        if valid.is_empty() {
            warn!("⚠️ Validation split is empty; checkpoints are saved without evaluation");
        }
        self.each_callback(|cb, state, control, params| cb.on_train_begin(state, control, params))?;

        let start_step = self.state.global_step;
        let start_epoch = start_step / updates_per_epoch;
        let mut skip_batches = (start_step % updates_per_epoch) * grad_accum;
        let device = self.model.device.clone();
        let dtype = self.model.dtype();

        let mut output = TrainOutput::default();
        let mut total_loss = 0.0;
        let mut logged_loss = 0.0;
        let mut logged_steps = 0usize;
        let start_time = Instant::now();

        'epochs: for epoch in start_epoch..cfg.epochs {
            self.state.epoch = epoch as f64;
            self.each_callback(|cb, state, control, params| cb.on_epoch_begin(state, control, params))?;

            let batches = sampler.batches(epoch);
            let mut acc: Option<GradStore> = None;
            let mut accumulated = 0usize;
            let mut step_loss = 0.0;

            for (i, indices) in batches.iter().enumerate().skip(std::mem::take(&mut skip_batches)) {
                let examples = train.get_many(indices)?;
                let batch = self.collator.collate(&examples)?.to_model_batch(&device, dtype)?;
                let out = self.model.forward(&batch)?;
                let loss = out.loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
                if !loss.is_finite() {
                    warn!("⚠️ Non-finite loss at step {}", self.state.global_step);
                }

                let grads = (out.loss / grad_accum as f64)?.backward()?;
                acc = Some(match acc.take() {
                    None => grads,
                    Some(mut a) => {
                        self.params.accumulate_grads(&mut a, &grads)?;
                        a
                    }
                });
                step_loss += loss / grad_accum as f64;
                accumulated += 1;
                if accumulated < grad_accum && i + 1 < batches.len() {
                    continue;
                }

                let Some(mut grads) = acc.take() else {
                    continue;
                };
                self.params.strip_frozen_grads(&mut grads);
                let lr = linear_schedule_with_warmup(
                    self.state.global_step,
                    cfg.warmup_steps,
                    self.state.max_steps,
                    cfg.learning_rate,
                );
                opt.set_learning_rate(lr);
                opt.step(&grads)?;

                self.state.global_step += 1;
                self.state.epoch = epoch as f64 + (i + 1) as f64 / batches.len() as f64;
                total_loss += step_loss;
                logged_loss += step_loss;
                logged_steps += 1;
                output.global_step = self.state.global_step;
                accumulated = 0;
                step_loss = 0.0;

                if cfg.logging_steps > 0 && self.state.global_step % cfg.logging_steps == 0 {
                    let mean = logged_loss / logged_steps as f64;
                    info!(
                        "Step {:4} | Epoch {:.2} | Loss: {:.4} | LR: {:.7}",
                        self.state.global_step, self.state.epoch, mean, lr
                    );
                    let record = LogRecord::new(self.state.global_step, self.state.epoch)
                        .with("loss", mean)
                        .with("learning_rate", lr);
                    self.log(record)?;
                    logged_loss = 0.0;
                    logged_steps = 0;
                }

                if cfg.eval_steps > 0 && self.state.global_step % cfg.eval_steps == 0 {
                    if valid.is_empty() {
                        self.save()?;
                    } else {
                        self.evaluate_and_save(valid)?;
                    }
                }

                if self.control.should_training_stop {
                    output.stopped_early = true;
                    break 'epochs;
                }

                if self.shutdown.load(Ordering::SeqCst) {
                    info!("[Shutdown] Saving checkpoint at step {}...", self.state.global_step);
                    self.save()?;
                    output.interrupted = true;
                    break 'epochs;
                }
            }
        }

        let steps_run = self.state.global_step - start_step;
        output.training_loss = if steps_run == 0 { 0.0 } else { total_loss / steps_run as f64 };
        info!(
            "Training finished after {} steps in {:.1}s (mean loss {:.4})",
            steps_run,
            start_time.elapsed().as_secs_f64(),
            output.training_loss
        );
        if output.interrupted {
            return Ok(output);
        }

        if let Some(best) = self.state.best_model_checkpoint.clone() {
            let weights = best.join(MODEL_FILE);
            if weights.exists() {
                info!("🌟 Loading best model from {:?} (eval_loss {:?})", best, self.state.best_metric);
                self.varmap.load(&weights)?;
            } else {
                warn!("⚠️ Best checkpoint {:?} is gone; keeping final weights", best);
            }
        }

        let final_path = cfg.output_dir.join(MODEL_FILE);
        save_securely(self.varmap, &final_path)?;
        let tokenizer_path = cfg.output_dir.join("tokenizer.json");
        self.model
            .tokenizer
            .save(&tokenizer_path, false)
            .map_err(|e| anyhow::anyhow!("failed to save tokenizer: {}", e))?;
        let mut final_state = self.state.clone();
        final_state.save(&cfg.output_dir)?;
        info!("💾 Final model saved to {:?}", final_path);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_schedule() {
        let lr = |s| linear_schedule_with_warmup(s, 10, 110, 1.0);
        assert_eq!(lr(0), 0.0);
        assert!((lr(5) - 0.5).abs() < 1e-12);
        assert_eq!(lr(10), 1.0);
        assert!((lr(60) - 0.5).abs() < 1e-12);
        assert_eq!(lr(110), 0.0);
        assert_eq!(lr(500), 0.0);
        assert_eq!(linear_schedule_with_warmup(0, 0, 4, 2.0), 2.0);
    }
}
