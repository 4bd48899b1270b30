//! Trainer callbacks: gradual encoder unfreezing and early stopping.

use anyhow::Result;
use serde_json::{Map, Value};
use speechmix_core::ParamSet;
use tracing::info;

use super::checkpoint::TrainerState;

/// Flags a callback can raise to steer the loop.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrainerControl {
    pub should_training_stop: bool,
}

/// Hooks invoked by the trainer. Every hook defaults to a no-op.
pub trait TrainerCallback {
    fn on_train_begin(&mut self, _state: &TrainerState, _control: &mut TrainerControl, _params: &mut ParamSet) -> Result<()> {
        Ok(())
    }

    fn on_epoch_begin(&mut self, _state: &TrainerState, _control: &mut TrainerControl, _params: &mut ParamSet) -> Result<()> {
        Ok(())
    }

    fn on_log(&mut self, _state: &TrainerState, _control: &mut TrainerControl, _logs: &Map<String, Value>) -> Result<()> {
        Ok(())
    }

    fn on_evaluate(&mut self, _state: &TrainerState, _control: &mut TrainerControl, _metrics: &Map<String, Value>) -> Result<()> {
        Ok(())
    }

    fn on_save(&mut self, _state: &TrainerState, _control: &mut TrainerControl, _params: &mut ParamSet) -> Result<()> {
        Ok(())
    }
}

/// Gradual unfreezing of one sub-model.
///
/// The tracked parameters (depth order) are released from the top: at the
/// start of epoch `e < freeze_epoch` the last `int(freeze_layers * e)` are
/// trainable and the rest frozen, with `freeze_layers = n / freeze_epoch`.
/// A release count of zero releases every tracked parameter, so epoch 0
/// (and any window too long to release one parameter per epoch) trains the
/// whole sub-model. From `freeze_epoch` on, and whenever a checkpoint is
/// saved, every tracked parameter gets back the trainability it had at
/// construction.
pub struct FreezingCallback {
    names: Vec<String>,
    defaults: Vec<bool>,
    freeze_epoch: usize,
    freeze_layers: usize,
}

impl FreezingCallback {
    pub fn new(params: &ParamSet, prefix: &str, freeze_epoch: usize) -> Self {
        let freeze_epoch = freeze_epoch.max(1);
        let names = params.names_with_prefix(prefix);
        let defaults = names
            .iter()
            .map(|n| params.requires_grad(n).unwrap_or(true))
            .collect();
        let freeze_layers = names.len() / freeze_epoch;
        Self {
            names,
            defaults,
            freeze_epoch,
            freeze_layers,
        }
    }

    pub fn freeze_layers(&self) -> usize {
        self.freeze_layers
    }

    pub fn tracked(&self) -> &[String] {
        &self.names
    }

    /// Names released at `epoch`, or `None` once the window is over.
    pub fn release_list(&self, epoch: f64) -> Option<&[String]> {
        if epoch >= self.freeze_epoch as f64 {
            return None;
        }
        let count = ((self.freeze_layers as f64 * epoch.max(0.0)) as usize).min(self.names.len());
        if count == 0 {
            return Some(&self.names);
        }
        Some(&self.names[self.names.len() - count..])
    }

    pub fn apply(&self, epoch: f64, params: &mut ParamSet) {
        match self.release_list(epoch) {
            Some(release) => {
                let first_released = self.names.len() - release.len();
                for (i, name) in self.names.iter().enumerate() {
                    params.set_requires_grad(name, i >= first_released);
                }
            }
            None => self.restore_defaults(params),
        }
    }

    pub fn restore_defaults(&self, params: &mut ParamSet) {
        for (name, &flag) in self.names.iter().zip(&self.defaults) {
            params.set_requires_grad(name, flag);
        }
    }
}

impl TrainerCallback for FreezingCallback {
    fn on_epoch_begin(&mut self, state: &TrainerState, _control: &mut TrainerControl, params: &mut ParamSet) -> Result<()> {
        self.apply(state.epoch, params);
        if let Some(release) = self.release_list(state.epoch) {
            info!(
                "❄️ Epoch {:.0}: {}/{} encoder parameters trainable",
                state.epoch,
                release.len(),
                self.names.len()
            );
        }
        Ok(())
    }

    fn on_save(&mut self, _state: &TrainerState, _control: &mut TrainerControl, params: &mut ParamSet) -> Result<()> {
        self.restore_defaults(params);
        Ok(())
    }
}

/// Stops training after `patience` evaluations without a lower `eval_loss`.
pub struct EarlyStoppingCallback {
    patience: usize,
    threshold: f64,
    best: Option<f64>,
    bad_evals: usize,
}

impl EarlyStoppingCallback {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            threshold: 0.0,
            best: None,
            bad_evals: 0,
        }
    }

    /// Continues from a resumed run's best metric.
    pub fn with_best(mut self, best: Option<f64>) -> Self {
        self.best = best;
        self
    }

    pub fn bad_evals(&self) -> usize {
        self.bad_evals
    }
}

impl TrainerCallback for EarlyStoppingCallback {
    fn on_evaluate(&mut self, _state: &TrainerState, control: &mut TrainerControl, metrics: &Map<String, Value>) -> Result<()> {
        let Some(loss) = metrics.get("eval_loss").and_then(Value::as_f64) else {
            return Ok(());
        };
        match self.best {
            Some(best) if loss >= best - self.threshold => self.bad_evals += 1,
            _ => {
                self.best = Some(loss);
                self.bad_evals = 0;
            }
        }
        if self.patience > 0 && self.bad_evals >= self.patience {
            info!("🛑 Early stopping: no eval_loss improvement in {} evaluations", self.bad_evals);
            control.should_training_stop = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Var};
    use speechmix_core::params::ParamEntry;

    fn params(names: &[(&str, bool)]) -> Result<ParamSet> {
        let entries = names
            .iter()
            .map(|(n, rg)| -> Result<ParamEntry> {
                Ok(ParamEntry {
                    name: n.to_string(),
                    var: Var::zeros(1, DType::F32, &Device::Cpu)?,
                    requires_grad: *rg,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ParamSet::from_entries(entries))
    }

    fn encoder_params() -> Result<ParamSet> {
        params(&[
            ("encoder_model.layers.0.w", true),
            ("encoder_model.layers.1.w", false),
            ("encoder_model.layers.2.w", true),
            ("encoder_model.layers.10.w", true),
            ("decoder_model.lm_head.weight", true),
        ])
    }

    fn flags(p: &ParamSet, names: &[String]) -> Vec<bool> {
        names.iter().map(|n| p.requires_grad(n).unwrap_or(false)).collect()
    }

    #[test]
    fn test_release_follows_epoch() -> Result<()> {
        let mut p = encoder_params()?;
        let cb = FreezingCallback::new(&p, "encoder_model.", 2);
        assert_eq!(cb.freeze_layers(), 2);
        let names = cb.tracked().to_vec();
        assert_eq!(names[3], "encoder_model.layers.10.w");

        // nothing counted yet: the whole encoder trains, frozen default included
        cb.apply(0.0, &mut p);
        assert_eq!(flags(&p, &names), vec![true, true, true, true]);

        cb.apply(1.0, &mut p);
        assert_eq!(flags(&p, &names), vec![false, false, true, true]);
        assert_eq!(p.requires_grad("decoder_model.lm_head.weight"), Some(true));

        cb.apply(2.0, &mut p);
        assert_eq!(flags(&p, &names), vec![true, false, true, true]);
        Ok(())
    }

    #[test]
    fn test_on_save_restores_defaults() -> Result<()> {
        let mut p = encoder_params()?;
        let mut cb = FreezingCallback::new(&p, "encoder_model.", 1000);
        assert_eq!(cb.freeze_layers(), 0);
        let mut control = TrainerControl::default();
        let state = TrainerState {
            epoch: 3.0,
            ..Default::default()
        };
        let names = cb.tracked().to_vec();
        cb.on_epoch_begin(&state, &mut control, &mut p)?;
        assert_eq!(flags(&p, &names), vec![true, true, true, true]);
        assert_eq!(p.trainable_count(), 5);

        cb.on_save(&state, &mut control, &mut p)?;
        assert_eq!(flags(&p, &names), vec![true, false, true, true]);

        // past the window: defaults again
        let late = TrainerState {
            epoch: 1000.0,
            ..Default::default()
        };
        cb.apply(1.0, &mut p);
        cb.on_epoch_begin(&late, &mut control, &mut p)?;
        assert_eq!(flags(&p, &names), vec![true, false, true, true]);
        Ok(())
    }

    #[test]
    fn test_release_list_is_capped() -> Result<()> {
        let p = encoder_params()?;
        let cb = FreezingCallback::new(&p, "encoder_model.", 0);
        assert_eq!(cb.freeze_layers(), 4);
        assert!(cb.release_list(1.0).is_none());
        assert_eq!(cb.release_list(0.5).map(<[String]>::len), Some(2));
        assert_eq!(cb.release_list(0.1).map(<[String]>::len), Some(4));
        Ok(())
    }

    #[test]
    fn test_early_stopping_patience() -> Result<()> {
        let mut cb = EarlyStoppingCallback::new(2);
        let state = TrainerState::default();
        let mut control = TrainerControl::default();
        let eval = |cb: &mut EarlyStoppingCallback, loss: f64, control: &mut TrainerControl| {
            let mut m = Map::new();
            m.insert("eval_loss".into(), loss.into());
            cb.on_evaluate(&state, control, &m)
        };
        eval(&mut cb, 1.0, &mut control)?;
        eval(&mut cb, 0.8, &mut control)?;
        eval(&mut cb, 0.8, &mut control)?;
        assert!(!control.should_training_stop);
        eval(&mut cb, 0.9, &mut control)?;
        assert!(control.should_training_stop);
        assert_eq!(cb.bad_evals(), 2);
        Ok(())
    }
}
