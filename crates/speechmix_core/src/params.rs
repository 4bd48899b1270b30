//! ParamSet - named model parameters with per-parameter trainability
//!
//! candle has no `requires_grad` flag on variables; trainability lives here
//! and is enforced by dropping frozen gradients before the optimizer step.

use candle_core::backprop::GradStore;
use candle_core::{Result, Var};
use candle_nn::VarMap;
use std::cmp::Ordering;

#[derive(Clone)]
pub struct ParamEntry {
    pub name: String,
    pub var: Var,
    pub requires_grad: bool,
}

/// Parameters in depth order: dotted names compared with numeric segments
/// as numbers, so `layers.2` precedes `layers.10`.
#[derive(Clone, Default)]
pub struct ParamSet {
    entries: Vec<ParamEntry>,
}

impl ParamSet {
    /// Snapshot of every variable in `varmap`, all trainable.
    pub fn from_varmap(varmap: &VarMap) -> Result<Self> {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("VarMap lock poisoned".to_string()))?;
        let entries = data
            .iter()
            .map(|(name, var)| ParamEntry {
                name: name.clone(),
                var: var.clone(),
                requires_grad: true,
            })
            .collect();
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(mut entries: Vec<ParamEntry>) -> Self {
        entries.sort_by(|a, b| natural_cmp(&a.name, &b.name));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamEntry> {
        self.entries.iter()
    }

    /// Names under `prefix`, in depth order.
    pub fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.name.starts_with(prefix))
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn requires_grad(&self, name: &str) -> Option<bool> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.requires_grad)
    }

    /// Returns false when no parameter has that name.
    pub fn set_requires_grad(&mut self, name: &str, flag: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(e) => {
                e.requires_grad = flag;
                true
            }
            None => false,
        }
    }

    pub fn set_all(&mut self, flag: bool) {
        for e in &mut self.entries {
            e.requires_grad = flag;
        }
    }

    /// Freezes every parameter under `prefix` whose name (relative to the
    /// prefix) contains none of `except`. Returns how many were frozen.
    pub fn freeze_except(&mut self, prefix: &str, except: &[String]) -> usize {
        let mut frozen = 0;
        for e in &mut self.entries {
            let Some(rel) = e.name.strip_prefix(prefix) else {
                continue;
            };
            if !except.iter().any(|x| rel.contains(x.as_str())) {
                e.requires_grad = false;
                frozen += 1;
            }
        }
        frozen
    }

    pub fn trainable_count(&self) -> usize {
        self.entries.iter().filter(|e| e.requires_grad).count()
    }

    /// Number of scalar weights that currently receive updates.
    pub fn trainable_elements(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.requires_grad)
            .map(|e| e.var.elem_count())
            .sum()
    }

    pub fn vars(&self) -> Vec<Var> {
        self.entries.iter().map(|e| e.var.clone()).collect()
    }

    /// Drops gradients of frozen parameters so the optimizer skips them.
    pub fn strip_frozen_grads(&self, grads: &mut GradStore) -> usize {
        let mut removed = 0;
        for e in self.entries.iter().filter(|e| !e.requires_grad) {
            if grads.remove(e.var.as_tensor()).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Adds the gradients in `grads` into `acc`, parameter by parameter.
    pub fn accumulate_grads(&self, acc: &mut GradStore, grads: &GradStore) -> Result<()> {
        for e in &self.entries {
            let t = e.var.as_tensor();
            if let Some(g) = grads.get(t) {
                let sum = match acc.get(t) {
                    Some(prev) => (prev + g)?,
                    None => g.clone(),
                };
                acc.insert(t, sum);
            }
        }
        Ok(())
    }
}

/// Compares dotted parameter names segment by segment, numerically where
/// both segments are integers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ia = a.split('.');
    let mut ib = b.split('.');
    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
