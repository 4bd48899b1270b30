//! Checkpoint Management - trainer state persistence and rotation

use anyhow::{Context, Result};
use candle_nn::VarMap;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CHECKPOINT_PREFIX: &str = "checkpoint-";
pub const MODEL_FILE: &str = "model.safetensors";
pub const STATE_FILE: &str = "trainer_state.json";

/// Progress of a run; persisted with every checkpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrainerState {
    pub epoch: f64,
    pub global_step: usize,
    pub max_steps: usize,
    /// Lowest `eval_loss` seen so far.
    pub best_metric: Option<f64>,
    pub best_model_checkpoint: Option<PathBuf>,
    pub log_history: Vec<serde_json::Value>,
    #[serde(default)]
    pub date: String,
}

impl TrainerState {
    pub fn load(checkpoint: &Path) -> Result<Self> {
        let path = checkpoint.join(STATE_FILE);
        let file = File::open(&path).with_context(|| format!("opening {:?}", path))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn save(&mut self, checkpoint: &Path) -> Result<()> {
        self.date = chrono::Local::now().to_rfc3339();
        let file = File::create(checkpoint.join(STATE_FILE))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

/// Writes `varmap` while holding an exclusive lock on `{path}.lock`.
pub fn save_securely(varmap: &VarMap, path: &Path) -> Result<()> {
    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    let lock_file = File::create(&lock_path)?;
    lock_file.lock_exclusive()?;
    let saved = varmap.save(path);
    lock_file.unlock()?;
    let _ = std::fs::remove_file(&lock_path);
    saved.with_context(|| format!("saving {:?}", path))
}

pub fn checkpoint_dir(output_dir: &Path, step: usize) -> PathBuf {
    output_dir.join(format!("{CHECKPOINT_PREFIX}{step}"))
}

/// Writes `checkpoint-{step}` with weights and trainer state.
pub fn save_checkpoint(varmap: &VarMap, state: &mut TrainerState, output_dir: &Path) -> Result<PathBuf> {
    let dir = checkpoint_dir(output_dir, state.global_step);
    std::fs::create_dir_all(&dir)?;
    save_securely(varmap, &dir.join(MODEL_FILE))?;
    state.save(&dir)?;
    info!("💾 Saved checkpoint {:?}", dir);
    Ok(dir)
}

/// Checkpoint directories under `output_dir`, oldest step first.
pub fn list_checkpoints(output_dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut found = Vec::new();
    if !output_dir.is_dir() {
        return Ok(found);
    }
    for entry in std::fs::read_dir(output_dir)? {
        let path = entry?.path();
        let step = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(CHECKPOINT_PREFIX))
            .and_then(|s| s.parse::<usize>().ok());
        if let (Some(step), true) = (step, path.is_dir()) {
            found.push((step, path));
        }
    }
    found.sort_by_key(|(step, _)| *step);
    Ok(found)
}

/// Deletes the oldest checkpoints until at most `limit` remain. The best
/// and the newest checkpoint are never deleted, so up to two may remain
/// with `limit == 1`. A limit of 0 keeps everything.
pub fn rotate_checkpoints(output_dir: &Path, limit: usize, best: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut deleted = Vec::new();
    if limit == 0 {
        return Ok(deleted);
    }
    let checkpoints = list_checkpoints(output_dir)?;
    let newest = checkpoints.last().map(|(_, p)| p.clone());
    let mut remaining = checkpoints.len();
    for (_, path) in &checkpoints {
        if remaining <= limit {
            break;
        }
        let is_best = best.is_some_and(|b| same_dir(b, path));
        let is_newest = newest.as_deref().is_some_and(|n| same_dir(n, path));
        if is_best || is_newest {
            continue;
        }
        std::fs::remove_dir_all(path)?;
        info!("🗑️ Deleted old checkpoint {:?}", path);
        deleted.push(path.clone());
        remaining -= 1;
    }
    Ok(deleted)
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch_checkpoint(root: &Path, step: usize) -> Result<PathBuf> {
        let dir = checkpoint_dir(root, step);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    #[test]
    fn test_rotation_keeps_best_and_newest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let best = touch_checkpoint(dir.path(), 700)?;
        for step in [1400, 2100, 2800] {
            touch_checkpoint(dir.path(), step)?;
        }
        std::fs::create_dir_all(dir.path().join("checkpoint-notanumber"))?;

        let deleted = rotate_checkpoints(dir.path(), 2, Some(&best))?;
        assert_eq!(deleted, vec![checkpoint_dir(dir.path(), 1400), checkpoint_dir(dir.path(), 2100)]);
        let left: Vec<usize> = list_checkpoints(dir.path())?.into_iter().map(|(s, _)| s).collect();
        assert_eq!(left, vec![700, 2800]);

        // limit 1 with an older best keeps both.
        rotate_checkpoints(dir.path(), 1, Some(&best))?;
        assert_eq!(list_checkpoints(dir.path())?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_state_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut state = TrainerState {
            epoch: 2.5,
            global_step: 35,
            max_steps: 100,
            best_metric: Some(0.75),
            best_model_checkpoint: Some(dir.path().join("checkpoint-35")),
            log_history: vec![serde_json::json!({"loss": 1.0, "step": 10})],
            date: String::new(),
        };
        state.save(dir.path())?;
        let loaded = TrainerState::load(dir.path())?;
        assert_eq!(loaded.global_step, 35);
        assert_eq!(loaded.best_metric, Some(0.75));
        assert_eq!(loaded.log_history.len(), 1);
        assert!(!loaded.date.is_empty());
        Ok(())
    }
}
