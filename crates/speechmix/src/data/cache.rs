//! On-disk cache of prepared splits
//!
//! A cache directory holds:
//! - `dataset_info.json`: row count, sample count and creation time
//! - `rows.json`: per-row transcript, token ids and audio offset
//! - `audio.f32`: every waveform back to back, little-endian f32
//!
//! The directory is written under a temporary name and renamed into place,
//! so a present `dataset_info.json` marks a complete cache.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{DataError, Example};

const INFO_FILE: &str = "dataset_info.json";
const ROWS_FILE: &str = "rows.json";
const AUDIO_FILE: &str = "audio.f32";
const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub version: u32,
    pub num_rows: usize,
    pub total_samples: usize,
    pub created: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RowMeta {
    /// Offset into `audio.f32`, in samples.
    offset: usize,
    length: usize,
    text: String,
    labels: Vec<u32>,
    input_ids: Vec<u32>,
    text_input_ids: Option<Vec<u32>>,
}

pub fn is_cached(path: &Path) -> bool {
    path.join(INFO_FILE).is_file()
}

fn corrupt(path: &Path, message: impl Into<String>) -> DataError {
    DataError::CorruptCache {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

pub fn save_split(path: &Path, examples: &[Example]) -> Result<(), DataError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "split".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));
    if tmp.exists() {
        fs::remove_dir_all(&tmp)?;
    }
    fs::create_dir_all(&tmp)?;

    let mut rows = Vec::with_capacity(examples.len());
    let mut audio = BufWriter::new(File::create(tmp.join(AUDIO_FILE))?);
    let mut offset = 0usize;
    for ex in examples {
        for &s in &ex.input_values {
            audio.write_f32::<LittleEndian>(s)?;
        }
        rows.push(RowMeta {
            offset,
            length: ex.input_values.len(),
            text: ex.text.clone(),
            labels: ex.labels.clone(),
            input_ids: ex.input_ids.clone(),
            text_input_ids: ex.text_input_ids.clone(),
        });
        offset += ex.input_values.len();
    }
    audio.flush()?;

    let json_err = |e: serde_json::Error| corrupt(&tmp, e.to_string());
    serde_json::to_writer(BufWriter::new(File::create(tmp.join(ROWS_FILE))?), &rows).map_err(json_err)?;
    let info = DatasetInfo {
        version: CACHE_VERSION,
        num_rows: rows.len(),
        total_samples: offset,
        created: chrono::Local::now().to_rfc3339(),
    };
    serde_json::to_writer_pretty(File::create(tmp.join(INFO_FILE))?, &info).map_err(json_err)?;

    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// A cached split; waveforms stay memory-mapped until requested.
pub struct CachedSplit {
    path: PathBuf,
    rows: Vec<RowMeta>,
    audio: Option<Mmap>,
}

pub fn load_split(path: &Path) -> Result<CachedSplit, DataError> {
    let info: DatasetInfo = serde_json::from_reader(BufReader::new(File::open(path.join(INFO_FILE))?))
        .map_err(|e| corrupt(path, format!("{INFO_FILE}: {e}")))?;
    if info.version != CACHE_VERSION {
        return Err(corrupt(path, format!("unsupported cache version {}", info.version)));
    }
    let rows: Vec<RowMeta> = serde_json::from_reader(BufReader::new(File::open(path.join(ROWS_FILE))?))
        .map_err(|e| corrupt(path, format!("{ROWS_FILE}: {e}")))?;
    if rows.len() != info.num_rows {
        return Err(corrupt(path, format!("{} rows listed, {} expected", rows.len(), info.num_rows)));
    }

    let audio_file = File::open(path.join(AUDIO_FILE))?;
    let bytes = audio_file.metadata()?.len() as usize;
    if bytes != info.total_samples * 4 {
        return Err(corrupt(path, format!("{AUDIO_FILE} has {bytes} bytes, expected {}", info.total_samples * 4)));
    }
    if let Some(bad) = rows.iter().find(|r| r.offset + r.length > info.total_samples) {
        return Err(corrupt(path, format!("row at offset {} overruns the audio file", bad.offset)));
    }
    // Zero-length files cannot be mapped.
    let audio = if bytes == 0 {
        None
    } else {
        Some(unsafe { Mmap::map(&audio_file)? })
    };

    Ok(CachedSplit {
        path: path.to_path_buf(),
        rows,
        audio,
    })
}

impl CachedSplit {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Audio length of every row, in samples.
    pub fn lengths(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.length).collect()
    }

    pub fn get(&self, index: usize) -> Result<Example, DataError> {
        let row = self.rows.get(index).ok_or(DataError::RowOutOfRange {
            index,
            len: self.rows.len(),
        })?;
        let mut input_values = vec![0f32; row.length];
        if row.length > 0 {
            let mmap = self.audio.as_ref().ok_or_else(|| corrupt(&self.path, "audio file is empty"))?;
            let bytes = &mmap[row.offset * 4..(row.offset + row.length) * 4];
            LittleEndian::read_f32_into(bytes, &mut input_values);
        }
        Ok(Example {
            input_values,
            length: row.length,
            text: row.text.clone(),
            labels: row.labels.clone(),
            input_ids: row.input_ids.clone(),
            text_input_ids: row.text_input_ids.clone(),
        })
    }

    pub fn get_many(&self, indices: &[usize]) -> Result<Vec<Example>, DataError> {
        indices.iter().map(|&i| self.get(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(samples: Vec<f32>, text: &str, labels: Vec<u32>, text_ids: Option<Vec<u32>>) -> Example {
        Example {
            length: samples.len(),
            input_values: samples,
            text: text.to_string(),
            input_ids: labels.clone(),
            labels,
            text_input_ids: text_ids,
        }
    }

    #[test]
    fn test_split_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("train_ds_cv_en_train");
        let examples = vec![
            example(vec![0.5, -0.25, 1e-7, f32::MIN_POSITIVE], "hello world", vec![4, 5, 2], None),
            example(vec![], "", vec![2], Some(vec![])),
            example(vec![-1.0; 7], "the cat", vec![6, 7, 2], Some(vec![6, 7])),
        ];
        assert!(!is_cached(&path));
        save_split(&path, &examples)?;
        assert!(is_cached(&path));

        let split = load_split(&path)?;
        assert_eq!(split.len(), 3);
        assert_eq!(split.lengths(), vec![4, 0, 7]);
        let loaded = split.get_many(&[0, 1, 2])?;
        assert_eq!(loaded, examples);
        assert!(matches!(split.get(3), Err(DataError::RowOutOfRange { index: 3, len: 3 })));
        Ok(())
    }

    #[test]
    fn test_resave_replaces_previous_cache() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("valid_ds_x__test");
        save_split(&path, &[example(vec![1.0; 10], "a", vec![11, 2], None)])?;
        save_split(&path, &[])?;
        let split = load_split(&path)?;
        assert!(split.is_empty());
        let leftovers: Vec<_> = fs::read_dir(dir.path())?.collect();
        assert_eq!(leftovers.len(), 1);
        Ok(())
    }

    #[test]
    fn test_truncated_audio_is_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("c");
        save_split(&path, &[example(vec![0.1; 4], "a", vec![2], None)])?;
        fs::write(path.join(AUDIO_FILE), [0u8; 6])?;
        assert!(matches!(load_split(&path), Err(DataError::CorruptCache { .. })));
        Ok(())
    }
}
