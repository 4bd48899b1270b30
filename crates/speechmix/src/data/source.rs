//! Raw split manifests
//!
//! A split is `{dataset}/{field}/{split}.jsonl` with one
//! `{"audio": "...", "text" | "sentence": "..."}` object per line, or a
//! Common Voice style `{split}.tsv` with `path` and `sentence` columns.

use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::DataError;

#[derive(Clone, Debug, PartialEq)]
pub struct RawExample {
    pub audio: PathBuf,
    pub sentence: String,
}

/// Directory holding the manifests of one dataset config.
pub fn split_dir(root: &Path, field: &str) -> PathBuf {
    if field.is_empty() {
        root.to_path_buf()
    } else {
        root.join(field)
    }
}

pub fn read_split(root: &Path, field: &str, split: &str) -> Result<Vec<RawExample>, DataError> {
    let dir = split_dir(root, field);
    let jsonl = dir.join(format!("{split}.jsonl"));
    let tsv = dir.join(format!("{split}.tsv"));
    if jsonl.exists() {
        read_jsonl(&jsonl)
    } else if tsv.exists() {
        read_tsv(&tsv)
    } else {
        Err(DataError::ManifestNotFound {
            dir,
            split: split.to_string(),
        })
    }
}

fn manifest_error(path: &Path, line: usize, message: impl Into<String>) -> DataError {
    DataError::Manifest {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

fn resolve_audio(base: &Path, rel: &str) -> PathBuf {
    let p = Path::new(rel);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    let clips = base.join("clips").join(rel);
    if clips.exists() {
        clips
    } else {
        base.join(rel)
    }
}

pub fn read_jsonl(path: &Path) -> Result<Vec<RawExample>, DataError> {
    let base = path.parent().unwrap_or(Path::new("."));
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line).map_err(|e| manifest_error(path, i + 1, e.to_string()))?;
        let audio = value
            .get("audio")
            .or_else(|| value.get("path"))
            .and_then(|v| v.as_str().or_else(|| v.get("path").and_then(Value::as_str)))
            .ok_or_else(|| manifest_error(path, i + 1, "missing 'audio' path"))?;
        // "text" wins over "sentence" when both are present.
        let sentence = value
            .get("text")
            .or_else(|| value.get("sentence"))
            .and_then(Value::as_str)
            .ok_or_else(|| manifest_error(path, i + 1, "missing 'text' or 'sentence'"))?;
        rows.push(RawExample {
            audio: resolve_audio(base, audio),
            sentence: sentence.to_string(),
        });
    }
    Ok(rows)
}

pub fn read_tsv(path: &Path) -> Result<Vec<RawExample>, DataError> {
    let base = path.parent().unwrap_or(Path::new("."));
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header = match lines.next() {
        Some(h) => h?,
        None => return Ok(Vec::new()),
    };
    let columns: Vec<&str> = header.split('\t').collect();
    let find = |name: &str| columns.iter().position(|c| c.trim() == name);
    let path_col = find("path").ok_or_else(|| manifest_error(path, 1, "no 'path' column"))?;
    let text_col = find("sentence")
        .or_else(|| find("text"))
        .ok_or_else(|| manifest_error(path, 1, "no 'sentence' or 'text' column"))?;

    let mut rows = Vec::new();
    for (i, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let (Some(audio), Some(sentence)) = (fields.get(path_col), fields.get(text_col)) else {
            return Err(manifest_error(path, i + 2, "row has fewer columns than the header"));
        };
        rows.push(RawExample {
            audio: resolve_audio(base, audio),
            sentence: sentence.to_string(),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonl_prefers_text_over_sentence() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let split = dir.path().join("en");
        std::fs::create_dir_all(&split)?;
        std::fs::write(
            split.join("train.jsonl"),
            "{\"audio\": \"a.wav\", \"text\": \"Hello\", \"sentence\": \"ignored\"}\n\n{\"path\": \"/abs/b.wav\", \"sentence\": \"World\"}\n",
        )?;
        let rows = read_split(dir.path(), "en", "train")?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sentence, "Hello");
        assert_eq!(rows[0].audio, split.join("a.wav"));
        assert_eq!(rows[1].audio, PathBuf::from("/abs/b.wav"));
        Ok(())
    }

    #[test]
    fn test_tsv_common_voice_layout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("clips"))?;
        std::fs::write(dir.path().join("clips/x.wav"), b"")?;
        std::fs::write(
            dir.path().join("dev.tsv"),
            "client_id\tpath\tsentence\nc1\tx.wav\tA cat\n",
        )?;
        let rows = read_split(dir.path(), "", "dev")?;
        assert_eq!(rows, vec![RawExample { audio: dir.path().join("clips/x.wav"), sentence: "A cat".into() }]);
        Ok(())
    }

    #[test]
    fn test_missing_manifest_and_bad_rows() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(matches!(read_split(dir.path(), "", "train"), Err(DataError::ManifestNotFound { .. })));

        std::fs::write(dir.path().join("train.jsonl"), "{\"audio\": \"a.wav\"}\n")?;
        match read_split(dir.path(), "", "train") {
            Err(DataError::Manifest { line, .. }) => assert_eq!(line, 1),
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }
}
