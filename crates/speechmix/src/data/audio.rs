//! WAV decoding and resampling

use rubato::{FftFixedInOut, Resampler};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{DataError, SAMPLING_RATE};

fn audio_error(path: &Path, message: impl Into<String>) -> DataError {
    DataError::Audio {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Decodes a WAV file to mono f32 samples in [-1, 1] plus its sample rate.
pub fn load_wav(path: &Path) -> Result<(Vec<f32>, u32), DataError> {
    let reader = BufReader::new(File::open(path).map_err(|e| audio_error(path, e.to_string()))?);
    let mut reader = hound::WavReader::new(reader).map_err(|e| audio_error(path, e.to_string()))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(audio_error(path, "sample rate is 0"));
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            if !(1..=32).contains(&spec.bits_per_sample) {
                return Err(audio_error(
                    path,
                    format!("unsupported bits per sample: {}", spec.bits_per_sample),
                ));
            }
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()
                .map_err(|e| audio_error(path, e.to_string()))?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| audio_error(path, e.to_string()))?,
    };

    Ok((to_mono(&samples, spec.channels as usize), spec.sample_rate))
}

/// Averages interleaved channels.
pub fn to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, String> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, 1024, 1)
        .map_err(|e| format!("resampler init failed: {e}"))?;
    let chunk_size = resampler.input_frames_max();

    let mut output = Vec::new();
    for chunk in samples.chunks(chunk_size) {
        let mut padded = chunk.to_vec();
        padded.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[padded], None)
            .map_err(|e| format!("resampling failed: {e}"))?;
        output.extend_from_slice(&result[0]);
    }

    let expected = (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    output.resize(expected, 0.0);
    Ok(output)
}

/// Mono 16 kHz waveform of a WAV file.
pub fn load_audio(path: &Path) -> Result<Vec<f32>, DataError> {
    let (samples, rate) = load_wav(path)?;
    resample(&samples, rate, SAMPLING_RATE).map_err(|e| audio_error(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, rate: u32, channels: u16, frames: &[i16]) -> anyhow::Result<()> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &s in frames {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
        Ok(())
    }

    #[test]
    fn test_stereo_is_mixed_to_mono() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("s.wav");
        write_wav(&path, SAMPLING_RATE, 2, &[16384, 0, -16384, -16384])?;
        let samples = load_audio(&path)?;
        assert_eq!(samples, vec![0.25, -0.5]);
        Ok(())
    }

    #[test]
    fn test_resample_length_follows_rate_ratio() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("r.wav");
        write_wav(&path, 8_000, 1, &vec![1000i16; 4_000])?;
        let samples = load_audio(&path)?;
        assert_eq!(samples.len(), 8_000);
        Ok(())
    }

    #[test]
    fn test_zero_bit_depth_header_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("zero_bits.wav");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&40u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&1u16.to_le_bytes()); // channels
        bytes.extend_from_slice(&SAMPLING_RATE.to_le_bytes());
        bytes.extend_from_slice(&(SAMPLING_RATE * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes()); // block align
        bytes.extend_from_slice(&0u16.to_le_bytes()); // bits per sample
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        std::fs::write(&path, bytes)?;

        let err = load_audio(&path).unwrap_err();
        assert!(matches!(err, DataError::Audio { .. }));
        Ok(())
    }

    #[test]
    fn test_missing_file_is_audio_error() {
        let err = load_audio(Path::new("/nonexistent/x.wav")).unwrap_err();
        assert!(matches!(err, DataError::Audio { .. }));
    }
}
