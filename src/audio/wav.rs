// WAV boundary - decode stems from disk, encode rendered segments
// The core works on AudioBuffer only; this module is the file edge

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::audio::AudioBuffer;
use crate::error::CoreResult;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to read WAV file: {0}")]
    WavReadError(#[from] hound::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
}

/// Decode a WAV file from raw bytes
/// Samples are normalized to f32 in [-1.0, 1.0]
pub fn decode_wav(data: &[u8]) -> CoreResult<AudioBuffer> {
    let reader = WavReader::new(Cursor::new(data)).map_err(AudioError::from)?;
    read_samples(reader)
}

/// Decode a WAV file from disk
pub fn read_wav(path: &Path) -> CoreResult<AudioBuffer> {
    let reader = WavReader::open(path).map_err(AudioError::from)?;
    let buffer = read_samples(reader)?;

    log::info!(
        "Loaded {}: {:.2}s @ {} Hz, {} ch",
        path.display(),
        buffer.duration_secs(),
        buffer.sample_rate(),
        buffer.channels()
    );

    Ok(buffer)
}

fn read_samples<R: std::io::Read>(mut reader: WavReader<R>) -> CoreResult<AudioBuffer> {
    let spec = reader.spec();
    let bit_depth = spec.bits_per_sample;

    let samples: Vec<f32> = match (spec.sample_format, bit_depth) {
        (SampleFormat::Int, 8) => {
            // hound yields 8-bit PCM already centered on zero
            collect_int(&mut reader, 128.0)?
        }
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(AudioError::from)?
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect(),
        (SampleFormat::Int, 24) => collect_int(&mut reader, 8388608.0)?,
        (SampleFormat::Int, 32) => collect_int(&mut reader, 2147483648.0)?,
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(AudioError::from)?,
        _ => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} {}-bit audio",
                spec.sample_format, bit_depth
            ))
            .into());
        }
    };

    AudioBuffer::new(samples, spec.sample_rate, spec.channels)
}

fn collect_int<R: std::io::Read>(reader: &mut WavReader<R>, scale: f32) -> CoreResult<Vec<f32>> {
    let samples = reader
        .samples::<i32>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(AudioError::from)?;
    Ok(samples.into_iter().map(|s| s as f32 / scale).collect())
}

fn wav_spec(buffer: &AudioBuffer) -> WavSpec {
    WavSpec {
        channels: buffer.channels(),
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Encode a buffer as 16-bit PCM WAV bytes
pub fn encode_wav(buffer: &AudioBuffer) -> CoreResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, wav_spec(buffer)).map_err(AudioError::from)?;

        for &sample in buffer.samples() {
            let sample_i16 = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            writer.write_sample(sample_i16).map_err(AudioError::from)?;
        }

        writer.finalize().map_err(AudioError::from)?;
    }

    Ok(cursor.into_inner())
}

/// Write a buffer to disk as 16-bit PCM WAV
pub fn write_wav(path: &Path, buffer: &AudioBuffer) -> CoreResult<()> {
    let bytes = encode_wav(buffer)?;
    std::fs::write(path, bytes)?;
    log::debug!("Wrote {} ({:.2}s)", path.display(), buffer.duration_secs());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn test_encode_preserves_format() {
        let buffer = AudioBuffer::new(vec![0.5, -0.5, 0.25, -0.25], 44100, 2).unwrap();
        let decoded = decode_wav(&encode_wav(&buffer).unwrap()).unwrap();

        assert_eq!(decoded.channels(), 2);
        assert_eq!(decoded.sample_rate(), 44100);
        assert_eq!(decoded.frame_count(), 2);
        for (a, b) in decoded.samples().iter().zip(buffer.samples()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let buffer = AudioBuffer::mono(vec![1.5, -2.0], 8000).unwrap();
        let decoded = decode_wav(&encode_wav(&buffer).unwrap()).unwrap();
        assert!(decoded.samples().iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        let result = decode_wav(b"definitely not a wav file");
        assert!(matches!(result, Err(CoreError::Audio(_))));
    }

    #[test]
    fn test_write_and_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let buffer = AudioBuffer::mono(vec![0.1; 800], 8000).unwrap();

        write_wav(&path, &buffer).unwrap();
        let loaded = read_wav(&path).unwrap();
        assert_eq!(loaded.frame_count(), 800);
    }
}
