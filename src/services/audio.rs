//! Audio normalisation for transcription uploads
//!
//! WAV and MP3 input is decoded, downmixed to mono and resampled to 16 kHz.
//! Containers we cannot decode locally (OGG/Opus voice notes) are passed
//! through untouched; the transcription API accepts them directly.

use crate::{Error, Result};

/// Sample rate expected by the transcription API
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Container format, sniffed from the leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    Ogg,
    Unknown,
}

impl AudioFormat {
    /// Detect the container from magic bytes
    #[must_use]
    pub fn detect(data: &[u8]) -> Self {
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
            Self::Wav
        } else if data.starts_with(b"OggS") {
            Self::Ogg
        } else if data.starts_with(b"ID3")
            || (data.len() >= 2 && data[0] == 0xFF && data[1] & 0xE0 == 0xE0)
        {
            Self::Mp3
        } else {
            Self::Unknown
        }
    }

    /// File name and MIME type used for the multipart upload
    #[must_use]
    pub const fn upload_name(self) -> (&'static str, &'static str) {
        match self {
            Self::Wav | Self::Mp3 => ("audio.wav", "audio/wav"),
            Self::Ogg => ("audio.ogg", "audio/ogg"),
            Self::Unknown => ("audio.bin", "application/octet-stream"),
        }
    }
}

/// Audio ready to upload
#[derive(Debug)]
pub struct PreparedAudio {
    pub data: Vec<u8>,
    pub format: AudioFormat,
}

/// Normalise raw audio for upload
///
/// # Errors
///
/// Returns error if the input is empty or a WAV/MP3 stream cannot be decoded
pub fn prepare_for_upload(data: Vec<u8>) -> Result<PreparedAudio> {
    if data.is_empty() {
        return Err(Error::Audio("empty audio file".to_string()));
    }

    let format = AudioFormat::detect(&data);
    let data = match format {
        AudioFormat::Wav => {
            let (samples, rate) = decode_wav(&data)?;
            to_mono_16k_wav(&samples, rate)?
        }
        AudioFormat::Mp3 => {
            let (samples, rate) = decode_mp3(&data)?;
            to_mono_16k_wav(&samples, rate)?
        }
        AudioFormat::Ogg | AudioFormat::Unknown => data,
    };

    Ok(PreparedAudio { data, format })
}

fn to_mono_16k_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let resampled = if sample_rate == TARGET_SAMPLE_RATE {
        samples.to_vec()
    } else {
        resample_audio(samples, sample_rate, TARGET_SAMPLE_RATE)?
    };

    samples_to_wav(&resampled, TARGET_SAMPLE_RATE)
}

/// Decode a WAV stream into mono f32 samples
fn decode_wav(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::new(std::io::Cursor::new(data))
        .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
        }
    };

    let mono = if channels == 1 {
        interleaved
    } else {
        #[allow(clippy::cast_precision_loss)]
        let divisor = channels as f32;
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / divisor)
            .collect()
    };

    Ok((mono, spec.sample_rate))
}

/// Decode an MP3 stream into mono f32 samples
fn decode_mp3(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(data);
    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate = TARGET_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                {
                    sample_rate = frame.sample_rate as u32;
                }
                if frame.channels == 2 {
                    for chunk in frame.data.chunks(2) {
                        let mono =
                            f32::midpoint(f32::from(chunk[0]), f32::from(chunk[1])) / 32768.0;
                        samples.push(mono);
                    }
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Audio("MP3 stream contained no frames".to_string()));
    }

    Ok((samples, sample_rate))
}

/// Resample audio using rubato
///
/// The final partial chunk is zero-padded so trailing speech is not dropped.
#[allow(clippy::cast_possible_truncation)]
fn resample_audio(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::new();

    for chunk in input.chunks(chunk_size) {
        let mut block = chunk.to_vec();
        block.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output.iter().map(|&s| s as f32).collect())
}

/// Encode mono f32 samples as 16-bit PCM WAV
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_wav(sample_rate: u32, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let v = i16::try_from(i % 1000).unwrap();
                writer.write_sample(v).unwrap();
                writer.write_sample(-v).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_detect_formats() {
        assert_eq!(AudioFormat::detect(&stereo_wav(16_000, 4)), AudioFormat::Wav);
        assert_eq!(AudioFormat::detect(b"OggS\0\x02rest"), AudioFormat::Ogg);
        assert_eq!(AudioFormat::detect(b"ID3\x04\0"), AudioFormat::Mp3);
        assert_eq!(AudioFormat::detect(b"hello"), AudioFormat::Unknown);
    }

    #[test]
    fn test_stereo_wav_becomes_mono_16k() {
        let prepared = prepare_for_upload(stereo_wav(48_000, 4800)).unwrap();
        assert_eq!(prepared.format, AudioFormat::Wav);

        let reader = hound::WavReader::new(std::io::Cursor::new(prepared.data)).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, TARGET_SAMPLE_RATE);
        assert!(reader.len() > 0);
    }

    #[test]
    fn test_ogg_passes_through() {
        let data = b"OggS\0\x02opus-payload".to_vec();
        let prepared = prepare_for_upload(data.clone()).unwrap();
        assert_eq!(prepared.format, AudioFormat::Ogg);
        assert_eq!(prepared.data, data);
    }

    #[test]
    fn test_empty_audio_rejected() {
        assert!(prepare_for_upload(Vec::new()).is_err());
    }
}
