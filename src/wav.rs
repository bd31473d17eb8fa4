//! 16-bit PCM WAV encoding, plus the encoder registry used by export.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::StereoBuffer;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Wav,
    Mp3,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Wav => "wav",
            ExportFormat::Mp3 => "mp3",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Wav => "audio/wav",
            ExportFormat::Mp3 => "audio/mpeg",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Convert a float sample to 16-bit PCM, clamping to [-1, 1].
#[inline]
pub fn quantize(x: f32) -> i16 {
    let x = if x.is_nan() { 0.0 } else { x.clamp(-1.0, 1.0) };
    let scaled = if x < 0.0 { x * 32768.0 } else { x * 32767.0 };
    scaled.round() as i16
}

/// Encode non-interleaved channels as a canonical 44-byte-header WAV file.
pub fn encode_wav(channels: &[&[f32]], sample_rate: u32) -> Result<Vec<u8>, EngineError> {
    let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
    if frames == 0 {
        return Err(EngineError::EmptyRender);
    }
    let num_channels = channels.len() as u16;
    let bits_per_sample: u16 = 16;
    let block_align = num_channels * (bits_per_sample / 8);
    let byte_rate = sample_rate * block_align as u32;
    let data_size = (frames * block_align as usize) as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    buf.extend_from_slice(&num_channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk, interleaved
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for i in 0..frames {
        for channel in channels {
            buf.extend_from_slice(&quantize(channel[i]).to_le_bytes());
        }
    }

    Ok(buf)
}

/// An encoded artifact ready to hand to a download sink.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudio {
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
}

impl EncodedAudio {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

pub trait Encoder {
    fn format(&self) -> ExportFormat;
    fn encode(&self, buffer: &StereoBuffer) -> Result<Vec<u8>, EngineError>;
}

pub struct WavEncoder;

impl Encoder for WavEncoder {
    fn format(&self) -> ExportFormat {
        ExportFormat::Wav
    }

    fn encode(&self, buffer: &StereoBuffer) -> Result<Vec<u8>, EngineError> {
        encode_wav(&buffer.channels(), buffer.sample_rate)
    }
}

/// The encoders available to export. WAV is always present.
pub struct EncoderRegistry {
    encoders: Vec<Box<dyn Encoder>>,
}

impl Default for EncoderRegistry {
    fn default() -> Self {
        EncoderRegistry {
            encoders: vec![Box::new(WavEncoder)],
        }
    }
}

impl fmt::Debug for EncoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formats: Vec<ExportFormat> = self.encoders.iter().map(|e| e.format()).collect();
        f.debug_struct("EncoderRegistry").field("formats", &formats).finish()
    }
}

impl EncoderRegistry {
    /// Add an encoder, replacing any existing one for the same format.
    pub fn register(&mut self, encoder: Box<dyn Encoder>) {
        self.encoders.retain(|e| e.format() != encoder.format());
        self.encoders.push(encoder);
    }

    pub fn supports(&self, format: ExportFormat) -> bool {
        self.encoders.iter().any(|e| e.format() == format)
    }

    /// Encode as `format`, falling back to WAV when no encoder is registered.
    pub fn encode(
        &self,
        format: ExportFormat,
        buffer: &StereoBuffer,
    ) -> Result<EncodedAudio, EngineError> {
        if let Some(encoder) = self.encoders.iter().find(|e| e.format() == format) {
            return Ok(EncodedAudio {
                format,
                bytes: encoder.encode(buffer)?,
            });
        }
        log::warn!("No {format} encoder available; exporting WAV instead");
        Ok(EncodedAudio {
            format: ExportFormat::Wav,
            bytes: WavEncoder.encode(buffer)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;
    use std::io::Cursor;

    fn sine(frames: usize, hz: f32, rate: f32) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * PI * hz * i as f32 / rate).sin() * 0.5)
            .collect()
    }

    #[test]
    fn mono_sine_round_trips_through_a_decoder() {
        let samples = sine(44100, 440.0, 44100.0);
        let wav = encode_wav(&[&samples], 44100).unwrap();
        assert_eq!(wav.len(), 44 + 88200);

        let reader = hound::WavReader::new(Cursor::new(&wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);
        assert_eq!(reader.len(), 44100);

        let data_size = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(data_size, 44100 * 2);
    }

    #[test]
    fn header_fields_are_canonical() {
        let left = [0.0_f32; 10];
        let right = [0.0_f32; 10];
        let wav = encode_wav(&[&left, &right], 48000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");
        let file_size = u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]);
        assert_eq!(file_size as usize, wav.len() - 8);
        let byte_rate = u32::from_le_bytes([wav[28], wav[29], wav[30], wav[31]]);
        assert_eq!(byte_rate, 48000 * 4);
    }

    #[test]
    fn channels_are_interleaved() {
        let left = [1.0_f32, 0.0];
        let right = [-1.0_f32, 0.5];
        let wav = encode_wav(&[&left, &right], 44100).unwrap();
        let samples: Vec<i16> = wav[44..]
            .chunks(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![32767, -32768, 0, 16384]);
    }

    #[test]
    fn quantize_is_asymmetric_and_clamped() {
        assert_eq!(quantize(1.0), 32767);
        assert_eq!(quantize(-1.0), -32768);
        assert_eq!(quantize(2.0), 32767);
        assert_eq!(quantize(-3.0), -32768);
        assert_eq!(quantize(-0.5), -16384);
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn empty_buffer_cannot_be_encoded() {
        let empty: [f32; 0] = [];
        assert!(matches!(encode_wav(&[&empty], 44100), Err(EngineError::EmptyRender)));
        assert!(matches!(encode_wav(&[], 44100), Err(EngineError::EmptyRender)));
    }

    #[test]
    fn unavailable_format_falls_back_to_wav() {
        let registry = EncoderRegistry::default();
        assert!(!registry.supports(ExportFormat::Mp3));
        let mut buffer = StereoBuffer::silent(44100, 100);
        buffer.left[0] = 0.5;
        let out = registry.encode(ExportFormat::Mp3, &buffer).unwrap();
        assert_eq!(out.format, ExportFormat::Wav);
        assert_eq!(out.mime_type(), "audio/wav");
        assert_eq!(&out.bytes[0..4], b"RIFF");
    }

    struct FakeMp3;

    impl Encoder for FakeMp3 {
        fn format(&self) -> ExportFormat {
            ExportFormat::Mp3
        }

        fn encode(&self, _buffer: &StereoBuffer) -> Result<Vec<u8>, EngineError> {
            Ok(b"ID3".to_vec())
        }
    }

    #[test]
    fn registered_encoder_is_used() {
        let mut registry = EncoderRegistry::default();
        registry.register(Box::new(FakeMp3));
        let buffer = StereoBuffer::silent(44100, 1);
        let out = registry.encode(ExportFormat::Mp3, &buffer).unwrap();
        assert_eq!(out.format, ExportFormat::Mp3);
        assert_eq!(out.bytes, b"ID3");
    }
}
