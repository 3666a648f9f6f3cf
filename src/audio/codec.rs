//! Conversion between normalized float samples, PCM16 and the base64 transport text
//!
//! Positive and negative samples use different scale factors because the
//! signed 16-bit range is asymmetric (-32768..=32767). With this split both
//! -1.0 and 1.0 map onto the extremes of the range and come back exactly.

use base64::Engine;

use crate::error::CodecError;

/// Scale applied to positive samples
const POSITIVE_SCALE: f32 = 32767.0;

/// Scale applied to negative samples
const NEGATIVE_SCALE: f32 = 32768.0;

/// Convert one normalized sample to PCM16
pub fn quantize(sample: f32) -> i16 {
    let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };

    let scaled = if clamped < 0.0 {
        clamped * NEGATIVE_SCALE
    } else {
        clamped * POSITIVE_SCALE
    };

    scaled.round() as i16
}

/// Convert one PCM16 sample back to the normalized range
pub fn dequantize(sample: i16) -> f32 {
    if sample < 0 {
        f32::from(sample) / NEGATIVE_SCALE
    } else {
        f32::from(sample) / POSITIVE_SCALE
    }
}

/// Serialize PCM16 samples as little-endian bytes
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian PCM16 bytes
pub fn bytes_to_pcm16(bytes: &[u8]) -> Result<Vec<i16>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode normalized samples into transport text (base64 of PCM16 LE)
pub fn encode(samples: &[f32]) -> String {
    let pcm: Vec<i16> = samples.iter().map(|&s| quantize(s)).collect();
    encode_pcm16(&pcm)
}

/// Decode transport text back into normalized samples
pub fn decode(text: &str) -> Result<Vec<f32>, CodecError> {
    Ok(decode_pcm16(text)?.into_iter().map(dequantize).collect())
}

/// Encode PCM16 samples into transport text
pub fn encode_pcm16(samples: &[i16]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16_to_bytes(samples))
}

/// Decode transport text into PCM16 samples
pub fn decode_pcm16(text: &str) -> Result<Vec<i16>, CodecError> {
    let bytes = decode_bytes(text)?;
    bytes_to_pcm16(&bytes)
}

/// Decode transport text into raw bytes
pub fn decode_bytes(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text.trim())?)
}

/// Root-mean-square amplitude of normalized samples
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Root-mean-square amplitude of PCM16 samples, in the normalized range
pub fn rms_pcm16(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = f64::from(dequantize(s));
            v * v
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}
