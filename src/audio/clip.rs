//! Decoding of complete synthesized utterances
//!
//! The chunked delivery convention sends a whole clip split into base64
//! fragments. Once reassembled, the bytes are either a WAV file, another
//! container the synthesizer produced (MP3, OGG, FLAC), or bare PCM16.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use super::codec;
use crate::error::CodecError;

/// Mono audio ready for the output device
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Clip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / u64::from(self.sample_rate.max(1))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Detected clip container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipFormat {
    Wav,
    Compressed,
    RawPcm16,
}

/// Guess the container from the leading bytes
pub fn sniff(bytes: &[u8]) -> ClipFormat {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return ClipFormat::Wav;
    }

    let id3 = bytes.starts_with(b"ID3");
    let mpeg_sync = bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0;
    let ogg = bytes.starts_with(b"OggS");
    let flac = bytes.starts_with(b"fLaC");

    if id3 || mpeg_sync || ogg || flac {
        ClipFormat::Compressed
    } else {
        ClipFormat::RawPcm16
    }
}

/// Decode a reassembled clip, down-mixing to mono
///
/// `raw_sample_rate` applies when the bytes carry no container.
pub fn decode_clip(bytes: &[u8], raw_sample_rate: u32) -> Result<Clip, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }

    let format = sniff(bytes);
    debug!("Decoding {} byte clip as {:?}", bytes.len(), format);

    let clip = match format {
        ClipFormat::Wav => decode_wav(bytes)?,
        ClipFormat::Compressed => decode_compressed(bytes)?,
        ClipFormat::RawPcm16 => {
            let pcm = codec::bytes_to_pcm16(bytes)?;
            Clip::new(pcm.into_iter().map(codec::dequantize).collect(), raw_sample_rate)
        }
    };

    if clip.is_empty() {
        return Err(CodecError::Empty);
    }

    Ok(clip)
}

fn decode_wav(bytes: &[u8]) -> Result<Clip, CodecError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int if spec.bits_per_sample == 16 => reader
            .into_samples::<i16>()
            .map(|s| s.map(codec::dequantize))
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let full_scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<Result<_, _>>()?
        }
    };

    Ok(Clip::new(
        downmix(&interleaved, usize::from(spec.channels)),
        spec.sample_rate,
    ))
}

fn decode_compressed(bytes: &[u8]) -> Result<Clip, CodecError> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| CodecError::Clip(e.to_string()))?;

    let mut reader = probed.format;
    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| CodecError::Clip("no audio track in clip".to_string()))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| CodecError::Clip(e.to_string()))?;

    let mut samples = Vec::new();

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(CodecError::Clip(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if sample_rate == 0 {
                    sample_rate = spec.rate;
                }
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend(downmix(buffer.samples(), spec.channels.count()));
            }
            // Corrupt packet, skip it
            Err(SymphoniaError::DecodeError(e)) => debug!("Skipping undecodable packet: {}", e),
            Err(e) => return Err(CodecError::Clip(e.to_string())),
        }
    }

    if sample_rate == 0 {
        return Err(CodecError::Clip("clip has no sample rate".to_string()));
    }

    Ok(Clip::new(samples, sample_rate))
}

/// Average interleaved channels into mono
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
