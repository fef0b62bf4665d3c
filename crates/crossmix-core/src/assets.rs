use std::{
    collections::BTreeSet,
    fs::{self, File},
    io::{Cursor, ErrorKind},
    path::Path,
};

use anyhow::{Context, Result};
use rubato::{FftFixedIn, Resampler};
use serde::{Deserialize, Serialize};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::{error::MixError, time::SAMPLE_RATE};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioAssetEntry {
    pub path: String,
    pub name: String,
    pub extension: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    /// Mono samples at the mixing rate, resampled when the source differs.
    pub fn into_mix_samples(self) -> Result<Vec<f32>, MixError> {
        if self.sample_rate == SAMPLE_RATE {
            return Ok(self.samples);
        }
        if self.sample_rate == 0 {
            return Err(MixError::validation("decoded audio reports a zero sample rate"));
        }
        Ok(resample_mono(&self.samples, self.sample_rate, SAMPLE_RATE)?)
    }
}

const RESAMPLE_CHUNK: usize = 1024;

/// Band-limited FFT resampling of a mono buffer; the output keeps the input duration.
#[instrument(skip(samples), fields(samples = samples.len()))]
pub fn resample_mono(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    let expected =
        (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;
    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        2,
        1,
    )
    .context("failed to build resampler")?;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in chunks.by_ref() {
        let frames = resampler.process(&[chunk], None)?;
        output.extend_from_slice(&frames[0]);
    }
    let frames = resampler.process_partial(Some(&[chunks.remainder()][..]), None)?;
    output.extend_from_slice(&frames[0]);
    while output.len() < expected + delay {
        let frames = resampler.process_partial(None::<&[&[f32]]>, None)?;
        if frames[0].is_empty() {
            break;
        }
        output.extend_from_slice(&frames[0]);
    }

    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);
    debug!(from_rate, to_rate, output = output.len(), "resampled");
    Ok(output)
}

#[instrument(fields(path = %path.display()))]
pub fn decode_audio_file_mono(path: &Path) -> Result<DecodedAudio> {
    let file = File::open(path)
        .with_context(|| format!("failed to open audio file: {}", path.display()))?;
    let extension = path.extension().and_then(|value| value.to_str());
    decode_mono(Box::new(file), extension, &path.display().to_string())
}

/// Decodes an in-memory clip, e.g. an upload, into mono samples.
#[instrument(skip(bytes), fields(bytes = bytes.len(), extension))]
pub fn decode_audio_bytes_mono(bytes: &[u8], extension: Option<&str>) -> Result<DecodedAudio> {
    let cursor = Cursor::new(bytes.to_vec());
    decode_mono(Box::new(cursor), extension, "<memory>")
}

fn decode_mono(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
    label: &str,
) -> Result<DecodedAudio> {
    let source = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("unrecognized audio format in {label}"))?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default audio track found in {label}"))?;
    let track_id = track.id;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(SAMPLE_RATE);
    let mut channels = track
        .codec_params
        .channels
        .map_or(2, |value| value.count() as u16);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                return Err(anyhow::anyhow!("audio stream reset required for {label}"));
            }
            Err(error) => return Err(error.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(error)) => {
                warn!(%error, "skipping undecodable packet");
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;
        push_mono_samples(decoded, &mut samples);
    }

    if samples.is_empty() {
        return Err(anyhow::anyhow!("decoded zero samples from {label}"));
    }

    debug!(
        sample_rate,
        channels,
        total_frames = samples.len(),
        "audio decode complete"
    );

    Ok(DecodedAudio {
        sample_rate,
        channels,
        samples,
    })
}

/// Lists mixable clips under `directory`, sorted by path.
#[instrument(fields(directory = %directory.display()))]
pub fn scan_audio_assets(directory: &Path) -> Result<Vec<AudioAssetEntry>> {
    if !directory.is_dir() {
        return Err(anyhow::anyhow!(
            "clip directory does not exist or is not a directory: {}",
            directory.display()
        ));
    }

    let extensions = supported_audio_extensions();
    let mut assets = Vec::new();

    for entry in WalkDir::new(directory).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(?error, "ignoring unreadable entry while scanning clips");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let extension = entry
            .path()
            .extension()
            .and_then(|value| value.to_str())
            .map(str::to_ascii_lowercase);
        let Some(extension) = extension else {
            continue;
        };
        if !extensions.contains(extension.as_str()) {
            continue;
        }

        let name = entry
            .path()
            .file_stem()
            .and_then(|value| value.to_str())
            .unwrap_or_default()
            .to_string();
        let size_bytes = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
        assets.push(AudioAssetEntry {
            path: entry.path().display().to_string(),
            name,
            extension,
            size_bytes,
        });
    }

    assets.sort_by(|left, right| left.path.cmp(&right.path));
    debug!(count = assets.len(), "clip scan complete");
    Ok(assets)
}

pub fn read_asset_bytes(entry: &AudioAssetEntry) -> Result<Vec<u8>> {
    fs::read(&entry.path).with_context(|| format!("failed to read clip: {}", entry.path))
}

fn push_mono_samples(decoded: symphonia::core::audio::AudioBufferRef<'_>, samples: &mut Vec<f32>) {
    let spec = *decoded.spec();
    let channel_count = spec.channels.count().max(1);
    let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
    sample_buffer.copy_interleaved_ref(decoded);

    for frame in sample_buffer.samples().chunks(channel_count) {
        let sum: f32 = frame.iter().copied().sum();
        samples.push(sum / channel_count as f32);
    }
}

fn supported_audio_extensions() -> BTreeSet<&'static str> {
    ["wav", "mp3", "flac", "ogg", "aiff", "aif"]
        .into_iter()
        .collect()
}
