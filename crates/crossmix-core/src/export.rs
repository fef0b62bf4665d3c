use std::{fs, path::Path};

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::time::SAMPLE_RATE;

/// Writes a mono 16-bit WAV at the mixing rate, creating parent directories.
///
/// Samples outside `[-1, 1]` are clamped before quantization.
#[instrument(skip(samples), fields(samples = samples.len(), path = %path.display()))]
pub fn export_wav(samples: &[f32], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create wav output directory: {}",
                parent.display()
            )
        })?;
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create wav file: {}", path.display()))?;
    for sample in samples {
        writer
            .write_sample(quantize(*sample))
            .context("failed to write wav sample")?;
    }

    writer.finalize().context("failed to finalize wav file")?;
    info!("wav export completed");
    Ok(())
}

/// Encodes samples as an in-memory WAV file, e.g. for handing to a decoder.
pub fn wav_bytes(samples: &[f32]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("failed to start wav encoder")?;
        for sample in samples {
            writer
                .write_sample(quantize(*sample))
                .context("failed to encode wav sample")?;
        }
        writer.finalize().context("failed to finalize wav bytes")?;
    }
    Ok(cursor.into_inner())
}

fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}
