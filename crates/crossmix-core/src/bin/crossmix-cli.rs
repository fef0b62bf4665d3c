use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossmix_core::{
    AnalysisCache, ClipSource, CrossmixConfig, Oracles, TracingSink, Track, analyze,
    analyze_cached, assemble,
    diagnostics::start_logging,
    export::export_wav,
    fixtures::click_track,
    prepare_clips, read_asset_bytes, scan_audio_assets,
};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "crossmix-cli")]
#[command(about = "Headless tools for analyzing clips and assembling beat-matched mixes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Defaults to `paths.logs_dir` from the config.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Prints tempo and downbeats of each file as JSON.
    Analyze {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Mixes the largest tempo-compatible group of clips in a directory.
    Mix {
        #[arg(long)]
        clips_dir: Option<PathBuf>,

        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Renders click tracks at 120, 122 and 150 bpm and mixes them.
    Demo {
        #[arg(long, default_value = "data/demo")]
        output_dir: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct FileAnalysis {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<crossmix_core::TrackAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CrossmixConfig::load_from(path)?,
        None => CrossmixConfig::load()?,
    };

    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| config.paths.logs_dir.clone());
    let _logging = start_logging(&config.diagnostics, &log_dir)?;

    let mut oracles = Oracles::builtin();
    if let Some(timeout) = config.oracle_timeout() {
        oracles = oracles.with_timeout(timeout);
    }

    match cli.command {
        Commands::Analyze { files, cache_dir } => {
            let cache = cache_dir
                .or_else(|| config.analysis.cache_dir.clone())
                .map(AnalysisCache::open)
                .transpose()?;
            let report = analyze_files(&files, &oracles, cache.as_ref());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Mix { clips_dir, output } => {
            let clips_dir = clips_dir.unwrap_or_else(|| config.paths.clips_dir.clone());
            let output = output.unwrap_or_else(|| config.paths.output_path.clone());
            run_mix(&config, &oracles, &clips_dir, &output)?;
        }
        Commands::Demo { output_dir } => run_demo(&config, &oracles, &output_dir)?,
    }

    Ok(())
}

fn analyze_files(
    files: &[PathBuf],
    oracles: &Oracles,
    cache: Option<&AnalysisCache>,
) -> Vec<FileAnalysis> {
    files
        .iter()
        .map(|path| {
            let extension = path.extension().and_then(|value| value.to_str());
            let result = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))
                .map_err(crossmix_core::MixError::from)
                .and_then(|bytes| match cache {
                    Some(cache) => analyze_cached(&bytes, extension, oracles, cache),
                    None => analyze(&bytes, extension, oracles),
                });

            match result {
                Ok(analysis) => FileAnalysis {
                    path: path.display().to_string(),
                    analysis: Some(analysis),
                    error: None,
                },
                Err(error) => {
                    warn!(path = %path.display(), %error, "analysis failed");
                    FileAnalysis {
                        path: path.display().to_string(),
                        analysis: None,
                        error: Some(error.to_string()),
                    }
                }
            }
        })
        .collect()
}

fn run_mix(
    config: &CrossmixConfig,
    oracles: &Oracles,
    clips_dir: &Path,
    output: &Path,
) -> anyhow::Result<()> {
    let assets = scan_audio_assets(clips_dir)?;
    let mut clips = Vec::with_capacity(assets.len());
    for asset in &assets {
        clips.push(ClipSource {
            name: asset.name.clone(),
            bytes: read_asset_bytes(asset)?,
            extension: Some(asset.extension.clone()),
        });
    }

    let cache = config
        .analysis
        .cache_dir
        .as_ref()
        .map(AnalysisCache::open)
        .transpose()?;
    let sink = Arc::new(TracingSink);
    let outcome = prepare_clips(
        clips,
        oracles,
        &config.batch_options(),
        cache.as_ref(),
        sink.as_ref(),
    )?;
    for failure in &outcome.failures {
        warn!(track = %failure.track, kind = ?failure.kind, reason = %failure.reason, "clip left out of mix");
    }

    let tracks: Vec<Arc<Track>> = outcome.analyzed.into_iter().map(Arc::new).collect();
    let mixed = assemble(&tracks, &config.assemble_options(), oracles, sink, None)?;
    export_wav(&mixed.audio, output)?;

    println!("{}", serde_json::to_string_pretty(&mixed.plan)?);
    info!(path = %output.display(), samples = mixed.audio.len(), "mix written");
    Ok(())
}

fn run_demo(config: &CrossmixConfig, oracles: &Oracles, output_dir: &Path) -> anyhow::Result<()> {
    let clips = [("click-120", 120.0), ("click-122", 122.0), ("click-150", 150.0)];
    let mut tracks = Vec::with_capacity(clips.len());
    for (name, bpm) in clips {
        let mut track = click_track(name, bpm, 24);
        export_wav(track.audio(), &output_dir.join(format!("{name}.wav")))?;
        crossmix_core::analyze_track(&mut track, oracles)?;
        tracks.push(Arc::new(track));
    }

    let mut options = config.assemble_options();
    options.overlap_beats = options.overlap_beats.min(4);
    let mixed = assemble(&tracks, &options, oracles, Arc::new(TracingSink), None)?;
    let output = output_dir.join("demo-mix.wav");
    export_wav(&mixed.audio, &output)?;

    println!("{}", serde_json::to_string_pretty(&mixed.plan)?);
    info!(path = %output.display(), "demo mix written");
    Ok(())
}
