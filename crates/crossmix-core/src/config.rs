use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    diagnostics::{DEFAULT_FILE_PREFIX, DEFAULT_LOG_FILTER},
    group::DEFAULT_TOLERANCE_BPM,
    mix::DEFAULT_OVERLAP_BEATS,
    pipeline::BatchOptions,
    session::{AssembleOptions, CropSpec},
};

pub const CONFIG_FILE_NAME: &str = "crossmix.config.toml";
pub const CONFIG_PATH_ENV: &str = "CROSSMIX_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossmixConfig {
    pub analysis: AnalysisConfig,
    pub grouping: GroupingConfig,
    pub mix: MixConfig,
    pub diagnostics: DiagnosticsConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub workers: usize,
    /// Zero disables the per-call oracle timeout.
    pub oracle_timeout_ms: u64,
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    pub tolerance_bpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    pub overlap_beats: usize,
    pub target_bpm: Option<f64>,
    pub crop_offset_bars: Option<usize>,
    pub crop_length_bars: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub logs_dir: PathBuf,
    pub clips_dir: PathBuf,
    pub output_path: PathBuf,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            workers: BatchOptions::default().workers,
            oracle_timeout_ms: 30_000,
            cache_dir: Some(PathBuf::from("data/analysis-cache")),
        }
    }
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            tolerance_bpm: DEFAULT_TOLERANCE_BPM,
        }
    }
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            overlap_beats: DEFAULT_OVERLAP_BEATS,
            target_bpm: None,
            crop_offset_bars: None,
            crop_length_bars: None,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: DEFAULT_LOG_FILTER.to_string(),
            trace_file_prefix: DEFAULT_FILE_PREFIX.to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            clips_dir: PathBuf::from("data/clips"),
            output_path: PathBuf::from("data/mix.wav"),
        }
    }
}

impl CrossmixConfig {
    /// Loads the discovered config file, or the defaults when none exists.
    pub fn load() -> Result<Self> {
        match discover_config_path()? {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("no {CONFIG_FILE_NAME} found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    #[must_use]
    pub fn oracle_timeout(&self) -> Option<Duration> {
        (self.analysis.oracle_timeout_ms > 0)
            .then(|| Duration::from_millis(self.analysis.oracle_timeout_ms))
    }

    #[must_use]
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions::with_workers(self.analysis.workers)
    }

    /// Crop is applied only when both bar counts are configured.
    #[must_use]
    pub fn assemble_options(&self) -> AssembleOptions {
        let crop = match (self.mix.crop_offset_bars, self.mix.crop_length_bars) {
            (Some(offset_bars), Some(length_bars)) => Some(CropSpec {
                offset_bars,
                length_bars,
            }),
            _ => None,
        };
        AssembleOptions {
            tolerance_bpm: self.grouping.tolerance_bpm,
            overlap_beats: self.mix.overlap_beats,
            target_bpm: self.mix.target_bpm,
            crop,
        }
    }
}

fn discover_config_path() -> Result<Option<PathBuf>> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(Some(path));
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];
    Ok(candidates.into_iter().find(|path| path.is_file()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = CrossmixConfig::from_toml_str("").expect("empty config");
        assert_eq!(config, CrossmixConfig::default());
        assert_eq!(config.mix.overlap_beats, 16);
        assert_eq!(config.grouping.tolerance_bpm, 10.0);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = CrossmixConfig::from_toml_str(
            r#"
            [mix]
            overlap_beats = 8
            crop_offset_bars = 2
            crop_length_bars = 16

            [analysis]
            oracle_timeout_ms = 0
            "#,
        )
        .expect("config");

        assert_eq!(config.analysis.workers, 4);
        assert_eq!(config.oracle_timeout(), None);

        let options = config.assemble_options();
        assert_eq!(options.overlap_beats, 8);
        assert_eq!(
            options.crop,
            Some(CropSpec {
                offset_bars: 2,
                length_bars: 16
            })
        );
    }

    #[test]
    fn half_configured_crop_is_ignored() {
        let config =
            CrossmixConfig::from_toml_str("[mix]\ncrop_offset_bars = 4\n").expect("config");
        assert_eq!(config.assemble_options().crop, None);
    }

    #[test]
    fn load_from_reports_malformed_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[grouping]\ntolerance_bpm = \"fast\"\n").expect("write");
        let error = CrossmixConfig::load_from(&path).expect_err("bad type");
        assert!(format!("{error:#}").contains("failed to parse config TOML"));
    }
}
