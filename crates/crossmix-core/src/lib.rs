pub mod analysis;
pub mod assets;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod export;
pub mod fixtures;
pub mod group;
pub mod mix;
pub mod oracle;
pub mod pipeline;
pub mod session;
pub mod time;
pub mod track;

pub use analysis::{GridDownbeatOracle, OnsetTempoOracle, SignalsmithStretchOracle};
pub use assets::{
    AudioAssetEntry, DecodedAudio, decode_audio_bytes_mono, decode_audio_file_mono,
    read_asset_bytes, scan_audio_assets,
};
pub use buffer::{FadeDirection, combine, equalize_length, fade, peak};
pub use cache::AnalysisCache;
pub use config::CrossmixConfig;
pub use diagnostics::{LogSession, start_logging};
pub use error::{ErrorKind, MixError, OracleKind};
pub use events::{EventSink, MemorySink, MixEvent, NullSink, TracingSink};
pub use export::{export_wav, wav_bytes};
pub use group::{DEFAULT_TOLERANCE_BPM, TrackGroup, largest_index, partition, select_largest};
pub use mix::{CueSlice, CueSpec, DEFAULT_OVERLAP_BEATS, JoinReport, JoinState, Mix, MixState};
pub use oracle::{DownbeatOracle, Oracles, StretchOracle, TempoOracle};
pub use pipeline::{AnalysisFailure, BatchOptions, BatchOutcome, analyze_tracks};
pub use session::{
    AssembleOptions, ClipSource, CropSpec, GroupSummary, MixOutcome, MixPlan, analyze,
    analyze_cached, analyze_track, assemble, mix, prepare_clips,
};
pub use time::SAMPLE_RATE;
pub use track::{Track, TrackAnalysis};
