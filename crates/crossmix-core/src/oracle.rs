//! Narrow interfaces to the analysis and time-stretch back-ends.
//!
//! The engine never talks to a DSP or ML model directly. Every call goes through
//! [`Oracles`], which validates what the back-end returned and, when a timeout
//! is configured, runs the call on a helper thread so a hung back-end costs one
//! track rather than the whole batch.

use std::{fmt, sync::Arc, thread, time::Duration};

use crossbeam::channel::{self, RecvTimeoutError};
use tracing::{debug, warn};

use crate::{
    analysis::{GridDownbeatOracle, OnsetTempoOracle, SignalsmithStretchOracle},
    error::{MixError, OracleKind},
    time::SAMPLE_RATE,
};

pub trait TempoOracle: Send + Sync {
    /// Tempo of a mono buffer in beats per minute.
    fn estimate_tempo(&self, samples: &[f32], sample_rate: u32) -> anyhow::Result<f64>;
}

pub trait DownbeatOracle: Send + Sync {
    /// Strictly increasing bar start offsets in seconds.
    fn estimate_downbeats(&self, samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<f64>>;
}

pub trait StretchOracle: Send + Sync {
    /// Returns audio whose length scales by `1 / stretch_factor`.
    fn stretch(
        &self,
        samples: &[f32],
        sample_rate: u32,
        stretch_factor: f64,
    ) -> anyhow::Result<Vec<f32>>;
}

#[derive(Clone)]
pub struct Oracles {
    tempo: Arc<dyn TempoOracle>,
    downbeat: Arc<dyn DownbeatOracle>,
    stretch: Arc<dyn StretchOracle>,
    timeout: Option<Duration>,
}

impl fmt::Debug for Oracles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Oracles")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for Oracles {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Oracles {
    #[must_use]
    pub fn new(
        tempo: Arc<dyn TempoOracle>,
        downbeat: Arc<dyn DownbeatOracle>,
        stretch: Arc<dyn StretchOracle>,
    ) -> Self {
        Self {
            tempo,
            downbeat,
            stretch,
            timeout: None,
        }
    }

    /// Reference back-ends shipped with the crate.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(
            Arc::new(OnsetTempoOracle::default()),
            Arc::new(GridDownbeatOracle::default()),
            Arc::new(SignalsmithStretchOracle),
        )
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn tempo(&self, audio: &Arc<Vec<f32>>) -> Result<f64, MixError> {
        let oracle = Arc::clone(&self.tempo);
        let samples = Arc::clone(audio);
        let bpm = self.call(OracleKind::Tempo, move || {
            oracle.estimate_tempo(&samples, SAMPLE_RATE)
        })?;

        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(MixError::Oracle {
                oracle: OracleKind::Tempo,
                reason: format!("returned non-positive tempo {bpm}"),
            });
        }
        Ok(bpm)
    }

    pub fn downbeats(&self, audio: &Arc<Vec<f32>>) -> Result<Vec<f64>, MixError> {
        let oracle = Arc::clone(&self.downbeat);
        let samples = Arc::clone(audio);
        let downbeats = self.call(OracleKind::Downbeat, move || {
            oracle.estimate_downbeats(&samples, SAMPLE_RATE)
        })?;

        validate_timeline(&downbeats).map_err(|reason| MixError::Oracle {
            oracle: OracleKind::Downbeat,
            reason,
        })?;
        Ok(downbeats)
    }

    pub fn stretch(&self, audio: &Arc<Vec<f32>>, stretch_factor: f64) -> Result<Vec<f32>, MixError> {
        if !stretch_factor.is_finite() || stretch_factor <= 0.0 {
            return Err(MixError::validation(format!(
                "stretch factor must be positive, got {stretch_factor}"
            )));
        }

        let oracle = Arc::clone(&self.stretch);
        let samples = Arc::clone(audio);
        self.call(OracleKind::Stretch, move || {
            oracle.stretch(&samples, SAMPLE_RATE, stretch_factor)
        })
    }

    fn call<T, F>(&self, kind: OracleKind, job: F) -> Result<T, MixError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let Some(timeout) = self.timeout else {
            return job().map_err(|error| oracle_error(kind, &error));
        };

        let (result_tx, result_rx) = channel::bounded(1);
        thread::Builder::new()
            .name(format!("crossmix-{kind}-oracle"))
            .spawn(move || {
                // The receiver is gone once the caller has timed out.
                let _ = result_tx.send(job());
            })
            .map_err(|error| MixError::Io(format!("failed to spawn {kind} oracle thread: {error}")))?;

        match result_rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(|error| oracle_error(kind, &error)),
            Err(RecvTimeoutError::Timeout) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(oracle = %kind, timeout_ms, "oracle call timed out");
                Err(MixError::OracleTimeout {
                    oracle: kind,
                    timeout_ms,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(MixError::Oracle {
                oracle: kind,
                reason: "worker exited without a result".to_string(),
            }),
        }
    }
}

fn oracle_error(kind: OracleKind, error: &anyhow::Error) -> MixError {
    debug!(oracle = %kind, error = %error, "oracle returned an error");
    MixError::Oracle {
        oracle: kind,
        reason: format!("{error:#}"),
    }
}

pub(crate) fn validate_timeline(downbeats: &[f64]) -> Result<(), String> {
    if let Some(bad) = downbeats.iter().find(|time| !time.is_finite() || **time < 0.0) {
        return Err(format!("invalid downbeat timestamp {bad}"));
    }
    if let Some(pair) = downbeats.windows(2).find(|pair| pair[1] <= pair[0]) {
        return Err(format!(
            "downbeats must be strictly increasing, found {} then {}",
            pair[0], pair[1]
        ));
    }
    Ok(())
}
