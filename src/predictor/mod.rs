//! Image scoring against the remote Aquila model.
//!
//! [`RemotePredictor`] performs single attempts over a managed connection;
//! [`RetryingPredictor`] wraps any [`Predictor`] with bounded retries and
//! jittered exponential backoff.

mod remote;
mod retry;

pub use remote::{RemotePredictor, RemotePredictorBuilder};
pub use retry::RetryingPredictor;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::constants::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT};
use crate::error::Result;
use crate::vision::BgrImage;

/// Outcome of scoring one image.
///
/// `features` is present when the model returned a feature vector; `score`
/// is then the demographic score, or `None` if it could not be computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub score: Option<f64>,
    pub features: Option<Vec<f32>>,
    pub model_version: String,
}

/// Knobs for one logical prediction.
#[derive(Debug, Clone, Copy)]
pub struct PredictOptions {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Applies separately to the readiness wait and to the RPC of each attempt.
    pub timeout: Duration,
    /// Base of the exponential retry backoff.
    pub base_delay: Duration,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

/// A model that scores images one attempt at a time.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// A single attempt, no retries.
    async fn predict_once(&self, image: &BgrImage, timeout: Duration) -> Result<Prediction>;

    /// Cancelled once shutdown has begun.
    fn shutdown_token(&self) -> CancellationToken;

    fn is_shutting_down(&self) -> bool {
        self.shutdown_token().is_cancelled()
    }

    /// Resolve once no request is outstanding. Returns `true` when drained.
    async fn complete(&self) -> bool;

    /// Begin shutdown. Idempotent and one-way.
    fn shutdown(&self);

    /// Hook for implementations with per-run state.
    fn reset(&self) -> Result<()> {
        Ok(())
    }
}
