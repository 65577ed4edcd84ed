//! Bounded retries with jittered exponential backoff around a predictor.

use metrics::counter;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::predictor::{PredictOptions, Prediction, Predictor};
use crate::reliability::metrics::names;
use crate::reliability::{retry_delay, Jitter};
use crate::vision::BgrImage;

/// Bounded retries with exponential backoff around a [`Predictor`].
///
/// Only retryable errors are retried. Shutdown is checked before every
/// attempt and interrupts backoff sleeps.
pub struct RetryingPredictor<P: Predictor + ?Sized> {
    inner: Arc<P>,
    jitter: Jitter,
}

impl<P: Predictor + ?Sized> RetryingPredictor<P> {
    pub fn new(inner: Arc<P>) -> Self {
        Self {
            inner,
            jitter: Jitter::Full,
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn inner(&self) -> &Arc<P> {
        &self.inner
    }

    /// Score `image`, retrying transient failures up to
    /// `options.max_attempts` attempts in total.
    #[instrument(
        skip(self, image, options),
        fields(request_id = %Uuid::new_v4(), max_attempts = options.max_attempts)
    )]
    pub async fn predict(&self, image: &BgrImage, options: PredictOptions) -> Result<Prediction> {
        counter!(names::PREDICTIONS_TOTAL).increment(1);
        let result = self.run(image, options).await;
        if result.is_err() {
            counter!(names::PREDICTIONS_FAILED_TOTAL).increment(1);
        }
        result
    }

    async fn run(&self, image: &BgrImage, options: PredictOptions) -> Result<Prediction> {
        let token = self.inner.shutdown_token();
        let max_attempts = options.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if token.is_cancelled() {
                return Err(AppError::ShuttingDown);
            }

            let error = match self.inner.predict_once(image, options.timeout).await {
                Ok(prediction) => return Ok(prediction),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt == max_attempts {
                warn!("Problem scoring image on final attempt {}: {}", attempt, error);
                last_error = Some(error);
                break;
            }

            let delay = retry_delay(attempt, options.base_delay, self.jitter);
            warn!(
                attempt,
                max_attempts,
                ?delay,
                "Problem scoring image. Retrying: {}",
                error
            );
            counter!(names::PREDICTION_RETRIES_TOTAL).increment(1);
            last_error = Some(error);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => return Err(AppError::ShuttingDown),
            }
        }

        Err(AppError::RetriesExhausted {
            attempts: max_attempts,
            source: Box::new(
                last_error.unwrap_or_else(|| AppError::Prediction("no attempt was made".into())),
            ),
        })
    }

    /// Resolve once every outstanding request has finished.
    pub async fn complete(&self) -> bool {
        self.inner.complete().await
    }

    pub fn shutdown(&self) {
        self.inner.shutdown()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.is_shutting_down()
    }

    pub fn reset(&self) -> Result<()> {
        self.inner.reset()
    }
}
