//! Custom error types for the aquila-client.
//!
//! This module provides a centralized error handling system using the `thiserror` crate
//! to define structured, typed errors with clear messages and proper error conversion.

use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tonic::Status as TonicStatus;

use crate::demographics::DemographicKey;

/// Primary error type for the client, covering all possible error cases.
#[derive(Debug, Error)]
pub enum AppError {
    /// The channel to the scoring service could not be established or used.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Readiness wait or RPC deadline expired.
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Errors returned by the remote scoring service.
    #[error("Aquila RPC error: {0}")]
    Rpc(#[from] TonicStatus),

    /// A transient problem computing a prediction.
    #[error("Prediction error: {0}")]
    Prediction(String),

    /// The predictor has been shut down; no further attempts are made.
    #[error("Prediction error: predictor is shutting down")]
    ShuttingDown,

    /// Every attempt failed. Carries the cause of the last one.
    #[error("Prediction error: gave up after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },

    /// The requested demographic is not present in the loaded table.
    #[error("Unknown demographic {key} for model {model_version}")]
    UnknownDemographic {
        model_version: String,
        key: DemographicKey,
    },

    /// Feature vector length disagrees with the weight vector length.
    #[error("Improper feature vector size: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The demographic table store could not produce a table.
    #[error("Could not load demographic tables for model {model_version}: {reason}")]
    DemographicLoad {
        model_version: String,
        reason: String,
    },

    /// The model has not been trained yet.
    #[error("The model isn't trained yet: {0}")]
    NotTrained(String),

    /// The model has already been trained.
    #[error("The model is already trained: {0}")]
    AlreadyTrained(String),

    /// Errors from invalid input data or parameters.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Errors from invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from the underlying IO system.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image decoding errors.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl AppError {
    /// Whether a prediction attempt that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::ShuttingDown
                | AppError::RetriesExhausted { .. }
                | AppError::InvalidInput(_)
                | AppError::Config(_)
                | AppError::NotTrained(_)
                | AppError::AlreadyTrained(_)
        )
    }

    /// The innermost cause, looking through `RetriesExhausted`.
    pub fn root_cause(&self) -> &AppError {
        match self {
            AppError::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Convenience type alias for Results with AppError.
pub type Result<T> = std::result::Result<T, AppError>;

/// Standardized async operation with timeout and custom error conversion.
///
/// Elapsed deadlines become [`AppError::Timeout`] tagged with `context`.
pub async fn with_timeout_and_convert<T, E, F, C>(
    operation: F,
    timeout_duration: Duration,
    context: &'static str,
    error_converter: C,
) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    C: FnOnce(E) -> AppError,
{
    match tokio::time::timeout(timeout_duration, operation).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(error_converter(e)),
        Err(_) => Err(AppError::Timeout(format!(
            "{}: operation timed out after {:?}",
            context, timeout_duration
        ))),
    }
}
