//! Single-attempt scoring over a managed Aquila connection.

use async_trait::async_trait;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::aquila::{AquilaRequest, AquilaResponse, ConnectionManager};
use crate::constants::model::FALLBACK_MODEL_VERSION;
use crate::constants::retry::DEFAULT_CONCURRENCY;
use crate::demographics::{DemographicKey, DemographicRegistry};
use crate::error::{with_timeout_and_convert, AppError, Result};
use crate::predictor::{Prediction, Predictor};
use crate::reliability::metrics::names;
use crate::reliability::RequestThrottle;
use crate::vision::{BgrImage, ImagePreprocessor};

/// Scores images with the remote Aquila model.
///
/// Each attempt waits for the connection to be ready, preprocesses the
/// image, and issues one `Regress` call under the request throttle. Feature
/// vectors are turned into a score for the configured demographic.
pub struct RemotePredictor {
    connection: Arc<ConnectionManager>,
    throttle: RequestThrottle,
    registry: Arc<DemographicRegistry>,
    preprocessor: ImagePreprocessor,
    demographic: DemographicKey,
    fallback_model_version: String,
}

impl RemotePredictor {
    pub fn builder(
        connection: Arc<ConnectionManager>,
        registry: Arc<DemographicRegistry>,
    ) -> RemotePredictorBuilder {
        RemotePredictorBuilder {
            connection,
            registry,
            concurrency: DEFAULT_CONCURRENCY,
            demographic: DemographicKey::default(),
            fallback_model_version: FALLBACK_MODEL_VERSION.to_string(),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn demographic(&self) -> DemographicKey {
        self.demographic
    }

    pub fn in_flight(&self) -> usize {
        self.throttle.in_flight()
    }

    async fn call(&self, request: AquilaRequest, timeout: Duration) -> Result<AquilaResponse> {
        let stub = self
            .connection
            .stub()
            .ok_or_else(|| AppError::Connection("no active channel".into()))?;

        let rpc = async {
            let _guard = self.throttle.admit().await?;
            stub.regress(request, timeout).await
        };

        let started = Instant::now();
        let token = self.connection.shutdown_token();
        let result = tokio::select! {
            result = with_timeout_and_convert(rpc, timeout, "Regress", |e| e) => result,
            _ = token.cancelled() => Err(AppError::ShuttingDown),
        };
        histogram!(names::RPC_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn interpret(&self, response: AquilaResponse) -> Result<Prediction> {
        if self.is_shutting_down() {
            return Err(AppError::ShuttingDown);
        }
        if response.valence.is_empty() {
            return Err(AppError::Prediction("response carried no valence".into()));
        }

        let model_version = if response.model_version.is_empty() {
            self.fallback_model_version.clone()
        } else {
            response.model_version
        };

        if let [score] = response.valence.as_slice() {
            return Ok(Prediction {
                score: Some(f64::from(*score)),
                features: None,
                model_version,
            });
        }

        let features = response.valence;
        let score = match self.demographic_score(&model_version, &features).await {
            Ok(score) => Some(score),
            Err(e) => {
                warn!(
                    "No score for demographic {} under model {}: {}",
                    self.demographic, model_version, e
                );
                counter!(names::DEMOGRAPHIC_LOOKUP_FAILURES_TOTAL).increment(1);
                None
            }
        };

        Ok(Prediction {
            score,
            features: Some(features),
            model_version,
        })
    }

    async fn demographic_score(&self, model_version: &str, features: &[f32]) -> Result<f64> {
        let table = self.registry.get(model_version).await?;
        let features: Vec<f64> = features.iter().copied().map(f64::from).collect();
        table.score(&features, self.demographic)
    }
}

#[async_trait]
impl Predictor for RemotePredictor {
    #[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64))]
    async fn predict_once(&self, image: &BgrImage, timeout: Duration) -> Result<Prediction> {
        if self.is_shutting_down() {
            return Err(AppError::ShuttingDown);
        }

        if !self.connection.wait_ready(timeout).await {
            if self.is_shutting_down() {
                return Err(AppError::ShuttingDown);
            }
            return Err(AppError::Timeout(format!(
                "Aquila not ready within {:?}",
                timeout
            )));
        }

        let tensor = self.preprocessor.prepare(image)?;
        debug!("Prepared {} byte tensor", tensor.len());
        let request = AquilaRequest {
            image_data: tensor.into_bytes(),
        };

        let response = self.call(request, timeout).await.map_err(|e| {
            error!("RPC Error: {}", e);
            e
        })?;
        self.interpret(response).await
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.connection.shutdown_token()
    }

    async fn complete(&self) -> bool {
        self.throttle.await_quiescence().await;
        true
    }

    fn shutdown(&self) {
        self.throttle.close();
        self.connection.shutdown();
    }
}

/// Builder for [`RemotePredictor`].
pub struct RemotePredictorBuilder {
    connection: Arc<ConnectionManager>,
    registry: Arc<DemographicRegistry>,
    concurrency: usize,
    demographic: DemographicKey,
    fallback_model_version: String,
}

impl RemotePredictorBuilder {
    /// Maximum number of concurrent RPCs.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn demographic(mut self, demographic: DemographicKey) -> Self {
        self.demographic = demographic;
        self
    }

    /// Version assumed when a response omits one.
    pub fn fallback_model_version(mut self, version: impl Into<String>) -> Self {
        self.fallback_model_version = version.into();
        self
    }

    pub fn build(self) -> RemotePredictor {
        RemotePredictor {
            connection: self.connection,
            throttle: RequestThrottle::new(self.concurrency),
            registry: self.registry,
            preprocessor: ImagePreprocessor::new(),
            demographic: self.demographic,
            fallback_model_version: self.fallback_model_version,
        }
    }
}
