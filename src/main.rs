//! Score image files with the Aquila model.
//!
//! Usage: `aquila-score <image>...`
//!
//! Prints one JSON object per image. Configuration comes from `aquila.toml`,
//! `aquila.yaml` and `AQUILA_*` environment variables.

use anyhow::{bail, Context};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use aquila_client::{
    aquila::{ConnectionManager, GrpcConnector, StaticAddressProvider},
    config::Config,
    demographics::{DemographicRegistry, FileDemographicStore},
    predictor::{RemotePredictor, RetryingPredictor},
    reliability::{
        metrics::{install_prometheus, register_metrics},
        tracing::init_tracing,
    },
    vision::BgrImage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        bail!("usage: aquila-score <image>...");
    }

    let config = Config::load()?;
    init_tracing(&config.tracing_config())
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    if let Some(addr) = config.metrics_address {
        install_prometheus(addr)
            .map_err(|e| anyhow::anyhow!("failed to install metrics exporter: {}", e))?;
        info!("Serving metrics on {}", addr);
    }
    register_metrics();

    let provider = Arc::new(StaticAddressProvider::new(config.hosts.clone())?);
    let connector = Arc::new(GrpcConnector::new(config.connect_timeout, config.concurrency));
    let connection = ConnectionManager::builder(provider, connector)
        .port(config.port)
        .backoff(config.reconnect_backoff())
        .connect()
        .context("failed to open Aquila connection")?;

    let store = Arc::new(FileDemographicStore::new(config.demographics_dir.clone()));
    let registry = Arc::new(DemographicRegistry::new(store));
    let remote = RemotePredictor::builder(Arc::new(connection), registry)
        .concurrency(config.concurrency)
        .demographic(config.demographic_key()?)
        .fallback_model_version(config.fallback_model_version.clone())
        .build();
    let predictor = Arc::new(RetryingPredictor::new(Arc::new(remote)));

    let options = config.predict_options();
    let scoring = join_all(paths.iter().map(|path| {
        let predictor = Arc::clone(&predictor);
        async move {
            let image = image::open(path)
                .with_context(|| format!("failed to read {}", path))?
                .to_rgb8();
            let frame = BgrImage::from_rgb(&image);
            Ok::<_, anyhow::Error>(predictor.predict(&frame, options).await?)
        }
    }));

    let results = tokio::select! {
        results = scoring => results,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; shutting down");
            predictor.shutdown();
            bail!("interrupted");
        }
    };

    let mut failures = 0;
    for (path, result) in paths.iter().zip(results) {
        let line = match result {
            Ok(prediction) => json!({ "path": path, "prediction": prediction }),
            Err(e) => {
                failures += 1;
                json!({ "path": path, "error": format!("{:#}", e) })
            }
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    predictor.complete().await;
    predictor.shutdown();

    if failures > 0 {
        bail!("{} of {} images could not be scored", failures, paths.len());
    }
    Ok(())
}
