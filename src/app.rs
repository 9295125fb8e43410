use crate::capture::Camera;
use crate::config::Config;
use crate::dnn::DnnLoader;
use crate::extractor::{DetectionExtractor, ExtractorConfig};
use crate::model::{ModelPaths, ModelStore};
use crate::queue::SharedQueue;
use crate::server::HttpServer;
use crate::sink::SignSink;
use crate::stop::StopSignal;
use crate::telemetry::Metrics;
use crate::worker::InferenceWorker;

use opencv::core::Mat;
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let mut store = ModelStore::new(
        DnnLoader::new(config.input.clone()),
        ModelPaths::from(&config.model),
    );
    if let Err(e) = store.load() {
        tracing::error!("Failed to load detection model: {}", e);
        return Err(Box::new(e));
    }
    if store.is_ready() {
        tracing::info!(
            "Detector outputs: {:?}",
            store.output_names::<Mat>().unwrap_or_default()
        );
    }
    let detector = store.into_handle()?;

    let camera = match Camera::open(&config.capture) {
        Ok(cam) => cam,
        Err(e) => {
            tracing::error!("Failed to initialize camera: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let metrics = Arc::new(Metrics::new()?);
    let stop = StopSignal::new();

    let frames = Arc::new(SharedQueue::new());
    let predictions = Arc::new(SharedQueue::new());
    let processed = Arc::new(SharedQueue::new());
    let extractor = DetectionExtractor::new(ExtractorConfig::from(&config.detection));

    let worker = InferenceWorker::new(
        detector,
        frames.clone(),
        predictions.clone(),
        processed.clone(),
        config.worker.clone(),
    )
    .with_metrics(metrics.clone());

    let sink = SignSink::new(extractor, config.output.sign_dir.clone(), metrics.clone())?;

    let server = HttpServer::new(metrics, stop.clone(), &config.server).await?;
    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    let worker_handle = worker.spawn(stop.clone())?;
    let sink_handle = sink.spawn(predictions, processed, stop.clone())?;
    let producer_handle = camera.spawn(
        frames,
        stop.clone(),
        config.capture.get_frame_delay_ms(),
    )?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    stop.trigger();
    let _ = shutdown_tx.send(());

    let joined = tokio::task::spawn_blocking(move || {
        (
            producer_handle.join(),
            worker_handle.join(),
            sink_handle.join(),
        )
    })
    .await?;

    match joined {
        (Ok(Ok(produced)), Ok(Ok(report)), Ok(saved)) => tracing::info!(
            "Pipeline stopped: produced={}, processed={}, dropped={}, saved={}",
            produced,
            report.processed,
            report.dropped,
            saved
        ),
        (producer, worker, sink) => tracing::error!(
            "Pipeline stopped with errors: producer={:?}, worker={:?}, sink={:?}",
            producer.map(|r| r.map_err(|e| e.to_string())),
            worker.map(|r| r.map_err(|e| e.to_string())),
            sink.is_ok()
        ),
    }

    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
