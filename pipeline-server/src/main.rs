mod ingest;

use pipeline_core::backend::SimulatedBackend;
use pipeline_core::kb::NullKnowledgeBase;
use pipeline_core::notify::LogNotifier;
use pipeline_core::pipeline::{Pipeline, PipelineEvent};
use pipeline_core::PipelineConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PipelineConfig::from_env();
    let tick_interval = std::time::Duration::from_secs(config.tick_interval_s.max(1));

    let pipeline = match Pipeline::new(
        config,
        Box::new(NullKnowledgeBase),
        Box::new(SimulatedBackend),
        Box::new(LogNotifier),
    ) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            tracing::error!(%err, "failed to start pipeline");
            std::process::exit(1);
        }
    };

    let store = pipeline.store();
    let audit = pipeline.audit();
    let (tx, rx) = std::sync::mpsc::channel();

    std::thread::spawn(move || pipeline.run(rx));

    let ticker_tx = tx.clone();
    std::thread::spawn(move || loop {
        std::thread::sleep(tick_interval);
        if ticker_tx.send(PipelineEvent::Tick).is_err() {
            break;
        }
    });

    let app = ingest::router(ingest::AppState { tx, store, audit });
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%err, %addr, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "pipeline-server listening");
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(%err, "server stopped");
    }
}
