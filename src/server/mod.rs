//! HTTP surface of the hosting runtime: `GET /ping` and `POST /invocations`.

mod handlers;

pub use handlers::{ApiError, AppState, ErrorResponse};

use crate::core::ServeConfig;
use crate::pipelines::sentiment_analysis_pipeline::{
    SentimentAnalysisModel, SentimentAnalysisPipeline,
};
use axum::{
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Routes serving one loaded pipeline.
pub fn router<M>(pipeline: Arc<SentimentAnalysisPipeline<M>>) -> Router
where
    M: SentimentAnalysisModel + Send + Sync + 'static,
{
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/invocations", post(handlers::invocations::<M>))
        .with_state(AppState { pipeline })
        .layer(TraceLayer::new_for_http())
}

/// Serve `pipeline` on the address from `config` until the process stops.
pub async fn run<M>(config: &ServeConfig, pipeline: SentimentAnalysisPipeline<M>) -> anyhow::Result<()>
where
    M: SentimentAnalysisModel + Send + Sync + 'static,
{
    let app = router(Arc::new(pipeline));

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
