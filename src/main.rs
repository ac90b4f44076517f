use anyhow::Result;
use finmood::{core::ServeConfig, server, SentimentAnalysisPipelineBuilder};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Parses a log level or a full filter directive such as
/// `finmood=debug,tower_http=info`.
fn log_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives).map_err(|e| {
        anyhow::anyhow!(
            "Invalid log filter: '{}' ({}). Use a level (error, warn, info, debug, trace) or target=level directives",
            directives,
            e
        )
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration comes before logging so a bad log level can be reported.
    let config = match ServeConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // RUST_LOG overrides the configured level.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let filter = match log_filter(&log_level) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    tracing_subscriber::fmt().with_env_filter(filter).json().init();

    info!(
        model_dir = ?config.model_dir,
        tokenizer_repo = %config.tokenizer_repo,
        max_length = config.max_length,
        "Starting FinMood inference server with log level: {}",
        log_level
    );

    // The server only starts listening once the model has loaded, so a
    // successful /ping implies a ready model.
    let pipeline = SentimentAnalysisPipelineBuilder::from_config(&config)?
        .build()
        .await?;
    info!("Model loaded on {:?}", pipeline.device());

    server::run(&config, pipeline).await?;

    Ok(())
}
