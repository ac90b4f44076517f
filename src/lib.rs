pub mod core;
pub mod handler;
pub mod loaders;
pub mod models;
pub mod pipelines;
pub mod server;

// Re-export core types
pub use core::{
    ClassificationRequest, ClassificationResponse, InferenceError, PredictionRecord, ServeConfig,
};

// Re-export the pipeline entry points for easier access
pub use pipelines::sentiment_analysis_pipeline::{
    Sentiment, SentimentAnalysisPipeline, SentimentAnalysisPipelineBuilder, SentimentBertModel,
    Verdict,
};
