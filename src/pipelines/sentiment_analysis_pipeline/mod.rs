//! Sentiment analysis pipeline for financial news.
//!
//! Classifies text as negative, neutral or positive with a BERT sequence
//! classifier and reports the full class distribution for every text.
//!
//! ## Main Types
//!
//! - [`SentimentAnalysisPipeline`] - Batch classification with a loaded model and tokenizer
//! - [`SentimentAnalysisPipelineBuilder`] - Loads the pipeline from a model directory
//! - [`SentimentAnalysisModel`] - Trait for sequence classifiers the pipeline can drive
//! - [`Verdict`] - Human-readable reading of a single prediction
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use finmood::core::ClassificationRequest;
//! use finmood::pipelines::sentiment_analysis_pipeline::*;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let pipeline = SentimentAnalysisPipelineBuilder::bert("/opt/ml/model")
//!     .build()
//!     .await?;
//!
//! let response = pipeline.predict(&ClassificationRequest::from("Nvidia sales have increased."))?;
//! println!("{}", Verdict::from_response(&response)?);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod model;
pub mod pipeline;
pub mod verdict;

pub use builder::SentimentAnalysisPipelineBuilder;
pub use model::SentimentAnalysisModel;
pub use pipeline::SentimentAnalysisPipeline;
pub use verdict::{Sentiment, Tone, Verdict, VerdictError};

pub use crate::models::implementations::bert::SentimentBertModel;
