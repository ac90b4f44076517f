//! The inference contract expected by the hosting runtime.
//!
//! A process loads the model once with [`load_model`] and then, for every
//! request, runs [`decode_request`], [`predict`] and [`encode_response`]
//! against that same pipeline. The pipeline is passed explicitly; nothing is
//! kept in process-wide state.
//!
//! ```rust,no_run
//! use finmood::handler;
//!
//! # async fn run() -> finmood::core::Result<()> {
//! let pipeline = handler::load_model("/opt/ml/model").await?;
//!
//! let request = handler::decode_request(br#"{"inputs": "Nike sales have increased"}"#, "application/json")?;
//! let response = handler::predict(&request, &pipeline)?;
//! let body = handler::encode_response(&response, "application/json")?;
//! # Ok(())
//! # }
//! ```

pub mod codec;

pub use codec::{
    decode_request, decode_response, encode_response, ensure_accepts_json, ensure_json,
    PredictionEnvelope, JSON_CONTENT_TYPE,
};

use crate::core::{ClassificationRequest, ClassificationResponse, Result};
use crate::pipelines::sentiment_analysis_pipeline::{
    SentimentAnalysisModel, SentimentAnalysisPipeline, SentimentAnalysisPipelineBuilder,
    SentimentBertModel, Verdict,
};
use std::path::Path;

/// Load the classifier from an artifact directory or `.tar.gz`, with the
/// default tokenizer and truncation length.
pub async fn load_model(
    model_dir: impl AsRef<Path>,
) -> Result<SentimentAnalysisPipeline<SentimentBertModel>> {
    SentimentAnalysisPipelineBuilder::bert(model_dir.as_ref())
        .build()
        .await
}

/// Classify the texts of a decoded request.
pub fn predict<M: SentimentAnalysisModel>(
    request: &ClassificationRequest,
    pipeline: &SentimentAnalysisPipeline<M>,
) -> Result<ClassificationResponse> {
    pipeline.predict(request)
}

/// Run decode, predict and encode for one raw request.
pub fn invoke<M: SentimentAnalysisModel>(
    pipeline: &SentimentAnalysisPipeline<M>,
    body: &[u8],
    content_type: &str,
    accept: &str,
) -> Result<Vec<u8>> {
    let request = decode_request(body, content_type)?;
    let response = predict(&request, pipeline)?;
    encode_response(&response, accept)
}

/// What an interactive front-end shows for one line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// Nothing but whitespace was entered.
    Empty,
    Verdict(Verdict),
    /// The text could not be classified. The session goes on.
    Failed(String),
}

/// Classify one line typed by a user.
pub fn answer<M: SentimentAnalysisModel>(
    news: &str,
    pipeline: &SentimentAnalysisPipeline<M>,
) -> Answer {
    let news = news.trim();
    if news.is_empty() {
        return Answer::Empty;
    }
    let verdict = predict(&ClassificationRequest::from(news), pipeline)
        .map_err(|e| e.to_string())
        .and_then(|response| Verdict::from_response(&response).map_err(|e| e.to_string()));
    match verdict {
        Ok(verdict) => Answer::Verdict(verdict),
        Err(e) => {
            tracing::warn!("could not classify input: {e}");
            Answer::Failed(e)
        }
    }
}
