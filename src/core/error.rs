use thiserror::Error;

/// Every failure the inference contract can surface.
///
/// `Load` is fatal to start-up; the remaining variants are per request and
/// are handed back to the caller unchanged. Nothing in the crate retries.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The artifact directory, model configuration, weights or tokenizer
    /// could not be turned into a usable model.
    #[error("failed to load model: {0}")]
    Load(String),

    /// A request or accept content type other than `application/json`.
    #[error("unsupported content type: {0}. Use 'application/json'")]
    UnsupportedContentType(String),

    /// The body did not carry an `inputs` string or list of strings.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Tokenization or the forward pass failed for the batch.
    #[error("inference failed: {0}")]
    Inference(String),
}

impl InferenceError {
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// True for errors caused by the caller rather than the model.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedContentType(_) | Self::MalformedRequest(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, InferenceError>;
