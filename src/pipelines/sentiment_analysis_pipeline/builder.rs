use super::pipeline::SentimentAnalysisPipeline;
use crate::core::config::{DEFAULT_MAX_LENGTH, DEFAULT_TOKENIZER_REPO};
use crate::core::{Result, ServeConfig};
use crate::loaders::{resolve_model_dir, TokenizerLoader};
use crate::models::implementations::bert::SentimentBertModel;
use crate::pipelines::utils::{DeviceRequest, DeviceSelectable};
use std::path::PathBuf;

const TOKENIZER_FILE: &str = "tokenizer.json";

/// Loads a [`SentimentAnalysisPipeline`] from an unpacked model directory,
/// or from a `model.tar.gz` which is unpacked next to itself on first use.
///
/// The tokenizer does not come from the model directory: by default it is
/// fetched from the `nlptown/bert-base-multilingual-uncased-sentiment` hub
/// repository, whatever tokenizer the artifact bundles.
pub struct SentimentAnalysisPipelineBuilder {
    model_dir: PathBuf,
    tokenizer: TokenizerLoader,
    max_length: usize,
    device_request: DeviceRequest,
}

impl SentimentAnalysisPipelineBuilder {
    pub fn bert(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            tokenizer: TokenizerLoader::new(DEFAULT_TOKENIZER_REPO, TOKENIZER_FILE),
            max_length: DEFAULT_MAX_LENGTH,
            device_request: DeviceRequest::Default,
        }
    }

    /// Builder mirroring a [`ServeConfig`].
    pub fn from_config(config: &ServeConfig) -> Result<Self> {
        let mut builder = Self::bert(&config.model_dir)
            .tokenizer_repo(&config.tokenizer_repo)
            .max_length(config.max_length);
        if let Some(file) = &config.tokenizer_file {
            builder = builder.tokenizer_file(file);
        }
        builder.device_request = config.device.parse()?;
        Ok(builder)
    }

    /// Fetch `tokenizer.json` from another hub repository.
    pub fn tokenizer_repo(mut self, repo: &str) -> Self {
        self.tokenizer = TokenizerLoader::new(repo, TOKENIZER_FILE);
        self
    }

    /// Use a local `tokenizer.json` instead of the hub.
    pub fn tokenizer_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.tokenizer = TokenizerLoader::from_file(path);
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub async fn build(self) -> Result<SentimentAnalysisPipeline<SentimentBertModel>> {
        let device = self.device_request.resolve()?;
        let model_dir = resolve_model_dir(&self.model_dir)?;
        tracing::info!(model_dir = ?model_dir, "loading sentiment model");
        let model = SentimentBertModel::from_dir(&model_dir, device)?;
        let tokenizer = self.tokenizer.load().await?;
        SentimentAnalysisPipeline::new(model, tokenizer, self.max_length)
    }
}

impl DeviceSelectable for SentimentAnalysisPipelineBuilder {
    fn device_request_mut(&mut self) -> &mut DeviceRequest {
        &mut self.device_request
    }
}
