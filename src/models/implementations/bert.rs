//! BERT encoder with a sequence classification head.
//!
//! Mirrors the layout of Hugging Face `BertForSequenceClassification`
//! checkpoints:
//! - word, position and token-type embeddings followed by a layer norm
//! - post-norm transformer layers (self-attention, GELU feed-forward)
//! - a tanh pooler over the `[CLS]` position
//! - a linear classifier producing one logit per label
//!
//! Weights are plain tensors, so no gradients are tracked, and dropout is
//! not part of the graph at all: the model only ever runs in inference mode.
//!
//! # Quick Start
//! ```rust,no_run
//! use candle_core::Device;
//! use finmood::models::implementations::bert::SentimentBertModel;
//!
//! # fn run() -> finmood::core::Result<()> {
//! let model = SentimentBertModel::from_dir("/opt/ml/model", Device::Cpu)?;
//! println!("labels: {:?}", model.labels());
//! # Ok(())
//! # }
//! ```

use candle_core::{DType, Device, IndexOp, Result, Tensor, D};
use candle_nn::{
    embedding, layer_norm, linear, ops::softmax, Embedding, LayerNorm, Linear, Module, VarBuilder,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const MIN_VALUE_F64: f64 = f32::MIN as f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum HiddenAct {
    #[default]
    #[serde(rename = "gelu")]
    Gelu,
    #[serde(rename = "gelu_new", alias = "gelu_pytorch_tanh", alias = "gelu_fast")]
    GeluApproximate,
    #[serde(rename = "relu")]
    Relu,
}

impl Module for HiddenAct {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            HiddenAct::Gelu => xs.gelu_erf(),
            HiddenAct::GeluApproximate => xs.gelu(),
            HiddenAct::Relu => xs.relu(),
        }
    }
}

/// Subset of a BERT `config.json` needed for inference.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model_type: Option<String>,
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default)]
    pub hidden_act: HiddenAct,
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default)]
    pub pad_token_id: Option<u32>,
    #[serde(default)]
    pub id2label: Option<HashMap<String, String>>,
    #[serde(default)]
    pub num_labels: Option<usize>,
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

impl Config {
    /// Number of classes the head predicts. Falls back to 2 like the
    /// reference configuration class does.
    pub fn num_labels(&self) -> usize {
        match &self.id2label {
            Some(map) if !map.is_empty() => map.len(),
            _ => self.num_labels.unwrap_or(2),
        }
    }

    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id.unwrap_or(0)
    }

    /// Label names ordered by class index.
    pub fn labels(&self) -> Vec<String> {
        (0..self.num_labels())
            .map(|index| {
                self.id2label
                    .as_ref()
                    .and_then(|map| map.get(&index.to_string()))
                    .cloned()
                    .unwrap_or_else(|| format!("LABEL_{index}"))
            })
            .collect()
    }

    /// Reject configurations this implementation cannot run.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(model_type) = &self.model_type {
            if model_type != "bert" {
                return Err(format!(
                    "unsupported model_type '{model_type}', expected 'bert'"
                ));
            }
        }
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(format!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            ));
        }
        if let Some(map) = &self.id2label {
            for index in 0..map.len() {
                if !map.contains_key(&index.to_string()) {
                    return Err(format!("id2label has no entry for class {index}"));
                }
            }
        }
        if self.num_labels() == 0 {
            return Err("classifier declares no labels".to_string());
        }
        Ok(())
    }
}

/// Load a layer norm stored either as `weight`/`bias` or, in older
/// checkpoints, as `gamma`/`beta`.
fn load_layer_norm(size: usize, eps: f64, vb: VarBuilder) -> Result<LayerNorm> {
    if vb.contains_tensor("weight") {
        layer_norm(size, eps, vb)
    } else {
        let weight = vb.get(size, "gamma")?;
        let bias = vb.get(size, "beta")?;
        Ok(LayerNorm::new(weight, bias, eps))
    }
}

#[derive(Debug, Clone)]
struct Embeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    norm: LayerNorm,
    span: tracing::Span,
}

impl Embeddings {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let word_embeddings = embedding(
            config.vocab_size,
            config.hidden_size,
            vb.pp("word_embeddings"),
        )?;
        let position_embeddings = embedding(
            config.max_position_embeddings,
            config.hidden_size,
            vb.pp("position_embeddings"),
        )?;
        let token_type_embeddings = embedding(
            config.type_vocab_size,
            config.hidden_size,
            vb.pp("token_type_embeddings"),
        )?;
        let norm = load_layer_norm(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"))?;

        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            norm,
            span: tracing::span!(tracing::Level::TRACE, "embeddings"),
        })
    }

    fn forward(&self, input_ids: &Tensor, token_type_ids: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let seq_len = input_ids.dim(1)?;
        let position_ids = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;

        let words = input_ids.apply(&self.word_embeddings)?;
        let token_types = token_type_ids.apply(&self.token_type_embeddings)?;
        let positions = position_ids.apply(&self.position_embeddings)?;

        (words + token_types)?
            .broadcast_add(&positions)?
            .apply(&self.norm)
    }
}

/// Multi-head self-attention with its output projection and residual norm.
#[derive(Debug, Clone)]
struct Attention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    output_norm: LayerNorm,
    num_attention_heads: usize,
    attention_head_size: usize,
    span: tracing::Span,
}

impl Attention {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let hidden_size = config.hidden_size;
        let query = linear(hidden_size, hidden_size, vb.pp("self.query"))?;
        let key = linear(hidden_size, hidden_size, vb.pp("self.key"))?;
        let value = linear(hidden_size, hidden_size, vb.pp("self.value"))?;
        let output = linear(hidden_size, hidden_size, vb.pp("output.dense"))?;
        let output_norm = load_layer_norm(
            hidden_size,
            config.layer_norm_eps,
            vb.pp("output.LayerNorm"),
        )?;

        Ok(Self {
            query,
            key,
            value,
            output,
            output_norm,
            num_attention_heads: config.num_attention_heads,
            attention_head_size: hidden_size / config.num_attention_heads,
            span: tracing::span!(tracing::Level::TRACE, "attn"),
        })
    }

    fn split_heads(&self, xs: Tensor, batch: usize, seq_len: usize) -> Result<Tensor> {
        xs.reshape((
            batch,
            seq_len,
            self.num_attention_heads,
            self.attention_head_size,
        ))?
        .transpose(1, 2)?
        .contiguous()
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let (batch, seq_len, hidden_size) = hidden_states.dims3()?;

        let q = self.split_heads(hidden_states.apply(&self.query)?, batch, seq_len)?;
        let k = self.split_heads(hidden_states.apply(&self.key)?, batch, seq_len)?;
        let v = self.split_heads(hidden_states.apply(&self.value)?, batch, seq_len)?;

        let scale = (self.attention_head_size as f64).powf(-0.5);
        let attention_scores = (q.matmul(&k.transpose(D::Minus2, D::Minus1)?)? * scale)?;
        let attention_scores = attention_scores.broadcast_add(attention_mask)?;
        let attention_probs = softmax(&attention_scores, D::Minus1)?;

        let context = attention_probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, seq_len, hidden_size))?;

        (context.apply(&self.output)? + hidden_states)?.apply(&self.output_norm)
    }
}

#[derive(Debug, Clone)]
struct FeedForward {
    intermediate: Linear,
    output: Linear,
    norm: LayerNorm,
    activation: HiddenAct,
    span: tracing::Span,
}

impl FeedForward {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let intermediate = linear(
            config.hidden_size,
            config.intermediate_size,
            vb.pp("intermediate.dense"),
        )?;
        let output = linear(
            config.intermediate_size,
            config.hidden_size,
            vb.pp("output.dense"),
        )?;
        let norm = load_layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb.pp("output.LayerNorm"),
        )?;

        Ok(Self {
            intermediate,
            output,
            norm,
            activation: config.hidden_act,
            span: tracing::span!(tracing::Level::TRACE, "mlp"),
        })
    }
}

impl Module for FeedForward {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let hidden = xs
            .apply(&self.intermediate)?
            .apply(&self.activation)?
            .apply(&self.output)?;
        (hidden + xs)?.apply(&self.norm)
    }
}

#[derive(Debug, Clone)]
struct TransformerLayer {
    attention: Attention,
    feed_forward: FeedForward,
}

impl TransformerLayer {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let attention = Attention::load(vb.pp("attention"), config)?;
        let feed_forward = FeedForward::load(vb, config)?;
        Ok(Self {
            attention,
            feed_forward,
        })
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        self.attention
            .forward(hidden_states, attention_mask)?
            .apply(&self.feed_forward)
    }
}

/// `[CLS]` pooler followed by the classifier.
#[derive(Debug, Clone)]
struct ClassificationHead {
    pooler: Linear,
    classifier: Linear,
}

impl ClassificationHead {
    fn load(encoder_vb: VarBuilder, root_vb: VarBuilder, config: &Config) -> Result<Self> {
        let pooler = linear(
            config.hidden_size,
            config.hidden_size,
            encoder_vb.pp("pooler.dense"),
        )?;
        let classifier = linear(
            config.hidden_size,
            config.num_labels(),
            root_vb.pp("classifier"),
        )?;
        Ok(Self { pooler, classifier })
    }

    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        hidden_states
            .i((.., 0))?
            .apply(&self.pooler)?
            .tanh()?
            .apply(&self.classifier)
    }
}

/// BERT model for sequence classification.
#[derive(Debug, Clone)]
pub struct BertForSequenceClassification {
    embeddings: Embeddings,
    layers: Vec<TransformerLayer>,
    head: ClassificationHead,
    device: Device,
    dtype: DType,
}

impl BertForSequenceClassification {
    /// Load from a var builder rooted at the checkpoint.
    ///
    /// Encoder weights are expected under `bert.`; checkpoints saved without
    /// that prefix are accepted as well.
    pub fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let encoder_vb = if vb.contains_tensor("bert.embeddings.word_embeddings.weight") {
            vb.pp("bert")
        } else {
            vb.clone()
        };

        let embeddings = Embeddings::load(encoder_vb.pp("embeddings"), config)?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for layer_idx in 0..config.num_hidden_layers {
            layers.push(TransformerLayer::load(
                encoder_vb.pp(format!("encoder.layer.{layer_idx}")),
                config,
            )?);
        }

        let head = ClassificationHead::load(encoder_vb, vb.clone(), config)?;

        Ok(Self {
            embeddings,
            layers,
            head,
            device: vb.device().clone(),
            dtype: vb.dtype(),
        })
    }

    /// Additive mask: 0 for real tokens, the most negative float for padding.
    fn create_attention_mask(&self, mask: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len) = mask.dims2()?;
        let mask = mask.to_dtype(self.dtype)?.reshape((batch_size, 1, 1, seq_len))?;
        let inverted_mask = (1.0 - mask)?;
        inverted_mask * MIN_VALUE_F64
    }

    /// Forward pass for sequence classification.
    ///
    /// # Arguments
    /// * `input_ids` - Token IDs with shape `(batch_size, sequence_length)`
    /// * `token_type_ids` - Segment IDs with shape `(batch_size, sequence_length)`
    /// * `attention_mask` - Attention mask with shape `(batch_size, sequence_length)` (1 for real tokens, 0 for padding)
    ///
    /// # Returns
    /// Classification logits with shape `(batch_size, num_labels)`
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> Result<Tensor> {
        let attention_mask = self.create_attention_mask(attention_mask)?;
        let mut hidden_states = self.embeddings.forward(input_ids, token_type_ids)?;
        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states, &attention_mask)?;
        }
        self.head.forward(&hidden_states)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

/*
Pipeline Implementations
*/

use crate::core::{InferenceError, Result as InferenceResult};
use crate::loaders::{ModelArtifact, WeightFormat};

/// Sentiment classifier loaded from an unpacked model artifact directory.
#[derive(Debug, Clone)]
pub struct SentimentBertModel {
    model: BertForSequenceClassification,
    config: Config,
    device: Device,
}

impl SentimentBertModel {
    /// Locate and load the artifact in `dir`.
    pub fn from_dir(dir: impl AsRef<Path>, device: Device) -> InferenceResult<Self> {
        let artifact = ModelArtifact::locate(dir)?;
        tracing::info!(
            format = ?artifact.format,
            files = artifact.weights.len(),
            "model artifact located"
        );
        Self::from_artifact(&artifact, device)
    }

    pub fn from_artifact(artifact: &ModelArtifact, device: Device) -> InferenceResult<Self> {
        let config_content = artifact.read_config()?;
        let config: Config = serde_json::from_str(&config_content)
            .map_err(|e| InferenceError::load(format!("failed to parse model config: {e}")))?;
        config.validate().map_err(InferenceError::Load)?;

        let dtype = DType::F32;
        let vb = match artifact.format {
            WeightFormat::SafeTensors => unsafe {
                VarBuilder::from_mmaped_safetensors(artifact.weights.as_slice(), dtype, &device)
            },
            WeightFormat::PyTorch => VarBuilder::from_pth(&artifact.weights[0], dtype, &device),
        }
        .map_err(|e| InferenceError::load(format!("failed to read model weights: {e}")))?;

        let model = BertForSequenceClassification::load(vb, &config).map_err(|e| {
            InferenceError::load(format!("weights do not match the model config: {e}"))
        })?;

        tracing::info!(
            layers = model.num_layers(),
            labels = ?config.labels(),
            device = ?device.location(),
            "sentiment model loaded"
        );

        Ok(Self {
            model,
            config,
            device,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn labels(&self) -> Vec<String> {
        self.config.labels()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl crate::pipelines::sentiment_analysis_pipeline::model::SentimentAnalysisModel
    for SentimentBertModel
{
    fn logits(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> Result<Tensor> {
        self.model.forward(input_ids, token_type_ids, attention_mask)
    }

    fn num_labels(&self) -> usize {
        self.config.num_labels()
    }

    fn pad_token_id(&self) -> u32 {
        self.config.pad_token_id()
    }

    fn max_position_embeddings(&self) -> usize {
        self.config.max_position_embeddings
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY_CONFIG: &str = r#"{
        "model_type": "bert",
        "vocab_size": 16,
        "hidden_size": 8,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "intermediate_size": 16,
        "hidden_act": "gelu",
        "max_position_embeddings": 32,
        "id2label": {"0": "negative", "1": "neutral", "2": "positive"}
    }"#;

    #[test]
    fn config_defaults_follow_bert() {
        let config: Config = serde_json::from_str(TINY_CONFIG).unwrap();
        assert_eq!(config.type_vocab_size, 2);
        assert_eq!(config.layer_norm_eps, 1e-12);
        assert_eq!(config.pad_token_id(), 0);
        assert_eq!(config.num_labels(), 3);
        assert_eq!(config.labels(), ["negative", "neutral", "positive"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn other_model_families_are_rejected() {
        let mut config: Config = serde_json::from_str(TINY_CONFIG).unwrap();
        config.model_type = Some("modernbert".to_string());
        assert!(config.validate().unwrap_err().contains("modernbert"));
    }

    #[test]
    fn indivisible_heads_are_rejected() {
        let mut config: Config = serde_json::from_str(TINY_CONFIG).unwrap();
        config.num_attention_heads = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn num_labels_without_names_gets_placeholder_labels() {
        let mut config: Config = serde_json::from_str(TINY_CONFIG).unwrap();
        config.id2label = None;
        config.num_labels = Some(2);
        assert_eq!(config.labels(), ["LABEL_0", "LABEL_1"]);
    }

    #[test]
    fn tanh_approximation_aliases_parse() {
        let act: HiddenAct = serde_json::from_str(r#""gelu_pytorch_tanh""#).unwrap();
        assert_eq!(act, HiddenAct::GeluApproximate);
    }

    #[test]
    fn zero_weights_produce_uniform_logits() -> Result<()> {
        let config: Config = serde_json::from_str(TINY_CONFIG).unwrap();
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = BertForSequenceClassification::load(vb, &config)?;

        let input_ids = Tensor::new(&[[1u32, 5, 6, 2], [1, 7, 2, 0]], &device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let attention_mask = Tensor::new(&[[1u32, 1, 1, 1], [1, 1, 1, 0]], &device)?;

        let logits = model.forward(&input_ids, &token_type_ids, &attention_mask)?;
        assert_eq!(logits.dims(), &[2, 3]);
        let values: Vec<Vec<f32>> = logits.to_vec2()?;
        for row in values {
            assert!(row.iter().all(|v| *v == 0.0));
        }
        Ok(())
    }
}
