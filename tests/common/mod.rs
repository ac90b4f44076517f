//! A tiny BERT checkpoint written to a temporary directory, shaped like a
//! real unpacked artifact: `config.json`, `model.safetensors` and a local
//! `tokenizer.json`.

#![allow(dead_code)]

use candle_core::{Device, Tensor};
use finmood::pipelines::sentiment_analysis_pipeline::*;
use finmood::pipelines::utils::DeviceSelectable;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const HIDDEN: usize = 8;
pub const INTERMEDIATE: usize = 16;
pub const VOCAB: usize = 16;
pub const POSITIONS: usize = 32;
pub const TYPES: usize = 2;
pub const LABELS: usize = 3;

pub const CONFIG: &str = r#"{
    "architectures": ["BertForSequenceClassification"],
    "model_type": "bert",
    "vocab_size": 16,
    "hidden_size": 8,
    "num_hidden_layers": 1,
    "num_attention_heads": 2,
    "intermediate_size": 16,
    "hidden_act": "gelu",
    "max_position_embeddings": 32,
    "type_vocab_size": 2,
    "layer_norm_eps": 1e-12,
    "pad_token_id": 0,
    "id2label": {"0": "negative", "1": "neutral", "2": "positive"},
    "label2id": {"negative": 0, "neutral": 1, "positive": 2}
}"#;

pub const TOKENIZER: &str = r#"{
    "version": "1.0",
    "truncation": null,
    "padding": null,
    "added_tokens": [],
    "normalizer": {"type": "Lowercase"},
    "pre_tokenizer": {"type": "Whitespace"},
    "post_processor": {"type": "BertProcessing", "sep": ["[SEP]", 3], "cls": ["[CLS]", 2]},
    "decoder": null,
    "model": {
        "type": "WordLevel",
        "vocab": {
            "[PAD]": 0, "[UNK]": 1, "[CLS]": 2, "[SEP]": 3,
            "nike": 4, "sales": 5, "have": 6, "increased": 7,
            "decreased": 8, "stock": 9, "fell": 10, "rose": 11,
            "profit": 12, "loss": 13, "the": 14, "shares": 15
        },
        "unk_token": "[UNK]"
    }
}"#;

/// Deterministic values in `[-0.5, 0.5)`, different for every `seed`.
fn values(seed: usize, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| ((i * 7919 + seed * 104_729) % 1000) as f32 / 1000.0 - 0.5)
        .collect()
}

struct Weights {
    tensors: HashMap<String, Tensor>,
    seed: usize,
}

impl Weights {
    fn random(&mut self, name: &str, shape: &[usize]) -> anyhow::Result<()> {
        self.seed += 1;
        let len = shape.iter().product();
        let tensor = Tensor::from_vec(values(self.seed, len), shape, &Device::Cpu)?;
        self.tensors.insert(name.to_string(), tensor);
        Ok(())
    }

    fn linear(&mut self, prefix: &str, out_dim: usize, in_dim: usize) -> anyhow::Result<()> {
        self.random(&format!("{prefix}.weight"), &[out_dim, in_dim])?;
        self.random(&format!("{prefix}.bias"), &[out_dim])
    }

    fn layer_norm(&mut self, prefix: &str) -> anyhow::Result<()> {
        let ones = Tensor::ones(HIDDEN, candle_core::DType::F32, &Device::Cpu)?;
        let zeros = Tensor::zeros(HIDDEN, candle_core::DType::F32, &Device::Cpu)?;
        self.tensors.insert(format!("{prefix}.weight"), ones);
        self.tensors.insert(format!("{prefix}.bias"), zeros);
        Ok(())
    }
}

fn write_weights(path: &Path) -> anyhow::Result<()> {
    let mut w = Weights {
        tensors: HashMap::new(),
        seed: 0,
    };
    w.random("bert.embeddings.word_embeddings.weight", &[VOCAB, HIDDEN])?;
    w.random("bert.embeddings.position_embeddings.weight", &[POSITIONS, HIDDEN])?;
    w.random("bert.embeddings.token_type_embeddings.weight", &[TYPES, HIDDEN])?;
    w.layer_norm("bert.embeddings.LayerNorm")?;

    let layer = "bert.encoder.layer.0";
    for name in ["query", "key", "value"] {
        w.linear(&format!("{layer}.attention.self.{name}"), HIDDEN, HIDDEN)?;
    }
    w.linear(&format!("{layer}.attention.output.dense"), HIDDEN, HIDDEN)?;
    w.layer_norm(&format!("{layer}.attention.output.LayerNorm"))?;
    w.linear(&format!("{layer}.intermediate.dense"), INTERMEDIATE, HIDDEN)?;
    w.linear(&format!("{layer}.output.dense"), HIDDEN, INTERMEDIATE)?;
    w.layer_norm(&format!("{layer}.output.LayerNorm"))?;

    w.linear("bert.pooler.dense", HIDDEN, HIDDEN)?;
    w.linear("classifier", LABELS, HIDDEN)?;

    candle_core::safetensors::save(&w.tensors, path)?;
    Ok(())
}

/// An unpacked artifact that lives as long as the value.
pub struct TinyArtifact {
    pub dir: TempDir,
}

impl TinyArtifact {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("config.json"), CONFIG)?;
        std::fs::write(dir.path().join("tokenizer.json"), TOKENIZER)?;
        write_weights(&dir.path().join("model.safetensors"))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn tokenizer_file(&self) -> PathBuf {
        self.dir.path().join("tokenizer.json")
    }

    /// Builder reading the bundled tokenizer instead of the hub.
    pub fn builder(&self) -> SentimentAnalysisPipelineBuilder {
        SentimentAnalysisPipelineBuilder::bert(self.path())
            .tokenizer_file(self.tokenizer_file())
            .cpu()
    }

    pub async fn pipeline(&self) -> anyhow::Result<SentimentAnalysisPipeline<SentimentBertModel>> {
        Ok(self.builder().build().await?)
    }
}
