//! Model artifact and tokenizer loading.
//!
//! The model itself always comes from a local directory: the unpacked
//! artifact handed over by the hosting runtime, or a `model.tar.gz` that is
//! unpacked once next to itself. The tokenizer is fetched from the Hugging
//! Face Hub by repository id unless a local file is given.
//!
//! ## Main Types
//!
//! - [`ModelArtifact`] - Locates `config.json` and weight files in a model directory
//! - [`ModelArchive`] - Unpacks a gzipped tar artifact into a model directory
//! - [`HfLoader`] - Generic Hugging Face file loader with retry logic
//! - [`TokenizerLoader`] - Loads tokenizers from Hugging Face repositories

use crate::core::{InferenceError, Result};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::Tokenizer;

const CONFIG_FILE: &str = "config.json";
const SAFETENSORS_FILE: &str = "model.safetensors";
const SAFETENSORS_INDEX_FILE: &str = "model.safetensors.index.json";
const PYTORCH_FILE: &str = "pytorch_model.bin";
const VOCAB_FILE: &str = "vocab.txt";
const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";
const UNK_TOKEN: &str = "[UNK]";
const CLS_TOKEN: &str = "[CLS]";
const SEP_TOKEN: &str = "[SEP]";

/// Serialization format of the weight files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    SafeTensors,
    PyTorch,
}

/// Files making up a model artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    pub config: PathBuf,
    pub weights: Vec<PathBuf>,
    pub format: WeightFormat,
}

#[derive(Deserialize)]
struct SafeTensorsIndex {
    weight_map: std::collections::HashMap<String, String>,
}

impl ModelArtifact {
    /// Find the configuration and weights inside `dir`.
    ///
    /// Weights are looked up as a single `model.safetensors`, then a sharded
    /// set described by `model.safetensors.index.json`, then
    /// `pytorch_model.bin`.
    pub fn locate(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(InferenceError::load(format!(
                "model directory {} does not exist",
                dir.display()
            )));
        }

        let config = dir.join(CONFIG_FILE);
        if !config.is_file() {
            return Err(InferenceError::load(format!(
                "{CONFIG_FILE} not found in {}",
                dir.display()
            )));
        }

        let single = dir.join(SAFETENSORS_FILE);
        if single.is_file() {
            return Ok(Self {
                config,
                weights: vec![single],
                format: WeightFormat::SafeTensors,
            });
        }

        let index = dir.join(SAFETENSORS_INDEX_FILE);
        if index.is_file() {
            let weights = Self::sharded_weights(dir, &index)?;
            return Ok(Self {
                config,
                weights,
                format: WeightFormat::SafeTensors,
            });
        }

        let pytorch = dir.join(PYTORCH_FILE);
        if pytorch.is_file() {
            return Ok(Self {
                config,
                weights: vec![pytorch],
                format: WeightFormat::PyTorch,
            });
        }

        Err(InferenceError::load(format!(
            "model weights not found in {}. Expected `{SAFETENSORS_FILE}`, `{SAFETENSORS_INDEX_FILE}` or `{PYTORCH_FILE}`",
            dir.display()
        )))
    }

    fn sharded_weights(dir: &Path, index: &Path) -> Result<Vec<PathBuf>> {
        let content = std::fs::read_to_string(index)
            .map_err(|e| InferenceError::load(format!("failed to read {index:?}: {e}")))?;
        let index: SafeTensorsIndex = serde_json::from_str(&content)
            .map_err(|e| InferenceError::load(format!("failed to parse {index:?}: {e}")))?;

        let shards: BTreeSet<String> = index.weight_map.into_values().collect();
        let mut weights = Vec::with_capacity(shards.len());
        for shard in shards {
            let path = dir.join(&shard);
            if !path.is_file() {
                return Err(InferenceError::load(format!(
                    "weight shard {shard} listed in {SAFETENSORS_INDEX_FILE} is missing"
                )));
            }
            weights.push(path);
        }
        if weights.is_empty() {
            return Err(InferenceError::load(format!(
                "{SAFETENSORS_INDEX_FILE} lists no weight files"
            )));
        }
        Ok(weights)
    }

    /// Raw contents of `config.json`.
    pub fn read_config(&self) -> Result<String> {
        std::fs::read_to_string(&self.config).map_err(|e| {
            InferenceError::load(format!("failed to read config file {:?}: {e}", self.config))
        })
    }
}

const ARCHIVE_SUFFIXES: [&str; 2] = [".tar.gz", ".tgz"];

/// A model directory packed as a gzipped tar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArchive {
    pub path: PathBuf,
}

impl ModelArchive {
    /// `Some` when `path` names a `.tar.gz` or `.tgz` file.
    pub fn detect(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let name = path.file_name()?.to_str()?;
        ARCHIVE_SUFFIXES
            .iter()
            .any(|suffix| name.ends_with(suffix))
            .then(|| Self {
                path: path.to_path_buf(),
            })
    }

    /// Sibling directory named after the archive: `model.tar.gz` unpacks
    /// into `model/`.
    pub fn default_target(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let stem = ARCHIVE_SUFFIXES
            .iter()
            .find_map(|suffix| name.strip_suffix(suffix))
            .filter(|stem| !stem.is_empty())
            .unwrap_or("model");
        self.path.with_file_name(stem)
    }

    /// Unpack into `target` unless it already exists.
    ///
    /// Entries go to a staging directory that is renamed into place once
    /// complete, so an interrupted unpack is never mistaken for a model.
    pub fn unpack_to(&self, target: &Path) -> Result<PathBuf> {
        if target.is_dir() {
            tracing::info!(target = ?target, "reusing unpacked model");
            return Ok(target.to_path_buf());
        }

        let mut staging = target.as_os_str().to_owned();
        staging.push(".partial");
        let staging = PathBuf::from(staging);
        let io_err = |what: &str, e: std::io::Error| {
            InferenceError::load(format!("failed to {what} {:?}: {e}", self.path))
        };

        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| io_err("clear staging for", e))?;
        }
        std::fs::create_dir_all(&staging).map_err(|e| io_err("stage", e))?;

        tracing::info!(archive = ?self.path, target = ?target, "unpacking model archive");
        let file = std::fs::File::open(&self.path).map_err(|e| io_err("open", e))?;
        tar::Archive::new(GzDecoder::new(file))
            .unpack(&staging)
            .map_err(|e| io_err("unpack", e))?;
        std::fs::rename(&staging, target).map_err(|e| io_err("move unpacked", e))?;

        Ok(target.to_path_buf())
    }
}

/// The model directory behind `path`, unpacking it first when `path` is an
/// archive.
pub fn resolve_model_dir(path: &Path) -> Result<PathBuf> {
    match ModelArchive::detect(path) {
        Some(archive) => archive.unpack_to(&archive.default_target()),
        None => Ok(path.to_path_buf()),
    }
}

#[derive(Debug, Clone)]
pub struct HfLoader {
    pub repo: String,
    pub filename: String,
}

impl HfLoader {
    pub fn new(repo: &str, filename: &str) -> Self {
        Self {
            repo: repo.into(),
            filename: filename.into(),
        }
    }

    pub async fn load(&self) -> Result<PathBuf> {
        let hf_api = hf_hub::api::tokio::ApiBuilder::new()
            .with_chunk_size(None)
            .build()
            .map_err(|e| InferenceError::load(format!("failed to initialise hub client: {e}")))?;
        let hf_api = hf_api.model(self.repo.clone());

        // Concurrent downloads of the same file contend for the cache lock.
        let max_retries = 3;
        let mut attempt = 0;
        loop {
            match hf_api.get(self.filename.as_str()).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    let error_msg = e.to_string();
                    if error_msg.contains("Lock acquisition failed") && attempt < max_retries - 1 {
                        let wait_time = std::time::Duration::from_millis(100 * (1 << attempt));
                        tracing::warn!(
                            repo = %self.repo,
                            file = %self.filename,
                            attempt,
                            "hub cache locked, retrying"
                        );
                        tokio::time::sleep(wait_time).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(InferenceError::load(format!(
                        "failed to fetch {} from {}: {error_msg}",
                        self.filename, self.repo
                    )));
                }
            }
        }
    }
}

/// Where a tokenizer comes from.
#[derive(Debug, Clone)]
pub enum TokenizerSource {
    /// `tokenizer.json` of a hub repository, or its `vocab.txt` when the
    /// repository predates fast tokenizers.
    Hub(HfLoader),
    /// A `tokenizer.json`, or a WordPiece `vocab.txt`, on disk.
    File(PathBuf),
}

/// The part of `tokenizer_config.json` a WordPiece vocabulary needs.
#[derive(Debug, Deserialize)]
struct WordPieceOptions {
    #[serde(default = "default_lowercase")]
    do_lower_case: bool,
}

fn default_lowercase() -> bool {
    true
}

impl Default for WordPieceOptions {
    fn default() -> Self {
        Self {
            do_lower_case: default_lowercase(),
        }
    }
}

impl WordPieceOptions {
    /// Options from `path`; missing or unreadable files keep the BERT
    /// uncased defaults.
    fn read(path: Option<&Path>) -> Self {
        path.and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct TokenizerLoader {
    pub source: TokenizerSource,
}

impl TokenizerLoader {
    pub fn new(repo: &str, filename: &str) -> Self {
        Self {
            source: TokenizerSource::Hub(HfLoader::new(repo, filename)),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: TokenizerSource::File(path.into()),
        }
    }

    pub async fn load(&self) -> Result<Tokenizer> {
        let (path, tokenizer) = match &self.source {
            TokenizerSource::Hub(loader) => match loader.load().await {
                Ok(path) => {
                    let tokenizer = tokenizer_from_json(&path)?;
                    (path, tokenizer)
                }
                Err(json_err) => {
                    tracing::warn!(
                        repo = %loader.repo,
                        "{}; building the tokenizer from {VOCAB_FILE}",
                        load_message(json_err)
                    );
                    let vocab = HfLoader::new(&loader.repo, VOCAB_FILE)
                        .load()
                        .await
                        .map_err(|e| {
                            InferenceError::load(format!(
                                "no usable tokenizer in {}: {}",
                                loader.repo,
                                load_message(e)
                            ))
                        })?;
                    let options = HfLoader::new(&loader.repo, TOKENIZER_CONFIG_FILE)
                        .load()
                        .await
                        .ok();
                    let tokenizer = tokenizer_from_vocab(&vocab, options.as_deref())?;
                    (vocab, tokenizer)
                }
            },
            TokenizerSource::File(path) => {
                let tokenizer = if is_vocab_file(path) {
                    let options = path.with_file_name(TOKENIZER_CONFIG_FILE);
                    tokenizer_from_vocab(path, Some(options.as_path()))?
                } else {
                    tokenizer_from_json(path)?
                };
                (path.clone(), tokenizer)
            }
        };
        tracing::info!(path = ?path, "tokenizer loaded");

        Ok(tokenizer)
    }
}

fn load_message(error: InferenceError) -> String {
    match error {
        InferenceError::Load(msg) => msg,
        other => other.to_string(),
    }
}

fn is_vocab_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "txt")
}

fn tokenizer_from_json(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path)
        .map_err(|e| InferenceError::load(format!("failed to load tokenizer {path:?}: {e}")))
}

/// Build a BERT WordPiece tokenizer from a plain vocabulary file, the way
/// slow-tokenizer checkpoints are meant to be read.
fn tokenizer_from_vocab(vocab: &Path, options: Option<&Path>) -> Result<Tokenizer> {
    let options = WordPieceOptions::read(options);
    let vocab_path = vocab
        .to_str()
        .ok_or_else(|| InferenceError::load(format!("non UTF-8 vocabulary path {vocab:?}")))?;

    let wordpiece = WordPiece::from_file(vocab_path)
        .unk_token(UNK_TOKEN.to_string())
        .build()
        .map_err(|e| InferenceError::load(format!("failed to read vocabulary {vocab:?}: {e}")))?;

    let mut tokenizer = Tokenizer::new(wordpiece);
    tokenizer.with_normalizer(Some(BertNormalizer::new(
        true,
        true,
        None,
        options.do_lower_case,
    )));
    tokenizer.with_pre_tokenizer(Some(BertPreTokenizer));

    let special = |token: &str| {
        tokenizer
            .token_to_id(token)
            .map(|id| (token.to_string(), id))
            .ok_or_else(|| InferenceError::load(format!("{token} is missing from {vocab:?}")))
    };
    let cls = special(CLS_TOKEN)?;
    let sep = special(SEP_TOKEN)?;
    tokenizer.with_post_processor(Some(BertProcessing::new(sep, cls)));

    Ok(tokenizer)
}
