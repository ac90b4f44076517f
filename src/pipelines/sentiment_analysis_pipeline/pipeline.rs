use super::model::SentimentAnalysisModel;
use crate::core::{
    ClassificationRequest, ClassificationResponse, InferenceError, PredictionRecord, Result,
};
use candle_core::{DType, Tensor, D};
use candle_nn::ops::softmax;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

/// Token tensors of one batch, flattened row-major.
struct EncodedBatch {
    input_ids: Vec<u32>,
    token_type_ids: Vec<u32>,
    attention_mask: Vec<u32>,
    batch_size: usize,
    seq_len: usize,
}

/// A ready-to-use sentiment classifier.
///
/// Owns the model and a tokenizer configured for batch-longest padding and
/// truncation. Both are set up once in [`SentimentAnalysisPipeline::new`] and
/// only read by [`predict`](SentimentAnalysisPipeline::predict).
///
/// Example:
/// ```rust,no_run
/// use finmood::core::{ClassificationRequest, ClassificationResponse};
/// use finmood::pipelines::sentiment_analysis_pipeline::*;
///
/// # async fn run() -> finmood::core::Result<()> {
/// let pipeline = SentimentAnalysisPipelineBuilder::bert("/opt/ml/model")
///     .build()
///     .await?;
///
/// let response = pipeline.predict(&ClassificationRequest::from("Nike sales have increased"))?;
/// if let ClassificationResponse::Single(record) = response {
///     println!("class {} ({:.4})", record.predicted_class, record.confidence);
/// }
/// # Ok(())
/// # }
/// ```
pub struct SentimentAnalysisPipeline<M: SentimentAnalysisModel> {
    pub(crate) model: M,
    pub(crate) tokenizer: Tokenizer,
    max_length: usize,
}

impl<M: SentimentAnalysisModel> SentimentAnalysisPipeline<M> {
    /// Pair a model with its tokenizer, padding with the model's pad token
    /// and truncating to `max_length` tokens.
    pub fn new(model: M, mut tokenizer: Tokenizer, max_length: usize) -> Result<Self> {
        let pad_id = model.pad_token_id();
        let pp = PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            pad_id,
            pad_token: tokenizer
                .id_to_token(pad_id)
                .unwrap_or_else(|| "[PAD]".to_string()),
            ..Default::default()
        };
        tokenizer.with_padding(Some(pp));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| InferenceError::load(format!("invalid truncation settings: {e}")))?;

        if max_length > model.max_position_embeddings() {
            tracing::warn!(
                max_length,
                max_position_embeddings = model.max_position_embeddings(),
                "truncation length exceeds the model's position embeddings; long texts will fail"
            );
        }

        Ok(Self {
            model,
            tokenizer,
            max_length,
        })
    }

    /// Classify every text of the request.
    ///
    /// The whole request is tokenized and run as one batch. Any failure fails
    /// the request as a whole. One text yields
    /// [`ClassificationResponse::Single`], even if it arrived as a list.
    pub fn predict(&self, request: &ClassificationRequest) -> Result<ClassificationResponse> {
        let texts = request.texts();
        if texts.is_empty() {
            return Err(InferenceError::malformed("at least one text is required"));
        }

        let rows = self.class_probabilities(&texts)?;
        let records = texts
            .iter()
            .zip(&rows)
            .map(|(text, row)| {
                PredictionRecord::from_probabilities(text, row)
                    .ok_or_else(|| InferenceError::inference("model produced no class scores"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ClassificationResponse::from_records(records))
    }

    /// Softmax distribution over the classes, one row per text.
    pub fn class_probabilities(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let batch = self.encode(texts)?;
        let (batch_size, seq_len) = (batch.batch_size, batch.seq_len);

        let rows = self
            .forward(batch)
            .map_err(|e| InferenceError::inference(format!("forward pass failed: {e}")))?;

        let num_labels = self.model.num_labels();
        if rows.len() != batch_size || rows.iter().any(|row| row.len() != num_labels) {
            return Err(InferenceError::inference(format!(
                "expected {batch_size} rows of {num_labels} scores from the model"
            )));
        }

        tracing::debug!(batch_size, seq_len, "classified batch");
        Ok(rows)
    }

    fn encode(&self, texts: &[&str]) -> Result<EncodedBatch> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| InferenceError::inference(format!("tokenization failed: {e}")))?;

        let batch_size = encodings.len();
        let seq_len = encodings.first().map_or(0, |encoding| encoding.len());
        if seq_len == 0 {
            return Err(InferenceError::inference("tokenizer produced no tokens"));
        }
        if encodings.iter().any(|encoding| encoding.len() != seq_len) {
            return Err(InferenceError::inference(
                "tokenizer produced sequences of different lengths",
            ));
        }

        let mut batch = EncodedBatch {
            input_ids: Vec::with_capacity(batch_size * seq_len),
            token_type_ids: Vec::with_capacity(batch_size * seq_len),
            attention_mask: Vec::with_capacity(batch_size * seq_len),
            batch_size,
            seq_len,
        };
        for encoding in &encodings {
            batch.input_ids.extend_from_slice(encoding.get_ids());
            batch.token_type_ids.extend_from_slice(encoding.get_type_ids());
            batch.attention_mask.extend_from_slice(encoding.get_attention_mask());
        }
        Ok(batch)
    }

    fn forward(&self, batch: EncodedBatch) -> candle_core::Result<Vec<Vec<f32>>> {
        let shape = (batch.batch_size, batch.seq_len);
        let device = self.model.device();

        let input_ids = Tensor::from_vec(batch.input_ids, shape, device)?;
        let token_type_ids = Tensor::from_vec(batch.token_type_ids, shape, device)?;
        let attention_mask = Tensor::from_vec(batch.attention_mask, shape, device)?;

        let logits = self
            .model
            .logits(&input_ids, &token_type_ids, &attention_mask)?
            .to_dtype(DType::F32)?;
        softmax(&logits, D::Minus1)?.to_vec2::<f32>()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn device(&self) -> &candle_core::Device {
        self.model.device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    /// Scores each row by counting cue words among its unpadded tokens.
    struct CueWordModel {
        device: Device,
    }

    const BAD: u32 = 4;
    const FINE: u32 = 5;
    const GREAT: u32 = 6;

    impl SentimentAnalysisModel for CueWordModel {
        fn logits(
            &self,
            input_ids: &Tensor,
            _token_type_ids: &Tensor,
            attention_mask: &Tensor,
        ) -> candle_core::Result<Tensor> {
            let ids: Vec<Vec<u32>> = input_ids.to_vec2()?;
            let mask: Vec<Vec<u32>> = attention_mask.to_vec2()?;
            let mut scores = Vec::with_capacity(ids.len() * 3);
            for (row, row_mask) in ids.iter().zip(&mask) {
                let count = |cue: u32| {
                    row.iter()
                        .zip(row_mask)
                        .filter(|(id, m)| **id == cue && **m == 1)
                        .count() as f32
                };
                scores.extend([count(BAD), count(FINE), count(GREAT)]);
            }
            Tensor::from_vec(scores, (ids.len(), 3), &self.device)
        }

        fn num_labels(&self) -> usize {
            3
        }

        fn pad_token_id(&self) -> u32 {
            0
        }

        fn max_position_embeddings(&self) -> usize {
            512
        }

        fn device(&self) -> &Device {
            &self.device
        }
    }

    fn tokenizer() -> Tokenizer {
        r#"{
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
                "vocab": {"[PAD]": 0, "[UNK]": 1, "[CLS]": 2, "[SEP]": 3, "bad": 4, "fine": 5, "great": 6, "sales": 7},
                "unk_token": "[UNK]"
            }
        }"#
        .parse()
        .unwrap()
    }

    fn pipeline(max_length: usize) -> SentimentAnalysisPipeline<CueWordModel> {
        let model = CueWordModel {
            device: Device::Cpu,
        };
        SentimentAnalysisPipeline::new(model, tokenizer(), max_length).unwrap()
    }

    fn single(response: ClassificationResponse) -> PredictionRecord {
        match response {
            ClassificationResponse::Single(record) => record,
            ClassificationResponse::Batch(records) => panic!("expected one record, got {records:?}"),
        }
    }

    #[test]
    fn single_text_yields_single_record() {
        let response = pipeline(512)
            .predict(&ClassificationRequest::from("great sales"))
            .unwrap();
        let record = single(response);
        assert_eq!(record.text, "great sales");
        assert_eq!(record.predicted_class, 2);
        assert!(record.confidence > 0.5);
    }

    #[test]
    fn one_element_batch_is_unwrapped() {
        let request = ClassificationRequest::Batch(vec!["bad".to_string()]);
        let record = single(pipeline(512).predict(&request).unwrap());
        assert_eq!(record.predicted_class, 0);
    }

    #[test]
    fn batch_preserves_order_and_length() {
        let texts = vec![
            "bad bad".to_string(),
            "fine".to_string(),
            "great great great sales".to_string(),
        ];
        let response = pipeline(512)
            .predict(&ClassificationRequest::Batch(texts.clone()))
            .unwrap();
        let ClassificationResponse::Batch(records) = response else {
            panic!("expected a batch");
        };
        assert_eq!(records.len(), 3);
        for (record, text) in records.iter().zip(&texts) {
            assert_eq!(&record.text, text);
            let sum: f64 = record.probabilities.values().sum();
            assert!((sum - 1.0).abs() < 1e-3);
        }
        let classes: Vec<_> = records.iter().map(|r| r.predicted_class).collect();
        assert_eq!(classes, [0, 1, 2]);
    }

    #[test]
    fn padding_does_not_leak_into_results() {
        let p = pipeline(512);
        let alone = p.class_probabilities(&["great"]).unwrap();
        let batched = p
            .class_probabilities(&["great", "fine fine fine fine fine sales"])
            .unwrap();
        assert_eq!(alone[0], batched[0]);
    }

    #[test]
    fn ties_resolve_to_lowest_class() {
        let record = single(
            pipeline(512)
                .predict(&ClassificationRequest::from("sales"))
                .unwrap(),
        );
        assert_eq!(record.predicted_class, 0);
        assert_eq!(record.confidence, 0.3333);
    }

    #[test]
    fn truncation_drops_trailing_tokens() {
        // [CLS] fine [SEP] once truncated to three tokens.
        let record = single(
            pipeline(3)
                .predict(&ClassificationRequest::from("fine great great"))
                .unwrap(),
        );
        assert_eq!(record.predicted_class, 1);
    }

    #[test]
    fn repeated_predictions_are_identical() {
        let p = pipeline(512);
        let request = ClassificationRequest::from("fine great");
        assert_eq!(p.predict(&request).unwrap(), p.predict(&request).unwrap());
    }

    #[test]
    fn empty_batch_is_malformed() {
        let err = pipeline(512)
            .predict(&ClassificationRequest::Batch(vec![]))
            .unwrap_err();
        assert!(matches!(err, InferenceError::MalformedRequest(_)));
    }
}
