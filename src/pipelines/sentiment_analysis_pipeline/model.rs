use candle_core::{Device, Tensor};

/// A sequence classifier the sentiment pipeline can drive.
///
/// Implementations are loaded once and only read afterwards.
pub trait SentimentAnalysisModel {
    /// Raw class scores with shape `(batch_size, num_labels)`.
    ///
    /// All inputs have shape `(batch_size, sequence_length)`; the attention
    /// mask is 1 for real tokens and 0 for padding.
    fn logits(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> candle_core::Result<Tensor>;

    fn num_labels(&self) -> usize;

    fn pad_token_id(&self) -> u32;

    /// Longest input the position embeddings cover.
    fn max_position_embeddings(&self) -> usize;

    fn device(&self) -> &Device;
}
