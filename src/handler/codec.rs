//! JSON wire format of the inference contract.

use crate::core::{ClassificationRequest, ClassificationResponse, InferenceError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only content type accepted on either side of the contract.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Key holding the texts in a request body.
pub const INPUTS_KEY: &str = "inputs";

/// Check that `content_type` is JSON, ignoring parameters such as `charset`.
pub fn ensure_json(content_type: &str) -> Result<()> {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    if essence.eq_ignore_ascii_case(JSON_CONTENT_TYPE) {
        Ok(())
    } else {
        Err(InferenceError::UnsupportedContentType(
            content_type.to_string(),
        ))
    }
}

/// Check that an `Accept` header admits JSON.
///
/// The header is a comma separated list of media ranges. JSON is admitted
/// when any range is `application/json`, `application/*` or `*/*` without
/// `q=0`. An empty header admits anything.
pub fn ensure_accepts_json(accept: &str) -> Result<()> {
    if accept.trim().is_empty() {
        return Ok(());
    }
    let admits_json = accept.split(',').any(|range| {
        let mut parts = range.split(';');
        let essence = parts.next().unwrap_or_default().trim();
        let refused = parts.any(|param| {
            param
                .split_once('=')
                .filter(|(name, _)| name.trim().eq_ignore_ascii_case("q"))
                .and_then(|(_, q)| q.trim().parse::<f32>().ok())
                .is_some_and(|q| q <= 0.0)
        });
        !refused
            && (essence.eq_ignore_ascii_case(JSON_CONTENT_TYPE)
                || essence.eq_ignore_ascii_case("application/*")
                || essence == "*/*")
    });
    if admits_json {
        Ok(())
    } else {
        Err(InferenceError::UnsupportedContentType(accept.to_string()))
    }
}

/// Turn a request body into a [`ClassificationRequest`].
///
/// The body must be a JSON object whose `inputs` value is a string or a
/// non-empty array of strings. Nothing else is coerced into text.
pub fn decode_request(body: &[u8], content_type: &str) -> Result<ClassificationRequest> {
    ensure_json(content_type)?;

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| InferenceError::malformed(format!("body is not valid JSON: {e}")))?;
    let Value::Object(mut fields) = value else {
        return Err(InferenceError::malformed("body must be a JSON object"));
    };
    let inputs = fields.remove(INPUTS_KEY).ok_or_else(|| {
        InferenceError::malformed(format!("missing '{INPUTS_KEY}' key"))
    })?;

    match inputs {
        Value::String(text) => Ok(ClassificationRequest::Single(text)),
        Value::Array(items) => {
            if items.is_empty() {
                return Err(InferenceError::malformed(format!(
                    "'{INPUTS_KEY}' must contain at least one text"
                )));
            }
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| match item {
                    Value::String(text) => Ok(text),
                    other => Err(InferenceError::malformed(format!(
                        "'{INPUTS_KEY}[{index}]' must be a string, got {}",
                        json_type(&other)
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(ClassificationRequest::Batch)
        }
        other => Err(InferenceError::malformed(format!(
            "'{INPUTS_KEY}' must be a string or a list of strings, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[derive(Serialize)]
struct PredictionEnvelopeRef<'a> {
    predictions: &'a ClassificationResponse,
}

/// Body returned by the endpoint: `{"predictions": <record or list>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEnvelope {
    pub predictions: ClassificationResponse,
}

/// Serialize a response for a caller whose `Accept` header is `accept`.
pub fn encode_response(response: &ClassificationResponse, accept: &str) -> Result<Vec<u8>> {
    ensure_accepts_json(accept)?;
    serde_json::to_vec(&PredictionEnvelopeRef {
        predictions: response,
    })
    .map_err(|e| InferenceError::inference(format!("failed to serialize predictions: {e}")))
}

/// Parse a body produced by [`encode_response`].
pub fn decode_response(body: &[u8]) -> Result<ClassificationResponse> {
    let envelope: PredictionEnvelope = serde_json::from_slice(body)
        .map_err(|e| InferenceError::malformed(format!("unexpected response body: {e}")))?;
    Ok(envelope.predictions)
}
