use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Texts submitted for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationRequest {
    /// `{"inputs": "text"}`
    Single(String),
    /// `{"inputs": ["text", ...]}`
    Batch(Vec<String>),
}

impl ClassificationRequest {
    /// Texts in submission order. A single request yields one element.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            ClassificationRequest::Single(text) => vec![text.as_str()],
            ClassificationRequest::Batch(texts) => texts.iter().map(String::as_str).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ClassificationRequest::Single(_) => 1,
            ClassificationRequest::Batch(texts) => texts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for ClassificationRequest {
    fn from(text: &str) -> Self {
        ClassificationRequest::Single(text.to_string())
    }
}

impl From<Vec<String>> for ClassificationRequest {
    fn from(texts: Vec<String>) -> Self {
        ClassificationRequest::Batch(texts)
    }
}

/// Classification of one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub text: String,
    pub predicted_class: usize,
    /// Probability of `predicted_class`, rounded to 4 decimals.
    pub confidence: f64,
    /// Class index (as a string) to probability, each rounded to 4 decimals.
    pub probabilities: BTreeMap<String, f64>,
}

impl PredictionRecord {
    /// Build a record from a softmax row.
    ///
    /// The arg-max is taken over the unrounded row and ties resolve to the
    /// lowest index. Returns `None` for an empty row.
    pub fn from_probabilities(text: &str, row: &[f32]) -> Option<Self> {
        let mut best: Option<(usize, f32)> = None;
        for (index, &p) in row.iter().enumerate() {
            match best {
                Some((_, max)) if p <= max => {}
                _ => best = Some((index, p)),
            }
        }
        let (predicted_class, max) = best?;

        let probabilities = row
            .iter()
            .enumerate()
            .map(|(index, &p)| (index.to_string(), round4(p)))
            .collect();

        Some(Self {
            text: text.to_string(),
            predicted_class,
            confidence: round4(max),
            probabilities,
        })
    }

    /// Probability stored for a class index, if present.
    pub fn probability(&self, class: usize) -> Option<f64> {
        self.probabilities.get(&class.to_string()).copied()
    }
}

fn round4(p: f32) -> f64 {
    (f64::from(p) * 10_000.0).round() / 10_000.0
}

/// Result of a prediction: one record for a single text, a list otherwise.
///
/// Callers branch on the variant; on the wire the two shapes are
/// distinguished only by JSON type, hence `untagged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassificationResponse {
    Single(PredictionRecord),
    Batch(Vec<PredictionRecord>),
}

impl ClassificationResponse {
    /// Apply the shape rule: exactly one record is returned unwrapped.
    pub fn from_records(mut records: Vec<PredictionRecord>) -> Self {
        if records.len() == 1 {
            if let Some(record) = records.pop() {
                return ClassificationResponse::Single(record);
            }
        }
        ClassificationResponse::Batch(records)
    }

    pub fn records(&self) -> &[PredictionRecord] {
        match self {
            ClassificationResponse::Single(record) => std::slice::from_ref(record),
            ClassificationResponse::Batch(records) => records,
        }
    }
}
