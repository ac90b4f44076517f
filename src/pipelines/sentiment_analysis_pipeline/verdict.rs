use crate::core::{ClassificationResponse, PredictionRecord};
use std::fmt;
use thiserror::Error;

/// Sentiment classes in the order the deployed model was trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    Negative,
    Neutral,
    Positive,
}

impl Sentiment {
    pub fn from_class(index: usize) -> Option<Self> {
        match index {
            0 => Some(Sentiment::Negative),
            1 => Some(Sentiment::Neutral),
            2 => Some(Sentiment::Positive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Positive => "positive",
        }
    }

    pub fn tone(&self) -> Tone {
        match self {
            Sentiment::Negative => Tone::Alarming,
            Sentiment::Neutral => Tone::Plain,
            Sentiment::Positive => Tone::Reassuring,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a front-end should colour a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Alarming,
    Plain,
    Reassuring,
}

impl Tone {
    /// SGR colour code for a terminal: red for alarming, green for
    /// reassuring, none for plain.
    pub fn ansi_color(&self) -> Option<u8> {
        match self {
            Tone::Alarming => Some(31),
            Tone::Plain => None,
            Tone::Reassuring => Some(32),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum VerdictError {
    #[error("expected a single prediction, got {0}")]
    NotSingle(usize),
    #[error("prediction carries no class probabilities")]
    NoProbabilities,
    #[error("unknown class '{0}' in prediction")]
    UnknownClass(String),
}

/// Human-readable reading of a single prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub sentiment: Sentiment,
    /// Probability of `sentiment` as a whole percentage.
    pub confidence_percent: u32,
}

impl Verdict {
    /// Read the most likely sentiment from the probability map.
    ///
    /// Any class outside the known label space or an empty map is an error,
    /// so a front-end never shows a verdict built from partial data.
    pub fn from_record(record: &PredictionRecord) -> Result<Self, VerdictError> {
        let mut best: Option<(Sentiment, usize, f64)> = None;
        for (key, &p) in &record.probabilities {
            let sentiment = key
                .parse::<usize>()
                .ok()
                .and_then(Sentiment::from_class)
                .ok_or_else(|| VerdictError::UnknownClass(key.clone()))?;
            let index = sentiment as usize;
            let better = match best {
                None => true,
                Some((_, best_index, best_p)) => p > best_p || (p == best_p && index < best_index),
            };
            if better {
                best = Some((sentiment, index, p));
            }
        }

        let (sentiment, _, p) = best.ok_or(VerdictError::NoProbabilities)?;
        Ok(Self {
            sentiment,
            confidence_percent: (p * 100.0).round_ties_even() as u32,
        })
    }

    pub fn from_response(response: &ClassificationResponse) -> Result<Self, VerdictError> {
        match response {
            ClassificationResponse::Single(record) => Self::from_record(record),
            ClassificationResponse::Batch(records) => Err(VerdictError::NotSingle(records.len())),
        }
    }

    pub fn tone(&self) -> Tone {
        self.sentiment.tone()
    }

    /// The verdict line, coloured by its tone when `color` is set.
    pub fn render(&self, color: bool) -> String {
        match self.tone().ansi_color().filter(|_| color) {
            Some(code) => format!("\x1b[{code}m{self}\x1b[0m"),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "This news is most likely {}, with a confidence of {}%.",
            self.sentiment, self.confidence_percent
        )
    }
}
