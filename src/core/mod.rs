pub mod config;
pub mod error;
pub mod prediction;

pub use config::ServeConfig;
pub use error::{InferenceError, Result};
pub use prediction::{ClassificationRequest, ClassificationResponse, PredictionRecord};
