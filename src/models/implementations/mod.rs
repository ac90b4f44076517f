pub mod bert;

pub use bert::{BertForSequenceClassification, SentimentBertModel};
