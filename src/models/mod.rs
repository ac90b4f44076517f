pub mod implementations;

pub use implementations::bert::Config as BertConfig;
