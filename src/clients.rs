pub mod classifier;
pub mod oracle;

pub use classifier::{BatchClassifier, ClassifyError};
pub use oracle::{ChatCompletionsOracle, LabelOracle, OracleSettings, PromptBuilder};
