pub mod dataset;
pub mod models;

pub use dataset::{ColumnSpec, DatasetStore};
pub use models::{LabelMap, LabelResult, Record};
