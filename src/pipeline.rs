//! Sequential labeling pipeline: batching, merge, checkpoint and the job driver.

pub mod batch;
pub mod checkpoint;
pub mod driver;
pub mod merge;

pub use batch::{Batch, partition};
pub use checkpoint::{CheckpointManager, CheckpointMode};
pub use driver::{JobSettings, LabelingJob, RunSummary};
pub use merge::{MergeOutcome, merge};
