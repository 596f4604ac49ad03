//! Adaptive-seed discovery: table merge, packed records, shard sort.

pub mod merge;
pub mod record;
pub mod sort;

pub use merge::{merge_worker, MergeStats, SeedCounts};
pub use record::SeedLayout;
pub use sort::{import_and_sort, SortedShard};
