pub mod check;
pub mod checksum;
pub mod comparator;
pub mod engine;
pub mod filter;
pub mod queue;
pub mod reporter;
pub mod task;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support;

pub use checksum::{calculate_hash, ContentHasher, Expected};
pub use comparator::{CompareConfig, FileComparator, FileRelation};
pub use engine::Synchronizer;
pub use filter::{ItemFilter, SkipReason};
pub use queue::{Prioritized, TaskLease, TaskQueue};
pub use reporter::{readable_file_size, SyncReport, TaskReporter};
pub use task::{Task, TaskContext, TaskKind, TaskSettings};
pub use transfer::TransferStage;
