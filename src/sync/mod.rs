//! Offline write path: conflict detection and the durable operation queue.

pub mod conflict;
pub mod queue;

pub use conflict::{ConflictDetector, ConflictError};
pub use queue::{
	BlockedOperation, OperationQueue, QueueError, QueueSnapshot, Resolution, WakeOutcome,
};
