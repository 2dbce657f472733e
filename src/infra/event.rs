//! Event bus for queue lifecycle notifications.
//!
//! Discrete events complement the snapshot channel on
//! [`crate::sync::queue::OperationQueue`]: the snapshot tells subscribers what
//! the queue looks like now, the bus tells them what just happened. Delivery
//! is lossy for consumers that stop reading; the queue itself never depends
//! on anyone listening.

use crate::domain::{AccountId, ItemId, OperationId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

const BUS_CAPACITY: usize = 1024;

/// Something the queue just did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, strum::AsRefStr)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueueEvent {
	/// An operation was accepted and persisted.
	Enqueued {
		id: OperationId,
		account_id: AccountId,
	},
	/// The remote store confirmed an operation.
	Drained {
		id: OperationId,
		account_id: AccountId,
	},
	/// The head operation hit a version conflict and froze the queue.
	Blocked { id: OperationId, item_id: ItemId },
	/// Delivery failed past the retry budget; the operation was dropped.
	Abandoned { id: OperationId, error: String },
	/// The operation's author no longer matches the signed-in user.
	Discarded { id: OperationId },
	/// A blocked operation was resolved by hand.
	Resolved { id: OperationId, retried: bool },
	/// The whole queue for an account was emptied.
	Cleared { account_id: AccountId },
}

#[derive(Debug, Clone)]
pub struct QueueEventBus {
	sender: broadcast::Sender<QueueEvent>,
}

impl QueueEventBus {
	pub fn new() -> Self {
		let (sender, _) = broadcast::channel(BUS_CAPACITY);
		Self { sender }
	}

	#[cfg(test)]
	pub fn new_with_capacity(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Emit an event to all subscribers, returning how many received it.
	pub fn emit(&self, event: QueueEvent) -> usize {
		let label = event.as_ref().to_owned();

		match self.sender.send(event) {
			Ok(count) => {
				debug!(event = %label, subscribers = count, "queue event emitted");
				count
			}
			Err(_) => {
				debug!(event = %label, "queue event emitted with no subscribers");
				0
			}
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
		self.sender.subscribe()
	}

	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}
}

impl Default for QueueEventBus {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn drained() -> QueueEvent {
		QueueEvent::Drained {
			id: OperationId::new(),
			account_id: AccountId::from("acct_1"),
		}
	}

	#[test]
	fn emit_without_subscribers_is_fine() {
		let bus = QueueEventBus::new();
		assert_eq!(bus.subscriber_count(), 0);
		assert_eq!(bus.emit(drained()), 0);
	}

	#[tokio::test]
	async fn every_subscriber_sees_the_event() {
		let bus = QueueEventBus::new();
		let mut first = bus.subscribe();
		let mut second = bus.subscribe();

		let event = QueueEvent::Cleared {
			account_id: AccountId::from("acct_1"),
		};
		assert_eq!(bus.emit(event.clone()), 2);

		assert_eq!(first.recv().await.unwrap(), event);
		assert_eq!(second.recv().await.unwrap(), event);
	}

	#[tokio::test]
	async fn slow_subscribers_lag_instead_of_blocking() {
		let bus = QueueEventBus::new_with_capacity(4);
		let mut subscriber = bus.subscribe();

		for _ in 0..32 {
			bus.emit(drained());
		}

		match subscriber.recv().await {
			Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped > 0),
			other => panic!("expected lag, got {other:?}"),
		}
	}
}
