//! Audit trail of inventory movements and queue activity.
//!
//! Auditing is observability, not bookkeeping: a failed audit write never
//! fails the operation that triggered it. Call sites go through
//! [`record_best_effort`], which logs and moves on.

use crate::domain::{AccountId, ItemId, UserId};
use crate::remote::RemoteError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditKind {
	Allocation,
	Deallocation,
	Return,
	QueueDrain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
	pub account_id: AccountId,
	pub user_id: Option<UserId>,
	pub kind: AuditKind,
	pub item_id: Option<ItemId>,
	pub detail: serde_json::Value,
	pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
	pub fn new(account_id: AccountId, kind: AuditKind) -> Self {
		Self {
			account_id,
			user_id: None,
			kind,
			item_id: None,
			detail: serde_json::Value::Null,
			recorded_at: Utc::now(),
		}
	}

	#[must_use]
	pub fn with_user(mut self, user_id: Option<UserId>) -> Self {
		self.user_id = user_id;
		self
	}

	#[must_use]
	pub fn with_item(mut self, item_id: ItemId) -> Self {
		self.item_id = Some(item_id);
		self
	}

	#[must_use]
	pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
		self.detail = detail;
		self
	}
}

#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
	async fn record(&self, event: AuditEvent) -> Result<(), RemoteError>;
}

/// Record an audit event, downgrading failure to a warning.
pub async fn record_best_effort(sink: &dyn AuditSink, event: AuditEvent) {
	let kind = event.kind;
	if let Err(e) = sink.record(event).await {
		warn!(kind = kind.as_ref(), "audit record dropped: {e}");
	}
}

/// Collects events in memory for assertions.
#[derive(Default)]
pub struct MemoryAuditSink {
	events: Mutex<Vec<AuditEvent>>,
	fail_next: Mutex<u32>,
}

impl MemoryAuditSink {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn events(&self) -> Vec<AuditEvent> {
		self.events.lock().clone()
	}

	pub fn kinds(&self) -> Vec<AuditKind> {
		self.events.lock().iter().map(|e| e.kind).collect()
	}

	/// Make the next `n` records fail.
	pub fn fail_next(&self, n: u32) {
		*self.fail_next.lock() = n;
	}
}

#[async_trait::async_trait]
impl AuditSink for MemoryAuditSink {
	async fn record(&self, event: AuditEvent) -> Result<(), RemoteError> {
		{
			let mut remaining = self.fail_next.lock();
			if *remaining > 0 {
				*remaining -= 1;
				return Err(RemoteError::Unavailable("audit sink offline".to_owned()));
			}
		}
		self.events.lock().push(event);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tracing_test::traced_test;

	#[tokio::test]
	#[traced_test]
	async fn best_effort_swallows_sink_failures() {
		let sink = MemoryAuditSink::new();
		sink.fail_next(1);

		let event = AuditEvent::new(AccountId::from("acct_1"), AuditKind::Allocation)
			.with_item(ItemId::from("item_1"));
		record_best_effort(&sink, event.clone()).await;
		assert!(sink.events().is_empty());
		assert!(logs_contain("audit record dropped"));

		record_best_effort(&sink, event).await;
		assert_eq!(sink.kinds(), vec![AuditKind::Allocation]);
	}
}
