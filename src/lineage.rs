//! Movement lineage: where every item has been.
//!
//! Every ledger move appends an immutable [`LineageEdge`] and keeps two
//! pointers on the item itself: `origin_transaction_id` (first move ever,
//! written once) and `latest_transaction_id` (follows the item). Allocation
//! calls this on every transition; retried and concurrently triggered moves
//! are absorbed by a short idempotency window instead of a lock.

use crate::domain::{AccountId, Item, ItemId, ItemPatch, LineageEdge, TransactionId, UserId};
use crate::infra::config::LineageConfig;
use crate::remote::{RemoteError, RemoteStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub struct LineageTracker {
	remote: Arc<dyn RemoteStore>,
	config: LineageConfig,
}

impl LineageTracker {
	pub fn new(remote: Arc<dyn RemoteStore>, config: LineageConfig) -> Self {
		Self { remote, config }
	}

	/// Record one movement of `item_id` between ledger endpoints (`None`
	/// means business inventory).
	///
	/// Returns `Ok(None)` without storing anything when the move is a no-op
	/// (`from == to`) or when the lineage table is not provisioned yet; a
	/// pending schema migration must never block inventory movement. A
	/// structurally identical edge recorded within the dedup window is
	/// returned as-is instead of being duplicated.
	#[instrument(skip(self, note, moved_by), fields(account = %account, item = %item_id))]
	pub async fn append_edge(
		&self,
		account: &AccountId,
		item_id: &ItemId,
		from: Option<TransactionId>,
		to: Option<TransactionId>,
		note: Option<String>,
		moved_by: Option<UserId>,
	) -> Result<Option<LineageEdge>, RemoteError> {
		if from == to {
			debug!("suppressing no-op movement");
			return Ok(None);
		}

		match self
			.remote
			.recent_lineage_edge(
				account,
				item_id,
				from.as_ref(),
				to.as_ref(),
				self.config.dedup_window(),
			)
			.await
		{
			Ok(Some(existing)) => {
				debug!(edge = %existing.id, "reusing recent identical edge");
				return Ok(Some(existing));
			}
			Ok(None) => {}
			Err(RemoteError::TableUnprovisioned(table)) => {
				warn!(table, "lineage not provisioned, movement not recorded");
				return Ok(None);
			}
			Err(e) => return Err(e),
		}

		let edge = LineageEdge {
			id: Uuid::new_v4(),
			account_id: account.clone(),
			item_id: item_id.clone(),
			from_transaction_id: from,
			to_transaction_id: to,
			note,
			moved_by,
			created_at: Utc::now(),
		};

		match self.remote.append_lineage_edge(edge).await {
			Ok(stored) => Ok(Some(stored)),
			Err(RemoteError::TableUnprovisioned(table)) => {
				warn!(table, "lineage not provisioned, movement not recorded");
				Ok(None)
			}
			Err(e) => Err(e),
		}
	}

	/// Maintain the lineage pointers on the item row.
	///
	/// `latest` is written unconditionally, including back to `None` when the
	/// item returns to inventory. `origin_candidate` only lands if the item
	/// has no origin yet; origin is immutable once set.
	pub async fn update_pointers(
		&self,
		account: &AccountId,
		item_id: &ItemId,
		latest: Option<TransactionId>,
		origin_candidate: Option<TransactionId>,
	) -> Result<Item, RemoteError> {
		let item = self
			.remote
			.fetch_item(account, item_id)
			.await?
			.ok_or_else(|| RemoteError::NotFound(format!("item {item_id}")))?;

		let mut patch = ItemPatch {
			latest_transaction_id: Some(latest),
			..Default::default()
		};
		if item.origin_transaction_id.is_none() {
			if let Some(origin) = origin_candidate {
				patch.origin_transaction_id = Some(Some(origin));
			}
		}

		self.remote.update_item(account, item_id, &patch).await
	}

	/// Full movement path of an item, oldest edge first.
	pub async fn history(
		&self,
		account: &AccountId,
		item_id: &ItemId,
	) -> Result<Vec<LineageEdge>, RemoteError> {
		self.remote.lineage_history(account, item_id).await
	}
}
