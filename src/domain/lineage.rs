//! Movement lineage edges.

use super::ids::{AccountId, ItemId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One hop of an item between ledger locations. Immutable once written;
/// `None` on either end means business inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineageEdge {
	pub id: Uuid,
	pub account_id: AccountId,
	pub item_id: ItemId,
	pub from_transaction_id: Option<TransactionId>,
	pub to_transaction_id: Option<TransactionId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub note: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub moved_by: Option<UserId>,
	pub created_at: DateTime<Utc>,
}

impl LineageEdge {
	/// Structural identity used for the short-window idempotency check:
	/// same item moving between the same two endpoints.
	#[must_use]
	pub fn same_movement(&self, other: &Self) -> bool {
		self.account_id == other.account_id
			&& self.item_id == other.item_id
			&& self.from_transaction_id == other.from_transaction_id
			&& self.to_transaction_id == other.to_transaction_id
	}
}
