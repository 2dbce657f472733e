//! Queued write operations.

use super::ids::{AccountId, ItemId, OperationId, ProjectId, UserId};
use super::item::{Item, ItemPatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a queued operation does once it reaches the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, strum::AsRefStr)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationPayload {
	CreateItem { item: Item },
	UpdateItem { item_id: ItemId, patch: ItemPatch },
	DeleteItem { item_id: ItemId },
}

impl OperationPayload {
	/// The item this operation writes to.
	#[must_use]
	pub fn target_item(&self) -> &ItemId {
		match self {
			Self::CreateItem { item } => &item.id,
			Self::UpdateItem { item_id, .. } | Self::DeleteItem { item_id } => item_id,
		}
	}

	/// Project scope derivable from the payload alone, without a remote
	/// round trip. `None` means the scope has to be resolved from the item.
	#[must_use]
	pub fn project_hint(&self) -> Option<&ProjectId> {
		match self {
			Self::CreateItem { item } => item.project_id.as_ref(),
			Self::UpdateItem { patch, .. } => {
				patch.project_id.as_ref().and_then(|project| project.as_ref())
			}
			Self::DeleteItem { .. } => None,
		}
	}

	/// Account scope carried by the payload itself.
	#[must_use]
	pub fn account_hint(&self) -> Option<&AccountId> {
		match self {
			Self::CreateItem { item } => Some(&item.account_id),
			_ => None,
		}
	}

	#[must_use]
	pub fn is_create(&self) -> bool {
		matches!(self, Self::CreateItem { .. })
	}
}

/// A durable queued write plus its delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
	pub id: OperationId,
	pub account_id: AccountId,
	/// Who enqueued the write. Re-validated against the live identity right
	/// before delivery.
	pub user_id: UserId,
	/// Per-account sequence assigned at enqueue time, monotonic across
	/// restarts.
	pub version: u64,
	pub payload: OperationPayload,
	#[serde(default)]
	pub retry_count: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_error: Option<String>,
	pub enqueued_at: DateTime<Utc>,
}

/// Enqueue request: a payload plus an optional explicit account scope.
#[derive(Debug, Clone)]
pub struct NewOperation {
	pub payload: OperationPayload,
	pub account_override: Option<AccountId>,
}

impl NewOperation {
	#[must_use]
	pub fn new(payload: OperationPayload) -> Self {
		Self {
			payload,
			account_override: None,
		}
	}

	#[must_use]
	pub fn for_account(payload: OperationPayload, account: AccountId) -> Self {
		Self {
			payload,
			account_override: Some(account),
		}
	}
}

impl From<OperationPayload> for NewOperation {
	fn from(payload: OperationPayload) -> Self {
		Self::new(payload)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::ProjectId;

	#[test]
	fn project_hint_reads_through_the_patch() {
		let payload = OperationPayload::UpdateItem {
			item_id: ItemId::from("item_1"),
			patch: ItemPatch {
				project_id: Some(Some(ProjectId::from("proj_1"))),
				..Default::default()
			},
		};
		assert_eq!(payload.project_hint(), Some(&ProjectId::from("proj_1")));

		let clearing = OperationPayload::UpdateItem {
			item_id: ItemId::from("item_1"),
			patch: ItemPatch {
				project_id: Some(None),
				..Default::default()
			},
		};
		assert_eq!(clearing.project_hint(), None);
	}

	#[test]
	fn payload_labels_are_stable() {
		let payload = OperationPayload::DeleteItem {
			item_id: ItemId::from("item_1"),
		};
		assert_eq!(payload.as_ref(), "delete_item");
	}
}
