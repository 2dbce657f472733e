//! Inventory items and the patch type queued updates carry.

use super::ids::{AccountId, ItemId, ProjectId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What the business intends to do with an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
	Keep,
	#[default]
	Inventory,
	ToSell,
	Sold,
}

/// Whether an item can currently be allocated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
	#[default]
	Available,
	Allocated,
	Sold,
}

/// A tracked piece of inventory.
///
/// `transaction_id` points at the ledger entry the item is currently a member
/// of; `None` means the item sits in business inventory. The pair of lineage
/// pointers (`origin_transaction_id`, `latest_transaction_id`) is maintained
/// by [`crate::lineage::LineageTracker`]: origin is written once, latest
/// follows every move.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
	pub id: ItemId,
	pub account_id: AccountId,
	pub project_id: Option<ProjectId>,
	pub transaction_id: Option<TransactionId>,
	pub purchase_price: Option<Decimal>,
	pub project_price: Option<Decimal>,
	pub market_value: Option<Decimal>,
	#[serde(default)]
	pub disposition: Disposition,
	#[serde(default)]
	pub inventory_status: InventoryStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub origin_transaction_id: Option<TransactionId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub latest_transaction_id: Option<TransactionId>,
	/// Bumped by the remote store on every confirmed write. Divergence
	/// between a cached copy and the remote row is how conflicts are found.
	#[serde(default)]
	pub version: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sku: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub notes: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub images: Vec<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Item {
	/// Fresh unallocated item in business inventory.
	pub fn new(account_id: impl Into<AccountId>, id: impl Into<ItemId>) -> Self {
		let now = Utc::now();

		Self {
			id: id.into(),
			account_id: account_id.into(),
			project_id: None,
			transaction_id: None,
			purchase_price: None,
			project_price: None,
			market_value: None,
			disposition: Disposition::default(),
			inventory_status: InventoryStatus::default(),
			origin_transaction_id: None,
			latest_transaction_id: None,
			version: 0,
			sku: None,
			notes: None,
			images: Vec::new(),
			created_at: now,
			updated_at: now,
		}
	}

	/// The price an item contributes to ledger entry amounts: the price
	/// charged to the project when set, otherwise what the business paid.
	#[must_use]
	pub fn ledger_price(&self) -> Decimal {
		self.project_price
			.or(self.purchase_price)
			.unwrap_or_default()
	}
}

/// Partial update applied to an item.
///
/// Nullable fields use a double `Option`: `None` leaves the field untouched,
/// `Some(None)` clears it, `Some(Some(v))` sets it. The `double_option`
/// codec keeps the two outer states apart across encode/decode, so a queued
/// "clear" still clears after a restart. `version` is deliberately absent;
/// only the remote store advances it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemPatch {
	#[serde(
		default,
		with = "serde_with::rust::double_option",
		skip_serializing_if = "Option::is_none"
	)]
	pub project_id: Option<Option<ProjectId>>,
	#[serde(
		default,
		with = "serde_with::rust::double_option",
		skip_serializing_if = "Option::is_none"
	)]
	pub transaction_id: Option<Option<TransactionId>>,
	#[serde(
		default,
		with = "serde_with::rust::double_option",
		skip_serializing_if = "Option::is_none"
	)]
	pub purchase_price: Option<Option<Decimal>>,
	#[serde(
		default,
		with = "serde_with::rust::double_option",
		skip_serializing_if = "Option::is_none"
	)]
	pub project_price: Option<Option<Decimal>>,
	#[serde(
		default,
		with = "serde_with::rust::double_option",
		skip_serializing_if = "Option::is_none"
	)]
	pub market_value: Option<Option<Decimal>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub disposition: Option<Disposition>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub inventory_status: Option<InventoryStatus>,
	#[serde(
		default,
		with = "serde_with::rust::double_option",
		skip_serializing_if = "Option::is_none"
	)]
	pub origin_transaction_id: Option<Option<TransactionId>>,
	#[serde(
		default,
		with = "serde_with::rust::double_option",
		skip_serializing_if = "Option::is_none"
	)]
	pub latest_transaction_id: Option<Option<TransactionId>>,
	#[serde(
		default,
		with = "serde_with::rust::double_option",
		skip_serializing_if = "Option::is_none"
	)]
	pub sku: Option<Option<String>>,
	#[serde(
		default,
		with = "serde_with::rust::double_option",
		skip_serializing_if = "Option::is_none"
	)]
	pub notes: Option<Option<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub images: Option<Vec<String>>,
}

impl ItemPatch {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		*self == Self::default()
	}

	/// Merge the patch into `item`, refreshing `updated_at`.
	pub fn apply_to(&self, item: &mut Item) {
		if let Some(project_id) = &self.project_id {
			item.project_id = project_id.clone();
		}
		if let Some(transaction_id) = &self.transaction_id {
			item.transaction_id = transaction_id.clone();
		}
		if let Some(purchase_price) = &self.purchase_price {
			item.purchase_price = *purchase_price;
		}
		if let Some(project_price) = &self.project_price {
			item.project_price = *project_price;
		}
		if let Some(market_value) = &self.market_value {
			item.market_value = *market_value;
		}
		if let Some(disposition) = self.disposition {
			item.disposition = disposition;
		}
		if let Some(inventory_status) = self.inventory_status {
			item.inventory_status = inventory_status;
		}
		if let Some(origin) = &self.origin_transaction_id {
			item.origin_transaction_id = origin.clone();
		}
		if let Some(latest) = &self.latest_transaction_id {
			item.latest_transaction_id = latest.clone();
		}
		if let Some(sku) = &self.sku {
			item.sku = sku.clone();
		}
		if let Some(notes) = &self.notes {
			item.notes = notes.clone();
		}
		if let Some(images) = &self.images {
			item.images = images.clone();
		}
		item.updated_at = Utc::now();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use rust_decimal::Decimal;

	#[test]
	fn ledger_price_prefers_project_price() {
		let mut item = Item::new("acct_1", "item_1");
		assert_eq!(item.ledger_price(), Decimal::ZERO);

		item.purchase_price = Some(Decimal::new(125_00, 2));
		assert_eq!(item.ledger_price(), Decimal::new(125_00, 2));

		item.project_price = Some(Decimal::new(180_00, 2));
		assert_eq!(item.ledger_price(), Decimal::new(180_00, 2));
	}

	#[test]
	fn patch_distinguishes_clear_from_untouched() {
		let mut item = Item::new("acct_1", "item_1");
		item.project_id = Some(ProjectId::from("proj_1"));
		item.notes = Some("walnut console".to_owned());

		let patch = ItemPatch {
			project_id: Some(None),
			..Default::default()
		};
		patch.apply_to(&mut item);

		assert_eq!(item.project_id, None);
		assert_eq!(item.notes.as_deref(), Some("walnut console"));
	}

	#[test]
	fn patch_json_omits_untouched_fields() {
		let patch = ItemPatch {
			project_id: Some(Some(ProjectId::from("proj_2"))),
			notes: Some(None),
			..Default::default()
		};

		let json = serde_json::to_value(&patch).expect("serialize");
		assert_eq!(
			json,
			serde_json::json!({ "project_id": "proj_2", "notes": null })
		);
	}

	// The durable queue round-trips patches through MessagePack; a clear must
	// come back as a clear, not as untouched.
	#[test]
	fn patch_clear_survives_messagepack() {
		let patch = ItemPatch {
			project_id: Some(Some(ProjectId::from("proj_1"))),
			notes: Some(None),
			..Default::default()
		};

		let raw = rmp_serde::to_vec_named(&patch).expect("encode");
		let decoded: ItemPatch = rmp_serde::from_slice(&raw).expect("decode");
		assert_eq!(decoded, patch);
	}
}
