//! Ledger transactions and the canonical allocation/sale entries.
//!
//! Allocating inventory to a project books the item into a single synthetic
//! "purchase" transaction per project (`INV_PURCHASE_<project>`); selling
//! back out of a project books it into the matching `INV_SALE_<project>`.
//! Those two id prefixes are the only thing that marks an entry as canonical;
//! everything else in the row looks like a user-entered transaction.

use super::ids::{AccountId, ItemId, ProjectId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const PURCHASE_PREFIX: &str = "INV_PURCHASE_";
pub const SALE_PREFIX: &str = "INV_SALE_";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
	#[default]
	Pending,
	Completed,
	Canceled,
}

/// Who settles the money for a ledger entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReimbursementDirection {
	ClientOwesCompany,
	CompanyOwesClient,
	#[default]
	None,
}

/// One ledger entry, canonical or user-entered.
///
/// `amount` tracks the summed [`Item::ledger_price`](super::Item::ledger_price)
/// of the members in `item_ids`; the allocation engine keeps the two in step
/// and deletes canonical entries rather than leaving them empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerTransaction {
	pub id: TransactionId,
	pub account_id: AccountId,
	pub project_id: Option<ProjectId>,
	pub amount: Decimal,
	#[serde(default)]
	pub item_ids: Vec<ItemId>,
	#[serde(default)]
	pub status: TransactionStatus,
	#[serde(default)]
	pub reimbursement: ReimbursementDirection,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tax_rate: Option<Decimal>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub notes: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl LedgerTransaction {
	#[must_use]
	pub fn contains(&self, item: &ItemId) -> bool {
		self.item_ids.contains(item)
	}

	/// Add a member, keeping set semantics. Returns false when the item was
	/// already listed.
	pub fn insert_item(&mut self, item: ItemId) -> bool {
		if self.contains(&item) {
			return false;
		}
		self.item_ids.push(item);
		true
	}

	/// Drop a member. Returns false when the item was not listed.
	pub fn remove_item(&mut self, item: &ItemId) -> bool {
		let before = self.item_ids.len();
		self.item_ids.retain(|member| member != item);
		self.item_ids.len() != before
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.item_ids.is_empty()
	}
}

/// The two canonical entry families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
	Purchase,
	Sale,
}

impl LedgerKind {
	#[must_use]
	pub fn canonical_id(&self, project: &ProjectId) -> TransactionId {
		match self {
			Self::Purchase => purchase_id(project),
			Self::Sale => sale_id(project),
		}
	}

	/// A project purchase is owed by the client; a sale back to inventory is
	/// owed by the company.
	#[must_use]
	pub fn reimbursement(&self) -> ReimbursementDirection {
		match self {
			Self::Purchase => ReimbursementDirection::ClientOwesCompany,
			Self::Sale => ReimbursementDirection::CompanyOwesClient,
		}
	}
}

#[must_use]
pub fn purchase_id(project: &ProjectId) -> TransactionId {
	TransactionId::from(format!("{PURCHASE_PREFIX}{project}"))
}

#[must_use]
pub fn sale_id(project: &ProjectId) -> TransactionId {
	TransactionId::from(format!("{SALE_PREFIX}{project}"))
}

/// Where an item currently sits in the ledger, decoded once from its
/// `transaction_id` and matched on from there. Membership in a user-entered
/// transaction surfaces as [`LedgerLocation::Custom`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerLocation {
	Inventory,
	Purchase(ProjectId),
	Sale(ProjectId),
	Custom(TransactionId),
}

impl LedgerLocation {
	#[must_use]
	pub fn of(transaction_id: Option<&TransactionId>) -> Self {
		let Some(id) = transaction_id else {
			return Self::Inventory;
		};

		if let Some(project) = id.as_str().strip_prefix(PURCHASE_PREFIX) {
			Self::Purchase(ProjectId::from(project))
		} else if let Some(project) = id.as_str().strip_prefix(SALE_PREFIX) {
			Self::Sale(ProjectId::from(project))
		} else {
			Self::Custom(id.clone())
		}
	}

	/// The transaction id this location corresponds to, `None` for inventory.
	#[must_use]
	pub fn transaction_id(&self) -> Option<TransactionId> {
		match self {
			Self::Inventory => None,
			Self::Purchase(project) => Some(purchase_id(project)),
			Self::Sale(project) => Some(sale_id(project)),
			Self::Custom(id) => Some(id.clone()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn location_decodes_canonical_ids() {
		let purchase = TransactionId::from("INV_PURCHASE_proj_9");
		let sale = TransactionId::from("INV_SALE_proj_9");
		let custom = TransactionId::from("tx_handwritten");

		assert_eq!(LedgerLocation::of(None), LedgerLocation::Inventory);
		assert_eq!(
			LedgerLocation::of(Some(&purchase)),
			LedgerLocation::Purchase(ProjectId::from("proj_9"))
		);
		assert_eq!(
			LedgerLocation::of(Some(&sale)),
			LedgerLocation::Sale(ProjectId::from("proj_9"))
		);
		assert_eq!(
			LedgerLocation::of(Some(&custom)),
			LedgerLocation::Custom(custom.clone())
		);
	}

	#[test]
	fn location_round_trips_through_transaction_id() {
		let project = ProjectId::from("proj_2");

		for location in [
			LedgerLocation::Inventory,
			LedgerLocation::Purchase(project.clone()),
			LedgerLocation::Sale(project),
			LedgerLocation::Custom(TransactionId::from("tx_1")),
		] {
			assert_eq!(
				LedgerLocation::of(location.transaction_id().as_ref()),
				location
			);
		}
	}

	#[test]
	fn membership_keeps_set_semantics() {
		let mut tx = LedgerTransaction {
			id: purchase_id(&ProjectId::from("proj_1")),
			account_id: AccountId::from("acct_1"),
			project_id: Some(ProjectId::from("proj_1")),
			amount: Decimal::ZERO,
			item_ids: Vec::new(),
			status: TransactionStatus::default(),
			reimbursement: LedgerKind::Purchase.reimbursement(),
			tax_rate: None,
			notes: None,
			created_at: Utc::now(),
			updated_at: Utc::now(),
		};

		assert!(tx.insert_item(ItemId::from("item_1")));
		assert!(!tx.insert_item(ItemId::from("item_1")));
		assert_eq!(tx.item_ids.len(), 1);

		assert!(tx.remove_item(&ItemId::from("item_1")));
		assert!(!tx.remove_item(&ItemId::from("item_1")));
		assert!(tx.is_empty());
	}
}
