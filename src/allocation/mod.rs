//! Moving inventory between the business and project ledgers.
//!
//! An item's place in the ledger is fully determined by its `transaction_id`
//! prefix, so every action here is a transition over [`LedgerLocation`]:
//! allocating books the item into the project's canonical purchase entry,
//! allocating again toggles it back out, selling out of a project books it
//! into the matching sale entry. Each transition issues one write batch
//! pairing the ledger rows with the item row, then records lineage and audit
//! as a best-effort tail.

use crate::audit::{record_best_effort, AuditEvent, AuditKind, AuditSink};
use crate::domain::{
	purchase_id, sale_id, AccountId, Disposition, InventoryStatus, Item, ItemId, ItemPatch,
	LedgerKind, LedgerLocation, ProjectId, TransactionId, UserId,
};
use crate::lineage::LineageTracker;
use crate::remote::{LedgerWrite, RemoteError, RemoteStore};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

mod ledger_ops;

#[derive(Debug, Error)]
pub enum AllocationError {
	#[error("item {0} not found")]
	ItemNotFound(ItemId),
	#[error(transparent)]
	Remote(#[from] RemoteError),
}

/// One resolved transition: which entry the item leaves, which canonical
/// entry it joins, and how the item row changes.
struct Move {
	removal: Option<TransactionId>,
	merge: Option<(LedgerKind, ProjectId)>,
	patch: ItemPatch,
	to_tx: Option<TransactionId>,
	kind: AuditKind,
}

pub struct AllocationEngine {
	remote: Arc<dyn RemoteStore>,
	lineage: Arc<LineageTracker>,
	audit: Arc<dyn AuditSink>,
}

impl AllocationEngine {
	pub fn new(
		remote: Arc<dyn RemoteStore>,
		lineage: Arc<LineageTracker>,
		audit: Arc<dyn AuditSink>,
	) -> Self {
		Self {
			remote,
			lineage,
			audit,
		}
	}

	/// Allocate an item to `target`.
	///
	/// Allocating an item that is already in the target project's purchase
	/// entry toggles it back to business inventory instead. An item sitting
	/// in a user-entered transaction is taken out of it as part of the same
	/// batch, so ledger membership always matches `transaction_id`.
	#[instrument(skip(self, actor), fields(account = %account, item = %item_id, project = %target))]
	pub async fn allocate_to(
		&self,
		account: &AccountId,
		item_id: &ItemId,
		target: &ProjectId,
		actor: Option<&UserId>,
	) -> Result<Item, AllocationError> {
		let item = self.fetch(account, item_id).await?;
		let from_tx = item.transaction_id.clone();

		let mv = match LedgerLocation::of(from_tx.as_ref()) {
			// Sold to this very project: pull it back in, no new purchase.
			LedgerLocation::Sale(project) if &project == target => Move {
				removal: Some(sale_id(&project)),
				merge: None,
				patch: ItemPatch {
					project_id: Some(Some(target.clone())),
					transaction_id: Some(None),
					inventory_status: Some(InventoryStatus::Allocated),
					..Default::default()
				},
				to_tx: None,
				kind: AuditKind::Allocation,
			},
			LedgerLocation::Sale(project) => Move {
				removal: Some(sale_id(&project)),
				merge: Some((LedgerKind::Purchase, target.clone())),
				patch: ItemPatch {
					project_id: Some(Some(target.clone())),
					transaction_id: Some(Some(purchase_id(target))),
					inventory_status: Some(InventoryStatus::Allocated),
					..Default::default()
				},
				to_tx: Some(purchase_id(target)),
				kind: AuditKind::Allocation,
			},
			// Second allocation to the same project toggles the item out.
			LedgerLocation::Purchase(project) if &project == target => Move {
				removal: Some(purchase_id(&project)),
				merge: None,
				patch: ItemPatch {
					project_id: Some(None),
					transaction_id: Some(None),
					inventory_status: Some(InventoryStatus::Available),
					disposition: Some(Disposition::Inventory),
					..Default::default()
				},
				to_tx: None,
				kind: AuditKind::Deallocation,
			},
			// Bought for another project: moving it here books a sale back
			// to the business, not a second purchase.
			LedgerLocation::Purchase(project) => Move {
				removal: Some(purchase_id(&project)),
				merge: Some((LedgerKind::Sale, target.clone())),
				patch: ItemPatch {
					project_id: Some(None),
					transaction_id: Some(Some(sale_id(target))),
					inventory_status: Some(InventoryStatus::Available),
					..Default::default()
				},
				to_tx: Some(sale_id(target)),
				kind: AuditKind::Return,
			},
			location => Move {
				// Custom membership is unwound in the same batch; plain
				// inventory has nothing to leave.
				removal: location.transaction_id(),
				merge: Some((LedgerKind::Purchase, target.clone())),
				patch: ItemPatch {
					project_id: Some(Some(target.clone())),
					transaction_id: Some(Some(purchase_id(target))),
					inventory_status: Some(InventoryStatus::Allocated),
					..Default::default()
				},
				to_tx: Some(purchase_id(target)),
				kind: AuditKind::Allocation,
			},
		};

		self.apply(account, &item, from_tx, mv, actor).await
	}

	/// Allocate several items to one project, merging every purchase-bound
	/// move into the project's single canonical entry.
	///
	/// Items are processed in order; a missing item aborts the remainder and
	/// the moves already applied stand.
	pub async fn allocate_many(
		&self,
		account: &AccountId,
		item_ids: &[ItemId],
		target: &ProjectId,
		actor: Option<&UserId>,
	) -> Result<Vec<Item>, AllocationError> {
		let mut moved = Vec::with_capacity(item_ids.len());
		for item_id in item_ids {
			moved.push(self.allocate_to(account, item_id, target, actor).await?);
		}
		Ok(moved)
	}

	/// Return an item out of `project`.
	///
	/// If the item is in the project's purchase entry the purchase is simply
	/// undone. Anything else is a new return: the item is booked into the
	/// project's sale entry and goes back to being available.
	#[instrument(skip(self, actor), fields(account = %account, item = %item_id, project = %project))]
	pub async fn return_from(
		&self,
		account: &AccountId,
		item_id: &ItemId,
		project: &ProjectId,
		actor: Option<&UserId>,
	) -> Result<Item, AllocationError> {
		let item = self.fetch(account, item_id).await?;
		let from_tx = item.transaction_id.clone();

		let mv = match LedgerLocation::of(from_tx.as_ref()) {
			LedgerLocation::Purchase(p) if &p == project => Move {
				removal: Some(purchase_id(&p)),
				merge: None,
				patch: ItemPatch {
					project_id: Some(None),
					transaction_id: Some(None),
					inventory_status: Some(InventoryStatus::Available),
					..Default::default()
				},
				to_tx: None,
				kind: AuditKind::Return,
			},
			_ => {
				let target = sale_id(project);
				Move {
					removal: from_tx.clone().filter(|tx| tx != &target),
					merge: Some((LedgerKind::Sale, project.clone())),
					patch: ItemPatch {
						project_id: Some(None),
						transaction_id: Some(Some(target.clone())),
						inventory_status: Some(InventoryStatus::Available),
						..Default::default()
					},
					to_tx: Some(target),
					kind: AuditKind::Return,
				}
			}
		};

		self.apply(account, &item, from_tx, mv, actor).await
	}

	/// Hand an item over to business inventory.
	///
	/// An item the business bought for `from_project` reverts the purchase
	/// outright; a purchase and a sale for the same item/project pair must
	/// never coexist. Any other item gets a sale entry recording the handover
	/// and keeps that membership while sitting in inventory.
	#[instrument(skip(self, actor), fields(account = %account, item = %item_id, project = %from_project))]
	pub async fn designate_as_inventory(
		&self,
		account: &AccountId,
		item_id: &ItemId,
		from_project: &ProjectId,
		actor: Option<&UserId>,
	) -> Result<Item, AllocationError> {
		let item = self.fetch(account, item_id).await?;
		let from_tx = item.transaction_id.clone();

		let mv = match LedgerLocation::of(from_tx.as_ref()) {
			LedgerLocation::Purchase(p) if &p == from_project => Move {
				removal: Some(purchase_id(&p)),
				merge: None,
				patch: ItemPatch {
					project_id: Some(None),
					transaction_id: Some(None),
					inventory_status: Some(InventoryStatus::Available),
					disposition: Some(Disposition::Inventory),
					..Default::default()
				},
				to_tx: None,
				kind: AuditKind::Deallocation,
			},
			_ => {
				let target = sale_id(from_project);
				Move {
					removal: from_tx.clone().filter(|tx| tx != &target),
					merge: Some((LedgerKind::Sale, from_project.clone())),
					patch: ItemPatch {
						project_id: Some(None),
						transaction_id: Some(Some(target.clone())),
						inventory_status: Some(InventoryStatus::Available),
						disposition: Some(Disposition::Inventory),
						..Default::default()
					},
					to_tx: Some(target),
					kind: AuditKind::Deallocation,
				}
			}
		};

		self.apply(account, &item, from_tx, mv, actor).await
	}

	async fn fetch(&self, account: &AccountId, item_id: &ItemId) -> Result<Item, AllocationError> {
		self.remote
			.fetch_item(account, item_id)
			.await?
			.ok_or_else(|| AllocationError::ItemNotFound(item_id.clone()))
	}

	/// Build the write batch for a resolved move, submit it, then run the
	/// best-effort tail (lineage edge, lineage pointers, audit event). Only
	/// the batch itself can fail the transition.
	async fn apply(
		&self,
		account: &AccountId,
		item: &Item,
		from_tx: Option<TransactionId>,
		mv: Move,
		actor: Option<&UserId>,
	) -> Result<Item, AllocationError> {
		let Move {
			removal,
			merge,
			patch,
			to_tx,
			kind,
		} = mv;

		let mut writes = Vec::with_capacity(3);
		if let Some(leaving) = &removal {
			if let Some(write) =
				ledger_ops::removal_write(self.remote.as_ref(), account, leaving, &item.id).await?
			{
				writes.push(write);
			}
		}
		if let Some((ledger_kind, project)) = &merge {
			let merged = ledger_ops::merged_transaction(
				self.remote.as_ref(),
				account,
				*ledger_kind,
				project,
				item,
			)
			.await?;
			writes.push(LedgerWrite::UpsertTransaction(merged));
		}
		writes.push(LedgerWrite::UpdateItem {
			item_id: item.id.clone(),
			patch,
		});

		debug!(
			kind = kind.as_ref(),
			writes = writes.len(),
			"applying ledger transition"
		);
		self.remote.execute(account, writes).await?;

		if let Err(e) = self
			.lineage
			.append_edge(
				account,
				&item.id,
				from_tx.clone(),
				to_tx.clone(),
				None,
				actor.cloned(),
			)
			.await
		{
			warn!(item = %item.id, "movement applied without lineage edge: {e}");
		}
		if let Err(e) = self
			.lineage
			.update_pointers(account, &item.id, to_tx.clone(), to_tx.clone())
			.await
		{
			warn!(item = %item.id, "lineage pointers left stale: {e}");
		}

		record_best_effort(
			self.audit.as_ref(),
			AuditEvent::new(account.clone(), kind)
				.with_user(actor.cloned())
				.with_item(item.id.clone())
				.with_detail(serde_json::json!({
					"from_transaction_id": from_tx,
					"to_transaction_id": to_tx,
				})),
		)
		.await;

		self.fetch(account, &item.id).await
	}
}
