//! In-memory [`RemoteStore`] used by tests and local development.

use super::{LedgerWrite, RemoteError, RemoteStore};
use crate::domain::{
	AccountId, Item, ItemId, ItemPatch, LedgerTransaction, LineageEdge, ProjectId, TransactionId,
};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One item-affecting write, in the order the store received it.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRecord {
	Insert(Item),
	Update { item_id: ItemId, patch: ItemPatch },
	Delete(ItemId),
}

impl WriteRecord {
	pub fn item_id(&self) -> &ItemId {
		match self {
			Self::Insert(item) => &item.id,
			Self::Update { item_id, .. } | Self::Delete(item_id) => item_id,
		}
	}
}

#[derive(Default)]
struct State {
	items: HashMap<(AccountId, ItemId), Item>,
	transactions: HashMap<(AccountId, TransactionId), LedgerTransaction>,
	lineage: Vec<LineageEdge>,
	write_log: Vec<WriteRecord>,
	fail_next: u32,
	lineage_unprovisioned: bool,
}

impl State {
	fn consume_failure(&mut self) -> Result<(), RemoteError> {
		if self.fail_next > 0 {
			self.fail_next -= 1;
			return Err(RemoteError::Unavailable("injected failure".to_owned()));
		}
		Ok(())
	}
}

/// Reference backend holding everything in process memory.
///
/// Besides implementing the contract it keeps an ordered write log and two
/// failure hooks so delivery order, retries, and the unprovisioned-lineage
/// path can be exercised without a server.
#[derive(Default)]
pub struct MemoryRemoteStore {
	state: RwLock<State>,
}

impl MemoryRemoteStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make the next `n` writes fail with [`RemoteError::Unavailable`].
	pub async fn fail_next(&self, n: u32) {
		self.state.write().await.fail_next = n;
	}

	/// Toggle whether the lineage table exists for this store.
	pub async fn set_lineage_provisioned(&self, provisioned: bool) {
		self.state.write().await.lineage_unprovisioned = !provisioned;
	}

	pub async fn seed_item(&self, account: &AccountId, item: Item) {
		self.state
			.write()
			.await
			.items
			.insert((account.clone(), item.id.clone()), item);
	}

	pub async fn seed_transaction(&self, account: &AccountId, transaction: LedgerTransaction) {
		self.state
			.write()
			.await
			.transactions
			.insert((account.clone(), transaction.id.clone()), transaction);
	}

	/// Item-affecting writes in arrival order.
	pub async fn write_log(&self) -> Vec<WriteRecord> {
		self.state.read().await.write_log.clone()
	}

	pub async fn lineage_edges(&self) -> Vec<LineageEdge> {
		self.state.read().await.lineage.clone()
	}

	pub async fn transaction_count(&self, account: &AccountId) -> usize {
		self.state
			.read()
			.await
			.transactions
			.keys()
			.filter(|(acct, _)| acct == account)
			.count()
	}
}

#[async_trait::async_trait]
impl RemoteStore for MemoryRemoteStore {
	async fn fetch_item(
		&self,
		account: &AccountId,
		item_id: &ItemId,
	) -> Result<Option<Item>, RemoteError> {
		let state = self.state.read().await;
		Ok(state.items.get(&(account.clone(), item_id.clone())).cloned())
	}

	async fn items_for_project(
		&self,
		account: &AccountId,
		project: &ProjectId,
	) -> Result<Vec<Item>, RemoteError> {
		let state = self.state.read().await;
		let mut items: Vec<Item> = state
			.items
			.iter()
			.filter(|((acct, _), item)| acct == account && item.project_id.as_ref() == Some(project))
			.map(|(_, item)| item.clone())
			.collect();
		items.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(items)
	}

	async fn insert_item(&self, account: &AccountId, mut item: Item) -> Result<Item, RemoteError> {
		let mut state = self.state.write().await;
		state.consume_failure()?;

		if item.version == 0 {
			item.version = 1;
		}
		state.write_log.push(WriteRecord::Insert(item.clone()));
		state
			.items
			.insert((account.clone(), item.id.clone()), item.clone());
		Ok(item)
	}

	async fn update_item(
		&self,
		account: &AccountId,
		item_id: &ItemId,
		patch: &ItemPatch,
	) -> Result<Item, RemoteError> {
		let mut state = self.state.write().await;
		state.consume_failure()?;

		let key = (account.clone(), item_id.clone());
		let item = state
			.items
			.get_mut(&key)
			.ok_or_else(|| RemoteError::NotFound(format!("item {item_id}")))?;

		patch.apply_to(item);
		item.version += 1;
		let updated = item.clone();

		state.write_log.push(WriteRecord::Update {
			item_id: item_id.clone(),
			patch: patch.clone(),
		});
		Ok(updated)
	}

	async fn delete_item(&self, account: &AccountId, item_id: &ItemId) -> Result<(), RemoteError> {
		let mut state = self.state.write().await;
		state.consume_failure()?;

		state
			.items
			.remove(&(account.clone(), item_id.clone()))
			.ok_or_else(|| RemoteError::NotFound(format!("item {item_id}")))?;
		state.write_log.push(WriteRecord::Delete(item_id.clone()));
		Ok(())
	}

	async fn fetch_transaction(
		&self,
		account: &AccountId,
		transaction_id: &TransactionId,
	) -> Result<Option<LedgerTransaction>, RemoteError> {
		let state = self.state.read().await;
		Ok(state
			.transactions
			.get(&(account.clone(), transaction_id.clone()))
			.cloned())
	}

	async fn execute(
		&self,
		account: &AccountId,
		writes: Vec<LedgerWrite>,
	) -> Result<(), RemoteError> {
		let mut state = self.state.write().await;
		state.consume_failure()?;

		// Validate before mutating so the batch stays all-or-nothing.
		for write in &writes {
			if let LedgerWrite::UpdateItem { item_id, .. } = write {
				if !state.items.contains_key(&(account.clone(), item_id.clone())) {
					return Err(RemoteError::NotFound(format!("item {item_id}")));
				}
			}
		}

		for write in writes {
			match write {
				LedgerWrite::UpsertTransaction(transaction) => {
					state
						.transactions
						.insert((account.clone(), transaction.id.clone()), transaction);
				}
				LedgerWrite::DeleteTransaction(transaction_id) => {
					state
						.transactions
						.remove(&(account.clone(), transaction_id.clone()));
				}
				LedgerWrite::UpdateItem { item_id, patch } => {
					let key = (account.clone(), item_id.clone());
					if let Some(item) = state.items.get_mut(&key) {
						patch.apply_to(item);
						item.version += 1;
					}
					state.write_log.push(WriteRecord::Update { item_id, patch });
				}
			}
		}
		Ok(())
	}

	async fn append_lineage_edge(&self, edge: LineageEdge) -> Result<LineageEdge, RemoteError> {
		let mut state = self.state.write().await;
		state.consume_failure()?;

		if state.lineage_unprovisioned {
			return Err(RemoteError::TableUnprovisioned("movement_lineage"));
		}
		state.lineage.push(edge.clone());
		Ok(edge)
	}

	async fn recent_lineage_edge(
		&self,
		account: &AccountId,
		item_id: &ItemId,
		from: Option<&TransactionId>,
		to: Option<&TransactionId>,
		window: chrono::Duration,
	) -> Result<Option<LineageEdge>, RemoteError> {
		let state = self.state.read().await;
		if state.lineage_unprovisioned {
			return Err(RemoteError::TableUnprovisioned("movement_lineage"));
		}

		let cutoff = Utc::now() - window;
		Ok(state
			.lineage
			.iter()
			.rev()
			.find(|edge| {
				edge.account_id == *account
					&& edge.item_id == *item_id
					&& edge.from_transaction_id.as_ref() == from
					&& edge.to_transaction_id.as_ref() == to
					&& edge.created_at >= cutoff
			})
			.cloned())
	}

	async fn lineage_history(
		&self,
		account: &AccountId,
		item_id: &ItemId,
	) -> Result<Vec<LineageEdge>, RemoteError> {
		let state = self.state.read().await;
		if state.lineage_unprovisioned {
			return Err(RemoteError::TableUnprovisioned("movement_lineage"));
		}

		Ok(state
			.lineage
			.iter()
			.filter(|edge| edge.account_id == *account && edge.item_id == *item_id)
			.cloned()
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn account() -> AccountId {
		AccountId::from("acct_1")
	}

	#[tokio::test]
	async fn update_bumps_version_and_logs_write() {
		let store = MemoryRemoteStore::new();
		store.seed_item(&account(), Item::new("acct_1", "item_1")).await;

		let patch = ItemPatch {
			notes: Some(Some("brass sconce".to_owned())),
			..Default::default()
		};
		let updated = store
			.update_item(&account(), &ItemId::from("item_1"), &patch)
			.await
			.unwrap();

		assert_eq!(updated.version, 1);
		assert_eq!(updated.notes.as_deref(), Some("brass sconce"));

		let log = store.write_log().await;
		assert_eq!(log.len(), 1);
		assert_eq!(log[0].item_id(), &ItemId::from("item_1"));
	}

	#[tokio::test]
	async fn injected_failures_consume_in_order() {
		let store = MemoryRemoteStore::new();
		store.fail_next(1).await;

		let err = store
			.insert_item(&account(), Item::new("acct_1", "item_1"))
			.await
			.unwrap_err();
		assert!(matches!(err, RemoteError::Unavailable(_)));

		// Next write goes through.
		store
			.insert_item(&account(), Item::new("acct_1", "item_1"))
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn execute_rejects_batch_with_missing_item() {
		let store = MemoryRemoteStore::new();
		let writes = vec![LedgerWrite::UpdateItem {
			item_id: ItemId::from("item_missing"),
			patch: ItemPatch::default(),
		}];

		let err = store.execute(&account(), writes).await.unwrap_err();
		assert!(matches!(err, RemoteError::NotFound(_)));
		assert_eq!(store.transaction_count(&account()).await, 0);
	}

	#[tokio::test]
	async fn unprovisioned_lineage_errors() {
		let store = MemoryRemoteStore::new();
		store.set_lineage_provisioned(false).await;

		let edge = LineageEdge {
			id: uuid::Uuid::new_v4(),
			account_id: account(),
			item_id: ItemId::from("item_1"),
			from_transaction_id: None,
			to_transaction_id: Some(TransactionId::from("INV_PURCHASE_proj_1")),
			note: None,
			moved_by: None,
			created_at: Utc::now(),
		};
		let err = store.append_lineage_edge(edge).await.unwrap_err();
		assert!(matches!(err, RemoteError::TableUnprovisioned(_)));
	}
}
