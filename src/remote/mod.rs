//! Remote collaborator seams.
//!
//! The queue and the allocation engine never talk to a concrete backend;
//! they go through these traits so the sync layer can be exercised without a
//! server and so the backend can be swapped without touching queue logic.

use crate::domain::{
	AccountId, Item, ItemId, ItemPatch, LedgerTransaction, LineageEdge, ProjectId, TransactionId,
};
use thiserror::Error;

pub mod identity;
pub mod memory;
pub mod transport;

pub use identity::{Identity, IdentityProvider, SessionStatus, StaticIdentity};
pub use memory::MemoryRemoteStore;
pub use transport::{ManualTransport, SyncTransport, WakeRegistration};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
	#[error("remote unavailable: {0}")]
	Unavailable(String),
	#[error("not found: {0}")]
	NotFound(String),
	#[error("table not provisioned: {0}")]
	TableUnprovisioned(&'static str),
	#[error("conflicting write: {0}")]
	Conflict(String),
	#[error("serialization failed: {0}")]
	Serialization(String),
}

/// One mutation inside an atomic ledger batch.
///
/// The allocation engine folds an item move into a handful of these and
/// hands them to [`RemoteStore::execute`] so the ledger row, the canonical
/// transaction, and the item pointers change together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerWrite {
	UpsertTransaction(LedgerTransaction),
	DeleteTransaction(TransactionId),
	UpdateItem { item_id: ItemId, patch: ItemPatch },
}

/// Server-side store of items, ledger transactions, and lineage edges.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
	async fn fetch_item(
		&self,
		account: &AccountId,
		item_id: &ItemId,
	) -> Result<Option<Item>, RemoteError>;

	async fn items_for_project(
		&self,
		account: &AccountId,
		project: &ProjectId,
	) -> Result<Vec<Item>, RemoteError>;

	async fn insert_item(&self, account: &AccountId, item: Item) -> Result<Item, RemoteError>;

	/// Apply a patch to an existing item, bumping its version.
	async fn update_item(
		&self,
		account: &AccountId,
		item_id: &ItemId,
		patch: &ItemPatch,
	) -> Result<Item, RemoteError>;

	async fn delete_item(&self, account: &AccountId, item_id: &ItemId) -> Result<(), RemoteError>;

	async fn fetch_transaction(
		&self,
		account: &AccountId,
		transaction_id: &TransactionId,
	) -> Result<Option<LedgerTransaction>, RemoteError>;

	/// Apply a batch of ledger writes atomically, in order.
	async fn execute(
		&self,
		account: &AccountId,
		writes: Vec<LedgerWrite>,
	) -> Result<(), RemoteError>;

	/// Record a movement edge. Fails with [`RemoteError::TableUnprovisioned`]
	/// while the lineage schema migration has not reached this account.
	async fn append_lineage_edge(&self, edge: LineageEdge) -> Result<LineageEdge, RemoteError>;

	/// Most recent edge for `item` matching `from -> to` within `window` of
	/// now, if any. `None` endpoints mean business inventory.
	async fn recent_lineage_edge(
		&self,
		account: &AccountId,
		item_id: &ItemId,
		from: Option<&TransactionId>,
		to: Option<&TransactionId>,
		window: chrono::Duration,
	) -> Result<Option<LineageEdge>, RemoteError>;

	/// Full movement history for an item, oldest first.
	async fn lineage_history(
		&self,
		account: &AccountId,
		item_id: &ItemId,
	) -> Result<Vec<LineageEdge>, RemoteError>;
}
