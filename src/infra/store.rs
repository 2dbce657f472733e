//! Durable local persistence for the offline queue and snapshot cache.
//!
//! One redb database holds three tables: per-account operation logs written
//! with replace-all semantics, cached item snapshots keyed by
//! `(account, item)`, and a small meta table for sequence counters plus the
//! pre-tenancy queue blob older builds left behind.

use crate::domain::{AccountId, Item, ItemId, Operation};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const OPERATIONS_TABLE: TableDefinition<'_, &'_ str, Vec<u8>> = TableDefinition::new("operations");
const ITEMS_TABLE: TableDefinition<'_, (&'_ str, &'_ str), Vec<u8>> =
	TableDefinition::new("item_snapshots");
const META_TABLE: TableDefinition<'_, &'_ str, Vec<u8>> = TableDefinition::new("meta");

const LEGACY_QUEUE_KEY: &str = "legacy_queue";
const OP_SEQ_PREFIX: &str = "op_seq/";

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("database error: {0}")]
	Database(#[from] redb::DatabaseError),
	#[error("transaction error: {0}")]
	Transaction(#[from] redb::TransactionError),
	#[error("table error: {0}")]
	Table(#[from] redb::TableError),
	#[error("storage error: {0}")]
	Storage(#[from] redb::StorageError),
	#[error("commit error: {0}")]
	Commit(#[from] redb::CommitError),
	#[error("encode error: {0}")]
	Encode(#[from] rmp_serde::encode::Error),
	#[error("decode error: {0}")]
	Decode(#[from] rmp_serde::decode::Error),
}

pub struct DurableStore {
	db: Database,
}

impl DurableStore {
	/// Open (or create) the database at `path` and make sure all tables
	/// exist, so later reads never race table creation.
	pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
		let db = Database::create(path)?;

		let txn = db.begin_write()?;
		{
			txn.open_table(OPERATIONS_TABLE)?;
			txn.open_table(ITEMS_TABLE)?;
			txn.open_table(META_TABLE)?;
		}
		txn.commit()?;

		Ok(Self { db })
	}

	/// The persisted operation log for `account`, oldest first.
	pub fn load_operations(&self, account: &AccountId) -> Result<Vec<Operation>, StoreError> {
		let txn = self.db.begin_read()?;
		let table = txn.open_table(OPERATIONS_TABLE)?;

		match table.get(account.as_str())? {
			Some(raw) => Ok(decode(&raw.value())?),
			None => Ok(Vec::new()),
		}
	}

	/// Replace the whole log for `account`.
	pub fn save_operations(
		&self,
		account: &AccountId,
		operations: &[Operation],
	) -> Result<(), StoreError> {
		let raw = encode(operations)?;

		let txn = self.db.begin_write()?;
		{
			let mut table = txn.open_table(OPERATIONS_TABLE)?;
			table.insert(account.as_str(), raw)?;
		}
		txn.commit()?;

		Ok(())
	}

	pub fn clear_operations(&self, account: &AccountId) -> Result<(), StoreError> {
		let txn = self.db.begin_write()?;
		{
			let mut table = txn.open_table(OPERATIONS_TABLE)?;
			table.remove(account.as_str())?;
		}
		txn.commit()?;

		Ok(())
	}

	/// Next value of the per-account enqueue sequence. Persisted, so
	/// ordering survives restarts.
	pub fn next_operation_version(&self, account: &AccountId) -> Result<u64, StoreError> {
		let key = format!("{OP_SEQ_PREFIX}{account}");

		let txn = self.db.begin_write()?;
		let next = {
			let mut table = txn.open_table(META_TABLE)?;
			let current: u64 = match table.get(key.as_str())? {
				Some(raw) => decode(&raw.value())?,
				None => 0,
			};
			let next = current + 1;
			table.insert(key.as_str(), encode(&next)?)?;
			next
		};
		txn.commit()?;

		Ok(next)
	}

	/// Upsert confirmed item state into the local snapshot cache.
	pub fn cache_items(&self, account: &AccountId, items: &[Item]) -> Result<(), StoreError> {
		let txn = self.db.begin_write()?;
		{
			let mut table = txn.open_table(ITEMS_TABLE)?;
			for item in items {
				table.insert((account.as_str(), item.id.as_str()), encode(item)?)?;
			}
		}
		txn.commit()?;

		Ok(())
	}

	pub fn cached_items(&self, account: &AccountId) -> Result<Vec<Item>, StoreError> {
		let txn = self.db.begin_read()?;
		let table = txn.open_table(ITEMS_TABLE)?;

		let mut items = Vec::new();
		for entry in table.range((account.as_str(), "")..)? {
			let (key, value) = entry?;
			let (entry_account, _) = key.value();
			if entry_account != account.as_str() {
				break;
			}
			items.push(decode(&value.value())?);
		}

		Ok(items)
	}

	pub fn cached_item(
		&self,
		account: &AccountId,
		item: &ItemId,
	) -> Result<Option<Item>, StoreError> {
		let txn = self.db.begin_read()?;
		let table = txn.open_table(ITEMS_TABLE)?;

		match table.get((account.as_str(), item.as_str()))? {
			Some(raw) => Ok(Some(decode(&raw.value())?)),
			None => Ok(None),
		}
	}

	pub fn uncache_item(&self, account: &AccountId, item: &ItemId) -> Result<(), StoreError> {
		let txn = self.db.begin_write()?;
		{
			let mut table = txn.open_table(ITEMS_TABLE)?;
			table.remove((account.as_str(), item.as_str()))?;
		}
		txn.commit()?;

		Ok(())
	}

	pub fn clear_cached_items(&self, account: &AccountId) -> Result<(), StoreError> {
		let txn = self.db.begin_write()?;
		{
			let mut table = txn.open_table(ITEMS_TABLE)?;

			let item_keys = {
				let mut keys = Vec::new();
				for entry in table.range((account.as_str(), "")..)? {
					let (key, _) = entry?;
					let (entry_account, entry_item) = key.value();
					if entry_account != account.as_str() {
						break;
					}
					keys.push(entry_item.to_owned());
				}
				keys
			};

			for key in &item_keys {
				table.remove((account.as_str(), key.as_str()))?;
			}
		}
		txn.commit()?;

		Ok(())
	}

	/// Claim the pre-tenancy queue if an older build left one behind. The
	/// blob is removed in the same transaction, so it is only ever claimed
	/// once. An undecodable blob is dropped rather than wedging bootstrap.
	pub fn take_legacy_queue(&self) -> Result<Option<Vec<Operation>>, StoreError> {
		let txn = self.db.begin_write()?;
		let operations = {
			let mut table = txn.open_table(META_TABLE)?;
			let operations = match table.remove(LEGACY_QUEUE_KEY)? {
				Some(raw) => match decode::<Vec<Operation>>(&raw.value()) {
					Ok(operations) => Some(operations),
					Err(e) => {
						warn!("discarding undecodable legacy queue: {e}");
						None
					}
				},
				None => None,
			};
			operations
		};
		txn.commit()?;

		if let Some(operations) = &operations {
			debug!(count = operations.len(), "claimed legacy queue");
		}

		Ok(operations)
	}

	/// Stage a pre-tenancy queue for the next bootstrap to claim. Upgrade
	/// shims use this when they find the old single-queue file on disk.
	pub fn stage_legacy_queue(&self, operations: &[Operation]) -> Result<(), StoreError> {
		let raw = encode(operations)?;

		let txn = self.db.begin_write()?;
		{
			let mut table = txn.open_table(META_TABLE)?;
			table.insert(LEGACY_QUEUE_KEY, raw)?;
		}
		txn.commit()?;

		Ok(())
	}
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, rmp_serde::encode::Error> {
	rmp_serde::to_vec_named(value)
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T, rmp_serde::decode::Error> {
	rmp_serde::from_slice(raw)
}
