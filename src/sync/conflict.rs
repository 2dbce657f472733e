//! Version divergence between the local snapshot cache and the remote store.
//!
//! The cache remembers each item's `version` as of the last confirmed sync.
//! If the remote row has moved past that (someone else edited it) or vanished
//! entirely, a queued edit against the stale copy would silently overwrite
//! their work, so the queue freezes instead (see
//! [`super::queue::OperationQueue`]). Items never cached locally cannot
//! conflict; there is nothing local to diverge from. Creations are exempt by
//! construction, the remote has no row to compare.

use crate::domain::{AccountId, ItemId, ProjectId};
use crate::infra::store::{DurableStore, StoreError};
use crate::remote::{RemoteError, RemoteStore};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConflictError {
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	Remote(#[from] RemoteError),
}

pub struct ConflictDetector {
	store: Arc<DurableStore>,
	remote: Arc<dyn RemoteStore>,
}

impl ConflictDetector {
	pub fn new(store: Arc<DurableStore>, remote: Arc<dyn RemoteStore>) -> Self {
		Self { store, remote }
	}

	/// Every item in `project` whose cached version no longer matches the
	/// remote, including items that were cached but deleted remotely.
	pub async fn detect(
		&self,
		account: &AccountId,
		project: &ProjectId,
	) -> Result<Vec<ItemId>, ConflictError> {
		let remote_versions: HashMap<ItemId, i64> = self
			.remote
			.items_for_project(account, project)
			.await?
			.into_iter()
			.map(|item| (item.id, item.version))
			.collect();

		let mut conflicted = Vec::new();
		for cached in self.store.cached_items(account)? {
			if cached.project_id.as_ref() != Some(project) {
				continue;
			}
			match remote_versions.get(&cached.id) {
				Some(remote_version) if *remote_version == cached.version => {}
				Some(remote_version) => {
					debug!(
						item = %cached.id,
						local = cached.version,
						remote = remote_version,
						"version divergence"
					);
					conflicted.push(cached.id);
				}
				None => {
					debug!(item = %cached.id, "cached item gone from remote");
					conflicted.push(cached.id);
				}
			}
		}
		Ok(conflicted)
	}

	/// Whether a single item's cached version diverges from the remote.
	pub async fn is_conflicted(
		&self,
		account: &AccountId,
		item_id: &ItemId,
	) -> Result<bool, ConflictError> {
		let Some(cached) = self.store.cached_item(account, item_id)? else {
			return Ok(false);
		};

		match self.remote.fetch_item(account, item_id).await? {
			Some(remote) => Ok(remote.version != cached.version),
			None => Ok(true),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::Item;
	use crate::remote::MemoryRemoteStore;
	use tempfile::TempDir;

	fn account() -> AccountId {
		AccountId::from("acct_1")
	}

	fn project_item(id: &str, project: &str, version: i64) -> Item {
		let mut item = Item::new("acct_1", id);
		item.project_id = Some(ProjectId::from(project));
		item.version = version;
		item
	}

	async fn detector(dir: &TempDir) -> (ConflictDetector, Arc<DurableStore>, Arc<MemoryRemoteStore>) {
		let store = Arc::new(DurableStore::open(dir.path().join("queue.db")).unwrap());
		let remote = Arc::new(MemoryRemoteStore::new());
		(
			ConflictDetector::new(store.clone(), remote.clone()),
			store,
			remote,
		)
	}

	#[tokio::test]
	async fn matching_versions_are_not_conflicts() {
		let dir = TempDir::new().unwrap();
		let (detector, store, remote) = detector(&dir).await;

		remote.seed_item(&account(), project_item("item_1", "proj_1", 3)).await;
		store
			.cache_items(&account(), &[project_item("item_1", "proj_1", 3)])
			.unwrap();

		let conflicts = detector
			.detect(&account(), &ProjectId::from("proj_1"))
			.await
			.unwrap();
		assert!(conflicts.is_empty());
		assert!(!detector
			.is_conflicted(&account(), &ItemId::from("item_1"))
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn diverged_version_is_a_conflict() {
		let dir = TempDir::new().unwrap();
		let (detector, store, remote) = detector(&dir).await;

		remote.seed_item(&account(), project_item("item_1", "proj_1", 5)).await;
		store
			.cache_items(&account(), &[project_item("item_1", "proj_1", 3)])
			.unwrap();

		let conflicts = detector
			.detect(&account(), &ProjectId::from("proj_1"))
			.await
			.unwrap();
		assert_eq!(conflicts, vec![ItemId::from("item_1")]);
	}

	#[tokio::test]
	async fn remotely_deleted_cached_item_is_a_conflict() {
		let dir = TempDir::new().unwrap();
		let (detector, store, _remote) = detector(&dir).await;

		store
			.cache_items(&account(), &[project_item("item_1", "proj_1", 2)])
			.unwrap();

		assert!(detector
			.is_conflicted(&account(), &ItemId::from("item_1"))
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn never_cached_item_cannot_conflict() {
		let dir = TempDir::new().unwrap();
		let (detector, _store, remote) = detector(&dir).await;

		remote.seed_item(&account(), project_item("item_1", "proj_1", 7)).await;

		assert!(!detector
			.is_conflicted(&account(), &ItemId::from("item_1"))
			.await
			.unwrap());
	}
}
