//! Account scope shared across the offline core.
//!
//! The core is multi-tenant: every queued operation and cached item belongs
//! to one account, and the person acting is one user within it. The scope can
//! change at any time (sign-in, sign-out, workspace switch), so it is
//! published through a watch channel. New subscribers observe the current
//! scope immediately and every change after.

use crate::domain::{AccountId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// Who the core is currently acting as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSnapshot {
	pub account_id: Option<AccountId>,
	pub user_id: Option<UserId>,
}

impl ScopeSnapshot {
	pub fn is_signed_in(&self) -> bool {
		self.account_id.is_some() && self.user_id.is_some()
	}

	/// Whether scoped writes for `account` are currently allowed.
	pub fn covers(&self, account: &AccountId) -> bool {
		self.account_id.as_ref() == Some(account)
	}
}

/// Shared handle publishing the active account and user.
#[derive(Debug)]
pub struct OfflineContext {
	scope_tx: watch::Sender<ScopeSnapshot>,
}

impl OfflineContext {
	pub fn new() -> Self {
		let (scope_tx, _) = watch::channel(ScopeSnapshot::default());
		Self { scope_tx }
	}

	/// Current scope at the time of the call.
	pub fn current(&self) -> ScopeSnapshot {
		self.scope_tx.borrow().clone()
	}

	pub fn account_id(&self) -> Option<AccountId> {
		self.scope_tx.borrow().account_id.clone()
	}

	pub fn user_id(&self) -> Option<UserId> {
		self.scope_tx.borrow().user_id.clone()
	}

	/// Subscribe to scope changes. The receiver starts out already holding
	/// the current snapshot.
	pub fn subscribe(&self) -> watch::Receiver<ScopeSnapshot> {
		self.scope_tx.subscribe()
	}

	/// Set the active account and user. No-op if the scope is unchanged.
	pub fn set_scope(&self, account_id: AccountId, user_id: UserId) {
		let next = ScopeSnapshot {
			account_id: Some(account_id),
			user_id: Some(user_id),
		};
		let changed = self.scope_tx.send_if_modified(|current| {
			if *current == next {
				return false;
			}
			*current = next.clone();
			true
		});

		if changed {
			info!(
				account_id = ?next.account_id,
				user_id = ?next.user_id,
				"offline scope changed"
			);
		}
	}

	/// Drop the active scope, e.g. on sign-out.
	pub fn clear_scope(&self) {
		let changed = self.scope_tx.send_if_modified(|current| {
			if *current == ScopeSnapshot::default() {
				return false;
			}
			*current = ScopeSnapshot::default();
			true
		});

		if changed {
			info!("offline scope cleared");
		}
	}
}

impl Default for OfflineContext {
	fn default() -> Self {
		Self::new()
	}
}
