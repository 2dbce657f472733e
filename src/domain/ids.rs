//! Identifier newtypes shared across the core.
//!
//! The hosted record store keys accounts, users, projects, items and ledger
//! transactions by opaque strings, so these wrap `String` rather than UUIDs.
//! Queued operations are minted locally and get a real [`uuid::Uuid`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
		#[serde(transparent)]
		pub struct $name(String);

		impl $name {
			#[must_use]
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl From<&str> for $name {
			fn from(id: &str) -> Self {
				Self(id.to_owned())
			}
		}

		impl From<String> for $name {
			fn from(id: String) -> Self {
				Self(id)
			}
		}

		impl From<$name> for String {
			fn from($name(id): $name) -> Self {
				id
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}
	};
}

string_id!(
	/// Tenant boundary. Every record and every queued operation is scoped to
	/// exactly one account.
	AccountId
);

string_id!(UserId);

string_id!(ProjectId);

string_id!(ItemId);

string_id!(
	/// Key of a ledger transaction. Canonical allocation/sale entries embed
	/// their project in the id, see [`super::ledger`].
	TransactionId
);

/// Locally generated id for a queued operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, PartialEq, Eq)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}

	#[must_use]
	pub fn as_uuid(&self) -> &Uuid {
		&self.0
	}
}

impl Default for OperationId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for OperationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}
