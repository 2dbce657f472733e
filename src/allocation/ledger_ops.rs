//! Canonical ledger entry mutations.
//!
//! These helpers build the [`LedgerWrite`]s a transition needs; the engine
//! submits them in one `execute` batch together with the item row change.
//! Amounts are always recomputed from the members actually on the entry, so
//! a partially applied earlier move heals the next time the entry is touched.

use crate::domain::{
	AccountId, Item, ItemId, LedgerKind, LedgerTransaction, ProjectId, TransactionId,
	TransactionStatus,
};
use crate::remote::{LedgerWrite, RemoteError, RemoteStore};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Sum of `ledger_price` over `members`, floored at zero. `known` short-cuts
/// the fetch for an item the caller already holds; members missing from the
/// remote contribute nothing.
pub(crate) async fn amount_of(
	remote: &dyn RemoteStore,
	account: &AccountId,
	members: &[ItemId],
	known: Option<&Item>,
) -> Result<Decimal, RemoteError> {
	let mut total = Decimal::ZERO;
	for member in members {
		if let Some(item) = known.filter(|item| &item.id == member) {
			total += item.ledger_price();
			continue;
		}
		match remote.fetch_item(account, member).await? {
			Some(item) => total += item.ledger_price(),
			None => debug!(item = %member, "ledger member missing, counted as zero"),
		}
	}
	Ok(total.max(Decimal::ZERO))
}

/// The canonical entry for `project` with `joining` as a member: merged into
/// the existing entry when there is one, otherwise a fresh single-member
/// entry. Nothing is written; the caller batches the upsert.
pub(crate) async fn merged_transaction(
	remote: &dyn RemoteStore,
	account: &AccountId,
	kind: LedgerKind,
	project: &ProjectId,
	joining: &Item,
) -> Result<LedgerTransaction, RemoteError> {
	let id = kind.canonical_id(project);
	let now = Utc::now();

	match remote.fetch_transaction(account, &id).await? {
		Some(mut transaction) => {
			if !transaction.insert_item(joining.id.clone()) {
				debug!(transaction = %id, item = %joining.id, "item already a member");
			}
			transaction.amount =
				amount_of(remote, account, &transaction.item_ids, Some(joining)).await?;
			transaction.updated_at = now;
			Ok(transaction)
		}
		None => Ok(LedgerTransaction {
			id,
			account_id: account.clone(),
			project_id: Some(project.clone()),
			amount: joining.ledger_price().max(Decimal::ZERO),
			item_ids: vec![joining.id.clone()],
			status: TransactionStatus::Pending,
			reimbursement: kind.reimbursement(),
			tax_rate: None,
			notes: None,
			created_at: now,
			updated_at: now,
		}),
	}
}

/// The write that takes `leaving` off a ledger entry: delete the entry when
/// it empties, otherwise an upsert with the amount recomputed from whoever
/// remains. An entry that is already gone counts as done.
pub(crate) async fn removal_write(
	remote: &dyn RemoteStore,
	account: &AccountId,
	transaction_id: &TransactionId,
	leaving: &ItemId,
) -> Result<Option<LedgerWrite>, RemoteError> {
	let Some(mut transaction) = remote.fetch_transaction(account, transaction_id).await? else {
		warn!(transaction = %transaction_id, "ledger entry already gone, removal satisfied");
		return Ok(None);
	};

	if !transaction.remove_item(leaving) {
		debug!(transaction = %transaction_id, item = %leaving, "item was not a member");
	}

	if transaction.is_empty() {
		return Ok(Some(LedgerWrite::DeleteTransaction(transaction.id)));
	}

	transaction.amount = amount_of(remote, account, &transaction.item_ids, None).await?;
	transaction.updated_at = Utc::now();
	Ok(Some(LedgerWrite::UpsertTransaction(transaction)))
}
