//! Domain model: items, ledger transactions, queued operations, lineage.

pub mod ids;
pub mod item;
pub mod ledger;
pub mod lineage;
pub mod operation;

pub use ids::{AccountId, ItemId, OperationId, ProjectId, TransactionId, UserId};
pub use item::{Disposition, InventoryStatus, Item, ItemPatch};
pub use ledger::{
	purchase_id, sale_id, LedgerKind, LedgerLocation, LedgerTransaction, ReimbursementDirection,
	TransactionStatus,
};
pub use lineage::LineageEdge;
pub use operation::{NewOperation, Operation, OperationPayload};
