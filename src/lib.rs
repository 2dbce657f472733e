#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Offline-first write path for multi-tenant inventory tracking.
//!
//! The crate owns everything between a UI mutation and the hosted record
//! store: a durable per-account operation queue that drains in order when the
//! transport is online, conflict detection against cached snapshots, the
//! allocation state machine that moves items between business inventory and
//! project ledgers, and the movement lineage behind it all. Hosts embed
//! [`Core`] or wire the pieces themselves; every remote collaborator is a
//! trait seam.

pub mod allocation;
pub mod audit;
pub mod context;
pub mod domain;
pub mod infra;
pub mod lineage;
pub mod remote;
pub mod sync;

pub use allocation::{AllocationEngine, AllocationError};
pub use audit::{AuditEvent, AuditKind, AuditSink, MemoryAuditSink};
pub use context::{OfflineContext, ScopeSnapshot};
pub use infra::{
	ConfigError, CoreConfig, DurableStore, QueueEvent, QueueEventBus, StoreError,
};
pub use lineage::LineageTracker;
pub use remote::{
	Identity, IdentityProvider, LedgerWrite, ManualTransport, MemoryRemoteStore, RemoteError,
	RemoteStore, SessionStatus, StaticIdentity, SyncTransport, WakeRegistration,
};
pub use sync::{
	BlockedOperation, ConflictDetector, ConflictError, OperationQueue, QueueError, QueueSnapshot,
	Resolution, WakeOutcome,
};

use crate::audit::record_best_effort;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Debug, Error)]
pub enum CoreError {
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	Queue(#[from] QueueError),
	#[error("logging init: {0}")]
	Logging(#[from] std::io::Error),
}

/// The embedding surface: config, logging, and every component wired up.
///
/// Hosts that need finer control (tests do) can assemble the pieces directly;
/// nothing in the queue or the engine knows this facade exists.
pub struct Core {
	pub config: CoreConfig,
	pub context: Arc<OfflineContext>,
	pub queue: OperationQueue,
	pub engine: Arc<AllocationEngine>,
	pub lineage: Arc<LineageTracker>,
	events: QueueEventBus,
	audit_bridge: JoinHandle<()>,
	// Dropping the guard would stop the background log writer.
	_log_guard: Option<WorkerGuard>,
}

impl Core {
	/// Load (or create) the config under `data_dir`, initialize logging, open
	/// the durable store, and wire the queue and allocation engine to the
	/// given backends.
	pub async fn new(
		data_dir: impl AsRef<Path>,
		remote: Arc<dyn RemoteStore>,
		identity: Arc<dyn IdentityProvider>,
		transport: Arc<dyn SyncTransport>,
		audit: Arc<dyn AuditSink>,
	) -> Result<Self, CoreError> {
		let config = CoreConfig::load_from(data_dir.as_ref())?;
		let log_guard = infra::logging::init(&config)?;

		info!(data_dir = ?config.data_dir, "initializing core");

		let store = Arc::new(DurableStore::open(config.store_path())?);
		let context = Arc::new(OfflineContext::new());
		let events = QueueEventBus::new();

		let queue = OperationQueue::new(
			store,
			context.clone(),
			remote.clone(),
			identity,
			transport,
			events.clone(),
			config.queue.clone(),
		);
		queue.init().await?;

		let lineage = Arc::new(LineageTracker::new(remote.clone(), config.lineage.clone()));
		let engine = Arc::new(AllocationEngine::new(remote, lineage.clone(), audit.clone()));

		let audit_bridge = spawn_audit_bridge(&events, audit);

		Ok(Self {
			config,
			context,
			queue,
			engine,
			lineage,
			events,
			audit_bridge,
			_log_guard: log_guard,
		})
	}

	pub fn events(&self) -> &QueueEventBus {
		&self.events
	}

	/// Stop background tasks. Queued operations stay durable and resume on
	/// the next start.
	pub async fn shutdown(&self) {
		info!("shutting down core");
		self.queue.shutdown().await;
		self.audit_bridge.abort();
	}
}

/// Mirror every drained operation into the audit trail.
fn spawn_audit_bridge(events: &QueueEventBus, audit: Arc<dyn AuditSink>) -> JoinHandle<()> {
	let mut rx = events.subscribe();
	tokio::spawn(async move {
		loop {
			match rx.recv().await {
				Ok(QueueEvent::Drained { id, account_id }) => {
					record_best_effort(
						audit.as_ref(),
						AuditEvent::new(account_id, AuditKind::QueueDrain)
							.with_detail(serde_json::json!({ "operation_id": id })),
					)
					.await;
				}
				Ok(_) => {}
				Err(RecvError::Lagged(skipped)) => {
					warn!(skipped, "audit bridge fell behind queue events");
				}
				Err(RecvError::Closed) => break,
			}
		}
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn core_wires_up_and_shuts_down() {
		let dir = TempDir::new().unwrap();
		let remote = Arc::new(MemoryRemoteStore::new());
		let identity = Arc::new(StaticIdentity::new());
		let transport = Arc::new(ManualTransport::new(false));
		let audit = Arc::new(MemoryAuditSink::new());

		let core = Core::new(dir.path(), remote, identity, transport, audit)
			.await
			.unwrap();

		assert!(core.queue.snapshot().account_id.is_none());
		assert!(dir.path().join(infra::config::CONFIG_FILE_NAME).exists());
		core.shutdown().await;
	}

	#[tokio::test]
	async fn drained_operations_reach_the_audit_trail() {
		use crate::domain::{AccountId, Item, NewOperation, OperationPayload, UserId};

		let dir = TempDir::new().unwrap();
		let remote = Arc::new(MemoryRemoteStore::new());
		let identity = Arc::new(StaticIdentity::signed_in(UserId::from("user_1")));
		let transport = Arc::new(ManualTransport::new(true));
		let audit = Arc::new(MemoryAuditSink::new());

		let core = Core::new(
			dir.path(),
			remote,
			identity,
			transport,
			audit.clone(),
		)
		.await
		.unwrap();
		core.context
			.set_scope(AccountId::from("acct_1"), UserId::from("user_1"));

		core.queue
			.enqueue(NewOperation::new(OperationPayload::CreateItem {
				item: Item::new("acct_1", "item_1"),
			}))
			.await
			.unwrap();
		core.queue.process_queue().await.unwrap();

		// The bridge runs on its own task; give it a beat.
		tokio::time::sleep(std::time::Duration::from_millis(50)).await;
		assert_eq!(audit.kinds(), vec![AuditKind::QueueDrain]);
		core.shutdown().await;
	}
}
