//! Common fixtures for the integration tests.
//!
//! [`QueueHarness`] wires the whole offline write path (durable store, scope,
//! in-memory remote, manual transport) around one [`OperationQueue`];
//! [`EngineHarness`] wires an [`AllocationEngine`] over the same in-memory
//! remote. Queue timings are turned down so retry and backoff paths finish in
//! milliseconds.

use anyhow::{anyhow, Context, Result};
use atelier_core::domain::{
	AccountId, Item, ItemId, ItemPatch, NewOperation, OperationPayload, UserId,
};
use atelier_core::infra::{LineageConfig, QueueConfig};
use atelier_core::{
	AllocationEngine, DurableStore, LineageTracker, ManualTransport, MemoryAuditSink,
	MemoryRemoteStore, OfflineContext, OperationQueue, QueueEvent, QueueEventBus, QueueSnapshot,
	StaticIdentity,
};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

/// A full offline queue plus handles to every collaborator behind it.
#[allow(dead_code)]
pub struct QueueHarness {
	pub store: Arc<DurableStore>,
	pub context: Arc<OfflineContext>,
	pub remote: Arc<MemoryRemoteStore>,
	pub identity: Arc<StaticIdentity>,
	pub transport: Arc<ManualTransport>,
	pub events: QueueEventBus,
	pub queue: OperationQueue,
}

/// Builder for [`QueueHarness`]. Defaults: offline transport, `user_1`
/// signed in, scope set to `acct_1`/`user_1`, fast timings.
#[allow(dead_code)]
pub struct QueueHarnessBuilder {
	online: bool,
	signed_in: Option<&'static str>,
	scope: Option<(&'static str, &'static str)>,
	config: QueueConfig,
}

#[allow(dead_code)]
impl QueueHarnessBuilder {
	pub fn new() -> Self {
		Self {
			online: false,
			signed_in: Some("user_1"),
			scope: Some(("acct_1", "user_1")),
			config: fast_queue_config(),
		}
	}

	pub fn online(mut self) -> Self {
		self.online = true;
		self
	}

	pub fn signed_out(mut self) -> Self {
		self.signed_in = None;
		self
	}

	pub fn without_scope(mut self) -> Self {
		self.scope = None;
		self
	}

	pub fn with_config(mut self, config: QueueConfig) -> Self {
		self.config = config;
		self
	}

	/// Build the harness over `data_dir`. The directory outlives the harness,
	/// so tests can drop everything and build a second harness over the same
	/// durable state.
	pub fn build(self, data_dir: &Path) -> Result<QueueHarness> {
		let store = Arc::new(DurableStore::open(data_dir.join("queue.db"))?);
		let context = Arc::new(OfflineContext::new());
		if let Some((account, user)) = self.scope {
			context.set_scope(AccountId::from(account), UserId::from(user));
		}

		let remote = Arc::new(MemoryRemoteStore::new());
		let identity = Arc::new(match self.signed_in {
			Some(user) => StaticIdentity::signed_in(user),
			None => StaticIdentity::new(),
		});
		let transport = Arc::new(ManualTransport::new(self.online));
		let events = QueueEventBus::new();

		let queue = OperationQueue::new(
			store.clone(),
			context.clone(),
			remote.clone(),
			identity.clone(),
			transport.clone(),
			events.clone(),
			self.config,
		);

		Ok(QueueHarness {
			store,
			context,
			remote,
			identity,
			transport,
			events,
			queue,
		})
	}
}

impl Default for QueueHarnessBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Default harness: offline, signed in as `user_1`, scoped to `acct_1`.
#[allow(dead_code)]
pub fn queue_harness(data_dir: &Path) -> Result<QueueHarness> {
	QueueHarnessBuilder::new().build(data_dir)
}

/// Queue timings turned down for tests.
#[allow(dead_code)]
pub fn fast_queue_config() -> QueueConfig {
	QueueConfig {
		retry_base_ms: 2,
		retry_cap_ms: 10,
		drain_delay_ms: 1,
		identity_timeout_ms: 250,
		..QueueConfig::default()
	}
}

/// Wait until the published queue snapshot satisfies `pred`, failing after
/// two seconds. Needed wherever a drain runs on a background task.
#[allow(dead_code)]
pub async fn wait_for_snapshot(
	queue: &OperationQueue,
	pred: impl Fn(&QueueSnapshot) -> bool,
) -> Result<QueueSnapshot> {
	let mut rx = queue.subscribe();
	timeout(Duration::from_secs(2), async move {
		loop {
			let current = rx.borrow_and_update().clone();
			if pred(&current) {
				return Ok(current);
			}
			rx.changed().await.context("snapshot channel closed")?;
		}
	})
	.await
	.map_err(|_| anyhow!("queue snapshot never reached the expected state"))?
}

/// Every event currently buffered on `rx`, in emission order.
#[allow(dead_code)]
pub fn drain_events(rx: &mut broadcast::Receiver<QueueEvent>) -> Vec<QueueEvent> {
	let mut events = Vec::new();
	while let Ok(event) = rx.try_recv() {
		events.push(event);
	}
	events
}

/// Payload creating a fresh item.
#[allow(dead_code)]
pub fn create_op(account: &str, item: &str) -> NewOperation {
	NewOperation::new(OperationPayload::CreateItem {
		item: Item::new(account, item),
	})
}

/// Payload stamping a note onto an existing item.
#[allow(dead_code)]
pub fn note_op(item: &str, note: &str) -> NewOperation {
	NewOperation::new(OperationPayload::UpdateItem {
		item_id: ItemId::from(item),
		patch: ItemPatch {
			notes: Some(Some(note.to_owned())),
			..Default::default()
		},
	})
}

/// Item with a purchase price given in cents.
#[allow(dead_code)]
pub fn priced_item(account: &str, id: &str, cents: i64) -> Item {
	let mut item = Item::new(account, id);
	item.purchase_price = Some(Decimal::new(cents, 2));
	item
}

/// An allocation engine over a shared in-memory remote.
#[allow(dead_code)]
pub struct EngineHarness {
	pub remote: Arc<MemoryRemoteStore>,
	pub audit: Arc<MemoryAuditSink>,
	pub lineage: Arc<LineageTracker>,
	pub engine: AllocationEngine,
}

#[allow(dead_code)]
pub fn engine_harness() -> EngineHarness {
	let remote = Arc::new(MemoryRemoteStore::new());
	let audit = Arc::new(MemoryAuditSink::new());
	let lineage = Arc::new(LineageTracker::new(
		remote.clone(),
		LineageConfig::default(),
	));
	let engine = AllocationEngine::new(remote.clone(), lineage.clone(), audit.clone());

	EngineHarness {
		remote,
		audit,
		lineage,
		engine,
	}
}
