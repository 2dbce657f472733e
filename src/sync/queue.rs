//! Durable FIFO queue of offline mutations.
//!
//! Every UI mutation lands here first and is persisted before the call
//! returns; delivery to the remote store happens later, in order, when the
//! transport says we are online. The queue is strictly single-account: one
//! durable log per account, and the in-memory view follows the active scope.
//!
//! Delivery of one operation can end four ways: confirmed (popped, snapshot
//! cache updated), abandoned (retry budget exhausted), discarded (author no
//! longer signed in), or frozen (version conflict, waiting for a human).

use crate::context::OfflineContext;
use crate::domain::{AccountId, Item, ItemId, NewOperation, Operation, OperationId, UserId};
use crate::infra::config::QueueConfig;
use crate::infra::event::{QueueEvent, QueueEventBus};
use crate::infra::store::{DurableStore, StoreError};
use crate::remote::{Identity, IdentityProvider, RemoteError, RemoteStore, SyncTransport};
use crate::sync::conflict::{ConflictDetector, ConflictError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum QueueError {
	#[error("no active account to scope the operation")]
	NoAccount,
	#[error("no signed-in user to attribute the operation")]
	NoIdentity,
	#[error("operation for account {found} cannot join a queue scoped to {expected}")]
	AccountMismatch { expected: AccountId, found: AccountId },
	#[error("no blocked operation to resolve")]
	NotBlocked,
	#[error(transparent)]
	Store(#[from] StoreError),
}

/// How the user wants a frozen head handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
	/// The divergence was reconciled; try delivering again.
	Retry,
	/// Drop the blocked operation.
	Discard,
}

/// The head operation the queue refuses to deliver until a human decides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedOperation {
	pub operation_id: OperationId,
	pub item_id: ItemId,
	pub reason: String,
	pub blocked_at: DateTime<Utc>,
}

/// Point-in-time view of the queue, published on every mutation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
	pub account_id: Option<AccountId>,
	pub operations: Vec<Operation>,
	pub len: usize,
	pub draining: bool,
	pub blocked: Option<BlockedOperation>,
	pub last_error: Option<String>,
	pub last_drained_at: Option<DateTime<Utc>>,
	pub last_drain_attempt_at: Option<DateTime<Utc>>,
}

/// What a background wake accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeOutcome {
	/// True when the queue is empty after the pass.
	pub success: bool,
	pub pending_operations: usize,
}

struct QueueState {
	account_id: Option<AccountId>,
	operations: VecDeque<Operation>,
	blocked: Option<BlockedOperation>,
	last_error: Option<String>,
	last_drained_at: Option<DateTime<Utc>>,
	last_drain_attempt_at: Option<DateTime<Utc>>,
}

impl QueueState {
	fn new() -> Self {
		Self {
			account_id: None,
			operations: VecDeque::new(),
			blocked: None,
			last_error: None,
			last_drained_at: None,
			last_drain_attempt_at: None,
		}
	}

	fn persist(&mut self, store: &DurableStore) -> Result<(), StoreError> {
		if let Some(account) = self.account_id.clone() {
			store.save_operations(&account, self.operations.make_contiguous())?;
		}
		Ok(())
	}
}

struct QueueShared {
	store: Arc<DurableStore>,
	context: Arc<OfflineContext>,
	remote: Arc<dyn RemoteStore>,
	identity: Arc<dyn IdentityProvider>,
	transport: Arc<dyn SyncTransport>,
	events: QueueEventBus,
	config: QueueConfig,
	detector: ConflictDetector,
	state: Mutex<QueueState>,
	snapshot_tx: watch::Sender<QueueSnapshot>,
	draining: AtomicBool,
	init: OnceCell<()>,
	shutdown_tx: broadcast::Sender<()>,
	tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl QueueShared {
	fn publish(&self, state: &mut QueueState) {
		let snapshot = QueueSnapshot {
			account_id: state.account_id.clone(),
			operations: state.operations.iter().cloned().collect(),
			len: state.operations.len(),
			draining: self.draining.load(Ordering::SeqCst),
			blocked: state.blocked.clone(),
			last_error: state.last_error.clone(),
			last_drained_at: state.last_drained_at,
			last_drain_attempt_at: state.last_drain_attempt_at,
		};
		self.snapshot_tx.send_replace(snapshot);
	}

	fn track(&self, handle: JoinHandle<()>) {
		let mut tasks = self.tasks.lock();
		tasks.retain(|task| !task.is_finished());
		tasks.push(handle);
	}
}

/// See the module docs. `Clone` hands out another handle to the same queue.
#[derive(Clone)]
pub struct OperationQueue {
	shared: Arc<QueueShared>,
}

impl OperationQueue {
	pub fn new(
		store: Arc<DurableStore>,
		context: Arc<OfflineContext>,
		remote: Arc<dyn RemoteStore>,
		identity: Arc<dyn IdentityProvider>,
		transport: Arc<dyn SyncTransport>,
		events: QueueEventBus,
		config: QueueConfig,
	) -> Self {
		let (snapshot_tx, _) = watch::channel(QueueSnapshot::default());
		let (shutdown_tx, _) = broadcast::channel(1);
		let detector = ConflictDetector::new(store.clone(), remote.clone());

		Self {
			shared: Arc::new(QueueShared {
				store,
				context,
				remote,
				identity,
				transport,
				events,
				config,
				detector,
				state: Mutex::new(QueueState::new()),
				snapshot_tx,
				draining: AtomicBool::new(false),
				init: OnceCell::new(),
				shutdown_tx,
				tasks: parking_lot::Mutex::new(Vec::new()),
			}),
		}
	}

	/// Bootstrap the queue: import the pre-tenancy log (once), load the
	/// active account's operations, publish the first snapshot, and start
	/// following scope changes. Idempotent; concurrent callers share one
	/// bootstrap.
	pub async fn init(&self) -> Result<(), QueueError> {
		self.shared
			.init
			.get_or_try_init(|| self.bootstrap())
			.await?;
		Ok(())
	}

	async fn bootstrap(&self) -> Result<(), QueueError> {
		let shared = &self.shared;
		let scope = shared.context.current();

		let mut state = shared.state.lock().await;
		state.account_id = scope.account_id.clone();

		if let Some(account) = &scope.account_id {
			let mut operations: VecDeque<Operation> =
				shared.store.load_operations(account)?.into();

			// Operations queued before accounts existed have no scope of
			// their own; they become ours, exactly once.
			if let Some(legacy) = shared.store.take_legacy_queue()? {
				info!(count = legacy.len(), %account, "importing legacy queue");
				for mut op in legacy {
					op.account_id = account.clone();
					if let Some(user) = &scope.user_id {
						op.user_id = user.clone();
					}
					op.version = shared.store.next_operation_version(account)?;
					operations.push_back(op);
				}
			}

			state.operations = operations;
			state.persist(&shared.store)?;
		}

		shared.publish(&mut state);
		drop(state);

		self.spawn_context_listener();
		Ok(())
	}

	/// Queue a mutation. The operation is durable when this returns.
	#[instrument(skip(self, new_op), fields(kind = new_op.payload.as_ref()))]
	pub async fn enqueue(&self, new_op: NewOperation) -> Result<OperationId, QueueError> {
		self.init().await?;
		let shared = &self.shared;
		let scope = shared.context.current();

		let account = new_op
			.account_override
			.clone()
			.or_else(|| new_op.payload.account_hint().cloned())
			.or_else(|| scope.account_id.clone())
			.ok_or(QueueError::NoAccount)?;

		if let Some(context_account) = &scope.account_id {
			if context_account != &account {
				return Err(QueueError::AccountMismatch {
					expected: context_account.clone(),
					found: account,
				});
			}
		}

		let user_id = self.resolve_user(&scope.user_id).await?;

		let mut state = shared.state.lock().await;
		match &state.account_id {
			Some(queue_account) if queue_account != &account => {
				return Err(QueueError::AccountMismatch {
					expected: queue_account.clone(),
					found: account,
				});
			}
			Some(_) => {}
			None => state.account_id = Some(account.clone()),
		}

		let operation = Operation {
			id: OperationId::new(),
			account_id: account.clone(),
			user_id,
			version: shared.store.next_operation_version(&account)?,
			payload: new_op.payload,
			retry_count: 0,
			last_error: None,
			enqueued_at: Utc::now(),
		};
		let id = operation.id;

		state.operations.push_back(operation);
		state.persist(&shared.store)?;
		shared.publish(&mut state);
		drop(state);

		shared.events.emit(QueueEvent::Enqueued {
			id,
			account_id: account,
		});

		let registration = shared.transport.register_wake("queue-drain").await;
		if !registration.enabled {
			debug!(reason = ?registration.reason, "background wake declined");
		}

		if shared.transport.is_online() {
			self.spawn_drain();
		}

		Ok(id)
	}

	async fn resolve_user(&self, context_user: &Option<UserId>) -> Result<UserId, QueueError> {
		if let Some(user) = context_user {
			return Ok(user.clone());
		}
		if !self.shared.transport.is_online() {
			return Err(QueueError::NoIdentity);
		}
		self.bounded_identity()
			.await
			.map(|identity| identity.id)
			.ok_or(QueueError::NoIdentity)
	}

	async fn bounded_identity(&self) -> Option<Identity> {
		tokio::time::timeout(
			self.shared.config.identity_timeout(),
			self.shared.identity.current_identity(),
		)
		.await
		.ok()
		.flatten()
	}

	/// Deliver queued operations in order until the queue empties, goes
	/// offline, hits a retry wall, or freezes on a conflict. Only one pass
	/// runs at a time; concurrent calls return immediately.
	#[instrument(skip(self))]
	pub async fn process_queue(&self) -> Result<(), QueueError> {
		let shared = &self.shared;

		if !shared.transport.is_online() {
			debug!("skipping drain, transport offline");
			return Ok(());
		}
		if shared.draining.swap(true, Ordering::SeqCst) {
			debug!("drain already in progress");
			return Ok(());
		}

		let result = self.drain_loop().await;

		shared.draining.store(false, Ordering::SeqCst);
		let mut state = shared.state.lock().await;
		shared.publish(&mut state);
		result
	}

	async fn drain_loop(&self) -> Result<(), QueueError> {
		let shared = &self.shared;
		let mut shutdown_rx = shared.shutdown_tx.subscribe();

		loop {
			if !shared.transport.is_online() {
				debug!("transport went offline mid-drain");
				return Ok(());
			}

			let (account, head) = {
				let mut state = shared.state.lock().await;
				if state.blocked.is_some() {
					return Ok(());
				}
				let (Some(account), Some(head)) =
					(state.account_id.clone(), state.operations.front().cloned())
				else {
					return Ok(());
				};
				state.last_drain_attempt_at = Some(Utc::now());
				shared.publish(&mut state);
				(account, head)
			};

			// The author must still be the signed-in user. Someone else's
			// session must never replay this operation as theirs.
			match self.bounded_identity().await {
				None => {
					debug!("no identity available, deferring drain");
					return Ok(());
				}
				Some(identity) if identity.id != head.user_id => {
					debug!(
						operation = %head.id,
						author = %head.user_id,
						current = %identity.id,
						"author no longer signed in, discarding"
					);
					self.pop_head(head.id, QueueEvent::Discarded { id: head.id })
						.await?;
					continue;
				}
				Some(_) => {}
			}

			let session = shared.identity.session().await;
			if session.expiring_within(shared.config.session_refresh_window()) {
				if let Err(e) = shared.identity.refresh_session().await {
					warn!("session refresh failed, stopping drain: {e}");
					return Ok(());
				}
			}

			if !head.payload.is_create() {
				match shared
					.detector
					.is_conflicted(&account, head.payload.target_item())
					.await
				{
					Ok(true) => {
						self.freeze_head(&head).await?;
						return Ok(());
					}
					Ok(false) => {}
					Err(ConflictError::Store(e)) => return Err(e.into()),
					Err(ConflictError::Remote(e)) => {
						warn!("conflict check unavailable, stopping drain: {e}");
						return Ok(());
					}
				}
			}

			match self.deliver(&account, &head).await {
				Ok(()) => {
					let mut state = shared.state.lock().await;
					if state
						.operations
						.front()
						.is_some_and(|front| front.id == head.id)
					{
						state.operations.pop_front();
					}
					state.last_drained_at = Some(Utc::now());
					state.last_error = None;
					state.persist(&shared.store)?;
					shared.publish(&mut state);
					drop(state);

					shared.events.emit(QueueEvent::Drained {
						id: head.id,
						account_id: account.clone(),
					});

					tokio::select! {
						() = tokio::time::sleep(shared.config.drain_delay()) => {}
						_ = shutdown_rx.recv() => return Ok(()),
					}
				}
				Err(e) => {
					let Some(attempts) = self.record_failure(&head, &e).await? else {
						return Ok(());
					};
					if attempts >= shared.config.max_attempts {
						warn!(
							operation = %head.id,
							attempts,
							"retry budget exhausted, abandoning: {e}"
						);
						self.pop_head(
							head.id,
							QueueEvent::Abandoned {
								id: head.id,
								error: e.to_string(),
							},
						)
						.await?;
						continue;
					}

					let delay = shared.config.retry_delay(attempts);
					debug!(
						operation = %head.id,
						attempts,
						?delay,
						"delivery failed, backing off: {e}"
					);
					tokio::select! {
						() = tokio::time::sleep(delay) => {}
						_ = shutdown_rx.recv() => return Ok(()),
					}
				}
			}
		}
	}

	/// Execute one operation against the remote store and write the
	/// confirmed state through to the snapshot cache. After a confirmed
	/// write the queue is the only writer of local truth, so a cache
	/// failure is logged, not propagated.
	async fn deliver(&self, account: &AccountId, operation: &Operation) -> Result<(), RemoteError> {
		use crate::domain::OperationPayload::{CreateItem, DeleteItem, UpdateItem};
		let shared = &self.shared;

		match &operation.payload {
			CreateItem { item } => {
				let confirmed = shared.remote.insert_item(account, item.clone()).await?;
				self.cache_confirmed(account, confirmed);
			}
			UpdateItem { item_id, patch } => {
				let confirmed = shared.remote.update_item(account, item_id, patch).await?;
				self.cache_confirmed(account, confirmed);
			}
			DeleteItem { item_id } => {
				shared.remote.delete_item(account, item_id).await?;
				if let Err(e) = shared.store.uncache_item(account, item_id) {
					warn!(item = %item_id, "failed to drop cached item: {e}");
				}
			}
		}
		Ok(())
	}

	fn cache_confirmed(&self, account: &AccountId, item: Item) {
		let item_id = item.id.clone();
		if let Err(e) = self.shared.store.cache_items(account, &[item]) {
			warn!(item = %item_id, "failed to cache confirmed item: {e}");
		}
	}

	/// Pop the head, but only if it is still the operation we worked on;
	/// the in-memory log can be swapped under us by an account switch.
	async fn pop_head(&self, expected: OperationId, event: QueueEvent) -> Result<(), QueueError> {
		let shared = &self.shared;
		let mut state = shared.state.lock().await;
		match state.operations.front() {
			Some(front) if front.id == expected => {
				state.operations.pop_front();
				state.persist(&shared.store)?;
				shared.publish(&mut state);
			}
			_ => debug!(operation = %expected, "head changed under drain, not popping"),
		}
		drop(state);

		shared.events.emit(event);
		Ok(())
	}

	/// Bump the head's retry state. `None` means the head is no longer the
	/// operation that failed and the pass should stop.
	async fn record_failure(
		&self,
		head: &Operation,
		error: &RemoteError,
	) -> Result<Option<u32>, QueueError> {
		let shared = &self.shared;
		let mut state = shared.state.lock().await;

		let attempts = match state.operations.front_mut() {
			Some(front) if front.id == head.id => {
				front.retry_count += 1;
				front.last_error = Some(error.to_string());
				front.retry_count
			}
			_ => return Ok(None),
		};
		state.last_error = Some(error.to_string());
		state.persist(&shared.store)?;
		shared.publish(&mut state);
		Ok(Some(attempts))
	}

	/// Freeze the head: force its retry budget shut and surface the blocked
	/// state until [`Self::resolve_blocked`] is called. The frozen marker
	/// survives restarts through the persisted retry count; the conflict
	/// gate re-detects on the next pass.
	async fn freeze_head(&self, head: &Operation) -> Result<(), QueueError> {
		let shared = &self.shared;
		let item_id = head.payload.target_item().clone();
		let reason = format!("local copy of item {item_id} diverged from the remote");

		let mut state = shared.state.lock().await;
		match state.operations.front_mut() {
			Some(front) if front.id == head.id => {
				front.retry_count = shared.config.max_attempts;
				front.last_error = Some(reason.clone());
			}
			_ => {
				debug!(operation = %head.id, "head changed under drain, not freezing");
				return Ok(());
			}
		}
		state.blocked = Some(BlockedOperation {
			operation_id: head.id,
			item_id: item_id.clone(),
			reason: reason.clone(),
			blocked_at: Utc::now(),
		});
		state.last_error = Some(reason);
		state.persist(&shared.store)?;
		shared.publish(&mut state);
		drop(state);

		info!(operation = %head.id, item = %item_id, "queue frozen on version conflict");
		shared.events.emit(QueueEvent::Blocked {
			id: head.id,
			item_id,
		});
		Ok(())
	}

	/// Resolve a frozen head after the human has looked at it.
	pub async fn resolve_blocked(&self, resolution: Resolution) -> Result<(), QueueError> {
		let shared = &self.shared;
		let mut state = shared.state.lock().await;
		let blocked = state.blocked.take().ok_or(QueueError::NotBlocked)?;

		let event = match resolution {
			Resolution::Retry => {
				if let Some(front) = state.operations.front_mut() {
					front.retry_count = 0;
					front.last_error = None;
				}
				state.last_error = None;
				QueueEvent::Resolved {
					id: blocked.operation_id,
					retried: true,
				}
			}
			Resolution::Discard => {
				state.operations.pop_front();
				QueueEvent::Resolved {
					id: blocked.operation_id,
					retried: false,
				}
			}
		};

		state.persist(&shared.store)?;
		shared.publish(&mut state);
		drop(state);

		shared.events.emit(event);

		if resolution == Resolution::Retry && shared.transport.is_online() {
			self.spawn_drain();
		}
		Ok(())
	}

	/// Drop every queued operation for `account` (default: the active one).
	pub async fn clear_queue(&self, account: Option<AccountId>) -> Result<(), QueueError> {
		let shared = &self.shared;
		let mut state = shared.state.lock().await;
		let target = account
			.or_else(|| state.account_id.clone())
			.ok_or(QueueError::NoAccount)?;

		shared.store.clear_operations(&target)?;
		if state.account_id.as_ref() == Some(&target) {
			state.operations.clear();
			state.blocked = None;
			state.last_error = None;
			shared.publish(&mut state);
		}
		drop(state);

		shared.events.emit(QueueEvent::Cleared { account_id: target });
		Ok(())
	}

	pub fn snapshot(&self) -> QueueSnapshot {
		self.shared.snapshot_tx.borrow().clone()
	}

	/// Watch the queue. The receiver already holds the current snapshot;
	/// no mutation is needed before the first read.
	pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
		self.shared.snapshot_tx.subscribe()
	}

	pub fn events(&self) -> &QueueEventBus {
		&self.shared.events
	}

	/// Entry point for the background-wake coordinator: drain if possible
	/// and report what is left.
	pub async fn handle_wake(&self) -> WakeOutcome {
		if let Err(e) = self.init().await {
			warn!("wake could not initialize queue: {e}");
		}
		if self.shared.transport.is_online() {
			if let Err(e) = self.process_queue().await {
				warn!("wake drain failed: {e}");
			}
		}

		let pending = self.shared.state.lock().await.operations.len();
		WakeOutcome {
			success: pending == 0,
			pending_operations: pending,
		}
	}

	/// Stop background tasks and wait for an in-flight drain to park.
	/// Queued operations stay durable.
	pub async fn shutdown(&self) {
		let _ = self.shared.shutdown_tx.send(());

		let handles: Vec<JoinHandle<()>> = {
			let mut tasks = self.shared.tasks.lock();
			tasks.drain(..).collect()
		};
		for result in futures::future::join_all(handles).await {
			if let Err(e) = result {
				if !e.is_cancelled() {
					warn!("queue task ended abnormally: {e}");
				}
			}
		}
		info!("operation queue shut down");
	}

	fn spawn_drain(&self) {
		let queue = self.clone();
		let handle = tokio::spawn(async move {
			if let Err(e) = queue.process_queue().await {
				warn!("queue drain failed: {e}");
			}
		});
		self.shared.track(handle);
	}

	fn spawn_context_listener(&self) {
		let queue = self.clone();
		let mut scope_rx = self.shared.context.subscribe();
		let mut shutdown_rx = self.shared.shutdown_tx.subscribe();

		let handle = tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = shutdown_rx.recv() => break,
					changed = scope_rx.changed() => {
						if changed.is_err() {
							break;
						}
						let account = scope_rx.borrow_and_update().account_id.clone();
						if let Err(e) = queue.switch_account(account).await {
							warn!("account switch failed: {e}");
						}
					}
				}
			}
			debug!("context listener stopped");
		});
		self.shared.track(handle);
	}

	/// Swap the in-memory view to another account's durable log. The old
	/// account's log needs no save; every mutation already persisted.
	async fn switch_account(&self, account: Option<AccountId>) -> Result<(), QueueError> {
		let shared = &self.shared;
		let mut state = shared.state.lock().await;
		if state.account_id == account {
			return Ok(());
		}

		info!(?account, "queue following scope change");
		state.operations = match &account {
			Some(account) => shared.store.load_operations(account)?.into(),
			None => VecDeque::new(),
		};
		state.account_id = account;
		state.blocked = None;
		state.last_error = None;
		shared.publish(&mut state);
		Ok(())
	}
}
