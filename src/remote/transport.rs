//! Connectivity seam between the queue and the platform.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of asking the platform for a background wake-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WakeRegistration {
	/// Whether the platform agreed to wake the process later.
	pub enabled: bool,
	/// Platform-specific explanation when it did not.
	pub reason: Option<String>,
}

/// How the queue learns about connectivity and schedules background drains.
///
/// `is_online` is a cheap hint consulted before every send attempt; a stale
/// `true` only costs one failed delivery. `register_wake` is best-effort and
/// must bound its own wait.
#[async_trait::async_trait]
pub trait SyncTransport: Send + Sync {
	fn is_online(&self) -> bool;

	async fn register_wake(&self, tag: &str) -> WakeRegistration;
}

/// Hand-driven [`SyncTransport`] for tests and embedded hosts.
pub struct ManualTransport {
	online: AtomicBool,
	wake_enabled: AtomicBool,
	wake_tags: Mutex<Vec<String>>,
}

impl ManualTransport {
	pub fn new(online: bool) -> Self {
		Self {
			online: AtomicBool::new(online),
			wake_enabled: AtomicBool::new(true),
			wake_tags: Mutex::new(Vec::new()),
		}
	}

	pub fn set_online(&self, online: bool) {
		self.online.store(online, Ordering::SeqCst);
	}

	/// Make future wake registrations report as declined.
	pub fn set_wake_enabled(&self, enabled: bool) {
		self.wake_enabled.store(enabled, Ordering::SeqCst);
	}

	/// Tags passed to `register_wake`, in call order.
	pub fn wake_tags(&self) -> Vec<String> {
		self.wake_tags.lock().clone()
	}
}

impl Default for ManualTransport {
	fn default() -> Self {
		Self::new(true)
	}
}

#[async_trait::async_trait]
impl SyncTransport for ManualTransport {
	fn is_online(&self) -> bool {
		self.online.load(Ordering::SeqCst)
	}

	async fn register_wake(&self, tag: &str) -> WakeRegistration {
		self.wake_tags.lock().push(tag.to_owned());

		if self.wake_enabled.load(Ordering::SeqCst) {
			WakeRegistration {
				enabled: true,
				reason: None,
			}
		} else {
			WakeRegistration {
				enabled: false,
				reason: Some("background wake declined".to_owned()),
			}
		}
	}
}
