//! Who is signed in, and whether their session is still good.

use super::RemoteError;
use crate::domain::UserId;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// The signed-in user as the auth layer sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
	pub id: UserId,
}

/// Session expiry as reported by the auth layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
	/// `None` means the session never expires (or expiry is unknown).
	pub expires_at: Option<DateTime<Utc>>,
}

impl SessionStatus {
	/// Whether the session expires within `margin` from now. Sessions
	/// without an expiry never count as expiring.
	#[must_use]
	pub fn expiring_within(&self, margin: Duration) -> bool {
		match self.expires_at {
			Some(expires_at) => expires_at <= Utc::now() + margin,
			None => false,
		}
	}
}

/// Auth-layer seam consulted before every delivery.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
	/// The currently signed-in user, if any. Callers bound this with a
	/// timeout and treat elapse as signed out.
	async fn current_identity(&self) -> Option<Identity>;

	async fn session(&self) -> SessionStatus;

	async fn refresh_session(&self) -> Result<(), RemoteError>;
}

/// Settable [`IdentityProvider`] for tests and single-user deployments.
#[derive(Default)]
pub struct StaticIdentity {
	identity: Mutex<Option<Identity>>,
	session: Mutex<SessionStatus>,
	refresh_fails: AtomicU32,
	refresh_calls: AtomicU32,
	lookup_delay: Mutex<Option<std::time::Duration>>,
}

impl StaticIdentity {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn signed_in(user: impl Into<UserId>) -> Self {
		let this = Self::new();
		this.set_identity(Some(Identity { id: user.into() }));
		this
	}

	pub fn set_identity(&self, identity: Option<Identity>) {
		*self.identity.lock() = identity;
	}

	pub fn set_session(&self, session: SessionStatus) {
		*self.session.lock() = session;
	}

	/// Make the next `n` refresh calls fail.
	pub fn fail_refreshes(&self, n: u32) {
		self.refresh_fails.store(n, Ordering::SeqCst);
	}

	pub fn refresh_calls(&self) -> u32 {
		self.refresh_calls.load(Ordering::SeqCst)
	}

	/// Stall identity lookups, for exercising the caller-side timeout.
	pub fn set_lookup_delay(&self, delay: Option<std::time::Duration>) {
		*self.lookup_delay.lock() = delay;
	}
}

#[async_trait::async_trait]
impl IdentityProvider for StaticIdentity {
	async fn current_identity(&self) -> Option<Identity> {
		let delay = *self.lookup_delay.lock();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		self.identity.lock().clone()
	}

	async fn session(&self) -> SessionStatus {
		self.session.lock().clone()
	}

	async fn refresh_session(&self) -> Result<(), RemoteError> {
		self.refresh_calls.fetch_add(1, Ordering::SeqCst);

		let remaining = self.refresh_fails.load(Ordering::SeqCst);
		if remaining > 0 {
			self.refresh_fails.store(remaining - 1, Ordering::SeqCst);
			return Err(RemoteError::Unavailable("session refresh failed".to_owned()));
		}

		// A successful refresh pushes expiry out, mirroring a real token
		// renewal, so repeated drains stop asking.
		let mut session = self.session.lock();
		if session.expires_at.is_some() {
			session.expires_at = Some(Utc::now() + Duration::hours(1));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn session_without_expiry_never_expires() {
		let session = SessionStatus::default();
		assert!(!session.expiring_within(Duration::days(365)));
	}

	#[test]
	fn session_expiring_inside_margin_is_flagged() {
		let session = SessionStatus {
			expires_at: Some(Utc::now() + Duration::seconds(30)),
		};
		assert!(session.expiring_within(Duration::seconds(120)));
		assert!(!session.expiring_within(Duration::seconds(5)));
	}

	#[tokio::test]
	async fn refresh_extends_session_and_counts_calls() {
		let identity = StaticIdentity::signed_in("user_1");
		identity.set_session(SessionStatus {
			expires_at: Some(Utc::now() + Duration::seconds(10)),
		});

		identity.refresh_session().await.unwrap();
		assert_eq!(identity.refresh_calls(), 1);
		assert!(!identity
			.session()
			.await
			.expiring_within(Duration::minutes(30)));
	}

	#[tokio::test]
	async fn injected_refresh_failures_run_out() {
		let identity = StaticIdentity::signed_in("user_1");
		identity.fail_refreshes(1);

		assert!(identity.refresh_session().await.is_err());
		assert!(identity.refresh_session().await.is_ok());
	}
}
