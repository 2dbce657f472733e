//! Core configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Name of the config file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "atelier.json";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("config io: {0}")]
	Io(#[from] std::io::Error),
	#[error("config encoding: {0}")]
	Serde(#[from] serde_json::Error),
	#[error("unknown config version: {0}")]
	UnknownVersion(u32),
}

/// On-disk configuration for the offline core.
///
/// Stored as JSON in the data directory next to the durable queue database.
/// Every field past `version` has a default so older files keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory holding the queue database and logs
	pub data_dir: PathBuf,

	/// Logging filter directive, overridden by `RUST_LOG`
	pub log_level: String,

	/// Queue tuning knobs
	#[serde(default)]
	pub queue: QueueConfig,

	/// Lineage tuning knobs
	#[serde(default)]
	pub lineage: LineageConfig,
}

/// Tuning knobs for the operation queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
	/// Delivery attempts before an operation is abandoned
	pub max_attempts: u32,

	/// Base retry delay in milliseconds, doubled per attempt
	pub retry_base_ms: u64,

	/// Upper bound on any single retry delay, in milliseconds
	pub retry_cap_ms: u64,

	/// Pause between consecutive drained operations, in milliseconds
	pub drain_delay_ms: u64,

	/// How long before expiry a session counts as stale, in seconds
	pub session_refresh_window_secs: u64,

	/// Upper bound on an identity lookup before the queue treats the user
	/// as signed out, in milliseconds
	pub identity_timeout_ms: u64,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			max_attempts: 5,
			retry_base_ms: 2_000,
			retry_cap_ms: 60_000,
			drain_delay_ms: 50,
			session_refresh_window_secs: 120,
			identity_timeout_ms: 3_000,
		}
	}
}

impl QueueConfig {
	/// Delay before retry attempt `attempt` (1-based), exponential with a cap.
	pub fn retry_delay(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(16);
		let ms = self
			.retry_base_ms
			.saturating_mul(1_u64 << exponent)
			.min(self.retry_cap_ms);
		Duration::from_millis(ms)
	}

	pub fn drain_delay(&self) -> Duration {
		Duration::from_millis(self.drain_delay_ms)
	}

	pub fn identity_timeout(&self) -> Duration {
		Duration::from_millis(self.identity_timeout_ms)
	}

	pub fn session_refresh_window(&self) -> chrono::Duration {
		chrono::Duration::seconds(i64::try_from(self.session_refresh_window_secs).unwrap_or(i64::MAX))
	}
}

/// Tuning knobs for movement lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageConfig {
	/// Window in which a structurally identical movement is treated as a
	/// duplicate and not recorded twice, in seconds
	pub dedup_window_secs: u64,
}

impl Default for LineageConfig {
	fn default() -> Self {
		Self {
			dedup_window_secs: 5,
		}
	}
}

impl LineageConfig {
	pub fn dedup_window(&self) -> chrono::Duration {
		chrono::Duration::seconds(i64::try_from(self.dedup_window_secs).unwrap_or(i64::MAX))
	}
}

impl CoreConfig {
	const TARGET_VERSION: u32 = 2;

	/// Load configuration from a data directory, creating a default file if
	/// none exists and migrating older versions in place.
	pub fn load_from(data_dir: &Path) -> Result<Self, ConfigError> {
		let config_path = data_dir.join(CONFIG_FILE_NAME);

		if config_path.exists() {
			info!("Loading config from {:?}", config_path);
			let json = fs::read_to_string(&config_path)?;
			let mut config: CoreConfig = serde_json::from_str(&json)?;

			if config.version < Self::TARGET_VERSION {
				info!(
					"Migrating config from v{} to v{}",
					config.version,
					Self::TARGET_VERSION
				);
				config.migrate()?;
				config.save()?;
			}

			Ok(config)
		} else {
			warn!("No config found, creating default at {:?}", config_path);
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		}
	}

	/// Default configuration rooted at a specific data directory.
	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: Self::TARGET_VERSION,
			data_dir,
			log_level: "info".to_string(),
			queue: QueueConfig::default(),
			lineage: LineageConfig::default(),
		}
	}

	/// Save configuration to disk.
	pub fn save(&self) -> Result<(), ConfigError> {
		fs::create_dir_all(&self.data_dir)?;

		let config_path = self.data_dir.join(CONFIG_FILE_NAME);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)?;
		info!("Saved config to {:?}", config_path);
		Ok(())
	}

	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	/// Path of the durable queue database.
	pub fn store_path(&self) -> PathBuf {
		self.data_dir.join("offline_queue.db")
	}

	fn migrate(&mut self) -> Result<(), ConfigError> {
		match self.version {
			// v1 predates the lineage section; serde already filled the
			// default, we only stamp the version.
			1 => {
				self.version = 2;
				Ok(())
			}
			Self::TARGET_VERSION => Ok(()),
			v => Err(ConfigError::UnknownVersion(v)),
		}
	}
}
