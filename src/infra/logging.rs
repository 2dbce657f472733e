//! Tracing setup with console and rolling file output.

use crate::infra::config::CoreConfig;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the core.
///
/// Logs to stdout and to a daily-rotated file under `{data_dir}/logs/`. The
/// `RUST_LOG` environment variable overrides the configured level. Returns
/// the appender guard, which must stay alive for file logging to flush;
/// returns `None` if a subscriber was already installed (useful in tests).
pub fn init(config: &CoreConfig) -> std::io::Result<Option<WorkerGuard>> {
	let logs_dir = config.logs_dir();
	std::fs::create_dir_all(&logs_dir)?;

	let (non_blocking, guard) = tracing_appender::non_blocking(file_appender(&logs_dir));

	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(format!("warn,atelier_core={}", config.log_level)));

	let installed = tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_target(true))
		.with(
			fmt::layer()
				.with_target(true)
				.with_ansi(false)
				.with_writer(non_blocking),
		)
		.try_init()
		.is_ok();

	Ok(installed.then_some(guard))
}

fn file_appender(logs_dir: &Path) -> RollingFileAppender {
	RollingFileAppender::new(Rotation::DAILY, logs_dir, "atelier-core.log")
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn creates_logs_directory() {
		let dir = TempDir::new().unwrap();
		let config = CoreConfig::default_with_dir(dir.path().to_path_buf());

		let _guard = init(&config).unwrap();
		assert!(dir.path().join("logs").exists());
	}
}
