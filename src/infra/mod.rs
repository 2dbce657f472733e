//! Infrastructure: durable storage, configuration, logging, and the
//! queue event bus.

pub mod config;
pub mod event;
pub mod logging;
pub mod store;

pub use config::{ConfigError, CoreConfig, LineageConfig, QueueConfig};
pub use event::{QueueEvent, QueueEventBus};
pub use store::{DurableStore, StoreError};
