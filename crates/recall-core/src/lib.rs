//! recall-core library.
//!
//! Keeps a shadow copy of every message a host messaging app delivers so
//! that, once the sender retracts it, the removed content can still be
//! shown.
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums with an [`error::ErrorCode`] at module
//!   seams; `anyhow::Result` for config and file setup.
//! - **Logging**: `tracing` macros with structured fields.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod gateway;
pub mod host;
pub mod lock;
pub mod model;
pub mod purge;
pub mod resolver;
pub mod store;
pub mod sync;

pub use engine::{EngineOptions, RecallEngine, StartError};
pub use event::LifecycleEvent;
pub use model::{HostMessage, MessageRecord};
pub use store::ShadowStore;
