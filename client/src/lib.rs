//! # Tidy Client
//!
//! Async runtime around [`tidy_engine`]: consumes the remote change stream,
//! dispatches local mutations to the write API and publishes the reconciled
//! snapshot.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidy_client::{Config, HttpShapeSource, HttpWriteApi, SyncCoordinator};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let client = reqwest::Client::new();
//! let todos = SyncCoordinator::start(
//!     Arc::new(HttpShapeSource::from_config(client.clone(), &config)),
//!     Arc::new(HttpWriteApi::from_config(client, &config)),
//!     config.sync.clone(),
//! );
//!
//! let handle = todos.insert("buy milk")?;
//! assert!(todos.query().iter().any(|t| t.text == "buy milk"));
//! handle.confirmed().await?;
//!
//! todos.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
mod dispatcher;
pub mod error;
pub mod events;
pub mod http;
mod state;
pub mod transport;

pub use config::{Config, ConfigError, SyncOptions};
pub use coordinator::{now_millis, Mutation, SyncCoordinator};
pub use error::{ClientError, Result};
pub use events::{MutationHandle, MutationOutcome, SyncEvent};
pub use http::{HttpShapeSource, HttpWriteApi};
pub use transport::{ChangeSource, WriteAck, WriteApi};
