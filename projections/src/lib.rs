//! Projection fan-out for Eventide.
//!
//! # Overview
//!
//! This crate routes raised events to the read models interested in them:
//! - **[`ProjectionRegistry`]**: which projection handles which event type
//! - **[`ProjectionDispatcher`]**: bounded queue, bounded concurrency, per-item
//!   timeout, retry and dead letters
//! - **[`ProjectionOptions`]**: validated dispatcher settings
//!
//! The dispatcher implements [`ProjectionSink`](eventide_core::projection::ProjectionSink),
//! so it plugs straight into an aggregate controller:
//!
//! ```text
//! AggregateController::raise ──► ProjectionDispatcher::dispatch ──► mpsc (bounded, lossy)
//!                                                                        │
//!                                                    worker: batch ──► Semaphore ──► Projection
//! ```
//!
//! # Example
//!
//! ```
//! use eventide_projections::{ProjectionDispatcher, ProjectionOptions, ProjectionRegistry};
//! use eventide_core::projection::ProjectionSink;
//! use eventide_core::stream::{StreamId, Version};
//! use eventide_testing::RecordingProjection;
//! use eventide_testing::bank::{AccountEvent, deposited};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = Arc::new(ProjectionRegistry::<AccountEvent>::new());
//! let balances = Arc::new(RecordingProjection::new("balances", vec!["Account.Deposited.v1"]));
//! registry.register(balances.clone()).unwrap();
//!
//! let dispatcher = ProjectionDispatcher::start(registry, ProjectionOptions::default()).unwrap();
//! let owner = StreamId::for_aggregate("account", "1");
//! let receipt = dispatcher.dispatch(&owner, Version::new(1), &deposited(5));
//! assert_eq!(receipt.queued, 1);
//!
//! dispatcher.shutdown().await;
//! assert_eq!(balances.applied().len(), 1);
//! # }
//! ```

pub mod dispatcher;
pub mod options;
pub mod registry;

pub use dispatcher::{DispatchOutcome, ProjectionDispatcher, WorkItem};
pub use options::{OptionsError, ProjectionOptions};
pub use registry::ProjectionRegistry;
