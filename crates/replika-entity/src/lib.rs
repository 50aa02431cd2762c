//! # replika-entity
//!
//! Replicated entities: user-defined command handlers over a tree of
//! Replicated Data, with local changes flushed as deltas after every
//! successful command.
//!
//! # Quick Start
//!
//! ```rust
//! use replika_core::Counter;
//! use replika_entity::{CommandHandlers, EntityConfig, EntityRegistry, MemorySink, Reply};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = EntityConfig::builder()
//!     .entity_type("counter")
//!     .replica_id("replica-a")
//!     .build();
//! let sink = MemorySink::new();
//! let registry = EntityRegistry::new(config, Arc::new(sink.clone()), |_| {
//!     Box::new(
//!         CommandHandlers::new()
//!             .with_default_value(|_| Some(Counter::new().into()))
//!             .on("Increment", |command, ctx| {
//!                 let amount = command.payload.as_int().unwrap_or(1);
//!                 let counter = ctx.state_mut()?.as_counter_mut().unwrap();
//!                 counter.increment(amount)?;
//!                 Ok(Reply::message(counter.value()))
//!             }),
//!     )
//! });
//!
//! let reply = registry.command("counter-1", "Increment", 5).await.unwrap();
//! assert_eq!(reply, Reply::message(5));
//! // The new counter travels to other replicas
//! assert_eq!(sink.len(), 1);
//! # });
//! ```
//!
//! # Architecture
//!
//! - [`session`] - One entity's lifecycle and command scopes
//! - [`context`] - The handler's view of the entity during a command
//! - [`entity`] - The entity behaviour trait and a closure-table entity
//! - [`runner`] - One task per active entity, with idle passivation
//! - [`registry`] - Activation, routing and snapshots for an entity type
//! - [`sink`] - Where flushed deltas go

pub mod clock;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod registry;
pub mod reply;
pub mod runner;
pub mod session;
pub mod sink;
pub mod state;

pub use clock::{ManualClock, SystemClock, WallClock};
pub use config::{EntityConfig, EntityConfigBuilder, PassivationStrategy, WriteConsistency};
pub use context::CommandContext;
pub use entity::{CommandHandlers, ReplicatedEntity};
pub use error::{EntityError, Result};
pub use registry::{EntityFactory, EntityRegistry};
pub use reply::{Command, CommandOutcome, HandlerError, OutgoingDelta, Reply, Status};
pub use runner::{spawn_entity, EntityEvent, EntityExit, EntityHandle, EntityRuntime};
pub use session::{Checkpoint, CommandScope, EntitySession};
pub use sink::{ChannelSink, DeltaSink, MemorySink};
pub use state::EntityState;
