//! # Event Bus
//!
//! An asynchronous, in-process publish/subscribe bus with hierarchical
//! namespaces, wildcard subscriptions and a graceful drain-on-close shutdown.
//!
//! ## Overview
//!
//! Components subscribe handlers to namespace patterns and publish events that
//! carry a namespace. Every matching handler runs as its own Tokio task. Closing
//! the bus stops new dispatch, removes all subscriptions and waits, optionally
//! bounded by a timeout, until every handler that already started has finished.
//!
//! ## Features
//!
//! * **Wildcards**: `order.created`, `order.*` (one segment), `order.**` (any depth).
//! * **Failure isolation**: handler errors and panics go to an error sink, never to
//!   the publisher or to sibling handlers.
//! * **Graceful shutdown**: `close(timeout)` drains in-flight work without polling.
//! * **Typed namespaces**: subscribe with [`Target::of`] through [`EventNamespace`].
//! * **Layered config**: [`load_config`] reads a file plus `RELAY__*` overrides.
//!
//! ## Lifecycle
//!
//! ```text
//! Open --close()--> Draining --drained / timeout--> Closed
//! ```
//!
//! # Example
//!
//! ```rust
//! use relay_event_bus::{Envelope, EventBus, EventBusError};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EventBusError> {
//!     let bus = EventBus::<Envelope<u64>>::new();
//!     let seen = Arc::new(AtomicUsize::new(0));
//!
//!     let counter = Arc::clone(&seen);
//!     bus.subscribe("user.**", move |_event: Arc<Envelope<u64>>| {
//!         let counter = Arc::clone(&counter);
//!         async move {
//!             counter.fetch_add(1, Ordering::SeqCst);
//!         }
//!     })?;
//!
//!     bus.publish(Envelope::new("user.created", 42))?;
//!     bus.publish(Envelope::new("user.profile.updated", 42))?;
//!
//!     bus.close(None).await?;
//!     assert_eq!(seen.load(Ordering::SeqCst), 2);
//!     Ok(())
//! }
//! ```

mod builder;
mod bus;
mod config;
mod error;
mod event;
pub mod handler;
mod inflight;
mod pattern;
mod registry;

pub use builder::EventBusBuilder;
pub use bus::{BusState, EventBus};
pub use config::{BusConfig, DEFAULT_MAX_LISTENERS, ENV_PREFIX, load_config};
pub use error::{EventBusError, EventBusErrorExt};
pub use event::{Envelope, Event, EventNamespace};
pub use handler::{BoxError, ErrorSink, HandlerInvocationError, HandlerResult, IntoHandlerResult};
pub use pattern::{
    DEFAULT_DEEP_WILDCARD, DEFAULT_DELIMITER, Pattern, PatternSyntax, Segment, WILDCARD_SINGLE,
    matches,
};
pub use registry::{SubscriptionId, Target};
