//! # evloop
//!
//! Process-local event loops: components publish named events, and callbacks
//! subscribed with matching filters are invoked in a defined order.
//!
//! ## Features
//!
//! - **Wildcard filters**: subscribe to one `(base, id)`, to every id of a base
//!   ([`ANY_ID`]), or to everything on the loop ([`ANY_BASE`])
//! - **Ordered dispatch**: exact filters first, then base wildcards, then loop
//!   wildcards, each in registration order
//! - **Backpressure**: fixed-capacity queues, publish with a timeout
//! - **Two dispatch modes**: a dedicated worker thread, or caller-driven [`EventLoop::pump`]
//! - **Safe mutation**: callbacks may (un)subscribe, including themselves, while dispatching
//! - **Profiling**: per-handler invocation counts and execution time via [`EventLoop::dump`]
//!
//! ## Example
//!
//! ```rust
//! use evloop::{Callback, Context, Event, EventBase, EventLoop, LoopConfig, ANY_ID, WAIT_FOREVER};
//! use std::time::Duration;
//!
//! const WIFI: EventBase = EventBase::new("wifi");
//!
//! let lp = EventLoop::new(LoopConfig::dedicated(16, "net_evt"))?;
//! let (tx, rx) = flume::unbounded();
//!
//! lp.subscribe(WIFI, ANY_ID, &Callback::new(move |_: &Context, ev: &Event<'_>| {
//!     let _ = tx.send((ev.id, ev.bytes().to_vec()));
//! }), Context::none())?;
//!
//! lp.publish(WIFI, 3, b"connected", WAIT_FOREVER)?;
//! assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (3, b"connected".to_vec()));
//! lp.delete()?;
//! # Ok::<(), evloop::EventLoopError>(())
//! ```

pub mod config;
pub mod default_loop;
pub mod error;
pub mod event;
pub mod event_loop;
pub mod subscription;

mod dispatcher;
mod queue;
mod table;

// Re-exports
pub use config::{LoopConfig, TaskConfig, DEFAULT_QUEUE_SIZE, DEFAULT_TASK_NAME};
pub use default_loop::{
    create_default, create_default_with, default_loop, delete_default, dump_default,
    publish_default, subscribe_default, subscribe_instance_default, unsubscribe_default,
    unsubscribe_instance_default,
};
pub use error::{EventLoopError, Result};
pub use event::{Event, EventBase, EventId, QueuedEvent, ANY_BASE, ANY_ID};
pub use event_loop::{EventLoop, LoopStats};
pub use queue::WAIT_FOREVER;
pub use subscription::{Callback, Context, SubscriptionStat, SubscriptionToken};
