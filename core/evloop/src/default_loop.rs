//! Process-wide default event loop.
//!
//! The default loop is created and deleted explicitly, can be re-created after
//! deletion, and always runs on a dedicated dispatch thread. Until it exists
//! every function here fails with `InvalidState`.
//!
//! # Design
//! - The registry is a `parking_lot::Mutex<Option<EventLoop>>`
//! - Forwarders clone the handle and release the registry lock before calling
//!   into the loop, so a blocking publish never holds up other callers and a
//!   callback may use the default loop freely
//!
//! ```
//! use evloop::{create_default, delete_default, publish_default, EventBase};
//! use std::time::Duration;
//!
//! const APP: EventBase = EventBase::new("app");
//!
//! create_default()?;
//! publish_default(APP, 0, b"started", Duration::from_millis(10))?;
//! delete_default()?;
//! # Ok::<(), evloop::EventLoopError>(())
//! ```

use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::config::{LoopConfig, TaskConfig, DEFAULT_TASK_NAME};
use crate::error::{EventLoopError, Result};
use crate::event::{EventBase, EventId};
use crate::event_loop::EventLoop;
use crate::subscription::{Callback, Context, SubscriptionStat, SubscriptionToken};

static DEFAULT_LOOP: Mutex<Option<EventLoop>> = Mutex::new(None);

const NOT_CREATED: &str = "default event loop not created";

/// Creates the default loop with [`LoopConfig::default_loop`].
pub fn create_default() -> Result<()> {
    create_default_with(LoopConfig::default_loop())
}

/// Creates the default loop. A config without a task gets the default one.
pub fn create_default_with(mut config: LoopConfig) -> Result<()> {
    let mut slot = DEFAULT_LOOP.lock();
    if slot.as_ref().is_some_and(|lp| !lp.is_deleted()) {
        return Err(EventLoopError::invalid_state("default event loop already created"));
    }

    if config.task.is_none() {
        config.task = Some(TaskConfig::new(DEFAULT_TASK_NAME));
    }
    let lp = EventLoop::new(config)?;
    info!(loop_id = lp.id(), "default event loop created");
    *slot = Some(lp);
    Ok(())
}

/// Deletes the default loop, joining its dispatch thread.
pub fn delete_default() -> Result<()> {
    let lp = DEFAULT_LOOP
        .lock()
        .take()
        .ok_or(EventLoopError::invalid_state(NOT_CREATED))?;

    // Someone may have deleted it through a handle from `default_loop()`.
    if lp.is_deleted() {
        return Err(EventLoopError::invalid_state(NOT_CREATED));
    }
    lp.delete()?;
    info!(loop_id = lp.id(), "default event loop deleted");
    Ok(())
}

/// Handle to the default loop.
pub fn default_loop() -> Result<EventLoop> {
    DEFAULT_LOOP
        .lock()
        .as_ref()
        .filter(|lp| !lp.is_deleted())
        .cloned()
        .ok_or(EventLoopError::invalid_state(NOT_CREATED))
}

pub fn subscribe_default(
    base: EventBase,
    id: EventId,
    callback: &Callback,
    context: Context,
) -> Result<()> {
    default_loop()?.subscribe(base, id, callback, context)
}

pub fn subscribe_instance_default(
    base: EventBase,
    id: EventId,
    callback: &Callback,
    context: Context,
) -> Result<SubscriptionToken> {
    default_loop()?.subscribe_instance(base, id, callback, context)
}

pub fn unsubscribe_default(base: EventBase, id: EventId, callback: &Callback) -> Result<()> {
    default_loop()?.unsubscribe(base, id, callback)
}

pub fn unsubscribe_instance_default(
    base: EventBase,
    id: EventId,
    token: SubscriptionToken,
) -> Result<()> {
    default_loop()?.unsubscribe_instance(base, id, token)
}

pub fn publish_default(base: EventBase, id: EventId, data: &[u8], timeout: Duration) -> Result<()> {
    default_loop()?.publish(base, id, data, timeout)
}

pub fn dump_default() -> Result<Vec<SubscriptionStat>> {
    Ok(default_loop()?.dump())
}
