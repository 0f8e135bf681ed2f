//! Delivery of one dequeued event to its matching subscriptions.
//!
//! ## Rules
//! - **Tier order**: `(base, id)` handlers, then `(base, ANY_ID)`, then `(ANY_BASE, ANY_ID)`
//! - **Registration order** within a tier
//! - **No lock held across callbacks**: the table lock only covers the snapshot
//!   and the final purge, so callbacks may (un)subscribe on their own loop
//! - **Liveness re-checked** before every call, so an entry tombstoned earlier
//!   in the same pass is skipped
//! - **Panic isolation**: a panicking callback is logged and counted, and the
//!   pass continues with the next subscription
//!
//! **Warning**: `AssertUnwindSafe` is used, so state a callback shares through
//! its context may be left half-updated if that callback panics.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{error, trace};

use crate::event::{DisplayId, QueuedEvent};
use crate::table::SubscriptionTable;

/// What happened while dispatching one event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DispatchReport {
    /// Callbacks that were called (including ones that panicked).
    pub invoked: usize,
    /// Callbacks that panicked.
    pub panicked: usize,
}

/// Invokes every live subscription matching `event`.
pub(crate) fn dispatch_one(table: &Mutex<SubscriptionTable>, event: &QueuedEvent) -> DispatchReport {
    let tiers = {
        let mut table = table.lock();
        table.begin_pass();
        table.lookup(event.base, event.id)
    };

    let view = event.as_event();
    let mut report = DispatchReport::default();

    for sub in tiers.iter() {
        if !sub.is_alive() {
            continue;
        }

        let context = sub.context.read().clone();
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| sub.callback.call(&context, &view)));
        sub.record_invocation(started.elapsed());
        report.invoked += 1;

        if let Err(payload) = outcome {
            report.panicked += 1;
            error!(
                base = %event.base,
                id = %DisplayId(event.id),
                callback = ?sub.callback,
                panic = %panic_message(payload.as_ref()),
                "event handler panicked"
            );
        }
    }

    table.lock().end_pass();
    trace!(base = %event.base, id = %DisplayId(event.id), invoked = report.invoked, "event dispatched");
    report
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
