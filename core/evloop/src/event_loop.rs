//! The event loop: one subscription table, one bounded queue and a dispatch
//! strategy chosen at creation.
//!
//! # Dispatch strategies
//! - **Dedicated**: a named worker thread waits on the queue and dispatches
//!   every event it receives. Publishers only ever wait for queue capacity.
//!   The worker takes the dispatch lock per event, so table changes from
//!   other threads interleave with a long drain.
//! - **Manual**: nothing dispatches until a caller runs [`EventLoop::pump`].
//!   Publishers first take the dispatch lock, so a publish from another thread
//!   waits for a running pump batch to finish.
//!
//! Only one consumer takes events off a queue at a time, so events are
//! dispatched in the order they were enqueued even when several threads pump.
//!
//! The dispatch lock is re-entrant: a callback running inside a batch may
//! publish to, subscribe on, or even delete its own loop.
//!
//! # Example
//! ```
//! use evloop::{Callback, Context, Event, EventBase, EventLoop, LoopConfig};
//! use std::time::Duration;
//!
//! const TIMER: EventBase = EventBase::new("timer");
//!
//! let lp = EventLoop::new(LoopConfig::manual(8))?;
//! lp.subscribe(TIMER, 1, &Callback::new(|_: &Context, ev: &Event<'_>| {
//!     assert_eq!(ev.bytes(), b"tick");
//! }), Context::none())?;
//!
//! lp.publish(TIMER, 1, b"tick", Duration::ZERO)?;
//! lp.pump(Duration::ZERO)?;
//! assert_eq!(lp.dump()[0].invocations, 1);
//! lp.delete()?;
//! # Ok::<(), evloop::EventLoopError>(())
//! ```

use std::cell::Cell;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::config::LoopConfig;
use crate::dispatcher;
use crate::error::{EventLoopError, Result};
use crate::event::{validate_publishable, DisplayId, EventBase, EventId, QueuedEvent};
use crate::queue::{Deadline, EventQueue, QueueError};
use crate::subscription::{Callback, Context, SubscriptionStat, SubscriptionToken};
use crate::table::SubscriptionTable;

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Dispatch batches running on this thread, over all loops.
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as dispatching until dropped.
struct DispatchScope;

impl DispatchScope {
    fn enter() -> Self {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
        DispatchScope
    }

    fn active() -> bool {
        DISPATCH_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for DispatchScope {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn lock_until(lock: &ReentrantMutex<()>, deadline: Deadline) -> Option<ReentrantMutexGuard<'_, ()>> {
    match deadline {
        Deadline::Never => Some(lock.lock()),
        Deadline::At(at) => lock.try_lock_until(at),
    }
}

/// Loop-level counters, as returned by [`EventLoop::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    /// Events accepted into the queue.
    pub events_received: u64,
    /// Publishes that passed validation but were not enqueued.
    pub events_dropped: u64,
    pub events_dispatched: u64,
    /// Callback invocations that panicked.
    pub handler_panics: u64,
    pub queue_len: usize,
    pub queue_capacity: usize,
    /// Live subscriptions.
    pub subscriptions: usize,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    dropped: AtomicU64,
    dispatched: AtomicU64,
    panics: AtomicU64,
}

enum DispatchMode {
    Dedicated {
        worker: Mutex<Option<JoinHandle<()>>>,
    },
    Manual,
}

struct LoopInner {
    id: u64,
    name: Option<String>,
    table: Mutex<SubscriptionTable>,
    queue: EventQueue,
    /// Held while a callback runs, by manual publishers, and by table mutations.
    /// A manual batch holds it from the first event until the queue is drained.
    dispatch_lock: ReentrantMutex<()>,
    /// Held by whichever thread is taking events off the queue.
    pump_lock: Arc<ReentrantMutex<()>>,
    mode: DispatchMode,
    deleted: AtomicBool,
    counters: Counters,
}

impl LoopInner {
    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Dispatches `first`, then everything already queued, without waiting.
    ///
    /// The caller holds `pump_lock`.
    fn dispatch_batch(&self, first: QueuedEvent) {
        let _scope = DispatchScope::enter();
        let _batch = match self.mode {
            DispatchMode::Manual => Some(self.dispatch_lock.lock()),
            DispatchMode::Dedicated { .. } => None,
        };
        let mut next = Some(first);

        while let Some(event) = next {
            let dispatch = self.dispatch_lock.lock();
            if self.is_deleted() {
                break;
            }
            let report = dispatcher::dispatch_one(&self.table, &event);
            self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            if report.panicked > 0 {
                self.counters
                    .panics
                    .fetch_add(report.panicked as u64, Ordering::Relaxed);
            }
            // Hand the lock to a waiting subscriber before the next event.
            ReentrantMutexGuard::unlock_fair(dispatch);
            next = self.queue.try_recv();
        }
    }
}

impl Drop for LoopInner {
    fn drop(&mut self) {
        // Last handle gone without delete(): stop the worker.
        self.queue.close();
    }
}

fn run_worker(inner: Weak<LoopInner>, queue: EventQueue, pump_lock: Arc<ReentrantMutex<()>>) {
    loop {
        let _consumer = pump_lock.lock();
        match queue.recv(Deadline::Never) {
            Ok(Some(event)) => {
                let Some(inner) = inner.upgrade() else { break };
                inner.dispatch_batch(event);
            }
            Ok(None) => continue,
            Err(_) => break,
        }
    }
    debug!(thread = ?thread::current().name(), "dispatch thread exiting");
}

/// Handle to an event loop. Clones share the same loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<LoopInner>,
}

impl EventLoop {
    /// Creates a loop, spawning its worker thread when `config.task` is set.
    pub fn new(config: LoopConfig) -> Result<Self> {
        if config.queue_size == 0 {
            return Err(EventLoopError::invalid_arg("queue size must be at least 1"));
        }
        if let Some(task) = &config.task {
            if task.name.contains('\0') {
                return Err(EventLoopError::invalid_arg("task name contains a NUL byte"));
            }
        }

        let id = NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed);
        let mode = match config.task {
            Some(_) => DispatchMode::Dedicated {
                worker: Mutex::new(None),
            },
            None => DispatchMode::Manual,
        };
        let inner = Arc::new(LoopInner {
            id,
            name: config.task.as_ref().map(|t| t.name.clone()),
            table: Mutex::new(SubscriptionTable::new(id)),
            queue: EventQueue::new(config.queue_size),
            dispatch_lock: ReentrantMutex::new(()),
            pump_lock: Arc::new(ReentrantMutex::new(())),
            mode,
            deleted: AtomicBool::new(false),
            counters: Counters::default(),
        });

        if let (Some(task), DispatchMode::Dedicated { worker }) = (&config.task, &inner.mode) {
            let mut builder = thread::Builder::new().name(task.name.clone());
            if let Some(size) = task.stack_size {
                builder = builder.stack_size(size);
            }

            let weak = Arc::downgrade(&inner);
            let queue = inner.queue.clone();
            let pump_lock = Arc::clone(&inner.pump_lock);
            let handle = builder.spawn(move || run_worker(weak, queue, pump_lock)).map_err(|e| {
                error!(loop_id = id, task = %task.name, error = %e, "failed to spawn dispatch thread");
                EventLoopError::NoMemory {
                    size: task.stack_size.unwrap_or(0),
                }
            })?;
            *worker.lock() = Some(handle);
        }

        info!(
            loop_id = id,
            name = ?inner.name,
            queue_size = config.queue_size,
            dedicated = config.task.is_some(),
            "event loop created"
        );
        Ok(Self { inner })
    }

    /// Stops the loop and drops its subscriptions and pending events.
    ///
    /// Every later call on any handle of this loop fails with `InvalidState`.
    /// May be called from one of the loop's own callbacks; the current batch
    /// stops after that callback's event.
    pub fn delete(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.deleted.swap(true, Ordering::AcqRel) {
            return Err(EventLoopError::invalid_state("event loop already deleted"));
        }
        inner.queue.close();

        if let DispatchMode::Dedicated { worker } = &inner.mode {
            let handle = worker.lock().take();
            if let Some(handle) = handle {
                if handle.thread().id() == thread::current().id() {
                    debug!(loop_id = inner.id, "deleted from its own dispatch thread, detaching");
                } else if handle.join().is_err() {
                    warn!(loop_id = inner.id, "dispatch thread terminated by panic");
                }
            }
        }

        let _dispatch = inner.dispatch_lock.lock();
        let discarded = inner.queue.clear();
        inner.table.lock().clear();
        info!(loop_id = inner.id, name = ?inner.name, discarded, "event loop deleted");
        Ok(())
    }

    /// Registers `callback` for events matching the filter.
    ///
    /// Registering the same callback again under the same filter replaces the
    /// context of the existing registration.
    ///
    /// Called from outside any callback, this waits for the event being
    /// dispatched. Called from a callback of another loop, it does not wait
    /// for this loop's running callback, so two loops can change each other's
    /// tables from their handlers.
    pub fn subscribe(
        &self,
        base: EventBase,
        id: EventId,
        callback: &Callback,
        context: Context,
    ) -> Result<()> {
        self.with_table(|table| table.subscribe(base, id, callback, context, false))
            .map(|_| ())
    }

    /// Registers `callback` as a new, independent registration and returns its token.
    pub fn subscribe_instance(
        &self,
        base: EventBase,
        id: EventId,
        callback: &Callback,
        context: Context,
    ) -> Result<SubscriptionToken> {
        self.with_table(|table| table.subscribe(base, id, callback, context, true))
    }

    /// Removes every registration of `callback` under exactly this filter.
    pub fn unsubscribe(&self, base: EventBase, id: EventId, callback: &Callback) -> Result<()> {
        self.with_table(|table| table.unsubscribe_by_callback(base, id, callback))
            .map(|_| ())
    }

    /// Removes the registration identified by `token`.
    pub fn unsubscribe_instance(
        &self,
        base: EventBase,
        id: EventId,
        token: SubscriptionToken,
    ) -> Result<()> {
        self.with_table(|table| table.unsubscribe_by_token(base, id, token))
            .map(|_| ())
    }

    /// Copies `data` into a new event and enqueues it.
    ///
    /// `timeout` bounds the wait for queue capacity and, on a manual loop, for
    /// the dispatch lock. Both waits share one deadline measured from the call,
    /// so time spent waiting for a running pump counts against the capacity
    /// wait. `Duration::ZERO` never blocks and
    /// [`WAIT_FOREVER`](crate::WAIT_FOREVER) never times out. On `Timeout` the
    /// event was not enqueued.
    pub fn publish(&self, base: EventBase, id: EventId, data: &[u8], timeout: Duration) -> Result<()> {
        self.ensure_active()?;
        validate_publishable(base, id)?;

        let result = self.enqueue(base, id, data, timeout);
        let counters = &self.inner.counters;
        match &result {
            Ok(()) => {
                counters.received.fetch_add(1, Ordering::Relaxed);
                trace!(loop_id = self.inner.id, %base, id, size = data.len(), "event queued");
            }
            Err(err) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(loop_id = self.inner.id, %base, id, error = %err, "event dropped");
            }
        }
        result
    }

    /// Publishes an event without payload.
    pub fn publish_empty(&self, base: EventBase, id: EventId, timeout: Duration) -> Result<()> {
        self.publish(base, id, &[], timeout)
    }

    fn enqueue(&self, base: EventBase, id: EventId, data: &[u8], timeout: Duration) -> Result<()> {
        let event = QueuedEvent::copy_from(base, id, data)?;
        let deadline = Deadline::after(timeout);

        let _dispatch = match self.inner.mode {
            DispatchMode::Dedicated { .. } => None,
            DispatchMode::Manual => Some(
                lock_until(&self.inner.dispatch_lock, deadline)
                    .ok_or(EventLoopError::Timeout { timeout })?,
            ),
        };

        self.inner.queue.send(event, deadline).map_err(|err| match err {
            QueueError::Full => EventLoopError::Timeout { timeout },
            QueueError::Closed => EventLoopError::invalid_state("event loop deleted"),
        })
    }

    /// Waits up to `timeout` for an event, then dispatches it and everything
    /// already queued behind it on the calling thread.
    ///
    /// Concurrent pumps take turns: `timeout` also bounds the wait for another
    /// pump to finish its batch. Finding nothing to dispatch is not an error.
    pub fn pump(&self, timeout: Duration) -> Result<()> {
        self.ensure_active()?;

        let deadline = Deadline::after(timeout);
        let Some(_consumer) = lock_until(&self.inner.pump_lock, deadline) else {
            return Ok(());
        };
        match self.inner.queue.recv(deadline) {
            Ok(Some(event)) => {
                self.inner.dispatch_batch(event);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(_) => Err(EventLoopError::invalid_state("event loop deleted")),
        }
    }

    /// Profiling rows for every live subscription, in registration order.
    pub fn dump(&self) -> Vec<SubscriptionStat> {
        self.inner.table.lock().stats()
    }

    pub fn stats(&self) -> LoopStats {
        let inner = &self.inner;
        LoopStats {
            events_received: inner.counters.received.load(Ordering::Relaxed),
            events_dropped: inner.counters.dropped.load(Ordering::Relaxed),
            events_dispatched: inner.counters.dispatched.load(Ordering::Relaxed),
            handler_panics: inner.counters.panics.load(Ordering::Relaxed),
            queue_len: inner.queue.len(),
            queue_capacity: inner.queue.capacity(),
            subscriptions: inner.table.lock().len(),
        }
    }

    /// Writes a human readable profile of the loop and its handlers.
    pub fn write_dump<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        let stats = self.stats();
        writeln!(
            out,
            "event loop {} (id {})",
            self.name().unwrap_or("<manual>"),
            self.id()
        )?;
        writeln!(
            out,
            "  received={} dropped={} dispatched={} panics={} queued={}/{}",
            stats.events_received,
            stats.events_dropped,
            stats.events_dispatched,
            stats.handler_panics,
            stats.queue_len,
            stats.queue_capacity,
        )?;
        for row in self.dump() {
            writeln!(
                out,
                "    handler {} ev:{},{} inv:{} time:{} us",
                row.callback,
                row.base,
                DisplayId(row.id),
                row.invocations,
                row.total_exec_time.as_micros(),
            )?;
        }
        Ok(())
    }

    /// Worker thread name; `None` for manual loops.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Process-unique loop id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn has_dedicated_thread(&self) -> bool {
        matches!(self.inner.mode, DispatchMode::Dedicated { .. })
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.is_deleted()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.inner.is_deleted() {
            return Err(EventLoopError::invalid_state("event loop deleted"));
        }
        Ok(())
    }

    /// Table mutations wait for the callback in flight, so a handler is never
    /// running once its unsubscribe has returned on another thread.
    ///
    /// From inside a dispatch the lock is only tried, never waited for.
    fn with_table<T>(&self, f: impl FnOnce(&mut SubscriptionTable) -> Result<T>) -> Result<T> {
        self.ensure_active()?;
        let _dispatch = if DispatchScope::active() {
            self.inner.dispatch_lock.try_lock()
        } else {
            Some(self.inner.dispatch_lock.lock())
        };
        self.ensure_active()?;
        let mut table = self.inner.table.lock();
        f(&mut table)
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("dedicated", &self.has_dedicated_thread())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
