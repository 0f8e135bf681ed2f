//! Subscription records and the callback/context handles they hold.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use crate::event::{DisplayId, Event, EventBase, EventId};

type CallbackFn = dyn Fn(&Context, &Event<'_>) + Send + Sync;

/// Shareable event handler.
///
/// Identity matters: re-subscribing with a clone of the same `Callback` updates
/// the existing registration, and unsubscribing by callback matches clones of
/// the registered value. Two callbacks built from identical closures are
/// still different callbacks.
///
/// ```
/// use evloop::{Callback, Context, Event};
///
/// let cb = Callback::new(|_ctx: &Context, ev: &Event<'_>| println!("{} {}", ev.base, ev.id));
/// assert!(cb.same_as(&cb.clone()));
/// ```
#[derive(Clone)]
pub struct Callback {
    name: Arc<str>,
    func: Arc<CallbackFn>,
}

impl Callback {
    /// Wraps `f`, naming it after its type for dumps.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Context, &Event<'_>) + Send + Sync + 'static,
    {
        Self::named(type_name::<F>(), f)
    }

    pub fn named<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(&Context, &Event<'_>) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` if both handles refer to the same registered closure.
    pub fn same_as(&self, other: &Callback) -> bool {
        self.addr() == other.addr()
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.func) as *const () as usize
    }

    pub(crate) fn call(&self, ctx: &Context, event: &Event<'_>) {
        (self.func)(ctx, event)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.name, self.addr())
    }
}

/// Opaque per-registration argument handed back to the callback.
#[derive(Clone, Default)]
pub struct Context(Option<Arc<dyn Any + Send + Sync>>);

impl Context {
    pub fn none() -> Self {
        Context(None)
    }

    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Context(Some(Arc::new(value)))
    }

    /// Shares an existing `Arc`, so the caller keeps observing the same value.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Context(Some(value))
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref()?.downcast_ref::<T>()
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => write!(f, "Context({:p})", Arc::as_ptr(value)),
            None => f.write_str("Context(none)"),
        }
    }
}

/// Handle identifying one registration, returned by subscribe calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    pub(crate) loop_id: u64,
    pub(crate) seq: u64,
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sub({}:{})", self.loop_id, self.seq)
    }
}

/// One registered callback together with its filter and profiling counters.
pub(crate) struct Subscription {
    pub base_filter: EventBase,
    pub id_filter: EventId,
    pub callback: Callback,
    pub context: RwLock<Context>,
    pub token: SubscriptionToken,
    /// Registration order; never changes after insertion.
    pub sequence: u64,
    pub instance: bool,
    alive: AtomicBool,
    invocations: AtomicU64,
    exec_nanos: AtomicU64,
}

impl Subscription {
    pub fn new(
        base_filter: EventBase,
        id_filter: EventId,
        callback: Callback,
        context: Context,
        token: SubscriptionToken,
        instance: bool,
    ) -> Self {
        Self {
            base_filter,
            id_filter,
            callback,
            context: RwLock::new(context),
            token,
            sequence: token.seq,
            instance,
            alive: AtomicBool::new(true),
            invocations: AtomicU64::new(0),
            exec_nanos: AtomicU64::new(0),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Marks the entry dead. Returns `true` if it was alive.
    pub fn tombstone(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub fn matches_filter(&self, base: EventBase, id: EventId) -> bool {
        self.base_filter == base && self.id_filter == id
    }

    pub fn record_invocation(&self, elapsed: Duration) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.exec_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn stat(&self) -> SubscriptionStat {
        SubscriptionStat {
            base: self.base_filter.to_string(),
            id: self.id_filter,
            callback: format!("{:?}", self.callback),
            invocations: self.invocations.load(Ordering::Relaxed),
            total_exec_time: Duration::from_nanos(self.exec_nanos.load(Ordering::Relaxed)),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("base", &self.base_filter)
            .field("id", &DisplayId(self.id_filter).to_string())
            .field("callback", &self.callback)
            .field("token", &self.token)
            .field("instance", &self.instance)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Diagnostics row for one live subscription, as returned by `dump`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStat {
    /// Base filter, `ANY_BASE` for loop-wide registrations.
    pub base: String,
    /// Id filter, [`ANY_ID`](crate::ANY_ID) for base-wide registrations.
    pub id: EventId,
    /// Callback name and address.
    pub callback: String,
    pub invocations: u64,
    pub total_exec_time: Duration,
}
