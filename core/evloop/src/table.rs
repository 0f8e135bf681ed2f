//! Subscription table organised for matching by (base, id).
//!
//! # Layout
//! ```text
//! SubscriptionTable
//!   ├── any_base: [sub, sub, ..]              (ANY_BASE, ANY_ID)   tier 3
//!   └── bases: base -> BaseNode
//!         ├── any_id: [sub, ..]               (base, ANY_ID)       tier 2
//!         └── ids: id -> [sub, ..]            (base, id)           tier 1
//! ```
//! Every list is kept in registration order, so a lookup yields each tier
//! already sorted by sequence.
//!
//! # Mutation during dispatch
//! Dispatch works on a snapshot of `Arc<Subscription>`s taken by [`lookup`].
//! While a pass is open, unsubscribing only flips the `alive` flag; entries are
//! physically dropped once the outermost pass ends. A tombstoned entry is
//! never invoked again because the dispatcher re-checks `alive` before each call.
//!
//! [`lookup`]: SubscriptionTable::lookup

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::event::{validate_filter, DisplayId, EventBase, EventId, ANY_ID};
use crate::subscription::{Callback, Context, Subscription, SubscriptionStat, SubscriptionToken};

type SubList = Vec<Arc<Subscription>>;

#[derive(Default)]
struct BaseNode {
    any_id: SubList,
    ids: HashMap<EventId, SubList>,
}

impl BaseNode {
    fn is_empty(&self) -> bool {
        self.any_id.is_empty() && self.ids.is_empty()
    }
}

/// Matching subscriptions for one event, split by tier.
#[derive(Default)]
pub(crate) struct Tiers {
    /// `(base, id)` registrations.
    pub exact: SubList,
    /// `(base, ANY_ID)` registrations.
    pub base: SubList,
    /// `(ANY_BASE, ANY_ID)` registrations.
    pub any: SubList,
}

impl Tiers {
    /// Dispatch order: exact, then base wildcard, then loop wildcard.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Subscription>> {
        self.exact.iter().chain(self.base.iter()).chain(self.any.iter())
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.base.len() + self.any.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) struct SubscriptionTable {
    loop_id: u64,
    next_seq: u64,
    any_base: SubList,
    bases: HashMap<EventBase, BaseNode>,
    /// Number of dispatch passes currently iterating a snapshot.
    passes: usize,
    /// Tombstoned entries still physically present.
    tombstones: usize,
}

impl SubscriptionTable {
    pub fn new(loop_id: u64) -> Self {
        Self {
            loop_id,
            next_seq: 0,
            any_base: Vec::new(),
            bases: HashMap::new(),
            passes: 0,
            tombstones: 0,
        }
    }

    /// Registers `callback` under the given filter.
    ///
    /// Without `instance`, an existing live non-instance registration of the
    /// same callback under the same filter gets its context replaced and keeps
    /// its token and position. With `instance`, a new entry is always added.
    pub fn subscribe(
        &mut self,
        base: EventBase,
        id: EventId,
        callback: &Callback,
        context: Context,
        instance: bool,
    ) -> Result<SubscriptionToken> {
        validate_filter(base, id)?;

        if !instance {
            let existing = self.slot(base, id).and_then(|list| {
                list.iter()
                    .find(|s| s.is_alive() && !s.instance && s.callback.same_as(callback))
            });
            if let Some(existing) = existing {
                *existing.context.write() = context;
                debug!(
                    loop_id = self.loop_id,
                    %base,
                    id = %DisplayId(id),
                    callback = ?callback,
                    "handler already registered, context overwritten"
                );
                return Ok(existing.token);
            }
        }

        let token = SubscriptionToken {
            loop_id: self.loop_id,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        let sub = Subscription::new(base, id, callback.clone(), context, token, instance);
        self.slot_mut(base, id).push(Arc::new(sub));
        debug!(loop_id = self.loop_id, %base, id = %DisplayId(id), %token, instance, "subscribed");
        Ok(token)
    }

    /// Tombstones every live registration of `callback` under exactly this filter.
    ///
    /// Returns how many entries were removed; zero is not an error.
    pub fn unsubscribe_by_callback(
        &mut self,
        base: EventBase,
        id: EventId,
        callback: &Callback,
    ) -> Result<usize> {
        validate_filter(base, id)?;

        let removed = self.slot(base, id).map_or(0, |list| {
            list.iter()
                .filter(|s| s.callback.same_as(callback) && s.tombstone())
                .count()
        });
        self.tombstones += removed;
        self.purge_if_idle();

        debug!(loop_id = self.loop_id, %base, id = %DisplayId(id), callback = ?callback, removed, "unsubscribed by callback");
        Ok(removed)
    }

    /// Tombstones the registration owning `token`, if it sits under this filter.
    ///
    /// Stale, foreign or mismatched tokens are ignored. Returns whether an
    /// entry was removed.
    pub fn unsubscribe_by_token(
        &mut self,
        base: EventBase,
        id: EventId,
        token: SubscriptionToken,
    ) -> Result<bool> {
        validate_filter(base, id)?;

        if token.loop_id != self.loop_id {
            warn!(loop_id = self.loop_id, %token, "token belongs to another loop, ignoring");
            return Ok(false);
        }

        let found = self
            .slot(base, id)
            .and_then(|list| list.iter().find(|s| s.token == token))
            .map(|s| s.tombstone());

        let removed = match found {
            Some(removed) => removed,
            None => {
                debug!(loop_id = self.loop_id, %base, id = %DisplayId(id), %token, "no registration for token under this filter");
                false
            }
        };

        if removed {
            self.tombstones += 1;
            self.purge_if_idle();
            debug!(loop_id = self.loop_id, %base, id = %DisplayId(id), %token, "unsubscribed by token");
        }
        Ok(removed)
    }

    /// Live subscriptions matching a concrete `(base, id)`, split by tier.
    pub fn lookup(&self, base: EventBase, id: EventId) -> Tiers {
        let alive = |list: &SubList| -> SubList {
            list.iter().filter(|s| s.is_alive()).cloned().collect()
        };

        let mut tiers = Tiers {
            any: alive(&self.any_base),
            ..Tiers::default()
        };
        if let Some(node) = self.bases.get(&base) {
            tiers.base = alive(&node.any_id);
            if let Some(list) = node.ids.get(&id) {
                tiers.exact = alive(list);
            }
        }
        tiers
    }

    pub fn begin_pass(&mut self) {
        self.passes += 1;
    }

    pub fn end_pass(&mut self) {
        self.passes = self.passes.saturating_sub(1);
        self.purge_if_idle();
    }

    /// Tombstones everything; used when the owning loop is deleted.
    pub fn clear(&mut self) {
        let mut removed = self.any_base.iter().filter(|s| s.tombstone()).count();
        for node in self.bases.values() {
            removed += node.any_id.iter().filter(|s| s.tombstone()).count();
            for list in node.ids.values() {
                removed += list.iter().filter(|s| s.tombstone()).count();
            }
        }
        self.tombstones += removed;
        self.purge_if_idle();
    }

    /// Profiling rows for live registrations, in registration order.
    pub fn stats(&self) -> Vec<SubscriptionStat> {
        let mut live: Vec<&Arc<Subscription>> = self.iter_all().filter(|s| s.is_alive()).collect();
        live.sort_by_key(|s| s.sequence);
        live.into_iter().map(|s| s.stat()).collect()
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.iter_all().filter(|s| s.is_alive()).count()
    }

    /// Number of entries awaiting purge.
    pub fn pending_purge(&self) -> usize {
        self.tombstones
    }

    fn iter_all(&self) -> impl Iterator<Item = &Arc<Subscription>> {
        self.any_base.iter().chain(self.bases.values().flat_map(|node| {
            node.any_id.iter().chain(node.ids.values().flatten())
        }))
    }

    fn slot(&self, base: EventBase, id: EventId) -> Option<&SubList> {
        if base.is_any() {
            return Some(&self.any_base);
        }
        let node = self.bases.get(&base)?;
        if id == ANY_ID {
            Some(&node.any_id)
        } else {
            node.ids.get(&id)
        }
    }

    fn slot_mut(&mut self, base: EventBase, id: EventId) -> &mut SubList {
        if base.is_any() {
            return &mut self.any_base;
        }
        let node = self.bases.entry(base).or_default();
        if id == ANY_ID {
            &mut node.any_id
        } else {
            node.ids.entry(id).or_default()
        }
    }

    fn purge_if_idle(&mut self) {
        if self.passes > 0 || self.tombstones == 0 {
            return;
        }

        self.any_base.retain(|s| s.is_alive());
        self.bases.retain(|_, node| {
            node.any_id.retain(|s| s.is_alive());
            node.ids.retain(|_, list| {
                list.retain(|s| s.is_alive());
                !list.is_empty()
            });
            !node.is_empty()
        });
        self.tombstones = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, ANY_BASE};
    use crate::EventLoopError;

    const BASE1: EventBase = EventBase::new("base1");
    const BASE2: EventBase = EventBase::new("base2");

    fn cb(name: &'static str) -> Callback {
        Callback::named(name, |_: &Context, _: &Event<'_>| {})
    }

    fn names(list: &SubList) -> Vec<String> {
        list.iter().map(|s| s.callback.name().to_string()).collect()
    }

    #[test]
    fn test_lookup_splits_tiers() {
        let mut table = SubscriptionTable::new(1);
        table.subscribe(ANY_BASE, ANY_ID, &cb("any"), Context::none(), false).unwrap();
        table.subscribe(BASE1, ANY_ID, &cb("base"), Context::none(), false).unwrap();
        table.subscribe(BASE1, 1, &cb("exact"), Context::none(), false).unwrap();
        table.subscribe(BASE1, 2, &cb("other_id"), Context::none(), false).unwrap();
        table.subscribe(BASE2, ANY_ID, &cb("other_base"), Context::none(), false).unwrap();

        let tiers = table.lookup(BASE1, 1);
        assert_eq!(names(&tiers.exact), ["exact"]);
        assert_eq!(names(&tiers.base), ["base"]);
        assert_eq!(names(&tiers.any), ["any"]);
        assert_eq!(tiers.len(), 3);

        let order: Vec<&str> = tiers.iter().map(|s| s.callback.name()).collect();
        assert_eq!(order, ["exact", "base", "any"]);
    }

    #[test]
    fn test_lookup_unknown_base_only_hits_loop_tier() {
        let mut table = SubscriptionTable::new(1);
        table.subscribe(BASE1, 1, &cb("exact"), Context::none(), false).unwrap();
        assert!(table.lookup(BASE2, 1).is_empty());

        table.subscribe(ANY_BASE, ANY_ID, &cb("any"), Context::none(), false).unwrap();
        assert_eq!(table.lookup(BASE2, 1).len(), 1);
    }

    #[test]
    fn test_registration_order_within_tier() {
        let mut table = SubscriptionTable::new(1);
        for name in ["h0", "h1", "h2", "h3"] {
            table.subscribe(BASE1, 1, &cb(name), Context::none(), false).unwrap();
            // Unrelated registrations in other tiers must not reorder this one.
            table.subscribe(BASE1, ANY_ID, &cb(name), Context::none(), false).unwrap();
        }
        assert_eq!(names(&table.lookup(BASE1, 1).exact), ["h0", "h1", "h2", "h3"]);
    }

    #[test]
    fn test_any_base_with_specific_id_rejected() {
        let mut table = SubscriptionTable::new(1);
        let err = table.subscribe(ANY_BASE, 3, &cb("bad"), Context::none(), false).unwrap_err();
        assert!(matches!(err, EventLoopError::InvalidArgument { .. }));
        assert!(table.unsubscribe_by_callback(ANY_BASE, 3, &cb("bad")).is_err());
        let token = SubscriptionToken { loop_id: 1, seq: 0 };
        assert!(table.unsubscribe_by_token(ANY_BASE, 3, token).is_err());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_resubscribe_overwrites_context() {
        let mut table = SubscriptionTable::new(1);
        let handler = cb("h");
        let first = table.subscribe(BASE1, 1, &handler, Context::new(1u32), false).unwrap();
        let second = table.subscribe(BASE1, 1, &handler, Context::new(2u32), false).unwrap();

        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
        let tiers = table.lookup(BASE1, 1);
        assert_eq!(tiers.exact[0].context.read().get::<u32>(), Some(&2));
        assert_eq!(tiers.exact[0].sequence, first.seq);
    }

    #[test]
    fn test_instance_registrations_coexist() {
        let mut table = SubscriptionTable::new(1);
        let handler = cb("h");
        let a = table.subscribe(BASE1, 1, &handler, Context::new(1u32), true).unwrap();
        let b = table.subscribe(BASE1, 1, &handler, Context::new(2u32), true).unwrap();
        assert_ne!(a, b);
        assert_eq!(table.lookup(BASE1, 1).exact.len(), 2);

        // Removing by callback takes out every registration of it.
        assert_eq!(table.unsubscribe_by_callback(BASE1, 1, &handler).unwrap(), 2);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_unsubscribe_by_token_checks_filter() {
        let mut table = SubscriptionTable::new(1);
        let token = table.subscribe(BASE1, 1, &cb("h"), Context::none(), true).unwrap();

        assert!(!table.unsubscribe_by_token(BASE1, 2, token).unwrap());
        assert!(!table.unsubscribe_by_token(BASE2, 1, token).unwrap());
        assert_eq!(table.len(), 1);

        assert!(table.unsubscribe_by_token(BASE1, 1, token).unwrap());
        // Already gone: still succeeds.
        assert!(!table.unsubscribe_by_token(BASE1, 1, token).unwrap());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_foreign_token_ignored() {
        let mut table = SubscriptionTable::new(1);
        table.subscribe(BASE1, 1, &cb("h"), Context::none(), true).unwrap();
        let foreign = SubscriptionToken { loop_id: 2, seq: 0 };
        assert!(!table.unsubscribe_by_token(BASE1, 1, foreign).unwrap());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unsubscribe_any_id_leaves_exact_tier() {
        let mut table = SubscriptionTable::new(1);
        let handler = cb("h");
        table.subscribe(BASE1, ANY_ID, &handler, Context::none(), false).unwrap();
        table.subscribe(BASE1, 1, &handler, Context::none(), false).unwrap();

        table.unsubscribe_by_callback(BASE1, ANY_ID, &handler).unwrap();
        let tiers = table.lookup(BASE1, 1);
        assert_eq!(tiers.exact.len(), 1);
        assert!(tiers.base.is_empty());
    }

    #[test]
    fn test_tombstones_purged_after_pass() {
        let mut table = SubscriptionTable::new(1);
        let handler = cb("h");
        table.subscribe(BASE1, 1, &handler, Context::none(), false).unwrap();

        table.begin_pass();
        let snapshot = table.lookup(BASE1, 1);
        table.unsubscribe_by_callback(BASE1, 1, &handler).unwrap();

        assert_eq!(table.pending_purge(), 1);
        assert!(!snapshot.exact[0].is_alive());
        assert!(table.lookup(BASE1, 1).is_empty());

        table.end_pass();
        assert_eq!(table.pending_purge(), 0);
        assert!(table.bases.is_empty());
    }

    #[test]
    fn test_nested_passes_purge_at_outermost() {
        let mut table = SubscriptionTable::new(1);
        let handler = cb("h");
        table.subscribe(BASE1, 1, &handler, Context::none(), false).unwrap();

        table.begin_pass();
        table.begin_pass();
        table.unsubscribe_by_callback(BASE1, 1, &handler).unwrap();
        table.end_pass();
        assert_eq!(table.pending_purge(), 1);
        table.end_pass();
        assert_eq!(table.pending_purge(), 0);
    }

    #[test]
    fn test_resubscribe_after_tombstone_appends() {
        let mut table = SubscriptionTable::new(1);
        let handler = cb("h");
        let first = table.subscribe(BASE1, 1, &handler, Context::none(), false).unwrap();

        table.begin_pass();
        table.unsubscribe_by_callback(BASE1, 1, &handler).unwrap();
        let second = table.subscribe(BASE1, 1, &handler, Context::none(), false).unwrap();
        table.end_pass();

        assert_ne!(first, second);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_stats_in_registration_order() {
        let mut table = SubscriptionTable::new(1);
        table.subscribe(BASE1, 1, &cb("first"), Context::none(), false).unwrap();
        table.subscribe(ANY_BASE, ANY_ID, &cb("second"), Context::none(), false).unwrap();
        table.subscribe(BASE2, ANY_ID, &cb("third"), Context::none(), false).unwrap();

        let rows = table.stats();
        let order: Vec<&str> = rows.iter().map(|r| r.callback.split('@').next().unwrap()).collect();
        assert_eq!(order, ["first", "second", "third"]);
        assert_eq!(rows[1].base, "ANY_BASE");
        assert_eq!(rows[1].id, ANY_ID);
    }

    #[test]
    fn test_clear_removes_everything() {
        let mut table = SubscriptionTable::new(1);
        table.subscribe(BASE1, 1, &cb("a"), Context::none(), false).unwrap();
        table.subscribe(ANY_BASE, ANY_ID, &cb("b"), Context::none(), false).unwrap();
        table.clear();
        assert_eq!(table.len(), 0);
        assert!(table.stats().is_empty());
    }
}
