//! Channel ↔ subscriber registry.
//!
//! Two hash tables, both keyed on identity: `channels` maps an interned
//! channel name to the set of subscribers, `subscribers` maps a subscriber
//! to the set of interned channels it holds. The two directions are kept in
//! lockstep: a (channel, subscriber) pair is either present in both or in
//! neither.
//!
//! The registry also reports the membership edges the broker cares about:
//! the first subscriber on a channel requires a SUBSCRIBE upstream, and
//! removing the last one requires an UNSUBSCRIBE.

use crate::pubsub::intern::{Interned, StringPool};
use std::collections::{HashMap, HashSet};

/// Opaque identity of one message sink (one WebSocket connection).
pub type SubscriberId = u64;

/// Dual-indexed subscription registry. Owned by the fanout task.
#[derive(Default)]
pub struct Registry {
    pool: StringPool,
    channels: HashMap<Interned, HashSet<SubscriberId>>,
    subscribers: HashMap<SubscriberId, HashSet<Interned>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `subscriber` to `channel`.
    ///
    /// Idempotent: a duplicate subscription changes nothing. Returns `true`
    /// when the channel went from empty to non-empty, i.e. the broker needs
    /// a SUBSCRIBE.
    pub fn subscribe(&mut self, channel: &str, subscriber: SubscriberId) -> bool {
        let canonical = self.pool.get(channel);

        let held = self.subscribers.entry(subscriber).or_default();
        if !held.insert(canonical.clone()) {
            // Already subscribed; drop the ref we just took.
            self.pool.release(canonical);
            return false;
        }

        let members = self.channels.entry(canonical).or_default();
        let was_empty = members.is_empty();
        members.insert(subscriber);
        was_empty
    }

    /// Unsubscribe `subscriber` from `channel`.
    ///
    /// Returns `true` when the channel's subscriber set became empty, i.e.
    /// the broker needs an UNSUBSCRIBE.
    pub fn unsubscribe(&mut self, channel: &str, subscriber: SubscriberId) -> bool {
        let canonical = match self.pool.lookup(channel) {
            Some(canonical) => canonical,
            None => return false,
        };

        let removed = match self.subscribers.get_mut(&subscriber) {
            Some(held) => {
                let removed = held.remove(&canonical);
                if held.is_empty() {
                    self.subscribers.remove(&subscriber);
                }
                removed
            }
            None => false,
        };
        if !removed {
            self.pool.release(canonical);
            return false;
        }

        let emptied = self.drop_member(&canonical, subscriber);
        self.pool.release(canonical);
        emptied
    }

    /// Remove `subscriber` from every channel it holds (disconnect path).
    ///
    /// Returns the names of the channels whose subscriber sets became
    /// empty, each of which needs an UNSUBSCRIBE upstream.
    pub fn unsubscribe_all(&mut self, subscriber: SubscriberId) -> Vec<String> {
        let mut emptied = Vec::new();
        let held = match self.subscribers.remove(&subscriber) {
            Some(held) => held,
            None => return emptied,
        };
        for canonical in held {
            if self.drop_member(&canonical, subscriber) {
                emptied.push(canonical.as_str().to_owned());
            }
            self.pool.release(canonical);
        }
        emptied
    }

    /// Remove `subscriber` from the channel-side table, dropping the channel
    /// entry (and its pool ref) once the set empties.
    fn drop_member(&mut self, canonical: &Interned, subscriber: SubscriberId) -> bool {
        let members = match self.channels.get_mut(canonical) {
            Some(members) => members,
            // The two tables are in lockstep; a missing entry means the
            // caller is on the not-subscribed path.
            None => return false,
        };
        members.remove(&subscriber);
        if members.is_empty() {
            if let Some((key, _)) = self.channels.remove_entry(canonical) {
                self.pool.release(key);
            }
            return true;
        }
        false
    }

    /// The subscribers of `channel`, if any.
    pub fn subscribers_of(&self, channel: &str) -> Option<&HashSet<SubscriberId>> {
        let canonical = self.pool.lookup(channel)?;
        self.channels.get(&canonical)
    }

    /// Whether the (channel, subscriber) pair is registered.
    pub fn is_subscribed(&self, channel: &str, subscriber: SubscriberId) -> bool {
        self.subscribers_of(channel)
            .is_some_and(|members| members.contains(&subscriber))
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Check that every (channel, subscriber) edge is present in both
    /// directions. Test support.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let forward = self.channels.iter().all(|(channel, members)| {
            members.iter().all(|subscriber| {
                self.subscribers
                    .get(subscriber)
                    .is_some_and(|held| held.contains(channel))
            })
        });
        let backward = self.subscribers.iter().all(|(subscriber, held)| {
            held.iter().all(|channel| {
                self.channels
                    .get(channel)
                    .is_some_and(|members| members.contains(subscriber))
            })
        });
        forward && backward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_subscriber_triggers_broker_subscribe() {
        let mut registry = Registry::new();
        assert!(registry.subscribe("x", 1));
        assert!(!registry.subscribe("x", 2));
        assert!(registry.is_subscribed("x", 1));
        assert!(registry.is_subscribed("x", 2));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut registry = Registry::new();
        assert!(registry.subscribe("x", 1));
        assert!(!registry.subscribe("x", 1));
        assert_eq!(registry.subscribers_of("x").unwrap().len(), 1);
        // The duplicate took and released exactly one pool ref.
        assert_eq!(registry.pool.len(), 1);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_last_unsubscribe_triggers_broker_unsubscribe() {
        let mut registry = Registry::new();
        registry.subscribe("x", 1);
        registry.subscribe("x", 2);
        assert!(!registry.unsubscribe("x", 1));
        assert!(registry.unsubscribe("x", 2));
        assert!(registry.subscribers_of("x").is_none());
        assert!(registry.is_consistent());
        // Channel entry and pool node are both gone.
        assert!(registry.pool.is_empty());
    }

    #[test]
    fn test_unsubscribe_unknown_pairs() {
        let mut registry = Registry::new();
        assert!(!registry.unsubscribe("never-seen", 1));
        registry.subscribe("x", 1);
        assert!(!registry.unsubscribe("x", 99));
        assert!(registry.is_subscribed("x", 1));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_unsubscribe_all_on_disconnect() {
        let mut registry = Registry::new();
        registry.subscribe("x", 1);
        registry.subscribe("y", 1);
        registry.subscribe("y", 2);

        let mut emptied = registry.unsubscribe_all(1);
        emptied.sort();
        // Subscriber 1 was the sole member of "x" only.
        assert_eq!(emptied, vec!["x".to_string()]);
        assert!(!registry.is_subscribed("x", 1));
        assert!(!registry.is_subscribed("y", 1));
        assert!(registry.is_subscribed("y", 2));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_unsubscribe_all_without_subscriptions() {
        let mut registry = Registry::new();
        assert!(registry.unsubscribe_all(7).is_empty());
    }

    #[test]
    fn test_pool_drains_when_all_subscribers_leave() {
        let mut registry = Registry::new();
        registry.subscribe("a", 1);
        registry.subscribe("b", 1);
        registry.subscribe("a", 2);
        registry.unsubscribe_all(1);
        registry.unsubscribe_all(2);
        assert_eq!(registry.channel_count(), 0);
        assert!(registry.pool.is_empty());
    }

    #[test]
    fn test_resubscribe_after_empty() {
        let mut registry = Registry::new();
        registry.subscribe("x", 1);
        registry.unsubscribe("x", 1);
        // Empty again, so the next subscribe is a fresh broker edge.
        assert!(registry.subscribe("x", 2));
        assert!(registry.is_consistent());
    }
}
