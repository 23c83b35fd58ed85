//! Subscription handles and the events delivered through them.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use osdk_query::ObjectSet;
use osdk_types::ObjectIdentity;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::{ObservableCache, Origin};
use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::membership::Membership;

/// Identifier of one subscription, unique per process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of a subscribed list after a change.
#[derive(Clone, Debug, PartialEq)]
pub struct ListUpdate {
    /// Current members, in list order.
    pub objects: Vec<CacheEntry>,
    /// Identities whose change produced this update.
    pub changed: Vec<ObjectIdentity>,
    /// The list may now be incomplete or contain non-members; refetch it.
    pub invalidated: bool,
}

/// Delivered to a subscription in cache mutation order.
#[derive(Clone, Debug, PartialEq)]
pub enum SubscriptionEvent {
    Updated(ListUpdate),
    /// A fetch or stream failure. The subscription stays open.
    Error(CacheError),
    /// The server can no longer vouch for the list; refetch it.
    OutOfDate,
}

/// Cache-side state of one subscription.
pub(crate) struct Subscriber {
    pub(crate) expression: ObjectSet,
    pub(crate) referenced: BTreeSet<String>,
    pub(crate) membership: Membership,
    pub(crate) known: Vec<ObjectIdentity>,
    pub(crate) sender: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl Subscriber {
    /// Send, reporting whether the receiver is still alive.
    pub(crate) fn deliver(&self, event: SubscriptionEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub(crate) fn snapshot(&self, entries: &HashMap<ObjectIdentity, CacheEntry>) -> Vec<CacheEntry> {
        self.known
            .iter()
            .filter_map(|identity| entries.get(identity).cloned())
            .collect()
    }

    /// Fold mutated identities into the list; `None` when the list is
    /// unaffected.
    ///
    /// Known members are updated in place, or dropped once deleted or once
    /// they provably stop matching. Live changes append new members when
    /// membership is decidable and flag the list invalidated when it is not.
    /// Fetched objects are never appended: the fetching query attaches them.
    pub(crate) fn absorb(
        &mut self,
        entries: &HashMap<ObjectIdentity, CacheEntry>,
        touched: &[(ObjectIdentity, Origin)],
        append_new_rows: bool,
    ) -> Option<ListUpdate> {
        let mut changed: Vec<ObjectIdentity> = Vec::new();
        let mut invalidated = false;
        for (identity, origin) in touched {
            if !self.referenced.contains(&identity.object_type) {
                continue;
            }
            let entry = entries.get(identity);
            let position = self.known.iter().position(|known| known == identity);
            let admits = self.membership.admits(identity, entry);
            let live = origin.is_live();
            let relevant = match (position, admits) {
                (Some(at), Some(false)) => {
                    self.known.remove(at);
                    true
                }
                (Some(at), None) => {
                    if entry.is_none() {
                        self.known.remove(at);
                    }
                    invalidated |= live;
                    true
                }
                (Some(_), Some(true)) => true,
                (None, Some(true)) if live => {
                    if append_new_rows {
                        self.known.push(identity.clone());
                    } else {
                        invalidated = true;
                    }
                    true
                }
                (None, None) if live => {
                    invalidated = true;
                    true
                }
                (None, _) => false,
            };
            if relevant && !changed.contains(identity) {
                changed.push(identity.clone());
            }
        }
        if changed.is_empty() {
            return None;
        }
        Some(ListUpdate {
            objects: self.snapshot(entries),
            changed,
            invalidated,
        })
    }
}

/// Receiving end of a subscription.
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    cache: ObservableCache,
    receiver: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        cache: ObservableCache,
        receiver: mpsc::UnboundedReceiver<SubscriptionEvent>,
    ) -> Self {
        Self {
            id,
            cache,
            receiver,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event, or `None` once the cache has dropped the subscription.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.receiver.recv().await
    }

    /// Next already-delivered event, if any.
    pub fn try_recv(&mut self) -> Option<SubscriptionEvent> {
        self.receiver.try_recv().ok()
    }

    /// Every already-delivered event, in order.
    pub fn drain(&mut self) -> Vec<SubscriptionEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Stop receiving events. Same as dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cache.unsubscribe(self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
