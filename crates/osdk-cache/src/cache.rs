use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use osdk_query::{referenced_object_types, ObjectSet};
use osdk_types::{apply_patch, ObjectIdentity, ObjectRecord, OntologySchema, PropertyMap};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::entry::{CacheChange, CacheEntry, Incoming, MergeSummary};
use crate::error::{CacheError, CacheResult};
use crate::membership::Membership;
use crate::subscription::{
    ListUpdate, Subscriber, Subscription, SubscriptionEvent, SubscriptionId,
};

/// Where a cache mutation came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Origin {
    Fetch,
    Optimistic,
    Stream,
    Delete,
}

impl Origin {
    /// Local and streamed changes may move objects into or out of lists
    /// without any fetch telling the subscriber.
    pub(crate) fn is_live(self) -> bool {
        !matches!(self, Self::Fetch)
    }
}

/// Mutation epoch observed when a fetch was issued.
///
/// Fetch results merged with a ticket never overwrite optimistic updates
/// applied after the ticket was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket {
    epoch: u64,
}

impl FetchTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// How [`ObservableCache::attach_results`] combines a page with the list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachMode {
    /// First page: the page becomes the whole list.
    Replace,
    /// Later page: new identities are appended.
    Extend,
}

enum Outcome {
    Inserted,
    Updated,
    Unchanged,
    Stale,
}

struct OptimisticMark {
    epoch: u64,
    prior: Option<CacheEntry>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<ObjectIdentity, CacheEntry>,
    epoch: u64,
    marks: HashMap<ObjectIdentity, Vec<OptimisticMark>>,
    deferred: HashMap<ObjectIdentity, Incoming>,
    subscribers: BTreeMap<SubscriptionId, Subscriber>,
}

impl CacheState {
    fn merge(&mut self, incoming: Incoming, honor_sequence: bool) -> Outcome {
        let Incoming { record, sequence } = incoming;
        let ObjectRecord {
            identity,
            properties,
        } = record;
        match self.entries.entry(identity) {
            Entry::Vacant(slot) => {
                let identity = slot.key().clone();
                slot.insert(CacheEntry {
                    identity,
                    properties,
                    version: 1,
                    sequence,
                });
                Outcome::Inserted
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if let (true, Some(new), Some(old)) = (honor_sequence, sequence, entry.sequence) {
                    if new < old {
                        return Outcome::Stale;
                    }
                }
                if sequence.is_some() {
                    entry.sequence = sequence;
                }
                if entry.properties == properties {
                    return Outcome::Unchanged;
                }
                entry.properties = properties;
                entry.version += 1;
                Outcome::Updated
            }
        }
    }

    fn patch(&mut self, identity: &ObjectIdentity, patch: &PropertyMap) -> Option<Outcome> {
        let entry = self.entries.get_mut(identity)?;
        let mut next = entry.properties.clone();
        apply_patch(&mut next, patch);
        if next == entry.properties {
            return Some(Outcome::Unchanged);
        }
        entry.properties = next;
        entry.version += 1;
        Some(Outcome::Updated)
    }

    fn set(&mut self, identity: &ObjectIdentity, properties: Option<PropertyMap>) -> bool {
        let Some(properties) = properties else {
            return self.entries.remove(identity).is_some();
        };
        match self.entries.get_mut(identity) {
            Some(entry) => {
                if entry.properties == properties {
                    return false;
                }
                entry.properties = properties;
                entry.version += 1;
            }
            None => {
                self.entries.insert(
                    identity.clone(),
                    CacheEntry {
                        identity: identity.clone(),
                        properties,
                        version: 1,
                        sequence: None,
                    },
                );
            }
        }
        true
    }

    /// The server wrote `identity` while optimistic updates are pending:
    /// rolling them back now lands on the server's state, not the older
    /// snapshot.
    fn rebase_marks(&mut self, identity: &ObjectIdentity) {
        let Some(marks) = self.marks.get_mut(identity) else {
            return;
        };
        let current = self.entries.get(identity);
        for mark in marks.iter_mut() {
            mark.prior = current.cloned();
        }
    }

    /// Send `OutOfDate` to every subscription `affected` selects. Returns
    /// how many were reached.
    fn invalidate(&mut self, affected: impl Fn(&Subscriber) -> bool) -> usize {
        let mut reached = 0;
        self.subscribers.retain(|id, subscriber| {
            if !affected(subscriber) {
                return true;
            }
            if subscriber.deliver(SubscriptionEvent::OutOfDate) {
                reached += 1;
                true
            } else {
                debug!(%id, "dropped closed subscription");
                false
            }
        });
        reached
    }

    /// An optimistic update newer than `epoch` is pending for `identity`.
    fn pending_since(&self, identity: &ObjectIdentity, epoch: u64) -> bool {
        self.marks
            .get(identity)
            .is_some_and(|marks| marks.iter().any(|mark| mark.epoch > epoch))
    }

    fn notify(&mut self, touched: &[(ObjectIdentity, Origin)], append_new_rows: bool) {
        if touched.is_empty() {
            return;
        }
        let entries = &self.entries;
        self.subscribers.retain(|id, subscriber| {
            match subscriber.absorb(entries, touched, append_new_rows) {
                Some(update) => {
                    let alive = subscriber.deliver(SubscriptionEvent::Updated(update));
                    if !alive {
                        debug!(%id, "dropped closed subscription");
                    }
                    alive
                }
                None => !subscriber.sender.is_closed(),
            }
        });
    }

    fn subscriber(&mut self, id: SubscriptionId) -> CacheResult<&mut Subscriber> {
        self.subscribers
            .get_mut(&id)
            .ok_or(CacheError::UnknownSubscription(id))
    }

    fn send(&mut self, id: SubscriptionId, event: SubscriptionEvent) -> CacheResult<()> {
        if !self.subscriber(id)?.deliver(event) {
            self.subscribers.remove(&id);
            return Err(CacheError::UnknownSubscription(id));
        }
        Ok(())
    }
}

struct Shared {
    schema: Arc<OntologySchema>,
    config: CacheConfig,
    state: RwLock<CacheState>,
}

/// Process-wide store of the latest known object states, with list
/// subscriptions that follow every mutation.
///
/// Cloning yields another handle to the same cache. The lock is held only
/// for the duration of a single call and never across an await.
#[derive(Clone)]
pub struct ObservableCache {
    inner: Arc<Shared>,
}

impl ObservableCache {
    pub fn new(schema: Arc<OntologySchema>) -> Self {
        Self::with_config(schema, CacheConfig::default())
    }

    pub fn with_config(schema: Arc<OntologySchema>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Shared {
                schema,
                config,
                state: RwLock::new(CacheState::default()),
            }),
        }
    }

    pub fn schema(&self) -> &OntologySchema {
        &self.inner.schema
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CacheState> {
        self.inner.state.read().expect("lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CacheState> {
        self.inner.state.write().expect("lock poisoned")
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get(&self, identity: &ObjectIdentity) -> Option<CacheEntry> {
        self.read().entries.get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every cached entry, in no particular order.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.read().entries.values().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.read().subscribers.len()
    }

    /// Expression a subscription follows.
    pub fn expression(&self, id: SubscriptionId) -> Option<ObjectSet> {
        self.read()
            .subscribers
            .get(&id)
            .map(|s| s.expression.clone())
    }

    // -----------------------------------------------------------------------
    // Fetch results
    // -----------------------------------------------------------------------

    /// Take a ticket before issuing a fetch whose result will be merged.
    pub fn begin_fetch(&self) -> FetchTicket {
        FetchTicket {
            epoch: self.read().epoch,
        }
    }

    /// Merge fetched records.
    ///
    /// Absent identities are inserted at version 1. Present ones are
    /// overwritten unless the server sequence says the record is older;
    /// unchanged data bumps nothing and notifies nobody. Records for
    /// identities with an optimistic update newer than `ticket` are held
    /// back until that update settles.
    pub fn merge_fetch_result<I>(&self, ticket: &FetchTicket, records: I) -> MergeSummary
    where
        I: IntoIterator,
        I::Item: Into<Incoming>,
    {
        let honor = self.inner.config.honor_sequence;
        let mut state = self.write();
        let mut summary = MergeSummary::default();
        let mut touched = Vec::new();
        for incoming in records {
            let incoming = incoming.into();
            let identity = incoming.record.identity.clone();
            if state.pending_since(&identity, ticket.epoch) {
                state.deferred.insert(identity, incoming);
                summary.deferred += 1;
                continue;
            }
            let outcome = state.merge(incoming, honor);
            if !matches!(outcome, Outcome::Stale) {
                state.rebase_marks(&identity);
            }
            match outcome {
                Outcome::Inserted => {
                    summary.inserted += 1;
                    touched.push((identity, Origin::Fetch));
                }
                Outcome::Updated => {
                    summary.updated += 1;
                    touched.push((identity, Origin::Fetch));
                }
                Outcome::Unchanged => summary.unchanged += 1,
                Outcome::Stale => summary.stale += 1,
            }
        }
        state.notify(&touched, self.inner.config.append_new_rows);
        debug!(
            epoch = ticket.epoch,
            inserted = summary.inserted,
            updated = summary.updated,
            deferred = summary.deferred,
            "merged fetch result"
        );
        summary
    }

    // -----------------------------------------------------------------------
    // Optimistic updates
    // -----------------------------------------------------------------------

    /// Apply a local change ahead of server confirmation.
    ///
    /// `mutator` receives the current properties (`None` when absent) and
    /// returns the new ones (`None` deletes). It runs without the cache lock
    /// held, so it may read the cache; a panic inside it leaves the cache
    /// untouched. The returned handle either confirms the change or rolls it
    /// back.
    pub fn apply_optimistic_update<F>(&self, identity: &ObjectIdentity, mutator: F) -> OptimisticUpdate
    where
        F: FnOnce(Option<&PropertyMap>) -> Option<PropertyMap>,
    {
        let snapshot = self.get(identity);
        let next = mutator(snapshot.as_ref().map(|entry| &entry.properties));

        let mut state = self.write();
        state.epoch += 1;
        let epoch = state.epoch;
        // Rollback restores what was cached when the change landed, which a
        // concurrent merge may have moved past `snapshot`.
        let prior = state.entries.get(identity).cloned();
        let changed = state.set(identity, next);
        state
            .marks
            .entry(identity.clone())
            .or_default()
            .push(OptimisticMark { epoch, prior });
        if changed {
            state.notify(
                &[(identity.clone(), Origin::Optimistic)],
                self.inner.config.append_new_rows,
            );
        }
        debug!(%identity, epoch, changed, "applied optimistic update");
        OptimisticUpdate {
            cache: self.clone(),
            identity: identity.clone(),
            epoch,
            settled: false,
        }
    }

    fn rollback(&self, identity: &ObjectIdentity, epoch: u64) -> bool {
        let honor = self.inner.config.honor_sequence;
        let mut state = self.write();
        let Some(marks) = state.marks.get_mut(identity) else {
            return false;
        };
        let Some(at) = marks.iter().position(|mark| mark.epoch == epoch) else {
            return false;
        };
        let discarded = marks.split_off(at);
        let settled = marks.is_empty();
        if settled {
            state.marks.remove(identity);
        }
        match discarded.into_iter().next().and_then(|mark| mark.prior) {
            Some(entry) => {
                state.entries.insert(identity.clone(), entry);
            }
            None => {
                state.entries.remove(identity);
            }
        }
        if settled {
            if let Some(incoming) = state.deferred.remove(identity) {
                state.merge(incoming, honor);
            }
        }
        state.notify(
            &[(identity.clone(), Origin::Optimistic)],
            self.inner.config.append_new_rows,
        );
        debug!(%identity, epoch, "rolled back optimistic update");
        true
    }

    fn confirm(&self, identity: &ObjectIdentity, epoch: u64) {
        let mut state = self.write();
        let Some(marks) = state.marks.get_mut(identity) else {
            return;
        };
        marks.retain(|mark| mark.epoch != epoch);
        if marks.is_empty() {
            state.marks.remove(identity);
            if state.deferred.remove(identity).is_some() {
                debug!(%identity, "discarded fetch result older than confirmed update");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Confirmed and streamed changes
    // -----------------------------------------------------------------------

    /// Drop an object whose deletion the server confirmed.
    pub fn remove(&self, identity: &ObjectIdentity) -> Option<CacheEntry> {
        let mut state = self.write();
        state.deferred.remove(identity);
        let removed = state.entries.remove(identity);
        state.rebase_marks(identity);
        let removed = removed?;
        state.notify(
            &[(identity.clone(), Origin::Delete)],
            self.inner.config.append_new_rows,
        );
        Some(removed)
    }

    /// Merge one batch of streamed changes.
    ///
    /// Later changes to an identity fold into earlier ones in the same batch;
    /// the folded change keeps the position of the identity's first arrival.
    pub fn apply_stream_updates(&self, changes: impl IntoIterator<Item = CacheChange>) -> MergeSummary {
        let mut order = Vec::new();
        let mut folded: HashMap<ObjectIdentity, CacheChange> = HashMap::new();
        for change in changes {
            match folded.entry(change.identity().clone()) {
                Entry::Occupied(mut slot) => slot.get_mut().absorb(change),
                Entry::Vacant(slot) => {
                    order.push(slot.key().clone());
                    slot.insert(change);
                }
            }
        }

        let honor = self.inner.config.honor_sequence;
        let mut state = self.write();
        let mut summary = MergeSummary::default();
        let mut touched = Vec::new();
        for identity in order {
            let Some(change) = folded.remove(&identity) else {
                continue;
            };
            let outcome = match change {
                CacheChange::Upsert(incoming) => Some(state.merge(incoming, honor)),
                CacheChange::Patch { patch, .. } => {
                    let outcome = state.patch(&identity, &patch);
                    if outcome.is_none() {
                        debug!(%identity, "ignored patch for uncached object");
                    }
                    outcome
                }
                CacheChange::Remove(_) => {
                    state.deferred.remove(&identity);
                    let removed = state.entries.remove(&identity).is_some();
                    state.rebase_marks(&identity);
                    if removed {
                        summary.removed += 1;
                        touched.push((identity, Origin::Delete));
                    }
                    continue;
                }
            };
            if matches!(
                outcome,
                Some(Outcome::Inserted | Outcome::Updated | Outcome::Unchanged)
            ) {
                state.rebase_marks(&identity);
            }
            match outcome {
                Some(Outcome::Inserted) => {
                    summary.inserted += 1;
                    touched.push((identity, Origin::Stream));
                }
                Some(Outcome::Updated) => {
                    summary.updated += 1;
                    touched.push((identity, Origin::Stream));
                }
                Some(Outcome::Unchanged) => summary.unchanged += 1,
                Some(Outcome::Stale) => summary.stale += 1,
                None => {}
            }
        }
        state.notify(&touched, self.inner.config.append_new_rows);
        debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            removed = summary.removed,
            "applied stream updates"
        );
        summary
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Follow the list produced by `expression`.
    ///
    /// The list starts empty; seed it with [`Self::attach_results`].
    pub fn subscribe(&self, expression: ObjectSet) -> CacheResult<Subscription> {
        expression.validate(&self.inner.schema)?;
        let referenced = referenced_object_types(&expression, &self.inner.schema)?;
        let membership = Membership::of(&expression, &self.inner.schema);
        let id = SubscriptionId::generate();
        let (sender, receiver) = mpsc::unbounded_channel();
        debug!(
            %id,
            types = referenced.len(),
            decidable = membership.is_decidable(),
            "subscribed"
        );
        self.write().subscribers.insert(
            id,
            Subscriber {
                expression,
                referenced,
                membership,
                known: Vec::new(),
                sender,
            },
        );
        Ok(Subscription::new(id, self.clone(), receiver))
    }

    /// Returns `true` if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .remove(&id)
            .is_some();
        if removed {
            debug!(%id, "unsubscribed");
        }
        removed
    }

    /// Seed or extend a subscribed list with fetched identities, which
    /// must already be merged.
    pub fn attach_results(
        &self,
        id: SubscriptionId,
        page: &[ObjectIdentity],
        mode: AttachMode,
    ) -> CacheResult<()> {
        let mut state = self.write();
        let state = &mut *state;
        let subscriber = state
            .subscribers
            .get_mut(&id)
            .ok_or(CacheError::UnknownSubscription(id))?;
        if mode == AttachMode::Replace {
            subscriber.known.clear();
        }
        for identity in page {
            if !subscriber.known.contains(identity) {
                subscriber.known.push(identity.clone());
            }
        }
        let update = ListUpdate {
            objects: subscriber.snapshot(&state.entries),
            changed: page.to_vec(),
            invalidated: false,
        };
        state.send(id, SubscriptionEvent::Updated(update))
    }

    /// Deliver a fetch or stream failure to one subscription.
    pub fn report_error(&self, id: SubscriptionId, error: CacheError) -> CacheResult<()> {
        warn!(%id, %error, "subscription error");
        self.write().send(id, SubscriptionEvent::Error(error))
    }

    /// Tell one subscription that its list must be refetched.
    pub fn mark_out_of_date(&self, id: SubscriptionId) -> CacheResult<()> {
        debug!(%id, "subscription out of date");
        self.write().send(id, SubscriptionEvent::OutOfDate)
    }

    /// Follow a single object.
    ///
    /// The list holds the object while it is cached and matches, and is
    /// empty otherwise. A cached object is delivered at once; an uncached
    /// one joins when a live change creates it or a fetch attaches it.
    pub fn observe_object(&self, identity: &ObjectIdentity) -> CacheResult<Subscription> {
        let expression = ObjectSet::for_object(&self.inner.schema, identity)?;
        let subscription = self.subscribe(expression)?;
        if self.read().entries.contains_key(identity) {
            self.attach_results(
                subscription.id(),
                std::slice::from_ref(identity),
                AttachMode::Replace,
            )?;
        }
        Ok(subscription)
    }

    // -----------------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------------

    /// Mark every subscription out of date. Cached entries are kept.
    ///
    /// Returns the number of subscriptions told to refetch.
    pub fn invalidate_all(&self) -> usize {
        let reached = self.write().invalidate(|_| true);
        debug!(reached, "invalidated all subscriptions");
        reached
    }

    /// Mark out of date every subscription whose list holds one of
    /// `identities`.
    pub fn invalidate_objects(&self, identities: &[ObjectIdentity]) -> usize {
        let reached = self
            .write()
            .invalidate(|s| s.known.iter().any(|known| identities.contains(known)));
        debug!(objects = identities.len(), reached, "invalidated objects");
        reached
    }

    /// Mark out of date every subscription whose expression reads
    /// `object_type`, including through links and derived properties.
    pub fn invalidate_object_type(&self, object_type: &str) -> usize {
        let reached = self
            .write()
            .invalidate(|s| s.referenced.contains(object_type));
        debug!(%object_type, reached, "invalidated object type");
        reached
    }
}

impl fmt::Debug for ObservableCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("ObservableCache")
            .field("entries", &state.entries.len())
            .field("pending_optimistic", &state.marks.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

/// Handle to one pending optimistic update.
///
/// Dropping an unsettled handle confirms it.
#[must_use = "an optimistic update must be confirmed or rolled back"]
pub struct OptimisticUpdate {
    cache: ObservableCache,
    identity: ObjectIdentity,
    epoch: u64,
    settled: bool,
}

impl OptimisticUpdate {
    pub fn identity(&self) -> &ObjectIdentity {
        &self.identity
    }

    /// Restore the state from before this update.
    ///
    /// When a fetch or stream change for the object merged after the update
    /// was applied, the object keeps that server state instead. Later
    /// updates stacked on the same identity are discarded with it. Returns
    /// `false` if an earlier rollback already discarded this one.
    pub fn rollback(mut self) -> bool {
        self.settled = true;
        self.cache.rollback(&self.identity, self.epoch)
    }

    /// Keep the change; the server accepted it.
    pub fn confirm(mut self) {
        self.settled = true;
        self.cache.confirm(&self.identity, self.epoch);
    }
}

impl Drop for OptimisticUpdate {
    fn drop(&mut self) {
        if !self.settled {
            self.cache.confirm(&self.identity, self.epoch);
        }
    }
}

impl fmt::Debug for OptimisticUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticUpdate")
            .field("identity", &self.identity)
            .field("epoch", &self.epoch)
            .finish()
    }
}
