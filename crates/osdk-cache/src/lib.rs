//! Observable object cache and subscription bus for the OSDK core.
//!
//! [`ObservableCache`] maps object identities to their latest known
//! properties. Four paths mutate it: fetch results
//! ([`ObservableCache::merge_fetch_result`]), optimistic local edits
//! ([`ObservableCache::apply_optimistic_update`]), streamed server changes
//! ([`ObservableCache::apply_stream_updates`]), and confirmed deletes.
//! Every path bumps entry versions the same way and notifies the
//! subscriptions whose expressions read the mutated object type.
//!
//! # Design Rules
//!
//! 1. Versions start at 1 and grow with every change; a no-op merge bumps
//!    nothing and notifies nobody. Rollback restores the prior version, or
//!    the server's state when the server wrote the object in the meantime.
//! 2. A fetch issued before an optimistic edit never overwrites it.
//! 3. Events reach each subscription in the order mutations were applied.
//! 4. Subscribed lists only grow locally when membership is decidable from
//!    cached data; otherwise they are flagged for refetch.
//! 5. Invalidation tells subscriptions to refetch; it never drops entries.

pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
mod membership;
pub mod subscription;

pub use cache::{AttachMode, FetchTicket, ObservableCache, OptimisticUpdate};
pub use config::CacheConfig;
pub use entry::{CacheChange, CacheEntry, Incoming, MergeSummary};
pub use error::{CacheError, CacheResult};
pub use subscription::{ListUpdate, Subscription, SubscriptionEvent, SubscriptionId};
