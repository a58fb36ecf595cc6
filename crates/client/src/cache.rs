//! Cache entries and the store that owns them.
//!
//! The store maps canonical request keys to live entries. All lookups,
//! insertions and removals for one key go through the same `DashMap` shard
//! lock, which is what keeps at most one entry per key and lets eviction
//! re-check the subscriber count right before removing.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crmdesk_query::{CachePredicate, CanonicalRequest, DependencyTag, ResponseShape};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, trace};

use crate::SubscriptionValue;

/// Lifecycle of a [`CacheEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// No value and no fetch running.
    Created,
    /// First fetch running, no value yet.
    Loading,
    Ready,
    /// A value is present and a newer one is being fetched.
    Refreshing,
    /// Removed from the store. Terminal.
    Evicted,
}

#[derive(Debug, Default)]
struct FetchBook {
    /// Generation handed to the most recently started fetch.
    issued: u64,
    /// Generation of the value currently published.
    applied: u64,
    in_flight: usize,
}

/// One cached read.
pub struct CacheEntry {
    key: String,
    request: CanonicalRequest,
    shape: ResponseShape,
    tags: BTreeSet<DependencyTag>,
    refresh: Duration,
    cacheable: Option<CachePredicate>,
    value: SubscriptionValue<Value>,
    state: watch::Sender<EntryState>,
    book: Mutex<FetchBook>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("tags", &self.tags)
            .field("refresh", &self.refresh)
            .field("value", &self.value)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl CacheEntry {
    pub fn new(
        request: CanonicalRequest,
        shape: ResponseShape,
        tags: BTreeSet<DependencyTag>,
        refresh: Duration,
        cacheable: Option<CachePredicate>,
        previous: Option<Value>,
    ) -> Self {
        let (state, _) = watch::channel(EntryState::Created);
        Self {
            key: request.key(),
            request,
            shape,
            tags,
            refresh,
            cacheable,
            value: SubscriptionValue::new(previous),
            state,
            book: Mutex::new(FetchBook::default()),
            refresh_task: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn request(&self) -> &CanonicalRequest {
        &self.request
    }

    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    pub fn tags(&self) -> &BTreeSet<DependencyTag> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &DependencyTag) -> bool {
        self.tags.contains(tag)
    }

    /// Background refresh interval; zero when the entry never refreshes.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh
    }

    pub fn value(&self) -> &SubscriptionValue<Value> {
        &self.value
    }

    pub fn subscriber_count(&self) -> usize {
        self.value.subscriber_count()
    }

    pub fn state(&self) -> EntryState {
        *self.state.borrow()
    }

    /// Follow state transitions.
    pub fn watch_state(&self) -> watch::Receiver<EntryState> {
        self.state.subscribe()
    }

    /// No live subscription on the value.
    pub fn is_idle(&self) -> bool {
        self.value.subscriber_count() == 0
    }

    /// Whether `value` may stay cached.
    pub fn accepts(&self, value: &Value) -> bool {
        self.cacheable.as_ref().map_or(true, |predicate| predicate(value))
    }

    fn set_state(&self, next: EntryState) {
        self.state.send_if_modified(|state| {
            // evicted is terminal
            if *state == EntryState::Evicted || *state == next {
                return false;
            }
            trace!("{}: {:?} -> {:?}", self.key, state, next);
            *state = next;
            true
        });
    }

    /// Register a fetch and return its generation.
    pub fn begin_fetch(&self) -> u64 {
        let mut book = lock(&self.book);
        self.begin_locked(&mut book)
    }

    /// Register a fetch only if the entry has no value and nothing is
    /// running, e.g. after its first fetch failed.
    pub fn begin_fetch_if_unloaded(&self) -> Option<u64> {
        let mut book = lock(&self.book);
        if self.value.is_loaded() || book.in_flight > 0 {
            return None;
        }
        Some(self.begin_locked(&mut book))
    }

    fn begin_locked(&self, book: &mut FetchBook) -> u64 {
        book.issued += 1;
        book.in_flight += 1;
        self.set_state(if self.value.is_loaded() {
            EntryState::Refreshing
        } else {
            EntryState::Loading
        });
        book.issued
    }

    /// Complete the fetch `generation`. A value is published only if no
    /// later-started fetch has published already. Returns whether it was.
    pub fn finish_fetch(&self, generation: u64, value: Option<Value>) -> bool {
        let mut book = lock(&self.book);
        book.in_flight = book.in_flight.saturating_sub(1);

        let published = match value {
            Some(value) if generation > book.applied => {
                book.applied = generation;
                self.value.publish(Arc::new(value));
                true
            }
            Some(_) => {
                debug!(
                    "{}: dropping result of fetch {} superseded by {}",
                    self.key, generation, book.applied
                );
                false
            }
            None => false,
        };

        let loaded = self.value.is_loaded();
        self.set_state(match (book.in_flight, loaded) {
            (0, true) => EntryState::Ready,
            (0, false) => EntryState::Created,
            (_, true) => EntryState::Refreshing,
            (_, false) => EntryState::Loading,
        });
        published
    }

    pub(crate) fn set_refresh_task(&self, task: JoinHandle<()>) {
        if self.state() == EntryState::Evicted {
            task.abort();
            return;
        }
        if let Some(old) = lock(&self.refresh_task).replace(task) {
            old.abort();
        }
    }

    pub fn has_refresh_task(&self) -> bool {
        lock(&self.refresh_task).is_some()
    }

    fn mark_evicted(&self) {
        self.set_state(EntryState::Evicted);
        if let Some(task) = lock(&self.refresh_task).take() {
            task.abort();
        }
    }
}

/// Live cache entries keyed by canonical request.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: DashMap<String, Arc<CacheEntry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry for `key`, created with `make` if missing, together with a
    /// handle to its value taken under the key's lock, and whether it was
    /// created by this call.
    pub fn get_or_insert_with(
        &self,
        key: &str,
        make: impl FnOnce() -> CacheEntry,
    ) -> (Arc<CacheEntry>, SubscriptionValue<Value>, bool) {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.get().clone();
                let value = entry.value().clone();
                (entry, value, false)
            }
            Entry::Vacant(vacant) => {
                let entry = Arc::new(make());
                let value = entry.value().clone();
                vacant.insert(entry.clone());
                debug!("cache: created {}", key);
                (entry, value, true)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Remove `entry` if it is still the one stored under its key and is idle.
    pub fn evict_if_idle(&self, entry: &Arc<CacheEntry>) -> bool {
        let removed = self
            .entries
            .remove_if(entry.key(), |_, current| {
                Arc::ptr_eq(current, entry) && current.is_idle()
            })
            .is_some();
        if removed {
            entry.mark_evicted();
            debug!("cache: evicted idle {}", entry.key());
        }
        removed
    }

    /// Remove `entry` if it is still the one stored under its key.
    pub fn remove_entry(&self, entry: &Arc<CacheEntry>) -> bool {
        let removed = self
            .entries
            .remove_if(entry.key(), |_, current| Arc::ptr_eq(current, entry))
            .is_some();
        if removed {
            entry.mark_evicted();
            debug!("cache: removed {}", entry.key());
        }
        removed
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                entry.mark_evicted();
                debug!("cache: removed {}", key);
                true
            }
            None => false,
        }
    }

    /// Entries carrying `tag`.
    pub fn tagged(&self, tag: &DependencyTag) -> Vec<Arc<CacheEntry>> {
        self.entries
            .iter()
            .filter(|e| e.value().has_tag(tag))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Drop every entry and stop every refresh task.
    pub fn clear(&self) {
        let keys = self.keys();
        for key in &keys {
            self.remove(key);
        }
        debug!("cache: cleared {} entries", keys.len());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys of all live entries, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}
