//! Stale-aware single-slot cache for the active context.
//!
//! A [`ContextCache`] holds at most one value, fetched from a
//! [`ContextSource`] and mirrored into a [`ContextSlot`] so it survives a
//! restart. Reads follow three thresholds:
//!
//! - younger than `stale_after`: served from memory
//! - older than `stale_after`: refetched unless the caller allows stale data
//! - older than `expire_after`: dropped from memory and storage before anything else
//!
//! At most one fetch runs at a time. Callers arriving while a fetch is in
//! flight await the same shared result. The fetch itself runs as a spawned
//! task, so it finishes and updates the cache even if every caller gives up.

pub mod shop;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ContextCacheConfig;
use crate::events::{EventChannel, SubscriptionToken, Topic};
use crate::gateway::GatewayError;
use crate::token_store::PersistedContext;

/// Where fresh values come from.
#[async_trait]
pub trait ContextSource<T>: Send + Sync {
    /// Fetch the current value. `GatewayError::NotFound` means "no value"
    /// and is cached as such.
    async fn fetch(&self) -> Result<T, GatewayError>;
}

/// Durable mirror of the cached value.
#[async_trait]
pub trait ContextSlot<T>: Send + Sync {
    async fn load(&self) -> Option<PersistedContext<T>>;
    async fn save(&self, context: &PersistedContext<T>);
    async fn clear(&self);
}

/// Options for [`ContextCache::get`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Fetch even if the cached value is fresh
    pub force_refresh: bool,
    /// Serve a stale (but not expired) value without fetching
    pub allow_stale: bool,
}

impl GetOptions {
    #[must_use]
    pub const fn allow_stale() -> Self {
        Self {
            force_refresh: false,
            allow_stale: true,
        }
    }

    #[must_use]
    pub const fn force_refresh() -> Self {
        Self {
            force_refresh: true,
            allow_stale: false,
        }
    }
}

/// Age class of the cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing has been fetched (or the entry was cleared).
    Empty,
    Fresh,
    Stale,
    Expired,
}

/// Point-in-time view of a cache.
#[derive(Debug, Clone)]
pub struct ContextSnapshot<T> {
    pub value: Option<T>,
    pub age: Option<Duration>,
    pub freshness: Freshness,
    pub in_flight: bool,
}

type FetchResult<T> = Result<Option<T>, GatewayError>;
type SharedFetch<T> = Shared<BoxFuture<'static, FetchResult<T>>>;

struct InFlight<T> {
    id: u64,
    future: SharedFetch<T>,
}

struct State<T> {
    value: Option<T>,
    /// `None` means the entry is empty. `Some` with `value == None` is a
    /// cached "nothing selected".
    fetched_at: Option<Instant>,
    /// Age the entry already had when it was restored from storage. Kept
    /// apart from `fetched_at` because the monotonic clock may not reach
    /// back that far.
    restored_age: Duration,
    /// Bumped by `set` and `invalidate`; fetches started under an older
    /// generation never write back.
    generation: u64,
    next_fetch_id: u64,
    in_flight: Option<InFlight<T>>,
    /// Whether the persisted slot has been consulted (or made irrelevant).
    restored: bool,
}

struct Inner<T> {
    source: Arc<dyn ContextSource<T>>,
    slot: Arc<dyn ContextSlot<T>>,
    policy: ContextCacheConfig,
    state: Mutex<State<T>>,
    /// Serializes writes to the slot with the generation check that guards them.
    persist_lock: tokio::sync::Mutex<()>,
}

enum Decision<T> {
    Hit(Option<T>),
    Wait(SharedFetch<T>),
}

enum Persist<T> {
    Save(PersistedContext<T>),
    Clear,
    Nothing,
}

/// Single-slot cache with shared in-flight fetch.
pub struct ContextCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ContextCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> State<T> {
    fn age(&self) -> Option<Duration> {
        self.fetched_at.map(|t| t.elapsed() + self.restored_age)
    }

    fn fill(&mut self, value: Option<T>) {
        self.value = value;
        self.fetched_at = Some(Instant::now());
        self.restored_age = Duration::ZERO;
    }

    fn empty(&mut self) {
        self.value = None;
        self.fetched_at = None;
        self.restored_age = Duration::ZERO;
    }
}

impl<T> ContextCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(
        source: Arc<dyn ContextSource<T>>,
        slot: Arc<dyn ContextSlot<T>>,
        policy: ContextCacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                slot,
                policy,
                state: Mutex::new(State {
                    value: None,
                    fetched_at: None,
                    restored_age: Duration::ZERO,
                    generation: 0,
                    next_fetch_id: 0,
                    in_flight: None,
                    restored: false,
                }),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Read the cached value, fetching when needed.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when a fetch was needed and failed. The
    /// previously cached value (if any) is kept.
    pub async fn get(&self, options: GetOptions) -> Result<Option<T>, GatewayError> {
        self.ensure_restored().await;

        let (decision, expired) = {
            let mut state = self.lock_state();
            let expired = self.expire_if_due(&mut state);
            (self.decide(&mut state, options), expired)
        };

        if expired {
            self.clear_persisted_if_empty().await;
        }

        match decision {
            Decision::Hit(value) => Ok(value),
            Decision::Wait(fetch) => fetch.await,
        }
    }

    /// Write a value through to memory and storage without fetching.
    /// Supersedes any fetch in flight.
    pub async fn set(&self, value: T) {
        let _persist = self.inner.persist_lock.lock().await;
        {
            let mut state = self.lock_state();
            state.generation += 1;
            state.in_flight = None;
            state.fill(Some(value.clone()));
            state.restored = true;
        }
        self.inner
            .slot
            .save(&PersistedContext {
                value,
                fetched_at: Utc::now(),
            })
            .await;
        debug!("context set");
    }

    /// Drop the cached value from memory and storage. Does not refetch.
    pub async fn invalidate(&self) {
        self.invalidate_memory();
        self.clear_persisted_if_empty().await;
    }

    /// Drop the in-memory value whenever the session is cleared.
    ///
    /// Only memory is touched here. The session clears its storage keys,
    /// the persisted slot included, in one operation right after publishing,
    /// and the slot is never re-read once the entry has been invalidated.
    pub fn bind(&self, events: &EventChannel) -> SubscriptionToken {
        let cache = self.clone();
        events.subscribe(Topic::SessionCleared, move |_| {
            cache.invalidate_memory();
            Ok(())
        })
    }

    /// Current state without triggering a restore or fetch.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot<T> {
        let state = self.lock_state();
        let age = state.age();
        let freshness = match age {
            None => Freshness::Empty,
            Some(age) if age > self.inner.policy.expire_after => Freshness::Expired,
            Some(age) if age > self.inner.policy.stale_after => Freshness::Stale,
            Some(_) => Freshness::Fresh,
        };
        ContextSnapshot {
            value: state.value.clone(),
            age,
            freshness,
            in_flight: state.in_flight.is_some(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State<T>> {
        match self.inner.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn invalidate_memory(&self) {
        let mut state = self.lock_state();
        state.generation += 1;
        state.in_flight = None;
        state.empty();
        state.restored = true;
        debug!("context invalidated");
    }

    /// Returns `true` if the entry was expired and cleared.
    fn expire_if_due(&self, state: &mut State<T>) -> bool {
        let expired = state
            .age()
            .is_some_and(|age| age > self.inner.policy.expire_after);
        if expired {
            debug!("context expired");
            state.empty();
        }
        expired
    }

    fn decide(&self, state: &mut State<T>, options: GetOptions) -> Decision<T> {
        if let Some(in_flight) = &state.in_flight {
            debug!("joining in-flight context fetch");
            return Decision::Wait(in_flight.future.clone());
        }

        let needs_fetch = match state.age() {
            None => true,
            Some(_) if options.force_refresh => true,
            Some(age) => age > self.inner.policy.stale_after && !options.allow_stale,
        };
        if !needs_fetch {
            return Decision::Hit(state.value.clone());
        }

        let id = state.next_fetch_id;
        state.next_fetch_id += 1;
        let generation = state.generation;

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(run_fetch(inner, generation, id));
        let future = task
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(GatewayError::Network(format!("context fetch aborted: {e}")))
                })
            })
            .boxed()
            .shared();

        debug!(generation, "starting context fetch");
        state.in_flight = Some(InFlight {
            id,
            future: future.clone(),
        });
        Decision::Wait(future)
    }

    async fn ensure_restored(&self) {
        if self.lock_state().restored {
            return;
        }

        let _persist = self.inner.persist_lock.lock().await;
        let loaded = self.inner.slot.load().await;

        let mut discard = false;
        {
            let mut state = self.lock_state();
            if state.restored {
                return;
            }
            state.restored = true;

            if let Some(persisted) = loaded {
                let age = (Utc::now() - persisted.fetched_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if age > self.inner.policy.expire_after {
                    debug!(age_secs = age.as_secs(), "persisted context expired");
                    discard = true;
                } else {
                    state.fill(Some(persisted.value));
                    state.restored_age = age;
                    debug!(age_secs = age.as_secs(), "context restored from storage");
                }
            }
        }

        if discard {
            self.inner.slot.clear().await;
        }
    }

    /// Clear the slot unless memory has been refilled in the meantime.
    async fn clear_persisted_if_empty(&self) {
        let _persist = self.inner.persist_lock.lock().await;
        if self.lock_state().fetched_at.is_none() {
            self.inner.slot.clear().await;
        }
    }
}

async fn run_fetch<T>(inner: Arc<Inner<T>>, generation: u64, id: u64) -> FetchResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    let result = inner.source.fetch().await;

    let _persist = inner.persist_lock.lock().await;
    let (outcome, persist) = {
        let mut state = match inner.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.in_flight.as_ref().is_some_and(|f| f.id == id) {
            state.in_flight = None;
        }
        let current = state.generation == generation;

        match result {
            Ok(value) => {
                let mut persist = Persist::Nothing;
                if current {
                    state.fill(Some(value.clone()));
                    persist = Persist::Save(PersistedContext {
                        value: value.clone(),
                        fetched_at: Utc::now(),
                    });
                } else {
                    debug!("discarding superseded context fetch");
                }
                (Ok(Some(value)), persist)
            }
            Err(GatewayError::NotFound { .. }) => {
                let mut persist = Persist::Nothing;
                if current {
                    state.fill(None);
                    persist = Persist::Clear;
                }
                (Ok(None), persist)
            }
            Err(e) => {
                warn!(error = %e, "context fetch failed, keeping previous value");
                (Err(e), Persist::Nothing)
            }
        }
    };

    match persist {
        Persist::Save(context) => inner.slot.save(&context).await,
        Persist::Clear => inner.slot.clear().await,
        Persist::Nothing => {}
    }

    outcome
}
