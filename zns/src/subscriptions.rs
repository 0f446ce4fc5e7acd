// Domain-change and cache-event pub/sub with bounded per-subscriber queues
//
// Delivery is pull-only: transport handlers poll get_events(). Queues are
// bounded at 1000 events; on overflow the oldest event is dropped silently
// and ordering of the remainder is preserved.

use ghostbridge_shared::types::{
    now_unix_secs, CacheEvent, CacheEventType, DomainChangeEvent, RecordType,
    SubscriptionRequest,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Per-subscription queue bound
pub const MAX_QUEUED_EVENTS: usize = 1_000;

/// Wildcard bucket key for "watch all domains"
const WILDCARD: &str = "*";

// One process-wide counter keeps ids unique across both managers
static SUBSCRIPTION_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_subscription_id(client_id: &str) -> String {
    let seq = SUBSCRIPTION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("sub_{}_{}", client_id, seq)
}

struct BoundedQueue<T> {
    events: VecDeque<T>,
}

impl<T> BoundedQueue<T> {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
        }
    }

    /// Append; at capacity the oldest event is dropped, never the new one
    fn push(&mut self, event: T) {
        if self.events.len() >= MAX_QUEUED_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn drain(&mut self, max: usize) -> Vec<T> {
        let take = max.min(self.events.len());
        self.events.drain(..take).collect()
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}

struct DomainSubscription {
    id: String,
    #[allow(dead_code)]
    client_id: String,
    /// Empty means wildcard
    domains: Vec<String>,
    /// Empty means all record types
    record_types: Vec<RecordType>,
    #[allow(dead_code)]
    include_metadata: bool,
    queue: BoundedQueue<DomainChangeEvent>,
    #[allow(dead_code)]
    created_at: u64,
    last_activity: u64,
}

impl DomainSubscription {
    fn accepts(&self, event: &DomainChangeEvent) -> bool {
        if !self.domains.is_empty() && !self.domains.iter().any(|d| d == &event.domain) {
            return false;
        }
        if self.record_types.is_empty() {
            return true;
        }
        event
            .new_records
            .iter()
            .any(|r| self.record_types.contains(&r.record_type))
    }
}

/// Subscriptions indexed by watched domain plus a wildcard bucket
pub struct DomainSubscriptionManager {
    subscriptions: RwLock<HashMap<String, DomainSubscription>>,
    domain_index: RwLock<HashMap<String, HashSet<String>>>,
}

impl DomainSubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            domain_index: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, client_id: &str, request: &SubscriptionRequest) -> String {
        let id = next_subscription_id(client_id);
        let now = now_unix_secs();
        let subscription = DomainSubscription {
            id: id.clone(),
            client_id: client_id.to_string(),
            domains: request.domains.clone(),
            record_types: request.record_types.clone(),
            include_metadata: request.include_metadata,
            queue: BoundedQueue::new(),
            created_at: now,
            last_activity: now,
        };

        let mut index = self.domain_index.write();
        if request.domains.is_empty() {
            index.entry(WILDCARD.to_string()).or_default().insert(id.clone());
        } else {
            for domain in &request.domains {
                index.entry(domain.clone()).or_default().insert(id.clone());
            }
        }
        drop(index);

        self.subscriptions.write().insert(id.clone(), subscription);
        debug!("🔔 Created domain subscription {}", id);
        id
    }

    /// Offer `event` to the union of direct and wildcard subscribers.
    /// Returns how many queues accepted it.
    pub fn publish_change(&self, event: &DomainChangeEvent) -> usize {
        let index = self.domain_index.read();
        let mut candidates: HashSet<String> = HashSet::new();
        if let Some(direct) = index.get(&event.domain) {
            candidates.extend(direct.iter().cloned());
        }
        if let Some(wildcard) = index.get(WILDCARD) {
            candidates.extend(wildcard.iter().cloned());
        }
        drop(index);

        let mut delivered = 0;
        let mut subscriptions = self.subscriptions.write();
        for id in candidates {
            if let Some(subscription) = subscriptions.get_mut(&id) {
                if subscription.accepts(event) {
                    subscription.queue.push(event.clone());
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Drain up to `max` oldest events. None for an unknown subscription.
    pub fn get_events(&self, subscription_id: &str, max: usize) -> Option<Vec<DomainChangeEvent>> {
        let mut subscriptions = self.subscriptions.write();
        let subscription = subscriptions.get_mut(subscription_id)?;
        subscription.last_activity = now_unix_secs();
        Some(subscription.queue.drain(max))
    }

    pub fn cancel(&self, subscription_id: &str) -> bool {
        let removed = self.subscriptions.write().remove(subscription_id);
        if removed.is_some() {
            let mut index = self.domain_index.write();
            for bucket in index.values_mut() {
                bucket.remove(subscription_id);
            }
            index.retain(|_, bucket| !bucket.is_empty());
            true
        } else {
            false
        }
    }

    pub fn contains(&self, subscription_id: &str) -> bool {
        self.subscriptions.read().contains_key(subscription_id)
    }

    pub fn count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Drop subscriptions idle past `max_idle_secs`
    pub fn prune_idle(&self, max_idle_secs: u64) -> usize {
        let now = now_unix_secs();
        let stale: Vec<String> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| now.saturating_sub(s.last_activity) > max_idle_secs)
            .map(|s| s.id.clone())
            .collect();
        for id in &stale {
            self.cancel(id);
        }
        stale.len()
    }
}

impl Default for DomainSubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

struct CacheSubscription {
    #[allow(dead_code)]
    id: String,
    #[allow(dead_code)]
    client_id: String,
    hits: bool,
    misses: bool,
    evictions: bool,
    queue: BoundedQueue<CacheEvent>,
    last_activity: u64,
}

impl CacheSubscription {
    fn accepts(&self, event_type: CacheEventType) -> bool {
        match event_type {
            CacheEventType::Hit => self.hits,
            CacheEventType::Miss => self.misses,
            CacheEventType::Eviction => self.evictions,
            // A flush touches every entry; all subscribers hear about it
            CacheEventType::Flush => true,
        }
    }
}

/// Broadcasts cache events to subscribers that opted into the event class
pub struct CacheSubscriptionManager {
    subscriptions: RwLock<HashMap<String, CacheSubscription>>,
}

impl CacheSubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, client_id: &str, hits: bool, misses: bool, evictions: bool) -> String {
        let id = next_subscription_id(client_id);
        self.subscriptions.write().insert(
            id.clone(),
            CacheSubscription {
                id: id.clone(),
                client_id: client_id.to_string(),
                hits,
                misses,
                evictions,
                queue: BoundedQueue::new(),
                last_activity: now_unix_secs(),
            },
        );
        debug!("🔔 Created cache subscription {}", id);
        id
    }

    pub fn publish(&self, event: &CacheEvent) -> usize {
        let mut delivered = 0;
        let mut subscriptions = self.subscriptions.write();
        for subscription in subscriptions.values_mut() {
            if subscription.accepts(event.event_type) {
                subscription.queue.push(event.clone());
                delivered += 1;
            }
        }
        delivered
    }

    pub fn get_events(&self, subscription_id: &str, max: usize) -> Option<Vec<CacheEvent>> {
        let mut subscriptions = self.subscriptions.write();
        let subscription = subscriptions.get_mut(subscription_id)?;
        subscription.last_activity = now_unix_secs();
        Some(subscription.queue.drain(max))
    }

    pub fn cancel(&self, subscription_id: &str) -> bool {
        self.subscriptions.write().remove(subscription_id).is_some()
    }

    pub fn contains(&self, subscription_id: &str) -> bool {
        self.subscriptions.read().contains_key(subscription_id)
    }

    pub fn count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn prune_idle(&self, max_idle_secs: u64) -> usize {
        let now = now_unix_secs();
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|_, s| now.saturating_sub(s.last_activity) <= max_idle_secs);
        before - subscriptions.len()
    }

    /// Queue depth, for tests and diagnostics
    pub fn queued(&self, subscription_id: &str) -> Option<usize> {
        self.subscriptions
            .read()
            .get(subscription_id)
            .map(|s| s.queue.len())
    }
}

impl Default for CacheSubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
