use super::{check_ttl, Datastore, ScoreBound, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Clone)]
enum SlotValue {
    Text(String),
    /// member -> score
    SortedSet(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: SlotValue,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Backend(format!(
        "WRONGTYPE Operation against key {} holding the wrong kind of value",
        key
    ))
}

/// In-process store with Redis-like semantics
///
/// Expired keys are dropped lazily when touched, and a sorted set that loses
/// its last member disappears, as it would in Redis. Cloning shares the
/// underlying map.
#[derive(Clone, Default)]
pub struct MemoryDatastore {
    entries: Arc<DashMap<String, Slot>>,
}

impl MemoryDatastore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys (for testing/monitoring)
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_if_expired(&self, key: &str) {
        let now = Instant::now();
        if self
            .entries
            .remove_if(key, |_, slot| slot.is_expired(now))
            .is_some()
        {
            trace!(key, "Evicted expired key");
        }
    }

    fn store_text(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            Slot {
                value: SlotValue::Text(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn remove_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64, StoreError> {
        self.purge_if_expired(key);

        let (removed, now_empty) = match self.entries.get_mut(key) {
            None => return Ok(0),
            Some(mut slot) => match &mut slot.value {
                SlotValue::SortedSet(members) => {
                    let before = members.len();
                    members.retain(|_, score| {
                        !(min.admits_from_below(*score) && max.admits_from_above(*score))
                    });
                    ((before - members.len()) as u64, members.is_empty())
                }
                SlotValue::Text(_) => return Err(wrong_type(key)),
            },
        };

        if now_empty {
            self.entries.remove_if(key, |_, slot| {
                matches!(&slot.value, SlotValue::SortedSet(m) if m.is_empty())
            });
        }

        Ok(removed)
    }

    async fn cardinality(&self, key: &str) -> Result<u64, StoreError> {
        self.purge_if_expired(key);

        match self.entries.get(key) {
            None => Ok(0),
            Some(slot) => match &slot.value {
                SlotValue::SortedSet(members) => Ok(members.len() as u64),
                SlotValue::Text(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn add_scored(&self, key: &str, members: &[(f64, String)]) -> Result<u64, StoreError> {
        self.purge_if_expired(key);

        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Slot {
            value: SlotValue::SortedSet(HashMap::new()),
            expires_at: None,
        });

        match &mut slot.value {
            SlotValue::SortedSet(set) => {
                let mut added = 0;
                for (score, member) in members {
                    if set.insert(member.clone(), *score).is_none() {
                        added += 1;
                    }
                }
                Ok(added)
            }
            SlotValue::Text(_) => Err(wrong_type(key)),
        }
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        check_ttl(ttl)?;
        self.store_text(key, value, Some(ttl));
        Ok(())
    }

    async fn exists(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut count = 0;
        for key in keys {
            self.purge_if_expired(key);
            if self.entries.contains_key(key) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        self.purge_if_expired(key);

        match self.entries.get(key) {
            None => Err(StoreError::NotFound(key.to_string())),
            Some(slot) => match &slot.value {
                SlotValue::Text(value) => Ok(value.clone()),
                SlotValue::SortedSet(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let ttl = if ttl.is_zero() { None } else { Some(ttl) };
        self.store_text(key, value, ttl);
        Ok(())
    }
}
