use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{
    error::{LedgerError, Result},
    store::{RankedStore, counted_tokens_key},
};

#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Slot>>,
}

struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

enum Value {
    Ranked(HashMap<String, f64>),
    Counter(i64),
    Tokens(HashSet<String>),
}

/// Redis ordering for ranked sets: score, then member bytes.
fn by_rank(a: &(String, f64), b: &(String, f64)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
}

struct Slots<'a>(MutexGuard<'a, HashMap<String, Slot>>);

impl Slots<'_> {
    fn live(&mut self, key: &str) -> Option<&mut Slot> {
        let expired = self
            .0
            .get(key)
            .and_then(|slot| slot.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.0.remove(key);
        }

        self.0.get_mut(key)
    }

    fn ranked(&mut self, key: &str) -> Result<&mut HashMap<String, f64>> {
        if self.live(key).is_none() {
            self.0.insert(
                key.to_string(),
                Slot {
                    value: Value::Ranked(HashMap::new()),
                    expires_at: None,
                },
            );
        }

        match self.0.get_mut(key).map(|slot| &mut slot.value) {
            Some(Value::Ranked(members)) => Ok(members),
            _ => Err(LedgerError::WrongType(key.to_string())),
        }
    }

    fn expire(&mut self, key: &str, ttl: Duration) {
        if let Some(slot) = self.0.get_mut(key) {
            slot.expires_at = Some(Instant::now() + ttl);
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> Slots<'_> {
        Slots(self.slots.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Remaining time to live, if the key exists and has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.slots()
            .live(key)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.slots().live(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut slots = self.slots();
        let mut keys = slots.0.keys().cloned().collect::<Vec<_>>();
        keys.retain(|key| slots.live(key).is_some());
        keys.sort();
        keys
    }
}

#[async_trait]
impl RankedStore for MemoryStore {
    async fn push_capped(
        &self,
        key: &str,
        member: &str,
        score: f64,
        keep: usize,
        ttl: Duration,
    ) -> Result<()> {
        let mut slots = self.slots();
        let members = slots.ranked(key)?;
        members.insert(member.to_string(), score);

        if members.len() > keep {
            let mut ranked = members
                .iter()
                .map(|(member, score)| (member.clone(), *score))
                .collect::<Vec<_>>();
            ranked.sort_by(by_rank);

            for (member, _) in &ranked[..ranked.len() - keep] {
                members.remove(member);
            }
        }

        if members.is_empty() {
            slots.0.remove(key);
        } else {
            slots.expire(key, ttl);
        }
        Ok(())
    }

    async fn increment_once(&self, key: &str, token: &str, ttl: Duration) -> Result<i64> {
        let tokens_key = counted_tokens_key(key);
        let mut slots = self.slots();

        let fresh = match slots.live(&tokens_key) {
            Some(Slot {
                value: Value::Tokens(tokens),
                ..
            }) => tokens.insert(token.to_string()),
            Some(_) => return Err(LedgerError::WrongType(tokens_key)),
            None => {
                slots.0.insert(
                    tokens_key.clone(),
                    Slot {
                        value: Value::Tokens(HashSet::from([token.to_string()])),
                        expires_at: None,
                    },
                );
                true
            }
        };

        let count = match slots.live(key) {
            Some(Slot {
                value: Value::Counter(count),
                ..
            }) => {
                if fresh {
                    *count += 1;
                }
                *count
            }
            Some(_) => return Err(LedgerError::WrongType(key.to_string())),
            None => {
                let count = i64::from(fresh);
                slots.0.insert(
                    key.to_string(),
                    Slot {
                        value: Value::Counter(count),
                        expires_at: None,
                    },
                );
                count
            }
        };

        slots.expire(key, ttl);
        slots.expire(&tokens_key, ttl);
        Ok(count)
    }

    async fn increment_scores(
        &self,
        key: &str,
        deltas: &[(String, f64)],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut slots = self.slots();
        let members = slots.ranked(key)?;

        for (member, delta) in deltas {
            *members.entry(member.clone()).or_insert(0.0) += delta;
        }

        if members.is_empty() {
            slots.0.remove(key);
        } else if let Some(ttl) = ttl {
            slots.expire(key, ttl);
        }
        Ok(())
    }

    async fn replace(&self, source: &str, target: &str) -> Result<()> {
        let mut slots = self.slots();

        if slots.live(source).is_none() {
            return Err(LedgerError::MissingKey(source.to_string()));
        }

        if let Some(mut slot) = slots.0.remove(source) {
            slot.expires_at = None;
            slots.0.insert(target.to_string(), slot);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.slots().0.remove(key);
        Ok(())
    }

    async fn top(&self, key: &str, limit: Option<usize>) -> Result<Vec<(String, f64)>> {
        let mut slots = self.slots();

        let mut ranked = match slots.live(key) {
            None => return Ok(Vec::new()),
            Some(Slot {
                value: Value::Ranked(members),
                ..
            }) => members
                .iter()
                .map(|(member, score)| (member.clone(), *score))
                .collect::<Vec<_>>(),
            Some(_) => return Err(LedgerError::WrongType(key.to_string())),
        };

        ranked.sort_by(|a, b| by_rank(b, a));
        ranked.truncate(limit.unwrap_or(usize::MAX));
        Ok(ranked)
    }

    async fn counter(&self, key: &str) -> Result<Option<i64>> {
        match self.slots().live(key) {
            None => Ok(None),
            Some(Slot {
                value: Value::Counter(count),
                ..
            }) => Ok(Some(*count)),
            Some(_) => Err(LedgerError::WrongType(key.to_string())),
        }
    }
}
