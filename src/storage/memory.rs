//! In-memory storage backend.
//!
//! Thread-safe implementation of [`KeyValueStore`] following Redis semantics
//! closely enough for the object layer: aggregates disappear when they become
//! empty, expired keys read as missing, and sorted sets order by score with
//! ties broken by member.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::storage::traits::{KeyValueStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

fn wrong_type(key: &str, expected: &'static str) -> StorageError {
    StorageError::WrongType {
        key: key.to_string(),
        expected,
    }
}

/// Total order over scores so they can key a `BTreeSet`.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default, Clone)]
struct SortedSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: f64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(Score(old), member.to_string()));
        }
        self.ordered.insert((Score(score), member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(old) => {
                self.ordered.remove(&(Score(old), member.to_string()));
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    fn slice(&self, start: i64, stop: i64) -> Vec<(String, f64)> {
        let Some((from, to)) = rank_bounds(self.len(), start, stop) else {
            return Vec::new();
        };
        self.ordered
            .iter()
            .skip(from)
            .take(to - from + 1)
            .map(|(score, member)| (member.clone(), score.0))
            .collect()
    }
}

/// Resolve Redis-style inclusive rank bounds against a set of `len` members.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn rank_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let from = if start < 0 { (len + start).max(0) } else { start };
    let to = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if from > to || from >= len || to < 0 {
        return None;
    }
    Some((from as usize, to as usize))
}

#[derive(Debug, Clone)]
enum Data {
    Scalar(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    Sorted(SortedSet),
}

impl Data {
    fn is_empty(&self) -> bool {
        match self {
            Self::Scalar(_) => false,
            Self::Hash(h) => h.is_empty(),
            Self::Set(s) => s.is_empty(),
            Self::Sorted(z) => z.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(data: Data) -> Self {
        Self {
            data,
            expires_at: None,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<String, Entry>,
}

impl StoreState {
    fn live(&self, key: &str) -> Option<&Data> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| &e.data)
    }

    fn live_mut(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn drop_if_empty(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(|e| e.data.is_empty()) {
            self.entries.remove(key);
        }
    }

    fn hash(&self, key: &str) -> Result<Option<&HashMap<String, String>>, StorageError> {
        match self.live(key) {
            None => Ok(None),
            Some(Data::Hash(h)) => Ok(Some(h)),
            Some(_) => Err(wrong_type(key, "hash")),
        }
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>, StorageError> {
        if self.live_mut(key).is_none() {
            self.entries
                .insert(key.to_string(), Entry::new(Data::Hash(HashMap::new())));
        }
        match self.entries.get_mut(key).map(|e| &mut e.data) {
            Some(Data::Hash(h)) => Ok(h),
            _ => Err(wrong_type(key, "hash")),
        }
    }

    fn sorted(&self, key: &str) -> Result<Option<&SortedSet>, StorageError> {
        match self.live(key) {
            None => Ok(None),
            Some(Data::Sorted(z)) => Ok(Some(z)),
            Some(_) => Err(wrong_type(key, "sorted set")),
        }
    }

    fn sorted_mut(&mut self, key: &str) -> Result<&mut SortedSet, StorageError> {
        if self.live_mut(key).is_none() {
            self.entries
                .insert(key.to_string(), Entry::new(Data::Sorted(SortedSet::default())));
        }
        match self.entries.get_mut(key).map(|e| &mut e.data) {
            Some(Data::Sorted(z)) => Ok(z),
            _ => Err(wrong_type(key, "sorted set")),
        }
    }

    fn set(&self, key: &str) -> Result<Option<&HashSet<String>>, StorageError> {
        match self.live(key) {
            None => Ok(None),
            Some(Data::Set(s)) => Ok(Some(s)),
            Some(_) => Err(wrong_type(key, "set")),
        }
    }

    fn set_mut(&mut self, key: &str) -> Result<&mut HashSet<String>, StorageError> {
        if self.live_mut(key).is_none() {
            self.entries
                .insert(key.to_string(), Entry::new(Data::Set(HashSet::new())));
        }
        match self.entries.get_mut(key).map(|e| &mut e.data) {
            Some(Data::Set(s)) => Ok(s),
            _ => Err(wrong_type(key, "set")),
        }
    }
}

/// Thread-safe in-memory key-value store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    held_locks: Mutex<HashSet<String>>,
    released: Condvar,
}

impl InMemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys, for tests and diagnostics.
    pub fn key_count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("key_count"))?;
        let now = Instant::now();
        Ok(state.entries.values().filter(|e| e.is_live(now)).count())
    }

    /// Returns true if `key` exists and has not expired.
    pub fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("exists"))?;
        Ok(state.live(key).is_some())
    }
}

impl KeyValueStore for InMemoryStore {
    fn incr(&self, key: &str) -> Result<i64, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("incr"))?;
        match state.live_mut(key) {
            None => {
                state
                    .entries
                    .insert(key.to_string(), Entry::new(Data::Scalar("1".to_string())));
                Ok(1)
            }
            Some(entry) => match &mut entry.data {
                Data::Scalar(raw) => {
                    let current: i64 = raw.parse().map_err(|_| StorageError::NotAnInteger {
                        key: key.to_string(),
                    })?;
                    let next = current + 1;
                    *raw = next.to_string();
                    Ok(next)
                }
                _ => Err(wrong_type(key, "counter")),
            },
        }
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("hget"))?;
        Ok(state.hash(key)?.and_then(|h| h.get(field).cloned()))
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("hset"))?;
        state
            .hash_mut(key)?
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hdel(&self, key: &str, field: &str) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("hdel"))?;
        if state.hash(key)?.is_none() {
            return Ok(false);
        }
        let removed = state.hash_mut(key)?.remove(field).is_some();
        state.drop_if_empty(key);
        Ok(removed)
    }

    fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), StorageError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().map_err(|_| lock_err("hset_all"))?;
        let hash = state.hash_mut(key)?;
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("hget_all"))?;
        Ok(state.hash(key)?.cloned().unwrap_or_default())
    }

    fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StorageError> {
        if score.is_nan() {
            return Err(StorageError::Backend("score is not a number".to_string()));
        }
        let mut state = self.state.write().map_err(|_| lock_err("zadd"))?;
        state.sorted_mut(key)?.insert(member, score);
        Ok(())
    }

    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("zscore"))?;
        Ok(state.sorted(key)?.and_then(|z| z.scores.get(member).copied()))
    }

    fn zrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("zrange"))?;
        Ok(state
            .sorted(key)?
            .map(|z| z.slice(start, stop))
            .unwrap_or_default())
    }

    fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(usize, usize)>,
    ) -> Result<Vec<String>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("zrange_by_score"))?;
        let Some(z) = state.sorted(key)? else {
            return Ok(Vec::new());
        };
        let (offset, count) = limit.unwrap_or((0, usize::MAX));
        Ok(z.ordered
            .iter()
            .filter(|(score, _)| score.0 >= min && score.0 <= max)
            .skip(offset)
            .take(count)
            .map(|(_, member)| member.clone())
            .collect())
    }

    fn zcard(&self, key: &str) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("zcard"))?;
        Ok(state.sorted(key)?.map_or(0, SortedSet::len))
    }

    fn zrem(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("zrem"))?;
        if state.sorted(key)?.is_none() {
            return Ok(false);
        }
        let removed = state.sorted_mut(key)?.remove(member);
        state.drop_if_empty(key);
        Ok(removed)
    }

    fn zrem_range_by_rank(&self, key: &str, start: i64, stop: i64) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("zrem_range_by_rank"))?;
        if state.sorted(key)?.is_none() {
            return Ok(0);
        }
        let z = state.sorted_mut(key)?;
        let doomed = z.slice(start, stop);
        for (member, _) in &doomed {
            z.remove(member);
        }
        state.drop_if_empty(key);
        Ok(doomed.len())
    }

    fn zincr_from_rank(&self, key: &str, start: usize, delta: f64) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("zincr_from_rank"))?;
        if state.sorted(key)?.is_none() {
            return Ok(());
        }
        let z = state.sorted_mut(key)?;
        let tail: Vec<(String, f64)> = z
            .ordered
            .iter()
            .skip(start)
            .map(|(score, member)| (member.clone(), score.0))
            .collect();
        for (member, score) in tail {
            z.insert(&member, score + delta);
        }
        Ok(())
    }

    fn zinterstore(&self, dest: &str, sources: &[String]) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("zinterstore"))?;

        let mut result = SortedSet::default();
        let mut sets = Vec::with_capacity(sources.len());
        for key in sources {
            sets.push(state.sorted(key)?);
        }
        if let Some((Some(first), rest)) = sets.split_first() {
            'members: for (member, score) in &first.scores {
                let mut total = *score;
                for other in rest {
                    match other.and_then(|z| z.scores.get(member)) {
                        Some(s) => total += s,
                        None => continue 'members,
                    }
                }
                result.insert(member, total);
            }
        }

        let len = result.len();
        state.entries.remove(dest);
        if len > 0 {
            state
                .entries
                .insert(dest.to_string(), Entry::new(Data::Sorted(result)));
        }
        Ok(len)
    }

    fn sadd(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("sadd"))?;
        Ok(state.set_mut(key)?.insert(member.to_string()))
    }

    fn srem(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("srem"))?;
        if state.set(key)?.is_none() {
            return Ok(false);
        }
        let removed = state.set_mut(key)?.remove(member);
        state.drop_if_empty(key);
        Ok(removed)
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("sismember"))?;
        Ok(state.set(key)?.is_some_and(|s| s.contains(member)))
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("smembers"))?;
        Ok(state
            .set(key)?
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("get"))?;
        match state.live(key) {
            None => Ok(None),
            Some(Data::Scalar(v)) => Ok(Some(v.clone())),
            Some(_) => Err(wrong_type(key, "scalar")),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("set"))?;
        state.entries.insert(
            key.to_string(),
            Entry {
                data: Data::Scalar(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    fn set_nx(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("set_nx"))?;
        if state.live_mut(key).is_some() {
            return Ok(false);
        }
        state
            .entries
            .insert(key.to_string(), Entry::new(Data::Scalar(value.to_string())));
        Ok(true)
    }

    fn del(&self, key: &str) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("del"))?;
        let existed = state.live_mut(key).is_some();
        state.entries.remove(key);
        Ok(existed)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("expire"))?;
        match state.live_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn lock(&self, name: &str, timeout: Option<Duration>) -> Result<bool, StorageError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut held = self.held_locks.lock().map_err(|_| lock_err("lock"))?;
        while held.contains(name) {
            match deadline {
                None => {
                    held = self.released.wait(held).map_err(|_| lock_err("lock"))?;
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    let (guard, _) = self
                        .released
                        .wait_timeout(held, deadline - now)
                        .map_err(|_| lock_err("lock"))?;
                    held = guard;
                }
            }
        }
        held.insert(name.to_string());
        Ok(true)
    }

    fn unlock(&self, name: &str) -> Result<(), StorageError> {
        let mut held = self.held_locks.lock().map_err(|_| lock_err("unlock"))?;
        if held.remove(name) {
            self.released.notify_all();
        }
        Ok(())
    }
}
