#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("value is not an integer or out of range")]
    ValueNotInteger,
    #[error("increment or decrement would overflow")]
    IntegerOverflow,
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("weights must match the number of source keys")]
    WeightCountMismatch,
}

/// What a key holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    List(VecDeque<String>),
    /// Member to score. Sorted only when a rank or range is read.
    SortedSet(HashMap<String, f64>),
}

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    value: Value,
    deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PttlValue {
    KeyMissing,
    NoExpiry,
    Remaining(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    List,
    ZSet,
}

impl ValueType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::List => "list",
            Self::ZSet => "zset",
        }
    }
}

/// One end of a score range. `Exclusive` mirrors the `(score` syntax.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    Inclusive(f64),
    Exclusive(f64),
}

impl ScoreBound {
    pub const NEG_INF: Self = Self::Inclusive(f64::NEG_INFINITY);
    pub const POS_INF: Self = Self::Inclusive(f64::INFINITY);

    fn admits_from_below(self, score: f64) -> bool {
        match self {
            Self::Inclusive(min) => score >= min,
            Self::Exclusive(min) => score > min,
        }
    }

    fn admits_from_above(self, score: f64) -> bool {
        match self {
            Self::Inclusive(max) => score <= max,
            Self::Exclusive(max) => score < max,
        }
    }
}

/// How ZINTERSTORE combines the weighted scores of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregate {
    #[default]
    Sum,
    Min,
    Max,
}

impl Aggregate {
    fn combine(self, acc: f64, next: f64) -> f64 {
        match self {
            Self::Sum => acc + next,
            Self::Min => acc.min(next),
            Self::Max => acc.max(next),
        }
    }
}

#[derive(Debug, Default)]
pub struct Store {
    slots: HashMap<String, Slot>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// String value at `key`, or `None` when absent.
    /// Lists and sorted sets are `WrongType`.
    pub fn get(&mut self, key: &str, now_ms: u64) -> Result<Option<String>, StoreError> {
        self.evict_stale(key, now_ms);
        match self.slots.get(key) {
            Some(slot) => match &slot.value {
                Value::String(v) => Ok(Some(v.clone())),
                _ => Err(StoreError::WrongType),
            },
            None => Ok(None),
        }
    }

    pub fn set(&mut self, key: &str, value: String, px_ttl_ms: Option<u64>, now_ms: u64) {
        let deadline_ms = px_ttl_ms.map(|ttl| now_ms.saturating_add(ttl));
        self.slots.insert(
            key.to_owned(),
            Slot {
                value: Value::String(value),
                deadline_ms,
            },
        );
    }

    /// Set only when the key is absent (after lazy expiry). Returns whether it was set.
    pub fn setnx(&mut self, key: &str, value: String, now_ms: u64) -> bool {
        self.evict_stale(key, now_ms);
        if self.slots.contains_key(key) {
            return false;
        }
        self.set(key, value, None, now_ms);
        true
    }

    pub fn del(&mut self, keys: &[String], now_ms: u64) -> u64 {
        let mut removed = 0_u64;
        for key in keys {
            self.evict_stale(key, now_ms);
            if self.slots.remove(key.as_str()).is_some() {
                removed = removed.saturating_add(1);
            }
        }
        removed
    }

    pub fn exists(&mut self, key: &str, now_ms: u64) -> bool {
        self.evict_stale(key, now_ms);
        self.slots.contains_key(key)
    }

    pub fn incrby(&mut self, key: &str, delta: i64, now_ms: u64) -> Result<i64, StoreError> {
        self.evict_stale(key, now_ms);
        let (current, deadline_ms) = match self.slots.get(key) {
            Some(slot) => match &slot.value {
                Value::String(v) => (parse_i64(v)?, slot.deadline_ms),
                _ => return Err(StoreError::WrongType),
            },
            None => (0_i64, None),
        };
        let next = current
            .checked_add(delta)
            .ok_or(StoreError::IntegerOverflow)?;
        self.slots.insert(
            key.to_owned(),
            Slot {
                value: Value::String(next.to_string()),
                deadline_ms,
            },
        );
        Ok(next)
    }

    pub fn expire_milliseconds(&mut self, key: &str, milliseconds: i64, now_ms: u64) -> bool {
        self.evict_stale(key, now_ms);
        if !self.slots.contains_key(key) {
            return false;
        }
        if milliseconds <= 0 {
            self.slots.remove(key);
            return true;
        }

        let ttl_ms = u64::try_from(milliseconds).unwrap_or(u64::MAX);
        let deadline_ms = now_ms.saturating_add(ttl_ms);
        if let Some(slot) = self.slots.get_mut(key) {
            slot.deadline_ms = Some(deadline_ms);
        }
        true
    }

    #[must_use]
    pub fn pttl(&mut self, key: &str, now_ms: u64) -> PttlValue {
        self.evict_stale(key, now_ms);
        let Some(slot) = self.slots.get(key) else {
            return PttlValue::KeyMissing;
        };
        match slot.deadline_ms {
            None => PttlValue::NoExpiry,
            Some(deadline_ms) => {
                let remaining = deadline_ms.saturating_sub(now_ms);
                PttlValue::Remaining(i64::try_from(remaining).unwrap_or(i64::MAX))
            }
        }
    }

    pub fn value_type(&mut self, key: &str, now_ms: u64) -> Option<ValueType> {
        self.evict_stale(key, now_ms);
        self.slots.get(key).map(|slot| match slot.value {
            Value::String(_) => ValueType::String,
            Value::List(_) => ValueType::List,
            Value::SortedSet(_) => ValueType::ZSet,
        })
    }

    pub fn flushdb(&mut self) {
        self.slots.clear();
    }

    // ── List operations ─────────────────────────────────────────

    pub fn lpush(
        &mut self,
        key: &str,
        values: &[String],
        now_ms: u64,
    ) -> Result<usize, StoreError> {
        self.evict_stale(key, now_ms);
        let list = self.list_entry(key)?;
        for v in values {
            list.push_front(v.clone());
        }
        Ok(list.len())
    }

    pub fn rpush(
        &mut self,
        key: &str,
        values: &[String],
        now_ms: u64,
    ) -> Result<usize, StoreError> {
        self.evict_stale(key, now_ms);
        let list = self.list_entry(key)?;
        for v in values {
            list.push_back(v.clone());
        }
        Ok(list.len())
    }

    pub fn lpop(&mut self, key: &str, now_ms: u64) -> Result<Option<String>, StoreError> {
        self.evict_stale(key, now_ms);
        let Some(slot) = self.slots.get_mut(key) else {
            return Ok(None);
        };
        let Value::List(l) = &mut slot.value else {
            return Err(StoreError::WrongType);
        };
        let val = l.pop_front();
        if l.is_empty() {
            self.slots.remove(key);
        }
        Ok(val)
    }

    pub fn llen(&mut self, key: &str, now_ms: u64) -> Result<usize, StoreError> {
        self.evict_stale(key, now_ms);
        match self.slots.get(key) {
            Some(slot) => match &slot.value {
                Value::List(l) => Ok(l.len()),
                _ => Err(StoreError::WrongType),
            },
            None => Ok(0),
        }
    }

    pub fn lrange(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
        now_ms: u64,
    ) -> Result<Vec<String>, StoreError> {
        self.evict_stale(key, now_ms);
        match self.slots.get(key) {
            Some(slot) => match &slot.value {
                Value::List(l) => {
                    let Some((s, e)) = clamp_range(start, stop, l.len()) else {
                        return Ok(Vec::new());
                    };
                    Ok(l.iter().skip(s).take(e - s + 1).cloned().collect())
                }
                _ => Err(StoreError::WrongType),
            },
            None => Ok(Vec::new()),
        }
    }

    /// Remove occurrences of `value`: the first `count` from the head when
    /// positive, from the tail when negative, all of them when zero.
    pub fn lrem(
        &mut self,
        key: &str,
        count: i64,
        value: &str,
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        self.evict_stale(key, now_ms);
        let Some(slot) = self.slots.get_mut(key) else {
            return Ok(0);
        };
        let Value::List(l) = &mut slot.value else {
            return Err(StoreError::WrongType);
        };
        let mut removed = 0_u64;
        if count > 0 {
            let limit = count.unsigned_abs();
            let mut i = 0;
            while i < l.len() && removed < limit {
                if l[i] == value {
                    l.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else if count < 0 {
            let limit = count.unsigned_abs();
            let mut i = l.len();
            while i > 0 && removed < limit {
                i -= 1;
                if l[i] == value {
                    l.remove(i);
                    removed += 1;
                }
            }
        } else {
            let old_len = l.len();
            l.retain(|v| v != value);
            removed = (old_len - l.len()) as u64;
        }
        if l.is_empty() {
            self.slots.remove(key);
        }
        Ok(removed)
    }

    /// Keep only the elements in `start..=stop`.
    pub fn ltrim(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        self.evict_stale(key, now_ms);
        let Some(slot) = self.slots.get_mut(key) else {
            return Ok(());
        };
        let Value::List(l) = &mut slot.value else {
            return Err(StoreError::WrongType);
        };
        match clamp_range(start, stop, l.len()) {
            Some((s, e)) => {
                l.truncate(e + 1);
                l.drain(..s);
            }
            None => l.clear(),
        }
        if l.is_empty() {
            self.slots.remove(key);
        }
        Ok(())
    }

    // ── Sorted Set (ZSet) operations ─────────────────────────────

    /// Upsert `(score, member)` pairs; counts only members that were new.
    pub fn zadd(
        &mut self,
        key: &str,
        members: &[(f64, String)],
        now_ms: u64,
    ) -> Result<usize, StoreError> {
        self.evict_stale(key, now_ms);
        let zs = self.zset_entry(key)?;
        let mut added = 0;
        for (score, member) in members {
            if zs.insert(member.clone(), *score).is_none() {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Adds `delta` to the member score, starting from 0 when absent.
    pub fn zincrby(
        &mut self,
        key: &str,
        member: &str,
        delta: f64,
        now_ms: u64,
    ) -> Result<f64, StoreError> {
        self.evict_stale(key, now_ms);
        let zs = self.zset_entry(key)?;
        let new_score = zs.get(member).copied().unwrap_or(0.0) + delta;
        zs.insert(member.to_owned(), new_score);
        Ok(new_score)
    }

    /// Drops an emptied set.
    pub fn zrem(&mut self, key: &str, members: &[String], now_ms: u64) -> Result<u64, StoreError> {
        self.evict_stale(key, now_ms);
        let Some(slot) = self.slots.get_mut(key) else {
            return Ok(0);
        };
        let Value::SortedSet(zs) = &mut slot.value else {
            return Err(StoreError::WrongType);
        };
        let mut removed = 0_u64;
        for member in members {
            if zs.remove(member.as_str()).is_some() {
                removed += 1;
            }
        }
        if zs.is_empty() {
            self.slots.remove(key);
        }
        Ok(removed)
    }

    pub fn zscore(
        &mut self,
        key: &str,
        member: &str,
        now_ms: u64,
    ) -> Result<Option<f64>, StoreError> {
        self.evict_stale(key, now_ms);
        Ok(self.zset_ref(key)?.and_then(|zs| zs.get(member).copied()))
    }

    pub fn zcard(&mut self, key: &str, now_ms: u64) -> Result<usize, StoreError> {
        self.evict_stale(key, now_ms);
        Ok(self.zset_ref(key)?.map_or(0, HashMap::len))
    }

    /// Zero-based ascending rank.
    pub fn zrank(
        &mut self,
        key: &str,
        member: &str,
        now_ms: u64,
    ) -> Result<Option<usize>, StoreError> {
        self.evict_stale(key, now_ms);
        let Some(zs) = self.zset_ref(key)? else {
            return Ok(None);
        };
        let Some(score) = zs.get(member).copied() else {
            return Ok(None);
        };
        let rank = zs
            .iter()
            .filter(|(m, s)| ranks_before(**s, m, score, member))
            .count();
        Ok(Some(rank))
    }

    /// Return `(member, score)` pairs sorted ascending, by index range.
    pub fn zrange_withscores(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
        now_ms: u64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.evict_stale(key, now_ms);
        let Some(zs) = self.zset_ref(key)? else {
            return Ok(Vec::new());
        };
        let sorted = ordered_pairs(zs);
        let Some((s, e)) = clamp_range(start, stop, sorted.len()) else {
            return Ok(Vec::new());
        };
        Ok(sorted[s..=e]
            .iter()
            .map(|(score, m)| (m.clone(), *score))
            .collect())
    }

    /// Return `(member, score)` pairs with scores inside `[min, max]`, ascending.
    pub fn zrangebyscore_withscores(
        &mut self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        now_ms: u64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.evict_stale(key, now_ms);
        let Some(zs) = self.zset_ref(key)? else {
            return Ok(Vec::new());
        };
        Ok(ordered_pairs(zs)
            .into_iter()
            .filter(|(s, _)| min.admits_from_below(*s) && max.admits_from_above(*s))
            .map(|(s, m)| (m, s))
            .collect())
    }

    pub fn zremrangebyscore(
        &mut self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        self.evict_stale(key, now_ms);
        let Some(slot) = self.slots.get_mut(key) else {
            return Ok(0);
        };
        let Value::SortedSet(zs) = &mut slot.value else {
            return Err(StoreError::WrongType);
        };
        let before = zs.len();
        zs.retain(|_, s| !(min.admits_from_below(*s) && max.admits_from_above(*s)));
        let removed = (before - zs.len()) as u64;
        if zs.is_empty() {
            self.slots.remove(key);
        }
        Ok(removed)
    }

    pub fn zremrangebyrank(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        self.evict_stale(key, now_ms);
        let Some(slot) = self.slots.get_mut(key) else {
            return Ok(0);
        };
        let Value::SortedSet(zs) = &mut slot.value else {
            return Err(StoreError::WrongType);
        };
        let sorted = ordered_pairs(zs);
        let Some((s, e)) = clamp_range(start, stop, sorted.len()) else {
            return Ok(0);
        };
        for (_, member) in &sorted[s..=e] {
            zs.remove(member);
        }
        if zs.is_empty() {
            self.slots.remove(key);
        }
        Ok((e - s + 1) as u64)
    }

    /// Intersect `sources` with per-source `weights`, combine with
    /// `aggregate` and overwrite `dest`. A missing source is an empty set.
    /// Returns the cardinality of the stored result.
    pub fn zinterstore(
        &mut self,
        dest: &str,
        sources: &[String],
        weights: &[f64],
        aggregate: Aggregate,
        now_ms: u64,
    ) -> Result<usize, StoreError> {
        if !weights.is_empty() && weights.len() != sources.len() {
            return Err(StoreError::WeightCountMismatch);
        }
        let mut sets = Vec::with_capacity(sources.len());
        for key in sources {
            self.evict_stale(key, now_ms);
            sets.push(self.zset_ref(key)?.cloned().unwrap_or_default());
        }
        let weight_of = |idx: usize| weights.get(idx).copied().unwrap_or(1.0);

        let mut result: HashMap<String, f64> = HashMap::new();
        if let Some((first, rest)) = sets.split_first() {
            'members: for (member, score) in first {
                let mut acc = weighted(*score, weight_of(0));
                for (offset, other) in rest.iter().enumerate() {
                    let Some(other_score) = other.get(member) else {
                        continue 'members;
                    };
                    acc = aggregate.combine(acc, weighted(*other_score, weight_of(offset + 1)));
                }
                result.insert(member.clone(), acc);
            }
        }

        self.evict_stale(dest, now_ms);
        let count = result.len();
        if result.is_empty() {
            self.slots.remove(dest);
        } else {
            self.slots.insert(
                dest.to_owned(),
                Slot {
                    value: Value::SortedSet(result),
                    deadline_ms: None,
                },
            );
        }
        Ok(count)
    }

    // ── Keyspace bookkeeping ─────────────────────────────────────

    /// Content fingerprint of a key: value, type tag and expiry. A missing
    /// key has a fixed fingerprint, so create-then-delete is invisible.
    #[must_use]
    pub fn key_fingerprint(&mut self, key: &str, now_ms: u64) -> u64 {
        self.evict_stale(key, now_ms);
        let mut hash = FNV_OFFSET;
        let Some(slot) = self.slots.get(key) else {
            return fold_fnv(hash, b"-");
        };
        match &slot.value {
            Value::String(v) => {
                hash = fold_fnv(hash, b"S");
                hash = fold_fnv(hash, v.as_bytes());
            }
            Value::List(l) => {
                hash = fold_fnv(hash, b"L");
                for item in l {
                    hash = fold_fnv(hash, item.as_bytes());
                    hash = fold_fnv(hash, &[0]);
                }
            }
            Value::SortedSet(zs) => {
                hash = fold_fnv(hash, b"Z");
                let mut pairs: Vec<_> = zs.iter().collect();
                pairs.sort_by(|a, b| a.0.cmp(b.0));
                for (member, score) in pairs {
                    hash = fold_fnv(hash, member.as_bytes());
                    hash = fold_fnv(hash, &score.to_bits().to_le_bytes());
                }
            }
        }
        let expiry_bytes = slot.deadline_ms.unwrap_or(0).to_le_bytes();
        fold_fnv(hash, &expiry_bytes)
    }

    fn evict_stale(&mut self, key: &str, now_ms: u64) {
        let expired = self
            .slots
            .get(key)
            .and_then(|slot| slot.deadline_ms)
            .is_some_and(|deadline_ms| deadline_ms <= now_ms);
        if expired {
            self.slots.remove(key);
        }
    }

    fn zset_ref(&self, key: &str) -> Result<Option<&HashMap<String, f64>>, StoreError> {
        match self.slots.get(key) {
            Some(slot) => match &slot.value {
                Value::SortedSet(zs) => Ok(Some(zs)),
                _ => Err(StoreError::WrongType),
            },
            None => Ok(None),
        }
    }

    fn zset_entry(&mut self, key: &str) -> Result<&mut HashMap<String, f64>, StoreError> {
        let slot = self.slots.entry(key.to_owned()).or_insert_with(|| Slot {
            value: Value::SortedSet(HashMap::new()),
            deadline_ms: None,
        });
        match &mut slot.value {
            Value::SortedSet(zs) => Ok(zs),
            _ => Err(StoreError::WrongType),
        }
    }

    fn list_entry(&mut self, key: &str) -> Result<&mut VecDeque<String>, StoreError> {
        let slot = self.slots.entry(key.to_owned()).or_insert_with(|| Slot {
            value: Value::List(VecDeque::new()),
            deadline_ms: None,
        });
        match &mut slot.value {
            Value::List(l) => Ok(l),
            _ => Err(StoreError::WrongType),
        }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;

fn parse_i64(text: &str) -> Result<i64, StoreError> {
    text.parse::<i64>().map_err(|_| StoreError::ValueNotInteger)
}

fn fold_fnv(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Multiply a score by a weight; `0 * inf` collapses to 0 as Redis does.
fn weighted(score: f64, weight: f64) -> f64 {
    if weight == 0.0 { 0.0 } else { score * weight }
}

/// Negative indices count back from `len`.
fn resolve_index(index: i64, len: i64) -> usize {
    if index < 0 {
        let adjusted = len.saturating_add(index);
        if adjusted < 0 { 0 } else { adjusted as usize }
    } else {
        index as usize
    }
}

/// Resolve `start..=stop` against `len`, returning in-bounds inclusive
/// indices or `None` when the range is empty.
fn clamp_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let ilen = i64::try_from(len).unwrap_or(i64::MAX);
    let s = resolve_index(start, ilen);
    if stop < 0 && ilen.saturating_add(stop) < 0 {
        return None;
    }
    let e = resolve_index(stop, ilen).min(len - 1);
    if s > e || s >= len {
        return None;
    }
    Some((s, e))
}

/// Score first, member bytes on ties.
fn cmp_score_member(s1: f64, m1: &str, s2: f64, m2: &str) -> Ordering {
    s1.total_cmp(&s2).then_with(|| m1.cmp(m2))
}

fn ranks_before(s1: f64, m1: &str, s2: f64, m2: &str) -> bool {
    cmp_score_member(s1, m1, s2, m2) == Ordering::Less
}

fn ordered_pairs(zs: &HashMap<String, f64>) -> Vec<(f64, String)> {
    let mut pairs: Vec<(f64, String)> = zs.iter().map(|(m, &s)| (s, m.clone())).collect();
    pairs.sort_by(|(s1, m1), (s2, m2)| cmp_score_member(*s1, m1, *s2, m2));
    pairs
}
