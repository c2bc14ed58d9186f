#![forbid(unsafe_code)]

use std::time::Duration;

use fc_store::{Aggregate, PttlValue, ScoreBound, Store, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("expected a {expected} reply, got {actual}")]
    WrongReplyType {
        expected: &'static str,
        actual: &'static str,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A single store operation. Batches and direct calls share this type, so a
/// queued command behaves exactly like the same command issued alone.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String, ttl: Option<Duration> },
    SetNx { key: String, value: String },
    Del { keys: Vec<String> },
    IncrBy { key: String, delta: i64 },
    Expire { key: String, ttl: Duration },
    Ttl { key: String },
    RPush { key: String, values: Vec<String> },
    LPush { key: String, values: Vec<String> },
    LPop { key: String },
    LRange { key: String, start: i64, stop: i64 },
    LLen { key: String },
    LRem { key: String, count: i64, value: String },
    LTrim { key: String, start: i64, stop: i64 },
    ZAdd { key: String, members: Vec<(f64, String)> },
    ZIncrBy { key: String, member: String, delta: f64 },
    ZRem { key: String, members: Vec<String> },
    ZScore { key: String, member: String },
    ZCard { key: String },
    ZRank { key: String, member: String },
    ZRangeByRank { key: String, start: i64, stop: i64 },
    ZRangeByScore { key: String, min: ScoreBound, max: ScoreBound },
    ZRemRangeByScore { key: String, min: ScoreBound, max: ScoreBound },
    ZRemRangeByRank { key: String, start: i64, stop: i64 },
    ZInterStore {
        dest: String,
        sources: Vec<String>,
        weights: Vec<f64>,
        aggregate: Aggregate,
    },
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "GET",
            Self::Set { .. } => "SET",
            Self::SetNx { .. } => "SETNX",
            Self::Del { .. } => "DEL",
            Self::IncrBy { .. } => "INCRBY",
            Self::Expire { .. } => "PEXPIRE",
            Self::Ttl { .. } => "PTTL",
            Self::RPush { .. } => "RPUSH",
            Self::LPush { .. } => "LPUSH",
            Self::LPop { .. } => "LPOP",
            Self::LRange { .. } => "LRANGE",
            Self::LLen { .. } => "LLEN",
            Self::LRem { .. } => "LREM",
            Self::LTrim { .. } => "LTRIM",
            Self::ZAdd { .. } => "ZADD",
            Self::ZIncrBy { .. } => "ZINCRBY",
            Self::ZRem { .. } => "ZREM",
            Self::ZScore { .. } => "ZSCORE",
            Self::ZCard { .. } => "ZCARD",
            Self::ZRank { .. } => "ZRANK",
            Self::ZRangeByRank { .. } => "ZRANGE",
            Self::ZRangeByScore { .. } => "ZRANGEBYSCORE",
            Self::ZRemRangeByScore { .. } => "ZREMRANGEBYSCORE",
            Self::ZRemRangeByRank { .. } => "ZREMRANGEBYRANK",
            Self::ZInterStore { .. } => "ZINTERSTORE",
        }
    }
}

/// Result of a command. Inside a committed batch a failing command yields
/// `Reply::Error` in its slot while the rest of the batch still applies.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    Nil,
    Bool(bool),
    Integer(i64),
    Score(f64),
    Text(String),
    Ttl(PttlValue),
    List(Vec<String>),
    Scored(Vec<(String, f64)>),
    Error(StoreError),
}

impl Reply {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Score(_) => "score",
            Self::Text(_) => "text",
            Self::Ttl(_) => "ttl",
            Self::List(_) => "list",
            Self::Scored(_) => "scored",
            Self::Error(_) => "error",
        }
    }

    fn mismatch(&self, expected: &'static str) -> CommandError {
        match self {
            Self::Error(err) => CommandError::Store(*err),
            other => CommandError::WrongReplyType {
                expected,
                actual: other.kind(),
            },
        }
    }

    pub fn into_unit(self) -> Result<(), CommandError> {
        match self {
            Self::Ok => Ok(()),
            other => Err(other.mismatch("ok")),
        }
    }

    pub fn into_bool(self) -> Result<bool, CommandError> {
        match self {
            Self::Bool(b) => Ok(b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn into_integer(self) -> Result<i64, CommandError> {
        match self {
            Self::Integer(n) => Ok(n),
            other => Err(other.mismatch("integer")),
        }
    }

    pub fn into_score(self) -> Result<f64, CommandError> {
        match self {
            Self::Score(s) => Ok(s),
            other => Err(other.mismatch("score")),
        }
    }

    pub fn into_optional_score(self) -> Result<Option<f64>, CommandError> {
        match self {
            Self::Score(s) => Ok(Some(s)),
            Self::Nil => Ok(None),
            other => Err(other.mismatch("score")),
        }
    }

    pub fn into_optional_text(self) -> Result<Option<String>, CommandError> {
        match self {
            Self::Text(text) => Ok(Some(text)),
            Self::Nil => Ok(None),
            other => Err(other.mismatch("text")),
        }
    }

    pub fn into_optional_integer(self) -> Result<Option<i64>, CommandError> {
        match self {
            Self::Integer(n) => Ok(Some(n)),
            Self::Nil => Ok(None),
            other => Err(other.mismatch("integer")),
        }
    }

    pub fn into_ttl(self) -> Result<PttlValue, CommandError> {
        match self {
            Self::Ttl(ttl) => Ok(ttl),
            other => Err(other.mismatch("ttl")),
        }
    }

    pub fn into_list(self) -> Result<Vec<String>, CommandError> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(other.mismatch("list")),
        }
    }

    pub fn into_scored(self) -> Result<Vec<(String, f64)>, CommandError> {
        match self {
            Self::Scored(pairs) => Ok(pairs),
            other => Err(other.mismatch("scored")),
        }
    }
}

fn count_reply(n: impl TryInto<i64>) -> Reply {
    Reply::Integer(n.try_into().unwrap_or(i64::MAX))
}

fn duration_ms(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

/// Apply one command to the store at `now_ms`.
pub fn apply_command(
    command: &Command,
    store: &mut Store,
    now_ms: u64,
) -> Result<Reply, CommandError> {
    let reply = match command {
        Command::Get { key } => match store.get(key, now_ms)? {
            Some(value) => Reply::Text(value),
            None => Reply::Nil,
        },
        Command::Set { key, value, ttl } => {
            store.set(key, value.clone(), ttl.map(duration_ms), now_ms);
            Reply::Ok
        }
        Command::SetNx { key, value } => Reply::Bool(store.setnx(key, value.clone(), now_ms)),
        Command::Del { keys } => count_reply(store.del(keys, now_ms)),
        Command::IncrBy { key, delta } => Reply::Integer(store.incrby(key, *delta, now_ms)?),
        Command::Expire { key, ttl } => {
            let ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            Reply::Bool(store.expire_milliseconds(key, ms, now_ms))
        }
        Command::Ttl { key } => Reply::Ttl(store.pttl(key, now_ms)),
        Command::RPush { key, values } => count_reply(store.rpush(key, values, now_ms)?),
        Command::LPush { key, values } => count_reply(store.lpush(key, values, now_ms)?),
        Command::LPop { key } => match store.lpop(key, now_ms)? {
            Some(value) => Reply::Text(value),
            None => Reply::Nil,
        },
        Command::LRange { key, start, stop } => {
            Reply::List(store.lrange(key, *start, *stop, now_ms)?)
        }
        Command::LLen { key } => count_reply(store.llen(key, now_ms)?),
        Command::LRem { key, count, value } => count_reply(store.lrem(key, *count, value, now_ms)?),
        Command::LTrim { key, start, stop } => {
            store.ltrim(key, *start, *stop, now_ms)?;
            Reply::Ok
        }
        Command::ZAdd { key, members } => count_reply(store.zadd(key, members, now_ms)?),
        Command::ZIncrBy { key, member, delta } => {
            Reply::Score(store.zincrby(key, member, *delta, now_ms)?)
        }
        Command::ZRem { key, members } => count_reply(store.zrem(key, members, now_ms)?),
        Command::ZScore { key, member } => match store.zscore(key, member, now_ms)? {
            Some(score) => Reply::Score(score),
            None => Reply::Nil,
        },
        Command::ZCard { key } => count_reply(store.zcard(key, now_ms)?),
        Command::ZRank { key, member } => match store.zrank(key, member, now_ms)? {
            Some(rank) => count_reply(rank),
            None => Reply::Nil,
        },
        Command::ZRangeByRank { key, start, stop } => {
            Reply::Scored(store.zrange_withscores(key, *start, *stop, now_ms)?)
        }
        Command::ZRangeByScore { key, min, max } => {
            Reply::Scored(store.zrangebyscore_withscores(key, *min, *max, now_ms)?)
        }
        Command::ZRemRangeByScore { key, min, max } => {
            count_reply(store.zremrangebyscore(key, *min, *max, now_ms)?)
        }
        Command::ZRemRangeByRank { key, start, stop } => {
            count_reply(store.zremrangebyrank(key, *start, *stop, now_ms)?)
        }
        Command::ZInterStore {
            dest,
            sources,
            weights,
            aggregate,
        } => count_reply(store.zinterstore(dest, sources, weights, *aggregate, now_ms)?),
    };
    Ok(reply)
}

/// Keys a command reads or writes, in argument order.
#[must_use]
pub fn command_keys(command: &Command) -> Vec<&str> {
    match command {
        Command::Del { keys } => keys.iter().map(String::as_str).collect(),
        Command::ZInterStore { dest, sources, .. } => std::iter::once(dest.as_str())
            .chain(sources.iter().map(String::as_str))
            .collect(),
        Command::Get { key }
        | Command::Set { key, .. }
        | Command::SetNx { key, .. }
        | Command::IncrBy { key, .. }
        | Command::Expire { key, .. }
        | Command::Ttl { key }
        | Command::RPush { key, .. }
        | Command::LPush { key, .. }
        | Command::LPop { key }
        | Command::LRange { key, .. }
        | Command::LLen { key }
        | Command::LRem { key, .. }
        | Command::LTrim { key, .. }
        | Command::ZAdd { key, .. }
        | Command::ZIncrBy { key, .. }
        | Command::ZRem { key, .. }
        | Command::ZScore { key, .. }
        | Command::ZCard { key }
        | Command::ZRank { key, .. }
        | Command::ZRangeByRank { key, .. }
        | Command::ZRangeByScore { key, .. }
        | Command::ZRemRangeByScore { key, .. }
        | Command::ZRemRangeByRank { key, .. } => vec![key.as_str()],
    }
}
