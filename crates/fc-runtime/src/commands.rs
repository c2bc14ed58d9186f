use std::time::Duration;

use fc_command::Command;
use fc_store::{Aggregate, PttlValue, ScoreBound};

use crate::{AdapterError, StoreAdapter};

/// Typed, non-transactional helpers over [`StoreAdapter::execute`].
pub trait Commands: StoreAdapter {
    fn get(&mut self, key: &str) -> Result<Option<String>, AdapterError> {
        Ok(self
            .execute(Command::Get { key: key.to_owned() })?
            .into_optional_text()?)
    }

    fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), AdapterError> {
        Ok(self
            .execute(Command::Set {
                key: key.to_owned(),
                value: value.to_owned(),
                ttl,
            })?
            .into_unit()?)
    }

    fn set_nx(&mut self, key: &str, value: &str) -> Result<bool, AdapterError> {
        Ok(self
            .execute(Command::SetNx {
                key: key.to_owned(),
                value: value.to_owned(),
            })?
            .into_bool()?)
    }

    fn del(&mut self, keys: &[&str]) -> Result<i64, AdapterError> {
        Ok(self
            .execute(Command::Del {
                keys: keys.iter().map(|k| (*k).to_owned()).collect(),
            })?
            .into_integer()?)
    }

    fn incr_by(&mut self, key: &str, delta: i64) -> Result<i64, AdapterError> {
        Ok(self
            .execute(Command::IncrBy {
                key: key.to_owned(),
                delta,
            })?
            .into_integer()?)
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool, AdapterError> {
        Ok(self
            .execute(Command::Expire {
                key: key.to_owned(),
                ttl,
            })?
            .into_bool()?)
    }

    fn ttl(&mut self, key: &str) -> Result<PttlValue, AdapterError> {
        Ok(self.execute(Command::Ttl { key: key.to_owned() })?.into_ttl()?)
    }

    fn rpush(&mut self, key: &str, value: &str) -> Result<i64, AdapterError> {
        Ok(self
            .execute(Command::RPush {
                key: key.to_owned(),
                values: vec![value.to_owned()],
            })?
            .into_integer()?)
    }

    fn lpush(&mut self, key: &str, value: &str) -> Result<i64, AdapterError> {
        Ok(self
            .execute(Command::LPush {
                key: key.to_owned(),
                values: vec![value.to_owned()],
            })?
            .into_integer()?)
    }

    fn lpop(&mut self, key: &str) -> Result<Option<String>, AdapterError> {
        Ok(self
            .execute(Command::LPop { key: key.to_owned() })?
            .into_optional_text()?)
    }

    fn lrange(&mut self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, AdapterError> {
        Ok(self
            .execute(Command::LRange {
                key: key.to_owned(),
                start,
                stop,
            })?
            .into_list()?)
    }

    fn llen(&mut self, key: &str) -> Result<i64, AdapterError> {
        Ok(self.execute(Command::LLen { key: key.to_owned() })?.into_integer()?)
    }

    fn lrem(&mut self, key: &str, count: i64, value: &str) -> Result<i64, AdapterError> {
        Ok(self
            .execute(Command::LRem {
                key: key.to_owned(),
                count,
                value: value.to_owned(),
            })?
            .into_integer()?)
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64) -> Result<i64, AdapterError> {
        Ok(self
            .execute(Command::ZAdd {
                key: key.to_owned(),
                members: vec![(score, member.to_owned())],
            })?
            .into_integer()?)
    }

    fn zincrby(&mut self, key: &str, member: &str, delta: f64) -> Result<f64, AdapterError> {
        Ok(self
            .execute(Command::ZIncrBy {
                key: key.to_owned(),
                member: member.to_owned(),
                delta,
            })?
            .into_score()?)
    }

    fn zrem(&mut self, key: &str, members: &[&str]) -> Result<i64, AdapterError> {
        Ok(self
            .execute(Command::ZRem {
                key: key.to_owned(),
                members: members.iter().map(|m| (*m).to_owned()).collect(),
            })?
            .into_integer()?)
    }

    fn zscore(&mut self, key: &str, member: &str) -> Result<Option<f64>, AdapterError> {
        Ok(self
            .execute(Command::ZScore {
                key: key.to_owned(),
                member: member.to_owned(),
            })?
            .into_optional_score()?)
    }

    fn zcard(&mut self, key: &str) -> Result<i64, AdapterError> {
        Ok(self.execute(Command::ZCard { key: key.to_owned() })?.into_integer()?)
    }

    fn zrank(&mut self, key: &str, member: &str) -> Result<Option<i64>, AdapterError> {
        Ok(self
            .execute(Command::ZRank {
                key: key.to_owned(),
                member: member.to_owned(),
            })?
            .into_optional_integer()?)
    }

    fn zrange_by_rank(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, AdapterError> {
        Ok(self
            .execute(Command::ZRangeByRank {
                key: key.to_owned(),
                start,
                stop,
            })?
            .into_scored()?)
    }

    fn zrange_by_score(
        &mut self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<(String, f64)>, AdapterError> {
        Ok(self
            .execute(Command::ZRangeByScore {
                key: key.to_owned(),
                min,
                max,
            })?
            .into_scored()?)
    }

    fn zremrangebyscore(
        &mut self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<i64, AdapterError> {
        Ok(self
            .execute(Command::ZRemRangeByScore {
                key: key.to_owned(),
                min,
                max,
            })?
            .into_integer()?)
    }

    fn zremrangebyrank(&mut self, key: &str, start: i64, stop: i64) -> Result<i64, AdapterError> {
        Ok(self
            .execute(Command::ZRemRangeByRank {
                key: key.to_owned(),
                start,
                stop,
            })?
            .into_integer()?)
    }

    fn zinterstore(
        &mut self,
        dest: &str,
        sources: &[&str],
        weights: &[f64],
        aggregate: Aggregate,
    ) -> Result<i64, AdapterError> {
        Ok(self
            .execute(Command::ZInterStore {
                dest: dest.to_owned(),
                sources: sources.iter().map(|k| (*k).to_owned()).collect(),
                weights: weights.to_vec(),
                aggregate,
            })?
            .into_integer()?)
    }
}

impl<T: StoreAdapter + ?Sized> Commands for T {}
